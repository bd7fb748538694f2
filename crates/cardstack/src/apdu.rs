//! APDU (Application Protocol Data Unit) command handling

use crate::error::{Error, Result, TransportError};
use crate::stack::Stack;

/// APDU response containing data and status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    /// Response data (without status word)
    pub data: Vec<u8>,
    /// Status word SW1
    pub sw1: u8,
    /// Status word SW2
    pub sw2: u8,
}

impl ApduResponse {
    /// Split a raw response into data and status word
    pub fn parse(rapdu: &[u8]) -> Result<Self> {
        if rapdu.len() < 2 {
            return Err(TransportError::MalformedResponse(format!(
                "{} byte response has no status word",
                rapdu.len()
            ))
            .into());
        }

        let sw1 = rapdu[rapdu.len() - 2];
        let sw2 = rapdu[rapdu.len() - 1];
        let data = rapdu[..rapdu.len() - 2].to_vec();

        Ok(Self { data, sw1, sw2 })
    }

    /// Check if the response indicates success (9000)
    pub fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// Get the full status word as a 16-bit value
    pub fn status_word(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Get status word as hex string (e.g., "9000")
    pub fn status_string(&self) -> String {
        format!("{:02X}{:02X}", self.sw1, self.sw2)
    }
}

/// APDU command builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduCommand {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: Vec<u8>,
    le: Option<u8>,
}

impl ApduCommand {
    /// Create a new APDU command
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    /// Set command data
    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Set expected response length
    pub fn le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    /// Build the APDU command bytes.
    ///
    /// Only short APDUs are supported, so data is limited to 255 bytes.
    pub fn build(&self) -> Result<Vec<u8>> {
        let mut apdu = vec![self.cla, self.ins, self.p1, self.p2];

        if !self.data.is_empty() {
            let lc = u8::try_from(self.data.len()).map_err(|_| Error::InvalidCommand {
                reason: format!("{} data bytes do not fit a short APDU", self.data.len()),
            })?;
            apdu.push(lc);
            apdu.extend_from_slice(&self.data);
        }

        if let Some(le) = self.le {
            apdu.push(le);
        }

        Ok(apdu)
    }

    /// Send this command through a layer stack
    pub fn send(&self, stack: &Stack) -> Result<ApduResponse> {
        ApduResponse::parse(&stack.transmit(&self.build()?)?)
    }
}

/// Replace (or add) the Le byte of a short APDU.
///
/// Commands whose length does not match any short APDU case are returned
/// unchanged.
pub fn with_le(command: &[u8], le: u8) -> Vec<u8> {
    let mut apdu = command.to_vec();
    match command.len() {
        // Case 1: header only
        4 => apdu.push(le),
        // Case 2: header + Le
        5 => apdu[4] = le,
        n if n > 5 => {
            let lc = command[4] as usize;
            if n == 5 + lc {
                // Case 3: header + Lc + data
                apdu.push(le);
            } else if n == 6 + lc {
                // Case 4: header + Lc + data + Le
                apdu[n - 1] = le;
            }
        }
        _ => {}
    }
    apdu
}

/// Common ISO 7816-4 commands
pub mod commands {
    use super::ApduCommand;

    /// SELECT command (by name/AID)
    pub fn select(aid: &[u8]) -> ApduCommand {
        ApduCommand::new(0x00, 0xA4, 0x04, 0x00)
            .data(aid.to_vec())
            .le(0x00)
    }

    /// GET RESPONSE command, fetching `le` pending bytes
    pub fn get_response(le: u8) -> ApduCommand {
        ApduCommand::new(0x00, 0xC0, 0x00, 0x00).le(le)
    }

    /// GET CHALLENGE command
    pub fn get_challenge(len: u8) -> ApduCommand {
        ApduCommand::new(0x00, 0x84, 0x00, 0x00).le(len)
    }
}
