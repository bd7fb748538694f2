use crate::config::Settings;
use crate::formatters::format_response;

use super::{open_binding, open_stack};

/// Parse APDUs given on the command line, e.g. `00A40400` or `00:A4:04:00`
pub(crate) fn parse_apdu(text: &str) -> Result<Vec<u8>, String> {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    let apdu = hex::decode(&cleaned).map_err(|e| format!("invalid APDU '{}': {}", text, e))?;
    if apdu.len() < 4 {
        return Err(format!("invalid APDU '{}': shorter than a 4 byte header", text));
    }
    Ok(apdu)
}

pub fn cmd_send(settings: &Settings, apdus: &[Vec<u8>]) -> Result<(), cardstack::Error> {
    let binding = open_binding(settings)?;
    let stack = open_stack(binding.as_ref(), settings)?;

    println!("Reader: {}", stack.reader_name());
    println!("Layers: {}\n", stack.identities().join(" > "));

    for apdu in apdus {
        println!("> {}", hex::encode_upper(apdu));
        let response = stack.transmit(apdu)?;
        println!("< {}\n", format_response(&response, settings.format));
    }
    Ok(())
}
