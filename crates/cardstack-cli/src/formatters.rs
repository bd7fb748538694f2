//! Response formatters for human-readable output

use cardstack::ApduResponse;
use clap::ValueEnum;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormatMode {
    /// Raw hex output
    Raw,
    /// Human-readable formatted output
    Human,
}

/// Format a raw card response
pub fn format_response(rapdu: &[u8], mode: FormatMode) -> String {
    if mode == FormatMode::Raw {
        return hex::encode_upper(rapdu);
    }

    let Ok(response) = ApduResponse::parse(rapdu) else {
        return format!("{} (no status word)", spaced_hex(rapdu));
    };

    let status = format!(
        "SW {} ({})",
        response.status_string(),
        describe_status(response.sw1, response.sw2)
    );
    if response.data.is_empty() {
        status
    } else if response.data.len() > 32 {
        format!(
            "{} ... ({} bytes total) | {}",
            spaced_hex(&response.data[..32]),
            response.data.len(),
            status
        )
    } else {
        format!("{} | {}", spaced_hex(&response.data), status)
    }
}

/// Hex with a space between bytes
pub fn spaced_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// ISO 7816-4 status word meaning (subset)
fn describe_status(sw1: u8, sw2: u8) -> String {
    match (sw1, sw2) {
        (0x90, 0x00) => "success".to_string(),
        (0x61, n) => format!("{} bytes still available", n),
        (0x62, 0x83) => "selected file invalidated".to_string(),
        (0x63, n) if n & 0xF0 == 0xC0 => format!("verification failed, {} tries left", n & 0x0F),
        (0x67, 0x00) => "wrong length".to_string(),
        (0x69, 0x82) => "security status not satisfied".to_string(),
        (0x69, 0x85) => "conditions of use not satisfied".to_string(),
        (0x6A, 0x82) => "file or application not found".to_string(),
        (0x6A, 0x86) => "incorrect P1/P2".to_string(),
        (0x6C, n) => format!("wrong Le, {} bytes available", n),
        (0x6D, 0x00) => "instruction not supported".to_string(),
        (0x6E, 0x00) => "class not supported".to_string(),
        _ => "unknown".to_string(),
    }
}
