//! T=0 response chaining layer

use tracing::debug;

use crate::apdu::{commands, with_le};
use crate::error::Result;
use crate::layer::{Chain, Layer};

/// Upper bound on GET RESPONSE rounds for one command
const MAX_ROUNDS: usize = 256;

/// Completes T=0 exchanges on behalf of the layers above it.
///
/// `61XX` answers are followed by GET RESPONSE until the card stops
/// signalling pending bytes, and the data of every round is concatenated.
/// A `6CXX` answer makes the layer re-issue the original command once with
/// Le set to `XX`.
#[derive(Debug, Default)]
pub struct GetResponseLayer;

impl GetResponseLayer {
    pub fn new() -> Self {
        Self
    }
}

impl Layer for GetResponseLayer {
    fn identity(&self) -> &str {
        "get-response"
    }

    fn transmit(&self, chain: &Chain<'_>, command: &[u8]) -> Result<Vec<u8>> {
        let mut rapdu = chain.forward(command)?;

        if let [.., 0x6C, le] = rapdu[..] {
            debug!(le, "wrong length, re-issuing command");
            rapdu = chain.forward(&with_le(command, le))?;
        }

        let mut data = Vec::new();
        for _ in 0..MAX_ROUNDS {
            let [.., 0x61, pending] = rapdu[..] else {
                break;
            };
            data.extend_from_slice(&rapdu[..rapdu.len() - 2]);
            debug!(pending, "fetching pending response bytes");
            rapdu = chain.forward(&commands::get_response(pending).build()?)?;
        }

        if data.is_empty() {
            return Ok(rapdu);
        }
        data.extend_from_slice(&rapdu);
        Ok(data)
    }
}
