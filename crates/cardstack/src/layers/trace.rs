//! Command/response logging layer

use tracing::{info, warn};

use crate::error::Result;
use crate::layer::{Chain, Layer};

/// Logs every exchange passing through it, leaving the bytes untouched.
pub struct TraceLayer {
    label: String,
}

impl TraceLayer {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl Default for TraceLayer {
    fn default() -> Self {
        Self::new("trace")
    }
}

impl Layer for TraceLayer {
    fn identity(&self) -> &str {
        &self.label
    }

    fn transmit(&self, chain: &Chain<'_>, command: &[u8]) -> Result<Vec<u8>> {
        info!(layer = %self.label, "> {}", hex::encode_upper(command));

        match chain.forward(command) {
            Ok(response) => {
                info!(layer = %self.label, "< {}", hex::encode_upper(&response));
                Ok(response)
            }
            Err(e) => {
                warn!(layer = %self.label, error = %e, "< failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{ShareMode, SimulatedBinding, SimulatedCard};
    use crate::layer::LayerHandle;
    use crate::stack::Stack;

    #[test]
    fn test_trace_is_transparent() {
        let binding = SimulatedBinding::with_card(
            "R",
            SimulatedCard::answering(vec![0x6F, 0x00, 0x90, 0x00]),
        );
        let stack = Stack::open(&binding, "R", ShareMode::Shared).unwrap();
        stack.add_layer(&LayerHandle::new(TraceLayer::default())).unwrap();

        assert_eq!(
            stack.transmit(&[0x00, 0xA4, 0x04, 0x00]).unwrap(),
            vec![0x6F, 0x00, 0x90, 0x00]
        );
        assert_eq!(binding.commands("R"), vec![vec![0x00, 0xA4, 0x04, 0x00]]);
    }
}
