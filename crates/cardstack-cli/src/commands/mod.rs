pub mod layers;
pub mod readers;
pub mod send;
pub mod watch;

use std::sync::Arc;

use cardstack::{ReaderBinding, SimulatedBinding, SimulatedCard, Stack};
use tracing::debug;

use crate::config::Settings;

/// Reader name used by `--simulate`
pub const SIMULATED_READER: &str = "Simulated Reader 0";

/// Pick the binding the settings ask for
pub(crate) fn open_binding(settings: &Settings) -> cardstack::Result<Arc<dyn ReaderBinding>> {
    if settings.simulate {
        debug!("Using simulated reader");
        let card = SimulatedCard::new(vec![0x3B, 0x80, 0x80, 0x01, 0x01], simulated_response);
        return Ok(Arc::new(SimulatedBinding::with_card(SIMULATED_READER, card)));
    }
    native_binding()
}

/// SELECT leaves an 8 byte FCI pending, GET RESPONSE returns it
fn simulated_response(command: &[u8]) -> Result<Vec<u8>, cardstack::TransportError> {
    match command.get(1) {
        Some(0xA4) => Ok(vec![0x61, 0x08]),
        Some(0xC0) => Ok(vec![0x6F, 0x06, 0x84, 0x04, 0xA0, 0x00, 0x00, 0x00, 0x90, 0x00]),
        Some(_) => Ok(vec![0x90, 0x00]),
        None => Ok(vec![0x67, 0x00]),
    }
}

#[cfg(feature = "pcsc")]
fn native_binding() -> cardstack::Result<Arc<dyn ReaderBinding>> {
    Ok(Arc::new(cardstack::PcscBinding::new()?))
}

#[cfg(not(feature = "pcsc"))]
fn native_binding() -> cardstack::Result<Arc<dyn ReaderBinding>> {
    Err(cardstack::Error::Connection {
        reader: "PC/SC".to_string(),
        reason: cardstack::ConnectionFailure::Driver(
            "built without PC/SC support, use --simulate".to_string(),
        ),
    })
}

/// Connect to the configured reader (or the first one) and mount the
/// configured layers, bottom first.
pub(crate) fn open_stack(binding: &dyn ReaderBinding, settings: &Settings) -> cardstack::Result<Stack> {
    let stack = match &settings.reader {
        Some(reader) => Stack::open(binding, reader, settings.share_mode)?,
        None => Stack::new(cardstack::Context::open_first(binding, settings.share_mode)?)?,
    };

    for kind in &settings.layers {
        stack.add_layer(&kind.build())?;
    }
    Ok(stack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileConfig, LayerKind, Overrides};

    fn simulated(layers: Vec<LayerKind>) -> Settings {
        Settings::resolve(
            FileConfig::default(),
            Overrides {
                layers,
                simulate: true,
                ..Overrides::default()
            },
        )
    }

    #[test]
    fn test_open_stack_mounts_layers_in_order() {
        let settings = simulated(vec![LayerKind::GetResponse, LayerKind::Trace]);
        let binding = open_binding(&settings).unwrap();
        let stack = open_stack(binding.as_ref(), &settings).unwrap();

        assert_eq!(stack.reader_name(), SIMULATED_READER);
        assert_eq!(stack.identities(), vec!["trace", "get-response", "PC/SC"]);
    }

    #[test]
    fn test_simulated_select_completes_through_get_response() {
        let settings = simulated(vec![LayerKind::GetResponse]);
        let binding = open_binding(&settings).unwrap();
        let stack = open_stack(binding.as_ref(), &settings).unwrap();

        let response = stack.transmit(&[0x00, 0xA4, 0x04, 0x00, 0x00]).unwrap();
        assert_eq!(
            response,
            vec![0x6F, 0x06, 0x84, 0x04, 0xA0, 0x00, 0x00, 0x00, 0x90, 0x00]
        );
    }

    #[test]
    fn test_unknown_reader_is_connection_error() {
        let mut settings = simulated(Vec::new());
        settings.reader = Some("Missing Reader".to_string());
        let binding = open_binding(&settings).unwrap();

        assert!(matches!(
            open_stack(binding.as_ref(), &settings),
            Err(cardstack::Error::Connection { .. })
        ));
    }
}
