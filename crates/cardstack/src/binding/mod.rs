//! Native reader bindings
//!
//! The stack never talks to a driver directly. It goes through a
//! [`ReaderBinding`], which opens [`RawChannel`]s on named readers. Two
//! bindings ship with the crate: [`PcscBinding`] over the system PC/SC
//! service, and [`SimulatedBinding`], an in-memory scripted reader.

use std::time::Duration;

use crate::error::Result;
use crate::monitor::ReaderState;

#[cfg(feature = "pcsc")]
mod pcsc;
mod simulated;

#[cfg(feature = "pcsc")]
pub use self::pcsc::PcscBinding;
pub use simulated::{SimulatedBinding, SimulatedCard};

/// How a channel shares its reader with other connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShareMode {
    /// Other connections may use the reader concurrently
    #[default]
    Shared,
    /// No other connection may open the reader while this one is held
    Exclusive,
    /// Direct access to the reader, no card required
    Direct,
}

/// Connection factory for a family of readers.
pub trait ReaderBinding: Send + Sync {
    /// Names of the readers currently attached
    fn list_readers(&self) -> Result<Vec<String>>;

    /// Open a channel to the card in `reader_name`.
    ///
    /// Fails with [`crate::Error::Connection`] when the reader is absent,
    /// already held exclusively, or the driver refuses.
    fn open_channel(&self, reader_name: &str, share_mode: ShareMode) -> Result<Box<dyn RawChannel>>;

    /// Block until one of `states` differs from its `current_state`, or
    /// until `timeout` elapses. Each entry's `event_state` and ATR are
    /// refreshed in place.
    fn status_change(&self, timeout: Duration, states: &mut [ReaderState]) -> Result<()>;
}

/// An open connection to a card, as handed out by a [`ReaderBinding`].
pub trait RawChannel: Send {
    /// Send one command and wait for the response
    fn transmit(&self, command: &[u8]) -> Result<Vec<u8>>;

    /// Release the hardware handle.
    fn close(&mut self) -> Result<()>;
}
