//! Reader connection

use tracing::{debug, trace, warn};

use crate::binding::{RawChannel, ReaderBinding, ShareMode};
use crate::error::{ConnectionFailure, Error, Result};

/// An established connection to one reader.
///
/// A context is owned by exactly one stack (through its terminal layer) and
/// is closed when that stack is torn down.
pub struct Context {
    reader_name: String,
    share_mode: ShareMode,
    channel: Option<Box<dyn RawChannel>>,
}

impl Context {
    /// Open a channel on `reader_name` through `binding`
    pub fn open(binding: &dyn ReaderBinding, reader_name: &str, share_mode: ShareMode) -> Result<Self> {
        let channel = binding.open_channel(reader_name, share_mode)?;
        debug!(reader = %reader_name, ?share_mode, "Context opened");

        Ok(Self {
            reader_name: reader_name.to_string(),
            share_mode,
            channel: Some(channel),
        })
    }

    /// Open the first reader `binding` reports
    pub fn open_first(binding: &dyn ReaderBinding, share_mode: ShareMode) -> Result<Self> {
        let readers = binding.list_readers()?;
        let reader_name = readers.first().ok_or_else(|| Error::Connection {
            reader: "<any>".to_string(),
            reason: ConnectionFailure::ReaderAbsent,
        })?;
        Self::open(binding, reader_name, share_mode)
    }

    pub fn reader_name(&self) -> &str {
        &self.reader_name
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// Raw exchange with the card, no layer involved
    pub fn transmit(&self, command: &[u8]) -> Result<Vec<u8>> {
        let channel = self.channel.as_ref().ok_or(Error::NotConnected)?;

        trace!(reader = %self.reader_name, command = %hex::encode_upper(command), "raw transmit");
        let response = channel.transmit(command)?;
        trace!(reader = %self.reader_name, response = %hex::encode_upper(&response), "raw response");

        Ok(response)
    }

    /// Release the connection. Closing twice is a no-op; a driver failure
    /// while disconnecting is logged and otherwise ignored.
    pub fn close(&mut self) {
        let Some(mut channel) = self.channel.take() else {
            return;
        };

        match channel.close() {
            Ok(()) => debug!(reader = %self.reader_name, "Context closed"),
            Err(e) => warn!(reader = %self.reader_name, error = %e, "Context close failed"),
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("reader_name", &self.reader_name)
            .field("share_mode", &self.share_mode)
            .field("open", &self.is_open())
            .finish()
    }
}
