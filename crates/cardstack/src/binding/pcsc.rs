//! PC/SC reader binding

use std::ffi::CString;
use std::time::Duration;

use pcsc::{Card, Context, Disposition, Protocols, Scope, State, MAX_BUFFER_SIZE};
use tracing::{debug, warn};

use super::{RawChannel, ReaderBinding, ShareMode};
use crate::error::{ConnectionFailure, Error, Result, TransportError};
use crate::monitor::{EventState, ReaderState};

/// Reader binding backed by the system PC/SC service
pub struct PcscBinding {
    context: Context,
}

impl PcscBinding {
    /// Establish a user-scope PC/SC context
    pub fn new() -> Result<Self> {
        let context = Context::establish(Scope::User).map_err(|e| connection_error("PC/SC", e))?;
        Ok(Self { context })
    }
}

impl ReaderBinding for PcscBinding {
    fn list_readers(&self) -> Result<Vec<String>> {
        let mut readers_buf = [0; 2048];
        let readers = match self.context.list_readers(&mut readers_buf) {
            Ok(readers) => readers,
            Err(pcsc::Error::NoReadersAvailable) => return Ok(Vec::new()),
            Err(e) => return Err(connection_error("PC/SC", e)),
        };

        Ok(readers.map(|r| r.to_string_lossy().into_owned()).collect())
    }

    fn open_channel(&self, reader_name: &str, share_mode: ShareMode) -> Result<Box<dyn RawChannel>> {
        let reader = reader_cstring(reader_name)?;
        let share_mode = match share_mode {
            ShareMode::Shared => pcsc::ShareMode::Shared,
            ShareMode::Exclusive => pcsc::ShareMode::Exclusive,
            ShareMode::Direct => pcsc::ShareMode::Direct,
        };

        let card = self
            .context
            .connect(&reader, share_mode, Protocols::ANY)
            .map_err(|e| connection_error(reader_name, e))?;
        debug!(reader = %reader_name, "PC/SC card connected");

        Ok(Box::new(PcscChannel {
            card: Some(card),
            reader_name: reader_name.to_string(),
        }))
    }

    fn status_change(&self, timeout: Duration, states: &mut [ReaderState]) -> Result<()> {
        let mut natives = Vec::with_capacity(states.len());
        for state in states.iter() {
            natives.push(pcsc::ReaderState::new(
                reader_cstring(&state.reader_name)?,
                to_pcsc_state(&state.current_state),
            ));
        }

        match self.context.get_status_change(timeout, &mut natives) {
            Ok(()) => {}
            // Nothing changed before the deadline; event states stay as they were
            Err(pcsc::Error::Timeout) => return Ok(()),
            Err(e) => return Err(transport_error(e).into()),
        }

        for (state, native) in states.iter_mut().zip(&natives) {
            state.event_state = from_pcsc_state(native.event_state());
            let atr = native.atr();
            state.set_atr(atr, atr.len());
        }
        Ok(())
    }
}

/// One connected card
struct PcscChannel {
    card: Option<Card>,
    reader_name: String,
}

impl RawChannel for PcscChannel {
    fn transmit(&self, command: &[u8]) -> Result<Vec<u8>> {
        let card = self.card.as_ref().ok_or(Error::NotConnected)?;

        let mut rapdu_buf = [0; MAX_BUFFER_SIZE];
        let rapdu = card
            .transmit(command, &mut rapdu_buf)
            .map_err(transport_error)?;

        Ok(rapdu.to_vec())
    }

    fn close(&mut self) -> Result<()> {
        let Some(card) = self.card.take() else {
            return Ok(());
        };

        if let Err((_card, e)) = card.disconnect(Disposition::LeaveCard) {
            warn!(reader = %self.reader_name, error = %e, "PC/SC disconnect failed");
            return Err(transport_error(e).into());
        }
        debug!(reader = %self.reader_name, "PC/SC card disconnected");
        Ok(())
    }
}

fn reader_cstring(reader_name: &str) -> Result<CString> {
    CString::new(reader_name).map_err(|_| Error::Connection {
        reader: reader_name.to_string(),
        reason: ConnectionFailure::ReaderAbsent,
    })
}

fn connection_error(reader_name: &str, error: pcsc::Error) -> Error {
    let reason = match error {
        pcsc::Error::NoReadersAvailable
        | pcsc::Error::UnknownReader
        | pcsc::Error::ReaderUnavailable
        | pcsc::Error::NoService => ConnectionFailure::ReaderAbsent,
        pcsc::Error::SharingViolation => ConnectionFailure::ReaderBusy,
        pcsc::Error::NoSmartcard | pcsc::Error::RemovedCard => ConnectionFailure::NoCard,
        other => ConnectionFailure::Driver(other.to_string()),
    };

    Error::Connection {
        reader: reader_name.to_string(),
        reason,
    }
}

fn transport_error(error: pcsc::Error) -> TransportError {
    match error {
        pcsc::Error::RemovedCard | pcsc::Error::NoSmartcard => TransportError::CardRemoved,
        pcsc::Error::ResetCard => TransportError::CardReset,
        pcsc::Error::Timeout => TransportError::Timeout,
        pcsc::Error::ReaderUnavailable | pcsc::Error::UnknownReader => {
            TransportError::ReaderUnavailable
        }
        other => TransportError::Driver(other.to_string()),
    }
}

fn to_pcsc_state(state: &EventState) -> State {
    let mut native = State::UNAWARE;
    if state.changed {
        native |= State::CHANGED;
    }
    if state.unavailable {
        native |= State::UNAVAILABLE;
    }
    if state.empty {
        native |= State::EMPTY;
    }
    if state.present {
        native |= State::PRESENT;
    }
    if state.exclusive {
        native |= State::EXCLUSIVE;
    }
    if state.in_use {
        native |= State::INUSE;
    }
    if state.mute {
        native |= State::MUTE;
    }
    native
}

fn from_pcsc_state(native: State) -> EventState {
    EventState {
        changed: native.contains(State::CHANGED),
        unavailable: native.contains(State::UNAVAILABLE),
        empty: native.contains(State::EMPTY),
        present: native.contains(State::PRESENT),
        exclusive: native.contains(State::EXCLUSIVE),
        in_use: native.contains(State::INUSE),
        mute: native.contains(State::MUTE),
    }
}
