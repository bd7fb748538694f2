//! In-memory scripted reader binding
//!
//! Behaves like a PC/SC service with a configurable set of readers. Cards
//! answer commands through a responder closure. Readers and cards can be
//! attached and pulled while channels are open, which drives the monitor
//! and the transport error paths without hardware.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use super::{RawChannel, ReaderBinding, ShareMode};
use crate::error::{ConnectionFailure, Error, Result, TransportError};
use crate::monitor::{EventState, ReaderState};

/// Commands kept per reader; older ones are dropped
const COMMAND_LOG_LIMIT: usize = 1024;

type Responder = dyn Fn(&[u8]) -> std::result::Result<Vec<u8>, TransportError> + Send + Sync;

/// A card that can be inserted into a simulated reader
#[derive(Clone)]
pub struct SimulatedCard {
    atr: Vec<u8>,
    responder: Arc<Responder>,
}

impl SimulatedCard {
    /// Card answering every command through `responder`
    pub fn new<F>(atr: Vec<u8>, responder: F) -> Self
    where
        F: Fn(&[u8]) -> std::result::Result<Vec<u8>, TransportError> + Send + Sync + 'static,
    {
        Self {
            atr,
            responder: Arc::new(responder),
        }
    }

    /// Card answering every command with the same bytes
    pub fn answering(response: Vec<u8>) -> Self {
        Self::new(vec![0x3B, 0x00], move |_| Ok(response.clone()))
    }
}

impl fmt::Debug for SimulatedCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedCard")
            .field("atr", &hex::encode_upper(&self.atr))
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct SimulatedReader {
    card: Option<SimulatedCard>,
    /// Bumped on every insertion so stale channels notice a card swap
    insertion: u64,
    shared_holders: usize,
    exclusive: bool,
    commands: VecDeque<Vec<u8>>,
}

impl SimulatedReader {
    fn event_state(&self) -> EventState {
        EventState {
            present: self.card.is_some(),
            empty: self.card.is_none(),
            exclusive: self.exclusive,
            in_use: self.exclusive || self.shared_holders > 0,
            ..EventState::default()
        }
    }
}

#[derive(Default)]
struct Shared {
    readers: Mutex<BTreeMap<String, SimulatedReader>>,
    changed: Condvar,
}

/// Scripted reader binding for tests and demos
#[derive(Clone, Default)]
pub struct SimulatedBinding {
    shared: Arc<Shared>,
}

impl SimulatedBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binding with one reader holding `card`
    pub fn with_card(reader_name: &str, card: SimulatedCard) -> Self {
        let binding = Self::new();
        binding.attach_reader(reader_name);
        binding.insert_card(reader_name, card);
        binding
    }

    /// Plug in an empty reader
    pub fn attach_reader(&self, reader_name: &str) {
        self.mutate(|readers| {
            readers.entry(reader_name.to_string()).or_default();
        });
    }

    /// Unplug a reader, dropping any card in it
    pub fn detach_reader(&self, reader_name: &str) {
        self.mutate(|readers| {
            readers.remove(reader_name);
        });
    }

    /// Put a card in the reader, replacing any card already there
    pub fn insert_card(&self, reader_name: &str, card: SimulatedCard) {
        self.mutate(|readers| {
            if let Some(reader) = readers.get_mut(reader_name) {
                reader.card = Some(card);
                reader.insertion += 1;
            }
        });
    }

    /// Pull the card out of the reader
    pub fn remove_card(&self, reader_name: &str) {
        self.mutate(|readers| {
            if let Some(reader) = readers.get_mut(reader_name) {
                reader.card = None;
            }
        });
    }

    /// Most recent commands the reader has received, oldest first
    pub fn commands(&self, reader_name: &str) -> Vec<Vec<u8>> {
        self.shared
            .readers
            .lock()
            .get(reader_name)
            .map(|reader| reader.commands.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Forget the commands logged for a reader
    pub fn clear_commands(&self, reader_name: &str) {
        if let Some(reader) = self.shared.readers.lock().get_mut(reader_name) {
            reader.commands.clear();
        }
    }

    fn mutate(&self, f: impl FnOnce(&mut BTreeMap<String, SimulatedReader>)) {
        let mut readers = self.shared.readers.lock();
        f(&mut readers);
        self.shared.changed.notify_all();
    }
}

impl ReaderBinding for SimulatedBinding {
    fn list_readers(&self) -> Result<Vec<String>> {
        Ok(self.shared.readers.lock().keys().cloned().collect())
    }

    fn open_channel(&self, reader_name: &str, share_mode: ShareMode) -> Result<Box<dyn RawChannel>> {
        let refuse = |reason| Error::Connection {
            reader: reader_name.to_string(),
            reason,
        };

        let mut readers = self.shared.readers.lock();
        let reader = readers
            .get_mut(reader_name)
            .ok_or_else(|| refuse(ConnectionFailure::ReaderAbsent))?;

        if reader.exclusive {
            return Err(refuse(ConnectionFailure::ReaderBusy));
        }
        if share_mode == ShareMode::Exclusive && reader.shared_holders > 0 {
            return Err(refuse(ConnectionFailure::ReaderBusy));
        }
        if share_mode != ShareMode::Direct && reader.card.is_none() {
            return Err(refuse(ConnectionFailure::NoCard));
        }

        match share_mode {
            ShareMode::Exclusive => reader.exclusive = true,
            ShareMode::Shared | ShareMode::Direct => reader.shared_holders += 1,
        }
        let insertion = reader.insertion;
        drop(readers);
        self.shared.changed.notify_all();

        debug!(reader = %reader_name, ?share_mode, "simulated channel opened");
        Ok(Box::new(SimulatedChannel {
            shared: Arc::clone(&self.shared),
            reader_name: reader_name.to_string(),
            share_mode,
            insertion,
            open: true,
        }))
    }

    fn status_change(&self, timeout: Duration, states: &mut [ReaderState]) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut readers = self.shared.readers.lock();

        loop {
            let mut any_changed = false;
            for state in states.iter_mut() {
                let mut event = match readers.get(&state.reader_name) {
                    Some(reader) => {
                        let atr = reader.card.as_ref().map(|c| c.atr.clone()).unwrap_or_default();
                        state.set_atr(&atr, atr.len());
                        reader.event_state()
                    }
                    None => EventState {
                        unavailable: true,
                        ..EventState::default()
                    },
                };
                event.changed = !event.same_as(&state.current_state);
                any_changed |= event.changed;
                state.event_state = event;
            }

            if any_changed {
                return Ok(());
            }
            if self.shared.changed.wait_until(&mut readers, deadline).timed_out() {
                return Ok(());
            }
        }
    }
}

struct SimulatedChannel {
    shared: Arc<Shared>,
    reader_name: String,
    share_mode: ShareMode,
    insertion: u64,
    open: bool,
}

impl SimulatedChannel {
    fn release(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        let mut readers = self.shared.readers.lock();
        if let Some(reader) = readers.get_mut(&self.reader_name) {
            match self.share_mode {
                ShareMode::Exclusive => reader.exclusive = false,
                ShareMode::Shared | ShareMode::Direct => {
                    reader.shared_holders = reader.shared_holders.saturating_sub(1)
                }
            }
        }
        drop(readers);
        self.shared.changed.notify_all();
        debug!(reader = %self.reader_name, "simulated channel closed");
    }
}

impl RawChannel for SimulatedChannel {
    fn transmit(&self, command: &[u8]) -> Result<Vec<u8>> {
        if !self.open {
            return Err(Error::NotConnected);
        }

        let responder = {
            let mut readers = self.shared.readers.lock();
            let reader = readers
                .get_mut(&self.reader_name)
                .ok_or(TransportError::ReaderUnavailable)?;
            if reader.commands.len() == COMMAND_LOG_LIMIT {
                reader.commands.pop_front();
            }
            reader.commands.push_back(command.to_vec());

            match &reader.card {
                Some(card) if reader.insertion == self.insertion => Arc::clone(&card.responder),
                Some(_) => return Err(TransportError::CardReset.into()),
                None => return Err(TransportError::CardRemoved.into()),
            }
        };

        // The responder runs unlocked so it may block without stalling other readers
        Ok(responder(command)?)
    }

    fn close(&mut self) -> Result<()> {
        self.release();
        Ok(())
    }
}

impl Drop for SimulatedChannel {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const READER: &str = "Sim Reader 0";

    #[test]
    fn test_missing_reader_is_absent() {
        let binding = SimulatedBinding::new();
        let err = binding.open_channel(READER, ShareMode::Shared).err();
        assert!(matches!(
            err,
            Some(Error::Connection {
                reason: ConnectionFailure::ReaderAbsent,
                ..
            })
        ));
    }

    #[test]
    fn test_command_log_is_bounded() {
        let binding = SimulatedBinding::with_card(READER, SimulatedCard::answering(vec![0x90, 0x00]));
        let channel = binding.open_channel(READER, ShareMode::Shared).unwrap();

        for i in 0..COMMAND_LOG_LIMIT + 10 {
            channel.transmit(&(i as u32).to_be_bytes()).unwrap();
        }
        let commands = binding.commands(READER);
        assert_eq!(commands.len(), COMMAND_LOG_LIMIT);
        assert_eq!(commands[0], 10u32.to_be_bytes().to_vec());

        binding.clear_commands(READER);
        assert!(binding.commands(READER).is_empty());
        channel.transmit(&[0x00]).unwrap();
        assert_eq!(binding.commands(READER), vec![vec![0x00]]);
    }

    #[test]
    fn test_exclusive_blocks_second_open() {
        let binding = SimulatedBinding::with_card(READER, SimulatedCard::answering(vec![0x90, 0x00]));
        let mut first = binding.open_channel(READER, ShareMode::Exclusive).unwrap();

        let err = binding.open_channel(READER, ShareMode::Shared).err();
        assert!(matches!(
            err,
            Some(Error::Connection {
                reason: ConnectionFailure::ReaderBusy,
                ..
            })
        ));

        first.close().unwrap();
        assert!(binding.open_channel(READER, ShareMode::Shared).is_ok());
    }

    #[test]
    fn test_shared_blocks_exclusive() {
        let binding = SimulatedBinding::with_card(READER, SimulatedCard::answering(vec![0x90, 0x00]));
        let _shared = binding.open_channel(READER, ShareMode::Shared).unwrap();
        assert!(binding.open_channel(READER, ShareMode::Exclusive).is_err());
        assert!(binding.open_channel(READER, ShareMode::Shared).is_ok());
    }

    #[test]
    fn test_removed_card_fails_transmit() {
        let binding = SimulatedBinding::with_card(READER, SimulatedCard::answering(vec![0x90, 0x00]));
        let channel = binding.open_channel(READER, ShareMode::Shared).unwrap();
        assert_eq!(channel.transmit(&[0x00]).unwrap(), vec![0x90, 0x00]);

        binding.remove_card(READER);
        assert_eq!(
            channel.transmit(&[0x00]),
            Err(Error::Transport(TransportError::CardRemoved))
        );

        binding.insert_card(READER, SimulatedCard::answering(vec![0x90, 0x00]));
        assert_eq!(
            channel.transmit(&[0x00]),
            Err(Error::Transport(TransportError::CardReset))
        );
    }

    #[test]
    fn test_status_change_reports_insertion() {
        let binding = SimulatedBinding::new();
        binding.attach_reader(READER);

        let mut states = vec![ReaderState::new(READER)];
        binding.status_change(Duration::ZERO, &mut states).unwrap();
        assert!(states[0].event_state.empty);
        states[0].sync_current_state();

        binding.insert_card(READER, SimulatedCard::answering(vec![0x90, 0x00]));
        binding
            .status_change(Duration::from_millis(100), &mut states)
            .unwrap();
        assert!(states[0].event_state.changed);
        assert!(states[0].event_state.present);
        assert_eq!(states[0].atr(), &[0x3B, 0x00]);
    }
}
