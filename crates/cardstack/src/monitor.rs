//! Reader and card presence monitoring
//!
//! A side channel next to the layer stack: it never touches a stack, it only
//! reports readers coming and going and cards being inserted or pulled.

use std::collections::BTreeSet;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::binding::ReaderBinding;

/// Snapshot of a reader's state flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventState {
    /// Differs from the state the caller last acknowledged
    pub changed: bool,
    pub unavailable: bool,
    pub empty: bool,
    pub present: bool,
    pub exclusive: bool,
    pub in_use: bool,
    pub mute: bool,
}

impl EventState {
    /// Equality ignoring the `changed` marker
    pub fn same_as(&self, other: &EventState) -> bool {
        EventState {
            changed: false,
            ..*self
        } == EventState {
            changed: false,
            ..*other
        }
    }
}

/// Per-reader record exchanged with [`ReaderBinding::status_change`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderState {
    pub reader_name: String,
    /// State the caller believes the reader is in
    pub current_state: EventState,
    /// State reported by the last poll
    pub event_state: EventState,
    atr: Vec<u8>,
}

impl ReaderState {
    pub fn new(reader_name: impl Into<String>) -> Self {
        Self {
            reader_name: reader_name.into(),
            current_state: EventState::default(),
            event_state: EventState::default(),
            atr: Vec::new(),
        }
    }

    /// ATR of the card in the reader, empty when no card is present
    pub fn atr(&self) -> &[u8] {
        &self.atr
    }

    /// Store the ATR from a driver buffer that may be longer than the
    /// reported `len`.
    pub fn set_atr(&mut self, buf: &[u8], len: usize) {
        self.atr.clear();
        self.atr.extend_from_slice(&buf[..len.min(buf.len())]);
    }

    /// Acknowledge the last poll result
    pub fn sync_current_state(&mut self) {
        self.current_state = EventState {
            changed: false,
            ..self.event_state
        };
    }
}

/// Messages sent from the monitor thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// Reader was plugged in
    ReaderAvailable { reader_name: String },
    /// Reader was unplugged
    ReaderUnavailable { reader_name: String },
    /// Card was detected
    CardInserted { reader_name: String, atr: Vec<u8> },
    /// Card was removed
    CardRemoved { reader_name: String },
    /// Polling failed
    Error { message: String },
}

/// Commands sent to the monitor thread
#[derive(Debug)]
pub enum MonitorCommand {
    /// Stop the monitor thread
    Stop,
}

/// Background thread watching a binding for reader and card changes
pub struct ReaderMonitor {
    binding: Arc<dyn ReaderBinding>,
    poll: Duration,
    event_tx: Sender<ReaderEvent>,
    command_rx: Receiver<MonitorCommand>,
}

impl ReaderMonitor {
    /// Spawn a monitor thread; `poll` bounds how long each status wait blocks.
    pub fn spawn(
        binding: Arc<dyn ReaderBinding>,
        poll: Duration,
    ) -> (Receiver<ReaderEvent>, Sender<MonitorCommand>) {
        let (event_tx, event_rx) = mpsc::channel();
        let (command_tx, command_rx) = mpsc::channel();

        thread::spawn(move || {
            let monitor = ReaderMonitor {
                binding,
                poll,
                event_tx,
                command_rx,
            };
            monitor.run();
        });

        (event_rx, command_tx)
    }

    fn run(self) {
        info!("Reader monitor started");

        let mut states: Vec<ReaderState> = Vec::new();

        loop {
            if let Ok(MonitorCommand::Stop) = self.command_rx.try_recv() {
                info!("Reader monitor stopping");
                break;
            }

            if !self.refresh_readers(&mut states) {
                break;
            }

            if states.is_empty() {
                thread::sleep(self.poll);
                continue;
            }

            if let Err(e) = self.binding.status_change(self.poll, &mut states) {
                warn!(error = %e, "Reader status poll failed");
                if !self.emit(ReaderEvent::Error {
                    message: e.to_string(),
                }) {
                    break;
                }
                thread::sleep(self.poll);
                continue;
            }

            if !self.report_changes(&mut states) {
                break;
            }
        }

        info!("Reader monitor stopped");
    }

    /// Track readers appearing and disappearing. Returns false once nobody
    /// is listening anymore.
    fn refresh_readers(&self, states: &mut Vec<ReaderState>) -> bool {
        let attached: BTreeSet<String> = match self.binding.list_readers() {
            Ok(readers) => readers.into_iter().collect(),
            Err(e) => {
                // Known readers stay tracked until a listing succeeds
                warn!(error = %e, "Reader listing failed");
                return self.emit(ReaderEvent::Error {
                    message: e.to_string(),
                });
            }
        };

        let mut listening = true;
        states.retain(|state| {
            if attached.contains(&state.reader_name) {
                return true;
            }
            info!(reader = %state.reader_name, "Reader removed");
            if state.current_state.present {
                listening &= self.emit(ReaderEvent::CardRemoved {
                    reader_name: state.reader_name.clone(),
                });
            }
            listening &= self.emit(ReaderEvent::ReaderUnavailable {
                reader_name: state.reader_name.clone(),
            });
            false
        });

        for reader_name in attached {
            if states.iter().any(|s| s.reader_name == reader_name) {
                continue;
            }
            info!(reader = %reader_name, "Reader attached");
            listening &= self.emit(ReaderEvent::ReaderAvailable {
                reader_name: reader_name.clone(),
            });
            states.push(ReaderState::new(reader_name));
        }

        listening
    }

    fn report_changes(&self, states: &mut [ReaderState]) -> bool {
        for state in states.iter_mut() {
            if !state.event_state.changed {
                continue;
            }

            let was_present = state.current_state.present;
            let is_present = state.event_state.present;
            state.sync_current_state();

            let event = match (was_present, is_present) {
                (false, true) => {
                    info!(reader = %state.reader_name, atr = %hex::encode_upper(state.atr()), "Card detected");
                    ReaderEvent::CardInserted {
                        reader_name: state.reader_name.clone(),
                        atr: state.atr().to_vec(),
                    }
                }
                (true, false) => {
                    info!(reader = %state.reader_name, "Card removed");
                    ReaderEvent::CardRemoved {
                        reader_name: state.reader_name.clone(),
                    }
                }
                _ => continue,
            };

            if !self.emit(event) {
                return false;
            }
        }
        true
    }

    fn emit(&self, event: ReaderEvent) -> bool {
        self.event_tx.send(event).is_ok()
    }
}
