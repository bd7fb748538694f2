//! cardstack - Layered smart-card channel
//!
//! Commands reach a smart-card reader through a [`Stack`] of interceptor
//! layers. Each [`Layer`] may observe, rewrite or answer a command before it
//! reaches the reader, and do the same with the response on its way back.
//! The bottom of every stack is the terminal layer, bound to the reader
//! [`Context`] the stack was built on.
//!
//! ```
//! use cardstack::{LayerHandle, ShareMode, SimulatedBinding, SimulatedCard, Stack, TraceLayer};
//!
//! let binding = SimulatedBinding::with_card("Sim 0", SimulatedCard::answering(vec![0x90, 0x00]));
//! let stack = Stack::open(&binding, "Sim 0", ShareMode::Shared)?;
//! stack.add_layer(&LayerHandle::new(TraceLayer::default()))?;
//!
//! assert_eq!(stack.transmit(&[0x00, 0xA4, 0x04, 0x00])?, vec![0x90, 0x00]);
//! assert_eq!(stack.identities(), vec!["trace", "PC/SC"]);
//! # Ok::<(), cardstack::Error>(())
//! ```

pub mod apdu;
pub mod binding;
pub mod context;
pub mod error;
pub mod layer;
pub mod layers;
pub mod monitor;
pub mod stack;
pub mod terminal;

pub use apdu::{ApduCommand, ApduResponse};
pub use binding::{RawChannel, ReaderBinding, ShareMode, SimulatedBinding, SimulatedCard};
pub use context::Context;
pub use error::{ConnectionFailure, Error, Result, TransportError};
pub use layer::{Chain, Direction, Layer, LayerHandle, Mount};
pub use layers::{GetResponseLayer, TraceLayer};
pub use monitor::{EventState, MonitorCommand, ReaderEvent, ReaderMonitor, ReaderState};
pub use stack::Stack;
pub use terminal::TERMINAL_IDENTITY;

#[cfg(feature = "pcsc")]
pub use binding::PcscBinding;
