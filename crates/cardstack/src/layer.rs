//! Layer contract
//!
//! A layer sits between the application and the reader. It receives each
//! command on its way down, decides what to hand to the layer below through
//! its [`Chain`], and returns whatever should travel back up. Layers drive
//! the descent themselves, so any layer may answer without forwarding.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::stack::{Arena, LayerKey, StackId};
use crate::terminal::TerminalLayer;

/// Relative traversal instruction for [`crate::Stack::request_layer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// One step closer to the application
    Previous,
    /// One step closer to the hardware
    Next,
}

/// Non-owning record of where a layer is mounted.
///
/// Handed to [`Layer::on_mount`]. It names the stack and the arena slot and
/// grants no access to either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mount {
    pub(crate) stack: StackId,
    pub(crate) key: LayerKey,
}

impl Mount {
    /// Identifier of the stack the layer is mounted in
    pub fn stack_id(&self) -> u64 {
        self.stack.0
    }
}

/// A participant in the transmission chain.
pub trait Layer: Send + Sync {
    /// Diagnostic label; never used to tell layers apart
    fn identity(&self) -> &str;

    /// Handle one command on its way to the card.
    ///
    /// Forward with [`Chain::forward`] to reach the layer below.
    fn transmit(&self, chain: &Chain<'_>, command: &[u8]) -> Result<Vec<u8>>;

    /// Called once the layer has been linked into a stack
    fn on_mount(&self, _mount: Mount) {}

    /// Called once the layer has been unlinked from its stack
    fn on_unmount(&self) {}
}

enum Variant {
    Terminal(TerminalLayer),
    Application(Box<dyn Layer>),
}

struct LayerCell {
    variant: Variant,
    mount: Mutex<Option<Mount>>,
}

/// Shared handle to a layer instance.
///
/// Identity is the instance: two handles are equal only when they point at
/// the same layer, whatever their labels say.
#[derive(Clone)]
pub struct LayerHandle(Arc<LayerCell>);

impl LayerHandle {
    /// Wrap an application layer
    pub fn new<L: Layer + 'static>(layer: L) -> Self {
        Self::from_variant(Variant::Application(Box::new(layer)))
    }

    pub(crate) fn terminal(layer: TerminalLayer) -> Self {
        Self::from_variant(Variant::Terminal(layer))
    }

    fn from_variant(variant: Variant) -> Self {
        Self(Arc::new(LayerCell {
            variant,
            mount: Mutex::new(None),
        }))
    }

    pub(crate) fn layer(&self) -> &dyn Layer {
        match &self.0.variant {
            Variant::Terminal(terminal) => terminal,
            Variant::Application(layer) => layer.as_ref(),
        }
    }

    pub(crate) fn as_terminal(&self) -> Option<&TerminalLayer> {
        match &self.0.variant {
            Variant::Terminal(terminal) => Some(terminal),
            Variant::Application(_) => None,
        }
    }

    pub fn identity(&self) -> &str {
        self.layer().identity()
    }

    pub fn is_terminal(&self) -> bool {
        self.as_terminal().is_some()
    }

    /// Where the layer is currently mounted, if anywhere
    pub fn mount(&self) -> Option<Mount> {
        *self.0.mount.lock()
    }

    pub fn is_mounted(&self) -> bool {
        self.mount().is_some()
    }

    /// Run the layer outside of any stack.
    ///
    /// Anything the layer forwards fails with [`Error::BrokenChain`], since
    /// nothing sits below it. Mounted layers must go through their stack.
    pub fn transmit_detached(&self, command: &[u8]) -> Result<Vec<u8>> {
        if self.is_mounted() {
            return Err(Error::AlreadyMounted {
                layer: self.identity().to_string(),
            });
        }

        let chain = Chain {
            position: Position::Detached {
                identity: self.identity(),
            },
        };
        self.layer().transmit(&chain, command)
    }

    pub(crate) fn mount_slot(&self) -> &Mutex<Option<Mount>> {
        &self.0.mount
    }

    pub(crate) fn same_instance(&self, other: &LayerHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for LayerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.same_instance(other)
    }
}

impl Eq for LayerHandle {}

impl fmt::Debug for LayerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerHandle")
            .field("identity", &self.identity())
            .field("mount", &self.mount())
            .finish()
    }
}

enum Position<'a> {
    Mounted { arena: &'a Arena, at: LayerKey },
    Detached { identity: &'a str },
}

/// A layer's view of its surroundings while it handles a command.
///
/// The chain borrows the stack's locked sequence read-only: a layer can look
/// at its neighbours and forward, but cannot add or remove layers.
pub struct Chain<'a> {
    position: Position<'a>,
}

impl<'a> Chain<'a> {
    pub(crate) fn mounted(arena: &'a Arena, at: LayerKey) -> Self {
        Self {
            position: Position::Mounted { arena, at },
        }
    }

    /// Label of the layer this chain belongs to
    pub fn identity(&self) -> &str {
        match &self.position {
            Position::Mounted { arena, at } => arena.layer_at(*at).identity(),
            Position::Detached { identity } => identity,
        }
    }

    /// Single-step neighbour of the current layer
    pub fn request_layer(&self, direction: Direction) -> Option<LayerHandle> {
        match &self.position {
            Position::Mounted { arena, at } => arena
                .neighbor(*at, direction)
                .map(|key| arena.layer_at(key).clone()),
            Position::Detached { .. } => None,
        }
    }

    /// Hand `command` to the layer below and return its response
    pub fn forward(&self, command: &[u8]) -> Result<Vec<u8>> {
        let broken = || Error::BrokenChain {
            layer: self.identity().to_string(),
        };

        match &self.position {
            Position::Mounted { arena, at } => {
                let next = arena.neighbor(*at, Direction::Next).ok_or_else(broken)?;
                arena.dispatch(next, command)
            }
            Position::Detached { .. } => Err(broken()),
        }
    }
}
