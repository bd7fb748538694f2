//! Layer stack
//!
//! The stack is the only authority on layer order. Layers live in an arena of
//! generational slots linked top to bottom, so a neighbour lookup is a slot
//! read and a key stays valid while other layers come and go. The terminal
//! layer occupies the bottom slot for the whole life of the stack.
//!
//! One mutex guards the arena. [`Stack::transmit`] holds it for the complete
//! descent and ascent, and structural changes take the same lock, so a
//! transmission never sees a half-linked sequence and calls on one stack run
//! strictly one after another. A finished transmission hands the lock to the
//! longest waiter, so queued calls run in the order they queued. A layer must
//! not call back into its own stack from `transmit` or a mount hook: the lock
//! is not reentrant.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::binding::{ReaderBinding, ShareMode};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::layer::{Chain, Direction, LayerHandle, Mount};
use crate::terminal::TerminalLayer;

static NEXT_STACK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct StackId(pub(crate) u64);

/// Generational slot address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct LayerKey {
    index: u32,
    generation: u32,
}

struct Entry {
    layer: LayerHandle,
    prev: Option<LayerKey>,
    next: Option<LayerKey>,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

pub(crate) struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    top: LayerKey,
    terminal: LayerKey,
    len: usize,
}

impl Arena {
    fn new(terminal: LayerHandle) -> Self {
        let key = LayerKey {
            index: 0,
            generation: 0,
        };
        Self {
            slots: vec![Slot {
                generation: 0,
                entry: Some(Entry {
                    layer: terminal,
                    prev: None,
                    next: None,
                }),
            }],
            free: Vec::new(),
            top: key,
            terminal: key,
            len: 1,
        }
    }

    fn entry(&self, key: LayerKey) -> Option<&Entry> {
        let slot = self.slots.get(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    fn entry_mut(&mut self, key: LayerKey) -> Option<&mut Entry> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    /// Layer stored under a key taken from the arena itself.
    pub(crate) fn layer_at(&self, key: LayerKey) -> &LayerHandle {
        match self.entry(key) {
            Some(entry) => &entry.layer,
            // Keys only come from links inside this arena, which are kept in sync
            None => unreachable!("stale layer key {key:?}"),
        }
    }

    pub(crate) fn neighbor(&self, key: LayerKey, direction: Direction) -> Option<LayerKey> {
        let entry = self.entry(key)?;
        match direction {
            Direction::Previous => entry.prev,
            Direction::Next => entry.next,
        }
    }

    pub(crate) fn dispatch(&self, key: LayerKey, command: &[u8]) -> Result<Vec<u8>> {
        let layer = self.layer_at(key);
        trace!(layer = %layer.identity(), command = %hex::encode_upper(command), "layer transmit");
        let chain = Chain::mounted(self, key);
        layer.layer().transmit(&chain, command)
    }

    fn push_top(&mut self, layer: LayerHandle) -> LayerKey {
        let entry = Entry {
            layer,
            prev: None,
            next: Some(self.top),
        };

        let key = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                LayerKey {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                LayerKey {
                    index,
                    generation: 0,
                }
            }
        };

        let old_top = self.top;
        if let Some(old) = self.entry_mut(old_top) {
            old.prev = Some(key);
        }
        self.top = key;
        self.len += 1;
        key
    }

    /// Unlink a non-terminal slot and recycle it
    fn remove(&mut self, key: LayerKey) -> Option<LayerHandle> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);

        match entry.prev {
            Some(prev) => {
                if let Some(prev) = self.entry_mut(prev) {
                    prev.next = entry.next;
                }
            }
            // Non-terminal entries always have a successor
            None => self.top = entry.next.unwrap_or(self.terminal),
        }
        if let Some(next) = entry.next.and_then(|next| self.entry_mut(next)) {
            next.prev = entry.prev;
        }

        self.len -= 1;
        Some(entry.layer)
    }

    fn iter(&self) -> impl Iterator<Item = &LayerHandle> + '_ {
        std::iter::successors(Some(self.top), move |key| self.neighbor(*key, Direction::Next))
            .map(move |key| self.layer_at(key))
    }
}

/// Ordered chain of layers ending in the terminal layer of one reader.
pub struct Stack {
    id: StackId,
    reader_name: String,
    arena: Mutex<Arena>,
}

impl Stack {
    /// Build a stack over an open context. The terminal layer is mounted
    /// immediately and stays at the bottom until the stack is dropped.
    pub fn new(context: Context) -> Result<Self> {
        if !context.is_open() {
            return Err(Error::NotConnected);
        }

        let id = StackId(NEXT_STACK_ID.fetch_add(1, Ordering::Relaxed));
        let reader_name = context.reader_name().to_string();
        let terminal = LayerHandle::terminal(TerminalLayer::new(context));
        let arena = Arena::new(terminal.clone());

        let mount = Mount {
            stack: id,
            key: arena.terminal,
        };
        *terminal.mount_slot().lock() = Some(mount);
        terminal.layer().on_mount(mount);

        debug!(stack = id.0, reader = %reader_name, "Stack created");
        Ok(Self {
            id,
            reader_name,
            arena: Mutex::new(arena),
        })
    }

    /// Open `reader_name` through `binding` and build a stack on it
    pub fn open(binding: &dyn ReaderBinding, reader_name: &str, share_mode: ShareMode) -> Result<Self> {
        Self::new(Context::open(binding, reader_name, share_mode)?)
    }

    pub fn id(&self) -> u64 {
        self.id.0
    }

    pub fn reader_name(&self) -> &str {
        &self.reader_name
    }

    /// Send a command through every layer, top first
    pub fn transmit(&self, command: &[u8]) -> Result<Vec<u8>> {
        let arena = self.arena.lock();
        let response = arena.dispatch(arena.top, command);
        // Queued callers go in arrival order
        MutexGuard::unlock_fair(arena);
        response
    }

    /// Mount `layer` as the new top of the stack.
    pub fn add_layer(&self, layer: &LayerHandle) -> Result<()> {
        let mut arena = self.arena.lock();

        let mount = {
            let mut slot = layer.mount_slot().lock();
            if slot.is_some() {
                return Err(Error::AlreadyMounted {
                    layer: layer.identity().to_string(),
                });
            }

            let key = arena.push_top(layer.clone());
            let mount = Mount { stack: self.id, key };
            *slot = Some(mount);
            mount
        };

        layer.layer().on_mount(mount);
        debug!(stack = self.id.0, layer = %layer.identity(), depth = arena.len, "Layer mounted");
        Ok(())
    }

    /// Unmount `layer`; its neighbours become adjacent.
    pub fn release_layer(&self, layer: &LayerHandle) -> Result<()> {
        if layer.is_terminal() {
            return Err(Error::NotRemovable {
                layer: layer.identity().to_string(),
            });
        }

        let mut arena = self.arena.lock();
        let key = self.locate(&arena, layer)?;
        arena.remove(key);
        *layer.mount_slot().lock() = None;

        layer.layer().on_unmount();
        debug!(stack = self.id.0, layer = %layer.identity(), depth = arena.len, "Layer released");
        Ok(())
    }

    /// Single-step neighbour of `layer`: `Previous` is towards the
    /// application, `Next` towards the reader. `None` past either end.
    pub fn request_layer(&self, layer: &LayerHandle, direction: Direction) -> Result<Option<LayerHandle>> {
        let arena = self.arena.lock();
        let key = self.locate(&arena, layer)?;
        Ok(arena
            .neighbor(key, direction)
            .map(|key| arena.layer_at(key).clone()))
    }

    /// Number of mounted layers, terminal included
    pub fn len(&self) -> usize {
        self.arena.lock().len
    }

    /// Always false: the terminal layer is never removed.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Top-most layer, the one `transmit` enters first
    pub fn top(&self) -> LayerHandle {
        let arena = self.arena.lock();
        arena.layer_at(arena.top).clone()
    }

    pub fn terminal(&self) -> LayerHandle {
        let arena = self.arena.lock();
        arena.layer_at(arena.terminal).clone()
    }

    /// Mounted layers, top first
    pub fn layers(&self) -> Vec<LayerHandle> {
        self.arena.lock().iter().cloned().collect()
    }

    /// Labels of the mounted layers, top first
    pub fn identities(&self) -> Vec<String> {
        self.arena
            .lock()
            .iter()
            .map(|layer| layer.identity().to_string())
            .collect()
    }

    pub fn contains(&self, layer: &LayerHandle) -> bool {
        let arena = self.arena.lock();
        self.locate(&arena, layer).is_ok()
    }

    fn locate(&self, arena: &Arena, layer: &LayerHandle) -> Result<LayerKey> {
        let not_found = || Error::NotFound {
            layer: layer.identity().to_string(),
        };

        let mount = layer.mount().ok_or_else(not_found)?;
        if mount.stack != self.id {
            return Err(not_found());
        }
        match arena.entry(mount.key) {
            Some(entry) if entry.layer.same_instance(layer) => Ok(mount.key),
            _ => Err(not_found()),
        }
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        let arena = self.arena.get_mut();

        // Application layers outlive the stack as free layers
        for layer in arena.iter() {
            if layer.is_terminal() {
                continue;
            }
            *layer.mount_slot().lock() = None;
            layer.layer().on_unmount();
        }

        // The terminal keeps its mount record so it can never be re-mounted
        if let Some(terminal) = arena.layer_at(arena.terminal).as_terminal() {
            terminal.close();
        }
        debug!(stack = self.id.0, reader = %self.reader_name, "Stack dropped");
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("id", &self.id.0)
            .field("reader_name", &self.reader_name)
            .field("layers", &self.identities())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{SimulatedBinding, SimulatedCard};
    use crate::layer::Layer;
    use crate::terminal::TERMINAL_IDENTITY;

    struct Named(&'static str);

    impl Layer for Named {
        fn identity(&self) -> &str {
            self.0
        }

        fn transmit(&self, chain: &Chain<'_>, command: &[u8]) -> Result<Vec<u8>> {
            chain.forward(command)
        }
    }

    fn stack() -> (SimulatedBinding, Stack) {
        let binding = SimulatedBinding::with_card("R", SimulatedCard::answering(vec![0x90, 0x00]));
        let stack = Stack::open(&binding, "R", ShareMode::Shared).unwrap();
        (binding, stack)
    }

    #[test]
    fn test_new_stack_holds_only_terminal() {
        let (_binding, stack) = stack();
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.identities(), vec![TERMINAL_IDENTITY]);
        assert_eq!(stack.top(), stack.terminal());
        assert!(stack.terminal().is_terminal());
    }

    #[test]
    fn test_closed_context_is_not_connected() {
        let binding = SimulatedBinding::with_card("R", SimulatedCard::answering(vec![0x90, 0x00]));
        let mut context = Context::open(&binding, "R", ShareMode::Shared).unwrap();
        context.close();
        assert_eq!(Stack::new(context).err(), Some(Error::NotConnected));
    }

    #[test]
    fn test_slot_reuse_invalidates_old_key() {
        let (_binding, stack) = stack();
        let a = LayerHandle::new(Named("a"));
        let b = LayerHandle::new(Named("b"));

        stack.add_layer(&a).unwrap();
        let old_mount = a.mount().unwrap();
        stack.release_layer(&a).unwrap();

        // b lands in a's recycled slot with a new generation
        stack.add_layer(&b).unwrap();
        let new_mount = b.mount().unwrap();
        assert_eq!(old_mount.key.index, new_mount.key.index);
        assert_ne!(old_mount.key.generation, new_mount.key.generation);

        assert_eq!(
            stack.request_layer(&a, Direction::Next),
            Err(Error::NotFound { layer: "a".into() })
        );
        assert_eq!(stack.request_layer(&b, Direction::Next).unwrap(), Some(stack.terminal()));
    }

    #[test]
    fn test_release_middle_layer_relinks_neighbours() {
        let (_binding, stack) = stack();
        let a = LayerHandle::new(Named("a"));
        let b = LayerHandle::new(Named("b"));
        let c = LayerHandle::new(Named("c"));
        for layer in [&a, &b, &c] {
            stack.add_layer(layer).unwrap();
        }
        assert_eq!(stack.identities(), vec!["c", "b", "a", TERMINAL_IDENTITY]);

        stack.release_layer(&b).unwrap();
        assert_eq!(stack.identities(), vec!["c", "a", TERMINAL_IDENTITY]);
        assert_eq!(stack.request_layer(&c, Direction::Next).unwrap(), Some(a.clone()));
        assert_eq!(stack.request_layer(&a, Direction::Previous).unwrap(), Some(c.clone()));
        assert!(!b.is_mounted());
    }

    #[test]
    fn test_release_top_moves_top_down() {
        let (_binding, stack) = stack();
        let a = LayerHandle::new(Named("a"));
        let b = LayerHandle::new(Named("b"));
        stack.add_layer(&a).unwrap();
        stack.add_layer(&b).unwrap();

        stack.release_layer(&b).unwrap();
        assert_eq!(stack.top(), a);
        assert_eq!(stack.request_layer(&a, Direction::Previous).unwrap(), None);
    }

    #[test]
    fn test_terminal_cannot_be_remounted() {
        let (_binding, first) = stack();
        let binding = SimulatedBinding::with_card("S", SimulatedCard::answering(vec![0x90, 0x00]));
        let second = Stack::open(&binding, "S", ShareMode::Shared).unwrap();

        let terminal = first.terminal();
        assert_eq!(
            second.add_layer(&terminal),
            Err(Error::AlreadyMounted {
                layer: TERMINAL_IDENTITY.into()
            })
        );

        drop(first);
        assert!(second.add_layer(&terminal).is_err());
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_drop_unmounts_layers_and_closes_context() {
        let binding = SimulatedBinding::with_card("R", SimulatedCard::answering(vec![0x90, 0x00]));
        let stack = Stack::open(&binding, "R", ShareMode::Exclusive).unwrap();
        let a = LayerHandle::new(Named("a"));
        stack.add_layer(&a).unwrap();

        drop(stack);
        assert!(!a.is_mounted());

        // Exclusive hold released with the context
        let again = Stack::open(&binding, "R", ShareMode::Exclusive).unwrap();
        again.add_layer(&a).unwrap();
        assert_eq!(again.identities(), vec!["a", TERMINAL_IDENTITY]);
    }
}
