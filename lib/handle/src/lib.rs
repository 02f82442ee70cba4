//! Opaque 128-bit resource handles, backed by a generational slot registry.
//!
//! [`Handle`] follows the `(generation, slot)` strategy called out as preferred in
//! the design notes: it wraps a [`slotmap`] key rather than a raw pointer, so
//! dereferencing a stale handle after release returns `None` instead of reading
//! freed memory. The top 16 bits tag which [`ResourceKind`] the handle belongs to,
//! so passing a texture handle to a buffer registry is caught rather than silently
//! misinterpreted.

use slotmap::{new_key_type, Key, KeyData, SlotMap};

new_key_type! {
    struct Slot;
}

/// Which resource table a [`Handle`] indexes into. `None` is the tag carried by
/// [`Handle::zero`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ResourceKind {
    None = 0,
    Texture = 1,
    Buffer = 2,
    WindowEquipment = 3,
}

/// An opaque 128-bit value identifying at most one live resource. Equality is
/// bitwise. The zero handle (`Handle::zero()`) is always distinguished and is
/// always safe to pass to release functions and read-only getters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Handle(u128);

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_zero() {
            write!(f, "Handle(zero)")
        } else {
            write!(f, "Handle({:?}, {:#x})", self.kind(), self.0)
        }
    }
}

fn kind_from_tag(tag: u16) -> ResourceKind {
    match tag {
        1 => ResourceKind::Texture,
        2 => ResourceKind::Buffer,
        3 => ResourceKind::WindowEquipment,
        _ => ResourceKind::None,
    }
}

impl Handle {
    /// The distinguished "none" handle. Always safe to pass anywhere a `Handle` is
    /// expected; registries treat it as "not bound" rather than erroring.
    pub const fn zero() -> Self {
        Handle(0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn kind(&self) -> ResourceKind {
        kind_from_tag((self.0 >> 112) as u16)
    }

    fn from_parts(kind: ResourceKind, slot: Slot) -> Self {
        let tag = kind as u16 as u128;
        let key_bits = slot.data().as_ffi() as u128;
        Handle((tag << 112) | key_bits)
    }

    fn slot(&self) -> Option<Slot> {
        if self.is_zero() {
            return None;
        }
        let key_bits = (self.0 & ((1u128 << 64) - 1)) as u64;
        Some(Slot::from(KeyData::from_ffi(key_bits)))
    }
}

/// A lifetime-tracked table of resources of one [`ResourceKind`], dereferenced in
/// O(1) through [`Handle`]s it hands out. Releasing a resource invalidates its
/// handle: later lookups return `None` rather than aliasing a reused slot, because
/// `slotmap` bumps the slot's generation on removal.
#[derive(Debug)]
pub struct Registry<T> {
    kind: ResourceKind,
    slots: SlotMap<Slot, T>,
}

impl<T> Registry<T> {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            slots: SlotMap::with_key(),
        }
    }

    /// Registers `value` and returns the handle identifying it.
    pub fn insert(&mut self, value: T) -> Handle {
        let slot = self.slots.insert(value);
        Handle::from_parts(self.kind, slot)
    }

    /// O(1) dereference. Returns `None` for the zero handle, a handle of the wrong
    /// kind, or a handle whose resource has already been released.
    pub fn get(&self, handle: Handle) -> Option<&T> {
        if handle.kind() != self.kind {
            return None;
        }
        self.slots.get(handle.slot()?)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        if handle.kind() != self.kind {
            return None;
        }
        self.slots.get_mut(handle.slot()?)
    }

    /// Removes and returns the resource behind `handle`, invalidating it. A second
    /// call with the same (now-stale) handle returns `None` and leaves every other
    /// handle untouched — `release(h); release(h)` is a safe no-op.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        if handle.kind() != self.kind {
            return None;
        }
        self.slots.remove(handle.slot()?)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        let kind = self.kind;
        self.slots
            .iter()
            .map(move |(slot, v)| (Handle::from_parts(kind, slot), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_handle_is_distinguished_and_never_resolves() {
        let reg: Registry<u32> = Registry::new(ResourceKind::Texture);
        assert!(Handle::zero().is_zero());
        assert_eq!(reg.get(Handle::zero()), None);
    }

    #[test]
    fn insert_get_remove_roundtrip() {
        let mut reg: Registry<&'static str> = Registry::new(ResourceKind::Buffer);
        let h = reg.insert("hello");
        assert_eq!(reg.get(h), Some(&"hello"));
        assert_eq!(reg.remove(h), Some("hello"));
        assert_eq!(reg.get(h), None);
    }

    #[test]
    fn double_release_is_a_harmless_no_op() {
        let mut reg: Registry<u32> = Registry::new(ResourceKind::Texture);
        let h = reg.insert(7);
        assert_eq!(reg.remove(h), Some(7));
        assert_eq!(reg.remove(h), None);
    }

    #[test]
    fn release_does_not_corrupt_other_handles() {
        let mut reg: Registry<u32> = Registry::new(ResourceKind::Texture);
        let a = reg.insert(1);
        let b = reg.insert(2);
        let c = reg.insert(3);
        reg.remove(b);
        assert_eq!(reg.get(a), Some(&1));
        assert_eq!(reg.get(c), Some(&3));
        assert_eq!(reg.get(b), None);
    }

    #[test]
    fn stale_handle_does_not_alias_a_reused_slot() {
        let mut reg: Registry<u32> = Registry::new(ResourceKind::Texture);
        let a = reg.insert(1);
        reg.remove(a);
        let b = reg.insert(2);
        // `a`'s slot may have been recycled for `b`, but its generation differs.
        assert_eq!(reg.get(a), None);
        assert_eq!(reg.get(b), Some(&2));
    }

    #[test]
    fn wrong_kind_handle_is_rejected() {
        let mut textures: Registry<u32> = Registry::new(ResourceKind::Texture);
        let buffers: Registry<u32> = Registry::new(ResourceKind::Buffer);
        let h = textures.insert(42);
        assert_eq!(buffers.get(h), None);
    }
}
