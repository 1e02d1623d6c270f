use alloc::vec::Vec;

use super::handle::Handle;

/// Slot arena with a free list.
///
/// The arena owns every element it hands out a [`Handle`] for; freed slots
/// are recycled before the backing vector grows. Handles are only
/// meaningful for the arena that issued them, and accessing a freed slot
/// panics.
pub(crate) struct Arena<T> {
    slots: Vec<Option<T>>,
    free: Vec<Handle>,
}

impl<T> Arena<T> {
    pub(crate) const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
        }
    }

    /// Number of live elements.
    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Stores an element and returns its handle.
    pub(crate) fn alloc(&mut self, element: T) -> Handle {
        self.alloc_with(|_| element)
    }

    /// Stores the element produced by `make`, which receives the handle the
    /// element will live under. This is how nodes are born with their ring
    /// links already pointing at themselves.
    pub(crate) fn alloc_with(&mut self, make: impl FnOnce(Handle) -> T) -> Handle {
        if let Some(handle) = self.free.pop() {
            self.slots[handle.index()] = Some(make(handle));
            handle
        } else {
            assert!(self.slots.len() <= Handle::MAX, "arena is full");
            let handle = Handle::from_index(self.slots.len());
            self.slots.push(Some(make(handle)));
            handle
        }
    }

    #[inline]
    pub(crate) fn get(&self, handle: Handle) -> &T {
        self.slots[handle.index()].as_ref().expect("stale handle")
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, handle: Handle) -> &mut T {
        self.slots[handle.index()].as_mut().expect("stale handle")
    }

    /// Removes the element, returning ownership and releasing the slot.
    pub(crate) fn take(&mut self, handle: Handle) -> T {
        let element = self.slots[handle.index()].take().expect("stale handle");
        self.free.push(handle);
        element
    }

    /// Drops the element and releases the slot.
    pub(crate) fn free(&mut self, handle: Handle) {
        drop(self.take(handle));
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}
