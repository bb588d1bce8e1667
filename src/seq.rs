use crate::scoped::Scoped;
use std::any::type_name;
use std::cmp;
use std::fmt;
use std::pin::Pin;
use std::ptr;

const MIN_CAPACITY: usize = 4;

/// A growable sequence of attached holders.
///
/// Every pushed value is attached at the top of chain `(T, Tag)`. Elements
/// live in a heap buffer that never moves while they are attached; when the
/// sequence outgrows it, each element is move-constructed into a larger
/// buffer, taking over its predecessor's place in the chain. The chain order
/// therefore survives any number of reallocations.
///
/// Growing or popping while a handle or borrow guard refers to an element
/// panics before anything changes.
///
/// # Examples
///
/// ```
/// use sovran_scoped::{Scoped, ScopedSeq};
///
/// struct Layer;
///
/// let mut layers: ScopedSeq<u32, Layer> = (1..=3).collect();
/// layers.push(4);
///
/// let order: Vec<u32> = Scoped::<u32, Layer>::iter()
///     .map(|n| *n.borrow())
///     .collect();
/// assert_eq!(order, vec![4, 3, 2, 1]);
///
/// assert_eq!(layers.pop(), Some(4));
/// assert_eq!(*Scoped::<u32, Layer>::get().unwrap(), 3);
/// ```
pub struct ScopedSeq<T: 'static, Tag: 'static = ()> {
    slots: Vec<Scoped<T, Tag>>,
}

impl<T: 'static, Tag: 'static> ScopedSeq<T, Tag> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    // Slots never move while their buffer is alive: growth goes through
    // `relocate`, removal detaches first.
    fn pinned(slot: &Scoped<T, Tag>) -> Pin<&Scoped<T, Tag>> {
        // SAFETY: see above
        unsafe { Pin::new_unchecked(slot) }
    }

    /// Appends `value` and attaches it at the top of the chain.
    pub fn push(&mut self, value: T) {
        if self.slots.len() == self.slots.capacity() {
            let grown = cmp::max(MIN_CAPACITY, self.slots.capacity() * 2);
            self.relocate(grown);
        }
        let index = self.slots.len();
        // Capacity is reserved, so this push cannot reallocate.
        self.slots.push(Scoped::new(value));
        Self::pinned(&self.slots[index]).attach();
    }

    /// Detaches and returns the last element.
    ///
    /// # Panics
    ///
    /// Panics if the element is referenced by a handle or borrow guard, or
    /// hidden by a haven.
    pub fn pop(&mut self) -> Option<T> {
        let last = self.slots.last()?;
        assert!(
            last.node.is_unreferenced(),
            "cannot pop a scoped {} that is still referenced",
            type_name::<T>()
        );
        last.detach();
        let holder = self.slots.pop()?;
        Some(holder.into_inner())
    }

    /// Pops elements until at most `len` remain.
    pub fn truncate(&mut self, len: usize) {
        while self.slots.len() > len {
            self.pop();
        }
    }

    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// Makes room for `additional` more elements, relocating if needed.
    pub fn reserve(&mut self, additional: usize) {
        let needed = self.slots.len() + additional;
        if needed > self.slots.capacity() {
            self.relocate(needed);
        }
    }

    pub fn get(&self, index: usize) -> Option<Pin<&Scoped<T, Tag>>> {
        self.slots.get(index).map(Self::pinned)
    }

    pub fn iter(&self) -> impl Iterator<Item = Pin<&Scoped<T, Tag>>> + '_ {
        self.slots.iter().map(Self::pinned)
    }

    /// Move-constructs every element into a buffer of `capacity` slots.
    fn relocate(&mut self, capacity: usize) {
        for slot in &self.slots {
            assert!(
                slot.node.is_unreferenced(),
                "cannot relocate a scoped {} that is still referenced",
                type_name::<T>()
            );
            assert!(
                slot.node.is_reachable(),
                "cannot relocate a scoped {} hidden by a haven",
                type_name::<T>()
            );
        }

        let mut fresh: Vec<Scoped<T, Tag>> = Vec::with_capacity(capacity);
        for old in &self.slots {
            // SAFETY: the old buffer is released below without dropping its
            // elements, so each value is moved out exactly once
            let value = unsafe { ptr::read(old.value.get()) };
            let index = fresh.len();
            fresh.push(Scoped::new(value));
            let new = Self::pinned(&fresh[index]);
            if old.is_attached() {
                // SAFETY: `new` sits in reserved capacity and will not move
                unsafe { new.node.take_place_of(new.payload(), &old.node) };
            }
        }

        // SAFETY: every old element is detached and its value moved out
        unsafe { self.slots.set_len(0) };
        self.slots = fresh;
        tracing::trace!(
            chain = type_name::<T>(),
            len = self.slots.len(),
            capacity = self.slots.capacity(),
            "relocated scoped sequence"
        );
    }
}

impl<T: 'static, Tag: 'static> Default for ScopedSeq<T, Tag> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static, Tag: 'static> Extend<T> for ScopedSeq<T, Tag> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        self.reserve(iter.size_hint().0);
        for value in iter {
            self.push(value);
        }
    }
}

impl<T: 'static, Tag: 'static> FromIterator<T> for ScopedSeq<T, Tag> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut seq = Self::new();
        seq.extend(iter);
        seq
    }
}

impl<T: fmt::Debug + 'static, Tag: 'static> fmt::Debug for ScopedSeq<T, Tag> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.slots.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Chain, Scoped};

    struct Stack;
    type Seq = ScopedSeq<i32, Stack>;

    fn bottom_up() -> Vec<i32> {
        let mut out = Vec::new();
        let mut cursor = Chain::<i32, Stack>::bottom();
        while let Some(node) = cursor {
            out.push(*node.borrow());
            cursor = node.prev();
        }
        out
    }

    #[test]
    fn test_growth_preserves_order() {
        let mut seq = Seq::with_capacity(3);
        seq.extend([1, 2, 3]);
        let before = seq.capacity();
        seq.push(4);
        if before == 3 {
            assert!(seq.capacity() > before);
        }
        assert_eq!(bottom_up(), vec![1, 2, 3, 4]);
        assert_eq!(Chain::<i32, Stack>::validate(), Ok(4));
    }

    #[test]
    fn test_growth_keeps_outside_neighbors() {
        let outer = std::pin::pin!(Scoped::<i32, Stack>::new(0));
        outer.as_ref().attach();
        let mut seq = Seq::new();
        for i in 1..=9 {
            seq.push(i);
        }
        let inner = std::pin::pin!(Scoped::<i32, Stack>::new(100));
        inner.as_ref().attach();
        seq.reserve(100);
        assert_eq!(bottom_up(), vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 100]);
        inner.detach();
        drop(seq);
        assert_eq!(bottom_up(), vec![0]);
    }

    #[test]
    fn test_pop_and_truncate() {
        let mut seq: Seq = (1..=5).collect();
        assert_eq!(seq.pop(), Some(5));
        assert_eq!(*Chain::<i32, Stack>::get().unwrap(), 4);
        seq.truncate(2);
        assert_eq!(bottom_up(), vec![1, 2]);
        seq.clear();
        assert!(Chain::<i32, Stack>::is_empty());
        assert_eq!(seq.pop(), None);
    }

    #[test]
    fn test_detached_element_survives_growth_detached() {
        let mut seq = Seq::with_capacity(2);
        seq.push(1);
        seq.push(2);
        if let Some(first) = seq.get(0) {
            first.detach();
        }
        seq.push(3);
        assert_eq!(bottom_up(), vec![2, 3]);
        assert!(!seq.get(0).unwrap().is_attached());
        assert_eq!(*seq.get(0).unwrap().value(), 1);
    }

    #[test]
    #[should_panic(expected = "still referenced")]
    fn test_growth_while_referenced_panics() {
        let mut seq = Seq::with_capacity(1);
        seq.push(1);
        let _handle = Chain::<i32, Stack>::top();
        seq.push(2);
    }

    #[test]
    fn test_drop_releases_everything() {
        {
            let seq: Seq = (1..=4).collect();
            assert_eq!(seq.len(), 4);
            assert_eq!(
                seq.iter().map(|s| *s.value()).collect::<Vec<_>>(),
                vec![1, 2, 3, 4]
            );
        }
        assert!(Chain::<i32, Stack>::is_empty());
    }
}
