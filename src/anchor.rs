use crate::node::{Link, Node};
use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::ptr::NonNull;

/// Type-erased head and tail of one chain, keyed in the table by the
/// `TypeId` of the chain's (value type, tag) pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Anchor {
    top: Option<NonNull<()>>,
    bottom: Option<NonNull<()>>,
}

thread_local! {
    static ANCHORS: RefCell<HashMap<TypeId, Anchor>> = RefCell::new(HashMap::new());
}

/// Identity of a chain. Two chains are the same iff their `ChainKey`s are.
#[allow(dead_code)]
struct ChainKey<B: ?Sized, Tag>(PhantomData<fn(&B) -> Tag>);

/// Typed view of one chain's anchor on the current thread.
pub(crate) struct Ends<B: ?Sized + 'static, Tag: 'static> {
    pub(crate) top: Link<B, Tag>,
    pub(crate) bottom: Link<B, Tag>,
}

impl<B: ?Sized + 'static, Tag: 'static> Clone for Ends<B, Tag> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: ?Sized + 'static, Tag: 'static> Copy for Ends<B, Tag> {}

impl<B: ?Sized + 'static, Tag: 'static> PartialEq for Ends<B, Tag> {
    fn eq(&self, other: &Self) -> bool {
        self.top == other.top && self.bottom == other.bottom
    }
}

impl<B: ?Sized + 'static, Tag: 'static> Ends<B, Tag> {
    pub(crate) const fn empty() -> Self {
        Self {
            top: None,
            bottom: None,
        }
    }

    fn key() -> TypeId {
        TypeId::of::<ChainKey<B, Tag>>()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.top.is_none() && self.bottom.is_none()
    }

    /// Reads the anchor, or `None` once the thread's table has been torn down.
    pub(crate) fn try_load() -> Option<Self> {
        ANCHORS
            .try_with(|anchors| {
                let anchor = anchors
                    .borrow()
                    .get(&Self::key())
                    .copied()
                    .unwrap_or_default();
                Self {
                    top: anchor.top.map(NonNull::cast::<Node<B, Tag>>),
                    bottom: anchor.bottom.map(NonNull::cast::<Node<B, Tag>>),
                }
            })
            .ok()
    }

    /// Reads the anchor; a torn-down table reads as an empty chain.
    pub(crate) fn load() -> Self {
        Self::try_load().unwrap_or_else(Self::empty)
    }

    /// Writes the anchor back. Silently skipped during thread teardown.
    pub(crate) fn store(self) {
        let anchor = Anchor {
            top: self.top.map(NonNull::cast::<()>),
            bottom: self.bottom.map(NonNull::cast::<()>),
        };
        let _ = ANCHORS.try_with(|anchors| {
            anchors.borrow_mut().insert(Self::key(), anchor);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct First;
    struct Second;

    #[test]
    fn test_untouched_chain_is_empty() {
        let ends = Ends::<u64, First>::load();
        assert!(ends.is_empty());
        assert!(ends == Ends::empty());
    }

    #[test]
    fn test_store_is_per_key() {
        let node = Node::<u8, First>::new();
        let ptr = NonNull::from(&node);

        Ends::<u8, First> {
            top: Some(ptr),
            bottom: Some(ptr),
        }
        .store();

        assert_eq!(Ends::<u8, First>::load().top, Some(ptr));
        assert!(Ends::<u8, Second>::load().is_empty());
        assert!(Ends::<u16, First>::load().is_empty());

        Ends::<u8, First>::empty().store();
        assert!(Ends::<u8, First>::load().is_empty());
    }

    #[test]
    fn test_anchor_is_per_thread() {
        let node = Node::<u32, Second>::new();
        let ptr = NonNull::from(&node);
        Ends::<u32, Second> {
            top: Some(ptr),
            bottom: Some(ptr),
        }
        .store();

        let seen_elsewhere = std::thread::spawn(|| Ends::<u32, Second>::load().is_empty())
            .join()
            .unwrap();
        assert!(seen_elsewhere);

        Ends::<u32, Second>::empty().store();
    }
}
