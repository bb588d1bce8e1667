use crate::anchor::Ends;
use crate::borrow::{Ref, RefMut};
use crate::error::ScopeError;
use crate::haven::Haven;
use crate::node::{Link, Node};
use std::fmt;
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::ptr::NonNull;

/// Lookup API for the chain of values of type `B` under tag `Tag` on the
/// current thread.
///
/// `Chain` is never instantiated; every method is an associated function that
/// reads the calling thread's anchor. Holders of both kinds forward to it, so
/// `Scoped::<i32, MyTag>::top()` and `Chain::<i32, MyTag>::top()` are the
/// same call. Polymorphic holders attach to `Chain<dyn Trait, Tag>`.
///
/// # Examples
///
/// ```
/// use sovran_scoped::{scoped, Chain, Scoped};
///
/// struct Depth;
///
/// fn current_depth() -> u32 {
///     Chain::<u32, Depth>::get().map_or(0, |d| *d)
/// }
///
/// assert_eq!(current_depth(), 0);
/// {
///     scoped!(let _outer = Scoped::<u32, Depth>::new(1));
///     scoped!(let _inner = Scoped::<u32, Depth>::new(2));
///     assert_eq!(current_depth(), 2);
///     assert_eq!(Chain::<u32, Depth>::len(), 2);
/// }
/// assert_eq!(current_depth(), 0);
/// ```
pub struct Chain<B: ?Sized + 'static, Tag: 'static = ()> {
    _marker: PhantomData<fn(&B) -> Tag>,
}

impl<B: ?Sized + 'static, Tag: 'static> Chain<B, Tag> {
    /// The most recently attached node, or `None` if nothing is in scope.
    pub fn top() -> Option<NodeRef<B, Tag>> {
        NodeRef::from_link(Ends::<B, Tag>::load().top)
    }

    /// The least recently attached node, or `None` if nothing is in scope.
    pub fn bottom() -> Option<NodeRef<B, Tag>> {
        NodeRef::from_link(Ends::<B, Tag>::load().bottom)
    }

    /// Shared access to the top value.
    ///
    /// # Panics
    ///
    /// Panics if the top value is currently mutably borrowed. Use
    /// [`Chain::try_get`] for a non-panicking variant.
    pub fn get() -> Option<Ref<'static, B>> {
        match Self::try_get() {
            Ok(value) => Some(value),
            Err(ScopeError::Empty) => None,
            Err(e) => panic!("{}", e),
        }
    }

    /// Shared access to the top value.
    ///
    /// # Errors
    ///
    /// - Returns `ScopeError::Empty` if nothing is in scope
    /// - Returns `ScopeError::AlreadyMutablyBorrowed` if the top value is
    ///   mutably borrowed
    pub fn try_get() -> Result<Ref<'static, B>, ScopeError> {
        let top = Ends::<B, Tag>::load().top.ok_or(ScopeError::Empty)?;
        // SAFETY: the top node is attached, hence alive
        let node = unsafe { top.as_ref() };
        let value = node.value_ptr().ok_or(ScopeError::Empty)?;
        // SAFETY: a node with an outstanding borrow aborts instead of dropping
        unsafe { Ref::acquire(value, NonNull::from(&node.flag)) }
    }

    /// Exclusive access to the top value.
    ///
    /// # Panics
    ///
    /// Panics if the top value is currently borrowed.
    pub fn get_mut() -> Option<RefMut<'static, B>> {
        match Self::try_get_mut() {
            Ok(value) => Some(value),
            Err(ScopeError::Empty) => None,
            Err(e) => panic!("{}", e),
        }
    }

    /// Exclusive access to the top value.
    ///
    /// # Errors
    ///
    /// - Returns `ScopeError::Empty` if nothing is in scope
    /// - Returns `ScopeError::AlreadyBorrowed` or
    ///   `ScopeError::AlreadyMutablyBorrowed` if the top value is borrowed
    pub fn try_get_mut() -> Result<RefMut<'static, B>, ScopeError> {
        let top = Ends::<B, Tag>::load().top.ok_or(ScopeError::Empty)?;
        // SAFETY: the top node is attached, hence alive
        let node = unsafe { top.as_ref() };
        let value = node.value_ptr().ok_or(ScopeError::Empty)?;
        // SAFETY: a node with an outstanding borrow aborts instead of dropping
        unsafe { RefMut::acquire(value, NonNull::from(&node.flag)) }
    }

    /// Iterates from the top toward the bottom (innermost value first).
    pub fn iter() -> Iter<B, Tag> {
        Iter {
            cursor: Self::top(),
            upward: false,
        }
    }

    /// Iterates from the bottom toward the top (outermost value first).
    pub fn iter_from_bottom() -> Iter<B, Tag> {
        Iter {
            cursor: Self::bottom(),
            upward: true,
        }
    }

    /// Number of attached nodes. Walks the chain.
    pub fn len() -> usize {
        Self::iter().count()
    }

    pub fn is_empty() -> bool {
        Ends::<B, Tag>::load().is_empty()
    }

    /// Hides the whole chain until the returned guard is dropped.
    pub fn haven() -> Haven<B, Tag> {
        Haven::new()
    }

    /// Walks the chain from both ends, checking every link.
    ///
    /// # Errors
    ///
    /// Returns `ScopeError::Corrupted` describing the first inconsistency.
    pub fn validate() -> Result<usize, ScopeError> {
        Ends::<B, Tag>::load().validate()
    }
}

/// Counted handle to an attached node, returned by chain lookups.
///
/// A handle does not keep the node attached, only alive: if the node is
/// detached while a handle exists, the handle's `next`/`prev` return `None`.
/// Dropping the node's holder while any handle exists aborts the process.
pub struct NodeRef<B: ?Sized + 'static, Tag: 'static = ()> {
    node: NonNull<Node<B, Tag>>,
    value: NonNull<B>,
}

impl<B: ?Sized + 'static, Tag: 'static> NodeRef<B, Tag> {
    pub(crate) fn from_link(link: Link<B, Tag>) -> Option<Self> {
        let node = link?;
        // SAFETY: linked nodes are attached, hence alive
        let value = unsafe { node.as_ref() }.value_ptr()?;
        // SAFETY: as above
        unsafe { node.as_ref() }.acquire_handle();
        Some(Self { node, value })
    }

    pub(crate) fn node(&self) -> &Node<B, Tag> {
        // SAFETY: the handle count keeps the node alive
        unsafe { self.node.as_ref() }
    }

    /// The neighbor one step toward the bottom.
    pub fn next(&self) -> Option<Self> {
        Self::from_link(self.node().next_link())
    }

    /// The neighbor one step toward the top.
    pub fn prev(&self) -> Option<Self> {
        Self::from_link(self.node().prev_link())
    }

    pub fn is_attached(&self) -> bool {
        self.node().is_attached()
    }

    /// True if both handles refer to the same node.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.node == other.node
    }

    /// # Panics
    ///
    /// Panics if the value is mutably borrowed.
    pub fn borrow(&self) -> Ref<'_, B> {
        match self.try_borrow() {
            Ok(value) => value,
            Err(e) => panic!("{}", e),
        }
    }

    /// # Errors
    ///
    /// Returns `ScopeError::AlreadyMutablyBorrowed` if the value is mutably
    /// borrowed.
    pub fn try_borrow(&self) -> Result<Ref<'_, B>, ScopeError> {
        // SAFETY: the handle keeps the node, and so the flag and value, alive
        unsafe { Ref::acquire(self.value, NonNull::from(&self.node().flag)) }
    }

    /// # Panics
    ///
    /// Panics if the value is borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, B> {
        match self.try_borrow_mut() {
            Ok(value) => value,
            Err(e) => panic!("{}", e),
        }
    }

    /// # Errors
    ///
    /// Returns `ScopeError::AlreadyBorrowed` or
    /// `ScopeError::AlreadyMutablyBorrowed` if the value is borrowed.
    pub fn try_borrow_mut(&self) -> Result<RefMut<'_, B>, ScopeError> {
        // SAFETY: the handle keeps the node, and so the flag and value, alive
        unsafe { RefMut::acquire(self.value, NonNull::from(&self.node().flag)) }
    }
}

impl<B: ?Sized + 'static, Tag: 'static> Clone for NodeRef<B, Tag> {
    fn clone(&self) -> Self {
        self.node().acquire_handle();
        Self {
            node: self.node,
            value: self.value,
        }
    }
}

impl<B: ?Sized + 'static, Tag: 'static> Drop for NodeRef<B, Tag> {
    fn drop(&mut self) {
        self.node().release_handle();
    }
}

impl<B: ?Sized + 'static, Tag: 'static> fmt::Debug for NodeRef<B, Tag> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("node", &self.node)
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Walks a chain one node at a time. Each step is a fresh pointer read, so
/// the walk tolerates nodes being detached behind the cursor.
pub struct Iter<B: ?Sized + 'static, Tag: 'static = ()> {
    cursor: Option<NodeRef<B, Tag>>,
    upward: bool,
}

impl<B: ?Sized + 'static, Tag: 'static> Iterator for Iter<B, Tag> {
    type Item = NodeRef<B, Tag>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.cursor.take()?;
        self.cursor = if self.upward {
            current.prev()
        } else {
            current.next()
        };
        Some(current)
    }
}

impl<B: ?Sized + 'static, Tag: 'static> FusedIterator for Iter<B, Tag> {}
