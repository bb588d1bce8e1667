use crate::borrow::{Ref, RefMut};
use crate::chain::{Chain, Iter, NodeRef};
use crate::error::ScopeError;
use crate::haven::Haven;
use crate::node::Node;
use std::any::type_name;
use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomPinned;
use std::mem::{self, ManuallyDrop};
use std::pin::Pin;
use std::ptr::{self, NonNull};

/// Owns one value of type `T` and, once pinned and attached, makes it the
/// innermost value of chain `(T, Tag)` on the current thread.
///
/// A fresh holder is detached. It joins the chain through a pinned
/// reference, normally via the [`scoped!`](crate::scoped) macro, and leaves
/// it when dropped, in whatever order holders happen to drop.
///
/// `Tag` separates chains that share a payload type; a tuple of tag types
/// works as a tag list.
///
/// # Examples
///
/// ```
/// use sovran_scoped::{scoped, Scoped};
///
/// struct ThresholdTag;
/// type ScopedThreshold = Scoped<i32, ThresholdTag>;
///
/// fn get_number(x: i32) -> i32 {
///     if let Some(thresh) = ScopedThreshold::top() {
///         if x >= *thresh.borrow() {
///             return -1;
///         }
///     }
///     x
/// }
///
/// {
///     scoped!(let _threshold = ScopedThreshold::new(4));
///     assert_eq!(get_number(3), 3);
///     assert_eq!(get_number(10), -1);
/// }
/// assert_eq!(get_number(10), 10);
/// ```
pub struct Scoped<T: 'static, Tag: 'static = ()> {
    pub(crate) node: Node<T, Tag>,
    pub(crate) value: UnsafeCell<T>,
    _pinned: PhantomPinned,
}

impl<T: 'static, Tag: 'static> Scoped<T, Tag> {
    /// Creates a detached holder.
    pub fn new(value: T) -> Self {
        Self {
            node: Node::new(),
            value: UnsafeCell::new(value),
            _pinned: PhantomPinned,
        }
    }

    pub(crate) fn payload(&self) -> NonNull<T> {
        NonNull::from(&self.value).cast()
    }

    /// Attaches at the top of the chain.
    ///
    /// # Panics
    ///
    /// Panics if the holder is already attached.
    pub fn attach(self: Pin<&Self>) {
        let this = self.get_ref();
        // SAFETY: `this` is pinned and detaches itself on drop
        unsafe { this.node.attach(this.payload()) }
    }

    /// Attaches directly above `target` (toward the top). With no target, or
    /// a detached one, attaches at the top.
    pub fn attach_above(self: Pin<&Self>, target: Option<&NodeRef<T, Tag>>) {
        let this = self.get_ref();
        // SAFETY: `this` is pinned and detaches itself on drop
        unsafe {
            this.node
                .attach_above(this.payload(), target.map(NodeRef::node))
        }
    }

    /// Takes over `source`'s position in the chain and detaches `source`.
    /// This is the positional half of a move; pair it with
    /// [`Scoped::move_from`] or construct from the moved-out value.
    pub fn take_place_of(self: Pin<&Self>, source: &NodeRef<T, Tag>) {
        let this = self.get_ref();
        // SAFETY: `this` is pinned and detaches itself on drop
        unsafe { this.node.take_place_of(this.payload(), source.node()) }
    }

    /// Leaves the chain. No-op when already detached.
    ///
    /// # Panics
    ///
    /// Panics if the holder is currently hidden by a [`Haven`].
    pub fn detach(&self) {
        self.node.detach();
    }

    pub fn is_attached(&self) -> bool {
        self.node.is_attached()
    }

    /// Handle to this holder's node, or `None` while detached.
    pub fn node_ref(&self) -> Option<NodeRef<T, Tag>> {
        if !self.is_attached() {
            return None;
        }
        NodeRef::from_link(Some(NonNull::from(&self.node)))
    }

    /// The neighbor one step toward the bottom.
    pub fn next(&self) -> Option<NodeRef<T, Tag>> {
        NodeRef::from_link(self.node.next_link())
    }

    /// The neighbor one step toward the top.
    pub fn prev(&self) -> Option<NodeRef<T, Tag>> {
        NodeRef::from_link(self.node.prev_link())
    }

    /// # Panics
    ///
    /// Panics if the value is mutably borrowed, e.g. through
    /// [`Chain::get_mut`].
    pub fn value(&self) -> Ref<'_, T> {
        match self.try_value() {
            Ok(value) => value,
            Err(e) => panic!("{}", e),
        }
    }

    /// # Errors
    ///
    /// Returns `ScopeError::AlreadyMutablyBorrowed` if the value is mutably
    /// borrowed.
    pub fn try_value(&self) -> Result<Ref<'_, T>, ScopeError> {
        // SAFETY: both pointers live as long as `self` is borrowed
        unsafe { Ref::acquire(self.payload(), NonNull::from(&self.node.flag)) }
    }

    /// # Panics
    ///
    /// Panics if the value is borrowed.
    pub fn value_mut(&self) -> RefMut<'_, T> {
        match self.try_value_mut() {
            Ok(value) => value,
            Err(e) => panic!("{}", e),
        }
    }

    /// # Errors
    ///
    /// Returns `ScopeError::AlreadyBorrowed` or
    /// `ScopeError::AlreadyMutablyBorrowed` if the value is borrowed.
    pub fn try_value_mut(&self) -> Result<RefMut<'_, T>, ScopeError> {
        // SAFETY: both pointers live as long as `self` is borrowed
        unsafe { RefMut::acquire(self.payload(), NonNull::from(&self.node.flag)) }
    }

    /// Replaces the value in place and returns the old one. The holder keeps
    /// its position.
    pub fn set(&self, value: T) -> T {
        mem::replace(&mut *self.value_mut(), value)
    }

    /// Copy-assignment: clones `source`'s value into `self`. Neither holder
    /// moves in the chain.
    pub fn copy_from(&self, source: &Self)
    where
        T: Clone,
    {
        let value = source.value().clone();
        *self.value_mut() = value;
    }

    /// Move-assignment: takes `source`'s value (leaving `T::default()`
    /// behind) and detaches `source`. `self` keeps its position.
    ///
    /// # Panics
    ///
    /// Panics, with both holders unchanged, if `source` is hidden by a
    /// [`Haven`] or either value is borrowed.
    pub fn move_from(&self, source: &Self)
    where
        T: Default,
    {
        assert!(
            source.node.is_reachable(),
            "cannot move from a scoped {} hidden by a haven",
            type_name::<T>()
        );
        {
            let mut from = source.value_mut();
            let mut to = self.value_mut();
            *to = mem::take(&mut *from);
        }
        source.detach();
    }

    /// Consumes a holder that is not in any chain and returns its value.
    pub fn into_inner(self) -> T {
        let this = ManuallyDrop::new(self);
        this.node.retire();
        // SAFETY: `this` is never dropped, so the value is read exactly once
        unsafe { ptr::read(this.value.get()) }
    }

    /// See [`Chain::top`].
    pub fn top() -> Option<NodeRef<T, Tag>> {
        Chain::<T, Tag>::top()
    }

    /// See [`Chain::bottom`].
    pub fn bottom() -> Option<NodeRef<T, Tag>> {
        Chain::<T, Tag>::bottom()
    }

    /// See [`Chain::get`].
    pub fn get() -> Option<Ref<'static, T>> {
        Chain::<T, Tag>::get()
    }

    /// See [`Chain::get_mut`].
    pub fn get_mut() -> Option<RefMut<'static, T>> {
        Chain::<T, Tag>::get_mut()
    }

    /// See [`Chain::iter`].
    pub fn iter() -> Iter<T, Tag> {
        Chain::<T, Tag>::iter()
    }

    /// See [`Chain::len`].
    pub fn len() -> usize {
        Chain::<T, Tag>::len()
    }

    /// See [`Chain::is_empty`].
    pub fn is_empty() -> bool {
        Chain::<T, Tag>::is_empty()
    }

    /// Hides every value of this chain until the returned guard drops.
    pub fn shield() -> Haven<T, Tag> {
        Haven::new()
    }
}

impl<T: 'static, Tag: 'static> Drop for Scoped<T, Tag> {
    fn drop(&mut self) {
        self.node.retire();
    }
}

impl<T: Default + 'static, Tag: 'static> Default for Scoped<T, Tag> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: 'static, Tag: 'static> From<T> for Scoped<T, Tag> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: fmt::Debug + 'static, Tag: 'static> fmt::Debug for Scoped<T, Tag> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Scoped");
        match self.try_value() {
            Ok(value) => d.field("value", &*value),
            Err(_) => d.field("value", &format_args!("<borrowed>")),
        };
        d.field("attached", &self.is_attached()).finish()
    }
}

/// Pins a holder on the stack and attaches it, binding the name to a
/// `Pin<&Holder>`.
///
/// ```
/// use sovran_scoped::{scoped, Scoped};
///
/// struct Tag;
/// type Level = Scoped<u8, Tag>;
///
/// scoped!(let first = Level::new(1));
/// // copy-construct: lands directly above `first`
/// scoped!(let copy = Level::new(*first.value()), above first);
/// // move-construct: takes `copy`'s place, `copy` is detached
/// scoped!(let moved = Level::new(copy.set(0)), replacing copy);
///
/// assert!(!copy.is_attached());
/// assert_eq!(*Level::get().unwrap(), 1);
/// assert_eq!(Level::len(), 2);
/// # let _ = moved;
/// ```
#[macro_export]
macro_rules! scoped {
    (let $name:ident = $init:expr) => {
        let $name = ::core::pin::pin!($init);
        let $name = $name.into_ref();
        $name.attach();
    };
    (let $name:ident = $init:expr, above $target:expr) => {
        let $name = ::core::pin::pin!($init);
        let $name = $name.into_ref();
        $name.attach_above(($target).node_ref().as_ref());
    };
    (let $name:ident = $init:expr, replacing $source:expr) => {
        let $name = ::core::pin::pin!($init);
        let $name = $name.into_ref();
        match ($source).node_ref() {
            ::core::option::Option::Some(source) => $name.take_place_of(&source),
            ::core::option::Option::None => $name.attach(),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};
    use std::pin::pin;

    struct Order;
    type ScopedInt = Scoped<i32, Order>;

    fn chain() -> Vec<i32> {
        ScopedInt::iter().map(|n| *n.borrow()).collect()
    }

    #[test]
    fn test_top_and_bottom_follow_attachment() {
        scoped!(let _si1 = ScopedInt::new(1));
        assert_eq!(*ScopedInt::bottom().unwrap().borrow(), 1);
        assert_eq!(*ScopedInt::top().unwrap().borrow(), 1);

        scoped!(let _si2 = ScopedInt::new(2));
        assert_eq!(*ScopedInt::bottom().unwrap().borrow(), 1);
        assert_eq!(*ScopedInt::top().unwrap().borrow(), 2);
    }

    #[test]
    fn test_move_and_copy_assignment() {
        scoped!(let si1 = ScopedInt::new(1));
        scoped!(let si2 = ScopedInt::new(2));
        scoped!(let si3 = ScopedInt::new(3));

        si3.move_from(&si1);
        assert!(!si1.is_attached());
        assert_eq!(*ScopedInt::bottom().unwrap().borrow(), 2);
        assert_eq!(*ScopedInt::top().unwrap().borrow(), 1);

        si2.set(20);
        assert_eq!(*ScopedInt::bottom().unwrap().borrow(), 20);
        si3.set(10);
        assert_eq!(*ScopedInt::top().unwrap().borrow(), 10);

        si1.copy_from(&si2);
        assert_eq!(*si1.value(), 20);
        assert_eq!(chain(), vec![10, 20]);

        {
            scoped!(let dummy = ScopedInt::default());
            dummy.move_from(&si2);
            dummy.move_from(&si3);
            assert_eq!(chain(), vec![10]);
        }
        assert!(ScopedInt::top().is_none() && ScopedInt::bottom().is_none());
    }

    #[test]
    fn test_move_from_hidden_source_changes_nothing() {
        scoped!(let outer = ScopedInt::new(1));
        let _haven = ScopedInt::shield();
        scoped!(let inner = ScopedInt::new(2));

        let result = panic::catch_unwind(AssertUnwindSafe(|| inner.move_from(&outer)));
        assert!(result.is_err());
        assert_eq!(*outer.value(), 1);
        assert_eq!(*inner.value(), 2);
        assert!(outer.is_attached());
        assert!(inner.is_attached());
    }

    #[test]
    fn test_move_from_while_borrowed_changes_nothing() {
        scoped!(let source = ScopedInt::new(1));
        scoped!(let target = ScopedInt::new(2));

        let reader = target.value();
        let result = panic::catch_unwind(AssertUnwindSafe(|| target.move_from(&source)));
        assert!(result.is_err());
        drop(reader);

        assert_eq!(*source.value(), 1);
        assert_eq!(*target.value(), 2);
        assert!(source.is_attached());
        assert_eq!(chain(), vec![2, 1]);
    }

    #[test]
    fn test_copy_construct_lands_above_source() {
        scoped!(let a = ScopedInt::new(1));
        scoped!(let _b = ScopedInt::new(2));
        scoped!(let _copy = ScopedInt::new(*a.value()), above a);
        assert_eq!(chain(), vec![2, 1, 1]);
        assert!(a.is_attached());
        assert_eq!(*a.prev().unwrap().borrow(), 1);
    }

    #[test]
    fn test_move_construct_takes_position() {
        scoped!(let _a = ScopedInt::new(1));
        scoped!(let b = ScopedInt::new(2));
        scoped!(let _c = ScopedInt::new(3));
        let len = ScopedInt::len();

        scoped!(let moved = ScopedInt::new(b.set(0)), replacing b);
        assert!(!b.is_attached());
        assert_eq!(ScopedInt::len(), len);
        assert_eq!(chain(), vec![3, 2, 1]);
        assert_eq!(*moved.next().unwrap().borrow(), 1);
        assert_eq!(*moved.prev().unwrap().borrow(), 3);
    }

    #[test]
    fn test_out_of_order_detach_keeps_order() {
        scoped!(let a = ScopedInt::new(1));
        scoped!(let b = ScopedInt::new(2));
        scoped!(let _c = ScopedInt::new(3));
        scoped!(let _d = ScopedInt::new(4));

        b.detach();
        assert_eq!(chain(), vec![4, 3, 1]);
        a.detach();
        assert_eq!(chain(), vec![4, 3]);
        b.attach();
        assert_eq!(chain(), vec![2, 4, 3]);
    }

    #[test]
    fn test_unpinned_holder_stays_detached() {
        let holder = ScopedInt::new(9);
        assert!(!holder.is_attached());
        assert!(holder.node_ref().is_none());
        assert!(ScopedInt::is_empty());
        holder.detach();
        assert_eq!(holder.into_inner(), 9);
    }

    #[test]
    #[should_panic(expected = "attached twice")]
    fn test_attaching_twice_panics() {
        let holder = pin!(ScopedInt::new(1));
        let holder = holder.into_ref();
        holder.attach();
        holder.attach();
    }

    #[test]
    fn test_holder_and_chain_share_borrow_state() {
        scoped!(let a = ScopedInt::new(1));
        {
            let mut top = ScopedInt::get_mut().unwrap();
            *top = 5;
            assert_eq!(a.try_value().err(), Some(ScopeError::AlreadyMutablyBorrowed));
        }
        assert_eq!(*a.value(), 5);
    }

    #[test]
    fn test_tags_separate_chains() {
        struct Other;
        scoped!(let _a = Scoped::<i32, Order>::new(1));
        scoped!(let _b = Scoped::<i32, Other>::new(2));
        scoped!(let _c = Scoped::<i32, (Order, Other)>::new(3));
        assert_eq!(*Scoped::<i32, Order>::get().unwrap(), 1);
        assert_eq!(*Scoped::<i32, Other>::get().unwrap(), 2);
        assert_eq!(*Scoped::<i32, (Order, Other)>::get().unwrap(), 3);
        assert!(Scoped::<i32>::get().is_none());
    }
}
