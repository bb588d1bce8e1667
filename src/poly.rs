use crate::borrow::{Ref, RefMut};
use crate::chain::{Chain, Iter, NodeRef};
use crate::error::ScopeError;
use crate::haven::Haven;
use crate::node::Node;
use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomPinned;
use std::pin::Pin;
use std::ptr::NonNull;

/// Owns a concrete `C` but joins the chain of its abstraction `B`, usually a
/// trait object, so that several implementations installed at different
/// depths are found through one lookup on `Chain<B, Tag>`.
///
/// Stable Rust cannot unsize a generic parameter on its own, so the holder is
/// given the coercion once, at construction. The [`poly!`](crate::poly) macro
/// supplies it; [`PolyScoped::new`] takes it by hand.
///
/// # Examples
///
/// ```
/// use sovran_scoped::{poly, scoped, Chain};
///
/// trait Greeter {
///     fn greet(&self, name: &str) -> String;
/// }
///
/// struct English;
/// impl Greeter for English {
///     fn greet(&self, name: &str) -> String {
///         format!("Hello, {}!", name)
///     }
/// }
///
/// struct French;
/// impl Greeter for French {
///     fn greet(&self, name: &str) -> String {
///         format!("Bonjour, {} !", name)
///     }
/// }
///
/// type ScopedGreeter = Chain<dyn Greeter>;
///
/// fn welcome() -> String {
///     match ScopedGreeter::get() {
///         Some(greeter) => greeter.greet("Ada"),
///         None => String::from("..."),
///     }
/// }
///
/// scoped!(let _en = poly!(English => dyn Greeter));
/// assert_eq!(welcome(), "Hello, Ada!");
/// {
///     scoped!(let _fr = poly!(French => dyn Greeter));
///     assert_eq!(welcome(), "Bonjour, Ada !");
/// }
/// assert_eq!(welcome(), "Hello, Ada!");
/// ```
pub struct PolyScoped<C: 'static, B: ?Sized + 'static, Tag: 'static = ()> {
    node: Node<B, Tag>,
    value: UnsafeCell<C>,
    upcast: fn(NonNull<C>) -> NonNull<B>,
    _pinned: PhantomPinned,
}

impl<C: 'static, B: ?Sized + 'static, Tag: 'static> PolyScoped<C, B, Tag> {
    /// Creates a detached holder. Prefer [`poly!`](crate::poly), which builds
    /// the upcast itself.
    ///
    /// # Safety
    ///
    /// `upcast` must return its argument unchanged apart from an unsizing
    /// coercion: same address, and metadata that describes a `C`. Chain
    /// lookups dereference whatever it returns.
    ///
    /// ```compile_fail
    /// use sovran_scoped::PolyScoped;
    /// use std::ptr::NonNull;
    ///
    /// // An arbitrary mapping cannot be handed over without `unsafe`
    /// let _ = PolyScoped::<u8, u64>::new(0, |_| NonNull::dangling());
    /// ```
    pub unsafe fn new(value: C, upcast: fn(NonNull<C>) -> NonNull<B>) -> Self {
        Self {
            node: Node::new(),
            value: UnsafeCell::new(value),
            upcast,
            _pinned: PhantomPinned,
        }
    }

    fn payload(&self) -> NonNull<C> {
        NonNull::from(&self.value).cast()
    }

    fn base_payload(&self) -> NonNull<B> {
        (self.upcast)(self.payload())
    }

    /// Attaches at the top of chain `(B, Tag)`.
    ///
    /// # Panics
    ///
    /// Panics if the holder is already attached.
    pub fn attach(self: Pin<&Self>) {
        let this = self.get_ref();
        // SAFETY: `this` is pinned and detaches itself on drop
        unsafe { this.node.attach(this.base_payload()) }
    }

    /// Attaches directly above `target`, or at the top when there is no
    /// attached target.
    pub fn attach_above(self: Pin<&Self>, target: Option<&NodeRef<B, Tag>>) {
        let this = self.get_ref();
        // SAFETY: `this` is pinned and detaches itself on drop
        unsafe {
            this.node
                .attach_above(this.base_payload(), target.map(NodeRef::node))
        }
    }

    /// Takes over `source`'s position and detaches `source`.
    pub fn take_place_of(self: Pin<&Self>, source: &NodeRef<B, Tag>) {
        let this = self.get_ref();
        // SAFETY: `this` is pinned and detaches itself on drop
        unsafe { this.node.take_place_of(this.base_payload(), source.node()) }
    }

    pub fn detach(&self) {
        self.node.detach();
    }

    pub fn is_attached(&self) -> bool {
        self.node.is_attached()
    }

    pub fn node_ref(&self) -> Option<NodeRef<B, Tag>> {
        if !self.is_attached() {
            return None;
        }
        NodeRef::from_link(Some(NonNull::from(&self.node)))
    }

    pub fn next(&self) -> Option<NodeRef<B, Tag>> {
        NodeRef::from_link(self.node.next_link())
    }

    pub fn prev(&self) -> Option<NodeRef<B, Tag>> {
        NodeRef::from_link(self.node.prev_link())
    }

    /// Shared access to the concrete value.
    ///
    /// # Panics
    ///
    /// Panics if the value is mutably borrowed.
    pub fn value(&self) -> Ref<'_, C> {
        match self.try_value() {
            Ok(value) => value,
            Err(e) => panic!("{}", e),
        }
    }

    /// # Errors
    ///
    /// Returns `ScopeError::AlreadyMutablyBorrowed` if the value is mutably
    /// borrowed.
    pub fn try_value(&self) -> Result<Ref<'_, C>, ScopeError> {
        // SAFETY: both pointers live as long as `self` is borrowed
        unsafe { Ref::acquire(self.payload(), NonNull::from(&self.node.flag)) }
    }

    /// Exclusive access to the concrete value.
    ///
    /// # Panics
    ///
    /// Panics if the value is borrowed.
    pub fn value_mut(&self) -> RefMut<'_, C> {
        match self.try_value_mut() {
            Ok(value) => value,
            Err(e) => panic!("{}", e),
        }
    }

    /// # Errors
    ///
    /// Returns `ScopeError::AlreadyBorrowed` or
    /// `ScopeError::AlreadyMutablyBorrowed` if the value is borrowed.
    pub fn try_value_mut(&self) -> Result<RefMut<'_, C>, ScopeError> {
        // SAFETY: both pointers live as long as `self` is borrowed
        unsafe { RefMut::acquire(self.payload(), NonNull::from(&self.node.flag)) }
    }

    /// Shared access through the abstraction, as chain lookups see it.
    pub fn base(&self) -> Ref<'_, B> {
        // SAFETY: both pointers live as long as `self` is borrowed
        match unsafe { Ref::acquire(self.base_payload(), NonNull::from(&self.node.flag)) } {
            Ok(value) => value,
            Err(e) => panic!("{}", e),
        }
    }

    /// See [`Chain::top`].
    pub fn top() -> Option<NodeRef<B, Tag>> {
        Chain::<B, Tag>::top()
    }

    /// See [`Chain::bottom`].
    pub fn bottom() -> Option<NodeRef<B, Tag>> {
        Chain::<B, Tag>::bottom()
    }

    /// See [`Chain::get`].
    pub fn get() -> Option<Ref<'static, B>> {
        Chain::<B, Tag>::get()
    }

    /// See [`Chain::get_mut`].
    pub fn get_mut() -> Option<RefMut<'static, B>> {
        Chain::<B, Tag>::get_mut()
    }

    /// See [`Chain::iter`].
    pub fn iter() -> Iter<B, Tag> {
        Chain::<B, Tag>::iter()
    }

    /// See [`Chain::len`].
    pub fn len() -> usize {
        Chain::<B, Tag>::len()
    }

    /// See [`Chain::is_empty`].
    pub fn is_empty() -> bool {
        Chain::<B, Tag>::is_empty()
    }

    /// Hides every value of chain `(B, Tag)` until the returned guard drops.
    pub fn shield() -> Haven<B, Tag> {
        Haven::new()
    }
}

/// Builds a detached [`PolyScoped`] that owns `value` and joins the chain of
/// `$base`, optionally under a tag. The upcast is the compiler's own unsizing
/// coercion, so a base the value cannot coerce to fails to compile.
///
/// ```
/// use sovran_scoped::{poly, scoped, Chain};
/// use std::fmt::Display;
///
/// struct Banner;
///
/// scoped!(let _name = poly!(String::from("ada") => dyn Display, Banner));
/// assert_eq!(Chain::<dyn Display, Banner>::get().unwrap().to_string(), "ada");
/// ```
#[macro_export]
macro_rules! poly {
    ($value:expr => $base:ty) => {
        $crate::poly!($value => $base, ())
    };
    ($value:expr => $base:ty, $tag:ty) => {
        match $value {
            value => {
                // SAFETY: the upcast is an unsizing coercion of its argument
                unsafe { $crate::PolyScoped::<_, $base, $tag>::new(value, |p| p) }
            }
        }
    };
}

impl<C: 'static, B: ?Sized + 'static, Tag: 'static> Drop for PolyScoped<C, B, Tag> {
    fn drop(&mut self) {
        self.node.retire();
    }
}

impl<C: fmt::Debug + 'static, B: ?Sized + 'static, Tag: 'static> fmt::Debug
    for PolyScoped<C, B, Tag>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("PolyScoped");
        match self.try_value() {
            Ok(value) => d.field("value", &*value),
            Err(_) => d.field("value", &format_args!("<borrowed>")),
        };
        d.field("attached", &self.is_attached()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{poly, scoped, Scoped};

    trait TextDecorator {
        fn apply(&self, text: &str) -> String;
    }

    struct UpperCase;
    impl TextDecorator for UpperCase {
        fn apply(&self, text: &str) -> String {
            text.to_uppercase()
        }
    }

    #[derive(Debug, Default)]
    struct Indent {
        width: usize,
    }
    impl TextDecorator for Indent {
        fn apply(&self, text: &str) -> String {
            format!("{}{}", " ".repeat(self.width), text)
        }
    }

    type ScopedDecorator = Chain<dyn TextDecorator>;
    type ScopedIndent = PolyScoped<Indent, dyn TextDecorator>;

    fn decorate(text: &str) -> String {
        let mut out = text.to_string();
        for decorator in ScopedDecorator::iter() {
            out = decorator.borrow().apply(&out);
        }
        out
    }

    #[test]
    fn test_dispatch_through_base_chain() {
        assert_eq!(decorate("hi"), "hi");
        scoped!(let _upper = poly!(UpperCase => dyn TextDecorator));
        assert_eq!(ScopedDecorator::top().unwrap().borrow().apply("hi"), "HI");
        {
            scoped!(let _indent = poly!(Indent { width: 2 } => dyn TextDecorator));
            assert_eq!(decorate("hi"), "  HI");
        }
        assert_eq!(decorate("hi"), "HI");
    }

    #[test]
    fn test_walk_visits_in_attachment_order() {
        scoped!(let _upper = poly!(UpperCase => dyn TextDecorator));
        scoped!(let _indent = poly!(Indent { width: 4 } => dyn TextDecorator));

        let top = ScopedDecorator::top().unwrap();
        assert_eq!(top.borrow().apply("x"), "    x");
        let below = top.next().unwrap();
        assert_eq!(below.borrow().apply("x"), "X");
        assert!(below.next().is_none());
    }

    #[test]
    fn test_concrete_access_and_mutation() {
        // SAFETY: `|p| p` is the unsizing coercion
        let indent = std::pin::pin!(unsafe { ScopedIndent::new(Indent::default(), |p| p) });
        let indent = indent.into_ref();
        indent.attach();
        indent.value_mut().width = 3;
        assert_eq!(indent.value().width, 3);
        assert_eq!(indent.base().apply("a"), "   a");
        assert_eq!(decorate("a"), "   a");
    }

    #[test]
    fn test_abstract_and_concrete_chains_are_distinct() {
        scoped!(let _upper = poly!(UpperCase => dyn TextDecorator));
        assert!(Scoped::<UpperCase>::top().is_none());
        assert!(ScopedDecorator::top().is_some());
    }

    #[test]
    fn test_holder_forwards_chain_queries() {
        assert!(ScopedIndent::is_empty());
        scoped!(let _upper = poly!(UpperCase => dyn TextDecorator));
        scoped!(let indent = poly!(Indent { width: 1 } => dyn TextDecorator));
        assert_eq!(ScopedIndent::len(), 2);
        assert!(ScopedIndent::get().is_some());
        assert!(ScopedIndent::get_mut().is_some());
        assert_eq!(indent.value().width, 1);
    }

    #[test]
    fn test_tagged_macro_form_uses_its_own_chain() {
        struct Quiet;
        scoped!(let _quiet = poly!(UpperCase => dyn TextDecorator, Quiet));
        assert!(ScopedDecorator::is_empty());
        assert_eq!(Chain::<dyn TextDecorator, Quiet>::len(), 1);
    }
}
