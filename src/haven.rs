use crate::anchor::Ends;
use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;

/// Hides an entire chain for its lifetime.
///
/// Creating a `Haven` takes the chain's current ends and leaves the anchor
/// empty, so code running inside sees nothing in scope and new holders start
/// a fresh chain. Dropping it puts the saved ends back. The hidden values are
/// untouched; they are just not reachable for a while.
///
/// Holders attached before the haven must outlive it. Holders attached while
/// it is alive should be gone before it drops; any that are still attached
/// are stacked above the restored chain.
///
/// # Examples
///
/// ```
/// use sovran_scoped::{scoped, Scoped};
///
/// struct Limit;
/// type ScopedLimit = Scoped<u32, Limit>;
///
/// fn clamp(x: u32) -> u32 {
///     match ScopedLimit::get() {
///         Some(limit) if x > *limit => *limit,
///         _ => x,
///     }
/// }
///
/// scoped!(let _limit = ScopedLimit::new(10));
/// assert_eq!(clamp(50), 10);
/// {
///     let _shield = ScopedLimit::shield();
///     assert_eq!(clamp(50), 50);
/// }
/// assert_eq!(clamp(50), 10);
/// ```
#[must_use = "a haven restores the chain as soon as it is dropped"]
pub struct Haven<B: ?Sized + 'static, Tag: 'static = ()> {
    saved: Ends<B, Tag>,
    _not_send: PhantomData<*const ()>,
}

impl<B: ?Sized + 'static, Tag: 'static> Haven<B, Tag> {
    pub fn new() -> Self {
        let saved = Ends::<B, Tag>::load();
        Ends::<B, Tag>::empty().store();
        tracing::debug!(
            chain = type_name::<B>(),
            hid = !saved.is_empty(),
            "entered haven"
        );
        Self {
            saved,
            _not_send: PhantomData,
        }
    }

    /// True if the chain was non-empty when the haven was created.
    pub fn hides_anything(&self) -> bool {
        !self.saved.is_empty()
    }
}

impl<B: ?Sized + 'static, Tag: 'static> Default for Haven<B, Tag> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: ?Sized + 'static, Tag: 'static> Drop for Haven<B, Tag> {
    fn drop(&mut self) {
        let inner = Ends::<B, Tag>::load();
        let restored = if inner.is_empty() {
            self.saved
        } else {
            tracing::warn!(
                chain = type_name::<B>(),
                "scoped values attached inside a haven outlived it; stacking them above the restored chain"
            );
            // SAFETY: both chains consist of attached, hence live, nodes
            unsafe { inner.stack_on(self.saved) }
        };
        restored.store();
        tracing::debug!(chain = type_name::<B>(), "left haven");
    }
}

impl<B: ?Sized + 'static, Tag: 'static> fmt::Debug for Haven<B, Tag> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Haven")
            .field("chain", &type_name::<B>())
            .field("hides_anything", &self.hides_anything())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{scoped, Chain, Scoped};

    struct Hidden;
    type ScopedWord = Scoped<&'static str, Hidden>;

    fn words() -> Vec<&'static str> {
        Chain::<&'static str, Hidden>::iter()
            .map(|n| *n.borrow())
            .collect()
    }

    #[test]
    fn test_haven_hides_and_restores() {
        scoped!(let _a = ScopedWord::new("outer"));
        scoped!(let _b = ScopedWord::new("middle"));
        let before_top = ScopedWord::top().unwrap();
        let before_bottom = ScopedWord::bottom().unwrap();
        {
            let haven = ScopedWord::shield();
            assert!(haven.hides_anything());
            assert!(ScopedWord::top().is_none());
            assert!(ScopedWord::bottom().is_none());
            {
                scoped!(let _c = ScopedWord::new("inner"));
                assert_eq!(words(), vec!["inner"]);
            }
            assert!(ScopedWord::is_empty());
        }
        assert!(ScopedWord::top().unwrap().ptr_eq(&before_top));
        assert!(ScopedWord::bottom().unwrap().ptr_eq(&before_bottom));
        assert_eq!(words(), vec!["middle", "outer"]);
    }

    #[test]
    fn test_haven_on_empty_chain() {
        let haven = Haven::<&'static str, Hidden>::new();
        assert!(!haven.hides_anything());
        drop(haven);
        assert!(ScopedWord::is_empty());
    }

    #[test]
    fn test_nested_havens() {
        scoped!(let _a = ScopedWord::new("a"));
        {
            let _h1 = ScopedWord::shield();
            scoped!(let _b = ScopedWord::new("b"));
            {
                let _h2 = ScopedWord::shield();
                assert!(ScopedWord::is_empty());
            }
            assert_eq!(words(), vec!["b"]);
        }
        assert_eq!(words(), vec!["a"]);
    }

    #[test]
    fn test_inner_value_outliving_haven_is_stacked() {
        scoped!(let _outer = ScopedWord::new("outer"));
        let late = std::pin::pin!(ScopedWord::new("late"));
        let late = late.into_ref();
        {
            let _haven = ScopedWord::shield();
            late.attach();
        }
        assert_eq!(words(), vec!["late", "outer"]);
        assert_eq!(Chain::<&'static str, Hidden>::validate(), Ok(2));
    }
}
