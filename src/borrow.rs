use crate::error::ScopeError;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

const UNUSED: isize = 0;
const WRITING: isize = -1;

/// Dynamic borrow state of one payload: positive counts shared guards,
/// `WRITING` marks the single exclusive guard.
#[derive(Debug)]
pub(crate) struct BorrowFlag(Cell<isize>);

impl BorrowFlag {
    pub(crate) const fn new() -> Self {
        Self(Cell::new(UNUSED))
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.0.get() == UNUSED
    }

    fn try_share(&self) -> Result<(), ScopeError> {
        match self.0.get() {
            n if n < UNUSED => Err(ScopeError::AlreadyMutablyBorrowed),
            isize::MAX => panic!("too many shared borrows of a scoped value"),
            n => {
                self.0.set(n + 1);
                Ok(())
            }
        }
    }

    fn unshare(&self) {
        debug_assert!(self.0.get() > UNUSED);
        self.0.set(self.0.get() - 1);
    }

    fn try_exclusive(&self) -> Result<(), ScopeError> {
        match self.0.get() {
            UNUSED => {
                self.0.set(WRITING);
                Ok(())
            }
            n if n < UNUSED => Err(ScopeError::AlreadyMutablyBorrowed),
            _ => Err(ScopeError::AlreadyBorrowed),
        }
    }

    fn unexclusive(&self) {
        debug_assert_eq!(self.0.get(), WRITING);
        self.0.set(UNUSED);
    }
}

/// Shared access to a scoped value.
///
/// Returned by holders (`Scoped::value`) with a lifetime tied to the holder,
/// and by chain lookups (`Chain::get`, `NodeRef::borrow`) with a `'static`
/// lifetime. In the latter case the guard is tracked by the node it came
/// from: dropping that node's holder while the guard is alive aborts the
/// process.
pub struct Ref<'a, V: ?Sized> {
    value: NonNull<V>,
    flag: NonNull<BorrowFlag>,
    _marker: PhantomData<&'a V>,
}

impl<'a, V: ?Sized> Ref<'a, V> {
    /// # Safety
    ///
    /// `value` and `flag` must stay valid for as long as the flag records an
    /// outstanding borrow.
    pub(crate) unsafe fn acquire(
        value: NonNull<V>,
        flag: NonNull<BorrowFlag>,
    ) -> Result<Self, ScopeError> {
        // SAFETY: guaranteed by the caller
        unsafe { flag.as_ref() }.try_share()?;
        Ok(Self {
            value,
            flag,
            _marker: PhantomData,
        })
    }
}

impl<V: ?Sized> Deref for Ref<'_, V> {
    type Target = V;

    fn deref(&self) -> &V {
        // SAFETY: the shared flag excludes writers while this guard lives
        unsafe { self.value.as_ref() }
    }
}

impl<V: ?Sized> Drop for Ref<'_, V> {
    fn drop(&mut self) {
        // SAFETY: the owning node cannot be dropped while the flag is held
        unsafe { self.flag.as_ref() }.unshare();
    }
}

impl<V: ?Sized + fmt::Debug> fmt::Debug for Ref<'_, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (**self).fmt(f)
    }
}

impl<V: ?Sized + fmt::Display> fmt::Display for Ref<'_, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (**self).fmt(f)
    }
}

/// Exclusive access to a scoped value. See [`Ref`] for the lifetime rules.
pub struct RefMut<'a, V: ?Sized> {
    value: NonNull<V>,
    flag: NonNull<BorrowFlag>,
    _marker: PhantomData<&'a mut V>,
}

impl<'a, V: ?Sized> RefMut<'a, V> {
    /// # Safety
    ///
    /// Same contract as [`Ref::acquire`].
    pub(crate) unsafe fn acquire(
        value: NonNull<V>,
        flag: NonNull<BorrowFlag>,
    ) -> Result<Self, ScopeError> {
        // SAFETY: guaranteed by the caller
        unsafe { flag.as_ref() }.try_exclusive()?;
        Ok(Self {
            value,
            flag,
            _marker: PhantomData,
        })
    }
}

impl<V: ?Sized> Deref for RefMut<'_, V> {
    type Target = V;

    fn deref(&self) -> &V {
        // SAFETY: the exclusive flag excludes every other guard
        unsafe { self.value.as_ref() }
    }
}

impl<V: ?Sized> DerefMut for RefMut<'_, V> {
    fn deref_mut(&mut self) -> &mut V {
        // SAFETY: the exclusive flag excludes every other guard
        unsafe { self.value.as_mut() }
    }
}

impl<V: ?Sized> Drop for RefMut<'_, V> {
    fn drop(&mut self) {
        // SAFETY: the owning node cannot be dropped while the flag is held
        unsafe { self.flag.as_ref() }.unexclusive();
    }
}

impl<V: ?Sized + fmt::Debug> fmt::Debug for RefMut<'_, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (**self).fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::UnsafeCell;

    struct Slot<V> {
        value: UnsafeCell<V>,
        flag: BorrowFlag,
    }

    impl<V> Slot<V> {
        fn new(value: V) -> Self {
            Self {
                value: UnsafeCell::new(value),
                flag: BorrowFlag::new(),
            }
        }

        fn read(&self) -> Result<Ref<'_, V>, ScopeError> {
            unsafe {
                Ref::acquire(
                    NonNull::from(&self.value).cast(),
                    NonNull::from(&self.flag),
                )
            }
        }

        fn write(&self) -> Result<RefMut<'_, V>, ScopeError> {
            unsafe {
                RefMut::acquire(
                    NonNull::from(&self.value).cast(),
                    NonNull::from(&self.flag),
                )
            }
        }
    }

    #[test]
    fn test_shared_guards_stack() {
        let slot = Slot::new(7);
        let a = slot.read().unwrap();
        let b = slot.read().unwrap();
        assert_eq!(*a + *b, 14);
        assert_eq!(slot.write().err(), Some(ScopeError::AlreadyBorrowed));
        drop(a);
        drop(b);
        assert!(slot.flag.is_idle());
    }

    #[test]
    fn test_exclusive_guard_blocks_everything() {
        let slot = Slot::new(String::from("a"));
        {
            let mut w = slot.write().unwrap();
            w.push('b');
            assert_eq!(slot.read().err(), Some(ScopeError::AlreadyMutablyBorrowed));
            assert_eq!(slot.write().err(), Some(ScopeError::AlreadyMutablyBorrowed));
        }
        assert_eq!(&*slot.read().unwrap(), "ab");
        assert!(slot.flag.is_idle());
    }
}
