//! The link cell embedded in every holder, and the splice operations that
//! keep a chain consistent.
//!
//! Orientation: `prev` points toward the top (the most recently attached
//! node), `next` toward the bottom. The top has no `prev`, the bottom has no
//! `next`, and the anchor records both ends.
//!
//! Every attached node is pinned and detaches itself before its memory goes
//! away, so dereferencing a link of an attached node is always valid. All the
//! `unsafe` in this module leans on that one invariant.

use crate::anchor::Ends;
use crate::borrow::BorrowFlag;
use crate::error::ScopeError;
use std::any::type_name;
use std::cell::Cell;
use std::marker::PhantomData;
use std::ptr::NonNull;

pub(crate) type Link<B, Tag> = Option<NonNull<Node<B, Tag>>>;

pub(crate) struct Node<B: ?Sized + 'static, Tag: 'static> {
    prev: Cell<Link<B, Tag>>,
    next: Cell<Link<B, Tag>>,
    value: Cell<Option<NonNull<B>>>,
    attached: Cell<bool>,
    handles: Cell<usize>,
    pub(crate) flag: BorrowFlag,
    _tag: PhantomData<fn() -> Tag>,
}

impl<B: ?Sized + 'static, Tag: 'static> Node<B, Tag> {
    pub(crate) const fn new() -> Self {
        Self {
            prev: Cell::new(None),
            next: Cell::new(None),
            value: Cell::new(None),
            attached: Cell::new(false),
            handles: Cell::new(0),
            flag: BorrowFlag::new(),
            _tag: PhantomData,
        }
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.attached.get()
    }

    pub(crate) fn next_link(&self) -> Link<B, Tag> {
        self.next.get()
    }

    pub(crate) fn prev_link(&self) -> Link<B, Tag> {
        self.prev.get()
    }

    /// Payload pointer recorded by the last attach.
    pub(crate) fn value_ptr(&self) -> Option<NonNull<B>> {
        self.value.get()
    }

    pub(crate) fn acquire_handle(&self) {
        self.handles.set(self.handles.get() + 1);
    }

    pub(crate) fn release_handle(&self) {
        debug_assert!(self.handles.get() > 0);
        self.handles.set(self.handles.get() - 1);
    }

    /// True when no handle or borrow guard refers to this node.
    pub(crate) fn is_unreferenced(&self) -> bool {
        self.handles.get() == 0 && self.flag.is_idle()
    }

    /// Attaches at the top of the chain.
    ///
    /// # Safety
    ///
    /// `self` must be pinned and must stay alive until it is detached;
    /// `value` must point into the same pinned holder.
    pub(crate) unsafe fn attach(&self, value: NonNull<B>) {
        assert!(
            !self.is_attached(),
            "scoped node on {} attached twice",
            type_name::<B>()
        );
        let mut ends = Ends::<B, Tag>::load();
        self.value.set(Some(value));
        // SAFETY: the current top is attached, hence alive
        unsafe { self.splice(None, ends.top, &mut ends) };
        ends.store();
        tracing::trace!(chain = type_name::<B>(), "attached scoped node");
        verify::<B, Tag>();
    }

    /// Attaches directly above `target`, or at the top when `target` is
    /// missing or detached.
    ///
    /// # Safety
    ///
    /// Same contract as [`Node::attach`].
    pub(crate) unsafe fn attach_above(&self, value: NonNull<B>, target: Option<&Node<B, Tag>>) {
        let target = match target {
            Some(target) if target.is_attached() => target,
            // SAFETY: forwarded contract
            _ => return unsafe { self.attach(value) },
        };
        assert!(
            !self.is_attached(),
            "scoped node on {} attached twice",
            type_name::<B>()
        );
        let mut ends = Ends::<B, Tag>::load();
        let above = target.prev.get();
        if above.is_none() {
            assert!(
                ends.top == Some(NonNull::from(target)),
                "attach target on {} is hidden by a haven",
                type_name::<B>()
            );
        }
        self.value.set(Some(value));
        // SAFETY: `above` and `target` are attached, hence alive
        unsafe { self.splice(above, Some(NonNull::from(target)), &mut ends) };
        ends.store();
        tracing::trace!(chain = type_name::<B>(), "attached scoped node above target");
        verify::<B, Tag>();
    }

    /// Takes over `source`'s position and detaches `source`. A detached
    /// `source` makes this a plain top attach.
    ///
    /// # Safety
    ///
    /// Same contract as [`Node::attach`].
    pub(crate) unsafe fn take_place_of(&self, value: NonNull<B>, source: &Node<B, Tag>) {
        assert!(
            source.is_reachable(),
            "relocation source on {} is hidden by a haven",
            type_name::<B>()
        );
        // SAFETY: forwarded contract
        unsafe { self.attach_above(value, Some(source)) };
        source.detach();
        tracing::trace!(chain = type_name::<B>(), "relocated scoped node");
    }

    /// Unlinks from the chain. No-op on a detached node.
    ///
    /// Panics if the node is hidden by a live haven.
    pub(crate) fn detach(&self) {
        if let Err(reason) = self.unlink() {
            panic!("cannot detach scoped node on {}: {}", type_name::<B>(), reason);
        }
    }

    /// Detach path for holder destructors: a node that is still referenced
    /// or cannot be unlinked would leave dangling pointers behind, so the
    /// process aborts instead.
    pub(crate) fn retire(&self) {
        if !self.is_unreferenced() {
            abort_with(
                type_name::<B>(),
                "holder dropped while a handle or borrow of it is alive",
            );
        }
        if let Err(reason) = self.unlink() {
            abort_with(type_name::<B>(), reason);
        }
    }

    fn unlink(&self) -> Result<(), &'static str> {
        if !self.is_attached() {
            return Ok(());
        }
        let this = Some(NonNull::from(self));
        let prev = self.prev.get();
        let next = self.next.get();

        // A torn-down anchor table means the thread is exiting; the
        // neighbors still need patching.
        let mut ends = Ends::<B, Tag>::try_load();
        if let Some(ends) = &ends {
            if prev.is_none() && ends.top != this {
                return Err("node is not the recorded top; a haven is hiding it");
            }
            if next.is_none() && ends.bottom != this {
                return Err("node is not the recorded bottom; a haven is hiding it");
            }
        }

        match prev {
            // SAFETY: attached neighbor, hence alive
            Some(p) => unsafe { p.as_ref() }.next.set(next),
            None => {
                if let Some(ends) = &mut ends {
                    ends.top = next;
                }
            }
        }
        match next {
            // SAFETY: attached neighbor, hence alive
            Some(n) => unsafe { n.as_ref() }.prev.set(prev),
            None => {
                if let Some(ends) = &mut ends {
                    ends.bottom = prev;
                }
            }
        }
        self.prev.set(None);
        self.next.set(None);
        self.attached.set(false);
        debug_assert!(Self::neighbors_joined(prev, next));

        if let Some(ends) = ends {
            ends.store();
        }
        tracing::trace!(chain = type_name::<B>(), "detached scoped node");
        verify::<B, Tag>();
        Ok(())
    }

    /// Links `self` between `above` and `below`, updating `ends` where either
    /// side is missing.
    ///
    /// # Safety
    ///
    /// `above` and `below` must be adjacent attached nodes (or chain ends).
    unsafe fn splice(&self, above: Link<B, Tag>, below: Link<B, Tag>, ends: &mut Ends<B, Tag>) {
        let this = Some(NonNull::from(self));
        self.prev.set(above);
        self.next.set(below);
        match above {
            // SAFETY: guaranteed by the caller
            Some(a) => unsafe { a.as_ref() }.next.set(this),
            None => ends.top = this,
        }
        match below {
            // SAFETY: guaranteed by the caller
            Some(b) => unsafe { b.as_ref() }.prev.set(this),
            None => ends.bottom = this,
        }
        self.attached.set(true);
        debug_assert!(self.links_agree());
    }

    /// Local consistency: both neighbors point back at `self`.
    fn links_agree(&self) -> bool {
        let this = Some(NonNull::from(self));
        // SAFETY: neighbors of an attached node are alive
        let prev_ok = self
            .prev
            .get()
            .map_or(true, |p| unsafe { p.as_ref() }.next.get() == this);
        let next_ok = self
            .next
            .get()
            .map_or(true, |n| unsafe { n.as_ref() }.prev.get() == this);
        prev_ok && next_ok
    }

    /// Local consistency after an unlink: the former neighbors point at each
    /// other.
    fn neighbors_joined(prev: Link<B, Tag>, next: Link<B, Tag>) -> bool {
        // SAFETY: the neighbors stay attached, hence alive
        let down = prev.map_or(true, |p| unsafe { p.as_ref() }.next.get() == next);
        let up = next.map_or(true, |n| unsafe { n.as_ref() }.prev.get() == prev);
        down && up
    }

    /// Checks that this node can be unlinked without touching a hidden chain.
    pub(crate) fn is_reachable(&self) -> bool {
        if !self.is_attached() {
            return true;
        }
        let ends = Ends::<B, Tag>::load();
        let this = Some(NonNull::from(self));
        (self.prev.get().is_some() || ends.top == this)
            && (self.next.get().is_some() || ends.bottom == this)
    }
}

impl<B: ?Sized + 'static, Tag: 'static> Ends<B, Tag> {
    /// Stacks `self` (a chain built while `lower` was hidden) on top of
    /// `lower` and returns the ends of the combined chain.
    ///
    /// # Safety
    ///
    /// Every node reachable from either pair of ends must be alive.
    pub(crate) unsafe fn stack_on(self, lower: Ends<B, Tag>) -> Ends<B, Tag> {
        match (self.bottom, lower.top) {
            (Some(upper_bottom), Some(lower_top)) => {
                // SAFETY: guaranteed by the caller
                unsafe {
                    upper_bottom.as_ref().next.set(Some(lower_top));
                    lower_top.as_ref().prev.set(Some(upper_bottom));
                }
                Ends {
                    top: self.top,
                    bottom: lower.bottom,
                }
            }
            (Some(_), None) => self,
            (None, _) => lower,
        }
    }

    /// Walks the chain in both directions and returns its length.
    pub(crate) fn validate(&self) -> Result<usize, ScopeError> {
        let corrupted = |detail: &str| {
            Err(ScopeError::Corrupted(format!(
                "{} on {}",
                detail,
                type_name::<B>()
            )))
        };
        if self.top.is_none() != self.bottom.is_none() {
            return corrupted("only one end of the chain is recorded");
        }

        let mut down = 0usize;
        let mut above: Link<B, Tag> = None;
        let mut cursor = self.top;
        while let Some(current) = cursor {
            // SAFETY: nodes reachable from the anchor are attached, hence alive
            let node = unsafe { current.as_ref() };
            if !node.is_attached() {
                return corrupted("detached node reachable from the top");
            }
            if node.prev.get() != above {
                return corrupted("prev link does not point at the node above");
            }
            down += 1;
            above = cursor;
            cursor = node.next.get();
        }
        if above != self.bottom {
            return corrupted("walk from the top does not end at the bottom");
        }

        let mut up = 0usize;
        let mut cursor = self.bottom;
        while let Some(current) = cursor {
            // SAFETY: as above
            let node = unsafe { current.as_ref() };
            up += 1;
            if up > down {
                return corrupted("walk from the bottom is longer than from the top");
            }
            cursor = node.prev.get();
        }
        if up != down {
            return corrupted("walks from the two ends disagree");
        }
        Ok(down)
    }
}

/// Full structural check after every attach and detach.
#[cfg(any(test, feature = "verify-chains"))]
fn verify<B: ?Sized + 'static, Tag: 'static>() {
    if let Err(e) = Ends::<B, Tag>::load().validate() {
        panic!("{}", e);
    }
}

#[cfg(not(any(test, feature = "verify-chains")))]
#[inline(always)]
fn verify<B: ?Sized + 'static, Tag: 'static>() {}

#[cold]
#[inline(never)]
pub(crate) fn abort_with(chain: &str, reason: &str) -> ! {
    tracing::error!(chain, reason, "fatal scoped chain violation");
    eprintln!("fatal scoped chain violation on {}: {}", chain, reason);
    std::process::abort()
}
