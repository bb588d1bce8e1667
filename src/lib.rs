//! # sovran-scoped
//!
//! Dynamically scoped values: a lifetime-bounded, per-thread alternative to
//! global singletons.
//!
//! `sovran-scoped` lets a block put a value "in effect" for its duration, and
//! lets any code it calls, however deep, look that value up without it being
//! threaded through every signature in between. Values of one type (and tag)
//! stack: the innermost block's value shadows the outer ones, and they all
//! remain reachable by walking the chain.
//!
//! ## Key Features
//!
//! - **Lexically bounded**: a value is in effect exactly while its holder
//!   lives; dropping the holder removes it, in any order
//! - **Per-thread**: every thread sees only its own chains, no locking
//! - **Typed and tagged**: chains are identified by value type plus a tag
//!   type, so unrelated uses of `i32` never collide
//! - **Polymorphic**: several implementations of one trait can be installed
//!   with [`poly!`] and found through `Chain<dyn Trait>`
//! - **No allocation**: holders are pinned where they are declared and link
//!   to each other in place
//!
//! ## Usage Examples
//!
//! ### Basic Usage
//!
//! ```rust
//! use sovran_scoped::{scoped, Scoped};
//!
//! struct ThresholdTag;
//! type ScopedThreshold = Scoped<i32, ThresholdTag>;
//!
//! fn print_number(x: i32) -> String {
//!     if let Some(thresh) = ScopedThreshold::get() {
//!         if x >= *thresh {
//!             return "BIG".to_string();
//!         }
//!     }
//!     x.to_string()
//! }
//!
//! {
//!     scoped!(let _threshold = ScopedThreshold::new(4));
//!     assert_eq!(print_number(3), "3");
//!     assert_eq!(print_number(10), "BIG");
//! }
//! assert_eq!(print_number(10), "10");
//! ```
//!
//! ### Visiting Every Value in Scope
//!
//! ```rust
//! use sovran_scoped::{scoped, Scoped};
//! use std::collections::HashMap;
//!
//! #[derive(Default)]
//! struct Counter(HashMap<&'static str, u32>);
//!
//! struct CounterTag;
//! type ScopedCounter = Scoped<Counter, CounterTag>;
//!
//! fn record(event: &'static str) {
//!     for counter in ScopedCounter::iter() {
//!         *counter.borrow_mut().0.entry(event).or_default() += 1;
//!     }
//! }
//!
//! scoped!(let total = ScopedCounter::default());
//! record("add");
//! {
//!     scoped!(let local = ScopedCounter::default());
//!     record("add");
//!     record("div");
//!     assert_eq!(local.value().0.len(), 2);
//! }
//! assert_eq!(total.value().0["add"], 2);
//! assert_eq!(total.value().0["div"], 1);
//! ```
//!
//! ### Hiding Values from Nested Code
//!
//! ```rust
//! use sovran_scoped::{scoped, Scoped};
//!
//! struct Verbose;
//! type ScopedVerbose = Scoped<bool, Verbose>;
//!
//! scoped!(let _verbose = ScopedVerbose::new(true));
//! assert!(ScopedVerbose::get().is_some());
//! {
//!     let _haven = ScopedVerbose::shield();
//!     assert!(ScopedVerbose::get().is_none());
//! }
//! assert!(ScopedVerbose::get().is_some());
//! ```
//!
//! ### Error Handling
//!
//! Lookups on an empty chain return `None`. The `try_*` accessors report
//! borrow conflicts instead of panicking:
//!
//! ```rust
//! use sovran_scoped::{scoped, Scoped, ScopeError};
//!
//! struct Name;
//! type ScopedName = Scoped<String, Name>;
//!
//! match ScopedName::top().map(|n| n.try_borrow().map(|s| s.clone())) {
//!     None => println!("No name in scope"),
//!     Some(Ok(name)) => println!("Name: {}", name),
//!     Some(Err(e)) => println!("Name unavailable: {}", e),
//! }
//!
//! scoped!(let name = ScopedName::new("ada".to_string()));
//! let writer = ScopedName::get_mut().unwrap();
//! assert_eq!(
//!     name.try_value().err(),
//!     Some(ScopeError::AlreadyMutablyBorrowed)
//! );
//! drop(writer);
//! ```
//!
//! ## Rules of Use
//!
//! - Holders are `!Send`; a chain never crosses a thread boundary.
//! - Handles ([`NodeRef`]) and `'static` guards from chain lookups must be
//!   dropped before the holder they point into. Dropping a holder that is
//!   still referenced aborts the process.
//! - A [`Haven`] must not outlive the holders it hides.

mod anchor;
mod borrow;
mod chain;
mod error;
mod haven;
mod node;
mod poly;
mod scoped;
mod seq;

pub use borrow::{Ref, RefMut};
pub use chain::{Chain, Iter, NodeRef};
pub use error::ScopeError;
pub use haven::Haven;
pub use poly::PolyScoped;
pub use scoped::Scoped;
pub use seq::ScopedSeq;
