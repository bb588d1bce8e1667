use std::fmt;

/// Errors returned by the fallible accessors of scoped chains and holders
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    /// No value is currently in scope for the requested chain
    Empty,
    /// Exclusive access was requested while shared borrows are alive
    AlreadyBorrowed,
    /// Access was requested while an exclusive borrow is alive
    AlreadyMutablyBorrowed,
    /// A structural check found a broken link
    Corrupted(String),
}

impl fmt::Display for ScopeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ScopeError::Empty => write!(f, "No scoped value in effect"),
            ScopeError::AlreadyBorrowed => write!(f, "Scoped value is already borrowed"),
            ScopeError::AlreadyMutablyBorrowed => {
                write!(f, "Scoped value is already mutably borrowed")
            }
            ScopeError::Corrupted(detail) => write!(f, "Scoped chain is corrupted: {}", detail),
        }
    }
}

impl std::error::Error for ScopeError {}
