//! Caller provenance capture for asynchronous failures.
//!
//! A server-side stack trace is noise in the client: when a remote operation
//! fails long after it was issued, the useful information is which call site
//! issued it. Every user-initiated port operation captures a `CallSite` at
//! invocation so the failure can be attributed later.

use std::fmt;
use std::panic::Location;

/// A textual description of the call site that initiated an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    text: String,
}

impl CallSite {
    /// Capture the caller's location.
    ///
    /// Intended to be called from a `#[track_caller]` entry point so the
    /// recorded location is the user's call site, not port internals.
    #[track_caller]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self {
            text: format!(
                "{}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            ),
        }
    }

    /// Use a caller-supplied description instead of a captured location.
    pub fn custom(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
