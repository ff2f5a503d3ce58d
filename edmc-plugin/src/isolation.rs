//! Failure boundary around plugin-authored code.
//!
//! Everything a plugin runs (constructors, `load`, callbacks, providers,
//! `unload`) goes through [`isolate`], so an error, a panic or an attempt to
//! terminate the process becomes a [`Failure`] value instead of unwinding
//! into the host.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// Unwind payload used by [`request_exit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitRequest {
    pub code: i32,
}

/// Ask the host process to terminate.
///
/// Plugin code must use this instead of `std::process::exit`. The request
/// unwinds to the nearest isolation boundary, which logs it and carries on.
pub fn request_exit(code: i32) -> ! {
    panic::resume_unwind(Box::new(ExitRequest { code }))
}

/// How a piece of plugin code failed
#[derive(Debug)]
pub enum Failure {
    /// Returned an error
    Error(anyhow::Error),
    /// Panicked
    Panic(String),
    /// Tried to terminate the process
    Exit(i32),
}

impl Failure {
    fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        if let Some(request) = payload.downcast_ref::<ExitRequest>() {
            return Failure::Exit(request.code);
        }
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Failure::Panic(message)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Error(e) => write!(f, "{:#}", e),
            Failure::Panic(message) => write!(f, "panicked: {}", message),
            Failure::Exit(code) => write!(f, "attempted to exit the host process with code {}", code),
        }
    }
}

/// Run plugin code, converting errors, panics and exit requests into a
/// [`Failure`].
pub fn isolate<T>(f: impl FnOnce() -> anyhow::Result<T>) -> Result<T, Failure> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Failure::Error(e)),
        Err(payload) => Err(Failure::from_panic(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolate_ok() {
        assert_eq!(isolate(|| Ok(42)).unwrap(), 42);
    }

    #[test]
    fn test_isolate_error() {
        let failure = isolate::<()>(|| Err(anyhow::anyhow!("Bang!"))).unwrap_err();
        assert!(matches!(failure, Failure::Error(_)));
        assert_eq!(failure.to_string(), "Bang!");
    }

    #[test]
    fn test_isolate_panic() {
        let failure = isolate::<()>(|| panic!("oh no")).unwrap_err();
        assert!(matches!(&failure, Failure::Panic(message) if message == "oh no"));
        assert_eq!(failure.to_string(), "panicked: oh no");
    }

    #[test]
    fn test_isolate_exit_request() {
        let failure = isolate::<()>(|| request_exit(3)).unwrap_err();
        assert!(matches!(failure, Failure::Exit(3)));
        assert!(failure.to_string().contains("code 3"));
    }
}
