//! Fault boundary for calls that must not unwind into the caller.
//!
//! Only panics raised on the Rust side of a call are contained. A crash
//! inside foreign machine code takes the process down with it.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Run `f`, turning a panic into its message.
pub fn contain<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(panic_message)
}

/// Run `f`, returning `fallback` if it panics.
pub fn contain_or<T>(fallback: T, f: impl FnOnce() -> T) -> T {
    contain(f).unwrap_or(fallback)
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
