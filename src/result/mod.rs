//! Asynchronous completion primitive used by every export, flush and shutdown path.
//!
//! [`CompletableResultCode`] is a tri-state (pending, succeeded, failed) result
//! that settles exactly once. Observers either register a callback, block with a
//! timeout, or await it. [`CompletableResultCode::of_all`] fans several codes in
//! to one, which is how shutdown combines a final flush with the exporter's own
//! shutdown.
//!
//! Callbacks are run by a [`CallbackDispatcher`]: a FIFO task queue in front of
//! a small worker pool. Callbacks must not assume a specific thread, must not
//! block indefinitely, and may run concurrently with each other.

mod code;
mod dispatch;

pub use code::CompletableResultCode;
pub use dispatch::CallbackDispatcher;
