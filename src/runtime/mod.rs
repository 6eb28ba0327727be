//! # Runtime
//!
//! Process wiring around the reconciler.
//!
//! - `initialization.rs` - Start-up sequence
//! - `watch_loop.rs` - Controller run loop with restart on stream end
//! - `watches.rs` - Watched kinds and their mapping to the Config
//! - `error_policy.rs` - Requeue and watch error handling

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
pub mod watches;
