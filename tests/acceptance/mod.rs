//! Integration tests for rtprobe acceptance testing.
//!
//! Unprivileged tests run by default; anything that needs SCHED_FIFO or
//! `mlockall` is `#[ignore]`d and skips itself when not running as root.

mod common;
mod latency_test;
