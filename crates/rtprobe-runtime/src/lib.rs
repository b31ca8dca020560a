#![doc = "Real-time execution engine: thread elevation, absolute-time clock, and periodic scheduler."]

pub mod clock;
pub mod platform;
pub mod realtime;
pub mod scheduler;

pub use clock::*;
pub use platform::*;
pub use realtime::*;
pub use scheduler::*;
