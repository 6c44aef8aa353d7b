//! CIX Driver
//!
//! The out-of-process half of the code-intelligence engine. It speaks the
//! framed protocol over stdio or TCP, queues scan and query work by
//! priority, runs it on a worker pool and keeps project indexes persisted.

mod driver;
mod error;
mod handler;
pub mod limits;
mod signals;

pub use driver::{Driver, Exit};
pub use error::DispatchError;
pub use handler::{Engine, Job, JobKey, JobQueue, NICE_CHUNK_PRIORITY};
pub use signals::{next_stop_signal, wait_for_shutdown, StopSignal};
