//! Execution engine: claims ready tasks and runs them on a worker pool.

pub mod invoke;
pub mod processor;

pub use invoke::{Execution, invoke};
pub use processor::{Processor, ProcessorConfig, ShutdownReport};
