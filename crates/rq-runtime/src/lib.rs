#[macro_use]
mod log_macros;

mod dispatcher;
pub mod error;
pub mod executor;
pub mod fault;
pub mod lifecycle;
pub mod metrics;
mod multiplexer;
pub mod tracing_init;

pub use executor::QueueExecutor;
pub use fault::PipelineFault;
pub use lifecycle::PipelineHandle;
pub use metrics::PipelineMetrics;
