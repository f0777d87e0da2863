pub mod executor;
pub mod logging;
pub mod metrics;
pub mod queue;
pub mod types;
mod validate;

pub use executor::{BacklogConfig, ExecutorConfig};
pub use logging::{LogFormat, LoggingConfig};
pub use metrics::MetricsConfig;
pub use queue::QueueConfig;
pub use types::{AdmissionPolicy, HumanDuration};
