//! Collaborator contracts for rule execution: the tagged evaluation
//! [`Outcome`], the [`RuleParser`] trigger, result sinks and sources, and the
//! synchronous [`SimpleExecutor`].

pub mod error;
pub mod outcome;
pub mod parser;
pub mod result;
pub mod simple;

pub use error::{CoreError, CoreReason, CoreResult};
pub use outcome::Outcome;
pub use parser::RuleParser;
pub use result::{ResultCallback, ResultQueue, ResultSink, ResultSource};
pub use simple::SimpleExecutor;
