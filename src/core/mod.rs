// Configuration, errors and logging shared by the whole executor

pub mod config;
pub mod errors;
pub mod logging;

pub use config::{ExecutorConfig, PhaseWait};
pub use errors::{ContextError, ExecutorError, GraphError, HandlerError, Result};
