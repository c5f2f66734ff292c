mod config;
mod error;
mod lifecycle;

pub use config::{FileHandlerConfig, FileHandlerConfigJson, CONFIG_FILE_NAME};
pub use error::{FileHandlerError, FileHandlerResult};
pub use lifecycle::{EngineStepResult, LifecycleState, OperationOrigin};
