mod backend;
mod catalog;
mod execution_queue;
mod file_state;
mod global_callbacks;
mod module;
mod stats;

pub use backend::{
    CloseFileCompletion, FileStateBackend, LoadInSoundEngineCompletion, OpenFileCompletion,
    UnloadFromSoundEngineCompletion,
};
pub use catalog::FileStateCatalog;
pub use execution_queue::{BasicFunction, ExecutionQueue, ExecutionQueueClosed, QueuedTask};
pub use file_state::{
    DecrementCountCallback, DeleteFileStateFunction, FileState, IncrementCountCallback,
};
pub use global_callbacks::{DeferredAsyncResult, EndFrameCallback, GlobalCallbacks};
pub use module::FileHandlerModule;
pub use stats::{FileHandlerStats, FileHandlerStatsSnapshot};

pub use streambank_base::{
    EngineStepResult, FileHandlerConfig, FileHandlerError, FileHandlerResult, LifecycleState,
    OperationOrigin,
};
