use crate::{ExecutionQueue, FileHandlerStats, GlobalCallbacks};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use streambank_base::{FileHandlerConfig, FileHandlerResult};

/// Services shared by all file states: the bank execution queue, end-of-frame callbacks,
/// statistics and configuration.
///
/// File states only keep a weak reference to the module and look it up whenever they need it.
/// A module that was dropped (or a state created without one) is a normal condition, and every
/// lookup handles it.
pub struct FileHandlerModule {
    config: FileHandlerConfig,
    bank_execution_queue: Arc<ExecutionQueue>,
    global_callbacks: Arc<GlobalCallbacks>,
    stats: FileHandlerStats,
    exit_requested: AtomicBool,
}

impl FileHandlerModule {
    pub fn new(config: FileHandlerConfig) -> FileHandlerResult<Arc<Self>> {
        config.validate()?;
        let bank_execution_queue = ExecutionQueue::new_shared(&config.bank_queue_name)?;
        log::info!(
            "FileHandlerModule: created with bank queue {}",
            config.bank_queue_name
        );

        Ok(Arc::new(FileHandlerModule {
            config,
            bank_execution_queue,
            global_callbacks: Arc::new(GlobalCallbacks::default()),
            stats: FileHandlerStats::default(),
            exit_requested: AtomicBool::new(false),
        }))
    }

    pub fn config(&self) -> &FileHandlerConfig {
        &self.config
    }

    /// Serial queue for sound bank operations. The sound engine's bank manager blocks callers from
    /// more than one thread, so feeding it from a single queue avoids contention.
    pub fn bank_execution_queue(&self) -> &Arc<ExecutionQueue> {
        &self.bank_execution_queue
    }

    pub fn global_callbacks(&self) -> &Arc<GlobalCallbacks> {
        &self.global_callbacks
    }

    pub fn stats(&self) -> &FileHandlerStats {
        &self.stats
    }

    /// Marks the process as shutting down. Leaks reported after this are logged quietly.
    pub fn request_exit(&self) {
        log::info!("FileHandlerModule: exit requested");
        self.exit_requested.store(true, Ordering::Release);
    }

    pub fn is_exit_requested(&self) -> bool {
        self.exit_requested.load(Ordering::Acquire)
    }

    /// Convenience for the application loop: runs end-of-frame callbacks once
    pub fn end_frame(&self) {
        self.global_callbacks.end_frame();
    }
}

impl Drop for FileHandlerModule {
    fn drop(&mut self) {
        self.bank_execution_queue.close_and_discard();
    }
}
