mod decrement;
mod increment;
mod later_queue;
mod operation;

use crate::execution_queue::{BasicFunction, ExecutionQueueClosed, QueuedTask};
use crate::{ExecutionQueue, FileHandlerModule, FileHandlerStats, FileStateBackend};
use crossbeam_channel::{Receiver, Sender};
use operation::FileStateOperation;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock, Weak};
use streambank_base::{FileHandlerConfig, FileHandlerResult, LifecycleState, OperationOrigin};

pub type IncrementCountCallback = Box<dyn FnOnce(bool) + Send + 'static>;
pub type DecrementCountCallback = BasicFunction;
/// Called by the last decrement of a state that can be deleted. It must eventually call the
/// callback it receives.
pub type DeleteFileStateFunction = Box<dyn FnOnce(DecrementCountCallback) + Send + 'static>;

// Values of current_op that are not operation ids
const CURRENT_OP_NONE: u64 = 0;
const CURRENT_OP_CLAIMED: u64 = u64::MAX;

/// Lifecycle of one file known to the sound engine: opened on disk, then loaded in the engine, for
/// as long as something references it.
///
/// Increments and decrements can be requested from any thread. They are queued and processed one
/// at a time, in request order, on the state's own [`ExecutionQueue`]. Every step that talks to the
/// sound engine goes through the [`FileStateBackend`], which answers asynchronously.
///
/// A file state must be terminated with [`FileState::term`] before the last reference goes away.
pub struct FileState {
    backend: Box<dyn FileStateBackend>,
    module: Weak<FileHandlerModule>,
    // None once terminated
    execution_queue: RwLock<Option<Arc<ExecutionQueue>>>,

    // Only mutated from the execution queue. Atomics so they can be observed from anywhere.
    state: AtomicU8,
    load_count: AtomicI32,
    streaming_count: AtomicI32,

    // Incremented by the requesting thread, decremented from the execution queue
    opened_instances: AtomicI32,

    current_op: AtomicU64,
    next_op_id: AtomicU64,
    op_queue_tx: Sender<FileStateOperation>,
    op_queue_rx: Receiver<FileStateOperation>,

    later_op_queue_tx: Sender<QueuedTask>,
    later_op_queue_rx: Receiver<QueuedTask>,
    recurring_callback_registered: AtomicBool,

    terminate_wait_loops: u32,
    retry_deferred_without_callbacks: bool,
}

impl FileState {
    pub fn new(
        backend: Box<dyn FileStateBackend>,
        module: &Arc<FileHandlerModule>,
    ) -> FileHandlerResult<Arc<Self>> {
        Self::create(backend, Arc::downgrade(module), module.config())
    }

    /// A file state that isn't attached to any module. It has no bank queue, no statistics and no
    /// end-of-frame callbacks.
    pub fn new_detached(
        backend: Box<dyn FileStateBackend>,
        config: &FileHandlerConfig,
    ) -> FileHandlerResult<Arc<Self>> {
        Self::create(backend, Weak::new(), config)
    }

    fn create(
        backend: Box<dyn FileStateBackend>,
        module: Weak<FileHandlerModule>,
        config: &FileHandlerConfig,
    ) -> FileHandlerResult<Arc<Self>> {
        let queue_name = format!(
            "{} {} {}",
            config.file_state_queue_name,
            backend.managing_type_name(),
            backend.short_id()
        );
        let execution_queue = ExecutionQueue::new_shared(&queue_name)?;
        let (op_queue_tx, op_queue_rx) = crossbeam_channel::unbounded();
        let (later_op_queue_tx, later_op_queue_rx) = crossbeam_channel::unbounded();

        Ok(Arc::new(FileState {
            backend,
            module,
            execution_queue: RwLock::new(Some(execution_queue)),
            state: AtomicU8::new(LifecycleState::Closed.as_u8()),
            load_count: AtomicI32::new(0),
            streaming_count: AtomicI32::new(0),
            opened_instances: AtomicI32::new(0),
            current_op: AtomicU64::new(CURRENT_OP_NONE),
            next_op_id: AtomicU64::new(1),
            op_queue_tx,
            op_queue_rx,
            later_op_queue_tx,
            later_op_queue_rx,
            recurring_callback_registered: AtomicBool::new(false),
            terminate_wait_loops: config.terminate_wait_loops,
            retry_deferred_without_callbacks: config.retry_deferred_without_callbacks,
        }))
    }

    pub fn managing_type_name(&self) -> &'static str {
        self.backend.managing_type_name()
    }

    pub fn short_id(&self) -> u32 {
        self.backend.short_id()
    }

    pub fn is_streamed_state(&self) -> bool {
        self.backend.is_streamed_state()
    }

    pub fn state(&self) -> LifecycleState {
        let value = self.state.load(Ordering::Acquire);
        match LifecycleState::from_u8(value) {
            Some(state) => state,
            None => unreachable!("FileState holds an invalid state value {}", value),
        }
    }

    pub fn state_name(&self) -> &'static str {
        self.state().name()
    }

    pub fn load_count(&self) -> i32 {
        self.load_count.load(Ordering::Acquire)
    }

    pub fn streaming_count(&self) -> i32 {
        self.streaming_count.load(Ordering::Acquire)
    }

    pub fn opened_instances(&self) -> i32 {
        self.opened_instances.load(Ordering::Acquire)
    }

    /// Nothing references the state anymore and it is fully closed
    pub fn can_delete(&self) -> bool {
        self.opened_instances() == 0
            && self.state() == LifecycleState::Closed
            && self.load_count() == 0
    }

    pub fn is_terminated(&self) -> bool {
        self.execution_queue().is_none()
    }

    pub fn has_pending_operations(&self) -> bool {
        self.current_op.load(Ordering::Acquire) != CURRENT_OP_NONE || !self.op_queue_rx.is_empty()
    }

    pub fn has_deferred_operations(&self) -> bool {
        !self.later_op_queue_rx.is_empty()
    }

    pub fn module(&self) -> Option<Arc<FileHandlerModule>> {
        self.module.upgrade()
    }

    pub fn execution_queue(&self) -> Option<Arc<ExecutionQueue>> {
        self.execution_queue
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// The module's serial queue for sound bank operations. None if the module is gone.
    pub fn bank_execution_queue(&self) -> Option<Arc<ExecutionQueue>> {
        match self.module.upgrade() {
            Some(module) => Some(module.bank_execution_queue().clone()),
            None => {
                log::info!(
                    "FileState::bank_execution_queue [{:p}] {} {}: File handler module is unloaded.",
                    self,
                    self.managing_type_name(),
                    self.short_id()
                );
                None
            }
        }
    }

    /// Request one more reference. The callback receives whether the file reached the state the
    /// origin asked for.
    pub fn increment_count_async<F: FnOnce(bool) + Send + 'static>(
        self: &Arc<Self>,
        origin: OperationOrigin,
        callback: F,
    ) {
        profiling::scope!("FileState::increment_count_async");
        if self.is_terminated() {
            log::error!(
                "FileState::increment_count_async [{:p}] {} {}: Incrementing a terminated state. Failing.",
                Arc::as_ptr(self),
                self.managing_type_name(),
                self.short_id()
            );
            callback(false);
            return;
        }

        let opened_instances = self.opened_instances.fetch_add(1, Ordering::AcqRel) + 1;
        let operation =
            FileStateOperation::increment(self.allocate_op_id(), origin, Box::new(callback));
        log::trace!(
            "FileState::increment_count_async [{:p}] {} {}: ++OpenedInstances {} with Op {} ({})",
            Arc::as_ptr(self),
            self.managing_type_name(),
            self.short_id(),
            opened_instances,
            operation.id(),
            origin
        );
        self.enqueue_operation(operation);
    }

    /// Release one reference. When this was the last one and the state can be deleted,
    /// delete_state is called (on the execution queue) with the callback, instead of the callback
    /// directly. On a terminated state only the callback is called, right away.
    pub fn decrement_count_async<D, F>(
        self: &Arc<Self>,
        origin: OperationOrigin,
        delete_state: D,
        callback: F,
    ) where
        D: FnOnce(DecrementCountCallback) + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        profiling::scope!("FileState::decrement_count_async");
        if self.is_terminated() {
            log::error!(
                "FileState::decrement_count_async [{:p}] {} {}: Decrementing a terminated state. Calling back without deleting.",
                Arc::as_ptr(self),
                self.managing_type_name(),
                self.short_id()
            );
            drop(delete_state);
            callback();
            return;
        }

        let operation = FileStateOperation::decrement(
            self.allocate_op_id(),
            origin,
            Box::new(delete_state),
            Box::new(callback),
        );
        log::trace!(
            "FileState::decrement_count_async [{:p}] {} {}: Decrementing with Op {} ({})",
            Arc::as_ptr(self),
            self.managing_type_name(),
            self.short_id(),
            operation.id(),
            origin
        );
        self.enqueue_operation(operation);
    }

    /// Stops the execution queue. The state must not be used afterwards. Returns false if it was
    /// already terminated.
    pub fn term(&self) -> bool {
        profiling::scope!("FileState::term");
        let execution_queue = match self.execution_queue() {
            Some(execution_queue) => execution_queue,
            None => {
                log::error!(
                    "FileState::term [{:p}] {} {}: FileState already Term!",
                    self,
                    self.managing_type_name(),
                    self.short_id()
                );
                return false;
            }
        };

        if self.opened_instances() > 0 {
            log::info!(
                "FileState::term [{:p}] {} {}: Terminating with active states. Waiting {} loops before bailing out.",
                self,
                self.managing_type_name(),
                self.short_id(),
                self.terminate_wait_loops
            );
            for _ in 0..self.terminate_wait_loops {
                if self.opened_instances() == 0 {
                    break;
                }
                if execution_queue.async_wait("FileState::term wait", || {}).is_err() {
                    break;
                }
            }

            if self.opened_instances() > 0 {
                log::error!(
                    "FileState::term [{:p}] {} {}: Terminating with {} active states. This might cause a crash.",
                    self,
                    self.managing_type_name(),
                    self.short_id(),
                    self.opened_instances()
                );
            }
        }

        log::debug!(
            "FileState::term [{:p}] {} {}: Terminating.",
            self,
            self.managing_type_name(),
            self.short_id()
        );

        let current_op = self.current_op.load(Ordering::Acquire);
        if current_op != CURRENT_OP_NONE {
            log::error!(
                "FileState::term [{:p}] {} {}: Terminating with an existing operation currently being executed ({}).",
                self,
                self.managing_type_name(),
                self.short_id(),
                current_op
            );
        }
        if !self.op_queue_rx.is_empty() {
            log::error!(
                "FileState::term [{:p}] {} {}: Terminating with {} existing operations in the OpQueue.",
                self,
                self.managing_type_name(),
                self.short_id(),
                self.op_queue_rx.len()
            );
        }
        if !self.later_op_queue_rx.is_empty() {
            log::error!(
                "FileState::term [{:p}] {} {}: Terminating with {} deferred operations.",
                self,
                self.managing_type_name(),
                self.short_id(),
                self.later_op_queue_rx.len()
            );
        }

        let state = self.state();
        if state != LifecycleState::Closed {
            if self.is_exit_requested() {
                log::trace!(
                    "FileState::term [{:p}] {} {}: Terminating unclosed file state {} during exit.",
                    self,
                    self.managing_type_name(),
                    self.short_id(),
                    state
                );
            } else {
                log::warn!(
                    "FileState::term [{:p}] {} {}: Terminating unclosed file state {}. Leaking.",
                    self,
                    self.managing_type_name(),
                    self.short_id(),
                    state
                );
            }
        }
        if self.load_count() != 0 {
            log::info!(
                "FileState::term [{:p}] {} {}: Terminating with {} load count.",
                self,
                self.managing_type_name(),
                self.short_id(),
                self.load_count()
            );
        }

        let execution_queue = self
            .execution_queue
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(execution_queue) = execution_queue {
            execution_queue.close_and_discard();
        }
        true
    }

    //
    // Execution queue helpers
    //

    fn allocate_op_id(&self) -> u64 {
        self.next_op_id.fetch_add(1, Ordering::Relaxed)
    }

    fn enqueue_operation(
        self: &Arc<Self>,
        operation: FileStateOperation,
    ) {
        // The receiver is owned by self, so this can't fail
        let _ = self.op_queue_tx.send(operation);
        self.process_next_operation();
    }

    // Starts the next queued operation unless one is already running. Every operation calls this
    // again when it completes.
    fn process_next_operation(self: &Arc<Self>) {
        let this = self.clone();
        self.async_op("FileState::process_next_operation", move || {
            if this
                .current_op
                .compare_exchange(
                    CURRENT_OP_NONE,
                    CURRENT_OP_CLAIMED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_err()
            {
                return;
            }

            match this.op_queue_rx.try_recv() {
                Ok(operation) => {
                    this.current_op.store(operation.id(), Ordering::Release);
                    operation.start(&this);
                }
                Err(_) => this.current_op.store(CURRENT_OP_NONE, Ordering::Release),
            }
        });
    }

    // Ends the running operation and starts the next one. The caller's callback is invoked after
    // this returns, so the next operation is already scheduled when user code runs.
    fn complete_operation(
        self: &Arc<Self>,
        operation_id: u64,
        enqueued_at: std::time::Instant,
    ) {
        self.with_stats(|stats| stats.operation_finished(enqueued_at.elapsed()));

        let completed_op = self.current_op.swap(CURRENT_OP_NONE, Ordering::AcqRel);
        if completed_op != operation_id {
            log::error!(
                "FileState::complete_operation [{:p}] {} {}: Completed Op {} while the current Op is {}.",
                Arc::as_ptr(self),
                self.managing_type_name(),
                self.short_id(),
                operation_id,
                completed_op
            );
        }
        self.process_next_operation();
    }

    /// Runs the function on the execution queue. After termination it runs inline on the calling
    /// thread instead, which is reported as an error.
    pub(crate) fn async_op<F: FnOnce() + Send + 'static>(
        self: &Arc<Self>,
        debug_name: &'static str,
        function: F,
    ) {
        let this = self.clone();
        self.async_op_task(QueuedTask::new(debug_name, move || {
            function();
            drop(this);
        }));
    }

    fn async_op_task(
        &self,
        task: QueuedTask,
    ) {
        let execution_queue = match self.execution_queue() {
            Some(execution_queue) => execution_queue,
            None => {
                log::error!(
                    "FileState::async_op [{:p}] {} {}: No execution queue for {}. Running inline.",
                    self,
                    self.managing_type_name(),
                    self.short_id(),
                    task.debug_name
                );
                task.run();
                return;
            }
        };

        if let Err(ExecutionQueueClosed(task)) = execution_queue.run(task) {
            log::error!(
                "FileState::async_op [{:p}] {} {}: Execution queue closed before {}. Running inline.",
                self,
                self.managing_type_name(),
                self.short_id(),
                task.debug_name
            );
            task.run();
        }
    }

    //
    // State helpers
    //

    // State and counters belong to the execution queue. A terminated state has no queue, and work
    // runs inline wherever it is posted from.
    fn check_in_execution_queue(
        &self,
        caller: &str,
    ) {
        let in_execution_queue = match self.execution_queue() {
            Some(execution_queue) => execution_queue.is_running_in_this_thread(),
            None => true,
        };

        if !in_execution_queue {
            log::error!(
                "{} [{:p}] {} {}: Called outside of the execution queue.",
                caller,
                self,
                self.managing_type_name(),
                self.short_id()
            );
            debug_assert!(in_execution_queue, "{} called outside of the execution queue", caller);
        }
    }

    fn set_state(
        &self,
        caller: &str,
        new_state: LifecycleState,
    ) {
        log::trace!(
            "{} [{:p}] {} {}: State {} -> {}",
            caller,
            self,
            self.managing_type_name(),
            self.short_id(),
            self.state_name(),
            new_state.name()
        );
        self.state.store(new_state.as_u8(), Ordering::Release);
    }

    // A transition out of the wrong state means the state machine is broken. Nothing sensible can
    // be done past that point, and unwinding would only take down the worker thread.
    fn set_state_from(
        &self,
        caller: &str,
        expected_state: LifecycleState,
        new_state: LifecycleState,
    ) {
        let state = self.state();
        if state != expected_state {
            log::error!(
                "{} [{:p}] {} {}: Expected state {} for {} transition. Currently in {}.",
                caller,
                self,
                self.managing_type_name(),
                self.short_id(),
                expected_state,
                new_state,
                state
            );
            std::process::abort();
        }
        self.set_state(caller, new_state);
    }

    fn with_stats<F: FnOnce(&FileHandlerStats)>(
        &self,
        f: F,
    ) {
        if let Some(module) = self.module.upgrade() {
            f(module.stats());
        }
    }

    fn is_exit_requested(&self) -> bool {
        self.module
            .upgrade()
            .map(|module| module.is_exit_requested())
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for FileState {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("FileState")
            .field("type", &self.managing_type_name())
            .field("short_id", &self.short_id())
            .field("state", &self.state())
            .field("load_count", &self.load_count())
            .field("streaming_count", &self.streaming_count())
            .field("opened_instances", &self.opened_instances())
            .finish()
    }
}

impl Drop for FileState {
    fn drop(&mut self) {
        let exit_requested = self.is_exit_requested();
        let execution_queue = self
            .execution_queue
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(execution_queue) = execution_queue {
            if exit_requested {
                log::trace!(
                    "FileState::drop [{:p}] {} {}: Dropped without terminating during exit.",
                    self,
                    self.managing_type_name(),
                    self.short_id()
                );
            } else {
                log::error!(
                    "FileState::drop [{:p}] {} {}: Dropped without terminating! Closing the execution queue.",
                    self,
                    self.managing_type_name(),
                    self.short_id()
                );
            }
            execution_queue.close_and_discard();
        }

        let load_count = *self.load_count.get_mut();
        if load_count > 0 && !exit_requested {
            log::error!(
                "FileState::drop [{:p}] {} {}: Dropped with {} load count!",
                self,
                self.managing_type_name(),
                self.short_id(),
                load_count
            );
        }

        let state = LifecycleState::from_u8(*self.state.get_mut());
        if state != Some(LifecycleState::Closed) && !exit_requested {
            log::error!(
                "FileState::drop [{:p}] {} {}: Dropped while not closed ({:?})!",
                self,
                self.managing_type_name(),
                self.short_id(),
                state
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const CHILD_ENV_VAR: &str = "STREAMBANK_UNEXPECTED_TRANSITION_CHILD";

    struct NullBackend;

    impl FileStateBackend for NullBackend {}

    // The transition has to happen in a child process, since it takes the process down
    #[test]
    fn check_unexpected_transition_aborts() {
        if std::env::var_os(CHILD_ENV_VAR).is_some() {
            let file_state =
                FileState::new_detached(Box::new(NullBackend), &FileHandlerConfig::default())
                    .unwrap();
            file_state.set_state_from(
                "check_unexpected_transition_aborts",
                LifecycleState::Opened,
                LifecycleState::Loading,
            );
            // Not reached
            std::process::exit(0);
        }

        let status = std::process::Command::new(std::env::current_exe().unwrap())
            .args([
                "file_state::test::check_unexpected_transition_aborts",
                "--exact",
                "--test-threads=1",
            ])
            .env(CHILD_ENV_VAR, "1")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .unwrap();
        assert!(!status.success());
    }
}
