use crossbeam_channel::{Receiver, Sender};
use std::sync::{Arc, RwLock};
use std::thread::{JoinHandle, ThreadId};
use streambank_base::FileHandlerError;

pub type BasicFunction = Box<dyn FnOnce() + Send + 'static>;

// A unit of work along with a name used for logging and profiling
pub struct QueuedTask {
    pub debug_name: &'static str,
    pub function: BasicFunction,
}

impl QueuedTask {
    pub fn new<F: FnOnce() + Send + 'static>(
        debug_name: &'static str,
        function: F,
    ) -> Self {
        QueuedTask {
            debug_name,
            function: Box::new(function),
        }
    }

    pub fn run(self) {
        profiling::scope!(self.debug_name);
        (self.function)()
    }
}

impl std::fmt::Debug for QueuedTask {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("QueuedTask")
            .field("debug_name", &self.debug_name)
            .finish()
    }
}

/// Returned by [`ExecutionQueue::run`] when the queue no longer accepts work. The task is handed
/// back so the caller can decide what to do with it.
pub struct ExecutionQueueClosed(pub QueuedTask);

impl std::fmt::Debug for ExecutionQueueClosed {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_tuple("ExecutionQueueClosed")
            .field(&self.0.debug_name)
            .finish()
    }
}

impl From<ExecutionQueueClosed> for FileHandlerError {
    fn from(closed: ExecutionQueueClosed) -> Self {
        log::debug!("ExecutionQueue closed before running {}", closed.0.debug_name);
        FileHandlerError::ExecutionQueueClosed
    }
}

// Thread that runs tasks out of the request channel one at a time. It ends once every sender is
// gone and the channel is drained, so nothing that was accepted by run() is ever dropped.
struct ExecutionQueueWorkerThread {
    thread_id: ThreadId,
    join_handle: JoinHandle<()>,
}

impl ExecutionQueueWorkerThread {
    fn new(
        name: &str,
        request_rx: Receiver<QueuedTask>,
    ) -> std::io::Result<Self> {
        let thread_name = name.to_string();
        let join_handle = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                profiling::register_thread!(&thread_name);
                while let Ok(task) = request_rx.recv() {
                    log::trace!("{} running {}", thread_name, task.debug_name);
                    task.run();
                }
                log::trace!("{} finished", thread_name);
            })?;

        Ok(ExecutionQueueWorkerThread {
            thread_id: join_handle.thread().id(),
            join_handle,
        })
    }
}

/// A strictly serial task queue bound to a single worker thread. Tasks run one at a time in
/// submission order.
pub struct ExecutionQueue {
    name: String,
    // None once the queue was closed
    request_tx: RwLock<Option<Sender<QueuedTask>>>,
    worker_thread: std::sync::Mutex<Option<ExecutionQueueWorkerThread>>,
    worker_thread_id: ThreadId,
}

impl ExecutionQueue {
    pub fn new(name: &str) -> std::io::Result<Self> {
        let (request_tx, request_rx) = crossbeam_channel::unbounded::<QueuedTask>();
        let worker_thread = ExecutionQueueWorkerThread::new(name, request_rx)?;

        Ok(ExecutionQueue {
            name: name.to_string(),
            request_tx: RwLock::new(Some(request_tx)),
            worker_thread_id: worker_thread.thread_id,
            worker_thread: std::sync::Mutex::new(Some(worker_thread)),
        })
    }

    pub fn new_shared(name: &str) -> std::io::Result<Arc<Self>> {
        Ok(Arc::new(Self::new(name)?))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a task for exclusive serial execution. Fails if the queue was closed.
    pub fn run(
        &self,
        task: QueuedTask,
    ) -> Result<(), ExecutionQueueClosed> {
        let request_tx = self
            .request_tx
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match &*request_tx {
            Some(request_tx) => request_tx
                .send(task)
                .map_err(|e| ExecutionQueueClosed(e.into_inner())),
            None => Err(ExecutionQueueClosed(task)),
        }
    }

    pub fn run_fn<F: FnOnce() + Send + 'static>(
        &self,
        debug_name: &'static str,
        function: F,
    ) -> Result<(), ExecutionQueueClosed> {
        self.run(QueuedTask::new(debug_name, function))
    }

    /// Returns true if the calling code is running on this queue's worker thread
    pub fn is_running_in_this_thread(&self) -> bool {
        std::thread::current().id() == self.worker_thread_id
    }

    pub fn is_closed(&self) -> bool {
        self.request_tx
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }

    /// Runs the task on the queue and blocks until it finished. Runs inline when called from the
    /// worker itself, since waiting there could never complete.
    pub fn async_wait<F: FnOnce() + Send + 'static>(
        &self,
        debug_name: &'static str,
        function: F,
    ) -> Result<(), ExecutionQueueClosed> {
        if self.is_running_in_this_thread() {
            function();
            return Ok(());
        }

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        self.run_fn(debug_name, move || {
            function();
            let _ = done_tx.send(());
        })?;

        // The sender is dropped without sending only if the task panicked
        let _ = done_rx.recv();
        Ok(())
    }

    /// Stops accepting tasks, lets the worker drain what was already queued and joins it. When
    /// called from the worker itself the thread is detached instead of joined.
    pub fn close_and_discard(&self) {
        let request_tx = self
            .request_tx
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if request_tx.is_none() {
            log::debug!("ExecutionQueue {}: already closed", self.name);
        }
        drop(request_tx);

        let worker_thread = self
            .worker_thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(worker_thread) = worker_thread {
            if self.is_running_in_this_thread() {
                log::trace!("ExecutionQueue {}: closing from its own worker", self.name);
            } else if worker_thread.join_handle.join().is_err() {
                log::error!("ExecutionQueue {}: worker thread panicked", self.name);
            }
        }
    }
}

impl Drop for ExecutionQueue {
    fn drop(&mut self) {
        if !self.is_closed() {
            self.close_and_discard();
        }
    }
}
