use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

// A piece of work the sound engine finishes after some latency
struct SimulatedEngineRequest {
    debug_name: &'static str,
    latency: Duration,
    job: Box<dyn FnOnce() + Send + 'static>,
}

// Thread that tries to take jobs out of the request channel and ends when the finish channel is signalled
struct SimulatedEngineWorkerThread {
    finish_tx: Sender<()>,
    join_handle: JoinHandle<()>,
}

impl SimulatedEngineWorkerThread {
    fn new(
        request_rx: Receiver<SimulatedEngineRequest>,
        active_request_count: Arc<AtomicUsize>,
        thread_index: usize,
    ) -> std::io::Result<Self> {
        let (finish_tx, finish_rx) = crossbeam_channel::bounded(1);
        let join_handle = std::thread::Builder::new()
            .name(format!("Sound Engine {}", thread_index))
            .spawn(move || {
                profiling::register_thread!(&format!("SimulatedEngineWorkerThread {}", thread_index));
                loop {
                    crossbeam_channel::select! {
                        recv(request_rx) -> msg => {
                            let request = match msg {
                                Ok(request) => request,
                                Err(_) => return,
                            };

                            profiling::scope!(request.debug_name);
                            log::trace!("Start {} ({:?})", request.debug_name, request.latency);
                            std::thread::sleep(request.latency);
                            (request.job)();
                            active_request_count.fetch_sub(1, Ordering::Release);
                        },
                        recv(finish_rx) -> _msg => {
                            return;
                        }
                    }
                }
            })?;

        Ok(SimulatedEngineWorkerThread {
            finish_tx,
            join_handle,
        })
    }
}

/// Stands in for the sound engine: requests complete on a pool of threads after a random latency,
/// and unloading or closing is sometimes refused for the current frame.
pub struct SimulatedEngine {
    worker_threads: Vec<SimulatedEngineWorkerThread>,
    request_tx: Sender<SimulatedEngineRequest>,
    active_request_count: Arc<AtomicUsize>,
    max_latency_ms: u64,
    defer_percent: u64,
    rng_state: AtomicU64,
}

impl SimulatedEngine {
    pub fn new(
        thread_count: usize,
        max_latency_ms: u64,
        defer_percent: u64,
    ) -> std::io::Result<Self> {
        let (request_tx, request_rx) = crossbeam_channel::unbounded::<SimulatedEngineRequest>();
        let active_request_count = Arc::new(AtomicUsize::new(0));

        let mut worker_threads = Vec::with_capacity(thread_count);
        for thread_index in 0..thread_count {
            let worker = SimulatedEngineWorkerThread::new(
                request_rx.clone(),
                active_request_count.clone(),
                thread_index,
            )?;
            worker_threads.push(worker);
        }

        Ok(SimulatedEngine {
            worker_threads,
            request_tx,
            active_request_count,
            max_latency_ms,
            defer_percent,
            rng_state: AtomicU64::new(0x9E3779B97F4A7C15),
        })
    }

    pub fn active_request_count(&self) -> usize {
        self.active_request_count.load(Ordering::Acquire)
    }

    pub fn add_request<F: FnOnce() + Send + 'static>(
        &self,
        debug_name: &'static str,
        job: F,
    ) {
        let latency = Duration::from_millis(self.random() % (self.max_latency_ms + 1));
        self.active_request_count.fetch_add(1, Ordering::Release);
        let request = SimulatedEngineRequest {
            debug_name,
            latency,
            job: Box::new(job),
        };

        if let Err(e) = self.request_tx.send(request) {
            // Workers are gone, finish the job here so its completion isn't lost
            log::warn!("SimulatedEngine: no worker for {}, running inline", debug_name);
            self.active_request_count.fetch_sub(1, Ordering::Release);
            (e.into_inner().job)();
        }
    }

    /// Returns true when the engine refuses a step for this frame
    pub fn should_defer(&self) -> bool {
        self.random() % 100 < self.defer_percent
    }

    pub fn finish(self) {
        for worker_thread in &self.worker_threads {
            let _ = worker_thread.finish_tx.send(());
        }

        for worker_thread in self.worker_threads {
            if worker_thread.join_handle.join().is_err() {
                log::error!("SimulatedEngine: worker thread panicked");
            }
        }
    }

    // xorshift, shared by all callers
    fn random(&self) -> u64 {
        let mut next = 0;
        let _ = self
            .rng_state
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |mut x| {
                x ^= x << 13;
                x ^= x >> 7;
                x ^= x << 17;
                next = x;
                Some(x)
            });
        next
    }
}
