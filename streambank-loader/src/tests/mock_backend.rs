use crate::{
    CloseFileCompletion, FileStateBackend, LoadInSoundEngineCompletion, OpenFileCompletion,
    UnloadFromSoundEngineCompletion,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

// What the mock engine saw. Shared with the test since the backend itself is owned by the state.
#[derive(Default)]
pub struct MockCounters {
    pub open_calls: AtomicU32,
    pub load_calls: AtomicU32,
    pub unload_calls: AtomicU32,
    pub close_calls: AtomicU32,
    // Steps requested out of order: unloading something not loaded, closing with the file still
    // loaded, opening twice...
    pub violations: AtomicU32,
    opened: AtomicBool,
    loaded: AtomicBool,
}

impl MockCounters {
    pub fn open_calls(&self) -> u32 {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn load_calls(&self) -> u32 {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn unload_calls(&self) -> u32 {
        self.unload_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> u32 {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn violations(&self) -> u32 {
        self.violations.load(Ordering::SeqCst)
    }

    fn violation(
        &self,
        what: &str,
    ) {
        log::error!("MockFileStateBackend: {}", what);
        self.violations.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockFileStateBackend {
    short_id: u32,
    is_streamed: bool,
    fail_open: bool,
    fail_load: bool,
    drop_open: bool,
    unload_to_closed_file: bool,
    answer_on_other_thread: bool,
    unload_defers_left: AtomicU32,
    close_defers_left: AtomicU32,
    counters: Arc<MockCounters>,
}

impl MockFileStateBackend {
    pub fn new(short_id: u32) -> Self {
        MockFileStateBackend {
            short_id,
            is_streamed: false,
            fail_open: false,
            fail_load: false,
            drop_open: false,
            unload_to_closed_file: false,
            answer_on_other_thread: false,
            unload_defers_left: AtomicU32::new(0),
            close_defers_left: AtomicU32::new(0),
            counters: Default::default(),
        }
    }

    pub fn streamed(mut self) -> Self {
        self.is_streamed = true;
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    // Drops the open completion without answering it
    pub fn dropping_open(mut self) -> Self {
        self.drop_open = true;
        self
    }

    pub fn unloading_to_closed_file(mut self) -> Self {
        self.unload_to_closed_file = true;
        self
    }

    pub fn deferring_unload(
        self,
        count: u32,
    ) -> Self {
        self.unload_defers_left.store(count, Ordering::SeqCst);
        self
    }

    pub fn deferring_close(
        self,
        count: u32,
    ) -> Self {
        self.close_defers_left.store(count, Ordering::SeqCst);
        self
    }

    pub fn answering_on_other_thread(mut self) -> Self {
        self.answer_on_other_thread = true;
        self
    }

    pub fn counters(&self) -> Arc<MockCounters> {
        self.counters.clone()
    }

    pub fn boxed(self) -> Box<dyn FileStateBackend> {
        Box::new(self)
    }

    fn answer<F: FnOnce() + Send + 'static>(
        &self,
        f: F,
    ) {
        if self.answer_on_other_thread {
            std::thread::spawn(f);
        } else {
            f();
        }
    }

    // Consumes one deferral if any are left
    fn take_defer(defers_left: &AtomicU32) -> bool {
        defers_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |x| x.checked_sub(1))
            .is_ok()
    }
}

impl FileStateBackend for MockFileStateBackend {
    fn managing_type_name(&self) -> &'static str {
        "Mock"
    }

    fn short_id(&self) -> u32 {
        self.short_id
    }

    fn is_streamed_state(&self) -> bool {
        self.is_streamed
    }

    fn open_file(
        &self,
        completion: OpenFileCompletion,
    ) {
        self.counters.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.drop_open {
            drop(completion);
            return;
        }
        if self.fail_open {
            self.answer(move || completion.failed());
            return;
        }

        if self.counters.opened.swap(true, Ordering::SeqCst) {
            self.counters.violation("opening an opened file");
        }
        self.answer(move || completion.succeeded());
    }

    fn load_in_sound_engine(
        &self,
        completion: LoadInSoundEngineCompletion,
    ) {
        self.counters.load_calls.fetch_add(1, Ordering::SeqCst);
        if !self.counters.opened.load(Ordering::SeqCst) {
            self.counters.violation("loading a closed file");
        }
        if self.fail_load {
            self.answer(move || completion.failed());
            return;
        }

        if self.counters.loaded.swap(true, Ordering::SeqCst) {
            self.counters.violation("loading a loaded file");
        }
        self.answer(move || completion.succeeded());
    }

    fn unload_from_sound_engine(
        &self,
        completion: UnloadFromSoundEngineCompletion,
    ) {
        self.counters.unload_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_defer(&self.unload_defers_left) {
            self.answer(move || completion.defer());
            return;
        }

        if !self.counters.loaded.swap(false, Ordering::SeqCst) {
            self.counters.violation("unloading a file that isn't loaded");
        }
        if self.unload_to_closed_file {
            self.counters.opened.store(false, Ordering::SeqCst);
            self.answer(move || completion.to_closed_file());
        } else {
            self.answer(move || completion.done());
        }
    }

    fn close_file(
        &self,
        completion: CloseFileCompletion,
    ) {
        self.counters.close_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_defer(&self.close_defers_left) {
            self.answer(move || completion.defer());
            return;
        }

        if self.counters.loaded.load(Ordering::SeqCst) {
            self.counters.violation("closing a loaded file");
        }
        if !self.counters.opened.swap(false, Ordering::SeqCst) {
            self.counters.violation("closing a file that isn't opened");
        }
        self.answer(move || completion.done());
    }
}
