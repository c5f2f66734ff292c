use super::{FileState, IncrementCountCallback};
use crate::execution_queue::BasicFunction;
use crate::{LoadInSoundEngineCompletion, OpenFileCompletion};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use streambank_base::{LifecycleState, OperationOrigin};

// Increment chain: count, open the file if needed, load it in the sound engine if needed, then
// report. Each step runs on the execution queue.
impl FileState {
    pub(super) fn increment_count(
        self: &Arc<Self>,
        origin: OperationOrigin,
        callback: IncrementCountCallback,
    ) {
        profiling::scope!("FileState::increment_count");
        self.check_in_execution_queue("FileState::increment_count");
        log::trace!(
            "FileState::increment_count [{:p}] {} {}: Starting increment {}",
            Arc::as_ptr(self),
            self.managing_type_name(),
            self.short_id(),
            origin
        );

        self.increment_load_count(origin);
        self.increment_count_open(origin, callback);
    }

    fn increment_load_count(
        &self,
        origin: OperationOrigin,
    ) {
        if origin.is_streaming() {
            self.streaming_count.fetch_add(1, Ordering::AcqRel);
        }
        let load_count = self.load_count.fetch_add(1, Ordering::AcqRel) + 1;
        log::trace!(
            "FileState::increment_load_count [{:p}] {} {}: ++LoadCount={} StreamingCount={}",
            self,
            self.managing_type_name(),
            self.short_id(),
            load_count,
            self.streaming_count()
        );
    }

    pub(super) fn can_open_file(&self) -> bool {
        self.state() == LifecycleState::Closed && self.load_count() > 0
    }

    fn increment_count_open(
        self: &Arc<Self>,
        origin: OperationOrigin,
        callback: IncrementCountCallback,
    ) {
        profiling::scope!("FileState::increment_count_open");
        self.check_in_execution_queue("FileState::increment_count_open");
        if !self.can_open_file() {
            self.increment_count_load(origin, callback);
            return;
        }

        self.set_state_from(
            "FileState::increment_count_open",
            LifecycleState::Closed,
            LifecycleState::Opening,
        );
        log::trace!(
            "FileState::increment_count_open [{:p}] {} {}: Opening file",
            Arc::as_ptr(self),
            self.managing_type_name(),
            self.short_id()
        );

        let this = self.clone();
        self.backend.open_file(OpenFileCompletion::new(
            self.clone(),
            Box::new(move || this.increment_count_load(origin, callback)),
        ));
    }

    pub(super) fn can_load_in_sound_engine(&self) -> bool {
        self.state() == LifecycleState::Opened
            && (!self.is_streamed_state() || self.streaming_count() > 0)
    }

    fn increment_count_load(
        self: &Arc<Self>,
        origin: OperationOrigin,
        callback: IncrementCountCallback,
    ) {
        profiling::scope!("FileState::increment_count_load");
        self.check_in_execution_queue("FileState::increment_count_load");
        if !self.can_load_in_sound_engine() {
            self.increment_count_done(origin, callback);
            return;
        }

        self.set_state_from(
            "FileState::increment_count_load",
            LifecycleState::Opened,
            LifecycleState::Loading,
        );
        log::trace!(
            "FileState::increment_count_load [{:p}] {} {}: Loading file in sound engine",
            Arc::as_ptr(self),
            self.managing_type_name(),
            self.short_id()
        );

        let this = self.clone();
        self.backend
            .load_in_sound_engine(LoadInSoundEngineCompletion::new(
                self.clone(),
                Box::new(move || this.increment_count_done(origin, callback)),
            ));
    }

    fn increment_count_done(
        &self,
        origin: OperationOrigin,
        callback: IncrementCountCallback,
    ) {
        profiling::scope!("FileState::increment_count_done");
        self.check_in_execution_queue("FileState::increment_count_done");

        let state = self.state();
        let result = if origin.is_streaming() {
            let result = state == LifecycleState::Loaded;
            if !result {
                if self.can_load_in_sound_engine() {
                    log::warn!(
                        "FileState::increment_count_done [{:p}] {} {}: Could not load file for streaming.",
                        self,
                        self.managing_type_name(),
                        self.short_id()
                    );
                } else {
                    log::trace!(
                        "FileState::increment_count_done [{:p}] {} {}: Streaming request aborted before load done.",
                        self,
                        self.managing_type_name(),
                        self.short_id()
                    );
                }
            }
            result
        } else {
            // The request was superseded when the file can't move any further
            let can_load = self.can_load_in_sound_engine();
            let can_open = self.can_open_file();
            let result = state == LifecycleState::Loaded
                || (state == LifecycleState::Opened && !can_load)
                || (state == LifecycleState::Closed && !can_open);
            if !result {
                log::warn!(
                    "FileState::increment_count_done [{:p}] {} {}: Could not open file for asset loading. [State:{} CanLoad:{} CanOpen:{} LoadCount:{}]",
                    self,
                    self.managing_type_name(),
                    self.short_id(),
                    state,
                    can_load,
                    can_open,
                    self.load_count()
                );
            }
            result
        };

        log::trace!(
            "FileState::increment_count_done [{:p}] {} {}: Done incrementing {} with result {}.",
            self,
            self.managing_type_name(),
            self.short_id(),
            origin,
            result
        );
        callback(result);
    }

    //
    // Answers from the backend. They can arrive on any thread.
    //

    pub(crate) fn open_file_succeeded(
        self: &Arc<Self>,
        callback: BasicFunction,
    ) {
        let this = self.clone();
        self.async_op("FileState::open_file_succeeded", move || {
            if this.state() != LifecycleState::Opening {
                log::error!(
                    "FileState::open_file_succeeded [{:p}] {} {}: Succeeded opening while not in Opening state: {}",
                    Arc::as_ptr(&this),
                    this.managing_type_name(),
                    this.short_id(),
                    this.state()
                );
            } else {
                this.set_state("FileState::open_file_succeeded", LifecycleState::Opened);
            }
            callback();
        });
    }

    pub(crate) fn open_file_failed(
        self: &Arc<Self>,
        callback: BasicFunction,
    ) {
        self.with_stats(|stats| stats.error());
        let this = self.clone();
        self.async_op("FileState::open_file_failed", move || {
            if this.state() != LifecycleState::Opening {
                log::error!(
                    "FileState::open_file_failed [{:p}] {} {}: Failed opening while not in Opening state: {}",
                    Arc::as_ptr(&this),
                    this.managing_type_name(),
                    this.short_id(),
                    this.state()
                );
            } else {
                this.set_state("FileState::open_file_failed", LifecycleState::Closed);
            }
            callback();
        });
    }

    pub(crate) fn load_in_sound_engine_succeeded(
        self: &Arc<Self>,
        callback: BasicFunction,
    ) {
        let this = self.clone();
        self.async_op("FileState::load_in_sound_engine_succeeded", move || {
            if this.state() != LifecycleState::Loading {
                log::error!(
                    "FileState::load_in_sound_engine_succeeded [{:p}] {} {}: Succeeded loading while not in Loading state: {}",
                    Arc::as_ptr(&this),
                    this.managing_type_name(),
                    this.short_id(),
                    this.state()
                );
            } else {
                this.set_state(
                    "FileState::load_in_sound_engine_succeeded",
                    LifecycleState::Loaded,
                );
            }
            callback();
        });
    }

    pub(crate) fn load_in_sound_engine_failed(
        self: &Arc<Self>,
        callback: BasicFunction,
    ) {
        self.with_stats(|stats| stats.error());
        let this = self.clone();
        self.async_op("FileState::load_in_sound_engine_failed", move || {
            if this.state() != LifecycleState::Loading {
                log::error!(
                    "FileState::load_in_sound_engine_failed [{:p}] {} {}: Failed loading while not in Loading state: {}",
                    Arc::as_ptr(&this),
                    this.managing_type_name(),
                    this.short_id(),
                    this.state()
                );
            } else {
                this.set_state(
                    "FileState::load_in_sound_engine_failed",
                    LifecycleState::Opened,
                );
            }
            callback();
        });
    }
}
