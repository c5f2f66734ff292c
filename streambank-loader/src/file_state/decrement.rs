use super::{DecrementCountCallback, DeleteFileStateFunction, FileState};
use crate::backend::StepResultCallback;
use crate::{CloseFileCompletion, UnloadFromSoundEngineCompletion};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use streambank_base::{EngineStepResult, LifecycleState, OperationOrigin};

// What a decrement carries from step to step until it is done
struct DecrementRequest {
    delete_state: DeleteFileStateFunction,
    callback: DecrementCountCallback,
}

// Decrement chain: count, unload from the sound engine if nothing needs it loaded, close the file
// if nothing needs it opened, then report (or delete). Unloading and closing may be deferred by the
// backend, in which case the step is retried at the end of the frame.
impl FileState {
    pub(super) fn decrement_count(
        self: &Arc<Self>,
        origin: OperationOrigin,
        delete_state: DeleteFileStateFunction,
        callback: DecrementCountCallback,
    ) {
        profiling::scope!("FileState::decrement_count");
        self.check_in_execution_queue("FileState::decrement_count");
        log::trace!(
            "FileState::decrement_count [{:p}] {} {}: Starting decrement {}",
            Arc::as_ptr(self),
            self.managing_type_name(),
            self.short_id(),
            origin
        );

        self.decrement_load_count(origin);
        self.decrement_count_unload(DecrementRequest {
            delete_state,
            callback,
        });
    }

    fn decrement_load_count(
        &self,
        origin: OperationOrigin,
    ) {
        if origin.is_streaming() {
            self.streaming_count.fetch_sub(1, Ordering::AcqRel);
        }
        let load_count = self.load_count.fetch_sub(1, Ordering::AcqRel) - 1;
        let opened_instances = self.opened_instances.fetch_sub(1, Ordering::AcqRel) - 1;

        if load_count < 0 || opened_instances < 0 || self.streaming_count() < 0 {
            log::error!(
                "FileState::decrement_load_count [{:p}] {} {}: More decrements than increments! LoadCount={} StreamingCount={} OpenedInstances={}",
                self,
                self.managing_type_name(),
                self.short_id(),
                load_count,
                self.streaming_count(),
                opened_instances
            );
        } else {
            log::trace!(
                "FileState::decrement_load_count [{:p}] {} {}: --LoadCount={} StreamingCount={} OpenedInstances={}",
                self,
                self.managing_type_name(),
                self.short_id(),
                load_count,
                self.streaming_count(),
                opened_instances
            );
        }
    }

    pub(super) fn can_unload_from_sound_engine(&self) -> bool {
        self.state() == LifecycleState::Loaded
            && if self.is_streamed_state() {
                self.streaming_count() == 0
            } else {
                self.load_count() == 0
            }
    }

    fn decrement_count_unload(
        self: &Arc<Self>,
        request: DecrementRequest,
    ) {
        profiling::scope!("FileState::decrement_count_unload");
        self.check_in_execution_queue("FileState::decrement_count_unload");
        if !self.can_unload_from_sound_engine() {
            self.decrement_count_close(request);
            return;
        }

        self.set_state_from(
            "FileState::decrement_count_unload",
            LifecycleState::Loaded,
            LifecycleState::Unloading,
        );
        log::trace!(
            "FileState::decrement_count_unload [{:p}] {} {}: Unloading file from sound engine",
            Arc::as_ptr(self),
            self.managing_type_name(),
            self.short_id()
        );

        let this = self.clone();
        self.backend
            .unload_from_sound_engine(UnloadFromSoundEngineCompletion::new(
                self.clone(),
                Box::new(move |result| this.decrement_count_unload_callback(request, result)),
            ));
    }

    fn decrement_count_unload_callback(
        self: &Arc<Self>,
        request: DecrementRequest,
        result: EngineStepResult,
    ) {
        self.check_in_execution_queue("FileState::decrement_count_unload_callback");
        if result == EngineStepResult::Done {
            self.decrement_count_close(request);
            return;
        }

        log::debug!(
            "FileState::decrement_count_unload_callback [{:p}] {} {}: Processing deferred Unload.",
            Arc::as_ptr(self),
            self.managing_type_name(),
            self.short_id()
        );
        if self.state() != LifecycleState::Unloading {
            log::trace!(
                "FileState::decrement_count_unload_callback [{:p}] {} {}: State got changed to {}. Not unloading anymore.",
                Arc::as_ptr(self),
                self.managing_type_name(),
                self.short_id(),
                self.state()
            );
            self.decrement_count_close(request);
            return;
        }

        self.set_state(
            "FileState::decrement_count_unload_callback",
            LifecycleState::Loaded,
        );
        let this = self.clone();
        self.async_op_later("FileState::decrement_count_unload retry", move || {
            log::trace!(
                "FileState::decrement_count_unload_callback [{:p}] {} {}: Retrying deferred Unload.",
                Arc::as_ptr(&this),
                this.managing_type_name(),
                this.short_id()
            );
            this.decrement_count_unload(request);
        });
    }

    pub(super) fn can_close_file(&self) -> bool {
        self.state() == LifecycleState::Opened && self.load_count() == 0
    }

    fn decrement_count_close(
        self: &Arc<Self>,
        request: DecrementRequest,
    ) {
        profiling::scope!("FileState::decrement_count_close");
        self.check_in_execution_queue("FileState::decrement_count_close");
        if !self.can_close_file() {
            self.decrement_count_done(request);
            return;
        }

        self.set_state_from(
            "FileState::decrement_count_close",
            LifecycleState::Opened,
            LifecycleState::Closing,
        );
        log::trace!(
            "FileState::decrement_count_close [{:p}] {} {}: Closing file",
            Arc::as_ptr(self),
            self.managing_type_name(),
            self.short_id()
        );

        let this = self.clone();
        self.backend.close_file(CloseFileCompletion::new(
            self.clone(),
            Box::new(move |result| this.decrement_count_close_callback(request, result)),
        ));
    }

    fn decrement_count_close_callback(
        self: &Arc<Self>,
        request: DecrementRequest,
        result: EngineStepResult,
    ) {
        self.check_in_execution_queue("FileState::decrement_count_close_callback");
        if result == EngineStepResult::Done {
            self.decrement_count_done(request);
            return;
        }

        log::debug!(
            "FileState::decrement_count_close_callback [{:p}] {} {}: Processing deferred Close.",
            Arc::as_ptr(self),
            self.managing_type_name(),
            self.short_id()
        );
        if self.state() != LifecycleState::Closing {
            log::trace!(
                "FileState::decrement_count_close_callback [{:p}] {} {}: State got changed to {}. Not closing anymore.",
                Arc::as_ptr(self),
                self.managing_type_name(),
                self.short_id(),
                self.state()
            );
            self.decrement_count_close(request);
            return;
        }

        self.set_state(
            "FileState::decrement_count_close_callback",
            LifecycleState::Opened,
        );
        let this = self.clone();
        self.async_op_later("FileState::decrement_count_close retry", move || {
            log::trace!(
                "FileState::decrement_count_close_callback [{:p}] {} {}: Retrying deferred Close.",
                Arc::as_ptr(&this),
                this.managing_type_name(),
                this.short_id()
            );
            this.decrement_count_close(request);
        });
    }

    // Always posted, so the delete decision sees every operation that ran before it
    fn decrement_count_done(
        self: &Arc<Self>,
        request: DecrementRequest,
    ) {
        let this = self.clone();
        self.async_op("FileState::decrement_count_done", move || {
            let DecrementRequest {
                delete_state,
                callback,
            } = request;

            if this.can_delete() {
                log::trace!(
                    "FileState::decrement_count_done [{:p}] {} {}: Done decrementing. Deleting state.",
                    Arc::as_ptr(&this),
                    this.managing_type_name(),
                    this.short_id()
                );
                delete_state(callback);
            } else {
                log::trace!(
                    "FileState::decrement_count_done [{:p}] {} {}: Done decrementing.",
                    Arc::as_ptr(&this),
                    this.managing_type_name(),
                    this.short_id()
                );
                callback();
            }
        });
    }

    //
    // Answers from the backend. They can arrive on any thread.
    //

    pub(crate) fn unload_from_sound_engine_done(
        self: &Arc<Self>,
        callback: StepResultCallback,
    ) {
        let this = self.clone();
        self.async_op("FileState::unload_from_sound_engine_done", move || {
            if this.state() != LifecycleState::Unloading {
                log::error!(
                    "FileState::unload_from_sound_engine_done [{:p}] {} {}: Done unloading while not in Unloading state: {}",
                    Arc::as_ptr(&this),
                    this.managing_type_name(),
                    this.short_id(),
                    this.state()
                );
            } else {
                this.set_state(
                    "FileState::unload_from_sound_engine_done",
                    LifecycleState::Opened,
                );
            }
            callback(EngineStepResult::Done);
        });
    }

    pub(crate) fn unload_from_sound_engine_to_closed_file(
        self: &Arc<Self>,
        callback: StepResultCallback,
    ) {
        let this = self.clone();
        self.async_op(
            "FileState::unload_from_sound_engine_to_closed_file",
            move || {
                if this.state() != LifecycleState::Unloading {
                    log::error!(
                        "FileState::unload_from_sound_engine_to_closed_file [{:p}] {} {}: Done unloading while not in Unloading state: {}",
                        Arc::as_ptr(&this),
                        this.managing_type_name(),
                        this.short_id(),
                        this.state()
                    );
                } else {
                    this.set_state(
                        "FileState::unload_from_sound_engine_to_closed_file",
                        LifecycleState::Closed,
                    );
                }
                callback(EngineStepResult::Done);
            },
        );
    }

    pub(crate) fn unload_from_sound_engine_defer(
        self: &Arc<Self>,
        callback: StepResultCallback,
    ) {
        let this = self.clone();
        self.async_op("FileState::unload_from_sound_engine_defer", move || {
            if this.state() != LifecycleState::Unloading {
                log::error!(
                    "FileState::unload_from_sound_engine_defer [{:p}] {} {}: Deferring unloading while not in Unloading state: {}",
                    Arc::as_ptr(&this),
                    this.managing_type_name(),
                    this.short_id(),
                    this.state()
                );
                callback(EngineStepResult::Done);
                return;
            }

            log::trace!(
                "FileState::unload_from_sound_engine_defer [{:p}] {} {}: Deferring Unload",
                Arc::as_ptr(&this),
                this.managing_type_name(),
                this.short_id()
            );
            callback(EngineStepResult::Deferred);
        });
    }

    pub(crate) fn close_file_done(
        self: &Arc<Self>,
        callback: StepResultCallback,
    ) {
        let this = self.clone();
        self.async_op("FileState::close_file_done", move || {
            if this.state() != LifecycleState::Closing {
                log::error!(
                    "FileState::close_file_done [{:p}] {} {}: Done closing while not in Closing state: {}",
                    Arc::as_ptr(&this),
                    this.managing_type_name(),
                    this.short_id(),
                    this.state()
                );
            } else {
                this.set_state("FileState::close_file_done", LifecycleState::Closed);
            }
            callback(EngineStepResult::Done);
        });
    }

    pub(crate) fn close_file_defer(
        self: &Arc<Self>,
        callback: StepResultCallback,
    ) {
        let this = self.clone();
        self.async_op("FileState::close_file_defer", move || {
            if this.state() != LifecycleState::Closing {
                log::error!(
                    "FileState::close_file_defer [{:p}] {} {}: Deferring closing while not in Closing state: {}",
                    Arc::as_ptr(&this),
                    this.managing_type_name(),
                    this.short_id(),
                    this.state()
                );
                callback(EngineStepResult::Done);
                return;
            }

            log::trace!(
                "FileState::close_file_defer [{:p}] {} {}: Deferring Close",
                Arc::as_ptr(&this),
                this.managing_type_name(),
                this.short_id()
            );
            callback(EngineStepResult::Deferred);
        });
    }
}
