use super::FileState;
use crate::execution_queue::QueuedTask;
use crate::DeferredAsyncResult;
use std::sync::atomic::Ordering;
use std::sync::Arc;

// Work the sound engine asked to retry later. It is parked in the later queue and put back on the
// execution queue at the end of the next frame.
impl FileState {
    pub(super) fn async_op_later<F: FnOnce() + Send + 'static>(
        self: &Arc<Self>,
        debug_name: &'static str,
        function: F,
    ) {
        let this = self.clone();
        // The receiver is owned by self, so this can't fail
        let _ = self
            .later_op_queue_tx
            .send(QueuedTask::new(debug_name, move || {
                function();
                drop(this);
            }));
        self.register_recurring_callback();
    }

    fn register_recurring_callback(self: &Arc<Self>) {
        if self
            .recurring_callback_registered
            .swap(true, Ordering::SeqCst)
        {
            return;
        }

        let module = self.module.upgrade();
        match module {
            Some(module) => {
                log::trace!(
                    "FileState::register_recurring_callback [{:p}] {} {}: Registering end of frame callback",
                    Arc::as_ptr(self),
                    self.managing_type_name(),
                    self.short_id()
                );
                let this = self.clone();
                module
                    .global_callbacks()
                    .end_async(move || this.on_end_frame());
            }
            None => {
                self.recurring_callback_registered
                    .store(false, Ordering::SeqCst);
                if self.retry_deferred_without_callbacks {
                    log::debug!(
                        "FileState::register_recurring_callback [{:p}] {} {}: No end of frame callbacks. Retrying right away.",
                        Arc::as_ptr(self),
                        self.managing_type_name(),
                        self.short_id()
                    );
                    let this = self.clone();
                    self.async_op("FileState::process_later_op_queue", move || {
                        this.process_later_op_queue()
                    });
                } else {
                    log::warn!(
                        "FileState::register_recurring_callback [{:p}] {} {}: No end of frame callbacks. {} deferred operations are stuck.",
                        Arc::as_ptr(self),
                        self.managing_type_name(),
                        self.short_id(),
                        self.later_op_queue_rx.len()
                    );
                }
            }
        }
    }

    // Called once per frame while registered
    fn on_end_frame(self: &Arc<Self>) -> DeferredAsyncResult {
        if self.later_op_queue_rx.is_empty() {
            self.recurring_callback_registered
                .store(false, Ordering::SeqCst);

            // Something may have been parked between the check and the store. Whoever parked it
            // either saw the flag still set, or registered a new callback already.
            let reclaimed = !self.later_op_queue_rx.is_empty()
                && !self
                    .recurring_callback_registered
                    .swap(true, Ordering::SeqCst);
            if !reclaimed {
                log::trace!(
                    "FileState::on_end_frame [{:p}] {} {}: No more deferred operations. Unregistering.",
                    Arc::as_ptr(self),
                    self.managing_type_name(),
                    self.short_id()
                );
                return DeferredAsyncResult::Done;
            }
        }

        let this = self.clone();
        self.async_op("FileState::process_later_op_queue", move || {
            this.process_later_op_queue()
        });
        DeferredAsyncResult::KeepRunning
    }

    fn process_later_op_queue(self: &Arc<Self>) {
        profiling::scope!("FileState::process_later_op_queue");
        self.check_in_execution_queue("FileState::process_later_op_queue");

        let operations: Vec<QueuedTask> = self.later_op_queue_rx.try_iter().collect();
        if operations.is_empty() {
            return;
        }

        log::trace!(
            "FileState::process_later_op_queue [{:p}] {} {}: Adding back {} deferred operations",
            Arc::as_ptr(self),
            self.managing_type_name(),
            self.short_id(),
            operations.len()
        );
        for operation in operations {
            self.async_op_task(operation);
        }
    }
}
