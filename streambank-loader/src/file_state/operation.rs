use super::{DecrementCountCallback, DeleteFileStateFunction, FileState, IncrementCountCallback};
use std::sync::Arc;
use std::time::Instant;
use streambank_base::OperationOrigin;

pub(super) enum FileStateOperationKind {
    Increment {
        callback: IncrementCountCallback,
    },
    Decrement {
        delete_state: DeleteFileStateFunction,
        callback: DecrementCountCallback,
    },
}

// A queued increment or decrement request
pub(super) struct FileStateOperation {
    id: u64,
    origin: OperationOrigin,
    enqueued_at: Instant,
    kind: FileStateOperationKind,
}

impl FileStateOperation {
    pub(super) fn increment(
        id: u64,
        origin: OperationOrigin,
        callback: IncrementCountCallback,
    ) -> Self {
        FileStateOperation {
            id,
            origin,
            enqueued_at: Instant::now(),
            kind: FileStateOperationKind::Increment { callback },
        }
    }

    pub(super) fn decrement(
        id: u64,
        origin: OperationOrigin,
        delete_state: DeleteFileStateFunction,
        callback: DecrementCountCallback,
    ) -> Self {
        FileStateOperation {
            id,
            origin,
            enqueued_at: Instant::now(),
            kind: FileStateOperationKind::Decrement {
                delete_state,
                callback,
            },
        }
    }

    pub(super) fn id(&self) -> u64 {
        self.id
    }

    // Called from the execution queue once the operation owns the state
    pub(super) fn start(
        self,
        file_state: &Arc<FileState>,
    ) {
        profiling::scope!("FileStateOperation::start");
        file_state.with_stats(|stats| stats.operation_started());

        let FileStateOperation {
            id,
            origin,
            enqueued_at,
            kind,
        } = self;

        log::trace!(
            "FileStateOperation::start [{:p}] {} {}: Starting Op {} ({}), queued for {:?}",
            Arc::as_ptr(file_state),
            file_state.managing_type_name(),
            file_state.short_id(),
            id,
            origin,
            enqueued_at.elapsed()
        );

        match kind {
            FileStateOperationKind::Increment { callback } => {
                let this = file_state.clone();
                file_state.increment_count(
                    origin,
                    Box::new(move |result| {
                        this.complete_operation(id, enqueued_at);
                        callback(result);
                    }),
                );
            }
            FileStateOperationKind::Decrement {
                delete_state,
                callback,
            } => {
                let this = file_state.clone();
                file_state.decrement_count(
                    origin,
                    delete_state,
                    Box::new(move || {
                        this.complete_operation(id, enqueued_at);
                        callback();
                    }),
                );
            }
        }
    }
}
