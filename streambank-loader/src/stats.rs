use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Counters shared by every file state of a module.
#[derive(Default)]
pub struct FileHandlerStats {
    operations_being_processed: AtomicI64,
    total_error_count: AtomicU64,
    completed_operation_count: AtomicU64,
    total_operation_latency_us: AtomicU64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FileHandlerStatsSnapshot {
    pub operations_being_processed: i64,
    pub total_error_count: u64,
    pub completed_operation_count: u64,
    pub total_operation_latency: Duration,
}

impl FileHandlerStatsSnapshot {
    pub fn average_operation_latency(&self) -> Duration {
        if self.completed_operation_count == 0 {
            Duration::ZERO
        } else {
            let average_us =
                self.total_operation_latency.as_micros() / self.completed_operation_count as u128;
            Duration::from_micros(average_us as u64)
        }
    }
}

impl FileHandlerStats {
    pub(crate) fn operation_started(&self) {
        self.operations_being_processed
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn operation_finished(
        &self,
        latency: Duration,
    ) {
        self.operations_being_processed
            .fetch_sub(1, Ordering::Relaxed);
        self.completed_operation_count
            .fetch_add(1, Ordering::Relaxed);
        self.total_operation_latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub(crate) fn error(&self) {
        self.total_error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FileHandlerStatsSnapshot {
        FileHandlerStatsSnapshot {
            operations_being_processed: self.operations_being_processed.load(Ordering::Relaxed),
            total_error_count: self.total_error_count.load(Ordering::Relaxed),
            completed_operation_count: self.completed_operation_count.load(Ordering::Relaxed),
            total_operation_latency: Duration::from_micros(
                self.total_operation_latency_us.load(Ordering::Relaxed),
            ),
        }
    }
}
