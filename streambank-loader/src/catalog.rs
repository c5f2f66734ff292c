use crate::{FileHandlerModule, FileState, FileStateBackend};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, Weak};
use streambank_base::{FileHandlerResult, OperationOrigin};

pub type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

type FileStateMap<K> = Arc<Mutex<HashMap<K, Arc<FileState>>>>;

/// File states of one kind, keyed by file. A state is created by the first increment of its key
/// and removed (then terminated) by the decrement that leaves it deletable.
pub struct FileStateCatalog<K> {
    module: Arc<FileHandlerModule>,
    file_states: FileStateMap<K>,
}

impl<K> FileStateCatalog<K>
where
    K: Clone + Eq + Hash + Debug + Send + 'static,
{
    pub fn new(module: Arc<FileHandlerModule>) -> Self {
        FileStateCatalog {
            module,
            file_states: Default::default(),
        }
    }

    pub fn module(&self) -> &Arc<FileHandlerModule> {
        &self.module
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(
        &self,
        key: &K,
    ) -> Option<Arc<FileState>> {
        self.lock().get(key).cloned()
    }

    /// Adds a reference to the file, creating its state with create_backend if it isn't known yet
    pub fn increment<C, F>(
        &self,
        key: K,
        origin: OperationOrigin,
        create_backend: C,
        callback: F,
    ) -> FileHandlerResult<()>
    where
        C: FnOnce() -> Box<dyn FileStateBackend>,
        F: FnOnce(bool) + Send + 'static,
    {
        profiling::scope!("FileStateCatalog::increment");
        let mut file_states = self.lock();
        let file_state = match file_states.get(&key) {
            Some(file_state) => file_state.clone(),
            None => {
                let file_state = FileState::new(create_backend(), &self.module)?;
                log::debug!(
                    "FileStateCatalog::increment: Created {} state for {:?}",
                    file_state.managing_type_name(),
                    key
                );
                file_states.insert(key, file_state.clone());
                file_state
            }
        };

        // Requested while holding the lock, so a pending delete sees the new instance
        file_state.increment_count_async(origin, callback);
        Ok(())
    }

    /// Releases a reference to the file. Decrementing an unknown key is reported and only calls
    /// the callback.
    pub fn decrement<F>(
        &self,
        key: K,
        origin: OperationOrigin,
        callback: F,
    ) where
        F: FnOnce() + Send + 'static,
    {
        profiling::scope!("FileStateCatalog::decrement");
        let file_state = match self.get(&key) {
            Some(file_state) => file_state,
            None => {
                log::error!(
                    "FileStateCatalog::decrement: No file state for {:?}. Was it incremented?",
                    key
                );
                callback();
                return;
            }
        };

        let file_states = Arc::downgrade(&self.file_states);
        let weak_file_state = Arc::downgrade(&file_state);
        file_state.decrement_count_async(
            origin,
            move |callback| Self::delete_state(file_states, weak_file_state, key, callback),
            callback,
        );
    }

    // Runs on the state's execution queue
    fn delete_state(
        file_states: Weak<Mutex<HashMap<K, Arc<FileState>>>>,
        file_state: Weak<FileState>,
        key: K,
        callback: Box<dyn FnOnce() + Send + 'static>,
    ) {
        let removed = file_states.upgrade().and_then(|file_states| {
            let mut file_states = file_states
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let can_remove = match (file_states.get(&key), file_state.upgrade()) {
                // An increment may have arrived since the decision to delete was made
                (Some(current), Some(file_state)) => {
                    Arc::ptr_eq(current, &file_state) && file_state.can_delete()
                }
                _ => false,
            };

            if can_remove {
                file_states.remove(&key)
            } else {
                None
            }
        });

        callback();

        if let Some(removed) = removed {
            log::debug!(
                "FileStateCatalog::delete_state: Deleting {} state for {:?}",
                removed.managing_type_name(),
                key
            );
            removed.term();
        }
    }

    /// Terminates every state still in the catalog. Used on shutdown.
    pub fn term_all(&self) {
        let file_states: Vec<_> = self.lock().drain().collect();
        if file_states.is_empty() {
            return;
        }

        log::info!(
            "FileStateCatalog::term_all: Terminating {} remaining file states",
            file_states.len()
        );
        for (key, file_state) in file_states {
            log::debug!(
                "FileStateCatalog::term_all: Terminating {} state for {:?} in state {}",
                file_state.managing_type_name(),
                key,
                file_state.state()
            );
            file_state.term();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<HashMap<K, Arc<FileState>>> {
        self.file_states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<K> Drop for FileStateCatalog<K> {
    fn drop(&mut self) {
        // Collected first, since terminating waits on queues that may want the lock
        let file_states: Vec<_> = self
            .file_states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain()
            .map(|(_, file_state)| file_state)
            .collect();
        if !file_states.is_empty() {
            log::warn!(
                "FileStateCatalog::drop: Dropped with {} file states. Terminating them.",
                file_states.len()
            );
        }
        for file_state in file_states {
            file_state.term();
        }
    }
}
