use crate::execution_queue::BasicFunction;
use crate::FileState;
use std::sync::Arc;
use streambank_base::EngineStepResult;

pub(crate) type StepResultCallback = Box<dyn FnOnce(EngineStepResult) + Send + 'static>;

/// The sound-engine facing half of a file state: how a particular kind of file (sound bank, media,
/// external source...) is opened, loaded, unloaded and closed.
///
/// Every method is called from the file state's execution queue while the state is in the matching
/// transitional state (Opening, Loading, Unloading, Closing). The completion token may be answered
/// from any thread, synchronously or later. Answering it re-posts onto the file state's queue, so
/// the backend never touches the state machine directly.
///
/// The default implementations fail opening and loading, and finish unloading and closing right away.
pub trait FileStateBackend: Send + Sync + 'static {
    /// Used for logging only
    fn managing_type_name(&self) -> &'static str {
        "Invalid"
    }

    /// Used for logging only
    fn short_id(&self) -> u32 {
        0
    }

    /// A streamed file is only loaded in the sound engine while it has streaming references.
    fn is_streamed_state(&self) -> bool {
        false
    }

    fn open_file(
        &self,
        completion: OpenFileCompletion,
    ) {
        completion.failed();
    }

    fn load_in_sound_engine(
        &self,
        completion: LoadInSoundEngineCompletion,
    ) {
        completion.failed();
    }

    fn unload_from_sound_engine(
        &self,
        completion: UnloadFromSoundEngineCompletion,
    ) {
        completion.done();
    }

    fn close_file(
        &self,
        completion: CloseFileCompletion,
    ) {
        completion.done();
    }
}

//
// Completion tokens. Each one must be answered exactly once, consuming it. A token that is dropped
// unanswered is reported and treated as a failure (open/load) or as done (unload/close), so that
// the operation waiting on it still completes.
//

pub struct OpenFileCompletion {
    file_state: Arc<FileState>,
    callback: Option<BasicFunction>,
}

impl OpenFileCompletion {
    pub(crate) fn new(
        file_state: Arc<FileState>,
        callback: BasicFunction,
    ) -> Self {
        OpenFileCompletion {
            file_state,
            callback: Some(callback),
        }
    }

    pub fn file_state(&self) -> &Arc<FileState> {
        &self.file_state
    }

    pub fn succeeded(mut self) {
        if let Some(callback) = self.callback.take() {
            self.file_state.open_file_succeeded(callback);
        }
    }

    pub fn failed(mut self) {
        if let Some(callback) = self.callback.take() {
            self.file_state.open_file_failed(callback);
        }
    }
}

impl Drop for OpenFileCompletion {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            log::error!(
                "OpenFileCompletion [{:p}] {} {}: Dropped without an answer. Failing.",
                Arc::as_ptr(&self.file_state),
                self.file_state.managing_type_name(),
                self.file_state.short_id()
            );
            self.file_state.open_file_failed(callback);
        }
    }
}

pub struct LoadInSoundEngineCompletion {
    file_state: Arc<FileState>,
    callback: Option<BasicFunction>,
}

impl LoadInSoundEngineCompletion {
    pub(crate) fn new(
        file_state: Arc<FileState>,
        callback: BasicFunction,
    ) -> Self {
        LoadInSoundEngineCompletion {
            file_state,
            callback: Some(callback),
        }
    }

    pub fn file_state(&self) -> &Arc<FileState> {
        &self.file_state
    }

    pub fn succeeded(mut self) {
        if let Some(callback) = self.callback.take() {
            self.file_state.load_in_sound_engine_succeeded(callback);
        }
    }

    pub fn failed(mut self) {
        if let Some(callback) = self.callback.take() {
            self.file_state.load_in_sound_engine_failed(callback);
        }
    }
}

impl Drop for LoadInSoundEngineCompletion {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            log::error!(
                "LoadInSoundEngineCompletion [{:p}] {} {}: Dropped without an answer. Failing.",
                Arc::as_ptr(&self.file_state),
                self.file_state.managing_type_name(),
                self.file_state.short_id()
            );
            self.file_state.load_in_sound_engine_failed(callback);
        }
    }
}

pub struct UnloadFromSoundEngineCompletion {
    file_state: Arc<FileState>,
    callback: Option<StepResultCallback>,
}

impl UnloadFromSoundEngineCompletion {
    pub(crate) fn new(
        file_state: Arc<FileState>,
        callback: StepResultCallback,
    ) -> Self {
        UnloadFromSoundEngineCompletion {
            file_state,
            callback: Some(callback),
        }
    }

    pub fn file_state(&self) -> &Arc<FileState> {
        &self.file_state
    }

    /// Unloaded, the file is still opened
    pub fn done(mut self) {
        if let Some(callback) = self.callback.take() {
            self.file_state.unload_from_sound_engine_done(callback);
        }
    }

    /// Unloading also released the file, so the state goes straight to Closed
    pub fn to_closed_file(mut self) {
        if let Some(callback) = self.callback.take() {
            self.file_state
                .unload_from_sound_engine_to_closed_file(callback);
        }
    }

    /// The sound engine can't unload right now. Unloading is retried at the end of the frame.
    pub fn defer(mut self) {
        if let Some(callback) = self.callback.take() {
            self.file_state.unload_from_sound_engine_defer(callback);
        }
    }
}

impl Drop for UnloadFromSoundEngineCompletion {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            log::error!(
                "UnloadFromSoundEngineCompletion [{:p}] {} {}: Dropped without an answer. Considering done.",
                Arc::as_ptr(&self.file_state),
                self.file_state.managing_type_name(),
                self.file_state.short_id()
            );
            self.file_state.unload_from_sound_engine_done(callback);
        }
    }
}

pub struct CloseFileCompletion {
    file_state: Arc<FileState>,
    callback: Option<StepResultCallback>,
}

impl CloseFileCompletion {
    pub(crate) fn new(
        file_state: Arc<FileState>,
        callback: StepResultCallback,
    ) -> Self {
        CloseFileCompletion {
            file_state,
            callback: Some(callback),
        }
    }

    pub fn file_state(&self) -> &Arc<FileState> {
        &self.file_state
    }

    pub fn done(mut self) {
        if let Some(callback) = self.callback.take() {
            self.file_state.close_file_done(callback);
        }
    }

    /// The file can't be closed right now. Closing is retried at the end of the frame.
    pub fn defer(mut self) {
        if let Some(callback) = self.callback.take() {
            self.file_state.close_file_defer(callback);
        }
    }
}

impl Drop for CloseFileCompletion {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            log::error!(
                "CloseFileCompletion [{:p}] {} {}: Dropped without an answer. Considering done.",
                Arc::as_ptr(&self.file_state),
                self.file_state.managing_type_name(),
                self.file_state.short_id()
            );
            self.file_state.close_file_done(callback);
        }
    }
}
