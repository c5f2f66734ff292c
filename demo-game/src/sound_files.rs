use crate::simulated_engine::SimulatedEngine;
use std::sync::Arc;
use streambank::loader::{
    CloseFileCompletion, FileStateBackend, LoadInSoundEngineCompletion, OpenFileCompletion,
    UnloadFromSoundEngineCompletion,
};

/// Sound banks are loaded through the bank execution queue, one at a time
pub struct SoundBankFile {
    pub bank_id: u32,
    pub engine: Arc<SimulatedEngine>,
}

impl FileStateBackend for SoundBankFile {
    fn managing_type_name(&self) -> &'static str {
        "SoundBank"
    }

    fn short_id(&self) -> u32 {
        self.bank_id
    }

    fn open_file(
        &self,
        completion: OpenFileCompletion,
    ) {
        self.engine
            .add_request("open bank", move || completion.succeeded());
    }

    fn load_in_sound_engine(
        &self,
        completion: LoadInSoundEngineCompletion,
    ) {
        let bank_execution_queue = match completion.file_state().bank_execution_queue() {
            Some(bank_execution_queue) => bank_execution_queue,
            None => return completion.failed(),
        };

        // The engine's bank manager is only fed from the bank queue
        let engine = self.engine.clone();
        let result = bank_execution_queue.run_fn("load bank", move || {
            engine.add_request("load bank", move || completion.succeeded());
        });
        if let Err(closed) = result {
            // Dropping the task drops the completion, which fails the load
            log::warn!("SoundBankFile {}: bank queue closed", self.bank_id);
            drop(closed);
        }
    }

    fn unload_from_sound_engine(
        &self,
        completion: UnloadFromSoundEngineCompletion,
    ) {
        if self.engine.should_defer() {
            log::debug!("SoundBankFile {}: bank still in use, deferring unload", self.bank_id);
            return completion.defer();
        }

        let bank_execution_queue = match completion.file_state().bank_execution_queue() {
            Some(bank_execution_queue) => bank_execution_queue,
            None => return completion.done(),
        };

        let engine = self.engine.clone();
        let result = bank_execution_queue.run_fn("unload bank", move || {
            engine.add_request("unload bank", move || completion.done());
        });
        if let Err(closed) = result {
            log::warn!("SoundBankFile {}: bank queue closed", self.bank_id);
            drop(closed);
        }
    }

    fn close_file(
        &self,
        completion: CloseFileCompletion,
    ) {
        self.engine
            .add_request("close bank", move || completion.done());
    }
}

/// Media files may be streamed. A streamed media is only loaded while something plays it.
pub struct MediaFile {
    pub media_id: u32,
    pub streamed: bool,
    pub engine: Arc<SimulatedEngine>,
}

impl FileStateBackend for MediaFile {
    fn managing_type_name(&self) -> &'static str {
        "Media"
    }

    fn short_id(&self) -> u32 {
        self.media_id
    }

    fn is_streamed_state(&self) -> bool {
        self.streamed
    }

    fn open_file(
        &self,
        completion: OpenFileCompletion,
    ) {
        self.engine
            .add_request("open media", move || completion.succeeded());
    }

    fn load_in_sound_engine(
        &self,
        completion: LoadInSoundEngineCompletion,
    ) {
        self.engine
            .add_request("load media", move || completion.succeeded());
    }

    fn unload_from_sound_engine(
        &self,
        completion: UnloadFromSoundEngineCompletion,
    ) {
        if self.engine.should_defer() {
            log::debug!("MediaFile {}: media still playing, deferring unload", self.media_id);
            return completion.defer();
        }

        if self.streamed {
            self.engine
                .add_request("unload media", move || completion.done());
        } else {
            // In-memory media releases its file along with the memory
            self.engine
                .add_request("unload media", move || completion.to_closed_file());
        }
    }

    fn close_file(
        &self,
        completion: CloseFileCompletion,
    ) {
        if self.engine.should_defer() {
            log::debug!("MediaFile {}: stream still open, deferring close", self.media_id);
            return completion.defer();
        }

        self.engine
            .add_request("close media", move || completion.done());
    }
}
