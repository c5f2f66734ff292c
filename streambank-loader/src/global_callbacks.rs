use crossbeam_channel::{Receiver, Sender};
use std::sync::Mutex;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeferredAsyncResult {
    // Unregister the callback
    Done,
    // Call again at the end of the next frame
    KeepRunning,
}

pub type EndFrameCallback = Box<dyn FnMut() -> DeferredAsyncResult + Send + 'static>;

/// Callbacks invoked once per application frame by whoever drives the sound engine.
///
/// Registration goes through a channel so that a callback may register more callbacks while
/// end_frame() is running. Those are first called on the following frame.
pub struct GlobalCallbacks {
    register_tx: Sender<EndFrameCallback>,
    register_rx: Receiver<EndFrameCallback>,
    end_frame_callbacks: Mutex<Vec<EndFrameCallback>>,
}

impl Default for GlobalCallbacks {
    fn default() -> Self {
        let (register_tx, register_rx) = crossbeam_channel::unbounded();
        GlobalCallbacks {
            register_tx,
            register_rx,
            end_frame_callbacks: Default::default(),
        }
    }
}

impl GlobalCallbacks {
    /// Register a callback to run at the end of every frame until it returns Done
    pub fn end_async<F: FnMut() -> DeferredAsyncResult + Send + 'static>(
        &self,
        callback: F,
    ) {
        // The receiver lives in self, so this can't fail
        let _ = self.register_tx.send(Box::new(callback));
    }

    pub fn registered_count(&self) -> usize {
        let end_frame_callbacks = self
            .end_frame_callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        end_frame_callbacks.len() + self.register_rx.len()
    }

    /// Runs all registered callbacks once. Expected to be called by a single thread at the end of
    /// each frame.
    #[profiling::function]
    pub fn end_frame(&self) {
        let mut end_frame_callbacks = self
            .end_frame_callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        end_frame_callbacks.extend(self.register_rx.try_iter());
        if end_frame_callbacks.is_empty() {
            return;
        }

        log::trace!(
            "GlobalCallbacks::end_frame: running {} callbacks",
            end_frame_callbacks.len()
        );
        end_frame_callbacks.retain_mut(|callback| callback() == DeferredAsyncResult::KeepRunning);
    }
}
