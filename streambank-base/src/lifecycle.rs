use serde::{Deserialize, Serialize};

/// Why a reference was requested on a file state.
///
/// Streaming references are also counted in a separate streaming counter. A streamed file is only
/// loaded in the sound engine while at least one streaming reference exists.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationOrigin {
    Loading,
    Streaming,
}

impl OperationOrigin {
    pub fn name(self) -> &'static str {
        match self {
            OperationOrigin::Loading => "Loading",
            OperationOrigin::Streaming => "Streaming",
        }
    }

    pub fn is_streaming(self) -> bool {
        self == OperationOrigin::Streaming
    }
}

impl std::fmt::Display for OperationOrigin {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// Closed -> Opening -> Opened -> Loading -> Loaded
// Loaded -> Unloading -> Opened (or Closed) -> Closing -> Closed
//
// Every transitional state (Opening, Loading, Unloading, Closing) is only held while a backend
// request is outstanding. Failures and deferrals revert to the stable state the request started from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LifecycleState {
    Closed = 0,
    Opening = 1,
    Opened = 2,
    Loading = 3,
    Loaded = 4,
    Unloading = 5,
    Closing = 6,
}

impl LifecycleState {
    pub fn name(self) -> &'static str {
        match self {
            LifecycleState::Closed => "Closed",
            LifecycleState::Opening => "Opening",
            LifecycleState::Opened => "Opened",
            LifecycleState::Loading => "Loading",
            LifecycleState::Loaded => "Loaded",
            LifecycleState::Unloading => "Unloading",
            LifecycleState::Closing => "Closing",
        }
    }

    /// Returns true for states that are only held while a backend request is in flight
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            LifecycleState::Opening
                | LifecycleState::Loading
                | LifecycleState::Unloading
                | LifecycleState::Closing
        )
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of `as_u8`. Values that were never produced by `as_u8` return None.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(LifecycleState::Closed),
            1 => Some(LifecycleState::Opening),
            2 => Some(LifecycleState::Opened),
            3 => Some(LifecycleState::Loading),
            4 => Some(LifecycleState::Loaded),
            5 => Some(LifecycleState::Unloading),
            6 => Some(LifecycleState::Closing),
            _ => None,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Answer given by the sound engine when asked to unload a file or close it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EngineStepResult {
    /// The step is finished. This says nothing about whether it succeeded.
    Done,
    /// The engine is not ready. The step must be retried at the end of the current frame.
    Deferred,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn check_state_u8_conversion() {
        let all_states = [
            LifecycleState::Closed,
            LifecycleState::Opening,
            LifecycleState::Opened,
            LifecycleState::Loading,
            LifecycleState::Loaded,
            LifecycleState::Unloading,
            LifecycleState::Closing,
        ];

        for state in all_states {
            assert_eq!(LifecycleState::from_u8(state.as_u8()), Some(state));
        }

        assert_eq!(LifecycleState::from_u8(7), None);
        assert_eq!(LifecycleState::from_u8(u8::MAX), None);
    }

    #[test]
    fn check_transitional_states() {
        assert!(!LifecycleState::Closed.is_transitional());
        assert!(LifecycleState::Opening.is_transitional());
        assert!(!LifecycleState::Opened.is_transitional());
        assert!(LifecycleState::Loading.is_transitional());
        assert!(!LifecycleState::Loaded.is_transitional());
        assert!(LifecycleState::Unloading.is_transitional());
        assert!(LifecycleState::Closing.is_transitional());
    }

    #[test]
    fn check_names() {
        assert_eq!(LifecycleState::Unloading.to_string(), "Unloading");
        assert_eq!(OperationOrigin::Streaming.name(), "Streaming");
        assert_eq!(OperationOrigin::Loading.to_string(), "Loading");
        assert!(OperationOrigin::Streaming.is_streaming());
        assert!(!OperationOrigin::Loading.is_streaming());
    }
}
