use crate::{FileHandlerError, FileHandlerResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "streambank.json";

// On-disk representation. Every field is optional so that a config file only needs to mention
// what it overrides.
#[derive(Serialize, Deserialize, Default)]
pub struct FileHandlerConfigJson {
    pub terminate_wait_loops: Option<u32>,
    pub file_state_queue_name: Option<String>,
    pub bank_queue_name: Option<String>,
    pub retry_deferred_without_callbacks: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHandlerConfig {
    // How many times terminating a file state waits on its queue for opened instances to be
    // released before giving up and reporting an error
    pub terminate_wait_loops: u32,

    // Thread name used for the execution queue of every file state
    pub file_state_queue_name: String,

    // Thread name of the shared queue that serializes sound bank operations
    pub bank_queue_name: String,

    // If no end-of-frame callbacks are available, deferred operations are retried right away on the
    // file state's queue. Otherwise they would wait forever.
    pub retry_deferred_without_callbacks: bool,
}

impl Default for FileHandlerConfig {
    fn default() -> Self {
        FileHandlerConfig {
            terminate_wait_loops: 10,
            file_state_queue_name: "FileState".to_string(),
            bank_queue_name: "SoundBank".to_string(),
            retry_deferred_without_callbacks: true,
        }
    }
}

impl FileHandlerConfig {
    pub fn from_json(json: FileHandlerConfigJson) -> FileHandlerResult<Self> {
        let defaults = FileHandlerConfig::default();
        let config = FileHandlerConfig {
            terminate_wait_loops: json
                .terminate_wait_loops
                .unwrap_or(defaults.terminate_wait_loops),
            file_state_queue_name: json
                .file_state_queue_name
                .unwrap_or(defaults.file_state_queue_name),
            bank_queue_name: json.bank_queue_name.unwrap_or(defaults.bank_queue_name),
            retry_deferred_without_callbacks: json
                .retry_deferred_without_callbacks
                .unwrap_or(defaults.retry_deferred_without_callbacks),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(json_str: &str) -> FileHandlerResult<Self> {
        let json: FileHandlerConfigJson = serde_json::from_str(json_str)?;
        Self::from_json(json)
    }

    pub fn read_from_path(path: &Path) -> FileHandlerResult<Self> {
        let file_contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&file_contents)
    }

    // Walks up from search_location looking for a config file. Not finding one is not an error,
    // the defaults are used instead.
    pub fn locate_config_file(search_location: &Path) -> FileHandlerResult<Self> {
        let mut path: Option<PathBuf> = Some(search_location.to_path_buf());
        while let Some(p) = path {
            let joined_path = p.join(CONFIG_FILE_NAME);
            if joined_path.exists() {
                log::info!("Using file handler configuration at {:?}", joined_path);
                return Self::read_from_path(&joined_path);
            }

            path = p.parent().map(|x| x.to_path_buf());
        }

        log::info!(
            "{} could not be located at {:?} or in any of its parent directories, using defaults",
            CONFIG_FILE_NAME,
            search_location
        );
        Ok(FileHandlerConfig::default())
    }

    pub fn validate(&self) -> FileHandlerResult<()> {
        if self.file_state_queue_name.is_empty() {
            return Err(FileHandlerError::InvalidConfig(
                "file_state_queue_name must not be empty".to_string(),
            ));
        }

        if self.bank_queue_name.is_empty() {
            return Err(FileHandlerError::InvalidConfig(
                "bank_queue_name must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn check_empty_json_uses_defaults() {
        let config = FileHandlerConfig::from_json_str("{}").unwrap();
        assert_eq!(config, FileHandlerConfig::default());
    }

    #[test]
    fn check_partial_override() {
        let config =
            FileHandlerConfig::from_json_str(r#"{ "terminate_wait_loops": 3, "bank_queue_name": "Banks" }"#)
                .unwrap();
        assert_eq!(config.terminate_wait_loops, 3);
        assert_eq!(config.bank_queue_name, "Banks");
        assert_eq!(config.file_state_queue_name, "FileState");
        assert!(config.retry_deferred_without_callbacks);
    }

    #[test]
    fn check_invalid_config_rejected() {
        let result = FileHandlerConfig::from_json_str(r#"{ "file_state_queue_name": "" }"#);
        assert!(matches!(result, Err(FileHandlerError::InvalidConfig(_))));

        let result = FileHandlerConfig::from_json_str("not json");
        assert!(matches!(result, Err(FileHandlerError::JsonError(_))));
    }

    #[test]
    fn check_missing_file_is_io_error() {
        let result = FileHandlerConfig::read_from_path(Path::new(
            "/this/path/should/not/exist/streambank.json",
        ));
        assert!(matches!(result, Err(FileHandlerError::IoError(_))));
    }
}
