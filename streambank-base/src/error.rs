use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum FileHandlerError {
    StringError(String),
    IoError(Arc<std::io::Error>),
    JsonError(Arc<serde_json::Error>),
    // A task was posted to an execution queue after it was closed
    ExecutionQueueClosed,
    InvalidConfig(String),
}

impl std::error::Error for FileHandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            FileHandlerError::StringError(_) => None,
            FileHandlerError::IoError(ref e) => Some(&**e),
            FileHandlerError::JsonError(ref e) => Some(&**e),
            FileHandlerError::ExecutionQueueClosed => None,
            FileHandlerError::InvalidConfig(_) => None,
        }
    }
}

impl core::fmt::Display for FileHandlerError {
    fn fmt(
        &self,
        fmt: &mut core::fmt::Formatter,
    ) -> core::fmt::Result {
        match *self {
            FileHandlerError::StringError(ref e) => e.fmt(fmt),
            FileHandlerError::IoError(ref e) => e.fmt(fmt),
            FileHandlerError::JsonError(ref e) => e.fmt(fmt),
            FileHandlerError::ExecutionQueueClosed => "ExecutionQueueClosed".fmt(fmt),
            FileHandlerError::InvalidConfig(ref e) => write!(fmt, "InvalidConfig: {}", e),
        }
    }
}

impl From<&str> for FileHandlerError {
    fn from(str: &str) -> Self {
        FileHandlerError::StringError(str.to_string())
    }
}

impl From<String> for FileHandlerError {
    fn from(string: String) -> Self {
        FileHandlerError::StringError(string)
    }
}

impl From<std::io::Error> for FileHandlerError {
    fn from(error: std::io::Error) -> Self {
        FileHandlerError::IoError(Arc::new(error))
    }
}

impl From<serde_json::Error> for FileHandlerError {
    fn from(error: serde_json::Error) -> Self {
        FileHandlerError::JsonError(Arc::new(error))
    }
}

pub type FileHandlerResult<T> = Result<T, FileHandlerError>;
