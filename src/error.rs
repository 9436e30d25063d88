use std::fmt;

#[derive(Debug)]
pub enum ScanError {
    Io(std::io::Error),
    /// Text that could not be parsed (range text, numbers, keep-test expressions)
    Parse(String),
    /// Input data violates an aggregation invariant; the whole pass is aborted
    Integrity(String),
    Lock(String),
    /// The completion worker failed; the tracker can no longer flush
    Tracker(String),
    Config(String),
    Other(String),
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::Io(e) => write!(f, "IO error: {}", e),
            ScanError::Parse(e) => write!(f, "Parse error: {}", e),
            ScanError::Integrity(e) => write!(f, "Integrity violation: {}", e),
            ScanError::Lock(e) => write!(f, "Lock error: {}", e),
            ScanError::Tracker(e) => write!(f, "Completion tracker error: {}", e),
            ScanError::Config(e) => write!(f, "Config error: {}", e),
            ScanError::Other(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScanError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ScanError {
    fn from(err: std::io::Error) -> Self {
        ScanError::Io(err)
    }
}

impl From<std::num::ParseIntError> for ScanError {
    fn from(err: std::num::ParseIntError) -> Self {
        ScanError::Parse(err.to_string())
    }
}

impl From<std::num::ParseFloatError> for ScanError {
    fn from(err: std::num::ParseFloatError) -> Self {
        ScanError::Parse(err.to_string())
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(err: serde_json::Error) -> Self {
        ScanError::Config(err.to_string())
    }
}

impl From<glob::PatternError> for ScanError {
    fn from(err: glob::PatternError) -> Self {
        ScanError::Config(format!("bad file pattern: {}", err))
    }
}

impl From<glob::GlobError> for ScanError {
    fn from(err: glob::GlobError) -> Self {
        ScanError::Io(err.into_error())
    }
}

impl From<String> for ScanError {
    fn from(err: String) -> Self {
        ScanError::Other(err)
    }
}

impl From<&str> for ScanError {
    fn from(err: &str) -> Self {
        ScanError::Other(err.to_string())
    }
}
