use std::fmt;

pub type Result<T> = std::result::Result<T, SolarViewerError>;

#[derive(Debug)]
pub enum SolarViewerError {
    BadPattern(glob::PatternError),
    UnreadablePath(glob::GlobError),
    IOError(std::io::Error),
    InvalidFITS(String),
    YAMLError(serde_yaml::Error),
    InvalidRequest(String),
    SingleStokes(String),
    MissingAxis(String),
    MissingDependency(String),
    Encoding(String),
}

impl SolarViewerError {
    /// wrap an io error with the path (or other context) it happened on
    pub fn io_context(context: impl fmt::Display, err: std::io::Error) -> Self {
        SolarViewerError::IOError(std::io::Error::new(
            err.kind(),
            format!("{}: {}", context, err),
        ))
    }
}

impl fmt::Display for SolarViewerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolarViewerError::BadPattern(..) => write!(f, "bad input pattern"),
            SolarViewerError::UnreadablePath(..) => write!(f, "unreadable path"),
            SolarViewerError::IOError(e) => write!(f, "{}", e),
            SolarViewerError::InvalidFITS(s) => write!(f, "{}", s),
            SolarViewerError::YAMLError(e) => write!(f, "bad yaml: {}", e),
            SolarViewerError::InvalidRequest(s) => write!(f, "{}", s),
            SolarViewerError::SingleStokes(s) => write!(f, "{}", s),
            SolarViewerError::MissingAxis(s) => write!(f, "{}", s),
            SolarViewerError::MissingDependency(s) => write!(f, "missing dependency: {}", s),
            SolarViewerError::Encoding(s) => write!(f, "{}", s),
        }
    }
}

impl std::error::Error for SolarViewerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SolarViewerError::BadPattern(err) => Some(err),
            SolarViewerError::UnreadablePath(err) => Some(err),
            SolarViewerError::IOError(err) => Some(err),
            SolarViewerError::YAMLError(err) => Some(err),
            SolarViewerError::InvalidFITS(_)
            | SolarViewerError::InvalidRequest(_)
            | SolarViewerError::SingleStokes(_)
            | SolarViewerError::MissingAxis(_)
            | SolarViewerError::MissingDependency(_)
            | SolarViewerError::Encoding(_) => None,
        }
    }
}

impl From<glob::PatternError> for SolarViewerError {
    fn from(value: glob::PatternError) -> Self {
        SolarViewerError::BadPattern(value)
    }
}

impl From<glob::GlobError> for SolarViewerError {
    fn from(value: glob::GlobError) -> Self {
        SolarViewerError::UnreadablePath(value)
    }
}

impl From<std::io::Error> for SolarViewerError {
    fn from(value: std::io::Error) -> Self {
        SolarViewerError::IOError(value)
    }
}

impl From<serde_yaml::Error> for SolarViewerError {
    fn from(value: serde_yaml::Error) -> Self {
        SolarViewerError::YAMLError(value)
    }
}

impl From<image::ImageError> for SolarViewerError {
    fn from(value: image::ImageError) -> Self {
        SolarViewerError::Encoding(value.to_string())
    }
}

#[cfg(feature = "python")]
impl From<SolarViewerError> for pyo3::PyErr {
    fn from(value: SolarViewerError) -> Self {
        pyo3::exceptions::PyValueError::new_err(value.to_string())
    }
}
