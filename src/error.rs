#[derive(Debug, thiserror::Error)]
pub enum VehicleError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("vehicle disconnected")]
    Disconnected,
    #[error("operation timed out")]
    Timeout,
    #[error("operation cancelled")]
    Cancelled,
    #[error("command {command} rejected: {result}")]
    CommandRejected { command: String, result: String },
    #[error("no heartbeat received yet")]
    IdentityUnknown,
    #[error("mode '{0}' not available for this vehicle")]
    ModeNotAvailable(String),
    #[error("mission upload rejected by vehicle: {0}")]
    UploadRejected(String),
    #[error("mission transfer failed: {0}")]
    MissionTransfer(String),
    #[error("vehicle home location not known yet")]
    HomeUnknown,
    #[error("waypoint file: {0}")]
    File(#[from] MissionFileError),
    #[error("MAVLink I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from reading or writing QGC WPL 110 waypoint files.
#[derive(Debug, thiserror::Error)]
pub enum MissionFileError {
    #[error("unsupported waypoint file version: {0:?}")]
    UnsupportedVersion(String),
    #[error("line {line}: expected at least {expected} tab-separated fields, found {found}")]
    FieldCount {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: invalid {field}: {value:?}")]
    InvalidField {
        line: usize,
        field: &'static str,
        value: String,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
