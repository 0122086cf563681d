use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export queue full, dropped {dropped} transaction(s)")]
    QueueFull { dropped: usize },

    #[error("export worker is gone, dropped {dropped} transaction(s)")]
    Disconnected { dropped: usize },

    #[error("couldn't encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("couldn't reach collector: {0}")]
    Http(#[from] attohttpc::Error),

    #[error("collector answered with status {0}")]
    Status(u16),
}

impl ExportError {
    /// Short, stable name of the failure, used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            ExportError::QueueFull { .. } => "QueueFull",
            ExportError::Disconnected { .. } => "Disconnected",
            ExportError::Encode(_) => "Encode",
            ExportError::Http(_) => "Http",
            ExportError::Status(_) => "Status",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: expected {expected}")]
    InvalidValue {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}
