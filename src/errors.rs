use thiserror::Error;

#[derive(Debug, Error)]
pub enum CasePilotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Automation surface error: {0}")]
    Surface(String),

    #[error("Perception error: {0}")]
    Perception(String),

    #[error("Decision oracle error: {0}")]
    Oracle(#[from] crate::oracle::retry::OracleError),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Safety violation: {0}")]
    SafetyViolation(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Run cancelled")]
    Cancelled,
}

impl serde::Serialize for CasePilotError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type CasePilotResult<T> = Result<T, CasePilotError>;
