use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ADC error: {0}")]
    Adc(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("InfluxDB write failed (HTTP {status}); posted data: {payload}")]
    Sink { status: u16, payload: String },

    #[error("Meter state error: {0}")]
    State(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
