// ⚠️ Error types shared by every module of the library

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PinError {
    /// Missing or incomplete environment configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// A record violates one of its invariants and cannot be saved
    #[error("invalid record: {0}")]
    Invalid(String),

    /// A gateway call whose caller needs a success did not get one
    #[error("Pin {} error: {message}", gateway_kind(.payment))]
    Gateway { payment: bool, message: String },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

fn gateway_kind(payment: &bool) -> &'static str {
    if *payment {
        "payment"
    } else {
        "API"
    }
}

pub type Result<T> = std::result::Result<T, PinError>;
