use thiserror::Error;

/// Domain failures that abort a run.
#[derive(Debug, Error)]
pub enum DqError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("There is no data to train. Aborting!")]
    NoTrainableData,
    #[error("malformed data file {file}: {reason}")]
    MalformedDataFile { file: String, reason: String },
    #[error("classifier failure: {0}")]
    Model(String),
}

impl From<candle_core::Error> for DqError {
    fn from(value: candle_core::Error) -> Self {
        DqError::Model(value.to_string())
    }
}
