use atmexp::error::AtmExpError;
use polars::error::PolarsError;

#[derive(thiserror::Error, Debug)]
pub enum AtmExpCliError {
    #[error("Anyhow error")]
    Anyhow(#[from] anyhow::Error),
    #[error("serde JSON error")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("polars error")]
    PolarsError(#[from] PolarsError),
    #[error("atmexp error: {0}")]
    AtmExpError(#[from] AtmExpError),
    #[error("std IO error")]
    IOError(#[from] std::io::Error),
}

pub type AtmExpCliResult<T> = Result<T, AtmExpCliError>;
