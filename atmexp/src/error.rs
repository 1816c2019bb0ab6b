//! Error types.

#[derive(thiserror::Error, Debug)]
pub enum AtmExpError {
    #[error("Malformed expression: {0}")]
    MalformedExpression(String),
    #[error("Unknown variable '{variable}' for dataset '{dataset}'")]
    UnknownVariable { dataset: String, variable: String },
    #[error("Download failed: {0}")]
    DownloadFailed(String),
    #[error("Shapefile unavailable: {0}")]
    ShapefileUnavailable(String),
    #[error("No cached data files match the request: {0}")]
    MissingData(String),
    #[error("Time axis is not strictly monotonic: {0}")]
    UnsortedTimeAxis(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),
    #[error("Invalid array: {0}")]
    InvalidArray(String),
    #[error("Wrapped anyhow error: {0}")]
    AnyhowError(#[from] anyhow::Error),
    #[error("Wrapped polars error: {0}")]
    PolarsError(#[from] polars::error::PolarsError),
    #[error("Wrapped IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Wrapped serde JSON error: {0}")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("Invalid TOML: {0}")]
    TomlError(#[from] toml::de::Error),
}

pub type AtmExpResult<T> = Result<T, AtmExpError>;

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn test_anyhow() {
        let anyhow_error = anyhow!("An anyhow error");
        let atmexp_error: AtmExpError = anyhow_error.into();
        assert_eq!(
            atmexp_error.to_string(),
            "Wrapped anyhow error: An anyhow error"
        );
    }

    #[test]
    fn unknown_variable_should_name_dataset_and_variable() {
        let error = AtmExpError::UnknownVariable {
            dataset: "cams-global-reanalysis-eac4".into(),
            variable: "not_a_variable".into(),
        };
        assert_eq!(
            error.to_string(),
            "Unknown variable 'not_a_variable' for dataset 'cams-global-reanalysis-eac4'"
        );
    }
}
