//! Dataset backends: request description, cache naming, download and read.

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

use enum_dispatch::enum_dispatch;
use log::{debug, info};
use serde_json::Value;

use crate::array::Dataset;
use crate::cache::{self, CacheEntry};
use crate::config::Config;
use crate::error::{AtmExpError, AtmExpResult};

pub mod eac4;
pub mod frame;
pub mod ghg;

pub use eac4::{Area, DateRange, Eac4, Eac4Request};
pub use ghg::{
    Gas, GhgRequest, InputObservations, InversionOptimisedGreenhouseGas, Quantity,
    TimeAggregation,
};

/// Static description of a backend's dataset and of the files it caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetIdentity {
    pub name: &'static str,
    pub file_extension: &'static str,
    pub file_format: &'static str,
}

/// Remote collaborator turning a request body into file bytes.
pub trait DatasetApi: Debug {
    fn retrieve(&self, dataset_name: &str, request: &Value) -> anyhow::Result<Vec<u8>>;
}

/// Blocking HTTP client for the dataset API: posts the request body and returns the response
/// body as the file contents.
#[derive(Debug, Clone)]
pub struct AdsClient {
    url: String,
    key: Option<String>,
    client: reqwest::blocking::Client,
}

impl AdsClient {
    pub fn new(url: &str, key: Option<String>, timeout: Duration) -> AtmExpResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(anyhow::Error::from)?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            key,
            client,
        })
    }

    pub fn from_config(config: &Config) -> AtmExpResult<Self> {
        Self::new(
            &config.dataset_api_url,
            config.dataset_api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }
}

impl DatasetApi for AdsClient {
    fn retrieve(&self, dataset_name: &str, request: &Value) -> anyhow::Result<Vec<u8>> {
        let url = format!("{}/resources/{dataset_name}", self.url);
        info!("requesting {dataset_name} from {url}");
        debug!("request body: {request}");
        let mut builder = self.client.post(&url).json(request);
        if let Some(key) = &self.key {
            builder = builder.header("PRIVATE-TOKEN", key);
        }
        let response = builder.send()?.error_for_status()?;
        Ok(response.bytes()?.to_vec())
    }
}

/// Capabilities shared by every dataset backend. Each backend owns its request; cache files are
/// found again from their names alone.
#[enum_dispatch]
pub trait DatasetInterface {
    fn dataset_identity(&self) -> DatasetIdentity;

    /// Variable names covered by the request.
    fn required_variables(&self) -> BTreeSet<String>;

    /// Directory holding this dataset's cache files.
    fn dataset_dir(&self) -> &Path;

    /// File name prefix shared by every file of this request.
    fn file_prefix(&self) -> &str;

    fn list_cached_files(&self) -> AtmExpResult<Vec<CacheEntry>> {
        cache::list_entries(
            self.dataset_dir(),
            self.file_prefix(),
            self.dataset_identity().file_extension,
        )
    }

    fn is_cached(&self) -> AtmExpResult<bool> {
        Ok(!self.list_cached_files()?.is_empty())
    }

    fn clear_cached_files(&self) -> AtmExpResult<()> {
        let entries = self.list_cached_files()?;
        info!("removing {} cached files", entries.len());
        cache::remove_entries(&entries)
    }

    fn download(&self) -> AtmExpResult<Vec<CacheEntry>>;

    /// Reads every cached file of the request into one dataset, converted to the target units.
    fn read_dataset(&self) -> AtmExpResult<Dataset>;
}

#[enum_dispatch(DatasetInterface)]
#[derive(Debug, Clone)]
pub enum DatasetBackend {
    Eac4(Eac4),
    Ghg(InversionOptimisedGreenhouseGas),
}

pub(crate) fn download_failed(dataset: &str, error: impl std::fmt::Display) -> AtmExpError {
    AtmExpError::DownloadFailed(format!("{dataset}: {error}"))
}
