use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Name of the folder holding every local cache.
pub const LOCAL_FOLDER_NAME: &str = ".atmospheric_explorer";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Root of the dataset cache; each backend owns a subdirectory named after its dataset.
    pub data_dir: PathBuf,
    /// Root of the shapefile cache.
    pub shapefile_dir: PathBuf,
    pub dataset_api_url: String,
    pub dataset_api_key: Option<String>,
    pub shapefile_base_url: String,
    /// Timeout for every blocking network call.
    pub timeout_secs: u64,
    /// Replaces the embedded variable tables when set.
    pub variables_path: Option<PathBuf>,
}

/// Folder under the user's home directory holding the caches, falling back to the working
/// directory when no home directory can be determined.
pub fn local_folder() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(LOCAL_FOLDER_NAME)
}

impl Default for Config {
    fn default() -> Self {
        let local_folder = local_folder();
        Config {
            data_dir: local_folder.join("data"),
            shapefile_dir: local_folder.join("shapefiles"),
            dataset_api_url: "https://ads.atmosphere.copernicus.eu/api/v2".into(),
            dataset_api_key: None,
            shapefile_base_url:
                "https://www.naturalearthdata.com/http//www.naturalearthdata.com/download".into(),
            timeout_secs: 10,
            variables_path: None,
        }
    }
}

impl Config {
    /// Config whose caches both live under `root`, used for isolated runs.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Config {
            data_dir: root.join("data"),
            shapefile_dir: root.join("shapefiles"),
            ..Default::default()
        }
    }
}
