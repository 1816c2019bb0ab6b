use std::sync::Arc;

use log::{debug, info};
use polars::frame::DataFrame;

use crate::cache::CacheEntry;
use crate::config::Config;
use crate::dataset::{
    AdsClient, DatasetApi, DatasetBackend, Eac4, Eac4Request, GhgRequest,
    InversionOptimisedGreenhouseGas,
};
use crate::error::AtmExpResult;
use crate::selection::{Selection, SelectionLevel};
use crate::shapefile::{ArchiveSource, HttpArchiveSource, ShapefileCache, ShapefileCacheKey};
use crate::variables::VariableConfig;

// Re-exports
pub use column_names as COL;

// Modules
pub mod array;
pub mod cache;
pub mod column_names;
pub mod config;
pub mod dataset;
pub mod error;
pub mod expression;
#[cfg(feature = "formatters")]
pub mod formatters;
pub mod selection;
pub mod shapefile;
pub mod transform;
pub mod variables;

/// Entry point tying the configuration, the variable tables and the remote collaborators to
/// the dataset backends and the shapefile cache.
#[derive(Debug, Clone)]
pub struct AtmExp {
    pub config: Config,
    pub variables: Arc<VariableConfig>,
    pub shapefiles: ShapefileCache,
    api: Arc<dyn DatasetApi>,
}

impl AtmExp {
    /// Setup with the default configuration
    pub fn new() -> AtmExpResult<Self> {
        Self::new_with_config(Config::default())
    }

    /// Setup with a custom configuration and the HTTP collaborators
    pub fn new_with_config(config: Config) -> AtmExpResult<Self> {
        let api = Arc::new(AdsClient::from_config(&config)?);
        let archives = Arc::new(HttpArchiveSource::new(std::time::Duration::from_secs(
            config.timeout_secs,
        ))?);
        Self::with_collaborators(config, api, archives)
    }

    /// Setup with the given dataset API and shapefile archive source
    pub fn with_collaborators(
        config: Config,
        api: Arc<dyn DatasetApi>,
        archives: Arc<dyn ArchiveSource>,
    ) -> AtmExpResult<Self> {
        debug!("config: {config:?}");
        let variables = match &config.variables_path {
            Some(path) => {
                info!("loading variable tables from {}", path.display());
                VariableConfig::from_path(path)?
            }
            None => VariableConfig::builtin()?,
        };
        let shapefiles =
            ShapefileCache::new(&config.shapefile_dir, &config.shapefile_base_url, archives);
        Ok(Self {
            config,
            variables: Arc::new(variables),
            shapefiles,
            api,
        })
    }

    pub fn eac4(&self, request: Eac4Request) -> AtmExpResult<DatasetBackend> {
        Ok(Eac4::new(
            request,
            &self.config.data_dir,
            self.variables.clone(),
            self.api.clone(),
        )?
        .into())
    }

    pub fn ghg(&self, request: GhgRequest) -> AtmExpResult<DatasetBackend> {
        Ok(InversionOptimisedGreenhouseGas::new(
            request,
            &self.config.data_dir,
            self.variables.clone(),
            self.api.clone(),
        )?
        .into())
    }

    /// Every data file of every backend, sorted by path.
    pub fn list_data_files(&self) -> AtmExpResult<Vec<CacheEntry>> {
        cache::list_entries_recursive(&self.config.data_dir, "parquet")
    }

    pub fn clear_data_files(&self) -> AtmExpResult<()> {
        let entries = self.list_data_files()?;
        info!("removing {} data files", entries.len());
        cache::remove_entries(&entries)
    }

    /// The default sub-unit collection, downloaded when needed.
    pub fn subunits(&self) -> AtmExpResult<DataFrame> {
        self.shapefiles
            .get_as_dataframe(&ShapefileCacheKey::default())
    }

    /// The default sub-unit collection dissolved at `level`.
    pub fn level_collection(&self, level: SelectionLevel) -> AtmExpResult<DataFrame> {
        shapefile::dissolve_shapefile_level(&self.subunits()?, level)
    }

    pub fn convert_selection(
        &self,
        selection: &Selection,
        level: SelectionLevel,
    ) -> AtmExpResult<Selection> {
        selection.convert_selection(level, &self.subunits()?)
    }

    pub fn select_entities<S: AsRef<str>>(
        &self,
        names: &[S],
        level: SelectionLevel,
    ) -> AtmExpResult<Selection> {
        Selection::from_entities_list(names, level, &self.level_collection(level)?)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array;
    use polars::df;
    use tempfile::TempDir;

    use super::*;
    use crate::array::{Coord, DataArray};
    use crate::dataset::frame::parquet_bytes;
    use crate::dataset::tests::FakeApi;
    use crate::dataset::DatasetInterface;
    use crate::shapefile::tests::{test_fgb, zip_archive, FakeArchiveSource};

    fn atmexp(dir: &TempDir, api: FakeApi) -> AtmExp {
        let archives = FakeArchiveSource::serving(Some(zip_archive(vec![(
            "ne_50m_admin_0_map_subunits.fgb",
            test_fgb(),
        )])));
        AtmExp::with_collaborators(
            Config::with_root(dir.path()),
            Arc::new(api),
            Arc::new(archives),
        )
        .unwrap()
    }

    #[test]
    fn ozone_should_download_read_list_and_clear() {
        let dir = TempDir::new().unwrap();
        let mut frame = df!(
            COL::TIME => ["2021-01-01T00:00:00", "2021-01-31T00:00:00"],
            COL::LATITUDE => [0.0, 0.0],
            COL::LONGITUDE => [0.0, 0.0],
            "go3" => [1e-8, 2e-8]
        )
        .unwrap();
        let api = FakeApi::with_responses(vec![Ok(parquet_bytes(&mut frame).unwrap())]);
        let atmexp = atmexp(&dir, api);
        let request = Eac4Request::new(
            ["ozone_mass_mixing_ratio"],
            "2021-01-01/2021-01-31".parse().unwrap(),
        );
        let backend = atmexp.eac4(request).unwrap();
        backend.download().unwrap();

        let files = atmexp.list_data_files().unwrap();
        assert_eq!(files.len(), 1);
        let name = files[0].file_name();
        assert!(name.starts_with("cams-global-reanalysis-eac4_"));
        assert!(name.ends_with("_20210101-20210131.parquet"));

        let dataset = backend.read_dataset().unwrap();
        let ozone = dataset.get("ozone_mass_mixing_ratio").unwrap();
        let spec = atmexp
            .variables
            .resolve("cams-global-reanalysis-eac4", "ozone_mass_mixing_ratio")
            .unwrap();
        assert_eq!(ozone.units(), Some(spec.target_unit()));
        assert_eq!(ozone.values().shape(), &[2, 1, 1]);

        atmexp.clear_data_files().unwrap();
        assert!(atmexp.list_data_files().unwrap().is_empty());
        assert!(!backend.is_cached().unwrap());
    }

    #[test]
    fn countries_should_clip_in_selection_order() {
        let dir = TempDir::new().unwrap();
        let atmexp = atmexp(&dir, FakeApi::default());
        let selection = atmexp
            .select_entities(&["France", "Germany"], SelectionLevel::Countries)
            .unwrap();
        assert_eq!(selection.labels(), vec!["France", "Germany"]);
        let continents = atmexp
            .convert_selection(&selection, SelectionLevel::Continents)
            .unwrap();
        assert_eq!(continents.labels(), vec!["Europe"]);

        let lats: Vec<f64> = (0..180).map(|i| -89.5 + i as f64).collect();
        let lons: Vec<f64> = (0..360).map(|j| j as f64 + 0.5).collect();
        let values = Array::from_elem((lats.len(), lons.len()), 1.0).into_dyn();
        let array = DataArray::new(
            "tcco",
            vec![COL::LATITUDE.into(), COL::LONGITUDE.into()],
            vec![Coord::Float(lats), Coord::Float(lons)],
            values,
        )
        .unwrap();
        let shifted = transform::shifting_long(&array).unwrap();
        let clipped =
            transform::clip_and_concat_shapes(&shifted, &selection.to_dataframe().unwrap())
                .unwrap();
        assert_eq!(clipped.values().shape()[0], 2);
        assert_eq!(
            clipped.coord(COL::SHAPE).unwrap(),
            &Coord::Label(vec!["France".into(), "Germany".into()])
        );
    }
}
