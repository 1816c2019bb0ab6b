//! CAMS global greenhouse gas inversion: monthly fields of one gas, delivered as a zip archive of
//! per-month files.

use std::collections::BTreeSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum_macros::{Display, EnumIter, EnumString};
use zip::ZipArchive;

use super::frame::{read_parquet, GridBuilder};
use super::{download_failed, DatasetApi, DatasetIdentity, DatasetInterface};
use crate::array::Dataset;
use crate::cache::{self, CacheEntry, StagedFiles};
use crate::error::{AtmExpError, AtmExpResult};
use crate::variables::{self, VariableConfig};
use crate::COL;

pub const GHG_DATASET: &str = "cams-global-greenhouse-gas-inversion";

/// Length of the `YYYYMM` period at the end of every file stem.
const PERIOD_LEN: usize = 6;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Gas {
    CarbonDioxide,
    Methane,
    NitrousOxide,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Quantity {
    MeanColumn,
    SurfaceFlux,
    Concentration,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InputObservations {
    Surface,
    Satellite,
    SurfaceSatellite,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TimeAggregation {
    Instantaneous,
    DailyMean,
    MonthlyMean,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GhgRequest {
    pub data_variables: Gas,
    pub quantity: Quantity,
    pub input_observations: InputObservations,
    pub time_aggregation: TimeAggregation,
    pub year: BTreeSet<String>,
    pub month: BTreeSet<String>,
    pub version: String,
}

impl GhgRequest {
    pub fn new(
        gas: Gas,
        quantity: Quantity,
        input_observations: InputObservations,
        time_aggregation: TimeAggregation,
    ) -> Self {
        Self {
            data_variables: gas,
            quantity,
            input_observations,
            time_aggregation,
            year: BTreeSet::new(),
            month: BTreeSet::new(),
            version: "latest".to_string(),
        }
    }

    pub fn with_years<I, S>(mut self, years: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.year = years.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_months<I, S>(mut self, months: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.month = months.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn validate(&self) -> AtmExpResult<()> {
        if self.year.is_empty() || self.month.is_empty() {
            return Err(AtmExpError::InvalidRequest(
                "at least one year and one month are required".into(),
            ));
        }
        for year in &self.year {
            if year.len() != 4 || year.parse::<i32>().is_err() {
                return Err(AtmExpError::InvalidRequest(format!(
                    "year '{year}' is not 'YYYY'"
                )));
            }
        }
        for month in &self.month {
            let valid = month.len() == 2 && month.parse::<u32>().is_ok_and(|m| (1..=12).contains(&m));
            if !valid {
                return Err(AtmExpError::InvalidRequest(format!(
                    "month '{month}' is not 'MM'"
                )));
            }
        }
        Ok(())
    }

    /// Every `YYYYMM` period of the request.
    pub fn periods(&self) -> BTreeSet<String> {
        self.year
            .iter()
            .flat_map(|year| self.month.iter().map(move |month| format!("{year}{month}")))
            .collect()
    }

    pub fn is_subset(&self, other: &GhgRequest) -> bool {
        self.data_variables == other.data_variables
            && self.quantity == other.quantity
            && self.input_observations == other.input_observations
            && self.time_aggregation == other.time_aggregation
            && self.version == other.version
            && self.year.is_subset(&other.year)
            && self.month.is_subset(&other.month)
    }

    pub fn build_call_body(&self, file_format: &str) -> Value {
        json!({
            "format": file_format,
            "variable": self.data_variables.to_string(),
            "quantity": self.quantity.to_string(),
            "input_observations": self.input_observations.to_string(),
            "time_aggregation": self.time_aggregation.to_string(),
            "year": self.year,
            "month": self.month,
            "version": self.version,
        })
    }
}

/// Period of a cache file, read from the last characters of its stem.
fn file_period(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let period = stem.get(stem.len().checked_sub(PERIOD_LEN)?..)?;
    period
        .chars()
        .all(|c| c.is_ascii_digit())
        .then(|| period.to_string())
}

fn period_start(period: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{period}01"), "%Y%m%d").ok()
}

/// GHG inversion backend. Files are named `{dataset}_{request hash}_{YYYYMM}.parquet`.
#[derive(Debug, Clone)]
pub struct InversionOptimisedGreenhouseGas {
    request: GhgRequest,
    dataset_dir: PathBuf,
    file_prefix: String,
    variables: Arc<VariableConfig>,
    api: Arc<dyn DatasetApi>,
}

impl InversionOptimisedGreenhouseGas {
    pub const IDENTITY: DatasetIdentity = DatasetIdentity {
        name: GHG_DATASET,
        file_extension: "parquet",
        file_format: "zip",
    };

    pub fn new(
        request: GhgRequest,
        data_dir: &Path,
        variables: Arc<VariableConfig>,
        api: Arc<dyn DatasetApi>,
    ) -> AtmExpResult<Self> {
        request.validate()?;
        let file_prefix = format!("{GHG_DATASET}_{}", cache::request_hash(&request)?);
        let backend = Self {
            request,
            dataset_dir: data_dir.join(GHG_DATASET),
            file_prefix,
            variables,
            api,
        };
        if backend.required_variables().is_empty() {
            return Err(AtmExpError::UnknownVariable {
                dataset: GHG_DATASET.to_string(),
                variable: format!(
                    "{} {} {}",
                    backend.request.data_variables,
                    backend.request.quantity,
                    backend.request.time_aggregation
                ),
            });
        }
        Ok(backend)
    }

    pub fn request(&self) -> &GhgRequest {
        &self.request
    }

    fn file_path(&self, period: &str) -> PathBuf {
        self.dataset_dir.join(format!(
            "{}_{period}.{}",
            self.file_prefix,
            Self::IDENTITY.file_extension
        ))
    }

    /// Stages every monthly file of the archive under a temporary name inside the cache and
    /// renames them only once the whole archive has been read. Existing files are untouched
    /// when the archive is unusable.
    fn store_archive(&self, bytes: Vec<u8>) -> AtmExpResult<Vec<CacheEntry>> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| download_failed(GHG_DATASET, format!("invalid archive: {e}")))?;
        let periods = self.request.periods();

        let mut staged = StagedFiles::new();
        let mut entries: Vec<CacheEntry> = vec![];
        let mut seen = BTreeSet::new();
        for i in 0..archive.len() {
            let mut file = archive
                .by_index(i)
                .map_err(|e| download_failed(GHG_DATASET, format!("invalid archive: {e}")))?;
            let Some(name) = file.enclosed_name().and_then(|p| p.file_name()).map(PathBuf::from)
            else {
                warn!("skipping archive entry with unsafe name '{}'", file.name());
                continue;
            };
            if name.extension().and_then(|e| e.to_str()) != Some(Self::IDENTITY.file_extension) {
                debug!("skipping archive entry '{}'", name.display());
                continue;
            }
            let Some(period) = file_period(&name) else {
                debug!("skipping archive entry '{}'", name.display());
                continue;
            };
            if !periods.contains(&period) {
                warn!("skipping '{}': {period} was not requested", name.display());
                continue;
            }
            if !seen.insert(period.clone()) {
                warn!("skipping '{}': {period} already in the archive", name.display());
                continue;
            }
            let entry = CacheEntry::new(self.file_path(&period));
            staged.stage_reader(entry.path(), &mut file)?;
            entries.push(entry);
        }
        if staged.is_empty() {
            return Err(download_failed(GHG_DATASET, "archive holds no monthly files"));
        }
        staged.commit()?;
        entries.sort();
        Ok(entries)
    }
}

impl DatasetInterface for InversionOptimisedGreenhouseGas {
    fn dataset_identity(&self) -> DatasetIdentity {
        Self::IDENTITY
    }

    /// Variables tagged with the requested gas, quantity and time aggregation. Cell areas are
    /// not data.
    fn required_variables(&self) -> BTreeSet<String> {
        let gas = self.request.data_variables.to_string();
        let quantity = self.request.quantity.to_string();
        let aggregation = self.request.time_aggregation.to_string();
        self.variables
            .variables(GHG_DATASET)
            .filter(|(_, spec)| {
                spec.gas.as_deref() == Some(gas.as_str())
                    && spec.quantity.as_deref() == Some(quantity.as_str())
                    && spec.time_aggregations.contains(&aggregation)
                    && !spec.var_name.contains("area")
            })
            .map(|(name, _)| name.to_string())
            .collect()
    }

    fn dataset_dir(&self) -> &Path {
        &self.dataset_dir
    }

    fn file_prefix(&self) -> &str {
        &self.file_prefix
    }

    fn download(&self) -> AtmExpResult<Vec<CacheEntry>> {
        let body = self.request.build_call_body(Self::IDENTITY.file_format);
        let bytes = self
            .api
            .retrieve(GHG_DATASET, &body)
            .map_err(|e| download_failed(GHG_DATASET, format!("{e:#}")))?;
        let entries = self.store_archive(bytes)?;
        info!("cached {} monthly files for {}", entries.len(), self.file_prefix);
        Ok(entries)
    }

    fn read_dataset(&self) -> AtmExpResult<Dataset> {
        let entries = self.list_cached_files()?;
        if entries.is_empty() {
            return Err(AtmExpError::MissingData(format!(
                "{} in {}",
                self.file_prefix,
                self.dataset_dir.display()
            )));
        }
        let names = self.required_variables();
        let specs = names
            .iter()
            .map(|name| Ok((name, self.variables.resolve(GHG_DATASET, name)?)))
            .collect::<AtmExpResult<Vec<_>>>()?;
        let codes: Vec<String> = specs.iter().map(|(_, spec)| spec.var_name.clone()).collect();

        let dims = vec![
            COL::TIME.to_string(),
            COL::LATITUDE.to_string(),
            COL::LONGITUDE.to_string(),
        ];
        let mut builder = GridBuilder::new(dims);
        for entry in &entries {
            let fixed_time = file_period(entry.path())
                .as_deref()
                .and_then(period_start)
                .and_then(|d| d.and_hms_opt(0, 0, 0));
            let df = read_parquet(entry.path())?;
            let found = builder.add_frame(&df, &codes, fixed_time)?;
            if found.len() < codes.len() {
                debug!(
                    "{} holds {} of {} variables",
                    entry.file_name(),
                    found.len(),
                    codes.len()
                );
            }
        }
        let mut arrays = builder.build()?;

        let observations = self.request.input_observations.to_string();
        let aggregation = self.request.time_aggregation.to_string();
        let mut dataset = Dataset::new();
        for (name, spec) in specs {
            let Some(position) = arrays.iter().position(|a| a.name() == spec.var_name) else {
                warn!("variable '{name}' is missing from every cached file");
                continue;
            };
            let array = arrays
                .swap_remove(position)
                .renamed(name.as_str())
                .with_attr(COL::VARIABLE_CODE, spec.var_name.as_str())
                .with_attr(COL::UNITS, spec.unit.as_str())
                .expand_dims(COL::TIME_AGGREGATION, &aggregation)?
                .expand_dims(COL::INPUT_OBSERVATIONS, &observations)?;
            dataset.insert(variables::convert(array, spec)?);
        }
        Ok(dataset)
    }
}
