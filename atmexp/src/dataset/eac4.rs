//! CAMS global reanalysis (EAC4): gridded variables requested by dates range, times of day,
//! area and optional pressure or model levels.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::ops::{Index, IndexMut};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{Datelike, Months, NaiveDate, NaiveTime};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::frame::{read_parquet, GridBuilder};
use super::{download_failed, DatasetApi, DatasetIdentity, DatasetInterface};
use crate::array::{DataArray, Dataset};
use crate::cache::{self, CacheEntry, StagedFiles, REQUEST_SIDECAR_SUFFIX};
use crate::error::{AtmExpError, AtmExpResult};
use crate::variables::{self, VariableConfig};
use crate::COL;

pub const EAC4_DATASET: &str = "cams-global-reanalysis-eac4";
const DATE_FORMAT: &str = "%Y-%m-%d";
const FILE_DATE_FORMAT: &str = "%Y%m%d";

/// Inclusive range of days.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> AtmExpResult<Self> {
        if start > end {
            return Err(AtmExpError::InvalidRequest(format!(
                "dates range starts on {start} after it ends on {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, other: &DateRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Splits the range at calendar month boundaries.
    pub fn months(&self) -> Vec<DateRange> {
        let mut ranges = vec![];
        let mut start = self.start;
        while start <= self.end {
            let next_month = start
                .with_day(1)
                .and_then(|first| first.checked_add_months(Months::new(1)));
            let end = match next_month.and_then(|d| d.pred_opt()) {
                Some(last_day) if last_day < self.end => last_day,
                _ => self.end,
            };
            ranges.push(DateRange { start, end });
            match end.succ_opt() {
                Some(next) => start = next,
                None => break,
            }
        }
        ranges
    }

    fn file_discriminator(&self) -> String {
        format!(
            "{}-{}",
            self.start.format(FILE_DATE_FORMAT),
            self.end.format(FILE_DATE_FORMAT)
        )
    }
}

impl FromStr for DateRange {
    type Err = AtmExpError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (start, end) = value.split_once('/').ok_or_else(|| {
            AtmExpError::InvalidRequest(format!("dates range '{value}' is not 'start/end'"))
        })?;
        let parse = |s: &str| {
            NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).map_err(|e| {
                AtmExpError::InvalidRequest(format!("invalid date '{s}' in dates range: {e}"))
            })
        };
        Self::new(parse(start)?, parse(end)?)
    }
}

impl TryFrom<String> for DateRange {
    type Error = AtmExpError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DateRange> for String {
    fn from(value: DateRange) -> Self {
        value.to_string()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }
}

/// Area as `[north, west, south, east]` in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Area(pub [f64; 4]);

impl Area {
    pub const GLOBAL: Area = Area([90.0, -180.0, -90.0, 180.0]);

    pub fn north(&self) -> f64 {
        self[0]
    }

    pub fn west(&self) -> f64 {
        self[1]
    }

    pub fn south(&self) -> f64 {
        self[2]
    }

    pub fn east(&self) -> f64 {
        self[3]
    }

    pub fn contains(&self, other: &Area) -> bool {
        self.north() >= other.north()
            && self.west() <= other.west()
            && self.south() <= other.south()
            && self.east() >= other.east()
    }

    pub fn contains_latitude(&self, latitude: f64) -> bool {
        self.south() <= latitude && latitude <= self.north()
    }

    /// Longitudes are compared in the `[-180, 180)` convention.
    pub fn contains_longitude(&self, longitude: f64) -> bool {
        let longitude = (longitude + 180.0).rem_euclid(360.0) - 180.0;
        self.west() <= longitude && longitude <= self.east()
    }
}

impl Index<usize> for Area {
    type Output = f64;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl IndexMut<usize> for Area {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.0[index]
    }
}

impl FromStr for Area {
    type Err = &'static str;
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts: Vec<f64> = value
            .split(',')
            .map(|s| s.trim().parse::<f64>().map_err(|_| "Failed to parse area"))
            .collect::<Result<Vec<_>, _>>()?;

        if parts.len() != 4 {
            return Err("Areas need to have 4 coords: north, west, south, east");
        }
        let mut area = [0.0; 4];
        area.copy_from_slice(&parts);
        Ok(Area(area))
    }
}

/// Immutable description of an EAC4 download.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Eac4Request {
    pub data_variables: BTreeSet<String>,
    pub dates_range: DateRange,
    pub time_values: BTreeSet<String>,
    pub area: Option<Area>,
    pub pressure_level: Option<BTreeSet<String>>,
    pub model_level: Option<BTreeSet<String>>,
    /// One download and one file per calendar month instead of one for the whole range.
    #[serde(default)]
    pub split_by_month: bool,
}

impl Eac4Request {
    pub fn new<I, S>(data_variables: I, dates_range: DateRange) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            data_variables: data_variables.into_iter().map(Into::into).collect(),
            dates_range,
            time_values: BTreeSet::from(["00:00".to_string()]),
            area: None,
            pressure_level: None,
            model_level: None,
            split_by_month: false,
        }
    }

    pub fn with_time_values<I, S>(mut self, time_values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.time_values = time_values.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_area(mut self, area: Area) -> Self {
        self.area = Some(area);
        self
    }

    pub fn with_pressure_level<I, S>(mut self, levels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pressure_level = Some(levels.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_model_level<I, S>(mut self, levels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.model_level = Some(levels.into_iter().map(Into::into).collect());
        self
    }

    pub fn split_by_month(mut self, split: bool) -> Self {
        self.split_by_month = split;
        self
    }

    pub fn validate(&self) -> AtmExpResult<()> {
        if self.data_variables.is_empty() {
            return Err(AtmExpError::InvalidRequest(
                "at least one data variable is required".into(),
            ));
        }
        if self.time_values.is_empty() {
            return Err(AtmExpError::InvalidRequest(
                "at least one time value is required".into(),
            ));
        }
        for time in &self.time_values {
            NaiveTime::parse_from_str(time, "%H:%M").map_err(|_| {
                AtmExpError::InvalidRequest(format!("time value '{time}' is not 'HH:MM'"))
            })?;
        }
        if self.pressure_level.is_some() && self.model_level.is_some() {
            return Err(AtmExpError::InvalidRequest(
                "pressure_level and model_level cannot both be requested".into(),
            ));
        }
        if let Some(area) = self.area {
            if area.south() > area.north() || area.west() > area.east() {
                return Err(AtmExpError::InvalidRequest(format!(
                    "area {:?} is not [north, west, south, east]",
                    area.0
                )));
            }
        }
        Ok(())
    }

    pub fn area_or_global(&self) -> Area {
        self.area.unwrap_or(Area::GLOBAL)
    }

    /// True when everything this request asks for is also covered by `other`.
    pub fn is_subset(&self, other: &Eac4Request) -> bool {
        fn levels_subset(a: &Option<BTreeSet<String>>, b: &Option<BTreeSet<String>>) -> bool {
            match (a, b) {
                (None, None) => true,
                (Some(a), Some(b)) => a.is_subset(b),
                _ => false,
            }
        }
        self.data_variables.is_subset(&other.data_variables)
            && other.dates_range.contains(&self.dates_range)
            && self.time_values.is_subset(&other.time_values)
            && other.area_or_global().contains(&self.area_or_global())
            && levels_subset(&self.pressure_level, &other.pressure_level)
            && levels_subset(&self.model_level, &other.model_level)
    }

    /// Body of the dataset API call for `dates_range`.
    pub fn build_call_body(&self, dates_range: &DateRange, file_format: &str) -> Value {
        let mut body = json!({
            "format": file_format,
            "variable": self.data_variables,
            "date": dates_range.to_string(),
            "time": self.time_values,
        });
        if let Some(area) = self.area {
            body["area"] = json!(area.0);
        }
        if let Some(levels) = &self.pressure_level {
            body["pressure_level"] = json!(levels);
        }
        if let Some(levels) = &self.model_level {
            body["model_level"] = json!(levels);
        }
        body
    }

    fn level_dim(&self) -> Option<&'static str> {
        if self.pressure_level.is_some() {
            Some(COL::PRESSURE_LEVEL)
        } else if self.model_level.is_some() {
            Some(COL::MODEL_LEVEL)
        } else {
            None
        }
    }
}

/// EAC4 backend. Files are named `{dataset}_{request hash}_{start}-{end}.parquet`.
#[derive(Debug, Clone)]
pub struct Eac4 {
    request: Eac4Request,
    dataset_dir: PathBuf,
    file_prefix: String,
    variables: Arc<VariableConfig>,
    api: Arc<dyn DatasetApi>,
}

impl Eac4 {
    pub const IDENTITY: DatasetIdentity = DatasetIdentity {
        name: EAC4_DATASET,
        file_extension: "parquet",
        file_format: "parquet",
    };

    /// Validates the request and resolves every variable up front.
    pub fn new(
        request: Eac4Request,
        data_dir: &Path,
        variables: Arc<VariableConfig>,
        api: Arc<dyn DatasetApi>,
    ) -> AtmExpResult<Self> {
        request.validate()?;
        for variable in &request.data_variables {
            variables.resolve(EAC4_DATASET, variable)?;
        }
        let file_prefix = format!("{EAC4_DATASET}_{}", cache::request_hash(&request)?);
        Ok(Self {
            request,
            dataset_dir: data_dir.join(EAC4_DATASET),
            file_prefix,
            variables,
            api,
        })
    }

    pub fn request(&self) -> &Eac4Request {
        &self.request
    }

    fn file_path(&self, range: &DateRange) -> PathBuf {
        self.dataset_dir.join(format!(
            "{}_{}.{}",
            self.file_prefix,
            range.file_discriminator(),
            Self::IDENTITY.file_extension
        ))
    }

    /// Files of this request or, failing that, of a cached request covering it.
    pub fn find_cache(&self) -> AtmExpResult<Vec<CacheEntry>> {
        let own = self.list_cached_files()?;
        if !own.is_empty() {
            return Ok(own);
        }
        let read_dir = match fs::read_dir(&self.dataset_dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };
        let mut entries = vec![];
        for item in read_dir {
            let path = item?.path();
            let Some(data_path) = path
                .to_str()
                .and_then(|p| p.strip_suffix(REQUEST_SIDECAR_SUFFIX))
                .map(PathBuf::from)
            else {
                continue;
            };
            let Ok(cached) = serde_json::from_slice::<Eac4Request>(&fs::read(&path)?) else {
                warn!("ignoring unreadable request file {}", path.display());
                continue;
            };
            if self.request.is_subset(&cached) && data_path.is_file() {
                debug!("request covered by cached file {}", data_path.display());
                entries.push(CacheEntry::new(data_path));
            }
        }
        entries.sort();
        Ok(entries)
    }

    /// Restricts the array to the cells this request asked for, which matters when reading
    /// files of a larger cached request.
    fn restrict(&self, array: DataArray) -> AtmExpResult<DataArray> {
        let times: BTreeSet<NaiveTime> = self
            .request
            .time_values
            .iter()
            .filter_map(|t| NaiveTime::parse_from_str(t, "%H:%M").ok())
            .collect();
        let keep_time: Vec<usize> = array
            .coord(COL::TIME)?
            .as_datetime()
            .ok_or_else(|| not_on_axis(&array, COL::TIME, "date-time"))?
            .iter()
            .enumerate()
            .filter(|(_, t)| {
                self.request.dates_range.contains_date(t.date()) && times.contains(&t.time())
            })
            .map(|(i, _)| i)
            .collect();
        let area = self.request.area_or_global();
        let keep_lat = keep_floats(&array, COL::LATITUDE, |lat| area.contains_latitude(lat))?;
        let keep_lon = keep_floats(&array, COL::LONGITUDE, |lon| area.contains_longitude(lon))?;
        let mut array = array
            .select(COL::TIME, &keep_time)?
            .select(COL::LATITUDE, &keep_lat)?
            .select(COL::LONGITUDE, &keep_lon)?;

        let levels = self
            .request
            .pressure_level
            .as_ref()
            .or(self.request.model_level.as_ref());
        if let (Some(dim), Some(levels)) = (self.request.level_dim(), levels) {
            let wanted: Vec<f64> = levels.iter().filter_map(|l| l.parse().ok()).collect();
            let keep_level = keep_floats(&array, dim, |level| wanted.contains(&level))?;
            array = array.select(dim, &keep_level)?;
        }
        Ok(array)
    }
}

fn not_on_axis(array: &DataArray, dim: &str, kind: &str) -> AtmExpError {
    AtmExpError::InvalidArray(format!("'{}': '{dim}' is not a {kind} axis", array.name()))
}

/// Indices along the float axis `dim` whose coordinate passes `keep`.
fn keep_floats(
    array: &DataArray,
    dim: &str,
    keep: impl Fn(f64) -> bool,
) -> AtmExpResult<Vec<usize>> {
    Ok(array
        .coord(dim)?
        .as_float()
        .ok_or_else(|| not_on_axis(array, dim, "numeric"))?
        .iter()
        .enumerate()
        .filter(|(_, value)| keep(**value))
        .map(|(i, _)| i)
        .collect())
}

impl DatasetInterface for Eac4 {
    fn dataset_identity(&self) -> DatasetIdentity {
        Self::IDENTITY
    }

    fn required_variables(&self) -> BTreeSet<String> {
        self.request.data_variables.clone()
    }

    fn dataset_dir(&self) -> &Path {
        &self.dataset_dir
    }

    fn file_prefix(&self) -> &str {
        &self.file_prefix
    }

    fn download(&self) -> AtmExpResult<Vec<CacheEntry>> {
        let ranges = if self.request.split_by_month {
            self.request.dates_range.months()
        } else {
            vec![self.request.dates_range]
        };
        let sidecar = serde_json::to_vec_pretty(&self.request)?;
        // Every range is staged before any file takes its final name, so a failure leaves the
        // cache as it was.
        let mut staged = StagedFiles::new();
        let mut entries: Vec<CacheEntry> = vec![];
        for range in &ranges {
            let body = self
                .request
                .build_call_body(range, Self::IDENTITY.file_format);
            let bytes = self
                .api
                .retrieve(EAC4_DATASET, &body)
                .map_err(|e| download_failed(EAC4_DATASET, format!("{e:#}")))?;
            let entry = CacheEntry::new(self.file_path(range));
            staged.stage(&entry.sidecar_path(), &sidecar)?;
            staged.stage(entry.path(), &bytes)?;
            entries.push(entry);
        }
        staged.commit()?;
        for entry in &entries {
            info!("cached {}", entry.path().display());
        }
        Ok(entries)
    }

    fn read_dataset(&self) -> AtmExpResult<Dataset> {
        let entries = self.find_cache()?;
        if entries.is_empty() {
            return Err(AtmExpError::MissingData(format!(
                "{} in {}",
                self.file_prefix,
                self.dataset_dir.display()
            )));
        }
        let specs = self
            .request
            .data_variables
            .iter()
            .map(|name| Ok((name, self.variables.resolve(EAC4_DATASET, name)?)))
            .collect::<AtmExpResult<Vec<_>>>()?;
        let codes: Vec<String> = specs.iter().map(|(_, spec)| spec.var_name.clone()).collect();

        let mut dims = vec![COL::TIME.to_string()];
        dims.extend(self.request.level_dim().map(String::from));
        dims.extend([COL::LATITUDE.to_string(), COL::LONGITUDE.to_string()]);
        let mut builder = GridBuilder::new(dims);
        for entry in &entries {
            debug!("reading {}", entry.path().display());
            let df = read_parquet(entry.path())?;
            builder.add_frame(&df, &codes, None)?;
        }
        let mut arrays = builder.build()?;

        let mut dataset = Dataset::new();
        for (name, spec) in specs {
            let Some(position) = arrays.iter().position(|a| a.name() == spec.var_name) else {
                warn!("variable '{name}' ({}) is missing from the cached files", spec.var_name);
                continue;
            };
            let array = self
                .restrict(arrays.swap_remove(position))?
                .renamed(name.as_str())
                .with_attr(COL::VARIABLE_CODE, spec.var_name.as_str())
                .with_attr(COL::UNITS, spec.unit.as_str());
            dataset.insert(variables::convert(array, spec)?);
        }
        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use polars::df;
    use polars::frame::DataFrame;
    use tempfile::TempDir;

    use super::super::frame::parquet_bytes;
    use super::super::tests::FakeApi;
    use super::*;
    use crate::array::Coord;

    fn january() -> DateRange {
        "2021-01-01/2021-01-31".parse().unwrap()
    }

    fn ozone_request() -> Eac4Request {
        Eac4Request::new(["ozone_mass_mixing_ratio"], january())
            .with_pressure_level(["1000"])
    }

    fn ozone_frame() -> DataFrame {
        df!(
            COL::TIME => ["2021-01-01T00:00:00", "2021-01-01T00:00:00", "2021-01-02T00:00:00", "2021-01-02T00:00:00"],
            COL::PRESSURE_LEVEL => [1000.0, 1000.0, 1000.0, 1000.0],
            COL::LATITUDE => [45.0, 45.0, 45.0, 45.0],
            COL::LONGITUDE => [0.0, 10.0, 0.0, 10.0],
            "go3" => [1e-8, 2e-8, 3e-8, 4e-8]
        )
        .unwrap()
    }

    fn backend(dir: &TempDir, request: Eac4Request, api: FakeApi) -> Eac4 {
        Eac4::new(
            request,
            dir.path(),
            Arc::new(VariableConfig::builtin().unwrap()),
            Arc::new(api),
        )
        .unwrap()
    }

    #[test]
    fn dates_range_should_parse_and_split_by_month() {
        let range: DateRange = "2020-12-15/2021-02-10".parse().unwrap();
        let months: Vec<String> = range.months().iter().map(|r| r.to_string()).collect();
        assert_eq!(
            months,
            vec![
                "2020-12-15/2020-12-31",
                "2021-01-01/2021-01-31",
                "2021-02-01/2021-02-10"
            ]
        );
        assert!("2021-02-01/2021-01-01".parse::<DateRange>().is_err());
        assert!("2021-02-01".parse::<DateRange>().is_err());
    }

    #[test]
    fn area_should_parse() {
        let area = Area::from_str("60, -10, 35, 30").unwrap();
        assert_eq!(area.north(), 60.0);
        assert_eq!(area.east(), 30.0);
        assert!(Area::from_str("0,1,2").is_err());
        assert!(Area::GLOBAL.contains(&area));
        assert!(!area.contains(&Area::GLOBAL));
    }

    #[test]
    fn invalid_requests_should_be_rejected() {
        let dir = TempDir::new().unwrap();
        let config = Arc::new(VariableConfig::builtin().unwrap());
        let api: Arc<dyn DatasetApi> = Arc::new(FakeApi::default());
        let both_levels = ozone_request().with_model_level(["1"]);
        assert!(matches!(
            Eac4::new(both_levels, dir.path(), config.clone(), api.clone()),
            Err(AtmExpError::InvalidRequest(_))
        ));
        let bad_time = ozone_request().with_time_values(["25:00"]);
        assert!(Eac4::new(bad_time, dir.path(), config.clone(), api.clone()).is_err());
        let unknown = Eac4Request::new(["flux_foss"], january());
        assert!(matches!(
            Eac4::new(unknown, dir.path(), config, api),
            Err(AtmExpError::UnknownVariable { .. })
        ));
    }

    #[test]
    fn file_names_should_be_deterministic_and_discriminating() {
        let dir = TempDir::new().unwrap();
        let a = backend(&dir, ozone_request(), FakeApi::default());
        let b = backend(&dir, ozone_request(), FakeApi::default());
        assert_eq!(a.file_prefix(), b.file_prefix());
        let other_variables = Eac4Request::new(
            ["ozone_mass_mixing_ratio", "total_column_ozone"],
            january(),
        )
        .with_pressure_level(["1000"]);
        let c = backend(&dir, other_variables, FakeApi::default());
        assert_ne!(a.file_prefix(), c.file_prefix());
        let other_area = ozone_request().with_area(Area([60.0, -10.0, 35.0, 30.0]));
        let d = backend(&dir, other_area, FakeApi::default());
        assert_ne!(a.file_prefix(), d.file_prefix());
        assert!(a
            .file_path(&january())
            .ends_with(format!("{}_20210101-20210131.parquet", a.file_prefix())));
    }

    #[test]
    fn call_body_should_hold_request_fields() {
        let request = ozone_request().with_area(Area([60.0, -10.0, 35.0, 30.0]));
        let body = request.build_call_body(&january(), "parquet");
        assert_eq!(body["variable"], json!(["ozone_mass_mixing_ratio"]));
        assert_eq!(body["date"], json!("2021-01-01/2021-01-31"));
        assert_eq!(body["time"], json!(["00:00"]));
        assert_eq!(body["area"], json!([60.0, -10.0, 35.0, 30.0]));
        assert_eq!(body["pressure_level"], json!(["1000"]));
        assert!(body.get("model_level").is_none());
    }

    #[test]
    fn subset_should_compare_every_field() {
        let small = ozone_request().with_area(Area([60.0, -10.0, 35.0, 30.0]));
        let large = Eac4Request::new(
            ["ozone_mass_mixing_ratio", "total_column_ozone"],
            "2020-12-01/2021-02-28".parse().unwrap(),
        )
        .with_time_values(["00:00", "12:00"])
        .with_pressure_level(["1000", "500"]);
        assert!(small.is_subset(&large));
        assert!(!large.is_subset(&small));
        let no_levels = Eac4Request::new(["ozone_mass_mixing_ratio"], january());
        assert!(!no_levels.is_subset(&large));
    }

    #[test]
    fn ozone_should_round_trip_through_the_cache() {
        let dir = TempDir::new().unwrap();
        let bytes = parquet_bytes(&mut ozone_frame()).unwrap();
        let eac4 = backend(&dir, ozone_request(), FakeApi::with_responses(vec![Ok(bytes)]));

        assert!(matches!(eac4.read_dataset(), Err(AtmExpError::MissingData(_))));
        assert!(!eac4.is_cached().unwrap());

        let entries = eac4.download().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(eac4.list_cached_files().unwrap(), entries);
        assert!(eac4.is_cached().unwrap());

        let dataset = eac4.read_dataset().unwrap();
        let ozone = dataset.get("ozone_mass_mixing_ratio").unwrap();
        let spec = VariableConfig::builtin()
            .unwrap()
            .resolve(EAC4_DATASET, "ozone_mass_mixing_ratio")
            .unwrap()
            .clone();
        assert_eq!(ozone.units(), Some(spec.target_unit()));
        assert_eq!(ozone.attr(COL::VARIABLE_CODE), Some("go3"));
        assert_eq!(
            ozone.dims(),
            &[COL::TIME, COL::PRESSURE_LEVEL, COL::LATITUDE, COL::LONGITUDE]
        );
        assert_eq!(ozone.values().shape(), &[2, 1, 1, 2]);
        let expected = spec.conversion.unwrap().formula.eval(4e-8);
        assert!((ozone.values()[[1, 0, 0, 1]] - expected).abs() < 1e-9);

        eac4.clear_cached_files().unwrap();
        eac4.clear_cached_files().unwrap();
        assert!(eac4.list_cached_files().unwrap().is_empty());
        assert!(!eac4.is_cached().unwrap());
    }

    #[test]
    fn failed_download_should_leave_no_cache_entry() {
        let dir = TempDir::new().unwrap();
        let bytes = parquet_bytes(&mut ozone_frame()).unwrap();
        let request = Eac4Request::new(
            ["ozone_mass_mixing_ratio"],
            "2020-12-01/2021-01-31".parse().unwrap(),
        )
        .with_pressure_level(["1000"])
        .split_by_month(true);
        let api = FakeApi::with_responses(vec![Ok(bytes), Err(anyhow::anyhow!("queue full"))]);
        let eac4 = backend(&dir, request, api);
        assert!(matches!(eac4.download(), Err(AtmExpError::DownloadFailed(_))));
        assert!(!eac4.is_cached().unwrap());
        let leftovers: Vec<_> = fs::read_dir(eac4.dataset_dir()).unwrap().collect();
        assert!(leftovers.is_empty(), "found {leftovers:?}");
    }

    #[test]
    fn monthly_split_should_request_each_month() {
        let dir = TempDir::new().unwrap();
        let bytes = parquet_bytes(&mut ozone_frame()).unwrap();
        let request = Eac4Request::new(
            ["ozone_mass_mixing_ratio"],
            "2020-12-01/2021-01-31".parse().unwrap(),
        )
        .with_pressure_level(["1000"])
        .split_by_month(true);
        let api = Arc::new(FakeApi::with_responses(vec![Ok(bytes.clone()), Ok(bytes)]));
        let eac4 = Eac4::new(
            request,
            dir.path(),
            Arc::new(VariableConfig::builtin().unwrap()),
            api.clone(),
        )
        .unwrap();
        let entries = eac4.download().unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.file_name().to_string()).collect();
        assert_eq!(
            names,
            vec![
                format!("{}_20201201-20201231.parquet", eac4.file_prefix()),
                format!("{}_20210101-20210131.parquet", eac4.file_prefix()),
            ]
        );
        let dates: Vec<Value> = api
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, body)| body["date"].clone())
            .collect();
        assert_eq!(
            dates,
            vec![json!("2020-12-01/2020-12-31"), json!("2021-01-01/2021-01-31")]
        );
    }

    #[test]
    fn subset_request_should_read_from_covering_cache() {
        let dir = TempDir::new().unwrap();
        let bytes = parquet_bytes(&mut ozone_frame()).unwrap();
        let large = backend(&dir, ozone_request(), FakeApi::with_responses(vec![Ok(bytes)]));
        large.download().unwrap();

        let small_request = Eac4Request::new(
            ["ozone_mass_mixing_ratio"],
            "2021-01-02/2021-01-02".parse().unwrap(),
        )
        .with_pressure_level(["1000"])
        .with_area(Area([50.0, -5.0, 40.0, 5.0]));
        let small = backend(&dir, small_request, FakeApi::default());
        assert!(!small.is_cached().unwrap());
        assert_eq!(small.find_cache().unwrap(), large.list_cached_files().unwrap());
        let ozone = small
            .read_dataset()
            .unwrap()
            .get("ozone_mass_mixing_ratio")
            .unwrap()
            .clone();
        assert_eq!(ozone.values().shape(), &[1, 1, 1, 1]);
    }

    #[test]
    fn failed_redownload_should_keep_existing_cache() {
        let dir = TempDir::new().unwrap();
        let bytes = parquet_bytes(&mut ozone_frame()).unwrap();
        let api = FakeApi::with_responses(vec![Ok(bytes), Err(anyhow::anyhow!("queue full"))]);
        let eac4 = backend(&dir, ozone_request(), api);
        let entries = eac4.download().unwrap();
        assert!(eac4.is_cached().unwrap());

        assert!(matches!(eac4.download(), Err(AtmExpError::DownloadFailed(_))));
        assert!(eac4.is_cached().unwrap());
        assert_eq!(eac4.list_cached_files().unwrap(), entries);
        assert!(entries[0].sidecar_path().is_file());
        assert!(eac4.read_dataset().is_ok());
    }

    #[test]
    fn subset_request_should_keep_only_requested_levels() {
        let dir = TempDir::new().unwrap();
        let mut frame = df!(
            COL::TIME => ["2021-01-01T00:00:00", "2021-01-01T00:00:00"],
            COL::PRESSURE_LEVEL => [1000.0, 500.0],
            COL::LATITUDE => [45.0, 45.0],
            COL::LONGITUDE => [0.0, 0.0],
            "go3" => [1e-8, 2e-8]
        )
        .unwrap();
        let bytes = parquet_bytes(&mut frame).unwrap();
        let large_request = Eac4Request::new(["ozone_mass_mixing_ratio"], january())
            .with_pressure_level(["1000", "500"]);
        let large = backend(&dir, large_request, FakeApi::with_responses(vec![Ok(bytes)]));
        large.download().unwrap();

        let small = backend(&dir, ozone_request(), FakeApi::default());
        let dataset = small.read_dataset().unwrap();
        let ozone = dataset.get("ozone_mass_mixing_ratio").unwrap();
        assert_eq!(
            ozone.coord(COL::PRESSURE_LEVEL).unwrap(),
            &Coord::Float(vec![1000.0])
        );
        assert_eq!(ozone.values().shape(), &[1, 1, 1, 1]);
    }

    #[test]
    fn restricting_a_label_time_axis_should_fail() {
        let dir = TempDir::new().unwrap();
        let eac4 = backend(&dir, ozone_request(), FakeApi::default());
        let array = DataArray::new(
            "go3",
            vec![COL::TIME.into(), COL::LATITUDE.into(), COL::LONGITUDE.into()],
            vec![
                Coord::Label(vec!["2021-01-01".into()]),
                Coord::Float(vec![45.0]),
                Coord::Float(vec![0.0]),
            ],
            ndarray::Array::from_elem((1, 1, 1), 1.0).into_dyn(),
        )
        .unwrap();
        assert!(matches!(
            eac4.restrict(array),
            Err(AtmExpError::InvalidArray(_))
        ));
    }

    #[test]
    fn missing_variable_should_be_omitted() {
        let dir = TempDir::new().unwrap();
        let bytes = parquet_bytes(&mut ozone_frame()).unwrap();
        let request = Eac4Request::new(
            ["ozone_mass_mixing_ratio", "temperature"],
            january(),
        )
        .with_pressure_level(["1000"]);
        let eac4 = backend(&dir, request, FakeApi::with_responses(vec![Ok(bytes)]));
        eac4.download().unwrap();
        let dataset = eac4.read_dataset().unwrap();
        assert_eq!(dataset.names(), vec!["ozone_mass_mixing_ratio"]);
    }
}
