//! Natural Earth style geometry collections: a cache keyed by resolution and map parameters,
//! loading into dataframes with a WKT geometry column, and dissolving to coarser levels.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{self, BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use geo::{BooleanOps, Geometry, MultiPolygon};
use geojson::GeoJson;
use log::{debug, info, warn};
use polars::{frame::DataFrame, prelude::NamedFrom, series::Series};
use serde::{Deserialize, Serialize};
use ::shapefile::dbase::FieldValue;
use strum_macros::{Display, EnumIter, EnumString};
use wkt::{ToWkt, TryFromWkt};
use zip::ZipArchive;

use crate::cache;
use crate::config::Config;
use crate::error::{AtmExpError, AtmExpResult};
use crate::selection::SelectionLevel;
use crate::COL;

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/119.0";

/// Extensions of the geometry files read from an extracted archive, by preference. A `.shp`
/// is read together with the `.shx` and `.dbf` next to it.
const SUPPORTED_EXTENSIONS: [&str; 4] = ["shp", "fgb", "geojson", "json"];

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
pub enum Resolution {
    #[strum(serialize = "10m")]
    #[serde(rename = "10m")]
    Large,
    #[default]
    #[strum(serialize = "50m")]
    #[serde(rename = "50m")]
    Medium,
    #[strum(serialize = "110m")]
    #[serde(rename = "110m")]
    Small,
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MapCategory {
    #[default]
    Cultural,
    Physical,
    Raster,
}

/// Identifies one cached geometry collection.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShapefileCacheKey {
    pub resolution: Resolution,
    pub map_category: MapCategory,
    pub info_type: String,
    pub depth: u8,
    pub instance: String,
}

impl Default for ShapefileCacheKey {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            map_category: MapCategory::default(),
            info_type: "admin".to_string(),
            depth: 0,
            instance: "map_subunits".to_string(),
        }
    }
}

impl ShapefileCacheKey {
    /// Archive and directory name. Physical maps have no depth or instance.
    pub fn name(&self) -> String {
        match self.map_category {
            MapCategory::Physical => format!("ne_{}_{}", self.resolution, self.info_type),
            _ => format!(
                "ne_{}_{}_{}_{}",
                self.resolution, self.info_type, self.depth, self.instance
            ),
        }
    }

    pub fn url(&self, base_url: &str) -> String {
        format!(
            "{}/{}/{}/{}.zip",
            base_url.trim_end_matches('/'),
            self.resolution,
            self.map_category,
            self.name()
        )
    }

    pub fn relative_dir(&self) -> PathBuf {
        PathBuf::from(self.resolution.to_string())
            .join(self.map_category.to_string())
            .join(self.name())
    }
}

pub fn cache_key(
    resolution: Resolution,
    map_category: MapCategory,
    info_type: &str,
    depth: u8,
) -> ShapefileCacheKey {
    ShapefileCacheKey {
        resolution,
        map_category,
        info_type: info_type.to_string(),
        depth,
        ..ShapefileCacheKey::default()
    }
}

/// Remote collaborator serving compressed geometry archives.
pub trait ArchiveSource: std::fmt::Debug {
    fn fetch_archive(&self, url: &str) -> anyhow::Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct HttpArchiveSource {
    client: reqwest::blocking::Client,
}

impl HttpArchiveSource {
    pub fn new(timeout: Duration) -> AtmExpResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(anyhow::Error::from)?;
        Ok(Self { client })
    }
}

impl ArchiveSource for HttpArchiveSource {
    fn fetch_archive(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        info!("fetching {url}");
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("failed to request {url}"))?
            .error_for_status()?;
        Ok(response.bytes()?.to_vec())
    }
}

fn unavailable(key: &ShapefileCacheKey, error: impl std::fmt::Display) -> AtmExpError {
    AtmExpError::ShapefileUnavailable(format!("{}: {error}", key.name()))
}

/// Geometry file anywhere below `dir`, if any. Archives often wrap their files in a folder.
fn geometry_file(dir: &Path) -> Option<PathBuf> {
    SUPPORTED_EXTENSIONS.iter().find_map(|ext| {
        cache::list_entries_recursive(dir, ext)
            .ok()?
            .into_iter()
            .next()
            .map(|entry| entry.path().to_path_buf())
    })
}

#[derive(Debug, Clone)]
pub struct ShapefileCache {
    root: PathBuf,
    base_url: String,
    source: Arc<dyn ArchiveSource>,
}

impl ShapefileCache {
    pub fn new(root: impl Into<PathBuf>, base_url: &str, source: Arc<dyn ArchiveSource>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.to_string(),
            source,
        }
    }

    pub fn from_config(config: &Config) -> AtmExpResult<Self> {
        let source = HttpArchiveSource::new(Duration::from_secs(config.timeout_secs))?;
        Ok(Self::new(
            &config.shapefile_dir,
            &config.shapefile_base_url,
            Arc::new(source),
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache_dir(&self, key: &ShapefileCacheKey) -> PathBuf {
        self.root.join(key.relative_dir())
    }

    pub fn is_cached(&self, key: &ShapefileCacheKey) -> bool {
        self.find_cache(key).is_some()
    }

    /// Directory of the cached collection, if present and holding a geometry file.
    pub fn find_cache(&self, key: &ShapefileCacheKey) -> Option<PathBuf> {
        let dir = self.cache_dir(key);
        geometry_file(&dir).map(|_| dir)
    }

    /// Fetches and extracts the archive unless already cached. The archive is extracted next to
    /// its final directory and renamed into place.
    pub fn download(&self, key: &ShapefileCacheKey) -> AtmExpResult<PathBuf> {
        if let Some(dir) = self.find_cache(key) {
            debug!("{} already cached in {}", key.name(), dir.display());
            return Ok(dir);
        }
        let url = key.url(&self.base_url);
        let bytes = self
            .source
            .fetch_archive(&url)
            .map_err(|e| unavailable(key, format!("{e:#}")))?;

        let target = self.cache_dir(key);
        let parent = target
            .parent()
            .ok_or_else(|| unavailable(key, "cache directory has no parent"))?;
        fs::create_dir_all(parent)?;
        let scratch = tempfile::tempdir_in(parent)?;
        let mut archive =
            ZipArchive::new(Cursor::new(bytes)).map_err(|e| unavailable(key, e))?;
        archive
            .extract(scratch.path())
            .map_err(|e| unavailable(key, e))?;
        if geometry_file(scratch.path()).is_none() {
            return Err(unavailable(
                key,
                format!("archive holds none of {SUPPORTED_EXTENSIONS:?}"),
            ));
        }

        // Leftovers of an earlier cache without a geometry file
        cache::remove_dir_if_exists(&target)?;
        let extracted = scratch.into_path();
        if let Err(e) = fs::rename(&extracted, &target) {
            cache::remove_dir_if_exists(&extracted)?;
            return Err(e.into());
        }
        info!("cached {} in {}", key.name(), target.display());
        Ok(target)
    }

    /// Removes one cached collection, or all of them.
    pub fn clear_cache(&self, key: Option<&ShapefileCacheKey>) -> AtmExpResult<()> {
        match key {
            Some(key) => cache::remove_dir_if_exists(&self.cache_dir(key)),
            None => cache::remove_dir_if_exists(&self.root),
        }
    }

    /// Directories of every cached collection, sorted.
    pub fn list_cached(&self) -> AtmExpResult<Vec<PathBuf>> {
        let mut dirs = vec![];
        let mut pending = vec![(self.root.clone(), 0)];
        while let Some((dir, depth)) = pending.pop() {
            let read_dir = match fs::read_dir(&dir) {
                Ok(read_dir) => read_dir,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for entry in read_dir {
                let path = entry?.path();
                let hidden = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'));
                if !path.is_dir() || hidden {
                    continue;
                }
                if depth == 2 {
                    if geometry_file(&path).is_some() {
                        dirs.push(path);
                    }
                } else {
                    pending.push((path, depth + 1));
                }
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Loads the collection, downloading it first when needed.
    pub fn get_as_dataframe(&self, key: &ShapefileCacheKey) -> AtmExpResult<DataFrame> {
        let dir = self.download(key)?;
        let path = geometry_file(&dir).ok_or_else(|| unavailable(key, "no geometry file"))?;
        read_geometry_file(&path)
    }
}

/// Reads an ESRI shapefile, FlatGeobuf or GeoJSON file into one string column per property
/// plus a WKT geometry column.
pub fn read_geometry_file(path: &Path) -> AtmExpResult<DataFrame> {
    debug!("reading geometries from {}", path.display());
    let (properties, geometries) = match path.extension().and_then(|e| e.to_str()) {
        Some("shp") => read_shp(path)?,
        Some("fgb") => read_fgb(path)?,
        _ => read_geojson(path)?,
    };
    properties_frame(properties, geometries)
}

type Features = (Vec<BTreeMap<String, String>>, Vec<String>);

/// Text of a dBASE attribute. Dates and empty values are left out.
fn field_text(value: FieldValue) -> Option<String> {
    match value {
        FieldValue::Character(text) => text,
        FieldValue::Memo(text) => Some(text),
        FieldValue::Numeric(number) => number.map(|n| n.to_string()),
        FieldValue::Float(number) => number.map(|n| n.to_string()),
        FieldValue::Double(number) => Some(number.to_string()),
        FieldValue::Integer(number) => Some(number.to_string()),
        FieldValue::Logical(flag) => flag.map(|b| b.to_string()),
        _ => None,
    }
}

fn read_shp(path: &Path) -> AtmExpResult<Features> {
    let mut reader = ::shapefile::Reader::from_path(path).map_err(anyhow::Error::from)?;
    let mut properties = vec![];
    let mut geometries = vec![];
    for shape_record in reader.iter_shapes_and_records() {
        let (shape, record) = shape_record.map_err(anyhow::Error::from)?;
        let geometry = match Geometry::<f64>::try_from(shape) {
            Ok(geometry) => geometry,
            Err(e) => {
                warn!("skipping shape: {e:?}");
                continue;
            }
        };
        geometries.push(geometry.wkt_string());
        properties.push(
            record
                .into_iter()
                .filter_map(|(name, value)| Some((name, field_text(value)?)))
                .collect(),
        );
    }
    Ok((properties, geometries))
}

fn read_fgb(path: &Path) -> AtmExpResult<Features> {
    use ::geozero::ToWkt;
    use flatgeobuf::*;

    let mut reader = BufReader::new(File::open(path)?);
    let mut fgb = FgbReader::open(&mut reader)
        .and_then(|fgb| fgb.select_all())
        .map_err(anyhow::Error::from)?;
    let mut properties = vec![];
    let mut geometries = vec![];
    while let Some(feature) = fgb.next().map_err(anyhow::Error::from)? {
        properties.push(
            feature
                .properties()
                .map_err(anyhow::Error::from)?
                .into_iter()
                .collect(),
        );
        geometries.push(feature.to_wkt().map_err(anyhow::Error::from)?);
    }
    Ok((properties, geometries))
}

fn read_geojson(path: &Path) -> AtmExpResult<Features> {
    let geojson: GeoJson = fs::read_to_string(path)?
        .parse()
        .map_err(anyhow::Error::from)?;
    let collection = geojson::FeatureCollection::try_from(geojson).map_err(anyhow::Error::from)?;
    let mut properties = vec![];
    let mut geometries = vec![];
    for feature in collection.features {
        let Some(geometry) = feature.geometry else {
            warn!("skipping feature without geometry");
            continue;
        };
        let geometry: Geometry<f64> = geometry.try_into().map_err(anyhow::Error::from)?;
        geometries.push(geometry.wkt_string());
        properties.push(
            feature
                .properties
                .unwrap_or_default()
                .into_iter()
                .map(|(k, v)| match v {
                    serde_json::Value::String(s) => (k, s),
                    other => (k, other.to_string()),
                })
                .collect(),
        );
    }
    Ok((properties, geometries))
}

fn properties_frame(
    properties: Vec<BTreeMap<String, String>>,
    geometries: Vec<String>,
) -> AtmExpResult<DataFrame> {
    let names: BTreeSet<&String> = properties.iter().flat_map(|p| p.keys()).collect();
    let mut columns: Vec<Series> = names
        .into_iter()
        .filter(|name| name.as_str() != COL::GEOMETRY)
        .map(|name| {
            let values: Vec<Option<&str>> = properties
                .iter()
                .map(|p| p.get(name).map(String::as_str))
                .collect();
            Series::new(name, values)
        })
        .collect();
    columns.push(Series::new(COL::GEOMETRY, geometries));
    Ok(DataFrame::new(columns)?)
}

/// Values of a string column; nulls become empty strings.
pub fn string_column(df: &DataFrame, name: &str) -> AtmExpResult<Vec<String>> {
    Ok(df
        .column(name)?
        .str()?
        .into_iter()
        .map(|v| v.unwrap_or_default().to_string())
        .collect())
}

/// Parses polygonal WKT; other geometry types are rejected.
pub fn wkt_to_multipolygon(wkt: &str) -> AtmExpResult<MultiPolygon<f64>> {
    let geometry = Geometry::<f64>::try_from_wkt_str(wkt)
        .map_err(|e| AtmExpError::InvalidArray(format!("invalid WKT geometry: {e}")))?;
    match geometry {
        Geometry::Polygon(polygon) => Ok(MultiPolygon::new(vec![polygon])),
        Geometry::MultiPolygon(multi) => Ok(multi),
        Geometry::Rect(rect) => Ok(MultiPolygon::new(vec![rect.to_polygon()])),
        other => Err(AtmExpError::InvalidArray(format!(
            "expected a polygon, found {other:?}"
        ))),
    }
}

pub fn multipolygon_to_wkt(geometry: &MultiPolygon<f64>) -> String {
    geometry.wkt_string()
}

/// Labelled polygons of a collection, in row order.
pub fn shapes_from_frame(
    df: &DataFrame,
    label_column: &str,
) -> AtmExpResult<Vec<(String, MultiPolygon<f64>)>> {
    let labels = string_column(df, label_column)?;
    let geometries = string_column(df, COL::GEOMETRY)?;
    labels
        .into_iter()
        .zip(geometries)
        .map(|(label, wkt)| Ok((label, wkt_to_multipolygon(&wkt)?)))
        .collect()
}

fn union_all(geometries: Vec<MultiPolygon<f64>>) -> MultiPolygon<f64> {
    let mut geometries = geometries.into_iter();
    let first = geometries.next().unwrap_or_else(|| MultiPolygon::new(vec![]));
    geometries.fold(first, |acc, geometry| acc.union(&geometry))
}

/// Groups rows by `column` and unions each group's geometries. Output rows are sorted by
/// label and hold `column`, `label`, the geometry, and every other column constant within all
/// groups. Single-member groups keep their geometry unchanged.
pub fn dissolve_by_column(df: &DataFrame, column: &str) -> AtmExpResult<DataFrame> {
    let keys = string_column(df, column)?;
    let shapes = shapes_from_frame(df, column)?;
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (row, key) in keys.iter().enumerate() {
        groups.entry(key.clone()).or_default().push(row);
    }
    debug!("dissolving {} rows into {} groups by {column}", df.height(), groups.len());

    let mut carried: Vec<Series> = vec![];
    for name in df.get_column_names() {
        if name == column || name == COL::GEOMETRY || name == COL::LABEL {
            continue;
        }
        let Ok(values) = string_column(df, name) else {
            continue;
        };
        let constant = groups
            .values()
            .all(|rows| rows.iter().all(|&r| values[r] == values[rows[0]]));
        if constant {
            let column_values: Vec<String> =
                groups.values().map(|rows| values[rows[0]].clone()).collect();
            carried.push(Series::new(name, column_values));
        }
    }

    let labels: Vec<String> = groups.keys().cloned().collect();
    let geometries: Vec<String> = groups
        .values()
        .map(|rows| {
            let members: Vec<MultiPolygon<f64>> =
                rows.iter().map(|&r| shapes[r].1.clone()).collect();
            multipolygon_to_wkt(&union_all(members))
        })
        .collect();
    let mut columns = vec![
        Series::new(column, labels.clone()),
        Series::new(COL::LABEL, labels),
    ];
    columns.extend(carried);
    columns.push(Series::new(COL::GEOMETRY, geometries));
    Ok(DataFrame::new(columns)?)
}

/// Dissolves a sub-unit collection to `level`. Organizations are formed from their member
/// sub-units; generic selections have no grouping column.
pub fn dissolve_shapefile_level(df: &DataFrame, level: SelectionLevel) -> AtmExpResult<DataFrame> {
    if level == SelectionLevel::Organizations {
        let subunits = string_column(df, COL::SUBUNIT)?;
        let shapes = shapes_from_frame(df, COL::SUBUNIT)?;
        let mut labels = vec![];
        let mut geometries = vec![];
        for (organization, members) in crate::selection::organizations() {
            let group: Vec<MultiPolygon<f64>> = subunits
                .iter()
                .zip(&shapes)
                .filter(|(subunit, _)| members.iter().any(|m| *m == subunit.as_str()))
                .map(|(_, (_, geometry))| geometry.clone())
                .collect();
            if group.is_empty() {
                continue;
            }
            labels.push(organization.to_string());
            geometries.push(multipolygon_to_wkt(&union_all(group)));
        }
        return Ok(DataFrame::new(vec![
            Series::new(COL::LABEL, labels),
            Series::new(COL::GEOMETRY, geometries),
        ])?);
    }
    let column = level.column().ok_or_else(|| {
        AtmExpError::InvalidSelection(format!("level '{level}' has no grouping column"))
    })?;
    dissolve_by_column(df, column)
}
