//! Conversion between the tidy parquet cache files and labeled arrays.
//!
//! A cache file holds one row per grid cell: the coordinate columns (`time`, an optional level
//! column, `latitude`, `longitude`) followed by one `f64` column per variable code. Several files
//! are merged by taking the union of the coordinate values along every dimension; cells that no
//! file provides are `NaN`.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, warn};
use ndarray::{ArrayD, IxDyn};
use polars::prelude::*;

use crate::array::{Coord, DataArray, DATETIME_FORMAT, DATE_FORMAT};
use crate::error::{AtmExpError, AtmExpResult};
use crate::COL;

pub fn read_parquet(path: &Path) -> AtmExpResult<DataFrame> {
    let file = File::open(path)?;
    Ok(ParquetReader::new(file).finish()?)
}

pub fn write_parquet(df: &mut DataFrame, writer: impl Write) -> AtmExpResult<()> {
    ParquetWriter::new(writer).finish(df)?;
    Ok(())
}

/// Parquet bytes of `df`, the payload shape returned by the dataset API.
pub fn parquet_bytes(df: &mut DataFrame) -> AtmExpResult<Vec<u8>> {
    let mut buffer: Vec<u8> = vec![];
    write_parquet(df, &mut buffer)?;
    Ok(buffer)
}

#[derive(Debug, Clone, Copy)]
struct OrdF64(f64);

impl PartialEq for OrdF64 {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrdF64 {}

impl PartialOrd for OrdF64 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdF64 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum CoordKey {
    Float(OrdF64),
    DateTime(NaiveDateTime),
}

pub fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, DATETIME_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn column_keys(df: &DataFrame, dim: &str) -> AtmExpResult<Vec<CoordKey>> {
    let column = df.column(dim)?;
    if dim == COL::TIME {
        column
            .str()?
            .into_iter()
            .map(|value| {
                value.and_then(parse_datetime).map(CoordKey::DateTime).ok_or_else(|| {
                    AtmExpError::InvalidArray(format!("unparseable time value {value:?}"))
                })
            })
            .collect()
    } else {
        let column = column.cast(&DataType::Float64)?;
        column
            .f64()?
            .into_iter()
            .map(|value| {
                value.map(|v| CoordKey::Float(OrdF64(v))).ok_or_else(|| {
                    AtmExpError::InvalidArray(format!("missing coordinate in column '{dim}'"))
                })
            })
            .collect()
    }
}

/// Accumulates tidy frames into aligned arrays, one per variable code.
#[derive(Debug)]
pub struct GridBuilder {
    dims: Vec<String>,
    coords: Vec<BTreeSet<CoordKey>>,
    cells: BTreeMap<String, Vec<(Vec<CoordKey>, f64)>>,
}

impl GridBuilder {
    pub fn new(dims: Vec<String>) -> Self {
        let coords = vec![BTreeSet::new(); dims.len()];
        Self {
            dims,
            coords,
            cells: BTreeMap::new(),
        }
    }

    /// Adds the rows of `df` for every code in `codes` present as a column. `fixed_time` is
    /// used as the time coordinate when the frame has no time column. Returns the codes found.
    pub fn add_frame(
        &mut self,
        df: &DataFrame,
        codes: &[String],
        fixed_time: Option<NaiveDateTime>,
    ) -> AtmExpResult<Vec<String>> {
        let columns = df.get_column_names();
        let mut keys_per_dim = Vec::with_capacity(self.dims.len());
        for dim in &self.dims {
            let keys = if columns.iter().any(|c| *c == dim.as_str()) {
                column_keys(df, dim)?
            } else if let (true, Some(time)) = (dim == COL::TIME, fixed_time) {
                vec![CoordKey::DateTime(time); df.height()]
            } else {
                return Err(AtmExpError::InvalidArray(format!(
                    "cache file has no coordinate column '{dim}'"
                )));
            };
            keys_per_dim.push(keys);
        }

        let mut found = vec![];
        for code in codes {
            if !columns.iter().any(|c| *c == code.as_str()) {
                continue;
            }
            let column = df.column(code)?.cast(&DataType::Float64)?;
            let cells = self.cells.entry(code.clone()).or_default();
            for (row, value) in column.f64()?.into_iter().enumerate() {
                let index: Vec<CoordKey> =
                    keys_per_dim.iter().map(|keys| keys[row].clone()).collect();
                cells.push((index, value.unwrap_or(f64::NAN)));
            }
            found.push(code.clone());
        }
        for (coords, keys) in self.coords.iter_mut().zip(keys_per_dim) {
            coords.extend(keys);
        }
        debug!("added {} rows for codes {found:?}", df.height());
        Ok(found)
    }

    /// Arrays named after their code, in code order.
    pub fn build(self) -> AtmExpResult<Vec<DataArray>> {
        let shape: Vec<usize> = self.coords.iter().map(BTreeSet::len).collect();
        let positions: Vec<BTreeMap<&CoordKey, usize>> = self
            .coords
            .iter()
            .map(|keys| keys.iter().enumerate().map(|(i, k)| (k, i)).collect())
            .collect();
        let coords: Vec<Coord> = self
            .coords
            .iter()
            .zip(&self.dims)
            .map(|(keys, dim)| to_coord(keys, dim))
            .collect::<AtmExpResult<_>>()?;

        let mut arrays = vec![];
        for (code, cells) in &self.cells {
            let mut values = ArrayD::from_elem(IxDyn(&shape), f64::NAN);
            for (index, value) in cells {
                let idx: Vec<usize> = index
                    .iter()
                    .zip(&positions)
                    .map(|(key, position)| position[key])
                    .collect();
                if !values[IxDyn(&idx)].is_nan() && !value.is_nan() {
                    warn!("duplicate cell {idx:?} for '{code}', keeping the last value");
                }
                values[IxDyn(&idx)] = *value;
            }
            arrays.push(DataArray::new(
                code.clone(),
                self.dims.clone(),
                coords.clone(),
                values,
            )?);
        }
        Ok(arrays)
    }
}

fn to_coord(keys: &BTreeSet<CoordKey>, dim: &str) -> AtmExpResult<Coord> {
    if dim == COL::TIME {
        keys.iter()
            .map(|key| match key {
                CoordKey::DateTime(t) => Ok(*t),
                CoordKey::Float(_) => Err(AtmExpError::InvalidArray(format!(
                    "numeric coordinate in '{dim}'"
                ))),
            })
            .collect::<AtmExpResult<_>>()
            .map(Coord::DateTime)
    } else {
        keys.iter()
            .map(|key| match key {
                CoordKey::Float(v) => Ok(v.0),
                CoordKey::DateTime(_) => Err(AtmExpError::InvalidArray(format!(
                    "time coordinate in '{dim}'"
                ))),
            })
            .collect::<AtmExpResult<_>>()
            .map(Coord::Float)
    }
}
