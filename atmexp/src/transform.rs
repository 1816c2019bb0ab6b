//! Array transformations applied between reading a dataset and plotting it.

use std::collections::BTreeSet;

use enum_dispatch::enum_dispatch;
use geo::{Intersects, MultiPolygon, Rect};
use itertools::Itertools;
use log::debug;
use ndarray::{ArrayD, Axis, Dimension, IxDyn};
use polars::prelude::DataFrame;
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::array::{Coord, DataArray, Dataset};
use crate::error::{AtmExpError, AtmExpResult};
use crate::shapefile::shapes_from_frame;
use crate::COL;

/// Two-sided confidence level of `confidence_interval`.
pub const CONFIDENCE_LEVEL: f64 = 0.95;

#[enum_dispatch]
pub trait Transform {
    fn transform(&self, array: DataArray) -> AtmExpResult<DataArray>;
}

#[enum_dispatch(Transform)]
#[derive(Debug, Clone)]
pub enum ArrayTransform {
    ShiftLongitude(ShiftLongitude),
    SplitTime(SplitTime),
    ConfidenceInterval(ConfidenceInterval),
    ClipShapes(ClipShapes),
}

#[derive(Debug, Clone, Default)]
pub struct ShiftLongitude;

impl Transform for ShiftLongitude {
    fn transform(&self, array: DataArray) -> AtmExpResult<DataArray> {
        shifting_long(&array)
    }
}

#[derive(Debug, Clone)]
pub struct SplitTime {
    pub time_dim: String,
}

impl Default for SplitTime {
    fn default() -> Self {
        Self {
            time_dim: COL::TIME.to_string(),
        }
    }
}

impl Transform for SplitTime {
    fn transform(&self, array: DataArray) -> AtmExpResult<DataArray> {
        split_time_dim(&array, &self.time_dim)
    }
}

#[derive(Debug, Clone)]
pub struct ConfidenceInterval {
    pub sample_dim: String,
}

impl Transform for ConfidenceInterval {
    fn transform(&self, array: DataArray) -> AtmExpResult<DataArray> {
        confidence_interval(&array, &self.sample_dim)
    }
}

#[derive(Debug, Clone)]
pub struct ClipShapes {
    pub shapes: DataFrame,
}

impl Transform for ClipShapes {
    fn transform(&self, array: DataArray) -> AtmExpResult<DataArray> {
        clip_and_concat_shapes(&array, &self.shapes)
    }
}

/// Transforms applied in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    transforms: Vec<ArrayTransform>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, transform: impl Into<ArrayTransform>) -> Self {
        self.transforms.push(transform.into());
        self
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn apply(&self, array: DataArray) -> AtmExpResult<DataArray> {
        self.transforms
            .iter()
            .try_fold(array, |array, transform| transform.transform(array))
    }

    pub fn apply_dataset(&self, dataset: Dataset) -> AtmExpResult<Dataset> {
        dataset.into_arrays().map(|array| self.apply(array)).collect()
    }
}

/// Extent of every cell, halfway to its neighbours.
fn cell_bounds(centres: &[f64]) -> Vec<(f64, f64)> {
    let n = centres.len();
    (0..n)
        .map(|i| {
            let before = if i > 0 {
                (centres[i - 1] + centres[i]) / 2.0
            } else if n > 1 {
                centres[0] - (centres[1] - centres[0]) / 2.0
            } else {
                centres[0]
            };
            let after = if i + 1 < n {
                (centres[i] + centres[i + 1]) / 2.0
            } else if n > 1 {
                centres[i] + (centres[i] - centres[i - 1]) / 2.0
            } else {
                centres[i]
            };
            (before.min(after), before.max(after))
        })
        .collect()
}

fn float_coord<'a>(array: &'a DataArray, dim: &str) -> AtmExpResult<&'a [f64]> {
    array.coord(dim)?.as_float().ok_or_else(|| {
        AtmExpError::InvalidArray(format!("'{}': dimension '{dim}' is not numeric", array.name()))
    })
}

fn normalise_longitude(longitude: f64) -> f64 {
    (longitude + 180.0).rem_euclid(360.0) - 180.0
}

/// Clips the array to each shape of `shapes_df` (`label` and WKT `geometry` columns) and stacks
/// the results along a new leading `shape` dimension. A cell belongs to a shape when its
/// rectangle touches the geometry. Latitude and longitude are cut to the cells touched by any
/// shape; shapes touching no cell give an all-`NaN` slice.
pub fn clip_and_concat_shapes(array: &DataArray, shapes_df: &DataFrame) -> AtmExpResult<DataArray> {
    let shapes = shapes_from_frame(shapes_df, COL::LABEL)?;
    if shapes.is_empty() {
        return Err(AtmExpError::InvalidSelection("no shapes to clip to".into()));
    }
    let lat_axis = array.axis(COL::LATITUDE)?;
    let lon_axis = array.axis(COL::LONGITUDE)?;
    let lat_bounds = cell_bounds(float_coord(array, COL::LATITUDE)?);
    let lon_bounds: Vec<(f64, f64)> = cell_bounds(float_coord(array, COL::LONGITUDE)?)
        .into_iter()
        .map(|(west, east)| {
            let width = east - west;
            let west = normalise_longitude(west);
            (west, west + width)
        })
        .collect();

    let masks: Vec<Vec<Vec<bool>>> = shapes
        .iter()
        .map(|(_, geometry)| touched_cells(geometry, &lat_bounds, &lon_bounds))
        .collect();
    let touched = |axis_of: fn(usize, usize) -> usize| -> BTreeSet<usize> {
        masks
            .iter()
            .flat_map(|mask| {
                mask.iter().enumerate().flat_map(move |(i, row)| {
                    row.iter()
                        .enumerate()
                        .filter(|(_, hit)| **hit)
                        .map(move |(j, _)| axis_of(i, j))
                })
            })
            .collect()
    };
    let lat_touched = touched(|i, _| i);
    let lon_touched = touched(|_, j| j);
    let (lat_keep, lon_keep): (Vec<usize>, Vec<usize>) = match (
        lat_touched.first().zip(lat_touched.last()),
        lon_touched.first().zip(lon_touched.last()),
    ) {
        (Some((lat_lo, lat_hi)), Some((lon_lo, lon_hi))) => (
            (*lat_lo..=*lat_hi).collect(),
            (*lon_lo..=*lon_hi).collect(),
        ),
        _ => (
            (0..lat_bounds.len()).collect(),
            (0..lon_bounds.len()).collect(),
        ),
    };
    let window = array
        .select(COL::LATITUDE, &lat_keep)?
        .select(COL::LONGITUDE, &lon_keep)?;

    let mut slices = Vec::with_capacity(shapes.len());
    for ((label, _), mask) in shapes.iter().zip(&masks) {
        let mut values = window.values().clone();
        for (index, value) in values.indexed_iter_mut() {
            let i = lat_keep[index[lat_axis]];
            let j = lon_keep[index[lon_axis]];
            if !mask[i][j] {
                *value = f64::NAN;
            }
        }
        let hits = mask.iter().flatten().filter(|hit| **hit).count();
        debug!("shape '{label}' touches {hits} cells of '{}'", array.name());
        slices.push(window.clone().with_values(values)?);
    }
    let labels = shapes.into_iter().map(|(label, _)| label).collect();
    DataArray::stack(COL::SHAPE, Coord::Label(labels), &slices)
}

fn touched_cells(
    geometry: &MultiPolygon<f64>,
    lat_bounds: &[(f64, f64)],
    lon_bounds: &[(f64, f64)],
) -> Vec<Vec<bool>> {
    lat_bounds
        .iter()
        .map(|(south, north)| {
            lon_bounds
                .iter()
                .map(|(west, east)| {
                    let cell = Rect::new((*west, *south), (*east, *north));
                    geometry.intersects(&cell)
                })
                .collect()
        })
        .collect()
}

/// Mean with a two-sided Student-t interval; `NaN` samples are ignored.
fn mean_interval(samples: impl Iterator<Item = f64>) -> (f64, f64, f64) {
    let samples: Vec<f64> = samples.filter(|v| !v.is_nan()).collect();
    let n = samples.len() as f64;
    if samples.is_empty() {
        return (f64::NAN, f64::NAN, f64::NAN);
    }
    let mean = samples.iter().sum::<f64>() / n;
    if samples.len() < 2 {
        return (f64::NAN, mean, f64::NAN);
    }
    let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let quantile = StudentsT::new(0.0, 1.0, n - 1.0)
        .map(|t| t.inverse_cdf(1.0 - (1.0 - CONFIDENCE_LEVEL) / 2.0))
        .unwrap_or(f64::NAN);
    let half_width = quantile * (variance / n).sqrt();
    (mean - half_width, mean, mean + half_width)
}

/// Reduces over `sample_dim`, which is replaced by a leading `ci` dimension labelled
/// `lower`, `mean` and `upper`.
pub fn confidence_interval(array: &DataArray, sample_dim: &str) -> AtmExpResult<DataArray> {
    let axis = array.axis(sample_dim)?;
    let stats = array
        .values()
        .map_axis(Axis(axis), |lane| mean_interval(lane.iter().copied()));
    let mut dims = array.dims().to_vec();
    dims.remove(axis);
    let mut coords = array.coords().to_vec();
    coords.remove(axis);
    let part = |pick: fn(&(f64, f64, f64)) -> f64| {
        DataArray::new(array.name(), dims.clone(), coords.clone(), stats.map(pick))
    };
    let parts = [part(|s| s.0)?, part(|s| s.1)?, part(|s| s.2)?];
    let labels = [COL::CI_LOWER, COL::CI_MEAN, COL::CI_UPPER]
        .map(String::from)
        .to_vec();
    Ok(DataArray::stack(COL::CI, Coord::Label(labels), &parts)?.with_attrs(array.attrs().clone()))
}

/// Remaps longitudes to `[-180, 180)` and sorts them ascending, moving the values along.
pub fn shifting_long(array: &DataArray) -> AtmExpResult<DataArray> {
    let shifted: Vec<f64> = float_coord(array, COL::LONGITUDE)?
        .iter()
        .map(|lon| normalise_longitude(*lon))
        .collect();
    let order: Vec<usize> = (0..shifted.len())
        .sorted_by(|a, b| shifted[*a].total_cmp(&shifted[*b]))
        .collect();
    let sorted = order.iter().map(|i| shifted[*i]).collect();
    array
        .select(COL::LONGITUDE, &order)?
        .with_coord(COL::LONGITUDE, Coord::Float(sorted))
}

/// Replaces the date-time axis `time_dim` with a `dates` and a `times` axis. Combinations
/// absent from the input are `NaN`.
pub fn split_time_dim(array: &DataArray, time_dim: &str) -> AtmExpResult<DataArray> {
    let axis = array.axis(time_dim)?;
    let timestamps = array.coord(time_dim)?.as_datetime().ok_or_else(|| {
        AtmExpError::InvalidArray(format!("'{}': '{time_dim}' is not a date-time axis", array.name()))
    })?;
    let increasing = timestamps.windows(2).all(|w| w[0] < w[1]);
    let decreasing = timestamps.windows(2).all(|w| w[0] > w[1]);
    if !increasing && !decreasing {
        return Err(AtmExpError::UnsortedTimeAxis(format!(
            "'{}' along '{time_dim}'",
            array.name()
        )));
    }
    let dates: Vec<_> = timestamps.iter().map(|t| t.date()).sorted().dedup().collect();
    let times: Vec<_> = timestamps.iter().map(|t| t.time()).sorted().dedup().collect();
    let positions: Vec<(usize, usize)> = timestamps
        .iter()
        .map(|t| {
            let d = dates.partition_point(|d| *d < t.date());
            let h = times.partition_point(|h| *h < t.time());
            (d, h)
        })
        .collect();

    let mut shape = array.values().shape().to_vec();
    shape.splice(axis..=axis, [dates.len(), times.len()]);
    let mut values = ArrayD::from_elem(IxDyn(&shape), f64::NAN);
    for (index, value) in array.values().indexed_iter() {
        let mut target: Vec<usize> = index.slice().to_vec();
        let (d, h) = positions[target[axis]];
        target.splice(axis..=axis, [d, h]);
        values[IxDyn(&target)] = *value;
    }

    let mut dims = array.dims().to_vec();
    dims.splice(axis..=axis, [COL::DATES.to_string(), COL::TIMES.to_string()]);
    let mut coords = array.coords().to_vec();
    coords.splice(axis..=axis, [Coord::Date(dates), Coord::Time(times)]);
    Ok(DataArray::new(array.name(), dims, coords, values)?.with_attrs(array.attrs().clone()))
}
