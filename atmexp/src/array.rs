//! Labeled multi-dimensional arrays: the unit of data flowing from the dataset backends through
//! the transformations.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use ndarray::{ArrayD, Axis, Dimension};
use polars::{frame::DataFrame, prelude::NamedFrom, series::Series};

use crate::error::{AtmExpError, AtmExpResult};
use crate::COL;

pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// Coordinate values along one dimension.
#[derive(Debug, Clone, PartialEq)]
pub enum Coord {
    Float(Vec<f64>),
    DateTime(Vec<NaiveDateTime>),
    Date(Vec<NaiveDate>),
    Time(Vec<NaiveTime>),
    Label(Vec<String>),
}

impl Coord {
    pub fn len(&self) -> usize {
        match self {
            Coord::Float(v) => v.len(),
            Coord::DateTime(v) => v.len(),
            Coord::Date(v) => v.len(),
            Coord::Time(v) => v.len(),
            Coord::Label(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Coordinate values at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Coord {
        fn pick<T: Clone>(values: &[T], indices: &[usize]) -> Vec<T> {
            indices.iter().map(|&i| values[i].clone()).collect()
        }
        match self {
            Coord::Float(v) => Coord::Float(pick(v, indices)),
            Coord::DateTime(v) => Coord::DateTime(pick(v, indices)),
            Coord::Date(v) => Coord::Date(pick(v, indices)),
            Coord::Time(v) => Coord::Time(pick(v, indices)),
            Coord::Label(v) => Coord::Label(pick(v, indices)),
        }
    }

    pub fn as_float(&self) -> Option<&[f64]> {
        match self {
            Coord::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<&[NaiveDateTime]> {
        match self {
            Coord::DateTime(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_labels(&self) -> Option<&[String]> {
        match self {
            Coord::Label(v) => Some(v),
            _ => None,
        }
    }

    fn to_series(&self, name: &str) -> Series {
        match self {
            Coord::Float(v) => Series::new(name, v),
            Coord::DateTime(v) => Series::new(
                name,
                v.iter()
                    .map(|t| t.format(DATETIME_FORMAT).to_string())
                    .collect::<Vec<_>>(),
            ),
            Coord::Date(v) => Series::new(
                name,
                v.iter()
                    .map(|d| d.format(DATE_FORMAT).to_string())
                    .collect::<Vec<_>>(),
            ),
            Coord::Time(v) => Series::new(
                name,
                v.iter()
                    .map(|t| t.format(TIME_FORMAT).to_string())
                    .collect::<Vec<_>>(),
            ),
            Coord::Label(v) => Series::new(name, v),
        }
    }
}

/// A named n-dimensional array of `f64` with one coordinate vector per dimension.
/// Missing values are `NaN`.
#[derive(Debug, Clone, PartialEq)]
pub struct DataArray {
    name: String,
    dims: Vec<String>,
    coords: Vec<Coord>,
    values: ArrayD<f64>,
    attrs: BTreeMap<String, String>,
}

impl DataArray {
    pub fn new(
        name: impl Into<String>,
        dims: Vec<String>,
        coords: Vec<Coord>,
        values: ArrayD<f64>,
    ) -> AtmExpResult<Self> {
        let name = name.into();
        if dims.len() != coords.len() || dims.len() != values.ndim() {
            return Err(AtmExpError::InvalidArray(format!(
                "'{name}' has {} dims, {} coords and {} axes",
                dims.len(),
                coords.len(),
                values.ndim()
            )));
        }
        for (i, (dim, coord)) in dims.iter().zip(&coords).enumerate() {
            if dims[..i].contains(dim) {
                return Err(AtmExpError::InvalidArray(format!(
                    "'{name}' repeats dimension '{dim}'"
                )));
            }
            if coord.len() != values.shape()[i] {
                return Err(AtmExpError::InvalidArray(format!(
                    "'{name}': dimension '{dim}' has {} coordinates for {} values",
                    coord.len(),
                    values.shape()[i]
                )));
            }
        }
        Ok(Self {
            name,
            dims,
            coords,
            values,
            attrs: BTreeMap::new(),
        })
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn with_attrs(mut self, attrs: BTreeMap<String, String>) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn coords(&self) -> &[Coord] {
        &self.coords
    }

    pub fn values(&self) -> &ArrayD<f64> {
        &self.values
    }

    pub fn into_values(self) -> ArrayD<f64> {
        self.values
    }

    pub fn attrs(&self) -> &BTreeMap<String, String> {
        &self.attrs
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    pub fn units(&self) -> Option<&str> {
        self.attr(COL::UNITS)
    }

    pub fn axis(&self, dim: &str) -> AtmExpResult<usize> {
        self.dims.iter().position(|d| d == dim).ok_or_else(|| {
            AtmExpError::InvalidArray(format!("'{}' has no dimension '{dim}'", self.name))
        })
    }

    pub fn coord(&self, dim: &str) -> AtmExpResult<&Coord> {
        Ok(&self.coords[self.axis(dim)?])
    }

    /// Replaces the values, keeping dims, coords and attributes. The shape must not change.
    pub fn with_values(mut self, values: ArrayD<f64>) -> AtmExpResult<Self> {
        if values.shape() != self.values.shape() {
            return Err(AtmExpError::InvalidArray(format!(
                "'{}': shape {:?} does not match {:?}",
                self.name,
                values.shape(),
                self.values.shape()
            )));
        }
        self.values = values;
        Ok(self)
    }

    /// Relabels `dim`. The new coordinate must have the same length.
    pub fn with_coord(mut self, dim: &str, coord: Coord) -> AtmExpResult<Self> {
        let axis = self.axis(dim)?;
        if coord.len() != self.coords[axis].len() {
            return Err(AtmExpError::InvalidArray(format!(
                "'{}': {} coordinates for dimension '{dim}' of length {}",
                self.name,
                coord.len(),
                self.coords[axis].len()
            )));
        }
        self.coords[axis] = coord;
        Ok(self)
    }

    /// Keeps the entries at `indices` along `dim`, in that order.
    pub fn select(&self, dim: &str, indices: &[usize]) -> AtmExpResult<Self> {
        let axis = self.axis(dim)?;
        let mut coords = self.coords.clone();
        coords[axis] = coords[axis].select(indices);
        Ok(Self {
            name: self.name.clone(),
            dims: self.dims.clone(),
            coords,
            values: self.values.select(Axis(axis), indices),
            attrs: self.attrs.clone(),
        })
    }

    /// Prepends a length-one label dimension.
    pub fn expand_dims(mut self, dim: &str, label: &str) -> AtmExpResult<Self> {
        if self.dims.iter().any(|d| d == dim) {
            return Err(AtmExpError::InvalidArray(format!(
                "'{}' already has dimension '{dim}'",
                self.name
            )));
        }
        self.values = self.values.insert_axis(Axis(0));
        self.dims.insert(0, dim.to_string());
        self.coords.insert(0, Coord::Label(vec![label.to_string()]));
        Ok(self)
    }

    /// Stacks arrays sharing dims and coords along a new leading dimension.
    pub fn stack(dim: &str, coord: Coord, arrays: &[DataArray]) -> AtmExpResult<Self> {
        let first = arrays
            .first()
            .ok_or_else(|| AtmExpError::InvalidArray("nothing to stack".into()))?;
        if coord.len() != arrays.len() {
            return Err(AtmExpError::InvalidArray(format!(
                "{} coordinates for {} stacked arrays",
                coord.len(),
                arrays.len()
            )));
        }
        if let Some(other) = arrays
            .iter()
            .find(|a| a.dims != first.dims || a.coords != first.coords)
        {
            return Err(AtmExpError::InvalidArray(format!(
                "'{}' is not aligned with '{}'",
                other.name, first.name
            )));
        }
        let views: Vec<_> = arrays.iter().map(|a| a.values.view()).collect();
        let values = ndarray::stack(Axis(0), &views)
            .map_err(|e| AtmExpError::InvalidArray(e.to_string()))?;
        let mut dims = vec![dim.to_string()];
        dims.extend(first.dims.iter().cloned());
        let mut coords = vec![coord];
        coords.extend(first.coords.iter().cloned());
        Ok(Self::new(first.name.clone(), dims, coords, values)?.with_attrs(first.attrs.clone()))
    }

    /// Tidy long-form rendering: one column per dimension plus a value column named after the
    /// array.
    pub fn to_frame(&self) -> AtmExpResult<DataFrame> {
        let n = self.values.len();
        let mut indices: Vec<Vec<usize>> = vec![Vec::with_capacity(n); self.dims.len()];
        let mut values = Vec::with_capacity(n);
        for (index, value) in self.values.indexed_iter() {
            for (axis, i) in index.slice().iter().enumerate() {
                indices[axis].push(*i);
            }
            values.push(*value);
        }
        let mut columns: Vec<Series> = self
            .dims
            .iter()
            .zip(&self.coords)
            .zip(&indices)
            .map(|((dim, coord), idx)| coord.select(idx).to_series(dim))
            .collect();
        columns.push(Series::new(&self.name, values));
        Ok(DataFrame::new(columns)?)
    }
}

/// Named collection of arrays, as returned by a dataset read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    arrays: BTreeMap<String, DataArray>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, array: DataArray) {
        self.arrays.insert(array.name().to_string(), array);
    }

    pub fn get(&self, name: &str) -> Option<&DataArray> {
        self.arrays.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.arrays.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    pub fn arrays(&self) -> impl Iterator<Item = &DataArray> {
        self.arrays.values()
    }

    pub fn into_arrays(self) -> impl Iterator<Item = DataArray> {
        self.arrays.into_values()
    }

    /// Tidy frame with one value column per array. All arrays must share dims and coords.
    pub fn to_frame(&self) -> AtmExpResult<DataFrame> {
        let mut arrays = self.arrays.values();
        let Some(first) = arrays.next() else {
            return Ok(DataFrame::empty());
        };
        let mut df = first.to_frame()?;
        for array in arrays {
            if array.dims != first.dims || array.coords != first.coords {
                return Err(AtmExpError::InvalidArray(format!(
                    "'{}' is not aligned with '{}'",
                    array.name, first.name
                )));
            }
            let values: Vec<f64> = array.values.iter().copied().collect();
            df.with_column(Series::new(&array.name, values))?;
        }
        Ok(df)
    }
}

impl FromIterator<DataArray> for Dataset {
    fn from_iter<T: IntoIterator<Item = DataArray>>(iter: T) -> Self {
        let mut dataset = Dataset::new();
        for array in iter {
            dataset.insert(array);
        }
        dataset
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{array, ArrayD, IxDyn};

    use super::*;

    fn grid() -> DataArray {
        DataArray::new(
            "go3",
            vec![COL::LATITUDE.into(), COL::LONGITUDE.into()],
            vec![
                Coord::Float(vec![10.0, 20.0]),
                Coord::Float(vec![0.0, 1.0, 2.0]),
            ],
            array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]].into_dyn(),
        )
        .unwrap()
    }

    #[test]
    fn mismatched_coords_should_be_rejected() {
        let result = DataArray::new(
            "go3",
            vec![COL::LATITUDE.into()],
            vec![Coord::Float(vec![1.0])],
            ArrayD::zeros(IxDyn(&[2])),
        );
        assert!(matches!(result, Err(AtmExpError::InvalidArray(_))));
        let result = DataArray::new(
            "go3",
            vec![COL::LATITUDE.into(), COL::LATITUDE.into()],
            vec![Coord::Float(vec![1.0]), Coord::Float(vec![1.0])],
            ArrayD::zeros(IxDyn(&[1, 1])),
        );
        assert!(matches!(result, Err(AtmExpError::InvalidArray(_))));
    }

    #[test]
    fn select_should_reorder_values_and_coords() {
        let selected = grid().select(COL::LONGITUDE, &[2, 0]).unwrap();
        assert_eq!(
            selected.coord(COL::LONGITUDE).unwrap(),
            &Coord::Float(vec![2.0, 0.0])
        );
        assert_eq!(selected.values(), &array![[3.0, 1.0], [6.0, 4.0]].into_dyn());
    }

    #[test]
    fn stack_should_add_leading_dimension() {
        let a = grid();
        let b = grid().with_values(a.values() * 2.0).unwrap();
        let stacked = DataArray::stack(
            COL::SHAPE,
            Coord::Label(vec!["a".into(), "b".into()]),
            &[a, b],
        )
        .unwrap();
        assert_eq!(stacked.dims()[0], COL::SHAPE);
        assert_eq!(stacked.values().shape(), &[2, 2, 3]);
        assert_eq!(stacked.values()[[1, 1, 2]], 12.0);
    }

    #[test]
    fn frame_should_be_tidy() {
        let df = grid().with_attr(COL::UNITS, "DU").to_frame().unwrap();
        assert_eq!(df.shape(), (6, 3));
        let values: Vec<Option<f64>> = df.column("go3").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(values[4], Some(5.0));
        let lon: Vec<Option<f64>> = df
            .column(COL::LONGITUDE)
            .unwrap()
            .f64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(lon, vec![Some(0.0), Some(1.0), Some(2.0), Some(0.0), Some(1.0), Some(2.0)]);
    }

    #[test]
    fn dataset_frame_should_hold_one_column_per_array() {
        let dataset: Dataset = [grid(), grid().renamed("tcno2")].into_iter().collect();
        let df = dataset.to_frame().unwrap();
        assert_eq!(df.width(), 4);
        assert_eq!(dataset.names(), vec!["go3", "tcno2"]);
    }
}
