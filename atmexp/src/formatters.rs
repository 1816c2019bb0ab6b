//! Writers for the tabular outputs: tidy array frames and geometry collections.

use std::io::Write;

use enum_dispatch::enum_dispatch;
use geo::Geometry;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use wkt::TryFromWkt;

use crate::error::{AtmExpError, AtmExpResult};
use crate::COL;

/// JSON rendering of a cell. Missing and non-finite numbers become `null`.
fn any_value_to_json(value: &AnyValue) -> AtmExpResult<Value> {
    let number = |n: f64| if n.is_finite() { json!(n) } else { Value::Null };
    match value {
        AnyValue::Null => Ok(Value::Null),
        AnyValue::Boolean(b) => Ok(Value::Bool(*b)),
        AnyValue::String(s) => Ok(Value::String((*s).to_string())),
        AnyValue::Int32(n) => Ok(json!(*n)),
        AnyValue::Int64(n) => Ok(json!(*n)),
        AnyValue::UInt32(n) => Ok(json!(*n)),
        AnyValue::UInt64(n) => Ok(json!(*n)),
        AnyValue::Float32(n) => Ok(number(f64::from(*n))),
        AnyValue::Float64(n) => Ok(number(*n)),
        other => Err(AtmExpError::InvalidArray(format!(
            "cannot render {} as JSON",
            other.dtype()
        ))),
    }
}

#[enum_dispatch]
pub trait OutputGenerator {
    fn save(&self, writer: &mut impl Write, df: &mut DataFrame) -> AtmExpResult<()>;

    fn format(&self, df: &mut DataFrame) -> AtmExpResult<String> {
        let mut buffer: Vec<u8> = vec![];
        self.save(&mut buffer, df)?;
        String::from_utf8(buffer).map_err(|e| AtmExpError::InvalidArray(e.to_string()))
    }
}

#[enum_dispatch(OutputGenerator)]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum OutputFormatter {
    Csv(CsvFormatter),
    GeoJson(GeoJsonFormatter),
    GeoJsonSeq(GeoJsonSeqFormatter),
}

/// Plain CSV; geometries, when present, stay WKT strings.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CsvFormatter;

impl OutputGenerator for CsvFormatter {
    fn save(&self, writer: &mut impl Write, df: &mut DataFrame) -> AtmExpResult<()> {
        CsvWriter::new(writer).finish(df)?;
        Ok(())
    }
}

/// Features of a frame with a WKT `geometry` column; other columns become properties.
fn features(df: &DataFrame) -> AtmExpResult<Vec<geojson::Feature>> {
    let geometry_col = df.column(COL::GEOMETRY)?;
    let other_cols = df.drop(COL::GEOMETRY)?;
    let mut features = vec![];
    for (idx, wkt) in geometry_col.str()?.into_iter().enumerate() {
        let Some(wkt) = wkt else {
            continue;
        };
        let geometry = Geometry::<f64>::try_from_wkt_str(wkt)
            .map_err(|e| AtmExpError::InvalidArray(format!("invalid WKT geometry: {e}")))?;
        let mut properties = serde_json::Map::new();
        for col in other_cols.get_columns() {
            properties.insert(col.name().to_string(), any_value_to_json(&col.get(idx)?)?);
        }
        features.push(geojson::Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::from(&geometry)),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        });
    }
    Ok(features)
}

/// One GeoJSON feature collection.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct GeoJsonFormatter;

impl OutputGenerator for GeoJsonFormatter {
    fn save(&self, writer: &mut impl Write, df: &mut DataFrame) -> AtmExpResult<()> {
        let collection = geojson::FeatureCollection {
            bbox: None,
            features: features(df)?,
            foreign_members: None,
        };
        writer.write_all(collection.to_string().as_bytes())?;
        Ok(())
    }
}

/// One GeoJSON feature per line.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct GeoJsonSeqFormatter;

impl OutputGenerator for GeoJsonSeqFormatter {
    fn save(&self, writer: &mut impl Write, df: &mut DataFrame) -> AtmExpResult<()> {
        for feature in features(df)? {
            writeln!(writer, "{feature}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shapes() -> DataFrame {
        df!(
            COL::LABEL => ["France", "Germany"],
            "mean" => [1.5, f64::NAN],
            COL::GEOMETRY => [
                "POLYGON((0 45,1 45,1 46,0 46,0 45))",
                "MULTIPOLYGON(((2 45,3 45,3 46,2 46,2 45)))"
            ]
        )
        .unwrap()
    }

    #[test]
    fn csv_should_keep_every_column() {
        let output = OutputFormatter::from(CsvFormatter)
            .format(&mut shapes())
            .unwrap();
        let mut lines = output.lines();
        assert_eq!(lines.next(), Some("label,mean,geometry"));
        assert!(lines.next().unwrap().starts_with("France,1.5,"));
        assert_eq!(lines.count(), 1);
    }

    #[test]
    fn geojson_should_hold_one_feature_per_row() {
        let output = GeoJsonFormatter.format(&mut shapes()).unwrap();
        let value: Value = serde_json::from_str(&output).unwrap();
        let features = value["features"].as_array().unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0]["properties"]["label"], json!("France"));
        assert_eq!(features[0]["geometry"]["type"], json!("Polygon"));
        assert_eq!(features[1]["properties"]["mean"], Value::Null);
        assert_eq!(features[1]["geometry"]["type"], json!("MultiPolygon"));
    }

    #[test]
    fn geojson_seq_should_write_lines() {
        let output = GeoJsonSeqFormatter.format(&mut shapes()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        let feature: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(feature["properties"]["label"], json!("Germany"));
    }

    #[test]
    fn missing_geometry_column_should_fail() {
        let mut df = df!(COL::LABEL => ["France"]).unwrap();
        assert!(GeoJsonFormatter.format(&mut df).is_err());
    }
}
