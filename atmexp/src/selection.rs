//! Geographic selections: named administrative entities at some level, or one arbitrary
//! drawn shape.

use std::collections::BTreeSet;

use geo::{Area, BooleanOps, MultiPolygon};
use log::{debug, warn};
use nonempty::NonEmpty;
use polars::{frame::DataFrame, prelude::NamedFrom, series::Series};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumIter, EnumString};

use crate::error::{AtmExpError, AtmExpResult};
use crate::shapefile::{
    dissolve_shapefile_level, multipolygon_to_wkt, shapes_from_frame, string_column,
};
use crate::COL;

/// Label of a generic shape selection.
pub const GENERIC_SHAPE_LABEL: &str = "generic shape";

/// Overlaps smaller than this (in square degrees) are treated as shared borders.
const AREA_TOLERANCE: f64 = 1e-9;

const EUROPEAN_UNION: &[&str] = &[
    "Austria",
    "Flemish Region",
    "Walloon Region",
    "Brussels Capital Region",
    "Bulgaria",
    "Croatia",
    "Cyprus",
    "Czechia",
    "Denmark",
    "Estonia",
    "Finland",
    "Aland",
    "France",
    "Corsica",
    "Germany",
    "Greece",
    "Hungary",
    "Ireland",
    "Italy",
    "Sicily",
    "Sardinia",
    "Latvia",
    "Lithuania",
    "Luxembourg",
    "Malta",
    "Netherlands",
    "Poland",
    "Portugal",
    "Azores",
    "Madeira",
    "Romania",
    "Slovakia",
    "Slovenia",
    "Spain",
    "Canary Is.",
    "Sweden",
];

const EEA_ONLY: &[&str] = &["Iceland", "Liechtenstein", "Norway"];

/// Organizations and their member sub-units, ordered by name.
pub fn organizations() -> Vec<(&'static str, Vec<&'static str>)> {
    vec![
        ("EEA", [EUROPEAN_UNION, EEA_ONLY].concat()),
        ("European Union (27)", EUROPEAN_UNION.to_vec()),
    ]
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SelectionLevel {
    Generic,
    Continents,
    Organizations,
    #[default]
    Countries,
    CountriesSub,
}

impl SelectionLevel {
    /// Attribute column of a sub-unit collection grouping entities at this level.
    pub fn column(&self) -> Option<&'static str> {
        match self {
            SelectionLevel::Continents => Some(COL::CONTINENT),
            SelectionLevel::Countries => Some(COL::ADMIN),
            SelectionLevel::CountriesSub => Some(COL::SUBUNIT),
            SelectionLevel::Organizations | SelectionLevel::Generic => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Shape {
    pub label: String,
    pub geometry: MultiPolygon<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EntitySelection {
    level: SelectionLevel,
    shapes: NonEmpty<Shape>,
}

impl EntitySelection {
    pub fn level(&self) -> SelectionLevel {
        self.level
    }

    pub fn shapes(&self) -> impl Iterator<Item = &Shape> {
        self.shapes.iter()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GenericShapeSelection {
    shape: Shape,
}

impl GenericShapeSelection {
    pub fn shape(&self) -> &Shape {
        &self.shape
    }
}

/// A chosen geographic extent. Entity and generic selections always hold at least one shape.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Selection {
    #[default]
    Empty,
    Entities(EntitySelection),
    Generic(GenericShapeSelection),
}

/// Labels at `level` of every row of a sub-unit collection: the grouping column's value, or the
/// organizations listing the sub-unit.
fn level_labels(subunits: &DataFrame, level: SelectionLevel) -> AtmExpResult<Vec<Vec<String>>> {
    if level == SelectionLevel::Organizations {
        let organizations = organizations();
        return Ok(string_column(subunits, COL::SUBUNIT)?
            .iter()
            .map(|subunit| {
                organizations
                    .iter()
                    .filter(|(_, members)| members.contains(&subunit.as_str()))
                    .map(|(name, _)| name.to_string())
                    .collect()
            })
            .collect());
    }
    let column = level.column().ok_or_else(|| {
        AtmExpError::InvalidSelection(format!("level '{level}' has no grouping column"))
    })?;
    Ok(string_column(subunits, column)?
        .into_iter()
        .map(|label| vec![label])
        .collect())
}

fn overlaps(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> bool {
    a.intersection(b).unsigned_area() > AREA_TOLERANCE
}

fn union_all<'a>(geometries: impl Iterator<Item = &'a MultiPolygon<f64>>) -> MultiPolygon<f64> {
    geometries.fold(MultiPolygon::new(vec![]), |acc, g| acc.union(g))
}

impl Selection {
    /// Entities of `reference` named in `names`, in the order given. Unknown and repeated names
    /// are dropped. `reference` is a collection dissolved at `level`.
    pub fn from_entities_list<S: AsRef<str>>(
        names: &[S],
        level: SelectionLevel,
        reference: &DataFrame,
    ) -> AtmExpResult<Selection> {
        if level == SelectionLevel::Generic {
            return Err(AtmExpError::InvalidSelection(
                "entities cannot be selected at the generic level".into(),
            ));
        }
        let available = shapes_from_frame(reference, COL::LABEL)?;
        let mut shapes: Vec<Shape> = vec![];
        for name in names {
            let name = name.as_ref();
            if shapes.iter().any(|s| s.label == name) {
                continue;
            }
            match available.iter().find(|(label, _)| label == name) {
                Some((label, geometry)) => shapes.push(Shape {
                    label: label.clone(),
                    geometry: geometry.clone(),
                }),
                None => warn!("dropping unknown {level} entity '{name}'"),
            }
        }
        Ok(Self::entities(shapes, level))
    }

    fn entities(shapes: Vec<Shape>, level: SelectionLevel) -> Selection {
        match NonEmpty::from_vec(shapes) {
            Some(shapes) => Selection::Entities(EntitySelection { level, shapes }),
            None => Selection::Empty,
        }
    }

    pub fn from_entity_selection(other: &EntitySelection) -> Selection {
        Selection::Entities(other.clone())
    }

    /// Entities of `reference` overlapping the drawn shape, in reference order.
    pub fn from_generic_selection(
        generic: &GenericShapeSelection,
        level: SelectionLevel,
        reference: &DataFrame,
    ) -> AtmExpResult<Selection> {
        let shapes = shapes_from_frame(reference, COL::LABEL)?
            .into_iter()
            .filter(|(_, geometry)| overlaps(geometry, &generic.shape.geometry))
            .map(|(label, geometry)| Shape { label, geometry })
            .collect();
        Ok(Self::entities(shapes, level))
    }

    pub fn from_shape(geometry: MultiPolygon<f64>) -> Selection {
        if geometry.0.is_empty() {
            return Selection::Empty;
        }
        Selection::Generic(GenericShapeSelection {
            shape: Shape {
                label: GENERIC_SHAPE_LABEL.to_string(),
                geometry,
            },
        })
    }

    /// Re-derives the selection at `level` from the sub-unit collection `subunits`. Entities
    /// are mapped through the collection's attributes: every sub-unit belonging to a selected
    /// entity contributes its entity at `level`. Drawn shapes pick the entities they overlap and
    /// the generic level merges everything into one shape.
    pub fn convert_selection(
        &self,
        level: SelectionLevel,
        subunits: &DataFrame,
    ) -> AtmExpResult<Selection> {
        match self {
            Selection::Empty => Ok(Selection::Empty),
            Selection::Generic(_) if level == SelectionLevel::Generic => Ok(self.clone()),
            Selection::Generic(generic) => Self::from_generic_selection(
                generic,
                level,
                &dissolve_shapefile_level(subunits, level)?,
            ),
            Selection::Entities(entities) if level == SelectionLevel::Generic => Ok(
                Self::from_shape(union_all(entities.shapes().map(|s| &s.geometry))),
            ),
            Selection::Entities(entities) if level == entities.level => Ok(self.clone()),
            Selection::Entities(entities) => {
                let selected: BTreeSet<&str> = entities.shapes().map(|s| s.label.as_str()).collect();
                let from = level_labels(subunits, entities.level)?;
                let to = level_labels(subunits, level)?;
                let targets: BTreeSet<String> = from
                    .iter()
                    .zip(to)
                    .filter(|(from, _)| from.iter().any(|label| selected.contains(label.as_str())))
                    .flat_map(|(_, to)| to)
                    .collect();
                debug!(
                    "{} {} entities map to {} {level} entities",
                    selected.len(),
                    entities.level,
                    targets.len()
                );
                let names: Vec<String> = targets.into_iter().collect();
                Self::from_entities_list(&names, level, &dissolve_shapefile_level(subunits, level)?)
            }
        }
    }

    pub fn empty(&self) -> bool {
        matches!(self, Selection::Empty)
    }

    pub fn level(&self) -> Option<SelectionLevel> {
        match self {
            Selection::Empty => None,
            Selection::Entities(entities) => Some(entities.level),
            Selection::Generic(_) => Some(SelectionLevel::Generic),
        }
    }

    pub fn shapes(&self) -> Vec<&Shape> {
        match self {
            Selection::Empty => vec![],
            Selection::Entities(entities) => entities.shapes().collect(),
            Selection::Generic(generic) => vec![&generic.shape],
        }
    }

    pub fn labels(&self) -> Vec<String> {
        self.shapes().iter().map(|s| s.label.clone()).collect()
    }

    /// `label` and WKT `geometry` columns, one row per shape.
    pub fn to_dataframe(&self) -> AtmExpResult<DataFrame> {
        let shapes = self.shapes();
        let labels: Vec<&str> = shapes.iter().map(|s| s.label.as_str()).collect();
        let geometries: Vec<String> = shapes
            .iter()
            .map(|s| multipolygon_to_wkt(&s.geometry))
            .collect();
        Ok(DataFrame::new(vec![
            Series::new(COL::LABEL, labels),
            Series::new(COL::GEOMETRY, geometries),
        ])?)
    }

    /// Label of the last drawing of a map event, if it has one.
    pub fn get_event_label(event: &Value) -> Option<String> {
        event
            .pointer("/last_active_drawing/properties/label")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Maps a map event to a selection: a labelled drawing is an entity at `level`, an
    /// unlabelled polygon is a generic shape. Anything else is empty.
    pub fn from_out_event(event: &Value, level: SelectionLevel, reference: &DataFrame) -> Selection {
        if let Some(label) = Self::get_event_label(event) {
            return Self::from_entities_list(&[label], level, reference).unwrap_or_else(|e| {
                debug!("ignoring map event: {e}");
                Selection::Empty
            });
        }
        let geometry = event
            .pointer("/last_active_drawing/geometry")
            .cloned()
            .and_then(|value| geojson::Geometry::from_json_value(value).ok())
            .and_then(|geometry| geo::Geometry::<f64>::try_from(geometry).ok());
        match geometry {
            Some(geo::Geometry::Polygon(polygon)) => {
                Self::from_shape(MultiPolygon::new(vec![polygon]))
            }
            Some(geo::Geometry::MultiPolygon(multi)) => Self::from_shape(multi),
            _ => Selection::Empty,
        }
    }

    pub fn from_out_event_str(event: &str, level: SelectionLevel, reference: &DataFrame) -> Selection {
        match serde_json::from_str::<Value>(event) {
            Ok(event) => Self::from_out_event(&event, level, reference),
            Err(e) => {
                debug!("ignoring unparseable map event: {e}");
                Selection::Empty
            }
        }
    }
}
