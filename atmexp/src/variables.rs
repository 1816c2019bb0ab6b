//! Static variable tables: for every dataset, the mapping from the variable names used in
//! requests to the code stored in the files, the stored unit and an optional conversion.

use std::collections::BTreeMap;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::array::DataArray;
use crate::error::{AtmExpError, AtmExpResult};
use crate::expression::Formula;
use crate::COL;

/// Tables shipped with the crate.
pub const BUILTIN_VARIABLES: &str = include_str!("../config/variables.toml");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversion {
    pub formula: Formula,
    pub convert_unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    /// Code of the variable inside the dataset files.
    pub var_name: String,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion: Option<Conversion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub time_aggregations: Vec<String>,
}

impl VariableSpec {
    /// Unit of the values once `convert` has been applied.
    pub fn target_unit(&self) -> &str {
        self.conversion
            .as_ref()
            .map(|c| c.convert_unit.as_str())
            .unwrap_or(&self.unit)
    }
}

/// Variable tables for every dataset, keyed by dataset id then variable name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableConfig(BTreeMap<String, BTreeMap<String, VariableSpec>>);

impl VariableConfig {
    /// Parses the tables shipped with the crate.
    pub fn builtin() -> AtmExpResult<Self> {
        Self::from_toml_str(BUILTIN_VARIABLES)
    }

    pub fn from_toml_str(contents: &str) -> AtmExpResult<Self> {
        let config: Self = toml::from_str(contents)?;
        debug!(
            "loaded variable tables for datasets: {:?}",
            config.0.keys().collect::<Vec<_>>()
        );
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> AtmExpResult<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn datasets(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Every variable of `dataset_id`, ordered by name.
    pub fn variables(&self, dataset_id: &str) -> impl Iterator<Item = (&str, &VariableSpec)> {
        self.0
            .get(dataset_id)
            .into_iter()
            .flat_map(|table| table.iter().map(|(name, spec)| (name.as_str(), spec)))
    }

    pub fn resolve(&self, dataset_id: &str, variable_name: &str) -> AtmExpResult<&VariableSpec> {
        self.0
            .get(dataset_id)
            .and_then(|table| table.get(variable_name))
            .ok_or_else(|| AtmExpError::UnknownVariable {
                dataset: dataset_id.to_string(),
                variable: variable_name.to_string(),
            })
    }

    /// Reverse lookup from the code found in a file.
    pub fn find_by_code(&self, dataset_id: &str, code: &str) -> Option<(&str, &VariableSpec)> {
        self.variables(dataset_id)
            .find(|(_, spec)| spec.var_name == code)
    }
}

/// Applies the variable's conversion and sets the `units` attribute to the resulting unit. Arrays
/// whose variable has no conversion keep their values and get the declared unit.
pub fn convert(array: DataArray, spec: &VariableSpec) -> AtmExpResult<DataArray> {
    let array = match &spec.conversion {
        Some(conversion) => {
            debug!(
                "converting '{}' from {} to {} with '{}'",
                array.name(),
                spec.unit,
                conversion.convert_unit,
                conversion.formula
            );
            let values = conversion.formula.eval_array(array.values());
            array.with_values(values)?
        }
        None => array,
    };
    Ok(array.with_attr(COL::UNITS, spec.target_unit()))
}
