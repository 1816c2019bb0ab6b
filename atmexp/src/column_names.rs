//! This module stores the column and dimension names shared by the cache files, the geometry
//! collections and the analysis arrays. Note that the cache file names must stay synchronised
//! with the files already on disk!

// Coordinates of the tidy cache files and of the arrays read from them
pub const TIME: &str = "time";
pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";
pub const PRESSURE_LEVEL: &str = "pressure_level";
pub const MODEL_LEVEL: &str = "model_level";

// Dimensions added by the GHG backend
pub const INPUT_OBSERVATIONS: &str = "input_observations";
pub const TIME_AGGREGATION: &str = "time_aggregation";

// Dimensions added by transformations
pub const SHAPE: &str = "shape";
pub const CI: &str = "ci";
pub const CI_LOWER: &str = "lower";
pub const CI_MEAN: &str = "mean";
pub const CI_UPPER: &str = "upper";
pub const DATES: &str = "dates";
pub const TIMES: &str = "times";

// Geometry collections
pub const LABEL: &str = "label";
pub const GEOMETRY: &str = "geometry";
pub const CONTINENT: &str = "CONTINENT";
pub const ADMIN: &str = "ADMIN";
pub const SUBUNIT: &str = "SUBUNIT";

// Array attributes
pub const UNITS: &str = "units";
pub const VARIABLE_CODE: &str = "code";
