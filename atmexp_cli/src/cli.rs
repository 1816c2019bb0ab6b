use std::fs::File;
use std::path::Path;

use anyhow::Context;
use atmexp::{
    config::Config,
    dataset::{
        Area, DatasetBackend, DatasetInterface, DateRange, Eac4Request, Gas, GhgRequest,
        InputObservations, Quantity, TimeAggregation,
    },
    expression,
    formatters::{
        CsvFormatter, GeoJsonFormatter, GeoJsonSeqFormatter, OutputFormatter, OutputGenerator,
    },
    selection::{Selection, SelectionLevel},
    shapefile::{self, MapCategory, Resolution, ShapefileCacheKey},
    transform::{ClipShapes, ConfidenceInterval, Pipeline, ShiftLongitude, SplitTime},
    AtmExp,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use enum_dispatch::enum_dispatch;
use log::{debug, info};
use polars::frame::DataFrame;
use serde::{Deserialize, Serialize};
use spinners::{Spinner, Spinners};
use strum_macros::EnumString;

use crate::display::{
    display_cache_entries, display_selection, display_shapefiles, display_variables,
};
use crate::error::AtmExpCliResult;

const DEFAULT_PROGRESS_SPINNER: Spinners = Spinners::Dots;
const COMPLETE_PROGRESS_STRING: &str = "✔";
const RUNNING_TAIL_STRING: &str = "...";

/// Defines the output formats we are able to produce data in.
#[derive(Clone, Debug, Deserialize, Serialize, EnumString, PartialEq, Eq)]
#[strum(ascii_case_insensitive)]
pub enum OutputFormat {
    GeoJSON,
    GeoJSONSeq,
    Csv,
}

impl From<&OutputFormat> for OutputFormatter {
    fn from(value: &OutputFormat) -> Self {
        match value {
            OutputFormat::GeoJSON => GeoJsonFormatter.into(),
            OutputFormat::GeoJSONSeq => GeoJsonSeqFormatter.into(),
            OutputFormat::Csv => CsvFormatter.into(),
        }
    }
}

fn write_output<T, U>(
    output_generator: T,
    mut data: DataFrame,
    output_file: Option<U>,
) -> AtmExpCliResult<()>
where
    T: OutputGenerator,
    U: AsRef<Path>,
{
    if let Some(output_file) = output_file {
        let mut f = File::create(output_file).context("Failed to write output")?;
        output_generator.save(&mut f, &mut data)?;
    } else {
        let mut stdout_lock = std::io::stdout().lock();
        output_generator.save(&mut stdout_lock, &mut data)?;
    };
    Ok(())
}

fn start_spinner(quiet: bool, message: &str) -> Option<Spinner> {
    (!quiet).then(|| {
        Spinner::with_timer(
            DEFAULT_PROGRESS_SPINNER,
            message.to_string() + RUNNING_TAIL_STRING,
        )
    })
}

fn stop_spinner(sp: Option<Spinner>) {
    if let Some(mut s) = sp {
        s.stop_with_symbol(COMPLETE_PROGRESS_STRING);
    }
}

/// Trait that defines what to run when a given subcommand is invoked.
#[enum_dispatch]
pub trait RunCommand {
    fn run(&self, config: Config) -> AtmExpCliResult<()>;
}

/// What to do with the files of a dataset request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum DatasetAction {
    /// Download the files of the request unless already cached
    Download,
    /// Read the cached files and write them as CSV
    Read,
    /// List the cached files of the request
    List,
    /// Delete the cached files of the request
    Clear,
}

/// Options of the `read` action. Transformations run in the order listed here.
#[derive(Args, Debug, Clone)]
struct ReadArgs {
    #[arg(short = 'o', long, help = "Output file to place the results")]
    output_file: Option<String>,
    #[arg(long, help = "Shift longitudes from [0, 360) to [-180, 180)")]
    shift_longitude: bool,
    #[arg(
        long,
        value_delimiter = ',',
        help = "Clip to the given entities, e.g. `France,Germany`"
    )]
    clip: Vec<String>,
    #[arg(
        long,
        default_value = "countries",
        help = "Level of the entities given to --clip"
    )]
    level: SelectionLevel,
    #[arg(
        long,
        value_name = "DIM",
        help = "Reduce DIM to the 95% confidence interval of its mean"
    )]
    confidence_interval: Option<String>,
    #[arg(long, help = "Split the time axis into dates and times")]
    split_time: bool,
}

impl ReadArgs {
    fn pipeline(&self, atmexp: &AtmExp) -> AtmExpCliResult<Pipeline> {
        let mut pipeline = Pipeline::new();
        if self.shift_longitude {
            pipeline = pipeline.then(ShiftLongitude);
        }
        if !self.clip.is_empty() {
            let selection = atmexp.select_entities(&self.clip, self.level)?;
            pipeline = pipeline.then(ClipShapes {
                shapes: selection.to_dataframe()?,
            });
        }
        if let Some(sample_dim) = &self.confidence_interval {
            pipeline = pipeline.then(ConfidenceInterval {
                sample_dim: sample_dim.clone(),
            });
        }
        if self.split_time {
            pipeline = pipeline.then(SplitTime::default());
        }
        Ok(pipeline)
    }
}

fn run_dataset_action(
    atmexp: &AtmExp,
    backend: DatasetBackend,
    action: DatasetAction,
    read_args: &ReadArgs,
    quiet: bool,
) -> AtmExpCliResult<()> {
    let name = backend.dataset_identity().name;
    match action {
        DatasetAction::Download if backend.is_cached()? => {
            info!("{name} request already cached");
            display_cache_entries(&backend.list_cached_files()?)?;
        }
        DatasetAction::Download => {
            let sp = start_spinner(quiet, &format!("Downloading {name}"));
            let entries = backend.download()?;
            stop_spinner(sp);
            display_cache_entries(&entries)?;
        }
        DatasetAction::Read => {
            let pipeline = read_args.pipeline(atmexp)?;
            let sp = start_spinner(quiet, &format!("Reading {name}"));
            let dataset = pipeline.apply_dataset(backend.read_dataset()?)?;
            stop_spinner(sp);
            info!("read variables: {:?}", dataset.names());
            write_output(
                CsvFormatter,
                dataset.to_frame()?,
                read_args.output_file.as_deref(),
            )?;
        }
        DatasetAction::List => display_cache_entries(&backend.list_cached_files()?)?,
        DatasetAction::Clear => {
            let entries = backend.list_cached_files()?;
            backend.clear_cached_files()?;
            println!("Removed {} cached files", entries.len());
        }
    }
    Ok(())
}

#[derive(Args, Debug, Clone)]
struct Eac4RequestArgs {
    #[arg(
        short = 'v',
        long = "variables",
        value_delimiter = ',',
        required = true,
        help = "Variables to request, e.g. `total_column_ozone`"
    )]
    variables: Vec<String>,
    #[arg(
        short = 'd',
        long = "dates",
        help = "Inclusive dates range, e.g. `2021-01-01/2021-01-31`"
    )]
    dates: DateRange,
    #[arg(
        short = 't',
        long = "times",
        value_delimiter = ',',
        help = "Times of day as HH:MM (default 00:00)"
    )]
    times: Vec<String>,
    #[arg(
        short = 'a',
        long,
        allow_hyphen_values = true,
        help = "Area as `north,west,south,east` (default global)"
    )]
    area: Option<Area>,
    #[arg(long, value_delimiter = ',', conflicts_with = "model_level")]
    pressure_level: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    model_level: Vec<String>,
    #[arg(long, help = "Download and store one file per calendar month")]
    split_by_month: bool,
}

impl From<&Eac4RequestArgs> for Eac4Request {
    fn from(args: &Eac4RequestArgs) -> Self {
        let mut request = Eac4Request::new(args.variables.clone(), args.dates)
            .split_by_month(args.split_by_month);
        if !args.times.is_empty() {
            request = request.with_time_values(args.times.clone());
        }
        if let Some(area) = args.area {
            request = request.with_area(area);
        }
        if !args.pressure_level.is_empty() {
            request = request.with_pressure_level(args.pressure_level.clone());
        }
        if !args.model_level.is_empty() {
            request = request.with_model_level(args.model_level.clone());
        }
        request
    }
}

/// The `eac4` command works on the global reanalysis dataset.
#[derive(Args, Debug)]
pub struct Eac4Command {
    #[arg(value_enum)]
    action: DatasetAction,
    #[command(flatten)]
    request_args: Eac4RequestArgs,
    #[command(flatten)]
    read_args: ReadArgs,
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for Eac4Command {
    fn run(&self, config: Config) -> AtmExpCliResult<()> {
        info!("Running `eac4` subcommand");
        debug!("{:#?}", self);
        let atmexp = AtmExp::new_with_config(config)?;
        let backend = atmexp.eac4((&self.request_args).into())?;
        run_dataset_action(&atmexp, backend, self.action, &self.read_args, self.quiet)
    }
}

#[derive(Args, Debug, Clone)]
struct GhgRequestArgs {
    #[arg(short = 'g', long, help = "carbon_dioxide, methane or nitrous_oxide")]
    gas: Gas,
    #[arg(long, help = "mean_column, surface_flux or concentration")]
    quantity: Quantity,
    #[arg(
        long,
        default_value = "surface",
        help = "surface, satellite or surface_satellite"
    )]
    input_observations: InputObservations,
    #[arg(
        long,
        default_value = "monthly_mean",
        help = "instantaneous, daily_mean or monthly_mean"
    )]
    time_aggregation: TimeAggregation,
    #[arg(short = 'y', long = "years", value_delimiter = ',', required = true)]
    years: Vec<String>,
    #[arg(short = 'm', long = "months", value_delimiter = ',', required = true)]
    months: Vec<String>,
    #[arg(long = "product-version", default_value = "latest")]
    product_version: String,
}

impl From<&GhgRequestArgs> for GhgRequest {
    fn from(args: &GhgRequestArgs) -> Self {
        GhgRequest::new(
            args.gas,
            args.quantity,
            args.input_observations,
            args.time_aggregation,
        )
        .with_years(args.years.clone())
        .with_months(args.months.clone())
        .with_version(args.product_version.clone())
    }
}

/// The `ghg` command works on the greenhouse gas inversion dataset.
#[derive(Args, Debug)]
pub struct GhgCommand {
    #[arg(value_enum)]
    action: DatasetAction,
    #[command(flatten)]
    request_args: GhgRequestArgs,
    #[command(flatten)]
    read_args: ReadArgs,
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for GhgCommand {
    fn run(&self, config: Config) -> AtmExpCliResult<()> {
        info!("Running `ghg` subcommand");
        debug!("{:#?}", self);
        let atmexp = AtmExp::new_with_config(config)?;
        let backend = atmexp.ghg((&self.request_args).into())?;
        run_dataset_action(&atmexp, backend, self.action, &self.read_args, self.quiet)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ShapefileAction {
    /// Download and extract the collection unless already cached
    Download,
    /// List every cached collection
    List,
    /// Delete the collection, or every collection with --all
    Clear,
    /// Merge the collection at the given level and write it out
    Dissolve,
}

#[derive(Args, Debug, Clone)]
struct ShapefileKeyArgs {
    #[arg(long, default_value = "50m", help = "10m, 50m or 110m")]
    resolution: Resolution,
    #[arg(long, default_value = "cultural", help = "cultural, physical or raster")]
    map_category: MapCategory,
    #[arg(long, default_value = "admin")]
    info_type: String,
    #[arg(long, default_value_t = 0)]
    depth: u8,
    #[arg(long, default_value = "map_subunits")]
    instance: String,
}

impl From<&ShapefileKeyArgs> for ShapefileCacheKey {
    fn from(args: &ShapefileKeyArgs) -> Self {
        ShapefileCacheKey {
            instance: args.instance.clone(),
            ..shapefile::cache_key(
                args.resolution,
                args.map_category,
                &args.info_type,
                args.depth,
            )
        }
    }
}

/// The `shapefile` command manages the local geometry collections.
#[derive(Args, Debug)]
pub struct ShapefileCommand {
    #[arg(value_enum)]
    action: ShapefileAction,
    #[command(flatten)]
    key_args: ShapefileKeyArgs,
    #[arg(long, help = "With `clear`, delete every cached collection")]
    all: bool,
    #[arg(long, default_value = "countries", help = "Level of `dissolve`")]
    level: SelectionLevel,
    #[arg(
        short = 'f',
        long,
        default_value = "csv",
        value_name = "geojson|geojsonseq|csv",
        help = "Output format of `dissolve`"
    )]
    output_format: OutputFormat,
    #[arg(short = 'o', long, help = "Output file of `dissolve`")]
    output_file: Option<String>,
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for ShapefileCommand {
    fn run(&self, config: Config) -> AtmExpCliResult<()> {
        info!("Running `shapefile` subcommand");
        let atmexp = AtmExp::new_with_config(config)?;
        let shapefiles = &atmexp.shapefiles;
        let key: ShapefileCacheKey = (&self.key_args).into();
        match self.action {
            ShapefileAction::Download => {
                let sp = start_spinner(self.quiet, &format!("Downloading {}", key.name()));
                let dir = shapefiles.download(&key)?;
                stop_spinner(sp);
                println!("Cached in {}", dir.display());
            }
            ShapefileAction::List => {
                display_shapefiles(shapefiles.root(), &shapefiles.list_cached()?)?
            }
            ShapefileAction::Clear => {
                let key = (!self.all).then_some(&key);
                shapefiles.clear_cache(key)?;
            }
            ShapefileAction::Dissolve => {
                let sp = start_spinner(self.quiet, &format!("Dissolving at {} level", self.level));
                let collection = shapefiles.get_as_dataframe(&key)?;
                let dissolved = shapefile::dissolve_shapefile_level(&collection, self.level)?;
                stop_spinner(sp);
                let formatter: OutputFormatter = (&self.output_format).into();
                write_output(formatter, dissolved, self.output_file.as_deref())?;
            }
        }
        Ok(())
    }
}

/// The `select` command resolves entity names, or a map event, into a selection.
#[derive(Args, Debug)]
pub struct SelectCommand {
    #[arg(long, default_value = "countries")]
    level: SelectionLevel,
    #[arg(
        short = 'e',
        long,
        value_delimiter = ',',
        required_unless_present = "event",
        help = "Entity names, e.g. `France,Germany`"
    )]
    entities: Vec<String>,
    #[arg(
        long,
        conflicts_with = "entities",
        help = "JSON event emitted by the map"
    )]
    event: Option<String>,
    #[arg(long, value_name = "LEVEL", help = "Re-derive the selection at another level")]
    convert_to: Option<SelectionLevel>,
    #[arg(
        short = 'f',
        long,
        value_name = "geojson|geojsonseq|csv",
        help = "Write the selected shapes instead of listing their labels"
    )]
    output_format: Option<OutputFormat>,
    #[arg(short = 'o', long, help = "Output file to place the results")]
    output_file: Option<String>,
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for SelectCommand {
    fn run(&self, config: Config) -> AtmExpCliResult<()> {
        info!("Running `select` subcommand");
        let atmexp = AtmExp::new_with_config(config)?;
        let sp = start_spinner(self.quiet, "Loading shapes");
        let selection = match &self.event {
            Some(event) => {
                let reference = match self.level {
                    SelectionLevel::Generic => DataFrame::empty(),
                    level => atmexp.level_collection(level)?,
                };
                Selection::from_out_event_str(event, self.level, &reference)
            }
            None => atmexp.select_entities(&self.entities, self.level)?,
        };
        let selection = match self.convert_to {
            Some(level) => atmexp.convert_selection(&selection, level)?,
            None => selection,
        };
        stop_spinner(sp);
        match (&self.output_format, &self.output_file) {
            (None, None) => display_selection(&selection)?,
            (format, output_file) => {
                let formatter: OutputFormatter =
                    format.as_ref().unwrap_or(&OutputFormat::GeoJSON).into();
                write_output(formatter, selection.to_dataframe()?, output_file.as_deref())?;
            }
        }
        Ok(())
    }
}

/// The `variables` command lists the variable tables.
#[derive(Args, Debug)]
pub struct VariablesCommand {
    #[arg(short = 'd', long, help = "Only list the variables of this dataset")]
    dataset: Option<String>,
}

impl RunCommand for VariablesCommand {
    fn run(&self, config: Config) -> AtmExpCliResult<()> {
        info!("Running `variables` subcommand");
        let atmexp = AtmExp::new_with_config(config)?;
        display_variables(&atmexp.variables, self.dataset.as_deref())?;
        Ok(())
    }
}

/// The `eval` command evaluates a conversion formula.
#[derive(Args, Debug)]
pub struct EvalCommand {
    #[arg(index = 1, help = "Formula in `x`, e.g. `x * 46698`")]
    formula: String,
    #[arg(index = 2, allow_negative_numbers = true)]
    x: f64,
}

impl RunCommand for EvalCommand {
    fn run(&self, _config: Config) -> AtmExpCliResult<()> {
        println!("{}", expression::evaluate(&self.formula, self.x)?);
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum DataAction {
    /// List the files of every dataset
    List,
    /// Delete the files of every dataset
    Clear,
}

/// The `data` command works on the whole data cache.
#[derive(Args, Debug)]
pub struct DataCommand {
    #[arg(value_enum)]
    action: DataAction,
}

impl RunCommand for DataCommand {
    fn run(&self, config: Config) -> AtmExpCliResult<()> {
        info!("Running `data` subcommand");
        let atmexp = AtmExp::new_with_config(config)?;
        match self.action {
            DataAction::List => display_cache_entries(&atmexp.list_data_files()?)?,
            DataAction::Clear => {
                let count = atmexp.list_data_files()?.len();
                atmexp.clear_data_files()?;
                println!("Removed {count} data files");
            }
        }
        Ok(())
    }
}

/// The entrypoint for the CLI.
#[derive(Parser, Debug)]
#[command(version, about="Download, cache and aggregate atmospheric composition data", long_about = None, name="atmexp")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
    #[arg(
        short = 'q',
        long = "quiet",
        help = "\
            Do not print progress bar to stdout. Results and logs (when `RUST_LOG`\n\
            is set) will still be printed.",
        global = true
    )]
    quiet: bool,
}

/// Commands contains the list of subcommands avaliable for use in the CLI.
/// Each command should implmement the RunCommand trait and specify the list
/// of required args for that command.
#[derive(Subcommand, Debug)]
#[enum_dispatch(RunCommand)]
pub enum Commands {
    /// Download, read, list or clear global reanalysis (EAC4) data
    Eac4(Eac4Command),
    /// Download, read, list or clear greenhouse gas inversion data
    Ghg(GhgCommand),
    /// Manage the cached geometry collections
    Shapefile(ShapefileCommand),
    /// Resolve entities into shapes
    Select(SelectCommand),
    /// List the variable tables
    Variables(VariablesCommand),
    /// Evaluate a conversion formula
    Eval(EvalCommand),
    /// List or clear every cached data file
    Data(DataCommand),
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::str::FromStr;
    use std::sync::Arc;

    use atmexp::dataset::DatasetApi;
    use atmexp::shapefile::ArchiveSource;
    use tempfile::TempDir;

    use super::*;

    #[derive(Debug)]
    struct Offline;

    impl DatasetApi for Offline {
        fn retrieve(&self, _: &str, _: &serde_json::Value) -> anyhow::Result<Vec<u8>> {
            Err(anyhow::anyhow!("offline"))
        }
    }

    impl ArchiveSource for Offline {
        fn fetch_archive(&self, _: &str) -> anyhow::Result<Vec<u8>> {
            Err(anyhow::anyhow!("offline"))
        }
    }

    #[test]
    fn download_should_skip_cached_requests() {
        let dir = TempDir::new().unwrap();
        let atmexp = AtmExp::with_collaborators(
            Config::with_root(dir.path()),
            Arc::new(Offline),
            Arc::new(Offline),
        )
        .unwrap();
        let request = Eac4Request::new(
            ["ozone_mass_mixing_ratio"],
            "2021-01-01/2021-01-31".parse().unwrap(),
        );
        let backend = atmexp.eac4(request).unwrap();
        let read_args = ReadArgs {
            output_file: None,
            shift_longitude: false,
            clip: vec![],
            level: SelectionLevel::Countries,
            confidence_interval: None,
            split_time: false,
        };
        let download = |backend: DatasetBackend| {
            run_dataset_action(&atmexp, backend, DatasetAction::Download, &read_args, true)
        };
        assert!(download(backend.clone()).is_err());

        fs::create_dir_all(backend.dataset_dir()).unwrap();
        let cached = format!("{}_20210101-20210131.parquet", backend.file_prefix());
        fs::write(backend.dataset_dir().join(cached), b"").unwrap();
        assert!(download(backend).is_ok());
    }

    #[test]
    fn output_type_should_deserialize_properly() {
        let output_format = OutputFormat::from_str("GeoJSON");
        assert_eq!(
            output_format.unwrap(),
            OutputFormat::GeoJSON,
            "geojson format should be parsed correctly"
        );
        let output_format = OutputFormat::from_str("GeoJson");
        assert_eq!(
            output_format.unwrap(),
            OutputFormat::GeoJSON,
            "parsing should be case insensitive"
        );
        let output_format = OutputFormat::from_str("geoparquet");
        assert!(output_format.is_err(), "non listed formats should fail");
    }

    #[test]
    fn eac4_args_should_build_request() {
        let cli = Cli::parse_from([
            "atmexp",
            "eac4",
            "list",
            "-v",
            "total_column_ozone,total_column_carbon_monoxide",
            "-d",
            "2021-01-01/2021-03-31",
            "--area",
            "50,-10,30,20",
            "--pressure-level",
            "500,850",
        ]);
        let Some(Commands::Eac4(command)) = cli.command else {
            panic!("expected the eac4 command");
        };
        assert_eq!(command.action, DatasetAction::List);
        let request: Eac4Request = (&command.request_args).into();
        assert_eq!(request.data_variables.len(), 2);
        assert_eq!(request.area, Some(Area([50.0, -10.0, 30.0, 20.0])));
        assert_eq!(request.time_values.len(), 1);
        assert!(request.model_level.is_none());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn pressure_and_model_levels_should_conflict() {
        let result = Cli::try_parse_from([
            "atmexp",
            "eac4",
            "download",
            "-v",
            "ozone_mass_mixing_ratio",
            "-d",
            "2021-01-01/2021-01-02",
            "--pressure-level",
            "500",
            "--model-level",
            "60",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn ghg_args_should_build_request() {
        let cli = Cli::parse_from([
            "atmexp",
            "ghg",
            "download",
            "-g",
            "carbon_dioxide",
            "--quantity",
            "surface_flux",
            "-y",
            "2020",
            "-m",
            "01,02",
        ]);
        let Some(Commands::Ghg(command)) = cli.command else {
            panic!("expected the ghg command");
        };
        let request: GhgRequest = (&command.request_args).into();
        assert_eq!(request.data_variables, Gas::CarbonDioxide);
        assert_eq!(request.time_aggregation, TimeAggregation::MonthlyMean);
        assert_eq!(request.periods().len(), 2);
        assert_eq!(request.version, "latest");
    }

    #[test]
    fn shapefile_args_should_build_key() {
        let cli = Cli::parse_from([
            "atmexp",
            "shapefile",
            "download",
            "--resolution",
            "110m",
        ]);
        let Some(Commands::Shapefile(command)) = cli.command else {
            panic!("expected the shapefile command");
        };
        let key: ShapefileCacheKey = (&command.key_args).into();
        assert_eq!(key.name(), "ne_110m_admin_0_map_subunits");
    }

    #[test]
    fn select_should_require_entities_or_event() {
        assert!(Cli::try_parse_from(["atmexp", "select"]).is_err());
        assert!(Cli::try_parse_from(["atmexp", "select", "-e", "France"]).is_ok());
        assert!(Cli::try_parse_from(["atmexp", "select", "--event", "{}"]).is_ok());
    }

    #[test]
    fn eval_command_should_evaluate() {
        let command = EvalCommand {
            formula: "x * 46698".to_string(),
            x: 0.5,
        };
        assert!(command.run(Config::default()).is_ok());
        let command = EvalCommand {
            formula: "x ** 2".to_string(),
            x: 0.5,
        };
        assert!(command.run(Config::default()).is_err());
    }

    #[test]
    fn data_command_should_run_on_empty_cache() {
        let dir = TempDir::new().unwrap();
        let config = Config::with_root(dir.path());
        for action in [DataAction::List, DataAction::Clear] {
            assert!(DataCommand { action }.run(config.clone()).is_ok());
        }
    }

    #[test]
    fn variables_command_should_list_builtin_tables() {
        let command = VariablesCommand {
            dataset: Some("cams-global-reanalysis-eac4".to_string()),
        };
        assert!(command.run(Config::default()).is_ok());
    }

    #[test]
    fn cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
