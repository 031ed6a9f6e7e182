//! rustvox CLI entrypoint.
//!
//! Replays a recorded session through a TSDF server and writes the map, the mesh
//! and a `results.json` summary into the output directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::config::{ConfigCorrection, ConfigError, ConfigLoader, TsdfServerConfig};
use crate::core::TransformBuffer;
use crate::io::RecordingError;
use crate::server::TsdfServer;
use crate::timing::TimingStats;

mod replay;

pub use replay::{replay, ReplayOptions, ReplayReport};

const MAP_FILENAME: &str = "tsdf_map.json";
const MESH_FILENAME: &str = "mesh.ply";

/// rustvox command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "rustvox", version, about = "Replay a recorded session into a TSDF map")]
struct CliArgs {
    /// Recorded session (JSON lines).
    #[arg(long, value_name = "FILE")]
    input: Option<PathBuf>,
    /// Output directory path.
    #[arg(long, value_name = "DIR", default_value = "./output")]
    output: PathBuf,
    /// Server configuration (YAML or TOML).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Output format for results.
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    output_format: OutputFormat,
    /// Log verbosity level.
    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,
    /// Log format (text/json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
    /// Run an incremental mesh update every N integrated clouds (0 = never).
    #[arg(long, value_name = "N", default_value_t = 0)]
    mesh_every: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum LogFormat {
    Text,
    Json,
}

#[derive(Error, Debug)]
enum CliError {
    #[error("input path is required but was not provided")]
    InputNotProvided,
    #[error("input file not found: {0}")]
    InputMissing(PathBuf),
    #[error("failed to load config file {path}: {source}")]
    Config { path: PathBuf, source: ConfigError },
    #[error("output path exists but is not a directory: {0}")]
    OutputNotDirectory(PathBuf),
    #[error("failed to create output directory {path}: {source}")]
    OutputCreate { path: PathBuf, source: std::io::Error },
    #[error("failed to write results to {path}: {source}")]
    OutputWrite { path: PathBuf, source: std::io::Error },
    #[error("replay failed: {0}")]
    Replay(#[from] RecordingError),
    #[error("failed to save map to {0}")]
    MapSave(PathBuf),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::InputNotProvided
            | CliError::InputMissing(_)
            | CliError::Config { .. }
            | CliError::OutputNotDirectory(_) => ExitCode::from(1),
            CliError::OutputCreate { .. }
            | CliError::OutputWrite { .. }
            | CliError::Replay(_)
            | CliError::MapSave(_) => ExitCode::from(2),
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            CliError::InputNotProvided | CliError::InputMissing(_) => "InputError",
            CliError::Config { .. } => "ConfigError",
            CliError::OutputNotDirectory(_)
            | CliError::OutputCreate { .. }
            | CliError::OutputWrite { .. }
            | CliError::MapSave(_) => "OutputError",
            CliError::Replay(_) => "ReplayError",
        }
    }

    fn component(&self) -> &'static str {
        match self {
            CliError::InputNotProvided | CliError::InputMissing(_) => "cli",
            CliError::Config { .. } => "config",
            CliError::OutputNotDirectory(_) | CliError::OutputCreate { .. } | CliError::OutputWrite { .. } => "io",
            CliError::Replay(_) => "replay",
            CliError::MapSave(_) => "persistence",
        }
    }

    fn suggestion(&self) -> &'static str {
        match self {
            CliError::InputNotProvided => "Pass --input <recording.jsonl>.",
            CliError::InputMissing(_) => "Verify the input path and ensure the file exists.",
            CliError::Config { .. } => "Use a .yaml, .yml or .toml file whose sections match the schema.",
            CliError::OutputNotDirectory(_) => "Choose an output path that is a directory.",
            CliError::OutputCreate { .. } => "Check write permissions or select a different output directory.",
            CliError::OutputWrite { .. } | CliError::MapSave(_) => {
                "Ensure the output directory is writable and has free space."
            }
            CliError::Replay(_) => "Check that every line of the recording is a valid message.",
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct MapSummary {
    allocated_blocks: usize,
    memory_bytes: usize,
    voxel_size: f32,
    file: Option<String>,
}

#[derive(Debug, Default, Serialize)]
struct MeshSummary {
    blocks: usize,
    vertex_count: usize,
    triangle_count: usize,
    file: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorInfo {
    error_type: String,
    root_cause: String,
    component: String,
    suggestion: String,
}

#[derive(Debug, Serialize)]
struct Diagnostics {
    os: String,
    arch: String,
    rustvox_version: String,
    cwd: String,
    input: Option<String>,
    output: Option<String>,
    config: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResultsJson {
    status: String,
    input: Option<String>,
    output: Option<String>,
    processing_time_ms: u128,
    integrator: Option<String>,
    replay: Option<ReplayReport>,
    map: MapSummary,
    mesh: MeshSummary,
    config_corrections: Vec<ConfigCorrection>,
    timings: std::collections::BTreeMap<String, TimingStats>,
    error: Option<ErrorInfo>,
    diagnostics: Diagnostics,
}

struct RunReport {
    integrator: String,
    replay: ReplayReport,
    map: MapSummary,
    mesh: MeshSummary,
    config_corrections: Vec<ConfigCorrection>,
    timings: std::collections::BTreeMap<String, TimingStats>,
}

pub fn run() -> ExitCode {
    let start = Instant::now();
    let cli = CliArgs::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            init_logger(&resolve_log_level(&cli, None), cli.log_format);
            return handle_error(&err, start, &cli);
        }
    };
    init_logger(&resolve_log_level(&cli, Some(&config)), cli.log_format);

    let input = match resolve_input(&cli) {
        Ok(input) => input,
        Err(err) => return handle_error(&err, start, &cli),
    };
    let output_dir = match ensure_output_dir(&cli.output) {
        Ok(dir) => dir,
        Err(err) => return handle_error(&err, start, &cli),
    };

    info!("Starting rustvox replay");
    info!("Input: {}", input.display());
    info!("Output: {}", output_dir.display());

    let report = match run_replay(config, &input, &output_dir, cli.mesh_every) {
        Ok(report) => report,
        Err(err) => return handle_error(&err, start, &cli),
    };

    let results = ResultsJson {
        status: "success".to_string(),
        input: Some(input.display().to_string()),
        output: Some(output_dir.display().to_string()),
        processing_time_ms: start.elapsed().as_millis(),
        integrator: Some(report.integrator),
        replay: Some(report.replay),
        map: report.map,
        mesh: report.mesh,
        config_corrections: report.config_corrections,
        timings: report.timings,
        error: None,
        diagnostics: build_diagnostics(&cli),
    };

    if let Err(err) = write_results(&results, &output_dir, cli.output_format) {
        return handle_error(&err, start, &cli);
    }
    if cli.output_format == OutputFormat::Text {
        print_text_summary(&results);
    }

    ExitCode::SUCCESS
}

fn load_config(cli: &CliArgs) -> Result<TsdfServerConfig, CliError> {
    match &cli.config {
        Some(path) => ConfigLoader::load(path).map_err(|source| CliError::Config {
            path: path.clone(),
            source,
        }),
        None => Ok(TsdfServerConfig::default()),
    }
}

fn resolve_input(cli: &CliArgs) -> Result<PathBuf, CliError> {
    let input = cli.input.clone().ok_or(CliError::InputNotProvided)?;
    if !input.is_file() {
        return Err(CliError::InputMissing(input));
    }
    Ok(input)
}

/// CLI flag, then `RUST_LOG`, then the config's verbosity, then `info`.
fn resolve_log_level(cli: &CliArgs, config: Option<&TsdfServerConfig>) -> String {
    if let Some(level) = cli.log_level {
        return level.as_str().to_string();
    }

    if let Ok(level) = std::env::var("RUST_LOG") {
        if !level.trim().is_empty() {
            return level;
        }
    }

    match config {
        Some(config) if !config.server.verbose => LogLevel::Warn.as_str().to_string(),
        _ => LogLevel::Info.as_str().to_string(),
    }
}

fn init_logger(level: &str, format: LogFormat) {
    let mut builder = env_logger::Builder::new();
    builder.target(env_logger::Target::Stderr);
    builder.filter_level(log::LevelFilter::Info);
    builder.parse_filters(level);
    builder.format(move |buf, record| {
        use std::io::Write;
        let module = record.module_path().unwrap_or(record.target());
        match format {
            LogFormat::Json => {
                let payload = json!({
                    "timestamp": buf.timestamp_millis().to_string(),
                    "level": record.level().to_string(),
                    "target": module,
                    "message": record.args().to_string(),
                });
                writeln!(buf, "{}", payload)
            }
            LogFormat::Text => writeln!(
                buf,
                "{} [{}] {}: {}",
                buf.timestamp_millis(),
                record.level(),
                module,
                record.args()
            ),
        }
    });

    if let Err(err) = builder.try_init() {
        eprintln!("Failed to initialize logger: {}", err);
    }
}

fn ensure_output_dir(output: &Path) -> Result<PathBuf, CliError> {
    if output.exists() {
        if output.is_dir() {
            return Ok(output.to_path_buf());
        }
        return Err(CliError::OutputNotDirectory(output.to_path_buf()));
    }

    fs::create_dir_all(output).map_err(|source| CliError::OutputCreate {
        path: output.to_path_buf(),
        source,
    })?;

    Ok(output.to_path_buf())
}

fn run_replay(
    mut config: TsdfServerConfig,
    input: &Path,
    output_dir: &Path,
    mesh_every: usize,
) -> Result<RunReport, CliError> {
    if config.server.mesh_filename.is_empty() {
        config.server.mesh_filename = output_dir.join(MESH_FILENAME).display().to_string();
    }
    let mesh_file = config.server.mesh_filename.clone();
    let options = ReplayOptions {
        mesh_every,
        queue_size: config.server.pointcloud_queue_size,
    };

    let buffer = Arc::new(TransformBuffer::new(config.server.world_frame.clone()));
    let server = TsdfServer::builder(config)
        .frame_resolver(buffer.clone())
        .build_shared();
    debug!("Integrator: {}", server.integrator_name());

    let replayed = replay(input, &buffer, &server, options);
    server.stop_mesh_timer();
    let replayed = replayed?;

    server.generate_mesh();

    let map_path = output_dir.join(MAP_FILENAME);
    if !server.save_map(&map_path) {
        return Err(CliError::MapSave(map_path));
    }

    let map = server.with_map(|map| MapSummary {
        allocated_blocks: map.layer().num_allocated_blocks(),
        memory_bytes: map.layer().memory_size(),
        voxel_size: map.voxel_size(),
        file: Some(map_path.display().to_string()),
    });
    let mesh = server.with_mesh_layer(|layer| MeshSummary {
        blocks: layer.num_meshes(),
        vertex_count: layer.meshes().map(|(_, mesh)| mesh.num_vertices()).sum(),
        triangle_count: layer.num_triangles(),
        file: Path::new(&mesh_file).exists().then(|| mesh_file.clone()),
    });

    Ok(RunReport {
        integrator: server.integrator_name().to_string(),
        replay: replayed,
        map,
        mesh,
        config_corrections: server.config_corrections().to_vec(),
        timings: server.timings().snapshot(),
    })
}

fn write_results(results: &ResultsJson, output_dir: &Path, format: OutputFormat) -> Result<(), CliError> {
    if format != OutputFormat::Json {
        return Ok(());
    }

    let path = output_dir.join("results.json");
    let payload = serde_json::to_string_pretty(results).map_err(|err| CliError::OutputWrite {
        path: path.clone(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, err),
    })?;

    fs::write(&path, payload).map_err(|source| CliError::OutputWrite {
        path: path.clone(),
        source,
    })?;
    info!("Results written to {}", path.display());

    Ok(())
}

fn print_text_summary(results: &ResultsJson) {
    println!("rustvox results");
    println!("Status: {}", results.status);
    if let Some(input) = &results.input {
        println!("Input: {}", input);
    }
    if let Some(output) = &results.output {
        println!("Output: {}", output);
    }
    println!("Processing time (ms): {}", results.processing_time_ms);
    if let Some(replay) = &results.replay {
        println!("Clouds integrated: {}/{}", replay.integrated, replay.pointclouds + replay.freespace_pointclouds);
    }
    println!("Allocated blocks: {}", results.map.allocated_blocks);
    println!("Mesh triangles: {}", results.mesh.triangle_count);
}

fn build_diagnostics(cli: &CliArgs) -> Diagnostics {
    Diagnostics {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        rustvox_version: env!("CARGO_PKG_VERSION").to_string(),
        cwd: std::env::current_dir()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|_| "<unavailable>".to_string()),
        input: cli.input.as_ref().map(|path| path.display().to_string()),
        output: Some(cli.output.display().to_string()),
        config: cli.config.as_ref().map(|path| path.display().to_string()),
    }
}

fn handle_error(err: &CliError, start: Instant, cli: &CliArgs) -> ExitCode {
    let diagnostics = build_diagnostics(cli);
    let error_info = ErrorInfo {
        error_type: err.error_type().to_string(),
        root_cause: err.to_string(),
        component: err.component().to_string(),
        suggestion: err.suggestion().to_string(),
    };

    error!(
        "{}: {} (component: {})",
        error_info.error_type, error_info.root_cause, error_info.component
    );

    eprintln!("Error: {}", error_info.error_type);
    eprintln!("Component: {}", error_info.component);
    eprintln!("Cause: {}", error_info.root_cause);
    eprintln!("Suggestion: {}", error_info.suggestion);
    eprintln!(
        "Diagnostics: os={}, arch={}, cwd={}",
        diagnostics.os, diagnostics.arch, diagnostics.cwd
    );

    let results = ResultsJson {
        status: "error".to_string(),
        input: diagnostics.input.clone(),
        output: diagnostics.output.clone(),
        processing_time_ms: start.elapsed().as_millis(),
        integrator: None,
        replay: None,
        map: MapSummary::default(),
        mesh: MeshSummary::default(),
        config_corrections: Vec::new(),
        timings: Default::default(),
        error: Some(error_info),
        diagnostics,
    };

    if cli.output_format == OutputFormat::Json && !matches!(err, CliError::OutputNotDirectory(_)) {
        if let Err(write_err) =
            ensure_output_dir(&cli.output).and_then(|dir| write_results(&results, &dir, OutputFormat::Json))
        {
            warn!("Failed to write error results: {}", write_err);
        }
    }

    err.exit_code()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transformation;
    use crate::io::{RecordedMessage, RecordingWriter};
    use crate::test_utils::planar_scan;
    use tempfile::tempdir;

    fn args(list: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("rustvox").chain(list.iter().copied())).unwrap()
    }

    #[test]
    fn test_args_defaults() {
        let cli = args(&[]);
        assert_eq!(cli.output, PathBuf::from("./output"));
        assert_eq!(cli.output_format, OutputFormat::Json);
        assert_eq!(cli.mesh_every, 0);
        assert!(matches!(resolve_input(&cli), Err(CliError::InputNotProvided)));
    }

    #[test]
    fn test_explicit_log_level_wins() {
        let cli = args(&["--log-level", "debug"]);
        assert_eq!(resolve_log_level(&cli, None), "debug");
    }

    #[test]
    fn test_unsupported_config_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server.ini");
        fs::write(&path, "").unwrap();
        let cli = args(&["--config", path.to_str().unwrap()]);
        let err = load_config(&cli).unwrap_err();
        assert_eq!(err.error_type(), "ConfigError");
        assert_eq!(err.component(), "config");
    }

    #[test]
    fn test_output_must_be_directory() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("taken");
        fs::write(&file, "x").unwrap();
        assert!(matches!(ensure_output_dir(&file), Err(CliError::OutputNotDirectory(_))));
        let nested = dir.path().join("a").join("b");
        assert_eq!(ensure_output_dir(&nested).unwrap(), nested);
        assert!(nested.is_dir());
    }

    #[test]
    fn test_error_results_written_when_possible() {
        let dir = tempdir().unwrap();
        let err = CliError::InputMissing(dir.path().join("missing.jsonl"));

        let output = dir.path().join("out");
        let cli = args(&["--output", output.to_str().unwrap()]);
        handle_error(&err, Instant::now(), &cli);
        let written = fs::read_to_string(output.join("results.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"]["error_type"], err.error_type());

        // Output below a regular file cannot be created; the failure is only logged.
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "x").unwrap();
        let unwritable = blocker.join("out");
        let cli = args(&["--output", unwritable.to_str().unwrap()]);
        handle_error(&err, Instant::now(), &cli);
        assert!(!unwritable.exists());
        assert_eq!(fs::read_to_string(&blocker).unwrap(), "x");
    }

    #[test]
    fn test_run_replay_writes_map_and_mesh() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("session.jsonl");
        let mut writer = RecordingWriter::create(&input).unwrap();
        for i in 0..3 {
            let stamp = i as f64 * 0.1;
            writer
                .write(&RecordedMessage::transform("sensor", stamp, &Transformation::identity()))
                .unwrap();
            writer
                .write(&RecordedMessage::Pointcloud(planar_scan("sensor", stamp, 1.2, 16)))
                .unwrap();
        }
        writer.finish().unwrap();

        let mut config = TsdfServerConfig::default();
        config.server.verbose = false;
        config.map.tsdf_voxel_size = 0.1;
        config.map.tsdf_voxels_per_side = 8;
        let output = dir.path().join("out");
        fs::create_dir_all(&output).unwrap();

        let report = run_replay(config, &input, &output, 1).unwrap();
        assert_eq!(report.replay.integrated, 3);
        assert_eq!(report.replay.mesh_updates, 3);
        assert!(report.map.allocated_blocks > 0);
        assert!(report.mesh.triangle_count > 0);
        assert!(output.join(MAP_FILENAME).exists());
        assert!(output.join(MESH_FILENAME).exists());
        assert!(report.timings.contains_key("integrate"));
    }
}
