//! folio - metadata catalog compiler CLI.

use clap::{Args, Parser, Subcommand};
use folio_config::{load_field_schema, resolve_config, validate_config, ConfigPaths, LoadMode};
use folio_core::anchor::AnchorStore;
use folio_core::compile::{CompileReport, CompileRequest, Compiler};
use folio_core::descriptor::FieldDescriptor;
use folio_core::error::{CompileError, Result};
use folio_core::export::export_ui_components;
use folio_core::logging::{init_logging, LogFormat};
use folio_core::registry::Registry;
use folio_core::ExitCode;
use folio_store::{MemoryStore, MySql, Retrying};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "folio")]
#[command(author, version, about = "Compile document metadata into a two-tier catalog", long_about = None)]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Configuration file (overrides FOLIO_CONFIG and the XDG location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest a JSON-lines file and build both tiers
    Compile(CompileArgs),

    /// Print the field definitions inferred from a sample of the input
    Infer {
        /// JSON-lines input
        input: PathBuf,
    },

    /// Rebuild empty volatile tables from their registered procedures
    Rehydrate {
        /// Rebuild every registered table, empty or not
        #[arg(long)]
        force: bool,
    },

    /// Write the UI options document for a table set
    Export {
        /// Secondary import name (defaults to the primary set)
        #[arg(long)]
        set: Option<String>,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Render every registered procedure as a MySQL startup script
    Script {
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import or export the key → anchor mapping as `anchor\tkey` lines
    #[command(subcommand)]
    Anchors(AnchorCommand),
}

#[derive(Args, Debug)]
struct CompileArgs {
    /// JSON-lines input
    input: PathBuf,

    /// Explicit field schema (JSON array); inferred when omitted
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Secondary import name; joins onto existing anchors
    #[arg(long)]
    set: Option<String>,

    /// Stop after this many retained records
    #[arg(long)]
    row_limit: Option<u64>,

    /// Drop and recreate durable tables instead of appending
    #[arg(long)]
    replace: bool,

    /// Fields built concurrently
    #[arg(long)]
    parallel: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum AnchorCommand {
    /// Load anchors from a flat file
    Import { path: PathBuf },
    /// Write every anchor to a flat file
    Export { path: PathBuf },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.log_format, cli.verbose) {
        eprintln!("folio: failed to initialize logging: {e}");
    }

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!(code = e.code(), "{e}");
            eprintln!("folio: {e}");
            ExitCode::for_error(&e)
        }
    };
    std::process::exit(code.as_i32());
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut cfg = resolve_config(&ConfigPaths::from_env(cli.config))?.config;

    if let Commands::Compile(args) = &cli.command {
        if args.row_limit.is_some() {
            cfg.row_limit = args.row_limit;
        }
        if args.replace {
            cfg.load_mode = LoadMode::Replace;
        }
        if let Some(parallel) = args.parallel {
            cfg.parallel_builds = parallel;
        }
        validate_config(&cfg)?;
    }

    let store = Retrying::new(MemoryStore::open(cfg.snapshot_path())?);

    match cli.command {
        Commands::Compile(args) => {
            let mut request = CompileRequest::new(args.input);
            if let Some(path) = &args.schema {
                request = request.with_schema(load_field_schema(path, &cfg)?);
            }
            if let Some(set) = args.set {
                request = request.with_set(set);
            }
            let mut anchors = AnchorStore::open(&cfg.anchor_store_path(), cfg.anchor_width)?;
            let report = Compiler::new(&cfg, &store).compile(&request, &mut anchors)?;
            print_json(&report)?;
            Ok(compile_exit_code(&report))
        }
        Commands::Infer { input } => {
            let defs = Compiler::new(&cfg, &store).resolve_definitions(&CompileRequest::new(input))?;
            print_json(&defs)?;
            Ok(ExitCode::Clean)
        }
        Commands::Rehydrate { force } => {
            let report = Registry::new(&store).rehydrate(force)?;
            print_json(&report)?;
            Ok(ExitCode::Clean)
        }
        Commands::Export { set, output } => {
            let set = cfg.table_set(set.as_deref());
            let fields = Registry::new(&store)
                .fields()?
                .iter()
                .filter_map(|record| record.definition_for(&set))
                .map(|def| FieldDescriptor::new(def, &cfg, &set))
                .collect::<Result<Vec<_>>>()?;
            if fields.is_empty() {
                return Err(CompileError::NoFields);
            }
            let options = export_ui_components(&fields, &store, &cfg)?;
            write_output(output.as_deref(), &serde_json::to_string_pretty(&options)?)?;
            Ok(ExitCode::Clean)
        }
        Commands::Script { output } => {
            let script = Registry::new(&store).script(&MySql)?;
            write_output(output.as_deref(), &script)?;
            Ok(ExitCode::Clean)
        }
        Commands::Anchors(command) => {
            let mut anchors = AnchorStore::open(&cfg.anchor_store_path(), cfg.anchor_width)?;
            let count = match command {
                AnchorCommand::Import { path } => anchors.import_flat(&path)?,
                AnchorCommand::Export { path } => anchors.export_flat(&path)?,
            };
            print_json(&serde_json::json!({ "anchors": count }))?;
            Ok(ExitCode::Clean)
        }
    }
}

fn compile_exit_code(report: &CompileReport) -> ExitCode {
    if report.ingest.limit_reached {
        ExitCode::RowLimitReached
    } else if report.warnings() > 0 {
        ExitCode::CompletedWithWarnings
    } else {
        ExitCode::Clean
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Write to `path` atomically, or to stdout.
fn write_output(path: Option<&Path>, contents: &str) -> Result<()> {
    let Some(path) = path else {
        print!("{contents}");
        return Ok(());
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
