use anyhow::{anyhow, Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use crossterm::style::Stylize;
use dtools_export::api::{HttpApiClient, UsageLedger};
use dtools_export::cache::{CacheStore, FileCacheStore};
use dtools_export::config::Config;
use dtools_export::credentials::Credentials;
use dtools_export::export::{timestamped_file_name, CsvLayout};
use dtools_export::freshness::FreshnessPolicy;
use dtools_export::listing::selection_at;
use dtools_export::planner::{CallPlanner, RunControl};
use dtools_export::run::{ExportRequest, ExportRun};
use dtools_export::selection::{parse_record_scope, Selection};
use dtools_export::utils::app_paths::AppPaths;
use dtools_export::utils::logging::init_tracing;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

mod table_display;

use table_display::{display_cache_entries, display_cache_stats, display_rows};

/// Pick fields from the D-Tools cloud API and export them to CSV, reusing
/// cached responses where the freshness policy allows.
#[derive(Parser)]
#[command(name = "dtools-export")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch records and write them to a CSV file
    Export(ExportArgs),
    /// Inspect or clear the response cache
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },
    /// Manage the encoded credentials file
    Auth {
        #[command(subcommand)]
        action: AuthCommands,
    },
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
    /// List the field catalog
    Fields,
    /// Show today's API call usage
    Usage,
}

#[derive(Args)]
struct ExportArgs {
    /// API endpoint, e.g. Projects/GetProject
    #[arg(long)]
    endpoint: Option<String>,

    /// Export every record of the configured list endpoint, fetching each
    /// from the endpoint for its stage unless --endpoint is given
    #[arg(long, conflicts_with_all = ["ids", "records"])]
    all: bool,

    /// Field to export, by display name or API name (repeatable)
    #[arg(short, long = "field")]
    fields: Vec<String>,

    /// Record id (repeatable, comma separated lists accepted)
    #[arg(long = "id", value_delimiter = ',')]
    ids: Vec<String>,

    /// Record scope such as `id=42&stage=Won` (repeatable)
    #[arg(long = "record")]
    records: Vec<String>,

    /// exact-only, any-age or max-age:<duration>
    #[arg(long)]
    freshness: Option<FreshnessPolicy>,

    /// Allow cached and live records in the same export
    #[arg(long)]
    allow_mixing: bool,

    /// Add provenance and fetched_at columns
    #[arg(long)]
    provenance: bool,

    /// Output CSV path; defaults to a timestamped name in the export dir
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the rows instead of writing a file
    #[arg(long)]
    print: bool,
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show entry count and size
    Stats,
    /// List stored entries
    List,
    /// Remove every entry
    Clear,
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Write an encoded credentials file
    Encode {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        /// API key
        #[arg(long)]
        key: String,
        /// Destination; defaults to the configured credentials file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check that the credentials file decodes
    Check,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a commented default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the default config with comments
    Generate,
    /// Print the config file location
    Path,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_dir = AppPaths::log_dir().ok();
    if let Some(path) = init_tracing(cli.verbose, log_dir.as_deref()) {
        info!(target: "dtools_export", "Logging to {}", path.display());
    }

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::get_config_path()?,
    };

    match cli.command {
        Commands::Config { action } => run_config(action, &config_path),
        Commands::Export(args) => run_export(args, &load_config(cli.config.as_deref())?).await,
        Commands::Cache { action } => run_cache(action, &load_config(cli.config.as_deref())?).await,
        Commands::Auth { action } => run_auth(action, &load_config(cli.config.as_deref())?),
        Commands::Fields => {
            let config = load_config(cli.config.as_deref())?;
            for mapping in &config.fields {
                println!("  {} {}", format!("{:<16}", mapping.display).green(), mapping.field);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Usage => {
            let config = load_config(cli.config.as_deref())?;
            let usage = UsageLedger::load(&AppPaths::usage_file()?, config.api.daily_call_limit);
            println!("{}", usage.summary());
            println!("Remaining today: {}", usage.remaining());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn credentials_path(config: &Config) -> Result<PathBuf> {
    match &config.api.credentials_file {
        Some(path) => Ok(path.clone()),
        None => AppPaths::credentials_file(),
    }
}

fn cache_dir(config: &Config) -> Result<PathBuf> {
    match &config.cache.dir {
        Some(dir) => Ok(dir.clone()),
        None => AppPaths::cache_dir(),
    }
}

fn selected_fields(args: &ExportArgs, config: &Config) -> Vec<String> {
    if args.fields.is_empty() {
        config.fields.iter().map(|m| m.field.clone()).collect()
    } else {
        args.fields.iter().map(|f| config.resolve_field(f)).collect()
    }
}

fn build_selection(args: &ExportArgs, config: &Config) -> Result<Selection> {
    let endpoint = args.endpoint.as_deref().unwrap_or(&config.export.endpoint);
    let mut selection = Selection::new(endpoint, selected_fields(args, config));
    for id in args.ids.iter().map(|id| id.trim()).filter(|id| !id.is_empty()) {
        selection = selection.with_record([("id", id)]);
    }
    for record in &args.records {
        selection.add_record(parse_record_scope(record)?);
    }
    Ok(selection)
}

async fn run_export(args: ExportArgs, config: &Config) -> Result<ExitCode> {
    if !args.all && args.ids.is_empty() && args.records.is_empty() {
        return Err(anyhow!("No records selected: pass --id, --record or --all"));
    }

    let mut options = config.plan_options();
    if let Some(freshness) = args.freshness {
        options.freshness = freshness;
    }
    options.allow_mixing |= args.allow_mixing;

    let output = if args.print {
        None
    } else {
        Some(match args.output.clone() {
            Some(path) => path,
            None => {
                let dir = config
                    .export
                    .output_dir
                    .clone()
                    .unwrap_or_else(AppPaths::export_dir);
                timestamped_file_name(&dir, &config.export.file_prefix, Local::now())
            }
        })
    };

    // Collaborators
    let credentials = Credentials::load(&credentials_path(config)?)
        .context("Run `dtools-export auth encode` to create the credentials file")?;
    let usage = Arc::new(Mutex::new(UsageLedger::load(
        &AppPaths::usage_file()?,
        config.api.daily_call_limit,
    )));
    let client = HttpApiClient::new(config.http_settings(), &credentials, Arc::clone(&usage))?;
    let store = FileCacheStore::open(cache_dir(config)?).await?;

    let planner = CallPlanner::new(Arc::new(store), Arc::new(client));
    let run = ExportRun::new(planner).with_usage(usage);

    let control = RunControl::new();
    let ctrl_c_control = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(target: "dtools_export", "Interrupted, finishing calls already in flight");
            ctrl_c_control.cancel();
        }
    });

    let selection = if args.all {
        let fields = selected_fields(&args, config);
        let listing = run
            .list_records(&config.list_query(), &options, &control)
            .await?;
        println!(
            "Found {} records ({} list)",
            listing.records.len(),
            listing.provenance
        );
        match &args.endpoint {
            Some(endpoint) => selection_at(endpoint, &fields, &listing.records),
            None => config.stage_routing().selection(&fields, &listing.records),
        }
    } else {
        build_selection(&args, config)?
    };

    let headers: Vec<String> = selection
        .fields()
        .iter()
        .map(|f| config.display_name(f))
        .collect();
    let layout = CsvLayout::new(headers.clone())
        .with_provenance(args.provenance || config.export.include_provenance);

    let request = ExportRequest {
        selection,
        options,
        layout,
        output,
    };
    let report = run.execute(&request, &control).await?;

    if args.print {
        display_rows(&report.outcome.rows, &headers);
    }
    let manifest = &report.outcome.manifest;
    if report.outcome.has_failures() {
        println!("{}", manifest.to_table());
    }
    if let Some(path) = &report.output {
        println!(
            "{}",
            format!("Exported {} rows to {}", report.rows_written, path.display()).green()
        );
    }
    println!("{}", manifest.summary());
    if let Some(usage) = &report.usage_summary {
        println!("{}", usage);
    }

    if report.outcome.has_failures() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

async fn run_cache(action: CacheCommands, config: &Config) -> Result<ExitCode> {
    let store = FileCacheStore::open(cache_dir(config)?).await?;
    match action {
        CacheCommands::Stats => {
            display_cache_stats(&store.stats().await?);
            println!("  Location:  {}", store.entries_dir().display());
        }
        CacheCommands::List => display_cache_entries(&store.list().await?),
        CacheCommands::Clear => {
            store.clear().await?;
            println!("{}", "Cache cleared.".green());
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_auth(action: AuthCommands, config: &Config) -> Result<ExitCode> {
    match action {
        AuthCommands::Encode {
            username,
            password,
            key,
            output,
        } => {
            let path = match output {
                Some(path) => path,
                None => credentials_path(config)?,
            };
            let credentials = Credentials::new(&username, &password, &key);
            credentials.save(&path)?;
            println!("{}", format!("Credentials written to {}", path.display()).green());
        }
        AuthCommands::Check => {
            let path = credentials_path(config)?;
            let credentials = Credentials::load(&path)?;
            println!(
                "{}",
                format!("Credentials for {} are valid", credentials.username).green()
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_config(action: ConfigCommands, config_path: &Path) -> Result<ExitCode> {
    match action {
        ConfigCommands::Init { force } => {
            if config_path.exists() && !force {
                return Err(anyhow!(
                    "{} already exists, pass --force to overwrite",
                    config_path.display()
                ));
            }
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(config_path, Config::create_default_with_comments())?;
            println!("{}", format!("Config written to {}", config_path.display()).green());
        }
        ConfigCommands::Generate => print!("{}", Config::create_default_with_comments()),
        ConfigCommands::Path => println!("{}", config_path.display()),
    }
    Ok(ExitCode::SUCCESS)
}
