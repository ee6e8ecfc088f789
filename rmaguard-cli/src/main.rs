//! rmaguard operator CLI
//!
//! Command-line access to RMA and stock records of every product line, the
//! product-line registry, the spreadsheet staging area and the batch worker.
//! Results print as JSON on stdout; the exit code is non-zero when the
//! operation failed.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use rmaguard::config::RmaConfig;
use rmaguard::{
    BatchOrchestrator, FieldMap, Outcome, PgExecutor, ProductLineRegistry, ProductLineStore,
    RmaService, StagingArea, StockService,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "rmaguard")]
#[command(about = "RMA and spare-stock records per product line")]
#[command(version = "0.1.0")]
struct Cli {
    /// Database connection URL (overrides configuration)
    #[arg(long)]
    database_url: Option<String>,

    /// Configuration file
    #[arg(long, default_value = "config/config.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Product-line registry
    #[command(subcommand)]
    Lines(LinesCommand),

    /// RMA records
    #[command(subcommand)]
    Rma(RmaCommand),

    /// Spare-stock records
    #[command(subcommand)]
    Stock(StockCommand),

    /// Batch reconciliation worker
    #[command(subcommand)]
    Batch(BatchCommand),

    /// Spreadsheet staging area
    #[command(subcommand)]
    Upload(UploadCommand),
}

#[derive(Subcommand)]
enum LinesCommand {
    /// List registered product lines
    List,
    /// Register a product line
    Add { product_line: String },
    /// Seed the default product lines into an empty registry
    Init,
}

#[derive(Args)]
struct Criteria {
    /// Search criterion, e.g. `--where serialNo=SN123` (repeatable)
    #[arg(long = "where", value_parser = parse_pair)]
    criteria: Vec<(String, String)>,
}

#[derive(Args)]
struct Fields {
    /// Column value, e.g. `--field Remark=checked` (repeatable)
    #[arg(long = "field", value_parser = parse_pair)]
    fields: Vec<(String, String)>,
}

#[derive(Subcommand)]
enum RmaCommand {
    Search {
        product_line: String,
        #[command(flatten)]
        criteria: Criteria,
    },
    Get {
        product_line: String,
        serial_no: String,
    },
    Create {
        product_line: String,
        #[command(flatten)]
        fields: Fields,
    },
    /// Partial update, optionally consuming one stock unit atomically
    Update {
        product_line: String,
        serial_no: String,
        #[command(flatten)]
        fields: Fields,
        /// Serial number of the stock unit used as replacement
        #[arg(long)]
        consume_stock: Option<String>,
    },
    Delete {
        product_line: String,
        serial_no: String,
    },
    /// Records still waiting for a replacement unit
    Pending { product_line: String },
    /// Records that received a replacement unit
    Completed { product_line: String },
    Keyword {
        product_line: String,
        keyword: String,
    },
    /// First record matching serialNo/pn/sku plus the line's stock
    ForUpdate {
        product_line: String,
        #[command(flatten)]
        criteria: Criteria,
    },
}

#[derive(Subcommand)]
enum StockCommand {
    List {
        product_line: String,
    },
    Search {
        product_line: String,
        #[command(flatten)]
        criteria: Criteria,
    },
    Get {
        product_line: String,
        serial_no: String,
    },
    Create {
        product_line: String,
        #[command(flatten)]
        fields: Fields,
    },
    Update {
        product_line: String,
        serial_no: String,
        #[command(flatten)]
        fields: Fields,
    },
    Delete {
        product_line: String,
        serial_no: String,
    },
    /// Delete several units; failures do not stop the rest
    DeleteMany {
        product_line: String,
        #[arg(required = true)]
        serial_nos: Vec<String>,
    },
    Stats {
        product_line: String,
    },
    Keyword {
        product_line: String,
        keyword: String,
    },
}

#[derive(Subcommand)]
enum BatchCommand {
    /// Run the worker for one product line
    Run {
        product_line: String,
        /// Execution ceiling in seconds (default from configuration)
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[derive(Subcommand)]
enum UploadCommand {
    /// Copy a spreadsheet into the staging area
    Put {
        file: PathBuf,
        /// Name inside the staging area (default: the file's name)
        #[arg(long)]
        name: Option<String>,
    },
    List,
    Rm { name: String },
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got '{raw}'")),
    }
}

fn to_field_map(pairs: Vec<(String, String)>) -> FieldMap {
    pairs
        .into_iter()
        .fold(FieldMap::new(), |map, (key, value)| map.with(key, value))
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    match run(cli) {
        Ok(true) => process::exit(0),
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            process::exit(2);
        }
    }
}

/// Dispatch a command; `Ok(false)` means the operation ran and failed.
fn run(cli: Cli) -> Result<bool> {
    let mut config = RmaConfig::load_from(&cli.config).context("loading configuration")?;
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }

    match cli.command {
        Commands::Upload(command) => handle_upload(&config, command),
        Commands::Lines(command) => {
            let executor = connect(&config)?;
            handle_lines(&config, &executor, command)
        }
        Commands::Rma(command) => {
            let executor = connect(&config)?;
            let registry = load_registry(&executor)?;
            handle_rma(RmaService::new(&executor, registry), command)
        }
        Commands::Stock(command) => {
            let executor = connect(&config)?;
            let registry = load_registry(&executor)?;
            handle_stock(StockService::new(&executor, registry), command)
        }
        Commands::Batch(BatchCommand::Run {
            product_line,
            timeout,
        }) => {
            let registry = {
                let executor = connect(&config)?;
                load_registry(&executor)?
            };
            let mut orchestrator =
                BatchOrchestrator::new(registry, config.database.clone(), config.batch.clone());
            if let Some(seconds) = timeout {
                orchestrator = orchestrator.with_timeout(Duration::from_secs(seconds));
            }
            eprintln!(
                "{} worker for {product_line} (ceiling {}s)",
                "Running".cyan().bold(),
                orchestrator.timeout().as_secs()
            );
            emit(&orchestrator.execute(&product_line).into_outcome())
        }
    }
}

fn connect(config: &RmaConfig) -> Result<PgExecutor> {
    PgExecutor::connect(&config.database.url).context("connecting to the database")
}

fn load_registry(executor: &PgExecutor) -> Result<Arc<ProductLineRegistry>> {
    let registry = ProductLineStore::new(executor)
        .load_registry()
        .context("loading product lines")?;
    if registry.count() == 0 {
        log::warn!("no product lines registered; run `rmaguard lines init`");
    }
    Ok(Arc::new(registry))
}

/// Print an outcome as JSON plus a colored status line; returns its success flag.
fn emit<T: Serialize>(outcome: &Outcome<T>) -> Result<bool> {
    println!("{}", serde_json::to_string_pretty(outcome)?);
    if outcome.success {
        eprintln!("{} {}", "✔".green().bold(), outcome.message);
    } else {
        eprintln!("{} {}", "✘".red().bold(), outcome.message);
    }
    Ok(outcome.success)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn handle_lines(config: &RmaConfig, executor: &PgExecutor, command: LinesCommand) -> Result<bool> {
    let store = ProductLineStore::new(executor);
    match command {
        LinesCommand::List => {
            print_json(&store.load().context("listing product lines")?)?;
        }
        LinesCommand::Add { product_line } => {
            if store.exists(&product_line)? {
                bail!("product line '{}' already exists", product_line.trim());
            }
            store.insert(&product_line)?;
            eprintln!("{} {}", "Added".green().bold(), product_line.trim());
        }
        LinesCommand::Init => {
            let seeded = store.initialize_defaults(&config.product_lines.defaults)?;
            if seeded.is_empty() {
                eprintln!("Product lines already present, nothing seeded");
            } else {
                eprintln!("{} {}", "Seeded".green().bold(), seeded.join(", "));
            }
        }
    }
    Ok(true)
}

fn handle_rma(service: RmaService<&PgExecutor>, command: RmaCommand) -> Result<bool> {
    match command {
        RmaCommand::Search {
            product_line,
            criteria,
        } => emit(&service.search(&product_line, &to_field_map(criteria.criteria))),
        RmaCommand::Get {
            product_line,
            serial_no,
        } => emit(&service.get(&product_line, &serial_no)),
        RmaCommand::Create {
            product_line,
            fields,
        } => emit(&service.create(&product_line, &to_field_map(fields.fields))),
        RmaCommand::Update {
            product_line,
            serial_no,
            fields,
            consume_stock,
        } => emit(&service.update(
            &product_line,
            &serial_no,
            &to_field_map(fields.fields),
            consume_stock.as_deref(),
        )),
        RmaCommand::Delete {
            product_line,
            serial_no,
        } => emit(&service.delete(&product_line, &serial_no)),
        RmaCommand::Pending { product_line } => emit(&service.pending_replacement(&product_line)),
        RmaCommand::Completed { product_line } => {
            emit(&service.completed_replacement(&product_line))
        }
        RmaCommand::Keyword {
            product_line,
            keyword,
        } => emit(&service.keyword_search(&product_line, &keyword)),
        RmaCommand::ForUpdate {
            product_line,
            criteria,
        } => {
            let criteria = to_field_map(criteria.criteria);
            if criteria.is_empty() {
                emit(&service.load_update_page(&product_line))
            } else {
                emit(&service.find_for_update(&product_line, &criteria))
            }
        }
    }
}

fn handle_stock(service: StockService<&PgExecutor>, command: StockCommand) -> Result<bool> {
    match command {
        StockCommand::List { product_line } => emit(&service.list_all(&product_line)),
        StockCommand::Search {
            product_line,
            criteria,
        } => emit(&service.search(&product_line, &to_field_map(criteria.criteria))),
        StockCommand::Get {
            product_line,
            serial_no,
        } => emit(&service.get(&product_line, &serial_no)),
        StockCommand::Create {
            product_line,
            fields,
        } => emit(&service.create(&product_line, &to_field_map(fields.fields))),
        StockCommand::Update {
            product_line,
            serial_no,
            fields,
        } => emit(&service.update(&product_line, &serial_no, &to_field_map(fields.fields))),
        StockCommand::Delete {
            product_line,
            serial_no,
        } => emit(&service.delete(&product_line, &serial_no)),
        StockCommand::DeleteMany {
            product_line,
            serial_nos,
        } => emit(&service.delete_many(&product_line, &serial_nos)),
        StockCommand::Stats { product_line } => emit(&service.stats(&product_line)),
        StockCommand::Keyword {
            product_line,
            keyword,
        } => emit(&service.keyword_search(&product_line, &keyword)),
    }
}

fn handle_upload(config: &RmaConfig, command: UploadCommand) -> Result<bool> {
    let area = StagingArea::new(&config.staging.dir);
    match command {
        UploadCommand::Put { file, name } => {
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
                    .with_context(|| format!("{} has no usable file name", file.display()))?,
            };
            let bytes =
                std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            print_json(&area.store(&name, &bytes)?)?;
        }
        UploadCommand::List => print_json(&area.list()?)?,
        UploadCommand::Rm { name } => {
            area.remove(&name)?;
            eprintln!("{} {name}", "Removed".green().bold());
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_pair() {
        assert_eq!(
            parse_pair("Remark=a=b").unwrap(),
            ("Remark".to_string(), "a=b".to_string())
        );
        assert_eq!(parse_pair("PN=").unwrap(), ("PN".to_string(), String::new()));
        assert!(parse_pair("novalue").is_err());
        assert!(parse_pair("=x").is_err());
    }

    #[test]
    fn test_update_arguments() {
        let cli = Cli::try_parse_from([
            "rmaguard",
            "rma",
            "update",
            "VGA",
            "SN1",
            "--field",
            "Remark=swapped",
            "--field",
            "Replacement_SN_in_TW=T1",
            "--consume-stock",
            "T1",
        ])
        .unwrap();
        match cli.command {
            Commands::Rma(RmaCommand::Update {
                fields,
                consume_stock,
                ..
            }) => {
                let map = to_field_map(fields.fields);
                assert_eq!(map.get_text("Remark"), Some("swapped"));
                assert_eq!(map.len(), 2);
                assert_eq!(consume_stock.as_deref(), Some("T1"));
            }
            _ => panic!("parsed into the wrong command"),
        }
    }

    #[test]
    fn test_upload_needs_no_database() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("vga.xlsx");
        std::fs::write(&source, b"PK").unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            format!("[staging]\ndir = {:?}\n", dir.path().join("data").display().to_string()),
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "rmaguard",
            "--config",
            config_path.to_str().unwrap(),
            "upload",
            "put",
            source.to_str().unwrap(),
        ])
        .unwrap();
        assert!(run(cli).unwrap());
        assert!(dir.path().join("data").join("vga.xlsx").exists());
    }
}
