use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tablegate::config::{default_config_path, load_config};
use tablegate::core::db::builder::build_row_count_query;
use tablegate::{ColumnBag, Database, Result, Value};
use tracing::{error, info};

/// Inspect and query a MySQL database through the table gateway
#[derive(Parser)]
#[command(name = "tablegate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Column metadata of a table
    Describe { table: String },

    /// Run a SELECT; `[a,b,c]` binds an IN (?) list
    Query { sql: String, params: Vec<String> },

    /// Row count of a SELECT
    Count { sql: String },

    /// Whether a table exists
    Exists { table: String },

    /// Index metadata of a table
    Indexes { table: String },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Describe { .. } => "describe",
            Command::Query { .. } => "query",
            Command::Count { .. } => "count",
            Command::Exists { .. } => "exists",
            Command::Indexes { .. } => "indexes",
        }
    }
}

/// `[a,b]` becomes a list parameter; anything else is text.
fn parse_param(raw: &str) -> Value {
    match raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        Some(items) => Value::List(
            items
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(Value::from)
                .collect(),
        ),
        None => Value::from(raw),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(command: &Command, db: &Database) -> Result<()> {
    match command {
        Command::Describe { table } => print_json(&db.describe_table(table)?.columns),
        Command::Query { sql, params } => {
            let params: Vec<Value> = params.iter().map(|p| parse_param(p)).collect();
            let rows: Vec<ColumnBag> = db.executor().get_all(sql, &params)?;
            print_json(&rows)
        }
        Command::Count { sql } => {
            let sql = build_row_count_query(sql)?;
            let count = db.executor().get_one(&sql, &[], 0)?.unwrap_or(Value::Int(0));
            print_json(&count)
        }
        Command::Exists { table } => print_json(&db.executor().table_exists(table)?),
        Command::Indexes { table } => print_json(&db.executor().get_indexes(table, "", &[])?),
    }
}

fn main() {
    let cli = Cli::parse();

    let path = match cli.config.clone().or_else(default_config_path) {
        Some(path) => path,
        None => {
            eprintln!("No configuration path given and no default config directory available");
            std::process::exit(1);
        }
    };
    let config = match load_config(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Logs go to stderr so stdout stays valid JSON
    tracing_subscriber::fmt()
        .with_max_level(config.log_level())
        .with_writer(std::io::stderr)
        .init();

    info!(command = cli.command.name(), "Starting tablegate");

    let result = Database::connect(config.database).and_then(|db| run(&cli.command, &db));
    if let Err(e) = result {
        error!("{}", e);
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
