use clap::{Parser, Subcommand};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use configuration::{AppConfig, SettingsOverrides, init_logging, load_config};
use core_types::{QueryResult, Row, SqlValue};
use database::{CaseRepository, CaseSummary, DatabaseManager, PgDriver, QueryExecutor, connect, run_migrations};
use events::{AuditLogger, LogLevel, TracingAuditLogger};
use serde_json::json;
use std::process::ExitCode;
use std::sync::Arc;

/// The entry point for the JEC case-management terminal.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.settings) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // The guards flush the file sinks when they go out of scope at exit.
    let _guards = match init_logging(&config.log) {
        Ok(guards) => guards,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    let audit: Arc<dyn AuditLogger> = Arc::new(TracingAuditLogger::new());
    match run(cli.command, &config, audit).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "Command failed");
            eprintln!("Operation failed. See the logs for details.");
            ExitCode::FAILURE
        }
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// Case registry lookups and database maintenance for the JEC system.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: SettingsOverrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every case that is not closed.
    Cases,
    /// Search cases by case number, title or party name.
    Search {
        /// Substring to look for (case-insensitive).
        term: String,
    },
    /// Run a single SQL statement.
    Exec {
        /// The statement, using `$1`, `$2`, ... placeholders.
        sql: String,
        /// A positional parameter. Repeat for each placeholder.
        #[arg(long = "param", short = 'p')]
        params: Vec<String>,
        /// Print the rows the statement returns instead of committing it as a write.
        #[arg(long)]
        rows: bool,
    },
    /// Show query counters and pool occupancy.
    Metrics {
        /// Print the snapshot as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Create the schema and apply pending migrations.
    Migrate,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Cases => "cases",
            Commands::Search { .. } => "search",
            Commands::Exec { .. } => "exec",
            Commands::Metrics { .. } => "metrics",
            Commands::Migrate => "migrate",
        }
    }
}

// ==============================================================================
// Command Logic
// ==============================================================================

/// Runs one command against a freshly connected pool, then shuts the pool down.
async fn run(command: Commands, config: &AppConfig, audit: Arc<dyn AuditLogger>) -> anyhow::Result<()> {
    audit.log_interface_event(
        "cli",
        command.name(),
        Some(json!({ "schema": config.database.schema })),
        LogLevel::Info,
    );

    let manager = Arc::new(connect(&config.database, Arc::clone(&audit)).await?);
    let outcome = dispatch(command, config, &manager, audit).await;

    if let Err(e) = manager.close_all_connections().await {
        tracing::warn!(error = %e, "Connection pool did not close cleanly");
    }
    outcome
}

async fn dispatch(
    command: Commands,
    config: &AppConfig,
    manager: &Arc<DatabaseManager<PgDriver>>,
    audit: Arc<dyn AuditLogger>,
) -> anyhow::Result<()> {
    let executor: Arc<dyn QueryExecutor> = manager.clone();
    let repository = CaseRepository::new(executor, audit);

    match command {
        Commands::Cases => print_cases(&repository.list_active_cases().await?),
        Commands::Search { term } => print_cases(&repository.search_cases(&term).await?),
        Commands::Exec { sql, params, rows } => {
            let params = (!params.is_empty())
                .then(|| params.iter().map(|raw| SqlValue::parse_literal(raw)).collect());
            match manager.execute_query(&sql, params, rows).await? {
                QueryResult::Rows(rows) => print_rows(&rows),
                QueryResult::RowCount(count) => println!("{count} row(s) affected."),
            }
        }
        Commands::Metrics { json } => {
            let metrics = manager.get_metrics();
            if json {
                println!("{}", serde_json::to_string_pretty(&metrics)?);
            } else {
                let mut table = new_table(vec!["Metric", "Value"]);
                let last_success = metrics
                    .last_success
                    .map_or_else(|| "never".to_string(), |at| at.to_rfc3339());
                let average = metrics
                    .average_query_time()
                    .map_or_else(|| "-".to_string(), |secs| format!("{secs:.4}s"));
                table
                    .add_row(vec!["Total queries".to_string(), metrics.total_queries.to_string()])
                    .add_row(vec!["Failed queries".to_string(), metrics.failed_queries.to_string()])
                    .add_row(vec!["Connection issues".to_string(), metrics.connection_issues.to_string()])
                    .add_row(vec!["Last success".to_string(), last_success])
                    .add_row(vec!["Average query time".to_string(), average])
                    .add_row(vec!["Active connections".to_string(), metrics.active_connections.to_string()])
                    .add_row(vec!["Available connections".to_string(), metrics.available_connections.to_string()]);
                println!("{table}");
            }
        }
        Commands::Migrate => {
            run_migrations(&config.database).await?;
            println!("Migrations applied to schema '{}'.", config.database.schema);
        }
    }
    Ok(())
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn print_cases(cases: &[CaseSummary]) {
    if cases.is_empty() {
        println!("No cases found.");
        return;
    }
    let mut table = new_table(vec!["Case No.", "Title", "Category", "Status", "Filed"]);
    for case in cases {
        table.add_row(vec![
            case.case_number.clone(),
            case.title.clone(),
            case.category.clone(),
            case.status.clone(),
            case.filed_on.to_string(),
        ]);
    }
    println!("{table}");
}

fn print_rows(rows: &[Row]) {
    let Some(first) = rows.first() else {
        println!("(no rows)");
        return;
    };
    let mut table = new_table(first.columns().collect());
    for row in rows {
        table.add_row(row.iter().map(|(_, value)| value.to_string()).collect::<Vec<_>>());
    }
    println!("{table}");
    println!("{} row(s).", rows.len());
}
