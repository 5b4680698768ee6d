//! Binary entry point for dbkit.
//!
//! Runs queries and schema introspection against connections declared in the
//! config file, or against a `SQLite` file given by path.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dbkit::config::DbkitConfig;
use dbkit::connectors::{Connector, ConnectorOptions, ConnectorRegistry};
use dbkit::models::{ConnectionDescriptor, ConnectionId, RowKey};
use dbkit::observability::init_logging;
use dbkit::services::{
    ConnectionStore, DataEditor, InMemoryConnectionStore, InMemoryHistory, OperationLock,
    QueryExecutor, SchemaExplorer,
};
use dbkit::shell::parse_command;
use serde::Serialize;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

/// dbkit - one query-and-edit interface over several database engines.
#[derive(Parser)]
#[command(name = "dbkit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run a query (SQL, or shell syntax for document stores).
    Query {
        /// Connection id, name, or path to a `SQLite` file.
        connection: String,

        /// Query text.
        query: String,

        /// Abandon the query after this many milliseconds.
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },

    /// Check that a connection is reachable.
    Test {
        /// Connection id, name, or path to a `SQLite` file.
        connection: String,
    },

    /// List schemas (databases on document stores).
    Schemas {
        /// Connection id, name, or path to a `SQLite` file.
        connection: String,
    },

    /// List tables (collections on document stores).
    Tables {
        /// Connection id, name, or path to a `SQLite` file.
        connection: String,

        /// Schema to list.
        #[arg(short, long)]
        schema: Option<String>,
    },

    /// Show column metadata and sample rows for a table.
    Columns {
        /// Connection id, name, or path to a `SQLite` file.
        connection: String,

        /// Table name.
        table: String,

        /// Schema of the table.
        #[arg(short, long)]
        schema: Option<String>,
    },

    /// Print the full schema tree.
    Tree {
        /// Connection id, name, or path to a `SQLite` file.
        connection: String,
    },

    /// List a table's constraints.
    Constraints {
        /// Connection id, name, or path to a `SQLite` file.
        connection: String,

        /// Table name.
        table: String,

        /// Schema of the table.
        #[arg(short, long)]
        schema: Option<String>,
    },

    /// Update one cell and commit it.
    Update {
        /// Connection id, name, or path to a `SQLite` file.
        connection: String,

        /// Table name.
        table: String,

        /// Row key: a scalar for the `id` column, or a JSON object.
        key: String,

        /// Column to update.
        column: String,

        /// New value as JSON (bare text is taken as a string).
        value: String,

        /// Schema of the table.
        #[arg(short, long)]
        schema: Option<String>,
    },

    /// Parse a shell command and print the structured call.
    Parse {
        /// Command text, e.g. `db.users.find({"age": 21})`.
        command: String,
    },

    /// List declared connections.
    Connections,
}

/// Process-scoped state shared by every command.
struct App {
    config: DbkitConfig,
    store: InMemoryConnectionStore,
    registry: ConnectorRegistry,
    lock: Arc<OperationLock>,
}

impl App {
    fn new(config: DbkitConfig) -> Self {
        let store = InMemoryConnectionStore::from_config(&config);
        let registry = ConnectorRegistry::with_options(ConnectorOptions::from_config(&config));
        Self {
            config,
            store,
            registry,
            lock: Arc::new(OperationLock::new()),
        }
    }

    /// Resolves a connection by id, then by name, then as a `SQLite` path.
    fn descriptor(&self, key: &str) -> Result<ConnectionDescriptor> {
        if let Some(descriptor) = self.store.get_connection(&ConnectionId::new(key)) {
            return Ok(descriptor);
        }
        if let Some(descriptor) = self.config.connection(key) {
            return Ok(descriptor.clone());
        }
        if Path::new(key).is_file() {
            return Ok(ConnectionDescriptor::sqlite(key, key));
        }
        bail!("unknown connection '{key}'")
    }

    async fn open(&self, key: &str) -> Result<(ConnectionDescriptor, Arc<dyn Connector>)> {
        let descriptor = self.descriptor(key)?;
        let connector = self.registry.create(&descriptor)?;
        connector
            .connect()
            .await?
            .into_result()
            .with_context(|| format!("connecting to '{}'", descriptor.name))?;
        Ok((descriptor, connector))
    }
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    let logging = config.logging.clone().with_verbose(cli.verbose);
    if let Err(e) = init_logging(&logging) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli.command, App::new(config)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Loads configuration, then applies environment overrides.
fn load_config(path: Option<&str>) -> Result<DbkitConfig> {
    let config = match path {
        Some(path) => DbkitConfig::load_from_file(Path::new(path))?,
        None => DbkitConfig::load_default(),
    };
    Ok(config.with_env_overrides())
}

/// Runs the selected command.
async fn run_command(command: Commands, app: App) -> Result<()> {
    match command {
        Commands::Query {
            connection,
            query,
            timeout_ms,
        } => cmd_query(&app, &connection, &query, timeout_ms).await,
        Commands::Test { connection } => cmd_test(&app, &connection).await,
        Commands::Schemas { connection } => {
            let (_, connector) = app.open(&connection).await?;
            print_json(&connector.get_schemas().await?)
        },
        Commands::Tables { connection, schema } => {
            let (_, connector) = app.open(&connection).await?;
            print_json(&connector.get_tables(schema.as_deref()).await?)
        },
        Commands::Columns {
            connection,
            table,
            schema,
        } => {
            let (descriptor, connector) = app.open(&connection).await?;
            let explorer = SchemaExplorer::from_config(&app.config, Arc::clone(&app.lock));
            let info = explorer
                .table_info(&descriptor.id, connector.as_ref(), &table, schema.as_deref())
                .await?;
            print_json(&info)
        },
        Commands::Tree { connection } => {
            let (descriptor, connector) = app.open(&connection).await?;
            let explorer = SchemaExplorer::from_config(&app.config, Arc::clone(&app.lock));
            print_json(&explorer.schema_tree(&descriptor.id, connector.as_ref()).await?)
        },
        Commands::Constraints {
            connection,
            table,
            schema,
        } => {
            let (descriptor, connector) = app.open(&connection).await?;
            let editor = DataEditor::new(descriptor.id, connector, Arc::clone(&app.lock));
            print_json(&editor.get_table_constraints(&table, schema.as_deref()).await?)
        },
        Commands::Update {
            connection,
            table,
            key,
            column,
            value,
            schema,
        } => cmd_update(&app, &connection, &table, &key, &column, &value, schema.as_deref()).await,
        Commands::Parse { command } => print_json(&parse_command(&command)?),
        Commands::Connections => cmd_connections(&app),
    }
}

async fn cmd_query(app: &App, connection: &str, query: &str, timeout_ms: Option<u64>) -> Result<()> {
    let (descriptor, connector) = app.open(connection).await?;
    let history = Arc::new(InMemoryHistory::new(app.config.history_capacity));
    let executor = QueryExecutor::new(Arc::clone(&app.lock), history)
        .with_default_timeout(app.config.default_query_timeout());
    let outcome = executor
        .execute(&descriptor.id, connector, query, timeout_ms.map(Duration::from_millis))
        .await?;
    print_json(&outcome.rows)?;
    eprintln!("{} row(s) in {} ms", outcome.row_count, outcome.elapsed.as_millis());
    Ok(())
}

async fn cmd_test(app: &App, connection: &str) -> Result<()> {
    let descriptor = app.descriptor(connection)?;
    let connector = app.registry.create(&descriptor)?;
    let outcome = connector.connect().await?;
    if outcome.is_connected() && connector.test_connection().await {
        println!("{}: ok ({})", descriptor.name, descriptor.address());
        connector.disconnect().await?;
        Ok(())
    } else {
        outcome.into_result()?;
        bail!("{}: connection test failed", descriptor.name)
    }
}

async fn cmd_update(
    app: &App,
    connection: &str,
    table: &str,
    key: &str,
    column: &str,
    value: &str,
    schema: Option<&str>,
) -> Result<()> {
    let (descriptor, connector) = app.open(connection).await?;
    let editor = DataEditor::new(descriptor.id, connector, Arc::clone(&app.lock))
        .with_auto_commit(app.config.auto_commit);
    let change = editor
        .update_cell(table, RowKey::from(json_arg(key)), column, json_arg(value), schema)
        .await?;
    editor.commit_changes().await?;
    print_json(&change)
}

fn cmd_connections(app: &App) -> Result<()> {
    for descriptor in app.store.list() {
        println!(
            "{}\t{}\t{}\t{}",
            descriptor.id,
            descriptor.name,
            descriptor.backend,
            descriptor.address()
        );
    }
    Ok(())
}

/// Parses a JSON argument, taking anything unparsable as a string.
fn json_arg(text: &str) -> serde_json::Value {
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_string()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
