//! sharevault - secret-shared records across storage nodes
//!
//! Usage:
//!   sharevault allot <file>          - Show the per-node records for a file, offline
//!   sharevault create <file>         - Store records from a JSON file
//!   sharevault read [--filter json]  - Read and reassemble records
//!   sharevault schema list           - List schemas on every node
//!   sharevault keygen                - Print a fresh secret key
//!   sharevault status                - Show cluster status

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sharevault::{
    allot::allot_batch,
    cluster::{HttpTransport, NodeDescriptor, NodeOutcome},
    config::Config,
    crypto::{generate_secret_hex, ShareEngine},
    registry::ClusterRegistry,
    Error, Result, VaultClient,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Application id of the cluster described at the top level of the config
const DEFAULT_APP: &str = "default";

#[derive(Parser)]
#[command(name = "sharevault")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Secret-shared records across storage nodes")]
struct Cli {
    /// Configuration file path (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Application whose cluster to use
    #[arg(short, long, default_value = DEFAULT_APP)]
    app: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the record each node would receive, without contacting any node
    Allot {
        /// JSON file holding one record or an array of records
        file: PathBuf,
    },

    /// Store records
    Create {
        /// JSON file holding one record or an array of records
        file: PathBuf,
    },

    /// Read records and reassemble shared fields
    Read {
        /// Filter document
        #[arg(long, default_value = "{}")]
        filter: String,
    },

    /// Update matching records
    Update {
        /// Update document, e.g. '{"$set": {"email": {"%allot": "a@b.com"}}}'
        #[arg(long)]
        update: String,

        #[arg(long, default_value = "{}")]
        filter: String,
    },

    /// Delete matching records
    Delete {
        #[arg(long)]
        filter: String,
    },

    /// Delete every record in the collection
    Flush,

    /// Manage schemas
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },

    /// Generate a secret key (hex)
    Keygen,

    /// Show configuration and node status
    Status,
}

#[derive(Subcommand)]
enum SchemaAction {
    /// Create a schema on every node
    Create {
        /// Schema identifier (generated when omitted)
        #[arg(long)]
        id: Option<String>,

        #[arg(long)]
        name: String,

        /// JSON schema file
        file: PathBuf,
    },

    /// List schemas on every node
    List,

    /// Delete a schema from every node
    Delete {
        #[arg(long)]
        id: String,
    },
}

fn main() {
    let cli = Cli::parse();
    let config = Config::load(config_path(cli.config.as_deref()));

    // Setup logging
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config
            .as_ref()
            .map(|c| c.logging.level.clone())
            .unwrap_or_else(|_| "info".to_string())
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set subscriber: {}", e);
    }

    if let Err(e) = run_command(cli.command, &cli.app, config) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run_command(command: Commands, app: &str, config: Result<Config>) -> Result<()> {
    match command {
        // needs no configuration
        Commands::Keygen => {
            println!("{}", generate_secret_hex());
            Ok(())
        }
        Commands::Allot { file } => cmd_allot(&config?, app, &file),
        Commands::Status => cmd_status(&config?, app),
        command => {
            let config = config?;
            let runtime =
                tokio::runtime::Runtime::new().map_err(|e| Error::Internal(e.to_string()))?;
            runtime.block_on(run_remote(command, app, &config))
        }
    }
}

async fn run_remote(command: Commands, app: &str, config: &Config) -> Result<()> {
    let transport = Arc::new(HttpTransport::new(&config.transport)?);
    let registry = ClusterRegistry::from_config(config, transport, DEFAULT_APP)?;
    let client = registry.client_for(app).await?;

    match command {
        Commands::Create { file } => {
            let records = read_records_file(&file)?;
            info!("Creating {} records in {}", records.len(), client.collection());
            report(&client.create_records(records).await?)
        }
        Commands::Read { filter } => {
            let reassembly = client.read_records(parse_json("filter", &filter)?).await;
            for failure in &reassembly.failures {
                warn!("Record {:?} could not be reassembled: {}", failure.id, failure.error);
            }
            print_json(&reassembly)
        }
        Commands::Update { update, filter } => {
            let outcomes = client
                .update_records(parse_json("update", &update)?, parse_json("filter", &filter)?)
                .await?;
            report(&outcomes)
        }
        Commands::Delete { filter } => {
            report(&client.delete_records(parse_json("filter", &filter)?).await)
        }
        Commands::Flush => report(&client.flush_collection().await),
        Commands::Schema { action } => cmd_schema(&client, action).await,
        Commands::Allot { .. } | Commands::Keygen | Commands::Status => Ok(()),
    }
}

async fn cmd_schema(client: &VaultClient, action: SchemaAction) -> Result<()> {
    match action {
        SchemaAction::Create { id, name, file } => {
            let schema = read_json_file(&file)?;
            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            println!("Schema id: {}", id);
            report(&client.create_schema(&id, &name, schema).await)
        }
        SchemaAction::List => report(&client.list_schemas().await),
        SchemaAction::Delete { id } => report(&client.delete_schema(&id).await),
    }
}

fn cmd_allot(config: &Config, app: &str, file: &Path) -> Result<()> {
    let (nodes, _) = cluster_for(config, app)?;
    let engine = ShareEngine::initialize(&config.key, nodes.len(), &config.kdf)?;
    let sets = allot_batch(&engine, read_records_file(file)?)?;

    let mut per_node = serde_json::Map::new();
    for (index, node) in nodes.iter().enumerate() {
        let records: Vec<&Value> = sets.iter().filter_map(|set| set.get(index)).collect();
        per_node.insert(node.id.clone(), serde_json::to_value(records)?);
    }

    print_json(&per_node)
}

fn cmd_status(config: &Config, app: &str) -> Result<()> {
    let (nodes, collection) = cluster_for(config, app)?;

    println!("sharevault status");
    println!("=================");
    println!();
    println!("Application: {}", app);
    println!("Collection:  {}", collection);
    println!("Key:         {} / {}", config.key.kind, config.key.operation);
    println!("Timeout:     {} ms", config.transport.timeout_ms);
    println!();
    println!("Nodes ({}):", nodes.len());
    for node in &nodes {
        println!("  {}  {}", node.id, node.url);
    }

    if !config.applications.is_empty() {
        println!();
        println!("Applications:");
        let mut apps: Vec<&String> = config.applications.keys().collect();
        apps.sort();
        for app in apps {
            println!("  {}", app);
        }
    }

    let runtime = tokio::runtime::Runtime::new().map_err(|e| Error::Internal(e.to_string()))?;
    runtime.block_on(async {
        let transport = Arc::new(HttpTransport::new(&config.transport)?);
        let registry = ClusterRegistry::from_config(config, transport, DEFAULT_APP)?;
        let client = registry.client_for(app).await?;

        // schema listing doubles as a reachability check
        client.list_schemas().await;
        let health = client.health();

        println!();
        println!("Cluster: {:?}", health.status);
        for node in &health.nodes {
            match &node.last_error {
                Some(e) => println!("  {}: {:?} ({})", node.node_id, node.status, e),
                None => println!("  {}: {:?}", node.node_id, node.status),
            }
        }
        Ok::<_, Error>(())
    })
}

fn cluster_for(config: &Config, app: &str) -> Result<(Vec<NodeDescriptor>, String)> {
    if app == DEFAULT_APP {
        return Ok((config.nodes.clone(), config.collection.clone()));
    }
    config
        .applications
        .get(app)
        .map(|a| (a.nodes.clone(), a.collection.clone()))
        .ok_or_else(|| Error::UnknownApplication(app.to_string()))
}

/// Print outcomes and fail if any node failed
fn report(outcomes: &[NodeOutcome]) -> Result<()> {
    print_json(&outcomes)?;

    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|o| !o.is_success())
        .map(|o| o.node().id.as_str())
        .collect();
    if failed.is_empty() {
        Ok(())
    } else {
        Err(Error::Internal(format!(
            "{} of {} nodes failed: {}",
            failed.len(),
            outcomes.len(),
            failed.join(", ")
        )))
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_json(what: &str, text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|e| Error::InvalidRecord(format!("{} is not valid JSON: {}", what, e)))
}

fn read_json_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)?;
    parse_json(&path.display().to_string(), &content)
}

fn read_records_file(path: &Path) -> Result<Vec<Value>> {
    match read_json_file(path)? {
        Value::Array(records) => Ok(records),
        record => Ok(vec![record]),
    }
}

/// Explicit `--config`, else the platform default
fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit.map(expand_tilde).unwrap_or_else(Config::default_path)
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
