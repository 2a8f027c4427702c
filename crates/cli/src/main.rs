use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use graft_config::overrides::{build_registry, parse_overrides, parse_schemas, OverridesFile};
use graft_config::{Registry, Settings};
use graft_core::{Attributes, ManagedResource};
use graft_engine::{Engine, MemoryLookup, ReferenceLookup};
use serde::{Deserialize, Serialize};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "graftctl", version, about = "Graft CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Resource schemas (YAML or JSON)
    #[arg(long = "schemas", env = "GRAFT_SCHEMAS", global = true)]
    schemas: Option<PathBuf>,

    /// Per-resource overrides (YAML or JSON)
    #[arg(long = "overrides", env = "GRAFT_OVERRIDES", global = true)]
    overrides: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate schemas and overrides and list registered resource types
    Check,
    /// Fold an observed raw state into a managed resource
    Observe {
        /// External resource type, e.g. "aws_s3_bucket"
        #[arg(long = "type")]
        type_name: String,
        /// Managed resource manifest
        #[arg(long = "resource")]
        resource: PathBuf,
        /// Observed raw attributes
        #[arg(long = "observed")]
        observed: PathBuf,
        /// Write the updated manifest back to --resource
        #[arg(long = "write", action = ArgAction::SetTrue)]
        write: bool,
    },
    /// Resolve references and print the argument map to submit
    Prepare {
        /// External resource type, e.g. "aws_s3_bucket"
        #[arg(long = "type")]
        type_name: String,
        /// Managed resource manifest
        #[arg(long = "resource")]
        resource: PathBuf,
        /// Referenced objects (multi-document YAML); ignored with --cluster
        #[arg(long = "referents")]
        referents: Option<PathBuf>,
        /// Read referents from the current kube context instead
        #[arg(long = "cluster", action = ArgAction::SetTrue)]
        cluster: bool,
        /// Namespace for namespaced referents (default: current context)
        #[arg(long = "ns")]
        namespace: Option<String>,
    },
}

fn init_tracing() {
    let env = std::env::var("GRAFT_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("GRAFT_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid GRAFT_METRICS_ADDR; expected host:port");
        }
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn load_registry(cli: &Cli, settings: &Settings) -> Result<Registry> {
    let schemas_path = cli.schemas.as_deref().context("--schemas (or GRAFT_SCHEMAS) is required")?;
    let schemas = parse_schemas(&read(schemas_path)?, settings).with_context(|| format!("loading {}", schemas_path.display()))?;
    let overrides = match cli.overrides.as_deref() {
        Some(p) => parse_overrides(&read(p)?, settings).with_context(|| format!("loading {}", p.display()))?,
        None => OverridesFile::default(),
    };
    Ok(build_registry(schemas, overrides)?)
}

fn load_resource(path: &Path) -> Result<ManagedResource> {
    serde_yaml::from_str(&read(path)?).with_context(|| format!("parsing managed resource {}", path.display()))
}

fn load_attributes(path: &Path) -> Result<Attributes> {
    serde_yaml::from_str(&read(path)?).with_context(|| format!("parsing attributes {}", path.display()))
}

/// Every document of a multi-document YAML file; `List` documents are
/// flattened into their `items`.
fn load_referents(path: &Path) -> Result<MemoryLookup> {
    let text = read(path)?;
    let mut lookup = MemoryLookup::new();
    for doc in serde_yaml::Deserializer::from_str(&text) {
        let value = serde_json::Value::deserialize(doc).with_context(|| format!("parsing {}", path.display()))?;
        let objects = match value.get("items").and_then(|i| i.as_array()) {
            Some(items) => items.clone(),
            None if value.is_null() => continue,
            None => vec![value],
        };
        for object in objects {
            lookup.insert_object(object)?;
        }
    }
    info!(referents = lookup.len(), file = %path.display(), "referents loaded");
    Ok(lookup)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceSummary {
    name: String,
    paths: usize,
    references: Vec<String>,
    sensitive: Vec<String>,
    ignored: Vec<String>,
    name_initializer: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ObserveReport {
    identity: String,
    changed: bool,
    filled: Vec<String>,
    mismatches: Vec<String>,
    /// Key names only; values never leave the engine.
    payload_keys: Vec<String>,
    resource: ManagedResource,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrepareReport {
    identity: Option<String>,
    import_id: Option<String>,
    args: Attributes,
}

fn check(registry: &Registry, output: Output) -> Result<()> {
    let mut summaries = Vec::new();
    for name in registry.names() {
        let Some(reg) = registry.get(&name) else { continue };
        summaries.push(ResourceSummary {
            name: name.clone(),
            paths: reg.index.len(),
            references: reg.references.iter().map(|r| format!("{} -> {}", r.path, r.config.target)).collect(),
            sensitive: reg.index.sensitive_roots().map(|e| e.path.to_string()).collect(),
            ignored: reg.ignored.iter().map(|p| p.to_string()).collect(),
            name_initializer: reg.name_initializer_enabled(),
        });
    }
    match output {
        Output::Human => {
            println!("{:<32} {:>5} {:>4} {:>4}  NAME-INIT", "TYPE", "PATHS", "REFS", "SENS");
            for s in &summaries {
                println!("{:<32} {:>5} {:>4} {:>4}  {}", s.name, s.paths, s.references.len(), s.sensitive.len(), s.name_initializer);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&summaries)?),
    }
    Ok(())
}

fn observe(engine: &Engine<'_>, output: Output, type_name: &str, resource_path: &Path, observed_path: &Path, write: bool) -> Result<()> {
    let mut resource = load_resource(resource_path)?;
    let observed = load_attributes(observed_path)?;
    let out = engine.observe(type_name, &mut resource, &observed)?;
    let report = ObserveReport {
        identity: out.identity.value.clone(),
        changed: out.changed(),
        filled: out.filled.clone(),
        mismatches: out.skipped_mismatch.iter().map(|e| e.to_string()).collect(),
        payload_keys: out.payload.keys().cloned().collect(),
        resource,
    };
    if write && report.changed {
        std::fs::write(resource_path, serde_yaml::to_string(&report.resource)?)
            .with_context(|| format!("writing {}", resource_path.display()))?;
        info!(file = %resource_path.display(), "resource updated");
    }
    match output {
        Output::Human => {
            println!("identity: {}", report.identity);
            println!("changed:  {}", report.changed);
            for f in &report.filled {
                println!("  filled   {f}");
            }
            for m in &report.mismatches {
                println!("  skipped  {m}");
            }
            println!("connection keys: {}", report.payload_keys.join(", "));
            print!("{}", serde_yaml::to_string(&report.resource)?);
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

async fn prepare<L: ReferenceLookup + ?Sized>(engine: &Engine<'_>, output: Output, type_name: &str, resource_path: &Path, lookup: &L) -> Result<()> {
    let mut resource = load_resource(resource_path)?;
    let cancel = CancellationToken::new();
    let on_signal = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("interrupted; cancelling reference lookups");
                cancel.cancel();
            }
        }
    });
    let prepared = engine.prepare(type_name, &mut resource, lookup, &cancel).await;
    on_signal.abort();
    let prepared = prepared?;

    let report = PrepareReport {
        identity: prepared.identity.map(|i| i.value),
        import_id: prepared.import_id,
        args: prepared.args,
    };
    match output {
        Output::Human => {
            println!("identity:  {}", report.identity.as_deref().unwrap_or("<assigned on create>"));
            if let Some(id) = &report.import_id {
                println!("import id: {id}");
            }
            print!("{}", serde_yaml::to_string(&report.args)?);
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::from_env();
    let registry = load_registry(&cli, &settings)?;
    let engine = Engine::new(&registry, &settings);

    match &cli.command {
        Commands::Check => {
            info!(resources = registry.len(), "check invoked");
            check(&registry, cli.output)
        }
        Commands::Observe { type_name, resource, observed, write } => {
            info!(resource_type = %type_name, "observe invoked");
            observe(&engine, cli.output, type_name, resource, observed, *write)
        }
        Commands::Prepare { type_name, resource, referents, cluster, namespace } => {
            info!(resource_type = %type_name, cluster = *cluster, ns = ?namespace, "prepare invoked");
            if *cluster {
                let lookup = graft_kubehub::KubeLookup::connect(namespace.clone()).await?;
                prepare(&engine, cli.output, type_name, resource, &lookup).await
            } else {
                let lookup = match referents {
                    Some(p) => load_referents(p)?,
                    None => MemoryLookup::new(),
                };
                prepare(&engine, cli.output, type_name, resource, &lookup).await
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(error = ?e, "command failed");
        return Err(e);
    }
    Ok(())
}
