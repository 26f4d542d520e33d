use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kcr_core::{equivalent, ExternalId, Manifest};
use kcr_kubehub::ClusterClients;
use kcr_reconcile::{AdapterConfig, Lifecycle, Reconciler, TrackedState};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "kcrctl", version, about = "Create, read, update and delete one Kubernetes object from a JSON/YAML document")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace for namespaced kinds whose document declares none
    #[arg(long = "default-ns", global = true, env = "KCR_DEFAULT_NAMESPACE")]
    default_namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the REST collection and scope a document maps to
    Resolve {
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
    },
    /// Create the object and print its id
    Create {
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// Write the tracked state (id + observed JSON) to this path
        #[arg(long = "state")]
        state: Option<PathBuf>,
    },
    /// Refresh tracked state from the live object and print it
    Read {
        #[arg(long = "state")]
        state: PathBuf,
    },
    /// Replace the tracked object with the document, skipping equivalent documents
    Update {
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        #[arg(long = "state")]
        state: PathBuf,
    },
    /// Delete the tracked object and remove its state file
    Delete {
        #[arg(long = "state")]
        state: PathBuf,
    },
    /// Adopt an existing object under an id (name or namespace/name)
    Import {
        id: String,
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        #[arg(long = "state")]
        state: Option<PathBuf>,
    },
    /// Report whether two documents differ outside server-managed fields
    Diff {
        a: PathBuf,
        b: PathBuf,
    },
}

fn init_tracing() {
    let env = std::env::var("KCR_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KCR_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KCR_METRICS_ADDR; expected host:port");
        }
    }
}

fn read_doc(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn print_json(output: Output, v: &serde_json::Value) -> Result<()> {
    match output {
        Output::Human => println!("{}", serde_json::to_string_pretty(v)?),
        Output::Json => println!("{}", serde_json::to_string(v)?),
    }
    Ok(())
}

fn print_state(output: Output, state: &TrackedState) -> Result<()> {
    match output {
        Output::Human => println!("{}", state.id),
        Output::Json => println!("{}", serde_json::to_string(state)?),
    }
    Ok(())
}

fn load_state(path: &Path) -> Result<TrackedState> {
    serde_json::from_str(&read_doc(path)?).with_context(|| format!("decoding state {}", path.display()))
}

fn save_state(path: &Path, state: &TrackedState) -> Result<()> {
    std::fs::write(path, serde_json::to_vec_pretty(state)?).with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), id = %state.id, "state written");
    Ok(())
}

fn drop_state(path: &Path) -> Result<()> {
    std::fs::remove_file(path).with_context(|| format!("removing {}", path.display()))
}

async fn connect(config: AdapterConfig) -> Result<Lifecycle> {
    let clients = ClusterClients::try_default().await?;
    Ok(Lifecycle::new(Reconciler::new(clients, config)))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let mut config = AdapterConfig::from_env();
    if let Some(ns) = cli.default_namespace.as_deref() {
        config = config.with_default_namespace(ns);
    }

    match cli.command {
        Commands::Diff { a, b } => {
            let same = equivalent(&read_doc(&a)?, &read_doc(&b)?);
            match cli.output {
                Output::Human => println!("{}", if same { "equivalent" } else { "changed" }),
                Output::Json => println!("{}", serde_json::json!({ "equivalent": same })),
            }
        }
        Commands::Resolve { file } => {
            let lifecycle = connect(config).await?;
            let reconciler = lifecycle.reconciler();
            let manifest = Manifest::parse(&read_doc(&file)?)?;
            let mapping = reconciler.resolve(&manifest).await?;
            let scope = if mapping.namespaced { "namespaced" } else { "cluster" };
            match cli.output {
                Output::Human => println!("{} • {} • {}", manifest.type_descriptor(), mapping.resource.plural, scope),
                Output::Json => println!(
                    "{}",
                    serde_json::json!({
                        "gvk": manifest.type_descriptor(),
                        "resource": mapping.resource.plural,
                        "namespaced": mapping.namespaced,
                    })
                ),
            }
        }
        Commands::Create { file, state } => {
            let doc = read_doc(&file)?;
            let tracked = connect(config).await?.create(&doc).await?;
            if let Some(path) = state {
                save_state(&path, &tracked)?;
            }
            print_state(cli.output, &tracked)?;
        }
        Commands::Read { state } => {
            let tracked = load_state(&state)?;
            match connect(config).await?.read(&tracked).await? {
                Some(next) => {
                    save_state(&state, &next)?;
                    let observed: serde_json::Value = serde_json::from_str(&next.json)?;
                    print_json(cli.output, &observed)?;
                }
                None => {
                    drop_state(&state)?;
                    match cli.output {
                        Output::Human => println!("{} no longer exists", tracked.id),
                        Output::Json => println!("null"),
                    }
                }
            }
        }
        Commands::Update { file, state } => {
            let tracked = load_state(&state)?;
            let next = connect(config).await?.update(&tracked, &read_doc(&file)?).await?;
            save_state(&state, &next)?;
            print_state(cli.output, &next)?;
        }
        Commands::Delete { state } => {
            let tracked = load_state(&state)?;
            connect(config).await?.delete(&tracked).await?;
            drop_state(&state)?;
            if cli.output == Output::Human {
                println!("deleted {}", tracked.id);
            }
        }
        Commands::Import { id, file, state } => {
            let id: ExternalId = id.parse()?;
            let tracked = connect(config).await?.import(id, &read_doc(&file)?).await?;
            if let Some(path) = state {
                save_state(&path, &tracked)?;
            }
            print_state(cli.output, &tracked)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_update_with_state() {
        let cli = Cli::try_parse_from(["kcrctl", "-o", "json", "update", "-f", "new.yaml", "--state", "tom.state.json"]).unwrap();
        assert_eq!(cli.output, Output::Json);
        match cli.command {
            Commands::Update { file, state } => {
                assert_eq!(file, PathBuf::from("new.yaml"));
                assert_eq!(state, PathBuf::from("tom.state.json"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn read_and_delete_require_state() {
        assert!(Cli::try_parse_from(["kcrctl", "read"]).is_err());
        assert!(Cli::try_parse_from(["kcrctl", "delete", "-f", "tom.yaml"]).is_err());
    }

    #[test]
    fn state_file_round_trips() {
        let path = std::env::temp_dir().join(format!("kcrctl-state-{}.json", std::process::id()));
        let state = TrackedState { id: ExternalId::namespaced("pets", "tom"), json: r#"{"kind":"Cat"}"#.into() };
        save_state(&path, &state).unwrap();
        assert!(read_doc(&path).unwrap().contains(r#""id": "pets/tom""#));
        assert_eq!(load_state(&path).unwrap(), state);
        drop_state(&path).unwrap();
        assert!(!path.exists());
    }
}
