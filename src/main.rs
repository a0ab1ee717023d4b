//! cluster-rpc command line client.
//!
//! Performs a single call against the configured endpoint and prints the
//! result as JSON:
//!
//! ```text
//! cluster-rpc [--config PATH] <method> [params-json-array]
//! cluster-rpc Version
//! cluster-rpc --config ./dev.json SectorInfo '[1000, 42]'
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cluster_rpc::config::default_config_path;
use cluster_rpc::{ApiService, ClientConfig, ClientEvent, EventKind};

/// Call one method on a cluster JSON-RPC endpoint and print the result
#[derive(Parser, Debug)]
#[command(name = "cluster-rpc")]
#[command(version)]
struct Cli {
    /// JSON config file (defaults to <config_dir>/cluster-rpc/config.json)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Method name; the configured prefix is prepended
    method: String,

    /// Positional parameters as a JSON array, e.g. '[1000, "f01"]'
    #[arg(value_name = "PARAMS", value_parser = parse_params)]
    params: Option<Params>,
}

#[derive(Debug, Clone)]
struct Params(Vec<Value>);

fn parse_params(raw: &str) -> Result<Params, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => Ok(Params(items)),
        Ok(other) => Err(format!("params must be a JSON array, got: {}", other)),
        Err(e) => Err(format!("params must be a JSON array: {}", e)),
    }
}

/// Defaults, then the config file (explicit or default location), then env.
fn load_config(explicit: Option<PathBuf>) -> Result<ClientConfig> {
    let config = match explicit {
        Some(path) => ClientConfig::load(&path)?,
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => {
                tracing::info!("Using config file {}", path.display());
                ClientConfig::load(&path)?
            }
            None => ClientConfig::default(),
        },
    };
    Ok(config.apply_env()?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "cluster_rpc=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let params = cli.params.map(|p| p.0).unwrap_or_default();
    let config = load_config(cli.config)?;
    let api = ApiService::from_config(config).context("set CLUSTER_RPC_ENDPOINT or a config file")?;

    api.on(EventKind::Reconnecting, |event| {
        if let ClientEvent::Reconnecting { attempt } = event {
            tracing::warn!("Connection lost, reconnect attempt {}", attempt);
        }
    });
    api.on(EventKind::Error, |event| {
        if let ClientEvent::Error { message } = event {
            tracing::error!("{}", message);
        }
    });

    api.connect().await?;

    let result = api.call::<Value>(&cli.method, params).await;
    api.disconnect().await;

    let value = result.with_context(|| format!("call '{}' failed", cli.method))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_method_only() {
        let cli = Cli::try_parse_from(["cluster-rpc", "Version"]).unwrap();
        assert_eq!(cli.method, "Version");
        assert!(cli.params.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_params_and_config() {
        let cli = Cli::try_parse_from([
            "cluster-rpc",
            "--config",
            "dev.json",
            "SectorInfo",
            "[1000, \"f01\"]",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("dev.json")));
        assert_eq!(cli.method, "SectorInfo");
        assert_eq!(cli.params.unwrap().0, vec![json!(1000), json!("f01")]);

        let cli = Cli::try_parse_from(["cluster-rpc", "-c", "dev.json", "Version"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("dev.json")));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Cli::try_parse_from(["cluster-rpc"]).is_err());
        assert!(Cli::try_parse_from(["cluster-rpc", "Version", "{\"a\":1}"]).is_err());
        assert!(Cli::try_parse_from(["cluster-rpc", "Version", "not json"]).is_err());
        assert!(Cli::try_parse_from(["cluster-rpc", "Version", "[]", "extra"]).is_err());
        assert!(Cli::try_parse_from(["cluster-rpc", "--config"]).is_err());
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
