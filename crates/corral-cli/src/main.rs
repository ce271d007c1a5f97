//! # Corral CLI Entry Point
//!
//! Main binary for the corral fleet orchestrator. Provides the server
//! process plus small client commands for driving and observing it.
//!
//! ## Usage
//!
//! ```bash
//! # Run the orchestrator
//! corral serve
//!
//! # Run it on non-default ports
//! corral serve --node-bind 0.0.0.0:1999 --api-bind 0.0.0.0:2000
//!
//! # Isolate every node to a target (prints the job object path)
//! corral isolate multi-user.target
//!
//! # Watch job lifecycle signals
//! corral watch --server 127.0.0.1:2000
//! ```

use anyhow::Result;
use argh::FromArgs;

use corral_client::{CorralClient, JobEvent};
use corral_orchestrator::{Orchestrator, OrchestratorConfig};

/// Main CLI structure parsed from command-line arguments.
#[derive(FromArgs)]
/// corral - fleet orchestrator
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

/// Available CLI subcommands.
#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Serve(ServeArgs),
    Isolate(IsolateArgs),
    Watch(WatchArgs),
}

/// Arguments for running the orchestrator server.
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// run the orchestrator
struct ServeArgs {
    /// address the node listener binds to
    ///
    /// Nodes hold persistent control connections to this address.
    /// Defaults to "0.0.0.0:1999".
    #[argh(option, long = "node-bind", default = "\"0.0.0.0:1999\".into()")]
    node_bind: String,

    /// address the public API listener binds to
    ///
    /// Clients submit jobs and receive lifecycle signals here.
    /// Defaults to "0.0.0.0:2000".
    #[argh(option, long = "api-bind", default = "\"0.0.0.0:2000\".into()")]
    api_bind: String,
}

/// Arguments for submitting an isolate job.
///
/// Queues an `IsolateAll` job and prints the new job's object path to
/// stdout as soon as the orchestrator replies; the job itself runs
/// asynchronously (watch it with `corral watch`).
#[derive(FromArgs)]
#[argh(subcommand, name = "isolate")]
/// isolate every node to a target
struct IsolateArgs {
    /// target to isolate every node to
    #[argh(positional)]
    target: String,

    /// address of the orchestrator's API endpoint
    #[argh(option, long = "server", default = "\"127.0.0.1:2000\".into()")]
    server: String,
}

/// Arguments for watching job lifecycle signals.
#[derive(FromArgs)]
#[argh(subcommand, name = "watch")]
/// watch job lifecycle signals
struct WatchArgs {
    /// address of the orchestrator's API endpoint
    #[argh(option, long = "server", default = "\"127.0.0.1:2000\".into()")]
    server: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // isolate keeps stdout clean for unix tool usage (piping to xargs etc.)
    if !matches!(cli.command, Commands::Isolate(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Serve(args) => run_serve(args).await,
        Commands::Isolate(args) => run_isolate(args).await,
        Commands::Watch(args) => run_watch(args).await,
    }
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let config = OrchestratorConfig {
        node_bind: args
            .node_bind
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid node bind address {}: {}", args.node_bind, e))?,
        api_bind: args
            .api_bind
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid api bind address {}: {}", args.api_bind, e))?,
    };

    let orchestrator = Orchestrator::bind(config).await?;
    orchestrator.run().await?;
    Ok(())
}

async fn run_isolate(args: IsolateArgs) -> Result<()> {
    let client = CorralClient::connect(&args.server).await?;
    let job = client.isolate_all(&args.target).await?;
    println!("{}", job);
    Ok(())
}

async fn run_watch(args: WatchArgs) -> Result<()> {
    let mut client = CorralClient::connect(&args.server).await?;
    tracing::info!("watching {}", args.server);

    while let Some(event) = client.next_event().await {
        match event {
            JobEvent::New { id, job } => println!("job {} queued ({})", id, job),
            JobEvent::PropertiesChanged { job, changed } => {
                if let Some(state) = changed.get("State").and_then(serde_json::Value::as_str) {
                    println!("job {} -> {}", job, state);
                }
            }
            JobEvent::Removed { id, result, .. } => println!("job {} finished: {}", id, result),
        }
    }

    tracing::info!("orchestrator connection closed");
    Ok(())
}

/// CLI argument parsing tests.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_serve_defaults() {
        let args: Cli = Cli::from_args(&["corral"], &["serve"]).unwrap();
        match args.command {
            Commands::Serve(ServeArgs {
                node_bind,
                api_bind,
            }) => {
                assert_eq!(node_bind, "0.0.0.0:1999");
                assert_eq!(api_bind, "0.0.0.0:2000");
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_parse_serve_custom_binds() {
        let args: Cli = Cli::from_args(
            &["corral"],
            &[
                "serve",
                "--node-bind",
                "127.0.0.1:4999",
                "--api-bind",
                "127.0.0.1:5000",
            ],
        )
        .unwrap();
        match args.command {
            Commands::Serve(ServeArgs {
                node_bind,
                api_bind,
            }) => {
                assert_eq!(node_bind, "127.0.0.1:4999");
                assert_eq!(api_bind, "127.0.0.1:5000");
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_parse_isolate() {
        let args: Cli = Cli::from_args(&["corral"], &["isolate", "multi-user.target"]).unwrap();
        match args.command {
            Commands::Isolate(IsolateArgs { target, server }) => {
                assert_eq!(target, "multi-user.target");
                assert_eq!(server, "127.0.0.1:2000"); // default
            }
            _ => panic!("Expected Isolate command"),
        }
    }

    #[test]
    fn test_cli_parse_isolate_with_server() {
        let args: Cli = Cli::from_args(
            &["corral"],
            &["isolate", "rescue.target", "--server", "10.0.0.1:2000"],
        )
        .unwrap();
        match args.command {
            Commands::Isolate(IsolateArgs { target, server }) => {
                assert_eq!(target, "rescue.target");
                assert_eq!(server, "10.0.0.1:2000");
            }
            _ => panic!("Expected Isolate command"),
        }
    }

    #[test]
    fn test_cli_parse_watch() {
        let args: Cli = Cli::from_args(&["corral"], &["watch"]).unwrap();
        match args.command {
            Commands::Watch(WatchArgs { server }) => {
                assert_eq!(server, "127.0.0.1:2000"); // default
            }
            _ => panic!("Expected Watch command"),
        }
    }

    #[test]
    fn test_cli_parse_isolate_requires_target() {
        assert!(Cli::from_args(&["corral"], &["isolate"]).is_err());
    }
}
