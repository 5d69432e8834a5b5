mod chat;
mod history;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use devmate_config::{Config, ServerConfig};
use devmate_core::JsonFileStore;

#[derive(Parser)]
#[command(name = "devmate", about = "Chat with a hosted model over HTTP", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// History file to use instead of the configured one
    #[arg(long, global = true)]
    history_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the chat HTTP server
    Serve {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Send a prompt to a running server
    Chat(chat::ChatArgs),
    /// Browse saved conversations
    History {
        #[command(subcommand)]
        action: history::HistoryAction,
    },
    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("devmate=info".parse()?),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Ok(path) = dotenv {
        tracing::debug!("Loaded environment from {}", path.display());
    }

    let cli = Cli::parse();
    let config = Config::load()?;

    let store = || {
        let path = cli
            .history_file
            .clone()
            .unwrap_or_else(|| config.history.resolved_path());
        JsonFileStore::new(path).with_capacity(config.history.max_sessions)
    };

    match cli.command {
        Commands::Serve { ref host, port } => {
            let addr = bind_address(&config.server, host.clone(), port);
            let state = devmate_server::AppState::new(config.clone());
            devmate_server::serve(state, &addr, devmate_server::shutdown_signal()).await?;
        }
        Commands::Chat(ref args) => {
            chat::run(&config, args, &store()).await?;
        }
        Commands::History { ref action } => {
            history::run(action, &store())?;
        }
        Commands::Config => {
            let path = Config::config_path();
            println!("Config path: {}", path.display());
            println!("History file: {}", store().path().display());
            println!("{}", toml::to_string_pretty(&config.redacted())?);
        }
    }

    Ok(())
}

fn bind_address(server: &ServerConfig, host: Option<String>, port: Option<u16>) -> String {
    let host = host
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| server.host.clone());
    format!("{host}:{}", port.unwrap_or(server.port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_address_prefers_flags() {
        let server = ServerConfig::default();
        assert_eq!(bind_address(&server, None, None), "0.0.0.0:3000");
        assert_eq!(
            bind_address(&server, Some("127.0.0.1".into()), Some(9000)),
            "127.0.0.1:9000"
        );
        assert_eq!(bind_address(&server, Some("  ".into()), None), "0.0.0.0:3000");
    }

    #[test]
    fn cli_parses_chat_flags() {
        let cli = Cli::try_parse_from([
            "devmate",
            "chat",
            "hello",
            "--system",
            "be brief",
            "--model",
            "gpt-4o-mini",
            "--no-stream",
            "--server",
            "http://localhost:4000",
        ])
        .unwrap();
        match cli.command {
            Commands::Chat(args) => {
                assert_eq!(args.prompt, "hello");
                assert_eq!(args.system.as_deref(), Some("be brief"));
                assert_eq!(args.model.as_deref(), Some("gpt-4o-mini"));
                assert!(args.no_stream);
                assert_eq!(args.server.as_deref(), Some("http://localhost:4000"));
            }
            _ => panic!("expected chat command"),
        }
    }

    #[test]
    fn cli_parses_history_actions() {
        let cli = Cli::try_parse_from(["devmate", "history", "show", "chat_1_abc"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::History {
                action: history::HistoryAction::Show { ref id }
            } if id == "chat_1_abc"
        ));
    }
}
