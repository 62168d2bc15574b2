use anyhow::Result;
use clap::{Parser, Subcommand};

#[path = "../agent/mod.rs"]
mod agent;
#[path = "../api/mod.rs"]
mod api;
#[path = "../shared/mod.rs"]
mod shared;

use shared::config::{OllieConfig, StoreBackend};

#[derive(Parser)]
#[command(name = "olliechat-api")]
#[command(about = "Chat assistant API with a tool-using agent")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the REST API (default)
    Serve {
        /// Address to bind
        #[arg(long, env = "OLLIECHAT_HOST")]
        host: Option<String>,

        /// Port to listen on
        #[arg(long, env = "OLLIECHAT_PORT")]
        port: Option<u16>,

        /// Key-value backend for chats and prompts
        #[arg(long, value_enum)]
        store: Option<StoreBackend>,
    },
    /// Issue a bearer token for a user
    Token {
        /// User id placed in the token subject
        #[arg(long)]
        user: String,

        /// Token lifetime in hours
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (mut config, config_path) = OllieConfig::load_default()?;

    match args.command.unwrap_or(Command::Serve {
        host: None,
        port: None,
        store: None,
    }) {
        Command::Serve { host, port, store } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(store) = store {
                config.store.backend = store;
            }

            // Initialize service logging
            let _log_guards =
                shared::logging::init_service_logging(&config.server.log_dir, "olliechat_api")?;

            // Run the API server
            api::rest::api::run_rest_server(config, config_path).await
        }
        Command::Token { user, hours } => {
            let token = api::auth::create_user_jwt(&user, &config.secrets.jwt_secret, hours)?;
            println!("{}", serde_json::to_string_pretty(&token)?);
            Ok(())
        }
    }
}
