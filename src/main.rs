use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use launchpad::config;
use launchpad::hosting::RepoClient;
use launchpad::identity::HttpIdentity;
use launchpad::progress::ProgressBroker;
use launchpad::store::memory::MemoryStore;
use launchpad::store::postgres::PgStore;
use launchpad::store::CredentialStore;
use launchpad::{app, AppState};

#[derive(Parser)]
#[command(name = "launchpad", about = "Repository provisioning service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
        /// Use an in-memory credential store instead of Postgres.
        #[arg(long)]
        in_memory: bool,
    },
    /// Inspect or remove stored delegated credentials.
    Credential {
        #[command(subcommand)]
        command: CredentialCommands,
    },
}

#[derive(Subcommand)]
enum CredentialCommands {
    /// Show the stored credential for a principal (token masked).
    Show { user_id: uuid::Uuid },
    /// Delete the stored credential for a principal.
    Delete { user_id: uuid::Uuid },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "launchpad=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load()?;
    let args = Cli::parse();

    match args.command {
        Some(Commands::Serve { port, in_memory }) => run_server(cfg, port, in_memory).await,
        Some(Commands::Credential { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_credential_command(&db, command).await
        }
        None => run_server(cfg.clone(), cfg.port, false).await,
    }
}

async fn run_server(cfg: config::Config, port: u16, in_memory: bool) -> anyhow::Result<()> {
    let store: Arc<dyn CredentialStore> = if in_memory {
        tracing::warn!("using in-memory credential store; credentials will not survive restart");
        Arc::new(MemoryStore::new())
    } else {
        let db = PgStore::connect(&cfg.database_url).await?;
        db.migrate().await?;
        Arc::new(db)
    };

    let state = Arc::new(AppState {
        store,
        identity: Arc::new(HttpIdentity::new(&cfg.identity_url)),
        repos: RepoClient::new(&cfg.hosting_api_url)?,
        broker: ProgressBroker::new(),
        config: cfg,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("launchpad listening on {}", addr);
    axum::serve(listener, app(state)).await?;

    Ok(())
}

async fn handle_credential_command(
    db: &PgStore,
    command: CredentialCommands,
) -> anyhow::Result<()> {
    match command {
        CredentialCommands::Show { user_id } => match db.get(user_id).await? {
            Some(record) => {
                println!("user:     {}", record.user_id);
                println!("token:    {}", mask(&record.access_token));
                println!(
                    "username: {}",
                    record.provider_username.as_deref().unwrap_or("-")
                );
                println!("scopes:   {}", record.scopes.join(", "));
                println!(
                    "expires:  {}",
                    record
                        .expires_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "never".to_string())
                );
                println!("updated:  {}", record.updated_at.to_rfc3339());
            }
            None => println!("no credential stored for {}", user_id),
        },
        CredentialCommands::Delete { user_id } => {
            db.delete(user_id).await?;
            println!("deleted credential for {}", user_id);
        }
    }
    Ok(())
}

fn mask(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "********".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

#[cfg(test)]
mod tests {
    use super::mask;

    #[test]
    fn mask_keeps_only_the_edges() {
        assert_eq!(mask("gho_abcdefghij"), "gho_…ghij");
        assert_eq!(mask("short"), "********");
    }

    #[test]
    fn mask_handles_multi_byte_tokens() {
        // Slicing by byte index would panic here.
        assert_eq!(mask("gho_ü¢€token¢ü"), "gho_…en¢ü");
        assert_eq!(mask("日本語トークン"), "********");
    }
}
