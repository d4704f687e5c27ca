//! Command-line client for aquarium.

use anyhow::{Context, Result};
use aquarium_client::config::{
    ClientConfig, client_config_path, load_client_config, save_client_config,
};
use aquarium_client::{
    ApiClient, FileSessionStore, LocalCache, SyncCoordinator, SyncError, SyncOutcome, SyncState,
};
use aquarium_core::{Idea, IdeaDraft};
use clap::{Args, Parser, Subcommand};
use std::io::Read;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "aquarium")]
#[command(about = "Collect ideas offline and sync them when signed in")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct GlobalArgs {
    /// Client config file path
    #[arg(long, global = true, env = "AQUARIUM_CLIENT_CONFIG")]
    client_config: Option<String>,

    /// Server API URL including prefix (overrides client config)
    #[arg(long, global = true)]
    server: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a client config pointing at a server
    Init {
        /// Server API URL including prefix (e.g. http://127.0.0.1:8080/v1)
        server_url: String,
    },
    /// List ideas
    List,
    /// Add an idea
    Add {
        name: String,
        #[arg(short, long, default_value = "")]
        description: String,
        #[arg(long, default_value_t = 0)]
        fish_type: u32,
    },
    /// Edit an idea
    Edit {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(long)]
        fish_type: Option<u32>,
    },
    /// Mark an idea done (or not done with --undo)
    Done {
        id: String,
        #[arg(long, default_value_t = false)]
        undo: bool,
    },
    /// Remove an idea
    Rm { id: String },
    /// Remove every idea, locally and on the server when signed in
    Clear {
        /// Skip the confirmation check
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
    /// Create an account and sign in
    Signup {
        email: String,
        #[arg(long, default_value = "")]
        name: String,
        #[command(flatten)]
        password: PasswordArgs,
    },
    /// Sign in and merge local ideas with the server
    Login {
        email: String,
        #[command(flatten)]
        password: PasswordArgs,
    },
    /// Sign out; local ideas stay in the cache
    Logout,
    /// Upload local ideas, then pull from the server
    Sync,
    /// Keep syncing in the background until Ctrl-C
    Watch,
    /// Show identity and cache status
    Status,
}

#[derive(Args, Clone)]
struct PasswordArgs {
    /// Password (avoid if possible; prefer --password-stdin)
    #[arg(long)]
    password: Option<String>,
    /// Read password from stdin
    #[arg(long, default_value_t = false)]
    password_stdin: bool,
}

struct Client {
    config: ClientConfig,
    api: ApiClient,
    coordinator: SyncCoordinator,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Cli { global, command } = Cli::parse();

    if let Commands::Init { server_url } = &command {
        return handle_init_command(&global, server_url).await;
    }

    let client = open_client(&global)?;
    let result = run(&client, command).await;
    client.coordinator.shutdown().await;
    result
}

async fn run(client: &Client, command: Commands) -> Result<()> {
    restore(&client.coordinator).await?;
    let coordinator = &client.coordinator;

    match command {
        Commands::Init { .. } => Ok(()),
        Commands::List => {
            let ideas = coordinator.ideas().await;
            if ideas.is_empty() {
                println!("No ideas yet.");
            }
            for idea in &ideas {
                println!("{}", format_idea(idea));
            }
            Ok(())
        }
        Commands::Add {
            name,
            description,
            fish_type,
        } => {
            let idea = coordinator
                .create(IdeaDraft {
                    name,
                    description,
                    fish_type,
                    is_done: false,
                })
                .await?;
            println!("Added {}", format_idea(&idea));
            Ok(())
        }
        Commands::Edit {
            id,
            name,
            description,
            fish_type,
        } => {
            let mut idea = find_idea(coordinator, &id).await?;
            if let Some(name) = name {
                idea.name = name;
            }
            if let Some(description) = description {
                idea.description = description;
            }
            if let Some(fish_type) = fish_type {
                idea.fish_type = fish_type;
            }
            let idea = coordinator.update(idea).await?;
            println!("Updated {}", format_idea(&idea));
            Ok(())
        }
        Commands::Done { id, undo } => {
            let mut idea = find_idea(coordinator, &id).await?;
            idea.is_done = !undo;
            let idea = coordinator.update(idea).await?;
            println!("{}", format_idea(&idea));
            Ok(())
        }
        Commands::Rm { id } => {
            let idea = coordinator.delete(&id).await?;
            println!("Removed {}", format_idea(&idea));
            Ok(())
        }
        Commands::Clear { yes } => {
            if !yes {
                anyhow::bail!("refusing to clear all ideas without --yes");
            }
            let count = coordinator.clear_all().await?;
            println!("Removed {count} idea(s)");
            Ok(())
        }
        Commands::Signup {
            email,
            name,
            password,
        } => {
            let password = read_password(password)?;
            let user = client
                .api
                .sign_up(&email, &password, &name)
                .await
                .context("sign up failed")?;
            println!("Created account for {}", user.email);
            sign_in(client, &email, &password).await
        }
        Commands::Login { email, password } => {
            let password = read_password(password)?;
            sign_in(client, &email, &password).await
        }
        Commands::Logout => {
            coordinator.sign_out().await?;
            println!("Signed out; {} idea(s) kept locally", coordinator.ideas().await.len());
            Ok(())
        }
        Commands::Sync => {
            let outcome = coordinator.sync_now().await.map_err(|e| match e {
                SyncError::NotSignedIn => anyhow::anyhow!("not signed in; run `aquarium login`"),
                other => anyhow::Error::new(other).context("sync failed"),
            })?;
            println!("{}", describe_outcome(&outcome));
            Ok(())
        }
        Commands::Watch => handle_watch_command(coordinator).await,
        Commands::Status => {
            match coordinator.identity().await {
                Some(user) => println!("Signed in as {} ({})", user.email, user.id),
                None => println!("Not signed in"),
            }
            println!("Server:  {}", client.api.base_url());
            println!("Cache:   {}", client.config.cache_path()?.display());
            println!("Ideas:   {}", coordinator.ideas().await.len());
            println!("Next id: {}", coordinator.next_id().await);
            Ok(())
        }
    }
}

fn open_client(global: &GlobalArgs) -> Result<Client> {
    let path = client_config_path(global.client_config.as_deref())?;
    let mut config = load_client_config(&path)?;
    if let Some(server) = &global.server {
        config.server_url = server.clone();
    }

    let api = ApiClient::new(&config.server_url)?;
    let sessions = Arc::new(FileSessionStore::new(config.session_path()?, api.clone()));
    let coordinator = SyncCoordinator::new(
        LocalCache::new(config.cache_path()?),
        Arc::new(api.clone()),
        sessions,
        config.sync_interval(),
    );

    Ok(Client {
        config,
        api,
        coordinator,
    })
}

/// Load the cache and resume any persisted session. Server failures are
/// reported but never stop local commands.
async fn restore(coordinator: &SyncCoordinator) -> Result<()> {
    match coordinator.restore().await {
        Ok(SyncOutcome::SignedOut) => {
            eprintln!("Session expired; signed out. Local ideas are still available.");
            Ok(())
        }
        Ok(_) => Ok(()),
        Err(SyncError::Remote(e)) => {
            tracing::warn!(error = %e, "Could not reach server, working offline");
            Ok(())
        }
        Err(e) => Err(e).context("failed to load local ideas"),
    }
}

async fn sign_in(client: &Client, email: &str, password: &str) -> Result<()> {
    let session = client
        .api
        .sign_in(email, password)
        .await
        .context("sign in failed")?;
    let outcome = client.coordinator.sign_in(session).await?;
    println!("Signed in as {email}");
    println!("{}", describe_outcome(&outcome));
    Ok(())
}

async fn handle_init_command(global: &GlobalArgs, server_url: &str) -> Result<()> {
    // Validates the URL before anything is written.
    ApiClient::new(server_url)?;

    let path = client_config_path(global.client_config.as_deref())?;
    let mut config = load_client_config(&path)?;
    config.server_url = server_url.to_string();
    save_client_config(&path, &config).await?;
    println!("Wrote {}", path.display());
    Ok(())
}

async fn handle_watch_command(coordinator: &SyncCoordinator) -> Result<()> {
    if !coordinator.is_signed_in().await {
        anyhow::bail!("not signed in; run `aquarium login`");
    }
    println!("Syncing in the background, press Ctrl-C to stop");

    let mut state = coordinator.subscribe();
    let mut last_count = coordinator.ideas().await.len();
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                if *state.borrow_and_update() == SyncState::Syncing {
                    println!("Syncing...");
                }
            }
            _ = ticker.tick() => {
                if !coordinator.is_signed_in().await {
                    eprintln!("Signed out; stopping");
                    break;
                }
                let count = coordinator.ideas().await.len();
                if count != last_count {
                    println!("{count} idea(s)");
                    last_count = count;
                }
            }
        }
    }
    Ok(())
}

async fn find_idea(coordinator: &SyncCoordinator, id: &str) -> Result<Idea> {
    coordinator
        .ideas()
        .await
        .into_iter()
        .find(|idea| idea.id == id)
        .ok_or_else(|| anyhow::anyhow!("no idea with id {id}"))
}

fn read_password(args: PasswordArgs) -> Result<String> {
    if let Some(password) = args.password {
        return Ok(password);
    }
    if args.password_stdin {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        let password = buf.trim_end_matches(['\r', '\n']).to_string();
        if password.is_empty() {
            anyhow::bail!("password read from stdin is empty");
        }
        return Ok(password);
    }
    anyhow::bail!("password required: use --password or --password-stdin");
}

fn format_idea(idea: &Idea) -> String {
    let mark = if idea.is_done { "x" } else { " " };
    let mut line = format!("[{mark}] {}  {}", idea.id, idea.name);
    if idea.fish_type != 0 {
        line.push_str(&format!(" (fish {})", idea.fish_type));
    }
    if !idea.description.is_empty() {
        line.push_str(&format!(": {}", idea.description));
    }
    line
}

fn describe_outcome(outcome: &SyncOutcome) -> String {
    match outcome {
        SyncOutcome::Merged {
            total,
            pulled,
            pushed,
        } => format!("Synced: {total} idea(s), {pulled} from server, {pushed} pushed"),
        SyncOutcome::Skipped => "Nothing to sync".to_string(),
        SyncOutcome::Coalesced => "A sync was already running".to_string(),
        SyncOutcome::SignedOut => "Session expired; signed out".to_string(),
        SyncOutcome::Discarded => "Identity changed during sync; result dropped".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idea(id: &str) -> Idea {
        IdeaDraft {
            name: "Koi pond".to_string(),
            ..Default::default()
        }
        .into_idea(id)
    }

    #[test]
    fn format_idea_shows_optional_fields() {
        assert_eq!(format_idea(&idea("1")), "[ ] 1  Koi pond");

        let mut full = idea("2");
        full.is_done = true;
        full.fish_type = 3;
        full.description = "dig first".to_string();
        assert_eq!(format_idea(&full), "[x] 2  Koi pond (fish 3): dig first");
    }

    #[test]
    fn read_password_prefers_flag() {
        let args = PasswordArgs {
            password: Some("hunter22".to_string()),
            password_stdin: false,
        };
        assert_eq!(read_password(args).unwrap(), "hunter22");

        let missing = PasswordArgs {
            password: None,
            password_stdin: false,
        };
        assert!(read_password(missing).is_err());
    }

    #[test]
    fn describe_merged_outcome() {
        let text = describe_outcome(&SyncOutcome::Merged {
            total: 3,
            pulled: 2,
            pushed: 1,
        });
        assert_eq!(text, "Synced: 3 idea(s), 2 from server, 1 pushed");
    }

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "aquarium",
            "add",
            "Koi",
            "--fish-type",
            "2",
            "--server",
            "http://localhost:8080/v1",
        ])
        .unwrap();
        assert_eq!(cli.global.server.as_deref(), Some("http://localhost:8080/v1"));
        assert!(matches!(
            cli.command,
            Commands::Add { ref name, fish_type: 2, .. } if name == "Koi"
        ));
    }
}
