#![forbid(unsafe_code)]

//! Server and operator entry point.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result, anyhow, bail};
use axum::http::HeaderName;
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use vidtube::api::{AppState, router};
use vidtube::config::{RuntimeConfig, RuntimeOverrides, resolve_runtime_config};
use vidtube::error::set_debug_errors;
use vidtube::logging::init_logging;
use vidtube::media::{LocalMediaHost, MediaHost, MediaKind, purge};
use vidtube::security::{ensure_not_root, ensure_not_root_owned};
use vidtube::store::Store;
use vidtube::store::users::{CreateUserError, NewUser};

#[derive(Debug, Parser)]
#[command(name = "vidtube", version, about = "Video sharing backend")]
struct Cli {
    /// dotenv file consulted after the process environment.
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API.
    Serve(ServeArgs),
    /// Provision an account.
    CreateUser(CreateUserArgs),
    /// Retry queued media deletions once.
    SweepMedia(SweepArgs),
}

#[derive(Debug, Args)]
struct ServeArgs {
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    media_root: Option<PathBuf>,
    #[arg(long)]
    database: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct CreateUserArgs {
    #[arg(long)]
    username: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    fullname: String,
    /// Image file uploaded as the avatar.
    #[arg(long)]
    avatar: Option<PathBuf>,
    #[arg(long)]
    cover_image: Option<PathBuf>,
    #[arg(long)]
    media_root: Option<PathBuf>,
    #[arg(long)]
    database: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct SweepArgs {
    #[arg(long, default_value_t = 100)]
    limit: u32,
    #[arg(long)]
    media_root: Option<PathBuf>,
    #[arg(long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let env_path = cli.env_file;
    match cli.command {
        Command::Serve(args) => {
            let config = resolve_runtime_config(RuntimeOverrides {
                media_root: args.media_root,
                database_path: args.database,
                host: args.host,
                port: args.port,
                env_path,
            })?;
            init_logging(&config.log_level, &config.log_format)?;
            serve(config).await
        }
        Command::CreateUser(args) => {
            let config = resolve_runtime_config(RuntimeOverrides {
                media_root: args.media_root.clone(),
                database_path: args.database.clone(),
                env_path,
                ..RuntimeOverrides::default()
            })?;
            init_logging(&config.log_level, &config.log_format)?;
            create_user(config, args).await
        }
        Command::SweepMedia(args) => {
            let config = resolve_runtime_config(RuntimeOverrides {
                media_root: args.media_root,
                database_path: args.database,
                env_path,
                ..RuntimeOverrides::default()
            })?;
            init_logging(&config.log_level, &config.log_format)?;
            sweep_media(config, args.limit).await
        }
    }
}

async fn serve(config: RuntimeConfig) -> Result<()> {
    check_privileges(&config)?;
    set_debug_errors(config.debug_errors);

    let store = Store::open(&config.database_path)
        .await
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    let media_files = Arc::new(LocalMediaHost::new(
        config.media_root.clone(),
        &config.public_base_url,
    ));
    let principal_header = HeaderName::from_bytes(config.principal_header.as_bytes())
        .with_context(|| format!("invalid PRINCIPAL_HEADER '{}'", config.principal_header))?;

    let state = AppState {
        store: Arc::new(store),
        media: media_files.clone(),
        media_files,
        principal_header,
    };
    let app = router(state, config.max_upload_bytes);

    let host: IpAddr = config
        .host
        .parse()
        .map_err(|err| anyhow!("invalid host '{}': {err}", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(%addr, media_root = %config.media_root.display(), "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;
    tracing::info!("API server stopped");
    Ok(())
}

fn check_privileges(config: &RuntimeConfig) -> Result<()> {
    ensure_not_root("vidtube")?;
    ensure_not_root_owned(&config.media_root)?;
    ensure_not_root_owned(&config.database_path)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install Ctrl+C handler");
    }
}

async fn create_user(config: RuntimeConfig, args: CreateUserArgs) -> Result<()> {
    check_privileges(&config)?;
    let store = Store::open(&config.database_path).await?;
    match store.find_user_conflict(&args.username, &args.email).await? {
        Some(CreateUserError::UsernameTaken) => bail!("username '{}' is taken", args.username),
        Some(CreateUserError::EmailTaken) => bail!("email '{}' is already registered", args.email),
        None => {}
    }

    let host = LocalMediaHost::new(config.media_root.clone(), &config.public_base_url);
    let avatar = upload_optional(&host, args.avatar.as_deref()).await?;
    let cover_image = upload_optional(&host, args.cover_image.as_deref()).await?;

    let user = store
        .create_user(&NewUser {
            username: args.username,
            email: args.email,
            fullname: args.fullname,
            avatar,
            cover_image,
        })
        .await?;
    tracing::info!(user = %user.id, username = %user.username, "user created");
    println!("{}", user.id);
    Ok(())
}

async fn upload_optional(host: &LocalMediaHost, path: Option<&std::path::Path>) -> Result<String> {
    match path {
        Some(path) => Ok(host.upload(path, MediaKind::Image).await?.url),
        None => Ok(String::new()),
    }
}

async fn sweep_media(config: RuntimeConfig, limit: u32) -> Result<()> {
    check_privileges(&config)?;
    let store = Store::open(&config.database_path).await?;
    let host = LocalMediaHost::new(config.media_root.clone(), &config.public_base_url);
    let pending = store.pending_media_deletions(limit).await?;
    let report = purge(&store, &host, &pending).await;
    tracing::info!(
        queued = pending.len(),
        deleted = report.deleted,
        failed = report.failed,
        "media sweep finished"
    );
    if report.failed > 0 {
        bail!("{} media deletions failed and remain queued", report.failed);
    }
    Ok(())
}
