//! Photo distribution client (pds-client) - command line entry point
//!
//! Each subcommand runs one visitor flow against the backend and prints
//! the resulting notifications. `watch` follows the live stream until
//! interrupted.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pds_client::api::Selfie;
use pds_client::config::{ClientConfig, Overrides};
use pds_client::App;
use pds_common::events::ClientEvent;
use tokio::signal;
use tracing::info;

/// Command-line arguments for pds-client
#[derive(Parser, Debug)]
#[command(name = "pds-client")]
#[command(about = "Find, follow and download your event photos")]
#[command(version)]
struct Args {
    /// Backend base URL
    #[arg(long, global = true, env = "PDS_API_URL")]
    api_url: Option<String>,

    /// Config file (default: ~/.config/pds/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Where the registration ID is kept between runs
    #[arg(long, global = true, env = "PDS_SESSION_FILE")]
    session_file: Option<PathBuf>,

    /// Directory for downloaded photos and archives
    #[arg(long, global = true, env = "PDS_DOWNLOAD_DIR")]
    download_dir: Option<PathBuf>,

    /// Reconnect the live stream with backoff after errors
    #[arg(long, global = true)]
    reconnect: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show event statistics
    Stats,
    /// List the most recent event photos
    Gallery,
    /// Register a selfie and search for matching photos
    Register {
        /// Image file with your face
        selfie: PathBuf,
    },
    /// Print the stored registration ID
    Whoami,
    /// Search matches for the stored (or given) registration ID
    Search {
        /// Registration ID to adopt before searching
        #[arg(long)]
        id: Option<String>,
    },
    /// Forget the stored registration ID
    Reset,
    /// Download one photo
    Download { url: String },
    /// Download all matched photos as a ZIP archive
    DownloadAll,
    /// Trigger processing of newly uploaded event photos
    Sync,
    /// Show the about page
    About,
    /// Follow newly processed photos until Ctrl-C
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing before reading config so its warnings are shown
    let logging = pds_client::logging::init();

    let args = Args::parse();

    let toml_config = pds_common::config::load_or_default(args.config.as_deref());
    let overrides = Overrides {
        api_url: args.api_url.clone(),
        session_file: args.session_file.clone(),
        download_dir: args.download_dir.clone(),
        reconnect: args.reconnect,
    };
    let config = ClientConfig::resolve(&overrides, &toml_config);

    logging.apply_level(&config.log_level);
    info!("Session file: {}", config.session_file.display());

    let app = App::from_config(&config).context("Failed to initialize client")?;

    match args.command {
        Command::Stats => {
            app.reload().await;
            let stats = app.stats();
            println!("Photos:         {}", stats.total_photos);
            println!("Registrations:  {}", stats.total_users);
            println!("Faces indexed:  {}", stats.total_encodings);
            if let Some(recent) = &stats.recent_matches {
                println!("Recent matches: {}", recent);
            }
        }
        Command::Gallery => {
            app.reload().await;
            for photo in app.recent_photos() {
                println!("{}", photo.url);
            }
        }
        Command::Register { selfie } => {
            app.session().restore();
            let selfie = Selfie::from_path(&selfie)
                .await
                .with_context(|| format!("Failed to read {}", selfie.display()))?;
            app.register(selfie).await;
            print_matches(&app);
        }
        Command::Whoami => match app.session().restore() {
            Some(identity) => println!("{}", identity),
            None => println!("Not registered"),
        },
        Command::Search { id } => {
            app.session().restore();
            match id {
                Some(token) => app.use_identity(&token).await,
                None => app.refresh().await,
            };
            print_matches(&app);
        }
        Command::Reset => {
            app.session().restore();
            app.reset();
        }
        Command::Download { url } => {
            if let pds_client::PhotoDownload::Saved(path) = app.download_photo(&url).await {
                println!("{}", path.display());
            }
        }
        Command::DownloadAll => {
            if app.session().restore().is_none() {
                anyhow::bail!("No registration ID stored; register first");
            }
            let path = app.download_all().await?;
            println!("{}", path.display());
        }
        Command::Sync => {
            app.sync().await.reloaded().await;
            let stats = app.stats();
            println!("Photos: {}  Faces indexed: {}", stats.total_photos, stats.total_encodings);
        }
        Command::About => {
            let about = app.about().await.context("About page unavailable")?;
            println!("{}\n{}\n", about.mission.title, about.mission.description);
            println!("{}\n{}", about.tech.title, about.tech.description);
            for feature in &about.tech.features {
                println!("  - {}: {}", feature.name, feature.detail);
            }
            println!("\n{}\n{}", about.team.title, about.team.description);
            for member in &about.team.members {
                println!("  - {} ({})", member.name, member.role);
            }
        }
        Command::Watch => watch(&app).await?,
    }

    Ok(())
}

fn print_matches(app: &App) {
    for url in app.matches() {
        println!("{}", url);
    }
}

async fn watch(app: &App) -> Result<()> {
    app.startup().await;
    let mut events = app.events().subscribe();
    let mut feed = app.open_live_feed();
    info!("Watching for new photos (Ctrl-C to stop)");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl-C, closing stream");
                break;
            }
            _ = feed.finished() => {
                info!("Live stream closed");
                break;
            }
            event = events.recv() => match event {
                Ok(ClientEvent::GalleryUpdated { photos }) => {
                    if let Some(latest) = photos.first() {
                        println!("new photo: {}", latest.url);
                    }
                }
                Ok(ClientEvent::StatsUpdated { stats, .. }) => {
                    println!("total photos: {}", stats.total_photos);
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Missed {} client events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    feed.close().await;
    Ok(())
}
