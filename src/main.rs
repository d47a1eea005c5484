use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod auth;
mod clip;
mod config;
mod cookie;
mod delete;
mod download;
mod endpoints;
mod fs_utils;
mod http;
mod list;
mod paths;
mod retry;
mod session;
mod video;

#[derive(Debug, Parser)]
#[command(
    name = "nest-clips",
    version,
    about = "List, download and delete camera clips",
    long_about = "nest-clips logs in to the camera cloud service (including two-factor verification), keeps the session tokens between runs, and lists, creates, downloads and deletes video clips."
)]
struct Cli {
    #[arg(global = true, long, short, help = "Enable debug logging")]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    ListClips(list::ListArgs),
    DownloadClip(download::DownloadClipArgs),
    DownloadClips(download::DownloadClipsArgs),
    DownloadVideo(video::VideoArgs),
    DeleteClip(delete::DeleteArgs),
    LoadCookie(cookie::CookieArgs),
    Login(auth::LoginArgs),
    Session(session::SessionArgs),
    Config(config::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::ListClips(args) => list::run(args).await,
        Commands::DownloadClip(args) => download::run_clip(args).await,
        Commands::DownloadClips(args) => download::run_clips(args).await,
        Commands::DownloadVideo(args) => video::run(args).await,
        Commands::DeleteClip(args) => delete::run(args).await,
        Commands::LoadCookie(args) => cookie::run(args),
        Commands::Login(args) => auth::run(args).await,
        Commands::Session(args) => session::run(args),
        Commands::Config(args) => config::run(args),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}
