//! mediagrab - resolve and download media from social/video URLs

use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use mediagrab::downloader::orchestrator::new_job_id;
use mediagrab::downloader::tools::ToolManager;
use mediagrab::{AcquireRequest, Acquisition, Config, Downloader, MediaInfo, Quality, SelectionHandle};

#[derive(Parser)]
#[command(name = "mediagrab")]
#[command(about = "Resolve social/video URLs and download the media")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show title and available formats
    Info {
        url: String,
        /// Print the raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Download one format
    Download {
        url: String,
        /// best, audio or a height such as 720p
        #[arg(short, long, default_value = "best")]
        quality: Quality,
        /// Selection handle from `info` (overrides --quality for format choice)
        #[arg(long)]
        handle: Option<SelectionHandle>,
        /// Title used to name the output file
        #[arg(long)]
        title: Option<String>,
        /// Output directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
    /// Check yt-dlp and ffmpeg
    Tools,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mediagrab=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let downloader = Downloader::new(Config::from_env())?;

    match cli.command {
        Commands::Info { url, json } => {
            let info = downloader.resolve(&url).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                print_info(&info);
            }
        }
        Commands::Download {
            url,
            quality,
            handle,
            title,
            out,
        } => {
            downloader.prepare().await?;
            download(&downloader, url, quality, handle, title, out).await?;
        }
        Commands::Tools => {
            for tool in ToolManager::new().get_all_tools() {
                println!(
                    "{:<8} {:<40} {}",
                    tool.name,
                    tool.path.as_deref().unwrap_or("-"),
                    tool.version.as_deref().unwrap_or("not found")
                );
            }
            match downloader.verify_tools().await {
                Ok(tools) => {
                    for (tool, version) in tools {
                        println!("configured {}: {}", tool.as_str(), version);
                    }
                }
                Err(e) => println!("configured tools unusable: {}", e),
            }
        }
    }

    Ok(())
}

fn print_info(info: &MediaInfo) {
    println!("{} [{}]", info.title, info.platform);
    if let Some(duration) = info.duration {
        println!("duration: {}:{:02}", duration / 60, duration % 60);
    }
    for format in &info.formats {
        println!("  {:<16} {:<5} {}", format.label, format.container, format.handle);
    }
}

async fn download(
    downloader: &Downloader,
    url: String,
    quality: Quality,
    handle: Option<SelectionHandle>,
    title: Option<String>,
    out: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let handle = handle.unwrap_or(match quality {
        Quality::Best => SelectionHandle::Best,
        Quality::Audio => SelectionHandle::Audio,
        Quality::Height(h) => SelectionHandle::Height(h),
    });

    let job_id = new_job_id();
    let mut progress = downloader.subscribe(&job_id)?;
    let printer = tokio::spawn(async move {
        while let Some(event) = progress.next().await {
            eprintln!("[{:>5.1}%] {:?} {}", event.percent, event.status, event.message);
        }
    });

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            on_ctrl_c.cancel();
        }
    });

    let mut request = AcquireRequest::new(url, handle, quality).with_job_id(job_id);
    request.title = title;

    let result = downloader.acquire(request, cancel).await;
    // Jobs rejected before start never emit a terminal event
    if result.is_ok() {
        let _ = printer.await;
    } else {
        printer.abort();
    }

    match result? {
        Acquisition::Redirect(link) => println!("{}", link),
        Acquisition::File(mut artifact) => {
            tokio::fs::create_dir_all(&out).await?;
            let target = out.join(&artifact.filename);
            let mut file = tokio::fs::File::create(&target).await?;
            while let Some(chunk) = artifact.stream.next().await {
                file.write_all(&chunk?).await?;
            }
            file.flush().await?;
            println!("{}", target.display());
        }
    }
    Ok(())
}
