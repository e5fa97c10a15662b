mod ai;
mod capture;
mod overlay;
mod server;
mod tactics;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{info, warn};

use crate::overlay::{format_timestamp, OverlayTrack, Phase};
use crate::server::{ApiServer, FootageModel, OpenAiModel};

#[derive(Parser)]
#[command(name = "playlens")]
#[command(about = "Synchronized AI play explanations for football clips", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Chat-vision model used for analysis
    #[arg(long, global = true, default_value = "gpt-4o")]
    model: String,
}

#[derive(Subcommand)]
enum Command {
    /// Run the analysis HTTP API
    Serve {
        #[arg(long, default_value = "127.0.0.1:5600")]
        addr: String,
    },
    /// Generate an overlay track for a local clip and print it
    Annotate {
        input_file: PathBuf,
        #[arg(short, long, default_value_t = 0)]
        start_time_ms: u32,
        /// Capture window length; defaults to the rest of the clip
        #[arg(short, long)]
        duration_ms: Option<u32>,
        #[arg(short, long, default_value_t = 1000)]
        capture_interval_ms: u32,
    },
    /// Coach mode: extract a tactical DNA, or a counter plan with --opponent-dna
    Tactics {
        input_file: PathBuf,
        #[arg(short, long, default_value = "Team")]
        team_name: String,
        /// Previously saved opponent DNA JSON to build a counter plan against
        #[arg(long)]
        opponent_dna: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { addr } => serve(&addr, cli.model).await,
        Command::Annotate {
            input_file,
            start_time_ms,
            duration_ms,
            capture_interval_ms,
        } => {
            annotate(
                &input_file,
                start_time_ms,
                duration_ms,
                capture_interval_ms,
                &cli.model,
            )
            .await
        }
        Command::Tactics {
            input_file,
            team_name,
            opponent_dna,
        } => tactics_report(&input_file, &team_name, opponent_dna.as_deref(), &cli.model).await,
    }
}

async fn serve(addr: &str, model: String) -> anyhow::Result<()> {
    if std::env::var("OPENAI_API_KEY").is_err() {
        anyhow::bail!("OPENAI_API_KEY is not set");
    }

    let model: Arc<dyn FootageModel> =
        Arc::new(OpenAiModel::new(tokio::runtime::Handle::current(), model));
    let server = ApiServer::spawn(addr, model)?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    server.stop();
    Ok(())
}

async fn annotate(
    input_file: &Path,
    start_time_ms: u32,
    duration_ms: Option<u32>,
    capture_interval_ms: u32,
    model: &str,
) -> anyhow::Result<()> {
    anyhow::ensure!(input_file.exists(), "no such file: {}", input_file.display());

    capture::init();
    let clip_ms = (capture::probe_duration(input_file)? * 1000.0) as u32;
    let duration_ms = duration_ms.unwrap_or_else(|| clip_ms.saturating_sub(start_time_ms));
    let frames = capture::sample_frames(input_file, start_time_ms, duration_ms, capture_interval_ms)?;
    info!("sampled {} frames from {}", frames.len(), input_file.display());

    let prompt = ai::overlay_prompt(f64::from(duration_ms) / 1000.0);
    let reply = ai::describe_frames(model, &prompt, frames).await?;

    match overlay::parse_overlays(&reply) {
        Ok(overlays) => {
            println!("{}", serde_json::to_string_pretty(&overlays)?);
            let track = OverlayTrack::new(overlays);
            if track.is_empty() {
                warn!("model returned no usable overlays");
            } else {
                print_timeline(&track, f64::from(duration_ms) / 1000.0);
                print_breakdown(&track);
            }
            Ok(())
        }
        Err(failure) => {
            eprintln!("model reply was not an overlay array:\n{}", failure.raw);
            Err(failure.into())
        }
    }
}

/// Crude seek-bar rendering of where the overlays land in the clip.
fn print_timeline(track: &OverlayTrack, duration_secs: f64) {
    const WIDTH: usize = 48;
    let mut bar = ['-'; WIDTH];
    for position in track.marker_positions(duration_secs) {
        let index = (position * (WIDTH - 1) as f64).round() as usize;
        bar[index] = '*';
    }
    println!(
        "\n[{}] {} overlays over {}",
        bar.iter().collect::<String>(),
        track.len(),
        format_timestamp(duration_secs)
    );
}

/// The per-phase rundown the player shows next to the video.
fn print_breakdown(track: &OverlayTrack) {
    for phase in Phase::ALL {
        let mut overlays = track.by_phase(phase).peekable();
        if overlays.peek().is_none() {
            continue;
        }
        println!("\n{}", phase.label().to_uppercase());
        for overlay in overlays {
            println!("  [{}] {}", format_timestamp(overlay.timestamp), overlay.text);
        }
    }
}

async fn tactics_report(
    input_file: &Path,
    team_name: &str,
    opponent_dna: Option<&Path>,
    model: &str,
) -> anyhow::Result<()> {
    anyhow::ensure!(input_file.exists(), "no such file: {}", input_file.display());

    capture::init();
    let frames = frames_from_path(input_file)?;
    info!("sampled {} frames from {}", frames.len(), input_file.display());

    let prompt = match opponent_dna {
        Some(path) => ai::counter_prompt(&fs::read_to_string(path)?),
        None => ai::dna_prompt(team_name),
    };
    let reply = ai::describe_frames(model, &prompt, frames).await?;

    let report = match opponent_dna {
        Some(_) => tactics::parse_counter(&reply).map(|plan| serde_json::to_string_pretty(&plan)),
        None => tactics::parse_dna(&reply).map(|dna| serde_json::to_string_pretty(&dna)),
    };
    match report {
        Ok(encoded) => {
            println!("{}", encoded?);
            Ok(())
        }
        Err(failure) => {
            eprintln!("model reply was not a tactics report:\n{}", failure.raw);
            Err(failure.into())
        }
    }
}

fn frames_from_path(path: &Path) -> anyhow::Result<Vec<String>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("jpg") | Some("jpeg") => Ok(vec![capture::image_data_url(
            &fs::read(path)?,
            "image/jpeg",
        )]),
        Some("png") => Ok(vec![capture::image_data_url(&fs::read(path)?, "image/png")]),
        Some("webp") => Ok(vec![capture::image_data_url(
            &fs::read(path)?,
            "image/webp",
        )]),
        _ => capture::frames_for_clip(path, 8),
    }
}
