use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sotto::capture::MicCapture;
use sotto::config::read_app_config;
use sotto::engine::WhisperLoader;
use sotto::session::RecordingSession;

#[derive(Parser)]
#[command(name = "sotto")]
#[command(about = "Noise-adaptive live transcription with tiered Whisper models")]
#[command(version)]
struct Args {
    /// Path to the configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Print noise intervals and scheduling activity on exit
    #[arg(long)]
    summary: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("SOTTO_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = read_app_config(&args.config);

    let source = Arc::new(MicCapture::new(config.monitor.update_interval_secs));
    let loader = Arc::new(WhisperLoader::new(config.engine.clone())?);
    let mut session = RecordingSession::new(config, source, loader);

    session.start()?;
    info!("recording; press Ctrl+C to stop");

    let mut transcripts = session.subscribe_transcripts();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = transcripts.recv() => match received {
                Ok(text) => {
                    // Rewrite the line in place: each transcription covers
                    // the whole recording so far and supersedes the last.
                    print!("\r{:100}\r{}", "", text);
                    let _ = std::io::stdout().flush();
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    session.stop();
    println!();
    println!("{}", session.best_transcription());

    if args.summary {
        println!("=====================================");
        for interval in session.intervals() {
            println!(
                "{:>7.2}s - {:>7.2}s  {}",
                interval.start, interval.end, interval.state
            );
        }
        for activity in session.activities() {
            println!(
                "tier {:<6} window 0.00s - {:>7.2}s  {:?}",
                activity.tier.to_string(),
                activity.window_end,
                activity.text.as_deref().unwrap_or("")
            );
        }
    }

    Ok(())
}
