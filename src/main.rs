use anyhow::Result;
use clap::Parser;
use pushtalk::session::{SessionController, SessionUpdate};
use pushtalk::{Config, MicSource, SessionState};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Hold-to-talk live transcription
#[derive(Debug, Parser)]
#[command(name = "pushtalk", version)]
struct Args {
    /// Path to the configuration file (without extension)
    #[arg(long, default_value = "config/pushtalk")]
    config: String,

    /// Recognition API key, overriding the configuration file
    #[arg(long)]
    api_key: Option<String>,

    /// List available input devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    if args.list_devices {
        for name in MicSource::list_devices()? {
            println!("{name}");
        }
        return Ok(());
    }

    let cfg = Config::load(&args.config)?;
    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    let mut session_config = cfg.session_config();
    if args.api_key.is_some() {
        session_config.api_key = args.api_key;
    }

    // Check the credential up front so a bad key fails before capture.
    if let Some(key) = &session_config.api_key {
        let transcriber = pushtalk::session::HttpTranscriber::new(
            session_config.http_endpoint.clone(),
            key.clone(),
        );
        if let Err(e) = transcriber.verify_credential().await {
            warn!("Credential check failed: {:#}", e);
        }
    }

    let (update_tx, mut update_rx) = mpsc::unbounded_channel();
    let controller = SessionController::new(session_config, update_tx);

    // Render updates the way a status bar would: interim in place, finals on
    // their own line.
    let printer = tokio::spawn(async move {
        while let Some(update) = update_rx.recv().await {
            match update {
                SessionUpdate::TranscriptUpdated(transcript) => {
                    if transcript.interim_text.is_empty() {
                        println!("\n{}", transcript.final_text);
                    } else {
                        print!("\r{}", transcript.interim_text);
                        std::io::Write::flush(&mut std::io::stdout()).ok();
                    }
                }
                SessionUpdate::StateChanged(state) => {
                    info!("Session state: {:?}", state);
                }
                SessionUpdate::Error { kind, message } => {
                    warn!("Session error ({kind:?}): {message}");
                }
            }
        }
    });

    info!("Press Ctrl-C to stop");
    controller.start().await?;

    tokio::signal::ctrl_c().await?;

    controller.stop().await;

    let stats = controller.stats().await;
    let transcript = controller.transcript().await;

    info!(
        duration_secs = stats.duration_secs,
        chunks_forwarded = stats.chunks_forwarded,
        events_reconciled = stats.events_reconciled,
        "Session finished"
    );

    if !transcript.final_text.is_empty() {
        println!("{}", transcript.final_text);
    }

    if !matches!(controller.state().await, SessionState::Idle) {
        warn!("Session did not return to idle");
    }

    drop(controller);
    printer.abort();

    Ok(())
}
