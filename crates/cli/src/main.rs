//! `stemsplit` -- split an audio file into stems on the remote service.
//!
//! Uploads one file, starts the separation job, follows its progress and
//! prints (or downloads) the resulting stems. Ctrl-C cancels the session
//! locally; the remote job is not aborted.
//!
//! # Environment variables
//!
//! Read through [`ClientConfig::from_env`] after loading `.env`. The
//! `--api-url` and `--poll-interval` flags take precedence.
//!
//! | Variable                         | Default                 |
//! |----------------------------------|-------------------------|
//! | `STEMSPLIT_API_URL`              | `http://localhost:8000` |
//! | `STEMSPLIT_POLL_INTERVAL_SECS`   | `5`                     |
//! | `STEMSPLIT_REQUEST_TIMEOUT_SECS` | unset                   |
//! | `RUST_LOG`                       | `stemsplit=info,...`    |

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use stemsplit_client::backend::HttpBackend;
use stemsplit_client::config::ClientConfig;
use stemsplit_client::downloads::ArtifactDownloader;
use stemsplit_core::media::PayloadMetadata;
use stemsplit_core::session::{JobSession, LifecycleState};
use stemsplit_pipeline::events::SessionEvent;
use stemsplit_pipeline::orchestrator::Orchestrator;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long to wait for the event logger to print the final events.
const LOGGER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "stemsplit", version, about = "Split an audio file into stems")]
struct Cli {
    /// Audio file to upload
    file: PathBuf,

    /// Base URL of the separation API (overrides STEMSPLIT_API_URL)
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,

    /// Content type to declare for the upload (inferred from the extension by default)
    #[arg(long, value_name = "TYPE")]
    content_type: Option<String>,

    /// Seconds between status queries (overrides STEMSPLIT_POLL_INTERVAL_SECS)
    #[arg(long, value_name = "SECS")]
    poll_interval: Option<u64>,

    /// Download the stems into this directory
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "stemsplit=info,stemsplit_pipeline=info,stemsplit_client=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = ?e, "stemsplit failed");
            ExitCode::FAILURE
        }
    }
}

/// Run one session. `Ok(false)` means the session ended without stems.
async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = load_config(&cli)?;
    let metadata = payload_metadata(&cli)?;
    let payload = tokio::fs::read(&cli.file)
        .await
        .with_context(|| format!("Failed to read {}", cli.file.display()))?;

    tracing::info!(
        file = %cli.file.display(),
        content_type = %metadata.content_type,
        api_url = %config.api_url,
        "Starting stemsplit",
    );

    let backend = HttpBackend::new(&config).context("Failed to build HTTP client")?;
    let orchestrator = Orchestrator::new(Arc::new(backend), config.poll_interval);
    let mut logger = tokio::spawn(log_events(orchestrator.subscribe()));

    let session = tokio::select! {
        result = async {
            orchestrator.start_session(payload, metadata).await?;
            anyhow::Ok(orchestrator.wait_for_terminal().await)
        } => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, cancelling session");
            orchestrator.cancel_session().await;
            orchestrator.current_state().await
        }
    };

    orchestrator.shutdown().await;
    if tokio::time::timeout(LOGGER_DRAIN_TIMEOUT, &mut logger).await.is_err() {
        logger.abort();
    }

    report(&session, &cli, &config).await
}

fn load_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    apply_overrides(cli, ClientConfig::from_env()?)
}

/// Apply command-line overrides on top of `config` and validate the result.
fn apply_overrides(cli: &Cli, mut config: ClientConfig) -> anyhow::Result<ClientConfig> {
    if let Some(api_url) = &cli.api_url {
        config.api_url = api_url.clone();
    }
    if let Some(secs) = cli.poll_interval {
        config.poll_interval = Duration::from_secs(secs);
    }
    config.validate()?;
    Ok(config)
}

fn payload_metadata(cli: &Cli) -> anyhow::Result<PayloadMetadata> {
    let file_name = cli
        .file
        .file_name()
        .and_then(|name| name.to_str())
        .context("Input path has no UTF-8 file name")?;

    let metadata = match &cli.content_type {
        Some(content_type) => PayloadMetadata::new(file_name, content_type.as_str()),
        None => PayloadMetadata::from_file_name(file_name)?,
    };
    metadata.validate()?;
    Ok(metadata)
}

async fn report(session: &JobSession, cli: &Cli, config: &ClientConfig) -> anyhow::Result<bool> {
    match session.state() {
        LifecycleState::Completed => {
            for artifact in session.output_artifacts() {
                println!("{}\t{}", artifact.kind, artifact.locator);
            }

            if let Some(dir) = &cli.output_dir {
                let downloader =
                    ArtifactDownloader::from_config(config).context("Failed to build HTTP client")?;
                let paths = downloader
                    .download_all(session.output_artifacts(), dir)
                    .await?;
                for path in paths {
                    println!("{}", path.display());
                }
            }
            Ok(true)
        }
        LifecycleState::Failed => {
            tracing::error!(
                reason = session.failure_reason().unwrap_or_default(),
                "Separation failed",
            );
            Ok(false)
        }
        state => {
            tracing::warn!(%state, "Session ended without a result");
            Ok(false)
        }
    }
}

/// Log session events until the session ends or the channel closes.
async fn log_events(mut rx: broadcast::Receiver<SessionEvent>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Event logger lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match &event {
            SessionEvent::StateChanged { state } => {
                tracing::info!(%state, "Session state changed");
            }
            SessionEvent::Progress { status, message } => {
                tracing::info!(%status, message = message.as_deref().unwrap_or(""), "Job in progress");
            }
            SessionEvent::Completed { artifacts } => {
                tracing::info!(artifacts = artifacts.len(), "Stems ready");
            }
            SessionEvent::Failed { reason } => {
                tracing::warn!(%reason, "Session failed");
            }
            SessionEvent::Cancelled => tracing::warn!("Session cancelled"),
        }

        if event.ends_session() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("stemsplit").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_are_optional() {
        let cli = parse(&["song.mp3"]);
        assert_eq!(cli.file, PathBuf::from("song.mp3"));
        assert!(cli.api_url.is_none());
        assert!(cli.output_dir.is_none());
    }

    #[test]
    fn content_type_is_inferred_from_extension() {
        let metadata = payload_metadata(&parse(&["/music/Take 1.FLAC"])).unwrap();
        assert_eq!(metadata.file_name, "Take 1.FLAC");
        assert_eq!(metadata.content_type, "audio/flac");
    }

    #[test]
    fn explicit_content_type_wins() {
        let metadata =
            payload_metadata(&parse(&["song.mp3", "--content-type", "audio/mp3"])).unwrap();
        assert_eq!(metadata.content_type, "audio/mp3");
    }

    #[test]
    fn unknown_extension_without_content_type_is_rejected() {
        assert!(payload_metadata(&parse(&["notes.txt"])).is_err());
    }

    fn unset_env() -> ClientConfig {
        ClientConfig::from_lookup(|_| None).unwrap()
    }

    #[test]
    fn flags_override_config() {
        let cli = parse(&[
            "song.mp3",
            "--api-url",
            "https://api.example.com",
            "--poll-interval",
            "2",
        ]);
        let config = apply_overrides(&cli, unset_env()).unwrap();
        assert_eq!(config.api_url, "https://api.example.com");
        assert_eq!(config.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn config_is_kept_without_flags() {
        let base = ClientConfig::from_lookup(|key| match key {
            "STEMSPLIT_API_URL" => Some("https://env.example.com".into()),
            "STEMSPLIT_POLL_INTERVAL_SECS" => Some("9".into()),
            _ => None,
        })
        .unwrap();

        let config = apply_overrides(&parse(&["song.mp3"]), base).unwrap();
        assert_eq!(config.api_url, "https://env.example.com");
        assert_eq!(config.poll_interval, Duration::from_secs(9));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let cli = parse(&["song.mp3", "--poll-interval", "0"]);
        assert!(apply_overrides(&cli, unset_env()).is_err());
    }

    // ---------------------------------------------------------------------------
    // Event logging
    // ---------------------------------------------------------------------------

    #[tokio::test]
    async fn event_logger_stops_when_session_ends() {
        let (tx, rx) = broadcast::channel(8);
        let logger = tokio::spawn(log_events(rx));

        tx.send(SessionEvent::StateChanged {
            state: LifecycleState::Polling,
        })
        .unwrap();
        tx.send(SessionEvent::Cancelled).unwrap();

        tokio::time::timeout(Duration::from_secs(1), logger)
            .await
            .expect("logger kept running after the session ended")
            .unwrap();
        drop(tx);
    }
}
