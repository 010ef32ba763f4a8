//! Headless host bridge binary for stdin/stdout JSON communication.
//!
//! Reads `CommandEnvelope` lines from stdin, routes them against a local
//! story document and writes `ResponseEnvelope` and `EventEnvelope` lines
//! to stdout. Tracing goes to stderr so stdout stays a clean protocol
//! channel.
//!
//! The document is seeded from `STORYVA_SESSION_METADATA`, a JSON object
//! with a `story_text` field, when set.

use storyva::StoryConfig;
use storyva::document::DocumentState;
use storyva::host::channel::{LocalDirector, command_channel};
use storyva::host::stdio::run_stdio_bridge;

const SESSION_METADATA_ENV: &str = "STORYVA_SESSION_METADATA";

fn load_config() -> StoryConfig {
    let path = StoryConfig::default_config_path();
    if !path.exists() {
        return StoryConfig::default();
    }
    match StoryConfig::from_file(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable config");
            StoryConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("storyva-host starting");

    let config = load_config();
    let state = std::env::var(SESSION_METADATA_ENV)
        .map(|raw| DocumentState::from_session_metadata(&raw))
        .unwrap_or_default();
    tracing::info!(chars = state.text().len(), "document seeded");

    let (client, server) = command_channel(
        config.sync.channel_capacity,
        config.sync.event_capacity,
        LocalDirector::new(state),
    );
    let server = server.with_policy(config.diff.invalid_policy);

    run_stdio_bridge(client, server).await.map_err(|e| {
        tracing::error!(error = %e, "storyva-host exited with error");
        anyhow::anyhow!("storyva-host failed: {e}")
    })?;

    tracing::info!("storyva-host shut down cleanly");
    Ok(())
}
