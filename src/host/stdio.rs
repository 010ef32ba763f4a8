//! Newline-delimited JSON bridge for the host command channel.
//!
//! Reads `CommandEnvelope` lines from the input, dispatches them through the
//! `HostCommandServer` router, and writes `ResponseEnvelope` and
//! `EventEnvelope` lines to the output.
//!
//! When bridged over stdio, stdout is reserved for the protocol; all
//! diagnostics go to stderr.

use crate::error::{Result, StoryError};
use crate::host::channel::{DocumentHandler, HostCommandClient, HostCommandServer};
use crate::host::contract::{CommandEnvelope, CommandName, ResponseEnvelope};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{Mutex, broadcast};

type SharedWriter<W> = Arc<Mutex<BufWriter<W>>>;

/// Run the bridge over the process's stdin and stdout.
pub async fn run_stdio_bridge<H: DocumentHandler>(
    client: HostCommandClient,
    server: HostCommandServer<H>,
) -> Result<()> {
    run_bridge(client, server, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Run the bridge until the input closes or `session.stop` is received.
///
/// Three tasks cooperate:
///
/// 1. **Reader** -- parses each input line, dispatches it through the
///    client and writes the response.
/// 2. **Event forwarder** -- writes broadcast `EventEnvelope`s as lines.
/// 3. **Server** -- runs the router loop.
///
/// Dropping the client when the reader finishes ends the server task.
pub async fn run_bridge<H, R, W>(
    client: HostCommandClient,
    server: HostCommandServer<H>,
    input: R,
    output: W,
) -> Result<()>
where
    H: DocumentHandler,
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer = Arc::new(Mutex::new(BufWriter::new(output)));

    let server_handle = tokio::spawn(async move {
        server.run().await;
    });

    let event_rx = client.subscribe_events();
    let event_handle = tokio::spawn(forward_events(event_rx, Arc::clone(&writer)));

    let reader_result = run_reader(client, input, Arc::clone(&writer)).await;

    // Server first so every event it emitted is already in the broadcast
    // queue; the forwarder then drains and sees `Closed`.
    let _ = server_handle.await;
    let _ = event_handle.await;

    reader_result
}

async fn forward_events<W: AsyncWrite + Unpin>(
    mut event_rx: broadcast::Receiver<crate::host::contract::EventEnvelope>,
    writer: SharedWriter<W>,
) {
    loop {
        match event_rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => {
                    let mut w = writer.lock().await;
                    if let Err(e) = write_line(&mut w, &json).await {
                        tracing::warn!(
                            error = %e,
                            "failed to write event envelope; stopping event forwarder"
                        );
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize event envelope; skipping");
                }
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(lagged = n, "event forwarder lagged; some events were dropped");
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::debug!("event broadcast channel closed; stopping event forwarder");
                break;
            }
        }
    }
}

async fn run_reader<R, W>(client: HostCommandClient, input: R, writer: SharedWriter<W>) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(input);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| StoryError::Channel(format!("failed to read command line: {e}")))?;

        if bytes_read == 0 {
            tracing::info!("input closed; shutting down host bridge");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let envelope: CommandEnvelope = match serde_json::from_str(trimmed) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(error = %e, raw_line = %trimmed, "failed to parse command envelope");
                let response = ResponseEnvelope::error(
                    "parse-error",
                    format!("failed to parse command envelope: {e}"),
                );
                write_response(&writer, &response).await?;
                continue;
            }
        };

        let is_stop = envelope.command == CommandName::SessionStop;
        let request_id = envelope.request_id.clone();

        let response = match client.send(envelope).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(error = %e, request_id = %request_id, "host command failed");
                ResponseEnvelope::error(request_id, e.to_string())
            }
        };
        write_response(&writer, &response).await?;

        if is_stop {
            tracing::info!("session.stop received; shutting down host bridge");
            break;
        }
    }

    Ok(())
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &SharedWriter<W>,
    response: &ResponseEnvelope,
) -> Result<()> {
    let json = serde_json::to_string(response)
        .map_err(|e| StoryError::Channel(format!("failed to serialize response envelope: {e}")))?;
    let mut w = writer.lock().await;
    write_line(&mut w, &json).await
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut BufWriter<W>, json: &str) -> Result<()> {
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| StoryError::Channel(format!("failed to write output: {e}")))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| StoryError::Channel(format!("failed to write newline: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| StoryError::Channel(format!("failed to flush output: {e}")))?;
    Ok(())
}
