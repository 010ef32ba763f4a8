//! Host command channel and router for the editing surface.
//!
//! The router owns the authoritative document through a [`DocumentHandler`]
//! and processes one command at a time, so a human edit and a diff
//! application never interleave.

use crate::config::InvalidDiffPolicy;
use crate::diff::{self, Diff, DiffId};
use crate::document::{DocumentState, EnqueueOutcome};
use crate::error::{ApplyError, Result, StoryError};
use crate::host::contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
use crate::markup::{self, TagCategory, VOCABULARY_VERSION, vocabulary};
use crate::retrieval::Retriever;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

/// Owner of the document the router mutates.
pub trait DocumentHandler: Send + 'static {
    fn document(&self) -> &DocumentState;

    /// Replace the text with a human edit; returns the new version.
    fn edit(&mut self, text: String) -> u64;

    fn enqueue(&mut self, diff: Diff) -> EnqueueOutcome;

    /// Accept a pending diff; returns the new version.
    fn apply(&mut self, id: &DiffId) -> std::result::Result<u64, ApplyError>;

    fn reject(&mut self, id: &DiffId) -> std::result::Result<(), ApplyError>;
}

/// In-process document owner.
#[derive(Debug, Default)]
pub struct LocalDirector {
    state: DocumentState,
}

impl LocalDirector {
    #[must_use]
    pub fn new(state: DocumentState) -> Self {
        Self { state }
    }

    #[must_use]
    pub fn into_state(self) -> DocumentState {
        self.state
    }
}

impl DocumentHandler for LocalDirector {
    fn document(&self) -> &DocumentState {
        &self.state
    }

    fn edit(&mut self, text: String) -> u64 {
        self.state = std::mem::take(&mut self.state).edit(text);
        self.state.version()
    }

    fn enqueue(&mut self, diff: Diff) -> EnqueueOutcome {
        self.state.enqueue(diff)
    }

    fn apply(&mut self, id: &DiffId) -> std::result::Result<u64, ApplyError> {
        match std::mem::take(&mut self.state).apply(id) {
            Ok(next) => {
                self.state = next;
                Ok(self.state.version())
            }
            Err((state, e)) => {
                self.state = state;
                Err(e)
            }
        }
    }

    fn reject(&mut self, id: &DiffId) -> std::result::Result<(), ApplyError> {
        match std::mem::take(&mut self.state).reject(id) {
            Ok(next) => {
                self.state = next;
                Ok(())
            }
            Err((state, e)) => {
                self.state = state;
                Err(e)
            }
        }
    }
}

struct HostCommandRequest {
    envelope: CommandEnvelope,
    response_tx: oneshot::Sender<Result<ResponseEnvelope>>,
}

#[derive(Clone)]
pub struct HostCommandClient {
    request_tx: mpsc::Sender<HostCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl HostCommandClient {
    pub async fn send(&self, envelope: CommandEnvelope) -> Result<ResponseEnvelope> {
        envelope.validate().map_err(|e| {
            StoryError::Host(format!(
                "invalid host command envelope {}: {}",
                envelope.request_id, e
            ))
        })?;

        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(HostCommandRequest {
                envelope,
                response_tx,
            })
            .await
            .map_err(|e| StoryError::Channel(format!("failed to send host command request: {e}")))?;

        response_rx
            .await
            .map_err(|e| StoryError::Channel(format!("host command response dropped: {e}")))?
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.event_tx.subscribe()
    }
}

pub struct HostCommandServer<H: DocumentHandler> {
    request_rx: mpsc::Receiver<HostCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
    handler: H,
    policy: InvalidDiffPolicy,
    retriever: Option<Arc<dyn Retriever>>,
}

#[must_use]
pub fn command_channel<H: DocumentHandler>(
    request_capacity: usize,
    event_capacity: usize,
    handler: H,
) -> (HostCommandClient, HostCommandServer<H>) {
    let (request_tx, request_rx) = mpsc::channel(request_capacity.max(1));
    let (event_tx, _event_rx) = broadcast::channel(event_capacity.max(1));

    (
        HostCommandClient {
            request_tx,
            event_tx: event_tx.clone(),
        },
        HostCommandServer {
            request_rx,
            event_tx,
            handler,
            policy: InvalidDiffPolicy::default(),
            retriever: None,
        },
    )
}

impl<H: DocumentHandler> HostCommandServer<H> {
    #[must_use]
    pub fn with_policy(mut self, policy: InvalidDiffPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    #[must_use]
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Serve until every client is dropped. Returns the handler.
    pub async fn run(mut self) -> H {
        while let Some(request) = self.request_rx.recv().await {
            let response = self.route(&request.envelope).await;
            let _ = request.response_tx.send(response);
        }
        self.handler
    }

    /// Route a command envelope to the appropriate handler.
    pub async fn route(&mut self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        debug!(command = envelope.command.as_str(), request_id = %envelope.request_id, "routing");
        match envelope.command {
            CommandName::HostPing => Ok(ResponseEnvelope::ok(
                envelope.request_id.clone(),
                json!({"pong": true}),
            )),
            CommandName::HostVersion => Ok(ResponseEnvelope::ok(
                envelope.request_id.clone(),
                json!({
                    "contract_version": crate::host::contract::EVENT_VERSION,
                    "vocabulary_version": VOCABULARY_VERSION,
                    "channel": "storyva_host_v1"
                }),
            )),
            CommandName::MarkupValidate => self.handle_markup_validate(envelope),
            CommandName::MarkupVocabulary => Ok(self.handle_markup_vocabulary(envelope)),
            CommandName::DiffPropose => self.handle_diff_propose(envelope),
            CommandName::DiffApply => self.handle_diff_apply(envelope),
            CommandName::DiffReject => self.handle_diff_reject(envelope),
            CommandName::DocumentUpdate => self.handle_document_update(envelope),
            CommandName::DocumentGet => Ok(self.handle_document_get(envelope)),
            CommandName::DocumentContext => Ok(ResponseEnvelope::ok(
                envelope.request_id.clone(),
                json!({"context": self.handler.document().context_block()}),
            )),
            CommandName::KnowledgeSearch => {
                knowledge_search(self.retriever.clone(), envelope).await
            }
            CommandName::SessionStop => {
                info!("session stop requested");
                Ok(ResponseEnvelope::ok(
                    envelope.request_id.clone(),
                    json!({"stopping": true}),
                ))
            }
        }
    }

    fn handle_markup_validate(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let text = parse_string_field(&envelope.payload, "text", "markup.validate")?;
        let report = markup::validate_text(&text);
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            json!({
                "valid": report.valid,
                "errors": report.codes(),
                "messages": report.messages(),
                "suggestion": report.suggestion(&text),
            }),
        ))
    }

    fn handle_markup_vocabulary(&self, envelope: &CommandEnvelope) -> ResponseEnvelope {
        let tags: serde_json::Map<String, Value> = TagCategory::ALL
            .iter()
            .map(|c| (c.as_str().to_owned(), json!(vocabulary::names_in(*c))))
            .collect();
        ResponseEnvelope::ok(
            envelope.request_id.clone(),
            json!({
                "version": VOCABULARY_VERSION,
                "count": vocabulary::len(),
                "tags": tags,
            }),
        )
    }

    fn handle_diff_propose(&mut self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let explanation = envelope
            .payload
            .get("explanation")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let diff = match envelope.payload.get("patch").and_then(Value::as_str) {
            Some(patch) => diff::propose_patch(patch, explanation)?,
            None => {
                let original = parse_string_field(&envelope.payload, "original", "diff.propose")?;
                let proposed = parse_string_field(&envelope.payload, "proposed", "diff.propose")?;
                diff::propose(&original, &proposed, explanation)
            }
        };
        let request_id = envelope.request_id.clone();

        if !diff.is_valid() {
            warn!(diff_id = %diff.id(), codes = ?diff.validation().errors, "invalid proposal");
            return Ok(match self.policy {
                InvalidDiffPolicy::Report => ResponseEnvelope::ok(
                    request_id,
                    json!({
                        "status": "invalid",
                        "diff": diff,
                        "errors": diff.validation().errors,
                        "reasons": diff.validation().reasons,
                        "suggestion": diff.suggestion(),
                    }),
                ),
                InvalidDiffPolicy::Drop => ResponseEnvelope::ok(
                    request_id,
                    json!({"status": "dropped", "diff_id": diff.id()}),
                ),
            });
        }
        if !self.handler.document().text().contains(diff.original_span()) {
            return Ok(ResponseEnvelope::ok(
                request_id,
                json!({
                    "status": "not_found",
                    "diff_id": diff.id(),
                    "reason": "the text to replace was not found in the current story",
                }),
            ));
        }

        let payload = json!({"diff": &diff});
        match self.handler.enqueue(diff) {
            EnqueueOutcome::Enqueued(id) => {
                self.emit_event("diff.proposed", payload.clone());
                Ok(ResponseEnvelope::ok(
                    request_id,
                    json!({"status": "queued", "diff_id": id, "diff": payload["diff"]}),
                ))
            }
            EnqueueOutcome::Duplicate(id) => Ok(ResponseEnvelope::ok(
                request_id,
                json!({"status": "duplicate", "diff_id": id}),
            )),
            EnqueueOutcome::Rejected(id) => Ok(ResponseEnvelope::ok(
                request_id,
                json!({"status": "invalid", "diff_id": id}),
            )),
        }
    }

    fn handle_diff_apply(&mut self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let id = DiffId::from(parse_non_empty_field(
            &envelope.payload,
            "diff_id",
            "diff.apply",
        )?);
        match self.handler.apply(&id) {
            Ok(version) => {
                self.emit_event(
                    "document.updated",
                    json!({
                        "text": self.handler.document().text(),
                        "version": version,
                        "diff_id": id,
                    }),
                );
                Ok(ResponseEnvelope::ok(
                    envelope.request_id.clone(),
                    json!({"applied": true, "diff_id": id, "version": version}),
                ))
            }
            Err(e) => {
                if matches!(e, ApplyError::StaleDiff(_)) {
                    self.emit_event(
                        "diff.stale",
                        json!({"diff_id": id, "message": e.to_string()}),
                    );
                }
                Err(e.into())
            }
        }
    }

    fn handle_diff_reject(&mut self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let id = DiffId::from(parse_non_empty_field(
            &envelope.payload,
            "diff_id",
            "diff.reject",
        )?);
        self.handler.reject(&id)?;
        self.emit_event("diff.rejected", json!({"diff_id": id}));
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            json!({"rejected": true, "diff_id": id}),
        ))
    }

    fn handle_document_update(&mut self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let text = parse_string_field(&envelope.payload, "text", "document.update")?;
        let version = self.handler.edit(text);
        self.emit_event(
            "document.updated",
            json!({"text": self.handler.document().text(), "version": version}),
        );
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            json!({"version": version}),
        ))
    }

    fn handle_document_get(&self, envelope: &CommandEnvelope) -> ResponseEnvelope {
        let document = self.handler.document();
        ResponseEnvelope::ok(
            envelope.request_id.clone(),
            json!({
                "text": document.text(),
                "version": document.version(),
                "pending": document.pending_diffs(),
            }),
        )
    }

    fn emit_event(&self, event: &str, payload: Value) {
        let envelope =
            EventEnvelope::new(uuid::Uuid::new_v4().to_string(), event.to_owned(), payload);
        let _ = self.event_tx.send(envelope);
    }
}

/// Owns its retriever so no `&self` is held across the await.
async fn knowledge_search(
    retriever: Option<Arc<dyn Retriever>>,
    envelope: &CommandEnvelope,
) -> Result<ResponseEnvelope> {
    let query = parse_non_empty_field(&envelope.payload, "query", "knowledge.search")?;
    let Some(retriever) = retriever else {
        return Err(StoryError::Retrieval(
            "no knowledge source configured".to_owned(),
        ));
    };
    let result = retriever.search(&query).await?;
    Ok(ResponseEnvelope::ok(
        envelope.request_id.clone(),
        json!({
            "answer": result.answer,
            "citations": result.citations,
            "rendered": result.render(),
        }),
    ))
}

/// A string field taken verbatim; diff spans and document text must not be
/// trimmed.
fn parse_string_field(payload: &Value, field: &str, command: &str) -> Result<String> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| StoryError::Host(format!("{command} requires payload.{field}")))
}

fn parse_non_empty_field(payload: &Value, field: &str, command: &str) -> Result<String> {
    let raw = parse_string_field(payload, field, command)?;
    let value = raw.trim();
    if value.is_empty() {
        return Err(StoryError::Host(format!(
            "{command} requires a non-empty payload.{field}"
        )));
    }
    Ok(value.to_owned())
}
