//! A conversation with the relay: one streamed reply at a time.
//!
//! `send` records the user turn, opens the relay request and folds the
//! reply into the transcript chunk by chunk. `cancel` stops the reply in
//! flight and keeps what arrived. A new `send` while a reply is streaming
//! cancels the old one first, so at most one stream feeds the transcript.
//!
//! All transcript changes happen under one lock together with the check
//! that the stream is still current. Once a stream has been cancelled no
//! later chunk from it can land.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use orion_protocol::{ChatMessage, ChatRequest, ErrorBody};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{BodyStream, RelayClient, RelayResponse};
use crate::decode::Utf8Decoder;
use crate::notice;
use crate::render::{Render, RenderEvent};
use crate::transcript::{DisplayMessage, Transcript};

/// Why a turn produced no reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    /// The relay answered with an error body instead of a stream.
    Rejected(ErrorBody),
    /// The relay could not be reached.
    Connection(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The whole reply arrived.
    Completed,
    /// Stopped by `cancel` or by a newer `send`; the partial reply stays.
    Cancelled,
    /// The stream broke or stalled after it started.
    Interrupted,
    Failed(Failure),
    /// Blank input; nothing was sent.
    Ignored,
}

struct ActiveStream {
    generation: u64,
    token: CancellationToken,
    /// Assistant message receiving this stream, once it exists.
    reply: Option<Uuid>,
}

enum Ending {
    Completed,
    Interrupted(String),
    Failed(String, Failure),
}

struct State {
    transcript: Transcript,
    active: Option<ActiveStream>,
    generation: u64,
    renderer: Box<dyn Render>,
}

impl State {
    fn add(&mut self, message: DisplayMessage) {
        self.renderer
            .render(RenderEvent::MessageAdded(message.clone()));
        self.transcript.push(message);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.generation == generation && !a.token.is_cancelled())
    }

    fn reply_text(&self, reply: Option<Uuid>) -> String {
        reply
            .and_then(|id| self.transcript.get(id))
            .map(|m| m.text.clone())
            .unwrap_or_default()
    }

    /// Stop the active stream. A non-empty partial reply joins the history;
    /// a reply that never received text is removed from the display.
    fn cancel_active(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        active.token.cancel();

        let partial = self.reply_text(active.reply);
        info!(
            generation = active.generation,
            chars = partial.chars().count(),
            "stream cancelled"
        );
        if !partial.is_empty() {
            self.transcript.record(ChatMessage::assistant(partial));
        } else if let Some(id) = active.reply {
            if self.transcript.remove(id) {
                self.renderer.render(RenderEvent::MessageRemoved { id });
            }
        }
        self.renderer.render(RenderEvent::StreamingChanged(false));
        true
    }

    fn append(&mut self, generation: u64, reply: Uuid, text: &str) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        if !text.is_empty() && self.transcript.append(reply, text) {
            self.renderer.render(RenderEvent::TextAppended {
                id: reply,
                delta: text.to_string(),
            });
        }
        true
    }

    /// Close out stream `generation`, unless it was cancelled first.
    fn settle(&mut self, generation: u64, ending: Ending) -> TurnOutcome {
        if !self.is_current(generation) {
            return TurnOutcome::Cancelled;
        }
        let Some(active) = self.active.take() else {
            return TurnOutcome::Cancelled;
        };
        let partial = self.reply_text(active.reply);

        let outcome = match ending {
            Ending::Completed => {
                info!(generation, chars = partial.chars().count(), "reply completed");
                if !partial.is_empty() {
                    self.transcript.record(ChatMessage::assistant(partial));
                }
                TurnOutcome::Completed
            }
            Ending::Interrupted(text) => {
                self.report(active.reply, &partial, text);
                TurnOutcome::Interrupted
            }
            Ending::Failed(text, failure) => {
                self.report(active.reply, &partial, text);
                TurnOutcome::Failed(failure)
            }
        };
        self.renderer.render(RenderEvent::StreamingChanged(false));
        outcome
    }

    /// Show a notice. An empty reply placeholder is replaced by it; a
    /// partial reply stays and the notice follows it.
    fn report(&mut self, reply: Option<Uuid>, partial: &str, text: String) {
        let notice = DisplayMessage::notice(text);
        match reply {
            Some(id) if partial.is_empty() => {
                self.renderer.render(RenderEvent::MessageReplaced {
                    id,
                    message: notice.clone(),
                });
                self.transcript.replace(id, notice);
            }
            _ => self.add(notice),
        }
    }
}

/// Clears the active stream on every exit from `send`, including when the
/// `send` future is dropped mid-flight.
struct StreamGuard {
    state: Arc<Mutex<State>>,
    generation: u64,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state
            .active
            .as_ref()
            .is_some_and(|a| a.generation == self.generation)
        {
            state.cancel_active();
        }
    }
}

enum Read {
    Chunk(Bytes),
    End,
    Failed(reqwest::Error),
    Idle(Duration),
}

async fn next_read(body: &mut BodyStream, idle_timeout: Option<Duration>) -> Read {
    let next = match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, body.next()).await {
            Ok(next) => next,
            Err(_) => return Read::Idle(limit),
        },
        None => body.next().await,
    };
    match next {
        Some(Ok(bytes)) => Read::Chunk(bytes),
        Some(Err(e)) => Read::Failed(e),
        None => Read::End,
    }
}

/// Handle to one conversation. Clones share the same transcript, so one
/// task can `send` while another calls `cancel`.
#[derive(Clone)]
pub struct ChatSession {
    client: RelayClient,
    agent_id: Option<String>,
    idle_timeout: Option<Duration>,
    state: Arc<Mutex<State>>,
}

impl ChatSession {
    pub fn new(client: RelayClient, renderer: impl Render + 'static) -> Self {
        Self {
            client,
            agent_id: None,
            idle_timeout: None,
            state: Arc::new(Mutex::new(State {
                transcript: Transcript::new(),
                active: None,
                generation: 0,
                renderer: Box::new(renderer),
            })),
        }
    }

    /// Ask the relay for agent profile `agent_id` on every turn.
    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Treat a silent stream as interrupted after `limit`.
    pub fn with_idle_timeout(mut self, limit: Duration) -> Self {
        self.idle_timeout = Some(limit);
        self
    }

    /// Greet the user. The greeting is shown but never sent.
    pub fn with_welcome(self) -> Self {
        self.lock().add(DisplayMessage::welcome());
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().active.is_some()
    }

    pub fn messages(&self) -> Vec<DisplayMessage> {
        self.lock().transcript.messages().to_vec()
    }

    pub fn history(&self) -> Vec<ChatMessage> {
        self.lock().transcript.history().to_vec()
    }

    /// Stop the reply in flight. Returns false if nothing was streaming.
    pub fn cancel(&self) -> bool {
        self.lock().cancel_active()
    }

    /// Send `text` as the next user turn and stream the reply.
    pub async fn send(&self, text: impl Into<String>) -> TurnOutcome {
        let text = text.into();
        if text.trim().is_empty() {
            return TurnOutcome::Ignored;
        }

        let token = CancellationToken::new();
        let (generation, request) = {
            let mut state = self.lock();
            if state.cancel_active() {
                debug!("new message supersedes the active stream");
            }
            state.generation += 1;
            let generation = state.generation;
            state.active = Some(ActiveStream {
                generation,
                token: token.clone(),
                reply: None,
            });

            state.transcript.record(ChatMessage::user(text.clone()));
            state.add(DisplayMessage::user(text));
            state.renderer.render(RenderEvent::StreamingChanged(true));

            let mut request = ChatRequest::new(state.transcript.history().to_vec());
            if let Some(agent_id) = &self.agent_id {
                request = request.with_agent(agent_id.clone());
            }
            (generation, request)
        };
        let _guard = StreamGuard {
            state: Arc::clone(&self.state),
            generation,
        };

        debug!(generation, messages = request.messages.len(), "opening relay stream");
        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => return TurnOutcome::Cancelled,
            opened = self.client.open(&request) => opened,
        };

        let body = match opened {
            Ok(RelayResponse::Streaming(body)) => body,
            Ok(RelayResponse::Rejected { status, body }) => {
                warn!(status, kind = %body.kind, "relay rejected message");
                let text = notice::rejected(&body);
                return self
                    .lock()
                    .settle(generation, Ending::Failed(text, Failure::Rejected(body)));
            }
            Err(e) => {
                warn!(error = %e, "relay unreachable");
                let text = notice::unreachable(&e);
                let failure = Failure::Connection(e.to_string());
                return self.lock().settle(generation, Ending::Failed(text, failure));
            }
        };

        let reply = {
            let mut state = self.lock();
            if !state.is_current(generation) {
                return TurnOutcome::Cancelled;
            }
            let message = DisplayMessage::assistant();
            let id = message.id;
            if let Some(active) = state.active.as_mut() {
                active.reply = Some(id);
            }
            state.add(message);
            id
        };

        self.pump(generation, token, reply, body).await
    }

    async fn pump(
        &self,
        generation: u64,
        token: CancellationToken,
        reply: Uuid,
        mut body: BodyStream,
    ) -> TurnOutcome {
        let mut decoder = Utf8Decoder::new();
        loop {
            let read = tokio::select! {
                biased;
                _ = token.cancelled() => return TurnOutcome::Cancelled,
                read = next_read(&mut body, self.idle_timeout) => read,
            };

            match read {
                Read::Chunk(bytes) => {
                    let text = decoder.decode(&bytes);
                    if !self.lock().append(generation, reply, &text) {
                        return TurnOutcome::Cancelled;
                    }
                }
                Read::End => {
                    let tail = decoder.finish();
                    let mut state = self.lock();
                    if !state.append(generation, reply, &tail) {
                        return TurnOutcome::Cancelled;
                    }
                    return state.settle(generation, Ending::Completed);
                }
                Read::Failed(e) => {
                    warn!(generation, error = %e, "reply stream broke");
                    return self
                        .lock()
                        .settle(generation, Ending::Interrupted(notice::interrupted()));
                }
                Read::Idle(limit) => {
                    warn!(generation, timeout = ?limit, "reply stream stalled");
                    return self
                        .lock()
                        .settle(generation, Ending::Interrupted(notice::idle(limit)));
                }
            }
        }
    }
}
