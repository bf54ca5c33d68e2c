mod builder;
mod stream;

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use converse_model::{Message, ModelFinishReason, ModelRequest};
use serde::Serialize;
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::SessionConfig;
use crate::error::{Error, ModelError};
use crate::executor::FunctionCallDelegate;
use crate::function::Registry;
use crate::model_client::ModelClient;
use crate::prompt::Prompt;
use crate::transcript::{CompletionMetrics, Transcript, TranscriptEntry};
pub use builder::AgentSessionBuilder;
pub use stream::{StreamAbortHandle, StreamHandle};

/// The stage a session is in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionStage {
    /// No turn is in flight.
    Idle,
    /// A `respond` or `stream` turn is in flight.
    Responding,
}

/// The outcome of a successful turn.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResolvedCompletion {
    /// Text of the final assistant message.
    pub output: String,
    /// Every entry appended to the transcript by the turn, in append order.
    pub entries: Vec<TranscriptEntry>,
}

/// A conversation with a model that may call functions.
///
/// The session owns the transcript and allows one turn at a time. A turn
/// sends the transcript to the model, executes the function calls it asks
/// for and loops until the model answers without calls. A turn that fails
/// or is cancelled leaves the transcript exactly as it was before the turn
/// began.
///
/// Cloning the session yields another handle to the same conversation, so
/// [`stop`](Self::stop) and [`reset`](Self::reset) can be called while
/// another task is waiting on a turn.
#[derive(Clone)]
pub struct AgentSession {
    inner: Arc<Inner>,
}

impl AgentSession {
    /// Sends `prompt` and waits for the final answer.
    ///
    /// Dropping the returned future cancels the turn.
    pub async fn respond<P: Into<Prompt>>(
        &self,
        prompt: P,
    ) -> Result<ResolvedCompletion, Error> {
        let turn = self.begin_turn(prompt.into()).await?;
        let _guard = TurnGuard::new(Arc::clone(&self.inner), turn.id);
        let span = debug_span!("turn", id = turn.id);
        run_turn(Arc::clone(&self.inner), turn, None)
            .instrument(span)
            .await
    }

    /// Sends `prompt` and returns a handle that yields the answer token by
    /// token.
    ///
    /// The turn runs in the background. Only resolving the prompt happens
    /// before this method returns.
    pub async fn stream<P: Into<Prompt>>(
        &self,
        prompt: P,
    ) -> Result<StreamHandle, Error> {
        let turn = self.begin_turn(prompt.into()).await?;
        let (token_tx, token_rx) =
            mpsc::channel(self.inner.config.stream_buffer.max(1));

        let guard = TurnGuard::new(Arc::clone(&self.inner), turn.id);
        let cancel = turn.cancel.clone();
        let streaming = Arc::clone(&turn.streaming);
        let span = debug_span!("turn", id = turn.id, streaming = true);
        let completion = tokio::spawn(
            run_turn(Arc::clone(&self.inner), turn, Some(token_tx))
                .instrument(span),
        );
        Ok(StreamHandle::new(
            guard, token_rx, cancel, streaming, completion,
        ))
    }

    /// Stops the turn in flight, if any.
    ///
    /// The turn is rolled back and its caller gets [`Error::Cancelled`].
    /// The session is idle when this method returns.
    pub fn stop(&self) {
        self.inner.stop_turn(None);
    }

    /// Stops the turn in flight and clears the transcript.
    pub fn reset(&self) {
        let stopped = {
            let mut state = self.inner.state();
            let stopped = state.cancel_active(None);
            state.transcript.clear();
            stopped
        };
        if stopped {
            self.inner.model_client.stop();
        }
        self.inner.model_client.reset();
        debug!("session reset");
    }

    /// Returns a snapshot of the transcript.
    pub fn transcript(&self) -> Transcript {
        self.inner.state().transcript.clone()
    }

    /// Returns `true` if a turn is in flight.
    #[inline]
    pub fn is_responding(&self) -> bool {
        self.stage() == SessionStage::Responding
    }

    /// Returns the current stage.
    pub fn stage(&self) -> SessionStage {
        if self.inner.state().active.is_some() {
            SessionStage::Responding
        } else {
            SessionStage::Idle
        }
    }

    /// Returns the configuration of this session.
    #[inline]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

impl AgentSession {
    fn from_builder(builder: AgentSessionBuilder) -> Self {
        let AgentSessionBuilder {
            model_client,
            functions,
            delegate,
            system_prompt,
            config,
        } = builder;

        let inner = Inner {
            model_client,
            registry: Registry::with_functions(functions),
            delegate,
            system_prompt,
            config,
            state: Default::default(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Resolves the content of a new turn and marks the session as
    /// responding.
    async fn begin_turn(&self, prompt: Prompt) -> Result<Turn, Error> {
        if self.is_responding() {
            return Err(Error::AlreadyResponding);
        }

        // Nothing is touched until the content is resolved.
        let user = prompt.resolve().await.map_err(|err| {
            warn!("rejected user content: {err}");
            Error::InvalidUserContent(err)
        })?;
        let system = match &self.inner.system_prompt {
            Some(prompt) => Some(prompt.resolve().await.map_err(|err| {
                warn!("rejected system content: {err}");
                Error::InvalidSystemContent(err)
            })?),
            None => None,
        };

        let mut state = self.inner.state();
        if state.active.is_some() {
            return Err(Error::AlreadyResponding);
        }

        let mut pending = Vec::with_capacity(2);
        // The system prompt opens the conversation.
        if let Some(system) = system.filter(|_| state.transcript.is_empty()) {
            pending.push(Message::system(system));
        }
        pending.push(Message::user(user));

        let id = state.next_turn_id;
        let base_len = state.transcript.len();
        state.next_turn_id += 1;
        let cancel = CancellationToken::new();
        let streaming = Arc::new(AtomicBool::new(true));
        state.active = Some(ActiveTurn {
            id,
            base_len,
            cancel: cancel.clone(),
            streaming: Arc::clone(&streaming),
        });
        debug!("turn {id} began with {base_len} entries");

        Ok(Turn {
            id,
            history: state.transcript.messages(),
            pending,
            cancel,
            streaming,
        })
    }
}

struct Inner {
    model_client: ModelClient,
    registry: Registry,
    delegate: Arc<dyn FunctionCallDelegate>,
    system_prompt: Option<Prompt>,
    config: SessionConfig,
    state: Mutex<State>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        // The state is consistent between statements, so a panic elsewhere
        // doesn't invalidate it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancels the turn `turn_id`, or whichever is active if `None`, and
    /// halts the model if a turn was cancelled.
    fn stop_turn(&self, turn_id: Option<u64>) {
        let stopped = self.state().cancel_active(turn_id);
        if stopped {
            self.model_client.stop();
        }
    }

    /// Appends `batch` on behalf of the turn, failing if the turn was
    /// cancelled. The turn is over once `finish` is committed.
    fn commit(
        &self,
        turn: &Turn,
        batch: Vec<(Message, Option<CompletionMetrics>)>,
        finish: bool,
    ) -> Result<Vec<TranscriptEntry>, Error> {
        let mut guard = self.state();
        let state = &mut *guard;
        let is_current = state.active.as_ref().is_some_and(|a| a.id == turn.id);
        if !is_current || turn.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let entries: Vec<_> = batch
            .into_iter()
            .map(|(message, metrics)| state.transcript.push(message, metrics))
            .collect();
        trace!("turn {} committed {} entries", turn.id, entries.len());

        if finish {
            if let Some(active) = state.active.take() {
                active.streaming.store(false, Ordering::Release);
            }
        }
        Ok(entries)
    }

    /// Discards everything the turn appended, if it's still the active one.
    fn abort_turn(&self, turn_id: u64) {
        let mut guard = self.state();
        let state = &mut *guard;
        match state.active.take() {
            Some(active) if active.id == turn_id => {
                state.transcript.truncate(active.base_len);
                active.streaming.store(false, Ordering::Release);
                debug!("turn {turn_id} rolled back");
            }
            other => state.active = other,
        }
    }
}

#[derive(Default)]
struct State {
    transcript: Transcript,
    active: Option<ActiveTurn>,
    next_turn_id: u64,
}

impl State {
    /// Returns `true` if a turn was cancelled.
    fn cancel_active(&mut self, turn_id: Option<u64>) -> bool {
        match self.active.take() {
            Some(active) if turn_id.is_none_or(|id| id == active.id) => {
                active.cancel.cancel();
                self.transcript.truncate(active.base_len);
                active.streaming.store(false, Ordering::Release);
                debug!("turn {} cancelled", active.id);
                true
            }
            other => {
                self.active = other;
                false
            }
        }
    }
}

struct ActiveTurn {
    id: u64,
    /// Transcript length before the turn began.
    base_len: usize,
    cancel: CancellationToken,
    streaming: Arc<AtomicBool>,
}

struct Turn {
    id: u64,
    history: Vec<Message>,
    /// System and user messages, appended with the first completion.
    pending: Vec<Message>,
    cancel: CancellationToken,
    streaming: Arc<AtomicBool>,
}

/// Cancels the turn when dropped, unless it's already over.
struct TurnGuard {
    inner: Arc<Inner>,
    turn_id: u64,
}

impl TurnGuard {
    fn new(inner: Arc<Inner>, turn_id: u64) -> Self {
        Self { inner, turn_id }
    }

    fn stop(&self) {
        self.inner.stop_turn(Some(self.turn_id));
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_turn(
    inner: Arc<Inner>,
    turn: Turn,
    token_tx: Option<mpsc::Sender<String>>,
) -> Result<ResolvedCompletion, Error> {
    let result = select! {
        biased;

        _ = turn.cancel.cancelled() => Err(Error::Cancelled),
        result = drive_turn(&inner, &turn, token_tx) => result,
    };

    match &result {
        Ok(completion) => {
            debug!("turn finished with {} entries", completion.entries.len());
        }
        Err(Error::Cancelled) => {
            warn!("turn cancelled");
            inner.abort_turn(turn.id);
        }
        Err(err) => {
            warn!("turn failed: {err}");
            inner.abort_turn(turn.id);
        }
    }
    turn.streaming.store(false, Ordering::Release);
    result
}

async fn drive_turn(
    inner: &Inner,
    turn: &Turn,
    token_tx: Option<mpsc::Sender<String>>,
) -> Result<ResolvedCompletion, Error> {
    let functions = inner.registry.definitions();
    let max_iterations = inner.config.max_function_call_iterations;

    let mut messages = turn.history.clone();
    messages.extend(turn.pending.iter().cloned());
    let mut batch: Vec<_> =
        turn.pending.iter().cloned().map(|message| (message, None)).collect();
    let mut entries = vec![];
    let mut iterations = 0;

    loop {
        let mut options = inner.config.options.clone();
        options.force_functions &= iterations == 0;
        let req = ModelRequest {
            messages: messages.clone(),
            functions: functions.clone(),
            options,
        };
        let resp = inner
            .model_client
            .send_request(req, token_tx.clone())
            .await
            .map_err(|err| Error::Model(ModelError::new(err)))?;

        if resp.finish_reason == Some(ModelFinishReason::Length) {
            warn!("the completion was cut off by the token limit");
        }
        let finish = resp.function_calls.is_empty();
        let assistant =
            Message::assistant(resp.text.clone(), resp.function_calls.clone());
        messages.push(assistant.clone());
        batch.push((assistant, finish.then_some(resp.metrics)));
        entries.extend(inner.commit(turn, mem::take(&mut batch), finish)?);

        if finish {
            return Ok(ResolvedCompletion {
                output: resp.text,
                entries,
            });
        }

        iterations += 1;
        if iterations > max_iterations {
            warn!("function calls didn't settle, giving up");
            return Err(Error::FunctionCallLimitExceeded(max_iterations));
        }

        let calls = inner
            .registry
            .resolve(resp.function_calls)
            .map_err(Error::UnknownFunction)?;
        debug!("executing {} function calls", calls.len());
        let returns = inner
            .delegate
            .execute_function_calls(calls, turn.cancel.child_token())
            .await?;

        for ret in returns {
            let tool = Message::tool(ret.name, ret.content);
            messages.push(tool.clone());
            batch.push((tool, None));
        }
        entries.extend(inner.commit(turn, mem::take(&mut batch), false)?);
    }
}
