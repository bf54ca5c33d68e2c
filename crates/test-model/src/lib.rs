//! A local fake model for testing purpose.

mod preset;

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use converse_model::{
    ErrorKind, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent, ResponseStats,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: &'static str,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    shared: Arc<Shared>,
    preset: PresetResponse,
    delay: Duration,
    epoch: u64,
    event_idx: usize,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();
        if this.shared.stop_epoch.load(Ordering::Acquire) != this.epoch {
            // Stopped by the provider, finish without the completed event.
            this.sleep = None;
            this.event_idx = usize::MAX;
            return Poll::Ready(Ok(None));
        }

        let preset_events = &this.preset.events;
        if let Some(sleep) = &mut this.sleep {
            ready!(sleep.as_mut().poll(cx));
            this.sleep = None;

            if this.event_idx < preset_events.len() {
                let event = match &preset_events[this.event_idx] {
                    PresetEvent::Token(token) => {
                        ModelResponseEvent::TokenDelta(token.clone())
                    }
                    PresetEvent::FunctionCall(req) => {
                        ModelResponseEvent::FunctionCall(req.clone())
                    }
                };
                this.event_idx += 1;
                return Poll::Ready(Ok(Some(event)));
            } else if this.event_idx == preset_events.len() {
                this.event_idx += 1;
                return Poll::Ready(Ok(Some(ModelResponseEvent::Completed(
                    if this.preset.has_function_call() {
                        ModelFinishReason::FunctionCalls
                    } else {
                        ModelFinishReason::Stop
                    },
                ))));
            } else {
                // In case this method is called after completion.
                return Poll::Ready(Ok(None));
            }
        }
        if this.event_idx > preset_events.len() {
            return Poll::Ready(Ok(None));
        }
        this.sleep = Some(Box::pin(sleep(this.delay)));
        Pin::new(this).poll_next_event(cx)
    }

    fn stats(&self) -> ResponseStats {
        let generated_tokens = self
            .preset
            .events
            .iter()
            .take(self.event_idx)
            .filter(|event| matches!(event, PresetEvent::Token(_)))
            .count();
        ResponseStats {
            generated_tokens: Some(generated_tokens as u64),
            confidence: Some(1.0),
        }
    }
}

#[derive(Default)]
struct Shared {
    script: Mutex<VecDeque<PresetResponse>>,
    requests: Mutex<Vec<ModelRequest>>,
    stop_epoch: AtomicU64,
    stop_count: AtomicUsize,
    reset_count: AtomicUsize,
}

/// A local fake model for testing purpose.
///
/// Before sending requests, you need to setup the script, which is how the
/// model should respond. Every request consumes the next preset response in
/// the order they were added, regardless of its messages. If there are no
/// enough responses in the script, an error will be returned.
///
/// Clones share the same script, so a test can keep one to inspect the
/// received requests after handing the other to a session.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    shared: Arc<Shared>,
    delay: Option<Duration>,
}

impl TestModelProvider {
    /// Creates a provider with the given script.
    pub fn with_responses(
        responses: impl IntoIterator<Item = PresetResponse>,
    ) -> Self {
        let provider = Self::default();
        for response in responses {
            provider.add_response(response);
        }
        provider
    }

    #[inline]
    pub fn add_response(&self, preset: PresetResponse) {
        lock(&self.shared.script).push_back(preset);
    }

    /// Sets the delay between two events, defaults to 1ms.
    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns all requests received so far.
    #[inline]
    pub fn requests(&self) -> Vec<ModelRequest> {
        lock(&self.shared.requests).clone()
    }

    /// Returns the number of responses that are not consumed yet.
    #[inline]
    pub fn remaining_responses(&self) -> usize {
        lock(&self.shared.script).len()
    }

    #[inline]
    pub fn stop_count(&self) -> usize {
        self.shared.stop_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn reset_count(&self) -> usize {
        self.shared.reset_count.load(Ordering::Acquire)
    }

    fn next_response(&self) -> Result<PresetResponse, Error> {
        let mut script = lock(&self.shared.script);
        let Some(front) = script.front_mut() else {
            return Err(Error {
                message: "no enough responses",
                kind: ErrorKind::RateLimitExceeded,
            });
        };
        match front.failures {
            Some(0) => Err(Error {
                message: "preset failure",
                kind: ErrorKind::Other,
            }),
            Some(ref mut failures) => {
                *failures -= 1;
                if *failures == 0 {
                    front.failures = None;
                }
                Err(Error {
                    message: "preset failure",
                    kind: ErrorKind::Other,
                })
            }
            None => script.pop_front().ok_or(Error {
                message: "no enough responses",
                kind: ErrorKind::RateLimitExceeded,
            }),
        }
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        lock(&self.shared.requests).push(req.clone());
        let resp = self.next_response().map(|preset| {
            let delay = preset
                .delay_ms
                .map(Duration::from_millis)
                .or(self.delay)
                .unwrap_or(Duration::from_millis(1));
            TestModelResponse {
                shared: Arc::clone(&self.shared),
                preset,
                delay,
                epoch: self.shared.stop_epoch.load(Ordering::Acquire),
                event_idx: 0,
                sleep: None,
            }
        });
        ready(resp)
    }

    fn stop(&self) {
        self.shared.stop_count.fetch_add(1, Ordering::AcqRel);
        self.shared.stop_epoch.fetch_add(1, Ordering::AcqRel);
    }

    fn reset(&self) {
        self.shared.reset_count.fetch_add(1, Ordering::AcqRel);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
