use std::panic;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use super::{Inner, ResolvedCompletion, TurnGuard};
use crate::error::Error;

/// The token stream of a turn started by
/// [`AgentSession::stream`](super::AgentSession::stream).
///
/// Tokens arrive in generation order. The stream ends when the turn
/// finishes; a cancelled turn yields [`Error::Cancelled`] as its last item.
/// Failures other than cancellation end the stream silently and are
/// reported by [`collect_response`](Self::collect_response).
///
/// Dropping the handle before collecting the response cancels the turn.
pub struct StreamHandle {
    guard: TurnGuard,
    tokens: mpsc::Receiver<String>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    streaming: Arc<AtomicBool>,
    completion: Option<JoinHandle<Result<ResolvedCompletion, Error>>>,
    finished: bool,
}

impl StreamHandle {
    pub(super) fn new(
        guard: TurnGuard,
        tokens: mpsc::Receiver<String>,
        cancel: CancellationToken,
        streaming: Arc<AtomicBool>,
        completion: JoinHandle<Result<ResolvedCompletion, Error>>,
    ) -> Self {
        Self {
            guard,
            tokens,
            cancelled: Box::pin(cancel.cancelled_owned()),
            streaming,
            completion: Some(completion),
            finished: false,
        }
    }

    /// Returns `true` while the turn is generating.
    #[inline]
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    /// Cancels the turn.
    pub fn stop(&self) {
        self.guard.stop();
    }

    /// Returns a handle that can cancel the turn from another task.
    pub fn abort_handle(&self) -> StreamAbortHandle {
        StreamAbortHandle {
            inner: Arc::downgrade(&self.guard.inner),
            turn_id: self.guard.turn_id,
        }
    }

    /// Waits for the whole turn, including its function calls, and returns
    /// the outcome.
    ///
    /// Tokens that weren't consumed yet are discarded, generation doesn't
    /// wait for them anymore.
    pub async fn collect_response(mut self) -> Result<ResolvedCompletion, Error> {
        self.tokens.close();
        let Some(completion) = self.completion.take() else {
            return Err(Error::Cancelled);
        };
        match completion.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => panic::resume_unwind(err.into_panic()),
            Err(_) => Err(Error::Cancelled),
        }
    }
}

impl Stream for StreamHandle {
    type Item = Result<String, Error>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.finished = true;
            return Poll::Ready(Some(Err(Error::Cancelled)));
        }
        match this.tokens.poll_recv(cx) {
            Poll::Ready(Some(token)) => Poll::Ready(Some(Ok(token))),
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Cancels a streaming turn without access to its [`StreamHandle`].
#[derive(Clone, Debug)]
pub struct StreamAbortHandle {
    inner: Weak<Inner>,
    turn_id: u64,
}

impl StreamAbortHandle {
    /// Cancels the turn. Does nothing if the turn is already over.
    pub fn stop(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.stop_turn(Some(self.turn_id));
        }
    }
}
