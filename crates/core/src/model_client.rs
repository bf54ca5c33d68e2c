use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::time::Instant;

use converse_model::{
    FunctionCallRequest, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent,
};
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::transcript::CompletionMetrics;

type SendRequestResult =
    Result<ModelClientResponse, Box<dyn ModelProviderError>>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;

/// A wrapper around a model provider that provides a type-erased interface
/// for the other modules.
#[derive(Clone)]
pub struct ModelClient {
    provider: Arc<dyn ProviderObject>,
}

impl ModelClient {
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        Self {
            provider: Arc::new(ProviderObjectImpl(provider)),
        }
    }

    /// Sends a request and returns the response once it's fully received.
    ///
    /// Generated tokens are forwarded to `token_tx` as they arrive. Sending
    /// waits for room in the channel, and a closed channel only stops the
    /// forwarding.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    #[inline]
    pub async fn send_request(
        &self,
        req: ModelRequest,
        token_tx: Option<mpsc::Sender<String>>,
    ) -> Result<ModelClientResponse, Box<dyn ModelProviderError>> {
        self.provider.send_request(req, token_tx).await
    }

    #[inline]
    pub fn stop(&self) {
        self.provider.stop();
    }

    #[inline]
    pub fn reset(&self) {
        self.provider.reset();
    }
}

/// A completely received response from the model client.
#[derive(Clone, Debug)]
pub struct ModelClientResponse {
    pub text: String,
    /// Function calls requested by the model, in the order they arrived.
    pub function_calls: Vec<FunctionCallRequest>,
    /// The reason the model finished generating.
    pub finish_reason: Option<ModelFinishReason>,
    pub metrics: CompletionMetrics,
}

trait ProviderObject: Send + Sync + 'static {
    fn send_request(
        &self,
        req: ModelRequest,
        token_tx: Option<mpsc::Sender<String>>,
    ) -> BoxedSendRequestFuture;

    fn stop(&self);

    fn reset(&self);
}

struct ProviderObjectImpl<P>(P);

impl<P: ModelProvider + 'static> ProviderObject for ProviderObjectImpl<P> {
    fn send_request(
        &self,
        req: ModelRequest,
        token_tx: Option<mpsc::Sender<String>>,
    ) -> BoxedSendRequestFuture {
        let started_at = Instant::now();
        let fut = self.0.send_request(&req);
        Box::pin(
            async move {
                trace!("got a request: {:?}", req);
                let resp_or_err = fut.await;
                handle_response::<P>(resp_or_err, token_tx, started_at).await
            }
            .instrument(trace_span!("model client req")),
        )
    }

    #[inline]
    fn stop(&self) {
        self.0.stop();
    }

    #[inline]
    fn reset(&self) {
        self.0.reset();
    }
}

async fn handle_response<P: ModelProvider + 'static>(
    resp_or_err: Result<P::Response, P::Error>,
    token_tx: Option<mpsc::Sender<String>>,
    started_at: Instant,
) -> SendRequestResult {
    let resp = match resp_or_err {
        Ok(resp) => resp,
        Err(err) => {
            error!("got an error: {err:?}");
            return Err(Box::new(err));
        }
    };

    let mut text = String::new();
    let mut function_calls = Vec::new();
    let mut finish_reason = None;
    let mut token_count = 0u64;
    let mut first_token_at = None;

    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(event) => event,
            Err(err) => {
                error!("got an error: {err:?}");
                return Err(Box::new(err));
            }
        };

        let Some(event) = event else {
            break;
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::TokenDelta(token) => {
                token_count += 1;
                first_token_at.get_or_insert_with(Instant::now);
                text.push_str(&token);
                if let Some(tx) = &token_tx {
                    if tx.send(token).await.is_err() {
                        trace!("token receiver is gone");
                    }
                }
            }
            ModelResponseEvent::FunctionCall(req) => {
                function_calls.push(req);
            }
            ModelResponseEvent::Completed(reason) => {
                finish_reason = Some(reason);
            }
        }
    }

    let stats = pinned_resp.stats();
    let metrics = CompletionMetrics {
        tokens: stats.generated_tokens.unwrap_or(token_count),
        latency: started_at.elapsed(),
        time_to_first_token: first_token_at.map(|at| at - started_at),
        confidence: stats.confidence,
    };

    trace!("finished a request");

    Ok(ModelClientResponse {
        text,
        function_calls,
        finish_reason,
        metrics,
    })
}

#[cfg(test)]
mod tests {
    use converse_model::{ErrorKind, Message};
    use converse_test_model::{
        PresetEvent, PresetResponse, TestModelProvider, function_call,
    };
    use serde_json::json;

    use super::*;

    fn request(text: &str) -> ModelRequest {
        ModelRequest {
            messages: vec![Message::user(vec![text.into()])],
            functions: vec![],
            options: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_send_request() {
        let model_provider = TestModelProvider::default();
        let model_client = ModelClient::new(model_provider.clone());

        for _ in 0..3 {
            model_provider.add_response(PresetResponse::with_events([
                PresetEvent::Token("How ".to_owned()),
                PresetEvent::Token("are ".to_owned()),
                PresetEvent::Token("you?".to_owned()),
            ]));

            let (tx, mut rx) = mpsc::channel(8);
            let resp = model_client
                .send_request(request("Hi"), Some(tx))
                .await
                .unwrap();
            assert_eq!(resp.text, "How are you?");
            assert_eq!(resp.finish_reason, Some(ModelFinishReason::Stop));
            assert_eq!(resp.metrics.tokens, 3);
            assert!(resp.metrics.time_to_first_token.is_some());
            assert!(resp.metrics.latency >= resp.metrics.time_to_first_token.unwrap());

            let mut tokens = vec![];
            while let Some(token) = rx.recv().await {
                tokens.push(token);
            }
            assert_eq!(tokens, ["How ", "are ", "you?"]);
        }
    }

    #[tokio::test]
    async fn test_function_calls() {
        let model_provider = TestModelProvider::with_responses([
            PresetResponse::with_events([
                function_call("call:0", "get_fact", json!({ "topic": "cactus" })),
                function_call("call:1", "get_fact", json!({ "topic": "swift" })),
            ]),
        ]);
        let model_client = ModelClient::new(model_provider);

        let resp = model_client.send_request(request("Hi"), None).await.unwrap();
        assert!(resp.text.is_empty());
        assert_eq!(resp.finish_reason, Some(ModelFinishReason::FunctionCalls));
        let topics: Vec<_> = resp
            .function_calls
            .iter()
            .map(|call| call.arguments["topic"].as_str().unwrap())
            .collect();
        assert_eq!(topics, ["cactus", "swift"]);
    }

    #[tokio::test]
    async fn test_closed_token_channel() {
        let model_provider = TestModelProvider::with_responses([
            PresetResponse::with_text("still generating"),
        ]);
        let model_client = ModelClient::new(model_provider);

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let resp = model_client
            .send_request(request("Hi"), Some(tx))
            .await
            .unwrap();
        assert_eq!(resp.text, "still generating");
    }

    #[tokio::test]
    async fn test_error_handling() {
        let model_provider = TestModelProvider::default();
        let model_client = ModelClient::new(model_provider.clone());
        let err = model_client
            .send_request(request("Hi"), None)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);

        model_client.stop();
        model_client.reset();
        assert_eq!(model_provider.stop_count(), 1);
        assert_eq!(model_provider.reset_count(), 1);
    }
}
