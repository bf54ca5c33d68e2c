//! Strategies for executing the function calls of a model response.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::select;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::function::{
    AggregatedFunctionCallError, Error as FunctionError, FunctionCall,
    FunctionReturn, FunctionThrow,
};

/// The error returned by a [`FunctionCallDelegate`].
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// One or more calls failed.
    #[error(transparent)]
    Aggregated(#[from] AggregatedFunctionCallError),
    /// A single call failed and the delegate stopped there.
    #[error(transparent)]
    Function(#[from] FunctionThrow),
    /// The execution was cancelled before every call finished.
    #[error("function call execution was cancelled")]
    Cancelled,
}

/// Decides how the function calls of one model response are executed.
///
/// Whatever the strategy, the returned list must be in the order of
/// `calls`. The session rolls the whole turn back on any error.
#[async_trait]
pub trait FunctionCallDelegate: Send + Sync + 'static {
    /// Executes `calls`, stopping early when `cancel` is triggered.
    async fn execute_function_calls(
        &self,
        calls: Vec<FunctionCall>,
        cancel: CancellationToken,
    ) -> Result<Vec<FunctionReturn>, ExecutionError>;
}

/// Runs every call as its own task, this is the default delegate.
#[derive(Clone, Copy, Debug, Default)]
pub struct ParallelExecutor;

#[async_trait]
impl FunctionCallDelegate for ParallelExecutor {
    async fn execute_function_calls(
        &self,
        calls: Vec<FunctionCall>,
        cancel: CancellationToken,
    ) -> Result<Vec<FunctionReturn>, ExecutionError> {
        execute_parallel_function_calls(calls, cancel).await
    }
}

/// Runs calls one after another and gives up on the first failure.
#[derive(Clone, Copy, Debug, Default)]
pub struct SequentialExecutor;

#[async_trait]
impl FunctionCallDelegate for SequentialExecutor {
    async fn execute_function_calls(
        &self,
        calls: Vec<FunctionCall>,
        cancel: CancellationToken,
    ) -> Result<Vec<FunctionReturn>, ExecutionError> {
        let mut returns = Vec::with_capacity(calls.len());
        for call in calls {
            let result = select! {
                biased;

                _ = cancel.cancelled() => {
                    return Err(ExecutionError::Cancelled);
                }
                result = call.invoke() => result,
            };
            match result {
                Ok(ret) => returns.push(ret),
                Err(error) => {
                    warn!("function `{}` failed: {error}", call.name());
                    return Err(FunctionThrow { call, error }.into());
                }
            }
        }
        Ok(returns)
    }
}

/// Executes `calls` concurrently and returns their outputs in the order of
/// `calls`.
///
/// Every call runs to a terminal state even if some of them fail, then all
/// failures are reported together. When `cancel` is triggered, the running
/// calls are signalled through child tokens and the whole batch reports
/// [`ExecutionError::Cancelled`], partial results are discarded.
pub async fn execute_parallel_function_calls(
    calls: Vec<FunctionCall>,
    cancel: CancellationToken,
) -> Result<Vec<FunctionReturn>, ExecutionError> {
    if calls.is_empty() {
        return Ok(vec![]);
    }

    let span = debug_span!("parallel executor", calls = calls.len());
    async move {
        let mut join_set = JoinSet::new();
        let mut positions = HashMap::with_capacity(calls.len());
        for (idx, call) in calls.iter().enumerate() {
            let child = cancel.child_token();
            let call = call.clone();
            trace!("spawning a call ({}) to `{}`", call.id(), call.name());
            // The function may do work before returning its future, so
            // invoke it inside the task where panics are caught.
            let handle = join_set.spawn(async move {
                select! {
                    biased;

                    _ = child.cancelled() => None,
                    result = call.invoke() => Some(result),
                }
            });
            positions.insert(handle.id(), idx);
        }

        let mut slots: Vec<Option<Result<FunctionReturn, FunctionError>>> =
            (0..calls.len()).map(|_| None).collect();
        let mut cancelled = false;
        while let Some(joined) = join_set.join_next_with_id().await {
            let (task_id, outcome) = match joined {
                Ok((task_id, outcome)) => (task_id, outcome),
                Err(err) if err.is_panic() => {
                    error!("a function call panicked");
                    (err.id(), Some(Err(FunctionError::panicked())))
                }
                Err(err) => (err.id(), None),
            };
            let Some(&idx) = positions.get(&task_id) else {
                continue;
            };
            match outcome {
                Some(result) => slots[idx] = Some(result),
                None => cancelled = true,
            }
        }

        if cancelled || cancel.is_cancelled() {
            warn!("cancelled, discarding partial results");
            return Err(ExecutionError::Cancelled);
        }

        let mut returns = Vec::with_capacity(calls.len());
        let mut throws = vec![];
        for (call, slot) in calls.into_iter().zip(slots) {
            match slot {
                Some(Ok(ret)) => returns.push(ret),
                Some(Err(error)) => throws.push(FunctionThrow { call, error }),
                None => return Err(ExecutionError::Cancelled),
            }
        }
        if !throws.is_empty() {
            debug!("{} of the calls failed", throws.len());
            return Err(AggregatedFunctionCallError::new(throws).into());
        }
        Ok(returns)
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde::Deserialize;
    use serde_json::{Map, Value, json};
    use tokio::time::{sleep, timeout};

    use super::*;
    use crate::function::{ErrorKind, Function, FunctionHandle};

    static EMPTY_SCHEMA: &Value = &Value::Null;

    #[derive(Deserialize)]
    struct EchoInput {
        text: String,
        delay_ms: u64,
        #[serde(default)]
        fail: bool,
        #[serde(default)]
        panic: bool,
        #[serde(default)]
        panic_on_call: bool,
    }

    /// Echoes `text` after `delay_ms`, counting the calls that finished and
    /// the ones that observed a drop.
    #[derive(Clone, Default)]
    struct Echo {
        finished: Arc<AtomicUsize>,
        dropped: Arc<AtomicUsize>,
    }

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Function for Echo {
        type Input = EchoInput;
        type Output = String;

        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes the text"
        }

        fn parameter_schema(&self) -> &Value {
            EMPTY_SCHEMA
        }

        fn execute(
            &self,
            input: EchoInput,
        ) -> impl Future<Output = Result<String, FunctionError>> + Send + 'static
        {
            if input.panic_on_call {
                panic!("echo refused the call");
            }
            let finished = Arc::clone(&self.finished);
            let dropped = DropCounter(Arc::clone(&self.dropped));
            async move {
                let _dropped = dropped;
                sleep(Duration::from_millis(input.delay_ms)).await;
                if input.panic {
                    panic!("echo panicked");
                }
                finished.fetch_add(1, Ordering::SeqCst);
                if input.fail {
                    return Err(FunctionError::execution_error()
                        .with_reason(format!("cannot echo {}", input.text)));
                }
                Ok(input.text)
            }
        }
    }

    fn call(echo: &Echo, id: &str, arguments: Value) -> FunctionCall {
        let arguments: Map<String, Value> =
            arguments.as_object().cloned().unwrap();
        FunctionCall::new(id, FunctionHandle::new(echo.clone()), arguments)
    }

    #[tokio::test]
    async fn test_empty_calls() {
        let returns =
            execute_parallel_function_calls(vec![], CancellationToken::new())
                .await
                .unwrap();
        assert!(returns.is_empty());
    }

    #[tokio::test]
    async fn test_preserves_input_order() {
        let echo = Echo::default();
        let calls = vec![
            call(&echo, "c:0", json!({ "text": "slow", "delay_ms": 60 })),
            call(&echo, "c:1", json!({ "text": "fast", "delay_ms": 1 })),
            call(&echo, "c:2", json!({ "text": "medium", "delay_ms": 20 })),
        ];

        let returns = timeout(
            Duration::from_secs(2),
            execute_parallel_function_calls(calls, CancellationToken::new()),
        )
        .await
        .unwrap()
        .unwrap();

        let ids: Vec<_> = returns.iter().map(|ret| ret.id.as_str()).collect();
        assert_eq!(ids, ["c:0", "c:1", "c:2"]);
        let contents: Vec<_> =
            returns.iter().map(|ret| ret.content.as_str()).collect();
        assert_eq!(contents, ["\"slow\"", "\"fast\"", "\"medium\""]);
    }

    #[tokio::test]
    async fn test_aggregates_every_failure() {
        let echo = Echo::default();
        let calls = vec![
            call(&echo, "c:0", json!({ "text": "a", "delay_ms": 1, "fail": true })),
            call(&echo, "c:1", json!({ "text": "b", "delay_ms": 1 })),
            call(&echo, "c:2", json!({ "text": "c", "delay_ms": 30, "fail": true })),
            call(&echo, "c:3", json!({ "text": "d", "delay_ms": 50 })),
        ];

        let err = execute_parallel_function_calls(calls, CancellationToken::new())
            .await
            .unwrap_err();
        let ExecutionError::Aggregated(err) = err else {
            panic!("unexpected error: {err:?}");
        };

        let throws = err.throws();
        assert_eq!(throws.len(), 2);
        assert_eq!(throws[0].call.id(), "c:0");
        assert_eq!(throws[0].call.arguments()["text"], "a");
        assert_eq!(throws[1].call.id(), "c:2");
        assert_eq!(throws[1].call.arguments()["text"], "c");
        assert_eq!(throws[1].error.kind(), ErrorKind::ExecutionError);
        // Siblings are not cut short by the first failure.
        assert_eq!(echo.finished.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_panic_marks_only_that_call() {
        let echo = Echo::default();
        let calls = vec![
            call(&echo, "c:0", json!({ "text": "a", "delay_ms": 1, "panic": true })),
            call(&echo, "c:1", json!({ "text": "b", "delay_ms": 20 })),
        ];

        let err = execute_parallel_function_calls(calls, CancellationToken::new())
            .await
            .unwrap_err();
        let ExecutionError::Aggregated(err) = err else {
            panic!("unexpected error: {err:?}");
        };
        assert_eq!(err.throws().len(), 1);
        assert_eq!(err.throws()[0].error.kind(), ErrorKind::Panicked);
        assert_eq!(echo.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panic_before_future_marks_only_that_call() {
        let echo = Echo::default();
        let calls = vec![
            call(&echo, "c:0", json!({ "text": "a", "delay_ms": 10 })),
            call(&echo, "c:1", json!({ "text": "b", "delay_ms": 1, "panic_on_call": true })),
            call(&echo, "c:2", json!({ "text": "c", "delay_ms": 20 })),
        ];

        let err = execute_parallel_function_calls(calls, CancellationToken::new())
            .await
            .unwrap_err();
        let ExecutionError::Aggregated(err) = err else {
            panic!("unexpected error: {err:?}");
        };
        assert_eq!(err.throws().len(), 1);
        assert_eq!(err.throws()[0].call.id(), "c:1");
        assert_eq!(err.throws()[0].error.kind(), ErrorKind::Panicked);
        assert_eq!(echo.finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalid_arguments_fail_the_call() {
        let echo = Echo::default();
        let calls = vec![call(&echo, "c:0", json!({ "text": 42 }))];

        let err = execute_parallel_function_calls(calls, CancellationToken::new())
            .await
            .unwrap_err();
        let ExecutionError::Aggregated(err) = err else {
            panic!("unexpected error: {err:?}");
        };
        assert_eq!(err.throws()[0].error.kind(), ErrorKind::InvalidArguments);
    }

    #[tokio::test]
    async fn test_cancellation_reaches_every_call() {
        let echo = Echo::default();
        let calls = vec![
            call(&echo, "c:0", json!({ "text": "a", "delay_ms": 5_000 })),
            call(&echo, "c:1", json!({ "text": "b", "delay_ms": 5_000 })),
            call(&echo, "c:2", json!({ "text": "c", "delay_ms": 1 })),
        ];

        let cancel = CancellationToken::new();
        let task = tokio::spawn(execute_parallel_function_calls(
            calls,
            cancel.clone(),
        ));
        sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        let result = timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ExecutionError::Cancelled)));
        assert_eq!(echo.finished.load(Ordering::SeqCst), 1);
        assert_eq!(echo.dropped.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_sequential_stops_at_first_failure() {
        let echo = Echo::default();
        let calls = vec![
            call(&echo, "c:0", json!({ "text": "a", "delay_ms": 1 })),
            call(&echo, "c:1", json!({ "text": "b", "delay_ms": 1, "fail": true })),
            call(&echo, "c:2", json!({ "text": "c", "delay_ms": 1 })),
        ];

        let err = SequentialExecutor
            .execute_function_calls(calls, CancellationToken::new())
            .await
            .unwrap_err();
        let ExecutionError::Function(throw) = err else {
            panic!("unexpected error: {err:?}");
        };
        assert_eq!(throw.call.id(), "c:1");
        assert_eq!(echo.finished.load(Ordering::SeqCst), 2);
    }
}
