use std::pin::Pin;

use serde_json::{Map, Value};
use tracing::Instrument;

use super::{Error, Function};

pub(crate) type InvokeFuture =
    Pin<Box<dyn Future<Output = Result<String, Error>> + Send>>;

pub(crate) trait FunctionObject: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameter_schema(&self) -> &Value;

    fn invoke(&self, arguments: Map<String, Value>) -> InvokeFuture;
}

pub(crate) struct FunctionObjectImpl<F: Function>(pub F);

impl<F: Function> FunctionObject for FunctionObjectImpl<F> {
    #[inline]
    fn name(&self) -> &str {
        self.0.name()
    }

    #[inline]
    fn description(&self) -> &str {
        self.0.description()
    }

    #[inline]
    fn parameter_schema(&self) -> &Value {
        self.0.parameter_schema()
    }

    fn invoke(&self, arguments: Map<String, Value>) -> InvokeFuture {
        let input: F::Input = match serde_json::from_value(Value::Object(arguments)) {
            Ok(input) => input,
            Err(err) => {
                let reason = format!("{err}");
                return Box::pin(std::future::ready(Err(
                    Error::invalid_arguments().with_reason(reason),
                )));
            }
        };

        let fut = self.0.execute(input);
        let span = debug_span!("function execute", name = self.0.name());
        Box::pin(
            async move {
                let output = fut.await?;
                serde_json::to_string(&output).map_err(|err| {
                    Error::execution_error().with_reason(format!(
                        "failed to serialize the output: {err}"
                    ))
                })
            }
            .instrument(span),
        )
    }
}
