//! Function call supports.

mod error;
mod object;
mod registry;

use std::fmt::{self, Debug};
use std::sync::Arc;

use converse_model::FunctionDefinition;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub use error::{Error, ErrorKind};
use object::{FunctionObject, FunctionObjectImpl};
pub(crate) use registry::Registry;

/// A function that can be called by the model.
///
/// Implementations of this trait should be stateless, and may not maintain
/// any internal state.
///
/// The function can be context-aware, meaning it can access additional
/// information about the current execution context, such as the working
/// directory. To do this, make the context an immutable state of the
/// function, which can be set during initialization, and copy it when
/// executing.
pub trait Function: Send + Sync + 'static {
    /// The type of input that the function accepts.
    ///
    /// Arguments from the model are decoded into this type before the
    /// function is executed, so a successful decoding is the validation
    /// of the arguments against [`parameter_schema`](Self::parameter_schema).
    type Input: DeserializeOwned;

    /// The type of output, serialized to JSON before being handed back to
    /// the model.
    type Output: Serialize;

    /// Returns the name of the function.
    fn name(&self) -> &str;

    /// Returns the description of the function.
    fn description(&self) -> &str;

    /// Returns the parameter schema of the function.
    fn parameter_schema(&self) -> &Value;

    /// Executes the function with the given input.
    ///
    /// This method must return a future that is fully independent of `self`,
    /// and the future should be cancellation safe.
    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = Result<Self::Output, Error>> + Send + 'static;
}

/// A registered function with its type erased.
#[derive(Clone)]
pub struct FunctionHandle(Arc<dyn FunctionObject>);

impl FunctionHandle {
    /// Wraps a function.
    #[inline]
    pub fn new<F: Function>(function: F) -> Self {
        Self(Arc::new(FunctionObjectImpl(function)))
    }

    /// Returns the name of the function.
    #[inline]
    pub fn name(&self) -> &str {
        self.0.name()
    }

    /// Returns the description of the function.
    #[inline]
    pub fn description(&self) -> &str {
        self.0.description()
    }

    /// Returns the parameter schema of the function.
    #[inline]
    pub fn parameter_schema(&self) -> &Value {
        self.0.parameter_schema()
    }

    /// Returns the definition advertised to the model.
    pub fn definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: self.name().to_owned(),
            description: self.description().to_owned(),
            parameters: self.parameter_schema().clone(),
        }
    }

    /// Decodes `arguments` and invokes the function, returning its
    /// serialized output.
    #[inline]
    pub fn invoke(
        &self,
        arguments: Map<String, Value>,
    ) -> impl Future<Output = Result<String, Error>> + Send + 'static {
        self.0.invoke(arguments)
    }
}

impl Debug for FunctionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionHandle")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

/// A function call requested by the model, bound to the function that
/// will serve it.
#[derive(Clone, Debug)]
pub struct FunctionCall {
    id: String,
    function: FunctionHandle,
    arguments: Map<String, Value>,
}

impl FunctionCall {
    /// Creates a function call.
    #[inline]
    pub fn new<S: Into<String>>(
        id: S,
        function: FunctionHandle,
        arguments: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            function,
            arguments,
        }
    }

    /// Returns the identifier the model assigned to this call.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the function to call.
    #[inline]
    pub fn function(&self) -> &FunctionHandle {
        &self.function
    }

    /// Returns the name of the function to call.
    #[inline]
    pub fn name(&self) -> &str {
        self.function.name()
    }

    /// Returns the arguments from the model.
    #[inline]
    pub fn arguments(&self) -> &Map<String, Value> {
        &self.arguments
    }

    /// Invokes the function with this call's arguments.
    ///
    /// The returned future doesn't borrow `self`, so it can be spawned.
    pub fn invoke(
        &self,
    ) -> impl Future<Output = Result<FunctionReturn, Error>> + Send + 'static
    {
        let id = self.id.clone();
        let name = self.name().to_owned();
        let fut = self.function.invoke(self.arguments.clone());
        async move {
            let content = fut.await?;
            Ok(FunctionReturn { id, name, content })
        }
    }
}

/// The output of a successful function call.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct FunctionReturn {
    /// The identifier of the call this return answers.
    pub id: String,
    /// Name of the function.
    pub name: String,
    /// The serialized output.
    pub content: String,
}

/// A failed function call.
#[derive(Clone, Debug, thiserror::Error)]
#[error("function `{}` failed: {error}", .call.name())]
pub struct FunctionThrow {
    /// The call that failed, with its original arguments.
    pub call: FunctionCall,
    /// Why it failed.
    #[source]
    pub error: Error,
}

/// The failures of a batch of function calls.
///
/// Throws are kept in the order of the calls that produced them.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{} function call(s) failed: {}", .throws.len(), summarize(.throws))]
pub struct AggregatedFunctionCallError {
    throws: Vec<FunctionThrow>,
}

impl AggregatedFunctionCallError {
    /// Creates an aggregated error from a non-empty list of throws.
    #[inline]
    pub fn new(throws: Vec<FunctionThrow>) -> Self {
        debug_assert!(!throws.is_empty());
        Self { throws }
    }

    /// Returns every failure.
    #[inline]
    pub fn throws(&self) -> &[FunctionThrow] {
        &self.throws
    }

    /// Takes the failures out.
    #[inline]
    pub fn into_throws(self) -> Vec<FunctionThrow> {
        self.throws
    }
}

fn summarize(throws: &[FunctionThrow]) -> String {
    throws
        .iter()
        .map(|throw| format!("{} ({})", throw.call.name(), throw.error.reason()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use std::future::ready;

    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    static EMPTY_SCHEMA: &Value = &Value::Null;

    #[derive(Deserialize)]
    struct AddInput {
        a: i64,
        b: i64,
    }

    struct Add;

    impl Function for Add {
        type Input = AddInput;
        type Output = i64;

        fn name(&self) -> &str {
            "add"
        }

        fn description(&self) -> &str {
            "Adds two numbers"
        }

        fn parameter_schema(&self) -> &Value {
            EMPTY_SCHEMA
        }

        fn execute(
            &self,
            input: AddInput,
        ) -> impl Future<Output = Result<i64, Error>> + Send + 'static {
            ready(Ok(input.a + input.b))
        }
    }

    fn arguments(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_invoke() {
        let call = FunctionCall::new(
            "call:1",
            FunctionHandle::new(Add),
            arguments(json!({ "a": 1, "b": 2 })),
        );
        let ret = call.invoke().await.unwrap();
        assert_eq!(ret.id, "call:1");
        assert_eq!(ret.name, "add");
        assert_eq!(ret.content, "3");
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let handle = FunctionHandle::new(Add);
        let err = handle
            .invoke(arguments(json!({ "a": "one" })))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArguments);
    }

    #[test]
    fn test_aggregated_display() {
        let call = FunctionCall::new(
            "call:1",
            FunctionHandle::new(Add),
            arguments(json!({})),
        );
        let err = AggregatedFunctionCallError::new(vec![FunctionThrow {
            call,
            error: Error::execution_error().with_reason("overflow"),
        }]);
        assert_eq!(
            err.to_string(),
            "1 function call(s) failed: add (overflow)"
        );
    }
}
