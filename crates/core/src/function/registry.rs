use std::collections::HashMap;

use converse_model::{FunctionCallRequest, FunctionDefinition};

use super::{FunctionCall, FunctionHandle};

/// Functions available to a session, kept in registration order.
#[derive(Clone, Default)]
pub(crate) struct Registry {
    functions: Vec<FunctionHandle>,
    index: HashMap<String, usize>,
}

impl Registry {
    pub fn with_functions(functions: Vec<FunctionHandle>) -> Self {
        let mut registry = Self::default();
        for function in functions {
            registry.insert(function);
        }
        registry
    }

    /// Registers a function, replacing the one with the same name.
    pub fn insert(&mut self, function: FunctionHandle) {
        let name = function.name().to_owned();
        if let Some(&idx) = self.index.get(&name) {
            warn!("function `{name}` is registered twice, replacing");
            self.functions[idx] = function;
            return;
        }
        self.index.insert(name, self.functions.len());
        self.functions.push(function);
    }

    #[inline]
    pub fn definitions(&self) -> Vec<FunctionDefinition> {
        self.functions.iter().map(FunctionHandle::definition).collect()
    }

    /// Binds the requests to registered functions, failing with the name of
    /// the first function that doesn't exist.
    pub fn resolve(
        &self,
        requests: Vec<FunctionCallRequest>,
    ) -> Result<Vec<FunctionCall>, String> {
        let span = debug_span!("function registry");
        let _enter = span.enter();

        requests
            .into_iter()
            .map(|req| {
                let Some(&idx) = self.index.get(&req.name) else {
                    warn!("function not found: {}", req.name);
                    return Err(req.name);
                };
                trace!("binding a call ({}) with args: {:?}", req.id, req.arguments);
                let function = self.functions[idx].clone();
                Ok(FunctionCall::new(req.id, function, req.arguments))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::future::ready;

    use serde_json::{Value, json};

    use super::*;
    use crate::function::{Error, Function};

    static EMPTY_SCHEMA: &Value = &Value::Null;

    struct TestFunction(&'static str);

    impl Function for TestFunction {
        type Input = Value;
        type Output = String;

        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "A test function"
        }

        fn parameter_schema(&self) -> &Value {
            EMPTY_SCHEMA
        }

        fn execute(
            &self,
            _input: Self::Input,
        ) -> impl Future<Output = Result<String, Error>> + Send + 'static {
            ready(Ok("success".to_owned()))
        }
    }

    fn request(id: &str, name: &str) -> FunctionCallRequest {
        FunctionCallRequest {
            id: id.to_owned(),
            name: name.to_owned(),
            arguments: json!({ "x": 1 }).as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn test_resolve() {
        let registry = Registry::with_functions(vec![
            FunctionHandle::new(TestFunction("first")),
            FunctionHandle::new(TestFunction("second")),
        ]);

        let names: Vec<_> = registry
            .definitions()
            .into_iter()
            .map(|definition| definition.name)
            .collect();
        assert_eq!(names, ["first", "second"]);

        let calls = registry
            .resolve(vec![request("call:1", "second"), request("call:2", "first")])
            .unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id(), "call:1");
        assert_eq!(calls[0].name(), "second");
        assert_eq!(calls[1].arguments()["x"], 1);

        // Test with non-existent function.
        let err = registry
            .resolve(vec![request("call:1", "first"), request("call:2", "read")])
            .err();
        assert_eq!(err.as_deref(), Some("read"));
    }

    #[test]
    fn test_replace_duplicate() {
        let mut registry = Registry::default();
        registry.insert(FunctionHandle::new(TestFunction("first")));
        registry.insert(FunctionHandle::new(TestFunction("second")));
        registry.insert(FunctionHandle::new(TestFunction("first")));
        assert_eq!(registry.definitions().len(), 2);
        assert_eq!(registry.definitions()[0].name, "first");
    }
}
