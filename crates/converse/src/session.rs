use converse_core::{
    AgentSession, AgentSessionBuilder, FunctionCallDelegate, Prompt,
    SessionConfig,
};
use converse_model::ModelProvider;

use crate::functions::{GlobFunction, ReadFileFunction};

/// A session builder that registers the built-in functions.
///
/// See [`AgentSession`].
pub struct SessionBuilder {
    session_builder: AgentSessionBuilder,
    builtin_functions: bool,
}

impl SessionBuilder {
    /// Creates a session builder with a specified model provider.
    pub fn with_model_provider<M: ModelProvider + 'static>(
        provider: M,
    ) -> Self {
        let session_builder = AgentSessionBuilder::with_model_provider(provider);
        Self {
            session_builder,
            builtin_functions: true,
        }
    }

    /// Sets the system prompt for the session.
    #[inline]
    pub fn with_system_prompt<P: Into<Prompt>>(mut self, prompt: P) -> Self {
        self.session_builder = self.session_builder.with_system_prompt(prompt);
        self
    }

    /// Sets the session configuration.
    #[inline]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.session_builder = self.session_builder.with_config(config);
        self
    }

    /// Replaces the strategy used to execute function calls.
    #[inline]
    pub fn with_delegate<D: FunctionCallDelegate>(mut self, delegate: D) -> Self {
        self.session_builder = self.session_builder.with_delegate(delegate);
        self
    }

    /// Leaves out `read_file` and `glob`.
    #[inline]
    pub fn without_builtin_functions(mut self) -> Self {
        self.builtin_functions = false;
        self
    }

    /// Builds a new session.
    pub fn build(self) -> AgentSession {
        let mut session_builder = self.session_builder;
        if self.builtin_functions {
            session_builder = session_builder
                .with_function(ReadFileFunction::new())
                .with_function(GlobFunction::new());
        }
        session_builder.build()
    }
}

#[cfg(test)]
mod tests {
    use converse_test_model::{PresetResponse, TestModelProvider};

    use super::*;

    #[tokio::test]
    async fn test_builtin_functions_are_advertised() {
        let provider = TestModelProvider::with_responses([
            PresetResponse::with_text("Hello."),
            PresetResponse::with_text("Hello."),
        ]);

        let session = SessionBuilder::with_model_provider(provider.clone()).build();
        session.respond("Hi").await.unwrap();
        let names: Vec<_> = provider.requests()[0]
            .functions
            .iter()
            .map(|definition| definition.name.clone())
            .collect();
        assert_eq!(names, ["read_file", "glob"]);

        let session = SessionBuilder::with_model_provider(provider.clone())
            .without_builtin_functions()
            .build();
        session.respond("Hi").await.unwrap();
        assert!(provider.requests()[1].functions.is_empty());
    }
}
