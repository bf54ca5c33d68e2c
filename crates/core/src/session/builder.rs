use std::sync::Arc;

use converse_model::{CompletionOptions, ModelProvider};

use super::AgentSession;
use crate::config::SessionConfig;
use crate::executor::{FunctionCallDelegate, ParallelExecutor};
use crate::function::{Function, FunctionHandle};
use crate::model_client::ModelClient;
use crate::prompt::Prompt;

/// [`AgentSession`] builder.
pub struct AgentSessionBuilder {
    pub(super) model_client: ModelClient,
    pub(super) functions: Vec<FunctionHandle>,
    pub(super) delegate: Arc<dyn FunctionCallDelegate>,
    pub(super) system_prompt: Option<Prompt>,
    pub(super) config: SessionConfig,
}

impl AgentSessionBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            functions: vec![],
            delegate: Arc::new(ParallelExecutor),
            system_prompt: None,
            config: SessionConfig::default(),
        }
    }

    /// Sets the system prompt, which opens every conversation.
    #[inline]
    pub fn with_system_prompt<P: Into<Prompt>>(mut self, prompt: P) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Registers a function.
    ///
    /// A function registered under a name that is already taken replaces
    /// the previous one.
    #[inline]
    pub fn with_function<F: Function>(mut self, function: F) -> Self {
        self.functions.push(FunctionHandle::new(function));
        self
    }

    /// Registers a function that is already type-erased.
    #[inline]
    pub fn with_function_handle(mut self, function: FunctionHandle) -> Self {
        self.functions.push(function);
        self
    }

    /// Replaces the strategy used to execute function calls.
    ///
    /// Calls are executed in parallel by default.
    #[inline]
    pub fn with_delegate<D: FunctionCallDelegate>(mut self, delegate: D) -> Self {
        self.delegate = Arc::new(delegate);
        self
    }

    /// Replaces the whole configuration.
    #[inline]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets how many rounds of function calls a turn may run.
    #[inline]
    pub fn with_max_function_call_iterations(mut self, max: usize) -> Self {
        self.config.max_function_call_iterations = max;
        self
    }

    /// Sets the options sent with every completion.
    #[inline]
    pub fn with_completion_options(mut self, options: CompletionOptions) -> Self {
        self.config.options = options;
        self
    }

    /// Builds the session.
    #[inline]
    pub fn build(self) -> AgentSession {
        AgentSession::from_builder(self)
    }
}
