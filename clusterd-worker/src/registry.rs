//! Command registry
//!
//! The dispatch table from command names to handlers is built once at
//! startup. The scheduler checks submissions against the same table, so an
//! unknown name is rejected before a task is ever created.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use crate::report::ReportProcessor;

/// Parameter mapping passed to command handlers
pub type CommandParams = Map<String, JsonValue>;

/// The declared failure of a command handler
///
/// Handlers return this for expected error conditions; the executor maps it
/// to a `Fail` finish. Panics are treated as unhandled exceptions instead.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("invalid command parameters: {0}")]
    InvalidParams(String),

    #[error("{0}")]
    Failed(String),
}

/// A callable command implementation
pub trait CommandHandler: Send + Sync {
    fn run(
        &self,
        params: &CommandParams,
        reports: &mut dyn ReportProcessor,
    ) -> Result<Option<JsonValue>, CommandError>;
}

impl<F> CommandHandler for F
where
    F: Fn(&CommandParams, &mut dyn ReportProcessor) -> Result<Option<JsonValue>, CommandError>
        + Send
        + Sync,
{
    fn run(
        &self,
        params: &CommandParams,
        reports: &mut dyn ReportProcessor,
    ) -> Result<Option<JsonValue>, CommandError> {
        self(params, reports)
    }
}

/// Dispatch table from command name to handler
#[derive(Default)]
pub struct CommandRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under a command name, replacing any previous one
    pub fn register<H>(&mut self, name: impl Into<String>, handler: H)
    where
        H: CommandHandler + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Registry with the commands every clusterd build ships
///
/// Daemon builds extend this with their administrative command set.
pub fn builtin_registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    registry.register(
        "daemon.ping",
        |_params: &CommandParams,
         _reports: &mut dyn ReportProcessor|
         -> Result<Option<JsonValue>, CommandError> {
            Ok(Some(JsonValue::String("alive".to_string())))
        },
    );
    registry.register(
        "daemon.echo",
        |params: &CommandParams,
         _reports: &mut dyn ReportProcessor|
         -> Result<Option<JsonValue>, CommandError> {
            Ok(Some(JsonValue::Object(params.clone())))
        },
    );
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NoopReports;

    impl ReportProcessor for NoopReports {
        fn report(&mut self, _report: clusterd_ipc::Report) {}
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = CommandRegistry::new();
        assert!(registry.is_empty());

        registry.register(
            "cluster.status",
            |_: &CommandParams,
             _: &mut dyn ReportProcessor|
             -> Result<Option<JsonValue>, CommandError> { Ok(None) },
        );

        assert!(registry.contains("cluster.status"));
        assert!(!registry.contains("cluster.stop"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn builtin_commands_answer() {
        let registry = builtin_registry();
        let handler = registry.get("daemon.ping").unwrap();
        let result = handler.run(&CommandParams::new(), &mut NoopReports).unwrap();
        assert_eq!(result, Some(json!("alive")));
    }

    #[test]
    fn echo_returns_params() {
        let registry = builtin_registry();
        let handler = registry.get("daemon.echo").unwrap();

        let mut params = CommandParams::new();
        params.insert("node".to_string(), json!("alpha"));
        let result = handler.run(&params, &mut NoopReports).unwrap();
        assert_eq!(result, Some(json!({"node": "alpha"})));
    }
}
