//! Task executor
//!
//! Runs exactly one command inside a worker process and maps its outcome to
//! the terminal message the scheduler expects:
//!
//! - handler returns `Ok(v)` → `TaskFinished(Success, v)`
//! - handler returns a [`CommandError`] → `TaskFinished(Fail, None)`
//! - handler panics → `TaskFinished(UnhandledException, None)` plus a log
//!   record on stderr
//! - unknown command name → diagnostic report plus `TaskFinished(Fail, None)`

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde_json::json;

use clusterd_ipc::{
    IpcError, Report, TaskFinishType, TaskMessage, TaskPayload, WorkerCommand,
};

use crate::registry::CommandRegistry;
use crate::report::WorkerReportProcessor;

/// Where the executor pushes its messages
///
/// Inside a worker process this is the stdio transport; tests collect
/// messages in a vector.
pub trait MessageSink {
    fn send(&mut self, message: TaskMessage) -> Result<(), IpcError>;
}

/// Execute one command, emitting `TaskExecuted`, any reports, and exactly
/// one `TaskFinished`.
pub fn execute_command(
    registry: &CommandRegistry,
    sink: &mut dyn MessageSink,
    command: WorkerCommand,
) -> Result<(), IpcError> {
    let task_ident = command.task_ident;
    let name = command.command.name;

    sink.send(TaskMessage::new(
        task_ident.clone(),
        TaskPayload::TaskExecuted {
            worker_pid: std::process::id(),
        },
    ))?;

    let Some(handler) = registry.get(&name) else {
        tracing::error!(task_ident = %task_ident, command = %name, "command not in registry");
        sink.send(TaskMessage::new(
            task_ident.clone(),
            TaskPayload::TaskReport {
                report: Report::error("UNKNOWN_COMMAND", json!({ "command": name })),
            },
        ))?;
        return finish(sink, &task_ident, TaskFinishType::Fail, None);
    };

    tracing::info!(task_ident = %task_ident, command = %name, "executing command");

    let outcome = {
        let mut reports = WorkerReportProcessor::new(&mut *sink, task_ident.clone());
        catch_unwind(AssertUnwindSafe(|| {
            handler.run(&command.command.params, &mut reports)
        }))
    };

    match outcome {
        Ok(Ok(result)) => finish(sink, &task_ident, TaskFinishType::Success, result),
        Ok(Err(err)) => {
            tracing::warn!(task_ident = %task_ident, command = %name, %err, "command failed");
            finish(sink, &task_ident, TaskFinishType::Fail, None)
        }
        Err(panic) => {
            tracing::error!(
                task_ident = %task_ident,
                command = %name,
                panic = %panic_message(panic.as_ref()),
                "command raised an unhandled exception"
            );
            finish(sink, &task_ident, TaskFinishType::UnhandledException, None)
        }
    }
}

fn finish(
    sink: &mut dyn MessageSink,
    task_ident: &str,
    finish_type: TaskFinishType,
    result: Option<serde_json::Value>,
) -> Result<(), IpcError> {
    sink.send(TaskMessage::new(
        task_ident,
        TaskPayload::TaskFinished {
            finish_type,
            result,
        },
    ))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CommandError, CommandParams};
    use crate::report::ReportProcessor;
    use clusterd_ipc::{AuthUser, CommandDto, ReportSeverity};
    use serde_json::Value as JsonValue;

    #[derive(Default)]
    struct VecSink(Vec<TaskMessage>);

    impl MessageSink for VecSink {
        fn send(&mut self, message: TaskMessage) -> Result<(), IpcError> {
            self.0.push(message);
            Ok(())
        }
    }

    fn test_registry() -> CommandRegistry {
        let mut registry = CommandRegistry::new();
        registry.register(
            "success",
            |_: &CommandParams,
             _: &mut dyn ReportProcessor|
             -> Result<Option<JsonValue>, CommandError> {
                Ok(Some(json!("cluster started")))
            },
        );
        registry.register(
            "success_with_reports",
            |_: &CommandParams,
             reports: &mut dyn ReportProcessor|
             -> Result<Option<JsonValue>, CommandError> {
                reports.report(Report::new(
                    ReportSeverity::Info,
                    "RESOURCE_CREATED",
                    json!({"resource": "vip"}),
                ));
                Ok(None)
            },
        );
        registry.register(
            "lib_error",
            |_: &CommandParams,
             _: &mut dyn ReportProcessor|
             -> Result<Option<JsonValue>, CommandError> {
                Err(CommandError::Failed("node offline".to_string()))
            },
        );
        registry.register(
            "unhandled_error",
            |_: &CommandParams, _: &mut dyn ReportProcessor| -> Result<Option<JsonValue>, CommandError> {
                panic!("the handler blew up")
            },
        );
        registry
    }

    fn worker_command(name: &str) -> WorkerCommand {
        WorkerCommand {
            task_ident: "id0".to_string(),
            command: CommandDto::new(name),
            auth_user: AuthUser::new("operator", vec![]),
        }
    }

    fn finish_of(messages: &[TaskMessage]) -> (TaskFinishType, Option<JsonValue>) {
        match &messages.last().unwrap().payload {
            TaskPayload::TaskFinished {
                finish_type,
                result,
            } => (*finish_type, result.clone()),
            other => panic!("last message is not TaskFinished: {:?}", other),
        }
    }

    #[test]
    fn executed_is_emitted_before_the_handler_runs() {
        let registry = test_registry();
        let mut sink = VecSink::default();
        execute_command(&registry, &mut sink, worker_command("success")).unwrap();

        match &sink.0[0].payload {
            TaskPayload::TaskExecuted { worker_pid } => {
                assert_eq!(*worker_pid, std::process::id());
            }
            other => panic!("first message is not TaskExecuted: {:?}", other),
        }
    }

    #[test]
    fn successful_command_reports_its_result() {
        let registry = test_registry();
        let mut sink = VecSink::default();
        execute_command(&registry, &mut sink, worker_command("success")).unwrap();

        assert_eq!(sink.0.len(), 2);
        let (finish_type, result) = finish_of(&sink.0);
        assert_eq!(finish_type, TaskFinishType::Success);
        assert_eq!(result, Some(json!("cluster started")));
    }

    #[test]
    fn reports_flow_between_executed_and_finished() {
        let registry = test_registry();
        let mut sink = VecSink::default();
        execute_command(&registry, &mut sink, worker_command("success_with_reports")).unwrap();

        assert_eq!(sink.0.len(), 3);
        assert!(matches!(
            sink.0[1].payload,
            TaskPayload::TaskReport { .. }
        ));
        let (finish_type, result) = finish_of(&sink.0);
        assert_eq!(finish_type, TaskFinishType::Success);
        assert_eq!(result, None);
    }

    #[test]
    fn declared_errors_finish_as_fail() {
        let registry = test_registry();
        let mut sink = VecSink::default();
        execute_command(&registry, &mut sink, worker_command("lib_error")).unwrap();

        assert_eq!(sink.0.len(), 2);
        let (finish_type, result) = finish_of(&sink.0);
        assert_eq!(finish_type, TaskFinishType::Fail);
        assert_eq!(result, None);
    }

    #[test]
    fn panics_finish_as_unhandled_exception() {
        let registry = test_registry();
        let mut sink = VecSink::default();
        execute_command(&registry, &mut sink, worker_command("unhandled_error")).unwrap();

        let (finish_type, result) = finish_of(&sink.0);
        assert_eq!(finish_type, TaskFinishType::UnhandledException);
        assert_eq!(result, None);
    }

    #[test]
    fn unknown_command_fails_with_a_report() {
        let registry = test_registry();
        let mut sink = VecSink::default();
        execute_command(&registry, &mut sink, worker_command("no_such_command")).unwrap();

        assert_eq!(sink.0.len(), 3);
        match &sink.0[1].payload {
            TaskPayload::TaskReport { report } => {
                assert_eq!(report.code, "UNKNOWN_COMMAND");
                assert_eq!(report.severity, ReportSeverity::Error);
            }
            other => panic!("expected a report, got {:?}", other),
        }
        let (finish_type, _) = finish_of(&sink.0);
        assert_eq!(finish_type, TaskFinishType::Fail);
    }
}
