//! Report processor
//!
//! Adapter between the diagnostic-report sink shape command handlers expect
//! and the scheduler's message queue. Each report is forwarded immediately
//! as a `TaskReport` message tagged with the task ident; nothing is buffered
//! or filtered.

use clusterd_ipc::{Report, TaskMessage, TaskPayload};

use crate::executor::MessageSink;

/// Sink shape handed to command handlers for diagnostics
pub trait ReportProcessor {
    fn report(&mut self, report: Report);
}

/// Report processor bound to one task, forwarding into the message queue
pub struct WorkerReportProcessor<'a> {
    sink: &'a mut dyn MessageSink,
    task_ident: String,
}

impl<'a> WorkerReportProcessor<'a> {
    pub fn new(sink: &'a mut dyn MessageSink, task_ident: impl Into<String>) -> Self {
        Self {
            sink,
            task_ident: task_ident.into(),
        }
    }
}

impl ReportProcessor for WorkerReportProcessor<'_> {
    fn report(&mut self, report: Report) {
        let message = TaskMessage::new(self.task_ident.clone(), TaskPayload::TaskReport { report });
        if let Err(err) = self.sink.send(message) {
            // The handler keeps running; a lost report must not fail the task.
            tracing::warn!(task_ident = %self.task_ident, %err, "failed to forward report");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clusterd_ipc::{IpcError, ReportSeverity};
    use serde_json::json;

    #[derive(Default)]
    struct VecSink(Vec<TaskMessage>);

    impl MessageSink for VecSink {
        fn send(&mut self, message: TaskMessage) -> Result<(), IpcError> {
            self.0.push(message);
            Ok(())
        }
    }

    #[test]
    fn reports_are_forwarded_with_ident() {
        let mut sink = VecSink::default();
        let mut processor = WorkerReportProcessor::new(&mut sink, "id7");

        processor.report(Report::new(
            ReportSeverity::Info,
            "NODE_STARTED",
            json!({"node": "beta"}),
        ));
        processor.report(Report::error("NODE_UNREACHABLE", json!({"node": "gamma"})));

        assert_eq!(sink.0.len(), 2);
        assert_eq!(sink.0[0].task_ident, "id7");
        match &sink.0[1].payload {
            TaskPayload::TaskReport { report } => {
                assert_eq!(report.code, "NODE_UNREACHABLE");
                assert_eq!(report.severity, ReportSeverity::Error);
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }
}
