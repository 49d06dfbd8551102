//! Terminal rendering of streamed replies and their steps

use std::collections::HashMap;
use std::io::{self, Write};

use stepwise_session::{
    SessionEvent, SessionHandle, SessionMessage, SessionOutcome, SessionSnapshot, Step,
};
use stepwise_wire::StepStatus;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};

use crate::utils::{indent, truncate_chars};

const RESULT_PREVIEW_CHARS: usize = 400;

/// Icon shown in front of a step title
pub fn status_icon(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Processing => "…",
        StepStatus::Completed => "✓",
        StepStatus::Error => "✗",
    }
}

/// One-line summary of a step, e.g. `✓ Tool selection: picked convert_units`
pub fn step_line(step: &Step) -> String {
    let mut line = format!("{} {}", status_icon(step.status), step.title());
    if let Some(description) = step.description.as_deref().filter(|d| !d.is_empty()) {
        line.push_str(": ");
        line.push_str(description);
    }
    line
}

/// Render the final step list, one expanded block per step
pub fn render_steps(steps: &[Step]) -> String {
    if steps.is_empty() {
        return String::new();
    }

    let mut out = format!("Processing steps ({})\n", steps.len());
    for step in steps {
        out.push_str(&indent(&step_line(step), 2));
        out.push('\n');

        if let Some(tool) = &step.tool_name {
            out.push_str(&format!("      tool: {}\n", tool));
        }
        if let Some(args) = step.args.as_ref().filter(|a| !a.is_empty()) {
            let params = serde_json::to_string(args).unwrap_or_default();
            out.push_str(&format!("      params: {}\n", params));
        }
        if let Some(result) = &step.tool_result {
            let preview = truncate_chars(result, RESULT_PREVIEW_CHARS);
            out.push_str("      result:\n");
            out.push_str(&indent(&preview, 8));
            out.push('\n');
        }
    }
    out
}

/// Turns session snapshots into terminal output.
///
/// Only what changed since the last snapshot is printed: new reply text,
/// and steps whose status moved. Snapshots are fully merged, so skipping
/// some of them loses nothing.
pub struct StreamPrinter {
    show_steps: bool,
    /// Bytes of the current reply already printed
    printed: usize,
    rewrites: u32,
    line_open: bool,
    seen: HashMap<i64, StepStatus>,
}

impl StreamPrinter {
    pub fn new(show_steps: bool) -> Self {
        Self {
            show_steps,
            printed: 0,
            rewrites: 0,
            line_open: false,
            seen: HashMap::new(),
        }
    }

    /// Diff a snapshot against what is already on screen
    pub fn update(&mut self, snapshot: &SessionSnapshot) -> String {
        let mut out = self.changed_steps(&snapshot.steps);
        out.push_str(&self.new_text(&snapshot.message));
        out
    }

    /// Close off the run; the printer is ready for the next one afterwards
    pub fn finish(&mut self, outcome: &SessionOutcome) -> String {
        let mut out = String::new();
        if self.line_open {
            out.push('\n');
        }
        if *outcome == SessionOutcome::Cancelled {
            out.push_str("[cancelled]\n");
        }

        self.printed = 0;
        self.rewrites = 0;
        self.line_open = false;
        self.seen.clear();
        out
    }

    fn new_text(&mut self, message: &SessionMessage) -> String {
        let content = &message.content;

        let out = if message.rewrites != self.rewrites {
            // The reply was replaced (error or transport failure)
            self.rewrites = message.rewrites;
            if self.line_open {
                format!("\n{}", content)
            } else {
                content.clone()
            }
        } else {
            content.get(self.printed..).unwrap_or_default().to_string()
        };

        self.printed = content.len();
        if !out.is_empty() {
            self.line_open = !out.ends_with('\n');
        }
        out
    }

    fn changed_steps(&mut self, steps: &[Step]) -> String {
        if !self.show_steps {
            return String::new();
        }

        let mut out = String::new();
        for step in steps {
            if self.seen.get(&step.step_id) == Some(&step.status) {
                continue;
            }
            self.seen.insert(step.step_id, step.status);

            if self.line_open {
                out.push('\n');
                self.line_open = false;
            }
            out.push_str(&format!("[{}]\n", step_line(step)));
        }
        out
    }
}

/// Print one run as it streams in, returning once it has finished.
///
/// Events only wake the printer up; what gets printed always comes from the
/// handle's latest snapshot, so a receiver that lagged behind catches up.
pub async fn follow<W: Write>(
    mut receiver: broadcast::Receiver<SessionEvent>,
    handle: SessionHandle,
    mut printer: StreamPrinter,
    mut out: W,
) -> io::Result<W> {
    loop {
        let mut finished = None;
        match receiver.recv().await {
            Ok(event) => note_outcome(event, &mut finished),
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Printer skipped ahead to the latest snapshot");
            }
            Err(RecvError::Closed) => return Ok(out),
        }

        // Everything already queued is covered by the snapshot below
        loop {
            match receiver.try_recv() {
                Ok(event) => note_outcome(event, &mut finished),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }

        out.write_all(printer.update(&handle.snapshot()).as_bytes())?;
        if let Some(outcome) = finished {
            out.write_all(printer.finish(&outcome).as_bytes())?;
            out.flush()?;
            return Ok(out);
        }
        out.flush()?;
    }
}

fn note_outcome(event: SessionEvent, finished: &mut Option<SessionOutcome>) {
    if let SessionEvent::Finished { outcome } = event {
        *finished = Some(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream;
    use std::sync::Arc;
    use stepwise_session::projector::TRANSPORT_FAILURE_MESSAGE;
    use stepwise_session::{Chat, StepRegistry, Transport};
    use stepwise_wire::{DecodedEvent, FragmentStream};
    use tokio_util::sync::CancellationToken;

    fn snapshot(events: &[DecodedEvent]) -> SessionSnapshot {
        SessionSnapshot {
            message: SessionMessage::assistant().fold(events),
            steps: StepRegistry::fold(events).snapshot(),
        }
    }

    fn step(step_id: i64, name: &str, status: StepStatus) -> DecodedEvent {
        DecodedEvent::Step {
            step_id,
            step_name: name.to_string(),
            description: None,
            status,
            tool_name: None,
            args: None,
        }
    }

    fn content(text: &str) -> DecodedEvent {
        DecodedEvent::Content {
            step_id: 0,
            content: text.to_string(),
        }
    }

    /// Serves the whole body as one fragment
    struct OneFragment(String);

    #[async_trait]
    impl Transport for OneFragment {
        async fn open(&self, _query: &str) -> stepwise_session::Result<FragmentStream> {
            let chunks: Vec<stepwise_wire::Result<Vec<u8>>> = vec![Ok(self.0.clone().into_bytes())];
            Ok(Box::pin(stream::iter(chunks)))
        }
    }

    #[test]
    fn test_step_line() {
        let registry = StepRegistry::new().apply(&DecodedEvent::Step {
            step_id: 1,
            step_name: "tool_selection".into(),
            description: Some("picked convert_units".into()),
            status: StepStatus::Completed,
            tool_name: None,
            args: None,
        });
        let line = step_line(registry.get(1).unwrap());
        assert_eq!(line, "✓ Tool selection: picked convert_units");
    }

    #[test]
    fn test_render_steps_shows_tool_details() {
        let mut args = stepwise_wire::Args::new();
        args.insert("value".into(), serde_json::json!(10));
        let registry = StepRegistry::new()
            .apply(&DecodedEvent::Step {
                step_id: 2,
                step_name: "tool_execution".into(),
                description: None,
                status: StepStatus::Processing,
                tool_name: Some("convert_units".into()),
                args: Some(args.clone()),
            })
            .apply(&DecodedEvent::ToolExecution {
                step_id: 2,
                tool_name: "convert_units".into(),
                args,
                result: "6.21 miles".into(),
                status: Some(StepStatus::Completed),
                formatted_result: None,
            });

        let rendered = render_steps(&registry.snapshot());
        assert!(rendered.starts_with("Processing steps (1)\n"));
        assert!(rendered.contains("✓ Tool execution"));
        assert!(rendered.contains("tool: convert_units"));
        assert!(rendered.contains("params: {\"value\":10}"));
        assert!(rendered.contains("        6.21 miles"));
    }

    #[test]
    fn test_render_no_steps() {
        assert_eq!(render_steps(&[]), "");
    }

    #[test]
    fn test_printer_prints_only_new_text() {
        let mut printer = StreamPrinter::new(false);
        let first = content("10 km");
        let second = content(" is 6.21 miles");

        assert_eq!(printer.update(&snapshot(&[first.clone()])), "10 km");
        let both = snapshot(&[first, second]);
        assert_eq!(printer.update(&both), " is 6.21 miles");
        assert_eq!(printer.update(&both), "");
        assert_eq!(printer.finish(&SessionOutcome::Completed), "\n");
    }

    #[test]
    fn test_printer_skipped_snapshots_lose_nothing() {
        let mut printer = StreamPrinter::new(false);
        let events = [content("a"), content("é"), content("c")];
        assert_eq!(printer.update(&snapshot(&events[..1])), "a");
        assert_eq!(printer.update(&snapshot(&events)), "éc");
    }

    #[test]
    fn test_printer_reports_status_changes_once() {
        let mut printer = StreamPrinter::new(true);
        let started = step(1, "analyze_query", StepStatus::Processing);
        let done = step(1, "analyze_query", StepStatus::Completed);

        let out = printer.update(&snapshot(&[started.clone()]));
        assert_eq!(out, "[… Analyze query]\n");
        assert_eq!(printer.update(&snapshot(&[started.clone()])), "");

        let out = printer.update(&snapshot(&[started, done]));
        assert_eq!(out, "[✓ Analyze query]\n");
    }

    #[test]
    fn test_printer_breaks_line_before_step() {
        let mut printer = StreamPrinter::new(true);
        printer.update(&snapshot(&[content("abc")]));
        let out = printer.update(&snapshot(&[
            content("abc"),
            step(1, "analyze_query", StepStatus::Processing),
        ]));
        assert_eq!(out, "\n[… Analyze query]\n");
    }

    #[test]
    fn test_printer_hides_steps_when_disabled() {
        let mut printer = StreamPrinter::new(false);
        let out = printer.update(&snapshot(&[step(1, "analyze_query", StepStatus::Processing)]));
        assert_eq!(out, "");
    }

    #[test]
    fn test_printer_rewrites_replaced_reply() {
        let mut printer = StreamPrinter::new(false);
        printer.update(&snapshot(&[content("partial")]));

        let failed = SessionSnapshot {
            message: SessionMessage::assistant().fold(&[content("partial")]).fail(),
            steps: Vec::new(),
        };
        assert_eq!(printer.update(&failed), format!("\n{}", TRANSPORT_FAILURE_MESSAGE));
        assert_eq!(printer.update(&failed), "");
    }

    #[test]
    fn test_printer_marks_cancel() {
        let mut printer = StreamPrinter::new(false);
        assert_eq!(printer.finish(&SessionOutcome::Cancelled), "[cancelled]\n");
    }

    #[tokio::test]
    async fn test_follow_prints_whole_reply_after_lagging() {
        // More events in one fragment than the event channel holds
        let mut body = String::new();
        for i in 0..400 {
            body.push_str(&format!("data: {{\"type\":\"content\",\"content\":\"word{} \"}}\n", i));
        }
        body.push_str("data: {\"type\":\"end\"}\n");

        let mut chat = Chat::new(Arc::new(OneFragment(body)));
        let printer = tokio::spawn(follow(
            chat.subscribe(),
            chat.handle(),
            StreamPrinter::new(false),
            Vec::new(),
        ));

        let reply = chat.ask("q", CancellationToken::new()).await;
        let printed = String::from_utf8(printer.await.unwrap().unwrap()).unwrap();

        assert!(reply.message.content.ends_with("word399 "));
        assert_eq!(printed, format!("{}\n", reply.message.content));
    }

    #[tokio::test]
    async fn test_follow_prints_steps_of_each_query() {
        let body = concat!(
            "data: {\"type\":\"step\",\"step_id\":1,\"step_name\":\"analyze_query\"}\n",
            "data: {\"type\":\"content\",\"content\":\"done\"}\n",
            "data: {\"type\":\"end\"}\n",
        );
        let mut chat = Chat::new(Arc::new(OneFragment(body.to_string())));

        for _ in 0..2 {
            let printer = tokio::spawn(follow(
                chat.subscribe(),
                chat.handle(),
                StreamPrinter::new(true),
                Vec::new(),
            ));
            chat.ask("q", CancellationToken::new()).await;
            let printed = String::from_utf8(printer.await.unwrap().unwrap()).unwrap();
            assert_eq!(printed, "[✓ Analyze query]\ndone\n");
        }
    }
}
