use std::fmt::Write as _;

use super::event::{StreamEvent, ToolResult, parse_line};
use crate::domain::Verdict;

/// Human-readable rendering of one run plus the completion verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    pub verdict: Verdict,
    pub event_count: usize,
    /// Lines that were kept verbatim because they were not recognised events.
    pub unparsed_count: usize,
}

/// Incremental reducer: feed lines in order, then `finish`.
///
/// Consecutive thinking deltas are merged into a single block so the
/// transcript reads like prose instead of one fragment per line.
#[derive(Debug, Default)]
pub struct TranscriptBuilder {
    out: String,
    thinking: Option<String>,
    last_result: Option<(bool, Option<String>)>,
    event_count: usize,
    unparsed_count: usize,
}

impl TranscriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&mut self, line: &str) {
        if let Some(event) = parse_line(line) {
            self.push_event(event);
        }
    }

    pub fn push_event(&mut self, event: StreamEvent) {
        self.event_count += 1;

        if !matches!(event, StreamEvent::Thinking { .. }) {
            self.flush_thinking();
        }

        match event {
            StreamEvent::Thinking { text, done } => {
                self.thinking.get_or_insert_with(String::new).push_str(&text);
                if done {
                    self.flush_thinking();
                }
            }
            StreamEvent::System { subtype, model } => {
                let subtype = subtype.unwrap_or_else(|| "event".to_string());
                match model {
                    Some(model) => self.line(&format!("[system] {subtype} (model: {model})")),
                    None => self.line(&format!("[system] {subtype}")),
                }
            }
            StreamEvent::ToolCallStarted(call) => {
                self.line(&format!("[tool:{}] {}", call.tool, call.summary));
            }
            StreamEvent::ToolCallCompleted { call, result } => {
                let status = match result {
                    ToolResult::Ok(Some(detail)) if !detail.is_empty() => format!("ok: {detail}"),
                    ToolResult::Ok(_) => "ok".to_string(),
                    ToolResult::Failed(message) => format!("failed: {message}"),
                    ToolResult::Unknown => "completed".to_string(),
                };
                self.line(&format!("[tool:{}] -> {status}", call.tool));
            }
            StreamEvent::Assistant { text } => {
                if !text.trim().is_empty() {
                    self.line(&format!("[assistant] {}", text.trim_end()));
                }
            }
            StreamEvent::Result {
                is_error,
                text,
                duration_ms,
            } => {
                let label = if is_error { "error" } else { "success" };
                let mut header = format!("[result] {label}");
                if let Some(ms) = duration_ms {
                    let _ = write!(header, " ({ms} ms)");
                }
                match &text {
                    Some(t) if !t.is_empty() => self.line(&format!("{header}: {t}")),
                    _ => self.line(&header),
                }
                self.last_result = Some((is_error, text));
            }
            StreamEvent::Unknown { raw, .. } | StreamEvent::Unparsed { raw } => {
                self.unparsed_count += 1;
                self.line(&format!("[raw] {raw}"));
            }
        }
    }

    pub fn finish(mut self) -> Transcript {
        self.flush_thinking();
        let verdict = match self.last_result {
            Some((false, _)) => Verdict::Completed,
            Some((true, message)) => Verdict::Errored { message },
            None => Verdict::Unknown,
        };
        Transcript {
            text: self.out,
            verdict,
            event_count: self.event_count,
            unparsed_count: self.unparsed_count,
        }
    }

    fn flush_thinking(&mut self) {
        if let Some(text) = self.thinking.take() {
            let text = text.trim();
            if !text.is_empty() {
                self.line(&format!("[thinking] {text}"));
            }
        }
    }

    fn line(&mut self, s: &str) {
        self.out.push_str(s);
        self.out.push('\n');
    }
}

/// Reduce a full stdout capture.
pub fn parse_stream<S: AsRef<str>>(lines: &[S]) -> Transcript {
    let mut builder = TranscriptBuilder::new();
    for line in lines {
        builder.push_line(line.as_ref());
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_stream_renders_in_order() {
        let lines = [
            r#"{"type":"system","subtype":"init","model":"m-1"}"#,
            r#"{"type":"thinking","subtype":"delta","text":"Let me "}"#,
            r#"{"type":"thinking","subtype":"delta","text":"look."}"#,
            r#"{"type":"tool_call","subtype":"started","call_id":"1","tool_call":{"shellToolCall":{"args":{"command":"ls"}}}}"#,
            r#"{"type":"tool_call","subtype":"completed","call_id":"1","tool_call":{"shellToolCall":{"args":{"command":"ls"},"result":{"success":{"stdout":"a.txt\nb.txt"}}}}}"#,
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Found two files."}]}}"#,
            r#"{"type":"result","subtype":"success","is_error":false,"result":"Found two files.","duration_ms":1200}"#,
        ];
        let t = parse_stream(&lines);

        assert_eq!(t.verdict, Verdict::Completed);
        assert_eq!(t.unparsed_count, 0);
        assert_eq!(
            t.text,
            "[system] init (model: m-1)\n\
             [thinking] Let me look.\n\
             [tool:shell] ls\n\
             [tool:shell] -> ok: a.txt\n\
             [assistant] Found two files.\n\
             [result] success (1200 ms): Found two files.\n"
        );
    }

    #[test]
    fn missing_result_event_is_unknown() {
        let t = parse_stream(&[r#"{"type":"assistant","message":{"content":[{"type":"text","text":"working"}]}}"#]);
        assert_eq!(t.verdict, Verdict::Unknown);
    }

    #[test]
    fn error_flag_on_result_is_errored() {
        let t = parse_stream(&[r#"{"type":"result","is_error":true,"result":"rate limited"}"#]);
        assert_eq!(
            t.verdict,
            Verdict::Errored {
                message: Some("rate limited".to_string())
            }
        );
    }

    #[test]
    fn fractional_duration_does_not_hide_the_error() {
        let t = parse_stream(&[r#"{"type":"result","is_error":true,"duration_ms":1234.5}"#]);
        assert_eq!(t.verdict, Verdict::Errored { message: None });
        assert_eq!(t.unparsed_count, 0);
    }

    #[test]
    fn last_result_event_wins() {
        let t = parse_stream(&[
            r#"{"type":"result","is_error":true}"#,
            r#"{"type":"result","is_error":false}"#,
        ]);
        assert_eq!(t.verdict, Verdict::Completed);
    }

    #[test]
    fn malformed_lines_stay_visible() {
        let t = parse_stream(&["Traceback (most recent call last):", r#"{"type":"result","is_error":false}"#]);
        assert_eq!(t.unparsed_count, 1);
        assert!(t.text.starts_with("[raw] Traceback (most recent call last):\n"));
    }

    #[test]
    fn dangling_thinking_is_flushed_on_finish() {
        let t = parse_stream(&[r#"{"type":"thinking","subtype":"delta","text":"hmm"}"#]);
        assert_eq!(t.text, "[thinking] hmm\n");
    }
}
