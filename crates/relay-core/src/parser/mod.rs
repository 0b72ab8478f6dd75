//! Parser - reduce a worker's NDJSON event stream to a transcript + verdict.
//!
//! Each line is classified on its own into a `StreamEvent`. Lines that are
//! not JSON are kept verbatim (`Unparsed`), JSON of an unknown type is kept as
//! `Unknown`: malformed output must stay visible in the transcript.

mod event;
mod transcript;

pub use self::event::{StreamEvent, ToolCall, ToolResult, parse_line};
pub use self::transcript::{Transcript, TranscriptBuilder, parse_stream};
