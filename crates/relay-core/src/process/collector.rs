use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Collects complete lines from a child pipe.
///
/// Bytes of an unfinished line stay in `pending` across calls, so `drain` can
/// be dropped mid-read (timeout) and resumed later without losing output.
pub struct LineCollector<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
    lines: Vec<String>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> LineCollector<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            pending: Vec::new(),
            lines: Vec::new(),
            eof: false,
        }
    }

    /// Read until EOF, pushing each complete line.
    pub async fn drain(&mut self) -> std::io::Result<()> {
        while !self.eof {
            let n = self.reader.read_until(b'\n', &mut self.pending).await?;
            if n == 0 {
                self.eof = true;
                self.flush_pending();
            } else if self.pending.ends_with(b"\n") {
                self.flush_pending();
            }
        }
        Ok(())
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Lines seen so far, including an unterminated tail.
    pub fn into_lines(mut self) -> Vec<String> {
        self.flush_pending();
        self.lines
    }

    fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let raw = String::from_utf8_lossy(&self.pending);
        let line = raw.strip_suffix('\n').unwrap_or(&raw);
        let line = line.strip_suffix('\r').unwrap_or(line);
        self.lines.push(line.to_string());
        self.pending.clear();
    }
}
