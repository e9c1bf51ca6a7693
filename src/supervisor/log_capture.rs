//! Captured output of PHP server processes.
//!
//! Lines go into an in-memory ring buffer per process and are re-emitted at
//! debug level under the site id. The output is diagnostic only; nothing
//! parses it to make control decisions.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

/// Default number of lines kept per process.
pub const DEFAULT_MAX_LOG_LINES: usize = 2_000;

/// Bounded buffer of output lines. Clones share the same buffer.
#[derive(Clone)]
pub struct LogBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
    max_lines: usize,
}

impl LogBuffer {
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::new())),
            max_lines: max_lines.max(1),
        }
    }

    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock();
        lines.push_back(line);
        if lines.len() > self.max_lines {
            lines.pop_front();
        }
    }

    /// All buffered lines, or only the last `n`.
    pub fn tail(&self, n: Option<usize>) -> Vec<String> {
        let lines = self.lines.lock();
        match n {
            Some(n) => lines.iter().skip(lines.len().saturating_sub(n)).cloned().collect(),
            None => lines.iter().cloned().collect(),
        }
    }

    /// Read `stream` line by line into the buffer until EOF.
    ///
    /// `stream_name` is prefixed to stderr lines so the two streams stay
    /// distinguishable once interleaved.
    pub fn capture<R>(&self, site_id: &str, stream_name: &'static str, stream: R) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = self.clone();
        let site_id = site_id.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        tracing::debug!(site.id = %site_id, stream = stream_name, "{}", line);
                        let line = if stream_name == "stderr" {
                            format!("[stderr] {}", line)
                        } else {
                            line
                        };
                        buffer.push(line);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::trace!("Stopped reading {} of site {}: {}", stream_name, site_id, e);
                        break;
                    }
                }
            }
        })
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LOG_LINES)
    }
}
