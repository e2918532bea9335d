//! Waiting for a container to log its readiness line.
//!
//! The container runtime reports "started" as soon as the process is up,
//! long before EventStoreDB accepts connections. The server is usable once
//! its node election settles, which it announces with a log line such as
//!
//! ```text
//! [    1,15,10:52:21.178,INF] "InaugurationManager" in state (Leader, Idle): ...
//! ```
//!
//! [`wait_for_log`] follows the log stream, reassembles lines from arbitrary
//! chunks, and matches each against a pattern while racing a deadline.

use std::collections::VecDeque;
use std::sync::LazyLock;
use std::time::Duration;

use futures::StreamExt;
use regex::Regex;
use tokio::time::Instant;

use crate::error::RuntimeError;
use crate::runtime::LogStream;

/// Line logged once the node is leader and idle.
pub const READY_PATTERN: &str = r#""InaugurationManager" in state \(Leader, Idle\)"#;

/// Compiled [`READY_PATTERN`].
pub static READY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(READY_PATTERN).unwrap_or_else(|e| panic!("invalid readiness pattern: {e}"))
});

/// Number of trailing log lines kept for diagnostics.
const TAIL_LINES: usize = 20;

/// Why a readiness wait failed.
#[derive(Debug)]
pub enum ReadinessError {
    /// No matching line within the deadline.
    TimedOut {
        timeout: Duration,
        recent_logs: Vec<String>,
    },
    /// The stream ended (the process exited) without a match.
    StreamEnded { recent_logs: Vec<String> },
    /// The runtime failed while streaming logs.
    Runtime(RuntimeError),
}

/// Splits chunked output into lines.
#[derive(Debug, Default)]
struct LineBuffer {
    partial: String,
}

impl LineBuffer {
    /// Append a chunk and return the lines it completed.
    fn push(&mut self, chunk: &str) -> Vec<String> {
        self.partial.push_str(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }

    /// Whatever is left after the stream ends.
    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.partial);
        let rest = rest.trim_end_matches('\r');
        (!rest.is_empty()).then(|| rest.to_string())
    }
}

#[derive(Debug, Default)]
struct Tail(VecDeque<String>);

impl Tail {
    fn push(&mut self, line: &str) {
        if self.0.len() == TAIL_LINES {
            self.0.pop_front();
        }
        self.0.push_back(line.to_string());
    }

    fn into_vec(self) -> Vec<String> {
        self.0.into()
    }
}

/// Follow `logs` until a line matches `pattern`.
///
/// Returns how long the wait took. Matching is an unanchored search on each
/// complete line.
pub async fn wait_for_log(
    logs: LogStream,
    pattern: &Regex,
    timeout: Duration,
) -> Result<Duration, ReadinessError> {
    let started = Instant::now();
    let mut tail = Tail::default();

    let outcome = tokio::time::timeout(timeout, scan(logs, pattern, &mut tail)).await;
    match outcome {
        Ok(Ok(())) => Ok(started.elapsed()),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(ReadinessError::TimedOut {
            timeout,
            recent_logs: tail.into_vec(),
        }),
    }
}

async fn scan(mut logs: LogStream, pattern: &Regex, tail: &mut Tail) -> Result<(), ReadinessError> {
    let mut buffer = LineBuffer::default();

    while let Some(chunk) = logs.next().await {
        let chunk = chunk.map_err(ReadinessError::Runtime)?;
        for line in buffer.push(&chunk) {
            tracing::trace!(target: "eventstore_fixture::container", "{}", line);
            if pattern.is_match(&line) {
                return Ok(());
            }
            tail.push(&line);
        }
    }

    if let Some(line) = buffer.finish() {
        if pattern.is_match(&line) {
            return Ok(());
        }
        tail.push(&line);
    }

    Err(ReadinessError::StreamEnded {
        recent_logs: std::mem::take(tail).into_vec(),
    })
}
