//! Readiness matching over line-buffered output
//!
//! Reader tasks turn a process's stdout and stderr into one ordered stream of
//! [`OutputLine`]s. [`OutputMatcher`] consumes that stream until a line
//! matches a [`Marker`], the stream ends, or the deadline passes. It knows
//! nothing about processes, so it can be driven from any line source.

use regex::Regex;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::HarnessResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

/// What a readiness wait is looking for
#[derive(Debug, Clone)]
pub enum Marker {
    /// Line contains this text
    Literal(String),
    /// Line matches this regular expression
    Pattern(Regex),
    /// Line contains any of these texts
    AnyOf(Vec<String>),
}

impl Marker {
    pub fn literal(text: impl Into<String>) -> Self {
        Marker::Literal(text.into())
    }

    pub fn pattern(pattern: &str) -> HarnessResult<Self> {
        Ok(Marker::Pattern(Regex::new(pattern)?))
    }

    /// For helpers whose wording differs between builds
    pub fn any_of<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Marker::AnyOf(texts.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, line: &str) -> bool {
        match self {
            Marker::Literal(text) => line.contains(text.as_str()),
            Marker::Pattern(re) => re.is_match(line),
            Marker::AnyOf(texts) => texts.iter().any(|text| line.contains(text.as_str())),
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Marker::Literal(text) => f.write_str(text),
            Marker::Pattern(re) => write!(f, "/{}/", re.as_str()),
            Marker::AnyOf(texts) => f.write_str(&texts.join("' or '")),
        }
    }
}

impl From<&str> for Marker {
    fn from(text: &str) -> Self {
        Marker::literal(text)
    }
}

/// Result of one wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched(OutputLine),
    TimedOut,
    /// Every writer hung up before the marker appeared
    Closed,
}

pub type OutputSender = mpsc::UnboundedSender<OutputLine>;

pub struct OutputMatcher {
    rx: mpsc::UnboundedReceiver<OutputLine>,
    transcript: Vec<OutputLine>,
    closed: bool,
}

impl OutputMatcher {
    pub fn new(rx: mpsc::UnboundedReceiver<OutputLine>) -> Self {
        Self {
            rx,
            transcript: Vec::new(),
            closed: false,
        }
    }

    /// Matcher plus the sender its writers feed
    pub fn channel() -> (OutputSender, OutputMatcher) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, OutputMatcher::new(rx))
    }

    /// Consume lines until `marker` matches.
    ///
    /// `None` waits for as long as the stream stays open. Lines seen before
    /// the match stay in the transcript for diagnostics.
    pub async fn wait_for(&mut self, marker: &Marker, timeout: Option<Duration>) -> MatchOutcome {
        if self.closed {
            return MatchOutcome::Closed;
        }
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                    Ok(next) => next,
                    Err(_) => return MatchOutcome::TimedOut,
                },
                None => self.rx.recv().await,
            };

            match next {
                Some(line) => {
                    let matched = marker.matches(&line.text);
                    self.transcript.push(line.clone());
                    if matched {
                        return MatchOutcome::Matched(line);
                    }
                }
                None => {
                    self.closed = true;
                    return MatchOutcome::Closed;
                }
            }
        }
    }

    /// Pull in whatever is already buffered without waiting
    pub fn drain(&mut self) {
        while let Ok(line) = self.rx.try_recv() {
            self.transcript.push(line);
        }
    }

    pub fn transcript(&self) -> &[OutputLine] {
        &self.transcript
    }

    /// Transcript as text, stderr lines tagged
    pub fn transcript_text(&self) -> String {
        self.transcript
            .iter()
            .map(|line| match line.stream {
                OutputStream::Stdout => line.text.clone(),
                OutputStream::Stderr => format!("[stderr] {}", line.text),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Forward every line of `reader` into `tx`, logging it under `label`.
///
/// Keeps draining after the receiver is gone so the child never blocks on a
/// full pipe.
pub fn pump_lines<R>(reader: R, stream: OutputStream, label: String, tx: OutputSender) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(text)) => {
                    if text.is_empty() {
                        continue;
                    }
                    match stream {
                        OutputStream::Stdout => debug!("[{}] stdout: {}", label, text),
                        OutputStream::Stderr => warn!("[{}] stderr: {}", label, text),
                    }
                    let _ = tx.send(OutputLine { stream, text });
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("[{}] stopped reading {:?}: {}", label, stream, e);
                    break;
                }
            }
        }
    })
}
