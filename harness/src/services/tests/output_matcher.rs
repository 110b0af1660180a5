//! Tests for readiness matching, driven without any process

use std::time::Duration;
use tokio::time::Instant;

use crate::services::output_matcher::{
    Marker, MatchOutcome, OutputLine, OutputMatcher, OutputStream, pump_lines,
};

fn stdout(text: &str) -> OutputLine {
    OutputLine {
        stream: OutputStream::Stdout,
        text: text.to_string(),
    }
}

#[tokio::test]
async fn test_matches_literal_after_noise() {
    let (tx, mut matcher) = OutputMatcher::channel();
    tx.send(stdout("starting up")).unwrap();
    tx.send(stdout("Interface published")).unwrap();

    let outcome = matcher
        .wait_for(&Marker::literal("published"), Some(Duration::from_secs(1)))
        .await;

    assert_eq!(outcome, MatchOutcome::Matched(stdout("Interface published")));
    assert_eq!(matcher.transcript().len(), 2);
}

#[tokio::test]
async fn test_matches_pattern() {
    let (tx, mut matcher) = OutputMatcher::channel();
    tx.send(stdout("2024/01/01 [notice] 42#42: start worker process 43")).unwrap();

    let marker = Marker::pattern(r"start worker process \d+").unwrap();
    let outcome = matcher.wait_for(&marker, Some(Duration::from_secs(1))).await;
    assert!(matches!(outcome, MatchOutcome::Matched(_)));
}

#[test]
fn test_invalid_pattern_is_an_error() {
    assert!(Marker::pattern("(unclosed").is_err());
}

#[tokio::test]
async fn test_zero_timeout_times_out_promptly() {
    let (tx, mut matcher) = OutputMatcher::channel();
    tx.send(stdout("nothing to see")).unwrap();

    let started = Instant::now();
    let outcome = matcher.wait_for(&Marker::literal("ready"), Some(Duration::ZERO)).await;

    assert_eq!(outcome, MatchOutcome::TimedOut);
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn test_closed_stream_reports_closed() {
    let (tx, mut matcher) = OutputMatcher::channel();
    tx.send(stdout("bye")).unwrap();
    drop(tx);

    assert_eq!(matcher.wait_for(&Marker::literal("ready"), None).await, MatchOutcome::Closed);
    // Stays closed
    assert_eq!(
        matcher.wait_for(&Marker::literal("ready"), Some(Duration::from_secs(1))).await,
        MatchOutcome::Closed
    );
    assert_eq!(matcher.transcript_text(), "bye");
}

#[tokio::test]
async fn test_transcript_tags_stderr() {
    let (tx, mut matcher) = OutputMatcher::channel();
    tx.send(stdout("out")).unwrap();
    tx.send(OutputLine {
        stream: OutputStream::Stderr,
        text: "err".to_string(),
    })
    .unwrap();

    matcher.drain();
    assert_eq!(matcher.transcript_text(), "out\n[stderr] err");
}

#[tokio::test]
async fn test_pump_lines_skips_blank_lines() {
    let (tx, mut matcher) = OutputMatcher::channel();
    let reader: &'static [u8] = b"first\n\nsecond\n";
    pump_lines(reader, OutputStream::Stdout, "pump".to_string(), tx)
        .await
        .unwrap();

    assert_eq!(matcher.wait_for(&Marker::literal("never"), None).await, MatchOutcome::Closed);
    assert_eq!(matcher.transcript_text(), "first\nsecond");
}
