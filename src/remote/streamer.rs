//! Background streaming of remote output to a sink.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::buffer::OutputBuffer;

/// Default cadence at which streamers drain their buffer.
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_millis(500);

/// Receives completed output lines, tagged with the member they came from.
pub trait OutputSink: Send + Sync {
    fn forward(&self, source: &str, line: &str) -> Result<()>;
}

/// Forwards lines to the tracing log.
pub struct LogSink;

impl OutputSink for LogSink {
    fn forward(&self, source: &str, line: &str) -> Result<()> {
        info!(member = source, "{}", line);
        Ok(())
    }
}

/// Discards all output.
pub struct NullSink;

impl OutputSink for NullSink {
    fn forward(&self, _source: &str, _line: &str) -> Result<()> {
        Ok(())
    }
}

/// Keeps every forwarded line in memory, in arrival order.
#[derive(Default)]
pub struct CollectingSink {
    lines: Mutex<Vec<(String, String)>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forwarded lines without their source tag.
    pub fn lines(&self) -> Vec<String> {
        self.entries().into_iter().map(|(_, line)| line).collect()
    }

    pub fn entries(&self) -> Vec<(String, String)> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl OutputSink for CollectingSink {
    fn forward(&self, source: &str, line: &str) -> Result<()> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((source.to_string(), line.to_string()));
        Ok(())
    }
}

/// Task draining one execution's buffer at a fixed interval.
///
/// Must be stopped with [`OutputStreamer::stop`], which performs a final
/// drain including any trailing partial line. Dropping it unstopped aborts
/// the task.
pub struct OutputStreamer {
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<usize>>,
}

impl OutputStreamer {
    pub fn spawn(
        buffer: OutputBuffer,
        sink: Arc<dyn OutputSink>,
        source: impl Into<String>,
        interval: Duration,
    ) -> Self {
        let source = source.into();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut forwarded = 0;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        forwarded += forward_lines(sink.as_ref(), &source, buffer.drain_lines());
                    }
                }
            }

            forwarded + forward_lines(sink.as_ref(), &source, buffer.drain_all())
        });

        Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Signal stop, wait for the final drain, and return the number of
    /// lines forwarded successfully.
    pub async fn stop(mut self) -> usize {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match self.handle.take() {
            Some(handle) => handle.await.unwrap_or_else(|e| {
                warn!("Output streamer task failed: {}", e);
                0
            }),
            None => 0,
        }
    }
}

impl Drop for OutputStreamer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Sink errors are logged and never propagated.
fn forward_lines(sink: &dyn OutputSink, source: &str, lines: Vec<String>) -> usize {
    let mut forwarded = 0;
    for line in lines {
        match sink.forward(source, &line) {
            Ok(()) => forwarded += 1,
            Err(e) => warn!("Failed to forward output line from {}: {:#}", source, e),
        }
    }
    forwarded
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: Duration = Duration::from_millis(10);

    struct FailingSink;

    impl OutputSink for FailingSink {
        fn forward(&self, _source: &str, _line: &str) -> Result<()> {
            anyhow::bail!("sink closed")
        }
    }

    #[tokio::test]
    async fn test_streams_complete_lines_then_stops() {
        let sink = Arc::new(CollectingSink::new());
        let buffer = OutputBuffer::new();
        let streamer = OutputStreamer::spawn(buffer.clone(), sink.clone(), "machine-0", FAST);

        buffer.append(b"abc\ndef\n");
        let forwarded = streamer.stop().await;

        assert_eq!(forwarded, 2);
        assert_eq!(sink.lines(), vec!["abc", "def"]);
    }

    #[tokio::test]
    async fn test_partial_line_only_at_final_drain() {
        let sink = Arc::new(CollectingSink::new());
        let buffer = OutputBuffer::new();
        let streamer = OutputStreamer::spawn(buffer.clone(), sink.clone(), "machine-0", FAST);

        buffer.append(b"abc\ndef\nghi");
        tokio::time::sleep(FAST * 8).await;
        assert_eq!(sink.lines(), vec!["abc", "def"]);

        streamer.stop().await;
        assert_eq!(sink.lines(), vec!["abc", "def", "ghi"]);
    }

    #[tokio::test]
    async fn test_lines_tagged_with_source() {
        let sink = Arc::new(CollectingSink::new());
        let buffer = OutputBuffer::new();
        let streamer = OutputStreamer::spawn(buffer.clone(), sink.clone(), "machine-2", FAST);
        buffer.append(b"stopping mongod\n");
        streamer.stop().await;
        assert_eq!(
            sink.entries(),
            vec![("machine-2".to_string(), "stopping mongod".to_string())]
        );
    }

    #[tokio::test]
    async fn test_sink_errors_are_swallowed() {
        let buffer = OutputBuffer::new();
        let streamer = OutputStreamer::spawn(buffer.clone(), Arc::new(FailingSink), "m", FAST);
        buffer.append(b"one\ntwo");
        assert_eq!(streamer.stop().await, 0);
        assert!(!buffer.has_pending());
    }

    #[tokio::test]
    async fn test_stop_with_empty_buffer() {
        let sink = Arc::new(CollectingSink::new());
        let streamer = OutputStreamer::spawn(OutputBuffer::new(), sink.clone(), "m", FAST);
        assert_eq!(streamer.stop().await, 0);
        assert!(sink.lines().is_empty());
    }
}
