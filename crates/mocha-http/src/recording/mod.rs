//! Asynchronous traffic recording.
//!
//! The dispatcher hands exchanges to a bounded queue without waiting. One
//! background task drains the queue into a [`RecordSink`]. When the queue is
//! full the exchange is dropped and counted, the request is never held up.

mod sink;
mod types;

pub use sink::{JsonLinesSink, MemorySink, RecordSink};
pub use types::{RecordedExchange, RecordedRequest, RecordedResponse};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::metrics;

pub const DEFAULT_QUEUE_SIZE: usize = 256;

pub struct Recorder {
    tx: Mutex<Option<mpsc::Sender<RecordedExchange>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Recorder {
    /// Spawn the background writer. Must be called within a Tokio runtime.
    /// Sinks do blocking I/O, so the writer runs on the blocking pool.
    pub fn start(mut sink: Box<dyn RecordSink>, queue_size: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<RecordedExchange>(queue_size.max(1));
        let task = tokio::task::spawn_blocking(move || {
            while let Some(exchange) = rx.blocking_recv() {
                let written = sink.write(&exchange).and_then(|_| sink.flush());
                if let Err(e) = written {
                    warn!(error = %e, path = %exchange.request.path, "Failed to record exchange");
                }
            }
            debug!("Recorder stopped");
        });

        Self {
            tx: Mutex::new(Some(tx)),
            task: Mutex::new(Some(task)),
        }
    }

    /// Queue an exchange. Returns false if it was dropped.
    pub fn record(&self, exchange: RecordedExchange) -> bool {
        let tx = self.tx.lock().clone();
        let Some(tx) = tx else {
            debug!("Recorder closed, exchange dropped");
            return false;
        };
        match tx.try_send(exchange) {
            Ok(()) => true,
            Err(TrySendError::Full(exchange)) => {
                metrics::record_recorder_drop();
                warn!(
                    path = %exchange.request.path,
                    "Recording queue full, exchange dropped"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Recorder task is gone, exchange dropped");
                false
            }
        }
    }

    /// Stop accepting exchanges and wait until everything queued is written.
    pub async fn close(&self) {
        self.tx.lock().take();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Recorder task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::ResponseStub;
    use crate::request::tests::get;
    use hyper::StatusCode;

    fn exchange(path: &str) -> RecordedExchange {
        let stub = ResponseStub::new(StatusCode::OK).with_body("ok");
        RecordedExchange::new(&get(path), &stub, Some("mock-1".into()), false)
    }

    #[tokio::test]
    async fn test_memory_sink_receives_exchanges() {
        let sink = MemorySink::new();
        let recorder = Recorder::start(Box::new(sink.clone()), 8);
        assert!(recorder.record(exchange("/a")));
        assert!(recorder.record(exchange("/b")));
        recorder.close().await;

        let paths: Vec<_> = sink.entries().into_iter().map(|e| e.request.path).collect();
        assert_eq!(paths, vec!["/a", "/b"]);
        assert!(!recorder.record(exchange("/late")));
    }

    struct BlockingSink(std::sync::mpsc::Receiver<()>);

    impl RecordSink for BlockingSink {
        fn write(&mut self, _exchange: &RecordedExchange) -> anyhow::Result<()> {
            let _ = self.0.recv();
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_full_queue_drops_without_blocking() {
        let (release, gate) = std::sync::mpsc::channel();
        let recorder = Recorder::start(Box::new(BlockingSink(gate)), 1);

        let accepted = (0..10).filter(|i| recorder.record(exchange(&format!("/{i}")))).count();
        assert!(accepted < 10);

        drop(release);
        recorder.close().await;
    }

    #[tokio::test]
    async fn test_slow_sink_does_not_stall_the_runtime() {
        let (release, gate) = std::sync::mpsc::channel();
        let recorder = Recorder::start(Box::new(BlockingSink(gate)), 4);
        assert!(recorder.record(exchange("/slow")));

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_secs(2));
            let _ = release.send(());
        });

        let started = std::time::Instant::now();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(started.elapsed() < std::time::Duration::from_secs(1));

        recorder.close().await;
        releaser.join().unwrap();
    }

    #[tokio::test]
    async fn test_json_lines_sink_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("traffic.jsonl");
        let sink = JsonLinesSink::open(&path).unwrap();
        let recorder = Recorder::start(Box::new(sink), 4);
        recorder.record(exchange("/one"));
        recorder.record(exchange("/two"));
        recorder.close().await;

        let entries = JsonLinesSink::read_all(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].request.path, "/two");
        assert_eq!(entries[0].response.body, "ok");
        assert_eq!(entries[0].mock_id.as_deref(), Some("mock-1"));
    }
}
