//! Download progress for a batch, shown in one periodically edited message

use crate::conversation::StatusMessage;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    Downloading,
    Done,
    Failed,
}

impl ProgressStatus {
    fn encode(status: Option<Self>) -> u8 {
        match status {
            None => 0,
            Some(ProgressStatus::Downloading) => 1,
            Some(ProgressStatus::Done) => 2,
            Some(ProgressStatus::Failed) => 3,
        }
    }

    fn decode(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(ProgressStatus::Downloading),
            2 => Some(ProgressStatus::Done),
            3 => Some(ProgressStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct ProgressEntry {
    id: usize,
    /// f32 bits
    percent: AtomicU32,
    status: AtomicU8,
}

/// Writer side of one download's progress.
///
/// Each handle is updated by a single task; readers may see a value one
/// update behind.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    entry: Arc<ProgressEntry>,
}

impl ProgressHandle {
    fn new(id: usize) -> Self {
        Self {
            entry: Arc::new(ProgressEntry {
                id,
                percent: AtomicU32::new(0f32.to_bits()),
                status: AtomicU8::new(ProgressStatus::encode(None)),
            }),
        }
    }

    pub fn id(&self) -> usize {
        self.entry.id
    }

    /// Record `read` of `total` bytes
    pub fn update(&self, read: u64, total: u64) {
        if total == 0 {
            return;
        }
        let percent = (read as f64 * 100.0 / total as f64).min(100.0) as f32;
        self.entry.percent.store(percent.to_bits(), Ordering::Relaxed);
        self.set_status(ProgressStatus::Downloading);
    }

    pub fn done(&self) {
        self.entry.percent.store(100f32.to_bits(), Ordering::Relaxed);
        self.set_status(ProgressStatus::Done);
    }

    pub fn failed(&self) {
        self.set_status(ProgressStatus::Failed);
    }

    pub fn percent(&self) -> f32 {
        f32::from_bits(self.entry.percent.load(Ordering::Relaxed))
    }

    pub fn status(&self) -> Option<ProgressStatus> {
        ProgressStatus::decode(self.entry.status.load(Ordering::Relaxed))
    }

    fn set_status(&self, status: ProgressStatus) {
        self.entry
            .status
            .store(ProgressStatus::encode(Some(status)), Ordering::Relaxed);
    }
}

/// One status line per unfinished download; finished ones drop out
pub fn render(entries: &[ProgressHandle]) -> String {
    entries
        .iter()
        .filter(|e| e.percent() < 100.0)
        .map(|e| match e.status() {
            Some(ProgressStatus::Failed) => {
                format!("File {}: {:.1}% (failed)\n", e.id(), e.percent())
            }
            _ => format!("File {}: {:.1}%\n", e.id(), e.percent()),
        })
        .collect()
}

/// Tracks every download of one batch.
///
/// Once started, the status message is re-rendered every `interval` and
/// edited only when the text changed. [`ProgressTracker::finish`] stops the
/// timer and deletes the message.
pub struct ProgressTracker {
    entries: Arc<Mutex<Vec<ProgressHandle>>>,
    status: Arc<dyn StatusMessage>,
    interval: Duration,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ProgressTracker {
    pub fn new(status: Arc<dyn StatusMessage>, interval: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            status,
            interval,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn register(&self, id: usize) -> ProgressHandle {
        let handle = ProgressHandle::new(id);
        lock(&self.entries).push(handle.clone());
        handle
    }

    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }

        let entries = Arc::clone(&self.entries);
        let status = Arc::clone(&self.status);
        let cancel = self.cancel.clone();
        let period = self.interval;

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut last_body = String::new();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let body = render(&lock(&entries));
                        // Telegram rejects edits to an empty text
                        if body.is_empty() || body == last_body {
                            continue;
                        }
                        if let Err(e) = status.edit(&body).await {
                            warn!("Failed to update progress message: {}", e);
                        }
                        last_body = body;
                    }
                }
            }
            debug!("Progress timer stopped");
        }));
    }

    pub async fn finish(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        if let Err(e) = self.status.remove().await {
            warn!("Failed to remove progress message: {}", e);
        }
    }
}

fn lock(entries: &Mutex<Vec<ProgressHandle>>) -> std::sync::MutexGuard<'_, Vec<ProgressHandle>> {
    entries
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
