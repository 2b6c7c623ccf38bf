//! Concurrent downloads of one set of URLs

use crate::conversation::Conversation;
use crate::fetch::Fetcher;
use crate::media::{MediaGroup, MediaItem};
use crate::progress::{ProgressHandle, ProgressTracker};
use crate::session::SessionStore;
use crate::{FileInfo, Result, SnagError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Prompt sent when a URL turns out to be a web page
pub const EXTENSIONS_PROMPT: &str = "Looks like you've sent an HTML page. \
     Please type the extensions to download (use , as delimiter), \
     or reply with `links` to get every link I found:";

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Upper bound for a single download, after which it counts as failed
    pub task_timeout: Duration,
    /// How often the progress message is refreshed
    pub progress_interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(900),
            progress_interval: Duration::from_secs(10),
        }
    }
}

/// Downloads URLs in parallel and sends the results back as albums
pub struct BatchDownloader {
    fetcher: Arc<Fetcher>,
    sessions: Arc<SessionStore>,
    config: BatchConfig,
}

/// Per-batch state shared by the download tasks
struct Batch {
    conversation: Arc<dyn Conversation>,
    fetcher: Arc<Fetcher>,
    sessions: Arc<SessionStore>,
    group: Mutex<MediaGroup>,
    task_timeout: Duration,
}

impl BatchDownloader {
    pub fn new(fetcher: Arc<Fetcher>, sessions: Arc<SessionStore>, config: BatchConfig) -> Self {
        Self {
            fetcher,
            sessions,
            config,
        }
    }

    pub fn fetcher(&self) -> &Arc<Fetcher> {
        &self.fetcher
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Download every URL and deliver the results.
    ///
    /// Failures are reported per URL and never stop the other downloads.
    /// Only failing to post the status message aborts the batch.
    pub async fn run(&self, conversation: Arc<dyn Conversation>, urls: Vec<String>) -> Result<()> {
        info!("Starting batch of {} URLs for {}", urls.len(), conversation.key());

        let status = conversation.open_status("Downloading...").await?;
        let mut tracker = ProgressTracker::new(status, self.config.progress_interval);
        tracker.start();

        let batch = Arc::new(Batch {
            conversation: Arc::clone(&conversation),
            fetcher: Arc::clone(&self.fetcher),
            sessions: Arc::clone(&self.sessions),
            group: Mutex::new(MediaGroup::new()),
            task_timeout: self.config.task_timeout,
        });

        let mut tasks = JoinSet::new();
        for (index, url) in urls.into_iter().enumerate() {
            let progress = tracker.register(index);
            let batch = Arc::clone(&batch);
            tasks.spawn(async move { batch.process(url, progress).await });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Download task panicked: {}", e);
            }
        }

        let leftovers = batch.group.lock().await.take();
        if !leftovers.is_empty() {
            batch.send(leftovers).await;
        }

        tracker.finish().await;
        debug!("Batch for {} finished", conversation.key());
        Ok(())
    }
}

impl Batch {
    async fn process(&self, url: String, progress: ProgressHandle) {
        let report = |read: u64, total: u64| progress.update(read, total);
        let download = self.fetcher.fetch(&url, Some(&report));
        let fetched = tokio::time::timeout(self.task_timeout, download)
            .await
            .unwrap_or_else(|_| Err(SnagError::TimeoutError(url.clone())));

        let file = match fetched {
            Ok(file) => file,
            Err(e) => {
                progress.failed();
                warn!("Failed to fetch {}: {}", url, e);
                self.notify(&format!("Failed to fetch {}: {}", url, e)).await;
                return;
            }
        };
        progress.done();

        if file.content.is_empty() {
            warn!("{} returned an empty body, skipping", url);
            return;
        }

        if file.is_html() {
            self.hold_page(url, file).await;
            return;
        }

        let full = self.group.lock().await.push(MediaItem::from(file));
        if let Some(album) = full {
            self.send(album).await;
        }
    }

    /// Park a web page until the user says which extensions to pull from it
    async fn hold_page(&self, url: String, mut page: FileInfo) {
        let key = self.conversation.key();
        debug!("{} is an HTML page, waiting for extensions from {}", url, key);
        page.origin = Some(url);
        self.sessions.put(key, page);
        self.notify(EXTENSIONS_PROMPT).await;
    }

    async fn send(&self, album: Vec<MediaItem>) {
        let count = album.len();
        match self.conversation.deliver(album).await {
            Ok(()) => info!("Delivered album of {} to {}", count, self.conversation.key()),
            Err(e) => {
                error!("Failed to deliver album of {}: {}", count, e);
                self.notify("Failed to send media!").await;
            }
        }
    }

    async fn notify(&self, text: &str) {
        if let Err(e) = self.conversation.reply(text).await {
            warn!("Failed to reply to {}: {}", self.conversation.key(), e);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::conversation::StatusMessage;
    use crate::media::{MediaKind, MAX_GROUP_SIZE};
    use crate::session::SessionKey;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    pub(crate) const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46];
    pub(crate) const MP4: &[u8] = &[
        0x00, 0x00, 0x00, 0x18, 0x66, 0x74, 0x79, 0x70, 0x6D, 0x70, 0x34, 0x32, 0x00, 0x00, 0x00,
        0x00, 0x6D, 0x70, 0x34, 0x32, 0x69, 0x73, 0x6F, 0x6D,
    ];

    /// In-memory chat that records everything sent to it
    #[derive(Default)]
    pub(crate) struct FakeChat {
        pub replies: StdMutex<Vec<String>>,
        pub albums: StdMutex<Vec<Vec<MediaItem>>>,
        pub fail_delivery: bool,
    }

    struct FakeStatus;

    #[async_trait]
    impl StatusMessage for FakeStatus {
        async fn edit(&self, _text: &str) -> Result<()> {
            Ok(())
        }

        async fn remove(&self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Conversation for FakeChat {
        fn key(&self) -> SessionKey {
            SessionKey::new(42, 7)
        }

        async fn reply(&self, text: &str) -> Result<()> {
            self.replies.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn open_status(&self, _text: &str) -> Result<Arc<dyn StatusMessage>> {
            Ok(Arc::new(FakeStatus))
        }

        async fn deliver(&self, items: Vec<MediaItem>) -> Result<()> {
            assert!(items.len() <= MAX_GROUP_SIZE);
            if self.fail_delivery {
                return Err(SnagError::DeliveryError("rejected".to_string()));
            }
            self.albums.lock().unwrap().push(items);
            Ok(())
        }
    }

    pub(crate) fn downloader() -> (BatchDownloader, Arc<SessionStore>) {
        let sessions = Arc::new(SessionStore::new());
        let downloader = BatchDownloader::new(
            Arc::new(Fetcher::new().unwrap()),
            Arc::clone(&sessions),
            BatchConfig {
                task_timeout: Duration::from_secs(10),
                progress_interval: Duration::from_millis(50),
            },
        );
        (downloader, sessions)
    }

    #[tokio::test]
    async fn test_albums_never_exceed_ten() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Regex(r"^/img/\d+$".to_string()))
            .with_status(200)
            .with_body(JPEG)
            .expect(23)
            .create_async()
            .await;

        let urls = (0..23)
            .map(|i| format!("{}/img/{}", server.url(), i))
            .collect();
        let chat = Arc::new(FakeChat::default());
        let (downloader, _) = downloader();
        downloader.run(chat.clone(), urls).await.unwrap();

        let sizes: Vec<usize> = chat.albums.lock().unwrap().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![10, 10, 3]);
        assert!(chat.replies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_url_is_isolated() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/ok.jpg")
            .with_status(200)
            .with_body(JPEG)
            .create_async()
            .await;
        server
            .mock("GET", "/gone.jpg")
            .with_status(404)
            .create_async()
            .await;

        let chat = Arc::new(FakeChat::default());
        let (downloader, _) = downloader();
        let urls = vec![
            format!("{}/gone.jpg", server.url()),
            format!("{}/ok.jpg", server.url()),
        ];
        downloader.run(chat.clone(), urls).await.unwrap();

        let albums = chat.albums.lock().unwrap();
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].len(), 1);
        assert_eq!(albums[0][0].kind, MediaKind::Photo);

        let replies = chat.replies.lock().unwrap();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].contains("gone.jpg"));
        assert!(replies[0].contains("404"));
    }

    #[tokio::test]
    async fn test_html_page_becomes_pending() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/gallery")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html><body><img src=\"/p1.jpg\"></body></html>")
            .create_async()
            .await;

        let chat = Arc::new(FakeChat::default());
        let (downloader, sessions) = downloader();
        let url = format!("{}/gallery", server.url());
        downloader.run(chat.clone(), vec![url.clone()]).await.unwrap();

        assert!(chat.albums.lock().unwrap().is_empty());
        assert_eq!(
            chat.replies.lock().unwrap().clone(),
            vec![EXTENSIONS_PROMPT.to_string()]
        );
        let pending = sessions.get(&SessionKey::new(42, 7)).unwrap();
        assert_eq!(pending.origin, Some(url));
    }

    #[tokio::test]
    async fn test_delivery_failure_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1.mp4")
            .with_status(200)
            .with_body(MP4)
            .create_async()
            .await;

        let chat = Arc::new(FakeChat {
            fail_delivery: true,
            ..Default::default()
        });
        let (downloader, _) = downloader();
        downloader
            .run(chat.clone(), vec![format!("{}/v1.mp4", server.url())])
            .await
            .unwrap();

        assert_eq!(
            chat.replies.lock().unwrap().clone(),
            vec!["Failed to send media!".to_string()]
        );
    }

    #[tokio::test]
    async fn test_long_download_finishes_within_task_budget() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/big.jpg")
            .with_status(200)
            .with_chunked_body(|w| {
                w.write_all(JPEG)?;
                for _ in 0..4 {
                    std::thread::sleep(Duration::from_millis(500));
                    w.write_all(&[0u8; 1024])?;
                }
                Ok(())
            })
            .create_async()
            .await;

        let chat = Arc::new(FakeChat::default());
        let fetcher = Fetcher::with_config(crate::FetchConfig {
            timeout_secs: 1,
            ..Default::default()
        })
        .unwrap();
        let downloader = BatchDownloader::new(
            Arc::new(fetcher),
            Arc::new(SessionStore::new()),
            BatchConfig {
                task_timeout: Duration::from_secs(10),
                progress_interval: Duration::from_millis(50),
            },
        );
        downloader
            .run(chat.clone(), vec![format!("{}/big.jpg", server.url())])
            .await
            .unwrap();

        assert!(chat.replies.lock().unwrap().is_empty());
        let albums = chat.albums.lock().unwrap();
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0][0].kind, MediaKind::Photo);
        assert_eq!(albums[0][0].file.content.len(), JPEG.len() + 4 * 1024);
    }

    #[tokio::test]
    async fn test_slow_download_times_out() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/slow.jpg")
            .with_status(200)
            .with_chunked_body(|w| {
                std::thread::sleep(std::time::Duration::from_millis(500));
                w.write_all(JPEG)
            })
            .create_async()
            .await;

        let chat = Arc::new(FakeChat::default());
        let sessions = Arc::new(SessionStore::new());
        let downloader = BatchDownloader::new(
            Arc::new(Fetcher::new().unwrap()),
            sessions,
            BatchConfig {
                task_timeout: Duration::from_millis(100),
                progress_interval: Duration::from_millis(50),
            },
        );
        downloader
            .run(chat.clone(), vec![format!("{}/slow.jpg", server.url())])
            .await
            .unwrap();

        assert!(chat.albums.lock().unwrap().is_empty());
        let replies = chat.replies.lock().unwrap();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].contains("took too long"));
    }
}
