//! Live snapshot polling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::api::ScreenBackend;
use crate::error::ScreenError;
use crate::notice::{Notice, NoticeSink};
use crate::tags::LiveIndex;

struct LiveShared<B> {
    backend: Arc<B>,
    screen_id: String,
    index: watch::Sender<Arc<LiveIndex>>,
    failing: AtomicBool,
    notices: Arc<dyn NoticeSink>,
}

/// Polls the screen's live snapshot and publishes a fresh [`LiveIndex`] for
/// each one.
pub struct LiveFeed<B> {
    shared: Arc<LiveShared<B>>,
}

impl<B> Clone for LiveFeed<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<B: ScreenBackend> LiveFeed<B> {
    /// Creates a feed publishing an empty index until the first poll.
    #[must_use]
    pub fn new(backend: Arc<B>, screen_id: impl Into<String>, notices: Arc<dyn NoticeSink>) -> Self {
        let (index, _) = watch::channel(Arc::new(LiveIndex::default()));
        Self {
            shared: Arc::new(LiveShared {
                backend,
                screen_id: screen_id.into(),
                index,
                failing: AtomicBool::new(false),
                notices,
            }),
        }
    }

    /// Latest index.
    #[must_use]
    pub fn current(&self) -> Arc<LiveIndex> {
        self.shared.index.borrow().clone()
    }

    /// Receiver notified on every new snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<LiveIndex>> {
        self.shared.index.subscribe()
    }

    /// Fetches one snapshot and rebuilds the index. Returns the record count.
    ///
    /// On failure the previous index stays published. Only the first failure
    /// of a run is reported as a notice.
    pub async fn poll_once(&self) -> Result<usize, ScreenError> {
        let shared = &self.shared;
        match shared.backend.live_snapshot(&shared.screen_id).await {
            Ok(records) => {
                let index = LiveIndex::build(records);
                let count = index.len();
                shared.index.send_replace(Arc::new(index));
                if shared.failing.swap(false, Ordering::AcqRel) {
                    debug!(screen = %shared.screen_id, "live snapshot recovered");
                }
                Ok(count)
            }
            Err(err) => {
                if !shared.failing.swap(true, Ordering::AcqRel) {
                    warn!(screen = %shared.screen_id, "live snapshot failed: {err}");
                    shared
                        .notices
                        .notify(Notice::failure("live values unavailable", &err));
                }
                Err(err)
            }
        }
    }

    /// Polls every `period` until the handle is aborted.
    pub fn spawn(&self, period: Duration) -> JoinHandle<()> {
        let feed = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let _ = feed.poll_once().await;
            }
        })
    }
}

impl<B> std::fmt::Debug for LiveFeed<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveFeed")
            .field("screen_id", &self.shared.screen_id)
            .field("records", &self.shared.index.borrow().len())
            .finish()
    }
}
