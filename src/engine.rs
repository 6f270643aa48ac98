//! The engine facade: one sync pipeline per content type, the navigation tree
//! cache, and the diff stream, wired over a shared store.
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::catalog::CatalogSource;
use crate::config::Config;
use crate::diff::{compute_diffs, ContentDiff, DiffDispatcher, DEFAULT_IDLE_TIMEOUT};
use crate::error::{SyncError, WriteError};
use crate::navigation::{build_tree, ContentFilterSettings, NavigationTree};
use crate::settings::FilterSettingsStore;
use crate::storage::{CatalogItem, ContentType, Database, SyncMetadata};
use crate::sync::{BulkWriter, ContentPipeline, SyncState, DEFAULT_BATCH_SIZE};

/// What `trigger_sync` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    /// A run of this content type is already in flight.
    AlreadyRunning,
    /// Cached data is younger than the refresh interval; nothing to do.
    Fresh,
}

/// Tunables of a [`CatalogEngine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub batch_size: usize,
    pub idle_timeout: Duration,
    /// Zero means every non-forced trigger syncs.
    pub refresh_interval: Duration,
    pub default_filters: HashMap<ContentType, ContentFilterSettings>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            refresh_interval: Duration::ZERO,
            default_filters: HashMap::new(),
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size,
            idle_timeout: config.idle_timeout(),
            refresh_interval: config.refresh_interval(),
            default_filters: ContentType::ALL
                .into_iter()
                .map(|ct| (ct, config.filter_defaults(ct)))
                .collect(),
        }
    }
}

struct Pipelines {
    live: Arc<ContentPipeline>,
    movies: Arc<ContentPipeline>,
    series: Arc<ContentPipeline>,
}

impl Pipelines {
    fn get(&self, content_type: ContentType) -> &Arc<ContentPipeline> {
        match content_type {
            ContentType::Live => &self.live,
            ContentType::Movies => &self.movies,
            ContentType::Series => &self.series,
        }
    }
}

/// Bookkeeping of one in-flight run.
struct RunHandle {
    id: u64,
    cancel: CancellationToken,
    /// Cancelled once the run, including diff delivery, is over.
    done: CancellationToken,
}

struct Inner {
    db: Database,
    writer: Arc<BulkWriter>,
    pipelines: Pipelines,
    dispatcher: DiffDispatcher,
    settings: FilterSettingsStore,
    /// Built trees, dropped whenever their inputs change. Held across the
    /// rebuild so an invalidation cannot interleave with it.
    trees: Mutex<HashMap<ContentType, Arc<NavigationTree>>>,
    runs: StdMutex<Runs>,
    refresh_interval: Duration,
}

#[derive(Default)]
struct Runs {
    next_id: u64,
    active: HashMap<ContentType, RunHandle>,
}

/// Offline-first catalog engine.
///
/// Cheap to clone; all clones share the same pipelines and caches. Must be
/// created inside a tokio runtime.
#[derive(Clone)]
pub struct CatalogEngine {
    inner: Arc<Inner>,
}

impl CatalogEngine {
    pub async fn new(
        db: Database,
        source: Arc<dyn CatalogSource>,
        options: EngineOptions,
    ) -> Result<Self> {
        let writer = Arc::new(BulkWriter::new(db.clone()));

        let mut built = Vec::with_capacity(ContentType::ALL.len());
        for content_type in ContentType::ALL {
            let has_cached_data = db.sync_metadata(content_type).await?.has_cached_data();
            built.push(Arc::new(
                ContentPipeline::new(
                    content_type,
                    Arc::clone(&source),
                    Arc::clone(&writer),
                    has_cached_data,
                )
                .with_batch_size(options.batch_size),
            ));
        }
        let [live, movies, series]: [Arc<ContentPipeline>; 3] = built
            .try_into()
            .map_err(|_| anyhow::anyhow!("expected one pipeline per content type"))?;

        let settings = FilterSettingsStore::load(options.default_filters, &db).await?;

        Ok(Self {
            inner: Arc::new(Inner {
                db,
                writer,
                pipelines: Pipelines {
                    live,
                    movies,
                    series,
                },
                dispatcher: DiffDispatcher::spawn(options.idle_timeout),
                settings,
                trees: Mutex::new(HashMap::new()),
                runs: StdMutex::new(Runs::default()),
                refresh_interval: options.refresh_interval,
            }),
        })
    }

    // ========================================================================
    // Sync control
    // ========================================================================

    /// Start a sync of `content_type` in the background.
    ///
    /// Without `force_refresh`, a content type whose cached catalog is younger
    /// than the refresh interval is left alone.
    pub async fn trigger_sync(&self, content_type: ContentType, force_refresh: bool) -> TriggerOutcome {
        if self.is_running(content_type) {
            return TriggerOutcome::AlreadyRunning;
        }
        if !force_refresh && self.is_fresh(content_type).await {
            tracing::debug!(content_type = %content_type, "Cached catalog is fresh, skipping sync");
            return TriggerOutcome::Fresh;
        }

        let mut runs = self.lock_runs();
        if runs.active.contains_key(&content_type) {
            return TriggerOutcome::AlreadyRunning;
        }

        runs.next_id += 1;
        let handle = RunHandle {
            id: runs.next_id,
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
        };
        tokio::spawn(run_sync(
            Arc::clone(&self.inner),
            content_type,
            handle.id,
            handle.cancel.clone(),
            handle.done.clone(),
        ));
        runs.active.insert(content_type, handle);
        TriggerOutcome::Started
    }

    /// Cancel the in-flight run of `content_type`. Returns false when none runs.
    ///
    /// The content type falls back to `Idle`; batches already committed stay
    /// but are pruned by the next completed run.
    pub fn cancel_sync(&self, content_type: ContentType) -> bool {
        match self.lock_runs().active.get(&content_type) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Wait until the in-flight run of `content_type`, if any, has finished
    /// and delivered its diffs.
    pub async fn wait_for_sync(&self, content_type: ContentType) {
        let done = self
            .lock_runs()
            .active
            .get(&content_type)
            .map(|handle| handle.done.clone());
        if let Some(done) = done {
            done.cancelled().await;
        }
    }

    /// Cancel every run and wait for all of them to wind down.
    pub async fn shutdown(&self) {
        let pending: Vec<CancellationToken> = {
            let runs = self.lock_runs();
            runs.active
                .values()
                .map(|handle| {
                    handle.cancel.cancel();
                    handle.done.clone()
                })
                .collect()
        };
        for done in pending {
            done.cancelled().await;
        }
    }

    pub fn is_running(&self, content_type: ContentType) -> bool {
        self.lock_runs().active.contains_key(&content_type)
    }

    /// Latest state of `content_type`, replayed to new receivers.
    pub fn observe_sync_state(&self, content_type: ContentType) -> watch::Receiver<SyncState> {
        self.inner.pipelines.get(content_type).state().subscribe()
    }

    pub async fn sync_metadata(&self, content_type: ContentType) -> Result<SyncMetadata> {
        self.inner.db.sync_metadata(content_type).await
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// The navigation tree of `content_type` under its current filter settings.
    pub async fn get_navigation_tree(&self, content_type: ContentType) -> Result<Arc<NavigationTree>> {
        self.inner.tree(content_type).await
    }

    pub async fn list_items(
        &self,
        content_type: ContentType,
        category_id: &str,
        limit: Option<i64>,
    ) -> Result<Vec<CatalogItem>> {
        self.inner.db.list_items(content_type, category_id, limit).await
    }

    pub fn filter_settings(&self, content_type: ContentType) -> ContentFilterSettings {
        self.inner.settings.get(content_type)
    }

    /// Store new filter settings; the next tree request reflects them.
    pub async fn update_filter_settings(
        &self,
        content_type: ContentType,
        settings: ContentFilterSettings,
    ) -> Result<(), WriteError> {
        self.inner
            .settings
            .set(&self.inner.writer, content_type, settings)
            .await?;
        self.inner.invalidate_tree(content_type).await;
        Ok(())
    }

    /// Forget stored filter settings and return the configured defaults.
    pub async fn reset_filter_settings(
        &self,
        content_type: ContentType,
    ) -> Result<ContentFilterSettings, WriteError> {
        let defaults = self
            .inner
            .settings
            .reset(&self.inner.writer, content_type)
            .await?;
        self.inner.invalidate_tree(content_type).await;
        Ok(defaults)
    }

    // ========================================================================
    // Diffs
    // ========================================================================

    pub fn subscribe_content_diffs(&self) -> broadcast::Receiver<Vec<ContentDiff>> {
        self.inner.dispatcher.subscribe()
    }

    /// Hold diff delivery back until the user has been idle for a while.
    pub fn on_user_interaction_signal(&self) {
        self.inner.dispatcher.on_user_interaction();
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn lock_runs(&self) -> std::sync::MutexGuard<'_, Runs> {
        self.inner.lock_runs()
    }

    async fn is_fresh(&self, content_type: ContentType) -> bool {
        if self.inner.refresh_interval.is_zero() {
            return false;
        }
        let meta = match self.inner.db.sync_metadata(content_type).await {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(content_type = %content_type, error = %e, "Failed to read sync metadata");
                return false;
            }
        };
        let Some(last_success_at) = meta.last_success_at else {
            return false;
        };
        let age = chrono::Utc::now().timestamp().saturating_sub(last_success_at);
        u64::try_from(age).is_ok_and(|age| age < self.inner.refresh_interval.as_secs())
    }
}

impl Inner {
    fn lock_runs(&self) -> std::sync::MutexGuard<'_, Runs> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn tree(&self, content_type: ContentType) -> Result<Arc<NavigationTree>> {
        let mut trees = self.trees.lock().await;
        if let Some(tree) = trees.get(&content_type) {
            return Ok(Arc::clone(tree));
        }

        let categories = self.db.list_categories(content_type).await?;
        let tree = Arc::new(build_tree(&categories, &self.settings.get(content_type)));
        tracing::debug!(
            content_type = %content_type,
            groups = tree.groups.len(),
            categories = tree.category_count(),
            "Built navigation tree"
        );
        trees.insert(content_type, Arc::clone(&tree));
        Ok(tree)
    }

    async fn invalidate_tree(&self, content_type: ContentType) {
        self.trees.lock().await.remove(&content_type);
    }

    /// Rebuild the tree after a run and emit what changed since `before`.
    async fn publish_changes(&self, content_type: ContentType, before: &NavigationTree) -> Result<()> {
        self.invalidate_tree(content_type).await;
        let after = self.tree(content_type).await?;
        let counts = self.db.category_item_counts(content_type).await?;

        let diffs = compute_diffs(
            before,
            &after,
            |id| counts.get(id).copied(),
            content_type,
        );
        tracing::debug!(content_type = %content_type, diffs = diffs.len(), "Computed content diffs");
        self.dispatcher.emit_diffs(diffs);
        Ok(())
    }

    fn finish_run(&self, content_type: ContentType, id: u64) {
        let mut runs = self.lock_runs();
        if runs.active.get(&content_type).is_some_and(|handle| handle.id == id) {
            runs.active.remove(&content_type);
        }
    }
}

async fn run_sync(
    inner: Arc<Inner>,
    content_type: ContentType,
    id: u64,
    cancel: CancellationToken,
    done: CancellationToken,
) {
    // Wakes waiters even if this task panics.
    let _done = done.drop_guard();

    let before = match inner.tree(content_type).await {
        Ok(tree) => Some(tree),
        Err(e) => {
            tracing::warn!(content_type = %content_type, error = %e, "Failed to snapshot navigation tree");
            None
        }
    };

    match inner.pipelines.get(content_type).run(cancel).await {
        Ok(report) => {
            tracing::debug!(
                content_type = %content_type,
                generation = report.generation,
                partial = report.is_partial(),
                "Publishing changes of finished run"
            );
            match before {
                Some(before) => {
                    if let Err(e) = inner.publish_changes(content_type, &before).await {
                        tracing::warn!(content_type = %content_type, error = %e, "Failed to publish content diffs");
                    }
                }
                None => inner.invalidate_tree(content_type).await,
            }
        }
        Err(SyncError::Cancelled) => {}
        Err(e) => {
            tracing::debug!(content_type = %content_type, error = %e, "Sync run ended with error");
        }
    }

    inner.finish_run(content_type, id);
}
