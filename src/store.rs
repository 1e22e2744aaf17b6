//! Main Store struct tying the pipeline stages together.

use crate::api::CourseApi;
use crate::error::{Result, StoreError};
use crate::search::{LessonSearch, DEFAULT_QUIET_PERIOD};
use crate::source::{LogConfig, LogLevel, Publisher, RetryPolicy, SharePolicy, Source};
use crate::transport::Transport;
use crate::types::{Category, Collection, Course, CourseChanges, CourseId};
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Prefix of every backend URL.
    pub base_url: String,

    /// Collection resource under `base_url`.
    pub courses_path: String,

    /// Resubscription policy for the collection fetch.
    pub retry: RetryPolicy,

    /// Initial threshold for debug stages.
    pub log_level: LogLevel,

    /// `pageSize` sent with lesson searches.
    pub lessons_page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: "/api".to_string(),
            courses_path: "courses".to_string(),
            retry: RetryPolicy::default(),
            log_level: LogLevel::Info,
            lessons_page_size: 100,
        }
    }
}

/// Whether the collection has been fetched successfully at least once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreState {
    Uninitialized,
    Initialized,
}

struct Inner {
    config: StoreConfig,
    api: CourseApi,
    log: LogConfig,
    courses: Publisher<Collection>,
    initialized: AtomicBool,
    loader: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(loader) = self.loader.get_mut().take() {
            loader.abort();
        }
    }
}

/// The central course store.
///
/// Holds the authoritative [`Collection`] and serves it to any number of
/// consumers through a replaying source: every attachment sees the current
/// collection immediately, empty until the first fetch lands. Edits are
/// optimistic; [`save`](Store::save) publishes the merged collection before
/// the backend is asked to persist it.
///
/// Cloning is cheap and every clone refers to the same store. Methods that
/// start background work ([`init`](Store::init), [`refresh`](Store::refresh),
/// [`save`](Store::save)) must be called inside a Tokio runtime.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    /// Create an uninitialized store talking to the backend through `transport`.
    pub fn new(transport: Arc<dyn Transport>, config: StoreConfig) -> Self {
        let api = CourseApi::from_config(transport, &config);
        Self::with_api(api, config)
    }

    pub fn with_api(api: CourseApi, config: StoreConfig) -> Self {
        let log = LogConfig::new(config.log_level);
        Self {
            inner: Arc::new(Inner {
                config,
                api,
                log,
                courses: Publisher::new(Collection::default()),
                initialized: AtomicBool::new(false),
                loader: Mutex::new(None),
            }),
        }
    }

    // --- Loading ---

    /// Start fetching the collection.
    ///
    /// Returns `false` without doing anything if a fetch is already in flight
    /// or the store is already initialized. Fetch failures are retried per
    /// [`StoreConfig::retry`] and never reach [`collection`](Self::collection).
    pub fn init(&self) -> bool {
        let mut loader = self.inner.loader.lock();
        if self.is_initialized() {
            debug!("init ignored, store already initialized");
            return false;
        }
        if loader.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("init ignored, fetch already in flight");
            return false;
        }
        *loader = Some(self.spawn_loader());
        true
    }

    /// Fetch the collection again, replacing local state when it lands.
    ///
    /// Local edits made before the fetch settles are overwritten. Returns
    /// `false` if a fetch is already in flight.
    pub fn refresh(&self) -> bool {
        let mut loader = self.inner.loader.lock();
        if loader.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("refresh ignored, fetch already in flight");
            return false;
        }
        *loader = Some(self.spawn_loader());
        true
    }

    fn spawn_loader(&self) -> JoinHandle<()> {
        let inner = &self.inner;
        // One attachment per fetch; `courses` is the replaying cache.
        let mut attachment = inner
            .api
            .courses()
            .debug(&inner.log, LogLevel::Debug, "courses")
            .retry_with_delay(inner.config.retry.clone())
            .attach();

        let weak: Weak<Inner> = Arc::downgrade(inner);

        tokio::spawn(async move {
            while let Some(outcome) = attachment.next().await {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match outcome {
                    Ok(collection) => {
                        info!(courses = collection.len(), "courses loaded");
                        inner.courses.publish(collection);
                        inner.initialized.store(true, Ordering::SeqCst);
                    }
                    Err(error) => {
                        warn!(%error, "courses fetch abandoned, keeping current collection");
                    }
                }
            }
        })
    }

    // --- Reading ---

    /// The collection, replayed to every new attachment.
    pub fn collection(&self) -> Source<Collection> {
        self.inner.courses.source()
    }

    /// Courses of one category, in collection order.
    pub fn select_by_category(&self, category: Category) -> Source<Vec<Course>> {
        self.collection()
            .map(move |collection| collection.by_category(category))
    }

    pub fn beginner_courses(&self) -> Source<Vec<Course>> {
        self.select_by_category(Category::Beginner)
    }

    pub fn advanced_courses(&self) -> Source<Vec<Course>> {
        self.select_by_category(Category::Advanced)
    }

    /// One course, or `None` while it is not in the collection.
    pub fn select_course(&self, id: CourseId) -> Source<Option<Course>> {
        self.collection()
            .map(move |collection| collection.get(id).cloned())
            .distinct_until_changed()
    }

    /// Type-ahead search over the lessons of one course.
    pub fn lesson_search(&self, course_id: CourseId) -> LessonSearch {
        LessonSearch::new(
            self.inner.api.clone(),
            &self.inner.log,
            course_id,
            DEFAULT_QUIET_PERIOD,
        )
    }

    /// Current collection.
    pub fn snapshot(&self) -> Collection {
        self.inner.courses.value()
    }

    pub fn state(&self) -> StoreState {
        if self.is_initialized() {
            StoreState::Initialized
        } else {
            StoreState::Uninitialized
        }
    }

    fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    // --- Writing ---

    /// Apply `changes` to course `id` locally, then persist them.
    ///
    /// The merged collection is published before this returns. The returned
    /// source completes when the backend accepts the update and fails if it
    /// does not; either way the local edit stays. The update is sent even if
    /// the returned source is never attached.
    ///
    /// Fails without publishing anything if the course does not exist, the
    /// changes do not produce a valid course, or no Tokio runtime is running.
    pub fn save(&self, id: CourseId, changes: &CourseChanges) -> Result<Source<()>> {
        let runtime = Handle::try_current().map_err(|e| StoreError::NoRuntime(e.to_string()))?;
        self.inner.courses.modify(|collection| {
            let current = collection.get(id).ok_or(StoreError::NotFound(id))?;
            Ok(collection.replaced(current.merged(changes)?))
        })?;
        debug!(%id, fields = changes.len(), "course updated locally");

        let persisted = self
            .inner
            .api
            .update_course(id, changes)
            .share(SharePolicy::replay_forever());

        let watcher = persisted.attach();
        runtime.spawn(async move {
            match watcher.completion().await {
                Ok(()) => debug!(%id, "course update persisted"),
                Err(error) => warn!(%id, %error, "course update failed, local changes kept"),
            }
        });

        Ok(persisted)
    }

    // --- Configuration ---

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn api(&self) -> &CourseApi {
        &self.inner.api
    }

    /// Threshold shared by every debug stage this store builds.
    pub fn log_config(&self) -> &LogConfig {
        &self.inner.log
    }

    pub fn set_log_level(&self, level: LogLevel) {
        self.inner.log.set_level(level);
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("state", &self.state())
            .field("courses", &self.inner.courses.value().len())
            .field("log_level", &self.inner.log.level())
            .finish()
    }
}
