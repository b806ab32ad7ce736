//! Background loading of the merged task list for one project and category.
//!
//! Template rows and live tasks are fetched on their own worker threads.
//! Each request carries a generation number; a result whose generation is
//! no longer current is dropped, so a slow response can never overwrite a
//! newer one.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::{SheetError, StoreError};
use crate::io::{build_template_set, SheetTask, TemplateSet, TemplateSource};
use crate::model::{merge, Category, Task};
use crate::store::{ChangeReceiver, LiveStore, Subscription};

/// The project and category a feed is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedScope {
    pub project_id: Uuid,
    pub category: Category,
}

enum FeedMessage {
    Template {
        generation: u64,
        result: Result<Vec<SheetTask>, SheetError>,
    },
    Live {
        generation: u64,
        result: Result<Vec<Task>, StoreError>,
    },
}

type Waker = Arc<dyn Fn() + Send + Sync>;

pub struct CategoryFeed {
    store: Arc<dyn LiveStore>,
    source: Arc<dyn TemplateSource>,
    scope: Option<FeedScope>,
    open_date: Option<NaiveDate>,

    tx: Sender<FeedMessage>,
    rx: Receiver<FeedMessage>,
    waker: Option<Waker>,

    template_generation: u64,
    live_generation: u64,
    template_pending: bool,
    live_pending: bool,

    rows: Vec<SheetTask>,
    template: TemplateSet,
    template_error: Option<String>,
    live: Vec<Task>,
    live_error: Option<String>,
    merged: Vec<Task>,

    task_changes: Option<ChangeReceiver>,
    people_changes: ChangeReceiver,
    refresh_interval: Option<Duration>,
    last_refresh: Instant,
}

/// Run `job` on a named worker thread. Returns false if it could not start.
fn spawn(name: &str, job: impl FnOnce() + Send + 'static) -> bool {
    match std::thread::Builder::new().name(name.to_string()).spawn(job) {
        Ok(_) => true,
        Err(e) => {
            tracing::error!(error = %e, thread = name, "could not start fetch thread");
            false
        }
    }
}

impl CategoryFeed {
    pub fn new(
        store: Arc<dyn LiveStore>,
        source: Arc<dyn TemplateSource>,
        refresh_interval: Option<Duration>,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        let people_changes = store.subscribe(Subscription::People);
        Self {
            store,
            source,
            scope: None,
            open_date: None,
            tx,
            rx,
            waker: None,
            template_generation: 0,
            live_generation: 0,
            template_pending: false,
            live_pending: false,
            rows: Vec::new(),
            template: TemplateSet::default(),
            template_error: None,
            live: Vec::new(),
            live_error: None,
            merged: Vec::new(),
            task_changes: None,
            people_changes,
            refresh_interval,
            last_refresh: Instant::now(),
        }
    }

    /// Called from worker threads after a result is queued, e.g. to request
    /// a repaint.
    pub fn set_waker(&mut self, waker: impl Fn() + Send + Sync + 'static) {
        self.waker = Some(Arc::new(waker));
    }

    pub fn set_source(&mut self, source: Arc<dyn TemplateSource>) {
        self.source = source;
        self.refresh_template();
    }

    pub fn set_refresh_interval(&mut self, interval: Option<Duration>) {
        self.refresh_interval = interval;
    }

    pub fn scope(&self) -> Option<FeedScope> {
        self.scope
    }

    /// Point the feed at a project and category. Changing scope refetches
    /// the live set; changing only the open date rebuilds the template from
    /// the rows already loaded.
    pub fn select(&mut self, scope: Option<FeedScope>, open_date: Option<NaiveDate>) {
        if scope != self.scope {
            tracing::debug!(?scope, "feed scope changed");
            self.scope = scope;
            self.task_changes = scope.map(|s| {
                self.store.subscribe(Subscription::Tasks {
                    project_id: s.project_id,
                    category: s.category,
                })
            });
            self.live.clear();
            self.live_error = None;
            self.open_date = open_date;
            self.rebuild_template();
            self.refresh_live();
        } else if open_date != self.open_date {
            self.open_date = open_date;
            self.rebuild_template();
        }
    }

    /// Refetch both sources.
    pub fn refresh(&mut self) {
        self.refresh_template();
        self.refresh_live();
    }

    pub fn refresh_template(&mut self) {
        self.last_refresh = Instant::now();
        self.template_generation += 1;
        let generation = self.template_generation;
        let source = Arc::clone(&self.source);
        let tx = self.tx.clone();
        let waker = self.waker.clone();
        tracing::debug!(generation, source = %source.describe(), "fetching template");
        self.template_pending = spawn("template-fetch", move || {
            let result = source.fetch();
            let _ = tx.send(FeedMessage::Template { generation, result });
            if let Some(wake) = waker {
                wake();
            }
        });
    }

    pub fn refresh_live(&mut self) {
        self.last_refresh = Instant::now();
        self.live_generation += 1;
        let Some(scope) = self.scope else {
            self.live_pending = false;
            self.remerge();
            return;
        };
        let generation = self.live_generation;
        let store = Arc::clone(&self.store);
        let tx = self.tx.clone();
        let waker = self.waker.clone();
        self.live_pending = spawn("live-fetch", move || {
            let result = store.list_tasks(scope.project_id, scope.category);
            let _ = tx.send(FeedMessage::Live { generation, result });
            if let Some(wake) = waker {
                wake();
            }
        });
    }

    /// Apply finished fetches and react to store changes and the refresh
    /// timer. Returns true when the merged list changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.rx.try_recv() {
            changed |= self.apply(message);
        }

        let mut refetch = false;
        if let Some(rx) = &self.task_changes {
            while let Ok(event) = rx.try_recv() {
                tracing::debug!(?event, "task change notification");
                refetch = true;
            }
        }
        while let Ok(event) = self.people_changes.try_recv() {
            tracing::debug!(?event, "people change notification");
            refetch = true;
        }
        if refetch {
            self.refresh_live();
        }

        if let Some(interval) = self.refresh_interval {
            if !self.is_loading() && self.last_refresh.elapsed() >= interval {
                tracing::debug!("auto-refresh");
                self.refresh();
            }
        }
        changed
    }

    fn apply(&mut self, message: FeedMessage) -> bool {
        match message {
            FeedMessage::Template { generation, result } => {
                if generation != self.template_generation {
                    tracing::warn!(generation, current = self.template_generation, "dropping stale template result");
                    return false;
                }
                self.template_pending = false;
                match result {
                    Ok(rows) => {
                        tracing::info!(rows = rows.len(), "template loaded");
                        self.rows = rows;
                        self.template_error = None;
                    }
                    Err(e) => {
                        if matches!(e, SheetError::NotConfigured) {
                            tracing::info!("no template source configured");
                        } else {
                            tracing::error!(error = %e, "template fetch failed");
                        }
                        self.rows.clear();
                        self.template_error = Some(e.to_string());
                    }
                }
                self.rebuild_template();
            }
            FeedMessage::Live { generation, result } => {
                if generation != self.live_generation {
                    tracing::warn!(generation, current = self.live_generation, "dropping stale live result");
                    return false;
                }
                self.live_pending = false;
                match result {
                    Ok(tasks) => {
                        tracing::info!(tasks = tasks.len(), "live tasks loaded");
                        self.live = tasks;
                        self.live_error = None;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "live fetch failed");
                        self.live_error = Some(e.to_string());
                    }
                }
                self.remerge();
            }
        }
        true
    }

    fn rebuild_template(&mut self) {
        self.template = match self.open_date {
            Some(open_date) => build_template_set(&self.rows, open_date),
            None => TemplateSet::default(),
        };
        self.remerge();
    }

    fn remerge(&mut self) {
        let template = match self.scope {
            Some(scope) => self.template.tasks_for(scope.category),
            None => &[],
        };
        let live: &[Task] = if self.scope.is_some() { &self.live } else { &[] };
        self.merged = merge(template, live);
    }

    /// Show an edit immediately; the next live fetch confirms it.
    /// `replaces` is the id the task had before (differs after promotion).
    pub fn apply_local(&mut self, replaces: Uuid, task: Task) {
        if let Some(existing) = self.live.iter_mut().find(|t| t.id == replaces || t.id == task.id) {
            *existing = task;
        } else {
            self.live.push(task);
        }
        self.remerge();
    }

    /// The merged task list for the current scope.
    pub fn tasks(&self) -> &[Task] {
        &self.merged
    }

    pub fn task(&self, id: Uuid) -> Option<&Task> {
        self.merged.iter().find(|t| t.id == id)
    }

    pub fn template_error(&self) -> Option<&str> {
        self.template_error.as_deref()
    }

    pub fn live_error(&self) -> Option<&str> {
        self.live_error.as_deref()
    }

    pub fn template_warnings(&self) -> &[String] {
        &self.template.warnings
    }

    pub fn template_row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_loading(&self) -> bool {
        self.template_pending || self.live_pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::sheet_import::SheetSubTask;
    use crate::model::TaskOrigin;
    use crate::store::{NewTask, PromotionEdit, SqliteStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn sheet_row(name: &str, order: i64) -> SheetTask {
        SheetTask {
            category: "連絡系".into(),
            display_order: Some(order),
            main_task: name.into(),
            sub_tasks: vec![SheetSubTask {
                name: "確認".into(),
                completed: false,
            }],
            period: 5,
            from_open: 30,
        }
    }

    struct StubSource {
        rows: Vec<SheetTask>,
    }

    impl TemplateSource for StubSource {
        fn fetch(&self) -> Result<Vec<SheetTask>, SheetError> {
            Ok(self.rows.clone())
        }

        fn describe(&self) -> String {
            "stub".into()
        }
    }

    struct FailingSource;

    impl TemplateSource for FailingSource {
        fn fetch(&self) -> Result<Vec<SheetTask>, SheetError> {
            Err(SheetError::Status(503))
        }

        fn describe(&self) -> String {
            "failing".into()
        }
    }

    /// First call is slow and returns an outdated row.
    struct SlowThenFast {
        calls: AtomicUsize,
    }

    impl TemplateSource for SlowThenFast {
        fn fetch(&self) -> Result<Vec<SheetTask>, SheetError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                thread::sleep(Duration::from_millis(200));
                Ok(vec![sheet_row("old", 1)])
            } else {
                Ok(vec![sheet_row("new", 1)])
            }
        }

        fn describe(&self) -> String {
            "slow".into()
        }
    }

    struct CountingSource {
        calls: AtomicUsize,
    }

    impl TemplateSource for CountingSource {
        fn fetch(&self) -> Result<Vec<SheetTask>, SheetError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![sheet_row("契約手続き", 1)])
        }

        fn describe(&self) -> String {
            "counting".into()
        }
    }

    fn settle(feed: &mut CategoryFeed) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            feed.poll();
            if !feed.is_loading() {
                break;
            }
            assert!(Instant::now() < deadline, "feed did not settle");
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn setup(source: Arc<dyn TemplateSource>) -> (Arc<SqliteStore>, CategoryFeed, FeedScope) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let project = store.add_project("新宿店").unwrap();
        let scope = FeedScope {
            project_id: project.id,
            category: Category::Communication,
        };
        let feed = CategoryFeed::new(store.clone(), source, None);
        (store, feed, scope)
    }

    fn names(feed: &CategoryFeed) -> Vec<&str> {
        feed.tasks().iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn template_failure_shows_live_tasks_only() {
        let (store, mut feed, scope) = setup(Arc::new(FailingSource));
        store
            .add_task(
                scope.project_id,
                scope.category,
                NewTask {
                    name: "独自タスク".into(),
                    start: d(2024, 9, 1),
                    end: d(2024, 9, 2),
                    assigned_person_id: None,
                    order_index: None,
                },
            )
            .unwrap();

        feed.select(Some(scope), Some(d(2024, 10, 1)));
        feed.refresh_template();
        settle(&mut feed);

        assert_eq!(names(&feed), vec!["独自タスク"]);
        assert!(feed.template_error().unwrap().contains("503"));
        assert!(feed.live_error().is_none());
    }

    #[test]
    fn live_copy_suppresses_template_row() {
        let source = Arc::new(StubSource {
            rows: vec![sheet_row("契約手続き", 1), sheet_row("鍵受領", 2)],
        });
        let (store, mut feed, scope) = setup(source);
        feed.select(Some(scope), Some(d(2024, 10, 1)));
        feed.refresh_template();
        settle(&mut feed);
        assert_eq!(names(&feed), vec!["契約手続き", "鍵受領"]);
        assert!(feed.tasks().iter().all(Task::is_template));

        let template = feed.tasks()[0].clone();
        assert_eq!((template.start, template.end), (d(2024, 9, 1), d(2024, 9, 5)));
        store
            .promote_task(scope.project_id, &template, PromotionEdit::ToggleSubTask(template.sub_tasks()[0].id))
            .unwrap();
        settle(&mut feed);

        assert_eq!(names(&feed), vec!["契約手続き", "鍵受領"]);
        let promoted = &feed.tasks()[0];
        assert_eq!(promoted.origin, TaskOrigin::Live);
        assert_eq!(promoted.progress(), 100);
        assert_eq!(feed.tasks().len(), 2);
    }

    #[test]
    fn stale_template_result_is_dropped() {
        let source = Arc::new(SlowThenFast {
            calls: AtomicUsize::new(0),
        });
        let (_store, mut feed, scope) = setup(source);
        feed.select(Some(scope), Some(d(2024, 10, 1)));
        feed.refresh_template();
        feed.refresh_template();
        settle(&mut feed);
        thread::sleep(Duration::from_millis(300));
        feed.poll();
        assert_eq!(names(&feed), vec!["new"]);
    }

    #[test]
    fn open_date_change_reschedules_without_refetch() {
        let source = Arc::new(StubSource {
            rows: vec![sheet_row("契約手続き", 1)],
        });
        let (_store, mut feed, scope) = setup(source);
        feed.select(Some(scope), None);
        feed.refresh_template();
        settle(&mut feed);
        assert!(feed.tasks().is_empty());

        feed.select(Some(scope), Some(d(2024, 10, 1)));
        assert!(!feed.is_loading());
        assert_eq!(feed.tasks()[0].start, d(2024, 9, 1));
    }

    #[test]
    fn interval_elapsing_refetches_both_sources() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let project = store.add_project("渋谷店").unwrap();
        let scope = FeedScope {
            project_id: project.id,
            category: Category::Communication,
        };
        let mut feed = CategoryFeed::new(
            store.clone(),
            source.clone(),
            Some(Duration::from_millis(200)),
        );
        feed.select(Some(scope), Some(d(2024, 10, 1)));
        feed.refresh_template();
        settle(&mut feed);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        // Nothing is due before the interval
        feed.poll();
        assert!(!feed.is_loading());

        thread::sleep(Duration::from_millis(250));
        feed.poll();
        assert!(feed.is_loading());
        settle(&mut feed);
        assert!(source.calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(names(&feed), vec!["契約手続き"]);
    }

    #[test]
    fn people_change_refetches_live_tasks() {
        let (store, mut feed, scope) = setup(Arc::new(StubSource { rows: Vec::new() }));
        feed.select(Some(scope), None);
        settle(&mut feed);

        store.add_person("花子", "山田").unwrap();
        feed.poll();
        assert!(feed.is_loading());
        settle(&mut feed);
    }

    #[test]
    fn other_categories_do_not_trigger_refetch() {
        let (store, mut feed, scope) = setup(Arc::new(StubSource { rows: Vec::new() }));
        feed.select(Some(scope), None);
        settle(&mut feed);

        let other = NewTask {
            name: "x".into(),
            start: d(2024, 9, 1),
            end: d(2024, 9, 1),
            assigned_person_id: None,
            order_index: None,
        };
        store.add_task(scope.project_id, Category::Training, other.clone()).unwrap();
        feed.poll();
        assert!(!feed.is_loading());

        store.add_task(scope.project_id, scope.category, other).unwrap();
        feed.poll();
        assert!(feed.is_loading());
        settle(&mut feed);
        assert_eq!(names(&feed), vec!["x"]);
    }
}
