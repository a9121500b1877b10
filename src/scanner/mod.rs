//! Concurrent, resumable ingestion of an image tree into the catalog.
//!
//! Candidates are pulled one at a time under a dispatch lock that also
//! applies cancellation, the per-run limit and the "already cataloged"
//! check. Reading, metadata and feature extraction happen outside any lock
//! on a pool of `concurrency` workers; each result is committed as one
//! catalog transaction. Per-file failures are counted and logged, never
//! propagated.

pub mod discovery;
pub mod metadata;

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::config::ScannerConfig;
use crate::db::{Catalog, ItemId, NewItem};
use crate::error::{CatalogError, ExtractError, IngestError};
use crate::faces::FeatureExtractor;

pub use discovery::{discover_images, Candidate, Candidates};
pub use metadata::{extract_metadata, ItemMetadata};

/// Per-file events, sent as they happen
#[derive(Debug, Clone)]
pub enum IngestProgress {
    Committed { path: String, item_id: ItemId, faces: usize },
    AlreadyCataloged { path: String },
    Duplicate { path: String },
    Failed { path: String, message: String },
}

/// Counters for one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Candidate files pulled from the walk.
    pub discovered: usize,
    pub already_cataloged: usize,
    /// Items committed by this run.
    pub ingested: usize,
    pub faces_found: usize,
    /// Committed items in which no face was found.
    pub no_faces: usize,
    pub failed: usize,
    /// Items another writer committed between the check and the commit.
    pub duplicates: usize,
    pub walk_errors: usize,
    /// Files skipped because their path is not valid UTF-8.
    pub non_utf8_paths: usize,
    pub cancelled: bool,
    pub limit_reached: bool,
}

struct Dispatch {
    candidates: Candidates,
    dispatched: usize,
    summary: IngestSummary,
    fatal: Option<CatalogError>,
}

struct Extracted {
    item: NewItem,
    embeddings: Vec<Vec<f32>>,
}

pub struct Walker {
    extensions: Vec<String>,
    concurrency: usize,
    limit: Option<usize>,
}

impl Walker {
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            extensions: config.image_extensions.clone(),
            concurrency: config.concurrency.max(1),
            limit: config.limit,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Cap on extractions dispatched by one run. `None` is unlimited.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Ingest every new image under `root`.
    ///
    /// Returns once all dispatched work has been committed or recorded as
    /// failed. Only an unreadable root or a catalog failure ends the run
    /// with an error.
    pub fn ingest(
        &self,
        root: &Path,
        catalog: &Catalog,
        extractor: &dyn FeatureExtractor,
        cancel: &CancelToken,
        progress_tx: Option<mpsc::Sender<IngestProgress>>,
    ) -> Result<IngestSummary, IngestError> {
        let root = resolve_root(root)?;

        info!(root = %root.display(), concurrency = self.concurrency, limit = ?self.limit, "Starting ingest");

        let dispatch = Mutex::new(Dispatch {
            candidates: discover_images(&root, &self.extensions),
            dispatched: 0,
            summary: IngestSummary::default(),
            fatal: None,
        });

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .thread_name(|i| format!("facegroup-ingest-{}", i))
            .build()
            .map_err(|e| IngestError::Pool(e.to_string()))?;

        pool.scope(|scope| {
            let dispatch = &dispatch;
            for _ in 0..self.concurrency {
                let tx = progress_tx.clone();
                scope.spawn(move |_| self.worker(dispatch, catalog, extractor, cancel, tx));
            }
        });

        let state = dispatch.into_inner().unwrap_or_else(PoisonError::into_inner);
        let mut summary = state.summary;
        summary.walk_errors = state.candidates.walk_errors();
        summary.non_utf8_paths = state.candidates.non_utf8_paths();

        if let Some(source) = state.fatal {
            return Err(IngestError::Catalog {
                source,
                summary: Box::new(summary),
            });
        }

        info!(
            discovered = summary.discovered,
            ingested = summary.ingested,
            already_cataloged = summary.already_cataloged,
            failed = summary.failed,
            faces = summary.faces_found,
            cancelled = summary.cancelled,
            "Ingest finished"
        );
        Ok(summary)
    }

    fn worker(
        &self,
        dispatch: &Mutex<Dispatch>,
        catalog: &Catalog,
        extractor: &dyn FeatureExtractor,
        cancel: &CancelToken,
        tx: Option<mpsc::Sender<IngestProgress>>,
    ) {
        while let Some(candidate) = self.next_job(dispatch, catalog, cancel, &tx) {
            let outcome = process_file(&candidate.path, &candidate.key, extractor);
            commit(dispatch, catalog, candidate.key, outcome, &tx);
        }
    }

    /// Next file to extract, or `None` when the worker should stop.
    fn next_job(
        &self,
        dispatch: &Mutex<Dispatch>,
        catalog: &Catalog,
        cancel: &CancelToken,
        tx: &Option<mpsc::Sender<IngestProgress>>,
    ) -> Option<Candidate> {
        let mut state = lock(dispatch);
        loop {
            if state.fatal.is_some() {
                return None;
            }
            if cancel.is_cancelled() {
                state.summary.cancelled = true;
                return None;
            }
            if self.limit.is_some_and(|limit| state.dispatched >= limit) {
                state.summary.limit_reached = true;
                return None;
            }

            let candidate = state.candidates.next()?;
            state.summary.discovered += 1;

            match catalog.has(&candidate.key) {
                Ok(true) => {
                    state.summary.already_cataloged += 1;
                    send(tx, IngestProgress::AlreadyCataloged { path: candidate.key });
                }
                Ok(false) => {
                    state.dispatched += 1;
                    return Some(candidate);
                }
                Err(e) => {
                    error!(error = %e, "Catalog lookup failed, stopping ingest");
                    state.fatal = Some(e);
                    return None;
                }
            }
        }
    }
}

/// Absolute, symlink-free form of an ingest root. Item keys and the run
/// history both use it.
pub fn resolve_root(root: &Path) -> Result<PathBuf, IngestError> {
    root.canonicalize().map_err(|source| IngestError::Root {
        path: root.to_path_buf(),
        source,
    })
}

fn lock(dispatch: &Mutex<Dispatch>) -> MutexGuard<'_, Dispatch> {
    dispatch.lock().unwrap_or_else(PoisonError::into_inner)
}

fn send(tx: &Option<mpsc::Sender<IngestProgress>>, event: IngestProgress) {
    if let Some(tx) = tx {
        let _ = tx.send(event);
    }
}

fn process_file(path: &Path, key: &str, extractor: &dyn FeatureExtractor) -> Result<Extracted, ExtractError> {
    let bytes = std::fs::read(path).map_err(|e| ExtractError::UnreadableImage(e.to_string()))?;
    let metadata = extract_metadata(path, &bytes);

    let embeddings = panic::catch_unwind(AssertUnwindSafe(|| extractor.extract(&bytes)))
        .map_err(|_| ExtractError::Model("extractor panicked".to_string()))??;

    let item = NewItem::new(key)
        .with_captured_at(metadata.captured_at.clone())
        .with_metadata(metadata.to_json());

    Ok(Extracted { item, embeddings })
}

fn commit(
    dispatch: &Mutex<Dispatch>,
    catalog: &Catalog,
    key: String,
    outcome: Result<Extracted, ExtractError>,
    tx: &Option<mpsc::Sender<IngestProgress>>,
) {
    let extracted = match outcome {
        Ok(extracted) => extracted,
        Err(e) => {
            warn!(path = %key, error = %e, "Skipping file");
            lock(dispatch).summary.failed += 1;
            send(tx, IngestProgress::Failed { path: key, message: e.to_string() });
            return;
        }
    };

    let faces = extracted.embeddings.len();
    match catalog.put(&extracted.item, &extracted.embeddings) {
        Ok(item_id) => {
            debug!(path = %key, item_id, faces, "Cataloged");
            {
                let mut state = lock(dispatch);
                state.summary.ingested += 1;
                state.summary.faces_found += faces;
                if faces == 0 {
                    state.summary.no_faces += 1;
                }
            }
            send(tx, IngestProgress::Committed { path: key, item_id, faces });
        }
        Err(CatalogError::DuplicateItem(_)) => {
            debug!(path = %key, "Already cataloged by another writer");
            lock(dispatch).summary.duplicates += 1;
            send(tx, IngestProgress::Duplicate { path: key });
        }
        Err(e) => {
            error!(path = %key, error = %e, "Catalog write failed, stopping ingest");
            lock(dispatch).fatal.get_or_insert(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    /// Test images are text files: `;`-separated faces of `,`-separated
    /// floats. An empty file has no faces; "corrupt" is unreadable.
    fn text_extractor(bytes: &[u8]) -> Result<Vec<Vec<f32>>, ExtractError> {
        let text = std::str::from_utf8(bytes).map_err(|e| ExtractError::UnreadableImage(e.to_string()))?;
        if text.trim() == "corrupt" {
            return Err(ExtractError::UnreadableImage("corrupt".to_string()));
        }
        Ok(text
            .split(';')
            .filter(|face| !face.trim().is_empty())
            .map(|face| face.split(',').map(|v| v.trim().parse().unwrap_or(0.0)).collect())
            .collect())
    }

    fn walker(concurrency: usize) -> Walker {
        Walker::new(&ScannerConfig::default()).with_concurrency(concurrency)
    }

    fn catalog() -> Catalog {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.initialize().unwrap();
        catalog
    }

    fn photo_tree(valid: usize) -> TempDir {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        for i in 0..valid {
            let sub = if i % 2 == 0 { "" } else { "nested/" };
            fs::write(dir.path().join(format!("{}img{:02}.jpg", sub, i)), format!("{},1.0", i)).unwrap();
        }
        dir
    }

    #[test]
    fn test_corrupt_file_is_counted_not_fatal() {
        let dir = photo_tree(10);
        fs::write(dir.path().join("broken.jpg"), "corrupt").unwrap();
        let catalog = catalog();

        let summary = walker(3)
            .ingest(dir.path(), &catalog, &text_extractor, &CancelToken::new(), None)
            .unwrap();

        assert_eq!(summary.discovered, 11);
        assert_eq!(summary.ingested, 10);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.faces_found, 10);
        assert_eq!(catalog.item_count().unwrap(), 10);
        assert_eq!(catalog.embedding_count().unwrap(), 10);
    }

    #[test]
    fn test_second_run_ingests_nothing() {
        let dir = photo_tree(6);
        let catalog = catalog();
        let cancel = CancelToken::new();

        walker(2).ingest(dir.path(), &catalog, &text_extractor, &cancel, None).unwrap();
        let again = walker(2).ingest(dir.path(), &catalog, &text_extractor, &cancel, None).unwrap();

        assert_eq!(again.ingested, 0);
        assert_eq!(again.already_cataloged, 6);
        assert_eq!(catalog.item_count().unwrap(), 6);
        assert_eq!(catalog.embedding_count().unwrap(), 6);
    }

    #[test]
    fn test_items_are_keyed_by_canonical_path() {
        let dir = photo_tree(1);
        let catalog = catalog();
        let dotted = dir.path().join("nested").join("..");

        walker(1).ingest(&dotted, &catalog, &text_extractor, &CancelToken::new(), None).unwrap();

        let canonical = dir.path().canonicalize().unwrap().join("img00.jpg");
        assert!(catalog.has(&canonical.to_string_lossy()).unwrap());
    }

    #[test]
    fn test_resolved_root_prefixes_item_keys() {
        let dir = photo_tree(1);
        let catalog = catalog();
        let dotted = dir.path().join("nested").join("..");

        let root = resolve_root(&dotted).unwrap();
        assert!(root.is_absolute());
        assert!(!root.to_str().unwrap().contains(".."));

        walker(1).ingest(&dotted, &catalog, &text_extractor, &CancelToken::new(), None).unwrap();
        let run_id = catalog.begin_ingest_run(root.to_str().unwrap()).unwrap();
        let recorded = catalog.recent_ingest_runs(1).unwrap().remove(0);

        assert_eq!(recorded.id, run_id);
        assert!(catalog.has(root.join("img00.jpg").to_str().unwrap()).unwrap());
        assert!(root.join("img00.jpg").starts_with(&recorded.root));
    }

    #[test]
    fn test_items_without_faces_are_cataloged() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("empty.jpg"), "").unwrap();
        fs::write(dir.path().join("two.png"), "1,0;0,1").unwrap();
        fs::write(dir.path().join("notes.txt"), "1,0").unwrap();
        let catalog = catalog();

        let summary = walker(2)
            .ingest(dir.path(), &catalog, &text_extractor, &CancelToken::new(), None)
            .unwrap();

        assert_eq!(summary.discovered, 2);
        assert_eq!(summary.ingested, 2);
        assert_eq!(summary.no_faces, 1);
        assert_eq!(summary.faces_found, 2);
    }

    #[test]
    fn test_limit_caps_extractions_and_resumes() {
        let dir = photo_tree(7);
        let catalog = catalog();
        let cancel = CancelToken::new();

        let first = walker(2)
            .with_limit(Some(3))
            .ingest(dir.path(), &catalog, &text_extractor, &cancel, None)
            .unwrap();
        assert_eq!(first.ingested, 3);
        assert!(first.limit_reached);

        let rest = walker(2).ingest(dir.path(), &catalog, &text_extractor, &cancel, None).unwrap();
        assert_eq!(rest.already_cataloged, 3);
        assert_eq!(rest.ingested, 4);
        assert_eq!(catalog.item_count().unwrap(), 7);
    }

    #[test]
    fn test_cancel_before_start_dispatches_nothing() {
        let dir = photo_tree(4);
        let catalog = catalog();
        let cancel = CancelToken::new();
        cancel.cancel();

        let summary = walker(2).ingest(dir.path(), &catalog, &text_extractor, &cancel, None).unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.ingested, 0);
        assert_eq!(catalog.item_count().unwrap(), 0);
    }

    #[test]
    fn test_in_flight_work_commits_after_cancel() {
        let dir = photo_tree(5);
        let catalog = catalog();
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let cancelling = move |bytes: &[u8]| {
            trigger.cancel();
            text_extractor(bytes)
        };

        let summary = walker(1).ingest(dir.path(), &catalog, &cancelling, &cancel, None).unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.ingested, 1);
        assert_eq!(catalog.item_count().unwrap(), 1);
    }

    #[test]
    fn test_panicking_extractor_is_isolated() {
        let dir = photo_tree(4);
        let catalog = catalog();
        let flaky = |bytes: &[u8]| {
            if bytes.starts_with(b"2,") {
                panic!("model crashed");
            }
            text_extractor(bytes)
        };

        let summary = walker(2).ingest(dir.path(), &catalog, &flaky, &CancelToken::new(), None).unwrap();
        assert_eq!(summary.ingested, 3);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_concurrency_is_bounded() {
        let dir = photo_tree(12);
        let catalog = catalog();
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let slow = |bytes: &[u8]| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(15));
            active.fetch_sub(1, Ordering::SeqCst);
            text_extractor(bytes)
        };

        let summary = walker(3).ingest(dir.path(), &catalog, &slow, &CancelToken::new(), None).unwrap();
        assert_eq!(summary.ingested, 12);
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 3);
        assert!(peak > 1, "workers never overlapped");
    }

    #[test]
    fn test_progress_events() {
        let dir = photo_tree(3);
        fs::write(dir.path().join("broken.jpg"), "corrupt").unwrap();
        let catalog = catalog();
        let (tx, rx) = mpsc::channel();

        walker(2)
            .ingest(dir.path(), &catalog, &text_extractor, &CancelToken::new(), Some(tx))
            .unwrap();

        let events: Vec<IngestProgress> = rx.iter().collect();
        let committed = events.iter().filter(|e| matches!(e, IngestProgress::Committed { .. })).count();
        let failed = events.iter().filter(|e| matches!(e, IngestProgress::Failed { .. })).count();
        assert_eq!((committed, failed), (3, 1));
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = tempdir().unwrap();
        let result = walker(1).ingest(
            &dir.path().join("absent"),
            &catalog(),
            &text_extractor,
            &CancelToken::new(),
            None,
        );
        assert!(matches!(result, Err(IngestError::Root { .. })));
    }

    #[test]
    fn test_concurrent_walkers_catalog_each_file_once() {
        let dir = photo_tree(40);
        let catalog = catalog();
        let slow = |bytes: &[u8]| {
            std::thread::sleep(Duration::from_millis(2));
            text_extractor(bytes)
        };

        let (a, b) = std::thread::scope(|s| {
            let first = s.spawn(|| walker(4).ingest(dir.path(), &catalog, &slow, &CancelToken::new(), None));
            let second = s.spawn(|| walker(4).ingest(dir.path(), &catalog, &slow, &CancelToken::new(), None));
            (first.join().unwrap().unwrap(), second.join().unwrap().unwrap())
        });

        assert_eq!(catalog.item_count().unwrap(), 40);
        assert_eq!(catalog.embedding_count().unwrap(), 40);
        assert_eq!(a.ingested + b.ingested, 40);
        for run in [&a, &b] {
            assert_eq!(run.discovered, 40);
            assert_eq!(run.failed, 0);
            assert_eq!(run.ingested + run.already_cataloged + run.duplicates, 40);
        }
    }

    #[test]
    fn test_item_committed_by_another_writer_is_a_duplicate() {
        let dir = photo_tree(2);
        fs::write(dir.path().join("race.jpg"), "race").unwrap();
        let catalog = catalog();
        let raced = dir.path().canonicalize().unwrap().join("race.jpg");
        let raced_key = raced.to_str().unwrap().to_string();
        // Another writer commits the item while it is being extracted
        let racing = |bytes: &[u8]| {
            if bytes == b"race" {
                catalog.put(&NewItem::new(raced_key.clone()), &[]).unwrap();
                return Ok(vec![vec![1.0, 0.0]]);
            }
            text_extractor(bytes)
        };
        let (tx, rx) = mpsc::channel();

        let summary = walker(1).ingest(dir.path(), &catalog, &racing, &CancelToken::new(), Some(tx)).unwrap();

        assert_eq!(summary.discovered, 3);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.ingested, 2);
        assert_eq!(summary.faces_found, 2);
        assert_eq!(catalog.item_count().unwrap(), 3);
        // The other writer's record wins; the losing embeddings are not stored
        assert_eq!(catalog.embedding_count().unwrap(), 2);

        let duplicates: Vec<String> = rx
            .iter()
            .filter_map(|e| match e {
                IngestProgress::Duplicate { path } => Some(path),
                _ => None,
            })
            .collect();
        assert_eq!(duplicates, vec![raced_key]);
    }

    #[test]
    fn test_catalog_failure_returns_partial_summary() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.jpg"), "1,0").unwrap();
        fs::write(dir.path().join("b.jpg"), "drop").unwrap();
        let catalog = catalog();
        let breaking = |bytes: &[u8]| {
            if bytes == b"drop" {
                catalog.conn().execute_batch("DROP TABLE embeddings").unwrap();
                return Ok(vec![vec![0.0, 1.0]]);
            }
            text_extractor(bytes)
        };

        let result = walker(1).ingest(dir.path(), &catalog, &breaking, &CancelToken::new(), None);

        let err = result.unwrap_err();
        let partial = err.partial_summary().cloned().unwrap();
        assert!(matches!(err, IngestError::Catalog { .. }));
        assert_eq!(partial.discovered, 2);
        assert_eq!(partial.ingested, 1);
        assert_eq!(partial.faces_found, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_paths_are_not_cataloged() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempdir().unwrap();
        fs::write(dir.path().join(OsStr::from_bytes(b"a\xff.jpg")), "1,0").unwrap();
        fs::write(dir.path().join(OsStr::from_bytes(b"a\xfe.jpg")), "0,1").unwrap();
        fs::write(dir.path().join("b.jpg"), "1,1").unwrap();
        let catalog = catalog();

        let summary = walker(2)
            .ingest(dir.path(), &catalog, &text_extractor, &CancelToken::new(), None)
            .unwrap();

        assert_eq!(summary.non_utf8_paths, 2);
        assert_eq!(summary.discovered, 1);
        assert_eq!(summary.ingested, 1);
        assert_eq!(summary.duplicates, 0);
        assert_eq!(catalog.item_count().unwrap(), 1);
    }
}
