//! Cache-driven execution of a unit of work
//!
//! [`CacheController::execute`] is the state machine: consult the store,
//! restore on a hit, run the work on a miss, pack and publish on success.
//! Storage faults and restore inconsistencies are logged and absorbed; they
//! never change the outcome of the underlying work. Validation, protocol and
//! archive-integrity errors propagate.

use crate::outcome::{Outcome, WorkReport};
use kiln_archive::{IncludeSet, pack, unpack};
use kiln_core::{BundleConfig, CacheKey, Error, Result, validate_file_name};
use kiln_fingerprint::FingerprintInput;
use kiln_store::CacheStore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Entry file listing the bundles a stored result consists of
pub const ARTIFACTS_FILE: &str = "artifacts.json";

/// Entry file holding the canonical fingerprint text, for inspection only
pub const FINGERPRINT_FILE: &str = "fingerprint.txt";

/// One packed bundle of a stored result. The restore path fetches exactly
/// the files listed in `artifacts.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputArtifact {
    /// Bundle file name under the entry, e.g. `classes.tar.zst`
    pub file_name: String,
    /// Number of files packed into the bundle
    pub file_count: u64,
    /// Total payload size before compression
    pub uncompressed_size: u64,
    /// Size of the packed container
    pub compressed_size: u64,
}

/// The narrow capability surface a unit of work exposes to the cache.
pub trait CacheableWork {
    /// Directory the work writes its outputs under; bundles are selected
    /// from and restored into this tree.
    fn output_dir(&self) -> &Path;

    /// Invocation argument line, if any; feeds the fingerprint.
    fn arg_line(&self) -> Option<&str> {
        None
    }

    /// Whether this particular work opted out of caching.
    fn is_skipped(&self) -> bool {
        false
    }

    /// Actually perform the work.
    fn run(&mut self) -> Result<WorkReport>;
}

/// Outcome plus the report the work produced (zeroed when the work never ran).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Execution {
    pub outcome: Outcome,
    pub report: WorkReport,
}

/// Drives units of work through the cache.
pub struct CacheController<S> {
    store: S,
    bundles: Vec<BundleConfig>,
    bypass: bool,
}

impl<S: CacheStore> CacheController<S> {
    pub fn new(store: S, bundles: Vec<BundleConfig>) -> Self {
        Self {
            store,
            bundles,
            bypass: false,
        }
    }

    /// Skip the cache entirely; work always runs and nothing is stored.
    #[must_use]
    pub fn with_bypass(mut self, bypass: bool) -> Self {
        self.bypass = bypass;
        self
    }

    /// Run `work` under `key`, restoring from the cache when possible and
    /// publishing the outputs when the work succeeds.
    pub fn execute(
        &self,
        key: &CacheKey,
        input: &FingerprintInput,
        work: &mut dyn CacheableWork,
    ) -> Result<Execution> {
        if self.bypass || work.is_skipped() {
            tracing::debug!(key = %key.canonical(), "Cache bypassed");
            let report = work.run()?;
            let outcome = if report.failures > 0 {
                Outcome::Failed
            } else {
                Outcome::SkippedCache
            };
            return Ok(Execution { outcome, report });
        }

        if let Some(artifacts) = self.read_artifacts(key)?
            && self.restore_all(key, &artifacts, work.output_dir())?
        {
            tracing::info!(key = %key.canonical(), bundles = artifacts.len(), "Restored from cache");
            return Ok(Execution {
                outcome: Outcome::FromCache,
                report: WorkReport::default(),
            });
        }

        let report = work.run()?;
        if report.failures > 0 {
            return Ok(Execution {
                outcome: Outcome::Failed,
                report,
            });
        }
        if report.completed_units == 0 {
            return Ok(Execution {
                outcome: Outcome::Empty,
                report,
            });
        }

        self.store_entry(key, input, work.output_dir())?;
        Ok(Execution {
            outcome: Outcome::Stored,
            report,
        })
    }

    /// Fetch and parse the output record. Storage faults demote to a miss.
    fn read_artifacts(&self, key: &CacheKey) -> Result<Option<Vec<OutputArtifact>>> {
        let bytes = match self.store.read(key, ARTIFACTS_FILE) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(None),
            Err(e) if e.is_storage_fault() => {
                tracing::warn!(key = %key.canonical(), error = %e, "Cache lookup failed, treating as miss");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        match serde_json::from_slice(&bytes) {
            Ok(artifacts) => Ok(Some(artifacts)),
            Err(e) => {
                // A corrupt record is as good as absent.
                tracing::warn!(key = %key.canonical(), error = %e, "Unreadable output record, treating as miss");
                Ok(None)
            }
        }
    }

    /// Restore every listed bundle into `output_dir`. `Ok(false)` means an
    /// inconsistency (a listed bundle is gone, e.g. evicted underneath us)
    /// and the caller falls back to running the work.
    fn restore_all(
        &self,
        key: &CacheKey,
        artifacts: &[OutputArtifact],
        output_dir: &Path,
    ) -> Result<bool> {
        let staging = tempfile::tempdir().map_err(|e| Error::io(e, Path::new("."), "tempdir"))?;
        for artifact in artifacts {
            let bytes = match self.store.read(key, &artifact.file_name) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    tracing::warn!(
                        key = %key.canonical(),
                        bundle = %artifact.file_name,
                        "Listed bundle missing from store, falling back to execution"
                    );
                    return Ok(false);
                }
                Err(e) if e.is_storage_fault() => {
                    tracing::warn!(
                        key = %key.canonical(),
                        bundle = %artifact.file_name,
                        error = %e,
                        "Bundle fetch failed, falling back to execution"
                    );
                    return Ok(false);
                }
                Err(e) => return Err(e),
            };
            let packed = staging.path().join(&artifact.file_name);
            fs::write(&packed, &bytes).map_err(|e| Error::io(e, &packed, "write"))?;
            unpack(&packed, output_dir)?;
        }
        Ok(true)
    }

    /// Pack the configured bundles out of `output_dir` and publish them
    /// together with the output record and the fingerprint document.
    fn store_entry(
        &self,
        key: &CacheKey,
        input: &FingerprintInput,
        output_dir: &Path,
    ) -> Result<()> {
        let staging = tempfile::tempdir().map_err(|e| Error::io(e, Path::new("."), "tempdir"))?;
        let mut artifacts = Vec::new();
        for bundle in &self.bundles {
            let includes = IncludeSet::new(&bundle.includes)?;
            let files = includes.select(output_dir)?;
            if files.is_empty() {
                tracing::debug!(bundle = %bundle.name, "No files matched, bundle skipped");
                continue;
            }
            let file_name = format!("{}.tar.zst", bundle.name);
            validate_file_name(&file_name)?;
            let packed = staging.path().join(&file_name);
            let summary = pack(output_dir, &files, &packed)?;
            let bytes = fs::read(&packed).map_err(|e| Error::io(e, &packed, "read"))?;
            self.write_logged(key, &file_name, &bytes)?;
            artifacts.push(OutputArtifact {
                file_name,
                file_count: summary.file_count,
                uncompressed_size: summary.uncompressed_size,
                compressed_size: summary.compressed_size,
            });
        }

        self.write_logged(key, FINGERPRINT_FILE, input.canonical_text().as_bytes())?;
        let record = serde_json::to_vec_pretty(&artifacts)
            .map_err(|e| Error::serialization(format!("encoding output record failed: {e}")))?;
        self.write_logged(key, ARTIFACTS_FILE, &record)?;
        tracing::info!(key = %key.canonical(), bundles = artifacts.len(), "Stored cache entry");
        Ok(())
    }

    /// Publish one file; storage faults are logged, everything else
    /// propagates.
    fn write_logged(&self, key: &CacheKey, file_name: &str, bytes: &[u8]) -> Result<()> {
        match self.store.write(key, file_name, bytes) {
            Ok(evicted) => {
                if evicted > 0 {
                    tracing::debug!(key = %key.canonical(), file = file_name, evicted, "Write evicted older entries");
                }
                Ok(())
            }
            Err(e) if e.is_storage_fault() => {
                tracing::warn!(key = %key.canonical(), file = file_name, error = %e, "Cache write failed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_store::MemoryStore;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;

    struct FakeWork {
        output_dir: PathBuf,
        report: WorkReport,
        runs: u64,
        skipped: bool,
    }

    impl FakeWork {
        fn new(output_dir: &Path) -> Self {
            Self {
                output_dir: output_dir.to_path_buf(),
                report: WorkReport {
                    completed_units: 3,
                    failures: 0,
                },
                runs: 0,
                skipped: false,
            }
        }
    }

    impl CacheableWork for FakeWork {
        fn output_dir(&self) -> &Path {
            &self.output_dir
        }

        fn is_skipped(&self) -> bool {
            self.skipped
        }

        fn run(&mut self) -> Result<WorkReport> {
            self.runs += 1;
            if self.report.completed_units > 0 {
                fs::create_dir_all(self.output_dir.join("com/acme")).unwrap();
                fs::write(self.output_dir.join("com/acme/Main.class"), b"main-bytes").unwrap();
                fs::write(self.output_dir.join("report.txt"), b"log").unwrap();
            }
            Ok(self.report)
        }
    }

    /// Counts reads so tests can assert the store was never consulted.
    struct CountingStore {
        inner: MemoryStore,
        reads: AtomicU64,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(16),
                reads: AtomicU64::new(0),
            }
        }
    }

    impl CacheStore for CountingStore {
        fn read(&self, key: &CacheKey, file_name: &str) -> Result<Option<Vec<u8>>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read(key, file_name)
        }

        fn write(&self, key: &CacheKey, file_name: &str, bytes: &[u8]) -> Result<u64> {
            self.inner.write(key, file_name, bytes)
        }
    }

    /// Reads miss cleanly, writes always fault.
    struct WriteFaultStore;

    impl CacheStore for WriteFaultStore {
        fn read(&self, _key: &CacheKey, _file_name: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }

        fn write(&self, _key: &CacheKey, _file_name: &str, _bytes: &[u8]) -> Result<u64> {
            Err(Error::storage_fault("medium offline"))
        }
    }

    fn key() -> CacheKey {
        CacheKey::new("t", "com.acme", "lib", "abc123").unwrap()
    }

    fn bundles() -> Vec<BundleConfig> {
        vec![BundleConfig {
            name: "classes".into(),
            includes: vec!["**/*.class".into()],
        }]
    }

    fn controller() -> CacheController<Arc<MemoryStore>> {
        CacheController::new(Arc::new(MemoryStore::new(16)), bundles())
    }

    #[test]
    fn miss_runs_and_stores_then_hit_restores() {
        let controller = controller();
        let input = FingerprintInput::default();

        let first_dir = TempDir::new().unwrap();
        let mut first = FakeWork::new(first_dir.path());
        let execution = controller.execute(&key(), &input, &mut first).unwrap();
        assert_eq!(execution.outcome, Outcome::Stored);
        assert_eq!(first.runs, 1);

        let second_dir = TempDir::new().unwrap();
        let mut second = FakeWork::new(second_dir.path());
        let execution = controller.execute(&key(), &input, &mut second).unwrap();
        assert_eq!(execution.outcome, Outcome::FromCache);
        assert_eq!(second.runs, 0);
        assert_eq!(
            fs::read(second_dir.path().join("com/acme/Main.class")).unwrap(),
            b"main-bytes"
        );
        // Only the selected bundle was restored, not unselected output.
        assert!(!second_dir.path().join("report.txt").exists());
    }

    #[test]
    fn stored_entry_carries_record_and_fingerprint() {
        let store = Arc::new(MemoryStore::new(16));
        let controller = CacheController::new(Arc::clone(&store), bundles());
        let input = FingerprintInput::default();

        let dir = TempDir::new().unwrap();
        let mut work = FakeWork::new(dir.path());
        controller.execute(&key(), &input, &mut work).unwrap();

        let record = store.read(&key(), ARTIFACTS_FILE).unwrap().unwrap();
        let artifacts: Vec<OutputArtifact> = serde_json::from_slice(&record).unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].file_name, "classes.tar.zst");
        assert_eq!(artifacts[0].file_count, 1);

        let fingerprint = store.read(&key(), FINGERPRINT_FILE).unwrap().unwrap();
        assert_eq!(fingerprint, input.canonical_text().into_bytes());
    }

    #[test]
    fn bypass_never_consults_the_store() {
        let store = Arc::new(CountingStore::new());
        let controller = CacheController::new(Arc::clone(&store), bundles()).with_bypass(true);

        let dir = TempDir::new().unwrap();
        let mut work = FakeWork::new(dir.path());
        let execution = controller
            .execute(&key(), &FingerprintInput::default(), &mut work)
            .unwrap();
        assert_eq!(execution.outcome, Outcome::SkippedCache);
        assert_eq!(work.runs, 1);
        assert_eq!(store.reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn skipped_work_bypasses_like_the_global_flag() {
        let store = Arc::new(CountingStore::new());
        let controller = CacheController::new(Arc::clone(&store), bundles());

        let dir = TempDir::new().unwrap();
        let mut work = FakeWork::new(dir.path());
        work.skipped = true;
        let execution = controller
            .execute(&key(), &FingerprintInput::default(), &mut work)
            .unwrap();
        assert_eq!(execution.outcome, Outcome::SkippedCache);
        assert_eq!(store.reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failures_are_not_cached() {
        let store = Arc::new(MemoryStore::new(16));
        let controller = CacheController::new(Arc::clone(&store), bundles());

        let dir = TempDir::new().unwrap();
        let mut work = FakeWork::new(dir.path());
        work.report.failures = 2;
        let execution = controller
            .execute(&key(), &FingerprintInput::default(), &mut work)
            .unwrap();
        assert_eq!(execution.outcome, Outcome::Failed);
        assert!(store.read(&key(), ARTIFACTS_FILE).unwrap().is_none());
    }

    #[test]
    fn empty_work_is_not_cached() {
        let store = Arc::new(MemoryStore::new(16));
        let controller = CacheController::new(Arc::clone(&store), bundles());

        let dir = TempDir::new().unwrap();
        let mut work = FakeWork::new(dir.path());
        work.report.completed_units = 0;
        let execution = controller
            .execute(&key(), &FingerprintInput::default(), &mut work)
            .unwrap();
        assert_eq!(execution.outcome, Outcome::Empty);
        assert!(store.read(&key(), ARTIFACTS_FILE).unwrap().is_none());
    }

    #[test]
    fn missing_listed_bundle_falls_back_to_running() {
        let store = Arc::new(MemoryStore::new(16));
        let controller = CacheController::new(Arc::clone(&store), bundles());

        // An output record listing a bundle that was never written, as after
        // a concurrent eviction of the bundle file.
        let orphan = vec![OutputArtifact {
            file_name: "classes.tar.zst".into(),
            file_count: 1,
            uncompressed_size: 10,
            compressed_size: 10,
        }];
        store
            .write(
                &key(),
                ARTIFACTS_FILE,
                &serde_json::to_vec(&orphan).unwrap(),
            )
            .unwrap();

        let dir = TempDir::new().unwrap();
        let mut work = FakeWork::new(dir.path());
        let execution = controller
            .execute(&key(), &FingerprintInput::default(), &mut work)
            .unwrap();
        assert_eq!(execution.outcome, Outcome::Stored);
        assert_eq!(work.runs, 1);
    }

    #[test]
    fn corrupt_output_record_is_treated_as_a_miss() {
        let store = Arc::new(MemoryStore::new(16));
        let controller = CacheController::new(Arc::clone(&store), bundles());
        store.write(&key(), ARTIFACTS_FILE, b"not json").unwrap();

        let dir = TempDir::new().unwrap();
        let mut work = FakeWork::new(dir.path());
        let execution = controller
            .execute(&key(), &FingerprintInput::default(), &mut work)
            .unwrap();
        assert_eq!(execution.outcome, Outcome::Stored);
        assert_eq!(work.runs, 1);
    }

    #[test]
    fn write_faults_do_not_change_the_outcome() {
        let controller = CacheController::new(WriteFaultStore, bundles());

        let dir = TempDir::new().unwrap();
        let mut work = FakeWork::new(dir.path());
        let execution = controller
            .execute(&key(), &FingerprintInput::default(), &mut work)
            .unwrap();
        assert_eq!(execution.outcome, Outcome::Stored);
    }

    #[test]
    fn bundle_with_no_matches_is_omitted_from_the_record() {
        let store = Arc::new(MemoryStore::new(16));
        let mut all = bundles();
        all.push(BundleConfig {
            name: "reports".into(),
            includes: vec!["**/*.xml".into()],
        });
        let controller = CacheController::new(Arc::clone(&store), all);

        let dir = TempDir::new().unwrap();
        let mut work = FakeWork::new(dir.path());
        controller
            .execute(&key(), &FingerprintInput::default(), &mut work)
            .unwrap();

        let record = store.read(&key(), ARTIFACTS_FILE).unwrap().unwrap();
        let artifacts: Vec<OutputArtifact> = serde_json::from_slice(&record).unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].file_name, "classes.tar.zst");
    }
}
