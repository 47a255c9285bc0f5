//! Per-stream baselines with atomic update-and-classify and write-through
//! persistence.

use crate::detect::classifier::{classify, Thresholds, Verdict};
use crate::detect::moments::MomentAccumulator;
use crate::probes::{CheckMode, MetricKind};
use crate::storage::snapshot;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// `mode -> target -> vantage point -> metric -> accumulator`.
///
/// Keys are kept as plain strings so documents written by newer versions
/// (extra modes or metrics) still load.
pub type BaselineTree =
    BTreeMap<String, BTreeMap<String, BTreeMap<String, BTreeMap<String, MomentAccumulator>>>>;

/// Identifies one observation stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    pub mode: CheckMode,
    pub target: String,
    pub vantage_point: String,
    pub metric: MetricKind,
}

impl MetricKey {
    pub fn new(
        mode: CheckMode,
        target: impl Into<String>,
        vantage_point: impl Into<String>,
        metric: MetricKind,
    ) -> Self {
        Self {
            mode,
            target: target.into(),
            vantage_point: vantage_point.into(),
            metric,
        }
    }
}

/// One flattened baseline for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaselineRow {
    pub mode: String,
    pub target: String,
    pub vantage_point: String,
    pub metric: String,
    pub sample_count: u64,
    pub mean: f64,
    pub std_dev: f64,
}

/// Shared baseline store. Clones share the same state.
#[derive(Clone)]
pub struct BaselineStore {
    tree: Arc<Mutex<BaselineTree>>,
    path: Option<PathBuf>,
    thresholds: Thresholds,
}

impl BaselineStore {
    /// A store with no durable backing.
    pub fn in_memory(thresholds: Thresholds) -> Self {
        Self {
            tree: Arc::new(Mutex::new(BaselineTree::new())),
            path: None,
            thresholds,
        }
    }

    /// Load from `path` and write every update back to it.
    ///
    /// A document that exists but cannot be read is moved aside before the
    /// store starts empty; if that fails too, the store runs without
    /// persistence rather than overwrite it.
    pub fn open(path: impl AsRef<Path>, thresholds: Thresholds) -> Self {
        let path = path.as_ref().to_path_buf();
        let (tree, writable) = match snapshot::load(&path) {
            Ok(tree) => {
                info!(path = %path.display(), streams = count_streams(&tree), "Loaded baselines");
                (tree, true)
            }
            Err(e) if !path.exists() => {
                warn!(path = %path.display(), error = %e, "Could not load baselines, starting empty");
                (BaselineTree::new(), true)
            }
            Err(e) => match snapshot::quarantine(&path) {
                Ok(aside) => {
                    warn!(
                        path = %path.display(),
                        aside = %aside.display(),
                        error = %e,
                        "Unreadable baselines moved aside, starting empty"
                    );
                    (BaselineTree::new(), true)
                }
                Err(qe) => {
                    error!(
                        path = %path.display(),
                        error = %e,
                        rename_error = %qe,
                        "Unreadable baselines could not be moved aside, persistence disabled"
                    );
                    (BaselineTree::new(), false)
                }
            },
        };
        Self {
            tree: Arc::new(Mutex::new(tree)),
            path: writable.then_some(path),
            thresholds,
        }
    }

    /// Seeded from the document at `path` but never written back, for
    /// processes that share the document with a running daemon.
    pub fn detached(path: impl AsRef<Path>, thresholds: Thresholds) -> Self {
        let path = path.as_ref();
        let tree = snapshot::load(path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Could not load baselines, starting empty");
            BaselineTree::new()
        });
        debug!(path = %path.display(), streams = count_streams(&tree), "Opened detached baselines");
        Self {
            tree: Arc::new(Mutex::new(tree)),
            path: None,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    fn lock(&self) -> MutexGuard<'_, BaselineTree> {
        // Every mutation completes inside one critical section, so a poisoned
        // tree is still consistent.
        self.tree.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Classify `value` against the stream's current baseline, then absorb
    /// it and persist the whole store.
    ///
    /// The verdict always reflects the pre-update baseline. Anomalous samples
    /// are absorbed too, so a sustained shift becomes the new normal.
    /// Persistence failures are logged and never surface here.
    pub fn update_and_detect(&self, key: &MetricKey, value: f64) -> Verdict {
        let mut tree = self.lock();

        let slot = tree
            .entry(key.mode.as_str().to_string())
            .or_default()
            .entry(key.target.clone())
            .or_default()
            .entry(key.vantage_point.clone())
            .or_default()
            .entry(key.metric.as_str().to_string())
            .or_insert_with(|| MomentAccumulator::seeded(value));

        let verdict = classify(slot, value, key.metric, &self.thresholds);
        *slot = slot.update(value);

        debug!(
            mode = %key.mode,
            target = %key.target,
            vantage_point = %key.vantage_point,
            metric = %key.metric,
            value,
            n = slot.n,
            anomalous = verdict.anomalous,
            "Baseline updated"
        );

        if let Some(path) = &self.path {
            if let Err(e) = snapshot::save(path, &tree) {
                error!(path = %path.display(), error = %e, "Failed to persist baselines");
            }
        }

        verdict
    }

    /// Current accumulator for a stream, if any sample has been seen.
    pub fn get(&self, key: &MetricKey) -> Option<MomentAccumulator> {
        self.lock()
            .get(key.mode.as_str())?
            .get(&key.target)?
            .get(&key.vantage_point)?
            .get(key.metric.as_str())
            .copied()
    }

    /// Point-in-time deep copy, optionally filtered by mode and/or target.
    pub fn snapshot(&self, mode: Option<CheckMode>, target: Option<&str>) -> BaselineTree {
        filter_tree(&self.lock(), mode, target)
    }

    /// Number of distinct streams held.
    pub fn len(&self) -> usize {
        count_streams(&self.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the current state to the backing document.
    pub fn persist(&self) -> Result<(), crate::detect::DetectError> {
        let tree = self.lock();
        match &self.path {
            Some(path) => snapshot::save(path, &tree),
            None => Ok(()),
        }
    }
}

fn count_streams(tree: &BaselineTree) -> usize {
    tree.values()
        .flat_map(BTreeMap::values)
        .flat_map(BTreeMap::values)
        .map(BTreeMap::len)
        .sum()
}

/// Keep only the requested mode and/or target.
pub fn filter_tree(tree: &BaselineTree, mode: Option<CheckMode>, target: Option<&str>) -> BaselineTree {
    tree.iter()
        .filter(|(m, _)| mode.map_or(true, |want| m.as_str() == want.as_str()))
        .filter_map(|(m, targets)| {
            let targets: BTreeMap<_, _> = targets
                .iter()
                .filter(|(t, _)| target.map_or(true, |want| t.as_str() == want))
                .map(|(t, nodes)| (t.clone(), nodes.clone()))
                .collect();
            (!targets.is_empty()).then(|| (m.clone(), targets))
        })
        .collect()
}

/// Row cap for baseline reports unless the caller asks otherwise.
pub const DEFAULT_MAX_ROWS: usize = 80;

/// Flatten a tree into report rows, stopping at `max_rows`.
pub fn flatten(tree: &BaselineTree, max_rows: usize) -> Vec<BaselineRow> {
    let mut rows = Vec::new();
    for (mode, targets) in tree {
        for (target, nodes) in targets {
            for (vantage_point, metrics) in nodes {
                for (metric, acc) in metrics {
                    if rows.len() >= max_rows {
                        return rows;
                    }
                    rows.push(BaselineRow {
                        mode: mode.clone(),
                        target: target.clone(),
                        vantage_point: vantage_point.clone(),
                        metric: metric.clone(),
                        sample_count: acc.n,
                        mean: acc.mean,
                        std_dev: acc.std_dev(),
                    });
                }
            }
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn key(mode: CheckMode, target: &str, node: &str, metric: MetricKind) -> MetricKey {
        MetricKey::new(mode, target, node, metric)
    }

    #[test]
    fn test_never_anomalous_below_min_samples() {
        let store = BaselineStore::in_memory(Thresholds::default());
        let k = key(CheckMode::Http, "https://example.com", "de1", MetricKind::Time);

        for _ in 0..19 {
            assert!(!store.update_and_detect(&k, 0.1).anomalous);
        }
        // The 20th call still classifies against 19 prior samples.
        assert!(!store.update_and_detect(&k, 50.0).anomalous);
        assert_eq!(store.get(&k).unwrap().n, 20);
    }

    #[test]
    fn test_verdict_uses_pre_update_baseline() {
        let store = BaselineStore::in_memory(Thresholds::default());
        let k = key(CheckMode::Ping, "example.com", "us1", MetricKind::Rtt);

        for i in 0..30 {
            store.update_and_detect(&k, 0.050 + (i % 3) as f64 * 0.001);
        }
        let before = store.get(&k).unwrap();

        let verdict = store.update_and_detect(&k, 0.500);
        assert!(verdict.anomalous);
        let details = verdict.details.unwrap();
        assert_eq!(details.sample_count, before.n);
        assert_eq!(details.mean, before.mean);

        // The anomalous sample is absorbed.
        assert_eq!(store.get(&k).unwrap().n, before.n + 1);
    }

    #[test]
    fn test_sustained_shift_stops_alerting() {
        let store = BaselineStore::in_memory(Thresholds::default());
        let k = key(CheckMode::Tcp, "example.com:443", "fr1", MetricKind::Time);
        for i in 0..20 {
            store.update_and_detect(&k, 0.020 + (i % 2) as f64 * 0.001);
        }

        let alerts = (0..200)
            .map(|_| store.update_and_detect(&k, 0.100))
            .filter(|v| v.anomalous)
            .count();
        assert!(alerts > 0);
        assert!(!store.update_and_detect(&k, 0.100).anomalous);
    }

    #[test]
    fn test_persist_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baselines.json");
        let store = BaselineStore::open(&path, Thresholds::default());

        let keys = [
            key(CheckMode::Http, "https://a.example", "de1", MetricKind::Time),
            key(CheckMode::Ping, "a.example", "de1", MetricKind::Rtt),
            key(CheckMode::Ping, "a.example", "de1", MetricKind::Loss),
            key(CheckMode::Tcp, "a.example:443", "us2", MetricKind::Time),
        ];
        for (i, k) in keys.iter().enumerate() {
            for j in 0..25 {
                store.update_and_detect(k, 0.013 * (i + 1) as f64 + j as f64 / 997.0);
            }
        }

        let reloaded = BaselineStore::open(&path, Thresholds::default());
        assert_eq!(reloaded.len(), 4);
        assert_eq!(reloaded.snapshot(None, None), store.snapshot(None, None));
        for k in &keys {
            let a = store.get(k).unwrap();
            let b = reloaded.get(k).unwrap();
            assert_eq!(a.mean.to_bits(), b.mean.to_bits());
            assert_eq!(a.m2.to_bits(), b.m2.to_bits());
        }
    }

    #[test]
    fn test_persistence_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where a directory is expected.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let store = BaselineStore::open(blocker.join("baselines.json"), Thresholds::default());

        let k = key(CheckMode::Http, "https://example.com", "de1", MetricKind::Time);
        let verdict = store.update_and_detect(&k, 0.3);
        assert!(!verdict.anomalous);
        assert_eq!(store.get(&k).unwrap().n, 1);
        assert!(store.persist().is_err());
    }

    #[test]
    fn test_corrupt_document_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baselines.json");
        std::fs::write(&path, "[[[").unwrap();
        let store = BaselineStore::open(&path, Thresholds::default());
        assert!(store.is_empty());

        store.update_and_detect(&key(CheckMode::Http, "https://a", "n1", MetricKind::Time), 0.1);

        let aside: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("baselines.json.corrupt-"))
            .collect();
        assert_eq!(aside.len(), 1);
        assert_eq!(std::fs::read_to_string(dir.path().join(&aside[0])).unwrap(), "[[[");
        assert_eq!(BaselineStore::open(&path, Thresholds::default()).len(), 1);
    }

    #[test]
    fn test_newer_document_keeps_history_through_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baselines.json");
        std::fs::write(
            &path,
            r#"{"schema_version": 2, "ping": {"example.com": {"de1": {"rtt": {"n": 500, "mean": 0.03, "M2": 0.002}}}}}"#,
        )
        .unwrap();

        let store = BaselineStore::open(&path, Thresholds::default());
        assert_eq!(store.len(), 1);
        store.update_and_detect(&key(CheckMode::Http, "https://b", "us1", MetricKind::Time), 0.2);

        let reloaded = BaselineStore::open(&path, Thresholds::default());
        let rtt = reloaded
            .get(&key(CheckMode::Ping, "example.com", "de1", MetricKind::Rtt))
            .unwrap();
        assert_eq!(rtt.n, 500);
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn test_detached_store_never_clobbers_shared_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baselines.json");
        let daemon_key = key(CheckMode::Ping, "a", "de1", MetricKind::Rtt);
        let oneshot_key = key(CheckMode::Http, "https://b", "us1", MetricKind::Time);

        let daemon = BaselineStore::open(&path, Thresholds::default());
        daemon.update_and_detect(&daemon_key, 0.02);
        let oneshot = BaselineStore::detached(&path, Thresholds::default());
        assert_eq!(oneshot.get(&daemon_key).unwrap().n, 1);

        for _ in 0..30 {
            daemon.update_and_detect(&daemon_key, 0.02);
        }
        oneshot.update_and_detect(&oneshot_key, 0.3);
        assert!(oneshot.persist().is_ok());

        let on_disk = BaselineStore::open(&path, Thresholds::default());
        assert_eq!(on_disk.get(&daemon_key).unwrap().n, 31);
        assert!(on_disk.get(&oneshot_key).is_none());
    }

    #[test]
    fn test_concurrent_updates_are_serialized() {
        let store = BaselineStore::in_memory(Thresholds::default());
        let k = key(CheckMode::Ping, "example.com", "de1", MetricKind::Rtt);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                let k = k.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        store.update_and_detect(&k, 0.01 * ((t * 250 + i) % 7) as f64 + 0.02);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let acc = store.get(&k).unwrap();
        assert_eq!(acc.n, 2000);
        // Values cycle through 0.02..=0.08 uniformly-ish.
        assert!(acc.mean > 0.045 && acc.mean < 0.055);
    }

    #[test]
    fn test_snapshot_filters() {
        let store = BaselineStore::in_memory(Thresholds::default());
        store.update_and_detect(&key(CheckMode::Http, "https://a", "n1", MetricKind::Time), 0.1);
        store.update_and_detect(&key(CheckMode::Ping, "a", "n1", MetricKind::Rtt), 0.02);
        store.update_and_detect(&key(CheckMode::Ping, "a", "n1", MetricKind::Loss), 0.0);
        store.update_and_detect(&key(CheckMode::Ping, "b", "n2", MetricKind::Rtt), 0.03);

        let all = store.snapshot(None, None);
        assert_eq!(all.len(), 2);

        let ping = store.snapshot(Some(CheckMode::Ping), None);
        assert_eq!(ping.len(), 1);
        assert_eq!(ping["ping"].len(), 2);

        let ping_a = store.snapshot(Some(CheckMode::Ping), Some("a"));
        assert_eq!(flatten(&ping_a, 80).len(), 2);

        let by_target = store.snapshot(None, Some("a"));
        assert!(by_target.contains_key("ping"));
        assert!(!by_target.contains_key("http"));

        assert!(store.snapshot(Some(CheckMode::Tcp), None).is_empty());
        assert_eq!(flatten(&all, 3).len(), 3);
    }
}
