//! DedupFilter: drops reposts and records seen recently by id or by text
//! fingerprint.
//!
//! Exactly one instance exists per pipeline. Both caches sit behind one lock
//! so the check-then-admit sequence is atomic across workers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use md5::{Digest, Md5};
use tracing::info;

use climatesignal_common::Record;

use super::STATS_INTERVAL;
use crate::infra::lru::LruSet;

pub const DEFAULT_CAPACITY: usize = 10_000;

pub type Fingerprint = [u8; 16];

/// MD5 of the lowercased, trimmed text.
pub fn fingerprint(text: &str) -> Fingerprint {
    let digest = Md5::digest(text.trim().to_lowercase().as_bytes());
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupVerdict {
    Admitted,
    Repost,
    DuplicateId,
    DuplicateText,
}

impl DedupVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            DedupVerdict::Admitted => "admitted",
            DedupVerdict::Repost => "repost",
            DedupVerdict::DuplicateId => "duplicate_id",
            DedupVerdict::DuplicateText => "duplicate_text",
        }
    }
}

struct Caches {
    ids: LruSet<String>,
    fingerprints: LruSet<Fingerprint>,
}

pub struct DedupFilter {
    caches: Mutex<Caches>,
    processed: AtomicU64,
    reposts: AtomicU64,
    duplicate_ids: AtomicU64,
    duplicate_texts: AtomicU64,
    unique: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupStats {
    pub processed: u64,
    pub reposts: u64,
    pub duplicate_ids: u64,
    pub duplicate_texts: u64,
    pub unique: u64,
    pub id_cache_len: usize,
    pub fingerprint_cache_len: usize,
}

impl DedupStats {
    pub fn duplicates(&self) -> u64 {
        self.duplicate_ids + self.duplicate_texts
    }
}

impl DedupFilter {
    pub fn new(capacity: usize) -> Self {
        Self {
            caches: Mutex::new(Caches {
                ids: LruSet::new(capacity),
                fingerprints: LruSet::new(capacity),
            }),
            processed: AtomicU64::new(0),
            reposts: AtomicU64::new(0),
            duplicate_ids: AtomicU64::new(0),
            duplicate_texts: AtomicU64::new(0),
            unique: AtomicU64::new(0),
        }
    }

    /// True if the record should continue down the pipeline.
    pub fn admit(&self, record: &Record) -> bool {
        self.check(record) == DedupVerdict::Admitted
    }

    /// Classify the record, refreshing recency on any cache hit and
    /// remembering it on admission.
    pub fn check(&self, record: &Record) -> DedupVerdict {
        let verdict = self.check_inner(record);

        let counter = match verdict {
            DedupVerdict::Admitted => &self.unique,
            DedupVerdict::Repost => &self.reposts,
            DedupVerdict::DuplicateId => &self.duplicate_ids,
            DedupVerdict::DuplicateText => &self.duplicate_texts,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let n = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        if n % STATS_INTERVAL == 0 {
            self.log_stats();
        }
        verdict
    }

    fn check_inner(&self, record: &Record) -> DedupVerdict {
        if record.is_repost {
            return DedupVerdict::Repost;
        }

        let print = fingerprint(&record.text);
        let mut caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);

        if caches.ids.touch(&record.id) {
            return DedupVerdict::DuplicateId;
        }
        if caches.fingerprints.touch(&print) {
            return DedupVerdict::DuplicateText;
        }

        caches.ids.insert(record.id.clone());
        caches.fingerprints.insert(print);
        DedupVerdict::Admitted
    }

    pub fn stats(&self) -> DedupStats {
        let (id_cache_len, fingerprint_cache_len) = {
            let caches = self.caches.lock().unwrap_or_else(PoisonError::into_inner);
            (caches.ids.len(), caches.fingerprints.len())
        };
        DedupStats {
            processed: self.processed.load(Ordering::Relaxed),
            reposts: self.reposts.load(Ordering::Relaxed),
            duplicate_ids: self.duplicate_ids.load(Ordering::Relaxed),
            duplicate_texts: self.duplicate_texts.load(Ordering::Relaxed),
            unique: self.unique.load(Ordering::Relaxed),
            id_cache_len,
            fingerprint_cache_len,
        }
    }

    fn log_stats(&self) {
        let stats = self.stats();
        let total = stats.processed.max(1) as f64;
        info!(
            processed = stats.processed,
            duplicates = stats.duplicates(),
            duplicate_pct = format!("{:.1}", stats.duplicates() as f64 / total * 100.0),
            reposts = stats.reposts,
            unique = stats.unique,
            id_cache = stats.id_cache_len,
            fingerprint_cache = stats.fingerprint_cache_len,
            "Dedup stats"
        );
    }
}

impl Default for DedupFilter {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::record;

    #[test]
    fn fingerprint_ignores_case_and_outer_whitespace() {
        assert_eq!(fingerprint("  Flood Warning  "), fingerprint("flood warning"));
        assert_ne!(fingerprint("flood warning"), fingerprint("flood  warning"));
    }

    #[test]
    fn reposts_are_dropped_without_caching() {
        let filter = DedupFilter::new(10);
        let mut repost = record("1", "Storm incoming");
        repost.is_repost = true;
        assert_eq!(filter.check(&repost), DedupVerdict::Repost);

        // The original with the same id still gets through.
        assert!(filter.admit(&record("1", "Storm incoming")));
    }

    #[test]
    fn same_id_different_text_is_duplicate() {
        let filter = DedupFilter::new(10);
        assert!(filter.admit(&record("1", "first text")));
        assert_eq!(filter.check(&record("1", "other text")), DedupVerdict::DuplicateId);
    }

    #[test]
    fn same_text_different_id_is_duplicate() {
        let filter = DedupFilter::new(10);
        assert!(filter.admit(&record("1", "Heat advisory today")));
        assert_eq!(
            filter.check(&record("2", "  HEAT ADVISORY TODAY ")),
            DedupVerdict::DuplicateText
        );
    }

    #[test]
    fn hit_refreshes_recency() {
        let filter = DedupFilter::new(2);
        assert!(filter.admit(&record("a", "text a")));
        assert!(filter.admit(&record("b", "text b")));
        // Hit on "a" keeps it alive; "b" becomes the eviction candidate.
        assert!(!filter.admit(&record("a", "text a")));
        assert!(filter.admit(&record("c", "text c")));
        assert!(!filter.admit(&record("a", "text a")));
        assert!(filter.admit(&record("b", "text b, edited")));
    }

    #[test]
    fn capacity_plus_one_evicts_first() {
        let filter = DedupFilter::new(3);
        for i in 0..4 {
            assert!(filter.admit(&record(&i.to_string(), &format!("text {i}"))));
        }
        let stats = filter.stats();
        assert_eq!(stats.id_cache_len, 3);
        assert_eq!(stats.fingerprint_cache_len, 3);
        assert!(filter.admit(&record("0", "text 0")));
    }

    #[test]
    fn counters_track_verdicts() {
        let filter = DedupFilter::new(10);
        let mut repost = record("9", "rt");
        repost.is_repost = true;
        filter.check(&record("1", "one"));
        filter.check(&record("1", "two"));
        filter.check(&record("2", "one"));
        filter.check(&repost);
        let stats = filter.stats();
        assert_eq!(stats.processed, 4);
        assert_eq!(stats.unique, 1);
        assert_eq!(stats.duplicate_ids, 1);
        assert_eq!(stats.duplicate_texts, 1);
        assert_eq!(stats.reposts, 1);
    }
}
