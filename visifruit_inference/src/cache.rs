//! Content-addressed detection cache.
//!
//! Repeated frames (stationary or paused belt) are answered from here
//! instead of issuing another inference. The key hashes a 64×64 thumbnail
//! of the normalized frame together with the detector parameters, so small
//! sensor noise on a static scene still hits.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use image::imageops::{self, FilterType};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::compress::PreparedFrame;
use visifruit::detection::DetectionResult;
use visifruit::inference::{CacheConfig, InferenceConfig};

/// Thumbnail side used for hashing.
const THUMBNAIL_SIDE: u32 = 64;

/// Low bits dropped from each thumbnail channel before hashing.
const QUANTIZE_SHIFT: u8 = 2;

#[derive(Debug)]
struct Entry {
    result: DetectionResult,
    inserted_at: Instant,
}

/// Bounded TTL cache keyed by frame content.
#[derive(Debug)]
pub struct ResultCache {
    entries: Mutex<HashMap<u64, Entry>>,
    ttl: Duration,
    capacity: usize,
}

impl ResultCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::with_capacity(capacity)),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(Duration::from_millis(config.ttl_ms), config.capacity)
    }

    /// Content key of a frame under the given detector parameters.
    pub fn key(frame: &PreparedFrame, config: &InferenceConfig) -> u64 {
        let thumb = imageops::resize(
            &frame.image,
            THUMBNAIL_SIDE,
            THUMBNAIL_SIDE,
            FilterType::Triangle,
        );
        let mut hasher = DefaultHasher::new();
        for v in thumb.as_raw() {
            (v >> QUANTIZE_SHIFT).hash(&mut hasher);
        }
        frame.width().hash(&mut hasher);
        frame.height().hash(&mut hasher);
        config.confidence_threshold.to_bits().hash(&mut hasher);
        config.iou_threshold.to_bits().hash(&mut hasher);
        config.input_size.hash(&mut hasher);
        config.max_detections.hash(&mut hasher);
        config.class_names.hash(&mut hasher);
        hasher.finish()
    }

    /// Fresh entry for `key`, if any. Expired entries are removed.
    pub fn get(&self, key: u64) -> Option<DetectionResult> {
        let mut entries = self.entries.lock();
        match entries.get(&key) {
            Some(e) if e.inserted_at.elapsed() < self.ttl => Some(e.result.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Store a result, evicting expired then oldest entries when full.
    pub fn insert(&self, key: u64, result: DetectionResult) {
        let mut entries = self.entries.lock();
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let ttl = self.ttl;
            entries.retain(|_, e| e.inserted_at.elapsed() < ttl);
        }
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let evict = (self.capacity / 5).max(1);
            let mut by_age: Vec<(u64, Instant)> =
                entries.iter().map(|(k, e)| (*k, e.inserted_at)).collect();
            by_age.sort_by_key(|&(_, t)| t);
            for (k, _) in by_age.into_iter().take(evict) {
                entries.remove(&k);
            }
            debug!("Result cache full, evicted {evict} oldest entries");
        }
        entries.insert(
            key,
            Entry {
                result,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
