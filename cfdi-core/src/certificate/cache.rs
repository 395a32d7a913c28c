use parking_lot::RwLock;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

/// Storage for downloaded certificates, keyed by source URL.
pub trait CertificateCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn set(&self, key: &str, bytes: Vec<u8>, ttl: Duration);
}

#[derive(Debug, Clone)]
struct Entry {
    bytes: Vec<u8>,
    /// `None` when `now + ttl` is past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Process-local cache. Expired entries are evicted when read.
#[derive(Debug, Default)]
pub struct MemoryCertificateCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCertificateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl CertificateCache for MemoryCertificateCache {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.is_live(now) => return Some(entry.bytes.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
        }
        None
    }

    fn set(&self, key: &str, bytes: Vec<u8>, ttl: Duration) {
        let expires_at = Instant::now().checked_add(ttl);
        self.entries
            .write()
            .insert(key.to_string(), Entry { bytes, expires_at });
    }
}
