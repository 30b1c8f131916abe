//! short-lived cache of encoded replies, keyed by question name and type

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use chrono::{DateTime, Duration, Local};
use derive_more::{Display, Error};

use crate::dns::protocol::QueryType;

#[derive(Debug, Display, Error)]
pub enum CacheError {
    PoisonedLock,
}

type Result<T> = std::result::Result<T, CacheError>;

type CacheKey = (String, QueryType);

struct CacheEntry {
    reply: Vec<u8>,
    inserted: DateTime<Local>,
}

/// Reply cache with a fixed capacity and a single TTL for every entry.
///
/// Entries expire `ttl` seconds after insertion; expired entries are
/// removed when a lookup touches them. When the cache grows past
/// `max_entries` the oldest insertion is evicted, so the structure keeps
/// an insertion-order queue next to the map.
pub struct Cache {
    entries: HashMap<CacheKey, CacheEntry>,
    insertion_order: VecDeque<CacheKey>,
    max_entries: usize,
    ttl: Duration,
}

impl Cache {
    pub fn new(max_entries: usize, ttl_seconds: u32) -> Cache {
        Cache {
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
            max_entries,
            ttl: Duration::seconds(i64::from(ttl_seconds)),
        }
    }

    pub fn lookup(&mut self, qname: &str, qtype: QueryType) -> Option<Vec<u8>> {
        self.lookup_at(qname, qtype, Local::now())
    }

    pub fn store(&mut self, qname: &str, qtype: QueryType, reply: Vec<u8>) {
        self.store_at(qname, qtype, reply, Local::now());
    }

    fn lookup_at(
        &mut self,
        qname: &str,
        qtype: QueryType,
        now: DateTime<Local>,
    ) -> Option<Vec<u8>> {
        let key = (qname.to_string(), qtype);

        match self.entries.get(&key) {
            Some(entry) if now - entry.inserted < self.ttl => Some(entry.reply.clone()),
            Some(_) => {
                // stale; drop it rather than serve it
                self.entries.remove(&key);
                self.insertion_order.retain(|k| k != &key);
                None
            }
            None => None,
        }
    }

    fn store_at(&mut self, qname: &str, qtype: QueryType, reply: Vec<u8>, now: DateTime<Local>) {
        let key = (qname.to_string(), qtype);

        let previous = self.entries.insert(
            key.clone(),
            CacheEntry {
                reply,
                inserted: now,
            },
        );
        if previous.is_some() {
            self.insertion_order.retain(|k| k != &key);
        }
        self.insertion_order.push_back(key);

        while self.entries.len() > self.max_entries {
            match self.insertion_order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lock wrapper making the cache safe to share between request handlers.
///
/// Both operations take the write lock, so the check-then-remove inside
/// `lookup` is atomic. Two handlers missing on the same key may both
/// resolve upstream; the second `store` simply overwrites.
pub struct SynchronizedCache {
    cache: RwLock<Cache>,
}

impl SynchronizedCache {
    pub fn new(max_entries: usize, ttl_seconds: u32) -> SynchronizedCache {
        SynchronizedCache {
            cache: RwLock::new(Cache::new(max_entries, ttl_seconds)),
        }
    }

    pub fn lookup(&self, qname: &str, qtype: QueryType) -> Option<Vec<u8>> {
        let mut cache = match self.cache.write() {
            Ok(x) => x,
            Err(_) => return None,
        };

        cache.lookup(qname, qtype)
    }

    pub fn store(&self, qname: &str, qtype: QueryType, reply: Vec<u8>) -> Result<()> {
        let mut cache = self.cache.write().map_err(|_| CacheError::PoisonedLock)?;

        cache.store(qname, qtype, reply);

        Ok(())
    }
}
