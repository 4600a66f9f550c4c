//! ## Track Cache
//!
//! Keeps decoded tracks (or sectors) so that each one is decoded at most once per open image.
//! The key is whatever the format uses to name a unit of decoding: the linear track index
//! for track-compressed formats, a `SectorKey` for sector-record formats.
//!
//! The cache is owned by the image object, so its lifetime is the image's lifetime.
//! There is no eviction.  Entries are only replaced by writes.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::hash::Hash;
use log::trace;

pub struct TrackCache<K> {
    map: HashMap<K,Vec<u8>>
}

impl<K: Eq + Hash + Copy + std::fmt::Debug> TrackCache<K> {
    pub fn new() -> Self {
        Self {
            map: HashMap::new()
        }
    }
    pub fn contains(&self,key: K) -> bool {
        self.map.contains_key(&key)
    }
    pub fn get(&self,key: K) -> Option<&[u8]> {
        self.map.get(&key).map(|v| v.as_slice())
    }
    /// Return the cached entry, or run `decode` and cache its output.
    /// If `decode` fails nothing is cached, so a later call will try again.
    pub fn get_or_decode<F,E>(&mut self,key: K,decode: F) -> Result<&[u8],E>
    where F: FnOnce(K) -> Result<Vec<u8>,E> {
        match self.map.entry(key) {
            Entry::Occupied(e) => Ok(e.into_mut().as_slice()),
            Entry::Vacant(e) => {
                trace!("decoding {:?}",key);
                let buf = decode(key)?;
                Ok(e.insert(buf).as_slice())
            }
        }
    }
    /// Put an entry, replacing any previous one
    pub fn insert(&mut self,key: K,buf: Vec<u8>) {
        self.map.insert(key,buf);
    }
    /// Number of entries
    pub fn len(&self) -> usize {
        self.map.len()
    }
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<K: Eq + Hash + Copy + std::fmt::Debug> Default for TrackCache<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[test]
fn test_decode_once() {
    let mut cache: TrackCache<usize> = TrackCache::new();
    assert!(cache.is_empty());
    let mut calls = 0;
    for _i in 0..3 {
        let buf = cache.get_or_decode(5,|k| -> Result<Vec<u8>,()> {
            calls += 1;
            Ok(vec![k as u8;4])
        }).unwrap();
        assert_eq!(buf,&[5,5,5,5]);
    }
    assert_eq!(calls,1);
    assert_eq!(cache.len(),1);
    assert!(cache.get_or_decode(6,|_k| Err("bad")).is_err());
    assert!(!cache.contains(6));
    assert!(!cache.is_empty());
}
