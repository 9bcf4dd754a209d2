use crate::model::{MatchResult, Participant, RecognitionResult};
use lru::LruCache;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Per-batch matcher result cache, keyed as `hash(recognition) ^
/// hash(roster) ^ hash(category) ^ vehicle_index`, per `spec.md` §4.4.
/// Wrapped in a `Mutex` since the batch orchestrator dispatches workers
/// across multiple OS threads.
pub struct MatchCache {
    inner: Mutex<LruCache<u64, MatchResult>>,
}

impl MatchCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn key(
        recognition: &RecognitionResult,
        roster: &[Participant],
        category: &str,
        vehicle_index: usize,
    ) -> u64 {
        hash_of(recognition) ^ hash_of(roster) ^ hash_of(category) ^ (vehicle_index as u64)
    }

    pub fn get(&self, key: u64) -> Option<MatchResult> {
        self.inner.lock().unwrap().get(&key).cloned()
    }

    pub fn put(&self, key: u64, result: MatchResult) {
        self.inner.lock().unwrap().put(key, result);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

fn hash_of<T: Hash>(value: T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

impl Hash for RecognitionResult {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.race_number.hash(state);
        self.drivers.hash(state);
        self.team.hash(state);
        self.category.hash(state);
        self.other_text.hash(state);
        self.plate.hash(state);
    }
}

impl Hash for Participant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.numero.hash(state);
        self.nome_pilota.hash(state);
        self.nome_navigatore.hash(state);
        self.nome_terzo.hash(state);
        self.nome_quarto.hash(state);
        self.squadra.hash(state);
        self.sponsors.hash(state);
        self.metatag.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorkerTimings;

    fn rec(race_number: &str) -> RecognitionResult {
        RecognitionResult {
            race_number: Some(race_number.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_cache_hit_after_put() {
        let cache = MatchCache::new(8);
        let roster = vec![Participant::default()];
        let key = MatchCache::key(&rec("7"), &roster, "motorsport", 0);
        assert!(cache.get(key).is_none());
        cache.put(key, MatchResult::default());
        assert!(cache.get(key).is_some());
        let _ = WorkerTimings::default();
    }

    #[test]
    fn test_cache_key_differs_by_vehicle_index() {
        let roster = vec![Participant::default()];
        let k0 = MatchCache::key(&rec("7"), &roster, "motorsport", 0);
        let k1 = MatchCache::key(&rec("7"), &roster, "motorsport", 1);
        assert_ne!(k0, k1);
    }

    #[test]
    fn test_cache_evicts_least_recently_used() {
        let cache = MatchCache::new(1);
        let roster = vec![Participant::default()];
        let k0 = MatchCache::key(&rec("7"), &roster, "motorsport", 0);
        let k1 = MatchCache::key(&rec("8"), &roster, "motorsport", 0);
        cache.put(k0, MatchResult::default());
        cache.put(k1, MatchResult::default());
        assert!(cache.get(k0).is_none());
        assert!(cache.get(k1).is_some());
    }
}
