//! Transient byte-cache organised in named generations.

use std::collections::{HashMap, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use agrosentinel_transport::Response;

#[derive(Default)]
struct Generation {
    entries: HashMap<String, Response>,
    // Identities, least recently stored first.
    order: VecDeque<String>,
}

impl Generation {
    fn insert(&mut self, identity: String, response: Response) {
        if self.entries.insert(identity.clone(), response).is_some() {
            self.order.retain(|stored| stored != &identity);
        }
        self.order.push_back(identity);
    }

    fn get(&self, identity: &str) -> Option<Response> {
        self.entries.get(identity).cloned()
    }

    fn evict_to(&mut self, max_entries: usize) -> usize {
        let mut evicted = 0;
        while self.entries.len() > max_entries {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            evicted += 1;
        }
        evicted
    }
}

/// In-memory response cache keyed by canonical request identity.
///
/// Generations are searched in creation order.
#[derive(Default)]
pub struct ByteCache {
    generations: RwLock<Vec<(String, Generation)>>,
}

impl ByteCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<(String, Generation)>> {
        self.generations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<(String, Generation)>> {
        self.generations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn generation_mut<'a>(
        generations: &'a mut Vec<(String, Generation)>,
        name: &str,
    ) -> &'a mut Generation {
        let index = match generations.iter().position(|(n, _)| n == name) {
            Some(index) => index,
            None => {
                generations.push((name.to_string(), Generation::default()));
                generations.len() - 1
            }
        };
        &mut generations[index].1
    }

    /// Store one response, creating the generation if needed.
    pub fn put(&self, generation: &str, identity: String, response: Response) {
        let mut generations = self.write();
        Self::generation_mut(&mut generations, generation).insert(identity, response);
    }

    /// Store one response, then evict the least recently stored entries
    /// until the generation holds at most `max_entries`. Returns the number
    /// evicted.
    pub fn put_bounded(
        &self,
        generation: &str,
        identity: String,
        response: Response,
        max_entries: usize,
    ) -> usize {
        let mut generations = self.write();
        let entries = Self::generation_mut(&mut generations, generation);
        entries.insert(identity, response);
        entries.evict_to(max_entries)
    }

    /// Store several responses under one lock; readers see all or none.
    pub fn put_all(&self, generation: &str, entries: Vec<(String, Response)>) {
        let mut generations = self.write();
        let target = Self::generation_mut(&mut generations, generation);
        for (identity, response) in entries {
            target.insert(identity, response);
        }
    }

    /// Look up a response in any generation.
    pub fn lookup(&self, identity: &str) -> Option<Response> {
        self.read()
            .iter()
            .find_map(|(_, entries)| entries.get(identity))
    }

    /// Look up a response in one generation.
    pub fn lookup_in(&self, generation: &str, identity: &str) -> Option<Response> {
        self.read()
            .iter()
            .find(|(name, _)| name == generation)
            .and_then(|(_, entries)| entries.get(identity))
    }

    pub fn generation_names(&self) -> Vec<String> {
        self.read().iter().map(|(name, _)| name.clone()).collect()
    }

    /// Number of entries in a generation (zero if absent).
    pub fn len(&self, generation: &str) -> usize {
        self.read()
            .iter()
            .find(|(name, _)| name == generation)
            .map_or(0, |(_, entries)| entries.entries.len())
    }

    /// Drop a whole generation. Returns whether it existed.
    pub fn delete_generation(&self, generation: &str) -> bool {
        let mut generations = self.write();
        let before = generations.len();
        generations.retain(|(name, _)| name != generation);
        generations.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agrosentinel_transport::StatusCode;

    fn body(text: &'static str) -> Response {
        Response::new(StatusCode::OK, text)
    }

    #[test]
    fn test_lookup_searches_generations_in_order() {
        let cache = ByteCache::new();
        cache.put("old", "GET /a".to_string(), body("old"));
        cache.put("new", "GET /a".to_string(), body("new"));

        assert_eq!(cache.lookup("GET /a").unwrap().body, "old");
        assert_eq!(cache.lookup_in("new", "GET /a").unwrap().body, "new");
        assert!(cache.lookup("GET /b").is_none());
    }

    #[test]
    fn test_bounded_put_evicts_least_recently_stored() {
        let cache = ByteCache::new();
        assert_eq!(cache.put_bounded("api", "GET /a".to_string(), body("a"), 2), 0);
        assert_eq!(cache.put_bounded("api", "GET /b".to_string(), body("b"), 2), 0);
        // Storing /a again makes /b the oldest.
        assert_eq!(cache.put_bounded("api", "GET /a".to_string(), body("a2"), 2), 0);
        assert_eq!(cache.put_bounded("api", "GET /c".to_string(), body("c"), 2), 1);

        assert_eq!(cache.len("api"), 2);
        assert!(cache.lookup_in("api", "GET /b").is_none());
        assert_eq!(cache.lookup_in("api", "GET /a").unwrap().body, "a2");
        assert_eq!(cache.lookup_in("api", "GET /c").unwrap().body, "c");
    }

    #[test]
    fn test_delete_generation() {
        let cache = ByteCache::new();
        cache.put_all(
            "static",
            vec![
                ("GET /".to_string(), body("shell")),
                ("GET /index.html".to_string(), body("shell")),
            ],
        );
        assert_eq!(cache.len("static"), 2);

        assert!(cache.delete_generation("static"));
        assert!(!cache.delete_generation("static"));
        assert_eq!(cache.len("static"), 0);
        assert!(cache.generation_names().is_empty());
    }
}
