// SPDX-License-Identifier: MIT

use std::collections::{HashMap, VecDeque};

use umsfs::fat32::Fat32Node;

/// Path to node lookups remembered from the last tree walk.
///
/// Bounded; once full, the oldest insertion is dropped.
#[derive(Debug)]
pub struct FilepathCache {
    capacity: usize,
    order: VecDeque<String>,
    nodes: HashMap<String, Fat32Node>,
}

impl FilepathCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            nodes: HashMap::with_capacity(capacity),
        }
    }

    pub fn get(&self, path: &str) -> Option<&Fat32Node> {
        self.nodes.get(path)
    }

    pub fn insert(&mut self, path: String, node: Fat32Node) {
        if self.capacity == 0 {
            return;
        }
        if self.nodes.insert(path.clone(), node).is_some() {
            return;
        }
        self.order.push_back(path);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.nodes.remove(&oldest);
            }
        }
    }

    pub fn remove(&mut self, path: &str) {
        if self.nodes.remove(path).is_some() {
            self.order.retain(|p| p != path);
        }
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.nodes.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umsfs::fat32::*;

    fn node(path: &str) -> Fat32Node {
        let meta = Fat32Meta::new_custom(8 << 20, None, 1, 512, 512).unwrap();
        let mut io = MemBlockIO::new(vec![0u8; 8 << 20]);
        Fat32Formatter::new(&mut io, &meta).format(false).unwrap();
        let mut root = Fat32FileSystem::mount(io).unwrap().root();
        root.path = path.into();
        root
    }

    #[test]
    fn drops_oldest_past_capacity() {
        let mut cache = FilepathCache::new(2);
        cache.insert("/a".into(), node("/a"));
        cache.insert("/b".into(), node("/b"));
        cache.insert("/c".into(), node("/c"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("/a").is_none());
        assert_eq!(cache.get("/c").map(|n| n.path.as_str()), Some("/c"));
    }

    #[test]
    fn reinsert_keeps_position() {
        let mut cache = FilepathCache::new(2);
        cache.insert("/a".into(), node("/a"));
        cache.insert("/b".into(), node("/b"));
        cache.insert("/a".into(), node("/a"));
        cache.insert("/c".into(), node("/c"));
        assert!(cache.get("/a").is_none());
        assert!(cache.get("/b").is_some());
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let mut cache = FilepathCache::new(0);
        cache.insert("/a".into(), node("/a"));
        assert!(cache.is_empty());
    }
}
