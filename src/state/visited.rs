use dashmap::DashSet;

/// Normalized URLs admitted to the current crawl run
///
/// Append-only for the lifetime of a run. [`VisitedSet::insert`] is the
/// single test-and-insert point: when several workers discover the same URL
/// concurrently, exactly one of them gets `true` and owns the right to queue
/// and fetch it.
#[derive(Debug, Default)]
pub struct VisitedSet {
    urls: DashSet<String>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically adds the URL; returns false if it was already present
    pub fn insert(&self, url: &str) -> bool {
        if self.urls.contains(url) {
            return false;
        }
        self.urls.insert(url.to_string())
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_insert_once() {
        let visited = VisitedSet::new();
        assert!(visited.insert("https://example.com/"));
        assert!(!visited.insert("https://example.com/"));
        assert!(visited.contains("https://example.com/"));
        assert_eq!(visited.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_have_single_winner() {
        let visited = Arc::new(VisitedSet::new());
        let mut handles = Vec::new();

        for _ in 0..16 {
            let visited = Arc::clone(&visited);
            handles.push(tokio::spawn(async move {
                (0..50)
                    .filter(|i| visited.insert(&format!("https://example.com/{}", i)))
                    .count()
            }));
        }

        let mut wins = 0;
        for handle in handles {
            wins += handle.await.unwrap();
        }

        assert_eq!(wins, 50);
        assert_eq!(visited.len(), 50);
    }
}
