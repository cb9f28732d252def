//! URL frontier: a deduplicating FIFO of links pending crawl.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use searchlight_core::Link;

struct FrontierState {
    queue: VecDeque<Link>,
    queued: HashSet<String>,
    visited: HashSet<String>,
}

/// Thread-safe FIFO over links with auxiliary queued/visited sets.
///
/// Invariants: a URL in `queued` appears exactly once in the queue; a URL is
/// never both queued and visited; enqueue of a known URL is a no-op. All
/// operations are atomic with respect to each other — a single mutex guards
/// the whole state, and nothing slow happens inside it.
///
/// The queue is unbounded (memory is the only cap).
pub struct Frontier {
    state: Mutex<FrontierState>,
}

impl Frontier {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FrontierState {
                queue: VecDeque::new(),
                queued: HashSet::new(),
                visited: HashSet::new(),
            }),
        }
    }

    /// Append a link unless its URL is already queued or visited.
    pub fn enqueue(&self, link: Link) {
        let mut state = self.lock();
        if state.queued.contains(&link.url) || state.visited.contains(&link.url) {
            return;
        }

        state.queued.insert(link.url.clone());
        tracing::debug!(url = %link.url, queue_len = state.queue.len() + 1, "enqueued");
        state.queue.push_back(link);
    }

    /// Pop the head of the queue, removing it from the queued set.
    pub fn dequeue(&self) -> Option<Link> {
        let mut state = self.lock();
        let link = state.queue.pop_front()?;
        state.queued.remove(&link.url);
        tracing::debug!(url = %link.url, queue_len = state.queue.len(), "dequeued");
        Some(link)
    }

    pub fn mark_visited(&self, url: &str) {
        self.lock().visited.insert(url.to_string());
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.lock().visited.contains(url)
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FrontierState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for Frontier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_preserved() {
        let frontier = Frontier::new();
        frontier.enqueue(Link::bare("https://a.test/1"));
        frontier.enqueue(Link::bare("https://a.test/2"));
        frontier.enqueue(Link::bare("https://a.test/3"));

        assert_eq!(frontier.dequeue().unwrap().url, "https://a.test/1");
        assert_eq!(frontier.dequeue().unwrap().url, "https://a.test/2");
        assert_eq!(frontier.dequeue().unwrap().url, "https://a.test/3");
        assert!(frontier.dequeue().is_none());
    }

    #[test]
    fn duplicate_enqueue_is_noop() {
        let frontier = Frontier::new();
        frontier.enqueue(Link::bare("https://dup.test/"));
        frontier.enqueue(Link::new("second attempt", "https://dup.test/"));

        assert_eq!(frontier.len(), 1);
        assert_eq!(frontier.dequeue().unwrap().url, "https://dup.test/");
        assert!(frontier.dequeue().is_none());
    }

    #[test]
    fn visited_urls_are_not_requeued() {
        let frontier = Frontier::new();
        frontier.mark_visited("https://seen.test/");
        frontier.enqueue(Link::bare("https://seen.test/"));

        assert!(frontier.is_empty());
        assert!(frontier.is_visited("https://seen.test/"));
    }

    #[test]
    fn dequeue_allows_requeue_until_visited() {
        let frontier = Frontier::new();
        frontier.enqueue(Link::bare("https://x.test/"));
        let link = frontier.dequeue().unwrap();

        // not yet visited, so it may be enqueued again
        frontier.enqueue(Link::bare(&link.url[..]));
        assert_eq!(frontier.len(), 1);

        frontier.dequeue();
        frontier.mark_visited(&link.url);
        frontier.enqueue(Link::bare(&link.url[..]));
        assert!(frontier.is_empty());
    }

    #[test]
    fn concurrent_enqueue_dedupes() {
        use std::sync::Arc;

        let frontier = Arc::new(Frontier::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let frontier = Arc::clone(&frontier);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    frontier.enqueue(Link::bare(format!("https://c.test/{i}")));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(frontier.len(), 100);
    }
}
