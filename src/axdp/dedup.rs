//! Per-session message id dedup window (spec §3 "Id-dedup window", §4.2).

use std::collections::HashMap;
use std::collections::VecDeque;

/// Bounded, insertion-ordered (sessionId, messageId) -> seen tracker with
/// LRU eviction once the window size is exceeded. Different sessions never
/// collide.
pub struct DedupWindow {
    window: usize,
    order: VecDeque<(u32, u32)>,
    seen: HashMap<(u32, u32), ()>,
}

impl DedupWindow {
    pub fn new(window: usize) -> Self {
        assert!(window > 0);
        Self {
            window,
            order: VecDeque::with_capacity(window),
            seen: HashMap::new(),
        }
    }

    /// Non-mutating peek at whether `(session_id, message_id)` has already
    /// been seen, without recording it.
    pub fn contains(&self, session_id: u32, message_id: u32) -> bool {
        self.seen.contains_key(&(session_id, message_id))
    }

    /// Returns true if `(session_id, message_id)` was already seen
    /// (refreshing no key); otherwise records it and evicts the oldest
    /// entry if the window is now over capacity.
    pub fn is_duplicate(&mut self, session_id: u32, message_id: u32) -> bool {
        let key = (session_id, message_id);
        if self.seen.contains_key(&key) {
            return true;
        }
        self.seen.insert(key, ());
        self.order.push_back(key);
        if self.order.len() > self.window {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        false
    }
}
