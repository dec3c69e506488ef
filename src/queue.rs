use std::collections::VecDeque;
use std::sync::Mutex;

/// Unbounded FIFO handoff between two pipeline stages. The lock is held only
/// for the enqueue or dequeue itself, never across a codec call.
pub struct StageQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> StageQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, item: T) {
        let mut items = self.items.lock().unwrap();
        items.push_back(item);
    }

    /// Non-blocking dequeue. Callers back off and retry on `None`.
    pub fn try_pop(&self) -> Option<T> {
        let mut items = self.items.lock().unwrap();
        items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }
}

impl<T> Default for StageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_push_order() {
        let queue = StageQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.try_pop(), Some(3));
        assert_eq!(queue.try_pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn empty_pop_is_none() {
        let queue: StageQueue<u8> = StageQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn concurrent_producers_hand_off_every_item() {
        use std::sync::Arc;

        let queue = Arc::new(StageQueue::new());
        let mut handles = Vec::new();
        for producer in 0..4u64 {
            let queue = queue.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..100u64 {
                    queue.push(producer * 1000 + i);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let mut drained = Vec::new();
        while let Some(item) = queue.try_pop() {
            drained.push(item);
        }
        assert_eq!(drained.len(), 400);

        // FIFO per producer even when pushes interleave.
        for producer in 0..4u64 {
            let mine: Vec<u64> = drained
                .iter()
                .copied()
                .filter(|v| v / 1000 == producer)
                .collect();
            let mut sorted = mine.clone();
            sorted.sort();
            assert_eq!(mine, sorted);
        }
    }
}
