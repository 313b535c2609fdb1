//! Min-heap of parsers keyed on penalty. The heap is the only ordering
//! source for classification attempts: parsers that keep matching sit at
//! the root, parsers that keep missing sink.

use crate::parsers::LogParser;

pub struct ParserQueueItem {
    pub log_type: &'static str,
    pub parser: Box<dyn LogParser>,
    pub penalty: i64,
}

pub struct ParserPriorityQueue {
    items: Vec<ParserQueueItem>,
}

impl ParserPriorityQueue {
    /// All items start with penalty 1 so the initial ordering is arbitrary
    /// and the first few lines decide it.
    pub fn new(parsers: Vec<(&'static str, Box<dyn LogParser>)>) -> Self {
        let items = parsers
            .into_iter()
            .map(|(log_type, parser)| ParserQueueItem {
                log_type,
                parser,
                penalty: 1,
            })
            .collect::<Vec<_>>();

        let mut queue = ParserPriorityQueue { items };
        if !queue.items.is_empty() {
            for i in (0..queue.items.len() / 2).rev() {
                queue.sift_down(i);
            }
        }
        queue
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn root_mut(&mut self) -> Option<&mut ParserQueueItem> {
        self.items.first_mut()
    }

    pub fn peek(&self) -> Option<&ParserQueueItem> {
        self.items.first()
    }

    /// Remove and return the root. The caller adjusts the penalty on the
    /// detached item and pushes it back later.
    pub fn pop_root(&mut self) -> Option<ParserQueueItem> {
        if self.items.is_empty() {
            return None;
        }
        let last = self.items.len() - 1;
        self.items.swap(0, last);
        let item = self.items.pop();
        if !self.items.is_empty() {
            self.sift_down(0);
        }
        item
    }

    pub fn push(&mut self, item: ParserQueueItem) {
        self.items.push(item);
        self.sift_up(self.items.len() - 1);
    }

    /// Update the root's penalty and restore heap order.
    pub fn set_root_penalty(&mut self, penalty: i64) {
        if let Some(root) = self.items.first_mut() {
            root.penalty = penalty;
            self.sift_down(0);
        }
    }

    /// Linear scan; the heap never holds more than the registered parser
    /// set, so this stays cheap.
    pub fn find_mut(&mut self, log_type: &str) -> Option<&mut ParserQueueItem> {
        self.items.iter_mut().find(|item| item.log_type == log_type)
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.items[i].penalty >= self.items[parent].penalty {
                break;
            }
            self.items.swap(i, parent);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.items.len();
        loop {
            let left = 2 * i + 1;
            if left >= len {
                break;
            }
            let mut smallest = left;
            let right = left + 1;
            if right < len && self.items[right].penalty < self.items[left].penalty {
                smallest = right;
            }
            if self.items[smallest].penalty >= self.items[i].penalty {
                break;
            }
            self.items.swap(i, smallest);
            i = smallest;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::default_parsers;
    use crate::types::event::NormalizedEvent;
    use anyhow::bail;

    struct NeverParser;

    impl LogParser for NeverParser {
        fn parse(&mut self, _line: &str) -> anyhow::Result<Vec<NormalizedEvent>> {
            bail!("never matches")
        }
        fn log_type(&self) -> &'static str {
            "Test.Never"
        }
    }

    fn never(label: &'static str) -> (&'static str, Box<dyn LogParser>) {
        (label, Box::new(NeverParser) as Box<dyn LogParser>)
    }

    #[test]
    fn test_new_heap_holds_all_parsers_at_penalty_one() {
        let queue = ParserPriorityQueue::new(default_parsers());
        assert_eq!(queue.len(), 8);
        assert_eq!(queue.peek().unwrap().penalty, 1);
    }

    #[test]
    fn test_lowest_penalty_surfaces_at_root() {
        let mut queue = ParserPriorityQueue::new(vec![never("a"), never("b"), never("c")]);

        let mut item = queue.pop_root().unwrap();
        let favored = item.log_type;
        item.penalty = 0;
        queue.push(item);
        assert_eq!(queue.peek().unwrap().log_type, favored);

        let mut item = queue.pop_root().unwrap();
        item.penalty = 10;
        queue.push(item);
        assert_ne!(queue.peek().unwrap().log_type, favored);
        assert_eq!(queue.peek().unwrap().penalty, 1);
    }

    #[test]
    fn test_pop_and_push_round_trip_preserves_size() {
        let mut queue = ParserPriorityQueue::new(default_parsers());
        let mut set_aside = Vec::new();
        while let Some(item) = queue.pop_root() {
            set_aside.push(item);
        }
        assert!(queue.is_empty());
        for item in set_aside {
            queue.push(item);
        }
        assert_eq!(queue.len(), 8);
    }

    #[test]
    fn test_find_mut_locates_registered_parser() {
        let mut queue = ParserPriorityQueue::new(default_parsers());
        assert!(queue.find_mut("AWS.CloudTrail").is_some());
        assert!(queue.find_mut("No.Such.Type").is_none());
    }

    #[test]
    fn test_set_root_penalty_reorders() {
        let mut queue = ParserPriorityQueue::new(vec![never("a"), never("b")]);
        let root = queue.peek().unwrap().log_type;
        queue.set_root_penalty(5);
        assert_ne!(queue.peek().unwrap().log_type, root);
    }
}
