use std::collections::BTreeMap;
use std::sync::Mutex;

/// Named FIFO admission queues coordinating concurrent script instances
/// ("cells"). Non-blocking by contract: callers poll `is_blocked` and back
/// off themselves; nothing here ever suspends a thread.
#[derive(Debug, Default)]
pub struct CriticalSections {
    queues: Mutex<BTreeMap<String, Vec<u32>>>,
}

impl CriticalSections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the section on first use; re-adding a queued cell is a no-op.
    pub fn add_cell(&self, section: &str, cell: u32) {
        let mut queues = self.queues.lock().expect("section table lock poisoned");
        let queue = queues.entry(section.to_string()).or_default();
        if !queue.contains(&cell) {
            queue.push(cell);
        }
    }

    pub fn remove_cell(&self, section: &str, cell: u32) {
        let mut queues = self.queues.lock().expect("section table lock poisoned");
        if let Some(queue) = queues.get_mut(section) {
            queue.retain(|queued| *queued != cell);
            if queue.is_empty() {
                queues.remove(section);
            }
        }
    }

    /// A cell is blocked iff the queue exists, is non-empty, and the cell is
    /// not at its head. Unknown sections block nobody.
    pub fn is_blocked(&self, section: &str, cell: u32) -> bool {
        let queues = self.queues.lock().expect("section table lock poisoned");
        match queues.get(section) {
            Some(queue) => queue.first() != Some(&cell),
            None => false,
        }
    }

    pub fn remove_cell_from_all(&self, cell: u32) {
        let mut queues = self.queues.lock().expect("section table lock poisoned");
        for queue in queues.values_mut() {
            queue.retain(|queued| *queued != cell);
        }
        queues.retain(|_, queue| !queue.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_of_queue_is_never_blocked() {
        let sections = CriticalSections::new();
        sections.add_cell("A", 1);
        sections.add_cell("A", 2);
        assert!(!sections.is_blocked("A", 1));
        assert!(sections.is_blocked("A", 2));
        sections.remove_cell("A", 1);
        assert!(!sections.is_blocked("A", 2));
    }

    #[test]
    fn unknown_section_blocks_nobody() {
        let sections = CriticalSections::new();
        assert!(!sections.is_blocked("missing", 7));
    }

    #[test]
    fn duplicate_add_is_a_no_op() {
        let sections = CriticalSections::new();
        sections.add_cell("A", 1);
        sections.add_cell("A", 1);
        sections.remove_cell("A", 1);
        assert!(!sections.is_blocked("A", 1));
        assert!(!sections.is_blocked("A", 2));
    }

    #[test]
    fn fifo_order_survives_middle_removal() {
        let sections = CriticalSections::new();
        sections.add_cell("A", 1);
        sections.add_cell("A", 2);
        sections.add_cell("A", 3);
        sections.remove_cell("A", 2);
        sections.remove_cell("A", 1);
        assert!(!sections.is_blocked("A", 3));
    }

    #[test]
    fn remove_from_all_purges_every_section() {
        let sections = CriticalSections::new();
        sections.add_cell("A", 1);
        sections.add_cell("A", 2);
        sections.add_cell("B", 1);
        sections.remove_cell_from_all(1);
        assert!(!sections.is_blocked("A", 2));
        assert!(!sections.is_blocked("B", 2));
    }

    #[test]
    fn remove_absent_cell_is_a_no_op() {
        let sections = CriticalSections::new();
        sections.remove_cell("A", 4);
        sections.add_cell("A", 1);
        sections.remove_cell("A", 4);
        assert!(!sections.is_blocked("A", 1));
    }
}
