//! Fixed-capacity doubly-linked deque.
//!
//! Nodes live in a slab (`Vec<Option<Node>>`) and link to each other by
//! index, so pushes and pops at either end are O(1) and freed slots are
//! reused without reallocating.

#[derive(Debug)]
struct Node<T> {
    value: T,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
pub struct BoundedDeque<T> {
    slots: Vec<Option<Node<T>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
    capacity: usize,
}

impl<T> BoundedDeque<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    fn alloc(&mut self, node: Node<T>) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        }
    }

    fn node_mut(&mut self, idx: usize) -> Option<&mut Node<T>> {
        self.slots.get_mut(idx).and_then(Option::as_mut)
    }

    /// Insert at the head. Hands the value back when the deque is full.
    pub fn push_front(&mut self, value: T) -> Result<(), T> {
        if self.is_full() {
            return Err(value);
        }
        let old_head = self.head;
        let idx = self.alloc(Node {
            value,
            prev: None,
            next: old_head,
        });
        match old_head.and_then(|h| self.node_mut(h)) {
            Some(node) => node.prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
        self.len += 1;
        Ok(())
    }

    /// Insert at the tail. Hands the value back when the deque is full.
    pub fn push_back(&mut self, value: T) -> Result<(), T> {
        if self.is_full() {
            return Err(value);
        }
        let old_tail = self.tail;
        let idx = self.alloc(Node {
            value,
            prev: old_tail,
            next: None,
        });
        match old_tail.and_then(|t| self.node_mut(t)) {
            Some(node) => node.next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.len += 1;
        Ok(())
    }

    fn unlink(&mut self, idx: usize) -> Option<T> {
        let node = self.slots.get_mut(idx)?.take()?;
        match node.prev.and_then(|p| self.node_mut(p)) {
            Some(prev) => prev.next = node.next,
            None => self.head = node.next,
        }
        match node.next.and_then(|n| self.node_mut(n)) {
            Some(next) => next.prev = node.prev,
            None => self.tail = node.prev,
        }
        self.free.push(idx);
        self.len -= 1;
        Some(node.value)
    }

    pub fn pop_front(&mut self) -> Option<T> {
        let idx = self.head?;
        self.unlink(idx)
    }

    pub fn pop_back(&mut self) -> Option<T> {
        let idx = self.tail?;
        self.unlink(idx)
    }

    pub fn front(&self) -> Option<&T> {
        self.head
            .and_then(|h| self.slots.get(h))
            .and_then(Option::as_ref)
            .map(|n| &n.value)
    }

    /// Drop every element failing `keep`, walking from the tail (oldest)
    /// towards the head. Returns the number removed.
    pub fn retain<F: FnMut(&T) -> bool>(&mut self, mut keep: F) -> usize {
        let mut removed = 0;
        let mut cursor = self.tail;
        while let Some(idx) = cursor {
            let (prev, alive) = match self.slots.get(idx).and_then(Option::as_ref) {
                Some(node) => (node.prev, keep(&node.value)),
                None => break,
            };
            if !alive && self.unlink(idx).is_some() {
                removed += 1;
            }
            cursor = prev;
        }
        removed
    }

    /// Head-to-tail iteration.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            deque: self,
            cursor: self.head,
        }
    }
}

pub struct Iter<'a, T> {
    deque: &'a BoundedDeque<T>,
    cursor: Option<usize>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self
            .deque
            .slots
            .get(self.cursor?)
            .and_then(Option::as_ref)?;
        self.cursor = node.next;
        Some(&node.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_front_rejects_when_full() {
        let mut d = BoundedDeque::with_capacity(2);
        assert!(d.push_front(1).is_ok());
        assert!(d.push_front(2).is_ok());
        assert_eq!(d.push_front(3), Err(3));
        assert!(d.is_full());
        assert_eq!(d.len(), 2);
    }

    #[test]
    fn front_insertion_pops_newest_first() {
        let mut d = BoundedDeque::with_capacity(3);
        d.push_front("t1").unwrap();
        d.push_front("t2").unwrap();
        d.push_front("t3").unwrap();
        assert_eq!(d.iter().copied().collect::<Vec<_>>(), vec!["t3", "t2", "t1"]);
        assert_eq!(d.pop_front(), Some("t3"));
        assert_eq!(d.pop_back(), Some("t1"));
        assert_eq!(d.pop_front(), Some("t2"));
        assert_eq!(d.pop_front(), None);
        assert!(d.is_empty());
    }

    #[test]
    fn retain_unlinks_from_the_middle() {
        let mut d = BoundedDeque::with_capacity(5);
        for i in 1..=5 {
            d.push_back(i).unwrap();
        }
        let removed = d.retain(|v| v % 2 == 1);
        assert_eq!(removed, 2);
        assert_eq!(d.iter().copied().collect::<Vec<_>>(), vec![1, 3, 5]);
        assert_eq!(d.front(), Some(&1));
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut d = BoundedDeque::with_capacity(2);
        d.push_back(1).unwrap();
        d.push_back(2).unwrap();
        d.pop_front();
        d.push_back(3).unwrap();
        assert_eq!(d.slots.len(), 2);
        assert_eq!(d.iter().copied().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn retain_everything_empties_links() {
        let mut d = BoundedDeque::with_capacity(3);
        d.push_back('a').unwrap();
        d.push_back('b').unwrap();
        assert_eq!(d.retain(|_| false), 2);
        assert!(d.front().is_none());
        d.push_front('c').unwrap();
        assert_eq!(d.pop_back(), Some('c'));
    }
}
