//! A set of CANopen node IDs
//!
//! Used to track which nodes have been seen on the bus.

/// A fixed size set of node IDs 0..=127, stored as a 128-bit mask
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeSet(u128);

impl NodeSet {
    /// Number of IDs which can be stored in the set
    pub const CAPACITY: u8 = 128;

    /// Create an empty set
    pub const fn new() -> Self {
        Self(0)
    }

    /// Add a node. Values above 127 are ignored.
    pub fn set(&mut self, node: u8) {
        if node < Self::CAPACITY {
            self.0 |= 1 << node;
        }
    }

    /// Remove a node
    pub fn clear(&mut self, node: u8) {
        if node < Self::CAPACITY {
            self.0 &= !(1 << node);
        }
    }

    /// Check if a node is in the set
    pub fn contains(&self, node: u8) -> bool {
        node < Self::CAPACITY && self.0 & (1 << node) != 0
    }

    /// Find the first node in the set which is greater than or equal to `from`
    pub fn next(&self, from: u8) -> Option<u8> {
        if from >= Self::CAPACITY {
            return None;
        }
        let remaining = self.0 >> from;
        if remaining == 0 {
            None
        } else {
            Some(from + remaining.trailing_zeros() as u8)
        }
    }

    /// Returns true if no node is in the set
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterate all nodes in the set in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        let mut pos = 0u8;
        core::iter::from_fn(move || {
            let node = self.next(pos)?;
            pos = node + 1;
            Some(node)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_is_inclusive() {
        let mut set = NodeSet::new();
        assert_eq!(None, set.next(0));
        set.set(1);
        set.set(64);
        set.set(127);
        assert_eq!(Some(1), set.next(0));
        assert_eq!(Some(1), set.next(1));
        assert_eq!(Some(64), set.next(2));
        assert_eq!(Some(64), set.next(64));
        assert_eq!(Some(127), set.next(65));
        assert_eq!(None, set.next(128));

        set.clear(64);
        assert!(!set.contains(64));
        assert_eq!(vec![1, 127], set.iter().collect::<Vec<_>>());
    }

    #[test]
    fn test_out_of_range_ignored() {
        let mut set = NodeSet::new();
        set.set(200);
        assert!(set.is_empty());
        assert!(!set.contains(200));
    }
}
