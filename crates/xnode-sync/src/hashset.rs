//! Set with order-independent, incrementally-updatable fingerprint.
//!
//! Uses dual DJB2 hashing folded into two 32-bit XOR accumulators, so the
//! fingerprint of a large set updates in O(1) per membership change and two
//! independently-populated sets with the same members always agree. The
//! panel computes the same fingerprints on its side; the seed and mixing
//! constants below are a wire-compatibility requirement, not a tuning knob.

use std::collections::HashSet;

/// Set of opaque string identifiers with an incremental dual-hash
/// fingerprint over its membership.
#[derive(Debug, Clone, Default)]
pub struct HashedSet {
    items: HashSet<String>,
    high: u32,
    low: u32,
}

/// Dual DJB2 over the raw bytes of `s`.
///
/// Seeds 5381/5387 with distinct mixing functions per accumulator:
/// `h = h*33 + c` and `l = l*65 + c*37`, both in wrapping i32 arithmetic.
fn djb2_dual(s: &str) -> (u32, u32) {
    let mut h: i32 = 5381;
    let mut l: i32 = 5387;

    for &b in s.as_bytes() {
        let c = b as i32;
        h = h.wrapping_shl(5).wrapping_add(h).wrapping_add(c);
        l = l.wrapping_shl(6).wrapping_add(l).wrapping_add(c.wrapping_mul(37));
    }

    (h as u32, l as u32)
}

impl HashedSet {
    /// Create an empty set. Fingerprint of the empty set is all zeros.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `item`. Inserting an existing member is a no-op and does not
    /// touch the accumulators.
    pub fn add(&mut self, item: &str) {
        if self.items.insert(item.to_owned()) {
            let (high, low) = djb2_dual(item);
            self.high ^= high;
            self.low ^= low;
        }
    }

    /// Remove `item`. Removing a non-member is a no-op. XOR is self-inverse,
    /// so removal restores the exact pre-add accumulator state regardless of
    /// what else is in the set.
    pub fn delete(&mut self, item: &str) {
        if self.items.remove(item) {
            let (high, low) = djb2_dual(item);
            self.high ^= high;
            self.low ^= low;
        }
    }

    pub fn contains(&self, item: &str) -> bool {
        self.items.contains(item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop all members and reset the accumulators.
    pub fn clear(&mut self) {
        self.items.clear();
        self.high = 0;
        self.low = 0;
    }

    /// 16 lowercase hex digits: 8 for the high accumulator, 8 for the low.
    pub fn hash64(&self) -> String {
        format!("{:08x}{:08x}", self.high, self.low)
    }

    /// Copy of the current members, in no particular order.
    pub fn items(&self) -> Vec<String> {
        self.items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZERO: &str = "0000000000000000";

    #[test]
    fn empty_set_hash_is_all_zeros() {
        assert_eq!(HashedSet::new().hash64(), ZERO);
    }

    #[test]
    fn single_item_is_nonzero_and_well_formed() {
        let mut set = HashedSet::new();
        set.add("test");
        let hash = set.hash64();
        assert_ne!(hash, ZERO);
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn order_independence() {
        let orders: [&[&str]; 3] = [&["a", "b", "c"], &["c", "b", "a"], &["b", "a", "c"]];
        let hashes: Vec<String> = orders
            .iter()
            .map(|items| {
                let mut set = HashedSet::new();
                for item in *items {
                    set.add(item);
                }
                set.hash64()
            })
            .collect();
        assert_eq!(hashes[0], hashes[1]);
        assert_eq!(hashes[0], hashes[2]);
    }

    #[test]
    fn add_then_delete_restores_prior_hash() {
        let mut set = HashedSet::new();
        set.add("first");
        set.add("second");
        let before = set.hash64();

        set.add("transient");
        assert_ne!(set.hash64(), before);
        set.delete("transient");
        assert_eq!(set.hash64(), before);
    }

    #[test]
    fn deleting_everything_returns_to_zero() {
        let mut set = HashedSet::new();
        set.add("first");
        set.add("second");
        set.add("third");
        let with_three = set.hash64();

        set.delete("second");
        set.delete("first");
        set.delete("third");
        assert_eq!(set.hash64(), ZERO);

        // Re-adding in a different order reproduces the old fingerprint.
        set.add("third");
        set.add("first");
        set.add("second");
        assert_eq!(set.hash64(), with_three);
    }

    #[test]
    fn duplicate_add_is_a_noop() {
        let mut set = HashedSet::new();
        set.add("item");
        let (hash, len) = (set.hash64(), set.len());

        set.add("item");
        assert_eq!(set.hash64(), hash);
        assert_eq!(set.len(), len);
    }

    #[test]
    fn delete_of_nonmember_is_a_noop() {
        let mut set = HashedSet::new();
        set.add("kept");
        let hash = set.hash64();

        set.delete("never-added");
        assert_eq!(set.hash64(), hash);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn clear_resets_state() {
        let mut set = HashedSet::new();
        set.add("a");
        set.add("b");
        set.clear();
        assert!(set.is_empty());
        assert_eq!(set.hash64(), ZERO);
    }

    #[test]
    fn contains_and_items() {
        let mut set = HashedSet::new();
        set.add("x");
        assert!(set.contains("x"));
        assert!(!set.contains("y"));

        let mut items = set.items();
        items.sort();
        assert_eq!(items, ["x"]);
    }

    #[test]
    fn independently_built_sets_agree() {
        let mut a = HashedSet::new();
        let mut b = HashedSet::new();
        for id in ["uuid-1", "uuid-2", "uuid-3"] {
            a.add(id);
        }
        for id in ["uuid-3", "uuid-1", "uuid-2"] {
            b.add(id);
        }
        assert_eq!(a.hash64(), b.hash64());
    }
}
