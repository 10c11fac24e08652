//! Bitset over the dense module id space `[0, module_id_max]`, used for a
//! module's rx/tx masks (§3). Mirrors the original's `MOD_SET`/`MOD_CLR`/
//! `MOD_ISSET`/`MOD_ZERO` macros over a fixed-size array; here the array is
//! sized to the configured `module_id_max` instead of a compile-time
//! constant. Callers are expected to hold the owning rwlock (see
//! `module::ModuleSlot`) — this type has no internal synchronization of its
//! own.
#[derive(Debug, Clone)]
pub struct ModSet {
    words: Vec<u64>,
}

impl ModSet {
    pub fn new(max_id: u32) -> Self {
        let words = (max_id as usize / 64) + 1;
        Self { words: vec![0u64; words] }
    }

    #[inline]
    pub fn set(&mut self, id: u32) {
        let (word, bit) = Self::locate(id);
        self.words[word] |= 1u64 << bit;
    }

    #[inline]
    pub fn clear(&mut self, id: u32) {
        let (word, bit) = Self::locate(id);
        self.words[word] &= !(1u64 << bit);
    }

    #[inline]
    pub fn is_set(&self, id: u32) -> bool {
        let (word, bit) = Self::locate(id);
        self.words[word] & (1u64 << bit) != 0
    }

    pub fn zero(&mut self) {
        for w in &mut self.words {
            *w = 0;
        }
    }

    pub fn union_with(&mut self, other: &ModSet) {
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a |= *b;
        }
    }

    /// Ids currently set, in ascending order.
    pub fn iter_set(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &w)| {
            (0..64).filter_map(move |bit| {
                if w & (1u64 << bit) != 0 {
                    Some((wi * 64 + bit) as u32)
                } else {
                    None
                }
            })
        })
    }

    fn locate(id: u32) -> (usize, u32) {
        ((id as usize) / 64, id % 64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_clear_and_test_round_trip() {
        let mut m = ModSet::new(256);
        assert!(!m.is_set(130));
        m.set(130);
        assert!(m.is_set(130));
        m.clear(130);
        assert!(!m.is_set(130));
    }

    #[test]
    fn iter_set_yields_ascending_ids() {
        let mut m = ModSet::new(256);
        m.set(5);
        m.set(200);
        m.set(64);
        assert_eq!(m.iter_set().collect::<Vec<_>>(), vec![5, 64, 200]);
    }

    #[test]
    fn union_is_monotone() {
        let mut a = ModSet::new(256);
        let mut b = ModSet::new(256);
        a.set(1);
        b.set(2);
        a.union_with(&b);
        assert!(a.is_set(1));
        assert!(a.is_set(2));
    }
}
