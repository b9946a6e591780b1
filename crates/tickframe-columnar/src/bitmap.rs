/// An ordered set of row positions backed by a compact bit vector.
///
/// Used both as a sparse map (which logical rows are physically stored) and as the boolean
/// result of comparisons. `len()` is the logical row count; `count_ones()` is the number of
/// set positions.
///
/// Bits are stored little-endian within each `u64` word:
/// - bit 0 is the LSB of word 0
/// - bit 63 is the MSB of word 0
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitSet {
    words: Vec<u64>,
    len: usize,
    ones: usize,
}

impl BitSet {
    pub fn new() -> Self {
        Self {
            words: Vec::new(),
            len: 0,
            ones: 0,
        }
    }

    pub fn with_capacity_bits(bits: usize) -> Self {
        Self {
            words: Vec::with_capacity(bits.div_ceil(64)),
            len: 0,
            ones: 0,
        }
    }

    pub fn with_len_all_true(bits: usize) -> Self {
        if bits == 0 {
            return Self::new();
        }

        let mut words = vec![u64::MAX; bits.div_ceil(64)];
        let rem = bits % 64;
        if rem != 0 {
            if let Some(last) = words.last_mut() {
                *last = (1u64 << rem) - 1;
            }
        }

        Self {
            words,
            len: bits,
            ones: bits,
        }
    }

    pub fn with_len_all_false(bits: usize) -> Self {
        Self {
            words: vec![0u64; bits.div_ceil(64)],
            len: bits,
            ones: 0,
        }
    }

    pub fn from_bools(values: &[bool]) -> Self {
        let mut out = Self::with_capacity_bits(values.len());
        for &v in values {
            out.push(v);
        }
        out
    }

    /// Build a set of `len` positions with the given (ascending or not) positions set.
    pub fn from_positions(len: usize, positions: impl IntoIterator<Item = usize>) -> Self {
        let mut out = Self::with_len_all_false(len);
        for pos in positions {
            out.set(pos, true);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, value: bool) {
        let bit = self.len % 64;
        if bit == 0 {
            self.words.push(0);
        }

        if value {
            self.words[self.len / 64] |= 1u64 << bit;
            self.ones += 1;
        }

        self.len += 1;
    }

    /// Grow (with unset positions) or shrink to `len` bits.
    pub fn resize(&mut self, len: usize) {
        if len < self.len {
            self.words.truncate(len.div_ceil(64));
            let rem = len % 64;
            if rem != 0 {
                if let Some(last) = self.words.last_mut() {
                    *last &= (1u64 << rem) - 1;
                }
            }
            self.len = len;
            self.ones = self.words.iter().map(|w| w.count_ones() as usize).sum();
        } else {
            self.words.resize(len.div_ceil(64), 0);
            self.len = len;
        }
    }

    pub fn get(&self, index: usize) -> bool {
        debug_assert!(index < self.len, "BitSet index out of bounds");
        let word = self.words[index / 64];
        ((word >> (index % 64)) & 1) == 1
    }

    pub fn set(&mut self, index: usize, value: bool) {
        debug_assert!(index < self.len, "BitSet index out of bounds");
        let word_idx = index / 64;
        let mask = 1u64 << (index % 64);
        let was_set = (self.words[word_idx] & mask) != 0;

        match (was_set, value) {
            (true, false) => {
                self.words[word_idx] &= !mask;
                self.ones -= 1;
            }
            (false, true) => {
                self.words[word_idx] |= mask;
                self.ones += 1;
            }
            _ => {}
        }
    }

    pub fn count_ones(&self) -> usize {
        self.ones
    }

    pub fn all_true(&self) -> bool {
        self.ones == self.len
    }

    /// Number of set positions strictly before `index`.
    ///
    /// For a sparse map this is the physical slot of logical row `index`.
    pub fn rank(&self, index: usize) -> usize {
        let index = index.min(self.len);
        let full_words = index / 64;
        let mut count: usize = self.words[..full_words]
            .iter()
            .map(|w| w.count_ones() as usize)
            .sum();
        let rem = index % 64;
        if rem != 0 {
            count += (self.words[full_words] & ((1u64 << rem) - 1)).count_ones() as usize;
        }
        count
    }

    /// Set positions in ascending order.
    pub fn iter_ones(&self) -> Ones<'_> {
        Ones {
            words: &self.words,
            word_idx: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }

    /// Every position's membership, in order.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(move |i| self.get(i))
    }

    pub fn as_words(&self) -> &[u64] {
        &self.words
    }

    pub fn and_inplace(&mut self, other: &BitSet) {
        debug_assert_eq!(self.len, other.len, "BitSet length mismatch");
        self.combine_inplace(other, |a, b| a & b);
    }

    pub fn or_inplace(&mut self, other: &BitSet) {
        debug_assert_eq!(self.len, other.len, "BitSet length mismatch");
        self.combine_inplace(other, |a, b| a | b);
    }

    pub fn xor_inplace(&mut self, other: &BitSet) {
        debug_assert_eq!(self.len, other.len, "BitSet length mismatch");
        self.combine_inplace(other, |a, b| a ^ b);
    }

    pub fn not_inplace(&mut self) {
        if self.len == 0 {
            return;
        }

        for w in &mut self.words {
            *w = !*w;
        }
        self.mask_tail();
        self.ones = self.len.saturating_sub(self.ones);
    }

    /// Reconstruct a [`BitSet`] from a raw word buffer and a bit length.
    ///
    /// Bits beyond `len` are cleared.
    pub fn from_words(mut words: Vec<u64>, len: usize) -> Self {
        words.resize(len.div_ceil(64), 0);
        let mut out = Self {
            words,
            len,
            ones: 0,
        };
        out.mask_tail();
        out.ones = out.words.iter().map(|w| w.count_ones() as usize).sum();
        out
    }

    fn combine_inplace(&mut self, other: &BitSet, op: impl Fn(u64, u64) -> u64) {
        for (i, w) in self.words.iter_mut().enumerate() {
            *w = op(*w, other.words.get(i).copied().unwrap_or(0));
        }
        self.mask_tail();
        self.ones = self.words.iter().map(|w| w.count_ones() as usize).sum();
    }

    fn mask_tail(&mut self) {
        let rem_bits = self.len % 64;
        if rem_bits != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << rem_bits) - 1;
            }
        }
    }
}

impl Default for BitSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over the set positions of a [`BitSet`], ascending.
#[derive(Clone, Debug)]
pub struct Ones<'a> {
    words: &'a [u64],
    word_idx: usize,
    current: u64,
}

impl Iterator for Ones<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(self.word_idx * 64 + bit);
            }
            self.word_idx += 1;
            self.current = *self.words.get(self.word_idx)?;
        }
    }
}
