use std::fmt::Display;
use std::iter;

use crate::LogicalProcessor;

type Word = u64;

const PROCESSORS_PER_WORD: usize = Word::BITS as usize;

/// The smallest capacity, in processors, that a set allocates when it first needs storage.
const MIN_SIZE: usize = 1024;
const MIN_SIZE_WORDS: usize = MIN_SIZE / PROCESSORS_PER_WORD;

const _: () = assert!(MIN_SIZE % PROCESSORS_PER_WORD == 0);

/// A possibly non-contiguous set of logical processors, stored as a growable bitmap.
///
/// Bit `p` is set if and only if processor `p` is a member of the set. Storage is allocated in
/// whole words, at least 1024 processors worth on first use, and grows on demand when a
/// higher processor is written. It never shrinks except via [`clear()`][Self::clear].
///
/// The type is not internally synchronized. Mutation requires `&mut self`, so sharing a set
/// between threads for mutation requires an external lock or per-thread copies.
///
/// # Example
///
/// ```
/// use stress_cpus::{LogicalProcessor, LogicalProcessorSet};
///
/// let mut set = LogicalProcessorSet::new();
/// set.set(LogicalProcessor::new(3));
/// set.set(LogicalProcessor::new(130));
///
/// assert_eq!(set.count(), 2);
/// assert!(set.is_set(LogicalProcessor::new(130)));
/// assert_eq!(set.to_string(), "3,130");
/// ```
#[derive(Clone, Debug, Default)]
pub struct LogicalProcessorSet {
    words: Vec<Word>,
}

impl LogicalProcessorSet {
    /// Creates an empty set without allocating storage.
    #[must_use]
    pub const fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Creates an empty set with storage for at least `minimum_size` processors.
    #[must_use]
    pub fn with_minimum_size(minimum_size: usize) -> Self {
        let mut set = Self::new();

        if let Some(highest) = minimum_size.checked_sub(1) {
            set.ensure_size(highest);
        }

        set
    }

    /// Removes all members and releases the storage.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Size of the backing storage in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        size_of_val(self.words.as_slice())
    }

    /// Adds `processor` to the set, growing the storage if needed.
    pub fn set(&mut self, processor: LogicalProcessor) {
        *self.word_for_mut(processor) |= bit_for(processor);
    }

    /// Removes `processor` from the set, growing the storage if needed.
    pub fn unset(&mut self, processor: LogicalProcessor) {
        *self.word_for_mut(processor) &= !bit_for(processor);
    }

    /// Whether `processor` is a member of the set.
    ///
    /// Querying a processor beyond the current storage returns `false` and does not grow it.
    #[must_use]
    pub fn is_set(&self, processor: LogicalProcessor) -> bool {
        self.words
            .get(word_index(processor))
            .is_some_and(|word| word & bit_for(processor) != 0)
    }

    /// Number of processors in the set.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Whether the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|word| *word == 0)
    }

    /// Truncates the set to at most `limit` members, keeping the lowest-numbered ones.
    ///
    /// Words are consumed from the lowest upward until the budget is spent. In the word where
    /// the budget runs out, the highest set bits of that word are cleared one at a time until
    /// the excess is gone. Every later word is zeroed.
    ///
    /// # Example
    ///
    /// ```
    /// use stress_cpus::{LogicalProcessor, LogicalProcessorSet};
    ///
    /// let mut set: LogicalProcessorSet = [1, 5, 64, 65, 200]
    ///     .into_iter()
    ///     .map(LogicalProcessor::new)
    ///     .collect();
    ///
    /// set.limit_to(3);
    ///
    /// let kept: Vec<u32> = set.iter().map(LogicalProcessor::get).collect();
    /// assert_eq!(kept, vec![1, 5, 64]);
    /// ```
    pub fn limit_to(&mut self, limit: usize) {
        let mut budget = limit;
        let mut retained_words: usize = 0;

        for word in &mut self.words {
            if budget == 0 {
                break;
            }

            retained_words = retained_words.wrapping_add(1);

            let population = word.count_ones() as usize;

            if population > budget {
                for _ in budget..population {
                    *word &= !highest_bit(*word);
                }

                budget = 0;
            } else {
                budget = budget.wrapping_sub(population);
            }
        }

        for word in self.words.iter_mut().skip(retained_words) {
            *word = 0;
        }
    }

    /// Iterates over the members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = LogicalProcessor> + '_ {
        self.words
            .iter()
            .enumerate()
            .flat_map(|(word_index, &word)| {
                let base = word_index.wrapping_mul(PROCESSORS_PER_WORD);

                let mut remaining = word;
                iter::from_fn(move || {
                    if remaining == 0 {
                        return None;
                    }

                    let bit = remaining.trailing_zeros() as usize;
                    remaining &= remaining.wrapping_sub(1);

                    #[expect(
                        clippy::cast_possible_truncation,
                        reason = "indexes are built from u32 processor numbers"
                    )]
                    Some(LogicalProcessor::new(base.wrapping_add(bit) as u32))
                })
            })
    }

    /// The lowest-numbered member, if any.
    #[must_use]
    pub fn first(&self) -> Option<LogicalProcessor> {
        self.iter().next()
    }

    fn ensure_size(&mut self, highest_index: usize) {
        let index = highest_index / PROCESSORS_PER_WORD;

        if index >= self.words.len() {
            let new_len = index.saturating_add(1).max(MIN_SIZE_WORDS);
            self.words.resize(new_len, 0);
        }
    }

    fn word_for_mut(&mut self, processor: LogicalProcessor) -> &mut Word {
        self.ensure_size(processor.as_index());

        let index = word_index(processor);
        self.words
            .get_mut(index)
            .expect("ensure_size() guarantees the word exists")
    }
}

#[inline]
const fn word_index(processor: LogicalProcessor) -> usize {
    processor.as_index() / PROCESSORS_PER_WORD
}

#[inline]
const fn bit_for(processor: LogicalProcessor) -> Word {
    1 << (processor.as_index() % PROCESSORS_PER_WORD)
}

/// The highest set bit of a non-zero word, as a mask.
#[inline]
const fn highest_bit(word: Word) -> Word {
    debug_assert!(word != 0);
    1 << (Word::BITS - 1 - word.leading_zeros())
}

impl PartialEq for LogicalProcessorSet {
    // Two sets with different storage sizes are equal if they have the same members.
    fn eq(&self, other: &Self) -> bool {
        let (short, long) = if self.words.len() <= other.words.len() {
            (&self.words, &other.words)
        } else {
            (&other.words, &self.words)
        };

        let (long_head, long_tail) = long.split_at(short.len());

        short == long_head && long_tail.iter().all(|word| *word == 0)
    }
}

impl Eq for LogicalProcessorSet {}

impl FromIterator<LogicalProcessor> for LogicalProcessorSet {
    fn from_iter<T: IntoIterator<Item = LogicalProcessor>>(iter: T) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl Extend<LogicalProcessor> for LogicalProcessorSet {
    fn extend<T: IntoIterator<Item = LogicalProcessor>>(&mut self, iter: T) {
        for processor in iter {
            self.set(processor);
        }
    }
}

impl Display for LogicalProcessorSet {
    /// Formats the set in the Linux `cpulist` format, e.g. `0-3,8,20-22`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let list = cpulist::emit(self.iter().map(LogicalProcessor::get));
        f.write_str(&list)
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(LogicalProcessorSet: Send, Sync);

    fn lp(id: u32) -> LogicalProcessor {
        LogicalProcessor::new(id)
    }

    fn set_of(ids: &[u32]) -> LogicalProcessorSet {
        ids.iter().copied().map(lp).collect()
    }

    fn members(set: &LogicalProcessorSet) -> Vec<u32> {
        set.iter().map(LogicalProcessor::get).collect()
    }

    #[test]
    fn new_set_is_empty_and_unallocated() {
        let set = LogicalProcessorSet::new();

        assert!(set.is_empty());
        assert_eq!(set.count(), 0);
        assert_eq!(set.size_bytes(), 0);
        assert!(!set.is_set(lp(0)));
    }

    #[test]
    fn first_write_allocates_minimum_size() {
        let mut set = LogicalProcessorSet::new();
        set.set(lp(0));

        assert_eq!(set.size_bytes(), MIN_SIZE / 8);
    }

    #[test]
    fn grows_in_whole_words_beyond_minimum() {
        let mut set = LogicalProcessorSet::new();
        set.set(lp(1024));

        // 1024 is the first bit of word 16, so 17 words are needed.
        assert_eq!(set.size_bytes(), 17 * 8);
        assert!(set.is_set(lp(1024)));
        assert_eq!(set.count(), 1);
    }

    #[test]
    fn with_minimum_size_preallocates() {
        let set = LogicalProcessorSet::with_minimum_size(2048);
        assert_eq!(set.size_bytes(), 2048 / 8);
        assert!(set.is_empty());

        let set = LogicalProcessorSet::with_minimum_size(0);
        assert_eq!(set.size_bytes(), 0);
    }

    #[test]
    fn query_beyond_storage_does_not_grow() {
        let mut set = LogicalProcessorSet::new();
        set.set(lp(5));
        let size = set.size_bytes();

        assert!(!set.is_set(lp(5000)));
        assert_eq!(set.size_bytes(), size);
    }

    #[test]
    fn set_increments_count_only_for_new_members() {
        let mut set = LogicalProcessorSet::new();

        for id in [0, 63, 64, 127, 128, 999, 4000] {
            let before = set.count();
            set.set(lp(id));
            assert!(set.is_set(lp(id)));
            assert_eq!(set.count(), before + 1);

            set.set(lp(id));
            assert_eq!(set.count(), before + 1);
        }
    }

    #[test]
    fn unset_removes_member() {
        let mut set = set_of(&[1, 2, 3]);
        set.unset(lp(2));

        assert_eq!(members(&set), vec![1, 3]);

        set.unset(lp(1));
        set.unset(lp(3));
        assert!(set.is_empty());
    }

    #[test]
    fn clear_releases_storage() {
        let mut set = set_of(&[1, 2000]);
        set.clear();

        assert!(set.is_empty());
        assert_eq!(set.size_bytes(), 0);
    }

    #[test]
    fn iter_is_ascending() {
        let set = set_of(&[700, 3, 64, 0, 63]);
        assert_eq!(members(&set), vec![0, 3, 63, 64, 700]);
        assert_eq!(set.first(), Some(lp(0)));
    }

    #[test]
    fn limit_to_keeps_lowest_members() {
        let mut set = set_of(&[1, 5, 9, 70, 71, 130, 900]);
        set.limit_to(4);

        assert_eq!(members(&set), vec![1, 5, 9, 70]);
        assert_eq!(set.count(), 4);
    }

    #[test]
    fn limit_to_clears_highest_bits_of_boundary_word() {
        // All of these live in word 1 (64..128).
        let mut set = set_of(&[2, 64, 66, 90, 100, 127]);
        set.limit_to(3);

        assert_eq!(members(&set), vec![2, 64, 66]);
    }

    #[test]
    fn limit_to_exact_word_boundary_zeroes_rest() {
        let mut set = set_of(&[0, 1, 64, 65]);
        set.limit_to(2);

        assert_eq!(members(&set), vec![0, 1]);
    }

    #[test]
    fn limit_to_larger_than_count_is_noop() {
        let mut set = set_of(&[4, 8, 15, 16, 23, 42]);
        let before = set.clone();

        set.limit_to(100);
        assert_eq!(set, before);

        set.limit_to(6);
        assert_eq!(set, before);
    }

    #[test]
    fn limit_to_zero_empties() {
        let mut set = set_of(&[4, 800]);
        set.limit_to(0);

        assert!(set.is_empty());
    }

    #[test]
    fn limit_to_matches_lowest_k_for_many_shapes() {
        let ids: Vec<u32> = (0..1500).filter(|id| id % 7 == 0 || id % 11 == 3).collect();

        for k in [0, 1, 2, 10, 63, 64, 65, 100, ids.len() - 1, ids.len(), ids.len() + 5] {
            let mut set = set_of(&ids);
            set.limit_to(k);

            let expected: Vec<u32> = ids.iter().copied().take(k).collect();
            assert_eq!(members(&set), expected, "limit_to({k})");
        }
    }

    #[test]
    fn equality_ignores_storage_size() {
        let small = set_of(&[3]);
        let mut large = set_of(&[3, 5000]);
        large.unset(lp(5000));

        assert_eq!(small, large);
        assert_eq!(large, small);
        assert_ne!(small, set_of(&[4]));
        assert_eq!(LogicalProcessorSet::new(), LogicalProcessorSet::with_minimum_size(4096));
    }

    #[test]
    fn display_uses_cpulist_format() {
        let set = set_of(&[0, 1, 2, 3, 8, 20, 21, 22]);
        assert_eq!(set.to_string(), "0-3,8,20-22");
    }
}
