use std::io;

use libc::c_ulong;

use crate::pal::Platform;
use crate::pal::linux::{Bindings, BindingsFacade};
use crate::{LogicalProcessor, LogicalProcessorSet, OsThreadId};

/// Singleton instance of `BuildTargetPlatform`, used by public API types
/// to hook up to the correct PAL implementation.
pub(crate) static BUILD_TARGET_PLATFORM: BuildTargetPlatform =
    BuildTargetPlatform::new(BindingsFacade::target());

/// Size of the first affinity query, in mask words. Covers 1024 processors on 64-bit targets.
const INITIAL_QUERY_WORDS: usize = 16;

/// We stop doubling the query buffer once it covers this many processors.
const MAX_QUERY_PROCESSORS: usize = 1 << 20;

const BITS_PER_WORD: usize = c_ulong::BITS as usize;

/// The platform that matches the crate's build target.
#[derive(Debug)]
pub(crate) struct BuildTargetPlatform {
    bindings: BindingsFacade,
}

impl BuildTargetPlatform {
    pub(crate) const fn new(bindings: BindingsFacade) -> Self {
        Self { bindings }
    }
}

impl Platform for BuildTargetPlatform {
    fn pin_thread(
        &self,
        thread: Option<OsThreadId>,
        processors: &LogicalProcessorSet,
    ) -> io::Result<()> {
        // An empty set is rejected by the kernel as EINVAL. We do the same without asking it.
        if processors.is_empty() {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }

        let mask = to_affinity_mask(processors);

        // 0 means current thread.
        self.bindings.sched_setaffinity(thread.unwrap_or(0), &mask)
    }

    fn thread_processors(&self) -> io::Result<LogicalProcessorSet> {
        let mut word_count = INITIAL_QUERY_WORDS;

        loop {
            match self.bindings.sched_getaffinity_current(word_count) {
                Ok(mask) => return Ok(from_affinity_mask(&mask)),
                // EINVAL means the buffer is smaller than the kernel's processor mask.
                Err(e)
                    if e.raw_os_error() == Some(libc::EINVAL)
                        && word_count.saturating_mul(BITS_PER_WORD) < MAX_QUERY_PROCESSORS =>
                {
                    word_count = word_count.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn current_thread_id(&self) -> OsThreadId {
        self.bindings.gettid()
    }
}

#[expect(
    clippy::arithmetic_side_effects,
    clippy::integer_division,
    reason = "word and bit offsets of a processor index cannot overflow"
)]
fn to_affinity_mask(processors: &LogicalProcessorSet) -> Vec<c_ulong> {
    let highest = processors.iter().last().map_or(0, LogicalProcessor::as_index);
    let mut mask: Vec<c_ulong> = vec![0; highest / BITS_PER_WORD + 1];

    for processor in processors.iter() {
        let index = processor.as_index();

        if let Some(word) = mask.get_mut(index / BITS_PER_WORD) {
            *word |= 1 << (index % BITS_PER_WORD);
        }
    }

    mask
}

#[expect(
    clippy::arithmetic_side_effects,
    reason = "word and bit offsets of a processor index cannot overflow"
)]
fn from_affinity_mask(mask: &[c_ulong]) -> LogicalProcessorSet {
    let mut processors = LogicalProcessorSet::new();

    for (word_index, &word) in mask.iter().enumerate() {
        let mut remaining = word;

        while remaining != 0 {
            let bit = remaining.trailing_zeros() as usize;
            remaining &= remaining - 1;

            let index = word_index * BITS_PER_WORD + bit;
            let index = u32::try_from(index).expect("processor numbers fit in u32");
            processors.set(LogicalProcessor::new(index));
        }
    }

    processors
}
