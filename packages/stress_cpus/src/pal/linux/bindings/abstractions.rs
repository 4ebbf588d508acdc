#![cfg_attr(
    test,
    expect(
        clippy::struct_field_names,
        reason = "false positive from automock generated code"
    )
)]

use std::fmt::Debug;
use std::io;

use libc::{c_ulong, pid_t};

/// Bindings for FFI calls into the C library.
///
/// All PAL FFI calls must go through this trait, enabling them to be mocked. Affinity masks are
/// arrays of `c_ulong` words in the layout the kernel expects: bit `n % BITS` of word `n / BITS`
/// stands for processor `n`.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait Bindings: Debug + Send + Sync + 'static {
    // sched_setaffinity() - tid 0 means the calling thread.
    fn sched_setaffinity(&self, tid: pid_t, mask: &[c_ulong]) -> io::Result<()>;

    // sched_getaffinity() for the calling thread, with a mask of `word_count` words.
    fn sched_getaffinity_current(&self, word_count: usize) -> io::Result<Vec<c_ulong>>;

    // gettid()
    fn gettid(&self) -> pid_t;
}
