#![cfg_attr(coverage_nightly, coverage(off))]

use std::fmt::Debug;
use std::io;
#[cfg(test)]
use std::sync::Arc;

use libc::{c_ulong, pid_t};

#[cfg(test)]
use crate::pal::linux::MockBindings;
use crate::pal::linux::{Bindings, BuildTargetBindings};

/// Enum to hide the real/mock choice behind a single wrapper type.
#[derive(Clone)]
pub(crate) enum BindingsFacade {
    Target(&'static BuildTargetBindings),

    #[cfg(test)]
    Mock(Arc<MockBindings>),
}

impl BindingsFacade {
    pub(crate) const fn target() -> Self {
        Self::Target(&BuildTargetBindings)
    }

    #[cfg(test)]
    pub(crate) fn from_mock(mock: MockBindings) -> Self {
        Self::Mock(Arc::new(mock))
    }
}

impl Bindings for BindingsFacade {
    fn sched_setaffinity(&self, tid: pid_t, mask: &[c_ulong]) -> io::Result<()> {
        match self {
            Self::Target(bindings) => bindings.sched_setaffinity(tid, mask),
            #[cfg(test)]
            Self::Mock(mock) => mock.sched_setaffinity(tid, mask),
        }
    }

    fn sched_getaffinity_current(&self, word_count: usize) -> io::Result<Vec<c_ulong>> {
        match self {
            Self::Target(bindings) => bindings.sched_getaffinity_current(word_count),
            #[cfg(test)]
            Self::Mock(mock) => mock.sched_getaffinity_current(word_count),
        }
    }

    fn gettid(&self) -> pid_t {
        match self {
            Self::Target(bindings) => bindings.gettid(),
            #[cfg(test)]
            Self::Mock(mock) => mock.gettid(),
        }
    }
}

impl Debug for BindingsFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Target(inner) => inner.fmt(f),
            #[cfg(test)]
            Self::Mock(inner) => inner.fmt(f),
        }
    }
}
