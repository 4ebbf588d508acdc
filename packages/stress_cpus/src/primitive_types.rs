use derive_more::derive::{Display, From, Into};

/// Identifies one logical processor (hardware execution context).
///
/// This matches the numeric identifier used by standard tooling of the operating system
/// (e.g. the `processor` field of `/proc/cpuinfo` or the IDs accepted by `taskset`).
///
/// The values are not guaranteed to be contiguous or to start from zero.
#[derive(Clone, Copy, Debug, Default, Display, Eq, From, Hash, Into, Ord, PartialEq, PartialOrd)]
#[display("{_0}")]
pub struct LogicalProcessor(u32);

impl LogicalProcessor {
    /// Creates a logical processor identifier from the raw OS processor number.
    #[must_use]
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The raw OS processor number.
    #[must_use]
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[inline]
    pub(crate) const fn as_index(self) -> usize {
        self.0 as usize
    }
}

/// Operating system identifier of a thread, as used by affinity syscalls.
///
/// On Linux this is the kernel thread ID (`gettid()`), not the `pthread_t` handle.
pub type OsThreadId = i32;

/// A contiguous half-open range of device indices: `[starting_device, starting_device + device_count)`.
///
/// A device index is a position in the topology-ordered list of hardware threads, not a
/// processor number. Use [`CpuTopology::device()`][crate::CpuTopology::device] to map an index
/// to the hardware thread (and thereby the logical processor) it refers to.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
#[display("[{starting_device}, +{device_count})")]
pub struct DeviceRange {
    /// Index of the first device in the range.
    pub starting_device: usize,

    /// Number of devices in the range.
    pub device_count: usize,
}

impl DeviceRange {
    /// Creates a range of `device_count` devices starting at `starting_device`.
    #[must_use]
    pub const fn new(starting_device: usize, device_count: usize) -> Self {
        Self {
            starting_device,
            device_count,
        }
    }

    /// One past the last device index in the range, or `None` on overflow.
    #[must_use]
    pub const fn end(&self) -> Option<usize> {
        self.starting_device.checked_add(self.device_count)
    }

    /// Whether the range contains no devices.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.device_count == 0
    }

    /// Iterates over the device indices in the range.
    pub fn iter(&self) -> impl Iterator<Item = usize> + use<> {
        let end = self.end().unwrap_or(usize::MAX);
        self.starting_device..end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_processor_roundtrips_raw_value() {
        let p = LogicalProcessor::new(17);
        assert_eq!(p.get(), 17);
        assert_eq!(u32::from(p), 17);
        assert_eq!(LogicalProcessor::from(17), p);
        assert_eq!(p.to_string(), "17");
    }

    #[test]
    fn device_range_bounds() {
        let range = DeviceRange::new(4, 3);
        assert_eq!(range.end(), Some(7));
        assert!(!range.is_empty());
        assert_eq!(range.iter().collect::<Vec<_>>(), vec![4, 5, 6]);
        assert_eq!(range.to_string(), "[4, +3)");

        assert!(DeviceRange::new(9, 0).is_empty());
        assert_eq!(DeviceRange::new(usize::MAX, 1).end(), None);
    }
}
