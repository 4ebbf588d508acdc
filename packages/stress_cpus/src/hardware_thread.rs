use std::fmt::Display;

use crate::LogicalProcessor;

/// One hardware thread (logical processor) as reported by a discovery backend.
///
/// Records are produced once at startup and never modified afterwards. The topology types group
/// them into cores, NUMA nodes and packages by their identifiers.
///
/// # Example
///
/// ```
/// use stress_cpus::{HardwareThread, LogicalProcessor};
///
/// let thread = HardwareThread::new(LogicalProcessor::new(5))
///     .with_package_id(1)
///     .with_core_id(2)
///     .with_thread_id(1);
///
/// assert_eq!(thread.cpu_number, LogicalProcessor::new(5));
/// assert_eq!(thread.package_id, 1);
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct HardwareThread {
    /// The logical processor number used by the operating system.
    pub cpu_number: LogicalProcessor,

    /// Physical package (socket) the thread belongs to.
    pub package_id: u32,

    /// Core within the package.
    pub core_id: u32,

    /// Thread within the core (e.g. 0 and 1 for a two-way SMT core).
    pub thread_id: u32,

    /// NUMA node (memory region) the thread belongs to.
    pub numa_id: u32,

    /// Processor family.
    pub family: u16,

    /// Processor model.
    pub model: u16,

    /// Processor stepping.
    pub stepping: u8,

    /// Microcode revision currently loaded.
    pub microcode: u64,

    /// Protected Processor Inventory Number, a unique per-part identifier, if the part has one.
    pub ppin: Option<u64>,
}

impl HardwareThread {
    /// Creates a record for `cpu_number` with all identifiers zero and no hardware metadata.
    #[must_use]
    pub const fn new(cpu_number: LogicalProcessor) -> Self {
        Self {
            cpu_number,
            package_id: 0,
            core_id: 0,
            thread_id: 0,
            numa_id: 0,
            family: 0,
            model: 0,
            stepping: 0,
            microcode: 0,
            ppin: None,
        }
    }

    /// Sets the package (socket) identifier.
    #[must_use]
    pub const fn with_package_id(mut self, package_id: u32) -> Self {
        self.package_id = package_id;
        self
    }

    /// Sets the core identifier.
    #[must_use]
    pub const fn with_core_id(mut self, core_id: u32) -> Self {
        self.core_id = core_id;
        self
    }

    /// Sets the thread-within-core identifier.
    #[must_use]
    pub const fn with_thread_id(mut self, thread_id: u32) -> Self {
        self.thread_id = thread_id;
        self
    }

    /// Sets the NUMA node identifier.
    #[must_use]
    pub const fn with_numa_id(mut self, numa_id: u32) -> Self {
        self.numa_id = numa_id;
        self
    }

    /// Sets family, model and stepping.
    #[must_use]
    pub const fn with_signature(mut self, family: u16, model: u16, stepping: u8) -> Self {
        self.family = family;
        self.model = model;
        self.stepping = stepping;
        self
    }

    /// Sets the microcode revision.
    #[must_use]
    pub const fn with_microcode(mut self, microcode: u64) -> Self {
        self.microcode = microcode;
        self
    }

    /// Sets the unique per-part identifier.
    #[must_use]
    pub const fn with_ppin(mut self, ppin: u64) -> Self {
        self.ppin = Some(ppin);
        self
    }

    /// Whether two records belong to the same physical core.
    #[must_use]
    pub const fn same_core_as(&self, other: &Self) -> bool {
        self.package_id == other.package_id && self.core_id == other.core_id
    }

    /// Key used to order threads so that cores are contiguous within NUMA nodes within packages.
    pub(crate) const fn topology_key(&self) -> (u32, u32, u32, u32, u32) {
        (
            self.package_id,
            self.numa_id,
            self.core_id,
            self.thread_id,
            self.cpu_number.get(),
        )
    }
}

impl Display for HardwareThread {
    /// One line in the CPU info dump: processor number, topology ids, signature, microcode, PPIN.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:<5} {:>3} {:>5} {:>3} {:>4}  {:02x}-{:02x}-{:02x}  {:#10x}",
            self.cpu_number.get(),
            self.package_id,
            self.core_id,
            self.thread_id,
            self.numa_id,
            self.family,
            self.model,
            self.stepping,
            self.microcode,
        )?;

        match self.ppin {
            Some(ppin) => write!(f, "  {ppin:016x}"),
            None => Ok(()),
        }
    }
}
