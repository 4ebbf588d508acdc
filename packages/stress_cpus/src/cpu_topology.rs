//! Hierarchical view of the processors a run uses: package → NUMA node → core → thread.

use std::io::{self, Write};
use std::sync::OnceLock;

use itertools::Itertools;
use nonempty::NonEmpty;
use tracing::debug;

use crate::error::Result;
use crate::{
    CpuSetExpression, DeviceRange, Error, HardwareThread, LogicalProcessor, LogicalProcessorSet,
};

/// The process-wide topology, installed once before any worker thread starts.
static INSTALLED_TOPOLOGY: OnceLock<CpuTopology> = OnceLock::new();

/// Token used in failure masks for a processor that failed the test.
const MASK_FAILED: char = 'X';

/// Token used in failure masks for a processor that passed the test.
const MASK_PASSED: char = '.';

/// One physical core: one or more hardware threads sharing the same package and core ID.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Core {
    threads: NonEmpty<HardwareThread>,
    first_device: usize,
}

impl Core {
    /// The hardware threads of the core, in thread ID order.
    #[must_use]
    pub fn threads(&self) -> &NonEmpty<HardwareThread> {
        &self.threads
    }

    /// The core ID shared by all threads of the core.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.threads.first().core_id
    }

    /// The package ID shared by all threads of the core.
    #[must_use]
    pub fn package_id(&self) -> u32 {
        self.threads.first().package_id
    }

    /// The devices (positions in the topology-ordered thread list) this core occupies.
    #[must_use]
    pub fn device_range(&self) -> DeviceRange {
        DeviceRange::new(self.first_device, self.threads.len())
    }

    /// The logical processors of the core.
    #[must_use]
    pub fn logical_processors(&self) -> LogicalProcessorSet {
        self.threads.iter().map(|t| t.cpu_number).collect()
    }
}

/// A memory locality domain within a package.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NumaNode {
    cores: Vec<Core>,
}

impl NumaNode {
    /// The NUMA node ID, or `None` if the node has no cores.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.cores.first().map(|core| core.threads.first().numa_id)
    }

    /// The cores in the node.
    #[must_use]
    pub fn cores(&self) -> &[Core] {
        &self.cores
    }
}

/// A physical processor package (socket).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Package {
    cores: Vec<Core>,
    numa_domains: Vec<NumaNode>,
}

impl Package {
    /// The package ID, or `None` if the package has no cores.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.cores.first().map(Core::package_id)
    }

    /// All cores in the package, in topology order.
    #[must_use]
    pub fn cores(&self) -> &[Core] {
        &self.cores
    }

    /// The NUMA nodes of the package. Their cores are the same cores as in [`cores()`][Self::cores].
    #[must_use]
    pub fn numa_domains(&self) -> &[NumaNode] {
        &self.numa_domains
    }

    fn from_threads(threads: &[HardwareThread], first_device: usize) -> Self {
        let mut cores = Vec::new();
        let mut device = first_device;

        for core_threads in threads.chunk_by(|a, b| a.same_core_as(b) && a.numa_id == b.numa_id) {
            let threads = NonEmpty::from_slice(core_threads)
                .expect("chunk_by never yields empty chunks");

            cores.push(Core {
                threads,
                first_device: device,
            });

            device = device.wrapping_add(core_threads.len());
        }

        let numa_domains = cores
            .chunk_by(|a, b| a.threads.first().numa_id == b.threads.first().numa_id)
            .map(|node_cores| NumaNode {
                cores: node_cores.to_vec(),
            })
            .collect();

        Self {
            cores,
            numa_domains,
        }
    }
}

/// Move-only snapshot of a [`CpuTopology`], obtained via [`CpuTopology::snapshot()`].
///
/// This type intentionally does not implement `Clone`: a snapshot is either freshly taken or
/// moved, so its owner always has exclusive use of it.
#[derive(Debug)]
pub struct TopologyData {
    packages: Vec<Package>,
    all_threads: Vec<HardwareThread>,
}

impl TopologyData {
    /// The package hierarchy at the time the snapshot was taken.
    #[must_use]
    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    /// The topology-ordered thread list at the time the snapshot was taken.
    #[must_use]
    pub fn threads(&self) -> &[HardwareThread] {
        &self.all_threads
    }

    /// Total number of cores across all packages.
    #[must_use]
    pub fn core_count(&self) -> usize {
        self.packages.iter().map(|p| p.cores.len()).sum()
    }

    /// Consumes the snapshot, returning its parts.
    #[must_use]
    pub fn into_parts(self) -> (Vec<Package>, Vec<HardwareThread>) {
        (self.packages, self.all_threads)
    }
}

/// Collects hardware thread records from a discovery backend and optionally restricts them
/// before building a [`CpuTopology`].
///
/// # Example
///
/// ```
/// use new_zealand::nz;
/// use stress_cpus::fake::TopologyShape;
/// use stress_cpus::{DeviceRange, TopologyBuilder};
///
/// let threads = TopologyShape::new()
///     .packages(nz!(2))
///     .cores_per_package(nz!(4))
///     .threads();
///
/// let topology = TopologyBuilder::new(threads)
///     .apply_cpuset(&"p1".parse().unwrap())
///     .unwrap()
///     .restrict(DeviceRange::new(0, 2))
///     .unwrap()
///     .build()
///     .unwrap();
///
/// assert_eq!(topology.num_devices(), 2);
/// assert_eq!(topology.packages()[0].id(), Some(1));
/// ```
#[derive(Clone, Debug)]
pub struct TopologyBuilder {
    threads: Vec<HardwareThread>,
}

impl TopologyBuilder {
    /// Starts from the full list of discovered hardware threads, in any order.
    #[must_use]
    pub fn new(threads: impl IntoIterator<Item = HardwareThread>) -> Self {
        let mut threads: Vec<_> = threads.into_iter().collect();
        threads.sort_by_key(HardwareThread::topology_key);

        Self { threads }
    }

    /// Number of devices currently selected.
    #[must_use]
    pub fn num_devices(&self) -> usize {
        self.threads.len()
    }

    /// Keeps only the hardware threads selected by `expression`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyCpuSet`] if the expression selects none of the threads.
    pub fn apply_cpuset(mut self, expression: &CpuSetExpression) -> Result<Self> {
        self.threads.retain(|thread| expression.matches(thread));

        if self.threads.is_empty() {
            return Err(Error::EmptyCpuSet);
        }

        debug!(cpuset = %expression, devices = self.threads.len(), "applied cpuset");

        Ok(self)
    }

    /// Keeps only the hardware threads selected by `expression`, after checking that the
    /// operating system lets the process use every selected processor.
    ///
    /// `available` is normally [`ambient_logical_processor_set()`][crate::ambient_logical_processor_set].
    /// Catching an unavailable processor here reports it before any worker starts, instead of
    /// as a failed pin later.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyCpuSet`] if the expression selects none of the threads and
    /// [`Error::CpuSetOutsideAmbient`] if it selects a processor that is not in `available`.
    pub fn apply_available_cpuset(
        self,
        expression: &CpuSetExpression,
        available: &LogicalProcessorSet,
    ) -> Result<Self> {
        expression.validate_against(&self.threads, available)?;

        self.apply_cpuset(expression)
    }

    /// Keeps only the devices in `range`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceRangeOutOfBounds`] if the range does not fit the current devices.
    pub fn restrict(mut self, range: DeviceRange) -> Result<Self> {
        let bounds = checked_bounds(range, self.threads.len())?;

        self.threads.truncate(bounds.end);
        self.threads.drain(..bounds.start);

        Ok(self)
    }

    /// Builds the topology.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTopology`] if there are no hardware threads left.
    pub fn build(self) -> Result<CpuTopology> {
        CpuTopology::from_sorted_threads(self.threads)
    }
}

fn checked_bounds(range: DeviceRange, device_count: usize) -> Result<std::ops::Range<usize>> {
    match range.end() {
        Some(end) if end <= device_count => Ok(range.starting_device..end),
        _ => Err(Error::DeviceRangeOutOfBounds {
            range,
            device_count,
        }),
    }
}

/// The processor topology of the machine (or of the part of it the run is restricted to).
///
/// Hardware threads are kept in topology order: by package, then NUMA node, then core, then
/// thread. A thread's position in that order is its *device index*, which is how workers and
/// schedules refer to processors. The OS processor number is available via
/// [`HardwareThread::cpu_number`].
///
/// Build one with [`TopologyBuilder`]. To share it process-wide, [`install()`][Self::install] it
/// before starting worker threads; after that it is read-only and can be read from any thread
/// without synchronization. Use [`snapshot()`][Self::snapshot] to obtain a private copy.
///
/// This type does not implement `Clone` - copies are made explicitly via `snapshot()`.
#[derive(Debug)]
pub struct CpuTopology {
    packages: Vec<Package>,
    threads: Vec<HardwareThread>,
}

impl CpuTopology {
    fn from_sorted_threads(threads: Vec<HardwareThread>) -> Result<Self> {
        let mut packages = Vec::new();
        let mut device: usize = 0;

        for package_threads in threads.chunk_by(|a, b| a.package_id == b.package_id) {
            packages.push(Package::from_threads(package_threads, device));
            device = device.wrapping_add(package_threads.len());
        }

        let topology = Self { packages, threads };

        if !topology.is_valid() {
            return Err(Error::InvalidTopology);
        }

        debug!(
            packages = topology.packages.len(),
            cores = topology.cores().count(),
            devices = topology.threads.len(),
            "built processor topology"
        );

        Ok(topology)
    }

    /// Installs `topology` as the process-wide topology and returns a reference to it.
    ///
    /// This must happen before worker threads start. The topology is never modified afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TopologyAlreadyInstalled`] if a topology was installed before.
    pub fn install(topology: Self) -> Result<&'static Self> {
        INSTALLED_TOPOLOGY
            .set(topology)
            .map_err(|_| Error::TopologyAlreadyInstalled)?;

        Ok(INSTALLED_TOPOLOGY
            .get()
            .expect("we just installed the topology, so it must be there"))
    }

    /// The process-wide topology, if one has been installed.
    #[must_use]
    pub fn current() -> Option<&'static Self> {
        INSTALLED_TOPOLOGY.get()
    }

    /// Whether the topology has at least one package.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.packages.is_empty()
    }

    /// The packages, in package ID order.
    #[must_use]
    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    /// Number of packages.
    #[must_use]
    pub fn num_packages(&self) -> usize {
        self.packages.len()
    }

    /// All hardware threads in topology order. Indexes into this slice are device indexes.
    #[must_use]
    pub fn threads(&self) -> &[HardwareThread] {
        &self.threads
    }

    /// Number of devices (hardware threads) in the topology.
    #[must_use]
    pub fn num_devices(&self) -> usize {
        self.threads.len()
    }

    /// The hardware thread at `device`, if it exists.
    #[must_use]
    pub fn device(&self, device: usize) -> Option<&HardwareThread> {
        self.threads.get(device)
    }

    /// All cores in topology order (package, then core).
    pub fn cores(&self) -> impl Iterator<Item = &Core> {
        self.packages.iter().flat_map(|p| p.cores.iter())
    }

    /// The logical processors of every hardware thread in the topology.
    #[must_use]
    pub fn logical_processors(&self) -> LogicalProcessorSet {
        self.threads.iter().map(|t| t.cpu_number).collect()
    }

    /// The logical processors of the devices in `range`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceRangeOutOfBounds`] if the range does not fit the topology.
    pub fn processors_in(&self, range: DeviceRange) -> Result<LogicalProcessorSet> {
        let bounds = checked_bounds(range, self.threads.len())?;

        Ok(self
            .threads
            .get(bounds)
            .expect("bounds were checked above")
            .iter()
            .map(|t| t.cpu_number)
            .collect())
    }

    /// Takes an independent snapshot of the topology.
    ///
    /// The snapshot is a deep copy: restricting this topology later does not affect it.
    #[must_use]
    pub fn snapshot(&self) -> TopologyData {
        TopologyData {
            packages: self.packages.clone(),
            all_threads: self.threads.clone(),
        }
    }

    /// Restricts the topology to the devices in `range`.
    ///
    /// On error the topology is left unchanged. Snapshots taken earlier are never affected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceRangeOutOfBounds`] if the range does not fit, or
    /// [`Error::InvalidTopology`] if the range is empty.
    pub fn restrict(&mut self, range: DeviceRange) -> Result<()> {
        let bounds = checked_bounds(range, self.threads.len())?;

        let threads = self
            .threads
            .get(bounds)
            .expect("bounds were checked above")
            .to_vec();

        *self = Self::from_sorted_threads(threads)?;
        Ok(())
    }

    /// Builds the per-processor failure mask for a test.
    ///
    /// The mask has one token per logical processor in the topology, ordered by processor
    /// number: `X` if the processor is in `failed`, `.` otherwise.
    ///
    /// # Example
    ///
    /// ```
    /// use new_zealand::nz;
    /// use stress_cpus::fake::TopologyShape;
    /// use stress_cpus::{LogicalProcessor, LogicalProcessorSet, TopologyBuilder};
    ///
    /// let threads = TopologyShape::new().cores_per_package(nz!(4)).threads();
    /// let topology = TopologyBuilder::new(threads).build().unwrap();
    ///
    /// let mut failed = LogicalProcessorSet::new();
    /// failed.set(LogicalProcessor::new(2));
    ///
    /// assert_eq!(topology.build_failure_mask(&failed), "..X.");
    /// ```
    #[must_use]
    pub fn build_failure_mask(&self, failed: &LogicalProcessorSet) -> String {
        self.threads
            .iter()
            .map(|t| t.cpu_number)
            .sorted_unstable()
            .map(|p| {
                if failed.is_set(p) {
                    MASK_FAILED
                } else {
                    MASK_PASSED
                }
            })
            .collect()
    }

    /// Writes one line per hardware thread, in topology order, describing what was discovered:
    /// processor number, package/core/thread/NUMA IDs, family-model-stepping, microcode revision
    /// and PPIN.
    ///
    /// # Errors
    ///
    /// Returns any error from `writer`.
    pub fn write_cpu_info(&self, mut writer: impl Write) -> io::Result<()> {
        writeln!(
            writer,
            "{:<5} {:>3} {:>5} {:>3} {:>4}  {:<8}  {:>10}  PPIN",
            "CPU", "Pkg", "Core", "Thr", "NUMA", "FMS", "Microcode"
        )?;

        for thread in &self.threads {
            writeln!(writer, "{thread}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::fake::TopologyShape;

    assert_impl_all!(CpuTopology: Send, Sync);
    assert_impl_all!(TopologyData: Send, Sync);
    assert_not_impl_any!(TopologyData: Clone);
    assert_not_impl_any!(CpuTopology: Clone);

    fn topology(packages: u32, cores: u32, smt: u32) -> CpuTopology {
        let threads = TopologyShape::new()
            .packages(packages.try_into().unwrap())
            .cores_per_package(cores.try_into().unwrap())
            .threads_per_core(smt.try_into().unwrap())
            .threads();

        TopologyBuilder::new(threads).build().unwrap()
    }

    #[test]
    fn empty_discovery_is_invalid() {
        let result = TopologyBuilder::new(Vec::new()).build();
        assert!(matches!(result, Err(Error::InvalidTopology)));
    }

    #[test]
    fn groups_threads_into_cores_and_packages() {
        let topology = topology(2, 3, 2);

        assert!(topology.is_valid());
        assert_eq!(topology.num_packages(), 2);
        assert_eq!(topology.num_devices(), 12);
        assert_eq!(topology.cores().count(), 6);

        for (index, package) in topology.packages().iter().enumerate() {
            assert_eq!(package.id(), Some(u32::try_from(index).unwrap()));
            assert_eq!(package.cores().len(), 3);

            for core in package.cores() {
                assert_eq!(core.threads().len(), 2);
                assert_eq!(core.package_id(), package.id().unwrap());
            }
        }
    }

    #[test]
    fn cores_are_contiguous_device_ranges() {
        let topology = topology(2, 2, 2);

        let mut expected_start = 0;
        for core in topology.cores() {
            let range = core.device_range();
            assert_eq!(range.starting_device, expected_start);
            assert_eq!(range.device_count, 2);

            for device in range.iter() {
                assert!(core.threads().contains(topology.device(device).unwrap()));
            }

            expected_start += 2;
        }
    }

    #[test]
    fn smt_siblings_share_a_core() {
        let topology = topology(1, 2, 2);
        let first_core = &topology.packages()[0].cores()[0];

        // With Linux-style numbering, core 0 holds cpu 0 and its sibling cpu 2.
        let processors: Vec<_> = first_core
            .logical_processors()
            .iter()
            .map(LogicalProcessor::get)
            .collect();
        assert_eq!(processors, vec![0, 2]);
    }

    #[test]
    fn numa_domains_partition_package_cores() {
        let threads = TopologyShape::new()
            .packages(nz!(2))
            .numa_nodes_per_package(nz!(2))
            .cores_per_package(nz!(4))
            .threads();
        let topology = TopologyBuilder::new(threads).build().unwrap();

        for package in topology.packages() {
            assert_eq!(package.numa_domains().len(), 2);

            let numa_core_count: usize = package.numa_domains().iter().map(|n| n.cores().len()).sum();
            assert_eq!(numa_core_count, package.cores().len());
        }

        let numa_ids: Vec<_> = topology
            .packages()
            .iter()
            .flat_map(|p| p.numa_domains().iter().map(NumaNode::id))
            .collect();
        assert_eq!(numa_ids, vec![Some(0), Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn empty_groupings_have_no_id() {
        let package = Package {
            cores: Vec::new(),
            numa_domains: Vec::new(),
        };
        let node = NumaNode { cores: Vec::new() };

        assert_eq!(package.id(), None);
        assert_eq!(node.id(), None);
    }

    #[test]
    fn input_order_does_not_matter() {
        let mut threads = TopologyShape::new()
            .packages(nz!(2))
            .cores_per_package(nz!(2))
            .threads_per_core(nz!(2))
            .threads();
        let sorted = TopologyBuilder::new(threads.clone()).build().unwrap();

        threads.reverse();
        let reversed = TopologyBuilder::new(threads).build().unwrap();

        assert_eq!(sorted.threads(), reversed.threads());
    }

    #[test]
    fn snapshot_matches_live_counts() {
        let topology = topology(2, 4, 2);
        let snapshot = topology.snapshot();

        assert_eq!(snapshot.packages().len(), topology.num_packages());
        assert_eq!(snapshot.core_count(), topology.cores().count());
        assert_eq!(snapshot.threads().len(), topology.num_devices());
    }

    #[test]
    fn snapshot_is_unaffected_by_restriction() {
        let mut topology = topology(2, 4, 1);
        let snapshot = topology.snapshot();

        topology.restrict(DeviceRange::new(0, 3)).unwrap();

        assert_eq!(topology.num_devices(), 3);
        assert_eq!(topology.num_packages(), 1);

        assert_eq!(snapshot.threads().len(), 8);
        assert_eq!(snapshot.packages().len(), 2);
        assert_eq!(snapshot.core_count(), 8);
    }

    #[test]
    fn restrict_rejects_bad_ranges() {
        let mut topology = topology(1, 4, 1);

        assert!(matches!(
            topology.restrict(DeviceRange::new(2, 3)),
            Err(Error::DeviceRangeOutOfBounds { device_count: 4, .. })
        ));
        assert!(matches!(
            topology.restrict(DeviceRange::new(usize::MAX, 2)),
            Err(Error::DeviceRangeOutOfBounds { .. })
        ));
        assert!(matches!(
            topology.restrict(DeviceRange::new(1, 0)),
            Err(Error::InvalidTopology)
        ));

        // Failed restrictions leave the topology as it was.
        assert_eq!(topology.num_devices(), 4);
    }

    #[test]
    fn restrict_recomputes_device_ranges() {
        let mut topology = topology(1, 4, 1);
        topology.restrict(DeviceRange::new(2, 2)).unwrap();

        let starts: Vec<_> = topology
            .cores()
            .map(|c| c.device_range().starting_device)
            .collect();
        assert_eq!(starts, vec![0, 1]);
        assert_eq!(topology.device(0).unwrap().core_id, 2);
    }

    #[test]
    fn processors_in_maps_devices_to_processor_numbers() {
        // Topology order for 1 package x 2 cores x 2 threads is cpu 0, 2, 1, 3.
        let topology = topology(1, 2, 2);

        let processors: Vec<_> = topology
            .processors_in(DeviceRange::new(1, 2))
            .unwrap()
            .iter()
            .map(LogicalProcessor::get)
            .collect();
        assert_eq!(processors, vec![1, 2]);

        assert!(topology.processors_in(DeviceRange::new(3, 2)).is_err());
    }

    #[test]
    fn builder_applies_cpuset() {
        let threads = TopologyShape::new()
            .packages(nz!(2))
            .cores_per_package(nz!(2))
            .threads();

        let topology = TopologyBuilder::new(threads.clone())
            .apply_cpuset(&"p1".parse().unwrap())
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(topology.num_devices(), 2);
        assert!(topology.threads().iter().all(|t| t.package_id == 1));

        let result = TopologyBuilder::new(threads).apply_cpuset(&"p7".parse().unwrap());
        assert!(matches!(result, Err(Error::EmptyCpuSet)));
    }

    #[test]
    fn builder_rejects_cpuset_outside_available_processors() {
        let threads = TopologyShape::new()
            .packages(nz!(2))
            .cores_per_package(nz!(2))
            .threads();

        // Package 1 holds processors 2 and 3.
        let expression: CpuSetExpression = "p1".parse().unwrap();

        let available: LogicalProcessorSet = (0..3).map(LogicalProcessor::new).collect();
        let result = TopologyBuilder::new(threads.clone())
            .apply_available_cpuset(&expression, &available);
        assert!(matches!(
            result,
            Err(Error::CpuSetOutsideAmbient { processor }) if processor == LogicalProcessor::new(3)
        ));

        let available: LogicalProcessorSet = (0..4).map(LogicalProcessor::new).collect();
        let topology = TopologyBuilder::new(threads.clone())
            .apply_available_cpuset(&expression, &available)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(topology.num_devices(), 2);

        let result = TopologyBuilder::new(threads)
            .apply_available_cpuset(&"p7".parse().unwrap(), &available);
        assert!(matches!(result, Err(Error::EmptyCpuSet)));
    }

    #[test]
    fn failure_mask_is_ordered_by_processor_number() {
        // Topology order is 0,4,1,5,2,6,3,7 but the mask is by processor number.
        let topology = topology(1, 4, 2);

        let failed: LogicalProcessorSet = [1, 4].into_iter().map(LogicalProcessor::new).collect();
        let mask = topology.build_failure_mask(&failed);

        assert_eq!(mask, ".X..X...");
        assert_eq!(mask.chars().count(), topology.num_devices());
    }

    #[test]
    fn failure_mask_ignores_processors_outside_topology() {
        let topology = topology(1, 2, 1);
        let failed: LogicalProcessorSet = [100].into_iter().map(LogicalProcessor::new).collect();

        assert_eq!(topology.build_failure_mask(&failed), "..");
    }

    #[test]
    fn cpu_info_has_header_and_one_line_per_thread() {
        let topology = topology(1, 2, 2);
        let mut output = Vec::new();

        topology.write_cpu_info(&mut output).unwrap();

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("CPU"));
        assert!(lines[1].starts_with('0'));
    }
}
