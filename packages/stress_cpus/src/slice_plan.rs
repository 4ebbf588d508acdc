use std::num::NonZero;

use tracing::debug;

use crate::{CpuTopology, DeviceRange, LogicalProcessorSet};

/// A bounded group of whole cores, used as a unit of worker placement.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Slice {
    devices: DeviceRange,
    core_count: usize,
    logical_processors: LogicalProcessorSet,
}

impl Slice {
    /// The devices of the slice. Slices are contiguous in topology order.
    #[must_use]
    pub fn devices(&self) -> DeviceRange {
        self.devices
    }

    /// Number of cores in the slice.
    #[must_use]
    pub fn core_count(&self) -> usize {
        self.core_count
    }

    /// The logical processors of all the slice's devices.
    #[must_use]
    pub fn logical_processors(&self) -> &LogicalProcessorSet {
        &self.logical_processors
    }
}

/// Partition of a topology's cores into slices of at most a given number of cores.
///
/// Cores are taken in topology order (package, then core). A slice is closed as soon as it holds
/// the maximum number of cores. At the end of a package, the open slice is closed if the package
/// had at least the maximum number of cores; a package with fewer cores lets the open slice carry
/// over into the next package, so small packages are combined instead of yielding small slices.
///
/// # Example
///
/// ```
/// use new_zealand::nz;
/// use stress_cpus::fake::TopologyShape;
/// use stress_cpus::{SlicePlan, TopologyBuilder};
///
/// let threads = TopologyShape::new().cores_per_package(nz!(8)).threads();
/// let topology = TopologyBuilder::new(threads).build().unwrap();
///
/// let plan = SlicePlan::new(&topology, 2);
/// assert_eq!(plan.slices().len(), 4);
///
/// let unsliced = SlicePlan::new(&topology, -1);
/// assert_eq!(unsliced.slices().len(), 1);
/// ```
#[derive(Clone, Debug)]
pub struct SlicePlan {
    slices: Vec<Slice>,
}

impl SlicePlan {
    /// Plans slices of at most `max_cores_per_slice` cores each.
    ///
    /// A value of zero or less means no limit: one slice holds every core.
    #[must_use]
    pub fn new(topology: &CpuTopology, max_cores_per_slice: i32) -> Self {
        let max_cores = usize::try_from(max_cores_per_slice)
            .ok()
            .and_then(NonZero::new);

        let mut builder = SliceBuilder::new(topology);

        for package in topology.packages() {
            for core in package.cores() {
                builder.add_core(core.device_range());

                if max_cores.is_some_and(|max| builder.open_core_count() >= max.get()) {
                    builder.close();
                }
            }

            if max_cores.is_some_and(|max| package.cores().len() >= max.get()) {
                builder.close();
            }
        }

        builder.close();

        let plan = Self {
            slices: builder.slices,
        };

        debug!(
            max_cores_per_slice,
            slices = plan.slices.len(),
            devices = topology.num_devices(),
            "planned slices"
        );

        plan
    }

    /// The slices, in topology order.
    #[must_use]
    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    /// The slice that contains `device`, if any.
    #[must_use]
    pub fn slice_of_device(&self, device: usize) -> Option<&Slice> {
        self.slices.iter().find(|slice| {
            let range = slice.devices;
            device >= range.starting_device && range.end().is_some_and(|end| device < end)
        })
    }
}

struct SliceBuilder<'a> {
    topology: &'a CpuTopology,
    slices: Vec<Slice>,

    open_start: Option<usize>,
    open_devices: usize,
    open_cores: usize,
}

impl<'a> SliceBuilder<'a> {
    fn new(topology: &'a CpuTopology) -> Self {
        Self {
            topology,
            slices: Vec::new(),
            open_start: None,
            open_devices: 0,
            open_cores: 0,
        }
    }

    fn open_core_count(&self) -> usize {
        self.open_cores
    }

    fn add_core(&mut self, devices: DeviceRange) {
        self.open_start.get_or_insert(devices.starting_device);
        self.open_devices = self.open_devices.saturating_add(devices.device_count);
        self.open_cores = self.open_cores.saturating_add(1);
    }

    fn close(&mut self) {
        let Some(start) = self.open_start.take() else {
            return;
        };

        let devices = DeviceRange::new(start, self.open_devices);

        let logical_processors = self
            .topology
            .processors_in(devices)
            .expect("slices are built from the topology's own cores, so they are in bounds");

        self.slices.push(Slice {
            devices,
            core_count: self.open_cores,
            logical_processors,
        });

        self.open_devices = 0;
        self.open_cores = 0;
    }
}
