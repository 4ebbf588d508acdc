use std::fmt::Display;
use std::str::FromStr;

use crate::error::Result;
use crate::{Error, HardwareThread, LogicalProcessor, LogicalProcessorSet};

/// A processor selection expression, restricting which hardware threads a run may use.
///
/// The expression is a comma-separated list of items. Each item is either:
///
/// * a `cpulist` fragment of logical processor numbers: `3`, `0-7` or `0-15:2`;
/// * a topology selector made of `p<N>`, `c<N>` and `t<N>` components in any order, each
///   narrowing the selection by package, core or thread-within-core: `p1` selects every thread
///   of package 1, `c2t1` selects the second thread of core 2 in every package, `p0c3t0` selects
///   one specific thread.
///
/// A hardware thread is selected if any item matches it.
///
/// # Example
///
/// ```
/// use stress_cpus::{CpuSetExpression, HardwareThread, LogicalProcessor};
///
/// let expression: CpuSetExpression = "0-1,p1t0".parse().unwrap();
///
/// let thread = HardwareThread::new(LogicalProcessor::new(9)).with_package_id(1);
/// assert!(expression.matches(&thread));
///
/// let sibling = thread.with_thread_id(1);
/// assert!(!expression.matches(&sibling));
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CpuSetExpression {
    source: String,
    items: Vec<Item>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum Item {
    Processors(LogicalProcessorSet),
    Topology(TopologySelector),
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
struct TopologySelector {
    package_id: Option<u32>,
    core_id: Option<u32>,
    thread_id: Option<u32>,
}

impl TopologySelector {
    fn matches(&self, thread: &HardwareThread) -> bool {
        self.package_id.is_none_or(|id| id == thread.package_id)
            && self.core_id.is_none_or(|id| id == thread.core_id)
            && self.thread_id.is_none_or(|id| id == thread.thread_id)
    }

    fn parse(item: &str) -> Result<Self> {
        let invalid = |problem: &str| Error::InvalidCpuSet {
            expression: item.to_string(),
            problem: problem.to_string(),
        };

        let mut selector = Self::default();
        let mut rest = item;

        while let Some(kind) = rest.chars().next() {
            let after_kind = rest.get(1..).unwrap_or_default();
            let digits_len = after_kind
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(after_kind.len());
            let (digits, remainder) = after_kind.split_at(digits_len);

            if digits.is_empty() {
                return Err(invalid("expected a number after the topology selector letter"));
            }

            let value: u32 = digits
                .parse()
                .map_err(|_| invalid("topology identifier is out of range"))?;

            let slot = match kind {
                'p' => &mut selector.package_id,
                'c' => &mut selector.core_id,
                't' => &mut selector.thread_id,
                _ => return Err(invalid("expected 'p', 'c' or 't' topology selector")),
            };

            if slot.replace(value).is_some() {
                return Err(invalid("topology selector component specified more than once"));
            }

            rest = remainder;
        }

        Ok(selector)
    }
}

impl Item {
    fn parse(item: &str) -> Result<Self> {
        if item.is_empty() {
            return Err(Error::InvalidCpuSet {
                expression: item.to_string(),
                problem: "empty item".to_string(),
            });
        }

        if item.starts_with(|c: char| c.is_ascii_digit()) {
            let processors = cpulist::parse(item).map_err(|e| Error::InvalidCpuSet {
                expression: item.to_string(),
                problem: e.to_string(),
            })?;

            Ok(Self::Processors(
                processors.into_iter().map(LogicalProcessor::new).collect(),
            ))
        } else {
            TopologySelector::parse(item).map(Self::Topology)
        }
    }

    fn matches(&self, thread: &HardwareThread) -> bool {
        match self {
            Self::Processors(set) => set.is_set(thread.cpu_number),
            Self::Topology(selector) => selector.matches(thread),
        }
    }
}

impl CpuSetExpression {
    /// Whether the expression selects `thread`.
    #[must_use]
    pub fn matches(&self, thread: &HardwareThread) -> bool {
        self.items.iter().any(|item| item.matches(thread))
    }

    /// The logical processors of all `threads` the expression selects.
    #[must_use]
    pub fn select(&self, threads: &[HardwareThread]) -> LogicalProcessorSet {
        threads
            .iter()
            .filter(|thread| self.matches(thread))
            .map(|thread| thread.cpu_number)
            .collect()
    }

    /// Verifies that every processor the expression selects from `threads` is also in `ambient`,
    /// the set of processors the operating system lets this process use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyCpuSet`] if nothing is selected and
    /// [`Error::CpuSetOutsideAmbient`] naming the first selected processor that is not available.
    pub fn validate_against(
        &self,
        threads: &[HardwareThread],
        ambient: &LogicalProcessorSet,
    ) -> Result<LogicalProcessorSet> {
        let selected = self.select(threads);

        if selected.is_empty() {
            return Err(Error::EmptyCpuSet);
        }

        if let Some(processor) = selected.iter().find(|p| !ambient.is_set(*p)) {
            return Err(Error::CpuSetOutsideAmbient { processor });
        }

        Ok(selected)
    }
}

impl FromStr for CpuSetExpression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidCpuSet {
                expression: String::new(),
                problem: "expression is empty".to_string(),
            });
        }

        let items = s.split(',').map(Item::parse).collect::<Result<Vec<_>>>()?;

        Ok(Self {
            source: s.to_string(),
            items,
        })
    }
}

impl Display for CpuSetExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use new_zealand::nz;

    use super::*;
    use crate::fake::TopologyShape;

    fn sample_threads() -> Vec<HardwareThread> {
        // 2 packages x 2 cores x 2 threads: cpus 0-3 are first threads, 4-7 second threads.
        TopologyShape::new()
            .packages(nz!(2))
            .cores_per_package(nz!(2))
            .threads_per_core(nz!(2))
            .threads()
    }

    fn selected(expression: &str) -> Vec<u32> {
        let expression: CpuSetExpression = expression.parse().unwrap();
        expression
            .select(&sample_threads())
            .iter()
            .map(LogicalProcessor::get)
            .collect()
    }

    #[test]
    fn plain_numbers_and_ranges() {
        assert_eq!(selected("5"), vec![5]);
        assert_eq!(selected("0-2,6"), vec![0, 1, 2, 6]);
        assert_eq!(selected("0-7:2"), vec![0, 2, 4, 6]);
    }

    #[test]
    fn package_selector() {
        // Package 1 is cores at cpus 2,3 and siblings 6,7.
        assert_eq!(selected("p1"), vec![2, 3, 6, 7]);
    }

    #[test]
    fn combined_selectors() {
        assert_eq!(selected("p0t1"), vec![4, 5]);
        assert_eq!(selected("c1t0"), vec![1, 3]);
        assert_eq!(selected("t1c1p1"), vec![7]);
    }

    #[test]
    fn items_are_unioned() {
        assert_eq!(selected("p0t0,7"), vec![0, 1, 7]);
    }

    #[test]
    fn numbers_outside_topology_select_nothing() {
        assert!(selected("100").is_empty());
    }

    #[test]
    fn rejects_bad_syntax() {
        for bad in ["", ",", "0,", "x1", "p", "pc1", "p1p2", "p-1", "1-", "q3"] {
            let result = bad.parse::<CpuSetExpression>();
            assert!(
                matches!(result, Err(Error::InvalidCpuSet { .. })),
                "'{bad}' should be rejected"
            );
        }
    }

    #[test]
    fn display_returns_source() {
        let expression: CpuSetExpression = "p0,3-4".parse().unwrap();
        assert_eq!(expression.to_string(), "p0,3-4");
    }

    #[test]
    fn validate_against_ambient() {
        let threads = sample_threads();
        let ambient: LogicalProcessorSet = (0..6).map(LogicalProcessor::new).collect();

        let ok: CpuSetExpression = "p0t0".parse().unwrap();
        let selected = ok.validate_against(&threads, &ambient).unwrap();
        assert_eq!(selected.count(), 2);

        let outside: CpuSetExpression = "p1".parse().unwrap();
        assert!(matches!(
            outside.validate_against(&threads, &ambient),
            Err(Error::CpuSetOutsideAmbient { processor }) if processor == LogicalProcessor::new(6)
        ));

        let nothing: CpuSetExpression = "p5".parse().unwrap();
        assert!(matches!(
            nothing.validate_against(&threads, &ambient),
            Err(Error::EmptyCpuSet)
        ));
    }
}
