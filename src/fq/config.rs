//! Configuration surface for [`super::Fq`].

/// How the deficit round-robin quantum is obtained.
///
/// The source ties this to a single bitflag (`FQCF_FIXED_QUANTUM`): either
/// the packet-filter queue spec pinned a quantum at configuration time, or
/// the interface layer recomputes `MTU + link header` before every
/// dequeue sweep. Modelled here as an enum rather than a flag plus a
/// separately-stored value, per the redesign notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantum {
    /// A caller-supplied quantum in bytes, fixed for the lifetime of the
    /// scheduler.
    Fixed(u32),
    /// Recomputed by the caller before each dequeue sweep from the
    /// owning interface's MTU and link-header size.
    LinkAdaptive,
}

/// Immutable, read-mostly configuration for one [`super::Fq`] instance.
#[derive(Debug, Clone)]
pub struct FqConfig {
    /// Number of flow slots. Must be non-zero; packets with a flow tag
    /// are hashed into `[0, nflows)` by `tag % nflows`.
    pub nflows: u32,
    /// Aggregate packet count across every flow at which [`super::Fq`]
    /// starts pruning the largest flow. Default 1024.
    pub qlimit: u32,
    pub quantum: Quantum,
    /// Maximum number of packets a single prune invocation may evict.
    /// Default 64.
    pub threshold: u32,
}

impl FqConfig {
    pub fn new(nflows: u32, quantum: Quantum) -> Self {
        FqConfig {
            nflows,
            qlimit: 1024,
            quantum,
            threshold: 64,
        }
    }
}

impl Default for FqConfig {
    fn default() -> Self {
        FqConfig::new(1024, Quantum::Fixed(1500))
    }
}
