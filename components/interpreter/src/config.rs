//! VM configuration.

use memory_manager::HeapConfig;
use serde::{Deserialize, Serialize};

/// Settings of one [`Vm`](crate::Vm) instance.
///
/// Every field has a default, so a JSON file only needs the values it
/// changes:
///
/// ```
/// use interpreter::VmConfig;
///
/// let config: VmConfig =
///     serde_json::from_str(r#"{"max_call_depth": 256, "heap": {"max_heap_size": 4194304}}"#).unwrap();
/// assert_eq!(config.max_call_depth, 256);
/// assert_eq!(config.heap.max_heap_size, 4 << 20);
/// assert!(!config.gc_stats);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Heap limits, address width and byte order
    pub heap: HeapConfig,
    /// Guest frames per thread before `StackOverflowError`
    pub max_call_depth: usize,
    /// Keep the statistics of every collection cycle
    pub gc_stats: bool,
    /// Host stack size of threads the VM spawns
    pub thread_stack_size: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            heap: HeapConfig::default(),
            max_call_depth: 1024,
            gc_stats: false,
            thread_stack_size: 16 * 1024 * 1024,
        }
    }
}
