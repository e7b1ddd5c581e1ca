//! Runtime orchestration for class-file programs
//!
//! The Runtime wires the launcher's inputs into a [`Vm`]:
//! - VM settings from a JSON file, overridden by flags
//! - Class path directories behind the boot image
//! - `main` execution and uncaught-exception reporting

use std::path::{Path, PathBuf};
use std::sync::Arc;

use class_linker::{ClassSource, CompositeClassSource, DirectoryClassSource};
use core_types::{AddressWidth, ByteOrder};
use interpreter::{ExecutionError, Vm, VmConfig};
use log::{debug, info};

use crate::cli::Cli;
use crate::error::{CliError, CliResult};

/// Reads `path` as a JSON [`VmConfig`]; missing fields keep their defaults.
pub fn load_config(path: &Path) -> CliResult<VmConfig> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| CliError::Config {
        path: path.to_path_buf(),
        source,
    })
}

/// Settings for the VM the command line describes.
pub fn config_from_cli(cli: &Cli) -> CliResult<VmConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => VmConfig::default(),
    };
    if let Some(max_heap) = cli.max_heap {
        config.heap.max_heap_size = max_heap;
    }
    match cli.address_size.as_deref() {
        Some("32") => config.heap.address_width = AddressWidth::W32,
        Some("64") => config.heap.address_width = AddressWidth::W64,
        _ => {}
    }
    if cli.big_endian {
        config.heap.byte_order = ByteOrder::Big;
    }
    if cli.gc_stats {
        config.gc_stats = true;
    }
    Ok(config)
}

/// Main runtime that runs one program on one VM
pub struct Runtime {
    vm: Arc<Vm>,
    classpath: Vec<PathBuf>,
}

impl Runtime {
    /// Boots a VM that loads application classes from `classpath`.
    ///
    /// # Example
    /// ```
    /// use interpreter::VmConfig;
    /// use vm_cli::Runtime;
    ///
    /// let runtime = Runtime::new(VmConfig::default(), vec![".".into()]).unwrap();
    /// assert_eq!(runtime.classpath().len(), 1);
    /// ```
    pub fn new(config: VmConfig, classpath: Vec<PathBuf>) -> CliResult<Self> {
        let mut source = CompositeClassSource::new();
        for entry in &classpath {
            debug!("class path entry {}", entry.display());
            source.push(Arc::new(DirectoryClassSource::new(entry)) as Arc<dyn ClassSource>);
        }
        let vm = Vm::with_class_source(config, Arc::new(source))?;
        info!("vm ready, {} boot classes", vm.linker().class_count());
        Ok(Self { vm, classpath })
    }

    /// Runtime for the parsed command line.
    pub fn from_cli(cli: &Cli) -> CliResult<Self> {
        Self::new(config_from_cli(cli)?, cli.classpath_entries())
    }

    /// The virtual machine.
    pub fn vm(&self) -> &Arc<Vm> {
        &self.vm
    }

    /// Class path directories, in search order.
    pub fn classpath(&self) -> &[PathBuf] {
        &self.classpath
    }

    /// Runs `main_class.main(args)` and waits for every thread it started.
    ///
    /// # Errors
    /// `CliError::Uncaught` when an exception escapes `main`, carrying the
    /// same report the VM writes for other threads.
    pub fn run(&self, main_class: &str, args: &[String]) -> CliResult<()> {
        let main_class = main_class.trim_end_matches(".class");
        match self.vm.run_main(main_class, args) {
            Ok(()) => Ok(()),
            Err(ExecutionError::Guest(exception)) => Err(CliError::Uncaught {
                thread: "main".to_string(),
                report: self.vm.describe_exception(&exception)?,
            }),
            Err(ExecutionError::Fatal(error)) => Err(CliError::Vm(error)),
        }
    }

    /// One-line summary of every collection cycle, when statistics were kept.
    pub fn gc_summary(&self) -> Option<String> {
        if !self.vm.config().gc_stats {
            return None;
        }
        let history = self.vm.gc_history();
        let freed_objects: usize = history.iter().map(|stats| stats.freed_objects).sum();
        let freed_bytes: usize = history.iter().map(|stats| stats.freed_bytes).sum();
        let heap = self.vm.heap_stats();
        Some(format!(
            "[gc] {} cycles, freed {} objects ({} bytes), {} live blocks ({} bytes)",
            history.len(),
            freed_objects,
            freed_bytes,
            heap.live_blocks,
            heap.used_bytes
        ))
    }
}
