// SPDX-License-Identifier: GPL-3.0-only

//! Emulated coprocessor platform
//!
//! Host memory, a fixed pool of coprocessor cores, and per-context local
//! stores, DMA engines and mailboxes. Kernels only ever see their
//! [`context::KernelEnv`]; the host drives them through [`job::CoprocessorJob`].

pub mod context;
pub mod dma;
pub mod job;
pub mod local_store;
pub mod mailbox;
pub mod memory;
pub mod program;
pub mod protocol;

pub use context::{CoprocessorContext, KernelEnv};
pub use job::CoprocessorJob;
pub use memory::{EffectiveAddress, HostBuffer, HostMemory};
pub use program::{KernelProgram, ProgramImage};

use crate::config::Config;
use crate::errors::JobError;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

struct CorePool {
    free: Mutex<Vec<usize>>,
    total: usize,
}

/// Exclusive use of one coprocessor core; returned to the pool on drop
pub struct CoreLease {
    pool: Arc<CorePool>,
    id: usize,
}

impl CoreLease {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl Drop for CoreLease {
    fn drop(&mut self) {
        match self.pool.free.lock() {
            Ok(mut free) => free.push(self.id),
            Err(e) => warn!(core = self.id, "Core pool lock poisoned: {}", e),
        }
    }
}

/// The whole platform: shared host memory plus the core pool
#[derive(Clone)]
pub struct CoprocessorSystem {
    memory: HostMemory,
    cores: Arc<CorePool>,
    local_store_size: usize,
}

impl CoprocessorSystem {
    pub fn new(cores: usize, local_store_size: usize) -> Self {
        Self {
            memory: HostMemory::new(),
            cores: Arc::new(CorePool {
                // Reversed so that leases hand out core 0 first
                free: Mutex::new((0..cores).rev().collect()),
                total: cores,
            }),
            local_store_size,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.coprocessor_cores, config.local_store_size)
    }

    pub fn memory(&self) -> &HostMemory {
        &self.memory
    }

    pub fn local_store_size(&self) -> usize {
        self.local_store_size
    }

    pub fn total_cores(&self) -> usize {
        self.cores.total
    }

    pub fn available_cores(&self) -> usize {
        self.cores.free.lock().map(|f| f.len()).unwrap_or(0)
    }

    /// Create a context on a free core
    pub fn create_context(&self, name: &str) -> Result<CoprocessorContext, JobError> {
        let creation_error = |reason: String| JobError::ContextCreation {
            name: name.to_string(),
            reason,
        };
        let id = self
            .cores
            .free
            .lock()
            .map_err(|_| creation_error("core pool lock poisoned".to_string()))?
            .pop()
            .ok_or_else(|| {
                creation_error(format!("all {} coprocessor cores are in use", self.cores.total))
            })?;
        debug!(context = name, core = id, "Core leased");

        let lease = CoreLease {
            pool: Arc::clone(&self.cores),
            id,
        };
        CoprocessorContext::new(name, lease, self.memory.clone(), self.local_store_size)
    }
}

impl std::fmt::Debug for CoprocessorSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoprocessorSystem")
            .field("cores", &self.cores.total)
            .field("available", &self.available_cores())
            .field("local_store_size", &self.local_store_size)
            .field("memory", &self.memory)
            .finish()
    }
}
