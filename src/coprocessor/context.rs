// SPDX-License-Identifier: GPL-3.0-only

//! Coprocessor execution contexts
//!
//! A [`CoprocessorContext`] is the host handle: it holds the core lease, the
//! host end of the mailboxes and the loaded program. Everything the kernel
//! itself touches lives in a [`KernelEnv`], which moves into the execution
//! thread for the duration of a run and comes back when the thread is
//! joined, so a context can be run again with the same local store and DMA
//! engine.

use super::CoreLease;
use super::dma::{DmaEngine, DmaList, aligned_offset, slot_stride};
use super::local_store::LocalStore;
use super::mailbox::{HostMailbox, KernelMailbox, mailbox_pair};
use super::memory::{EffectiveAddress, HostMemory};
use super::program::ProgramImage;
use crate::errors::{JobError, KernelError};
use crate::kernels::runtime;
use bytemuck::Pod;
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

/// DMA tag reserved for parameter block fetches
const PARAM_TAG: u8 = 31;

/// What a kernel sees of its context
pub struct KernelEnv {
    name: String,
    dma: DmaEngine,
    local_store: LocalStore,
    mailbox: KernelMailbox,
}

impl KernelEnv {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dma(&self) -> &DmaEngine {
        &self.dma
    }

    pub fn local_store(&self) -> &LocalStore {
        &self.local_store
    }

    pub fn mailbox(&self) -> &KernelMailbox {
        &self.mailbox
    }

    /// DMA a parameter block into the local store and decode it
    pub fn fetch_params<T: Pod>(&self, ea: EffectiveAddress) -> Result<T, KernelError> {
        let len = std::mem::size_of::<T>();
        let offset = aligned_offset(0, ea);
        let buffer = self.local_store.alloc(slot_stride(len))?;
        let buffer = self
            .dma
            .get(PARAM_TAG, buffer, DmaList::single(offset, ea, len))?
            .wait()?;
        Ok(bytemuck::pod_read_unaligned(&buffer[offset..offset + len]))
    }
}

type RunResult = (KernelEnv, i32);

/// Host handle to one context on a leased core
pub struct CoprocessorContext {
    name: String,
    core: CoreLease,
    host: HostMailbox,
    env: Option<KernelEnv>,
    program: Option<ProgramImage>,
    running: Option<JoinHandle<RunResult>>,
}

impl CoprocessorContext {
    pub(crate) fn new(
        name: &str,
        core: CoreLease,
        memory: HostMemory,
        local_store_size: usize,
    ) -> Result<Self, JobError> {
        let dma = DmaEngine::new(memory, name).map_err(|e| JobError::ContextCreation {
            name: name.to_string(),
            reason: format!("DMA engine: {}", e),
        })?;
        let (host, kernel) = mailbox_pair();

        debug!(context = name, core = core.id(), "Context created");
        Ok(Self {
            name: name.to_string(),
            core,
            host,
            env: Some(KernelEnv {
                name: name.to_string(),
                dma,
                local_store: LocalStore::new(local_store_size),
                mailbox: kernel,
            }),
            program: None,
            running: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn core_id(&self) -> usize {
        self.core.id()
    }

    pub fn program(&self) -> Option<&ProgramImage> {
        self.program.as_ref()
    }

    /// Load `image`; fails if it does not fit the local store
    pub fn load(&mut self, image: &ProgramImage) -> Result<(), JobError> {
        let load_error = |reason: String| JobError::ProgramLoad {
            name: self.name.clone(),
            reason,
        };
        if self.running.is_some() {
            return Err(load_error("context is running".to_string()));
        }
        let env = self
            .env
            .as_ref()
            .ok_or_else(|| load_error("context lost its local store".to_string()))?;
        let capacity = env.local_store.capacity();
        if image.local_store_footprint() > capacity {
            return Err(load_error(format!(
                "{} needs {} bytes of local store, context has {}",
                image.name(),
                image.local_store_footprint(),
                capacity
            )));
        }

        debug!(context = %self.name, program = image.name(), "Program loaded");
        self.program = Some(image.clone());
        Ok(())
    }

    /// Run the loaded program on its own thread.
    ///
    /// With `argp` the program processes that one request and exits;
    /// without it the program enters its message loop.
    pub fn run(&mut self, entry: u32, argp: Option<EffectiveAddress>) -> Result<(), JobError> {
        if self.running.is_some() {
            return Err(JobError::AlreadyRunning {
                name: self.name.clone(),
            });
        }
        let not_booted = || JobError::NotBooted {
            name: self.name.clone(),
        };
        let program = self.program.clone().ok_or_else(not_booted)?;
        let env = self.env.take().ok_or_else(not_booted)?;

        let stale = self.host.drain() + env.mailbox.drain();
        if stale > 0 {
            debug!(context = %self.name, stale, "Discarded stale mailbox words");
        }

        info!(context = %self.name, entry, argp = ?argp.map(|a| a.as_u64()), "Running context");
        let handle = thread::Builder::new()
            .name(format!("spe-{}", self.name))
            .spawn(move || {
                let code = runtime::execute(program.program(), &env, argp);
                (env, code)
            })
            .map_err(|source| JobError::Spawn {
                name: self.name.clone(),
                source,
            })?;

        self.running = Some(handle);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Whether the execution thread has returned and only awaits joining
    pub fn has_exited(&self) -> bool {
        self.running.as_ref().is_some_and(|h| h.is_finished())
    }

    /// Join the execution thread and return the program's stop code
    pub fn join(&mut self) -> Result<i32, JobError> {
        let handle = self.running.take().ok_or_else(|| JobError::NotRunning {
            name: self.name.clone(),
        })?;
        let (env, code) = handle.join().map_err(|_| JobError::Join {
            name: self.name.clone(),
        })?;
        self.env = Some(env);
        debug!(context = %self.name, code, "Context stopped");
        Ok(code)
    }

    pub fn mailbox(&self) -> &HostMailbox {
        &self.host
    }

    /// Release the context and its core.
    ///
    /// A program that already returned is joined first. One that is still
    /// running is refused with [`JobError::ContextDestroy`].
    pub fn destroy(mut self) -> Result<(), JobError> {
        if self.running.is_some() {
            if self.has_exited() {
                self.join()?;
            } else {
                return Err(JobError::ContextDestroy {
                    name: self.name.clone(),
                    reason: "program is still running".to_string(),
                });
            }
        }
        debug!(context = %self.name, core = self.core.id(), "Context destroyed");
        Ok(())
    }
}
