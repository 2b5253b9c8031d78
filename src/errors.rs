// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the offload pipeline
//!
//! Each layer has its own enum: host memory and DMA failures stay on the
//! coprocessor side ([`KernelError`]), lifecycle and mailbox failures surface
//! through [`JobError`], and the compositor folds everything into
//! [`ComposeError`].

use crate::constants::MailboxMessage;
use crate::coprocessor::memory::EffectiveAddress;
use crate::coprocessor::protocol::ProtocolState;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Host memory arena errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("address {addr} (+{len} bytes) is not inside any live host allocation")]
    InvalidAddress { addr: EffectiveAddress, len: usize },
    #[error("host address space exhausted while allocating {0} bytes")]
    OutOfAddressSpace(usize),
    #[error("host memory lock poisoned")]
    Poisoned,
}

/// DMA engine errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DmaError {
    #[error("DMA element of {len} bytes exceeds the {max} byte transfer limit")]
    TransferTooLarge { len: usize, max: usize },
    #[error("DMA element misaligned: local offset {local:#x} and address {ea} differ in their low four bits")]
    Misaligned { local: usize, ea: EffectiveAddress },
    #[error("DMA element [{offset:#x}, +{len}) lies outside the {capacity} byte staging buffer")]
    LocalOutOfRange {
        offset: usize,
        len: usize,
        capacity: usize,
    },
    #[error("DMA host access failed: {0}")]
    Host(#[from] MemoryError),
    #[error("DMA engine has shut down")]
    EngineGone,
    #[error("staging slot {0} holds no buffer")]
    SlotEmpty(usize),
}

/// Local store allocation errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocalStoreError {
    #[error("local store exhausted: requested {requested} bytes, {available} of {capacity} available")]
    Exhausted {
        requested: usize,
        available: usize,
        capacity: usize,
    },
}

/// Failures seen by a kernel while it runs on its coprocessor
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KernelError {
    #[error(transparent)]
    Dma(#[from] DmaError),
    #[error(transparent)]
    LocalStore(#[from] LocalStoreError),
    #[error("inbound mailbox closed")]
    InboxClosed,
    #[error("outbound mailbox closed")]
    OutboxClosed,
    #[error("START was not followed by a parameter block address (got {0})")]
    MissingArgument(MailboxMessage),
}

impl KernelError {
    /// Stop code reported to the host when a kernel terminates on this error
    pub fn stop_code(&self) -> i32 {
        match self {
            KernelError::Dma(_) => 1,
            KernelError::LocalStore(_) => 2,
            KernelError::InboxClosed | KernelError::OutboxClosed => 3,
            KernelError::MissingArgument(_) => 4,
        }
    }
}

/// Host-side job lifecycle and protocol errors
#[derive(Debug, Error)]
pub enum JobError {
    #[error("[{name}] failed creating coprocessor context: {reason}")]
    ContextCreation { name: String, reason: String },
    #[error("[{name}] failed loading program into coprocessor context: {reason}")]
    ProgramLoad { name: String, reason: String },
    #[error("[{name}] failed destroying coprocessor context: {reason}")]
    ContextDestroy { name: String, reason: String },
    #[error("[{name}] job has not been booted")]
    NotBooted { name: String },
    #[error("[{name}] job is not running")]
    NotRunning { name: String },
    #[error("[{name}] job is already running")]
    AlreadyRunning { name: String },
    #[error("[{name}] could not spawn execution thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("[{name}] no message could be written (value {value:#x})")]
    MailboxWrite { name: String, value: u64 },
    #[error("[{name}] expected {expected}, received {received}")]
    MessageMismatch {
        name: String,
        expected: MailboxMessage,
        received: MailboxMessage,
    },
    #[error("[{name}] {message} is not allowed while {state}")]
    Protocol {
        name: String,
        state: ProtocolState,
        message: MailboxMessage,
    },
    #[error("[{name}] job exited (stop code {code}) while a message was awaited")]
    JobExited { name: String, code: i32 },
    #[error("[{name}] no message within {waited:?}")]
    Timeout { name: String, waited: Duration },
    #[error("[{name}] failed joining the execution thread")]
    Join { name: String },
}

/// Framebuffer device errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("frame {index} does not exist, device has {frames} frame(s)")]
    NoSuchFrame { index: usize, frames: usize },
    #[error("unsupported pixel depth: {0} bits")]
    UnsupportedDepth(u32),
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Frame compositor errors
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("no video mode has been set")]
    ModeNotSet,
    #[error("{0} stage is unavailable")]
    StageUnavailable(&'static str),
    #[error("can't use YUV data on a {0} byte per pixel surface")]
    UnsupportedSurface(u32),
    #[error("invalid overlay geometry: {0}")]
    InvalidGeometry(String),
    #[error("write target {0} still waits for its flip to be acknowledged")]
    FlipPending(usize),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Main application error type
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Compositor error: {0}")]
    Compose(#[from] ComposeError),
    #[error("Job error: {0}")]
    Job(#[from] JobError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("{0}")]
    Other(String),
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}
