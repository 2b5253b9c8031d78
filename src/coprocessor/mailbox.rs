// SPDX-License-Identifier: GPL-3.0-only

//! Single-word mailboxes between host and kernel
//!
//! Each direction is a rendezvous channel holding at most one word. The host
//! end never blocks indefinitely: it polls so that the job manager can notice
//! a kernel that has already exited.

use crate::errors::KernelError;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::time::Duration;

/// Mailbox capacity per direction
const MAILBOX_DEPTH: usize = 1;

/// Outcome of a non-blocking host write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Accepted,
    Full,
    Closed,
}

/// Host side: writes the inbound mailbox, reads the outbound one
#[derive(Debug)]
pub struct HostMailbox {
    inbound: SyncSender<u64>,
    outbound: Receiver<u64>,
}

/// Kernel side: reads the inbound mailbox, writes the outbound one
#[derive(Debug)]
pub struct KernelMailbox {
    inbound: Receiver<u64>,
    outbound: SyncSender<u64>,
}

/// Create the two ends of a context's mailboxes
pub fn mailbox_pair() -> (HostMailbox, KernelMailbox) {
    let (in_tx, in_rx) = mpsc::sync_channel(MAILBOX_DEPTH);
    let (out_tx, out_rx) = mpsc::sync_channel(MAILBOX_DEPTH);
    (
        HostMailbox {
            inbound: in_tx,
            outbound: out_rx,
        },
        KernelMailbox {
            inbound: in_rx,
            outbound: out_tx,
        },
    )
}

impl HostMailbox {
    pub fn try_write(&self, word: u64) -> WriteStatus {
        match self.inbound.try_send(word) {
            Ok(()) => WriteStatus::Accepted,
            Err(TrySendError::Full(_)) => WriteStatus::Full,
            Err(TrySendError::Disconnected(_)) => WriteStatus::Closed,
        }
    }

    /// Wait up to `slice` for one outbound word
    pub fn read_timeout(&self, slice: Duration) -> Option<u64> {
        match self.outbound.recv_timeout(slice) {
            Ok(word) => Some(word),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_read(&self) -> Option<u64> {
        match self.outbound.try_recv() {
            Ok(word) => Some(word),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Discard anything left over from a previous run
    pub fn drain(&self) -> usize {
        self.outbound.try_iter().count()
    }
}

impl KernelMailbox {
    /// Block until the host writes a word
    pub fn read(&self) -> Result<u64, KernelError> {
        self.inbound.recv().map_err(|_| KernelError::InboxClosed)
    }

    /// Block until the host has room for `word`
    pub fn write(&self, word: u64) -> Result<(), KernelError> {
        self.outbound
            .send(word)
            .map_err(|_| KernelError::OutboxClosed)
    }

    pub fn drain(&self) -> usize {
        self.inbound.try_iter().count()
    }
}
