// SPDX-License-Identifier: GPL-3.0-only

//! Host view of the request protocol
//!
//! A request is `START`, then one argument word, then exactly one `FIN` from
//! the kernel. The job manager tracks where it is in that exchange and
//! refuses messages that would break it.

use crate::constants::MailboxMessage;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolState {
    /// No request outstanding
    #[default]
    Idle,
    /// `START` sent, argument word not yet sent
    AwaitingArg,
    /// Request submitted, `FIN` not yet received
    AwaitingFin,
}

impl ProtocolState {
    /// State after the host writes `word`, or `None` if the write is not allowed
    pub fn on_send(self, word: u64) -> Option<Self> {
        match self {
            Self::Idle if word == MailboxMessage::START => Some(Self::AwaitingArg),
            Self::Idle => Some(Self::Idle),
            Self::AwaitingArg => Some(Self::AwaitingFin),
            Self::AwaitingFin => None,
        }
    }

    /// Whether waiting for `expected` can ever complete from this state
    pub fn can_await(self, expected: MailboxMessage) -> bool {
        match (self, expected) {
            (Self::AwaitingFin, MailboxMessage::Fin) => true,
            (Self::AwaitingFin, _) | (Self::AwaitingArg, _) => false,
            (Self::Idle, MailboxMessage::Fin) => false,
            (Self::Idle, _) => true,
        }
    }

    /// State after `received` was read from the kernel
    pub fn on_received(self, received: MailboxMessage) -> Self {
        match (self, received) {
            (Self::AwaitingFin, MailboxMessage::Fin) => Self::Idle,
            (state, _) => state,
        }
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::AwaitingArg => write!(f, "awaiting argument"),
            Self::AwaitingFin => write!(f, "awaiting FIN"),
        }
    }
}
