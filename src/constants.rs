// SPDX-License-Identifier: GPL-3.0-only

//! Platform-wide constants
//!
//! Sizes and limits of the emulated coprocessor platform, the mailbox word
//! vocabulary and the display modes the framebuffer backend offers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Alignment (and size granularity) of every parameter block handed to a kernel
pub const PARAM_BLOCK_ALIGN: usize = 128;

/// Alignment of host allocations made DMA-visible
pub const HOST_ALLOC_ALIGN: u64 = 128;

/// Largest single DMA element the engine accepts
pub const MAX_DMA_TRANSFER: usize = 16 * 1024;

/// DMA quadword size; local and effective addresses must agree modulo this
pub const DMA_QUADWORD: usize = 16;

/// Default private memory of one coprocessor context (256 KiB)
pub const DEFAULT_LOCAL_STORE_SIZE: usize = 256 * 1024;

/// Number of coprocessor cores available to applications by default
pub const DEFAULT_COPROCESSOR_CORES: usize = 6;

/// Widest line the kernels size their staging buffers for
pub const MAX_HDTV_WIDTH: usize = 1920;

/// Entry point used when (re)running a context
pub const DEFAULT_ENTRY: u32 = 0;

/// Polling slice used by the host while waiting on an outbound mailbox
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(50);

/// Fixed mailbox vocabulary shared by host and kernels.
///
/// Values outside this set are arguments and only carry meaning directly
/// after a [`MailboxMessage::Start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MailboxMessage {
    /// Kernel is up and accepting requests
    Ready,
    /// A request follows; next word is the parameter block address
    Start,
    /// Request finished
    Fin,
    /// Leave the message loop
    Exit,
    /// Caller-defined word, usually an effective address
    Argument(u64),
}

impl MailboxMessage {
    pub const READY: u64 = 0;
    pub const START: u64 = 1;
    pub const FIN: u64 = 2;
    pub const EXIT: u64 = 3;

    /// Decode a raw mailbox word
    pub fn from_word(word: u64) -> Self {
        match word {
            Self::READY => Self::Ready,
            Self::START => Self::Start,
            Self::FIN => Self::Fin,
            Self::EXIT => Self::Exit,
            other => Self::Argument(other),
        }
    }

    /// Encode to the raw mailbox word
    pub fn to_word(self) -> u64 {
        match self {
            Self::Ready => Self::READY,
            Self::Start => Self::START,
            Self::Fin => Self::FIN,
            Self::Exit => Self::EXIT,
            Self::Argument(value) => value,
        }
    }
}

impl std::fmt::Display for MailboxMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "READY"),
            Self::Start => write!(f, "START"),
            Self::Fin => write!(f, "FIN"),
            Self::Exit => write!(f, "EXIT"),
            Self::Argument(value) => write!(f, "ARG({:#x})", value),
        }
    }
}

/// A display mode offered by the framebuffer backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VideoMode {
    pub width: u32,
    pub height: u32,
    /// Short human readable name
    pub label: &'static str,
}

/// Supported display modes, sorted largest to smallest
pub const VIDEO_MODES: [VideoMode; 9] = [
    VideoMode { width: 1920, height: 1080, label: "1080p 16:9 HD" },
    VideoMode { width: 1600, height: 1200, label: "WUXGA" },
    VideoMode { width: 1280, height: 1024, label: "SXGA" },
    VideoMode { width: 1280, height: 720, label: "720p 16:9 HD" },
    VideoMode { width: 1024, height: 768, label: "WXGA" },
    VideoMode { width: 1024, height: 576, label: "576p 16:9" },
    VideoMode { width: 853, height: 480, label: "480p 16:9" },
    VideoMode { width: 720, height: 576, label: "576p 4:3 (PAL)" },
    VideoMode { width: 720, height: 480, label: "480p 16:9 (NTSC)" },
];

/// Round `value` up to the next multiple of `align` (power of two)
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailbox_words_round_trip_through_vocabulary() {
        assert_eq!(MailboxMessage::from_word(0), MailboxMessage::Ready);
        assert_eq!(MailboxMessage::from_word(3), MailboxMessage::Exit);
        assert_eq!(
            MailboxMessage::from_word(0x1000),
            MailboxMessage::Argument(0x1000)
        );
        assert_eq!(MailboxMessage::Fin.to_word(), 2);
    }

    #[test]
    fn align_up_rounds_to_boundary() {
        assert_eq!(align_up(0, 128), 0);
        assert_eq!(align_up(1, 128), 128);
        assert_eq!(align_up(128, 128), 128);
        assert_eq!(align_up(129, 16), 144);
    }
}
