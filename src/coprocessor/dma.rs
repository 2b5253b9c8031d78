// SPDX-License-Identifier: GPL-3.0-only

//! Tagged DMA between host memory and a local store
//!
//! Each context owns one engine backed by a worker thread. A transfer takes
//! ownership of its staging buffer and hands it back from [`Transfer::wait`],
//! so a buffer can never be touched by compute while a transfer on it is
//! still in flight. Dropping an unwaited transfer blocks until it retires.
//!
//! The engine enforces the flow-controller rules: an element moves at most
//! [`MAX_DMA_TRANSFER`] bytes and its local offset and effective address must
//! agree in their low four bits. [`DmaList::push`] splits larger elements and
//! [`aligned_offset`] places data inside a slot so that the rule holds for
//! rows that start at arbitrary addresses.

use super::local_store::LocalBuffer;
use super::memory::{EffectiveAddress, HostMemory};
use crate::constants::{DMA_QUADWORD, MAX_DMA_TRANSFER, align_up};
use crate::errors::DmaError;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace};

/// Transfer direction, named from the local store's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host memory to local store
    Get,
    /// Local store to host memory
    Put,
}

/// One contiguous piece of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaElement {
    pub local_offset: usize,
    pub ea: EffectiveAddress,
    pub len: usize,
}

/// Scatter/gather list executed as a single tagged command
#[derive(Debug, Clone, Default)]
pub struct DmaList {
    elements: Vec<DmaElement>,
}

impl DmaList {
    pub fn new() -> Self {
        Self::default()
    }

    /// List holding a single (possibly split) element
    pub fn single(local_offset: usize, ea: EffectiveAddress, len: usize) -> Self {
        let mut list = Self::new();
        list.push(local_offset, ea, len);
        list
    }

    /// Append an element, split into pieces of at most [`MAX_DMA_TRANSFER`] bytes
    pub fn push(&mut self, local_offset: usize, ea: EffectiveAddress, len: usize) -> &mut Self {
        let mut done = 0;
        while done < len {
            let chunk = (len - done).min(MAX_DMA_TRANSFER);
            self.elements.push(DmaElement {
                local_offset: local_offset + done,
                ea: ea.offset(done),
                len: chunk,
            });
            done += chunk;
        }
        self
    }

    pub fn elements(&self) -> &[DmaElement] {
        &self.elements
    }

    pub fn total_len(&self) -> usize {
        self.elements.iter().map(|e| e.len).sum()
    }

    fn validate(&self, capacity: usize) -> Result<(), DmaError> {
        for element in &self.elements {
            if element.len > MAX_DMA_TRANSFER {
                return Err(DmaError::TransferTooLarge {
                    len: element.len,
                    max: MAX_DMA_TRANSFER,
                });
            }
            if element.local_offset % DMA_QUADWORD
                != element.ea.misalignment(DMA_QUADWORD as u64)
            {
                return Err(DmaError::Misaligned {
                    local: element.local_offset,
                    ea: element.ea,
                });
            }
            if element
                .local_offset
                .checked_add(element.len)
                .is_none_or(|end| end > capacity)
            {
                return Err(DmaError::LocalOutOfRange {
                    offset: element.local_offset,
                    len: element.len,
                    capacity,
                });
            }
        }
        Ok(())
    }
}

/// Bytes to reserve for one row slot of `len` bytes whose start address is
/// not known in advance
pub const fn slot_stride(len: usize) -> usize {
    align_up(len, DMA_QUADWORD) + DMA_QUADWORD
}

/// Offset inside a quadword-aligned slot at which data from `ea` must land
pub fn aligned_offset(slot_start: usize, ea: EffectiveAddress) -> usize {
    slot_start + ea.misalignment(DMA_QUADWORD as u64)
}

type Completion = (LocalBuffer, Result<(), DmaError>);

struct Command {
    tag: u8,
    direction: Direction,
    buffer: LocalBuffer,
    list: DmaList,
    reply: Sender<Completion>,
}

/// In-flight transfer; owns its staging buffer until it retires
#[must_use = "a transfer must be waited on to get its buffer back"]
pub struct Transfer {
    tag: u8,
    direction: Direction,
    reply: Option<Receiver<Completion>>,
}

impl Transfer {
    pub fn tag(&self) -> u8 {
        self.tag
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Block until the tag retires and return the staging buffer
    pub fn wait(mut self) -> Result<LocalBuffer, DmaError> {
        let reply = self.reply.take().ok_or(DmaError::EngineGone)?;
        match reply.recv() {
            Ok((buffer, Ok(()))) => Ok(buffer),
            Ok((_, Err(e))) => Err(e),
            Err(_) => Err(DmaError::EngineGone),
        }
    }
}

impl Drop for Transfer {
    fn drop(&mut self) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.recv();
        }
    }
}

/// DMA engine of one coprocessor context
pub struct DmaEngine {
    queue: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl DmaEngine {
    pub fn new(memory: HostMemory, name: &str) -> std::io::Result<Self> {
        let (queue, commands) = mpsc::channel::<Command>();
        let worker = thread::Builder::new()
            .name(format!("{}-dma", name))
            .spawn(move || worker_main(memory, commands))?;

        Ok(Self {
            queue: Some(queue),
            worker: Some(worker),
        })
    }

    /// Fetch `list` from host memory into `buffer`
    pub fn get(&self, tag: u8, buffer: LocalBuffer, list: DmaList) -> Result<Transfer, DmaError> {
        self.issue(tag, Direction::Get, buffer, list)
    }

    /// Store `list` from `buffer` to host memory
    pub fn put(&self, tag: u8, buffer: LocalBuffer, list: DmaList) -> Result<Transfer, DmaError> {
        self.issue(tag, Direction::Put, buffer, list)
    }

    fn issue(
        &self,
        tag: u8,
        direction: Direction,
        buffer: LocalBuffer,
        list: DmaList,
    ) -> Result<Transfer, DmaError> {
        list.validate(buffer.len())?;
        trace!(
            tag,
            ?direction,
            elements = list.elements().len(),
            bytes = list.total_len(),
            "DMA issued"
        );

        let (reply, completion) = mpsc::channel();
        let queue = self.queue.as_ref().ok_or(DmaError::EngineGone)?;
        queue
            .send(Command {
                tag,
                direction,
                buffer,
                list,
                reply,
            })
            .map_err(|_| DmaError::EngineGone)?;

        Ok(Transfer {
            tag,
            direction,
            reply: Some(completion),
        })
    }
}

impl Drop for DmaEngine {
    fn drop(&mut self) {
        // Closing the queue ends the worker loop
        self.queue.take();
        if let Some(worker) = self.worker.take()
            && let Err(e) = worker.join()
        {
            error!("DMA worker panicked: {:?}", e);
        }
    }
}

fn worker_main(memory: HostMemory, commands: Receiver<Command>) {
    debug!("DMA worker started");
    while let Ok(mut command) = commands.recv() {
        let result = execute(&memory, command.direction, &mut command.buffer, &command.list);
        if let Err(e) = &result {
            debug!(tag = command.tag, error = %e, "DMA command failed");
        }
        // The issuer may have given up on the transfer; nothing to report then
        let _ = command.reply.send((command.buffer, result));
    }
    debug!("DMA worker stopped");
}

fn execute(
    memory: &HostMemory,
    direction: Direction,
    buffer: &mut LocalBuffer,
    list: &DmaList,
) -> Result<(), DmaError> {
    for element in list.elements() {
        let local = &mut buffer[element.local_offset..element.local_offset + element.len];
        match direction {
            Direction::Get => memory.read(element.ea, local)?,
            Direction::Put => memory.write(element.ea, local)?,
        }
    }
    Ok(())
}

/// State of one staging slot in a multi-buffered pipeline
pub enum Staged {
    Ready(LocalBuffer),
    InFlight(Transfer),
    Empty,
}

/// Fixed set of staging slots, each either idle or owned by a transfer
pub struct StagingRing {
    slots: Vec<Staged>,
}

impl StagingRing {
    pub fn new(buffers: Vec<LocalBuffer>) -> Self {
        Self {
            slots: buffers.into_iter().map(Staged::Ready).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Take the buffer of `slot`, waiting for its transfer if one is in flight
    pub fn acquire(&mut self, slot: usize) -> Result<LocalBuffer, DmaError> {
        let staged = self
            .slots
            .get_mut(slot)
            .map(|s| std::mem::replace(s, Staged::Empty))
            .ok_or(DmaError::SlotEmpty(slot))?;
        match staged {
            Staged::Ready(buffer) => Ok(buffer),
            Staged::InFlight(transfer) => transfer.wait(),
            Staged::Empty => Err(DmaError::SlotEmpty(slot)),
        }
    }

    /// Hand `slot` back, either idle or with a transfer in flight
    pub fn release(&mut self, slot: usize, staged: Staged) {
        if let Some(s) = self.slots.get_mut(slot) {
            *s = staged;
        }
    }

    /// Wait for every transfer still in flight
    pub fn drain(&mut self) -> Result<(), DmaError> {
        for slot in 0..self.slots.len() {
            if matches!(self.slots[slot], Staged::InFlight(_)) {
                let buffer = self.acquire(slot)?;
                self.slots[slot] = Staged::Ready(buffer);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coprocessor::local_store::LocalStore;

    fn engine() -> (HostMemory, LocalStore, DmaEngine) {
        let memory = HostMemory::new();
        let store = LocalStore::new(64 * 1024);
        let engine = DmaEngine::new(memory.clone(), "test").unwrap();
        (memory, store, engine)
    }

    #[test]
    fn large_elements_are_split() {
        let list = DmaList::single(0, EffectiveAddress(0x1000_0000), 40_000);
        let lens: Vec<_> = list.elements().iter().map(|e| e.len).collect();
        assert_eq!(lens, vec![16384, 16384, 7232]);
        assert_eq!(list.elements()[2].local_offset, 32768);
        assert_eq!(list.total_len(), 40_000);
    }

    #[test]
    fn get_then_put_moves_bytes() {
        let (memory, store, engine) = engine();
        let src = memory.alloc(256).unwrap();
        let dst = memory.alloc(256).unwrap();
        let pattern: Vec<u8> = (0..=255).collect();
        src.write_at(0, &pattern).unwrap();

        let buffer = store.alloc(256).unwrap();
        let fetch = engine
            .get(0, buffer, DmaList::single(0, src.addr(), 256))
            .unwrap();
        assert_eq!((fetch.tag(), fetch.direction()), (0, Direction::Get));
        let buffer = fetch.wait().unwrap();
        let store_back = engine
            .put(1, buffer, DmaList::single(0, dst.addr(), 256))
            .unwrap();
        assert_eq!((store_back.tag(), store_back.direction()), (1, Direction::Put));
        store_back.wait().unwrap();
        assert_eq!(dst.to_vec().unwrap(), pattern);
    }

    #[test]
    fn mismatched_low_bits_are_rejected() {
        let (memory, store, engine) = engine();
        let src = memory.alloc(64).unwrap();
        let buffer = store.alloc(64).unwrap();
        let result = engine.get(0, buffer, DmaList::single(0, src.addr().offset(8), 16));
        assert!(matches!(result, Err(DmaError::Misaligned { local: 0, .. })));
    }

    #[test]
    fn aligned_offset_matches_low_bits() {
        let (memory, store, engine) = engine();
        let src = memory.alloc(64).unwrap();
        src.write_at(8, &[9u8; 8]).unwrap();
        let ea = src.addr().offset(8);
        let offset = aligned_offset(slot_stride(8), ea);
        let buffer = store.alloc(2 * slot_stride(8)).unwrap();
        let buffer = engine
            .get(3, buffer, DmaList::single(offset, ea, 8))
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(&buffer[offset..offset + 8], &[9u8; 8]);
    }

    #[test]
    fn invalid_host_address_fails_on_wait() {
        let (_memory, store, engine) = engine();
        let buffer = store.alloc(16).unwrap();
        let transfer = engine
            .get(0, buffer, DmaList::single(0, EffectiveAddress(0x20), 16))
            .unwrap();
        assert!(matches!(transfer.wait(), Err(DmaError::Host(_))));
    }

    #[test]
    fn ring_waits_for_in_flight_slot() {
        let (memory, store, engine) = engine();
        let src = memory.alloc(32).unwrap();
        src.write_at(0, &[5u8; 32]).unwrap();
        let mut ring = StagingRing::new(vec![store.alloc(32).unwrap()]);

        let buffer = ring.acquire(0).unwrap();
        let transfer = engine
            .get(0, buffer, DmaList::single(0, src.addr(), 32))
            .unwrap();
        ring.release(0, Staged::InFlight(transfer));
        let buffer = ring.acquire(0).unwrap();
        assert_eq!(&buffer[..], &[5u8; 32]);
        assert!(matches!(ring.acquire(0), Err(DmaError::SlotEmpty(0))));
    }
}
