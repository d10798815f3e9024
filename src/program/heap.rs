// The program heap stores every compiled block as a contiguous run of four-word
// instructions. Blocks are never addressed by raw offset from the outside: a handle
// indexes a table entry that records the block's current offset and size, and
// instruction pointers captured at runtime (the resumption point of a Try block, the
// body of a list) get table entries of their own through gethandle. Compaction copies
// the live blocks down over freed ones and rewrites the offsets in the table, so every
// handle handed out before compaction still resolves afterwards.

//! Relocatable instruction storage.

use super::opcode::INSTRUCTION_SIZE;
use crate::core::{Instruction, VmError, VmResult};
use hashbrown::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Allocated,
    Freed,
    Purged,
    Pointer,
}

#[derive(Debug, Clone, Copy)]
struct TableEntry {
    offset: usize,
    size: usize,
    state: SlotState,
}

/// Flat instruction heap with a handle table.
#[derive(Default)]
pub struct Heap {
    words: Vec<u32>,
    table: Vec<TableEntry>,
    pointers: HashMap<usize, u32>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of words in use.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Start a block at the current end of the heap.
    pub fn malloc(&mut self) -> u32 {
        self.table.push(TableEntry {
            offset: self.words.len(),
            size: 0,
            state: SlotState::Allocated,
        });
        (self.table.len() - 1) as u32
    }

    pub fn push(&mut self, instruction: Instruction) {
        self.words.extend_from_slice(&instruction);
    }

    /// Close the block started by [`Heap::malloc`].
    pub fn finish_malloc(&mut self, handle: u32) {
        let end = self.words.len();
        if let Some(entry) = self.table.get_mut(handle as usize) {
            entry.size = end - entry.offset;
        }
    }

    /// Copy a finished block into the heap and return its handle.
    pub fn commit(&mut self, instructions: &[Instruction]) -> u32 {
        let handle = self.malloc();
        for instruction in instructions {
            self.push(*instruction);
        }
        self.finish_malloc(handle);
        handle
    }

    /// Current address of a handle.
    pub fn getaddr(&self, handle: u32) -> VmResult<usize> {
        match self.table.get(handle as usize) {
            Some(entry) if matches!(entry.state, SlotState::Allocated | SlotState::Pointer) => {
                Ok(entry.offset)
            }
            _ => Err(VmError::UnresolvedHandle { handle }),
        }
    }

    /// Handle for an instruction address inside a live block. Repeated
    /// requests for the same address share one handle.
    pub fn gethandle(&mut self, address: usize) -> u32 {
        if let Some(handle) = self.pointers.get(&address) {
            return *handle;
        }
        self.table.push(TableEntry {
            offset: address,
            size: 0,
            state: SlotState::Pointer,
        });
        let handle = (self.table.len() - 1) as u32;
        self.pointers.insert(address, handle);
        handle
    }

    pub fn free(&mut self, handle: u32) {
        if let Some(entry) = self.table.get_mut(handle as usize) {
            if entry.state == SlotState::Allocated {
                entry.state = SlotState::Freed;
            }
        }
    }

    /// Drop freed blocks and move live ones down. Pointers into freed blocks
    /// stop resolving; every other handle keeps resolving to the same code.
    pub fn compact(&mut self) {
        let mut words = Vec::with_capacity(self.words.len());
        // (old offset, size, new offset) of every surviving block
        let mut moved: Vec<(usize, usize, usize)> = Vec::new();
        let mut purged = 0;

        for entry in self.table.iter_mut() {
            match entry.state {
                SlotState::Freed => {
                    entry.state = SlotState::Purged;
                    purged += entry.size;
                }
                SlotState::Allocated => {
                    let start = words.len();
                    words.extend_from_slice(&self.words[entry.offset..entry.offset + entry.size]);
                    moved.push((entry.offset, entry.size, start));
                    entry.offset = start;
                }
                SlotState::Purged | SlotState::Pointer => {}
            }
        }

        self.pointers.clear();
        for (handle, entry) in self.table.iter_mut().enumerate() {
            if entry.state != SlotState::Pointer {
                continue;
            }
            let target = moved
                .iter()
                .find(|(old, size, _)| entry.offset >= *old && entry.offset < old + size);
            match target {
                Some((old, _, new)) => {
                    entry.offset = new + (entry.offset - old);
                    self.pointers.insert(entry.offset, handle as u32);
                }
                None => entry.state = SlotState::Purged,
            }
        }

        log::debug!(
            "heap compacted: {} -> {} words ({purged} purged)",
            self.words.len(),
            words.len()
        );
        self.words = words;
    }

    /// Instruction at `address`.
    pub fn instruction(&self, address: usize) -> VmResult<Instruction> {
        let words = self
            .words
            .get(address..address + INSTRUCTION_SIZE)
            .ok_or(VmError::AddressOutOfRange { address })?;
        Ok([words[0], words[1], words[2], words[3]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(tag: u32, len: usize) -> Vec<Instruction> {
        (0..len).map(|i| [tag, i as u32, 0, 0]).collect()
    }

    #[test]
    fn test_commit_and_resolve() {
        let mut heap = Heap::new();
        let a = heap.commit(&block(1, 2));
        let b = heap.commit(&block(2, 3));
        assert_eq!(heap.getaddr(a).unwrap(), 0);
        assert_eq!(heap.getaddr(b).unwrap(), 8);
        assert_eq!(heap.instruction(12).unwrap(), [2, 1, 0, 0]);
        assert!(heap.instruction(20).is_err());
    }

    #[test]
    fn test_gethandle_is_deduplicated() {
        let mut heap = Heap::new();
        heap.commit(&block(1, 4));
        let first = heap.gethandle(8);
        assert_eq!(heap.gethandle(8), first);
        assert_ne!(heap.gethandle(4), first);
    }

    #[test]
    fn test_compact_keeps_handles_valid() {
        let mut heap = Heap::new();
        let a = heap.commit(&block(1, 2));
        let b = heap.commit(&block(2, 2));
        let c = heap.commit(&block(3, 2));
        let inside_c = heap.gethandle(heap.getaddr(c).unwrap() + 4);
        let inside_b = heap.gethandle(heap.getaddr(b).unwrap());

        heap.free(b);
        heap.compact();

        assert_eq!(heap.len(), 16);
        assert_eq!(heap.getaddr(a).unwrap(), 0);
        assert_eq!(heap.getaddr(c).unwrap(), 8);
        let address = heap.getaddr(inside_c).unwrap();
        assert_eq!(heap.instruction(address).unwrap(), [3, 1, 0, 0]);
        assert!(matches!(
            heap.getaddr(b),
            Err(VmError::UnresolvedHandle { .. })
        ));
        assert!(heap.getaddr(inside_b).is_err());
    }
}
