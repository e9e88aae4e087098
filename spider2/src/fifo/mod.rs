// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! FIFO buffer allocation with zero-copy aliasing for fork/duplicate/repeat
//! and persistent delay reservations (spec.md §4.7).

use crate::error::{Result, Spider2Error};
use crate::graph::EdgeId;
use crate::schedule::Cluster;
use ahash::AHashMap as HashMap;

/// Classification of a buffer, controlling whether the allocator frees it
/// and whether consumers may write to it (spec.md §3, GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FifoAttribute {
    /// Exclusively owned; the allocator reclaims it when its count hits 0.
    RwOwn,
    /// Owned by an external registration (e.g. EXTERN_IN); never reclaimed
    /// by this allocator.
    RwExt,
    /// Read-only alias produced by merging several producer slices.
    RMerge,
    /// Read-only alias of another fifo (fork/duplicate outputs).
    RSame,
    /// Write-only alias into a slice of another fifo (join inputs).
    WSame,
}

/// A single allocated (or aliased) buffer view.
#[derive(Debug, Clone)]
pub struct Fifo {
    pub address: u64,
    pub offset: u64,
    pub size: u64,
    pub attribute: FifoAttribute,
    pub buffer_index: Option<u32>,
    count: u32,
}

impl Fifo {
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Workers call this on consumption; the allocator reclaims storage
    /// once every consumer has released its reference.
    pub fn release(&mut self) -> bool {
        self.count = self.count.saturating_sub(1);
        self.count == 0
    }
}

/// Physical-address translation for one cluster. Spec.md §6 treats this as
/// an external collaborator; the allocator only deals in virtual addresses.
pub trait MemoryInterface {
    fn allocate(&mut self, cluster: Cluster, size: u64) -> Result<u64>;
    fn deallocate(&mut self, cluster: Cluster, address: u64, size: u64);
}

/// A bump allocator that never reclaims, used in tests and as the default
/// for hosts that don't need real physical memory accounting — the managed
/// side of spec.md §9's "stack-scoped allocators are optional" note.
#[derive(Default)]
pub struct UnboundedMemoryInterface {
    next: u64,
}

impl MemoryInterface for UnboundedMemoryInterface {
    fn allocate(&mut self, _cluster: Cluster, size: u64) -> Result<u64> {
        let addr = self.next;
        self.next += size.max(1);
        Ok(addr)
    }

    fn deallocate(&mut self, _cluster: Cluster, _address: u64, _size: u64) {}
}

/// Allocates and tracks [`Fifo`] views for one iteration's tasks, plus
/// stable reservations for persistent delays.
pub struct FifoAllocator<M: MemoryInterface> {
    memory: M,
    persistent: HashMap<EdgeId, Fifo>,
}

impl<M: MemoryInterface> FifoAllocator<M> {
    pub fn new(memory: M) -> Self {
        FifoAllocator { memory, persistent: HashMap::new() }
    }

    /// Normal vertex input: copy the producer's output fifo view,
    /// downgrading `RW_EXT` to `RW_OWN` (the consumer now owns reclaiming
    /// it once every reader is done).
    pub fn alloc_normal_input(&self, producer: &Fifo, consumer_count: u32) -> Fifo {
        let attribute = if producer.attribute == FifoAttribute::RwExt { FifoAttribute::RwOwn } else { producer.attribute };
        Fifo {
            address: producer.address,
            offset: producer.offset,
            size: producer.size,
            attribute,
            buffer_index: producer.buffer_index,
            count: consumer_count,
        }
    }

    /// Fork outputs: offset slices of the single shared input, summing to
    /// the input's size.
    pub fn alloc_fork_outputs(&self, input: &Fifo, out_sizes: &[u64]) -> Result<Vec<Fifo>> {
        let total: u64 = out_sizes.iter().sum();
        if total != input.size {
            return Err(Spider2Error::AllocationError(format!(
                "fork output sizes sum to {total}, expected {}",
                input.size
            )));
        }
        let mut offset = input.offset;
        let mut out = Vec::with_capacity(out_sizes.len());
        for &size in out_sizes {
            out.push(Fifo {
                address: input.address,
                offset,
                size,
                attribute: FifoAttribute::RSame,
                buffer_index: input.buffer_index,
                count: 1,
            });
            offset += size;
        }
        Ok(out)
    }

    /// Duplicate outputs: every output aliases the single input at offset 0.
    pub fn alloc_duplicate_outputs(&self, input: &Fifo, n: usize) -> Vec<Fifo> {
        (0..n)
            .map(|_| Fifo {
                address: input.address,
                offset: input.offset,
                size: input.size,
                attribute: FifoAttribute::RSame,
                buffer_index: input.buffer_index,
                count: 1,
            })
            .collect()
    }

    /// Join output: a fresh owned buffer of summed size; each input becomes
    /// a write-only slice at its respective offset.
    pub fn alloc_join(&mut self, cluster: Cluster, input_sizes: &[u64], consumer_count: u32) -> Result<(Fifo, Vec<Fifo>)> {
        let total: u64 = input_sizes.iter().sum();
        let address = self.memory.allocate(cluster, total)?;
        let output = Fifo {
            address,
            offset: 0,
            size: total,
            attribute: FifoAttribute::RwOwn,
            buffer_index: None,
            count: consumer_count,
        };
        let mut offset = 0u64;
        let mut inputs = Vec::with_capacity(input_sizes.len());
        for &size in input_sizes {
            inputs.push(Fifo {
                address,
                offset,
                size,
                attribute: FifoAttribute::WSame,
                buffer_index: None,
                count: 1,
            });
            offset += size;
        }
        Ok((output, inputs))
    }

    /// Repeat: alias in place when sizes match, otherwise allocate a fresh
    /// output.
    pub fn alloc_repeat(&mut self, cluster: Cluster, input: &Fifo, output_size: u64, consumer_count: u32) -> Result<Fifo> {
        if input.size == output_size && input.attribute != FifoAttribute::RwOwn {
            return Ok(Fifo {
                address: input.address,
                offset: input.offset,
                size: output_size,
                attribute: FifoAttribute::RSame,
                buffer_index: input.buffer_index,
                count: consumer_count,
            });
        }
        let address = self.memory.allocate(cluster, output_size)?;
        Ok(Fifo {
            address,
            offset: 0,
            size: output_size,
            attribute: FifoAttribute::RwOwn,
            buffer_index: None,
            count: consumer_count,
        })
    }

    /// Extern-in: references a pre-registered external buffer by index.
    pub fn alloc_extern_in(&self, buffer_index: u32, size: u64, consumer_count: u32) -> Fifo {
        Fifo { address: 0, offset: 0, size, attribute: FifoAttribute::RwExt, buffer_index: Some(buffer_index), count: consumer_count }
    }

    /// Reserve (once) a stable address range for a persistent delay. Later
    /// calls for the same edge return the existing reservation unchanged.
    pub fn reserve_persistent(&mut self, edge: EdgeId, cluster: Cluster, size: u64) -> Result<&Fifo> {
        if !self.persistent.contains_key(&edge) {
            let address = self.memory.allocate(cluster, size)?;
            self.persistent.insert(
                edge,
                Fifo { address, offset: 0, size, attribute: FifoAttribute::RwOwn, buffer_index: None, count: 1 },
            );
        }
        Ok(&self.persistent[&edge])
    }

    /// Release one consumer's reference; reclaims the backing storage via
    /// the memory interface once the count reaches zero. No-op for aliases
    /// and external/persistent buffers, which are never reclaimed here.
    pub fn release(&mut self, cluster: Cluster, fifo: &mut Fifo) {
        if !matches!(fifo.attribute, FifoAttribute::RwOwn) {
            return;
        }
        if fifo.release() {
            self.memory.deallocate(cluster, fifo.address, fifo.size);
        }
    }
}
