//! Fixed ring pools of frame buffers
//!
//! Both streams get `N` slots carved out of one anonymous mapping. Slots are
//! handed out by `capture_counter % N` with no reference counting: a consumer
//! must be done with slot `i` before the producer comes back to it `N`
//! captures later. Wrapping onto a slot that was never released is allowed,
//! but it is logged and counted so the hazard stays visible.

use memmap2::MmapMut;
use tracing::{debug, warn};

use crate::capture::frame::{BufferAddress, StreamType};
use crate::error::PoolError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub acquired: u64,
    pub released: u64,
    pub reused_while_held: u64,
}

/// Slot bookkeeping for one stream
struct RingPool {
    base: usize,
    slot_size: usize,
    capacity: usize,
    counter: u64,
    held: Vec<bool>,
    stats: PoolStats,
}

impl RingPool {
    fn new(base: usize, slot_size: usize, capacity: usize) -> Self {
        Self {
            base,
            slot_size,
            capacity,
            counter: 0,
            held: vec![false; capacity],
            stats: PoolStats::default(),
        }
    }

    fn acquire(&mut self, stream: StreamType) -> Option<BufferAddress> {
        if self.capacity == 0 || self.slot_size == 0 {
            return None;
        }

        let slot = (self.counter % self.capacity as u64) as usize;
        self.counter += 1;
        self.stats.acquired += 1;

        if self.held[slot] {
            self.stats.reused_while_held += 1;
            metrics::counter!("argus_pool_reuse_while_held_total").increment(1);
            warn!("{} slot {} reused before its consumer released it", stream, slot);
        }
        self.held[slot] = true;

        Some(BufferAddress::new(stream, slot))
    }

    fn release(&mut self, slot: usize) {
        if let Some(held) = self.held.get_mut(slot) {
            if *held {
                *held = false;
                self.stats.released += 1;
            }
        }
    }

    fn range(&self, slot: usize) -> Option<std::ops::Range<usize>> {
        (slot < self.capacity).then(|| {
            let start = self.base + slot * self.slot_size;
            start..start + self.slot_size
        })
    }
}

/// The full-resolution and downscaled ring pools
pub struct FramePools {
    region: MmapMut,
    full_res: RingPool,
    downscaled: RingPool,
}

fn page_align(len: usize) -> usize {
    let page = page_size::get();
    len.div_ceil(page) * page
}

impl FramePools {
    /// Map `capacity` slots per stream. Slot sizes are rounded up to whole pages.
    pub fn new(
        full_res_slot_size: usize,
        downscaled_slot_size: usize,
        capacity: usize,
    ) -> Result<Self, PoolError> {
        let full_res_slot = page_align(full_res_slot_size);
        let downscaled_slot = page_align(downscaled_slot_size);
        let full_res_len = full_res_slot * capacity;
        let total = full_res_len + downscaled_slot * capacity;

        let region = MmapMut::map_anon(total.max(page_size::get()))
            .map_err(|e| PoolError::Map(e.to_string()))?;

        debug!(
            "Mapped {} bytes for {} x ({} + {}) byte frame slots",
            region.len(),
            capacity,
            full_res_slot,
            downscaled_slot
        );

        Ok(Self {
            region,
            full_res: RingPool::new(0, full_res_slot, capacity),
            downscaled: RingPool::new(full_res_len, downscaled_slot, capacity),
        })
    }

    fn pool(&self, stream: StreamType) -> &RingPool {
        match stream {
            StreamType::FullResolution => &self.full_res,
            StreamType::Downscaled => &self.downscaled,
        }
    }

    fn pool_mut(&mut self, stream: StreamType) -> &mut RingPool {
        match stream {
            StreamType::FullResolution => &mut self.full_res,
            StreamType::Downscaled => &mut self.downscaled,
        }
    }

    /// Next slot of the stream's ring, or `None` when the pool has no buffers
    pub fn acquire_slot(&mut self, stream: StreamType) -> Option<BufferAddress> {
        self.pool_mut(stream).acquire(stream)
    }

    /// Mark a slot as no longer referenced by any consumer
    pub fn release_slot(&mut self, address: BufferAddress) {
        self.pool_mut(address.stream).release(address.slot);
    }

    pub fn is_held(&self, address: BufferAddress) -> bool {
        self.pool(address.stream)
            .held
            .get(address.slot)
            .copied()
            .unwrap_or(false)
    }

    pub fn buffer(&self, address: BufferAddress) -> Result<&[u8], PoolError> {
        let range = self
            .pool(address.stream)
            .range(address.slot)
            .ok_or(PoolError::UnknownBuffer(address))?;
        Ok(&self.region[range])
    }

    pub fn buffer_mut(&mut self, address: BufferAddress) -> Result<&mut [u8], PoolError> {
        let range = self
            .pool(address.stream)
            .range(address.slot)
            .ok_or(PoolError::UnknownBuffer(address))?;
        Ok(&mut self.region[range])
    }

    pub fn capacity(&self, stream: StreamType) -> usize {
        self.pool(stream).capacity
    }

    pub fn slot_size(&self, stream: StreamType) -> usize {
        self.pool(stream).slot_size
    }

    pub fn stats(&self, stream: StreamType) -> PoolStats {
        self.pool(stream).stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraparound_returns_same_slot() {
        let mut pools = FramePools::new(64, 16, 4).unwrap();
        let acquired: Vec<_> = (0..8)
            .map(|_| pools.acquire_slot(StreamType::FullResolution).unwrap())
            .collect();

        for i in 0..4 {
            assert_eq!(acquired[i], acquired[i + 4]);
        }
        assert_eq!(acquired[1].slot, 1);
    }

    #[test]
    fn test_streams_have_independent_counters() {
        let mut pools = FramePools::new(64, 16, 4).unwrap();
        pools.acquire_slot(StreamType::FullResolution);
        pools.acquire_slot(StreamType::FullResolution);

        let ds = pools.acquire_slot(StreamType::Downscaled).unwrap();
        assert_eq!(ds, BufferAddress::new(StreamType::Downscaled, 0));
    }

    #[test]
    fn test_slots_do_not_overlap() {
        let mut pools = FramePools::new(100, 100, 2).unwrap();
        let a = pools.acquire_slot(StreamType::FullResolution).unwrap();
        let b = pools.acquire_slot(StreamType::Downscaled).unwrap();

        pools.buffer_mut(a).unwrap().fill(0xAA);
        pools.buffer_mut(b).unwrap().fill(0x55);

        assert!(pools.buffer(a).unwrap().iter().all(|v| *v == 0xAA));
        assert!(pools.buffer(b).unwrap().iter().all(|v| *v == 0x55));
        assert!(pools.slot_size(StreamType::FullResolution) >= 100);
    }

    #[test]
    fn test_reuse_while_held_is_counted() {
        let mut pools = FramePools::new(16, 16, 2).unwrap();
        let first = pools.acquire_slot(StreamType::Downscaled).unwrap();
        let second = pools.acquire_slot(StreamType::Downscaled).unwrap();
        pools.release_slot(second);

        assert!(pools.is_held(first));
        pools.acquire_slot(StreamType::Downscaled);
        pools.acquire_slot(StreamType::Downscaled);

        let stats = pools.stats(StreamType::Downscaled);
        assert_eq!(stats.acquired, 4);
        assert_eq!(stats.released, 1);
        assert_eq!(stats.reused_while_held, 1);
    }

    #[test]
    fn test_empty_pool_hands_out_nothing() {
        let mut pools = FramePools::new(16, 16, 0).unwrap();
        assert_eq!(pools.acquire_slot(StreamType::FullResolution), None);
        assert_eq!(
            pools.buffer(BufferAddress::new(StreamType::FullResolution, 0)),
            Err(PoolError::UnknownBuffer(BufferAddress::new(
                StreamType::FullResolution,
                0
            )))
        );
    }
}
