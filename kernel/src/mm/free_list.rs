//! Address-sorted free-region list shared by the frame allocator (C1) and
//! the page allocator (C2). Modeled the way `util::RangeAllocator` tracks
//! its ranges in a `BTreeMap` keyed by start address, except here the map
//! tracks *free* regions instead of allocated ones, which is what lets
//! first-fit and neighbour coalescing both be plain `BTreeMap` range
//! queries instead of a hand-rolled intrusive linked list.
extern crate alloc;

use alloc::collections::BTreeMap;

use crate::error::KernelError;

/// One half-open `[start, start+len)` free region, `len` always a positive
/// multiple of `granularity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRegion {
    pub start: u64,
    pub len: u64,
}

impl FreeRegion {
    pub fn end(&self) -> u64 {
        self.start + self.len
    }
}

/// Address-sorted free list: first-fit allocation, address-order insertion
/// with neighbour coalescing on free. Not internally locked -- the owning
/// allocator (C1/C2) wraps one of these in a `util::Mutex`.
pub struct FreeList {
    granularity: u64,
    regions: BTreeMap<u64, u64>,
}

impl FreeList {
    pub const fn new(granularity: u64) -> Self {
        Self {
            granularity,
            regions: BTreeMap::new(),
        }
    }

    pub fn add_region(&mut self, start: u64, len: u64) {
        if len == 0 {
            return;
        }
        self.insert_coalescing(start, len);
    }

    /// First-fit over the sorted region list.
    pub fn alloc(&mut self, count: u64) -> Result<u64, KernelError> {
        let want = count * self.granularity;
        let hit = self
            .regions
            .iter()
            .find(|(_, &len)| len >= want)
            .map(|(&start, _)| start);

        let Some(start) = hit else {
            return Err(KernelError::NoMoreFreeMem);
        };

        let len = self.regions.remove(&start).unwrap();
        if len > want {
            self.regions.insert(start + want, len - want);
        }
        Ok(start)
    }

    /// Anchors the allocation at `base`; the containing free region is
    /// split around it, producing up to two residual regions.
    pub fn alloc_from(&mut self, base: u64, count: u64) -> Result<(), KernelError> {
        let want = count * self.granularity;
        if base % self.granularity != 0 || want == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let end = base + want;

        let containing = self
            .regions
            .iter()
            .find(|(&start, &len)| start <= base && base + want <= start + len)
            .map(|(&start, &len)| (start, len));

        let Some((start, len)) = containing else {
            return Err(KernelError::NoMoreFreeMem);
        };

        self.regions.remove(&start);
        if start < base {
            self.regions.insert(start, base - start);
        }
        if end < start + len {
            self.regions.insert(end, start + len - end);
        }
        Ok(())
    }

    pub fn free(&mut self, start: u64, count: u64) -> Result<(), KernelError> {
        let len = count * self.granularity;
        if start % self.granularity != 0 || len == 0 {
            return Err(KernelError::InvalidArgument);
        }
        self.insert_coalescing(start, len);
        Ok(())
    }

    fn insert_coalescing(&mut self, mut start: u64, mut len: u64) {
        // Merge with the predecessor if it ends exactly at `start`.
        if let Some((&prev_start, &prev_len)) = self.regions.range(..start).next_back() {
            if prev_start + prev_len == start {
                self.regions.remove(&prev_start);
                start = prev_start;
                len += prev_len;
            }
        }
        // Merge with the successor if `start+len` lands exactly on it.
        if let Some(&next_len) = self.regions.get(&(start + len)) {
            self.regions.remove(&(start + len));
            len += next_len;
        }
        self.regions.insert(start, len);
    }

    pub fn iter(&self) -> impl Iterator<Item = FreeRegion> + '_ {
        self.regions.iter().map(|(&start, &len)| FreeRegion { start, len })
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;

    #[test]
    fn first_fit_and_coalesce_matches_s1() {
        let mut list = FreeList::new(0x1000);
        list.add_region(0x300000, 0x2000000 - 0x300000);

        let addr = list.alloc(4).unwrap();
        assert_eq!(addr, 0x300000);
        let regions: std::vec::Vec<_> = list.iter().collect();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].start, 0x304000);

        list.free(0x300000, 2).unwrap();
        list.free(0x302000, 2).unwrap();

        let regions: std::vec::Vec<_> = list.iter().collect();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].start, 0x300000);
        assert_eq!(regions[0].len, 0x2000000 - 0x300000);
    }

    #[test]
    fn no_more_free_mem_when_nothing_fits() {
        let mut list = FreeList::new(0x1000);
        list.add_region(0, 0x1000);
        assert_eq!(list.alloc(2), Err(KernelError::NoMoreFreeMem));
    }

    #[test]
    fn alloc_from_splits_region() {
        let mut list = FreeList::new(0x1000);
        list.add_region(0, 0x5000);
        list.alloc_from(0x2000, 1).unwrap();
        let regions: std::vec::Vec<_> = list.iter().collect();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0], FreeRegion { start: 0, len: 0x2000 });
        assert_eq!(regions[1], FreeRegion { start: 0x3000, len: 0x2000 });
    }
}
