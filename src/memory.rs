//! Memory budgeting for index builds, and allocation of the large code
//! arrays with optional huge page support.

use crate::LshError;

/// Outcome of fitting an index into a memory budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryPlan {
    pub num_tables: usize,
    /// Bytes the plan is expected to use.
    pub required: usize,
}

/// Footprint of a build as a function of its table count.
pub struct MemoryModel<M> {
    /// Bytes independent of the table count (sketches and their functions).
    pub fixed: usize,
    /// Bytes of one hash table plus one deduplicator column.
    pub per_table: usize,
    /// Hash-function storage for a given table count.
    pub function_memory: M,
}

impl<M: Fn(usize) -> usize> MemoryModel<M> {
    pub fn cost(&self, num_tables: usize) -> usize {
        self.fixed
            .saturating_add(num_tables.saturating_mul(self.per_table))
            .saturating_add((self.function_memory)(num_tables))
    }

    /// Largest table count in `1..=max_tables` whose cost fits `limit`.
    pub fn plan(&self, limit: usize, max_tables: usize) -> Result<MemoryPlan, LshError> {
        if max_tables == 0 {
            return Err(LshError::InvalidConfig("max_tables must be positive"));
        }
        let minimum = self.cost(1);
        if minimum > limit {
            return Err(LshError::InsufficientMemory {
                required: minimum,
                available: limit,
            });
        }
        // cost is monotone in the table count
        let (mut lo, mut hi) = (1usize, max_tables);
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            if self.cost(mid) <= limit {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        Ok(MemoryPlan {
            num_tables: lo,
            required: self.cost(lo),
        })
    }
}

/// Advise the kernel to back a region with huge pages (Linux only).
///
/// # Safety
/// The pointer must be valid and the size must match the allocated size.
#[cfg(all(feature = "huge_pages", target_os = "linux"))]
unsafe fn enable_huge_pages(ptr: *mut u8, size: usize) -> std::io::Result<()> {
    use libc::{madvise, MADV_HUGEPAGE};

    let result = madvise(ptr as *mut libc::c_void, size, MADV_HUGEPAGE);

    if result == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(all(feature = "huge_pages", not(target_os = "linux")))]
unsafe fn enable_huge_pages(_ptr: *mut u8, _size: usize) -> std::io::Result<()> {
    Ok(())
}

/// Allocate a zeroed vector, asking for huge pages when the feature is on.
#[cfg(feature = "huge_pages")]
pub fn allocate_aligned_vec<T: Default + Clone>(size: usize) -> Vec<T> {
    let mut vec = vec![T::default(); size];
    if size == 0 {
        return vec;
    }

    unsafe {
        let ptr = vec.as_mut_ptr() as *mut u8;
        let byte_size = size * std::mem::size_of::<T>();

        // Not fatal: the allocation is still usable with regular pages.
        if let Err(e) = enable_huge_pages(ptr, byte_size) {
            tracing::warn!(error = %e, bytes = byte_size, "could not enable huge pages");
        }
    }

    vec
}

#[cfg(not(feature = "huge_pages"))]
pub fn allocate_aligned_vec<T: Default + Clone>(size: usize) -> Vec<T> {
    vec![T::default(); size]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_largest_table_count_within_budget() {
        let model = MemoryModel {
            fixed: 100,
            per_table: 10,
            function_memory: |tables: usize| tables * 2,
        };
        // 100 + 12 L <= 250 -> L = 12
        assert_eq!(model.plan(250, 1000).unwrap().num_tables, 12);
        assert_eq!(model.plan(250, 5).unwrap().num_tables, 5);
        assert_eq!(model.plan(112, 5).unwrap().required, 112);
    }

    #[test]
    fn rejects_budgets_below_one_table() {
        let model = MemoryModel {
            fixed: 100,
            per_table: 10,
            function_memory: |_: usize| 0usize,
        };
        match model.plan(105, 10) {
            Err(LshError::InsufficientMemory {
                required,
                available,
            }) => {
                assert_eq!(required, 110);
                assert_eq!(available, 105);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(model.plan(1000, 0).is_err());
    }

    #[test]
    fn allocation_is_zeroed() {
        let v: Vec<u32> = allocate_aligned_vec(1000);
        assert_eq!(v.len(), 1000);
        assert!(v.iter().all(|&x| x == 0));
    }
}
