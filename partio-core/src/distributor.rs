//! Part sizing and backend assignment.
//!
//! Every part gets `size / n` bytes and the last one also absorbs
//! `size % n`. Backends are drawn uniformly at random without replacement;
//! the pool is refilled only after every backend has been used once, so no
//! backend is picked more than `ceil(n / backends)` times.

use crate::error::{PartioError, Result};
use rand::Rng;

/// Planned placement for one part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartPlan {
    pub number: u32,
    pub size: u64,
    pub backend: String,
}

/// Index pool over a backend list with swap-to-end removal.
///
/// `slots[..remaining]` holds the indices still available in the current
/// round; picked indices are swapped past `remaining`.
struct BackendPool<'a> {
    backends: &'a [String],
    slots: Vec<usize>,
    remaining: usize,
}

impl<'a> BackendPool<'a> {
    fn new(backends: &'a [String]) -> Self {
        Self {
            backends,
            slots: (0..backends.len()).collect(),
            remaining: backends.len(),
        }
    }

    fn pick<R: Rng + ?Sized>(&mut self, rng: &mut R) -> &'a str {
        if self.remaining == 0 {
            self.remaining = self.slots.len();
        }

        let chosen = rng.gen_range(0..self.remaining);
        let last = self.remaining - 1;
        self.slots.swap(chosen, last);
        self.remaining = last;

        &self.backends[self.slots[last]]
    }
}

pub fn part_sizes(size: u64, part_count: usize) -> Result<Vec<u64>> {
    if part_count == 0 {
        return Err(PartioError::Validation(
            "part count must be at least 1".to_string(),
        ));
    }

    let n = part_count as u64;
    let base = size / n;
    let mut sizes = vec![base; part_count];
    if let Some(last) = sizes.last_mut() {
        *last += size % n;
    }

    Ok(sizes)
}

pub fn plan_parts<R: Rng + ?Sized>(
    size: u64,
    part_count: usize,
    backends: &[String],
    rng: &mut R,
) -> Result<Vec<PartPlan>> {
    if backends.is_empty() {
        return Err(PartioError::BackendUnavailable);
    }

    let sizes = part_sizes(size, part_count)?;
    let mut pool = BackendPool::new(backends);

    sizes
        .into_iter()
        .enumerate()
        .map(|(index, size)| {
            let number = u32::try_from(index).map_err(|_| {
                PartioError::Validation(format!("part index overflow: {}", index))
            })?;
            Ok(PartPlan {
                number,
                size,
                backend: pool.pick(rng).to_string(),
            })
        })
        .collect()
}
