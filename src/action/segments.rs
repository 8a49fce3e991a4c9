//! LED segment partition among the actions of one switch
//!
//! With `n` pixels and `count` enabled LED actions, the first-ranked action takes
//! the remainder and every other action one trailing segment. When there are more
//! actions than pixels, only the first `n` get one segment each.

use std::ops::Range;

use crate::error::{CoreError, CoreResult};

/// Segment indices owned by the action at `rank`
pub fn segments(pixel_count: usize, count: usize, rank: usize) -> CoreResult<Range<usize>> {
    if rank >= count {
        return Err(CoreError::SegmentBookkeeping { rank, count });
    }

    let n = pixel_count;
    let range = if count == 1 {
        0..n
    } else if count < n {
        if rank == 0 {
            0..n - count + 1
        } else {
            let segment = n - count + rank;
            segment..segment + 1
        }
    } else if rank < n {
        rank..rank + 1
    } else {
        0..0
    };
    Ok(range)
}
