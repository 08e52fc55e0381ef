//! Transcript chunk planning for large sub-tasks.
//!
//! A sub-task with more source material than the agent can take in one call
//! is generated chunk by chunk. The planner partitions the ordered transcript
//! list into windows of `window_size` fresh items and threads the tail of each
//! window into the next one as `overlap_from_previous`, so references that
//! straddle a boundary stay resolvable.
//!
//! ```text
//! items:    [ 0 .. 9 ][ 10 .. 19 ][ 20 21 22 ]
//! chunks:   #0 (10)   #1 (10)      remainder 3 < 10/2  -> merged into #1
//! result:   #0 [0..=9], #1 [10..=22] overlap [8, 9]
//! ```
//!
//! Planning is a pure function of its inputs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised for invalid planner settings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("Window size must be greater than 0")]
    ZeroWindow,

    #[error("Overlap size ({overlap}) must be smaller than window size ({window})")]
    OverlapTooLarge { overlap: usize, window: usize },
}

/// One bounded slice of ordered source material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk<T> {
    /// Zero-based position of this chunk.
    pub index: usize,
    /// Number of chunks in the final plan.
    pub total: usize,
    /// Fresh items covered by this chunk.
    pub items: Vec<T>,
    /// Tail of the previous chunk's items, repeated for continuity.
    pub overlap_from_previous: Vec<T>,
}

impl<T> Chunk<T> {
    /// Returns true for the first chunk of a plan.
    pub fn is_first(&self) -> bool {
        self.index == 0
    }

    /// Returns true for the last chunk of a plan.
    pub fn is_last(&self) -> bool {
        self.index + 1 == self.total
    }

    /// Iterates the full context window: overlap first, then fresh items.
    pub fn context_items(&self) -> impl Iterator<Item = &T> {
        self.overlap_from_previous.iter().chain(self.items.iter())
    }
}

/// Validated chunk planner settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlanner {
    window_size: usize,
    overlap_size: usize,
}

impl ChunkPlanner {
    /// Creates a planner, rejecting a zero window or an overlap that is not
    /// strictly smaller than the window.
    pub fn new(window_size: usize, overlap_size: usize) -> Result<Self, ChunkError> {
        if window_size == 0 {
            return Err(ChunkError::ZeroWindow);
        }
        if overlap_size >= window_size {
            return Err(ChunkError::OverlapTooLarge {
                overlap: overlap_size,
                window: window_size,
            });
        }
        Ok(Self {
            window_size,
            overlap_size,
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn overlap_size(&self) -> usize {
        self.overlap_size
    }

    /// Splits `items` into chunks.
    ///
    /// An empty input yields an empty plan. A final window holding fewer than
    /// half a window of fresh items is folded into its predecessor, so the last
    /// chunk may exceed `window_size`.
    pub fn plan<T: Clone>(&self, items: &[T]) -> Vec<Chunk<T>> {
        let mut chunks: Vec<Chunk<T>> = Vec::with_capacity(items.len() / self.window_size + 1);

        for (index, window) in items.chunks(self.window_size).enumerate() {
            let overlap_from_previous = chunks
                .last()
                .map(|prev| tail(&prev.items, self.overlap_size))
                .unwrap_or_default();

            chunks.push(Chunk {
                index,
                total: 0,
                items: window.to_vec(),
                overlap_from_previous,
            });
        }

        if chunks.len() > 1 {
            let undersized = chunks
                .last()
                .map(|last| last.items.len() * 2 < self.window_size)
                .unwrap_or(false);
            if undersized {
                if let Some(remainder) = chunks.pop() {
                    if let Some(prev) = chunks.last_mut() {
                        prev.items.extend(remainder.items);
                    }
                }
            }
        }

        let total = chunks.len();
        for chunk in &mut chunks {
            chunk.total = total;
        }

        chunks
    }
}

/// Convenience wrapper around [`ChunkPlanner`].
pub fn plan<T: Clone>(
    items: &[T],
    window_size: usize,
    overlap_size: usize,
) -> Result<Vec<Chunk<T>>, ChunkError> {
    Ok(ChunkPlanner::new(window_size, overlap_size)?.plan(items))
}

fn tail<T: Clone>(items: &[T], n: usize) -> Vec<T> {
    let start = items.len().saturating_sub(n);
    items[start..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes<T>(chunks: &[Chunk<T>]) -> Vec<usize> {
        chunks.iter().map(|c| c.items.len()).collect()
    }

    #[test]
    fn test_undersized_remainder_merges_into_previous() {
        let items: Vec<u32> = (1..=23).collect();
        let chunks = plan(&items, 10, 2).unwrap();

        assert_eq!(sizes(&chunks), vec![10, 13]);
        assert!(chunks.iter().all(|c| c.total == 2));
        assert_eq!(chunks[1].overlap_from_previous, vec![9, 10]);
        assert_eq!(chunks[1].items.last(), Some(&23));
    }

    #[test]
    fn test_exact_multiple_has_no_merge() {
        let items: Vec<u32> = (0..20).collect();
        let chunks = plan(&items, 10, 2).unwrap();

        assert_eq!(sizes(&chunks), vec![10, 10]);
        assert!(chunks[0].overlap_from_previous.is_empty());
        assert_eq!(chunks[1].overlap_from_previous, vec![8, 9]);
    }

    #[test]
    fn test_half_window_remainder_is_kept() {
        let items: Vec<u32> = (0..25).collect();
        let chunks = plan(&items, 10, 2).unwrap();

        assert_eq!(sizes(&chunks), vec![10, 10, 5]);
        assert!(chunks.iter().all(|c| c.total == 3));
        assert!(chunks[2].is_last());
    }

    #[test]
    fn test_single_small_input_stays_single_chunk() {
        let items = vec!["a", "b", "c"];
        let chunks = plan(&items, 10, 2).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].items, items);
        assert_eq!(chunks[0].total, 1);
        assert!(chunks[0].is_first() && chunks[0].is_last());
    }

    #[test]
    fn test_empty_input() {
        let items: Vec<u32> = Vec::new();
        assert!(plan(&items, 10, 2).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_settings() {
        assert_eq!(ChunkPlanner::new(0, 0), Err(ChunkError::ZeroWindow));
        assert_eq!(
            ChunkPlanner::new(4, 4),
            Err(ChunkError::OverlapTooLarge {
                overlap: 4,
                window: 4
            })
        );
    }

    #[test]
    fn test_context_items_puts_overlap_first() {
        let items: Vec<u32> = (0..20).collect();
        let chunks = plan(&items, 10, 3).unwrap();
        let context: Vec<u32> = chunks[1].context_items().copied().collect();

        assert_eq!(&context[..3], &[7, 8, 9]);
        assert_eq!(context.len(), 13);
    }

    #[test]
    fn test_plan_invariants_hold_across_shapes() {
        for len in 0..60usize {
            for window in 1..12usize {
                for overlap in 0..window {
                    let items: Vec<usize> = (0..len).collect();
                    let chunks = plan(&items, window, overlap).unwrap();

                    // Deduplicated concatenation reproduces the input order.
                    let mut seen = Vec::new();
                    for chunk in &chunks {
                        for item in chunk.context_items() {
                            if !seen.contains(item) {
                                seen.push(*item);
                            }
                        }
                    }
                    assert_eq!(seen, items, "len={len} window={window} overlap={overlap}");

                    for pair in chunks.windows(2) {
                        let prev = &pair[0].items;
                        let overlap_items = &pair[1].overlap_from_previous;
                        assert!(prev.ends_with(overlap_items));
                        assert_eq!(overlap_items.len(), overlap.min(prev.len()));
                    }

                    for (i, chunk) in chunks.iter().enumerate() {
                        assert_eq!(chunk.index, i);
                        assert_eq!(chunk.total, chunks.len());
                    }

                    assert_eq!(chunks, plan(&items, window, overlap).unwrap());
                }
            }
        }
    }
}
