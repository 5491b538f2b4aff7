//! Shortest-column placement.
//!
//! The allocator keeps one running height per column and places each item at
//! the bottom of the shortest column, ties going to the lowest column index.
//! It is a greedy heuristic: deterministic for a given sequence of heights,
//! not an optimal packing.
//!
//! # Example
//!
//! ```
//! use horizon_waterfall::ColumnAllocator;
//!
//! let mut columns = ColumnAllocator::new(3, 100.0, 0.0, 0.0);
//! for height in [100.0, 50.0, 80.0] {
//!     columns.place(height);
//! }
//! let d = columns.place(30.0);
//! assert_eq!((d.column, d.top, d.left), (1, 50.0, 100.0));
//! ```

/// Where an item was placed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub column: usize,
    pub top: f32,
    pub left: f32,
    pub height: f32,
}

/// Width of one column given the container width, column count and gap.
///
/// Never negative; zero columns yield a zero width.
pub fn column_width(container_width: f32, columns: usize, column_gap: f32) -> f32 {
    if columns == 0 {
        return 0.0;
    }
    let gaps = column_gap * (columns - 1) as f32;
    ((container_width - gaps) / columns as f32).max(0.0)
}

/// Index of the shortest column, ties going to the lowest index.
///
/// Returns 0 for an empty slice.
pub fn shortest_column(heights: &[f32]) -> usize {
    let mut index = 0;
    let mut best = heights.first().copied().unwrap_or(0.0);
    for (i, height) in heights.iter().copied().enumerate().skip(1) {
        if height < best {
            best = height;
            index = i;
        }
    }
    index
}

/// Running column heights and the geometry needed to turn them into positions.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnAllocator {
    heights: Vec<f32>,
    column_width: f32,
    column_gap: f32,
    row_gap: f32,
}

impl ColumnAllocator {
    /// Create an allocator with `columns` empty columns.
    pub fn new(columns: usize, column_width: f32, column_gap: f32, row_gap: f32) -> Self {
        Self {
            heights: vec![0.0; columns.max(1)],
            column_width,
            column_gap,
            row_gap,
        }
    }

    /// Change the geometry. Column heights are reset.
    pub fn reconfigure(&mut self, columns: usize, column_width: f32, column_gap: f32, row_gap: f32) {
        *self = Self::new(columns, column_width, column_gap, row_gap);
    }

    /// Reset every column to zero height.
    pub fn reset(&mut self) {
        self.heights.iter_mut().for_each(|h| *h = 0.0);
    }

    /// Place an item of the given height in the shortest column.
    ///
    /// Negative or non-finite heights count as zero.
    pub fn place(&mut self, height: f32) -> Placement {
        let height = if height.is_finite() { height.max(0.0) } else { 0.0 };
        let column = shortest_column(&self.heights);
        let current = self.heights[column];
        let top = if current > 0.0 {
            current + self.row_gap
        } else {
            current
        };
        self.heights[column] = top + height;

        Placement {
            column,
            top,
            left: column as f32 * (self.column_width + self.column_gap),
            height,
        }
    }

    /// Current column heights.
    #[inline]
    pub fn heights(&self) -> &[f32] {
        &self.heights
    }

    /// Number of columns.
    #[inline]
    pub fn column_count(&self) -> usize {
        self.heights.len()
    }

    /// Width of one column.
    #[inline]
    pub fn column_width(&self) -> f32 {
        self.column_width
    }

    /// Height of the tallest column.
    pub fn content_height(&self) -> f32 {
        self.heights.iter().copied().fold(0.0, f32::max)
    }
}
