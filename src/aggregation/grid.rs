//! Fixed-resolution occupancy grid over normalised frame coordinates.
//!
//! Every deposited centroid adds exactly one unit to exactly one cell, so the
//! cell sum always equals the number of deposits since the last reset.

use crate::detection::FrameSize;

/// Kernel used by the display smoothing endpoint.
pub const DISPLAY_KERNEL_SIZE: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct OccupancyGrid {
    size: usize,
    cells: Vec<f64>,
}

/// Half-open index range `[start, end)` on one grid axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellSpan {
    pub start: usize,
    pub end: usize,
}

impl CellSpan {
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

impl OccupancyGrid {
    /// `size` must be within `1..=MAX_GRID_SIZE`; config validation guarantees it.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            cells: vec![0.0; size * size],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn reset(&mut self) {
        self.cells.iter_mut().for_each(|cell| *cell = 0.0);
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.size || col >= self.size {
            return None;
        }
        Some(self.cells[row * self.size + col])
    }

    pub fn total(&self) -> f64 {
        self.cells.iter().sum()
    }

    /// Grid cell `(row, col)` receiving a centroid, clamped into the grid.
    pub fn cell_for(&self, cx: f64, cy: f64, frame: FrameSize) -> (usize, usize) {
        let col = clamp_index(scale_to_grid(cx, frame.width, self.size), self.size);
        let row = clamp_index(scale_to_grid(cy, frame.height, self.size), self.size);
        (row, col)
    }

    pub fn deposit(&mut self, cx: f64, cy: f64, frame: FrameSize) {
        let (row, col) = self.cell_for(cx, cy, frame);
        self.cells[row * self.size + col] += 1.0;
    }

    /// Grid span covered by the pixel interval `[lo, hi]` on an axis of
    /// `extent` pixels. Uses the same proportional transform as binning but
    /// bounds the indices to `[0, size]` so the result works as a slice range.
    pub fn span_for(&self, lo: f64, hi: f64, extent: u32) -> CellSpan {
        let start = bound_index(scale_to_grid(lo, extent, self.size), self.size);
        let end = bound_index(scale_to_grid(hi, extent, self.size), self.size);
        CellSpan { start, end }
    }

    /// Rows `[rows.start, rows.end)` by columns `[cols.start, cols.end)`.
    ///
    /// An empty span on either axis yields `[[0.0]]` instead of an empty matrix.
    pub fn slice(&self, rows: CellSpan, cols: CellSpan) -> Vec<Vec<f64>> {
        if rows.is_empty() || cols.is_empty() {
            return vec![vec![0.0]];
        }
        (rows.start..rows.end)
            .map(|row| {
                let offset = row * self.size;
                self.cells[offset + cols.start..offset + cols.end].to_vec()
            })
            .collect()
    }

    pub fn rows(&self) -> Vec<Vec<f64>> {
        self.cells
            .chunks(self.size.max(1))
            .map(|row| row.to_vec())
            .collect()
    }

    /// Gaussian-blurred copy for display only.
    ///
    /// Returns a plain matrix so the result cannot be fed back into a snapshot.
    /// Borders are reflected without repeating the edge cell.
    pub fn smoothed(&self, kernel_size: usize) -> Vec<Vec<f64>> {
        let kernel = gaussian_kernel(kernel_size);
        let radius = kernel.len() / 2;
        let n = self.size;

        let mut horizontal = vec![0.0; n * n];
        for row in 0..n {
            for col in 0..n {
                horizontal[row * n + col] = kernel
                    .iter()
                    .enumerate()
                    .map(|(k, weight)| {
                        let c = reflect(col as isize + k as isize - radius as isize, n);
                        weight * self.cells[row * n + c]
                    })
                    .sum();
            }
        }

        (0..n)
            .map(|row| {
                (0..n)
                    .map(|col| {
                        kernel
                            .iter()
                            .enumerate()
                            .map(|(k, weight)| {
                                let r = reflect(row as isize + k as isize - radius as isize, n);
                                weight * horizontal[r * n + col]
                            })
                            .sum()
                    })
                    .collect()
            })
            .collect()
    }
}

fn scale_to_grid(value: f64, extent: u32, size: usize) -> f64 {
    if extent == 0 {
        return 0.0;
    }
    (value / extent as f64 * size as f64).floor()
}

fn clamp_index(scaled: f64, size: usize) -> usize {
    // NaN falls through both comparisons and saturates to 0 on the cast.
    let max = size.saturating_sub(1) as f64;
    if scaled <= 0.0 {
        0
    } else if scaled >= max {
        size.saturating_sub(1)
    } else {
        scaled as usize
    }
}

fn bound_index(scaled: f64, size: usize) -> usize {
    if scaled <= 0.0 {
        0
    } else if scaled >= size as f64 {
        size
    } else {
        scaled as usize
    }
}

fn reflect(index: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let last = n as isize - 1;
    let period = 2 * last;
    let mut i = index.rem_euclid(period);
    if i > last {
        i = period - i;
    }
    i as usize
}

fn gaussian_kernel(size: usize) -> Vec<f64> {
    let size = if size % 2 == 0 { size + 1 } else { size.max(1) };
    let sigma = 0.3 * ((size as f64 - 1.0) * 0.5 - 1.0) + 0.8;
    let center = (size / 2) as f64;
    let weights: Vec<f64> = (0..size)
        .map(|i| {
            let x = i as f64 - center;
            (-(x * x) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let total: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}
