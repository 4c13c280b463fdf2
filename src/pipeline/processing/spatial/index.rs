use std::collections::HashMap;

use super::geometry::{BoundingBox, Coord};

/// Most cells a single polygon may occupy; larger boxes go on the oversized list
pub const MAX_CELLS_PER_POLYGON: u64 = 4096;

/// Uniform grid over polygon bounding boxes.
///
/// Each cell lists the polygons whose bounding box touches it, in ascending
/// polygon order, so a point lookup only tests a handful of candidates.
/// Polygons spanning more than [`MAX_CELLS_PER_POLYGON`] cells are kept on a
/// separate list and tested for every point.
#[derive(Debug, Clone)]
pub struct GridIndex {
    cell_size: f64,
    cells: HashMap<(i64, i64), Vec<usize>>,
    oversized: Vec<usize>,
}

impl GridIndex {
    pub fn build(bboxes: &[BoundingBox], cell_size: f64) -> Self {
        let mut cells: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        let mut oversized = Vec::new();
        for (idx, bbox) in bboxes.iter().enumerate() {
            let (x0, y0) = cell_of(cell_size, Coord::new(bbox.min_x, bbox.min_y));
            let (x1, y1) = cell_of(cell_size, Coord::new(bbox.max_x, bbox.max_y));
            let span = |lo: i64, hi: i64| hi.saturating_sub(lo).saturating_add(1).max(0) as u64;
            if span(x0, x1).saturating_mul(span(y0, y1)) > MAX_CELLS_PER_POLYGON {
                oversized.push(idx);
                continue;
            }
            for cx in x0..=x1 {
                for cy in y0..=y1 {
                    cells.entry((cx, cy)).or_default().push(idx);
                }
            }
        }
        Self {
            cell_size,
            cells,
            oversized,
        }
    }

    /// Polygons whose bounding box may contain `point`, in ascending order
    pub fn candidates(&self, point: Coord) -> Vec<usize> {
        let in_cell = self
            .cells
            .get(&cell_of(self.cell_size, point))
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
        if self.oversized.is_empty() {
            return in_cell.to_vec();
        }

        let mut merged = Vec::with_capacity(in_cell.len() + self.oversized.len());
        let (mut i, mut j) = (0, 0);
        while i < in_cell.len() && j < self.oversized.len() {
            if in_cell[i] < self.oversized[j] {
                merged.push(in_cell[i]);
                i += 1;
            } else {
                merged.push(self.oversized[j]);
                j += 1;
            }
        }
        merged.extend_from_slice(&in_cell[i..]);
        merged.extend_from_slice(&self.oversized[j..]);
        merged
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn oversized_count(&self) -> usize {
        self.oversized.len()
    }
}

fn cell_of(cell_size: f64, point: Coord) -> (i64, i64) {
    (
        (point.x / cell_size).floor() as i64,
        (point.y / cell_size).floor() as i64,
    )
}
