//! Candidate slot assignment and the results grid
//!
//! Every candidate of one query call owns exactly one texel of a fixed-width
//! results grid. Two strategies map the candidate index to that texel:
//!
//! - `Serpentine`: even rows run left to right, odd rows right to left, so
//!   consecutive slots are always adjacent texels. Candidates are drawn as a
//!   line strip; each segment fills its first texel and a trailing copy of
//!   the last record makes sure the final real slot is drawn too.
//! - `Linear`: row-major addressing drawn as a point list.

use super::query_data::QueryVertex;
use crate::constants::query::{CULLED_SENTINEL, MAX_RESULT_ROWS, RESULTS_GRID_WIDTH};
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotLayout {
    Serpentine,
    Linear,
}

impl SlotLayout {
    /// Extra slots one pass consumes beyond its candidates
    pub fn trailing_slots(self) -> u32 {
        match self {
            SlotLayout::Serpentine => 1,
            SlotLayout::Linear => 0,
        }
    }

    pub fn topology(self) -> wgpu::PrimitiveTopology {
        match self {
            SlotLayout::Serpentine => wgpu::PrimitiveTopology::LineStrip,
            SlotLayout::Linear => wgpu::PrimitiveTopology::PointList,
        }
    }
}

/// Texel `(column, row)` of slot `index`
pub fn slot_address(layout: SlotLayout, index: u32, grid_width: u32) -> [u32; 2] {
    let row = index / grid_width;
    let column = index % grid_width;
    match layout {
        SlotLayout::Serpentine if row % 2 == 1 => [grid_width - 1 - column, row],
        _ => [column, row],
    }
}

/// Inverse of `slot_address`
pub fn slot_index(layout: SlotLayout, address: [u32; 2], grid_width: u32) -> u32 {
    let [column, row] = address;
    let column = match layout {
        SlotLayout::Serpentine if row % 2 == 1 => grid_width - 1 - column,
        _ => column,
    };
    row * grid_width + column
}

/// Append the records of one pass, starting at slot `first_slot`.
/// Returns the number of slots consumed, trailing slot included.
pub fn pack_pass<I>(
    layout: SlotLayout,
    first_slot: u32,
    grid_width: u32,
    records: I,
    out: &mut Vec<QueryVertex>,
) -> u32
where
    I: IntoIterator<Item = QueryVertex>,
{
    let mut next = first_slot;
    let mut last = None;
    for record in records {
        let vertex = record.at_slot(slot_address(layout, next, grid_width));
        out.push(vertex);
        last = Some(vertex);
        next += 1;
    }

    if let (SlotLayout::Serpentine, Some(last)) = (layout, last) {
        out.push(last.at_slot(slot_address(layout, next, grid_width)));
        next += 1;
    }
    next - first_slot
}

/// CPU copy of the results texture. Height grows on demand, never shrinks.
#[derive(Debug, Clone)]
pub struct ResultsGrid {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl ResultsGrid {
    pub fn new(initial_rows: u32) -> Self {
        let height = initial_rows.clamp(1, MAX_RESULT_ROWS);
        Self {
            width: RESULTS_GRID_WIDTH,
            height,
            values: vec![CULLED_SENTINEL; (RESULTS_GRID_WIDTH * height) as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> [u32; 2] {
        [self.width, self.height]
    }

    pub fn capacity(&self) -> u32 {
        self.width * self.height
    }

    /// Make room for `slots` texels. Returns true when the grid grew.
    pub fn ensure_capacity(&mut self, slots: u32) -> EngineResult<bool> {
        if slots <= self.capacity() {
            return Ok(false);
        }
        let rows = slots.div_ceil(self.width);
        if rows > MAX_RESULT_ROWS {
            return Err(EngineError::ResourceExhausted(format!(
                "{} query slots need {} result rows, limit is {}",
                slots, rows, MAX_RESULT_ROWS
            )));
        }
        let new_height = rows.next_power_of_two().min(MAX_RESULT_ROWS);
        log::debug!(
            "[ResultsGrid] Growing from {} to {} rows for {} slots",
            self.height,
            new_height,
            slots
        );
        self.height = new_height;
        self.values
            .resize((self.width * self.height) as usize, CULLED_SENTINEL);
        Ok(true)
    }

    /// Value stored at a texel
    pub fn value(&self, address: [u32; 2]) -> f32 {
        let [x, y] = address;
        self.values
            .get((y * self.width + x) as usize)
            .copied()
            .unwrap_or(CULLED_SENTINEL)
    }

    /// Backing storage, row-major, `width * height` values
    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn reset(&mut self) {
        self.values.fill(CULLED_SENTINEL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::create_aabb;
    use cgmath::{Point3, Vector3};
    use std::collections::HashSet;

    fn record(tag: f32) -> QueryVertex {
        let bounds = create_aabb(Point3::new(tag, 0.0, 0.0), Point3::new(tag + 1.0, 1.0, 1.0));
        QueryVertex::new([0, 0], &bounds, bounds.min, Vector3::new(1.0, 1.0, 1.0), None)
    }

    #[test]
    fn test_serpentine_rows_alternate() {
        let w = 4;
        assert_eq!(slot_address(SlotLayout::Serpentine, 0, w), [0, 0]);
        assert_eq!(slot_address(SlotLayout::Serpentine, 3, w), [3, 0]);
        assert_eq!(slot_address(SlotLayout::Serpentine, 4, w), [3, 1]);
        assert_eq!(slot_address(SlotLayout::Serpentine, 7, w), [0, 1]);
        assert_eq!(slot_address(SlotLayout::Serpentine, 8, w), [0, 2]);
        assert_eq!(slot_address(SlotLayout::Linear, 4, w), [0, 1]);
    }

    #[test]
    fn test_consecutive_serpentine_slots_are_adjacent() {
        for i in 0..500 {
            let [ax, ay] = slot_address(SlotLayout::Serpentine, i, RESULTS_GRID_WIDTH);
            let [bx, by] = slot_address(SlotLayout::Serpentine, i + 1, RESULTS_GRID_WIDTH);
            let distance = (ax as i64 - bx as i64).abs() + (ay as i64 - by as i64).abs();
            assert_eq!(distance, 1, "slots {} and {}", i, i + 1);
        }
    }

    #[test]
    fn test_addresses_are_unique_and_invertible() {
        for layout in [SlotLayout::Serpentine, SlotLayout::Linear] {
            let mut seen = HashSet::new();
            for i in 0..1000 {
                let address = slot_address(layout, i, RESULTS_GRID_WIDTH);
                assert!(address[0] < RESULTS_GRID_WIDTH);
                assert!(seen.insert(address));
                assert_eq!(slot_index(layout, address, RESULTS_GRID_WIDTH), i);
            }
        }
    }

    #[test]
    fn test_pack_appends_trailing_copy() {
        let mut out = Vec::new();
        let used = pack_pass(SlotLayout::Serpentine, 0, 4, (0..5).map(|i| record(i as f32)), &mut out);
        assert_eq!(used, 6);
        assert_eq!(out.len(), 6);
        assert_eq!(out[4].slot, [3, 1]);
        assert_eq!(out[5].slot, [2, 1]);
        assert_eq!(out[5].aabb_min, out[4].aabb_min);

        let mut out = Vec::new();
        let used = pack_pass(SlotLayout::Linear, 10, 4, (0..3).map(|i| record(i as f32)), &mut out);
        assert_eq!(used, 3);
        assert_eq!(out[0].slot, [2, 2]);
    }

    #[test]
    fn test_pack_empty_pass() {
        let mut out = Vec::new();
        let used = pack_pass(SlotLayout::Serpentine, 0, 4, std::iter::empty(), &mut out);
        assert_eq!(used, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_grid_grows_monotonically() {
        let mut grid = ResultsGrid::new(2);
        assert_eq!(grid.capacity(), 2 * RESULTS_GRID_WIDTH);

        assert!(!grid.ensure_capacity(100).expect("fits"));
        assert!(grid.ensure_capacity(3 * RESULTS_GRID_WIDTH + 1).expect("grows"));
        assert_eq!(grid.height(), 4);

        assert!(!grid.ensure_capacity(10).expect("fits"));
        assert_eq!(grid.height(), 4);
        assert_eq!(grid.values().len(), (4 * RESULTS_GRID_WIDTH) as usize);
    }

    #[test]
    fn test_grid_limit() {
        let mut grid = ResultsGrid::new(1);
        assert!(matches!(
            grid.ensure_capacity(RESULTS_GRID_WIDTH * MAX_RESULT_ROWS + 1),
            Err(EngineError::ResourceExhausted(_))
        ));
    }
}
