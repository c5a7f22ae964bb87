//! Occluder render batch
//!
//! Growable position/index accumulator shared by every occluder of a frame.
//! Small meshes are merged into one draw; the batch is flushed whenever the
//! next mesh would exceed `max_primitives` triangles. A single mesh larger than
//! that limit is split into chunks of at most `max_primitives` triangles.
//! Buffers keep their capacity between frames.

use crate::error::EngineResult;

/// Callback receiving one draw worth of geometry
pub type FlushFn<'f> = dyn FnMut(&[[f32; 3]], &[u32]) -> EngineResult<()> + 'f;

pub struct RenderBatch {
    positions: Vec<[f32; 3]>,
    indices: Vec<u32>,
    max_primitives: u32,

    /// Draws issued since the last `reset_counters`
    draw_calls: u32,
    /// Triangles issued since the last `reset_counters`
    triangles: u64,
}

impl RenderBatch {
    pub fn new(max_primitives: u32) -> Self {
        let max_primitives = max_primitives.max(1);
        Self {
            positions: Vec::new(),
            indices: Vec::with_capacity((max_primitives as usize * 3).min(1 << 16)),
            max_primitives,
            draw_calls: 0,
            triangles: 0,
        }
    }

    pub fn max_primitives(&self) -> u32 {
        self.max_primitives
    }

    pub fn triangle_count(&self) -> u32 {
        (self.indices.len() / 3) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn draw_calls(&self) -> u32 {
        self.draw_calls
    }

    pub fn triangles_submitted(&self) -> u64 {
        self.triangles
    }

    pub fn reset_counters(&mut self) {
        self.draw_calls = 0;
        self.triangles = 0;
    }

    /// Drop pending geometry without drawing it
    pub fn clear(&mut self) {
        self.positions.clear();
        self.indices.clear();
    }

    /// Queue a triangle list. Triangles referencing missing vertices are
    /// dropped. May call `flush` zero or more times.
    pub fn append(
        &mut self,
        positions: &[[f32; 3]],
        indices: &[u32],
        flush: &mut FlushFn<'_>,
    ) -> EngineResult<()> {
        let vertex_count = positions.len() as u32;
        let valid = indices
            .chunks_exact(3)
            .filter(|tri| tri.iter().all(|&i| i < vertex_count))
            .count() as u32;

        let total = (indices.len() / 3) as u32;
        if valid < total {
            log::warn!(
                "[RenderBatch] Dropping {} of {} occluder triangles with out-of-range indices",
                total - valid,
                total
            );
        }
        if valid == 0 {
            return Ok(());
        }

        if valid <= self.max_primitives {
            if self.triangle_count() + valid > self.max_primitives {
                self.flush(flush)?;
            }
            self.push_indexed(positions, indices);
            return Ok(());
        }

        // Oversized mesh: emit unindexed chunks
        self.flush(flush)?;
        for tri in indices.chunks_exact(3) {
            if tri.iter().any(|&i| i >= vertex_count) {
                continue;
            }
            if self.triangle_count() == self.max_primitives {
                self.flush(flush)?;
            }
            let base = self.positions.len() as u32;
            for &i in tri {
                self.positions.push(positions[i as usize]);
            }
            self.indices.extend_from_slice(&[base, base + 1, base + 2]);
        }
        Ok(())
    }

    /// Draw whatever is pending
    pub fn flush(&mut self, flush: &mut FlushFn<'_>) -> EngineResult<()> {
        if self.is_empty() {
            return Ok(());
        }
        let result = flush(&self.positions, &self.indices);
        self.draw_calls += 1;
        self.triangles += self.triangle_count() as u64;
        self.clear();
        result
    }

    fn push_indexed(&mut self, positions: &[[f32; 3]], indices: &[u32]) {
        let base = self.positions.len() as u32;
        let vertex_count = positions.len() as u32;
        self.positions.extend_from_slice(positions);
        for tri in indices.chunks_exact(3) {
            if tri.iter().all(|&i| i < vertex_count) {
                self.indices
                    .extend_from_slice(&[base + tri[0], base + tri[1], base + tri[2]]);
            }
        }
    }
}
