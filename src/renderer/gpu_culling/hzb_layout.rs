//! Level chain and atlas layout of one depth hierarchy
//!
//! Level 0 sits at the atlas origin. Levels 1.. are packed left to right in a
//! strip of height `height / 2` directly below it, so the atlas is
//! `width x (height + height / 2)`, or just `width x height` when the chain
//! has a single level.

use crate::constants::hierarchy::{DOWNSAMPLE_FACTOR, MAX_DIMENSION, MAX_LEVELS, MIN_LEVEL_COVERAGE};
use crate::error::{EngineError, EngineResult};

/// Placement of one level inside the atlas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyLayout {
    pub levels: Vec<LevelRect>,
    pub atlas_width: u32,
    pub atlas_height: u32,
}

impl HierarchyLayout {
    /// Compute the layout for a level-0 size. Dimensions must be powers of
    /// two with `width >= height`.
    pub fn new(width: u32, height: u32) -> EngineResult<Self> {
        if !width.is_power_of_two() || !height.is_power_of_two() || width < height {
            return Err(EngineError::InvalidConfig {
                field: "hierarchy".to_string(),
                value: format!("{}x{}", width, height),
                reason: "dimensions must be powers of two with width >= height".to_string(),
            });
        }
        if width > MAX_DIMENSION {
            return Err(EngineError::InvalidConfig {
                field: "hierarchy".to_string(),
                value: format!("{}x{}", width, height),
                reason: format!("exceeds maximum dimension of {}", MAX_DIMENSION),
            });
        }

        let mut levels = vec![LevelRect {
            x: 0,
            y: 0,
            width,
            height,
        }];

        let mut strip_x = 0;
        let (mut w, mut h) = (width, height);
        while levels.len() < MAX_LEVELS {
            let (next_w, next_h) = (w / DOWNSAMPLE_FACTOR, h / DOWNSAMPLE_FACTOR);
            if next_h <= MIN_LEVEL_COVERAGE {
                break;
            }
            levels.push(LevelRect {
                x: strip_x,
                y: height,
                width: next_w,
                height: next_h,
            });
            strip_x += next_w;
            w = next_w;
            h = next_h;
        }

        let atlas_height = if levels.len() > 1 {
            height + height / DOWNSAMPLE_FACTOR
        } else {
            height
        };

        Ok(Self {
            levels,
            atlas_width: width,
            atlas_height,
        })
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn base(&self) -> LevelRect {
        self.levels[0]
    }

    pub fn level(&self, index: usize) -> LevelRect {
        self.levels[index.min(self.levels.len() - 1)]
    }

    /// Smallest level at which a footprint of `span` level-0 texels covers at
    /// most two texels. Clamped to the last level.
    pub fn level_for_span(&self, span: f32) -> usize {
        level_for_span(span, self.levels.len())
    }
}

/// `HierarchyLayout::level_for_span` for a chain of `level_count` levels
pub fn level_for_span(span: f32, level_count: usize) -> usize {
    let mut level = 0;
    let mut texels = span;
    while texels > 2.0 && level + 1 < level_count {
        texels *= 0.5;
        level += 1;
    }
    level
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_chain() {
        let layout = HierarchyLayout::new(512, 256).expect("layout");
        let heights: Vec<u32> = layout.levels.iter().map(|l| l.height).collect();
        assert_eq!(heights, vec![256, 128, 64, 32, 16, 8]);
        assert!(layout.levels.windows(2).all(|pair| {
            pair[1].width * 2 == pair[0].width && pair[1].height * 2 == pair[0].height
        }));
    }

    #[test]
    fn test_atlas_packing() {
        let layout = HierarchyLayout::new(64, 64).expect("layout");
        assert_eq!(layout.atlas_width, 64);
        assert_eq!(layout.atlas_height, 96);
        assert_eq!(layout.levels[1], LevelRect { x: 0, y: 64, width: 32, height: 32 });
        assert_eq!(layout.levels[2], LevelRect { x: 32, y: 64, width: 16, height: 16 });
        assert_eq!(layout.levels[3], LevelRect { x: 48, y: 64, width: 8, height: 8 });
        assert_eq!(layout.level_count(), 4);

        for level in &layout.levels[1..] {
            assert!(level.x + level.width <= layout.atlas_width);
            assert!(level.y + level.height <= layout.atlas_height);
        }
    }

    #[test]
    fn test_single_level() {
        let layout = HierarchyLayout::new(16, 8).expect("layout");
        assert_eq!(layout.level_count(), 1);
        assert_eq!(layout.atlas_height, 8);
    }

    #[test]
    fn test_level_count_depends_only_on_size() {
        let a = HierarchyLayout::new(1024, 512).expect("layout");
        let b = HierarchyLayout::new(1024, 512).expect("layout");
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_invalid_sizes() {
        assert!(HierarchyLayout::new(100, 64).is_err());
        assert!(HierarchyLayout::new(64, 128).is_err());
        assert!(HierarchyLayout::new(16384, 16384).is_err());
    }

    #[test]
    fn test_level_for_span() {
        let layout = HierarchyLayout::new(256, 256).expect("layout");
        assert_eq!(layout.level_for_span(1.0), 0);
        assert_eq!(layout.level_for_span(2.0), 0);
        assert_eq!(layout.level_for_span(3.0), 1);
        assert_eq!(layout.level_for_span(8.0), 2);
        assert_eq!(layout.level_for_span(10_000.0), layout.level_count() - 1);
        assert_eq!(level_for_span(10_000.0, 1), 0);
        assert_eq!(level_for_span(5.0, 0), 0);
    }
}
