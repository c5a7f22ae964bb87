// Hearth Occlusion Constants - SINGLE SOURCE OF TRUTH
//
// Both the CPU evaluation and the WGSL programs rely on these values.
// Keep shaders/*.wgsl in sync when changing anything here.

/// Depth hierarchy constants
pub mod hierarchy {
    /// Value a freshly cleared level holds (farthest normalized depth)
    pub const FAR_DEPTH: f32 = 1.0;

    /// Reduction factor between two consecutive levels (2×2 max)
    pub const DOWNSAMPLE_FACTOR: u32 = 2;

    /// The chain stops once a level's height would be at or below this
    pub const MIN_LEVEL_COVERAGE: u32 = 4;

    /// Upper bound on levels; must match LevelTable in query.wgsl
    pub const MAX_LEVELS: usize = 16;

    /// Largest accepted hierarchy dimension
    pub const MAX_DIMENSION: u32 = 8192;
}

/// Query / results grid constants
pub mod query {
    /// Results grid width in texels. 64 × f32 = 256 bytes, which is
    /// wgpu's COPY_BYTES_PER_ROW_ALIGNMENT, so rows copy without padding.
    pub const RESULTS_GRID_WIDTH: u32 = 64;

    /// Results grid value meaning "culled"
    pub const CULLED_SENTINEL: f32 = -1.0;

    /// Largest results grid height
    pub const MAX_RESULT_ROWS: u32 = 8192;

    /// Distance reported for candidates that straddle the near plane
    pub const NEAR_PLANE_DISTANCE: f32 = 0.0;

    /// Packed `max_distance` of a candidate without a draw distance limit
    pub const NO_MAX_DISTANCE: f32 = -1.0;
}

/// Occluder batching constants
pub mod batch {
    /// Triangle count of one occluder draw call
    pub const DEFAULT_MAX_PRIMITIVES: u32 = 16_384;

    /// Hard limit on primitives per draw call
    pub const MAX_PRIMITIVES_PER_DRAW: u32 = 1_048_576;
}

/// Default configuration values
pub mod defaults {
    pub const WIDTH: u32 = 512;
    pub const HEIGHT: u32 = 256;
    pub const LIGHT_WIDTH: u32 = 512;
    pub const LIGHT_HEIGHT: u32 = 512;
    pub const INITIAL_RESULT_ROWS: u32 = 16;
    pub const DISTANCE_CULLING_SCALE: f32 = 1.0;
}
