//! Per-call occlusion statistics

use std::fmt;

/// Counters overwritten by every `render` (occluders) and `query` (objects,
/// shadow casters). No history is kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OcclusionStats {
    pub occluders: u32,
    pub objects_total: u32,
    pub objects_culled: u32,
    pub shadow_casters_total: u32,
    pub shadow_casters_culled: u32,
}

impl OcclusionStats {
    pub fn objects_visible(&self) -> u32 {
        self.objects_total - self.objects_culled
    }

    pub fn shadow_casters_visible(&self) -> u32 {
        self.shadow_casters_total - self.shadow_casters_culled
    }
}

impl fmt::Display for OcclusionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "occluders {} | objects {}/{} visible | shadow casters {}/{} visible",
            self.occluders,
            self.objects_visible(),
            self.objects_total,
            self.shadow_casters_visible(),
            self.shadow_casters_total
        )
    }
}
