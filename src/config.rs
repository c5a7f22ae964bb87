//! Occlusion engine configuration
//!
//! Loaded once at startup (usually from a TOML table) and validated before an
//! `OcclusionBuffer` is built. Every violation is a configuration error; an
//! engine is never constructed from an invalid config.

use crate::constants::{batch, defaults, hierarchy, query};
use crate::error::{EngineError, EngineResult};
use crate::renderer::gpu_culling::query_data::ShadowVolumeEstimate;
use crate::renderer::gpu_culling::query_slots::SlotLayout;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors raised while reading a configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error for {path}: {error}")]
    Io {
        path: String,
        #[source]
        error: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Configuration of one occlusion engine instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcclusionConfig {
    /// Camera hierarchy level-0 width (power of two, >= height)
    pub width: u32,
    /// Camera hierarchy level-0 height (power of two)
    pub height: u32,
    /// Light hierarchy level-0 width (power of two, >= light_height)
    pub light_width: u32,
    /// Light hierarchy level-0 height (power of two)
    pub light_height: u32,
    /// Rows the results grid starts with; it grows on demand
    pub initial_result_rows: u32,
    /// Triangles per occluder draw call
    pub batch_max_primitives: u32,
    /// How candidates are mapped to results grid texels
    pub slot_layout: SlotLayout,
    /// Shadow-volume extent policy for the light pass
    pub shadow_volume: ShadowVolumeEstimate,
    /// Build the light hierarchy when a shadow-casting light is supplied
    pub shadow_culling: bool,
    /// Run `update_occluder()` on the rayon pool, overlapped with hierarchy setup.
    /// Off by default: the parallel update only pays off with many proxy
    /// occluders and measured slower on some GPU backends.
    pub multithreaded_occluder_update: bool,
    /// Multiplier applied to every candidate's max draw distance
    pub distance_culling_scale: f32,
}

impl Default for OcclusionConfig {
    fn default() -> Self {
        Self {
            width: defaults::WIDTH,
            height: defaults::HEIGHT,
            light_width: defaults::LIGHT_WIDTH,
            light_height: defaults::LIGHT_HEIGHT,
            initial_result_rows: defaults::INITIAL_RESULT_ROWS,
            batch_max_primitives: batch::DEFAULT_MAX_PRIMITIVES,
            slot_layout: SlotLayout::Serpentine,
            shadow_volume: ShadowVolumeEstimate::Conservative,
            shadow_culling: true,
            multithreaded_occluder_update: false,
            distance_culling_scale: defaults::DISTANCE_CULLING_SCALE,
        }
    }
}

impl OcclusionConfig {
    /// Parse a configuration from TOML text; missing fields take defaults
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.display().to_string(),
            error,
        })?;
        let config = Self::from_toml_str(&text)?;
        config.validate()?;
        log::info!("[OcclusionConfig::load] Loaded {}", path.display());
        Ok(config)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> EngineResult<()> {
        validate_dimensions("width", "height", self.width, self.height)?;
        validate_dimensions("light_width", "light_height", self.light_width, self.light_height)?;

        if self.initial_result_rows == 0 {
            return Err(invalid(
                "initial_result_rows",
                self.initial_result_rows,
                "results grid needs at least one row",
            ));
        }
        if self.initial_result_rows > query::MAX_RESULT_ROWS {
            return Err(invalid(
                "initial_result_rows",
                self.initial_result_rows,
                &format!("exceeds maximum of {}", query::MAX_RESULT_ROWS),
            ));
        }

        if self.batch_max_primitives == 0 {
            return Err(invalid(
                "batch_max_primitives",
                self.batch_max_primitives,
                "occluder batch needs room for at least one triangle",
            ));
        }
        if self.batch_max_primitives > batch::MAX_PRIMITIVES_PER_DRAW {
            return Err(invalid(
                "batch_max_primitives",
                self.batch_max_primitives,
                &format!(
                    "exceeds the per-draw primitive limit of {}",
                    batch::MAX_PRIMITIVES_PER_DRAW
                ),
            ));
        }

        if !self.distance_culling_scale.is_finite() || self.distance_culling_scale <= 0.0 {
            return Err(invalid(
                "distance_culling_scale",
                self.distance_culling_scale,
                "must be a positive finite number",
            ));
        }

        log::debug!(
            "[OcclusionConfig] Validated: camera {}x{}, light {}x{}, {} initial result rows",
            self.width,
            self.height,
            self.light_width,
            self.light_height,
            self.initial_result_rows
        );
        Ok(())
    }
}

fn validate_dimensions(
    width_field: &str,
    height_field: &str,
    width: u32,
    height: u32,
) -> EngineResult<()> {
    if !width.is_power_of_two() {
        return Err(invalid(width_field, width, "must be a power of two"));
    }
    if !height.is_power_of_two() {
        return Err(invalid(height_field, height, "must be a power of two"));
    }
    if width < height {
        return Err(invalid(
            width_field,
            width,
            &format!("must be >= {} ({})", height_field, height),
        ));
    }
    if width > hierarchy::MAX_DIMENSION {
        return Err(invalid(
            width_field,
            width,
            &format!("exceeds maximum of {}", hierarchy::MAX_DIMENSION),
        ));
    }
    Ok(())
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> EngineError {
    EngineError::InvalidConfig {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        assert!(OcclusionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        let config = OcclusionConfig {
            width: 500,
            ..Default::default()
        };
        match config.validate() {
            Err(EngineError::InvalidConfig { field, .. }) => assert_eq!(field, "width"),
            other => panic!("expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_width_below_height() {
        let config = OcclusionConfig {
            light_width: 256,
            light_height: 512,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_buffer_sizes() {
        let zero_rows = OcclusionConfig {
            initial_result_rows: 0,
            ..Default::default()
        };
        assert!(zero_rows.validate().is_err());

        let huge_batch = OcclusionConfig {
            batch_max_primitives: batch::MAX_PRIMITIVES_PER_DRAW + 1,
            ..Default::default()
        };
        assert!(huge_batch.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = OcclusionConfig::from_toml_str(
            r#"
            width = 1024
            height = 512
            slot_layout = "linear"
            shadow_volume = "progressive"
            "#,
        )
        .expect("valid toml");

        assert_eq!(config.width, 1024);
        assert_eq!(config.height, 512);
        assert_eq!(config.slot_layout, SlotLayout::Linear);
        assert_eq!(config.shadow_volume, ShadowVolumeEstimate::Progressive);
        assert_eq!(config.light_width, defaults::LIGHT_WIDTH);
        assert!(!config.multithreaded_occluder_update);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = OcclusionConfig {
            multithreaded_occluder_update: true,
            ..Default::default()
        };
        let text = config.to_toml_string().expect("serializes");
        let parsed = OcclusionConfig::from_toml_str(&text).expect("parses");
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "width = 256\nheight = 128\ninitial_result_rows = 4").expect("write");

        let config = OcclusionConfig::load(file.path()).expect("loads");
        assert_eq!(config.width, 256);
        assert_eq!(config.initial_result_rows, 4);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "width = 300").expect("write");

        assert!(matches!(
            OcclusionConfig::load(file.path()),
            Err(EngineError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            OcclusionConfig::load("/nonexistent/occlusion.toml"),
            Err(EngineError::IoError { .. })
        ));
    }
}
