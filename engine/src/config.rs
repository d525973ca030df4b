use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    game::animation::player::DEFAULT_BLEND_DURATION_TICKS,
    main::passes::{atmosphere::DEFAULT_SCATTERING_ORDERS, ibl::IblSizes},
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// `<shader_dir>/<program>.wgsl`
    pub shader_dir: String,
    pub blend_duration_ticks: f32,
    /// env_logger filter, `RUST_LOG` wins when set
    pub log_filter: String,
    pub frame_size: [u32; 2],
    pub irradiance_size: u32,
    pub prefilter_size: u32,
    pub prefilter_mip_levels: u32,
    pub brdf_lut_size: u32,
    pub atmosphere_scattering_orders: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let ibl = IblSizes::default();
        Self {
            shader_dir: "engine/src/main/shaders".to_string(),
            blend_duration_ticks: DEFAULT_BLEND_DURATION_TICKS,
            log_filter: "info".to_string(),
            frame_size: [1280, 720],
            irradiance_size: ibl.irradiance,
            prefilter_size: ibl.prefilter,
            prefilter_mip_levels: ibl.prefilter_mip_levels,
            brdf_lut_size: ibl.brdf_lut,
            atmosphere_scattering_orders: DEFAULT_SCATTERING_ORDERS,
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn ibl_sizes(&self) -> IblSizes {
        IblSizes {
            irradiance: self.irradiance_size,
            prefilter: self.prefilter_size,
            prefilter_mip_levels: self.prefilter_mip_levels,
            brdf_lut: self.brdf_lut_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "frame_size": [640, 480], "prefilter_mip_levels": 3 }}"#).unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.frame_size, [640, 480]);
        assert_eq!(config.ibl_sizes().prefilter_mip_levels, 3);
        assert_eq!(config.irradiance_size, 32);
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.blend_duration_ticks, DEFAULT_BLEND_DURATION_TICKS);
    }

    #[test]
    fn bad_json_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ frame_size: ").unwrap();
        assert!(matches!(EngineConfig::load(file.path()), Err(ConfigError::Parse(_))));
        assert!(matches!(
            EngineConfig::load("/definitely/not/here.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
