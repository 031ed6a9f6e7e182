//! Main configuration structures for the TSDF server

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use super::params::*;
use crate::fusion::{IntegratorMethod, MeshIntegratorConfig, TsdfIntegratorConfig, TsdfMapConfig};
use crate::visualization::ColorMode;

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("Failed to serialize TOML: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),
}

/// An invalid value that was replaced while building the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigCorrection {
    /// Dotted name of the option, e.g. `map.tsdf_voxels_per_side`
    pub field: String,
    pub provided: String,
    pub replaced_with: String,
}

/// Complete server configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TsdfServerConfig {
    pub server: ServerParams,
    pub map: MapParams,
    pub integrator: IntegratorParams,
    pub mesh: MeshParams,
}

impl TsdfServerConfig {
    /// Replace invalid values by their defaults, logging each replacement.
    pub fn validate(&mut self) -> Vec<ConfigCorrection> {
        let defaults = MapParams::default();
        let mut corrections = Vec::new();

        if !self.map.tsdf_voxels_per_side.is_power_of_two() {
            log::error!(
                "voxels_per_side must be a power of 2 (got {}), setting to default value {}",
                self.map.tsdf_voxels_per_side,
                defaults.tsdf_voxels_per_side
            );
            corrections.push(ConfigCorrection {
                field: "map.tsdf_voxels_per_side".to_string(),
                provided: self.map.tsdf_voxels_per_side.to_string(),
                replaced_with: defaults.tsdf_voxels_per_side.to_string(),
            });
            self.map.tsdf_voxels_per_side = defaults.tsdf_voxels_per_side;
        }

        if !(self.map.tsdf_voxel_size.is_finite() && self.map.tsdf_voxel_size > 0.0) {
            log::error!(
                "tsdf_voxel_size must be positive (got {}), setting to default value {}",
                self.map.tsdf_voxel_size,
                defaults.tsdf_voxel_size
            );
            corrections.push(ConfigCorrection {
                field: "map.tsdf_voxel_size".to_string(),
                provided: self.map.tsdf_voxel_size.to_string(),
                replaced_with: defaults.tsdf_voxel_size.to_string(),
            });
            self.map.tsdf_voxel_size = defaults.tsdf_voxel_size;
        }

        if let Some(method) = self.integrator.method.as_deref() {
            if IntegratorMethod::parse(method).is_none() {
                log::warn!("Unknown integration method '{}', using simple", method);
                corrections.push(ConfigCorrection {
                    field: "integrator.method".to_string(),
                    provided: method.to_string(),
                    replaced_with: IntegratorMethod::Simple.as_str().to_string(),
                });
            }
        }

        corrections
    }

    pub fn map_config(&self) -> TsdfMapConfig {
        TsdfMapConfig {
            tsdf_voxel_size: self.map.tsdf_voxel_size,
            tsdf_voxels_per_side: self.map.tsdf_voxels_per_side,
        }
    }

    pub fn integrator_method(&self) -> IntegratorMethod {
        self.integrator
            .method
            .as_deref()
            .map(IntegratorMethod::from_name)
            .unwrap_or(IntegratorMethod::Simple)
    }

    /// Integrator settings; truncation defaults to four voxels.
    pub fn integrator_config(&self) -> TsdfIntegratorConfig {
        let params = &self.integrator;
        TsdfIntegratorConfig {
            truncation_distance: params
                .truncation_distance
                .unwrap_or(self.map.tsdf_voxel_size * 4.0),
            max_weight: params.max_weight,
            voxel_carving_enabled: params.voxel_carving_enabled,
            min_ray_length_m: params.min_ray_length_m,
            max_ray_length_m: params.max_ray_length_m,
            use_const_weight: params.use_const_weight,
            allow_clear: params.allow_clear,
            start_voxel_subsampling_factor: params.start_voxel_subsampling_factor,
            max_consecutive_ray_collisions: params.max_consecutive_ray_collisions,
            clear_checks_every_n_frames: params.clear_checks_every_n_frames,
            max_integration_time_s: params.max_integration_time_s.unwrap_or(f64::INFINITY),
            ..Default::default()
        }
    }

    pub fn mesh_config(&self) -> MeshIntegratorConfig {
        MeshIntegratorConfig {
            min_weight: self.mesh.mesh_min_weight,
            ..Default::default()
        }
    }

    pub fn color_mode(&self) -> ColorMode {
        self.server
            .color_mode
            .as_deref()
            .map(ColorMode::from_name)
            .unwrap_or_default()
    }
}

/// Configuration loader supporting YAML and TOML
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file, format chosen by extension
    pub fn load<P: AsRef<Path>>(path: P) -> Result<TsdfServerConfig, ConfigError> {
        let path = path.as_ref();
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match extension.to_lowercase().as_str() {
            "yaml" | "yml" => Self::load_yaml(path),
            "toml" => Self::load_toml(path),
            _ => Err(ConfigError::UnsupportedFormat(extension.to_string())),
        }
    }

    /// Load configuration from YAML file
    pub fn load_yaml<P: AsRef<Path>>(path: P) -> Result<TsdfServerConfig, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Load configuration from TOML file
    pub fn load_toml<P: AsRef<Path>>(path: P) -> Result<TsdfServerConfig, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save_yaml<P: AsRef<Path>>(config: &TsdfServerConfig, path: P) -> Result<(), ConfigError> {
        let content = serde_yaml::to_string(config)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn save_toml<P: AsRef<Path>>(config: &TsdfServerConfig, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string(config)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
