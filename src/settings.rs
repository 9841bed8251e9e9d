//! Tunables for scene construction.
//!
//! Settings are plain serde structs so hosts can keep them in a RON file next to
//! their scenes. Every field has a default; a partial file only overrides what
//! it names.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::SettingsError;

/// Camera synthesized when an imported asset has none.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraDefaults {
    /// Offset along +Z from the scene origin.
    pub distance: f32,
    pub fov_degrees: f32,
    pub aspect_ratio: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraDefaults {
    fn default() -> Self {
        Self {
            distance: 5.0,
            fov_degrees: 75.0,
            aspect_ratio: 1.0,
            near: 0.01,
            far: 1000.0,
        }
    }
}

/// Values written into a `camera` feature record that lacks them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraFeatureDefaults {
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraFeatureDefaults {
    fn default() -> Self {
        Self {
            fov_degrees: 70.0,
            near: 0.05,
            far: 500.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RectangleDefaults {
    pub size: [f32; 2],
    pub color: [f32; 4],
}

impl Default for RectangleDefaults {
    fn default() -> Self {
        Self {
            size: [200.0, 100.0],
            color: [1.0, 1.0, 1.0, 1.0],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhongDefaults {
    pub specular_color: [f32; 4],
    pub shininess: f32,
    pub ambient_color: [f32; 4],
    pub diffuse_color: [f32; 4],
    /// Highest light count the shader template is compiled for.
    pub max_lights: u32,
}

impl Default for PhongDefaults {
    fn default() -> Self {
        Self {
            specular_color: [
                0x11 as f32 / 255.0,
                0x11 as f32 / 255.0,
                0x11 as f32 / 255.0,
                0.0,
            ],
            shininess: 80.0,
            ambient_color: [0.0, 0.0, 0.0, 1.0],
            diffuse_color: [1.0, 1.0, 1.0, 1.0],
            max_lights: 16,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridDefaults {
    pub subdivisions: u32,
    pub ambient: f32,
}

impl Default for GridDefaults {
    fn default() -> Self {
        Self {
            subdivisions: 20,
            ambient: 0.3,
        }
    }
}

/// Where relative resource paths (textures, sprites) are resolved.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetDefaults {
    pub root: PathBuf,
}

impl Default for AssetDefaults {
    fn default() -> Self {
        Self {
            root: Path::new("./").join("assets"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneSettings {
    pub assets: AssetDefaults,
    pub camera: CameraDefaults,
    pub camera_feature: CameraFeatureDefaults,
    pub rectangle: RectangleDefaults,
    pub phong: PhongDefaults,
    pub grid: GridDefaults,
}

impl SceneSettings {
    pub fn from_ron(contents: &str) -> Result<Self, SettingsError> {
        ron::from_str(contents).map_err(|e| SettingsError::Parse(e.to_string()))
    }

    pub fn to_ron(&self) -> Result<String, SettingsError> {
        ron::ser::to_string_pretty(self, Default::default())
            .map_err(|e| SettingsError::Serialize(e.to_string()))
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_ron(&contents)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        std::fs::write(path, self.to_ron()?)?;
        Ok(())
    }
}
