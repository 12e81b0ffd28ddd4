//! Defines the scene manifest schema consumed by the renderer at setup.
//!
//! A scene is a TOML file naming the occupancy/emission source image and the
//! material table entries the gather kernels look up per hit. The manifest is
//! read once at startup; the renderer bakes the image into the scene raster
//! and uploads the flattened material table before the frame loop begins.
//!
//! Types:
//!
//! - `SceneManifest` captures the top-level metadata, the source image path,
//!   and the ordered material entries.
//! - `MaterialEntry` pairs a material id with its emissive color and
//!   intensity.
//!
//! Functions:
//!
//! - `SceneManifest::load` reads and validates a manifest from disk.
//! - `SceneManifest::material_texels` flattens the entries into the fixed
//!   8x8 RGBA32F lookup the kernels index by material id.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Side length of the square material lookup texture.
pub const MATERIAL_TABLE_SIDE: usize = 8;

const MATERIAL_SLOT_COUNT: usize = MATERIAL_TABLE_SIDE * MATERIAL_TABLE_SIDE;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("scene manifest not found at {0}")]
    Missing(PathBuf),

    #[error("failed to parse scene manifest: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("scene manifest validation failed: {0:?}")]
    Validation(Vec<String>),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize, Clone)]
pub struct SceneManifest {
    pub name: Option<String>,
    /// Source image with occupancy in the red channel; `None` selects the
    /// built-in test scene.
    #[serde(default)]
    pub image: Option<PathBuf>,
    /// World raster size in texels.
    #[serde(default = "default_world_size")]
    pub world_size: [u32; 2],
    #[serde(default)]
    pub materials: Vec<MaterialEntry>,
}

fn default_world_size() -> [u32; 2] {
    [1024, 1024]
}

#[derive(Debug, Deserialize, Clone)]
pub struct MaterialEntry {
    pub id: u8,
    pub color: [f32; 3],
    #[serde(default = "default_intensity")]
    pub intensity: f32,
}

fn default_intensity() -> f32 {
    1.0
}

impl Default for SceneManifest {
    fn default() -> Self {
        Self {
            name: None,
            image: None,
            world_size: default_world_size(),
            materials: vec![MaterialEntry {
                id: 1,
                color: [0.0, 1.0, 0.0],
                intensity: 1.0,
            }],
        }
    }
}

impl SceneManifest {
    /// Reads and validates a manifest from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ManifestError::Missing(path.to_path_buf()));
        }

        let raw = fs::read_to_string(path)?;
        let manifest: SceneManifest = toml::from_str(&raw)?;
        let issues = manifest.validate();
        if !issues.is_empty() {
            return Err(ManifestError::Validation(issues));
        }

        Ok(manifest)
    }

    /// Resolves the scene image relative to the manifest's directory.
    pub fn image_path(&self, manifest_path: &Path) -> Option<PathBuf> {
        let image = self.image.as_ref()?;
        if image.is_absolute() {
            return Some(image.clone());
        }
        let root = manifest_path.parent().unwrap_or_else(|| Path::new("."));
        Some(root.join(image))
    }

    /// Returns human-readable issues instead of panicking on bad input.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.world_size[0] == 0 || self.world_size[1] == 0 {
            issues.push(format!(
                "world size {}x{} has a zero extent",
                self.world_size[0], self.world_size[1]
            ));
        }
        let mut seen = [false; MATERIAL_SLOT_COUNT];
        for material in &self.materials {
            let id = material.id as usize;
            if material.id == 0 {
                issues.push("material id 0 is reserved for empty space".to_string());
                continue;
            }
            if id >= MATERIAL_SLOT_COUNT {
                issues.push(format!(
                    "material id {} exceeds table capacity ({})",
                    material.id,
                    MATERIAL_SLOT_COUNT - 1
                ));
                continue;
            }
            if seen[id] {
                issues.push(format!("material id {} declared more than once", material.id));
            }
            seen[id] = true;
            if material.intensity < 0.0 {
                issues.push(format!(
                    "material id {} has negative intensity {}",
                    material.id, material.intensity
                ));
            }
        }
        issues
    }

    /// Flattens the materials into the 8x8 RGBA32F lookup texture.
    ///
    /// Slot 0 stays fully zero (empty space); unassigned slots are zero as
    /// well so stray ids resolve to darkness instead of garbage.
    pub fn material_texels(&self) -> Vec<[f32; 4]> {
        let mut texels = vec![[0.0_f32; 4]; MATERIAL_SLOT_COUNT];
        for material in &self.materials {
            let id = material.id as usize;
            if id == 0 || id >= MATERIAL_SLOT_COUNT {
                continue;
            }
            texels[id] = [
                material.color[0],
                material.color[1],
                material.color[2],
                material.intensity,
            ];
        }
        texels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_manifest(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("scene.toml");
        std::fs::write(&path, contents).unwrap();
        (temp, path)
    }

    #[test]
    fn loads_valid_manifest() {
        let (_temp, path) = write_manifest(
            r#"
            name = "Demo"
            image = "scenes/demo.png"
            world_size = [512, 512]

            [[materials]]
            id = 1
            color = [1.0, 0.5, 0.0]
            intensity = 2.0
            "#,
        );

        let manifest = SceneManifest::load(&path).expect("load manifest");
        assert_eq!(manifest.world_size, [512, 512]);
        assert_eq!(manifest.materials.len(), 1);
        let image = manifest.image_path(&path).expect("image path");
        assert!(image.ends_with("scenes/demo.png"));
    }

    #[test]
    fn rejects_reserved_and_duplicate_ids() {
        let (_temp, path) = write_manifest(
            r#"
            [[materials]]
            id = 0
            color = [1.0, 1.0, 1.0]

            [[materials]]
            id = 3
            color = [1.0, 0.0, 0.0]

            [[materials]]
            id = 3
            color = [0.0, 1.0, 0.0]
            "#,
        );

        let err = SceneManifest::load(&path).unwrap_err();
        match err {
            ManifestError::Validation(issues) => assert_eq!(issues.len(), 2),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn material_texels_fill_declared_slots_only() {
        let manifest = SceneManifest {
            materials: vec![MaterialEntry {
                id: 2,
                color: [0.25, 0.5, 1.0],
                intensity: 3.0,
            }],
            ..SceneManifest::default()
        };
        // Default manifest carries material 1; override keeps only id 2.

        let texels = manifest.material_texels();
        assert_eq!(texels.len(), MATERIAL_TABLE_SIDE * MATERIAL_TABLE_SIDE);
        assert_eq!(texels[0], [0.0; 4]);
        assert_eq!(texels[2], [0.25, 0.5, 1.0, 3.0]);
        assert_eq!(texels[1], [0.0; 4]);
    }

    #[test]
    fn missing_manifest_reports_path() {
        let err = SceneManifest::load("/nonexistent/scene.toml").unwrap_err();
        assert!(matches!(err, ManifestError::Missing(_)));
    }
}
