use std::path::PathBuf;

use cascade::SceneManifest;

/// Lower bound for the ray-length multiplier scroll control.
pub const RAY_LENGTH_MIN: i32 = 1;
/// Upper bound for the ray-length multiplier scroll control.
pub const RAY_LENGTH_MAX: i32 = 200;

/// Per-frame scalar state shared by every dispatch.
///
/// Input handling mutates this between frames; dispatch code only reads it.
/// Keeping the whole set in one struct makes the per-frame state explicit and
/// testable without spinning up a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineParameters {
    /// Scales the march distance of every gather ray.
    pub ray_length_multiplier: i32,
    /// When false the merge reduction is bypassed entirely and resolve reads
    /// raw gather output.
    pub apply_merge: bool,
    /// Cascade level sampled by the resolve pass (debug aid; 0 in normal use).
    pub display_layer: u32,
    /// Bilinear-between-probes vs nearest-probe sampling in resolve.
    pub interpolate: bool,
    /// Visualizes raw probe-local UVs instead of radiance.
    pub probe_uv: bool,
    /// Freezes the pipeline; stale buffers are re-presented.
    pub paused: bool,
}

impl Default for PipelineParameters {
    fn default() -> Self {
        Self {
            ray_length_multiplier: 1,
            apply_merge: true,
            display_layer: 0,
            interpolate: true,
            probe_uv: false,
            paused: false,
        }
    }
}

impl PipelineParameters {
    pub fn toggle_merge(&mut self) {
        self.apply_merge = !self.apply_merge;
        tracing::info!(apply_merge = self.apply_merge, "merge toggled");
    }

    pub fn toggle_interpolate(&mut self) {
        self.interpolate = !self.interpolate;
        tracing::info!(interpolate = self.interpolate, "interpolation toggled");
    }

    pub fn toggle_probe_uv(&mut self) {
        self.probe_uv = !self.probe_uv;
        tracing::info!(probe_uv = self.probe_uv, "probe UV visualization toggled");
    }

    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
        tracing::info!(paused = self.paused, "pipeline pause toggled");
    }

    /// Selects the displayed layer, clamped to the configured level count.
    pub fn select_layer(&mut self, layer: u32, level_count: u32) {
        if level_count == 0 {
            return;
        }
        self.display_layer = layer.min(level_count - 1);
        tracing::info!(layer = self.display_layer, "display layer selected");
    }

    /// Adjusts the ray-length multiplier by scroll steps, staying in range.
    pub fn adjust_ray_length(&mut self, steps: i32) {
        self.ray_length_multiplier =
            (self.ray_length_multiplier + steps).clamp(RAY_LENGTH_MIN, RAY_LENGTH_MAX);
        tracing::debug!(
            multiplier = self.ray_length_multiplier,
            "ray length multiplier adjusted"
        );
    }
}

/// Immutable configuration passed to the renderer at start-up.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Window size in physical pixels.
    pub surface_size: (u32, u32),
    /// Number of cascade levels; generated kernels 0..level_count must exist.
    pub level_count: u32,
    /// Directory holding the generated per-level gather kernels.
    pub generated_dir: PathBuf,
    /// Scene bake compute kernel.
    pub bake_kernel: PathBuf,
    /// Merge reduction compute kernel.
    pub merge_kernel: PathBuf,
    /// Resolve vertex shader.
    pub resolve_vertex: PathBuf,
    /// Resolve fragment shader.
    pub resolve_fragment: PathBuf,
    /// Scene description (image path, materials, world size).
    pub scene: SceneManifest,
    /// Resolved scene image path, if the manifest names one.
    pub scene_image: Option<PathBuf>,
    /// Initial per-frame parameters.
    pub initial_params: PipelineParameters,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ray_length_stays_clamped() {
        let mut params = PipelineParameters::default();
        params.adjust_ray_length(-10);
        assert_eq!(params.ray_length_multiplier, RAY_LENGTH_MIN);
        params.adjust_ray_length(1000);
        assert_eq!(params.ray_length_multiplier, RAY_LENGTH_MAX);
    }

    #[test]
    fn layer_selection_clamps_to_level_count() {
        let mut params = PipelineParameters::default();
        params.select_layer(9, 6);
        assert_eq!(params.display_layer, 5);
        params.select_layer(2, 6);
        assert_eq!(params.display_layer, 2);
    }

    #[test]
    fn layer_selection_ignores_empty_pipeline() {
        let mut params = PipelineParameters::default();
        params.select_layer(3, 0);
        assert_eq!(params.display_layer, 0);
    }
}
