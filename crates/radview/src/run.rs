use anyhow::{Context, Result};
use cascade::{generate, SceneManifest, KERNEL_TEMPLATE_NAME};
use renderer::{PipelineParameters, Renderer, RendererConfig, RAY_LENGTH_MAX, RAY_LENGTH_MIN};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub fn run(cli: Cli) -> Result<()> {
    let scene = match cli.scene.as_deref() {
        Some(path) => SceneManifest::load(path)
            .with_context(|| format!("failed to load scene manifest at {}", path.display()))?,
        None => {
            tracing::info!("no scene manifest given; using built-in test scene");
            SceneManifest::default()
        }
    };
    let scene_image = cli
        .scene
        .as_deref()
        .and_then(|path| scene.image_path(path));

    let template = cli.shaders_dir.join(KERNEL_TEMPLATE_NAME);
    let report = generate(&template, &cli.out_dir, cli.levels)
        .with_context(|| format!("failed to generate kernels from {}", template.display()))?;
    for (path, reason) in &report.skipped {
        tracing::warn!(path = %path.display(), reason, "kernel variant skipped");
    }
    if !report.is_complete() {
        anyhow::bail!(
            "{} of {} kernel variants failed to generate",
            report.skipped.len(),
            cli.levels
        );
    }
    tracing::info!(
        levels = cli.levels,
        out_dir = %cli.out_dir.display(),
        "kernel variants generated"
    );

    let initial_params = PipelineParameters {
        ray_length_multiplier: cli.ray_length.clamp(RAY_LENGTH_MIN, RAY_LENGTH_MAX),
        apply_merge: !cli.no_merge,
        display_layer: cli.layer.min(cli.levels - 1),
        ..PipelineParameters::default()
    };

    let config = RendererConfig {
        surface_size: cli.size,
        level_count: cli.levels,
        generated_dir: cli.out_dir,
        bake_kernel: cli.shaders_dir.join("scene_bake.comp"),
        merge_kernel: cli.shaders_dir.join("merge.comp"),
        resolve_vertex: cli.shaders_dir.join("resolve.vert"),
        resolve_fragment: cli.shaders_dir.join("resolve.frag"),
        scene,
        scene_image,
        initial_params,
    };

    Renderer::new(config).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::fs;

    #[test]
    fn generation_failure_surfaces_before_any_window_opens() {
        let temp = tempfile::tempdir().unwrap();
        let shaders = temp.path().join("shaders");
        fs::create_dir_all(&shaders).unwrap();
        fs::write(shaders.join(KERNEL_TEMPLATE_NAME), "void main() {}\n").unwrap();

        let cli = Cli::try_parse_from([
            "radview",
            "--shaders-dir",
            shaders.to_str().unwrap(),
            "--out-dir",
            temp.path().join("generated").to_str().unwrap(),
        ])
        .unwrap();

        let err = run(cli).unwrap_err();
        assert!(err.to_string().contains("failed to generate kernels"));
    }
}
