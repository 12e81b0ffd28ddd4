//! Kernel compilation boundary.
//!
//! Generated cascade kernels, the bake/merge kernels, and the resolve
//! shaders are Vulkan-style GLSL compiled through `wgpu`'s naga front end.
//! `wgpu` reports front-end and linking failures through device error
//! scopes rather than return values, so every module and pipeline creation
//! here runs inside a validation scope and a captured error aborts setup.
//! A level whose kernel fails to compile must never reach dispatch.

use std::borrow::Cow;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use wgpu::naga::ShaderStage;

/// Runs `build` inside a validation error scope and fails if the device
/// reported anything.
pub(crate) fn validated<T>(
    device: &wgpu::Device,
    label: &str,
    build: impl FnOnce() -> T,
) -> Result<T> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = build();
    if let Some(error) = pollster::block_on(device.pop_error_scope()) {
        return Err(anyhow!("{label}: {error}"));
    }
    Ok(value)
}

/// Compiles a compute kernel from GLSL source text.
pub(crate) fn compile_compute_kernel(
    device: &wgpu::Device,
    label: &str,
    source: String,
) -> Result<wgpu::ShaderModule> {
    validated(device, label, || {
        device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Owned(source),
                stage: ShaderStage::Compute,
                defines: &[],
            },
        })
    })
    .with_context(|| format!("failed to compile compute kernel '{label}'"))
}

/// Reads and compiles a compute kernel file.
pub(crate) fn load_compute_kernel(
    device: &wgpu::Device,
    label: &str,
    path: &Path,
) -> Result<wgpu::ShaderModule> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("failed to read kernel at {}", path.display()))?;
    compile_compute_kernel(device, label, source)
}

/// Reads and compiles the resolve vertex shader.
pub(crate) fn load_vertex_shader(
    device: &wgpu::Device,
    label: &str,
    path: &Path,
) -> Result<wgpu::ShaderModule> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("failed to read vertex shader at {}", path.display()))?;
    validated(device, label, || {
        device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Owned(source),
                stage: ShaderStage::Vertex,
                defines: &[],
            },
        })
    })
    .with_context(|| format!("failed to compile vertex shader '{label}'"))
}

/// Reads and compiles the resolve fragment shader.
pub(crate) fn load_fragment_shader(
    device: &wgpu::Device,
    label: &str,
    path: &Path,
) -> Result<wgpu::ShaderModule> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("failed to read fragment shader at {}", path.display()))?;
    validated(device, label, || {
        device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Owned(source),
                stage: ShaderStage::Fragment,
                defines: &[],
            },
        })
    })
    .with_context(|| format!("failed to compile fragment shader '{label}'"))
}
