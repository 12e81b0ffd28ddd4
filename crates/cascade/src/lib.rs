//! Kernel generation and scene description for the radiance cascade viewer.
//!
//! The crate owns the two pieces of state that exist before any GPU work
//! starts:
//!
//! - `template` specializes the single gather-kernel template into one
//!   concrete compute shader per cascade level. The target GL compute model
//!   only allows one set of compile-time constants per compiled unit, so the
//!   level index is injected as a `#define` and each level is compiled from
//!   its own generated file.
//! - `manifest` parses the scene TOML (source image plus material table)
//!   that the bake pass and gather kernels consume.
//!
//! Nothing here touches the GPU; the renderer crate consumes the generated
//! files and the parsed manifest at setup time.

mod manifest;
mod template;

pub use manifest::{ManifestError, MaterialEntry, SceneManifest, MATERIAL_TABLE_SIDE};
pub use template::{
    generate, kernel_path, specialize, GenerationReport, TemplateError, CASCADE_LEVEL_CONSTANT,
    KERNEL_TEMPLATE_NAME, LEVEL_MARKER,
};
