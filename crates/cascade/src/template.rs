//! Specializes the gather-kernel template into per-level compute shaders.
//!
//! The template carries a single marker line followed by a dummy constant
//! definition so the file is itself a valid shader while editing:
//!
//! ```text
//! #PreprocessCascadeLevel
//! #define CASCADE_LEVEL -1
//! ```
//!
//! `specialize` replaces the marker with a concrete
//! `#define CASCADE_LEVEL <k>` and drops the dummy line so the two
//! definitions never collide. A template without the marker is rejected
//! outright; an unspecialized kernel must never reach the compiler.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// Marker line recognized verbatim in the gather template.
pub const LEVEL_MARKER: &str = "#PreprocessCascadeLevel";

/// Name of the compile-time constant bound to the cascade level index.
pub const CASCADE_LEVEL_CONSTANT: &str = "CASCADE_LEVEL";

const KERNEL_BASE_NAME: &str = "cascade";
const KERNEL_EXTENSION: &str = "comp";

/// File name of the gather-kernel template inside the shader directory.
pub const KERNEL_TEMPLATE_NAME: &str = "cascade.comp";

#[derive(Debug, Error)]
pub enum TemplateError {
    /// Marker absent from template text; reported by [`specialize`],
    /// which never sees a file path.
    #[error("cascade template has no '{LEVEL_MARKER}' marker line")]
    MarkerAbsent,

    #[error("cascade template at {path} has no '{LEVEL_MARKER}' marker line")]
    MarkerMissing { path: PathBuf },

    #[error("failed to read cascade template at {path}: {source}")]
    TemplateRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to create kernel output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Outcome of one generation run over a template.
///
/// A level that could not be written is skipped and recorded here rather
/// than aborting the run; the caller decides whether a partial set is
/// usable.
#[derive(Debug, Default)]
pub struct GenerationReport {
    pub written: Vec<PathBuf>,
    pub skipped: Vec<(PathBuf, String)>,
}

impl GenerationReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Deterministic output location for one generated kernel.
pub fn kernel_path(out_dir: &Path, level: u32) -> PathBuf {
    out_dir.join(format!("{KERNEL_BASE_NAME}{level}.{KERNEL_EXTENSION}"))
}

/// Produces the kernel source for a single cascade level.
///
/// The template is scanned line by line exactly once. The first marker
/// line becomes the level constant definition and the line after it (the
/// dummy definition) is removed; everything else passes through unchanged.
/// Repeated calls with the same inputs yield byte-identical output.
pub fn specialize(template: &str, level: u32) -> Result<String, TemplateError> {
    let mut output = String::with_capacity(template.len());
    let mut lines = template.lines();
    let mut substituted = false;

    while let Some(line) = lines.next() {
        if !substituted && line.contains(LEVEL_MARKER) {
            substituted = true;
            output.push_str(&format!("#define {CASCADE_LEVEL_CONSTANT} {level}\n"));
            // Swallow the dummy definition reserved on the next line.
            let _ = lines.next();
            continue;
        }
        output.push_str(line);
        output.push('\n');
    }

    if !substituted {
        return Err(TemplateError::MarkerAbsent);
    }

    Ok(output)
}

/// Generates one kernel file per level under `out_dir`.
///
/// The template is read once and each level is specialized independently
/// from the same immutable source. A missing marker aborts before any
/// file is written; a failure to write one level's file skips that level
/// and continues with the rest.
pub fn generate(
    template_path: &Path,
    out_dir: &Path,
    levels: u32,
) -> Result<GenerationReport, TemplateError> {
    let template = fs::read_to_string(template_path).map_err(|source| {
        TemplateError::TemplateRead {
            path: template_path.to_path_buf(),
            source,
        }
    })?;

    if !template.lines().any(|line| line.contains(LEVEL_MARKER)) {
        return Err(TemplateError::MarkerMissing {
            path: template_path.to_path_buf(),
        });
    }

    fs::create_dir_all(out_dir).map_err(|source| TemplateError::OutputDir {
        path: out_dir.to_path_buf(),
        source,
    })?;

    let mut report = GenerationReport::default();
    for level in 0..levels {
        let source = specialize(&template, level).map_err(|err| match err {
            TemplateError::MarkerAbsent => TemplateError::MarkerMissing {
                path: template_path.to_path_buf(),
            },
            other => other,
        })?;
        let target = kernel_path(out_dir, level);
        match write_kernel(&target, &source) {
            Ok(()) => {
                debug!(level, path = %target.display(), "generated cascade kernel");
                report.written.push(target);
            }
            Err(err) => {
                warn!(
                    level,
                    path = %target.display(),
                    error = %err,
                    "skipping cascade level; could not write kernel file"
                );
                report.skipped.push((target, err.to_string()));
            }
        }
    }

    Ok(report)
}

fn write_kernel(path: &Path, source: &str) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(source.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "#PreprocessCascadeLevel\n#define CASCADE_LEVEL -1\nBODY\n";

    #[test]
    fn specialize_binds_level_constant() {
        let out = specialize(TEMPLATE, 4).expect("specialize");
        assert_eq!(out, "#define CASCADE_LEVEL 4\nBODY\n");
    }

    #[test]
    fn specialize_is_idempotent_per_level() {
        let first = specialize(TEMPLATE, 2).expect("first run");
        let second = specialize(TEMPLATE, 2).expect("second run");
        assert_eq!(first, second);
    }

    #[test]
    fn specialize_rejects_template_without_marker() {
        let err = specialize("#define CASCADE_LEVEL -1\nBODY\n", 0).unwrap_err();
        assert!(matches!(err, TemplateError::MarkerAbsent));
        assert!(!err.to_string().contains("at "));
    }

    #[test]
    fn generate_writes_one_file_per_level() {
        let temp = tempfile::tempdir().unwrap();
        let template_path = temp.path().join("cascade.comp");
        std::fs::write(&template_path, TEMPLATE).unwrap();
        let out_dir = temp.path().join("generated");

        let report = generate(&template_path, &out_dir, 3).expect("generate");

        assert!(report.is_complete());
        assert_eq!(report.written.len(), 3);
        for level in 0..3 {
            let contents = std::fs::read_to_string(kernel_path(&out_dir, level)).unwrap();
            assert_eq!(contents, format!("#define CASCADE_LEVEL {level}\nBODY\n"));
            let defines = contents
                .lines()
                .filter(|line| line.starts_with("#define CASCADE_LEVEL"))
                .count();
            assert_eq!(defines, 1);
        }
    }

    #[test]
    fn generate_is_byte_identical_across_runs() {
        let temp = tempfile::tempdir().unwrap();
        let template_path = temp.path().join("cascade.comp");
        std::fs::write(&template_path, TEMPLATE).unwrap();
        let out_dir = temp.path().join("generated");

        generate(&template_path, &out_dir, 2).expect("first run");
        let first = std::fs::read(kernel_path(&out_dir, 1)).unwrap();
        generate(&template_path, &out_dir, 2).expect("second run");
        let second = std::fs::read(kernel_path(&out_dir, 1)).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn missing_marker_writes_no_output_files() {
        let temp = tempfile::tempdir().unwrap();
        let template_path = temp.path().join("cascade.comp");
        std::fs::write(&template_path, "void main() {}\n").unwrap();
        let out_dir = temp.path().join("generated");

        let err = generate(&template_path, &out_dir, 4).unwrap_err();

        assert!(matches!(err, TemplateError::MarkerMissing { .. }));
        assert!(!kernel_path(&out_dir, 0).exists());
    }

    #[test]
    fn unwritable_level_is_skipped_and_remaining_levels_generate() {
        let temp = tempfile::tempdir().unwrap();
        let template_path = temp.path().join("cascade.comp");
        std::fs::write(&template_path, TEMPLATE).unwrap();
        let out_dir = temp.path().join("generated");
        // A directory squatting on level 1's output path makes that
        // single write fail.
        std::fs::create_dir_all(kernel_path(&out_dir, 1)).unwrap();

        let report = generate(&template_path, &out_dir, 3).expect("generate");

        assert!(!report.is_complete());
        assert_eq!(report.written.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, kernel_path(&out_dir, 1));
        for level in [0, 2] {
            let contents = std::fs::read_to_string(kernel_path(&out_dir, level)).unwrap();
            assert_eq!(contents, format!("#define CASCADE_LEVEL {level}\nBODY\n"));
        }
    }

    #[test]
    fn zero_levels_is_a_legal_noop() {
        let temp = tempfile::tempdir().unwrap();
        let template_path = temp.path().join("cascade.comp");
        std::fs::write(&template_path, TEMPLATE).unwrap();
        let out_dir = temp.path().join("generated");

        let report = generate(&template_path, &out_dir, 0).expect("generate");

        assert!(report.written.is_empty());
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn only_first_marker_is_substituted() {
        let template = "#PreprocessCascadeLevel\n#define CASCADE_LEVEL -1\n#PreprocessCascadeLevel\nBODY\n";
        let out = specialize(template, 1).expect("specialize");
        assert_eq!(out, "#define CASCADE_LEVEL 1\n#PreprocessCascadeLevel\nBODY\n");
    }
}
