//! Build-context archiving
//!
//! Each image's build context (the Dockerfile folder, plus optional side
//! folders) is packed into a single `.tar.gz` that the build substrate's
//! init container can fetch from the artifact store. Python bytecode caches
//! and VCS metadata are excluded.

use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::{EngineError, Result};

const EXCLUDED_NAMES: [&str; 2] = ["__pycache__", ".git"];

/// Pack `context_dir` (at the archive root) and each of `extra_dirs` (under
/// its own basename) into a gzipped tarball.
///
/// The returned temp file is deleted when dropped, so the caller owns the
/// archive for exactly as long as it holds the handle.
pub fn pack_context(context_dir: &Path, extra_dirs: &[PathBuf]) -> Result<NamedTempFile> {
    let tmp = tempfile::Builder::new().suffix(".tar.gz").tempfile()?;

    let encoder = GzEncoder::new(tmp.reopen()?, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    append_dir_filtered(&mut builder, context_dir, Path::new(""))?;

    for extra in extra_dirs {
        let base = extra.file_name().ok_or_else(|| {
            EngineError::Config(format!(
                "extra context folder {} has no basename",
                extra.display()
            ))
        })?;
        append_dir_filtered(&mut builder, extra, Path::new(base))?;
    }

    let encoder = builder.into_inner()?;
    encoder.finish()?;

    Ok(tmp)
}

fn append_dir_filtered(
    builder: &mut tar::Builder<GzEncoder<File>>,
    dir: &Path,
    prefix: &Path,
) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if EXCLUDED_NAMES.iter().any(|excluded| name == *excluded) {
            continue;
        }

        let path = entry.path();
        let archived = prefix.join(&name);
        if entry.file_type()?.is_dir() {
            builder.append_dir(&archived, &path)?;
            append_dir_filtered(builder, &path, &archived)?;
        } else {
            builder.append_path_with_name(&path, &archived)?;
        }
    }
    Ok(())
}
