//! Image archives: gzip or plain tar.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use cask_common::{CaskError, CaskResult};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Unpack `archive` into `dest`, detecting gzip compression.
///
/// # Errors
///
/// Fails when the archive cannot be read or unpacked.
pub fn extract(archive: &Path, dest: &Path) -> CaskResult<()> {
    tracing::debug!(archive = %archive.display(), dest = %dest.display(), "Extracting archive");

    let open = || {
        File::open(archive)
            .map_err(|e| CaskError::io_context(format!("open {}", archive.display()), e))
    };

    let mut magic = [0u8; 2];
    let compressed = open()?.read_exact(&mut magic).is_ok() && magic == GZIP_MAGIC;

    let file = BufReader::new(open()?);
    let reader: Box<dyn Read> = if compressed {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let mut tar = tar::Archive::new(reader);
    tar.set_preserve_permissions(true);
    tar.unpack(dest)
        .map_err(|e| CaskError::io_context(format!("unpack {}", archive.display()), e))?;
    Ok(())
}

/// Pack the contents of `src` into a gzip-compressed tar at `archive`.
///
/// # Errors
///
/// Fails when `src` cannot be read or `archive` cannot be written.
pub fn pack(src: &Path, archive: &Path) -> CaskResult<()> {
    tracing::debug!(src = %src.display(), archive = %archive.display(), "Packing archive");

    let file = File::create(archive)
        .map_err(|e| CaskError::io_context(format!("create {}", archive.display()), e))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);
    builder
        .append_dir_all(".", src)
        .map_err(|e| CaskError::io_context(format!("archive {}", src.display()), e))?;
    builder.into_inner()?.finish()?;
    Ok(())
}
