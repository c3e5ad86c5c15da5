// mysql2docker/src/backup/archive.rs
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::errors::CompressionError;
use crate::utils::{discard_file, partial_path};

/// Extension the build template copies (`*.sql.gz`).
pub const COMPRESSED_EXTENSION: &str = "gz";

/// The gzip file that replaced a raw dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedArtifact {
    pub path: PathBuf,
    pub size: u64,
}

/// Gzips `source` into `<source>.gz` and deletes `source`.
///
/// # Arguments
/// * `source` - The raw dump file.
/// * `level` - gzip level, 0 to 9.
///
/// # Returns
/// The compressed file and its size. Whether this succeeds or fails, the
/// uncompressed `source` no longer exists afterwards.
pub fn compress_dump(source: &Path, level: u32) -> Result<CompressedArtifact, CompressionError> {
    let mut target = source.as_os_str().to_owned();
    target.push(".");
    target.push(COMPRESSED_EXTENSION);
    let target = PathBuf::from(target);
    let partial = partial_path(&target);

    let result = write_gzip(source, &partial, level).and_then(|size| {
        std::fs::rename(&partial, &target)?;
        Ok(size)
    });

    discard_file(source);
    match result {
        Ok(size) => {
            info!("✓ Compressed backup: {} ({} bytes)", target.display(), size);
            Ok(CompressedArtifact { path: target, size })
        }
        Err(e) => {
            discard_file(&partial);
            Err(e)
        }
    }
}

fn write_gzip(source: &Path, dest: &Path, level: u32) -> Result<u64, CompressionError> {
    let metadata = match std::fs::metadata(source) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(CompressionError::MissingSource(source.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    if !metadata.is_file() {
        return Err(CompressionError::MissingSource(source.to_path_buf()));
    }
    if metadata.len() == 0 {
        return Err(CompressionError::EmptySource(source.to_path_buf()));
    }

    info!(
        "Compressing {} ({} bytes, level {})",
        source.display(),
        metadata.len(),
        level
    );

    let mut reader = BufReader::new(File::open(source)?);
    let writer = BufWriter::new(File::create(dest)?);
    let mut encoder = GzEncoder::new(writer, Compression::new(level));
    io::copy(&mut reader, &mut encoder)?;

    let mut writer = encoder.finish()?;
    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    Ok(file.metadata()?.len())
}
