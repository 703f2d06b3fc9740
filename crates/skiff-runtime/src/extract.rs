use crate::RuntimeError;
use flate2::read::GzDecoder;
use std::fs;
use std::io::Read;
use std::path::Path;
use tar::EntryType;
use tracing::debug;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Extract layer archives into `dest` in exactly the order given.
///
/// Later archives overwrite paths written by earlier ones. Whiteout files are
/// not interpreted, so nothing an earlier layer created is ever deleted.
/// Callers pass layers in manifest order: base first for schema 2 / OCI
/// manifests, top first for schema 1. Returns the number of entries written.
pub fn extract_layers<B: AsRef<[u8]>>(blobs: &[B], dest: &Path) -> Result<usize, RuntimeError> {
    let mut total = 0;
    for (index, blob) in blobs.iter().enumerate() {
        let written = extract_layer(blob.as_ref(), dest)
            .map_err(|e| match e {
                RuntimeError::Extraction(msg) => {
                    RuntimeError::Extraction(format!("layer {index}: {msg}"))
                }
                other => other,
            })?;
        total += written;
    }
    Ok(total)
}

/// Extract one tar or tar+gzip archive into `dest`, creating it if needed.
pub fn extract_layer(blob: &[u8], dest: &Path) -> Result<usize, RuntimeError> {
    fs::create_dir_all(dest).map_err(|e| {
        RuntimeError::Extraction(format!("cannot create {}: {e}", dest.display()))
    })?;

    let written = if blob.starts_with(&GZIP_MAGIC) {
        unpack_entries(tar::Archive::new(GzDecoder::new(blob)), dest)?
    } else {
        unpack_entries(tar::Archive::new(blob), dest)?
    };
    debug!(
        "extracted {written} entries ({} bytes) into {}",
        blob.len(),
        dest.display()
    );
    Ok(written)
}

fn unpack_entries<R: Read>(mut ar: tar::Archive<R>, dest: &Path) -> Result<usize, RuntimeError> {
    ar.set_preserve_permissions(true);
    ar.set_preserve_mtime(false);
    ar.set_unpack_xattrs(false);
    ar.set_overwrite(true);

    let entries = ar
        .entries()
        .map_err(|e| RuntimeError::Extraction(format!("malformed archive: {e}")))?;

    let mut written = 0;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| RuntimeError::Extraction(format!("malformed archive: {e}")))?;
        let path = entry
            .path()
            .map_err(|e| RuntimeError::Extraction(format!("invalid entry path: {e}")))?
            .into_owned();

        let kind = entry.header().entry_type();
        if is_metadata(kind) {
            continue;
        }
        if !is_supported(kind) {
            return Err(RuntimeError::Extraction(format!(
                "unsupported entry type {kind:?} at {}",
                path.display()
            )));
        }

        let inside = entry.unpack_in(dest).map_err(|e| {
            RuntimeError::Extraction(format!("writing {}: {e}", path.display()))
        })?;
        if !inside {
            return Err(RuntimeError::Extraction(format!(
                "entry {} escapes the destination",
                path.display()
            )));
        }
        written += 1;
    }
    Ok(written)
}

fn is_supported(kind: EntryType) -> bool {
    matches!(
        kind,
        EntryType::Regular
            | EntryType::Continuous
            | EntryType::Directory
            | EntryType::Symlink
            | EntryType::Link
            | EntryType::Char
            | EntryType::Block
            | EntryType::Fifo
    )
}

fn is_metadata(kind: EntryType) -> bool {
    matches!(
        kind,
        EntryType::XGlobalHeader | EntryType::XHeader | EntryType::GNULongName | EntryType::GNULongLink
    )
}
