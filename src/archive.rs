use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;
use xz2::read::XzDecoder;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::Error;

/// Extract a `.tar.xz` patch archive into `target_dir`, recreating the
/// directory structure.
pub fn extract_tar_xz(archive: &Path, target_dir: &Path) -> Result<(), Error> {
    debug!(archive = %archive.display(), target = %target_dir.display(), "extracting tar.xz");
    std::fs::create_dir_all(target_dir)?;

    let file = File::open(archive)?;
    let decoder = XzDecoder::new(BufReader::new(file));
    let mut tar = tar::Archive::new(decoder);
    tar.unpack(target_dir).map_err(|e| Error::ArchiveFormat {
        path: archive.to_path_buf(),
        format: "tar.xz",
        reason: e.to_string(),
    })?;
    Ok(())
}

/// Extract a zip archive into `target_dir`.
pub fn extract_zip(archive: &Path, target_dir: &Path) -> Result<(), Error> {
    debug!(archive = %archive.display(), target = %target_dir.display(), "extracting zip");
    std::fs::create_dir_all(target_dir)?;

    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(BufReader::new(file)).map_err(|e| Error::ArchiveFormat {
        path: archive.to_path_buf(),
        format: "zip",
        reason: e.to_string(),
    })?;
    zip.extract(target_dir).map_err(|e| Error::ArchiveFormat {
        path: archive.to_path_buf(),
        format: "zip",
        reason: e.to_string(),
    })?;
    Ok(())
}

/// Recursively compress `source_dir`'s contents into a zip at `target_file`.
///
/// Entry names are relative to `source_dir`; the root directory itself is
/// not an entry.
pub fn compress_dir_to_zip(source_dir: &Path, target_file: &Path) -> Result<(), Error> {
    debug!(source = %source_dir.display(), target = %target_file.display(), "compressing zip");

    let file = File::create(target_file)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default();

    let to_zip_err = |e: zip::result::ZipError| Error::ArchiveFormat {
        path: target_file.to_path_buf(),
        format: "zip",
        reason: e.to_string(),
    };

    for entry in WalkDir::new(source_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            Error::Io(e.into_io_error().unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::Other, "walkdir entry without io cause")
            }))
        })?;
        let name = entry
            .path()
            .strip_prefix(source_dir)
            .expect("walked entry is below its root")
            .to_str()
            .ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("non-UTF8 path: {}", entry.path().display()),
                ))
            })?
            .replace('\\', "/");

        if entry.file_type().is_dir() {
            zip.add_directory(name, options).map_err(to_zip_err)?;
        } else {
            zip.start_file(name, options).map_err(to_zip_err)?;
            let mut reader = BufReader::new(File::open(entry.path())?);
            let mut buf = [0u8; 64 * 1024];
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                zip.write_all(&buf[..n])?;
            }
        }
    }

    zip.finish().map_err(to_zip_err)?;
    Ok(())
}
