use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use memmap2::Mmap;
use walkdir::WalkDir;

use crate::error::Error;

/// Memory-map a file for read-only access.
///
/// # Safety
/// The mapping is read-only. Callers must not concurrently truncate or replace
/// the underlying file while the `Mmap` is live.
pub fn mmap_file(path: &Path) -> io::Result<Mmap> {
    let file = std::fs::File::open(path)?;
    // SAFETY: We only read from this mapping; the engine assumes exclusive
    // access to the repository root for the duration of a run.
    unsafe { Mmap::map(&file) }
}

/// Stream-compute the CRC32 of a file.
/// Uses a 256 KB BufReader to reduce syscall overhead vs the default 8 KB.
pub fn crc32_of_file(path: &Path) -> io::Result<u32> {
    let file = std::fs::File::open(path)?;
    let mut reader = io::BufReader::with_capacity(256 * 1024, file);
    let mut hasher = crc32fast::Hasher::new();
    io::copy(&mut reader, &mut Crc32Writer(&mut hasher))?;
    Ok(hasher.finalize())
}

struct Crc32Writer<'a>(&'a mut crc32fast::Hasher);

impl io::Write for Crc32Writer<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Render a CRC32 the way we put it on the wire: bare lowercase hex.
pub fn format_crc(crc: u32) -> String {
    format!("{crc:x}")
}

/// Parse a wire CRC32 value. Accepts both bare and `0x`-prefixed hex since
/// published repositories contain both spellings.
pub fn parse_crc(value: &str) -> Option<u32> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u32::from_str_radix(digits, 16).ok()
}

/// Recursively copy a directory tree. `dst` is created if absent.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<(), Error> {
    std::fs::create_dir_all(dst)?;

    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|e| {
            Error::Io(e.into_io_error().unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::Other, "walkdir entry without io cause")
            }))
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .expect("walked entry is below its root");
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}

/// Create a uniquely named directory under `parent`.
///
/// Deliberately not a self-deleting temp dir: scratch folders take part in
/// rename-based promotion and must survive being moved out from under their
/// original path.
pub fn create_scratch_dir(parent: &Path, prefix: &str) -> io::Result<PathBuf> {
    let mut seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 ^ d.as_secs())
        .unwrap_or(0)
        ^ ((std::process::id() as u64) << 32);

    loop {
        let candidate = parent.join(format!("{prefix}{seed:012x}"));
        match std::fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                seed = seed.wrapping_add(1);
            }
            Err(e) => return Err(e),
        }
    }
}
