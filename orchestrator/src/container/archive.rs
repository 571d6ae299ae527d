//! Minimal tar archives for the daemon
//!
//! The daemon takes build contexts and file uploads as tar streams. Both uses
//! here ship exactly one regular file, so a single ustar header is enough.

use crate::error::{Error, Result};

const BLOCK: usize = 512;

/// Write a POSIX ustar archive holding one regular file at `path`
pub fn single_file_archive(path: &str, contents: &[u8], mode: u32) -> Result<Vec<u8>> {
    let path = path.trim_start_matches('/');
    if path.is_empty() || path.len() > 100 {
        return Err(Error::Archive(format!(
            "Archive member path must be 1-100 bytes: {path:?}"
        )));
    }

    let mut header = [0u8; BLOCK];
    header[..path.len()].copy_from_slice(path.as_bytes());
    write_octal(&mut header[100..108], u64::from(mode & 0o7777));
    write_octal(&mut header[108..116], 0); // uid
    write_octal(&mut header[116..124], 0); // gid
    write_octal(&mut header[124..136], contents.len() as u64);
    write_octal(&mut header[136..148], 0); // mtime
    header[156] = b'0';
    header[257..263].copy_from_slice(b"ustar\0");
    header[263..265].copy_from_slice(b"00");

    // Checksum is computed with its own field filled with spaces
    header[148..156].fill(b' ');
    let checksum: u32 = header.iter().map(|&b| u32::from(b)).sum();
    write_octal(&mut header[148..155], u64::from(checksum));
    header[155] = b' ';

    let padding = (BLOCK - contents.len() % BLOCK) % BLOCK;
    let mut archive = Vec::with_capacity(BLOCK + contents.len() + padding + 2 * BLOCK);
    archive.extend_from_slice(&header);
    archive.extend_from_slice(contents);
    archive.resize(archive.len() + padding, 0);
    // End of archive: two zero blocks
    archive.resize(archive.len() + 2 * BLOCK, 0);

    Ok(archive)
}

/// Zero-padded octal digits followed by a NUL terminator
fn write_octal(field: &mut [u8], value: u64) {
    let digits = field.len() - 1;
    let text = format!("{value:0digits$o}");
    let start = text.len().saturating_sub(digits);
    field[..digits].copy_from_slice(&text.as_bytes()[start..]);
    field[digits] = 0;
}
