//! Source-file attribution from Breakpad symbol dumps.
//!
//! Only two of the record kinds matter for size accounting:
//!
//! ```text
//! FILE <id> <vcs>:<repository>:<path>:<revision>
//! <hex-address> <hex-size> <line> <file-id>
//! ```
//!
//! `MODULE`, `FUNC`, `PUBLIC`, `STACK` and `INLINE` records are skipped.

use std::collections::HashMap;

use crate::delta::SizeMap;
use crate::error::Error;

/// Accumulate per-source-file code bytes into `sizes` and return the total
/// number of bytes attributed.
pub fn source_file_sizes(symbols: &[u8], sizes: &mut SizeMap) -> Result<u64, Error> {
    let mut total = 0u64;
    let mut source_names: HashMap<&[u8], String> = HashMap::new();

    for line in symbols.split(|&b| b == b'\n') {
        if line.starts_with(b"FILE ") {
            let trimmed = line.trim_ascii();
            let mut parts = trimmed.split(|&b| b == b' ');
            parts.next();
            let id = parts.next().ok_or(Error::CorruptSymbols)?;
            let location = parts.next().ok_or(Error::CorruptSymbols)?;
            let fields: Vec<&[u8]> = location.split(|&b| b == b':').collect();
            if fields.len() < 4 {
                continue;
            }
            let path = String::from_utf8_lossy(fields[2]).into_owned();
            source_names.insert(id, path.clone());
            sizes.insert(path, 0);
            continue;
        }

        if matches!(line.first().copied(), Some(b'0'..=b'9' | b'a'..=b'f')) {
            let trimmed = line.trim_ascii();
            let fields: Vec<&[u8]> = trimmed.split(|&b| b == b' ').collect();
            let id = *fields.get(3).ok_or(Error::CorruptSymbols)?;
            let Some(path) = source_names.get(id) else {
                continue;
            };
            let size = parse_hex(fields.get(1).ok_or(Error::CorruptSymbols)?)?;
            *sizes.entry(path.clone()).or_insert(0) += size;
            total += size;
        }
    }

    Ok(total)
}

fn parse_hex(field: &[u8]) -> Result<u64, Error> {
    let text = std::str::from_utf8(field).map_err(|_| Error::CorruptSymbols)?;
    u64::from_str_radix(text, 16).map_err(|_| Error::CorruptSymbols)
}
