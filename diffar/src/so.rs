//! Shared-object handler: per-source-file size attribution.

use bytes::Bytes;
use log::debug;

use crate::breakpad;
use crate::delta::SizeMap;
use crate::differ::{DeltaIter, Differ, Handler, MapDiff};
use crate::elf;
use crate::error::Error;
use crate::szip::SzipReader;
use crate::zip::ZipArchive;

/// Diffs native shared objects by contributing source file.
///
/// Each side's symbol archive is scanned for an entry filed under the shared
/// object's basename; its Breakpad dump attributes `.text` bytes to source
/// files, the remaining sections are sized from the (szip-compressed or raw)
/// ELF image, and the merged maps are compared bucket by bucket. A shared
/// object without a symbol entry is sized from its ELF sections alone.
pub struct SoHandler {
    symbols_a: ZipArchive,
    symbols_b: ZipArchive,
}

impl SoHandler {
    /// `symbols_a` and `symbols_b` are the symbol archives matching the old
    /// and new application archive.
    pub fn new(symbols_a: Bytes, symbols_b: Bytes) -> Result<Self, Error> {
        Ok(Self {
            symbols_a: ZipArchive::parse(symbols_a)?,
            symbols_b: ZipArchive::parse(symbols_b)?,
        })
    }

    fn side_sizes(symbols: &ZipArchive, path: &str, payload: Bytes) -> Result<SizeMap, Error> {
        let mut sizes = SizeMap::new();
        let mut attributed = 0;
        match find_symbol_entry(symbols, path) {
            Some(entry_name) => {
                let dump = symbols.open_by_name(&entry_name)?;
                attributed = breakpad::source_file_sizes(&dump, &mut sizes)?;
            }
            None => debug!("no symbol entry for {}", path),
        }
        let mut image = SzipReader::new(payload)?;
        elf::add_section_sizes(&mut image, &mut sizes, attributed)?;
        Ok(sizes)
    }
}

impl Handler for SoHandler {
    fn diff<'a>(
        &'a self,
        _differ: &'a Differ,
        path: String,
        a: Option<Bytes>,
        b: Option<Bytes>,
    ) -> Result<DeltaIter<'a>, Error> {
        let a_map = match a {
            Some(payload) => Self::side_sizes(&self.symbols_a, &path, payload)?,
            None => SizeMap::new(),
        };
        let b_map = match b {
            Some(payload) => Self::side_sizes(&self.symbols_b, &path, payload)?,
            None => SizeMap::new(),
        };
        Ok(Box::new(MapDiff::new(path, a_map, b_map)))
    }
}

/// First entry filed under the shared object's basename, e.g.
/// `libexample.so/<id>/libexample.so.sym` for `lib/armeabi/libexample.so`.
fn find_symbol_entry(symbols: &ZipArchive, path: &str) -> Option<String> {
    let basename = match path.rfind('/') {
        Some(slash) => &path[slash + 1..],
        None => path,
    };
    let wanted = format!("{}/", basename);
    symbols
        .names()
        .find(|name| name.starts_with(&wanted))
        .map(str::to_string)
}
