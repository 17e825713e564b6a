//! Minimal read-only zip archive support.
//!
//! The differ only needs a directory listing with uncompressed sizes and a
//! by-name open, so this reader walks the central directory of an in-memory
//! buffer and inflates individual entries on demand. Stored and deflated
//! entries are supported; anything else is rejected.

use std::collections::HashMap;

use bytes::Bytes;
use flate2::{Decompress, FlushDecompress, Status};

use crate::error::Error;
use crate::util::{slice_at, u16_at, u32_at};

const EOCD_MAGIC: u32 = 0x0605_4b50;
const CENTRAL_MAGIC: u32 = 0x0201_4b50;
const LOCAL_MAGIC: u32 = 0x0403_4b50;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;

/// Maximum distance from the end of file to the end-of-central-directory
/// record: the record itself plus a maximum-length comment.
const EOCD_SEARCH_SPAN: usize = 22 + u16::MAX as usize;

/// One file within the archive directory.
#[derive(Clone, Debug)]
pub struct ZipEntry {
    pub name: String,
    pub uncompressed_size: u64,
    method: u16,
    compressed_size: u64,
    local_offset: u64,
}

/// Read-only zip archive over an in-memory buffer.
pub struct ZipArchive {
    data: Bytes,
    entries: Vec<ZipEntry>,
    by_name: HashMap<String, usize>,
}

impl ZipArchive {
    pub fn parse(data: Bytes) -> Result<Self, Error> {
        let eocd = find_eocd(&data)?;
        let entry_count = u16_at(&data, eocd + 10)? as usize;
        let directory_offset = u32_at(&data, eocd + 16)? as usize;

        let mut entries = Vec::with_capacity(entry_count);
        let mut by_name = HashMap::with_capacity(entry_count);
        let mut offset = directory_offset;
        for _ in 0..entry_count {
            if u32_at(&data, offset)? != CENTRAL_MAGIC {
                return Err(Error::CorruptArchive);
            }
            let method = u16_at(&data, offset + 10)?;
            let compressed_size = u64::from(u32_at(&data, offset + 20)?);
            let uncompressed_size = u64::from(u32_at(&data, offset + 24)?);
            let name_len = u16_at(&data, offset + 28)? as usize;
            let extra_len = u16_at(&data, offset + 30)? as usize;
            let comment_len = u16_at(&data, offset + 32)? as usize;
            let local_offset = u64::from(u32_at(&data, offset + 42)?);
            let name = String::from_utf8_lossy(slice_at(&data, offset + 46, name_len)?).into_owned();

            by_name.insert(name.clone(), entries.len());
            entries.push(ZipEntry {
                name,
                uncompressed_size,
                method,
                compressed_size,
                local_offset,
            });
            offset += 46 + name_len + extra_len + comment_len;
        }

        Ok(Self {
            data,
            entries,
            by_name,
        })
    }

    /// Entries in declared (central directory) order.
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    pub fn by_name(&self, name: &str) -> Option<&ZipEntry> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub(crate) fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Read the full uncompressed payload of an entry.
    pub fn open(&self, entry: &ZipEntry) -> Result<Bytes, Error> {
        let offset = entry.local_offset as usize;
        if u32_at(&self.data, offset)? != LOCAL_MAGIC {
            return Err(Error::CorruptArchive);
        }
        let name_len = u16_at(&self.data, offset + 26)? as usize;
        let extra_len = u16_at(&self.data, offset + 28)? as usize;
        let start = offset + 30 + name_len + extra_len;
        let compressed = slice_at(&self.data, start, entry.compressed_size as usize)?;

        match entry.method {
            METHOD_STORED => Ok(self.data.slice(start..start + compressed.len())),
            METHOD_DEFLATED => {
                let out = inflate_raw(compressed, entry.uncompressed_size as usize)?;
                if out.len() as u64 != entry.uncompressed_size {
                    return Err(Error::CorruptArchive);
                }
                Ok(Bytes::from(out))
            }
            method => Err(Error::UnsupportedCompression(method)),
        }
    }

    pub fn open_by_name(&self, name: &str) -> Result<Bytes, Error> {
        let entry = self.by_name(name).ok_or(Error::EntryNotFound)?;
        self.open(entry)
    }
}

fn find_eocd(data: &[u8]) -> Result<usize, Error> {
    if data.len() < 22 {
        return Err(Error::NotAnArchive);
    }
    let lowest = data.len().saturating_sub(EOCD_SEARCH_SPAN);
    for offset in (lowest..=data.len() - 22).rev() {
        if u32_at(data, offset)? == EOCD_MAGIC {
            return Ok(offset);
        }
    }
    Err(Error::NotAnArchive)
}

fn inflate_raw(input: &[u8], size_hint: usize) -> Result<Vec<u8>, Error> {
    let mut inflater = Decompress::new(false);
    let mut out = Vec::with_capacity(size_hint);
    loop {
        let before_in = inflater.total_in() as usize;
        let before_out = inflater.total_out() as usize;
        let status = inflater.decompress_vec(&input[before_in..], &mut out, FlushDecompress::Finish)?;
        match status {
            Status::StreamEnd => return Ok(out),
            Status::Ok | Status::BufError => {
                if out.len() == out.capacity() {
                    out.reserve(64 * 1024);
                } else if inflater.total_in() as usize == before_in
                    && inflater.total_out() as usize == before_out
                {
                    return Err(Error::UnexpectedEnd);
                }
            }
        }
    }
}
