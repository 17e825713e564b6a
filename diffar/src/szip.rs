//! Seekable reader for szip streams.
//!
//! Stream header (little-endian):
//!
//! | Offset | Size | Description                                    |
//! |--------|------|------------------------------------------------|
//! |      0 |    4 | Stream magic (`SeZz`, 0x7a5a6553).             |
//! |      4 |    4 | Total compressed size (u32, informational).    |
//! |      8 |    2 | Chunk size (u16).                              |
//! |     10 |    2 | Preset dictionary size (u16).                  |
//! |     12 |    4 | Number of chunks (u32).                        |
//! |     16 |    2 | Size of the last chunk (u16).                  |
//! |     18 |    1 | Window bits (i8, negative for raw deflate).    |
//! |     19 |    1 | Filter (0 none, 1 Thumb BCJ, 2 ARM BCJ).       |
//! |     20 |    n | Preset dictionary.                             |
//! | 20 + n |   4m | File offset of each compressed chunk (u32).    |
//!
//! Every chunk is an independent deflate stream, so any chunk can be inflated
//! without replaying its predecessors; a seek followed by a read only
//! materializes the chunks the read actually touches. A buffer starting with
//! the ELF magic instead is passed through untouched.

use std::io::{self, Read, Seek, SeekFrom};

use bytes::Bytes;
use flate2::{Decompress, FlushDecompress, Status};
use log::trace;

use crate::bcj::BcjFilter;
use crate::elf::ELF_MAGIC;
use crate::error::Error;
use crate::util::{slice_at, u16_at, u32_at};

/// Stream magic, `SeZz`.
pub const SZIP_MAGIC: u32 = 0x7a5a_6553;

const HEADER_SIZE: usize = 20;

/// Seekable view of an szip stream (or of a raw ELF image).
pub struct SzipReader {
    inner: Inner,
}

enum Inner {
    /// Raw ELF image, forwarded untouched.
    Passthrough { data: Bytes, pos: u64 },
    Chunked(ChunkedStream),
}

struct ChunkedStream {
    data: Bytes,
    chunk_size: usize,
    n_chunks: usize,
    offsets: Vec<u32>,
    dictionary: Bytes,
    raw_inflate: bool,
    filter: BcjFilter,
    out_size: usize,
    buffer: Vec<u8>,
    produced: Vec<bool>,
    pos: u64,
}

impl SzipReader {
    pub fn new(data: Bytes) -> Result<Self, Error> {
        let magic = u32_at(&data, 0)?;
        if magic == ELF_MAGIC {
            return Ok(Self {
                inner: Inner::Passthrough { data, pos: 0 },
            });
        }
        if magic != SZIP_MAGIC {
            return Err(Error::NotSzip);
        }

        let chunk_size = u16_at(&data, 8)? as usize;
        let dict_size = u16_at(&data, 10)? as usize;
        let n_chunks = u32_at(&data, 12)? as usize;
        let last_chunk_size = u16_at(&data, 16)? as usize;
        let window_bits = slice_at(&data, 18, 1)?[0] as i8;
        let filter = BcjFilter::from_id(slice_at(&data, 19, 1)?[0])?;

        if n_chunks == 0 || chunk_size == 0 || last_chunk_size > chunk_size {
            return Err(Error::CorruptSzip);
        }

        let dictionary = {
            slice_at(&data, HEADER_SIZE, dict_size)?;
            data.slice(HEADER_SIZE..HEADER_SIZE + dict_size)
        };
        let mut offsets = Vec::with_capacity(n_chunks);
        for chunk in 0..n_chunks {
            offsets.push(u32_at(&data, HEADER_SIZE + dict_size + chunk * 4)?);
        }

        let out_size = (n_chunks - 1) * chunk_size + last_chunk_size;
        Ok(Self {
            inner: Inner::Chunked(ChunkedStream {
                data,
                chunk_size,
                n_chunks,
                offsets,
                dictionary,
                raw_inflate: window_bits < 0,
                filter,
                out_size,
                buffer: vec![0u8; out_size],
                produced: vec![false; n_chunks],
                pos: 0,
            }),
        })
    }

    /// Whether the stream is a raw ELF image forwarded untouched.
    pub fn is_passthrough(&self) -> bool {
        matches!(self.inner, Inner::Passthrough { .. })
    }

    /// Decompressed stream length in bytes.
    pub fn total_size(&self) -> u64 {
        match &self.inner {
            Inner::Passthrough { data, .. } => data.len() as u64,
            Inner::Chunked(stream) => stream.out_size as u64,
        }
    }

    /// Number of chunks materialized so far (zero for passthrough streams).
    pub fn produced_chunks(&self) -> usize {
        match &self.inner {
            Inner::Passthrough { .. } => 0,
            Inner::Chunked(stream) => stream.produced.iter().filter(|&&p| p).count(),
        }
    }
}

impl Read for SzipReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            Inner::Passthrough { data, pos } => {
                let start = (*pos as usize).min(data.len());
                let n = (data.len() - start).min(buf.len());
                buf[..n].copy_from_slice(&data[start..start + n]);
                *pos += n as u64;
                Ok(n)
            }
            Inner::Chunked(stream) => stream.read(buf),
        }
    }
}

impl Seek for SzipReader {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        match &mut self.inner {
            Inner::Passthrough { data, pos } => {
                let base = match target {
                    SeekFrom::Start(offset) => offset as i64,
                    SeekFrom::Current(delta) => *pos as i64 + delta,
                    SeekFrom::End(delta) => data.len() as i64 + delta,
                };
                if base < 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "seek before start of stream",
                    ));
                }
                *pos = base as u64;
                Ok(*pos)
            }
            Inner::Chunked(stream) => {
                let base = match target {
                    SeekFrom::Start(offset) => offset as i64,
                    SeekFrom::Current(delta) => stream.pos as i64 + delta,
                    SeekFrom::End(delta) => stream.out_size as i64 + delta,
                };
                stream.pos = base.clamp(0, stream.out_size as i64) as u64;
                Ok(stream.pos)
            }
        }
    }
}

impl ChunkedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let pos = self.pos as usize;
        if pos >= self.out_size || buf.is_empty() {
            return Ok(0);
        }
        let end = (pos + buf.len()).min(self.out_size);
        self.ensure(pos, end)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let n = end - pos;
        buf[..n].copy_from_slice(&self.buffer[pos..end]);
        self.pos = end as u64;
        Ok(n)
    }

    /// Materialize every chunk overlapping the logical range `start..end`.
    fn ensure(&mut self, start: usize, end: usize) -> Result<(), Error> {
        let first = start / self.chunk_size;
        let last = (end - 1) / self.chunk_size;
        for chunk in first..=last {
            if !self.produced[chunk] {
                self.produce_chunk(chunk)?;
            }
        }
        Ok(())
    }

    fn produce_chunk(&mut self, chunk: usize) -> Result<(), Error> {
        trace!("inflating chunk {} of {}", chunk, self.n_chunks);
        let compressed_start = self.offsets[chunk] as usize;
        let compressed_end = if chunk + 1 < self.n_chunks {
            self.offsets[chunk + 1] as usize
        } else {
            self.data.len()
        };
        let compressed = self
            .data
            .get(compressed_start..compressed_end)
            .ok_or(Error::UnexpectedEnd)?;

        let window_start = chunk * self.chunk_size;
        let window_end = (window_start + self.chunk_size).min(self.out_size);
        let window = &mut self.buffer[window_start..window_end];

        // Every chunk is decoded by a fresh inflate state seeded with the
        // preset dictionary, which is what makes chunks independently
        // decompressible.
        let mut inflater = Decompress::new(!self.raw_inflate);
        if !self.dictionary.is_empty() {
            inflater.set_dictionary(&self.dictionary)?;
        }
        loop {
            let before_in = inflater.total_in() as usize;
            let before_out = inflater.total_out() as usize;
            if before_out == window.len() {
                break;
            }
            let status = inflater.decompress(
                &compressed[before_in..],
                &mut window[before_out..],
                FlushDecompress::Finish,
            )?;
            if let Status::StreamEnd = status {
                break;
            }
            if inflater.total_in() as usize == before_in
                && inflater.total_out() as usize == before_out
            {
                return Err(Error::UnexpectedEnd);
            }
        }

        let filter = self.filter;
        filter.unfilter(&mut self.buffer[..window_end], window_start, self.chunk_size);
        self.produced[chunk] = true;
        Ok(())
    }
}
