//! Little-endian accessors shared by the binary parsers.

use crate::error::Error;

pub(crate) fn slice_at(data: &[u8], offset: usize, len: usize) -> Result<&[u8], Error> {
    let end = offset.checked_add(len).ok_or(Error::UnexpectedEnd)?;
    data.get(offset..end).ok_or(Error::UnexpectedEnd)
}

pub(crate) fn u16_at(data: &[u8], offset: usize) -> Result<u16, Error> {
    let b = slice_at(data, offset, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

pub(crate) fn u32_at(data: &[u8], offset: usize) -> Result<u32, Error> {
    let b = slice_at(data, offset, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}
