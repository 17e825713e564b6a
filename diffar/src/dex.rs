//! Structural size accounting for Dalvik executables.
//!
//! Every byte of a dex file is attributed to a named bucket without executing
//! or even decoding any bytecode: the id tables and the map list are sized per
//! entry, per-class payloads (class data, code items, debug streams, static
//! values) are attributed to the bucket named after the class's declared
//! source file, and shared structures (type lists, annotation sets, items and
//! ref lists) are sized exactly once by deduplicating their offsets. Whatever
//! remains of the declared data section stays in `.data`.

use std::collections::HashSet;

use crate::delta::SizeMap;
use crate::error::Error;
use crate::util::{slice_at, u16_at, u32_at};

/// Magic of the one supported dex version.
pub const DEX_MAGIC: &[u8; 8] = b"dex\n035\0";

const HEADER_SIZE: u32 = 0x70;
const ENDIAN_TAG: u32 = 0x1234_5678;
const NO_INDEX: u32 = 0xffff_ffff;

/// Parse `data` as a dex file and attribute every byte to a bucket.
pub fn size_map(data: &[u8]) -> Result<SizeMap, Error> {
    Parser::new(data)?.run()
}

struct Parser<'a> {
    data: &'a [u8],
    link_size: u32,
    map_off: u32,
    string_ids_size: u32,
    string_ids_off: u32,
    class_defs_size: u32,
    class_defs_off: u32,
    /// Running remainder of the declared data section.
    data_size: u64,
    sizes: SizeMap,
    type_list_offs: HashSet<u32>,
    type_list_total: u64,
    annotation_offs: HashSet<u32>,
    annotation_total: u64,
    field_adjustment: u64,
    method_adjustment: u64,
}

impl<'a> Parser<'a> {
    fn new(data: &'a [u8]) -> Result<Self, Error> {
        if slice_at(data, 0, 8)? != DEX_MAGIC {
            return Err(Error::NotDex);
        }
        if u32_at(data, 36)? != HEADER_SIZE || u32_at(data, 40)? != ENDIAN_TAG {
            return Err(Error::NotDex);
        }
        Ok(Self {
            data,
            link_size: u32_at(data, 44)?,
            map_off: u32_at(data, 52)?,
            string_ids_size: u32_at(data, 56)?,
            string_ids_off: u32_at(data, 60)?,
            class_defs_size: u32_at(data, 96)?,
            class_defs_off: u32_at(data, 100)?,
            data_size: u64::from(u32_at(data, 104)?),
            sizes: SizeMap::new(),
            type_list_offs: HashSet::new(),
            type_list_total: 0,
            annotation_offs: HashSet::new(),
            annotation_total: 0,
            field_adjustment: 0,
            method_adjustment: 0,
        })
    }

    fn run(mut self) -> Result<SizeMap, Error> {
        if self.map_off != 0 {
            self.walk_map()?;
        }
        for index in 0..self.class_defs_size as usize {
            self.walk_class(self.class_defs_off as usize + index * 0x20)?;
        }

        if let Some(bucket) = self.sizes.get_mut(".field") {
            *bucket = bucket
                .checked_sub(self.field_adjustment)
                .ok_or(Error::CorruptDex)?;
        }
        if let Some(bucket) = self.sizes.get_mut(".method") {
            *bucket = bucket
                .checked_sub(self.method_adjustment)
                .ok_or(Error::CorruptDex)?;
        }
        self.sizes.insert(".annotation".into(), self.annotation_total);
        self.sizes.insert(".typelist".into(), self.type_list_total);
        self.sizes.insert(".data".into(), self.data_size);
        self.sizes.insert(".link".into(), u64::from(self.link_size));
        Ok(self.sizes)
    }

    fn walk_map(&mut self) -> Result<(), Error> {
        let map_size = u32_at(self.data, self.map_off as usize)?;
        let base = self.map_off as usize + 4;

        for index in 0..map_size as usize {
            let entry = base + index * 12;
            let item_type = u16_at(self.data, entry)?;
            let item_count = u32_at(self.data, entry + 4)?;
            let item_off = u32_at(self.data, entry + 8)?;

            match item_type {
                // String ids: 4 bytes of table entry plus the string data
                // item, which leaves the data section.
                0x0001 => {
                    let mut size = 0u64;
                    for id in 0..item_count {
                        let string = self.string_at(id, item_off)?;
                        let string_size = string.len() as u64 + 1;
                        size += 4 + string_size;
                        self.charge_data(string_size)?;
                    }
                    self.add_bucket(".string", size);
                }
                0x0002 => self.add_bucket(".type", u64::from(item_count) * 4),
                // Proto ids carry a parameter type list in the data section.
                0x0003 => {
                    for proto in 0..item_count as usize {
                        let params_off = u32_at(self.data, item_off as usize + proto * 12 + 8)?;
                        if params_off != 0 {
                            let size = self.type_list_size(params_off)?;
                            self.type_list_total += size;
                            self.charge_data(size)?;
                        }
                    }
                    self.add_bucket(".proto", u64::from(item_count) * 12);
                }
                0x0004 => self.add_bucket(".field", u64::from(item_count) * 8),
                0x0005 => self.add_bucket(".method", u64::from(item_count) * 8),
                0x0006 => self.add_bucket(".class", u64::from(item_count) * 0x20),
                _ => {}
            }
        }

        self.sizes
            .insert(".map".into(), 4 + u64::from(map_size) * 12);
        Ok(())
    }

    fn walk_class(&mut self, class_off: usize) -> Result<(), Error> {
        let interfaces_off = u32_at(self.data, class_off + 12)?;
        let source_file_idx = u32_at(self.data, class_off + 16)?;
        let annotations_off = u32_at(self.data, class_off + 20)?;
        let class_data_off = u32_at(self.data, class_off + 24)?;
        let static_values_off = u32_at(self.data, class_off + 28)?;

        let mut class_size = 0x20u64;

        if interfaces_off != 0 {
            let size = self.type_list_size(interfaces_off)?;
            self.type_list_total += size;
            self.charge_data(size)?;
        }
        if annotations_off != 0 {
            self.annotations_directory(annotations_off)?;
        }
        if class_data_off != 0 {
            class_size += self.class_data(class_data_off, static_values_off)?;
        }

        let bucket = if source_file_idx == NO_INDEX {
            ".class".to_string()
        } else {
            let name = self.string_at(source_file_idx, self.string_ids_off)?;
            String::from_utf8_lossy(strip_mutf8_prefix(name)).into_owned()
        };
        self.add_bucket(&bucket, class_size);
        Ok(())
    }

    /// Size the class-data item, its code items, debug streams and static
    /// values; returns the bytes attributed to the owning class.
    fn class_data(&mut self, class_data_off: u32, static_values_off: u32) -> Result<u64, Error> {
        let start = class_data_off as usize;
        let mut off = start;
        let static_fields = uleb(self.data, &mut off)?;
        let instance_fields = uleb(self.data, &mut off)?;
        let direct_methods = uleb(self.data, &mut off)?;
        let virtual_methods = uleb(self.data, &mut off)?;

        let mut size = 0u64;
        for _ in 0..static_fields + instance_fields {
            uleb(self.data, &mut off)?; // field_idx_diff
            uleb(self.data, &mut off)?; // access_flags
        }
        for _ in 0..direct_methods + virtual_methods {
            uleb(self.data, &mut off)?; // method_idx_diff
            uleb(self.data, &mut off)?; // access_flags
            let code_off = uleb(self.data, &mut off)?;
            if code_off == 0 {
                continue;
            }
            let (code_size, debug_off) = self.code_item(code_off as usize)?;
            size += code_size;
            self.charge_data(code_size)?;

            if debug_off != 0 {
                let debug_size = debug_info_size(self.data, debug_off as usize)?;
                size += debug_size;
                self.charge_data(debug_size)?;
            }
        }

        if static_values_off != 0 {
            let mut values_off = static_values_off as usize;
            encoded_array(self.data, &mut values_off)?;
            let values_size = (values_off - static_values_off as usize) as u64;
            size += values_size;
            self.charge_data(values_size)?;
        }

        // Field and method id slots are attributed to the class here; the
        // same bytes are deducted from .field/.method once all classes are
        // walked, to avoid counting them twice.
        self.field_adjustment += (static_fields + instance_fields) * 8;
        size += (static_fields + instance_fields) * 8;
        self.method_adjustment += (direct_methods + virtual_methods) * 8;
        size += (direct_methods + virtual_methods) * 8;

        let item_size = (off - start) as u64;
        size += item_size;
        self.charge_data(item_size)?;
        Ok(size)
    }

    /// Walk a code item; returns its total size and the debug-info offset.
    fn code_item(&self, code_off: usize) -> Result<(u64, u32), Error> {
        let tries = u16_at(self.data, code_off + 6)? as usize;
        let debug_off = u32_at(self.data, code_off + 8)?;
        let insns = u32_at(self.data, code_off + 12)? as usize;

        let padding = if tries != 0 { insns & 1 } else { 0 };
        let mut off = code_off + 16 + tries * 8 + (insns + padding) * 2;

        if tries != 0 {
            let handler_lists = uleb(self.data, &mut off)?;
            for _ in 0..handler_lists {
                let handlers = sleb(self.data, &mut off)?;
                for _ in 0..handlers.unsigned_abs() {
                    uleb(self.data, &mut off)?; // type index
                    uleb(self.data, &mut off)?; // handler address
                }
                if handlers <= 0 {
                    uleb(self.data, &mut off)?; // catch-all address
                }
            }
        }
        Ok(((off - code_off) as u64, debug_off))
    }

    fn annotations_directory(&mut self, directory_off: u32) -> Result<(), Error> {
        let start = directory_off as usize;
        let class_set_off = u32_at(self.data, start)?;
        let field_count = u32_at(self.data, start + 4)? as usize;
        let method_count = u32_at(self.data, start + 8)? as usize;
        let parameter_count = u32_at(self.data, start + 12)? as usize;

        let mut size = 16 + (field_count + method_count + parameter_count) as u64 * 8;
        let mut entry = start + 16;
        for _ in 0..field_count {
            let set_off = u32_at(self.data, entry + 4)?;
            entry += 8;
            size += self.annotation_set_size(set_off)?;
        }
        for _ in 0..method_count {
            let set_off = u32_at(self.data, entry + 4)?;
            entry += 8;
            size += self.annotation_set_size(set_off)?;
        }
        for _ in 0..parameter_count {
            let ref_list_off = u32_at(self.data, entry + 4)?;
            entry += 8;
            size += self.annotation_ref_list_size(ref_list_off)?;
        }
        if class_set_off != 0 {
            size += self.annotation_set_size(class_set_off)?;
        }

        self.annotation_total += size;
        self.charge_data(size)?;
        Ok(())
    }

    fn annotation_set_size(&mut self, set_off: u32) -> Result<u64, Error> {
        if !self.annotation_offs.insert(set_off) {
            return Ok(0);
        }
        let count = u32_at(self.data, set_off as usize)? as usize;
        let mut size = 4 + count as u64 * 4;
        for index in 0..count {
            let item_off = u32_at(self.data, set_off as usize + 4 + index * 4)?;
            size += self.annotation_item_size(item_off)?;
        }
        Ok(size)
    }

    fn annotation_item_size(&mut self, item_off: u32) -> Result<u64, Error> {
        if !self.annotation_offs.insert(item_off) {
            return Ok(0);
        }
        // One visibility byte, then the encoded annotation.
        let mut off = item_off as usize + 1;
        encoded_annotation(self.data, &mut off)?;
        Ok((off - item_off as usize) as u64)
    }

    fn annotation_ref_list_size(&mut self, list_off: u32) -> Result<u64, Error> {
        if !self.annotation_offs.insert(list_off) {
            return Ok(0);
        }
        let count = u32_at(self.data, list_off as usize)? as usize;
        let mut size = 4 + count as u64 * 4;
        for index in 0..count {
            let set_off = u32_at(self.data, list_off as usize + 4 + index * 4)?;
            size += self.annotation_set_size(set_off)?;
        }
        Ok(size)
    }

    /// Type lists are shared between protos and class interfaces; each
    /// distinct offset is sized once.
    fn type_list_size(&mut self, list_off: u32) -> Result<u64, Error> {
        if !self.type_list_offs.insert(list_off) {
            return Ok(0);
        }
        let count = u32_at(self.data, list_off as usize)?;
        Ok(4 + 2 * u64::from(count))
    }

    /// String data item bytes for string id `id` of the table at `table_off`,
    /// from the length prefix up to (not including) the terminating NUL.
    fn string_at(&self, id: u32, table_off: u32) -> Result<&'a [u8], Error> {
        if id >= self.string_ids_size {
            return Err(Error::CorruptDex);
        }
        let string_off = u32_at(self.data, table_off as usize + id as usize * 4)? as usize;
        let tail = self.data.get(string_off..).ok_or(Error::UnexpectedEnd)?;
        let len = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::CorruptDex)?;
        Ok(&tail[..len])
    }

    fn add_bucket(&mut self, name: &str, size: u64) {
        *self.sizes.entry(name.to_string()).or_insert(0) += size;
    }

    fn charge_data(&mut self, size: u64) -> Result<(), Error> {
        self.data_size = self.data_size.checked_sub(size).ok_or(Error::CorruptDex)?;
        Ok(())
    }
}

fn byte_at(data: &[u8], off: usize) -> Result<u8, Error> {
    data.get(off).copied().ok_or(Error::UnexpectedEnd)
}

fn uleb(data: &[u8], off: &mut usize) -> Result<u64, Error> {
    let mut value = 0u64;
    for shift in (0..32).step_by(7) {
        let byte = byte_at(data, *off)?;
        *off += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
    }
    Ok(value)
}

fn sleb(data: &[u8], off: &mut usize) -> Result<i64, Error> {
    let mut value = 0i64;
    for shift in (0..32).step_by(7) {
        let byte = byte_at(data, *off)?;
        *off += 1;
        value |= i64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            if byte & 0x40 != 0 {
                value |= -1i64 << (shift + 7);
            }
            break;
        }
    }
    Ok(value)
}

/// Skip one encoded value; the value-type byte governs the payload length.
fn encoded_value(data: &[u8], off: &mut usize) -> Result<(), Error> {
    let value_type = byte_at(data, *off)?;
    *off += 1;
    match value_type {
        0x1c => encoded_array(data, off),
        0x1d => encoded_annotation(data, off),
        0x1e | 0x1f => Ok(()),
        other => {
            *off += (other >> 5) as usize + 1;
            Ok(())
        }
    }
}

fn encoded_array(data: &[u8], off: &mut usize) -> Result<(), Error> {
    let count = uleb(data, off)?;
    for _ in 0..count {
        encoded_value(data, off)?;
    }
    Ok(())
}

fn encoded_annotation(data: &[u8], off: &mut usize) -> Result<(), Error> {
    uleb(data, off)?; // type index
    let count = uleb(data, off)?;
    for _ in 0..count {
        uleb(data, off)?; // name index
        encoded_value(data, off)?;
    }
    Ok(())
}

/// Walk a debug-info stream up to and including its terminating opcode.
fn debug_info_size(data: &[u8], debug_off: usize) -> Result<u64, Error> {
    let start = debug_off;
    let mut off = debug_off;
    uleb(data, &mut off)?; // line_start
    let parameters = uleb(data, &mut off)?;
    for _ in 0..parameters {
        uleb(data, &mut off)?; // parameter name index
    }

    loop {
        let opcode = byte_at(data, off)?;
        off += 1;
        if opcode == 0 {
            break;
        }
        let mut arguments = match opcode {
            0x01 | 0x02 | 0x05 | 0x06 | 0x09 => 1,
            0x03 => 3,
            0x04 => 4,
            _ => 0,
        };
        while arguments > 0 {
            if byte_at(data, off)? & 0x80 == 0 {
                arguments -= 1;
            }
            off += 1;
        }
    }
    Ok((off - start) as u64)
}

/// Drop the length prefix of a string data item: prefix bytes have the high
/// bit set, the first byte without it ends the prefix.
fn strip_mutf8_prefix(string: &[u8]) -> &[u8] {
    let mut prefix_end = 0;
    for (index, byte) in string.iter().enumerate() {
        prefix_end = index;
        if byte & 0x80 == 0 {
            break;
        }
    }
    &string[(prefix_end + 1).min(string.len())..]
}
