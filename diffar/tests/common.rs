#![allow(dead_code)]

use bytes::Bytes;
use diffar::BcjFilter;
use flate2::{Compress, Compression, FlushCompress, Status};

pub fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn push_uleb(out: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Assemble a stored-only zip archive.
pub fn zip_archive(entries: &[(&str, &[u8])]) -> Bytes {
    let mut out = Vec::new();
    let mut locals = Vec::new();
    for &(name, payload) in entries {
        locals.push(out.len() as u32);
        push_u32(&mut out, 0x0403_4b50);
        push_u16(&mut out, 20); // version needed
        push_u16(&mut out, 0); // flags
        push_u16(&mut out, 0); // stored
        push_u32(&mut out, 0); // time and date
        push_u32(&mut out, 0); // crc
        push_u32(&mut out, payload.len() as u32);
        push_u32(&mut out, payload.len() as u32);
        push_u16(&mut out, name.len() as u16);
        push_u16(&mut out, 0); // extra
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(payload);
    }
    let directory_offset = out.len() as u32;
    for (&(name, payload), &local) in entries.iter().zip(&locals) {
        push_u32(&mut out, 0x0201_4b50);
        push_u16(&mut out, 20); // version made by
        push_u16(&mut out, 20); // version needed
        push_u16(&mut out, 0); // flags
        push_u16(&mut out, 0); // stored
        push_u32(&mut out, 0); // time and date
        push_u32(&mut out, 0); // crc
        push_u32(&mut out, payload.len() as u32);
        push_u32(&mut out, payload.len() as u32);
        push_u16(&mut out, name.len() as u16);
        push_u16(&mut out, 0); // extra
        push_u16(&mut out, 0); // comment
        push_u16(&mut out, 0); // disk
        push_u16(&mut out, 0); // internal attributes
        push_u32(&mut out, 0); // external attributes
        push_u32(&mut out, local);
        out.extend_from_slice(name.as_bytes());
    }
    let directory_size = out.len() as u32 - directory_offset;
    push_u32(&mut out, 0x0605_4b50);
    push_u16(&mut out, 0);
    push_u16(&mut out, 0);
    push_u16(&mut out, entries.len() as u16);
    push_u16(&mut out, entries.len() as u16);
    push_u32(&mut out, directory_size);
    push_u32(&mut out, directory_offset);
    push_u16(&mut out, 0);
    Bytes::from(out)
}

/// Zip archive whose entries only need a name and a size.
pub fn zip_with_sizes(entries: &[(&str, usize)]) -> Bytes {
    let payloads: Vec<(&str, Vec<u8>)> = entries
        .iter()
        .map(|&(name, size)| (name, vec![0x55u8; size]))
        .collect();
    let borrowed: Vec<(&str, &[u8])> = payloads
        .iter()
        .map(|(name, payload)| (*name, payload.as_slice()))
        .collect();
    zip_archive(&borrowed)
}

/// Pack `payload` into an szip stream: forward-filter, split into chunks and
/// deflate each one independently with a fresh state and the preset
/// dictionary.
pub fn szip_archive(payload: &[u8], chunk_size: usize, dictionary: &[u8], filter_id: u8) -> Bytes {
    assert!(!payload.is_empty());
    let filter = BcjFilter::from_id(filter_id).unwrap();
    let mut filtered = payload.to_vec();
    filter.filter(&mut filtered, 0, chunk_size);

    let blocks: Vec<Vec<u8>> = filtered.chunks(chunk_size).map(|chunk| deflate_raw(chunk, dictionary)).collect();
    let n_chunks = blocks.len();
    let last_chunk_size = filtered.len() - (n_chunks - 1) * chunk_size;

    let mut out = Vec::new();
    push_u32(&mut out, diffar::SZIP_MAGIC);
    push_u32(&mut out, 0); // total compressed size, informational
    push_u16(&mut out, chunk_size as u16);
    push_u16(&mut out, dictionary.len() as u16);
    push_u32(&mut out, n_chunks as u32);
    push_u16(&mut out, last_chunk_size as u16);
    out.push(-15i8 as u8); // raw deflate
    out.push(filter_id);
    out.extend_from_slice(dictionary);

    let mut offset = (out.len() + n_chunks * 4) as u32;
    for block in &blocks {
        push_u32(&mut out, offset);
        offset += block.len() as u32;
    }
    for block in &blocks {
        out.extend_from_slice(block);
    }
    Bytes::from(out)
}

fn deflate_raw(input: &[u8], dictionary: &[u8]) -> Vec<u8> {
    let mut deflater = Compress::new(Compression::default(), false);
    if !dictionary.is_empty() {
        deflater.set_dictionary(dictionary).unwrap();
    }
    let mut out = Vec::with_capacity(input.len() + 64);
    loop {
        let before_in = deflater.total_in() as usize;
        let status = deflater
            .compress_vec(&input[before_in..], &mut out, FlushCompress::Finish)
            .unwrap();
        match status {
            Status::StreamEnd => return out,
            Status::Ok | Status::BufError => out.reserve(1024),
        }
    }
}

/// 32-bit little-endian ELF image: header, section headers and a string
/// table. Declared section sizes need no backing bytes.
pub fn elf_image(sections: &[(&str, u32)]) -> Vec<u8> {
    let mut strings = vec![0u8];
    let mut name_offsets = Vec::new();
    for (name, _) in sections {
        name_offsets.push(strings.len() as u32);
        strings.extend_from_slice(name.as_bytes());
        strings.push(0);
    }
    let strings_name = strings.len() as u32;
    strings.extend_from_slice(b".shstrtab\0");

    let entry_count = sections.len() + 2; // null section + .shstrtab
    let strings_offset = 52 + entry_count as u32 * 40;

    let mut out = Vec::new();
    push_u32(&mut out, 0x464c_457f);
    out.push(1); // 32-bit
    out.push(1); // little-endian
    out.resize(32, 0);
    push_u32(&mut out, 52); // e_shoff
    out.resize(46, 0);
    push_u16(&mut out, 40); // e_shentsize
    push_u16(&mut out, entry_count as u16);
    push_u16(&mut out, entry_count as u16 - 1); // e_shstrndx

    let mut push_section = |out: &mut Vec<u8>, name: u32, offset: u32, size: u32| {
        push_u32(out, name);
        out.extend_from_slice(&[0u8; 12]);
        push_u32(out, offset);
        push_u32(out, size);
        out.extend_from_slice(&[0u8; 16]);
    };
    push_section(&mut out, 0, 0, 0);
    for ((_, size), name_offset) in sections.iter().zip(&name_offsets) {
        push_section(&mut out, *name_offset, 0, *size);
    }
    push_section(&mut out, strings_name, strings_offset, strings.len() as u32);
    out.extend_from_slice(&strings);
    out
}

pub const NO_INDEX: u32 = 0xffff_ffff;

#[derive(Default, Clone)]
pub struct ClassData {
    pub static_fields: u64,
    pub instance_fields: u64,
    pub coded_methods: u64,
    pub with_debug: bool,
    pub with_static_values: bool,
}

#[derive(Default, Clone)]
pub struct ClassSpec {
    /// String index of the declared source file, `None` for no declared one.
    pub source_file: Option<usize>,
    /// Type-list index for the interfaces list.
    pub interfaces: Option<usize>,
    /// Attach a minimal annotations directory (one class annotation).
    pub annotated: bool,
    pub class_data: Option<ClassData>,
}

/// Synthetic dex assembler. Tables are filled with zeros where the size
/// accounting never reads them (descriptors, shorties, field and method ids).
#[derive(Default)]
pub struct DexBuilder {
    strings: Vec<Vec<u8>>,
    type_count: u32,
    type_lists: Vec<u16>,
    protos: Vec<Option<usize>>,
    field_count: u32,
    method_count: u32,
    classes: Vec<ClassSpec>,
}

/// Assembled dex plus the facts a test needs to predict bucket values
/// without re-deriving the layout.
pub struct DexFixture {
    pub bytes: Vec<u8>,
    /// Per-class payload beyond the 0x20 class def (code, debug, static
    /// values, class-data item and id slots).
    pub class_payloads: Vec<u64>,
    /// Expected `.data` remainder.
    pub data_remainder: u64,
    /// Number of map-list entries.
    pub map_entries: u64,
}

impl DexBuilder {
    pub fn string(mut self, content: &str) -> Self {
        self.strings.push(content.as_bytes().to_vec());
        self
    }

    pub fn types(mut self, count: u32) -> Self {
        self.type_count = count;
        self
    }

    pub fn type_list(mut self, entries: u16) -> Self {
        self.type_lists.push(entries);
        self
    }

    pub fn proto(mut self, params: Option<usize>) -> Self {
        self.protos.push(params);
        self
    }

    pub fn field_ids(mut self, count: u32) -> Self {
        self.field_count = count;
        self
    }

    pub fn method_ids(mut self, count: u32) -> Self {
        self.method_count = count;
        self
    }

    pub fn class(mut self, spec: ClassSpec) -> Self {
        self.classes.push(spec);
        self
    }

    pub fn build(self) -> DexFixture {
        let string_ids_off = 0x70u32;
        let type_ids_off = string_ids_off + self.strings.len() as u32 * 4;
        let proto_ids_off = type_ids_off + self.type_count * 4;
        let field_ids_off = proto_ids_off + self.protos.len() as u32 * 12;
        let method_ids_off = field_ids_off + self.field_count * 8;
        let class_defs_off = method_ids_off + self.method_count * 8;
        let data_off = class_defs_off + self.classes.len() as u32 * 0x20;

        let mut data = Vec::new();
        // Bytes the parser deducts from the data section as it attributes
        // them elsewhere.
        let mut charged = 0u64;

        let mut string_offs = Vec::new();
        for content in &self.strings {
            assert!(content.len() < 0x80);
            string_offs.push(data_off + data.len() as u32);
            data.push(content.len() as u8);
            data.extend_from_slice(content);
            data.push(0);
            charged += content.len() as u64 + 2;
        }

        let mut type_list_offs = Vec::new();
        for &entries in &self.type_lists {
            type_list_offs.push(data_off + data.len() as u32);
            push_u32(&mut data, u32::from(entries));
            data.extend(std::iter::repeat(0u8).take(usize::from(entries) * 2));
            charged += 4 + u64::from(entries) * 2;
        }

        let mut annotation_offs = Vec::new();
        for class in &self.classes {
            if !class.annotated {
                annotation_offs.push(0);
                continue;
            }
            let item_off = data_off + data.len() as u32;
            data.push(0); // visibility
            push_uleb(&mut data, 0); // type index
            push_uleb(&mut data, 0); // element count
            let set_off = data_off + data.len() as u32;
            push_u32(&mut data, 1);
            push_u32(&mut data, item_off);
            let directory_off = data_off + data.len() as u32;
            push_u32(&mut data, set_off);
            push_u32(&mut data, 0);
            push_u32(&mut data, 0);
            push_u32(&mut data, 0);
            annotation_offs.push(directory_off);
            charged += 3 + 8 + 16;
        }

        let mut class_payloads = Vec::new();
        let mut class_data_offs = Vec::new();
        let mut static_values_offs = Vec::new();
        for class in &self.classes {
            let Some(class_data) = &class.class_data else {
                class_payloads.push(0);
                class_data_offs.push(0);
                static_values_offs.push(0);
                continue;
            };
            let mut payload = 0u64;

            let mut code_offs = Vec::new();
            for _ in 0..class_data.coded_methods {
                let debug_off = if class_data.with_debug {
                    let off = data_off + data.len() as u32;
                    // line_start, no parameters, DBG_ADVANCE_PC + operand, end.
                    data.extend_from_slice(&[0x01, 0x00, 0x01, 0x05, 0x00]);
                    payload += 5;
                    charged += 5;
                    off
                } else {
                    0
                };
                code_offs.push(data_off + data.len() as u32);
                push_u16(&mut data, 1); // registers
                push_u16(&mut data, 0); // ins
                push_u16(&mut data, 0); // outs
                push_u16(&mut data, 0); // tries
                push_u32(&mut data, debug_off);
                push_u32(&mut data, 1); // insns count (16-bit units)
                push_u16(&mut data, 0); // nop
                payload += 18;
                charged += 18;
            }

            let class_data_off = data_off + data.len() as u32;
            let before = data.len();
            push_uleb(&mut data, class_data.static_fields);
            push_uleb(&mut data, class_data.instance_fields);
            push_uleb(&mut data, class_data.coded_methods);
            push_uleb(&mut data, 0); // virtual methods
            for _ in 0..class_data.static_fields + class_data.instance_fields {
                push_uleb(&mut data, 0); // field_idx_diff
                push_uleb(&mut data, 1); // access_flags
            }
            for code_off in &code_offs {
                push_uleb(&mut data, 0); // method_idx_diff
                push_uleb(&mut data, 1); // access_flags
                push_uleb(&mut data, u64::from(*code_off));
            }
            let item_size = (data.len() - before) as u64;
            payload += item_size;
            charged += item_size;

            let static_values_off = if class_data.with_static_values {
                let off = data_off + data.len() as u32;
                // One-element array holding a byte value.
                data.extend_from_slice(&[0x01, 0x00, 0x42]);
                payload += 3;
                charged += 3;
                off
            } else {
                0
            };

            let slots = (class_data.static_fields + class_data.instance_fields) * 8
                + class_data.coded_methods * 8;
            payload += slots;

            class_payloads.push(payload);
            class_data_offs.push(class_data_off);
            static_values_offs.push(static_values_off);
        }

        let mut map_items: Vec<(u16, u32, u32)> = vec![(0x0000, 1, 0)];
        if !self.strings.is_empty() {
            map_items.push((0x0001, self.strings.len() as u32, string_ids_off));
        }
        if self.type_count != 0 {
            map_items.push((0x0002, self.type_count, type_ids_off));
        }
        if !self.protos.is_empty() {
            map_items.push((0x0003, self.protos.len() as u32, proto_ids_off));
        }
        if self.field_count != 0 {
            map_items.push((0x0004, self.field_count, field_ids_off));
        }
        if self.method_count != 0 {
            map_items.push((0x0005, self.method_count, method_ids_off));
        }
        if !self.classes.is_empty() {
            map_items.push((0x0006, self.classes.len() as u32, class_defs_off));
        }
        let map_off = data_off + data.len() as u32;
        push_u32(&mut data, map_items.len() as u32);
        for (item_type, count, offset) in &map_items {
            push_u16(&mut data, *item_type);
            push_u16(&mut data, 0);
            push_u32(&mut data, *count);
            push_u32(&mut data, *offset);
        }

        // Interface lists are charged per class, but shared offsets only
        // count once.
        let mut seen_lists: Vec<u32> = self
            .protos
            .iter()
            .flatten()
            .map(|&list| type_list_offs[list])
            .collect();
        for class in &self.classes {
            if let Some(list) = class.interfaces {
                let off = type_list_offs[list];
                if !seen_lists.contains(&off) {
                    seen_lists.push(off);
                }
            }
        }
        let mut uncharged_lists = 0u64;
        for (index, &off) in type_list_offs.iter().enumerate() {
            if !seen_lists.contains(&off) {
                uncharged_lists += 4 + u64::from(self.type_lists[index]) * 2;
            }
        }

        let data_size = data.len() as u64;
        let data_remainder = data_size - charged + uncharged_lists;

        let file_size = data_off as usize + data.len();
        let mut bytes = Vec::with_capacity(file_size);
        bytes.extend_from_slice(b"dex\n035\0");
        bytes.resize(32, 0); // checksum and signature
        push_u32(&mut bytes, file_size as u32);
        push_u32(&mut bytes, 0x70); // header size
        push_u32(&mut bytes, 0x1234_5678); // endian tag
        push_u32(&mut bytes, 0); // link size
        push_u32(&mut bytes, 0); // link offset
        push_u32(&mut bytes, map_off);
        push_u32(&mut bytes, self.strings.len() as u32);
        push_u32(&mut bytes, string_ids_off);
        push_u32(&mut bytes, self.type_count);
        push_u32(&mut bytes, type_ids_off);
        push_u32(&mut bytes, self.protos.len() as u32);
        push_u32(&mut bytes, proto_ids_off);
        push_u32(&mut bytes, self.field_count);
        push_u32(&mut bytes, field_ids_off);
        push_u32(&mut bytes, self.method_count);
        push_u32(&mut bytes, method_ids_off);
        push_u32(&mut bytes, self.classes.len() as u32);
        push_u32(&mut bytes, class_defs_off);
        push_u32(&mut bytes, data_size as u32);
        push_u32(&mut bytes, data_off);
        assert_eq!(bytes.len(), 0x70);

        for off in &string_offs {
            push_u32(&mut bytes, *off);
        }
        bytes.extend(std::iter::repeat(0u8).take(self.type_count as usize * 4));
        for params in &self.protos {
            push_u32(&mut bytes, 0); // shorty index
            push_u32(&mut bytes, 0); // return type index
            push_u32(&mut bytes, params.map_or(0, |list| type_list_offs[list]));
        }
        bytes.extend(std::iter::repeat(0u8).take(self.field_count as usize * 8));
        bytes.extend(std::iter::repeat(0u8).take(self.method_count as usize * 8));
        for (index, class) in self.classes.iter().enumerate() {
            push_u32(&mut bytes, 0); // class type index
            push_u32(&mut bytes, 0); // access flags
            push_u32(&mut bytes, NO_INDEX); // superclass
            push_u32(
                &mut bytes,
                class.interfaces.map_or(0, |list| type_list_offs[list]),
            );
            push_u32(
                &mut bytes,
                class.source_file.map_or(NO_INDEX, |s| s as u32),
            );
            push_u32(&mut bytes, annotation_offs[index]);
            push_u32(&mut bytes, class_data_offs[index]);
            push_u32(&mut bytes, static_values_offs[index]);
        }
        bytes.extend_from_slice(&data);
        assert_eq!(bytes.len(), file_size);

        DexFixture {
            bytes,
            class_payloads,
            data_remainder,
            map_entries: map_items.len() as u64,
        }
    }
}
