//! Recursive archive differ.
//!
//! Two archives are walked in parallel: entries of the new side in declared
//! order first (pairing off the old side by name), then entries only present
//! in the old side. Per entry, the file-name extension selects a handler —
//! nested archives recurse, dex files are compared bucket by bucket, and
//! caller-registered handlers (such as [`crate::SoHandler`]) slot into the
//! same mechanism. Entries without a handler fall back to a plain stored-size
//! comparison. Deltas are pulled lazily through an iterator; nothing is
//! collected up front.

use std::collections::btree_map;
use std::collections::HashMap;

use bytes::Bytes;

use crate::delta::{Delta, SizeMap};
use crate::dex;
use crate::error::Error;
use crate::zip::ZipArchive;

/// Lazily produced stream of size deltas.
pub type DeltaIter<'a> = Box<dyn Iterator<Item = Result<Delta, Error>> + 'a>;

/// A per-extension diff strategy.
///
/// `a` and `b` hold the entry payload on each side, or `None` where the entry
/// is absent (or empty) on that side. Yielded deltas carry fully qualified
/// paths; `path` already includes any enclosing archive segments.
pub trait Handler {
    fn diff<'a>(
        &'a self,
        differ: &'a Differ,
        path: String,
        a: Option<Bytes>,
        b: Option<Bytes>,
    ) -> Result<DeltaIter<'a>, Error>;
}

/// Archive differ with an extension-keyed handler registry.
pub struct Differ {
    handlers: HashMap<String, Box<dyn Handler>>,
}

impl Default for Differ {
    fn default() -> Self {
        Self::new()
    }
}

impl Differ {
    pub fn new() -> Self {
        let mut handlers: HashMap<String, Box<dyn Handler>> = HashMap::new();
        for ext in ["zip", "apk", "jar", "ja"] {
            handlers.insert(ext.to_string(), Box::new(NestedArchiveHandler));
        }
        handlers.insert("dex".to_string(), Box::new(DexHandler));
        Self { handlers }
    }

    /// Register `handler` for names ending in `.ext`, replacing any previous
    /// registration. Extensions are extracted lowercased, so `ext` should be
    /// a lowercase key.
    pub fn register_handler(&mut self, ext: &str, handler: Box<dyn Handler>) {
        self.handlers.insert(ext.to_string(), handler);
    }

    pub fn handler(&self, ext: &str) -> Option<&dyn Handler> {
        self.handlers.get(ext).map(|h| h.as_ref())
    }

    /// Diff two top-level archives.
    pub fn diff(&self, a: Bytes, b: Bytes) -> Result<DeltaIter<'_>, Error> {
        let a = ZipArchive::parse(a)?;
        let b = ZipArchive::parse(b)?;
        Ok(Box::new(ArchiveDiff::new(
            self,
            Some(a),
            Some(b),
            String::new(),
        )))
    }
}

enum Step<'a> {
    Delta(Delta),
    Sub(DeltaIter<'a>),
}

/// Extension after the final `.`, lowercased; the whole name when there is
/// no dot.
fn extension_of(name: &str) -> String {
    let ext = match name.rfind('.') {
        Some(dot) => &name[dot + 1..],
        None => name,
    };
    ext.to_ascii_lowercase()
}

struct ArchiveDiff<'a> {
    differ: &'a Differ,
    a: Option<ZipArchive>,
    b: Option<ZipArchive>,
    prefix: String,
    /// Old-side entries already paired with a new-side entry.
    matched: Vec<bool>,
    a_index: usize,
    b_index: usize,
    sub: Option<DeltaIter<'a>>,
}

impl<'a> ArchiveDiff<'a> {
    fn new(differ: &'a Differ, a: Option<ZipArchive>, b: Option<ZipArchive>, prefix: String) -> Self {
        let matched = vec![false; a.as_ref().map_or(0, |a| a.entries().len())];
        Self {
            differ,
            a,
            b,
            prefix,
            matched,
            a_index: 0,
            b_index: 0,
            sub: None,
        }
    }

    /// Pop the old-side entry named `name`, if it has not been paired yet.
    fn take_a_size(&mut self, name: &str) -> u64 {
        let Some(a) = &self.a else { return 0 };
        match a.index_of(name) {
            Some(index) if !self.matched[index] => {
                self.matched[index] = true;
                a.entries()[index].uncompressed_size
            }
            _ => 0,
        }
    }

    fn file_step(&self, name: &str, a_size: u64, b_size: u64) -> Result<Option<Step<'a>>, Error> {
        let differ = self.differ;
        let ext = extension_of(name);
        if let Some(handler) = differ.handler(&ext) {
            if a_size != 0 || b_size != 0 {
                let a_payload = match (&self.a, a_size) {
                    (Some(a), 1..) => Some(a.open_by_name(name)?),
                    _ => None,
                };
                let b_payload = match (&self.b, b_size) {
                    (Some(b), 1..) => Some(b.open_by_name(name)?),
                    _ => None,
                };
                let path = format!("{}{}", self.prefix, name);
                return Ok(Some(Step::Sub(handler.diff(
                    differ, path, a_payload, b_payload,
                )?)));
            }
        }
        if a_size != b_size {
            let path = format!("{}{}", self.prefix, name);
            return Ok(Some(Step::Delta(Delta::new(path, a_size, b_size))));
        }
        Ok(None)
    }
}

impl<'a> Iterator for ArchiveDiff<'a> {
    type Item = Result<Delta, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(sub) = &mut self.sub {
                if let Some(item) = sub.next() {
                    return Some(item);
                }
                self.sub = None;
            }

            // New side, in its declared order.
            let next_b = self.b.as_ref().and_then(|b| {
                b.entries()
                    .get(self.b_index)
                    .map(|e| (e.name.clone(), e.uncompressed_size))
            });
            if let Some((name, b_size)) = next_b {
                self.b_index += 1;
                let a_size = self.take_a_size(&name);
                match self.file_step(&name, a_size, b_size) {
                    Ok(Some(Step::Delta(delta))) => return Some(Ok(delta)),
                    Ok(Some(Step::Sub(iter))) => self.sub = Some(iter),
                    Ok(None) => {}
                    Err(err) => return Some(Err(err)),
                }
                continue;
            }

            // Leftovers only present in the old side.
            let next_a = self.a.as_ref().and_then(|a| {
                a.entries()
                    .get(self.a_index)
                    .map(|e| (e.name.clone(), e.uncompressed_size))
            });
            if let Some((name, a_size)) = next_a {
                let index = self.a_index;
                self.a_index += 1;
                if self.matched[index] {
                    continue;
                }
                match self.file_step(&name, a_size, 0) {
                    Ok(Some(Step::Delta(delta))) => return Some(Ok(delta)),
                    Ok(Some(Step::Sub(iter))) => self.sub = Some(iter),
                    Ok(None) => {}
                    Err(err) => return Some(Err(err)),
                }
                continue;
            }

            return None;
        }
    }
}

/// Recurses into nested zip-family archives. A single-sided archive turns
/// every contained entry into an add-only or delete-only record.
pub struct NestedArchiveHandler;

impl Handler for NestedArchiveHandler {
    fn diff<'a>(
        &'a self,
        differ: &'a Differ,
        path: String,
        a: Option<Bytes>,
        b: Option<Bytes>,
    ) -> Result<DeltaIter<'a>, Error> {
        let a = a.map(ZipArchive::parse).transpose()?;
        let b = b.map(ZipArchive::parse).transpose()?;
        Ok(Box::new(ArchiveDiff::new(
            differ,
            a,
            b,
            format!("{}/", path),
        )))
    }
}

/// Compares dex files bucket by bucket.
pub struct DexHandler;

impl Handler for DexHandler {
    fn diff<'a>(
        &'a self,
        _differ: &'a Differ,
        path: String,
        a: Option<Bytes>,
        b: Option<Bytes>,
    ) -> Result<DeltaIter<'a>, Error> {
        let a_map = match &a {
            Some(data) => dex::size_map(data)?,
            None => SizeMap::new(),
        };
        let b_map = match &b {
            Some(data) => dex::size_map(data)?,
            None => SizeMap::new(),
        };
        Ok(Box::new(MapDiff::new(path, a_map, b_map)))
    }
}

/// Diffs two bucket maps: new-side buckets first, then nonzero buckets only
/// present in the old side.
pub(crate) struct MapDiff {
    prefix: String,
    a: SizeMap,
    b: btree_map::IntoIter<String, u64>,
    leftovers: Option<btree_map::IntoIter<String, u64>>,
}

impl MapDiff {
    pub(crate) fn new(path: String, a: SizeMap, b: SizeMap) -> Self {
        Self {
            prefix: format!("{}/", path),
            a,
            b: b.into_iter(),
            leftovers: None,
        }
    }
}

impl Iterator for MapDiff {
    type Item = Result<Delta, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(leftovers) = &mut self.leftovers {
                for (name, a_size) in leftovers.by_ref() {
                    if a_size != 0 {
                        let path = format!("{}{}", self.prefix, name);
                        return Some(Ok(Delta::new(path, a_size, 0)));
                    }
                }
                return None;
            }

            match self.b.next() {
                Some((name, b_size)) => {
                    let a_size = self.a.remove(&name).unwrap_or(0);
                    if a_size != b_size {
                        let path = format!("{}{}", self.prefix, name);
                        return Some(Ok(Delta::new(path, a_size, b_size)));
                    }
                }
                None => {
                    self.leftovers = Some(std::mem::take(&mut self.a).into_iter());
                }
            }
        }
    }
}
