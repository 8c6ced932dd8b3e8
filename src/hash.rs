//! Row identity keys and 64-bit content hashing
//!
//! Every backend feeds its values through [`RowHasher`] and [`build_key`],
//! so two rows with the same logical content produce the same key and hash
//! no matter which adapter loaded them.

use crate::data::{ColumnDescriptor, ColumnType, Row, Value, NULL_VALUE};
use std::collections::HashMap;

/// Separator placed between key column values
pub const KEY_SEPARATOR: char = '\u{1F}';

/// Rendering of a null key value, distinct from the empty string
pub const NULL_KEY_TOKEN: &str = "\u{2400}";

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Streaming FNV-1a accumulator over typed values
#[derive(Debug, Clone)]
pub struct RowHasher {
    state: u64,
}

impl RowHasher {
    pub fn new() -> Self {
        Self {
            state: FNV_OFFSET_BASIS,
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.state ^= u64::from(*byte);
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }

    /// Mix one column value: type tag first, then its canonical text
    pub fn push(&mut self, value: &Value, declared: ColumnType) {
        let value = value.widen(declared);
        self.write(&[value.type_tag()]);
        if let Some(text) = value.canonical_text() {
            self.write(text.as_bytes());
        }
    }

    pub fn finish(&self) -> u64 {
        self.state
    }
}

impl Default for RowHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash all selected columns of a row in the given order
pub fn compute_hash(row: &[Value], ordinals: &[usize], declared: &[ColumnType]) -> u64 {
    let mut hasher = RowHasher::new();
    for (position, &ordinal) in ordinals.iter().enumerate() {
        let value = row.get(ordinal).unwrap_or(&NULL_VALUE);
        let column_type = declared.get(position).copied().unwrap_or(ColumnType::Unknown);
        hasher.push(value, column_type);
    }
    hasher.finish()
}

/// Hash a row aligned to `columns`, using every column in order
pub fn hash_row(row: &[Value], columns: &[ColumnDescriptor]) -> u64 {
    let mut hasher = RowHasher::new();
    for (position, column) in columns.iter().enumerate() {
        hasher.push(row.get(position).unwrap_or(&NULL_VALUE), column.column_type);
    }
    hasher.finish()
}

/// Escape character for key parts; precedes an escaped separator, null
/// token or escape character inside a value
const KEY_ESCAPE: char = '\\';

fn push_key_part(key: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            KEY_ESCAPE => key.push_str("\\\\"),
            KEY_SEPARATOR => key.push_str("\\s"),
            '\u{2400}' => key.push_str("\\n"),
            other => key.push(other),
        }
    }
}

/// Build the identity key of a row from its key columns.
///
/// `columns` is the schema the row is aligned to; each part is widened by
/// its declared type first, so a date and the equal midnight timestamp
/// produce the same key.
pub fn build_key(row: &[Value], key_ordinals: &[usize], columns: &[ColumnDescriptor]) -> String {
    let mut key = String::new();
    for (i, &ordinal) in key_ordinals.iter().enumerate() {
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        let declared = columns.get(ordinal).map(|c| c.column_type).unwrap_or(ColumnType::Unknown);
        let value = row.get(ordinal).unwrap_or(&NULL_VALUE).widen(declared);
        match value.canonical_text() {
            Some(text) => push_key_part(&mut key, &text),
            None => key.push_str(NULL_KEY_TOKEN),
        }
    }
    key
}

/// Key to content hash for one side of a comparison
#[derive(Debug, Clone, Default)]
pub struct KeyHashMap {
    pub hashes: HashMap<String, u64>,
    /// Rows whose key was already present (last loaded row wins)
    pub duplicate_keys: usize,
}

impl KeyHashMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, hash: u64) {
        if self.hashes.insert(key, hash).is_some() {
            self.duplicate_keys += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

/// Resolve the positions of `names` inside `columns`
pub fn ordinals_for(columns: &[ColumnDescriptor], names: &[String]) -> Option<Vec<usize>> {
    names
        .iter()
        .map(|name| crate::data::column_ordinal(columns, name))
        .collect()
}

/// Accumulates key and hash for rows aligned to a comparison schema.
///
/// Backends that stream their native rows build one of these per table and
/// push each row's values in schema order.
#[derive(Debug, Clone)]
pub struct StreamingKeyHasher {
    key_ordinals: Vec<usize>,
    columns: Vec<ColumnDescriptor>,
    map: KeyHashMap,
}

impl StreamingKeyHasher {
    pub fn new(schema: &[ColumnDescriptor], key_ordinals: Vec<usize>) -> Self {
        Self {
            key_ordinals,
            columns: schema.to_vec(),
            map: KeyHashMap::new(),
        }
    }

    /// Add one row whose values are aligned to the schema
    pub fn add_row(&mut self, row: &Row) {
        let mut hasher = RowHasher::new();
        for (position, column) in self.columns.iter().enumerate() {
            hasher.push(row.get(position).unwrap_or(&NULL_VALUE), column.column_type);
        }
        let key = build_key(row, &self.key_ordinals, &self.columns);
        self.map.insert(key, hasher.finish());
    }

    pub fn finish(self) -> KeyHashMap {
        self.map
    }
}
