/*
 * Reads and writes the untyped binary key/value tree format used by the external
 * launcher's shortcuts file. The format carries no schema: every entry is a type
 * byte, a NUL-terminated key and a payload, and each tree ends with a single
 * sentinel byte. This module is deliberately generic; it knows nothing about
 * shortcuts; the `shortcuts` module imposes structure on top of it.
 *
 * Decoding is strict. Any unknown type byte, truncated stream or invalid UTF-8 is a
 * `FormatError`, and a failed decode never yields a partial tree. Nesting is capped
 * at `MAX_DEPTH` levels so a hostile file cannot exhaust the stack.
 */
use std::fmt;

const TYPE_TREE: u8 = 0x00;
const TYPE_STRING: u8 = 0x01;
const TYPE_INT32: u8 = 0x02;
const TREE_END: u8 = 0x08;

/// Nested trees below the root. Real shortcuts files use two.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    UnexpectedType { byte: u8, offset: usize },
    Truncated { offset: usize },
    InvalidUtf8 { offset: usize },
    TrailingData { offset: usize },
    EmbeddedNul { key: String },
    TooDeep { offset: usize },
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::UnexpectedType { byte, offset } => {
                write!(f, "Unexpected type byte 0x{byte:02x} at offset {offset}")
            }
            FormatError::Truncated { offset } => {
                write!(f, "Stream truncated at offset {offset}")
            }
            FormatError::InvalidUtf8 { offset } => {
                write!(f, "Invalid UTF-8 in text starting at offset {offset}")
            }
            FormatError::TrailingData { offset } => {
                write!(f, "Unexpected data after the final terminator at offset {offset}")
            }
            FormatError::EmbeddedNul { key } => {
                write!(f, "Key or value for '{key}' contains a NUL byte and cannot be encoded")
            }
            FormatError::TooDeep { offset } => {
                write!(f, "Trees nested deeper than {MAX_DEPTH} levels at offset {offset}")
            }
        }
    }
}

impl std::error::Error for FormatError {}

pub type Result<T> = std::result::Result<T, FormatError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvValue {
    String(String),
    Int32(i32),
    Tree(KvTree),
}

impl KvValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            KvValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            KvValue::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_tree(&self) -> Option<&KvTree> {
        match self {
            KvValue::Tree(t) => Some(t),
            _ => None,
        }
    }
}

impl From<&str> for KvValue {
    fn from(value: &str) -> Self {
        KvValue::String(value.to_string())
    }
}

impl From<String> for KvValue {
    fn from(value: String) -> Self {
        KvValue::String(value)
    }
}

impl From<i32> for KvValue {
    fn from(value: i32) -> Self {
        KvValue::Int32(value)
    }
}

impl From<KvTree> for KvValue {
    fn from(value: KvTree) -> Self {
        KvValue::Tree(value)
    }
}

/*
 * An ordered, string-keyed tree. Insertion order is preserved because the external
 * reader relies on it for index-keyed lists. Keys are unique per level; inserting an
 * existing key replaces the value in place.
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvTree {
    entries: Vec<(String, KvValue)>,
}

impl KvTree {
    pub fn new() -> Self {
        KvTree {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<KvValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&KvValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /*
     * Looks a key up the way other writers of this file expect: the exact casing
     * wins, otherwise the first entry whose key matches case-insensitively.
     */
    pub fn get_ignore_case(&self, key: &str) -> Option<&KvValue> {
        self.get(key).or_else(|| {
            self.entries
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
    }

    pub fn remove(&mut self, key: &str) -> Option<KvValue> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &KvValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn read_u8(&mut self) -> Result<u8> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or(FormatError::Truncated { offset: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_cstr(&mut self) -> Result<String> {
        let start = self.pos;
        let rest = &self.bytes[start..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(FormatError::Truncated {
                offset: self.bytes.len(),
            })?;
        let text = std::str::from_utf8(&rest[..len])
            .map_err(|_| FormatError::InvalidUtf8 { offset: start })?
            .to_string();
        self.pos = start + len + 1;
        Ok(text)
    }

    fn read_i32(&mut self) -> Result<i32> {
        let end = self.pos + 4;
        let raw = self
            .bytes
            .get(self.pos..end)
            .ok_or(FormatError::Truncated {
                offset: self.bytes.len(),
            })?;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(raw);
        self.pos = end;
        Ok(i32::from_le_bytes(buf))
    }

    fn read_tree(&mut self, depth: usize) -> Result<KvTree> {
        let mut tree = KvTree::new();
        loop {
            let offset = self.pos;
            let type_byte = self.read_u8()?;
            if type_byte == TREE_END {
                return Ok(tree);
            }
            if !matches!(type_byte, TYPE_TREE | TYPE_STRING | TYPE_INT32) {
                return Err(FormatError::UnexpectedType {
                    byte: type_byte,
                    offset,
                });
            }
            let key = self.read_cstr()?;
            let value = match type_byte {
                TYPE_TREE if depth >= MAX_DEPTH => {
                    return Err(FormatError::TooDeep { offset });
                }
                TYPE_TREE => KvValue::Tree(self.read_tree(depth + 1)?),
                TYPE_STRING => KvValue::String(self.read_cstr()?),
                _ => KvValue::Int32(self.read_i32()?),
            };
            if tree.get(&key).is_some() {
                log::warn!(
                    "KvBinary: Duplicate key '{key}' at offset {offset}; keeping the later value."
                );
            }
            tree.insert(key, value);
        }
    }
}

/*
 * Decodes a complete byte stream into a tree. The stream must consist of exactly one
 * entry sequence closed by its terminator; anything after it is rejected.
 */
pub fn decode(bytes: &[u8]) -> Result<KvTree> {
    let mut reader = Reader { bytes, pos: 0 };
    let tree = reader.read_tree(0)?;
    if reader.pos != bytes.len() {
        return Err(FormatError::TrailingData { offset: reader.pos });
    }
    log::trace!(
        "KvBinary: Decoded {} top-level entries from {} bytes.",
        tree.len(),
        bytes.len()
    );
    Ok(tree)
}

fn write_cstr(out: &mut Vec<u8>, text: &str, key: &str) -> Result<()> {
    if text.as_bytes().contains(&0) {
        return Err(FormatError::EmbeddedNul {
            key: key.replace('\0', "\\0"),
        });
    }
    out.extend_from_slice(text.as_bytes());
    out.push(0);
    Ok(())
}

fn write_tree(out: &mut Vec<u8>, tree: &KvTree) -> Result<()> {
    for (key, value) in tree.iter() {
        let type_byte = match value {
            KvValue::Tree(_) => TYPE_TREE,
            KvValue::String(_) => TYPE_STRING,
            KvValue::Int32(_) => TYPE_INT32,
        };
        out.push(type_byte);
        write_cstr(out, key, key)?;
        match value {
            KvValue::Tree(child) => write_tree(out, child)?,
            KvValue::String(s) => write_cstr(out, s, key)?,
            KvValue::Int32(v) => out.extend_from_slice(&v.to_le_bytes()),
        }
    }
    out.push(TREE_END);
    Ok(())
}

/*
 * Encodes a tree into a freshly allocated buffer. The whole byte sequence is built
 * before anything is handed back, so callers never write a half-encoded tree.
 */
pub fn encode(tree: &KvTree) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(256);
    write_tree(&mut out, tree)?;
    Ok(out)
}
