use std::{
    collections::{HashMap, hash_map::Entry},
    fmt,
};

use bytes::Bytes;

/// Numeric field identifier.
pub type Tag = u32;

/// Well-known tags used by the harness itself.
pub mod tags {
    use super::Tag;

    /// BeginString.
    pub const BEGIN_STRING: Tag = 8;
    /// BodyLength.
    pub const BODY_LENGTH: Tag = 9;
    /// CheckSum.
    pub const CHECKSUM: Tag = 10;
    /// MsgSeqNum.
    pub const MSG_SEQ_NUM: Tag = 34;
    /// MsgType.
    pub const MSG_TYPE: Tag = 35;
}

/// A single tag/value pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    tag: Tag,
    value: String,
}

impl Field {
    /// Create a field.
    pub fn new(tag: Tag, value: impl Into<String>) -> Self {
        Self {
            tag,
            value: value.into(),
        }
    }

    /// The field's tag.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// The field's value.
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.tag, self.value)
    }
}

/// Ordered fields in wire order. Duplicate tags are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldList(Vec<Field>);

impl FieldList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Build a list from `(tag, value)` pairs.
    pub fn from_pairs<I, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (Tag, V)>,
        V: Into<String>,
    {
        pairs
            .into_iter()
            .map(|(tag, value)| Field::new(tag, value))
            .collect()
    }

    /// Append a field at the tail.
    pub fn push(&mut self, field: Field) {
        self.0.push(field);
    }

    /// Builder-style append.
    pub fn with(mut self, tag: Tag, value: impl Into<String>) -> Self {
        self.0.push(Field::new(tag, value));
        self
    }

    /// Number of fields, duplicates included.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate fields in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Field> {
        self.0.iter()
    }

    /// Value of the first field carrying `tag`.
    pub fn get(&self, tag: Tag) -> Option<&str> {
        self.0.iter().find(|f| f.tag == tag).map(Field::value)
    }

    /// Build a lookup map over this list.
    pub fn to_map(&self) -> FieldMap<'_> {
        FieldMap::from(self)
    }
}

impl fmt::Display for FieldList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            write!(f, "{field}")?;
        }
        Ok(())
    }
}

impl FromIterator<Field> for FieldList {
    fn from_iter<T: IntoIterator<Item = Field>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for FieldList {
    type Item = Field;
    type IntoIter = std::vec::IntoIter<Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a FieldList {
    type Item = &'a Field;
    type IntoIter = std::slice::Iter<'a, Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl From<Vec<Field>> for FieldList {
    fn from(fields: Vec<Field>) -> Self {
        Self(fields)
    }
}

/// Tag-indexed view over a [`FieldList`].
///
/// When a tag repeats, the first occurrence wins. The map borrows from the
/// list it was built from and never writes back into it.
#[derive(Debug, Clone, Default)]
pub struct FieldMap<'a>(HashMap<Tag, &'a str>);

impl<'a> FieldMap<'a> {
    /// Value for `tag`, if present.
    pub fn get(&self, tag: Tag) -> Option<&'a str> {
        self.0.get(&tag).copied()
    }

    /// Whether `tag` is present.
    pub fn contains(&self, tag: Tag) -> bool {
        self.0.contains_key(&tag)
    }

    /// Number of distinct tags.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> From<&'a FieldList> for FieldMap<'a> {
    fn from(list: &'a FieldList) -> Self {
        let mut map = HashMap::with_capacity(list.len());
        for field in list {
            if let Entry::Vacant(slot) = map.entry(field.tag) {
                slot.insert(field.value.as_str());
            }
        }
        Self(map)
    }
}

/// A received protocol message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Decoded fields in wire order.
    pub fields: FieldList,
    /// Raw wire bytes, when captured.
    pub raw: Option<Bytes>,
}

impl Message {
    /// Create a message without raw bytes.
    pub fn new(fields: FieldList) -> Self {
        Self { fields, raw: None }
    }

    /// Create a message carrying the bytes it was decoded from.
    pub fn with_raw(fields: FieldList, raw: Bytes) -> Self {
        Self {
            fields,
            raw: Some(raw),
        }
    }

    /// Value of the MsgType field, if present.
    pub fn msg_type(&self) -> Option<&str> {
        self.fields.get(tags::MSG_TYPE)
    }

    /// Raw bytes rendered with `|` in place of the SOH delimiter.
    pub fn raw_display(&self) -> Option<String> {
        self.raw
            .as_ref()
            .map(|raw| String::from_utf8_lossy(raw).replace('\x01', "|"))
    }
}
