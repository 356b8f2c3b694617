//! Conversions between Rhai values and harness field lists.
//!
//! Scripts describe fields either as an array of `[tag, value]` pairs, which
//! keeps order and allows repeated tags, or as an object map keyed by the
//! decimal tag. Maps iterate in key order, so use pairs when order matters.

use rhai::{Array, Dynamic, Map};
use tagscript::{Field, FieldList, Message, Tag};

/// Errors raised while reading fields out of a script value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarshalError {
    /// The value is neither an array of pairs nor a map.
    #[error("expected an array of [tag, value] pairs or an object map, got {0}")]
    NotFields(String),
    /// An array element is not a two-element array.
    #[error("element {0} is not a [tag, value] pair")]
    NotAPair(usize),
    /// A tag is not a positive integer.
    #[error("invalid tag {0:?}")]
    InvalidTag(String),
    /// A value has a type with no wire representation.
    #[error("tag {tag}: cannot send a value of type {type_name}")]
    UnsupportedValue {
        /// Tag the value belongs to.
        tag: Tag,
        /// Rhai type name of the value.
        type_name: String,
    },
}

/// A received or echoed message as exposed to scripts.
#[derive(Debug, Clone)]
pub struct ScriptMessage(pub Message);

impl ScriptMessage {
    /// Value of the first occurrence of `tag`, or `()`.
    pub fn get(&self, tag: Tag) -> Dynamic {
        self.0
            .fields
            .get(tag)
            .map_or(Dynamic::UNIT, |v| Dynamic::from(v.to_string()))
    }

    /// Ordered `[tag, value]` pairs.
    pub fn to_array(&self) -> Array {
        fields_to_array(&self.0.fields)
    }

    /// Tag-keyed map; the first occurrence of a repeated tag wins.
    pub fn to_map(&self) -> Map {
        fields_to_map(&self.0.fields)
    }
}

/// Read a field list from a script value.
///
/// Accepts an array of pairs, an object map, a message (its fields are
/// reused), or `()` for an empty list.
pub fn fields_from_dynamic(value: &Dynamic) -> Result<FieldList, MarshalError> {
    if value.is_unit() {
        return Ok(FieldList::new());
    }
    if let Some(message) = value.clone().try_cast::<ScriptMessage>() {
        return Ok(message.0.fields);
    }
    if value.is_array() {
        let array = value
            .clone()
            .into_array()
            .map_err(|t| MarshalError::NotFields(t.to_string()))?;
        return array
            .iter()
            .enumerate()
            .map(|(index, pair)| field_from_pair(index, pair))
            .collect();
    }
    if value.is_map() {
        let map = value
            .clone()
            .try_cast::<Map>()
            .ok_or_else(|| MarshalError::NotFields(value.type_name().to_string()))?;
        return map
            .iter()
            .map(|(key, value)| {
                let tag = parse_tag(key.as_str())?;
                Ok(Field::new(tag, value_to_string(tag, value)?))
            })
            .collect();
    }
    Err(MarshalError::NotFields(value.type_name().to_string()))
}

fn field_from_pair(index: usize, pair: &Dynamic) -> Result<Field, MarshalError> {
    let pair = pair
        .clone()
        .into_array()
        .map_err(|_| MarshalError::NotAPair(index))?;
    let [tag, value] = pair.as_slice() else {
        return Err(MarshalError::NotAPair(index));
    };
    let tag = tag_from_dynamic(tag)?;
    Ok(Field::new(tag, value_to_string(tag, value)?))
}

/// A tag given as an integer or a decimal string.
pub fn tag_from_dynamic(value: &Dynamic) -> Result<Tag, MarshalError> {
    if let Ok(n) = value.as_int() {
        return Tag::try_from(n)
            .ok()
            .filter(|t| *t > 0)
            .ok_or_else(|| MarshalError::InvalidTag(n.to_string()));
    }
    if value.is_string() {
        return parse_tag(&value.to_string());
    }
    Err(MarshalError::InvalidTag(value.type_name().to_string()))
}

fn parse_tag(text: &str) -> Result<Tag, MarshalError> {
    text.trim()
        .parse::<Tag>()
        .ok()
        .filter(|t| *t > 0)
        .ok_or_else(|| MarshalError::InvalidTag(text.to_string()))
}

/// Wire text for a scalar script value.
fn value_to_string(tag: Tag, value: &Dynamic) -> Result<String, MarshalError> {
    if value.is_string() || value.is_int() || value.is_float() || value.is_bool() || value.is_char()
    {
        Ok(value.to_string())
    } else {
        Err(MarshalError::UnsupportedValue {
            tag,
            type_name: value.type_name().to_string(),
        })
    }
}

/// Ordered `[tag, value]` pairs for a field list.
pub fn fields_to_array(fields: &FieldList) -> Array {
    fields
        .iter()
        .map(|field| {
            let pair: Array = vec![
                Dynamic::from(field.tag() as rhai::INT),
                Dynamic::from(field.value().to_string()),
            ];
            Dynamic::from_array(pair)
        })
        .collect()
}

/// Tag-keyed map for a field list; the first occurrence of a tag wins.
pub fn fields_to_map(fields: &FieldList) -> Map {
    let mut map = Map::new();
    for field in fields {
        map.entry(field.tag().to_string().into())
            .or_insert_with(|| Dynamic::from(field.value().to_string()));
    }
    map
}

#[cfg(test)]
mod tests {
    use rhai::Engine;

    use super::*;

    fn eval(script: &str) -> Dynamic {
        Engine::new().eval::<Dynamic>(script).unwrap()
    }

    #[test]
    fn pairs_keep_order_and_repeats() {
        let fields = fields_from_dynamic(&eval(r#"[[35, "A"], [108, 30], [35, "B"]]"#)).unwrap();
        assert_eq!(fields.to_string(), "35=A|108=30|35=B");
    }

    #[test]
    fn maps_are_keyed_by_decimal_tag() {
        let fields = fields_from_dynamic(&eval(r#"#{ "35": "A", "108": 30 }"#)).unwrap();
        assert_eq!(fields.get(35), Some("A"));
        assert_eq!(fields.get(108), Some("30"));
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn scalars_are_stringified() {
        let fields =
            fields_from_dynamic(&eval(r#"[[1, true], [2, 'x'], [3, "7"], [4, -2]]"#)).unwrap();
        assert_eq!(fields.to_string(), "1=true|2=x|3=7|4=-2");
    }

    #[test]
    fn unit_is_an_empty_list() {
        assert!(fields_from_dynamic(&Dynamic::UNIT).unwrap().is_empty());
    }

    #[test]
    fn string_tags_are_accepted() {
        let fields = fields_from_dynamic(&eval(r#"[["49", "CLIENT"]]"#)).unwrap();
        assert_eq!(fields.get(49), Some("CLIENT"));
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert_eq!(
            fields_from_dynamic(&eval("42")),
            Err(MarshalError::NotFields("i64".into()))
        );
        assert_eq!(
            fields_from_dynamic(&eval(r#"[[35, "A"], [108]]"#)),
            Err(MarshalError::NotAPair(1))
        );
        assert_eq!(
            fields_from_dynamic(&eval(r#"[[-1, "A"]]"#)),
            Err(MarshalError::InvalidTag("-1".into()))
        );
        assert_eq!(
            fields_from_dynamic(&eval(r#"#{ "abc": 1 }"#)),
            Err(MarshalError::InvalidTag("abc".into()))
        );
        assert!(matches!(
            fields_from_dynamic(&eval(r#"[[58, [1, 2]]]"#)),
            Err(MarshalError::UnsupportedValue { tag: 58, .. })
        ));
    }

    #[test]
    fn map_view_keeps_first_occurrence() {
        let fields = FieldList::from_pairs([(35, "A"), (58, "one"), (58, "two")]);
        let map = fields_to_map(&fields);
        assert_eq!(map["58"].clone().into_string().unwrap(), "one");
        assert_eq!(map.len(), 2);

        let pairs = fields_to_array(&fields);
        assert_eq!(pairs.len(), 3);
    }

    #[test]
    fn message_values_are_reused_as_fields() {
        let message = ScriptMessage(Message::new(FieldList::from_pairs([(35, "0")])));
        let fields = fields_from_dynamic(&Dynamic::from(message.clone())).unwrap();
        assert_eq!(fields.get(35), Some("0"));
        assert_eq!(message.get(35).into_string().unwrap(), "0");
        assert!(message.get(36).is_unit());
    }
}
