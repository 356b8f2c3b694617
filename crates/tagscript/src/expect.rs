//! Subset-match validation of received messages.

use tracing::info;

use crate::{
    error::{Error, Result},
    field::{FieldList, Message},
};

/// Check that every field in `expected` appears in `received` with an equal value.
///
/// Fields are checked in order and the first failure is returned: a tag absent
/// from the message yields [`Error::MissingField`], a differing value yields
/// [`Error::ValueMismatch`]. Received fields not named in `expected` are
/// ignored. On success the full received field list is returned, not just the
/// matched subset.
///
/// Duplicate tags in the received message resolve to their first occurrence.
pub fn expect<'m>(expected: &FieldList, received: &'m Message) -> Result<&'m FieldList> {
    let map = received.fields.to_map();

    for field in expected {
        info!("expect: {field}");
        match map.get(field.tag()) {
            None => return Err(Error::MissingField { tag: field.tag() }),
            Some(actual) if actual != field.value() => {
                return Err(Error::ValueMismatch {
                    tag: field.tag(),
                    expected: field.value().to_string(),
                    actual: actual.to_string(),
                });
            }
            Some(_) => {}
        }
    }

    Ok(&received.fields)
}
