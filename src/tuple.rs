use std::fmt::Display;

use crate::{
    error::{DbError, Result},
    ids::RecordId,
};

const INT_BYTES: usize = 4;

/// The on-disk type of a single field. Every type has a fixed width so that
/// every tuple of a layout occupies the same number of bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int,
    /// A string of at most this many bytes, stored length-prefixed and zero padded
    Str(usize),
}

impl FieldType {
    /// Number of bytes this field occupies inside a slot
    pub fn width(&self) -> usize {
        match self {
            FieldType::Int => INT_BYTES,
            FieldType::Str(max_len) => INT_BYTES + max_len,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Int(i32),
    Str(String),
}

impl Field {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Field::Int(n) => Some(*n),
            Field::Str(_) => None,
        }
    }

    pub fn field_type(&self) -> FieldType {
        match self {
            Field::Int(_) => FieldType::Int,
            Field::Str(s) => FieldType::Str(s.len()),
        }
    }

    fn fits(&self, field_type: &FieldType) -> bool {
        match (self, field_type) {
            (Field::Int(_), FieldType::Int) => true,
            (Field::Str(s), FieldType::Str(max_len)) => s.len() <= *max_len,
            _ => false,
        }
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Field::Int(n) => write!(f, "{n}"),
            Field::Str(s) => write!(f, "{s}"),
        }
    }
}

/// The ordered field types of a table. Determines the slot width of its pages.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TupleLayout {
    fields: Vec<FieldType>,
}

impl TupleLayout {
    pub fn new(fields: Vec<FieldType>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[FieldType] {
        &self.fields
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    /// Serialized width of one tuple in bytes
    pub fn width(&self) -> usize {
        self.fields.iter().map(FieldType::width).sum()
    }

    /// Check that `tuple` has one field per field type and that every field fits its type
    pub fn check(&self, tuple: &Tuple) -> Result<()> {
        if tuple.fields.len() != self.fields.len() {
            return Err(DbError::LayoutMismatch(format!(
                "expected {} fields, got {}",
                self.fields.len(),
                tuple.fields.len()
            )));
        }
        if let Some((idx, field)) = tuple
            .fields
            .iter()
            .enumerate()
            .find(|(idx, field)| !field.fits(&self.fields[*idx]))
        {
            return Err(DbError::LayoutMismatch(format!(
                "field {idx} ({field:?}) does not fit {:?}",
                self.fields[idx]
            )));
        }
        Ok(())
    }

    /// Serialize the fields of `tuple` into `buf`, which must be exactly [`TupleLayout::width`] long
    pub(crate) fn encode(&self, tuple: &Tuple, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.width());
        self.check(tuple)?;

        let mut offset = 0;
        for (field, field_type) in tuple.fields.iter().zip(&self.fields) {
            let width = field_type.width();
            let dst = &mut buf[offset..offset + width];
            match field {
                Field::Int(n) => dst.copy_from_slice(&n.to_be_bytes()),
                Field::Str(s) => {
                    dst[..INT_BYTES].copy_from_slice(&(s.len() as u32).to_be_bytes());
                    dst[INT_BYTES..INT_BYTES + s.len()].copy_from_slice(s.as_bytes());
                    dst[INT_BYTES + s.len()..].fill(0);
                }
            }
            offset += width;
        }
        Ok(())
    }

    /// Deserialize one tuple from `buf`. The error string describes what made the bytes invalid.
    pub(crate) fn decode(&self, buf: &[u8]) -> std::result::Result<Vec<Field>, String> {
        debug_assert_eq!(buf.len(), self.width());
        let mut fields = Vec::with_capacity(self.fields.len());
        let mut offset = 0;
        for field_type in &self.fields {
            let width = field_type.width();
            let src = &buf[offset..offset + width];
            let prefix: [u8; INT_BYTES] = [src[0], src[1], src[2], src[3]];
            match field_type {
                FieldType::Int => fields.push(Field::Int(i32::from_be_bytes(prefix))),
                FieldType::Str(max_len) => {
                    let len = u32::from_be_bytes(prefix) as usize;
                    if len > *max_len {
                        return Err(format!("string length {len} exceeds maximum {max_len}"));
                    }
                    let s = std::str::from_utf8(&src[INT_BYTES..INT_BYTES + len])
                        .map_err(|e| format!("string field is not utf-8: {e}"))?;
                    fields.push(Field::Str(s.to_string()));
                }
            }
            offset += width;
        }
        Ok(fields)
    }
}

/// A row of field values. Once inserted, it carries the [`RecordId`] of the slot it occupies.
#[derive(Debug, Clone)]
pub struct Tuple {
    fields: Vec<Field>,
    record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            fields,
            record_id: None,
        }
    }

    pub(crate) fn with_record_id(fields: Vec<Field>, record_id: RecordId) -> Self {
        Self {
            fields,
            record_id: Some(record_id),
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, record_id: Option<RecordId>) {
        self.record_id = record_id;
    }
}

/// Tuples compare by value; where they are stored does not matter
impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for Tuple {}

impl Display for Tuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let values: Vec<String> = self.fields.iter().map(|v| v.to_string()).collect();
        write!(f, "({})", values.join(", "))
    }
}
