// JDWP type definitions
//
// Common types used across the JDWP protocol

use serde::{Deserialize, Serialize};

// Object IDs are 8 bytes in JDWP (verified against VirtualMachine.IDSizes at
// connect time)
pub type ObjectId = u64;
pub type ThreadId = ObjectId;
pub type StringId = ObjectId;

pub type ReferenceTypeId = u64;
pub type ClassId = ReferenceTypeId;

pub type MethodId = u64;
pub type FrameId = u64;

/// Value type tags, as they appear on the wire
pub mod tags {
    pub const ARRAY: u8 = b'[';
    pub const BYTE: u8 = b'B';
    pub const CHAR: u8 = b'C';
    pub const OBJECT: u8 = b'L';
    pub const FLOAT: u8 = b'F';
    pub const DOUBLE: u8 = b'D';
    pub const INT: u8 = b'I';
    pub const LONG: u8 = b'J';
    pub const SHORT: u8 = b'S';
    pub const VOID: u8 = b'V';
    pub const BOOLEAN: u8 = b'Z';
    pub const STRING: u8 = b's';
    pub const THREAD: u8 = b't';
    pub const THREAD_GROUP: u8 = b'g';
    pub const CLASS_LOADER: u8 = b'l';
    pub const CLASS_OBJECT: u8 = b'c';

    /// True for every tag whose payload is an object ID.
    pub fn is_reference(tag: u8) -> bool {
        matches!(
            tag,
            ARRAY | OBJECT | STRING | THREAD | THREAD_GROUP | CLASS_LOADER | CLASS_OBJECT
        )
    }
}

/// The primitive type name a tag denotes, for display.
pub fn primitive_name(tag: u8) -> &'static str {
    match tag {
        tags::BYTE => "byte",
        tags::CHAR => "char",
        tags::DOUBLE => "double",
        tags::FLOAT => "float",
        tags::INT => "int",
        tags::LONG => "long",
        tags::SHORT => "short",
        tags::BOOLEAN => "boolean",
        tags::VOID => "void",
        _ => "object",
    }
}

/// Location identifies a code position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub type_tag: u8, // 1=class, 2=interface, 3=array
    pub class_id: ReferenceTypeId,
    pub method_id: MethodId,
    pub index: u64, // bytecode index (PC)
}

/// Tagged value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Value {
    pub tag: u8,
    pub data: ValueData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueData {
    Byte(i8),
    Char(u16),
    Float(f32),
    Double(f64),
    Int(i32),
    Long(i64),
    Short(i16),
    Boolean(bool),
    Object(ObjectId),
    Void,
}

impl Value {
    /// The object ID carried by a reference value, if this is one.
    pub fn object_id(&self) -> Option<ObjectId> {
        match self.data {
            ValueData::Object(id) => Some(id),
            _ => None,
        }
    }

    /// Bare literal form: `42`, `true`, `a`, `null`, `@1f` for live references.
    pub fn literal(&self) -> String {
        match &self.data {
            ValueData::Byte(v) => v.to_string(),
            ValueData::Char(v) => char::from_u32(*v as u32)
                .map(String::from)
                .unwrap_or_else(|| format!("\\u{:04x}", v)),
            ValueData::Float(v) => v.to_string(),
            ValueData::Double(v) => v.to_string(),
            ValueData::Int(v) => v.to_string(),
            ValueData::Long(v) => v.to_string(),
            ValueData::Short(v) => v.to_string(),
            ValueData::Boolean(v) => v.to_string(),
            ValueData::Object(0) => "null".to_string(),
            ValueData::Object(id) => format!("@{:x}", id),
            ValueData::Void => "void".to_string(),
        }
    }
}

/// Local variable slot info from Method.VariableTable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub code_index: u64,
    pub name: String,
    pub signature: String,
    pub length: u32,
    pub slot: u32,
}

impl Variable {
    /// Whether the slot holds a live value at the given bytecode index.
    pub fn in_scope_at(&self, pc: u64) -> bool {
        pc >= self.code_index && pc < self.code_index + self.length as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_forms() {
        let int = Value {
            tag: tags::INT,
            data: ValueData::Int(-3),
        };
        assert_eq!(int.literal(), "-3");

        let ch = Value {
            tag: tags::CHAR,
            data: ValueData::Char('x' as u16),
        };
        assert_eq!(ch.literal(), "x");

        let null = Value {
            tag: tags::OBJECT,
            data: ValueData::Object(0),
        };
        assert_eq!(null.literal(), "null");

        let obj = Value {
            tag: tags::OBJECT,
            data: ValueData::Object(0x1f),
        };
        assert_eq!(obj.literal(), "@1f");
    }

    #[test]
    fn test_variable_scope() {
        let var = Variable {
            code_index: 10,
            name: "i".to_string(),
            signature: "I".to_string(),
            length: 5,
            slot: 1,
        };
        assert!(!var.in_scope_at(9));
        assert!(var.in_scope_at(10));
        assert!(var.in_scope_at(14));
        assert!(!var.in_scope_at(15));
    }

    #[test]
    fn test_reference_tags() {
        assert!(tags::is_reference(tags::ARRAY));
        assert!(tags::is_reference(tags::STRING));
        assert!(!tags::is_reference(tags::INT));
    }
}
