//! Message schema table supplied by the application layer.
//!
//! The codec never embeds concrete message definitions. Callers hand it a
//! [`MessageSchema`], usually loaded from JSON:
//!
//! ```json
//! {
//!   "messages": [
//!     {
//!       "name": "GetFeatures",
//!       "wire_type": 55,
//!       "fields": []
//!     },
//!     {
//!       "name": "Features",
//!       "wire_type": 17,
//!       "fields": [
//!         { "name": "vendor", "id": 1, "type": "string" },
//!         { "name": "major_version", "id": 2, "type": "uint32", "rule": "required" }
//!       ]
//!     }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Scalar or nested type of a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
	Bool,
	Uint32,
	Uint64,
	Sint32,
	Sint64,
	String,
	Bytes,
	/// Nested message, referenced by name.
	Message(String),
}

impl FieldType {
	/// Protobuf wire kind used for this field's values.
	pub(crate) fn wire_kind(&self) -> u8 {
		match self {
			FieldType::Bool | FieldType::Uint32 | FieldType::Uint64 | FieldType::Sint32 | FieldType::Sint64 => WIRE_VARINT,
			FieldType::String | FieldType::Bytes | FieldType::Message(_) => WIRE_LEN,
		}
	}
}

pub(crate) const WIRE_VARINT: u8 = 0;
pub(crate) const WIRE_FIXED64: u8 = 1;
pub(crate) const WIRE_LEN: u8 = 2;
pub(crate) const WIRE_FIXED32: u8 = 5;

impl From<String> for FieldType {
	fn from(value: String) -> Self {
		match value.as_str() {
			"bool" => FieldType::Bool,
			"uint32" => FieldType::Uint32,
			"uint64" => FieldType::Uint64,
			"sint32" => FieldType::Sint32,
			"sint64" => FieldType::Sint64,
			"string" => FieldType::String,
			"bytes" => FieldType::Bytes,
			_ => FieldType::Message(value),
		}
	}
}

impl From<FieldType> for String {
	fn from(value: FieldType) -> Self {
		value.to_string()
	}
}

impl fmt::Display for FieldType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FieldType::Bool => write!(f, "bool"),
			FieldType::Uint32 => write!(f, "uint32"),
			FieldType::Uint64 => write!(f, "uint64"),
			FieldType::Sint32 => write!(f, "sint32"),
			FieldType::Sint64 => write!(f, "sint64"),
			FieldType::String => write!(f, "string"),
			FieldType::Bytes => write!(f, "bytes"),
			FieldType::Message(name) => write!(f, "{name}"),
		}
	}
}

/// Field cardinality.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldRule {
	#[default]
	Optional,
	Required,
	Repeated,
}

/// One field of a message layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
	pub name: String,
	pub id: u32,
	#[serde(rename = "type")]
	pub kind: FieldType,
	#[serde(default)]
	pub rule: FieldRule,
}

/// Layout of one message: its numeric wire type and fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDef {
	pub name: String,
	pub wire_type: u16,
	#[serde(default)]
	pub fields: Vec<FieldDef>,
}

impl MessageDef {
	pub(crate) fn field_by_id(&self, id: u32) -> Option<&FieldDef> {
		self.fields.iter().find(|field| field.id == id)
	}
}

#[derive(Deserialize)]
struct SchemaFile {
	messages: Vec<MessageDef>,
}

/// Lookup table from message name (and wire type) to field layout.
#[derive(Debug, Clone, Default)]
pub struct MessageSchema {
	messages: Vec<MessageDef>,
	by_name: HashMap<String, usize>,
	by_wire_type: HashMap<u16, usize>,
}

impl MessageSchema {
	/// Builds a schema table, rejecting duplicate names, duplicate wire types,
	/// duplicate field ids and references to undefined nested messages.
	pub fn new(messages: Vec<MessageDef>) -> Result<Self> {
		let mut by_name = HashMap::with_capacity(messages.len());
		let mut by_wire_type = HashMap::with_capacity(messages.len());

		for (index, def) in messages.iter().enumerate() {
			if by_name.insert(def.name.clone(), index).is_some() {
				return Err(ProtocolError::InvalidSchema(format!("duplicate message {}", def.name)));
			}
			if let Some(previous) = by_wire_type.insert(def.wire_type, index) {
				return Err(ProtocolError::InvalidSchema(format!(
					"wire type {} used by both {} and {}",
					def.wire_type, messages[previous].name, def.name
				)));
			}
			for (position, field) in def.fields.iter().enumerate() {
				if field.id == 0 {
					return Err(ProtocolError::InvalidSchema(format!("{}.{} uses field id 0", def.name, field.name)));
				}
				if def.fields[..position].iter().any(|other| other.id == field.id || other.name == field.name) {
					return Err(ProtocolError::InvalidSchema(format!("{} reuses field {} (id {})", def.name, field.name, field.id)));
				}
			}
		}

		for def in &messages {
			for field in &def.fields {
				if let FieldType::Message(nested) = &field.kind {
					if !by_name.contains_key(nested) {
						return Err(ProtocolError::InvalidSchema(format!(
							"{}.{} references undefined message {}",
							def.name, field.name, nested
						)));
					}
				}
			}
		}

		Ok(Self {
			messages,
			by_name,
			by_wire_type,
		})
	}

	/// Parses a schema from its JSON representation.
	pub fn from_json(json: &str) -> Result<Self> {
		let file: SchemaFile = serde_json::from_str(json).map_err(|e| ProtocolError::InvalidSchema(e.to_string()))?;
		Self::new(file.messages)
	}

	/// Builds a schema from an already parsed JSON value.
	pub fn from_value(value: serde_json::Value) -> Result<Self> {
		let file: SchemaFile = serde_json::from_value(value).map_err(|e| ProtocolError::InvalidSchema(e.to_string()))?;
		Self::new(file.messages)
	}

	pub fn get(&self, name: &str) -> Option<&MessageDef> {
		self.by_name.get(name).map(|&index| &self.messages[index])
	}

	pub fn by_wire_type(&self, wire_type: u16) -> Option<&MessageDef> {
		self.by_wire_type.get(&wire_type).map(|&index| &self.messages[index])
	}

	pub fn messages(&self) -> &[MessageDef] {
		&self.messages
	}
}
