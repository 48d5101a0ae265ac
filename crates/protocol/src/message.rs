//! Schema-driven message body encoding.
//!
//! A body is `[wire_type: u16 BE][fields...]`. Fields use protobuf keys
//! (`id << 3 | wire kind`) with varint or length-delimited values. JSON
//! payloads map onto fields by name; `bytes` fields travel as hex strings.

use serde_json::{Map, Value};

use crate::error::{ProtocolError, Result};
use crate::schema::{FieldDef, FieldRule, FieldType, MessageDef, MessageSchema, WIRE_FIXED32, WIRE_FIXED64, WIRE_LEN, WIRE_VARINT};

/// Length of the wire type prefix in front of every message body.
pub const MESSAGE_HEADER_LEN: usize = 2;

/// Nested messages deeper than this are treated as malformed input.
const MAX_DEPTH: usize = 32;

/// Encodes `payload` as the body of message `name`, header included.
pub fn encode_body(schema: &MessageSchema, name: &str, payload: &Value) -> Result<Vec<u8>> {
	let def = schema.get(name).ok_or_else(|| ProtocolError::UnknownMessage(name.to_string()))?;
	let mut out = Vec::with_capacity(MESSAGE_HEADER_LEN + 32);
	out.extend_from_slice(&def.wire_type.to_be_bytes());
	encode_fields(schema, def, payload, &mut out, 0)?;
	Ok(out)
}

/// Decodes a body (header included) back into its message name and payload.
pub fn decode_body(schema: &MessageSchema, bytes: &[u8]) -> Result<(String, Value)> {
	if bytes.len() < MESSAGE_HEADER_LEN {
		return Err(ProtocolError::malformed(format!("message header needs {MESSAGE_HEADER_LEN} bytes, got {}", bytes.len())));
	}
	let wire_type = u16::from_be_bytes([bytes[0], bytes[1]]);
	let def = schema
		.by_wire_type(wire_type)
		.ok_or_else(|| ProtocolError::malformed(format!("unrecognized message type {wire_type}")))?;
	let payload = decode_fields(schema, def, &bytes[MESSAGE_HEADER_LEN..], 0)?;
	Ok((def.name.clone(), Value::Object(payload)))
}

fn encode_fields(schema: &MessageSchema, def: &MessageDef, payload: &Value, out: &mut Vec<u8>, depth: usize) -> Result<()> {
	if depth > MAX_DEPTH {
		return Err(ProtocolError::invalid(&def.name, "nesting too deep"));
	}
	let empty = Map::new();
	let object = match payload {
		Value::Object(map) => map,
		Value::Null => &empty,
		other => return Err(ProtocolError::invalid(&def.name, format!("expected object, got {}", type_name(other)))),
	};

	for field in &def.fields {
		let value = match object.get(&field.name) {
			None | Some(Value::Null) => {
				if field.rule == FieldRule::Required {
					return Err(ProtocolError::invalid(&def.name, format!("missing required field {}", field.name)));
				}
				continue;
			}
			Some(value) => value,
		};

		if field.rule == FieldRule::Repeated {
			let Value::Array(items) = value else {
				return Err(ProtocolError::invalid(&def.name, format!("field {} must be an array", field.name)));
			};
			for item in items {
				encode_field(schema, def, field, item, out, depth)?;
			}
		} else {
			encode_field(schema, def, field, value, out, depth)?;
		}
	}
	Ok(())
}

fn encode_field(schema: &MessageSchema, def: &MessageDef, field: &FieldDef, value: &Value, out: &mut Vec<u8>, depth: usize) -> Result<()> {
	let mismatch = || ProtocolError::invalid(&def.name, format!("field {} expects {}, got {}", field.name, field.kind, type_name(value)));

	write_varint(out, (u64::from(field.id) << 3) | u64::from(field.kind.wire_kind()));
	match &field.kind {
		FieldType::Bool => write_varint(out, u64::from(value.as_bool().ok_or_else(mismatch)?)),
		FieldType::Uint32 => {
			let number = unsigned(value).ok_or_else(mismatch)?;
			if number > u64::from(u32::MAX) {
				return Err(ProtocolError::invalid(&def.name, format!("field {} out of uint32 range", field.name)));
			}
			write_varint(out, number);
		}
		FieldType::Uint64 => write_varint(out, unsigned(value).ok_or_else(mismatch)?),
		FieldType::Sint32 => {
			let number = value.as_i64().ok_or_else(mismatch)?;
			if i32::try_from(number).is_err() {
				return Err(ProtocolError::invalid(&def.name, format!("field {} out of sint32 range", field.name)));
			}
			write_varint(out, zigzag(number));
		}
		FieldType::Sint64 => write_varint(out, zigzag(value.as_i64().ok_or_else(mismatch)?)),
		FieldType::String => write_len_delimited(out, value.as_str().ok_or_else(mismatch)?.as_bytes()),
		FieldType::Bytes => {
			let text = value.as_str().ok_or_else(mismatch)?;
			let bytes = hex::decode(text).map_err(|e| ProtocolError::invalid(&def.name, format!("field {} is not hex: {e}", field.name)))?;
			write_len_delimited(out, &bytes);
		}
		FieldType::Message(nested) => {
			let nested_def = schema.get(nested).ok_or_else(|| ProtocolError::UnknownMessage(nested.clone()))?;
			let mut inner = Vec::new();
			encode_fields(schema, nested_def, value, &mut inner, depth + 1)?;
			write_len_delimited(out, &inner);
		}
	}
	Ok(())
}

fn decode_fields(schema: &MessageSchema, def: &MessageDef, bytes: &[u8], depth: usize) -> Result<Map<String, Value>> {
	if depth > MAX_DEPTH {
		return Err(ProtocolError::malformed("nesting too deep"));
	}
	let mut payload = Map::new();
	let mut pos = 0;

	while pos < bytes.len() {
		let key = read_varint(bytes, &mut pos)?;
		let id = u32::try_from(key >> 3).map_err(|_| ProtocolError::malformed("field id out of range"))?;
		let wire_kind = (key & 0x07) as u8;

		let Some(field) = def.field_by_id(id) else {
			skip_unknown(bytes, &mut pos, wire_kind)?;
			continue;
		};
		if wire_kind != field.kind.wire_kind() {
			return Err(ProtocolError::malformed(format!(
				"{}.{} has wire kind {wire_kind}, expected {}",
				def.name,
				field.name,
				field.kind.wire_kind()
			)));
		}

		let value = decode_value(schema, def, field, bytes, &mut pos, depth)?;
		if field.rule == FieldRule::Repeated {
			match payload.entry(field.name.clone()).or_insert_with(|| Value::Array(Vec::new())) {
				Value::Array(items) => items.push(value),
				_ => return Err(ProtocolError::malformed(format!("{}.{} is not stored as a list", def.name, field.name))),
			}
		} else {
			payload.insert(field.name.clone(), value);
		}
	}

	if let Some(missing) = def.fields.iter().find(|f| f.rule == FieldRule::Required && !payload.contains_key(&f.name)) {
		return Err(ProtocolError::malformed(format!("{} is missing required field {}", def.name, missing.name)));
	}
	Ok(payload)
}

fn decode_value(schema: &MessageSchema, def: &MessageDef, field: &FieldDef, bytes: &[u8], pos: &mut usize, depth: usize) -> Result<Value> {
	let value = match &field.kind {
		FieldType::Bool => Value::Bool(read_varint(bytes, pos)? != 0),
		FieldType::Uint32 | FieldType::Uint64 => Value::from(read_varint(bytes, pos)?),
		FieldType::Sint32 | FieldType::Sint64 => Value::from(unzigzag(read_varint(bytes, pos)?)),
		FieldType::String => {
			let raw = read_len_delimited(bytes, pos)?;
			let text = std::str::from_utf8(raw).map_err(|_| ProtocolError::malformed(format!("{}.{} is not valid utf-8", def.name, field.name)))?;
			Value::String(text.to_string())
		}
		FieldType::Bytes => Value::String(hex::encode(read_len_delimited(bytes, pos)?)),
		FieldType::Message(nested) => {
			let raw = read_len_delimited(bytes, pos)?;
			let nested_def = schema.get(nested).ok_or_else(|| ProtocolError::malformed(format!("unknown nested message {nested}")))?;
			Value::Object(decode_fields(schema, nested_def, raw, depth + 1)?)
		}
	};
	Ok(value)
}

fn skip_unknown(bytes: &[u8], pos: &mut usize, wire_kind: u8) -> Result<()> {
	match wire_kind {
		WIRE_VARINT => {
			read_varint(bytes, pos)?;
		}
		WIRE_LEN => {
			read_len_delimited(bytes, pos)?;
		}
		WIRE_FIXED64 => advance(bytes, pos, 8)?,
		WIRE_FIXED32 => advance(bytes, pos, 4)?,
		other => return Err(ProtocolError::malformed(format!("unsupported wire kind {other}"))),
	}
	Ok(())
}

fn advance(bytes: &[u8], pos: &mut usize, len: usize) -> Result<()> {
	if bytes.len() - *pos < len {
		return Err(ProtocolError::malformed("truncated field"));
	}
	*pos += len;
	Ok(())
}

fn unsigned(value: &Value) -> Option<u64> {
	match value {
		Value::Number(number) => number.as_u64(),
		Value::String(text) => text.parse().ok(),
		_ => None,
	}
}

fn zigzag(value: i64) -> u64 {
	((value << 1) ^ (value >> 63)) as u64
}

fn unzigzag(value: u64) -> i64 {
	((value >> 1) as i64) ^ -((value & 1) as i64)
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
	while value >= 0x80 {
		out.push((value as u8) | 0x80);
		value >>= 7;
	}
	out.push(value as u8);
}

fn read_varint(bytes: &[u8], pos: &mut usize) -> Result<u64> {
	let mut result = 0u64;
	for shift in (0..64).step_by(7) {
		let byte = *bytes.get(*pos).ok_or_else(|| ProtocolError::malformed("truncated varint"))?;
		*pos += 1;
		result |= u64::from(byte & 0x7f) << shift;
		if byte & 0x80 == 0 {
			return Ok(result);
		}
	}
	Err(ProtocolError::malformed("varint too long"))
}

fn write_len_delimited(out: &mut Vec<u8>, data: &[u8]) {
	write_varint(out, data.len() as u64);
	out.extend_from_slice(data);
}

fn read_len_delimited<'a>(bytes: &'a [u8], pos: &mut usize) -> Result<&'a [u8]> {
	let len = usize::try_from(read_varint(bytes, pos)?).map_err(|_| ProtocolError::malformed("length out of range"))?;
	let start = *pos;
	advance(bytes, pos, len)?;
	Ok(&bytes[start..start + len])
}

fn type_name(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "bool",
		Value::Number(_) => "number",
		Value::String(_) => "string",
		Value::Array(_) => "array",
		Value::Object(_) => "object",
	}
}
