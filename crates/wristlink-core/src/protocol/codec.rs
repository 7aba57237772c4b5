//! Codec for encoding and decoding Wristlink protocol messages.
//!
//! Wire format (one message per transport delivery):
//! ```text
//! [type_tag: Int][field_0][field_1]...[field_n]
//! ```
//! Field order and primitive kinds are fixed per message type (see
//! [`crate::protocol::messages`]).  Decoding is strict: a message with the
//! wrong number of fields, a field of the wrong primitive kind, or an integer
//! that does not fit its declared width is rejected rather than repaired.
//! A malformed message means the phone and watch have drifted out of sync,
//! and the caller is expected to drop the subscription it arrived on.

use thiserror::Error;
use tracing::debug;

use crate::protocol::messages::{
    Command, CommandType, DeviceInfo, MapTile, Pong, Response, ResponseType, RouteLoaded,
    Settings, TileRequest,
};
use crate::protocol::value::{Value, ValueKind};

/// Errors that can occur while decoding a raw value list.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    /// The value list was empty, so there is no type tag to dispatch on.
    #[error("empty message: missing type tag")]
    Empty,

    /// The first value was not an integer.
    #[error("type tag must be an int, got {0}")]
    InvalidTag(ValueKind),

    /// The type tag is not part of the protocol.
    #[error("unknown message type: {0}")]
    UnknownMessageType(i64),

    /// The message carried the wrong number of fields.
    #[error("{message} expects {expected} field(s), got {actual}")]
    FieldCount {
        message: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A field had the wrong primitive kind.
    #[error("{message} field {index}: expected {expected}, got {actual}")]
    FieldType {
        message: &'static str,
        index: usize,
        expected: ValueKind,
        actual: ValueKind,
    },

    /// An integer field does not fit the declared width.
    #[error("{message} field {index}: value {value} out of range")]
    OutOfRange {
        message: &'static str,
        index: usize,
        value: i64,
    },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Command`] into the value list handed to the transport.
///
/// # Examples
///
/// ```rust
/// use wristlink_core::protocol::{encode_command, Command, Value};
///
/// let values = encode_command(&Command::Ping { token: 42 });
/// assert_eq!(values, vec![Value::Int(0), Value::Int(42)]);
/// ```
pub fn encode_command(cmd: &Command) -> Vec<Value> {
    let mut out = vec![Value::Int(cmd.command_type() as i64)];
    match cmd {
        Command::Ping { token } => out.push(Value::Int(*token)),
        Command::RequestDeviceInfo | Command::ClearRoutes | Command::RequestSettings => {}
        Command::LoadRoute { route_id, route } => {
            out.push(Value::Int(*route_id));
            out.push(Value::Bytes(route.clone()));
        }
        Command::SaveSettings { settings } => out.push(Value::Bytes(settings.clone())),
        Command::MapTile(t) => {
            out.push(Value::from(t.x));
            out.push(Value::from(t.y));
            out.push(Value::from(t.z));
            out.push(Value::Bytes(t.tile.clone()));
        }
    }
    out
}

/// Decodes a raw inbound value list into a typed [`Response`].
///
/// # Errors
///
/// Returns [`DecodeError`] for an empty list, a non-integer or unknown type
/// tag, or a field layout that does not match the response type.
///
/// # Examples
///
/// ```rust
/// use wristlink_core::protocol::{decode_response, Response, Value};
/// use wristlink_core::protocol::messages::Pong;
///
/// let response = decode_response(&[Value::Int(0), Value::Int(7)]).unwrap();
/// assert_eq!(response, Response::Pong(Pong { token: 7 }));
/// ```
pub fn decode_response(raw: &[Value]) -> Result<Response, DecodeError> {
    let result = decode_response_inner(raw);
    if let Err(ref e) = result {
        debug!("failed to decode inbound message ({} values): {e}", raw.len());
    }
    result
}

/// Encodes a [`Response`] the way the watch app does.
///
/// Used by simulators and tests that stand in for the watch.
pub fn encode_response(response: &Response) -> Vec<Value> {
    let mut out = vec![Value::Int(response.response_type() as i64)];
    match response {
        Response::Pong(p) => out.push(Value::Int(p.token)),
        Response::DeviceInfo(d) => {
            out.push(Value::from(d.protocol_version));
            out.push(Value::Text(d.app_version.clone()));
            out.push(Value::from(d.screen_width));
            out.push(Value::from(d.screen_height));
        }
        Response::RouteLoaded(r) => out.push(Value::Int(r.route_id)),
        Response::Settings(s) => out.push(Value::Bytes(s.settings.clone())),
        Response::TileRequest(t) => {
            out.push(Value::from(t.x));
            out.push(Value::from(t.y));
            out.push(Value::from(t.z));
        }
    }
    out
}

/// Decodes a command value list the way the watch app does.
///
/// # Errors
///
/// Returns [`DecodeError`] under the same rules as [`decode_response`].
pub fn decode_command(raw: &[Value]) -> Result<Command, DecodeError> {
    let tag = read_tag(raw)?;
    let ty = CommandType::try_from(tag).map_err(|_| DecodeError::UnknownMessageType(tag))?;
    let fields = &raw[1..];

    match ty {
        CommandType::Ping => {
            let f = Fields::exact("Ping", fields, 1)?;
            Ok(Command::Ping { token: f.int(0)? })
        }
        CommandType::RequestDeviceInfo => {
            Fields::exact("RequestDeviceInfo", fields, 0)?;
            Ok(Command::RequestDeviceInfo)
        }
        CommandType::LoadRoute => {
            let f = Fields::exact("LoadRoute", fields, 2)?;
            Ok(Command::LoadRoute {
                route_id: f.int(0)?,
                route: f.bytes(1)?,
            })
        }
        CommandType::ClearRoutes => {
            Fields::exact("ClearRoutes", fields, 0)?;
            Ok(Command::ClearRoutes)
        }
        CommandType::RequestSettings => {
            Fields::exact("RequestSettings", fields, 0)?;
            Ok(Command::RequestSettings)
        }
        CommandType::SaveSettings => {
            let f = Fields::exact("SaveSettings", fields, 1)?;
            Ok(Command::SaveSettings {
                settings: f.bytes(0)?,
            })
        }
        CommandType::MapTile => {
            let f = Fields::exact("MapTile", fields, 4)?;
            Ok(Command::MapTile(MapTile {
                x: f.u32(0)?,
                y: f.u32(1)?,
                z: f.u8(2)?,
                tile: f.bytes(3)?,
            }))
        }
    }
}

// ── Response decoding ─────────────────────────────────────────────────────────

fn decode_response_inner(raw: &[Value]) -> Result<Response, DecodeError> {
    let tag = read_tag(raw)?;
    let ty = ResponseType::try_from(tag).map_err(|_| DecodeError::UnknownMessageType(tag))?;
    let fields = &raw[1..];

    match ty {
        ResponseType::Pong => {
            let f = Fields::exact("Pong", fields, 1)?;
            Ok(Response::Pong(Pong { token: f.int(0)? }))
        }
        ResponseType::DeviceInfo => {
            let f = Fields::exact("DeviceInfo", fields, 4)?;
            Ok(Response::DeviceInfo(DeviceInfo {
                protocol_version: f.u8(0)?,
                app_version: f.text(1)?,
                screen_width: f.u32(2)?,
                screen_height: f.u32(3)?,
            }))
        }
        ResponseType::RouteLoaded => {
            let f = Fields::exact("RouteLoaded", fields, 1)?;
            Ok(Response::RouteLoaded(RouteLoaded {
                route_id: f.int(0)?,
            }))
        }
        ResponseType::Settings => {
            let f = Fields::exact("Settings", fields, 1)?;
            Ok(Response::Settings(Settings {
                settings: f.bytes(0)?,
            }))
        }
        ResponseType::TileRequest => {
            let f = Fields::exact("TileRequest", fields, 3)?;
            Ok(Response::TileRequest(TileRequest {
                x: f.u32(0)?,
                y: f.u32(1)?,
                z: f.u8(2)?,
            }))
        }
    }
}

// ── Field helpers ─────────────────────────────────────────────────────────────

fn read_tag(raw: &[Value]) -> Result<i64, DecodeError> {
    let first = raw.first().ok_or(DecodeError::Empty)?;
    first
        .as_int()
        .ok_or_else(|| DecodeError::InvalidTag(first.kind()))
}

/// Typed view over the fields that follow the type tag.
///
/// Field indices in errors are zero-based and exclude the tag itself.
struct Fields<'a> {
    message: &'static str,
    values: &'a [Value],
}

impl<'a> Fields<'a> {
    fn exact(
        message: &'static str,
        values: &'a [Value],
        expected: usize,
    ) -> Result<Self, DecodeError> {
        if values.len() != expected {
            return Err(DecodeError::FieldCount {
                message,
                expected,
                actual: values.len(),
            });
        }
        Ok(Self { message, values })
    }

    fn type_error(&self, index: usize, expected: ValueKind) -> DecodeError {
        DecodeError::FieldType {
            message: self.message,
            index,
            expected,
            actual: self.values[index].kind(),
        }
    }

    fn int(&self, index: usize) -> Result<i64, DecodeError> {
        self.values[index]
            .as_int()
            .ok_or_else(|| self.type_error(index, ValueKind::Int))
    }

    fn u32(&self, index: usize) -> Result<u32, DecodeError> {
        let value = self.int(index)?;
        u32::try_from(value).map_err(|_| DecodeError::OutOfRange {
            message: self.message,
            index,
            value,
        })
    }

    fn u8(&self, index: usize) -> Result<u8, DecodeError> {
        let value = self.int(index)?;
        u8::try_from(value).map_err(|_| DecodeError::OutOfRange {
            message: self.message,
            index,
            value,
        })
    }

    fn text(&self, index: usize) -> Result<String, DecodeError> {
        match &self.values[index] {
            Value::Text(s) => Ok(s.clone()),
            _ => Err(self.type_error(index, ValueKind::Text)),
        }
    }

    fn bytes(&self, index: usize) -> Result<Vec<u8>, DecodeError> {
        match &self.values[index] {
            Value::Bytes(b) => Ok(b.clone()),
            _ => Err(self.type_error(index, ValueKind::Bytes)),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
