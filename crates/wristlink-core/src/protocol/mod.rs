//! Protocol module containing the value model, message types, and the codec.

pub mod codec;
pub mod messages;
pub mod value;

pub use codec::{decode_command, decode_response, encode_command, encode_response, DecodeError};
pub use messages::*;
pub use value::{Value, ValueKind};
