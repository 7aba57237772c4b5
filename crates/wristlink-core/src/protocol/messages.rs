//! All Wristlink protocol message types.
//!
//! Messages follow protocol version [`PROTOCOL_VERSION`].  On the wire every
//! message is an ordered list of [`Value`](super::value::Value)s whose first
//! element is the integer type tag; the remaining elements are the fields in
//! the order they are declared here.
//!
//! Payload *contents* such as route geometry, tile bitmaps, and packed
//! settings are opaque byte blobs produced and consumed elsewhere.

use serde::{Deserialize, Serialize};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version, reported back by the watch app in `DeviceInfo`.
pub const PROTOCOL_VERSION: u8 = 1;

// ── Message type codes ────────────────────────────────────────────────────────

/// Type tags for phone → watch commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandType {
    Ping = 0,
    RequestDeviceInfo = 1,
    LoadRoute = 2,
    ClearRoutes = 3,
    RequestSettings = 4,
    SaveSettings = 5,
    MapTile = 6,
}

impl TryFrom<i64> for CommandType {
    type Error = ();

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CommandType::Ping),
            1 => Ok(CommandType::RequestDeviceInfo),
            2 => Ok(CommandType::LoadRoute),
            3 => Ok(CommandType::ClearRoutes),
            4 => Ok(CommandType::RequestSettings),
            5 => Ok(CommandType::SaveSettings),
            6 => Ok(CommandType::MapTile),
            _ => Err(()),
        }
    }
}

/// Type tags for watch → phone responses.
///
/// This set is closed for a given [`PROTOCOL_VERSION`]: a tag outside it means
/// the two sides disagree about the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResponseType {
    Pong = 0,
    DeviceInfo = 1,
    RouteLoaded = 2,
    Settings = 3,
    TileRequest = 4,
}

impl TryFrom<i64> for ResponseType {
    type Error = ();

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ResponseType::Pong),
            1 => Ok(ResponseType::DeviceInfo),
            2 => Ok(ResponseType::RouteLoaded),
            3 => Ok(ResponseType::Settings),
            4 => Ok(ResponseType::TileRequest),
            _ => Err(()),
        }
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// MAP_TILE (6): one pre-rendered map tile pushed to the watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapTile {
    pub x: u32,
    pub y: u32,
    pub z: u8,
    /// Encoded tile bitmap.
    pub tile: Vec<u8>,
}

/// All phone → watch commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Liveness check; the watch echoes `token` in a [`Pong`].
    Ping { token: i64 },
    RequestDeviceInfo,
    /// Replaces the route stored under `route_id` with the encoded `route`.
    LoadRoute { route_id: i64, route: Vec<u8> },
    ClearRoutes,
    RequestSettings,
    SaveSettings { settings: Vec<u8> },
    MapTile(MapTile),
}

impl Command {
    /// Returns the [`CommandType`] discriminant for this command.
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Ping { .. } => CommandType::Ping,
            Command::RequestDeviceInfo => CommandType::RequestDeviceInfo,
            Command::LoadRoute { .. } => CommandType::LoadRoute,
            Command::ClearRoutes => CommandType::ClearRoutes,
            Command::RequestSettings => CommandType::RequestSettings,
            Command::SaveSettings { .. } => CommandType::SaveSettings,
            Command::MapTile(_) => CommandType::MapTile,
        }
    }
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// PONG (0): reply to [`Command::Ping`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub token: i64,
}

/// DEVICE_INFO (1): watch app identity and screen geometry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Protocol version the watch app speaks.
    pub protocol_version: u8,
    /// Human-readable watch app version, e.g. `"2.4.1"`.
    pub app_version: String,
    pub screen_width: u32,
    pub screen_height: u32,
}

/// ROUTE_LOADED (2): the watch stored the route sent with [`Command::LoadRoute`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteLoaded {
    pub route_id: i64,
}

/// SETTINGS (3): the watch app's packed settings blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub settings: Vec<u8>,
}

/// TILE_REQUEST (4): unsolicited request from the watch for a map tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRequest {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

/// All watch → phone responses, discriminated by type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Pong(Pong),
    DeviceInfo(DeviceInfo),
    RouteLoaded(RouteLoaded),
    Settings(Settings),
    TileRequest(TileRequest),
}

impl Response {
    /// Returns the [`ResponseType`] discriminant for this response.
    pub fn response_type(&self) -> ResponseType {
        match self {
            Response::Pong(_) => ResponseType::Pong,
            Response::DeviceInfo(_) => ResponseType::DeviceInfo,
            Response::RouteLoaded(_) => ResponseType::RouteLoaded,
            Response::Settings(_) => ResponseType::Settings,
            Response::TileRequest(_) => ResponseType::TileRequest,
        }
    }
}

// ── Typed expectations ────────────────────────────────────────────────────────

/// Ties a response payload struct to the [`ResponseType`] that carries it.
///
/// Lets callers await a specific payload type instead of matching on
/// [`Response`] themselves:
///
/// ```rust
/// use wristlink_core::protocol::messages::{ExpectedResponse, Pong, Response, ResponseType};
///
/// assert_eq!(Pong::RESPONSE_TYPE, ResponseType::Pong);
/// let pong = Pong::from_response(Response::Pong(Pong { token: 9 }));
/// assert_eq!(pong, Some(Pong { token: 9 }));
/// ```
pub trait ExpectedResponse: Sized {
    /// The response type tag that carries `Self`.
    const RESPONSE_TYPE: ResponseType;

    /// Extracts `Self` from a decoded response, or `None` for any other variant.
    fn from_response(response: Response) -> Option<Self>;
}

impl ExpectedResponse for Pong {
    const RESPONSE_TYPE: ResponseType = ResponseType::Pong;

    fn from_response(response: Response) -> Option<Self> {
        match response {
            Response::Pong(p) => Some(p),
            _ => None,
        }
    }
}

impl ExpectedResponse for DeviceInfo {
    const RESPONSE_TYPE: ResponseType = ResponseType::DeviceInfo;

    fn from_response(response: Response) -> Option<Self> {
        match response {
            Response::DeviceInfo(d) => Some(d),
            _ => None,
        }
    }
}

impl ExpectedResponse for RouteLoaded {
    const RESPONSE_TYPE: ResponseType = ResponseType::RouteLoaded;

    fn from_response(response: Response) -> Option<Self> {
        match response {
            Response::RouteLoaded(r) => Some(r),
            _ => None,
        }
    }
}

impl ExpectedResponse for Settings {
    const RESPONSE_TYPE: ResponseType = ResponseType::Settings;

    fn from_response(response: Response) -> Option<Self> {
        match response {
            Response::Settings(s) => Some(s),
            _ => None,
        }
    }
}

impl ExpectedResponse for TileRequest {
    const RESPONSE_TYPE: ResponseType = ResponseType::TileRequest;

    fn from_response(response: Response) -> Option<Self> {
        match response {
            Response::TileRequest(t) => Some(t),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_type_tag_round_trips_through_try_from() {
        for ty in [
            CommandType::Ping,
            CommandType::RequestDeviceInfo,
            CommandType::LoadRoute,
            CommandType::ClearRoutes,
            CommandType::RequestSettings,
            CommandType::SaveSettings,
            CommandType::MapTile,
        ] {
            assert_eq!(CommandType::try_from(ty as i64), Ok(ty));
        }
    }

    #[test]
    fn test_response_type_rejects_unknown_tags() {
        assert_eq!(ResponseType::try_from(5), Err(()));
        assert_eq!(ResponseType::try_from(-1), Err(()));
    }

    #[test]
    fn test_response_type_matches_variant() {
        let response = Response::RouteLoaded(RouteLoaded { route_id: 3 });
        assert_eq!(response.response_type(), ResponseType::RouteLoaded);
    }

    #[test]
    fn test_from_response_rejects_other_variants() {
        // Arrange
        let response = Response::Pong(Pong { token: 1 });

        // Act
        let info = DeviceInfo::from_response(response);

        // Assert
        assert!(info.is_none());
    }

    #[test]
    fn test_map_tile_command_type() {
        let cmd = Command::MapTile(MapTile {
            x: 1,
            y: 2,
            z: 3,
            tile: vec![],
        });
        assert_eq!(cmd.command_type(), CommandType::MapTile);
    }
}
