//! Criterion benchmarks for the Wristlink message codec.
//!
//! Measures `encode_command` and `decode_response` for each message shape the
//! companion sends or receives.  Route and tile payloads dominate the byte
//! volume, so those fixtures carry realistically sized blobs.
//!
//! Run with:
//! ```bash
//! cargo bench --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use wristlink_core::{
    decode_response, encode_command, encode_response,
    protocol::messages::{
        DeviceInfo, MapTile, Pong, RouteLoaded, Settings, TileRequest, PROTOCOL_VERSION,
    },
    Command, Response,
};

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn make_ping() -> Command {
    Command::Ping { token: 0x5eed }
}

fn make_load_route() -> Command {
    Command::LoadRoute {
        route_id: 42,
        route: (0..16_384u32).map(|i| (i % 251) as u8).collect(),
    }
}

fn make_save_settings() -> Command {
    Command::SaveSettings {
        settings: vec![0x1f; 256],
    }
}

fn make_map_tile() -> Command {
    Command::MapTile(MapTile {
        x: 8_412,
        y: 5_384,
        z: 14,
        tile: vec![0xa5; 4_096],
    })
}

fn make_pong() -> Response {
    Response::Pong(Pong { token: 0x5eed })
}

fn make_device_info() -> Response {
    Response::DeviceInfo(DeviceInfo {
        protocol_version: PROTOCOL_VERSION,
        app_version: "3.1.0".to_string(),
        screen_width: 416,
        screen_height: 416,
    })
}

fn make_route_loaded() -> Response {
    Response::RouteLoaded(RouteLoaded { route_id: 42 })
}

fn make_settings() -> Response {
    Response::Settings(Settings {
        settings: vec![0x1f; 256],
    })
}

fn make_tile_request() -> Response {
    Response::TileRequest(TileRequest {
        x: 8_412,
        y: 5_384,
        z: 14,
    })
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

/// Benchmarks `encode_command` for every outbound command shape.
fn bench_encode(c: &mut Criterion) {
    let commands: &[(&str, Command)] = &[
        ("Ping", make_ping()),
        ("RequestDeviceInfo", Command::RequestDeviceInfo),
        ("LoadRoute(16KiB)", make_load_route()),
        ("ClearRoutes", Command::ClearRoutes),
        ("SaveSettings", make_save_settings()),
        ("MapTile(4KiB)", make_map_tile()),
    ];

    let mut group = c.benchmark_group("encode_command");
    for (name, cmd) in commands {
        group.bench_with_input(BenchmarkId::new("cmd", name), cmd, |b, cmd| {
            b.iter(|| encode_command(black_box(cmd)))
        });
    }
    group.finish();
}

/// Benchmarks `decode_response` from pre-encoded value lists.
fn bench_decode(c: &mut Criterion) {
    let responses: &[(&str, Response)] = &[
        ("Pong", make_pong()),
        ("DeviceInfo", make_device_info()),
        ("RouteLoaded", make_route_loaded()),
        ("Settings", make_settings()),
        ("TileRequest", make_tile_request()),
    ];

    let mut group = c.benchmark_group("decode_response");
    for (name, response) in responses {
        let raw = encode_response(response);
        group.bench_with_input(BenchmarkId::new("msg", name), &raw, |b, raw| {
            b.iter(|| decode_response(black_box(raw)).expect("decode must succeed"))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
