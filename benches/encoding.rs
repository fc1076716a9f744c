use accessctl::encoding::{Frame, Payload};
use accessctl::service::{AuthGrant, Command, Response};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn encode_benchmark(c: &mut Criterion) {
    c.bench_function("encode_open_door", |b| {
        let command = Command::open_door(1);
        b.iter(|| black_box(command.frame(Some(223_000_123))))
    });

    c.bench_function("encode_set_auth", |b| {
        let grant = AuthGrant::new(0x0012_D687);
        b.iter(|| black_box(Command::set_auth(&grant).and_then(|c| c.frame(Some(223_000_123)))))
    });

    c.bench_function("encode_hex_payload", |b| {
        let payload = Payload::Hex("c0a8 0164 ffff ff00 c0a8 0101 55aa aa55".into());
        b.iter(|| black_box(Frame::encode(0x96, Some(223_000_123), &payload)))
    });
}

fn decode_benchmark(c: &mut Criterion) {
    let mut status = [0u8; 64];
    status[0] = 0x17;
    status[1] = 0x20;
    status[4..8].copy_from_slice(&223_000_123u32.to_le_bytes());
    status[8..12].copy_from_slice(&42u32.to_le_bytes());
    status[12..16].copy_from_slice(&[1, 1, 2, 1]);
    status[16..20].copy_from_slice(&0x0012_D687u32.to_le_bytes());
    status[20..27].copy_from_slice(&[0x20, 0x24, 0x03, 0x15, 0x10, 0x30, 0x00]);

    c.bench_function("decode_status_event", |b| {
        b.iter(|| black_box(Response::decode(black_box(&status))))
    });

    let mut search = [0u8; 64];
    search[0] = 0x17;
    search[1] = 0x94;
    search[8..12].copy_from_slice(&[192, 168, 1, 100]);
    search[26..28].copy_from_slice(&[0x06, 0x62]);

    c.bench_function("decode_search_reply", |b| {
        b.iter(|| black_box(Response::decode(black_box(&search))))
    });
}

criterion_group!(benches, encode_benchmark, decode_benchmark);
criterion_main!(benches);
