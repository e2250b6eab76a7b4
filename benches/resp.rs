use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use redpipe::reply::Reply;

fn encode_set_command(c: &mut Criterion) {
    c.bench_function("encode SET command", |b| {
        b.iter(|| {
            let mut buf = BytesMut::new();
            redpipe::encode::begin_command(&mut buf, b"SET", 2);
            redpipe::encode::write_bulk(&mut buf, black_box(b"key:123"));
            redpipe::encode::write_bulk(&mut buf, black_box(b"some value bytes"));
            black_box(buf);
        })
    });
}

fn decode_pipelined_replies(c: &mut Criterion) {
    let stream = b"+OK\r\n:100\r\n$11\r\nhello world\r\n*2\r\n$1\r\na\r\n$1\r\nb\r\n".repeat(64);

    c.bench_function("decode 64x pipelined replies", |b| {
        b.iter(|| {
            let mut decoder = redpipe::decode::Decoder::new();
            let mut out: Vec<Reply> = Vec::new();
            decoder.feed(black_box(&stream), |r| out.push(r)).unwrap();
            black_box(out);
        })
    });
}

fn decode_fragmented(c: &mut Criterion) {
    let stream = b"$4096\r\n".to_vec();
    let mut full = stream;
    full.extend(std::iter::repeat(b'x').take(4096));
    full.extend_from_slice(b"\r\n");

    c.bench_function("decode one large bulk string, byte at a time", |b| {
        b.iter(|| {
            let mut decoder = redpipe::decode::Decoder::new();
            let mut out: Vec<Reply> = Vec::new();
            for byte in &full {
                decoder.feed(std::slice::from_ref(byte), |r| out.push(r)).unwrap();
            }
            black_box(out);
        })
    });
}

criterion_group!(benches, encode_set_command, decode_pipelined_replies, decode_fragmented);
criterion_main!(benches);
