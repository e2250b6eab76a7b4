use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion};
use redpipe::Client;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// A loopback echo-style server that answers every inbound PING with a
/// `+PONG\r\n`, used to measure round-trip submit-to-completion latency
/// through the reactor without a real Redis-compatible server present.
fn spawn_echo_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        if let Ok((mut sock, _)) = listener.accept() {
            let mut buf = [0u8; 4096];
            loop {
                match sock.read(&mut buf) {
                    Ok(0) | Err(_) => return,
                    Ok(n) => {
                        let replies = buf[..n].iter().filter(|&&b| b == b'*').count();
                        let reply = b"+PONG\r\n".repeat(replies.max(1));
                        if sock.write_all(&reply).is_err() {
                            return;
                        }
                    }
                }
            }
        }
    });
    addr
}

fn submit_round_trip(c: &mut Criterion) {
    let addr = spawn_echo_server();
    let client = Client::connect(addr).unwrap();
    // Let the connection settle before timing.
    thread::sleep(Duration::from_millis(50));

    c.bench_function("submit + completion round trip", |b| {
        b.iter(|| {
            let (tx, rx) = mpsc::channel();
            client.submit(Bytes::from_static(b"*1\r\n$4\r\nPING\r\n"), move |r| {
                tx.send(r).unwrap();
            });
            rx.recv_timeout(Duration::from_secs(1)).unwrap().unwrap();
        })
    });

    client.disconnect();
}

criterion_group!(benches, submit_round_trip);
criterion_main!(benches);
