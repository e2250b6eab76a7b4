//! End-to-end tests against a loopback fake server: a plain
//! `TcpListener` thread that scripts raw RESP bytes onto the wire,
//! mirroring the teacher's `tests/large_payloads.rs` approach of
//! driving the real socket rather than mocking it.

use bytes::Bytes;
use redpipe::{Client, Mode, RedisError, Reply};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Spawn a listener and run `handler` against the first accepted
/// connection on a background thread. Returns the listener's address.
fn spawn_server(handler: impl FnOnce(TcpStream) + Send + 'static) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        if let Ok((sock, _)) = listener.accept() {
            handler(sock);
        }
    });
    addr
}

fn read_some(sock: &mut TcpStream) -> Vec<u8> {
    let mut buf = [0u8; 4096];
    let n = sock.read(&mut buf).unwrap_or(0);
    buf[..n].to_vec()
}

#[test]
fn pipelined_requests_get_replies_in_fifo_order() {
    let addr = spawn_server(|mut sock| {
        let _req = read_some(&mut sock);
        // Three replies written as one chunk; client must pair them
        // with its three submits in submission order.
        sock.write_all(b"+first\r\n+second\r\n+third\r\n").unwrap();
        thread::sleep(Duration::from_millis(200));
    });

    let client = Client::connect(addr).unwrap();
    let (tx, rx) = mpsc::channel();
    for label in ["a", "b", "c"] {
        let tx = tx.clone();
        let label = label.to_string();
        client.submit(Bytes::from_static(b"*1\r\n$4\r\nPING\r\n"), move |r| {
            tx.send((label, r)).unwrap();
        });
    }

    let results: Vec<_> = (0..3).map(|_| rx.recv_timeout(TIMEOUT).unwrap()).collect();
    assert_eq!(results[0].0, "a");
    assert_eq!(results[1].0, "b");
    assert_eq!(results[2].0, "c");
    assert_eq!(results[0].1.as_ref().unwrap().as_simple_string(), Some(&b"first"[..]));
    assert_eq!(results[1].1.as_ref().unwrap().as_simple_string(), Some(&b"second"[..]));
    assert_eq!(results[2].1.as_ref().unwrap().as_simple_string(), Some(&b"third"[..]));
}

#[test]
fn fragmented_reply_still_resolves() {
    let addr = spawn_server(|mut sock| {
        let _req = read_some(&mut sock);
        sock.write_all(b"$5\r\nhel").unwrap();
        thread::sleep(Duration::from_millis(50));
        sock.write_all(b"lo\r\n").unwrap();
        thread::sleep(Duration::from_millis(200));
    });

    let client = Client::connect(addr).unwrap();
    let (tx, rx) = mpsc::channel();
    client.submit(Bytes::from_static(b"*1\r\n$3\r\nGET\r\n"), move |r| tx.send(r).unwrap());
    let result = rx.recv_timeout(TIMEOUT).unwrap().unwrap();
    assert_eq!(result.as_bulk(), Some(&b"hello"[..]));
}

#[test]
fn remote_error_fails_only_the_issuing_completion() {
    let addr = spawn_server(|mut sock| {
        let _req = read_some(&mut sock);
        sock.write_all(b"-ERR bad thing\r\n+OK\r\n").unwrap();
        thread::sleep(Duration::from_millis(200));
    });

    let client = Client::connect(addr).unwrap();
    let (tx, rx) = mpsc::channel();
    let tx2 = tx.clone();
    client.submit(Bytes::from_static(b"*1\r\n$4\r\nPING\r\n"), move |r| tx.send(r).unwrap());
    client.submit(Bytes::from_static(b"*1\r\n$4\r\nPING\r\n"), move |r| tx2.send(r).unwrap());

    let first = rx.recv_timeout(TIMEOUT).unwrap();
    let second = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(matches!(first, Err(RedisError::RemoteError(_))));
    assert!(matches!(second, Ok(Reply::SimpleString(_))));
}

#[test]
fn peer_close_fails_all_in_flight_completions() {
    let addr = spawn_server(|mut sock| {
        let _req = read_some(&mut sock);
        // Close without replying.
        drop(sock);
    });

    let client = Client::connect(addr).unwrap();
    let (tx, rx) = mpsc::channel();
    let tx2 = tx.clone();
    client.submit(Bytes::from_static(b"*1\r\n$4\r\nPING\r\n"), move |r| tx.send(r).unwrap());
    client.submit(Bytes::from_static(b"*1\r\n$4\r\nPING\r\n"), move |r| tx2.send(r).unwrap());

    let first = rx.recv_timeout(TIMEOUT).unwrap();
    let second = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(matches!(first, Err(RedisError::ConnectionClosed)));
    assert!(matches!(second, Err(RedisError::ConnectionClosed)));
}

#[test]
fn protocol_error_fails_connection() {
    let addr = spawn_server(|mut sock| {
        let _req = read_some(&mut sock);
        sock.write_all(b"!not-a-type-byte\r\n").unwrap();
        thread::sleep(Duration::from_millis(200));
    });

    let client = Client::connect(addr).unwrap();
    let (tx, rx) = mpsc::channel();
    client.submit(Bytes::from_static(b"*1\r\n$4\r\nPING\r\n"), move |r| tx.send(r).unwrap());
    let result = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(matches!(result, Err(RedisError::Protocol(_))));
}

#[test]
fn subscribe_switches_mode_and_delivers_messages() {
    let addr = spawn_server(|mut sock| {
        let _req = read_some(&mut sock);
        sock.write_all(b"*3\r\n$9\r\nsubscribe\r\n$4\r\nnews\r\n:1\r\n").unwrap();
        thread::sleep(Duration::from_millis(50));
        sock.write_all(b"*3\r\n$7\r\nmessage\r\n$4\r\nnews\r\n$5\r\nhello\r\n").unwrap();
        thread::sleep(Duration::from_millis(200));
    });

    let client = Client::connect(addr).unwrap();
    let (tx, rx) = mpsc::channel();
    client.subscribe("news", false, move |msg| tx.send(msg).unwrap());

    let msg = rx.recv_timeout(TIMEOUT).unwrap().unwrap();
    assert_eq!(msg, Bytes::from_static(b"hello"));

    thread::sleep(Duration::from_millis(50));
    assert_eq!(client.mode(), Mode::Channel);
}

#[test]
fn pmessage_delivers_on_pattern_listener() {
    let addr = spawn_server(|mut sock| {
        let _req = read_some(&mut sock);
        sock.write_all(b"*3\r\n$10\r\npsubscribe\r\n$4\r\nnew*\r\n:1\r\n").unwrap();
        thread::sleep(Duration::from_millis(50));
        sock.write_all(b"*4\r\n$8\r\npmessage\r\n$4\r\nnew*\r\n$4\r\nnews\r\n$2\r\nhi\r\n").unwrap();
        thread::sleep(Duration::from_millis(200));
    });

    let client = Client::connect(addr).unwrap();
    let (tx, rx) = mpsc::channel();
    client.subscribe("new*", true, move |msg| tx.send(msg).unwrap());

    let msg = rx.recv_timeout(TIMEOUT).unwrap().unwrap();
    assert_eq!(msg, Bytes::from_static(b"hi"));
}

#[test]
fn submit_while_in_channel_mode_is_a_mode_violation() {
    let addr = spawn_server(|mut sock| {
        let _req = read_some(&mut sock);
        sock.write_all(b"*3\r\n$9\r\nsubscribe\r\n$4\r\nnews\r\n:1\r\n").unwrap();
        thread::sleep(Duration::from_millis(300));
    });

    let client = Client::connect(addr).unwrap();
    client.subscribe("news", false, |_| {});
    thread::sleep(Duration::from_millis(100));

    let (tx, rx) = mpsc::channel();
    client.submit(Bytes::from_static(b"*1\r\n$4\r\nPING\r\n"), move |r| tx.send(r).unwrap());
    let result = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(matches!(result, Err(RedisError::ModeViolation)));
}

#[test]
fn channel_mode_exit_returns_to_normal_after_unsubscribe_ack() {
    let addr = spawn_server(|mut sock| {
        let _req = read_some(&mut sock);
        sock.write_all(b"*3\r\n$9\r\nsubscribe\r\n$4\r\nnews\r\n:1\r\n").unwrap();
        let _req = read_some(&mut sock);
        sock.write_all(b"*3\r\n$11\r\nunsubscribe\r\n$4\r\nnews\r\n:0\r\n").unwrap();
        thread::sleep(Duration::from_millis(200));
    });

    let client = Client::connect(addr).unwrap();
    client.subscribe("news", false, |_| {});
    thread::sleep(Duration::from_millis(100));
    assert_eq!(client.mode(), Mode::Channel);

    client.unsubscribe("news", false);
    thread::sleep(Duration::from_millis(150));
    assert_eq!(client.mode(), Mode::Normal);
}

#[test]
fn explicit_disconnect_fails_pending_and_future_submissions() {
    let addr = spawn_server(|mut sock| {
        // never reply
        thread::sleep(Duration::from_millis(500));
        let _ = sock;
    });

    let client = Client::connect(addr).unwrap();
    client.disconnect();
    thread::sleep(Duration::from_millis(50));

    let (tx, rx) = mpsc::channel();
    client.submit(Bytes::from_static(b"*1\r\n$4\r\nPING\r\n"), move |r| tx.send(r).unwrap());
    let result = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(matches!(result, Err(RedisError::ConnectionClosed)));
}
