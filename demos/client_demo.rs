/*!
 * Minimal end-to-end demo: connect, run a small pipeline of commands,
 * subscribe to a channel, and shut down cleanly.
 *
 * Run against any RESP-speaking server, e.g. `redis-server --port 6379`:
 *
 *     RUST_LOG=info cargo run --example client_demo -- 127.0.0.1:6379
 */

use anyhow::Result;
use redpipe::Client;
use std::env;
use std::sync::mpsc;
use std::time::Duration;

fn main() -> Result<()> {
    env_logger::init();

    let addr = env::args().nth(1).unwrap_or_else(|| "127.0.0.1:6379".to_string());
    let client = Client::connect(&addr)?;
    println!("connected to {addr}");

    client.subscribe("announcements", false, |msg| match msg {
        Ok(payload) => println!("[announcements] {}", String::from_utf8_lossy(&payload)),
        Err(e) => eprintln!("[announcements] listener error: {e}"),
    });

    let (tx, rx) = mpsc::channel();
    client.ping({
        let tx = tx.clone();
        move |r| tx.send(format!("PING -> {r:?}")).unwrap()
    });
    client.set("demo:key", "demo-value", Default::default(), {
        let tx = tx.clone();
        move |r| tx.send(format!("SET -> {r:?}")).unwrap()
    });
    client.get("demo:key", move |r| tx.send(format!("GET -> {r:?}")).unwrap());

    for _ in 0..3 {
        println!("{}", rx.recv_timeout(Duration::from_secs(5))?);
    }

    client.unsubscribe("announcements", false);
    client.disconnect();
    Ok(())
}
