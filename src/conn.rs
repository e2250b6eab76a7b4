/*!
 * Connection core
 *
 * `Client` is the handle callers hold: `Clone + Send + Sync`, cheap to
 * pass around, and backed by nothing but a `crossbeam_channel::Sender`
 * into a dedicated reactor thread plus a few shared atomics. It never
 * touches decoder or queue state itself — every `submit`/`subscribe`/
 * `unsubscribe` call is a message handed off to that thread, matching
 * the single-thread correctness boundary §5 of the spec requires.
 *
 * `Reactor` is that thread's state: one `mio::Poll` loop over exactly
 * one socket token and one waker token, shaped after the teacher's
 * `net::run_shard` accept loop but run against a single outbound
 * connection instead of a listener and its accepted sockets.
 */

use crate::catalog::Command;
use crate::decode::Decoder;
use crate::encode::{begin_command, write_bulk};
use crate::error::RedisError;
use crate::hash::{channel_hash, is_message_kind, is_pmessage_kind};
use crate::reply::Reply;

use bytes::{Bytes, BytesMut};
use crossbeam::channel::{unbounded, Receiver, Sender};
use hashbrown::HashMap;
use mio::net::TcpStream as MioTcpStream;
use mio::{Events, Interest, Poll, Token, Waker};
use parking_lot::Mutex;
use rustc_hash::FxBuildHasher;
use smol_str::SmolStr;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const SOCKET: Token = Token(0);
const WAKER: Token = Token(1);
const READ_BUF: usize = 16 * 1024;

/// A caller-supplied callback invoked exactly once, with the reply to
/// its command or the error that prevented one.
pub type Completion = Box<dyn FnOnce(Result<Reply, RedisError>) + Send + 'static>;

/// A caller-supplied callback invoked once per pushed message on a
/// subscribed channel or pattern, or with an error if the connection
/// fails while in channel mode.
pub type MessageListener = Box<dyn FnMut(Result<Bytes, RedisError>) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Channel,
}

enum ReactorCmd {
    Submit {
        request: Bytes,
        completion: Completion,
    },
    Subscribe {
        channel: SmolStr,
        is_pattern: bool,
        listener: MessageListener,
    },
    Unsubscribe {
        channel: SmolStr,
        is_pattern: bool,
    },
    Disconnect,
}

struct SharedState {
    closed: AtomicBool,
    in_channel_mode: AtomicBool,
    queue_len: AtomicUsize,
    last_submit_nanos: AtomicU64,
    last_reply_nanos: AtomicU64,
    start: Instant,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl SharedState {
    fn elapsed_since(&self, nanos: u64) -> Duration {
        let now = self.start.elapsed().as_nanos() as u64;
        Duration::from_nanos(now.saturating_sub(nanos))
    }

    fn mark_submit(&self) {
        let now = self.start.elapsed().as_nanos() as u64;
        self.last_submit_nanos.store(now, Ordering::Relaxed);
    }

    fn mark_reply(&self) {
        let now = self.start.elapsed().as_nanos() as u64;
        self.last_reply_nanos.store(now, Ordering::Relaxed);
    }
}

/// A pipelined connection to a single Redis-compatible server.
///
/// Cheap to clone; every clone shares the same reactor thread and
/// in-flight queue.
pub struct Client {
    cmd_tx: Sender<ReactorCmd>,
    waker: Arc<Waker>,
    shared: Arc<SharedState>,
    // Counts live `Client` handles only. `Reactor` holds its own clone
    // of `shared` for the lifetime of its thread, so `Arc::strong_count`
    // on `shared` can never reach zero from `Drop` alone; this counter
    // is bumped and dropped only by `Client::clone`/`Client::drop`.
    handles: Arc<AtomicUsize>,
}

impl Clone for Client {
    fn clone(&self) -> Self {
        self.handles.fetch_add(1, Ordering::AcqRel);
        Client {
            cmd_tx: self.cmd_tx.clone(),
            waker: Arc::clone(&self.waker),
            shared: Arc::clone(&self.shared),
            handles: Arc::clone(&self.handles),
        }
    }
}

impl Client {
    /// Resolve `addr`, connect, and start the reactor thread. Returns
    /// once the TCP handshake completes; everything after that is
    /// event-driven on the reactor thread.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Client, RedisError> {
        let std_stream = TcpStream::connect(addr)?;
        log::debug!("connected to {:?}", std_stream.peer_addr());
        std_stream.set_nodelay(true)?;
        std_stream.set_nonblocking(true)?;
        let mut mio_stream = MioTcpStream::from_std(std_stream);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut mio_stream, SOCKET, Interest::READABLE | Interest::WRITABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        let (cmd_tx, cmd_rx) = unbounded();
        let shared = Arc::new(SharedState {
            closed: AtomicBool::new(false),
            in_channel_mode: AtomicBool::new(false),
            queue_len: AtomicUsize::new(0),
            last_submit_nanos: AtomicU64::new(0),
            last_reply_nanos: AtomicU64::new(0),
            start: Instant::now(),
            join: Mutex::new(None),
        });

        let reactor = Reactor {
            stream: mio_stream,
            poll,
            decoder: Decoder::new(),
            queue: std::collections::VecDeque::new(),
            listeners: HashMap::with_hasher(FxBuildHasher),
            last_registered_hash: None,
            mode: Mode::Normal,
            outbound: BytesMut::new(),
            cmd_rx,
            closed: false,
            shared: Arc::clone(&shared),
        };

        let join = std::thread::Builder::new()
            .name("redpipe-reactor".into())
            .spawn(move || reactor.run())
            .map_err(std::io::Error::from)?;
        *shared.join.lock() = Some(join);

        Ok(Client {
            cmd_tx,
            waker,
            shared,
            handles: Arc::new(AtomicUsize::new(1)),
        })
    }

    /// Submit one pre-encoded command; `completion` fires exactly once,
    /// on the reactor thread, with the matching reply (in FIFO order
    /// relative to other submits) or the error that prevented one.
    pub fn submit(
        &self,
        request: Bytes,
        completion: impl FnOnce(Result<Reply, RedisError>) + Send + 'static,
    ) {
        if self.shared.closed.load(Ordering::Acquire) {
            completion(Err(RedisError::ConnectionClosed));
            return;
        }
        log::debug!("submit: {} bytes", request.len());
        let completion: Completion = Box::new(completion);
        if let Err(err) = self.cmd_tx.send(ReactorCmd::Submit { request, completion }) {
            // Reactor thread is gone; recover the completion from the
            // returned command rather than letting it drop unfired.
            if let ReactorCmd::Submit { completion, .. } = err.into_inner() {
                invoke_completion(completion, Err(RedisError::ConnectionClosed));
            }
            return;
        }
        let _ = self.waker.wake();
    }

    /// Subscribe to a channel (`is_pattern = false`) or pattern
    /// (`is_pattern = true`). Idempotently switches the connection into
    /// channel mode.
    pub fn subscribe(
        &self,
        channel: impl Into<SmolStr>,
        is_pattern: bool,
        listener: impl FnMut(Result<Bytes, RedisError>) + Send + 'static,
    ) {
        let cmd = ReactorCmd::Subscribe {
            channel: channel.into(),
            is_pattern,
            listener: Box::new(listener),
        };
        if self.cmd_tx.send(cmd).is_ok() {
            let _ = self.waker.wake();
        }
    }

    pub fn unsubscribe(&self, channel: impl Into<SmolStr>, is_pattern: bool) {
        let cmd = ReactorCmd::Unsubscribe {
            channel: channel.into(),
            is_pattern,
        };
        if self.cmd_tx.send(cmd).is_ok() {
            let _ = self.waker.wake();
        }
    }

    /// Fail every in-flight completion with `ConnectionClosed`, then
    /// close the transport. Idempotent.
    pub fn disconnect(&self) {
        if self
            .shared
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            let _ = self.cmd_tx.send(ReactorCmd::Disconnect);
            let _ = self.waker.wake();
        }
    }

    /// Alias for [`Client::disconnect`].
    pub fn shutdown(&self) {
        self.disconnect();
    }

    pub fn mode(&self) -> Mode {
        if self.shared.in_channel_mode.load(Ordering::Acquire) {
            Mode::Channel
        } else {
            Mode::Normal
        }
    }

    /// Time since the last completed reply, or zero while commands are
    /// in flight. Informational only; never affects protocol behavior.
    pub fn idle_time(&self) -> Duration {
        if self.shared.queue_len.load(Ordering::Relaxed) == 0 {
            self.shared
                .elapsed_since(self.shared.last_reply_nanos.load(Ordering::Relaxed))
        } else {
            Duration::ZERO
        }
    }

    /// Time since the last completed reply while commands remain in
    /// flight, or zero when idle. Informational only.
    pub fn busy_time(&self) -> Duration {
        if self.shared.queue_len.load(Ordering::Relaxed) != 0 {
            self.shared
                .elapsed_since(self.shared.last_reply_nanos.load(Ordering::Relaxed))
        } else {
            Duration::ZERO
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // `shared` is also held by the reactor thread for its whole
        // lifetime, so its strong count never reaches 1 on its own;
        // `handles` counts only live `Client`s and is what must reach
        // zero before tearing the reactor down.
        if self.handles.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.disconnect();
            if let Some(handle) = self.shared.join.lock().take() {
                let _ = handle.join();
            }
        }
    }
}

struct Reactor {
    stream: MioTcpStream,
    poll: Poll,
    decoder: Decoder,
    queue: std::collections::VecDeque<Completion>,
    listeners: HashMap<u32, (SmolStr, MessageListener), FxBuildHasher>,
    last_registered_hash: Option<u32>,
    mode: Mode,
    outbound: BytesMut,
    cmd_rx: Receiver<ReactorCmd>,
    closed: bool,
    shared: Arc<SharedState>,
}

impl Reactor {
    fn run(mut self) {
        let mut events = Events::with_capacity(128);
        while !self.closed {
            if let Err(e) = self.poll.poll(&mut events, None) {
                log::error!("reactor poll failed: {e}");
                self.fail_all(|| RedisError::ConnectionClosed);
                break;
            }
            for ev in events.iter() {
                match ev.token() {
                    SOCKET => {
                        if ev.is_readable() {
                            self.handle_readable();
                        }
                        if !self.closed && ev.is_writable() {
                            self.try_write();
                        }
                    }
                    WAKER => self.drain_commands(),
                    _ => {}
                }
            }
        }
        self.shared.closed.store(true, Ordering::Release);
    }

    fn drain_commands(&mut self) {
        loop {
            match self.cmd_rx.try_recv() {
                Ok(cmd) => self.handle_cmd(cmd),
                Err(crossbeam::channel::TryRecvError::Empty) => break,
                Err(crossbeam::channel::TryRecvError::Disconnected) => {
                    self.do_disconnect();
                    break;
                }
            }
            if self.closed {
                break;
            }
        }
    }

    fn handle_cmd(&mut self, cmd: ReactorCmd) {
        match cmd {
            ReactorCmd::Submit { request, completion } => {
                if self.mode == Mode::Channel {
                    invoke_completion(completion, Err(RedisError::ModeViolation));
                    return;
                }
                self.queue.push_back(completion);
                self.shared.queue_len.store(self.queue.len(), Ordering::Relaxed);
                self.shared.mark_submit();
                self.outbound.extend_from_slice(&request);
                self.try_write();
            }
            ReactorCmd::Subscribe {
                channel,
                is_pattern,
                listener,
            } => {
                if self.mode == Mode::Normal {
                    log::info!("entering channel mode (subscribing to {channel})");
                }
                self.mode = Mode::Channel;
                self.shared.in_channel_mode.store(true, Ordering::Release);
                let h = channel_hash(channel.as_bytes());
                self.last_registered_hash = Some(h);
                // Collisions on `h` deliver to the first registered
                // listener; a later subscribe that lands on the same
                // slot must not displace it.
                self.listeners
                    .entry(h)
                    .or_insert_with(|| (channel.clone(), listener));

                let tok = if is_pattern {
                    Command::PSubscribe
                } else {
                    Command::Subscribe
                };
                let mut buf = BytesMut::new();
                begin_command(&mut buf, tok.as_bytes(), 1);
                write_bulk(&mut buf, channel.as_bytes());
                self.outbound.extend_from_slice(&buf);
                self.try_write();
            }
            ReactorCmd::Unsubscribe { channel, is_pattern } => {
                let h = channel_hash(channel.as_bytes());
                self.listeners.remove(&h);

                let tok = if is_pattern {
                    Command::PUnsubscribe
                } else {
                    Command::Unsubscribe
                };
                let mut buf = BytesMut::new();
                begin_command(&mut buf, tok.as_bytes(), 1);
                write_bulk(&mut buf, channel.as_bytes());
                self.outbound.extend_from_slice(&buf);
                self.try_write();
            }
            ReactorCmd::Disconnect => self.do_disconnect(),
        }
    }

    fn handle_readable(&mut self) {
        let mut tmp = [0u8; READ_BUF];
        loop {
            match self.stream.read(&mut tmp) {
                Ok(0) => {
                    self.fail_all(|| RedisError::ConnectionClosed);
                    self.closed = true;
                    return;
                }
                Ok(n) => {
                    let mut replies = Vec::new();
                    let outcome = self.decoder.feed(&tmp[..n], |r| replies.push(r));
                    for reply in replies {
                        self.dispatch_reply(reply);
                    }
                    if let Err(e) = outcome {
                        log::warn!("protocol error, failing connection: {e}");
                        let msg = e.to_string();
                        self.fail_all(move || RedisError::protocol(msg.clone()));
                        self.closed = true;
                        return;
                    }
                }
                Err(ref e) if would_block(e) => return,
                Err(_) => {
                    self.fail_all(|| RedisError::ConnectionClosed);
                    self.closed = true;
                    return;
                }
            }
        }
    }

    fn dispatch_reply(&mut self, reply: Reply) {
        log::trace!("dispatching reply: {reply:?}");
        match self.mode {
            Mode::Normal => {
                let is_err = reply.is_error();
                match self.queue.pop_front() {
                    Some(completion) => {
                        self.shared.queue_len.store(self.queue.len(), Ordering::Relaxed);
                        self.shared.mark_reply();
                        let result = if is_err {
                            let text = reply.as_error().unwrap_or(b"").to_vec();
                            Err(RedisError::remote(Bytes::from(text)))
                        } else {
                            Ok(reply)
                        };
                        invoke_completion(completion, result);
                    }
                    None => {
                        log::warn!("unsolicited reply with no in-flight completion");
                    }
                }
            }
            Mode::Channel => self.dispatch_channel_reply(reply),
        }
    }

    fn dispatch_channel_reply(&mut self, reply: Reply) {
        if reply.is_error() {
            let text = reply.as_error().unwrap_or(b"").to_vec();
            self.deliver_channel_error(RedisError::remote(Bytes::from(text)));
            return;
        }

        let Some(items) = reply.as_array() else {
            log::warn!("channel-mode reply was not an array");
            return;
        };

        match items.len() {
            3 => {
                let kind = items[0].as_bulk().unwrap_or(b"");
                let subject = items[1].as_bulk().unwrap_or(b"");
                if is_message_kind(kind) {
                    self.deliver_message(subject, &items[2]);
                } else if kind == b"unsubscribe" || kind == b"punsubscribe" {
                    let h = channel_hash(subject);
                    self.listeners.remove(&h);
                    if self.listeners.is_empty() {
                        self.mode = Mode::Normal;
                        self.shared.in_channel_mode.store(false, Ordering::Release);
                        log::info!("channel-listener map empty, returning to normal mode");
                    }
                }
                // subscribe/psubscribe acknowledgements are dropped silently.
            }
            4 => {
                let kind = items[0].as_bulk().unwrap_or(b"");
                let pattern = items[1].as_bulk().unwrap_or(b"");
                if is_pmessage_kind(kind) {
                    self.deliver_message(pattern, &items[3]);
                }
            }
            _ => {
                log::warn!("unexpected channel-mode reply shape ({} elements)", items.len());
            }
        }
    }

    fn deliver_message(&mut self, subject: &[u8], payload: &Reply) {
        let h = channel_hash(subject);
        let Some((_, listener)) = self.listeners.get_mut(&h) else {
            return;
        };
        match payload.as_bulk() {
            Some(bytes) => listener(Ok(Bytes::copy_from_slice(bytes))),
            None => {
                // An InvariantViolation is surfaced to the host, not to
                // a user callback; drop the malformed message.
                log::warn!("message payload for hash {h} was not a bulk string, dropping");
            }
        }
    }

    fn deliver_channel_error(&mut self, err: RedisError) {
        let target = self
            .last_registered_hash
            .filter(|h| self.listeners.contains_key(h))
            .or_else(|| self.listeners.keys().next().copied());
        match target {
            Some(h) => {
                if let Some((_, listener)) = self.listeners.get_mut(&h) {
                    listener(Err(err));
                }
            }
            None => log::warn!("channel-mode error with no listener to deliver to: {err}"),
        }
    }

    fn try_write(&mut self) {
        while !self.outbound.is_empty() {
            match self.stream.write(&self.outbound) {
                Ok(0) => break,
                Ok(n) => {
                    let _ = self.outbound.split_to(n);
                }
                Err(ref e) if would_block(e) => break,
                Err(_) => {
                    self.fail_all(|| RedisError::ConnectionClosed);
                    self.closed = true;
                    return;
                }
            }
        }
    }

    fn do_disconnect(&mut self) {
        self.fail_all(|| RedisError::ConnectionClosed);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        self.closed = true;
    }

    fn fail_all(&mut self, mut make_err: impl FnMut() -> RedisError) {
        if matches!(make_err(), RedisError::ConnectionClosed) {
            log::error!("connection closed; failing all in-flight completions and listeners");
        }
        while let Some(completion) = self.queue.pop_front() {
            invoke_completion(completion, Err(make_err()));
        }
        self.shared.queue_len.store(0, Ordering::Relaxed);
        if self.mode == Mode::Channel {
            for (_, listener) in self.listeners.values_mut() {
                listener(Err(make_err()));
            }
        }
    }
}

fn invoke_completion(completion: Completion, result: Result<Reply, RedisError>) {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
        completion(result);
    }));
    if outcome.is_err() {
        log::error!("panic inside a completion callback; in-flight queue is unaffected");
    }
}

fn would_block(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
    )
}
