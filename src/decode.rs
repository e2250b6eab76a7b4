/*!
 * RESP decoder / state machine
 *
 * Turns inbound byte chunks of arbitrary size — including chunks that
 * split a token in the middle — into a stream of `Reply` values. The
 * decoder is a pure sink: it never reaches back into the connection
 * that owns it, it only calls the `emit` closure it is handed for each
 * completed top-level reply (see `conn.rs`, which supplies that
 * closure).
 *
 * Buffering uses a persistent accumulator (`BytesMut`) rather than a
 * checkpoint/rewind scheme, since the `mio` transport this crate pairs
 * the decoder with cannot rewind.
 */

use crate::error::RedisError;
use crate::reply::Reply;
use bytes::{Buf, Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    SimpleString,
    Error,
    Integer,
    BulkLen,
    BulkBody { len: usize },
    ArrayLen,
}

/// One partially filled array on the array-in-progress stack.
struct Frame {
    remaining: usize,
    items: Vec<Reply>,
}

pub struct Decoder {
    state: State,
    acc: BytesMut,
    stack: Vec<Frame>,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Decoder {
            state: State::Idle,
            acc: BytesMut::new(),
            stack: Vec::new(),
        }
    }

    /// True when the decoder sits at a clean token boundary: no bytes
    /// buffered and no array in progress.
    pub fn is_idle(&self) -> bool {
        self.state == State::Idle && self.acc.is_empty() && self.stack.is_empty()
    }

    /// Feed one chunk of inbound bytes, calling `emit` once per fully
    /// parsed top-level reply, in order. Returns a protocol error on
    /// malformed input; the decoder must not be fed further bytes after
    /// that (the connection core treats it as fatal).
    pub fn feed(
        &mut self,
        data: &[u8],
        mut emit: impl FnMut(Reply),
    ) -> Result<(), RedisError> {
        self.acc.extend_from_slice(data);

        loop {
            match self.state {
                State::Idle => {
                    if self.acc.is_empty() {
                        return Ok(());
                    }
                    let tag = self.acc[0];
                    self.acc.advance(1);
                    self.state = match tag {
                        b'+' => State::SimpleString,
                        b'-' => State::Error,
                        b':' => State::Integer,
                        b'$' => State::BulkLen,
                        b'*' => State::ArrayLen,
                        other => {
                            return Err(RedisError::protocol(format!(
                                "unknown type byte {:?}",
                                other as char
                            )))
                        }
                    };
                }

                State::BulkBody { len } => {
                    let need = len + 2;
                    if self.acc.len() < need {
                        return Ok(());
                    }
                    let body = self.acc.split_to(len).freeze();
                    self.acc.advance(2);
                    self.state = State::Idle;
                    self.resolve(Reply::BulkString(Some(body)), &mut emit);
                }

                State::SimpleString | State::Error | State::Integer | State::BulkLen
                | State::ArrayLen => {
                    let Some(line) = take_line(&mut self.acc) else {
                        return Ok(());
                    };
                    self.advance_line(line, &mut emit)?;
                }
            }
        }
    }

    fn advance_line(
        &mut self,
        line: Bytes,
        emit: &mut impl FnMut(Reply),
    ) -> Result<(), RedisError> {
        match self.state {
            State::SimpleString => {
                self.state = State::Idle;
                self.resolve(Reply::SimpleString(line), emit);
            }
            State::Error => {
                self.state = State::Idle;
                self.resolve(Reply::Error(line), emit);
            }
            State::Integer => {
                let n = parse_i64(&line)?;
                self.state = State::Idle;
                self.resolve(Reply::Integer(n), emit);
            }
            State::BulkLen => {
                let n = parse_i64(&line)?;
                if n == -1 {
                    self.state = State::Idle;
                    self.resolve(Reply::BulkString(None), emit);
                } else if n < 0 {
                    return Err(RedisError::protocol(format!(
                        "negative bulk length {n}"
                    )));
                } else {
                    self.state = State::BulkBody { len: n as usize };
                }
            }
            State::ArrayLen => {
                let n = parse_i64(&line)?;
                self.state = State::Idle;
                if n == -1 {
                    self.resolve(Reply::Array(None), emit);
                } else if n < 0 {
                    return Err(RedisError::protocol(format!(
                        "negative array length {n}"
                    )));
                } else if n == 0 {
                    self.resolve(Reply::Array(Some(Vec::new())), emit);
                } else {
                    self.stack.push(Frame {
                        remaining: n as usize,
                        items: Vec::with_capacity(n as usize),
                    });
                }
            }
            State::Idle | State::BulkBody { .. } => unreachable!("line-based state only"),
        }
        Ok(())
    }

    /// Fold a completed value into the top array frame, if any, popping
    /// and re-folding any frames that become full; emit at the top
    /// level only.
    fn resolve(&mut self, value: Reply, emit: &mut impl FnMut(Reply)) {
        let mut v = value;
        loop {
            match self.stack.last_mut() {
                None => {
                    emit(v);
                    return;
                }
                Some(frame) => {
                    frame.items.push(v);
                    if frame.items.len() == frame.remaining {
                        let frame = self.stack.pop().expect("just matched Some");
                        v = Reply::Array(Some(frame.items));
                    } else {
                        return;
                    }
                }
            }
        }
    }
}

/// Pull one `\r\n`-terminated line out of `acc`, consuming the line and
/// its terminator. Returns `None` (and leaves `acc` untouched) if no
/// `\r\n` is present yet.
fn take_line(acc: &mut BytesMut) -> Option<Bytes> {
    let end = memchr_crlf(acc)?;
    let line = acc.split_to(end).freeze();
    acc.advance(2);
    Some(line)
}

fn memchr_crlf(data: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i + 1 < data.len() {
        if data[i] == b'\r' && data[i + 1] == b'\n' {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Decimal with optional leading `-`; any other byte is a protocol error.
fn parse_i64(line: &[u8]) -> Result<i64, RedisError> {
    if line.is_empty() {
        return Err(RedisError::protocol("empty numeric field"));
    }
    let (neg, digits) = match line[0] {
        b'-' => (true, &line[1..]),
        _ => (false, line),
    };
    if digits.is_empty() {
        return Err(RedisError::protocol("numeric field has no digits"));
    }
    let mut n: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(RedisError::protocol(format!(
                "invalid digit {:?} in numeric field",
                b as char
            )));
        }
        n = n
            .checked_mul(10)
            .and_then(|n| n.checked_add((b - b'0') as i64))
            .ok_or_else(|| RedisError::protocol("numeric field overflows i64"))?;
    }
    Ok(if neg { -n } else { n })
}
