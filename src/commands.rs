/*!
 * Command helpers
 *
 * Thin, typed wrappers over [`Client::submit`]. Each helper (1) builds a
 * request buffer with the encoder and catalog tokens, (2) submits it to
 * the connection core, and (3) projects the reply variant the server is
 * expected to answer with onto the helper's declared return type.
 *
 * This is the surface the out-of-scope code generator would emit one of
 * per entry in the server's command catalog; these are hand-written in
 * its idiom, covering enough of the catalog (including SORT's
 * combinable BY/LIMIT/GET/STORE sub-blocks) to exercise every
 * projection rule in the spec.
 */

use crate::catalog::{Command, Keyword};
use crate::conn::Client;
use crate::encode::{begin_command, write_bulk};
use crate::error::RedisError;
use crate::numeric;
use crate::reply::Reply;

use bytes::{Bytes, BytesMut};

type Completion<T> = Box<dyn FnOnce(Result<T, RedisError>) + Send + 'static>;

fn write_bulk_int(buf: &mut BytesMut, n: i64) {
    let mut tmp = BytesMut::new();
    numeric::write_int(&mut tmp, n);
    write_bulk(buf, &tmp);
}

fn unexpected(expected: &str, got: &Reply) -> RedisError {
    RedisError::invariant(format!("expected {expected} reply, got {got:?}"))
}

/// SimpleString → text-or-null: a command that normally answers `+OK`
/// may instead answer with a null bulk (e.g. a conditional SET whose
/// condition failed).
fn project_simple_string(reply: Reply) -> Result<Option<Bytes>, RedisError> {
    match reply {
        Reply::SimpleString(b) => Ok(Some(b)),
        Reply::BulkString(None) | Reply::Array(None) => Ok(None),
        other => Err(unexpected("simple string", &other)),
    }
}

/// Integer → integer-or-null.
fn project_integer(reply: Reply) -> Result<Option<i64>, RedisError> {
    match reply {
        Reply::Integer(i) => Ok(Some(i)),
        Reply::BulkString(None) | Reply::Array(None) => Ok(None),
        other => Err(unexpected("integer", &other)),
    }
}

/// BulkString → bytes-or-null.
fn project_bulk(reply: Reply) -> Result<Option<Bytes>, RedisError> {
    match reply {
        Reply::BulkString(opt) => Ok(opt),
        Reply::Array(None) => Ok(None),
        other => Err(unexpected("bulk string", &other)),
    }
}

/// Array → array-or-null.
fn project_array(reply: Reply) -> Result<Option<Vec<Reply>>, RedisError> {
    match reply {
        Reply::Array(opt) => Ok(opt),
        Reply::BulkString(None) => Ok(None),
        other => Err(unexpected("array", &other)),
    }
}

fn submit_projected<T: Send + 'static>(
    client: &Client,
    request: BytesMut,
    project: fn(Reply) -> Result<T, RedisError>,
    completion: Completion<T>,
) {
    client.submit(request.freeze(), move |result| {
        completion(result.and_then(project));
    });
}

impl Client {
    pub fn ping(&self, completion: impl FnOnce(Result<Option<Bytes>, RedisError>) + Send + 'static) {
        let mut buf = BytesMut::new();
        begin_command(&mut buf, Command::Ping.as_bytes(), 0);
        submit_projected(self, buf, project_simple_string, Box::new(completion));
    }

    pub fn get(
        &self,
        key: impl AsRef<[u8]>,
        completion: impl FnOnce(Result<Option<Bytes>, RedisError>) + Send + 'static,
    ) {
        let mut buf = BytesMut::new();
        begin_command(&mut buf, Command::Get.as_bytes(), 1);
        write_bulk(&mut buf, key.as_ref());
        submit_projected(self, buf, project_bulk, Box::new(completion));
    }

    /// `SET key value [EX seconds | PX millis] [NX | XX]`. At most one
    /// of `ex`/`px` and at most one of `nx`/`xx` may be set; the header
    /// element count is adjusted for whichever optional tokens are
    /// present.
    pub fn set(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        options: SetOptions,
        completion: impl FnOnce(Result<Option<Bytes>, RedisError>) + Send + 'static,
    ) {
        let mut n_args = 2;
        if options.ex.is_some() {
            n_args += 2;
        }
        if options.px.is_some() {
            n_args += 2;
        }
        if options.nx {
            n_args += 1;
        }
        if options.xx {
            n_args += 1;
        }

        let mut buf = BytesMut::new();
        begin_command(&mut buf, Command::Set.as_bytes(), n_args);
        write_bulk(&mut buf, key.as_ref());
        write_bulk(&mut buf, value.as_ref());
        if let Some(secs) = options.ex {
            write_bulk(&mut buf, Keyword::Ex.as_bytes());
            write_bulk_int(&mut buf, secs);
        }
        if let Some(millis) = options.px {
            write_bulk(&mut buf, Keyword::Px.as_bytes());
            write_bulk_int(&mut buf, millis);
        }
        if options.nx {
            write_bulk(&mut buf, Keyword::Nx.as_bytes());
        }
        if options.xx {
            write_bulk(&mut buf, Keyword::Xx.as_bytes());
        }
        submit_projected(self, buf, project_simple_string, Box::new(completion));
    }

    pub fn mget(
        &self,
        keys: impl IntoIterator<Item = impl AsRef<[u8]>>,
        completion: impl FnOnce(Result<Option<Vec<Reply>>, RedisError>) + Send + 'static,
    ) {
        let keys: Vec<Vec<u8>> = keys.into_iter().map(|k| k.as_ref().to_vec()).collect();
        let mut buf = BytesMut::new();
        begin_command(&mut buf, Command::MGet.as_bytes(), keys.len());
        for k in &keys {
            write_bulk(&mut buf, k);
        }
        submit_projected(self, buf, project_array, Box::new(completion));
    }

    pub fn mset(
        &self,
        pairs: impl IntoIterator<Item = (impl AsRef<[u8]>, impl AsRef<[u8]>)>,
        completion: impl FnOnce(Result<Option<Bytes>, RedisError>) + Send + 'static,
    ) {
        let pairs: Vec<(Vec<u8>, Vec<u8>)> = pairs
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_vec(), v.as_ref().to_vec()))
            .collect();
        let mut buf = BytesMut::new();
        begin_command(&mut buf, Command::MSet.as_bytes(), pairs.len() * 2);
        for (k, v) in &pairs {
            write_bulk(&mut buf, k);
            write_bulk(&mut buf, v);
        }
        submit_projected(self, buf, project_simple_string, Box::new(completion));
    }

    pub fn del(
        &self,
        keys: impl IntoIterator<Item = impl AsRef<[u8]>>,
        completion: impl FnOnce(Result<Option<i64>, RedisError>) + Send + 'static,
    ) {
        let keys: Vec<Vec<u8>> = keys.into_iter().map(|k| k.as_ref().to_vec()).collect();
        let mut buf = BytesMut::new();
        begin_command(&mut buf, Command::Del.as_bytes(), keys.len());
        for k in &keys {
            write_bulk(&mut buf, k);
        }
        submit_projected(self, buf, project_integer, Box::new(completion));
    }

    pub fn exists(
        &self,
        key: impl AsRef<[u8]>,
        completion: impl FnOnce(Result<Option<i64>, RedisError>) + Send + 'static,
    ) {
        self.one_key_integer(Command::Exists, key, completion);
    }

    pub fn incr(
        &self,
        key: impl AsRef<[u8]>,
        completion: impl FnOnce(Result<Option<i64>, RedisError>) + Send + 'static,
    ) {
        self.one_key_integer(Command::Incr, key, completion);
    }

    pub fn incr_by(
        &self,
        key: impl AsRef<[u8]>,
        delta: i64,
        completion: impl FnOnce(Result<Option<i64>, RedisError>) + Send + 'static,
    ) {
        let mut buf = BytesMut::new();
        begin_command(&mut buf, Command::IncrBy.as_bytes(), 2);
        write_bulk(&mut buf, key.as_ref());
        write_bulk_int(&mut buf, delta);
        submit_projected(self, buf, project_integer, Box::new(completion));
    }

    pub fn append(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        completion: impl FnOnce(Result<Option<i64>, RedisError>) + Send + 'static,
    ) {
        let mut buf = BytesMut::new();
        begin_command(&mut buf, Command::Append.as_bytes(), 2);
        write_bulk(&mut buf, key.as_ref());
        write_bulk(&mut buf, value.as_ref());
        submit_projected(self, buf, project_integer, Box::new(completion));
    }

    pub fn expire(
        &self,
        key: impl AsRef<[u8]>,
        seconds: i64,
        completion: impl FnOnce(Result<Option<i64>, RedisError>) + Send + 'static,
    ) {
        let mut buf = BytesMut::new();
        begin_command(&mut buf, Command::Expire.as_bytes(), 2);
        write_bulk(&mut buf, key.as_ref());
        write_bulk_int(&mut buf, seconds);
        submit_projected(self, buf, project_integer, Box::new(completion));
    }

    pub fn ttl(
        &self,
        key: impl AsRef<[u8]>,
        completion: impl FnOnce(Result<Option<i64>, RedisError>) + Send + 'static,
    ) {
        self.one_key_integer(Command::Ttl, key, completion);
    }

    pub fn hset(
        &self,
        key: impl AsRef<[u8]>,
        field: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        completion: impl FnOnce(Result<Option<i64>, RedisError>) + Send + 'static,
    ) {
        let mut buf = BytesMut::new();
        begin_command(&mut buf, Command::HSet.as_bytes(), 3);
        write_bulk(&mut buf, key.as_ref());
        write_bulk(&mut buf, field.as_ref());
        write_bulk(&mut buf, value.as_ref());
        submit_projected(self, buf, project_integer, Box::new(completion));
    }

    pub fn hget(
        &self,
        key: impl AsRef<[u8]>,
        field: impl AsRef<[u8]>,
        completion: impl FnOnce(Result<Option<Bytes>, RedisError>) + Send + 'static,
    ) {
        let mut buf = BytesMut::new();
        begin_command(&mut buf, Command::HGet.as_bytes(), 2);
        write_bulk(&mut buf, key.as_ref());
        write_bulk(&mut buf, field.as_ref());
        submit_projected(self, buf, project_bulk, Box::new(completion));
    }

    pub fn hgetall(
        &self,
        key: impl AsRef<[u8]>,
        completion: impl FnOnce(Result<Option<Vec<Reply>>, RedisError>) + Send + 'static,
    ) {
        let mut buf = BytesMut::new();
        begin_command(&mut buf, Command::HGetAll.as_bytes(), 1);
        write_bulk(&mut buf, key.as_ref());
        submit_projected(self, buf, project_array, Box::new(completion));
    }

    pub fn lpush(
        &self,
        key: impl AsRef<[u8]>,
        values: impl IntoIterator<Item = impl AsRef<[u8]>>,
        completion: impl FnOnce(Result<Option<i64>, RedisError>) + Send + 'static,
    ) {
        self.push(Command::LPush, key, values, completion);
    }

    pub fn rpush(
        &self,
        key: impl AsRef<[u8]>,
        values: impl IntoIterator<Item = impl AsRef<[u8]>>,
        completion: impl FnOnce(Result<Option<i64>, RedisError>) + Send + 'static,
    ) {
        self.push(Command::RPush, key, values, completion);
    }

    pub fn lrange(
        &self,
        key: impl AsRef<[u8]>,
        start: i64,
        stop: i64,
        completion: impl FnOnce(Result<Option<Vec<Reply>>, RedisError>) + Send + 'static,
    ) {
        let mut buf = BytesMut::new();
        begin_command(&mut buf, Command::LRange.as_bytes(), 3);
        write_bulk(&mut buf, key.as_ref());
        write_bulk_int(&mut buf, start);
        write_bulk_int(&mut buf, stop);
        submit_projected(self, buf, project_array, Box::new(completion));
    }

    pub fn sadd(
        &self,
        key: impl AsRef<[u8]>,
        members: impl IntoIterator<Item = impl AsRef<[u8]>>,
        completion: impl FnOnce(Result<Option<i64>, RedisError>) + Send + 'static,
    ) {
        let members: Vec<Vec<u8>> = members.into_iter().map(|m| m.as_ref().to_vec()).collect();
        let mut buf = BytesMut::new();
        begin_command(&mut buf, Command::SAdd.as_bytes(), 1 + members.len());
        write_bulk(&mut buf, key.as_ref());
        for m in &members {
            write_bulk(&mut buf, m);
        }
        submit_projected(self, buf, project_integer, Box::new(completion));
    }

    pub fn smembers(
        &self,
        key: impl AsRef<[u8]>,
        completion: impl FnOnce(Result<Option<Vec<Reply>>, RedisError>) + Send + 'static,
    ) {
        let mut buf = BytesMut::new();
        begin_command(&mut buf, Command::SMembers.as_bytes(), 1);
        write_bulk(&mut buf, key.as_ref());
        submit_projected(self, buf, project_array, Box::new(completion));
    }

    pub fn publish(
        &self,
        channel: impl AsRef<[u8]>,
        message: impl AsRef<[u8]>,
        completion: impl FnOnce(Result<Option<i64>, RedisError>) + Send + 'static,
    ) {
        let mut buf = BytesMut::new();
        begin_command(&mut buf, Command::Publish.as_bytes(), 2);
        write_bulk(&mut buf, channel.as_ref());
        write_bulk(&mut buf, message.as_ref());
        submit_projected(self, buf, project_integer, Box::new(completion));
    }

    // -- SORT: one helper per non-empty combination of its BY/LIMIT/GET/STORE
    // sub-blocks that this crate exercises. Each sub-block writes its
    // keyword token followed by its own argument bulks.

    /// `SORT key` with no sub-blocks.
    pub fn sort(
        &self,
        key: impl AsRef<[u8]>,
        completion: impl FnOnce(Result<Option<Vec<Reply>>, RedisError>) + Send + 'static,
    ) {
        let mut buf = BytesMut::new();
        begin_command(&mut buf, Command::Sort.as_bytes(), 1);
        write_bulk(&mut buf, key.as_ref());
        submit_projected(self, buf, project_array, Box::new(completion));
    }

    /// `SORT key BY pattern LIMIT offset count`.
    pub fn sort_by_limit(
        &self,
        key: impl AsRef<[u8]>,
        by_pattern: impl AsRef<[u8]>,
        offset: i64,
        count: i64,
        completion: impl FnOnce(Result<Option<Vec<Reply>>, RedisError>) + Send + 'static,
    ) {
        let mut buf = BytesMut::new();
        begin_command(&mut buf, Command::Sort.as_bytes(), 1 + 2 + 3);
        write_bulk(&mut buf, key.as_ref());
        write_bulk(&mut buf, Keyword::By.as_bytes());
        write_bulk(&mut buf, by_pattern.as_ref());
        write_bulk(&mut buf, Keyword::Limit.as_bytes());
        write_bulk_int(&mut buf, offset);
        write_bulk_int(&mut buf, count);
        submit_projected(self, buf, project_array, Box::new(completion));
    }

    /// `SORT key GET pattern [GET pattern ...]`.
    pub fn sort_get(
        &self,
        key: impl AsRef<[u8]>,
        get_patterns: impl IntoIterator<Item = impl AsRef<[u8]>>,
        completion: impl FnOnce(Result<Option<Vec<Reply>>, RedisError>) + Send + 'static,
    ) {
        let patterns: Vec<Vec<u8>> = get_patterns.into_iter().map(|p| p.as_ref().to_vec()).collect();
        let mut buf = BytesMut::new();
        begin_command(&mut buf, Command::Sort.as_bytes(), 1 + patterns.len() * 2);
        write_bulk(&mut buf, key.as_ref());
        for p in &patterns {
            write_bulk(&mut buf, Keyword::Get.as_bytes());
            write_bulk(&mut buf, p);
        }
        submit_projected(self, buf, project_array, Box::new(completion));
    }

    /// `SORT key BY pattern STORE destination`: result count, not the
    /// sorted elements, is stored server-side under `destination`.
    pub fn sort_store(
        &self,
        key: impl AsRef<[u8]>,
        by_pattern: impl AsRef<[u8]>,
        destination: impl AsRef<[u8]>,
        completion: impl FnOnce(Result<Option<i64>, RedisError>) + Send + 'static,
    ) {
        let mut buf = BytesMut::new();
        begin_command(&mut buf, Command::Sort.as_bytes(), 1 + 2 + 2);
        write_bulk(&mut buf, key.as_ref());
        write_bulk(&mut buf, Keyword::By.as_bytes());
        write_bulk(&mut buf, by_pattern.as_ref());
        write_bulk(&mut buf, Keyword::Store.as_bytes());
        write_bulk(&mut buf, destination.as_ref());
        submit_projected(self, buf, project_integer, Box::new(completion));
    }

    fn one_key_integer(
        &self,
        cmd: Command,
        key: impl AsRef<[u8]>,
        completion: impl FnOnce(Result<Option<i64>, RedisError>) + Send + 'static,
    ) {
        let mut buf = BytesMut::new();
        begin_command(&mut buf, cmd.as_bytes(), 1);
        write_bulk(&mut buf, key.as_ref());
        submit_projected(self, buf, project_integer, Box::new(completion));
    }

    fn push(
        &self,
        cmd: Command,
        key: impl AsRef<[u8]>,
        values: impl IntoIterator<Item = impl AsRef<[u8]>>,
        completion: impl FnOnce(Result<Option<i64>, RedisError>) + Send + 'static,
    ) {
        let values: Vec<Vec<u8>> = values.into_iter().map(|v| v.as_ref().to_vec()).collect();
        let mut buf = BytesMut::new();
        begin_command(&mut buf, cmd.as_bytes(), 1 + values.len());
        write_bulk(&mut buf, key.as_ref());
        for v in &values {
            write_bulk(&mut buf, v);
        }
        submit_projected(self, buf, project_integer, Box::new(completion));
    }
}

/// Optional `SET` modifiers. At most one of `ex`/`px` and at most one of
/// `nx`/`xx` should be set; the helper does not validate mutual
/// exclusion, matching the server's own lenient-then-error behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    pub ex: Option<i64>,
    pub px: Option<i64>,
    pub nx: bool,
    pub xx: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;

    /// Spin up a loopback server that replies with a fixed, pre-scripted
    /// byte sequence to whatever the client writes, then hand back a
    /// connected `Client`.
    fn fake_server(script: &'static [u8]) -> Client {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut sock, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = sock.read(&mut buf);
                let _ = sock.write_all(script);
            }
        });
        Client::connect(addr).unwrap()
    }

    #[test]
    fn get_projects_bulk_string() {
        let client = fake_server(b"$5\r\nhello\r\n");
        let (tx, rx) = mpsc::channel();
        client.get("k", move |r| tx.send(r).unwrap());
        let result = rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
        assert_eq!(result.unwrap(), Some(Bytes::from_static(b"hello")));
    }

    #[test]
    fn set_with_nx_failing_projects_to_null() {
        let client = fake_server(b"$-1\r\n");
        let (tx, rx) = mpsc::channel();
        client.set(
            "k",
            "v",
            SetOptions {
                nx: true,
                ..Default::default()
            },
            move |r| tx.send(r).unwrap(),
        );
        let result = rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
        assert_eq!(result.unwrap(), None);
    }

    #[test]
    fn incr_projects_integer() {
        let client = fake_server(b":42\r\n");
        let (tx, rx) = mpsc::channel();
        client.incr("k", move |r| tx.send(r).unwrap());
        let result = rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
        assert_eq!(result.unwrap(), Some(42));
    }

    #[test]
    fn remote_error_short_circuits_projection() {
        let client = fake_server(b"-ERR no such key\r\n");
        let (tx, rx) = mpsc::channel();
        client.get("k", move |r| tx.send(r).unwrap());
        let result = rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
        assert!(matches!(result, Err(RedisError::RemoteError(_))));
    }
}
