/*!
 * RESP encoder
 *
 * Two primitives, both append-only onto a caller-provided buffer: array
 * headers and bulk strings. Together they are the only shapes a client
 * ever needs to send — every outbound command is an array of bulk
 * strings (see `commands.rs`).
 */

use crate::numeric::write_int_crlf;
use bytes::BytesMut;

/// Emit `*<n>\r\n`.
#[inline]
pub fn write_array(buf: &mut BytesMut, n: i64) {
    buf.extend_from_slice(b"*");
    write_int_crlf(buf, n);
}

/// Emit `$<len(bytes)>\r\n<bytes>\r\n`. Binary-safe: the content of
/// `bytes` is never inspected.
#[inline]
pub fn write_bulk(buf: &mut BytesMut, bytes: &[u8]) {
    buf.extend_from_slice(b"$");
    write_int_crlf(buf, bytes.len() as i64);
    buf.extend_from_slice(bytes);
    buf.extend_from_slice(b"\r\n");
}

/// Begin a command: write the array header for `1 + n_args` elements and
/// the command name as the first bulk string.
#[inline]
pub fn begin_command(buf: &mut BytesMut, name: &[u8], n_args: usize) {
    write_array(buf, 1 + n_args as i64);
    write_bulk(buf, name);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_header() {
        let mut buf = BytesMut::new();
        write_array(&mut buf, 3);
        assert_eq!(&buf[..], b"*3\r\n");
    }

    #[test]
    fn bulk_string_roundtrip_shape() {
        let mut buf = BytesMut::new();
        write_bulk(&mut buf, b"hello");
        assert_eq!(&buf[..], b"$5\r\nhello\r\n");
    }

    #[test]
    fn bulk_string_is_binary_safe() {
        let mut buf = BytesMut::new();
        write_bulk(&mut buf, b"\x00\r\n\xff");
        assert_eq!(&buf[..], b"$4\r\n\x00\r\n\xff\r\n");
    }

    #[test]
    fn empty_bulk_string() {
        let mut buf = BytesMut::new();
        write_bulk(&mut buf, b"");
        assert_eq!(&buf[..], b"$0\r\n\r\n");
    }

    #[test]
    fn ping_command_shape() {
        let mut buf = BytesMut::new();
        begin_command(&mut buf, b"PING", 0);
        assert_eq!(&buf[..], b"*1\r\n$4\r\nPING\r\n");
    }

    #[test]
    fn set_command_shape() {
        let mut buf = BytesMut::new();
        begin_command(&mut buf, b"SET", 2);
        write_bulk(&mut buf, b"hello");
        write_bulk(&mut buf, b"world");
        assert_eq!(&buf[..], b"*3\r\n$3\r\nSET\r\n$5\r\nhello\r\n$5\r\nworld\r\n");
    }
}
