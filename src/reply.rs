/*!
 * Reply model
 *
 * A `Reply` is the parsed, owned form of one top-level RESP value. It is
 * immutable once constructed; consumers match on the variant rather than
 * relying on implicit coercions between them.
 */

use bytes::Bytes;

/// One parsed server reply.
///
/// `BulkString` and `Array` each have a distinct null state (RESP's
/// `$-1\r\n` and `*-1\r\n`), which is not the same as an empty value.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    SimpleString(Bytes),
    Error(Bytes),
    Integer(i64),
    BulkString(Option<Bytes>),
    Array(Option<Vec<Reply>>),
}

impl Reply {
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// The error text, if this is an `Error` reply.
    pub fn as_error(&self) -> Option<&[u8]> {
        match self {
            Reply::Error(b) => Some(b),
            _ => None,
        }
    }

    /// The bulk-string payload, if this is a non-null `BulkString`.
    pub fn as_bulk(&self) -> Option<&[u8]> {
        match self {
            Reply::BulkString(Some(b)) => Some(b),
            _ => None,
        }
    }

    /// The array elements, if this is a non-null `Array`.
    pub fn as_array(&self) -> Option<&[Reply]> {
        match self {
            Reply::Array(Some(v)) => Some(v),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_simple_string(&self) -> Option<&[u8]> {
        match self {
            Reply::SimpleString(b) => Some(b),
            _ => None,
        }
    }
}
