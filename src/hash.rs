/*!
 * Channel-name hashing
 *
 * The channel-listener map (see `conn.rs`) is keyed by a 32-bit hash of
 * the channel or pattern name rather than the name itself, so dispatch
 * on an inbound `message`/`pmessage` only needs an integer compare.
 * Collisions deliver to the first registered listener for that hash, as
 * specified.
 */

use xxhash_rust::xxh3::xxh3_64;

/// 32-bit hash of a channel or pattern name's raw bytes.
#[inline]
pub fn channel_hash(name: &[u8]) -> u32 {
    (xxh3_64(name) & 0xffff_ffff) as u32
}

#[inline]
pub fn is_message_kind(kind: &[u8]) -> bool {
    kind == b"message"
}

#[inline]
pub fn is_pmessage_kind(kind: &[u8]) -> bool {
    kind == b"pmessage"
}
