/*!
 * Command & keyword token catalog
 *
 * Pre-encoded byte forms for every command and keyword token this crate
 * writes on the wire. Tokens are built once (as `'static` byte slices)
 * and shared; `commands.rs` never re-encodes a literal per call.
 */

macro_rules! tokens {
    ($vis:vis enum $name:ident { $($variant:ident => $bytes:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant),+
        }

        impl $name {
            #[inline]
            $vis fn as_bytes(self) -> &'static [u8] {
                match self {
                    $(Self::$variant => $bytes),+
                }
            }
        }
    };
}

tokens! {
    pub enum Command {
        Ping => b"PING",
        Get => b"GET",
        Set => b"SET",
        MGet => b"MGET",
        MSet => b"MSET",
        Del => b"DEL",
        Exists => b"EXISTS",
        Incr => b"INCR",
        IncrBy => b"INCRBY",
        Append => b"APPEND",
        Expire => b"EXPIRE",
        Ttl => b"TTL",
        HSet => b"HSET",
        HGet => b"HGET",
        HGetAll => b"HGETALL",
        LPush => b"LPUSH",
        RPush => b"RPUSH",
        LRange => b"LRANGE",
        SAdd => b"SADD",
        SMembers => b"SMEMBERS",
        Sort => b"SORT",
        Subscribe => b"SUBSCRIBE",
        PSubscribe => b"PSUBSCRIBE",
        Unsubscribe => b"UNSUBSCRIBE",
        PUnsubscribe => b"PUNSUBSCRIBE",
        Publish => b"PUBLISH",
    }
}

tokens! {
    pub enum Keyword {
        Ex => b"ex",
        Px => b"px",
        Nx => b"nx",
        Xx => b"xx",
        By => b"by",
        Limit => b"limit",
        Get => b"get",
        Store => b"store",
        Asc => b"asc",
        Desc => b"desc",
        Alpha => b"alpha",
    }
}
