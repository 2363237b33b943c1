//! Command dispatch over the store's operation surface.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use super::resp::{Reply, Request};
use crate::error::Error;
use crate::store::Store;

/// Executes one request against the store. The second element is true when
/// the connection should close after the reply is written.
pub fn dispatch(request: &Request, store: &Arc<dyn Store>) -> (Reply, bool) {
    let Some(name) = request.first() else {
        return (Reply::Error("ERR empty command".to_string()), false);
    };
    let name = String::from_utf8_lossy(name).to_ascii_lowercase();
    let args = &request[1..];

    let reply = match name.as_str() {
        "ping" => Reply::Simple("PONG"),
        "quit" => return (Reply::Simple("OK"), true),
        "set" => cmd_set(&name, args, store),
        "get" => cmd_get(&name, args, store),
        "del" => cmd_del(&name, args, store),
        "keys" => cmd_keys(&name, args, store),
        "exists" => cmd_exists(&name, args, store),
        "expire" => cmd_expire(&name, args, store),
        "ttl" => cmd_ttl(&name, args, store),
        _ => Reply::Error(format!("ERR unknown command '{name}'")),
    };
    (reply, false)
}

fn wrong_arity(name: &str) -> Reply {
    Reply::Error(format!("ERR wrong number of arguments for '{name}' command"))
}

fn engine_error(err: Error) -> Reply {
    Reply::Error(format!("ERR {err}"))
}

fn utf8_key<'a>(bytes: &'a [u8], name: &str) -> Result<&'a str, Reply> {
    std::str::from_utf8(bytes)
        .map_err(|_| Reply::Error(format!("ERR invalid key for '{name}' command")))
}

fn cmd_set(name: &str, args: &[Vec<u8>], store: &Arc<dyn Store>) -> Reply {
    if args.len() != 2 {
        return wrong_arity(name);
    }
    let key = match utf8_key(&args[0], name) {
        Ok(key) => key,
        Err(reply) => return reply,
    };
    match store.set(key, &args[1]) {
        Ok(()) => Reply::Simple("OK"),
        Err(e) => engine_error(e),
    }
}

fn cmd_get(name: &str, args: &[Vec<u8>], store: &Arc<dyn Store>) -> Reply {
    if args.len() != 1 {
        return wrong_arity(name);
    }
    let key = match utf8_key(&args[0], name) {
        Ok(key) => key,
        Err(reply) => return reply,
    };
    match store.get(key) {
        Ok(value) => Reply::Bulk(value),
        // An absent or lapsed key is a null reply, not an error.
        Err(Error::KeyMissing | Error::KeyExpired) => Reply::Null,
        Err(e) => engine_error(e),
    }
}

fn cmd_del(name: &str, args: &[Vec<u8>], store: &Arc<dyn Store>) -> Reply {
    if args.len() != 1 {
        return wrong_arity(name);
    }
    let key = match utf8_key(&args[0], name) {
        Ok(key) => key,
        Err(reply) => return reply,
    };
    // The tombstone write succeeds whether or not the key existed; only a
    // failed write reports 0.
    match store.delete(key) {
        Ok(()) => Reply::Integer(1),
        Err(_) => Reply::Integer(0),
    }
}

fn cmd_keys(name: &str, args: &[Vec<u8>], store: &Arc<dyn Store>) -> Reply {
    if args.len() != 1 {
        return wrong_arity(name);
    }
    let pattern = match utf8_key(&args[0], name) {
        Ok(pattern) => pattern,
        Err(reply) => return reply,
    };
    match store.keys(pattern) {
        Ok(keys) => Reply::Array(keys.into_iter().map(String::into_bytes).collect()),
        Err(e) => engine_error(e),
    }
}

fn cmd_exists(name: &str, args: &[Vec<u8>], store: &Arc<dyn Store>) -> Reply {
    if args.len() != 1 {
        return wrong_arity(name);
    }
    let key = match utf8_key(&args[0], name) {
        Ok(key) => key,
        Err(reply) => return reply,
    };
    Reply::Integer(store.exists(key) as i64)
}

fn cmd_expire(name: &str, args: &[Vec<u8>], store: &Arc<dyn Store>) -> Reply {
    if args.len() < 2 {
        return wrong_arity(name);
    }
    let key = match utf8_key(&args[0], name) {
        Ok(key) => key,
        Err(reply) => return reply,
    };
    let seconds = match std::str::from_utf8(&args[1])
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
    {
        Some(seconds) if seconds >= 0 => seconds,
        _ => return Reply::Integer(-2),
    };

    let at = SystemTime::now() + Duration::from_secs(seconds as u64);
    match store.expire(key, at) {
        Ok(()) => Reply::Integer(1),
        Err(_) => Reply::Integer(-1),
    }
}

fn cmd_ttl(name: &str, args: &[Vec<u8>], store: &Arc<dyn Store>) -> Reply {
    if args.len() != 1 {
        return wrong_arity(name);
    }
    let key = match utf8_key(&args[0], name) {
        Ok(key) => key,
        Err(reply) => return reply,
    };
    match store.ttl(key) {
        Ok(ttl) => Reply::Integer(ttl),
        Err(e) => engine_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::lsht::LshtStore;
    use tempfile::TempDir;

    fn request(parts: &[&[u8]]) -> Request {
        parts.iter().map(|p| p.to_vec()).collect()
    }

    fn test_store(dir: &TempDir) -> Arc<dyn Store> {
        Arc::new(LshtStore::open(Config::new(dir.path())).unwrap())
    }

    #[test]
    fn test_ping_and_quit() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        assert_eq!(
            dispatch(&request(&[b"PING"]), &store),
            (Reply::Simple("PONG"), false)
        );
        assert_eq!(
            dispatch(&request(&[b"QUIT"]), &store),
            (Reply::Simple("OK"), true)
        );
    }

    #[test]
    fn test_set_get_del_flow() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let (reply, _) = dispatch(&request(&[b"SET", b"foo", b"bar"]), &store);
        assert_eq!(reply, Reply::Simple("OK"));

        let (reply, _) = dispatch(&request(&[b"GET", b"foo"]), &store);
        assert_eq!(reply, Reply::Bulk(b"bar".to_vec()));

        let (reply, _) = dispatch(&request(&[b"DEL", b"foo"]), &store);
        assert_eq!(reply, Reply::Integer(1));

        let (reply, _) = dispatch(&request(&[b"GET", b"foo"]), &store);
        assert_eq!(reply, Reply::Null);

        // DEL of an absent key still reports 1: the tombstone landed.
        let (reply, _) = dispatch(&request(&[b"DEL", b"never"]), &store);
        assert_eq!(reply, Reply::Integer(1));
    }

    #[test]
    fn test_exists_and_keys() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        dispatch(&request(&[b"SET", b"a", b"1"]), &store);
        let (reply, _) = dispatch(&request(&[b"EXISTS", b"a"]), &store);
        assert_eq!(reply, Reply::Integer(1));
        let (reply, _) = dispatch(&request(&[b"EXISTS", b"b"]), &store);
        assert_eq!(reply, Reply::Integer(0));

        let (reply, _) = dispatch(&request(&[b"KEYS", b"*"]), &store);
        assert_eq!(reply, Reply::Array(vec![b"a".to_vec()]));

        let (reply, _) = dispatch(&request(&[b"KEYS", b"["]), &store);
        assert!(matches!(reply, Reply::Error(_)));
    }

    #[test]
    fn test_expire_and_ttl() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        dispatch(&request(&[b"SET", b"k", b"v"]), &store);

        let (reply, _) = dispatch(&request(&[b"TTL", b"k"]), &store);
        assert_eq!(reply, Reply::Integer(-1));

        let (reply, _) = dispatch(&request(&[b"EXPIRE", b"k", b"100"]), &store);
        assert_eq!(reply, Reply::Integer(1));

        let (reply, _) = dispatch(&request(&[b"TTL", b"k"]), &store);
        match reply {
            Reply::Integer(ttl) => assert!((98..=100).contains(&ttl)),
            other => panic!("expected integer, got {other:?}"),
        }

        // Bad seconds and missing keys use the sentinel integers.
        let (reply, _) = dispatch(&request(&[b"EXPIRE", b"k", b"soon"]), &store);
        assert_eq!(reply, Reply::Integer(-2));
        let (reply, _) = dispatch(&request(&[b"EXPIRE", b"ghost", b"10"]), &store);
        assert_eq!(reply, Reply::Integer(-1));
    }

    #[test]
    fn test_arity_and_unknown_command() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let (reply, _) = dispatch(&request(&[b"SET", b"only-key"]), &store);
        assert!(matches!(reply, Reply::Error(msg) if msg.contains("wrong number")));

        let (reply, _) = dispatch(&request(&[b"FLUSHALL"]), &store);
        assert!(matches!(reply, Reply::Error(msg) if msg.contains("unknown command")));
    }
}
