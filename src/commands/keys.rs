//! Generic key commands.

use bytes::Bytes;

use super::args::{bool_int, bulk_array, int, is_opt, parse_i64};
use super::registry::CommandTable;
use crate::error::{CommandError, CommandResult};
use crate::protocol::RespValue;
use crate::storage::{unix_now, StorageEngine};

pub(super) fn register(table: &mut CommandTable) {
    table.write("del", -2, del);
    table.read("exists", -2, exists);
    table.read("keys", 2, keys);
    table.read("scan", -2, scan);
    table.write_with_rewrite("expire", -3, expire, rewrite_expire);
    table.write("expireat", -3, expireat);
    table.write("persist", 2, persist);
    table.read("ttl", 2, ttl);
    table.read("type", 2, key_type);
    table.write("rename", 3, rename);
}

/// DEL key [key ...]
fn del(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let keys = &args[1..];
    for key in keys {
        engine.check_ttl(key);
    }
    let _guard = engine.locks().lock_many(keys);
    let removed = keys
        .iter()
        .filter(|key| engine.remove_key(key).is_some())
        .count();
    Ok(int(removed))
}

/// EXISTS key [key ...]
///
/// A key named several times is counted each time.
fn exists(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let keys = &args[1..];
    for key in keys {
        engine.check_ttl(key);
    }
    let _guard = engine.locks().read_many(keys);
    let found = keys
        .iter()
        .filter(|key| engine.data().contains_key(key))
        .count();
    Ok(int(found))
}

/// KEYS pattern
fn keys(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    Ok(bulk_array(engine.keys(&args[1])))
}

/// SCAN cursor [MATCH pattern] [COUNT count] [TYPE type]
fn scan(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let cursor = parse_i64(&args[1])
        .ok()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| CommandError::Other("invalid cursor".into()))?;

    let mut pattern = None;
    let mut count = 10;
    let mut wanted_type = None;
    for pair in args[2..].chunks(2) {
        let [name, value] = pair else {
            return Err(CommandError::Syntax);
        };
        if is_opt(name, "MATCH") {
            pattern = Some(&value[..]);
        } else if is_opt(name, "COUNT") {
            count = usize::try_from(parse_i64(value)?)
                .ok()
                .filter(|&n| n > 0)
                .ok_or(CommandError::Syntax)?;
        } else if is_opt(name, "TYPE") {
            wanted_type = Some(value);
        } else {
            return Err(CommandError::Syntax);
        }
    }

    let (next, mut found) = engine.scan(cursor, count, pattern);
    if let Some(wanted) = wanted_type {
        found.retain(|key| {
            engine
                .data()
                .view(key, |value| is_opt(wanted, value.type_name()))
                .unwrap_or(false)
        });
    }
    Ok(RespValue::Array(vec![
        RespValue::bulk_string(next.to_string()),
        bulk_array(found),
    ]))
}

#[derive(Debug, Default, Clone, Copy)]
struct ExpireFlags {
    nx: bool,
    xx: bool,
    gt: bool,
    lt: bool,
}

fn parse_expire_flags(options: &[Bytes]) -> CommandResult<ExpireFlags> {
    let mut flags = ExpireFlags::default();
    for opt in options {
        if is_opt(opt, "NX") {
            flags.nx = true;
        } else if is_opt(opt, "XX") {
            flags.xx = true;
        } else if is_opt(opt, "GT") {
            flags.gt = true;
        } else if is_opt(opt, "LT") {
            flags.lt = true;
        } else {
            return Err(CommandError::UnknownOption(String::from_utf8_lossy(opt).into()));
        }
    }
    if flags.nx && (flags.xx || flags.gt || flags.lt) {
        return Err(CommandError::Other(
            "NX and XX, GT or LT options at the same time are not compatible".into(),
        ));
    }
    if flags.gt && flags.lt {
        return Err(CommandError::Other(
            "GT and LT options at the same time are not compatible".into(),
        ));
    }
    Ok(flags)
}

/// Applies an absolute expiry to `key`, honoring NX/XX/GT/LT.
///
/// An instant that is already due deletes the key.
fn apply_expiry(
    engine: &StorageEngine,
    key: &Bytes,
    at: i64,
    flags: ExpireFlags,
) -> CommandResult {
    engine.check_ttl(key);
    let _guard = engine.locks().lock(key);
    if !engine.data().contains_key(key) {
        return Ok(RespValue::Integer(0));
    }

    // A persistent key counts as an infinite TTL for GT/LT.
    let current = engine.expires_at(key);
    let allowed = match current {
        None => !flags.xx && !flags.gt,
        Some(cur) => !flags.nx && (!flags.gt || at > cur) && (!flags.lt || at < cur),
    };
    if !allowed {
        return Ok(RespValue::Integer(0));
    }

    if at <= unix_now() {
        engine.remove_key(key);
    } else {
        engine.set_ttl(key, at);
    }
    Ok(RespValue::Integer(1))
}

/// EXPIRE key seconds [NX|XX|GT|LT]
fn expire(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let secs = parse_i64(&args[2])?;
    let flags = parse_expire_flags(&args[3..])?;
    let at = unix_now()
        .checked_add(secs)
        .ok_or_else(|| CommandError::InvalidExpire("expire".into()))?;
    apply_expiry(engine, &args[1], at, flags)
}

/// EXPIREAT key unix-time-seconds [NX|XX|GT|LT]
fn expireat(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let at = parse_i64(&args[2])?;
    let flags = parse_expire_flags(&args[3..])?;
    apply_expiry(engine, &args[1], at, flags)
}

/// `EXPIRE k n [flags]` becomes `EXPIREAT k now+n [flags]`.
fn rewrite_expire(args: &[Bytes], now: i64) -> Option<Vec<Bytes>> {
    let secs = parse_i64(args.get(2)?).ok()?;
    let at = now.checked_add(secs)?;
    let mut out = Vec::with_capacity(args.len());
    out.push(Bytes::from_static(b"EXPIREAT"));
    out.push(args[1].clone());
    out.push(Bytes::from(at.to_string()));
    out.extend_from_slice(&args[3..]);
    Some(out)
}

/// PERSIST key
fn persist(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let key = &args[1];
    engine.check_ttl(key);
    let _guard = engine.locks().lock(key);
    if !engine.data().contains_key(key) {
        return Ok(RespValue::Integer(0));
    }
    Ok(bool_int(engine.del_ttl(key)))
}

/// TTL key: -2 if missing, -1 if persistent.
fn ttl(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let key = &args[1];
    engine.check_ttl(key);
    let _guard = engine.locks().read(key);
    if !engine.data().contains_key(key) {
        return Ok(RespValue::Integer(-2));
    }
    Ok(match engine.expires_at(key) {
        None => RespValue::Integer(-1),
        Some(at) => RespValue::Integer((at - unix_now()).max(0)),
    })
}

/// TYPE key
fn key_type(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let key = &args[1];
    engine.check_ttl(key);
    let _guard = engine.locks().read(key);
    let name = engine
        .lookup(key, |v| v.type_name())
        .unwrap_or("none");
    Ok(RespValue::simple_string(name))
}

/// RENAME key newkey
///
/// The destination is overwritten and inherits the source's TTL.
fn rename(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let (src, dst) = (&args[1], &args[2]);
    engine.check_ttl(src);
    engine.check_ttl(dst);
    let _guard = engine.locks().lock_many(&args[1..3]);

    if src == dst {
        return if engine.data().contains_key(src) {
            Ok(RespValue::ok())
        } else {
            Err(CommandError::NoSuchKey)
        };
    }

    let expires_at = engine.expires_at(src);
    let value = engine.remove_key(src).ok_or(CommandError::NoSuchKey)?;
    engine.put(dst, value);
    if let Some(at) = expires_at {
        engine.set_ttl(dst, at);
    }
    Ok(RespValue::ok())
}
