//! String commands.

use bytes::{Bytes, BytesMut};

use super::args::{
    bool_int, bulk, bulk_or_null, format_float, int, is_opt, normalize_range, parse_f64,
    parse_i64,
};
use super::registry::CommandTable;
use crate::error::{CommandError, CommandResult};
use crate::protocol::parser::MAX_BULK_SIZE;
use crate::protocol::RespValue;
use crate::storage::{unix_now, StorageEngine, Value};

pub(super) fn register(table: &mut CommandTable) {
    table.write_with_rewrite("set", -3, set, rewrite_set);
    table.read("get", 2, get);
    table.write("setnx", 3, setnx);
    table.write_with_rewrite("setex", 4, setex, rewrite_setex);
    table.write("mset", -3, mset);
    table.read("mget", -2, mget);
    table.write("incr", 2, incr);
    table.write("incrby", 3, incrby);
    table.write("decr", 2, decr);
    table.write("decrby", 3, decrby);
    table.write("incrbyfloat", 3, incrbyfloat);
    table.write("append", 3, append);
    table.read("strlen", 2, strlen);
    table.read("getrange", 4, getrange);
    table.write("setrange", 4, setrange);
}

/// Reads a string value, `None` if the key is missing.
fn read_string(engine: &StorageEngine, key: &[u8]) -> CommandResult<Option<Bytes>> {
    engine
        .lookup(key, |v| v.as_str().cloned())
        .transpose()
}

#[derive(Debug, Default)]
struct SetOptions {
    nx: bool,
    xx: bool,
    get: bool,
    keep_ttl: bool,
    /// Absolute expiry, unix seconds.
    expires_at: Option<i64>,
}

fn parse_set_options(options: &[Bytes]) -> CommandResult<SetOptions> {
    let mut opts = SetOptions::default();
    let mut i = 0;
    while i < options.len() {
        let opt = &options[i];
        if is_opt(opt, "NX") && !opts.xx {
            opts.nx = true;
        } else if is_opt(opt, "XX") && !opts.nx {
            opts.xx = true;
        } else if is_opt(opt, "GET") {
            opts.get = true;
        } else if is_opt(opt, "KEEPTTL") && opts.expires_at.is_none() {
            opts.keep_ttl = true;
        } else if (is_opt(opt, "EX") || is_opt(opt, "EXAT"))
            && opts.expires_at.is_none()
            && !opts.keep_ttl
        {
            let amount = parse_i64(options.get(i + 1).ok_or(CommandError::Syntax)?)?;
            if amount <= 0 {
                return Err(CommandError::InvalidExpire("set".into()));
            }
            let at = if is_opt(opt, "EX") {
                unix_now().checked_add(amount)
            } else {
                Some(amount)
            };
            opts.expires_at = Some(at.ok_or_else(|| CommandError::InvalidExpire("set".into()))?);
            i += 1;
        } else {
            return Err(CommandError::Syntax);
        }
        i += 1;
    }
    Ok(opts)
}

/// SET key value [NX|XX] [GET] [KEEPTTL] [EX seconds|EXAT unix-time-seconds]
fn set(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let (key, value) = (&args[1], &args[2]);
    let opts = parse_set_options(&args[3..])?;

    engine.check_ttl(key);
    let _guard = engine.locks().lock(key);

    let old = if opts.get {
        read_string(engine, key)?
    } else {
        None
    };
    let exists = engine.data().contains_key(key);
    if (opts.nx && exists) || (opts.xx && !exists) {
        return Ok(if opts.get {
            bulk_or_null(old)
        } else {
            RespValue::NullBulk
        });
    }

    if opts.keep_ttl {
        engine.data().set(key.clone(), Value::Str(value.clone()));
    } else {
        engine.put(key, Value::Str(value.clone()));
    }
    if let Some(at) = opts.expires_at {
        engine.set_ttl(key, at);
    }
    Ok(if opts.get {
        bulk_or_null(old)
    } else {
        RespValue::ok()
    })
}

/// `SET k v ... EX n ...` becomes `SET k v ... EXAT now+n ...`.
fn rewrite_set(args: &[Bytes], now: i64) -> Option<Vec<Bytes>> {
    let pos = args.iter().skip(3).position(|a| is_opt(a, "EX"))? + 3;
    let secs = parse_i64(args.get(pos + 1)?).ok().filter(|&s| s > 0)?;
    let at = now.checked_add(secs)?;
    let mut out = args.to_vec();
    out[pos] = Bytes::from_static(b"EXAT");
    out[pos + 1] = Bytes::from(at.to_string());
    Some(out)
}

/// GET key
fn get(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let key = &args[1];
    engine.check_ttl(key);
    let _guard = engine.locks().read(key);
    Ok(bulk_or_null(read_string(engine, key)?))
}

/// SETNX key value
fn setnx(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let key = &args[1];
    engine.check_ttl(key);
    let _guard = engine.locks().lock(key);
    let created = engine
        .data()
        .set_if_not_exist(key.clone(), Value::Str(args[2].clone()));
    Ok(bool_int(created))
}

/// SETEX key seconds value
fn setex(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let key = &args[1];
    let secs = parse_i64(&args[2])?;
    let at = unix_now()
        .checked_add(secs)
        .filter(|_| secs > 0)
        .ok_or_else(|| CommandError::InvalidExpire("setex".into()))?;

    engine.check_ttl(key);
    let _guard = engine.locks().lock(key);
    engine.put(key, Value::Str(args[3].clone()));
    engine.set_ttl(key, at);
    Ok(RespValue::ok())
}

/// `SETEX k n v` becomes `SET k v EXAT now+n`.
fn rewrite_setex(args: &[Bytes], now: i64) -> Option<Vec<Bytes>> {
    let secs = parse_i64(args.get(2)?).ok().filter(|&s| s > 0)?;
    let at = now.checked_add(secs)?;
    Some(vec![
        Bytes::from_static(b"SET"),
        args[1].clone(),
        args.get(3)?.clone(),
        Bytes::from_static(b"EXAT"),
        Bytes::from(at.to_string()),
    ])
}

/// MSET key value [key value ...]
fn mset(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let pairs = &args[1..];
    if pairs.len() % 2 != 0 {
        return Err(CommandError::WrongArity("mset".into()));
    }
    let keys: Vec<&Bytes> = pairs.iter().step_by(2).collect();
    for key in &keys {
        engine.check_ttl(key);
    }
    let _guard = engine.locks().lock_many(&keys);
    for pair in pairs.chunks_exact(2) {
        engine.put(&pair[0], Value::Str(pair[1].clone()));
    }
    Ok(RespValue::ok())
}

/// MGET key [key ...]
///
/// Keys holding a non-string value read as null.
fn mget(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let keys = &args[1..];
    for key in keys {
        engine.check_ttl(key);
    }
    let _guard = engine.locks().read_many(keys);
    let values = keys
        .iter()
        .map(|key| bulk_or_null(read_string(engine, key).ok().flatten()))
        .collect();
    Ok(RespValue::Array(values))
}

fn incr_by(engine: &StorageEngine, key: &Bytes, delta: i64) -> CommandResult {
    engine.check_ttl(key);
    let _guard = engine.locks().lock(key);

    let current = match read_string(engine, key)? {
        Some(data) => parse_i64(&data)?,
        None => 0,
    };
    let next = current.checked_add(delta).ok_or(CommandError::Overflow)?;
    // Plain set keeps any TTL.
    engine
        .data()
        .set(key.clone(), Value::Str(Bytes::from(next.to_string())));
    Ok(RespValue::Integer(next))
}

/// INCR key
fn incr(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    incr_by(engine, &args[1], 1)
}

/// INCRBY key increment
fn incrby(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    incr_by(engine, &args[1], parse_i64(&args[2])?)
}

/// DECR key
fn decr(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    incr_by(engine, &args[1], -1)
}

/// DECRBY key decrement
fn decrby(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let delta = parse_i64(&args[2])?
        .checked_neg()
        .ok_or(CommandError::Overflow)?;
    incr_by(engine, &args[1], delta)
}

/// INCRBYFLOAT key increment
fn incrbyfloat(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let key = &args[1];
    let delta = parse_f64(&args[2])?;
    engine.check_ttl(key);
    let _guard = engine.locks().lock(key);

    let current = match read_string(engine, key)? {
        Some(data) => parse_f64(&data)?,
        None => 0.0,
    };
    let next = current + delta;
    if !next.is_finite() {
        return Err(CommandError::Other(
            "increment would produce NaN or Infinity".into(),
        ));
    }
    let formatted = Bytes::from(format_float(next));
    engine.data().set(key.clone(), Value::Str(formatted.clone()));
    Ok(bulk(formatted))
}

/// APPEND key value
fn append(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let key = &args[1];
    engine.check_ttl(key);
    let _guard = engine.locks().lock(key);
    let len = engine.data().upsert_with(
        key,
        || Value::Str(Bytes::new()),
        |value| -> CommandResult<usize> {
            let data = value.as_str_mut()?;
            let mut buf = BytesMut::with_capacity(data.len() + args[2].len());
            buf.extend_from_slice(data);
            buf.extend_from_slice(&args[2]);
            *data = buf.freeze();
            Ok(data.len())
        },
    )?;
    Ok(int(len))
}

/// STRLEN key
fn strlen(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let key = &args[1];
    engine.check_ttl(key);
    let _guard = engine.locks().read(key);
    Ok(int(read_string(engine, key)?.map_or(0, |s| s.len())))
}

/// GETRANGE key start end
fn getrange(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let key = &args[1];
    let start = parse_i64(&args[2])?;
    let end = parse_i64(&args[3])?;
    engine.check_ttl(key);
    let _guard = engine.locks().read(key);

    let data = read_string(engine, key)?.unwrap_or_default();
    Ok(match normalize_range(start, end, data.len()) {
        Some((from, to)) => bulk(data.slice(from..=to)),
        None => bulk(Bytes::new()),
    })
}

/// SETRANGE key offset value
fn setrange(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let key = &args[1];
    let patch = &args[3];
    let offset = parse_i64(&args[2])?;
    let offset = usize::try_from(offset)
        .map_err(|_| CommandError::Other("offset is out of range".into()))?;
    if offset.saturating_add(patch.len()) > MAX_BULK_SIZE {
        return Err(CommandError::Other(
            "string exceeds maximum allowed size (proto-max-bulk-len)".into(),
        ));
    }

    engine.check_ttl(key);
    let _guard = engine.locks().lock(key);

    let current = read_string(engine, key)?;
    if current.is_none() && patch.is_empty() {
        return Ok(RespValue::Integer(0));
    }
    let current = current.unwrap_or_default();
    if patch.is_empty() {
        return Ok(int(current.len()));
    }

    let mut buf = BytesMut::from(&current[..]);
    if buf.len() < offset + patch.len() {
        buf.resize(offset + patch.len(), 0);
    }
    buf[offset..offset + patch.len()].copy_from_slice(patch);
    let len = buf.len();
    engine.data().set(key.clone(), Value::Str(buf.freeze()));
    Ok(int(len))
}
