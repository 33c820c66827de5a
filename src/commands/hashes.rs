//! Hash commands.

use bytes::Bytes;
use rand::seq::{IteratorRandom, SliceRandom};
use std::collections::HashMap;

use super::args::{
    bool_int, bulk, bulk_array, bulk_or_null, format_float, int, is_opt, parse_f64, parse_i64,
};
use super::registry::CommandTable;
use crate::error::{CommandError, CommandResult};
use crate::protocol::RespValue;
use crate::storage::{StorageEngine, Value};

pub(super) fn register(table: &mut CommandTable) {
    table.write("hset", -4, hset);
    table.write("hsetnx", 4, hsetnx);
    table.read("hget", 3, hget);
    table.read("hmget", -3, hmget);
    table.write("hdel", -3, hdel);
    table.read("hexists", 3, hexists);
    table.read("hgetall", 2, hgetall);
    table.read("hkeys", 2, hkeys);
    table.read("hvals", 2, hvals);
    table.read("hlen", 2, hlen);
    table.write("hincrby", 4, hincrby);
    table.read("hstrlen", 3, hstrlen);
    table.write("hincrbyfloat", 4, hincrbyfloat);
    table.read("hrandfield", -2, hrandfield);
}

type Fields = HashMap<Bytes, Bytes>;

/// Runs `f` on the hash at `key` under a shared lock. `Ok(None)` if missing.
fn with_hash<R>(
    engine: &StorageEngine,
    key: &[u8],
    f: impl FnOnce(&Fields) -> R,
) -> CommandResult<Option<R>> {
    engine.check_ttl(key);
    let _guard = engine.locks().read(key);
    engine
        .lookup(key, |value| value.as_hash().map(f))
        .transpose()
}

/// Runs `f` on the hash at `key` under an exclusive lock, creating it first.
///
/// A hash left empty afterwards is removed.
fn modify_hash<R>(
    engine: &StorageEngine,
    key: &Bytes,
    f: impl FnOnce(&mut Fields) -> CommandResult<R>,
) -> CommandResult<R> {
    engine.check_ttl(key);
    let _guard = engine.locks().lock(key);
    let result = engine
        .data()
        .upsert_with(key, Value::new_hash, |value| -> CommandResult<R> {
            f(value.as_hash_mut()?)
        });
    engine.remove_if_empty(key);
    result
}

/// HSET key field value [field value ...]
///
/// Returns the number of fields that were added.
fn hset(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let pairs = &args[2..];
    if pairs.len() % 2 != 0 {
        return Err(CommandError::WrongArity("hset".into()));
    }
    let added = modify_hash(engine, &args[1], |fields| {
        Ok(pairs
            .chunks_exact(2)
            .filter(|pair| fields.insert(pair[0].clone(), pair[1].clone()).is_none())
            .count())
    })?;
    Ok(int(added))
}

/// HSETNX key field value
fn hsetnx(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let created = modify_hash(engine, &args[1], |fields| {
        if fields.contains_key(&args[2]) {
            return Ok(false);
        }
        fields.insert(args[2].clone(), args[3].clone());
        Ok(true)
    })?;
    Ok(bool_int(created))
}

/// HGET key field
fn hget(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let value = with_hash(engine, &args[1], |fields| fields.get(&args[2]).cloned())?;
    Ok(bulk_or_null(value.flatten()))
}

/// HMGET key field [field ...]
fn hmget(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let fields = &args[2..];
    let values = with_hash(engine, &args[1], |hash| {
        fields
            .iter()
            .map(|f| bulk_or_null(hash.get(f).cloned()))
            .collect::<Vec<_>>()
    })?
    .unwrap_or_else(|| vec![RespValue::NullBulk; fields.len()]);
    Ok(RespValue::Array(values))
}

/// HDEL key field [field ...]
fn hdel(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let key = &args[1];
    engine.check_ttl(key);
    let _guard = engine.locks().lock(key);
    let removed = engine
        .data()
        .update(key, |value| -> CommandResult<usize> {
            let fields = value.as_hash_mut()?;
            Ok(args[2..]
                .iter()
                .filter(|f| fields.remove(*f).is_some())
                .count())
        })
        .transpose()?
        .unwrap_or(0);
    engine.remove_if_empty(key);
    Ok(int(removed))
}

/// HEXISTS key field
fn hexists(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let found = with_hash(engine, &args[1], |fields| fields.contains_key(&args[2]))?;
    Ok(bool_int(found.unwrap_or(false)))
}

/// HGETALL key
fn hgetall(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let items = with_hash(engine, &args[1], |fields| {
        fields
            .iter()
            .flat_map(|(f, v)| [f.clone(), v.clone()])
            .collect::<Vec<_>>()
    })?;
    Ok(bulk_array(items.unwrap_or_default()))
}

/// HKEYS key
fn hkeys(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let keys = with_hash(engine, &args[1], |fields| {
        fields.keys().cloned().collect::<Vec<_>>()
    })?;
    Ok(bulk_array(keys.unwrap_or_default()))
}

/// HVALS key
fn hvals(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let values = with_hash(engine, &args[1], |fields| {
        fields.values().cloned().collect::<Vec<_>>()
    })?;
    Ok(bulk_array(values.unwrap_or_default()))
}

/// HLEN key
fn hlen(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let len = with_hash(engine, &args[1], HashMap::len)?;
    Ok(int(len.unwrap_or(0)))
}

/// HINCRBY key field increment
fn hincrby(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let delta = parse_i64(&args[3])?;
    let next = modify_hash(engine, &args[1], |fields| {
        let current = match fields.get(&args[2]) {
            Some(v) => parse_i64(v)
                .map_err(|_| CommandError::Other("hash value is not an integer".into()))?,
            None => 0,
        };
        let next = current.checked_add(delta).ok_or(CommandError::Overflow)?;
        fields.insert(args[2].clone(), Bytes::from(next.to_string()));
        Ok(next)
    })?;
    Ok(RespValue::Integer(next))
}

/// HSTRLEN key field
fn hstrlen(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let len = with_hash(engine, &args[1], |fields| {
        fields.get(&args[2]).map_or(0, |v| v.len())
    })?;
    Ok(int(len.unwrap_or(0)))
}

/// HINCRBYFLOAT key field increment
fn hincrbyfloat(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let delta = parse_f64(&args[3])?;
    let next = modify_hash(engine, &args[1], |fields| {
        let current = match fields.get(&args[2]) {
            Some(v) => {
                parse_f64(v).map_err(|_| CommandError::Other("hash value is not a float".into()))?
            }
            None => 0.0,
        };
        let next = current + delta;
        if !next.is_finite() {
            return Err(CommandError::Other(
                "increment would produce NaN or Infinity".into(),
            ));
        }
        let formatted = Bytes::from(format_float(next));
        fields.insert(args[2].clone(), formatted.clone());
        Ok(formatted)
    })?;
    Ok(bulk(next))
}

/// HRANDFIELD key [count [WITHVALUES]]
///
/// A positive count returns distinct fields, a negative one may repeat.
fn hrandfield(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let (count, with_values) = match &args[2..] {
        [] => (None, false),
        [count] => (Some(parse_i64(count)?), false),
        [count, opt] if is_opt(opt, "WITHVALUES") => (Some(parse_i64(count)?), true),
        _ => return Err(CommandError::Syntax),
    };

    let mut rng = rand::thread_rng();
    let picked = with_hash(engine, &args[1], |fields| {
        let chosen: Vec<(&Bytes, &Bytes)> = match count {
            None => fields.iter().choose(&mut rng).into_iter().collect(),
            Some(n) if n >= 0 => {
                let n = usize::try_from(n).unwrap_or(usize::MAX).min(fields.len());
                fields.iter().choose_multiple(&mut rng, n)
            }
            Some(n) => {
                let pool: Vec<_> = fields.iter().collect();
                (0..n.unsigned_abs())
                    .filter_map(|_| pool.choose(&mut rng).copied())
                    .collect()
            }
        };
        chosen
            .into_iter()
            .map(|(f, v)| (f.clone(), v.clone()))
            .collect::<Vec<_>>()
    })?
    .unwrap_or_default();

    Ok(match count {
        None => picked
            .into_iter()
            .next()
            .map_or(RespValue::NullBulk, |(field, _)| bulk(field)),
        Some(_) if with_values => bulk_array(picked.into_iter().flat_map(|(f, v)| [f, v])),
        Some(_) => bulk_array(picked.into_iter().map(|(f, _)| f)),
    })
}
