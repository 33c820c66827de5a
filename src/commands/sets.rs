//! Set commands.

use bytes::Bytes;
use rand::seq::{IteratorRandom, SliceRandom};
use std::collections::HashSet;

use super::args::{bool_int, bulk, bulk_array, bulk_or_null, int, parse_i64};
use super::registry::CommandTable;
use crate::error::{CommandError, CommandResult};
use crate::protocol::RespValue;
use crate::storage::{StorageEngine, Value};

pub(super) fn register(table: &mut CommandTable) {
    table.write("sadd", -3, sadd);
    table.write("srem", -3, srem);
    table.read("sismember", 3, sismember);
    table.read("smembers", 2, smembers);
    table.read("scard", 2, scard);
    table.read("sinter", -2, sinter);
    table.read("sunion", -2, sunion);
    table.read("sdiff", -2, sdiff);
    table.write("smove", 4, smove);
    table.write_with_effect("spop", -2, spop, spop_effect);
    table.read("srandmember", -2, srandmember);
    table.write("sinterstore", -3, sinterstore);
    table.write("sunionstore", -3, sunionstore);
    table.write("sdiffstore", -3, sdiffstore);
}

type Members = HashSet<Bytes>;

fn with_set<R>(
    engine: &StorageEngine,
    key: &[u8],
    f: impl FnOnce(&Members) -> R,
) -> CommandResult<Option<R>> {
    engine.check_ttl(key);
    let _guard = engine.locks().read(key);
    engine
        .lookup(key, |value| value.as_set().map(f))
        .transpose()
}

/// Reads a copy of the set at `key`. The caller holds the stripe lock.
fn snapshot(engine: &StorageEngine, key: &[u8]) -> CommandResult<Option<Members>> {
    engine
        .lookup(key, |value| value.as_set().cloned())
        .transpose()
}

/// SADD key member [member ...]
fn sadd(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let key = &args[1];
    engine.check_ttl(key);
    let _guard = engine.locks().lock(key);
    let added = engine
        .data()
        .upsert_with(key, Value::new_set, |value| -> CommandResult<usize> {
            let members = value.as_set_mut()?;
            Ok(args[2..]
                .iter()
                .filter(|m| members.insert((*m).clone()))
                .count())
        })?;
    Ok(int(added))
}

/// SREM key member [member ...]
fn srem(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let key = &args[1];
    engine.check_ttl(key);
    let _guard = engine.locks().lock(key);
    let removed = engine
        .data()
        .update(key, |value| -> CommandResult<usize> {
            let members = value.as_set_mut()?;
            Ok(args[2..].iter().filter(|m| members.remove(*m)).count())
        })
        .transpose()?
        .unwrap_or(0);
    engine.remove_if_empty(key);
    Ok(int(removed))
}

/// SISMEMBER key member
fn sismember(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let found = with_set(engine, &args[1], |members| members.contains(&args[2]))?;
    Ok(bool_int(found.unwrap_or(false)))
}

/// SMEMBERS key
fn smembers(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let members = with_set(engine, &args[1], |members| {
        members.iter().cloned().collect::<Vec<_>>()
    })?;
    Ok(bulk_array(members.unwrap_or_default()))
}

/// SCARD key
fn scard(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let len = with_set(engine, &args[1], HashSet::len)?;
    Ok(int(len.unwrap_or(0)))
}

#[derive(Debug, Clone, Copy)]
enum SetOp {
    Inter,
    Union,
    Diff,
}

/// Combines the sets at `keys` left to right. Missing keys are empty sets.
fn combine(engine: &StorageEngine, keys: &[Bytes], op: SetOp) -> CommandResult<Members> {
    for key in keys {
        engine.check_ttl(key);
    }
    let _guard = engine.locks().read_many(keys);
    combine_locked(engine, keys, op)
}

/// [`combine`] for a caller that already holds every stripe in `keys`.
fn combine_locked(engine: &StorageEngine, keys: &[Bytes], op: SetOp) -> CommandResult<Members> {
    let mut sets = Vec::with_capacity(keys.len());
    for key in keys {
        sets.push(snapshot(engine, key)?.unwrap_or_default());
    }
    let mut sets = sets.into_iter();
    let mut acc = sets.next().unwrap_or_default();
    for set in sets {
        match op {
            SetOp::Inter => acc.retain(|m| set.contains(m)),
            SetOp::Union => acc.extend(set),
            SetOp::Diff => acc.retain(|m| !set.contains(m)),
        }
    }
    Ok(acc)
}

/// SINTER key [key ...]
fn sinter(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    Ok(bulk_array(combine(engine, &args[1..], SetOp::Inter)?))
}

/// SUNION key [key ...]
fn sunion(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    Ok(bulk_array(combine(engine, &args[1..], SetOp::Union)?))
}

/// SDIFF key [key ...]
fn sdiff(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    Ok(bulk_array(combine(engine, &args[1..], SetOp::Diff)?))
}

/// Stores `op` over `args[2..]` at `args[1]`, replacing whatever was there.
/// An empty result deletes the destination.
fn store(engine: &StorageEngine, args: &[Bytes], op: SetOp) -> CommandResult {
    let dest = &args[1];
    for key in &args[1..] {
        engine.check_ttl(key);
    }
    let _guard = engine.locks().lock_many(&args[1..]);

    let result = combine_locked(engine, &args[2..], op)?;
    let len = result.len();
    if result.is_empty() {
        engine.remove_key(dest);
    } else {
        engine.put(dest, Value::Set(result));
    }
    Ok(int(len))
}

/// SINTERSTORE destination key [key ...]
fn sinterstore(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    store(engine, args, SetOp::Inter)
}

/// SUNIONSTORE destination key [key ...]
fn sunionstore(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    store(engine, args, SetOp::Union)
}

/// SDIFFSTORE destination key [key ...]
fn sdiffstore(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    store(engine, args, SetOp::Diff)
}

fn parse_count(args: &[Bytes]) -> CommandResult<Option<i64>> {
    match args {
        [_, _] => Ok(None),
        [_, _, count] => parse_i64(count).map(Some),
        _ => Err(CommandError::Syntax),
    }
}

/// SPOP key [count]
fn spop(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let key = &args[1];
    let count = match parse_count(args)? {
        Some(n) => Some(
            usize::try_from(n)
                .map_err(|_| CommandError::Other("value is out of range, must be positive".into()))?,
        ),
        None => None,
    };
    engine.check_ttl(key);
    let _guard = engine.locks().lock(key);

    let popped = engine
        .data()
        .update(key, |value| -> CommandResult<Vec<Bytes>> {
            let members = value.as_set_mut()?;
            let n = count.unwrap_or(1).min(members.len());
            let chosen: Vec<Bytes> = members
                .iter()
                .cloned()
                .choose_multiple(&mut rand::thread_rng(), n);
            for member in &chosen {
                members.remove(member);
            }
            Ok(chosen)
        })
        .transpose()?;
    engine.record_lookup(popped.is_some());
    engine.remove_if_empty(key);

    let popped = popped.unwrap_or_default();
    Ok(match count {
        Some(_) => bulk_array(popped),
        None => bulk_or_null(popped.into_iter().next()),
    })
}

/// Logs a pop as the removal of the members it actually took.
fn spop_effect(args: &[Bytes], reply: &RespValue) -> Option<Vec<Bytes>> {
    let popped: Vec<Bytes> = match reply {
        RespValue::BulkString(member) => vec![member.clone()],
        RespValue::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                RespValue::BulkString(member) => Some(member.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    if popped.is_empty() {
        return None;
    }
    let mut logged = Vec::with_capacity(popped.len() + 2);
    logged.push(Bytes::from_static(b"SREM"));
    logged.push(args[1].clone());
    logged.extend(popped);
    Some(logged)
}

/// SRANDMEMBER key [count]
///
/// A positive count returns distinct members, a negative one may repeat.
fn srandmember(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let count = parse_count(args)?;
    let mut rng = rand::thread_rng();
    let picked = with_set(engine, &args[1], |members| match count {
        None => members
            .iter()
            .choose(&mut rng)
            .cloned()
            .into_iter()
            .collect::<Vec<_>>(),
        Some(n) if n >= 0 => {
            let n = usize::try_from(n).unwrap_or(usize::MAX).min(members.len());
            members.iter().cloned().choose_multiple(&mut rng, n)
        }
        Some(n) => {
            let pool: Vec<&Bytes> = members.iter().collect();
            (0..n.unsigned_abs())
                .filter_map(|_| pool.choose(&mut rng).map(|m| (*m).clone()))
                .collect::<Vec<Bytes>>()
        }
    })?
    .unwrap_or_default();

    Ok(match count {
        Some(_) => bulk_array(picked),
        None => picked
            .into_iter()
            .next()
            .map_or(RespValue::NullBulk, bulk),
    })
}

/// SMOVE source destination member
fn smove(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let (src, dst, member) = (&args[1], &args[2], &args[3]);
    engine.check_ttl(src);
    engine.check_ttl(dst);
    let _guard = engine.locks().lock_many(&args[1..3]);

    // Both keys are type-checked before anything moves.
    let dst_ok = engine
        .data()
        .view(dst, |value| value.as_set().is_ok())
        .unwrap_or(true);
    let in_src = engine
        .data()
        .view(src, |value| value.as_set().map(|m| m.contains(member)))
        .transpose()?
        .unwrap_or(false);
    if !dst_ok {
        return Err(CommandError::WrongType);
    }
    if !in_src {
        return Ok(RespValue::Integer(0));
    }
    if src == dst {
        return Ok(RespValue::Integer(1));
    }

    engine.data().update(src, |value| {
        if let Value::Set(members) = value {
            members.remove(member);
        }
    });
    engine.remove_if_empty(src);
    engine.data().upsert_with(dst, Value::new_set, |value| {
        if let Value::Set(members) = value {
            members.insert(member.clone());
        }
    });
    Ok(RespValue::Integer(1))
}
