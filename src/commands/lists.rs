//! List commands.

use bytes::Bytes;
use std::collections::VecDeque;

use super::args::{
    bulk, bulk_array, bulk_or_null, int, is_opt, lossy, normalize_index, normalize_range,
    parse_i64,
};
use super::registry::CommandTable;
use crate::error::{CommandError, CommandResult};
use crate::protocol::RespValue;
use crate::storage::{StorageEngine, Value};

pub(super) fn register(table: &mut CommandTable) {
    table.write("lpush", -3, lpush);
    table.write("rpush", -3, rpush);
    table.write("lpushx", -3, lpushx);
    table.write("rpushx", -3, rpushx);
    table.write("lpop", -2, lpop);
    table.write("rpop", -2, rpop);
    table.read("llen", 2, llen);
    table.read("lindex", 3, lindex);
    table.read("lrange", 4, lrange);
    table.write("lset", 4, lset);
    table.write("lrem", 4, lrem);
    table.write("ltrim", 4, ltrim);
    table.read("lpos", -3, lpos);
    table.write("lmove", 5, lmove);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    Left,
    Right,
}

impl End {
    fn parse(arg: &[u8]) -> CommandResult<Self> {
        if is_opt(arg, "LEFT") {
            Ok(End::Left)
        } else if is_opt(arg, "RIGHT") {
            Ok(End::Right)
        } else {
            Err(CommandError::Syntax)
        }
    }
}

fn push(engine: &StorageEngine, args: &[Bytes], end: End, only_existing: bool) -> CommandResult {
    let key = &args[1];
    engine.check_ttl(key);
    let _guard = engine.locks().lock(key);

    if only_existing && !engine.data().contains_key(key) {
        return Ok(RespValue::Integer(0));
    }

    let len = engine.data().upsert_with(key, Value::new_list, |value| {
        let list = value.as_list_mut()?;
        for item in &args[2..] {
            match end {
                End::Left => list.push_front(item.clone()),
                End::Right => list.push_back(item.clone()),
            }
        }
        Ok::<_, CommandError>(list.len())
    })?;
    Ok(int(len))
}

/// LPUSH key element [element ...]
fn lpush(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    push(engine, args, End::Left, false)
}

/// RPUSH key element [element ...]
fn rpush(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    push(engine, args, End::Right, false)
}

/// LPUSHX key element [element ...]
fn lpushx(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    push(engine, args, End::Left, true)
}

/// RPUSHX key element [element ...]
fn rpushx(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    push(engine, args, End::Right, true)
}

fn pop(engine: &StorageEngine, args: &[Bytes], end: End) -> CommandResult {
    if args.len() > 3 {
        return Err(CommandError::Syntax);
    }
    let key = &args[1];
    let count = match args.get(2) {
        Some(arg) => Some(
            usize::try_from(parse_i64(arg)?)
                .map_err(|_| CommandError::Other("value is out of range, must be positive".into()))?,
        ),
        None => None,
    };

    engine.check_ttl(key);
    let _guard = engine.locks().lock(key);

    let popped = engine.data().update(key, |value| {
        let list = value.as_list_mut()?;
        let n = count.unwrap_or(1).min(list.len());
        let items: Vec<Bytes> = (0..n)
            .filter_map(|_| match end {
                End::Left => list.pop_front(),
                End::Right => list.pop_back(),
            })
            .collect();
        Ok::<_, CommandError>(items)
    });
    engine.record_lookup(popped.is_some());

    let Some(popped) = popped else {
        return Ok(match count {
            Some(_) => RespValue::NullArray,
            None => RespValue::NullBulk,
        });
    };
    let items = popped?;
    engine.remove_if_empty(key);

    Ok(match count {
        Some(_) => bulk_array(items),
        None => bulk_or_null(items.into_iter().next()),
    })
}

/// LPOP key [count]
fn lpop(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    pop(engine, args, End::Left)
}

/// RPOP key [count]
fn rpop(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    pop(engine, args, End::Right)
}

fn with_list<R>(
    engine: &StorageEngine,
    key: &[u8],
    f: impl FnOnce(&VecDeque<Bytes>) -> R,
) -> CommandResult<Option<R>> {
    engine.check_ttl(key);
    let _guard = engine.locks().read(key);
    engine
        .lookup(key, |value| value.as_list().map(f))
        .transpose()
}

/// LLEN key
fn llen(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let len = with_list(engine, &args[1], VecDeque::len)?;
    Ok(int(len.unwrap_or(0)))
}

/// LINDEX key index
fn lindex(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let index = parse_i64(&args[2])?;
    let item = with_list(engine, &args[1], |list| {
        normalize_index(index, list.len()).and_then(|i| list.get(i).cloned())
    })?;
    Ok(bulk_or_null(item.flatten()))
}

/// LRANGE key start stop
fn lrange(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let start = parse_i64(&args[2])?;
    let stop = parse_i64(&args[3])?;
    let items = with_list(engine, &args[1], |list| {
        match normalize_range(start, stop, list.len()) {
            Some((from, to)) => list.range(from..=to).cloned().collect(),
            None => Vec::new(),
        }
    })?;
    Ok(bulk_array(items.unwrap_or_default()))
}

/// LSET key index element
fn lset(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let key = &args[1];
    let index = parse_i64(&args[2])?;
    engine.check_ttl(key);
    let _guard = engine.locks().lock(key);

    engine
        .data()
        .update(key, |value| -> CommandResult {
            let list = value.as_list_mut()?;
            let i = normalize_index(index, list.len()).ok_or(CommandError::IndexOutOfRange)?;
            list[i] = args[3].clone();
            Ok(RespValue::ok())
        })
        .unwrap_or(Err(CommandError::NoSuchKey))
}

/// LREM key count element
///
/// Positive count removes from the head, negative from the tail, zero
/// removes every occurrence.
fn lrem(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let key = &args[1];
    let count = parse_i64(&args[2])?;
    let target = &args[3];
    engine.check_ttl(key);
    let _guard = engine.locks().lock(key);

    let removed = engine.data().update(key, |value| {
        let list = value.as_list_mut()?;
        let limit = if count == 0 {
            usize::MAX
        } else {
            count.unsigned_abs() as usize
        };
        let mut removed = 0;
        if count >= 0 {
            let mut i = 0;
            while i < list.len() && removed < limit {
                if list[i] == *target {
                    list.remove(i);
                    removed += 1;
                } else {
                    i += 1;
                }
            }
        } else {
            let mut i = list.len();
            while i > 0 && removed < limit {
                i -= 1;
                if list[i] == *target {
                    list.remove(i);
                    removed += 1;
                }
            }
        }
        Ok::<_, CommandError>(removed)
    });

    let removed = removed.transpose()?.unwrap_or(0);
    engine.remove_if_empty(key);
    Ok(int(removed))
}

/// LTRIM key start stop
fn ltrim(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let key = &args[1];
    let start = parse_i64(&args[2])?;
    let stop = parse_i64(&args[3])?;
    engine.check_ttl(key);
    let _guard = engine.locks().lock(key);

    engine
        .data()
        .update(key, |value| {
            let list = value.as_list_mut()?;
            match normalize_range(start, stop, list.len()) {
                Some((from, to)) => {
                    list.truncate(to + 1);
                    list.drain(..from);
                }
                None => list.clear(),
            }
            Ok::<_, CommandError>(())
        })
        .transpose()?;
    engine.remove_if_empty(key);
    Ok(RespValue::ok())
}

#[derive(Debug)]
struct PosOptions {
    /// 1-based match to start from; negative searches from the tail.
    rank: i64,
    /// `None` returns a single position, `Some(0)` every match.
    count: Option<usize>,
    /// Maximum number of elements compared, 0 for no limit.
    max_len: usize,
}

fn parse_pos_options(options: &[Bytes]) -> CommandResult<PosOptions> {
    let mut opts = PosOptions {
        rank: 1,
        count: None,
        max_len: 0,
    };
    for pair in options.chunks(2) {
        let [name, value] = pair else {
            return Err(CommandError::Syntax);
        };
        let n = parse_i64(value)?;
        if is_opt(name, "RANK") {
            if n == 0 || n == i64::MIN {
                return Err(CommandError::Other(
                    "RANK can't be zero: use 1 to start from the first match, 2 from the second ... or use negative to start from the end of the list".into(),
                ));
            }
            opts.rank = n;
        } else if is_opt(name, "COUNT") {
            opts.count = Some(
                usize::try_from(n)
                    .map_err(|_| CommandError::Other("COUNT can't be negative".into()))?,
            );
        } else if is_opt(name, "MAXLEN") {
            opts.max_len = usize::try_from(n)
                .map_err(|_| CommandError::Other("MAXLEN can't be negative".into()))?;
        } else {
            return Err(CommandError::UnknownOption(lossy(name)));
        }
    }
    Ok(opts)
}

/// Head-based indices of the elements equal to `target`, in search order.
fn positions(list: &VecDeque<Bytes>, target: &[u8], opts: &PosOptions) -> Vec<i64> {
    let limit = match opts.count {
        None => 1,
        Some(0) => usize::MAX,
        Some(n) => n,
    };
    let scan = if opts.max_len == 0 {
        list.len()
    } else {
        opts.max_len.min(list.len())
    };
    let skip = opts.rank.unsigned_abs().saturating_sub(1);
    let indices: Box<dyn Iterator<Item = usize>> = if opts.rank > 0 {
        Box::new(0..scan)
    } else {
        Box::new((list.len() - scan..list.len()).rev())
    };
    indices
        .filter(|&i| list[i] == target)
        .skip(usize::try_from(skip).unwrap_or(usize::MAX))
        .take(limit)
        .map(|i| i as i64)
        .collect()
}

/// LPOS key element [RANK rank] [COUNT num-matches] [MAXLEN len]
fn lpos(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let opts = parse_pos_options(&args[3..])?;
    let found = with_list(engine, &args[1], |list| positions(list, &args[2], &opts))?
        .unwrap_or_default();
    Ok(match opts.count {
        Some(_) => RespValue::Array(found.into_iter().map(RespValue::Integer).collect()),
        None => found
            .first()
            .map_or(RespValue::NullBulk, |&i| RespValue::Integer(i)),
    })
}

/// LMOVE source destination LEFT|RIGHT LEFT|RIGHT
fn lmove(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let (src, dst) = (&args[1], &args[2]);
    let from = End::parse(&args[3])?;
    let to = End::parse(&args[4])?;
    engine.check_ttl(src);
    engine.check_ttl(dst);
    let _guard = engine.locks().lock_many(&args[1..3]);

    let src_has_items = engine
        .data()
        .view(src, |value| value.as_list().map(|list| !list.is_empty()))
        .transpose()?
        .unwrap_or(false);
    if !src_has_items {
        return Ok(RespValue::NullBulk);
    }
    engine
        .data()
        .view(dst, |value| value.as_list().map(|_| ()))
        .transpose()?;

    let item = engine.data().update(src, |value| match (value, from) {
        (Value::List(list), End::Left) => list.pop_front(),
        (Value::List(list), End::Right) => list.pop_back(),
        _ => None,
    });
    let Some(item) = item.flatten() else {
        return Ok(RespValue::NullBulk);
    };
    engine.remove_if_empty(src);

    engine.data().upsert_with(dst, Value::new_list, |value| {
        if let Value::List(list) = value {
            match to {
                End::Left => list.push_front(item.clone()),
                End::Right => list.push_back(item.clone()),
            }
        }
    });
    Ok(bulk(item))
}
