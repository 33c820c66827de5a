//! Sorted set commands.

use bytes::Bytes;

use super::args::{bulk, format_float, int, is_opt, normalize_range, parse_f64, parse_i64};
use super::registry::CommandTable;
use crate::error::{CommandError, CommandResult};
use crate::protocol::RespValue;
use crate::storage::{ScoreBound, SortedSet, StorageEngine, Value};

pub(super) fn register(table: &mut CommandTable) {
    table.write("zadd", -4, zadd);
    table.write("zrem", -3, zrem);
    table.read("zscore", 3, zscore);
    table.read("zcard", 2, zcard);
    table.write("zincrby", 4, zincrby);
    table.read("zrank", 3, zrank);
    table.read("zrange", -4, zrange);
    table.read("zrangebyscore", -4, zrangebyscore);
}

fn with_zset<R>(
    engine: &StorageEngine,
    key: &[u8],
    f: impl FnOnce(&SortedSet) -> R,
) -> CommandResult<Option<R>> {
    engine.check_ttl(key);
    let _guard = engine.locks().read(key);
    engine
        .lookup(key, |value| value.as_zset().map(f))
        .transpose()
}

fn score_reply(score: f64) -> RespValue {
    bulk(Bytes::from(format_float(score)))
}

fn entries_reply(entries: Vec<(Bytes, f64)>, with_scores: bool) -> RespValue {
    let mut out = Vec::with_capacity(entries.len() * if with_scores { 2 } else { 1 });
    for (member, score) in entries {
        out.push(RespValue::BulkString(member));
        if with_scores {
            out.push(score_reply(score));
        }
    }
    RespValue::Array(out)
}

#[derive(Debug, Default)]
struct ZaddFlags {
    nx: bool,
    xx: bool,
    ch: bool,
}

/// ZADD key [NX|XX] [CH] score member [score member ...]
///
/// Returns the number of new members, or with CH the number of members
/// added or re-scored.
fn zadd(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let key = &args[1];
    let mut flags = ZaddFlags::default();
    let mut i = 2;
    while let Some(arg) = args.get(i) {
        if is_opt(arg, "NX") {
            flags.nx = true;
        } else if is_opt(arg, "XX") {
            flags.xx = true;
        } else if is_opt(arg, "CH") {
            flags.ch = true;
        } else {
            break;
        }
        i += 1;
    }
    if flags.nx && flags.xx {
        return Err(CommandError::Other(
            "XX and NX options at the same time are not compatible".into(),
        ));
    }
    let pairs = &args[i..];
    if pairs.is_empty() || pairs.len() % 2 != 0 {
        return Err(CommandError::Syntax);
    }
    // Every score is validated before the set is touched.
    let entries = pairs
        .chunks_exact(2)
        .map(|pair| Ok((parse_f64(&pair[0])?, pair[1].clone())))
        .collect::<CommandResult<Vec<_>>>()?;

    engine.check_ttl(key);
    let _guard = engine.locks().lock(key);
    if flags.xx && !engine.data().contains_key(key) {
        return Ok(RespValue::Integer(0));
    }

    let changed = engine
        .data()
        .upsert_with(key, Value::new_zset, |value| -> CommandResult<usize> {
            let zset = value.as_zset_mut()?;
            let mut changed = 0;
            for (score, member) in entries {
                let old = zset.score(&member);
                match old {
                    Some(_) if flags.nx => continue,
                    None if flags.xx => continue,
                    _ => {}
                }
                let added = zset.add(member, score);
                if added || (flags.ch && old.is_some_and(|o| o != score)) {
                    changed += 1;
                }
            }
            Ok(changed)
        });
    engine.remove_if_empty(key);
    Ok(int(changed?))
}

/// ZREM key member [member ...]
fn zrem(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let key = &args[1];
    engine.check_ttl(key);
    let _guard = engine.locks().lock(key);
    let removed = engine
        .data()
        .update(key, |value| -> CommandResult<usize> {
            let zset = value.as_zset_mut()?;
            Ok(args[2..].iter().filter(|m| zset.remove(m)).count())
        })
        .transpose()?
        .unwrap_or(0);
    engine.remove_if_empty(key);
    Ok(int(removed))
}

/// ZSCORE key member
fn zscore(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let score = with_zset(engine, &args[1], |zset| zset.score(&args[2]))?;
    Ok(score.flatten().map_or(RespValue::NullBulk, score_reply))
}

/// ZCARD key
fn zcard(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let len = with_zset(engine, &args[1], SortedSet::len)?;
    Ok(int(len.unwrap_or(0)))
}

/// ZINCRBY key increment member
fn zincrby(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let key = &args[1];
    let delta = parse_f64(&args[2])?;
    engine.check_ttl(key);
    let _guard = engine.locks().lock(key);
    let score = engine
        .data()
        .upsert_with(key, Value::new_zset, |value| -> CommandResult<Option<f64>> {
            Ok(value.as_zset_mut()?.incr_by(args[3].clone(), delta))
        });
    engine.remove_if_empty(key);
    match score? {
        Some(score) => Ok(score_reply(score)),
        None => Err(CommandError::Other("resulting score is not a number (NaN)".into())),
    }
}

/// ZRANK key member
fn zrank(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let rank = with_zset(engine, &args[1], |zset| zset.rank(&args[2]))?;
    Ok(rank
        .flatten()
        .map_or(RespValue::NullBulk, |r| RespValue::Integer(r as i64)))
}

/// ZRANGE key start stop [WITHSCORES]
fn zrange(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let start = parse_i64(&args[2])?;
    let stop = parse_i64(&args[3])?;
    let with_scores = match &args[4..] {
        [] => false,
        [opt] if is_opt(opt, "WITHSCORES") => true,
        _ => return Err(CommandError::Syntax),
    };

    let entries = with_zset(engine, &args[1], |zset| {
        normalize_range(start, stop, zset.len())
            .map(|(from, to)| zset.range_by_rank(from, to))
            .unwrap_or_default()
    })?;
    Ok(entries_reply(entries.unwrap_or_default(), with_scores))
}

/// Parses a score bound: `1.5`, `(1.5` (exclusive), `-inf`, `+inf`.
fn parse_bound(arg: &[u8]) -> CommandResult<ScoreBound> {
    let not_float = || CommandError::Other("min or max is not a float".into());
    match arg.strip_prefix(b"(") {
        Some(rest) => parse_f64(rest).map(ScoreBound::exclusive).map_err(|_| not_float()),
        None => parse_f64(arg).map(ScoreBound::inclusive).map_err(|_| not_float()),
    }
}

/// ZRANGEBYSCORE key min max [WITHSCORES] [LIMIT offset count]
fn zrangebyscore(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let min = parse_bound(&args[2])?;
    let max = parse_bound(&args[3])?;

    let mut with_scores = false;
    let mut limit: Option<(usize, Option<usize>)> = None;
    let mut i = 4;
    while let Some(opt) = args.get(i) {
        if is_opt(opt, "WITHSCORES") {
            with_scores = true;
            i += 1;
        } else if is_opt(opt, "LIMIT") {
            let offset = parse_i64(args.get(i + 1).ok_or(CommandError::Syntax)?)?;
            let count = parse_i64(args.get(i + 2).ok_or(CommandError::Syntax)?)?;
            // A negative offset yields nothing, a negative count means no limit.
            let offset = usize::try_from(offset).unwrap_or(usize::MAX);
            limit = Some((offset, usize::try_from(count).ok()));
            i += 3;
        } else {
            return Err(CommandError::Syntax);
        }
    }

    let entries = with_zset(engine, &args[1], |zset| {
        let entries = zset.range_by_score(min, max);
        match limit {
            Some((offset, count)) => entries
                .into_iter()
                .skip(offset)
                .take(count.unwrap_or(usize::MAX))
                .collect(),
            None => entries,
        }
    })?;
    Ok(entries_reply(entries.unwrap_or_default(), with_scores))
}

#[cfg(test)]
mod tests {
    use crate::commands::testing::{bulk, bulks, create_handler, run};
    use crate::protocol::RespValue;

    #[test]
    fn test_zadd_orders_by_score_then_member() {
        let handler = create_handler();
        assert_eq!(
            run(&handler, &["ZADD", "z", "1", "a", "3", "b", "2", "c"]),
            RespValue::Integer(3)
        );
        assert_eq!(run(&handler, &["ZRANGE", "z", "0", "-1"]), bulks(&["a", "c", "b"]));

        run(&handler, &["ZADD", "z", "1", "b"]);
        // Equal scores fall back to member order.
        assert_eq!(run(&handler, &["ZRANGE", "z", "0", "-1"]), bulks(&["a", "b", "c"]));
        assert_eq!(
            run(&handler, &["ZRANGE", "z", "0", "0", "WITHSCORES"]),
            bulks(&["a", "1"])
        );
    }

    #[test]
    fn test_zadd_flags() {
        let handler = create_handler();
        run(&handler, &["ZADD", "z", "1", "a"]);
        assert_eq!(run(&handler, &["ZADD", "z", "NX", "5", "a", "2", "b"]), RespValue::Integer(1));
        assert_eq!(run(&handler, &["ZSCORE", "z", "a"]), bulk("1"));

        assert_eq!(run(&handler, &["ZADD", "z", "XX", "7", "a", "3", "c"]), RespValue::Integer(0));
        assert_eq!(run(&handler, &["ZSCORE", "z", "a"]), bulk("7"));
        assert_eq!(run(&handler, &["ZSCORE", "z", "c"]), RespValue::NullBulk);

        assert_eq!(
            run(&handler, &["ZADD", "z", "CH", "8", "a", "2", "b", "9", "d"]),
            RespValue::Integer(2)
        );

        assert_eq!(run(&handler, &["ZADD", "fresh", "XX", "1", "a"]), RespValue::Integer(0));
        assert_eq!(run(&handler, &["EXISTS", "fresh"]), RespValue::Integer(0));

        assert!(run(&handler, &["ZADD", "z", "NX", "XX", "1", "a"]).is_error());
        assert!(run(&handler, &["ZADD", "z", "1", "a", "2"]).is_error());
        assert_eq!(
            run(&handler, &["ZADD", "z", "abc", "a"]),
            RespValue::error("ERR value is not a valid float")
        );
    }

    #[test]
    fn test_zrem_zcard() {
        let handler = create_handler();
        run(&handler, &["ZADD", "z", "1", "a", "2", "b"]);
        assert_eq!(run(&handler, &["ZCARD", "z"]), RespValue::Integer(2));
        assert_eq!(run(&handler, &["ZREM", "z", "a", "nope"]), RespValue::Integer(1));
        assert_eq!(run(&handler, &["ZREM", "z", "b"]), RespValue::Integer(1));
        assert_eq!(run(&handler, &["EXISTS", "z"]), RespValue::Integer(0));
        assert_eq!(run(&handler, &["ZCARD", "z"]), RespValue::Integer(0));
    }

    #[test]
    fn test_zincrby_and_rank() {
        let handler = create_handler();
        assert_eq!(run(&handler, &["ZINCRBY", "z", "1.5", "a"]), bulk("1.5"));
        assert_eq!(run(&handler, &["ZINCRBY", "z", "1", "b"]), bulk("1"));
        assert_eq!(run(&handler, &["ZRANK", "z", "b"]), RespValue::Integer(0));
        assert_eq!(run(&handler, &["ZRANK", "z", "a"]), RespValue::Integer(1));
        assert_eq!(run(&handler, &["ZINCRBY", "z", "1", "b"]), bulk("2"));
        assert_eq!(run(&handler, &["ZRANK", "z", "b"]), RespValue::Integer(1));
        assert_eq!(run(&handler, &["ZRANK", "z", "nope"]), RespValue::NullBulk);
    }

    #[test]
    fn test_zrangebyscore() {
        let handler = create_handler();
        run(&handler, &["ZADD", "z", "1", "a", "2", "b", "3", "c", "4", "d"]);
        assert_eq!(run(&handler, &["ZRANGEBYSCORE", "z", "2", "3"]), bulks(&["b", "c"]));
        assert_eq!(run(&handler, &["ZRANGEBYSCORE", "z", "(2", "+inf"]), bulks(&["c", "d"]));
        assert_eq!(run(&handler, &["ZRANGEBYSCORE", "z", "-inf", "(2"]), bulks(&["a"]));
        assert_eq!(
            run(&handler, &["ZRANGEBYSCORE", "z", "-inf", "+inf", "LIMIT", "1", "2"]),
            bulks(&["b", "c"])
        );
        assert_eq!(
            run(&handler, &["ZRANGEBYSCORE", "z", "4", "4", "WITHSCORES"]),
            bulks(&["d", "4"])
        );
        assert_eq!(run(&handler, &["ZRANGEBYSCORE", "z", "5", "1"]), bulks(&[]));
        assert_eq!(
            run(&handler, &["ZRANGEBYSCORE", "z", "x", "1"]),
            RespValue::error("ERR min or max is not a float")
        );
    }

    #[test]
    fn test_wrong_type() {
        let handler = create_handler();
        run(&handler, &["SET", "s", "v"]);
        assert!(run(&handler, &["ZADD", "s", "1", "a"]).is_error());
        assert!(run(&handler, &["ZRANGE", "s", "0", "-1"]).is_error());
        assert_eq!(run(&handler, &["GET", "s"]), bulk("v"));
    }
}
