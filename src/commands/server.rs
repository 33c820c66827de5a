//! Connection and server commands.

use bytes::Bytes;
use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

use super::args::{bulk, bulk_array, int, is_opt, lossy};
use super::registry::CommandTable;
use crate::error::{CommandError, CommandResult};
use crate::protocol::RespValue;
use crate::storage::StorageEngine;

pub(super) fn register(table: &mut CommandTable) {
    table.read("ping", -1, ping);
    table.read("echo", 2, echo);
    table.read("dbsize", 1, dbsize);
    table.write_keyspace("flushdb", -1, flushall);
    table.write_keyspace("flushall", -1, flushall);
    table.read("info", -1, info);
    table.read("time", 1, time);
    table.read("quit", 1, quit);
    table.read("client", -2, client);
    table.read("config", -2, config);
    table.read("command", -1, command);
}

/// PING [message]
fn ping(_engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    match args {
        [_] => Ok(RespValue::pong()),
        [_, msg] => Ok(bulk(msg.clone())),
        _ => Err(CommandError::WrongArity("ping".into())),
    }
}

/// ECHO message
fn echo(_engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    Ok(bulk(args[1].clone()))
}

/// DBSIZE
fn dbsize(engine: &StorageEngine, _args: &[Bytes]) -> CommandResult {
    Ok(int(engine.len()))
}

/// FLUSHDB / FLUSHALL [ASYNC|SYNC]
fn flushall(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    match &args[1..] {
        [] => {}
        [mode] if is_opt(mode, "ASYNC") || is_opt(mode, "SYNC") => {}
        _ => return Err(CommandError::Syntax),
    }
    engine.flush();
    Ok(RespValue::ok())
}

/// INFO [section]
///
/// Sections: `server`, `stats`, `keyspace`. Anything else, `all` or no
/// argument returns everything.
fn info(engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let section = args.get(1).map(|s| lossy(s).to_ascii_lowercase());
    let wants = |name: &str| match section.as_deref() {
        None | Some("all") | Some("default") | Some("everything") => true,
        Some(s) => s == name,
    };
    let stats = engine.stats();

    let mut out = String::new();
    if wants("server") {
        let _ = write!(
            out,
            "# Server\r\n\
             memkv_version:{}\r\n\
             os:{}\r\n\
             arch:{}\r\n\
             process_id:{}\r\n\
             uptime_in_seconds:{}\r\n\
             \r\n",
            crate::VERSION,
            std::env::consts::OS,
            std::env::consts::ARCH,
            std::process::id(),
            stats.uptime_secs,
        );
    }
    if wants("stats") {
        let _ = write!(
            out,
            "# Stats\r\n\
             expired_keys:{}\r\n\
             keyspace_hits:{}\r\n\
             keyspace_misses:{}\r\n\
             shards:{}\r\n\
             lock_stripes:{}\r\n\
             \r\n",
            stats.expired_keys,
            stats.keyspace_hits,
            stats.keyspace_misses,
            stats.shards,
            stats.stripes,
        );
    }
    if wants("keyspace") {
        let _ = write!(out, "# Keyspace\r\n");
        if stats.keys > 0 {
            let _ = write!(
                out,
                "db0:keys={},expires={}\r\n",
                stats.keys, stats.volatile_keys
            );
        }
    }
    Ok(bulk(Bytes::from(out)))
}

/// TIME
fn time(_engine: &StorageEngine, _args: &[Bytes]) -> CommandResult {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Ok(bulk_array([
        Bytes::from(now.as_secs().to_string()),
        Bytes::from(now.subsec_micros().to_string()),
    ]))
}

/// QUIT. The connection closes after the reply is written.
fn quit(_engine: &StorageEngine, _args: &[Bytes]) -> CommandResult {
    Ok(RespValue::ok())
}

/// CLIENT SETNAME | GETNAME | SETINFO | ID
///
/// Accepted so that client libraries can complete their handshake.
fn client(_engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let sub = &args[1];
    if is_opt(sub, "SETNAME") || is_opt(sub, "SETINFO") {
        Ok(RespValue::ok())
    } else if is_opt(sub, "GETNAME") {
        Ok(RespValue::NullBulk)
    } else if is_opt(sub, "ID") {
        Ok(RespValue::Integer(std::process::id() as i64))
    } else {
        Err(CommandError::Other(format!(
            "unknown subcommand '{}'",
            lossy(sub)
        )))
    }
}

/// CONFIG GET pattern | CONFIG SET parameter value
///
/// Runtime configuration is not exposed; GET answers with an empty list.
fn config(_engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let sub = &args[1];
    if is_opt(sub, "GET") {
        if args.len() != 3 {
            return Err(CommandError::WrongArity("config|get".into()));
        }
        Ok(RespValue::Array(Vec::new()))
    } else if is_opt(sub, "SET") {
        if args.len() != 4 {
            return Err(CommandError::WrongArity("config|set".into()));
        }
        Ok(RespValue::ok())
    } else {
        Err(CommandError::Other(format!(
            "unknown CONFIG subcommand '{}'",
            lossy(sub)
        )))
    }
}

/// COMMAND [COUNT]
///
/// Reports the default table from [`CommandTable::new`], not a custom table
/// passed to `CommandHandler::with_table`.
fn command(_engine: &StorageEngine, args: &[Bytes]) -> CommandResult {
    let table = CommandTable::new();
    match &args[1..] {
        [] => Ok(bulk_array(table.names().into_iter().map(Bytes::from))),
        [sub] if is_opt(sub, "COUNT") => Ok(int(table.len())),
        _ => Err(CommandError::Syntax),
    }
}
