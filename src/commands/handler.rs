//! Command Dispatcher
//!
//! Maps a decoded argument vector onto a [`StorageEngine`] call and turns the
//! result into a [`RespValue`] reply. The first argument names the command
//! (case-insensitive); the rest are its arguments.
//!
//! ## Supported Commands
//!
//! ### Server
//! - `PING [message]`, `ECHO message`, `QUIT`
//! - `COMMAND`, `CONFIG GET parameter`, `INFO`
//! - `DBSIZE`, `FLUSHALL`, `FLUSHDB`, `SAVE`
//!
//! ### Keys
//! - `DEL key [key ...]`, `EXISTS key [key ...]`, `TYPE key`
//! - `EXPIRE key seconds`, `TTL key`, `PERSIST key`
//!
//! ### Strings
//! - `SET key value`, `GET key`, `MGET key [key ...]`, `STRLEN key`, `APPEND key value`
//! - `INCR key`, `DECR key` (alias `DCR`), `INCRBY key n`, `DECRBY key n` (alias `DCRBY`)
//!
//! ### Lists
//! - `LPUSH`/`RPUSH key value [value ...]`, `LPOP`/`RPOP key`, `LLEN key`
//! - `LRANGE key start stop`, `LINDEX key index`, `LSET key index value`, `LREM key count value`
//!
//! ### Sets
//! - `SADD`/`SREM key member [member ...]`, `SISMEMBER key member`
//! - `SMEMBERS key`, `SCARD key`, `SPOP key [count]`
//!
//! ### Hashes
//! - `HSET key field value [field value ...]`, `HGET key field`, `HDEL key field [field ...]`
//! - `HEXISTS key field`, `HLEN key`, `HKEYS key`, `HVALS key`
//! - `HMGET key field [field ...]`, `HGETALL key`
//!
//! Transactions and pub/sub (`MULTI`, `EXEC`, `DISCARD`, `PUBLISH`,
//! `SUBSCRIBE`, `UNSUBSCRIBE`) keep per-client state and are handled by
//! [`Session`](super::Session).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │  execute()  │───>│  dispatch() │───>│  cmd_xxx()  │      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      StorageEngine          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::protocol::RespValue;
use crate::storage::{StorageEngine, StorageError, Ttl};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Either the reply, or an error reply to send instead.
type CmdResult = Result<RespValue, RespValue>;

/// Names reported by `COMMAND`.
const COMMANDS: &[&str] = &[
    "PING", "ECHO", "QUIT", "COMMAND", "CONFIG", "INFO", "DBSIZE", "FLUSHALL", "FLUSHDB", "SAVE",
    "DEL", "EXISTS", "TYPE", "EXPIRE", "TTL", "PERSIST", "SET", "GET", "MGET", "STRLEN", "APPEND",
    "INCR", "DECR", "INCRBY", "DECRBY", "LPUSH", "RPUSH", "LPOP", "RPOP", "LLEN", "LRANGE",
    "LINDEX", "LSET", "LREM", "SADD", "SREM", "SISMEMBER", "SMEMBERS", "SCARD", "SPOP", "HSET",
    "HGET", "HDEL", "HEXISTS", "HLEN", "HKEYS", "HVALS", "HMGET", "HGETALL", "MULTI", "EXEC",
    "DISCARD", "PUBLISH", "SUBSCRIBE", "UNSUBSCRIBE",
];

/// Commands that need per-connection state and are run by a
/// [`Session`](super::Session) instead.
const SESSION_COMMANDS: &[&str] = &[
    "MULTI",
    "EXEC",
    "DISCARD",
    "PUBLISH",
    "SUBSCRIBE",
    "UNSUBSCRIBE",
];

/// Executes commands against a shared storage engine.
#[derive(Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
    /// Server start time for INFO
    start_time: Instant,
}

impl CommandHandler {
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self {
            storage,
            start_time: Instant::now(),
        }
    }

    /// Executes one command and returns the reply.
    ///
    /// `args[0]` is the command name. An empty vector is rejected.
    pub fn execute(&self, args: &[Bytes]) -> RespValue {
        let Some((name, rest)) = args.split_first() else {
            return RespValue::error("ERR empty command");
        };

        let cmd = String::from_utf8_lossy(name).to_ascii_uppercase();
        debug!(command = %cmd, args = rest.len(), "Executing command");

        self.dispatch(&cmd, rest).unwrap_or_else(|err| err)
    }

    fn dispatch(&self, cmd: &str, args: &[Bytes]) -> CmdResult {
        match cmd {
            // Server commands
            "PING" => self.cmd_ping(args),
            "ECHO" => self.cmd_echo(args),
            "QUIT" => Ok(RespValue::ok()),
            "COMMAND" => Ok(RespValue::bulk_array(
                COMMANDS.iter().map(|c| Bytes::from_static(c.as_bytes())),
            )),
            "CONFIG" => self.cmd_config(args),
            "INFO" => Ok(self.cmd_info()),
            "DBSIZE" => {
                arity("dbsize", args, 0)?;
                Ok(RespValue::count(self.storage.dbsize()))
            }
            "FLUSHALL" | "FLUSHDB" => {
                arity("flushall", args, 0)?;
                self.storage.flushall();
                Ok(RespValue::ok())
            }
            "SAVE" => self.cmd_save(args),

            // Key commands
            "DEL" => {
                at_least("del", args, 1)?;
                Ok(RespValue::count(self.storage.del(args)))
            }
            "EXISTS" => {
                at_least("exists", args, 1)?;
                Ok(RespValue::count(self.storage.exists(args)))
            }
            "TYPE" => {
                arity("type", args, 1)?;
                let name = self.storage.key_type(&args[0]).map_or("none", |k| k.as_str());
                Ok(RespValue::simple_string(name))
            }
            "EXPIRE" => {
                arity("expire", args, 2)?;
                let seconds = integer(&args[1])?;
                Ok(RespValue::boolean(self.storage.expire(&args[0], seconds)))
            }
            "TTL" => {
                arity("ttl", args, 1)?;
                Ok(RespValue::integer(self.ttl_reply(&args[0])))
            }
            "PERSIST" => {
                arity("persist", args, 1)?;
                Ok(RespValue::boolean(self.storage.persist(&args[0])))
            }

            // String commands
            "SET" => {
                arity("set", args, 2)?;
                self.storage.set(args[0].clone(), args[1].clone());
                Ok(RespValue::ok())
            }
            "GET" => {
                arity("get", args, 1)?;
                Ok(RespValue::optional(self.storage.get(&args[0])?))
            }
            "MGET" => {
                at_least("mget", args, 1)?;
                Ok(RespValue::optional_array(self.storage.mget(args)))
            }
            "STRLEN" => {
                arity("strlen", args, 1)?;
                Ok(RespValue::count(self.storage.strlen(&args[0])?))
            }
            "APPEND" => {
                arity("append", args, 2)?;
                Ok(RespValue::count(self.storage.append(&args[0], &args[1])?))
            }
            "INCR" => {
                arity("incr", args, 1)?;
                Ok(RespValue::integer(self.storage.incr(&args[0])?))
            }
            "DECR" | "DCR" => {
                arity("decr", args, 1)?;
                Ok(RespValue::integer(self.storage.decr(&args[0])?))
            }
            "INCRBY" => {
                arity("incrby", args, 2)?;
                let delta = integer(&args[1])?;
                Ok(RespValue::integer(self.storage.incr_by(&args[0], delta)?))
            }
            "DECRBY" | "DCRBY" => {
                arity("decrby", args, 2)?;
                let delta = integer(&args[1])?;
                Ok(RespValue::integer(self.storage.decr_by(&args[0], delta)?))
            }

            // List commands
            "LPUSH" => {
                at_least("lpush", args, 2)?;
                Ok(RespValue::count(self.storage.lpush(&args[0], &args[1..])?))
            }
            "RPUSH" => {
                at_least("rpush", args, 2)?;
                Ok(RespValue::count(self.storage.rpush(&args[0], &args[1..])?))
            }
            "LPOP" => {
                arity("lpop", args, 1)?;
                Ok(RespValue::optional(self.storage.lpop(&args[0])?))
            }
            "RPOP" => {
                arity("rpop", args, 1)?;
                Ok(RespValue::optional(self.storage.rpop(&args[0])?))
            }
            "LLEN" => {
                arity("llen", args, 1)?;
                Ok(RespValue::count(self.storage.llen(&args[0])?))
            }
            "LRANGE" => {
                arity("lrange", args, 3)?;
                let (start, stop) = (integer(&args[1])?, integer(&args[2])?);
                Ok(RespValue::bulk_array(self.storage.lrange(&args[0], start, stop)?))
            }
            "LINDEX" => {
                arity("lindex", args, 2)?;
                let index = integer(&args[1])?;
                Ok(RespValue::optional(self.storage.lindex(&args[0], index)?))
            }
            "LSET" => {
                arity("lset", args, 3)?;
                let index = integer(&args[1])?;
                self.storage.lset(&args[0], index, args[2].clone())?;
                Ok(RespValue::ok())
            }
            "LREM" => {
                arity("lrem", args, 3)?;
                let count = integer(&args[1])?;
                Ok(RespValue::count(self.storage.lrem(&args[0], count, &args[2])?))
            }

            // Set commands
            "SADD" => {
                at_least("sadd", args, 2)?;
                Ok(RespValue::count(self.storage.sadd(&args[0], &args[1..])?))
            }
            "SREM" => {
                at_least("srem", args, 2)?;
                Ok(RespValue::count(self.storage.srem(&args[0], &args[1..])?))
            }
            "SISMEMBER" => {
                arity("sismember", args, 2)?;
                Ok(RespValue::boolean(self.storage.sismember(&args[0], &args[1])?))
            }
            "SMEMBERS" => {
                arity("smembers", args, 1)?;
                Ok(RespValue::bulk_array(self.storage.smembers(&args[0])?))
            }
            "SCARD" => {
                arity("scard", args, 1)?;
                Ok(RespValue::count(self.storage.scard(&args[0])?))
            }
            "SPOP" => self.cmd_spop(args),

            // Hash commands
            "HSET" => {
                at_least("hset", args, 3)?;
                Ok(RespValue::count(self.storage.hset(&args[0], &args[1..])?))
            }
            "HGET" => {
                arity("hget", args, 2)?;
                Ok(RespValue::optional(self.storage.hget(&args[0], &args[1])?))
            }
            "HDEL" => {
                at_least("hdel", args, 2)?;
                Ok(RespValue::count(self.storage.hdel(&args[0], &args[1..])?))
            }
            "HEXISTS" => {
                arity("hexists", args, 2)?;
                Ok(RespValue::boolean(self.storage.hexists(&args[0], &args[1])?))
            }
            "HLEN" => {
                arity("hlen", args, 1)?;
                Ok(RespValue::count(self.storage.hlen(&args[0])?))
            }
            "HKEYS" => {
                arity("hkeys", args, 1)?;
                Ok(RespValue::bulk_array(self.storage.hkeys(&args[0])?))
            }
            "HVALS" => {
                arity("hvals", args, 1)?;
                Ok(RespValue::bulk_array(self.storage.hvals(&args[0])?))
            }
            "HMGET" => {
                at_least("hmget", args, 2)?;
                Ok(RespValue::optional_array(self.storage.hmget(&args[0], &args[1..])?))
            }
            "HGETALL" => {
                arity("hgetall", args, 1)?;
                let pairs = self.storage.hgetall(&args[0])?;
                Ok(RespValue::bulk_array(
                    pairs.into_iter().flat_map(|(field, value)| [field, value]),
                ))
            }

            _ if SESSION_COMMANDS.contains(&cmd) => Err(RespValue::error(format!(
                "ERR '{}' is only available on a client connection",
                cmd.to_ascii_lowercase()
            ))),

            _ => Err(RespValue::error(format!(
                "ERR unknown command '{}'",
                cmd.to_ascii_lowercase()
            ))),
        }
    }

    fn ttl_reply(&self, key: &Bytes) -> i64 {
        let ttl: Ttl = self.storage.ttl(key);
        ttl.as_reply()
    }

    /// PING [message]
    fn cmd_ping(&self, args: &[Bytes]) -> CmdResult {
        match args {
            [] => Ok(RespValue::pong()),
            [message] => Ok(RespValue::bulk_string(message.clone())),
            _ => Err(wrong_arity("ping")),
        }
    }

    /// ECHO message
    fn cmd_echo(&self, args: &[Bytes]) -> CmdResult {
        arity("echo", args, 1)?;
        Ok(RespValue::bulk_string(args[0].clone()))
    }

    /// CONFIG GET parameter
    ///
    /// Only enough for benchmark tools to start: a fixed set of pairs.
    fn cmd_config(&self, args: &[Bytes]) -> CmdResult {
        at_least("config", args, 1)?;

        if !args[0].eq_ignore_ascii_case(b"GET") {
            return Err(RespValue::error(format!(
                "ERR unknown CONFIG subcommand '{}'",
                String::from_utf8_lossy(&args[0])
            )));
        }
        arity("config|get", args, 2)?;

        let dir = self
            .storage
            .snapshot()
            .and_then(|s| s.path().parent())
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let max_keys = self.storage.max_keys().to_string();

        let pairs = [
            ("timeout", "0".to_string()),
            ("databases", "1".to_string()),
            ("requirepass", String::new()),
            ("maxmemory", "0".to_string()),
            ("maxkeys", max_keys),
            ("dir", dir),
        ];
        Ok(RespValue::bulk_array(pairs.into_iter().flat_map(
            |(name, value)| [Bytes::from_static(name.as_bytes()), Bytes::from(value)],
        )))
    }

    /// SAVE
    fn cmd_save(&self, args: &[Bytes]) -> CmdResult {
        arity("save", args, 0)?;
        if self.storage.snapshot().is_none() {
            return Err(RespValue::error("ERR persistence is disabled"));
        }
        if self.storage.save() {
            Ok(RespValue::ok())
        } else {
            Err(RespValue::error("ERR snapshot failed, see server log"))
        }
    }

    /// SPOP key [count]
    ///
    /// Without a count the reply is a single member (or null); with one it
    /// is an array.
    fn cmd_spop(&self, args: &[Bytes]) -> CmdResult {
        match args {
            [key] => {
                let popped = self.storage.spop(key, 1)?;
                Ok(RespValue::optional(popped.into_iter().next()))
            }
            [key, count] => {
                let count = usize::try_from(integer(count)?)
                    .map_err(|_| RespValue::error("ERR value is out of range, must be positive"))?;
                Ok(RespValue::bulk_array(self.storage.spop(key, count)?))
            }
            _ => Err(wrong_arity("spop")),
        }
    }

    /// INFO
    fn cmd_info(&self) -> RespValue {
        let stats = self.storage.stats();
        let persistence = match self.storage.snapshot() {
            Some(snapshot) => snapshot.path().display().to_string(),
            None => "disabled".to_string(),
        };

        let info = format!(
            "# Server\r\n\
             tidekv_version:{}\r\n\
             os:{}\r\n\
             uptime_in_seconds:{}\r\n\
             \r\n\
             # Stats\r\n\
             keyspace_hits:{}\r\n\
             keyspace_misses:{}\r\n\
             expired_keys:{}\r\n\
             evicted_keys:{}\r\n\
             \r\n\
             # Keyspace\r\n\
             db0:keys={},expires={}\r\n\
             maxkeys:{}\r\n\
             \r\n\
             # Persistence\r\n\
             snapshot:{}\r\n",
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            self.start_time.elapsed().as_secs(),
            stats.hits,
            stats.misses,
            stats.expired,
            stats.evicted,
            stats.keys,
            stats.keys_with_ttl,
            stats.max_keys,
            persistence,
        );

        RespValue::bulk_string(Bytes::from(info))
    }
}

/// True if `name` (already uppercased) is a command the server knows.
pub fn is_known_command(name: &str) -> bool {
    COMMANDS.contains(&name)
}

/// True if the argument vector is a QUIT command.
pub fn is_quit(args: &[Bytes]) -> bool {
    args.first()
        .is_some_and(|name| name.eq_ignore_ascii_case(b"QUIT"))
}

pub(crate) fn wrong_arity(cmd: &str) -> RespValue {
    RespValue::error(format!(
        "ERR wrong number of arguments for '{}' command",
        cmd
    ))
}

fn arity(cmd: &str, args: &[Bytes], expected: usize) -> Result<(), RespValue> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(wrong_arity(cmd))
    }
}

fn at_least(cmd: &str, args: &[Bytes], min: usize) -> Result<(), RespValue> {
    if args.len() >= min {
        Ok(())
    } else {
        Err(wrong_arity(cmd))
    }
}

fn integer(arg: &Bytes) -> Result<i64, RespValue> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| RespValue::from(StorageError::NotAnInteger))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_handler() -> CommandHandler {
        CommandHandler::new(Arc::new(StorageEngine::new()))
    }

    fn run(handler: &CommandHandler, args: &[&str]) -> RespValue {
        let args: Vec<Bytes> = args.iter().map(|s| Bytes::from(s.to_string())).collect();
        handler.execute(&args)
    }

    fn bulk(s: &str) -> RespValue {
        RespValue::bulk_string(Bytes::from(s.to_string()))
    }

    #[test]
    fn test_ping_and_echo() {
        let handler = create_handler();
        assert_eq!(run(&handler, &["PING"]), RespValue::pong());
        assert_eq!(run(&handler, &["ping", "hello"]), bulk("hello"));
        assert_eq!(run(&handler, &["ECHO", "hi"]), bulk("hi"));
        assert!(run(&handler, &["ECHO"]).is_error());
    }

    #[test]
    fn test_set_get_del() {
        let handler = create_handler();
        assert_eq!(run(&handler, &["SET", "name", "tide"]), RespValue::ok());
        assert_eq!(run(&handler, &["GET", "name"]), bulk("tide"));
        assert_eq!(run(&handler, &["DEL", "name", "other"]), RespValue::integer(1));
        assert_eq!(run(&handler, &["GET", "name"]), RespValue::null());
    }

    #[test]
    fn test_wrong_arity_message() {
        let handler = create_handler();
        assert_eq!(
            run(&handler, &["GET"]),
            RespValue::error("ERR wrong number of arguments for 'get' command")
        );
        assert_eq!(
            run(&handler, &["SET", "k"]),
            RespValue::error("ERR wrong number of arguments for 'set' command")
        );
        assert_eq!(
            run(&handler, &["HSET", "h", "f1", "v1", "f2"]),
            RespValue::error("ERR wrong number of arguments for 'hset' command")
        );
    }

    #[test]
    fn test_wrongtype_reply() {
        let handler = create_handler();
        run(&handler, &["LPUSH", "l", "a"]);
        assert_eq!(
            run(&handler, &["GET", "l"]),
            RespValue::error("WRONGTYPE Operation against a key holding the wrong kind of value")
        );
        assert_eq!(run(&handler, &["TYPE", "l"]), RespValue::simple_string("list"));
        assert_eq!(run(&handler, &["TYPE", "nope"]), RespValue::simple_string("none"));
    }

    #[test]
    fn test_counters_and_aliases() {
        let handler = create_handler();
        assert_eq!(run(&handler, &["INCR", "n"]), RespValue::integer(1));
        assert_eq!(run(&handler, &["INCRBY", "n", "10"]), RespValue::integer(11));
        assert_eq!(run(&handler, &["DCR", "n"]), RespValue::integer(10));
        assert_eq!(run(&handler, &["DCRBY", "n", "4"]), RespValue::integer(6));
        assert_eq!(run(&handler, &["DECRBY", "n", "6"]), RespValue::integer(0));

        assert_eq!(
            run(&handler, &["INCRBY", "n", "abc"]),
            RespValue::error("ERR value is not an integer or out of range")
        );
        run(&handler, &["SET", "s", "text"]);
        assert_eq!(
            run(&handler, &["INCR", "s"]),
            RespValue::error("ERR value is not an integer or out of range")
        );
    }

    #[test]
    fn test_expire_ttl_persist() {
        let handler = create_handler();
        assert_eq!(run(&handler, &["TTL", "k"]), RespValue::integer(-2));
        run(&handler, &["SET", "k", "v"]);
        assert_eq!(run(&handler, &["TTL", "k"]), RespValue::integer(-1));
        assert_eq!(run(&handler, &["EXPIRE", "k", "100"]), RespValue::integer(1));

        let ttl = run(&handler, &["TTL", "k"]).as_integer().unwrap();
        assert!((99..=100).contains(&ttl));

        assert_eq!(run(&handler, &["PERSIST", "k"]), RespValue::integer(1));
        assert_eq!(run(&handler, &["PERSIST", "k"]), RespValue::integer(0));
        assert_eq!(run(&handler, &["EXPIRE", "missing", "5"]), RespValue::integer(0));
    }

    #[test]
    fn test_expire_with_largest_integer() {
        let handler = create_handler();
        run(&handler, &["SET", "k", "v"]);

        assert_eq!(
            run(&handler, &["EXPIRE", "k", "9223372036854775807"]),
            RespValue::integer(1)
        );
        assert!(run(&handler, &["TTL", "k"]).as_integer().unwrap() > 0);
        assert_eq!(run(&handler, &["GET", "k"]), bulk("v"));
    }

    #[test]
    fn test_list_commands() {
        let handler = create_handler();
        assert_eq!(run(&handler, &["LPUSH", "L", "a"]), RespValue::integer(1));
        assert_eq!(run(&handler, &["LPUSH", "L", "b"]), RespValue::integer(2));
        assert_eq!(run(&handler, &["RPUSH", "L", "c"]), RespValue::integer(3));
        assert_eq!(
            run(&handler, &["LRANGE", "L", "0", "-1"]),
            RespValue::array(vec![bulk("b"), bulk("a"), bulk("c")])
        );
        assert_eq!(run(&handler, &["LINDEX", "L", "-1"]), bulk("c"));
        assert_eq!(run(&handler, &["LSET", "L", "0", "z"]), RespValue::ok());
        assert_eq!(
            run(&handler, &["LSET", "L", "9", "z"]),
            RespValue::error("ERR index out of range")
        );
        assert_eq!(
            run(&handler, &["LSET", "nope", "0", "z"]),
            RespValue::error("ERR no such key")
        );
        assert_eq!(run(&handler, &["LREM", "L", "0", "a"]), RespValue::integer(1));
        assert_eq!(run(&handler, &["LPOP", "L"]), bulk("z"));
        assert_eq!(run(&handler, &["RPOP", "L"]), bulk("c"));
        assert_eq!(run(&handler, &["LLEN", "L"]), RespValue::integer(0));
        assert_eq!(run(&handler, &["LPOP", "L"]), RespValue::null());
    }

    #[test]
    fn test_set_commands() {
        let handler = create_handler();
        assert_eq!(run(&handler, &["SADD", "S", "a", "b", "a"]), RespValue::integer(2));
        assert_eq!(run(&handler, &["SISMEMBER", "S", "a"]), RespValue::integer(1));
        assert_eq!(run(&handler, &["SCARD", "S"]), RespValue::integer(2));
        assert_eq!(run(&handler, &["SREM", "S", "a"]), RespValue::integer(1));
        assert_eq!(run(&handler, &["SPOP", "S"]), bulk("b"));
        assert_eq!(run(&handler, &["SPOP", "S"]), RespValue::null());

        run(&handler, &["SADD", "S", "x", "y"]);
        let popped = run(&handler, &["SPOP", "S", "5"]);
        assert_eq!(popped.as_array().map(<[RespValue]>::len), Some(2));
        assert!(run(&handler, &["SPOP", "S", "-1"]).is_error());
    }

    #[test]
    fn test_hash_commands() {
        let handler = create_handler();
        assert_eq!(run(&handler, &["HSET", "H", "f1", "v1"]), RespValue::integer(1));
        assert_eq!(run(&handler, &["HSET", "H", "f1", "v2"]), RespValue::integer(0));
        assert_eq!(run(&handler, &["HGET", "H", "f1"]), bulk("v2"));
        assert_eq!(
            run(&handler, &["HMGET", "H", "f1", "nope"]),
            RespValue::array(vec![bulk("v2"), RespValue::null()])
        );
        assert_eq!(
            run(&handler, &["HGETALL", "H"]),
            RespValue::array(vec![bulk("f1"), bulk("v2")])
        );
        assert_eq!(run(&handler, &["HEXISTS", "H", "f1"]), RespValue::integer(1));
        assert_eq!(run(&handler, &["HLEN", "H"]), RespValue::integer(1));
        assert_eq!(run(&handler, &["HDEL", "H", "f1"]), RespValue::integer(1));
        assert_eq!(run(&handler, &["EXISTS", "H"]), RespValue::integer(0));
    }

    #[test]
    fn test_mget_and_strings() {
        let handler = create_handler();
        run(&handler, &["SET", "a", "1"]);
        run(&handler, &["RPUSH", "l", "x"]);
        assert_eq!(
            run(&handler, &["MGET", "a", "l", "none"]),
            RespValue::array(vec![bulk("1"), RespValue::null(), RespValue::null()])
        );
        assert_eq!(run(&handler, &["APPEND", "a", "23"]), RespValue::integer(3));
        assert_eq!(run(&handler, &["STRLEN", "a"]), RespValue::integer(3));
    }

    #[test]
    fn test_dbsize_and_flush() {
        let handler = create_handler();
        run(&handler, &["SET", "a", "1"]);
        run(&handler, &["SADD", "s", "m"]);
        assert_eq!(run(&handler, &["DBSIZE"]), RespValue::integer(2));
        assert_eq!(run(&handler, &["FLUSHDB"]), RespValue::ok());
        assert_eq!(run(&handler, &["DBSIZE"]), RespValue::integer(0));
    }

    #[test]
    fn test_save_without_persistence() {
        let handler = create_handler();
        assert!(run(&handler, &["SAVE"]).is_error());
    }

    #[test]
    fn test_config_get_stub() {
        let handler = create_handler();
        let reply = run(&handler, &["CONFIG", "GET", "save"]);
        assert_eq!(reply.as_array().map(|a| a.len() % 2), Some(0));
        assert!(run(&handler, &["CONFIG", "SET", "x", "y"]).is_error());
    }

    #[test]
    fn test_info_reports_counters() {
        let handler = create_handler();
        run(&handler, &["SET", "a", "1"]);
        run(&handler, &["GET", "a"]);
        run(&handler, &["GET", "b"]);

        let RespValue::BulkString(info) = run(&handler, &["INFO"]) else {
            panic!("INFO must be a bulk string");
        };
        let info = String::from_utf8(info.to_vec()).unwrap();
        assert!(info.contains("keyspace_hits:1"));
        assert!(info.contains("keyspace_misses:1"));
        assert!(info.contains("db0:keys=1,expires=0"));
    }

    #[test]
    fn test_unknown_and_empty_command() {
        let handler = create_handler();
        assert_eq!(
            run(&handler, &["NOPE"]),
            RespValue::error("ERR unknown command 'nope'")
        );
        assert!(handler.execute(&[]).is_error());
        assert!(run(&handler, &["MULTI"]).is_error());
        assert!(is_known_command("SUBSCRIBE"));
        assert!(!is_known_command("NOPE"));
    }

    #[test]
    fn test_is_quit() {
        assert!(is_quit(&[Bytes::from("quit")]));
        assert!(!is_quit(&[Bytes::from("PING")]));
        assert!(!is_quit(&[]));
        assert_eq!(run(&create_handler(), &["QUIT"]), RespValue::ok());
    }
}
