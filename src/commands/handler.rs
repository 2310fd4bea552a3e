//! Command Dispatcher
//!
//! A static routing table maps upper-cased command names to handlers. Each
//! handler checks its own argument count, runs against the [`Keyspace`], and
//! returns a [`RespValue`]; failures are `RespValue::Error`, never `Err`.
//!
//! The same dispatcher serves live connections and log replay, so replaying a
//! command has exactly the effect it had when it was first executed.
//!
//! ## Commands
//!
//! | Command    | Arguments                 | Logged |
//! |------------|---------------------------|--------|
//! | `PING`     | `[message]`               |        |
//! | `SET`      | `key value [EX s\|EXAT t]` | yes    |
//! | `GET`      | `key`                     |        |
//! | `HSET`     | `key field value`         | yes    |
//! | `HGET`     | `key field`               |        |
//! | `HGETALL`  | `key`                     |        |
//! | `HDEL`     | `key field`               | yes    |
//! | `HLEN`     | `key`                     |        |
//! | `DEL`      | `key`                     | yes    |
//! | `FLUSHALL` |                           | yes    |
//! | `INFO`     |                           |        |
//! | `INCR`     | `key`                     | yes    |
//! | `DECR`     | `key`                     | yes    |
//! | `EXPIRE`   | `key seconds`             | durable TTL only |
//! | `EXPIREAT` | `key unix-seconds`        | durable TTL only |
//! | `TTL`      | `key`                     |        |
//! | `PERSIST`  | `key`                     | durable TTL only |

use crate::protocol::{Command, RespValue};
use crate::storage::{unix_now, Keyspace};
use bytes::Bytes;
use std::sync::Arc;

type Handler = fn(&Dispatcher, &[Bytes]) -> RespValue;

/// When a command is written to the append-only log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogPolicy {
    Never,
    Always,
    /// Only when durable TTLs are enabled
    DurableTtl,
}

struct CommandSpec {
    name: &'static str,
    handler: Handler,
    log: LogPolicy,
}

static COMMAND_TABLE: &[CommandSpec] = &[
    CommandSpec { name: "PING", handler: Dispatcher::cmd_ping, log: LogPolicy::Never },
    CommandSpec { name: "SET", handler: Dispatcher::cmd_set, log: LogPolicy::Always },
    CommandSpec { name: "GET", handler: Dispatcher::cmd_get, log: LogPolicy::Never },
    CommandSpec { name: "HSET", handler: Dispatcher::cmd_hset, log: LogPolicy::Always },
    CommandSpec { name: "HGET", handler: Dispatcher::cmd_hget, log: LogPolicy::Never },
    CommandSpec { name: "HGETALL", handler: Dispatcher::cmd_hgetall, log: LogPolicy::Never },
    CommandSpec { name: "HDEL", handler: Dispatcher::cmd_hdel, log: LogPolicy::Always },
    CommandSpec { name: "HLEN", handler: Dispatcher::cmd_hlen, log: LogPolicy::Never },
    CommandSpec { name: "DEL", handler: Dispatcher::cmd_del, log: LogPolicy::Always },
    CommandSpec { name: "FLUSHALL", handler: Dispatcher::cmd_flushall, log: LogPolicy::Always },
    CommandSpec { name: "INFO", handler: Dispatcher::cmd_info, log: LogPolicy::Never },
    CommandSpec { name: "INCR", handler: Dispatcher::cmd_incr, log: LogPolicy::Always },
    CommandSpec { name: "DECR", handler: Dispatcher::cmd_decr, log: LogPolicy::Always },
    CommandSpec { name: "EXPIRE", handler: Dispatcher::cmd_expire, log: LogPolicy::DurableTtl },
    CommandSpec { name: "EXPIREAT", handler: Dispatcher::cmd_expireat, log: LogPolicy::DurableTtl },
    CommandSpec { name: "TTL", handler: Dispatcher::cmd_ttl, log: LogPolicy::Never },
    CommandSpec { name: "PERSIST", handler: Dispatcher::cmd_persist, log: LogPolicy::DurableTtl },
];

fn lookup(name: &str) -> Option<&'static CommandSpec> {
    COMMAND_TABLE
        .iter()
        .find(|spec| spec.name.eq_ignore_ascii_case(name))
}

fn wrong_arity(name: &str) -> RespValue {
    RespValue::error(format!(
        "ERR wrong number of arguments for '{}' command",
        name.to_ascii_lowercase()
    ))
}

fn parse_i64(arg: &Bytes) -> Option<i64> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}

/// Parses a strictly positive number of seconds.
fn parse_ttl(arg: &Bytes) -> Option<i64> {
    parse_i64(arg).filter(|secs| *secs > 0)
}

/// Routes commands to handlers. Cheap to clone; every clone shares the same
/// keyspace.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    keyspace: Arc<Keyspace>,
    durable_ttl: bool,
}

impl Dispatcher {
    pub fn new(keyspace: Arc<Keyspace>) -> Self {
        Self {
            keyspace,
            durable_ttl: false,
        }
    }

    /// Also logs EXPIRE / EXPIREAT / PERSIST, and logs relative TTLs in
    /// absolute form so replay measures them against the wall clock.
    pub fn with_durable_ttl(mut self, enabled: bool) -> Self {
        self.durable_ttl = enabled;
        self
    }

    pub fn keyspace(&self) -> &Arc<Keyspace> {
        &self.keyspace
    }

    /// Runs the named command. Returns `None` for an unknown name; deciding
    /// what to tell the client is up to the caller.
    pub fn dispatch(&self, name: &str, args: &[Bytes]) -> Option<RespValue> {
        lookup(name).map(|spec| (spec.handler)(self, args))
    }

    /// [`dispatch`](Self::dispatch) for an already-validated command.
    pub fn execute(&self, command: &Command) -> Option<RespValue> {
        self.dispatch(&command.name, &command.args)
    }

    pub fn is_known(&self, name: &str) -> bool {
        lookup(name).is_some()
    }

    /// Whether a command belongs in the append-only log.
    pub fn should_persist(&self, name: &str) -> bool {
        match lookup(name).map(|spec| spec.log) {
            Some(LogPolicy::Always) => true,
            Some(LogPolicy::DurableTtl) => self.durable_ttl,
            Some(LogPolicy::Never) | None => false,
        }
    }

    /// The form a persisted command is executed in and written to the log.
    ///
    /// Without durable TTLs this is the command itself. With them, a relative
    /// TTL is pinned to one absolute deadline: `SET k v EX n` becomes
    /// `SET k v EXAT <deadline>` and `EXPIRE k n` becomes
    /// `EXPIREAT k <deadline>`. Executing the returned command, rather than the
    /// original, keeps the live deadline and the logged one identical.
    /// Commands that would fail are returned verbatim and fail the same way on
    /// replay.
    pub fn log_form(&self, command: &Command) -> Command {
        if !self.durable_ttl {
            return command.clone();
        }

        let args = &command.args;
        match command.name.as_str() {
            "SET" if args.len() == 4 && args[2].eq_ignore_ascii_case(b"EX") => {
                match parse_ttl(&args[3]) {
                    Some(secs) => Command::new(
                        "SET",
                        vec![
                            args[0].clone(),
                            args[1].clone(),
                            Bytes::from_static(b"EXAT"),
                            deadline_after(secs),
                        ],
                    ),
                    None => command.clone(),
                }
            }
            "EXPIRE" if args.len() == 2 => match parse_ttl(&args[1]) {
                Some(secs) => Command::new("EXPIREAT", vec![args[0].clone(), deadline_after(secs)]),
                None => command.clone(),
            },
            _ => command.clone(),
        }
    }

    // ========================================================================
    // Connection / server
    // ========================================================================

    /// PING [message]
    fn cmd_ping(&self, args: &[Bytes]) -> RespValue {
        match args {
            [] => RespValue::pong(),
            [message] => RespValue::bulk_string(message.clone()),
            _ => wrong_arity("PING"),
        }
    }

    /// INFO
    fn cmd_info(&self, args: &[Bytes]) -> RespValue {
        if !args.is_empty() {
            return wrong_arity("INFO");
        }

        let stats = self.keyspace.stats();
        let report = format!(
            "# Server Info\nkeys:{}\nhashes:{}\nfields:{}\n",
            stats.keys, stats.hashes, stats.fields
        );
        RespValue::bulk_string(report)
    }

    /// FLUSHALL
    fn cmd_flushall(&self, args: &[Bytes]) -> RespValue {
        if !args.is_empty() {
            return wrong_arity("FLUSHALL");
        }
        self.keyspace.flush();
        RespValue::ok()
    }

    // ========================================================================
    // Strings
    // ========================================================================

    /// SET key value [EX seconds | EXAT unix-seconds]
    fn cmd_set(&self, args: &[Bytes]) -> RespValue {
        let deadline = match args.len() {
            0 | 1 => return wrong_arity("SET"),
            2 => None,
            4 => {
                let absolute = if args[2].eq_ignore_ascii_case(b"EX") {
                    false
                } else if args[2].eq_ignore_ascii_case(b"EXAT") {
                    true
                } else {
                    return RespValue::error("ERR syntax error");
                };
                match parse_ttl(&args[3]) {
                    Some(secs) if absolute => Some(secs),
                    Some(secs) => Some(unix_now().saturating_add(secs)),
                    None => return RespValue::error("ERR invalid expire time"),
                }
            }
            _ => return RespValue::error("ERR syntax error"),
        };

        self.keyspace.set_until(args[0].clone(), args[1].clone(), deadline);
        RespValue::ok()
    }

    /// GET key
    fn cmd_get(&self, args: &[Bytes]) -> RespValue {
        let [key] = args else {
            return wrong_arity("GET");
        };

        self.keyspace
            .get(key)
            .map_or_else(RespValue::null, RespValue::BulkString)
    }

    /// INCR key
    fn cmd_incr(&self, args: &[Bytes]) -> RespValue {
        let [key] = args else {
            return wrong_arity("INCR");
        };

        match self.keyspace.incr(key) {
            Ok(n) => RespValue::integer(n),
            Err(e) => RespValue::error(format!("ERR {}", e)),
        }
    }

    /// DECR key
    fn cmd_decr(&self, args: &[Bytes]) -> RespValue {
        let [key] = args else {
            return wrong_arity("DECR");
        };

        match self.keyspace.decr(key) {
            Ok(n) => RespValue::integer(n),
            Err(e) => RespValue::error(format!("ERR {}", e)),
        }
    }

    // ========================================================================
    // Hashes
    // ========================================================================

    /// HSET key field value
    fn cmd_hset(&self, args: &[Bytes]) -> RespValue {
        let [key, field, value] = args else {
            return wrong_arity("HSET");
        };

        self.keyspace
            .hset(key.clone(), field.clone(), value.clone());
        RespValue::ok()
    }

    /// HGET key field
    fn cmd_hget(&self, args: &[Bytes]) -> RespValue {
        let [key, field] = args else {
            return wrong_arity("HGET");
        };

        self.keyspace
            .hget(key, field)
            .map_or_else(RespValue::null, RespValue::BulkString)
    }

    /// HGETALL key
    fn cmd_hgetall(&self, args: &[Bytes]) -> RespValue {
        let [key] = args else {
            return wrong_arity("HGETALL");
        };

        match self.keyspace.hgetall(key) {
            Some(pairs) => RespValue::array(
                pairs
                    .into_iter()
                    .flat_map(|(field, value)| {
                        [RespValue::BulkString(field), RespValue::BulkString(value)]
                    })
                    .collect(),
            ),
            None => RespValue::null(),
        }
    }

    /// HDEL key field
    fn cmd_hdel(&self, args: &[Bytes]) -> RespValue {
        let [key, field] = args else {
            return wrong_arity("HDEL");
        };

        self.keyspace.hdel(key, field);
        RespValue::ok()
    }

    /// HLEN key
    fn cmd_hlen(&self, args: &[Bytes]) -> RespValue {
        let [key] = args else {
            return wrong_arity("HLEN");
        };

        RespValue::integer(self.keyspace.hlen(key) as i64)
    }

    // ========================================================================
    // Keys
    // ========================================================================

    /// DEL key
    fn cmd_del(&self, args: &[Bytes]) -> RespValue {
        let [key] = args else {
            return wrong_arity("DEL");
        };

        self.keyspace.delete(key);
        RespValue::ok()
    }

    /// EXPIRE key seconds
    fn cmd_expire(&self, args: &[Bytes]) -> RespValue {
        let [key, secs] = args else {
            return wrong_arity("EXPIRE");
        };

        match parse_ttl(secs) {
            Some(secs) => RespValue::integer(self.keyspace.expire(key, secs) as i64),
            None => RespValue::error("ERR invalid expire time"),
        }
    }

    /// EXPIREAT key unix-seconds
    fn cmd_expireat(&self, args: &[Bytes]) -> RespValue {
        let [key, deadline] = args else {
            return wrong_arity("EXPIREAT");
        };

        match parse_i64(deadline) {
            Some(deadline) => RespValue::integer(self.keyspace.expire_at(key, deadline) as i64),
            None => RespValue::error("ERR value is not an integer"),
        }
    }

    /// TTL key
    fn cmd_ttl(&self, args: &[Bytes]) -> RespValue {
        let [key] = args else {
            return wrong_arity("TTL");
        };

        RespValue::integer(self.keyspace.ttl(key))
    }

    /// PERSIST key
    fn cmd_persist(&self, args: &[Bytes]) -> RespValue {
        let [key] = args else {
            return wrong_arity("PERSIST");
        };

        RespValue::integer(self.keyspace.persist(key) as i64)
    }
}

fn deadline_after(secs: i64) -> Bytes {
    Bytes::from(unix_now().saturating_add(secs).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::KeyspaceStats;

    fn create_dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(Keyspace::new()))
    }

    fn run(d: &Dispatcher, parts: &[&str]) -> RespValue {
        let args: Vec<Bytes> = parts[1..]
            .iter()
            .map(|s| Bytes::from(s.to_string()))
            .collect();
        d.dispatch(parts[0], &args).expect("known command")
    }

    fn bulk(s: &str) -> RespValue {
        RespValue::bulk_string(Bytes::from(s.to_string()))
    }

    #[test]
    fn test_ping() {
        let d = create_dispatcher();
        assert_eq!(run(&d, &["PING"]), RespValue::pong());
        assert_eq!(run(&d, &["ping", "hello"]), bulk("hello"));

        // Bulk framing carries any payload, CRLF included.
        let reply = run(&d, &["PING", "a\r\nb"]);
        assert_eq!(reply.serialize(), b"$4\r\na\r\nb\r\n");
    }

    #[test]
    fn test_unknown_command_is_not_answered_by_dispatcher() {
        let d = create_dispatcher();
        assert!(d.dispatch("NOPE", &[]).is_none());
        assert!(!d.is_known("NOPE"));
        assert!(d.is_known("hgetall"));
    }

    #[test]
    fn test_wrong_arity_is_an_error_and_does_not_mutate() {
        let d = create_dispatcher();
        run(&d, &["SET", "k", "v", "EX", "100"]);
        run(&d, &["HSET", "h", "f", "v"]);
        let before = d.keyspace().stats();

        let cases: &[&[&str]] = &[
            &["PING", "a", "b"],
            &["SET", "k"],
            &["GET"],
            &["HSET", "h", "f"],
            &["HGET", "h"],
            &["HGETALL"],
            &["HDEL", "h"],
            &["HLEN", "h", "extra"],
            &["DEL"],
            &["DEL", "k", "h"],
            &["FLUSHALL", "now"],
            &["INFO", "all"],
            &["INCR"],
            &["DECR", "k", "k"],
            &["EXPIRE", "k"],
            &["EXPIREAT", "k"],
            &["TTL"],
            &["PERSIST", "k", "k"],
        ];

        for case in cases {
            let expected = RespValue::error(format!(
                "ERR wrong number of arguments for '{}' command",
                case[0].to_ascii_lowercase()
            ));
            assert_eq!(run(&d, case), expected, "case {:?}", case);
        }

        assert_eq!(d.keyspace().stats(), before);
        assert_eq!(run(&d, &["GET", "k"]), bulk("v"));
        assert!(matches!(run(&d, &["TTL", "k"]), RespValue::Integer(n) if n > 0));
    }

    #[test]
    fn test_set_options() {
        let d = create_dispatcher();
        assert_eq!(run(&d, &["SET", "k", "v"]), RespValue::ok());
        assert_eq!(run(&d, &["SET", "k", "v", "ex", "10"]), RespValue::ok());
        assert!(matches!(run(&d, &["TTL", "k"]), RespValue::Integer(9..=10)));

        assert_eq!(
            run(&d, &["SET", "k", "v", "PX", "10"]),
            RespValue::error("ERR syntax error")
        );
        assert_eq!(
            run(&d, &["SET", "k", "v", "EX"]),
            RespValue::error("ERR syntax error")
        );
        assert_eq!(
            run(&d, &["SET", "k", "v", "EX", "0"]),
            RespValue::error("ERR invalid expire time")
        );
        assert_eq!(
            run(&d, &["SET", "k", "v", "EX", "soon"]),
            RespValue::error("ERR invalid expire time")
        );
        assert!(matches!(run(&d, &["TTL", "k"]), RespValue::Integer(9..=10)));

        let at = unix_now() + 100;
        assert_eq!(run(&d, &["SET", "k", "v", "EXAT", &at.to_string()]), RespValue::ok());
        assert_eq!(d.keyspace().deadline(b"k"), Some(at));

        let past = (unix_now() - 5).to_string();
        assert_eq!(run(&d, &["SET", "k", "v", "exat", &past]), RespValue::ok());
        assert_eq!(run(&d, &["GET", "k"]), RespValue::null());
        assert_eq!(
            run(&d, &["SET", "k", "v", "EXAT", "-1"]),
            RespValue::error("ERR invalid expire time")
        );
    }

    #[test]
    fn test_get_absent_and_hash_key_is_null() {
        let d = create_dispatcher();
        assert_eq!(run(&d, &["GET", "nothing"]), RespValue::null());
        run(&d, &["HSET", "h", "f", "v"]);
        assert_eq!(run(&d, &["GET", "h"]), RespValue::null());
    }

    #[test]
    fn test_ttl_semantics() {
        let d = create_dispatcher();
        assert_eq!(run(&d, &["TTL", "absent"]), RespValue::integer(-2));

        run(&d, &["SET", "k", "v"]);
        assert_eq!(run(&d, &["TTL", "k"]), RespValue::integer(-1));

        assert_eq!(run(&d, &["EXPIRE", "k", "30"]), RespValue::integer(1));
        assert_eq!(run(&d, &["EXPIRE", "absent", "30"]), RespValue::integer(0));
        assert_eq!(
            run(&d, &["EXPIRE", "k", "-1"]),
            RespValue::error("ERR invalid expire time")
        );

        d.keyspace().backdate(b"k", 1);
        assert_eq!(run(&d, &["TTL", "k"]), RespValue::integer(-2));
        assert_eq!(run(&d, &["GET", "k"]), RespValue::null());
        assert_eq!(run(&d, &["TTL", "k"]), RespValue::integer(-2));
    }

    #[test]
    fn test_persist() {
        let d = create_dispatcher();
        assert_eq!(run(&d, &["PERSIST", "absent"]), RespValue::integer(0));

        run(&d, &["SET", "k", "v"]);
        assert_eq!(run(&d, &["PERSIST", "k"]), RespValue::integer(0));

        run(&d, &["EXPIRE", "k", "30"]);
        assert_eq!(run(&d, &["PERSIST", "k"]), RespValue::integer(1));
        assert_eq!(run(&d, &["TTL", "k"]), RespValue::integer(-1));
    }

    #[test]
    fn test_expireat() {
        let d = create_dispatcher();
        run(&d, &["SET", "k", "v"]);

        let future = (unix_now() + 100).to_string();
        assert_eq!(run(&d, &["EXPIREAT", "k", &future]), RespValue::integer(1));
        assert!(matches!(run(&d, &["TTL", "k"]), RespValue::Integer(n) if (99..=100).contains(&n)));

        let past = (unix_now() - 100).to_string();
        assert_eq!(run(&d, &["EXPIREAT", "k", &past]), RespValue::integer(1));
        assert_eq!(run(&d, &["GET", "k"]), RespValue::null());
        assert_eq!(run(&d, &["EXPIREAT", "k", &future]), RespValue::integer(0));
        assert_eq!(
            run(&d, &["EXPIREAT", "k", "later"]),
            RespValue::error("ERR value is not an integer")
        );
    }

    #[test]
    fn test_hash_lifecycle() {
        let d = create_dispatcher();
        assert_eq!(run(&d, &["HSET", "h", "f", "v"]), RespValue::ok());
        assert_eq!(run(&d, &["HGET", "h", "f"]), bulk("v"));
        assert_eq!(run(&d, &["HGET", "h", "g"]), RespValue::null());
        assert_eq!(run(&d, &["HGETALL", "h"]), RespValue::array(vec![bulk("f"), bulk("v")]));
        assert_eq!(run(&d, &["HLEN", "h"]), RespValue::integer(1));

        assert_eq!(run(&d, &["HDEL", "h", "f"]), RespValue::ok());
        assert_eq!(run(&d, &["HLEN", "h"]), RespValue::integer(0));
        assert_eq!(run(&d, &["HGETALL", "h"]), RespValue::null());
        assert_eq!(run(&d, &["HDEL", "h", "f"]), RespValue::ok());
    }

    #[test]
    fn test_hgetall_is_flat_pairs() {
        let d = create_dispatcher();
        run(&d, &["HSET", "h", "a", "1"]);
        run(&d, &["HSET", "h", "b", "2"]);

        let RespValue::Array(items) = run(&d, &["HGETALL", "h"]) else {
            panic!("expected array");
        };
        let mut pairs: Vec<(RespValue, RespValue)> = items
            .chunks(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();
        pairs.sort_by_key(|(field, _)| field.as_bytes().cloned());
        assert_eq!(pairs, vec![(bulk("a"), bulk("1")), (bulk("b"), bulk("2"))]);
    }

    #[test]
    fn test_incr_decr() {
        let d = create_dispatcher();
        assert_eq!(run(&d, &["INCR", "up"]), RespValue::integer(1));
        assert_eq!(run(&d, &["INCR", "up"]), RespValue::integer(2));
        assert_eq!(run(&d, &["DECR", "down"]), RespValue::integer(0));
        assert_eq!(run(&d, &["DECR", "up"]), RespValue::integer(1));

        run(&d, &["SET", "word", "abc"]);
        assert_eq!(
            run(&d, &["INCR", "word"]),
            RespValue::error("ERR value is not an integer")
        );
        assert_eq!(run(&d, &["GET", "word"]), bulk("abc"));
    }

    #[test]
    fn test_del_is_unconditional_ok() {
        let d = create_dispatcher();
        assert_eq!(run(&d, &["DEL", "nothing"]), RespValue::ok());

        run(&d, &["SET", "k", "v"]);
        run(&d, &["HSET", "k", "f", "v"]);
        assert_eq!(run(&d, &["DEL", "k"]), RespValue::ok());
        assert_eq!(run(&d, &["GET", "k"]), RespValue::null());
        assert_eq!(run(&d, &["HLEN", "k"]), RespValue::integer(0));
    }

    #[test]
    fn test_flushall_and_info() {
        let d = create_dispatcher();
        run(&d, &["SET", "a", "1"]);
        run(&d, &["SET", "b", "2"]);
        run(&d, &["HSET", "h", "f1", "v"]);
        run(&d, &["HSET", "h", "f2", "v"]);

        assert_eq!(
            run(&d, &["INFO"]),
            bulk("# Server Info\nkeys:2\nhashes:1\nfields:2\n")
        );

        assert_eq!(run(&d, &["FLUSHALL"]), RespValue::ok());
        assert_eq!(d.keyspace().stats(), KeyspaceStats::default());
        assert_eq!(
            run(&d, &["INFO"]),
            bulk("# Server Info\nkeys:0\nhashes:0\nfields:0\n")
        );
    }

    #[test]
    fn test_should_persist_allow_list() {
        let d = create_dispatcher();
        for name in ["SET", "hset", "DEL", "FLUSHALL", "HDEL", "INCR", "DECR"] {
            assert!(d.should_persist(name), "{} should be logged", name);
        }
        for name in ["GET", "PING", "TTL", "INFO", "EXPIRE", "PERSIST", "EXPIREAT", "NOPE"] {
            assert!(!d.should_persist(name), "{} should not be logged", name);
        }

        let durable = create_dispatcher().with_durable_ttl(true);
        for name in ["EXPIRE", "EXPIREAT", "PERSIST", "SET"] {
            assert!(durable.should_persist(name));
        }
        assert!(!durable.should_persist("TTL"));
    }

    #[test]
    fn test_log_form() {
        let cmd = |parts: &[&str]| {
            Command::new(
                parts[0],
                parts[1..].iter().map(|s| Bytes::from(s.to_string())).collect(),
            )
        };

        let set_ex = cmd(&["SET", "k", "v", "EX", "60"]);
        assert_eq!(create_dispatcher().log_form(&set_ex), set_ex);

        let durable = create_dispatcher().with_durable_ttl(true);
        let record = durable.log_form(&set_ex);
        assert_eq!(record.name, "SET");
        assert_eq!(record.args[..3], [Bytes::from("k"), Bytes::from("v"), Bytes::from("EXAT")]);
        let deadline = parse_i64(&record.args[3]).unwrap();
        assert!((unix_now() + 59..=unix_now() + 60).contains(&deadline));

        let record = durable.log_form(&cmd(&["EXPIRE", "k", "5"]));
        assert_eq!(record.name, "EXPIREAT");
        assert_eq!(record.args[0], Bytes::from("k"));

        let bad = cmd(&["SET", "k", "v", "EX", "zero"]);
        assert_eq!(durable.log_form(&bad), bad);
        let plain = cmd(&["HSET", "h", "f", "v"]);
        assert_eq!(durable.log_form(&plain), plain);
    }

    #[test]
    fn test_executed_log_form_matches_logged_deadline() {
        let durable = create_dispatcher().with_durable_ttl(true);
        let set_ex = Command::new("SET", vec![Bytes::from("k"), Bytes::from("v"), Bytes::from("EX"), Bytes::from("30")]);

        let record = durable.log_form(&set_ex);
        assert_eq!(durable.execute(&record), Some(RespValue::ok()));
        let logged = parse_i64(&record.args[3]).unwrap();
        assert_eq!(durable.keyspace().deadline(b"k"), Some(logged));

        let expire = Command::new("EXPIRE", vec![Bytes::from("k"), Bytes::from("90")]);
        let record = durable.log_form(&expire);
        assert_eq!(durable.execute(&record), Some(RespValue::integer(1)));
        let logged = parse_i64(&record.args[1]).unwrap();
        assert_eq!(durable.keyspace().deadline(b"k"), Some(logged));

        // Replaying the record elsewhere lands on the same deadline.
        let restored = create_dispatcher();
        restored.execute(&Command::new("SET", vec![Bytes::from("k"), Bytes::from("v")]));
        restored.execute(&record);
        assert_eq!(restored.keyspace().deadline(b"k"), Some(logged));
    }
}
