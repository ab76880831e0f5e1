//! End-to-end tests: every test binds a server on an ephemeral port and
//! speaks RESP to it over real sockets.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use rudis::resp::RespValue;
use rudis::server::{Server, ServerConfig};

fn temp_dump() -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("rudis_e2e_{}_{}.json", std::process::id(), n))
}

struct TestServer {
    addr: SocketAddr,
    dump: PathBuf,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with_dump(temp_dump()).await
    }

    async fn start_with_dump(dump: PathBuf) -> Self {
        let config = ServerConfig {
            host: Some("127.0.0.1".to_string()),
            port: 0,
            db_filename: dump.clone(),
            save_points: Vec::new(),
        };

        let bound = Server::new(config).bind().await.expect("bind failed");
        let addr = bound.local_addr();
        tokio::spawn(bound.serve());

        TestServer { addr, dump }
    }

    async fn connect(&self) -> TestClient {
        TestClient {
            stream: TcpStream::connect(self.addr).await.expect("connect failed"),
            buffer: Vec::new(),
        }
    }
}

struct TestClient {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl TestClient {
    async fn send_command(&mut self, parts: &[&[u8]]) {
        let mut frame = format!("*{}\r\n", parts.len()).into_bytes();
        for part in parts {
            frame.extend_from_slice(format!("${}\r\n", part.len()).as_bytes());
            frame.extend_from_slice(part);
            frame.extend_from_slice(b"\r\n");
        }

        self.stream.write_all(&frame).await.expect("write failed");
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("write failed");
    }

    async fn read_reply(&mut self) -> RespValue {
        loop {
            if let Some((value, consumed)) =
                RespValue::decode(&self.buffer).expect("reply should parse")
            {
                self.buffer.drain(..consumed);
                return value;
            }

            let mut chunk = [0u8; 4096];
            let n = timeout(Duration::from_secs(5), self.stream.read(&mut chunk))
                .await
                .expect("timed out waiting for a reply")
                .expect("read failed");
            assert!(n > 0, "connection closed while waiting for a reply");
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    async fn command(&mut self, parts: &[&[u8]]) -> RespValue {
        self.send_command(parts).await;
        self.read_reply().await
    }
}

fn bulk(bytes: &[u8]) -> RespValue {
    RespValue::bulk(bytes.to_vec())
}

fn simple(text: &str) -> RespValue {
    RespValue::SimpleString(text.to_string())
}

fn array_as_set(value: RespValue) -> Vec<Vec<u8>> {
    let RespValue::Array(elements) = value else {
        panic!("expected an array, got {:?}", value);
    };

    let mut members = elements
        .into_iter()
        .map(|element| match element {
            RespValue::BulkString(bytes) => bytes.to_vec(),
            other => panic!("expected bulk string, got {:?}", other),
        })
        .collect::<Vec<Vec<u8>>>();
    members.sort();
    members
}

fn array_as_pairs(value: RespValue) -> HashMap<Vec<u8>, Vec<u8>> {
    let members = match value {
        RespValue::Array(elements) => elements,
        other => panic!("expected an array, got {:?}", other),
    };
    assert!(members.len() % 2 == 0, "pair array must have even length");

    let mut pairs = HashMap::new();
    let mut iter = members.into_iter();
    while let (Some(field), Some(field_value)) = (iter.next(), iter.next()) {
        let (RespValue::BulkString(field), RespValue::BulkString(field_value)) =
            (field, field_value)
        else {
            panic!("expected bulk string pair");
        };
        pairs.insert(field.to_vec(), field_value.to_vec());
    }
    pairs
}

// ── Scenario tests from the command surface ───────────────────────────────

#[tokio::test]
async fn test_set_get_del_round_trip() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    assert_eq!(client.command(&[b"SET", b"foo", b"bar"]).await, simple("OK"));

    let reply = client.command(&[b"GET", b"foo"]).await;
    assert_eq!(reply.encode(), b"$3\r\nbar\r\n");

    assert_eq!(client.command(&[b"DEL", b"foo"]).await, RespValue::Integer(1));

    let reply = client.command(&[b"GET", b"foo"]).await;
    assert_eq!(reply.encode(), b"$-1\r\n");
}

#[tokio::test]
async fn test_list_push_range_pop() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    assert_eq!(
        client.command(&[b"RPUSH", b"x", b"a", b"b", b"c"]).await,
        RespValue::Integer(3)
    );

    let reply = client.command(&[b"LRANGE", b"x", b"0", b"-1"]).await;
    assert_eq!(
        reply.encode(),
        b"*3\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n"
    );

    assert_eq!(client.command(&[b"LPOP", b"x"]).await, bulk(b"a"));
    assert_eq!(client.command(&[b"LLEN", b"x"]).await, RespValue::Integer(2));
    assert_eq!(client.command(&[b"LINDEX", b"x", b"-1"]).await, bulk(b"c"));

    assert_eq!(client.command(&[b"LSET", b"x", b"0", b"B"]).await, simple("OK"));
    let error = client.command(&[b"LSET", b"x", b"9", b"y"]).await;
    assert_eq!(error, RespValue::Error("ERR index out of range".to_string()));
}

#[tokio::test]
async fn test_pubsub_between_two_clients() {
    let server = TestServer::start().await;
    let mut subscriber = server.connect().await;
    let mut publisher = server.connect().await;

    let reply = subscriber.command(&[b"SUBSCRIBE", b"ch"]).await;
    assert_eq!(
        reply,
        RespValue::Array(vec![bulk(b"subscribe"), bulk(b"ch"), RespValue::Integer(1)])
    );

    assert_eq!(
        publisher.command(&[b"PUBLISH", b"ch", b"hi"]).await,
        RespValue::Integer(1)
    );

    let message = subscriber.read_reply().await;
    assert_eq!(
        message.encode(),
        b"*3\r\n$7\r\nmessage\r\n$2\r\nch\r\n$2\r\nhi\r\n"
    );
}

#[tokio::test]
async fn test_pattern_subscription_delivery() {
    let server = TestServer::start().await;
    let mut subscriber = server.connect().await;
    let mut publisher = server.connect().await;

    subscriber.command(&[b"PSUBSCRIBE", b"news.*"]).await;

    assert_eq!(
        publisher.command(&[b"PUBLISH", b"news.tech", b"x"]).await,
        RespValue::Integer(1)
    );

    let message = subscriber.read_reply().await;
    assert_eq!(
        message,
        RespValue::Array(vec![
            bulk(b"pmessage"),
            bulk(b"news.*"),
            bulk(b"news.tech"),
            bulk(b"x"),
        ])
    );
}

#[tokio::test]
async fn test_expiration_end_to_end() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    assert_eq!(
        client.command(&[b"SET", b"k", b"v", b"EX", b"1"]).await,
        simple("OK")
    );
    assert_eq!(client.command(&[b"TTL", b"k"]).await, RespValue::Integer(1));

    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(client.command(&[b"TTL", b"k"]).await, RespValue::Integer(-2));
    assert_eq!(
        client.command(&[b"GET", b"k"]).await,
        RespValue::NullBulkString
    );
}

#[tokio::test]
async fn test_hash_scenario() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    assert_eq!(
        client
            .command(&[b"HMSET", b"u", b"name", b"alice", b"age", b"30"])
            .await,
        simple("OK")
    );

    let pairs = array_as_pairs(client.command(&[b"HGETALL", b"u"]).await);
    assert_eq!(pairs.len(), 2);
    assert_eq!(pairs.get(b"name".as_slice()), Some(&b"alice".to_vec()));
    assert_eq!(pairs.get(b"age".as_slice()), Some(&b"30".to_vec()));

    assert_eq!(
        client.command(&[b"HDEL", b"u", b"age"]).await,
        RespValue::Integer(1)
    );
    assert_eq!(
        client.command(&[b"HEXISTS", b"u", b"age"]).await,
        RespValue::Integer(0)
    );
}

#[tokio::test]
async fn test_set_algebra_scenario() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.command(&[b"SADD", b"a", b"1", b"2", b"3"]).await;
    client.command(&[b"SADD", b"b", b"2", b"3", b"4"]).await;

    let inter = array_as_set(client.command(&[b"SINTER", b"a", b"b"]).await);
    assert_eq!(inter, vec![b"2".to_vec(), b"3".to_vec()]);

    assert_eq!(
        client.command(&[b"SINTERSTORE", b"c", b"a", b"b"]).await,
        RespValue::Integer(2)
    );

    let stored = array_as_set(client.command(&[b"SMEMBERS", b"c"]).await);
    assert_eq!(stored, inter);

    let diff = array_as_set(client.command(&[b"SDIFF", b"a", b"b"]).await);
    assert_eq!(diff, vec![b"1".to_vec()]);

    let union = array_as_set(client.command(&[b"SUNION", b"a", b"b"]).await);
    assert_eq!(union.len(), 4);
}

// ── Semantics and boundaries ──────────────────────────────────────────────

#[tokio::test]
async fn test_set_nx_and_xx() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    assert_eq!(
        client.command(&[b"SET", b"k", b"v1", b"NX"]).await,
        simple("OK")
    );
    assert_eq!(
        client.command(&[b"SET", b"k", b"v2", b"NX"]).await,
        RespValue::NullBulkString
    );
    assert_eq!(client.command(&[b"GET", b"k"]).await, bulk(b"v1"));

    assert_eq!(
        client.command(&[b"SET", b"k", b"v3", b"XX"]).await,
        simple("OK")
    );
    assert_eq!(
        client.command(&[b"SET", b"other", b"v", b"XX"]).await,
        RespValue::NullBulkString
    );
    assert_eq!(
        client.command(&[b"GET", b"other"]).await,
        RespValue::NullBulkString
    );
}

#[tokio::test]
async fn test_set_clears_expiration_unless_given_one() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.command(&[b"SET", b"k", b"v", b"EX", b"100"]).await;
    let ttl = client.command(&[b"TTL", b"k"]).await;
    assert!(matches!(ttl, RespValue::Integer(n) if n > 0));

    client.command(&[b"SET", b"k", b"v2"]).await;
    assert_eq!(client.command(&[b"TTL", b"k"]).await, RespValue::Integer(-1));
}

#[tokio::test]
async fn test_setrange_zero_pads_missing_key() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    assert_eq!(
        client.command(&[b"SETRANGE", b"k", b"5", b"ab"]).await,
        RespValue::Integer(7)
    );
    assert_eq!(
        client.command(&[b"GET", b"k"]).await,
        bulk(b"\x00\x00\x00\x00\x00ab")
    );
}

#[tokio::test]
async fn test_getrange_clamps_to_string() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.command(&[b"SET", b"k", b"abc"]).await;

    assert_eq!(
        client.command(&[b"GETRANGE", b"k", b"-100", b"-1"]).await,
        bulk(b"abc")
    );
    assert_eq!(
        client.command(&[b"GETRANGE", b"k", b"1", b"100"]).await,
        bulk(b"bc")
    );
    assert_eq!(
        client.command(&[b"GETRANGE", b"k", b"2", b"1"]).await,
        bulk(b"")
    );
    assert_eq!(
        client.command(&[b"SUBSTR", b"k", b"0", b"0"]).await,
        bulk(b"a")
    );
}

#[tokio::test]
async fn test_expire_with_past_deadline_deletes() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.command(&[b"SET", b"k", b"v"]).await;

    assert_eq!(
        client.command(&[b"EXPIRE", b"k", b"-1"]).await,
        RespValue::Integer(1)
    );
    assert_eq!(
        client.command(&[b"EXISTS", b"k"]).await,
        RespValue::Integer(0)
    );
    assert_eq!(
        client.command(&[b"EXPIRE", b"missing", b"10"]).await,
        RespValue::Integer(0)
    );
}

#[tokio::test]
async fn test_ttl_reporting_states() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    assert_eq!(client.command(&[b"TTL", b"nope"]).await, RespValue::Integer(-2));
    assert_eq!(client.command(&[b"PTTL", b"nope"]).await, RespValue::Integer(-2));

    client.command(&[b"SET", b"k", b"v"]).await;
    assert_eq!(client.command(&[b"TTL", b"k"]).await, RespValue::Integer(-1));

    client.command(&[b"EXPIRE", b"k", b"100"]).await;
    let pttl = client.command(&[b"PTTL", b"k"]).await;
    assert!(matches!(pttl, RespValue::Integer(n) if n > 0 && n <= 100_000));

    assert_eq!(client.command(&[b"PERSIST", b"k"]).await, RespValue::Integer(1));
    assert_eq!(client.command(&[b"TTL", b"k"]).await, RespValue::Integer(-1));
    assert_eq!(client.command(&[b"PERSIST", b"k"]).await, RespValue::Integer(0));
}

#[tokio::test]
async fn test_swapdb_and_select() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.command(&[b"SET", b"k", b"v"]).await;
    assert_eq!(client.command(&[b"SWAPDB", b"0", b"1"]).await, simple("OK"));
    assert_eq!(
        client.command(&[b"GET", b"k"]).await,
        RespValue::NullBulkString
    );

    assert_eq!(client.command(&[b"SELECT", b"1"]).await, simple("OK"));
    assert_eq!(client.command(&[b"GET", b"k"]).await, bulk(b"v"));

    assert_eq!(client.command(&[b"SWAPDB", b"3", b"3"]).await, simple("OK"));

    let error = client.command(&[b"SELECT", b"16"]).await;
    assert_eq!(
        error,
        RespValue::Error("ERR DB index is out of range".to_string())
    );
}

#[tokio::test]
async fn test_binary_safe_values() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    let value: &[u8] = b"a\x00b\r\nc\xff";
    assert_eq!(client.command(&[b"SET", b"bin", value]).await, simple("OK"));
    assert_eq!(client.command(&[b"GET", b"bin"]).await, bulk(value));
    assert_eq!(
        client.command(&[b"STRLEN", b"bin"]).await,
        RespValue::Integer(value.len() as i64)
    );
}

#[tokio::test]
async fn test_inline_commands() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.send_raw(b"PING\r\n").await;
    assert_eq!(client.read_reply().await, simple("PONG"));

    client.send_raw(b"SET inline value\r\n").await;
    assert_eq!(client.read_reply().await, simple("OK"));
    assert_eq!(client.command(&[b"GET", b"inline"]).await, bulk(b"value"));
}

#[tokio::test]
async fn test_wrongtype_errors() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.command(&[b"RPUSH", b"list", b"a"]).await;

    let error = client.command(&[b"GET", b"list"]).await;
    assert_eq!(
        error,
        RespValue::Error(
            "WRONGTYPE Operation against a key holding the wrong kind of value".to_string()
        )
    );

    let error = client.command(&[b"SADD", b"list", b"x"]).await;
    assert!(matches!(error, RespValue::Error(message) if message.starts_with("WRONGTYPE")));
}

#[tokio::test]
async fn test_unknown_command_and_arity_errors() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    let error = client.command(&[b"NOSUCH", b"x"]).await;
    assert_eq!(
        error,
        RespValue::Error("ERR unknown command 'NOSUCH'".to_string())
    );

    let error = client.command(&[b"GET"]).await;
    assert_eq!(
        error,
        RespValue::Error("ERR wrong number of arguments for 'get' command".to_string())
    );

    let error = client.command(&[b"GET", b"a", b"b"]).await;
    assert_eq!(
        error,
        RespValue::Error("ERR wrong number of arguments for 'get' command".to_string())
    );
}

#[tokio::test]
async fn test_incr_decr_semantics() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    assert_eq!(client.command(&[b"INCR", b"n"]).await, RespValue::Integer(1));
    assert_eq!(client.command(&[b"INCRBY", b"n", b"9"]).await, RespValue::Integer(10));
    assert_eq!(client.command(&[b"DECR", b"n"]).await, RespValue::Integer(9));
    assert_eq!(client.command(&[b"DECRBY", b"n", b"4"]).await, RespValue::Integer(5));

    client.command(&[b"SET", b"s", b"abc"]).await;
    let error = client.command(&[b"INCR", b"s"]).await;
    assert_eq!(
        error,
        RespValue::Error("ERR value is not an integer or out of range".to_string())
    );
}

#[tokio::test]
async fn test_append_and_counters_keep_expiration() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.command(&[b"SET", b"k", b"1", b"EX", b"100"]).await;
    client.command(&[b"APPEND", b"k", b"0"]).await;
    let ttl = client.command(&[b"TTL", b"k"]).await;
    assert!(matches!(ttl, RespValue::Integer(n) if n > 0));

    client.command(&[b"INCR", b"k"]).await;
    let ttl = client.command(&[b"TTL", b"k"]).await;
    assert!(matches!(ttl, RespValue::Integer(n) if n > 0));
}

#[tokio::test]
async fn test_rename_semantics() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    let error = client.command(&[b"RENAME", b"missing", b"x"]).await;
    assert_eq!(error, RespValue::Error("ERR no such key".to_string()));

    client.command(&[b"SET", b"a", b"v", b"EX", b"100"]).await;
    assert_eq!(client.command(&[b"RENAME", b"a", b"a"]).await, simple("OK"));
    let ttl = client.command(&[b"TTL", b"a"]).await;
    assert!(matches!(ttl, RespValue::Integer(n) if n > 0));

    client.command(&[b"SET", b"b", b"w"]).await;
    assert_eq!(
        client.command(&[b"RENAMENX", b"a", b"b"]).await,
        RespValue::Integer(0)
    );
    assert_eq!(client.command(&[b"RENAMENX", b"a", b"c"]).await, RespValue::Integer(1));
    assert_eq!(client.command(&[b"GET", b"c"]).await, bulk(b"v"));
}

#[tokio::test]
async fn test_keys_patterns() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.command(&[b"SET", b"user:1", b"a"]).await;
    client.command(&[b"SET", b"user:2", b"b"]).await;
    client.command(&[b"SET", b"session:1", b"c"]).await;

    let matched = array_as_set(client.command(&[b"KEYS", b"user:*"]).await);
    assert_eq!(matched, vec![b"user:1".to_vec(), b"user:2".to_vec()]);

    let all = array_as_set(client.command(&[b"KEYS", b"*"]).await);
    assert_eq!(all.len(), 3);

    let error = client.command(&[b"KEYS", b"h?llo"]).await;
    assert_eq!(
        error,
        RespValue::Error("500 pattern not implemented".to_string())
    );
}

#[tokio::test]
async fn test_subscribe_mode_restricts_commands() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.command(&[b"SUBSCRIBE", b"ch"]).await;

    let error = client.command(&[b"GET", b"x"]).await;
    assert!(matches!(
        error,
        RespValue::Error(message) if message.contains("only (P|UN)SUBSCRIBE")
    ));

    // PING takes the array form while subscribed.
    let pong = client.command(&[b"PING"]).await;
    assert_eq!(
        pong,
        RespValue::Array(vec![bulk(b"pong"), bulk(b"")])
    );

    // Leaving subscribe mode restores normal dispatch.
    let reply = client.command(&[b"UNSUBSCRIBE", b"ch"]).await;
    assert_eq!(
        reply,
        RespValue::Array(vec![bulk(b"unsubscribe"), bulk(b"ch"), RespValue::Integer(0)])
    );
    client.command(&[b"SET", b"x", b"1"]).await;
    assert_eq!(client.command(&[b"GET", b"x"]).await, bulk(b"1"));
}

#[tokio::test]
async fn test_subscription_counts_differ_by_one() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    let subscribed = client.command(&[b"SUBSCRIBE", b"ch"]).await;
    let RespValue::Array(fields) = subscribed else {
        panic!("expected array");
    };
    assert_eq!(fields[2], RespValue::Integer(1));

    let unsubscribed = client.command(&[b"UNSUBSCRIBE", b"ch"]).await;
    let RespValue::Array(fields) = unsubscribed else {
        panic!("expected array");
    };
    assert_eq!(fields[2], RespValue::Integer(0));
}

#[tokio::test]
async fn test_pubsub_introspection() {
    let server = TestServer::start().await;
    let mut subscriber = server.connect().await;
    let mut observer = server.connect().await;

    subscriber.command(&[b"SUBSCRIBE", b"alpha", b"beta"]).await;
    subscriber.read_reply().await; // second subscribe confirmation
    subscriber.command(&[b"PSUBSCRIBE", b"a*"]).await;

    let channels = array_as_set(observer.command(&[b"PUBSUB", b"CHANNELS"]).await);
    assert_eq!(channels, vec![b"alpha".to_vec(), b"beta".to_vec()]);

    let filtered = array_as_set(
        observer.command(&[b"PUBSUB", b"CHANNELS", b"a*"]).await,
    );
    assert_eq!(filtered, vec![b"alpha".to_vec()]);

    let numsub = observer
        .command(&[b"PUBSUB", b"NUMSUB", b"alpha", b"missing"])
        .await;
    assert_eq!(
        numsub,
        RespValue::Array(vec![
            bulk(b"alpha"),
            RespValue::Integer(1),
            bulk(b"missing"),
            RespValue::Integer(0),
        ])
    );

    assert_eq!(
        observer.command(&[b"PUBSUB", b"NUMPAT"]).await,
        RespValue::Integer(1)
    );
}

#[tokio::test]
async fn test_monitor_echoes_other_clients() {
    let server = TestServer::start().await;
    let mut monitor = server.connect().await;
    let mut worker = server.connect().await;

    assert_eq!(monitor.command(&[b"MONITOR"]).await, simple("OK"));

    worker.command(&[b"SET", b"foo", b"bar"]).await;

    let line = monitor.read_reply().await;
    let RespValue::SimpleString(line) = line else {
        panic!("monitor line must be a simple string, got {:?}", line);
    };
    assert!(line.contains("[0 "), "line carries the db index: {}", line);
    assert!(
        line.contains("\"SET\" \"foo\" \"bar\""),
        "line carries the quoted command: {}",
        line
    );
}

#[tokio::test]
async fn test_client_subcommands() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    assert_eq!(client.command(&[b"CLIENT", b"GETNAME"]).await, bulk(b""));
    assert_eq!(
        client.command(&[b"CLIENT", b"SETNAME", b"worker-1"]).await,
        simple("OK")
    );
    assert_eq!(
        client.command(&[b"CLIENT", b"GETNAME"]).await,
        bulk(b"worker-1")
    );

    let error = client.command(&[b"CLIENT", b"SETNAME", b"has space"]).await;
    assert!(matches!(error, RespValue::Error(message) if message.starts_with("ERR Client names")));

    let id = client.command(&[b"CLIENT", b"ID"]).await;
    assert!(matches!(id, RespValue::Integer(n) if n > 0));

    let listing = client.command(&[b"CLIENT", b"LIST"]).await;
    let RespValue::BulkString(listing) = listing else {
        panic!("CLIENT LIST must be a bulk string");
    };
    let listing = String::from_utf8(listing.to_vec()).unwrap();
    assert!(listing.contains("name=worker-1"), "listing: {}", listing);
    assert!(listing.contains("cmd=client"), "listing: {}", listing);
}

#[tokio::test]
async fn test_command_introspection() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    let count = client.command(&[b"COMMAND", b"COUNT"]).await;
    let RespValue::Integer(count) = count else {
        panic!("COMMAND COUNT must be an integer");
    };
    assert!(count > 70);

    let table = client.command(&[b"COMMAND"]).await;
    let RespValue::Array(entries) = table else {
        panic!("COMMAND must return an array");
    };
    assert_eq!(entries.len() as i64, count);

    for entry in entries {
        let RespValue::Array(fields) = entry else {
            panic!("each entry must be a six-tuple array");
        };
        assert_eq!(fields.len(), 6);
    }
}

#[tokio::test]
async fn test_dbsize_and_flushdb() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.command(&[b"SET", b"a", b"1"]).await;
    client.command(&[b"SET", b"b", b"2"]).await;
    assert_eq!(client.command(&[b"DBSIZE"]).await, RespValue::Integer(2));

    assert_eq!(client.command(&[b"FLUSHDB"]).await, simple("OK"));
    assert_eq!(client.command(&[b"DBSIZE"]).await, RespValue::Integer(0));
}

#[tokio::test]
async fn test_mset_mget_msetnx() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    assert_eq!(
        client.command(&[b"MSET", b"a", b"1", b"b", b"2"]).await,
        simple("OK")
    );

    let reply = client.command(&[b"MGET", b"a", b"missing", b"b"]).await;
    assert_eq!(
        reply,
        RespValue::Array(vec![bulk(b"1"), RespValue::NullBulkString, bulk(b"2")])
    );

    assert_eq!(
        client.command(&[b"MSETNX", b"b", b"x", b"c", b"y"]).await,
        RespValue::Integer(0)
    );
    assert_eq!(
        client.command(&[b"GET", b"c"]).await,
        RespValue::NullBulkString
    );
    assert_eq!(
        client.command(&[b"MSETNX", b"c", b"3", b"d", b"4"]).await,
        RespValue::Integer(1)
    );
}

#[tokio::test]
async fn test_save_and_reload_round_trip() {
    let dump = temp_dump();

    {
        let server = TestServer::start_with_dump(dump.clone()).await;
        let mut client = server.connect().await;

        client.command(&[b"SET", b"str", b"v\x00bin"]).await;
        client.command(&[b"RPUSH", b"list", b"a", b"b"]).await;
        client.command(&[b"SADD", b"set", b"m"]).await;
        client.command(&[b"HSET", b"hash", b"f", b"w"]).await;
        client.command(&[b"SELECT", b"2"]).await;
        client.command(&[b"SET", b"elsewhere", b"x"]).await;

        assert_eq!(client.command(&[b"SAVE"]).await, simple("OK"));

        let lastsave = client.command(&[b"LASTSAVE"]).await;
        assert!(matches!(lastsave, RespValue::Integer(n) if n > 0));
    }

    let server = TestServer::start_with_dump(dump.clone()).await;
    let mut client = server.connect().await;

    assert_eq!(client.command(&[b"GET", b"str"]).await, bulk(b"v\x00bin"));
    assert_eq!(
        client.command(&[b"LRANGE", b"list", b"0", b"-1"]).await,
        RespValue::Array(vec![bulk(b"a"), bulk(b"b")])
    );
    assert_eq!(
        client.command(&[b"SISMEMBER", b"set", b"m"]).await,
        RespValue::Integer(1)
    );
    assert_eq!(client.command(&[b"HGET", b"hash", b"f"]).await, bulk(b"w"));

    client.command(&[b"SELECT", b"2"]).await;
    assert_eq!(client.command(&[b"GET", b"elsewhere"]).await, bulk(b"x"));

    let _ = std::fs::remove_file(&dump);
}

#[tokio::test]
async fn test_bgsave_writes_dump() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.command(&[b"SET", b"k", b"v"]).await;
    assert_eq!(
        client.command(&[b"BGSAVE"]).await,
        simple("Background saving started")
    );

    // The worker runs asynchronously; give it a moment.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(server.dump.exists());

    let _ = std::fs::remove_file(&server.dump);
}

#[tokio::test]
async fn test_quit_closes_connection() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    assert_eq!(client.command(&[b"QUIT"]).await, simple("OK"));

    // The server half-closes after flushing the OK; the next read is EOF.
    let mut chunk = [0u8; 16];
    let n = timeout(Duration::from_secs(5), client.stream.read(&mut chunk))
        .await
        .expect("timed out waiting for close")
        .expect("read failed");
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_hsetnx_and_hincrby() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    assert_eq!(
        client.command(&[b"HSETNX", b"h", b"f", b"1"]).await,
        RespValue::Integer(1)
    );
    assert_eq!(
        client.command(&[b"HSETNX", b"h", b"f", b"2"]).await,
        RespValue::Integer(0)
    );
    assert_eq!(client.command(&[b"HGET", b"h", b"f"]).await, bulk(b"1"));

    assert_eq!(
        client.command(&[b"HINCRBY", b"h", b"f", b"5"]).await,
        RespValue::Integer(6)
    );
    assert_eq!(
        client.command(&[b"HINCRBY", b"h", b"new", b"-3"]).await,
        RespValue::Integer(-3)
    );

    client.command(&[b"HSET", b"h", b"text", b"abc"]).await;
    let error = client.command(&[b"HINCRBY", b"h", b"text", b"1"]).await;
    assert_eq!(
        error,
        RespValue::Error("ERR value is not an integer or out of range".to_string())
    );
}

#[tokio::test]
async fn test_lpush_order_and_pushx() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.command(&[b"LPUSH", b"x", b"a", b"b", b"c"]).await;
    assert_eq!(
        client.command(&[b"LRANGE", b"x", b"0", b"-1"]).await,
        RespValue::Array(vec![bulk(b"c"), bulk(b"b"), bulk(b"a")])
    );

    assert_eq!(
        client.command(&[b"LPUSHX", b"nope", b"v"]).await,
        RespValue::Integer(0)
    );
    assert_eq!(
        client.command(&[b"RPUSHX", b"nope", b"v"]).await,
        RespValue::Integer(0)
    );
    assert_eq!(
        client.command(&[b"EXISTS", b"nope"]).await,
        RespValue::Integer(0)
    );
}

#[tokio::test]
async fn test_lrange_on_missing_list_is_empty() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    assert_eq!(
        client.command(&[b"LRANGE", b"missing", b"0", b"-1"]).await,
        RespValue::Array(vec![])
    );
}

#[tokio::test]
async fn test_sadd_idempotence() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    assert_eq!(
        client.command(&[b"SADD", b"s", b"m"]).await,
        RespValue::Integer(1)
    );
    assert_eq!(
        client.command(&[b"SADD", b"s", b"m"]).await,
        RespValue::Integer(0)
    );
    assert_eq!(client.command(&[b"SCARD", b"s"]).await, RespValue::Integer(1));
}

#[tokio::test]
async fn test_getset_setex_setnx() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    assert_eq!(
        client.command(&[b"GETSET", b"k", b"v1"]).await,
        RespValue::NullBulkString
    );
    assert_eq!(client.command(&[b"GETSET", b"k", b"v2"]).await, bulk(b"v1"));

    assert_eq!(client.command(&[b"SETNX", b"k", b"v3"]).await, RespValue::Integer(0));
    assert_eq!(client.command(&[b"SETNX", b"k2", b"v"]).await, RespValue::Integer(1));

    assert_eq!(
        client.command(&[b"SETEX", b"t", b"100", b"v"]).await,
        simple("OK")
    );
    let ttl = client.command(&[b"TTL", b"t"]).await;
    assert!(matches!(ttl, RespValue::Integer(n) if n > 0 && n <= 100));

    let error = client.command(&[b"SETEX", b"t", b"0", b"v"]).await;
    assert_eq!(
        error,
        RespValue::Error("ERR invalid expire time in 'setex' command".to_string())
    );
}
