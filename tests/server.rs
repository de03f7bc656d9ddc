//! End-to-end tests over a real TCP socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tidekv::{handle_connection, CommandHandler, ConnectionStats, PubSub, Session, StorageEngine};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn spawn_server(engine: Arc<StorageEngine>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stats = Arc::new(ConnectionStats::new());
    let pubsub = Arc::new(PubSub::new());

    tokio::spawn(async move {
        while let Ok((stream, peer)) = listener.accept().await {
            let handler = CommandHandler::new(Arc::clone(&engine));
            let session = Session::new(handler, Arc::clone(&pubsub));
            tokio::spawn(handle_connection(stream, peer, session, Arc::clone(&stats)));
        }
    });

    addr
}

fn command(args: &[&str]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        out.extend_from_slice(format!("${}\r\n{}\r\n", arg.len(), arg).as_bytes());
    }
    out
}

async fn read_until_len(client: &mut TcpStream, expected: usize) -> Vec<u8> {
    let mut buf = vec![0u8; expected + 64];
    let mut total = 0;
    while total < expected {
        match tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf[total..])).await {
            Ok(Ok(n)) if n > 0 => total += n,
            _ => break,
        }
    }
    buf.truncate(total);
    buf
}

#[tokio::test]
async fn pipelined_commands_answer_in_order() {
    let addr = spawn_server(Arc::new(StorageEngine::new())).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    let mut batch = Vec::new();
    batch.extend(command(&["RPUSH", "jobs", "a", "b", "c"]));
    batch.extend(command(&["LRANGE", "jobs", "0", "-1"]));
    batch.extend(command(&["HSET", "user", "name", "ada"]));
    batch.extend(command(&["HGET", "user", "name"]));
    batch.extend(command(&["GET", "jobs"]));
    client.write_all(&batch).await.unwrap();

    let expected: &[u8] = b":3\r\n\
        *3\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n\
        :1\r\n\
        $3\r\nada\r\n\
        -WRONGTYPE Operation against a key holding the wrong kind of value\r\n";
    assert_eq!(read_until_len(&mut client, expected.len()).await, expected);
}

#[tokio::test]
async fn large_value_split_over_many_writes() {
    let engine = Arc::new(StorageEngine::new());
    let addr = spawn_server(Arc::clone(&engine)).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    let value = "v".repeat(200_000);
    let request = command(&["SET", "big", &value]);
    for chunk in request.chunks(7_000) {
        client.write_all(chunk).await.unwrap();
        client.flush().await.unwrap();
    }
    assert_eq!(read_until_len(&mut client, 5).await, b"+OK\r\n");

    client.write_all(&command(&["STRLEN", "big"])).await.unwrap();
    assert_eq!(read_until_len(&mut client, 9).await, b":200000\r\n");
}

#[tokio::test]
async fn clients_share_one_keyspace() {
    let addr = spawn_server(Arc::new(StorageEngine::new())).await;
    let mut writer = TcpStream::connect(addr).await.unwrap();
    let mut reader = TcpStream::connect(addr).await.unwrap();

    writer.write_all(&command(&["SADD", "tags", "x"])).await.unwrap();
    assert_eq!(read_until_len(&mut writer, 4).await, b":1\r\n");

    reader
        .write_all(&command(&["SISMEMBER", "tags", "x"]))
        .await
        .unwrap();
    assert_eq!(read_until_len(&mut reader, 4).await, b":1\r\n");
}

#[tokio::test]
async fn expired_key_is_gone_over_the_wire() {
    let addr = spawn_server(Arc::new(StorageEngine::new())).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    let mut batch = command(&["SET", "session", "abc"]);
    batch.extend(command(&["EXPIRE", "session", "0"]));
    batch.extend(command(&["GET", "session"]));
    batch.extend(command(&["TTL", "session"]));
    client.write_all(&batch).await.unwrap();

    let expected: &[u8] = b"+OK\r\n:1\r\n$-1\r\n:-2\r\n";
    assert_eq!(read_until_len(&mut client, expected.len()).await, expected);
}

#[tokio::test]
async fn garbage_gets_protocol_error_then_close() {
    let addr = spawn_server(Arc::new(StorageEngine::new())).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    let mut batch = command(&["PING"]);
    batch.extend_from_slice(b"*1\r\n$-7\r\n");
    client.write_all(&batch).await.unwrap();

    let mut reply = Vec::new();
    tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert!(reply.starts_with(b"-ERR Protocol error:"));
}

#[tokio::test]
async fn expire_with_largest_integer_keeps_server_alive() {
    let addr = spawn_server(Arc::new(StorageEngine::new())).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    let mut batch = command(&["SET", "k", "v"]);
    batch.extend(command(&["EXPIRE", "k", "9223372036854775807"]));
    batch.extend(command(&["GET", "k"]));
    client.write_all(&batch).await.unwrap();

    let expected: &[u8] = b"+OK\r\n:1\r\n$1\r\nv\r\n";
    assert_eq!(read_until_len(&mut client, expected.len()).await, expected);
}

#[tokio::test]
async fn publish_fans_out_to_every_subscriber() {
    let addr = spawn_server(Arc::new(StorageEngine::new())).await;
    let mut first = TcpStream::connect(addr).await.unwrap();
    let mut second = TcpStream::connect(addr).await.unwrap();
    let mut publisher = TcpStream::connect(addr).await.unwrap();

    let confirm: &[u8] = b"*3\r\n$9\r\nsubscribe\r\n$6\r\nalerts\r\n:1\r\n";
    for client in [&mut first, &mut second] {
        client
            .write_all(&command(&["SUBSCRIBE", "alerts"]))
            .await
            .unwrap();
        assert_eq!(read_until_len(client, confirm.len()).await, confirm);
    }

    publisher
        .write_all(&command(&["PUBLISH", "alerts", "disk full"]))
        .await
        .unwrap();
    assert_eq!(read_until_len(&mut publisher, 4).await, b":2\r\n");

    let message: &[u8] = b"*3\r\n$7\r\nmessage\r\n$6\r\nalerts\r\n$9\r\ndisk full\r\n";
    for client in [&mut first, &mut second] {
        assert_eq!(read_until_len(client, message.len()).await, message);
    }
}

#[tokio::test]
async fn discarded_transaction_changes_nothing() {
    let engine = Arc::new(StorageEngine::new());
    let addr = spawn_server(Arc::clone(&engine)).await;
    let mut client = TcpStream::connect(addr).await.unwrap();

    let mut batch = command(&["MULTI"]);
    batch.extend(command(&["SET", "a", "1"]));
    batch.extend(command(&["DISCARD"]));
    batch.extend(command(&["EXISTS", "a"]));
    client.write_all(&batch).await.unwrap();

    let expected: &[u8] = b"+OK\r\n+QUEUED\r\n+OK\r\n:0\r\n";
    assert_eq!(read_until_len(&mut client, expected.len()).await, expected);
    assert!(engine.is_empty());
}
