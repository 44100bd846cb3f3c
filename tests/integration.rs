use std::net::SocketAddr;
use std::time::Duration;

use redis::RedisError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use redis_clone::command::Command;
use redis_clone::config::Config;
use redis_clone::dispatch::Dispatcher;
use redis_clone::frame::Frame;
use redis_clone::server::Server;

struct TestServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), redis_clone::Error>>,
}

async fn start(dispatcher: Dispatcher) -> TestServer {
    let config = Config {
        port: 0,
        ..Config::default()
    };
    let server = Server::bind(&config)
        .await
        .unwrap()
        .with_dispatcher(dispatcher);
    let addr = server.local_addr().unwrap();

    let (shutdown, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run_until(async {
        let _ = rx.await;
    }));

    TestServer {
        addr,
        shutdown,
        handle,
    }
}

fn echo_dispatcher() -> Dispatcher {
    Dispatcher::builder()
        .route("echo", |cmd: &Command| {
            cmd.args()
                .get(1)
                .cloned()
                .flatten()
                .map_or(Frame::Null, Frame::Bulk)
        })
        .build()
}

fn echo(payload: &str) -> Vec<u8> {
    format!("*2\r\n$4\r\nECHO\r\n${}\r\n{}\r\n", payload.len(), payload).into_bytes()
}

fn bulk(payload: &str) -> Vec<u8> {
    format!("${}\r\n{}\r\n", payload.len(), payload).into_bytes()
}

async fn read_reply(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await.unwrap();
    buf
}

#[tokio::test]
async fn test_bind_fails_when_the_port_is_taken() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = Config {
        port: taken.local_addr().unwrap().port(),
        ..Config::default()
    };

    assert!(Server::bind(&config).await.is_err());
}

#[tokio::test]
async fn test_run_aborts_when_the_port_is_taken() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = Config {
        port: taken.local_addr().unwrap().port(),
        ..Config::default()
    };

    let result = redis_clone::server::run(config, std::future::pending::<()>()).await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_acknowledges_every_command() {
    let server = start(Dispatcher::default()).await;
    let mut client = TcpStream::connect(server.addr).await.unwrap();

    client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
    assert_eq!(read_reply(&mut client, 5).await, b"+OK\r\n");

    client
        .write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n")
        .await
        .unwrap();
    assert_eq!(read_reply(&mut client, 5).await, b"+OK\r\n");

    client.write_all(b"*3\r\n$3\r\nGET\r\n:123\r\n+Hello\r\n").await.unwrap();
    assert_eq!(read_reply(&mut client, 5).await, b"+OK\r\n");
}

#[tokio::test]
async fn test_redis_client() -> Result<(), RedisError> {
    let server = start(Dispatcher::default()).await;

    let client = redis::Client::open(format!("redis://{}/", server.addr))?;
    let mut con = client.get_multiplexed_async_connection().await?;

    let res: String = redis::cmd("SET")
        .arg("set_key")
        .arg(&b"binary\r\n\x00value"[..])
        .query_async(&mut con)
        .await?;
    assert_eq!(res, "OK");

    let res: String = redis::cmd("GET").arg("set_key").query_async(&mut con).await?;
    assert_eq!(res, "OK");

    Ok(())
}

#[tokio::test]
async fn test_pipelined_commands_are_answered_in_order() {
    let server = start(echo_dispatcher()).await;
    let mut client = TcpStream::connect(server.addr).await.unwrap();

    let request = [echo("one"), echo("two"), echo("three")].concat();
    client.write_all(&request).await.unwrap();

    let expected = [bulk("one"), bulk("two"), bulk("three")].concat();
    assert_eq!(read_reply(&mut client, expected.len()).await, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_connections_get_their_own_replies() {
    let server = start(echo_dispatcher()).await;
    let mut a = TcpStream::connect(server.addr).await.unwrap();
    let mut b = TcpStream::connect(server.addr).await.unwrap();

    // `a` sends half a request and stalls; `b` must still be served.
    let request = echo("a1");
    a.write_all(&request[..7]).await.unwrap();

    b.write_all(&echo("b1")).await.unwrap();
    assert_eq!(read_reply(&mut b, bulk("b1").len()).await, bulk("b1"));

    a.write_all(&request[7..]).await.unwrap();
    b.write_all(&echo("b2")).await.unwrap();
    a.write_all(&echo("a2")).await.unwrap();

    assert_eq!(read_reply(&mut b, bulk("b2").len()).await, bulk("b2"));
    let expected = [bulk("a1"), bulk("a2")].concat();
    assert_eq!(read_reply(&mut a, expected.len()).await, expected);
}

#[tokio::test]
async fn test_protocol_error_closes_connection() {
    let server = start(Dispatcher::default()).await;
    let mut client = TcpStream::connect(server.addr).await.unwrap();

    client.write_all(b"$1\r\n1\r\n").await.unwrap();

    let mut received = Vec::new();
    client.read_to_end(&mut received).await.unwrap();

    assert!(received.starts_with(b"-ERR protocol error"));
    assert!(received.ends_with(b"\r\n"));
    assert_eq!(received.iter().filter(|b| **b == b'\n').count(), 1);
}

#[tokio::test]
async fn test_unsupported_type_closes_connection() {
    let server = start(Dispatcher::default()).await;
    let mut client = TcpStream::connect(server.addr).await.unwrap();

    client.write_all(b"*1\r\n!5\r\nHELLO\r\n").await.unwrap();

    let mut received = Vec::new();
    client.read_to_end(&mut received).await.unwrap();

    assert!(received.starts_with(b"-ERR protocol error; unsupported data type"));
}

#[tokio::test]
async fn test_truncated_request_gets_no_reply() {
    let server = start(Dispatcher::default()).await;
    let mut client = TcpStream::connect(server.addr).await.unwrap();

    client.write_all(b"*1\r\n$5\r\nHEL").await.unwrap();
    client.shutdown().await.unwrap();

    let mut received = Vec::new();
    client.read_to_end(&mut received).await.unwrap();

    assert!(received.is_empty());
}

#[tokio::test]
async fn test_shutdown_closes_idle_connections_and_stops_accepting() {
    let server = start(Dispatcher::default()).await;
    let mut client = TcpStream::connect(server.addr).await.unwrap();

    client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
    assert_eq!(read_reply(&mut client, 5).await, b"+OK\r\n");

    server.shutdown.send(()).unwrap();

    let mut received = Vec::new();
    client.read_to_end(&mut received).await.unwrap();
    assert!(received.is_empty());

    server.handle.await.unwrap().unwrap();
    assert!(TcpStream::connect(server.addr).await.is_err());
}

#[tokio::test]
async fn test_shutdown_lets_in_flight_request_finish() {
    let server = start(Dispatcher::default()).await;
    let mut client = TcpStream::connect(server.addr).await.unwrap();

    client.write_all(b"*1\r\n$4\r\nPI").await.unwrap();
    sleep(Duration::from_millis(100)).await;

    server.shutdown.send(()).unwrap();
    sleep(Duration::from_millis(50)).await;

    client.write_all(b"NG\r\n").await.unwrap();

    let mut received = Vec::new();
    client.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, b"+OK\r\n");

    server.handle.await.unwrap().unwrap();
}
