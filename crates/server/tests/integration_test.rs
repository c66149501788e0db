use std::io::Cursor;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use squall_protocol::{Request, Response};
use squall_storage::{FsyncPolicy, Store, StoreOptions};

/// Helper: sobe um servidor em memória + AOF num tempdir.
/// O TempDir é devolvido para viver até o fim do teste.
async fn start_server(port: u16) -> (tokio::task::JoinHandle<()>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let options = StoreOptions {
        aof_path: dir.path().join("cache.aof"),
        fsync: FsyncPolicy::Always,
        sweep_interval: Duration::from_secs(30),
    };

    let handle = tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{port}"))
            .await
            .unwrap();
        let store = Store::open(options).await.unwrap();
        let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

        loop {
            let (socket, _) = listener.accept().await.unwrap();
            let store = store.clone();
            let mut shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(async move {
                let conn = squall_server::Connection::new(socket);
                let _ = squall_server::handle_connection(conn, store, &mut shutdown_rx).await;
            });
        }
    });

    // Aguardar servidor estar pronto
    tokio::time::sleep(Duration::from_millis(50)).await;
    (handle, dir)
}

/// Helper: envia uma requisição e lê a resposta correspondente.
async fn send_request(stream: &mut TcpStream, request: &Request) -> Response {
    let mut buf = BytesMut::new();
    request.encode(&mut buf);
    stream.write_all(&buf).await.unwrap();
    stream.flush().await.unwrap();

    read_response(stream).await
}

/// Helper: lê uma resposta do stream.
async fn read_response(stream: &mut TcpStream) -> Response {
    let mut response_buf = BytesMut::with_capacity(4096);
    loop {
        let mut cursor = Cursor::new(&response_buf[..]);
        if Response::check(&mut cursor).is_ok() {
            cursor.set_position(0);
            return Response::parse(&mut cursor).unwrap();
        }

        let n = stream.read_buf(&mut response_buf).await.unwrap();
        assert!(n > 0, "server closed connection unexpectedly");
    }
}

fn set(key: &str, value: &str, ttl_seconds: u64) -> Request {
    Request::Set {
        key: key.into(),
        value: value.into(),
        ttl_seconds,
    }
}

fn get(key: &str) -> Request {
    Request::Get { key: key.into() }
}

fn del(key: &str) -> Request {
    Request::Del { key: key.into() }
}

#[tokio::test]
async fn test_set_get() {
    let port = 16480;
    let (_server, _dir) = start_server(port).await;

    let mut stream = TcpStream::connect(format!("127.0.0.1:{port}"))
        .await
        .unwrap();

    let response = send_request(&mut stream, &set("mykey", "myvalue", 0)).await;
    assert_eq!(response, Response::Ok);

    let response = send_request(&mut stream, &get("mykey")).await;
    assert_eq!(response, Response::Value("myvalue".into()));
}

#[tokio::test]
async fn test_get_missing() {
    let port = 16481;
    let (_server, _dir) = start_server(port).await;

    let mut stream = TcpStream::connect(format!("127.0.0.1:{port}"))
        .await
        .unwrap();

    let response = send_request(&mut stream, &get("missing")).await;
    assert_eq!(response, Response::NotFound);
}

#[tokio::test]
async fn test_del() {
    let port = 16482;
    let (_server, _dir) = start_server(port).await;

    let mut stream = TcpStream::connect(format!("127.0.0.1:{port}"))
        .await
        .unwrap();

    send_request(&mut stream, &set("a", "1", 0)).await;

    let response = send_request(&mut stream, &del("a")).await;
    assert_eq!(response, Response::Ok);

    let response = send_request(&mut stream, &get("a")).await;
    assert_eq!(response, Response::NotFound);

    // DEL de chave inexistente também é Ok
    let response = send_request(&mut stream, &del("a")).await;
    assert_eq!(response, Response::Ok);
}

#[tokio::test]
async fn test_overwrite() {
    let port = 16483;
    let (_server, _dir) = start_server(port).await;

    let mut stream = TcpStream::connect(format!("127.0.0.1:{port}"))
        .await
        .unwrap();

    send_request(&mut stream, &set("k", "v1", 0)).await;
    send_request(&mut stream, &set("k", "v2", 0)).await;

    let response = send_request(&mut stream, &get("k")).await;
    assert_eq!(response, Response::Value("v2".into()));
}

#[tokio::test]
async fn test_set_with_ttl_expires() {
    let port = 16484;
    let (_server, _dir) = start_server(port).await;

    let mut stream = TcpStream::connect(format!("127.0.0.1:{port}"))
        .await
        .unwrap();

    let response = send_request(&mut stream, &set("temp", "val", 1)).await;
    assert_eq!(response, Response::Ok);

    let response = send_request(&mut stream, &get("temp")).await;
    assert_eq!(response, Response::Value("val".into()));

    tokio::time::sleep(Duration::from_millis(2_100)).await;

    let response = send_request(&mut stream, &get("temp")).await;
    assert_eq!(response, Response::NotFound);
}

#[tokio::test]
async fn test_two_clients_share_store() {
    let port = 16485;
    let (_server, _dir) = start_server(port).await;

    let mut writer = TcpStream::connect(format!("127.0.0.1:{port}"))
        .await
        .unwrap();
    let mut reader = TcpStream::connect(format!("127.0.0.1:{port}"))
        .await
        .unwrap();

    send_request(&mut writer, &set("shared", "hello", 0)).await;

    let response = send_request(&mut reader, &get("shared")).await;
    assert_eq!(response, Response::Value("hello".into()));
}

#[tokio::test]
async fn test_pipelined_requests() {
    let port = 16486;
    let (_server, _dir) = start_server(port).await;

    let mut stream = TcpStream::connect(format!("127.0.0.1:{port}"))
        .await
        .unwrap();

    // duas requisições num único write; o servidor responde na ordem
    let mut buf = BytesMut::new();
    set("a", "1", 0).encode(&mut buf);
    get("a").encode(&mut buf);
    stream.write_all(&buf).await.unwrap();
    stream.flush().await.unwrap();

    assert_eq!(read_response(&mut stream).await, Response::Ok);
    assert_eq!(
        read_response(&mut stream).await,
        Response::Value("1".into())
    );
}

#[tokio::test]
async fn test_empty_value_roundtrip() {
    let port = 16487;
    let (_server, _dir) = start_server(port).await;

    let mut stream = TcpStream::connect(format!("127.0.0.1:{port}"))
        .await
        .unwrap();

    send_request(&mut stream, &set("empty", "", 0)).await;
    let response = send_request(&mut stream, &get("empty")).await;
    assert_eq!(response, Response::Value(String::new()));
}
