use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
};
use yaws::{Dispatch, HttpServer, Listening, Options};

async fn listen(server: &HttpServer) -> anyhow::Result<(Listening, SocketAddr)> {
    let listening = server.listen(0, Some("127.0.0.1")).await?;
    let addr = listening.local_addr();
    Ok((listening, addr))
}

/// Reads until `terminator` was received, returning everything read.
async fn read_until(stream: &mut TcpStream, terminator: &[u8]) -> anyhow::Result<String> {
    let mut out = Vec::new();
    let mut buf = [0u8; 1024];
    while !out.windows(terminator.len()).any(|w| w == terminator) {
        let n = stream.read(&mut buf).await?;
        anyhow::ensure!(n > 0, "connection closed after {:?}", String::from_utf8_lossy(&out));
        out.extend_from_slice(&buf[..n]);
    }
    Ok(String::from_utf8(out)?)
}

async fn read_to_end(stream: &mut TcpStream) -> anyhow::Result<String> {
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out)).await??;
    Ok(String::from_utf8(out)?)
}

#[tokio::test]
async fn unclaimed_request_closes_without_response() -> anyhow::Result<()> {
    let server = HttpServer::new();
    let (_listening, addr) = listen(&server).await?;

    let mut stream = TcpStream::connect(addr).await?;
    stream
        .write_all(b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
        .await?;

    assert_eq!(read_to_end(&mut stream).await?, "");
    Ok(())
}

#[tokio::test]
async fn declined_request_closes_without_response() -> anyhow::Result<()> {
    let server = HttpServer::new();
    server.requests().on(Dispatch::Unhandled);
    let (_listening, addr) = listen(&server).await?;

    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(b"GET / HTTP/1.1\r\n\r\n").await?;

    assert_eq!(read_to_end(&mut stream).await?, "");
    Ok(())
}

#[tokio::test]
async fn response_without_keep_alive_closes() -> anyhow::Result<()> {
    let server = HttpServer::new();
    server.requests().on(|mut req| {
        let body = format!("{} {}", req.method(), req.url());
        let _ = req.write_head(200, [("Content-Length", body.len().to_string())]);
        let _ = req.end_with(body);
        Dispatch::Handled
    });
    let (_listening, addr) = listen(&server).await?;

    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n").await?;

    assert_eq!(
        read_to_end(&mut stream).await?,
        "HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nGET /hello"
    );
    Ok(())
}

#[tokio::test]
async fn keep_alive_serves_two_requests() -> anyhow::Result<()> {
    let server = HttpServer::new();
    server.requests().on(|mut req| {
        let url = req.url().to_owned();
        let _ = req.write_head(200, [("Content-Type", "text/plain")]);
        let _ = req.write("you asked for ");
        let _ = req.end_with(url);
        Dispatch::Handled
    });
    let (_listening, addr) = listen(&server).await?;

    let mut stream = TcpStream::connect(addr).await?;
    for path in ["/first", "/second"] {
        let request = format!("GET {path} HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
        stream.write_all(request.as_bytes()).await?;

        let response = read_until(&mut stream, b"0\r\n\r\n").await?;
        let expected = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nConnection: keep-alive\r\n\
             Transfer-Encoding: chunked\r\n\r\nE\r\nyou asked for \r\n{:X}\r\n{path}\r\n0\r\n\r\n",
            path.len()
        );
        assert_eq!(response, expected);
    }

    // still open: the client decides when to hang up
    stream.shutdown().await?;
    assert_eq!(read_to_end(&mut stream).await?, "");
    Ok(())
}

#[tokio::test]
async fn keep_alive_token_is_matched_exactly() -> anyhow::Result<()> {
    let server = HttpServer::new();
    server.requests().on(|mut req| {
        let _ = req.write_head(200, [("Content-Length", "2")]);
        let _ = req.end_with("ok");
        Dispatch::Handled
    });
    let (_listening, addr) = listen(&server).await?;

    let mut stream = TcpStream::connect(addr).await?;
    stream
        .write_all(b"GET / HTTP/1.1\r\nConnection: Keep-Alive\r\n\r\n")
        .await?;

    assert_eq!(
        read_to_end(&mut stream).await?,
        "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok"
    );
    Ok(())
}

#[tokio::test]
async fn listen_on_unresolvable_host_fails() {
    let server = HttpServer::new();
    let res = server.listen(0, Some("local\0host")).await;
    assert!(matches!(res, Err(yaws::Error::IoError(_))));
}

#[tokio::test]
async fn keep_alive_waits_for_asynchronous_responses() -> anyhow::Result<()> {
    let server = HttpServer::new();
    server.requests().on(|mut req| {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = req.write_head(200, [("Content-Length", "4")]);
            let _ = req.end_with("done");
        });
        Dispatch::Handled
    });
    let (_listening, addr) = listen(&server).await?;

    let mut stream = TcpStream::connect(addr).await?;
    for _ in 0..2 {
        stream
            .write_all(b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
            .await?;
        let response = read_until(&mut stream, b"done").await?;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Connection: keep-alive\r\n"));
        assert!(!response.contains("Transfer-Encoding"));
    }
    Ok(())
}

#[tokio::test]
async fn split_header_delivery() -> anyhow::Result<()> {
    let server = HttpServer::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    server.requests().on(move |mut req| {
        let _ = tx.send((
            req.method().to_owned(),
            req.url().to_owned(),
            req.version().to_owned(),
            req.header("Host").map(str::to_owned),
            req.header("X-Token").map(str::to_owned),
        ));
        let _ = req.write_head(204, [("Content-Length", "0")]);
        let _ = req.end();
        Dispatch::Handled
    });
    let (_listening, addr) = listen(&server).await?;

    let raw = b"GET /split?q=1 HTTP/1.1\r\nHost: example.com\r\nX-Token: abc\r\n\r\n";
    let whole = {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(raw).await?;
        rx.recv().await
    };

    for cuts in [[1, 2], [24, 25], [raw.len() - 3, raw.len() - 1], [raw.len() - 2, raw.len() - 1]] {
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        stream.write_all(&raw[..cuts[0]]).await?;
        tokio::time::sleep(Duration::from_millis(10)).await;
        stream.write_all(&raw[cuts[0]..cuts[1]]).await?;
        tokio::time::sleep(Duration::from_millis(10)).await;
        stream.write_all(&raw[cuts[1]..]).await?;

        assert_eq!(rx.recv().await, whole, "cuts {cuts:?}");
    }

    let (method, url, version, host, token) = whole.unwrap();
    assert_eq!(method, "GET");
    assert_eq!(url, "/split?q=1");
    assert_eq!(version, "HTTP/1.1");
    assert_eq!(host.as_deref(), Some("example.com"));
    assert_eq!(token.as_deref(), Some("abc"));
    Ok(())
}

#[tokio::test]
async fn body_follows_head() -> anyhow::Result<()> {
    let server = HttpServer::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    server.requests().on(move |mut req| {
        let _ = tx.send(req.body().clone());
        req.close();
        Dispatch::Handled
    });
    let (_listening, addr) = listen(&server).await?;

    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(b"GET / HTTP/1.1\nHost: x\n\nname=value").await?;

    assert_eq!(&rx.recv().await.unwrap()[..], b"name=value");
    assert_eq!(read_to_end(&mut stream).await?, "");
    Ok(())
}

#[tokio::test]
async fn repeated_end_sends_one_response() -> anyhow::Result<()> {
    let server = HttpServer::new();
    server.requests().on(|mut req| {
        let _ = req.write_head(200, [("Content-Length", "2")]);
        let _ = req.end_with("ok");
        let _ = req.end();
        let _ = req.end_with("again");
        Dispatch::Handled
    });
    let (_listening, addr) = listen(&server).await?;

    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(b"GET / HTTP/1.1\r\n\r\n").await?;

    assert_eq!(
        read_to_end(&mut stream).await?,
        "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok"
    );
    Ok(())
}

#[tokio::test]
async fn oversized_head_closes() -> anyhow::Result<()> {
    let server = HttpServer::with_options(Options::default().with_max_header_size(64));
    server.requests().on(|mut req| {
        let _ = req.end();
        Dispatch::Handled
    });
    let (_listening, addr) = listen(&server).await?;

    let mut stream = TcpStream::connect(addr).await?;
    let padding = "a".repeat(256);
    stream
        .write_all(format!("GET / HTTP/1.1\r\nX-Padding: {padding}").as_bytes())
        .await?;

    assert_eq!(read_to_end(&mut stream).await?, "");
    Ok(())
}

#[tokio::test]
async fn serve_files() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    std::fs::write(root.path().join("index.html"), "<h1>hi</h1>")?;
    let files = Arc::new(yaws::http::FileSource::new(root.path().canonicalize()?)?);

    let server = HttpServer::new();
    server.requests().on(move |mut req| {
        let files = Arc::clone(&files);
        tokio::spawn(async move {
            let url = req.url().to_owned();
            let _ = req.serve_url(&*files, &url).await;
        });
        Dispatch::Handled
    });
    let (_listening, addr) = listen(&server).await?;

    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(b"GET /index.html HTTP/1.1\r\n\r\n").await?;
    assert_eq!(
        read_to_end(&mut stream).await?,
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 11\r\n\r\n<h1>hi</h1>"
    );

    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(b"GET /missing.css HTTP/1.1\r\n\r\n").await?;
    assert_eq!(
        read_to_end(&mut stream).await?,
        "HTTP/1.1 404 Not Found\r\nContent-Type: text/css\r\nContent-Length: 0\r\n\r\n"
    );
    Ok(())
}

#[tokio::test]
async fn closed_listener_stops_accepting() -> anyhow::Result<()> {
    let server = HttpServer::new();
    let (listening, addr) = listen(&server).await?;

    listening.close();
    listening.join().await;

    assert!(TcpStream::connect(addr).await.is_err());
    Ok(())
}

#[tokio::test]
async fn serve_connection_over_duplex() -> anyhow::Result<()> {
    let server = HttpServer::new();
    server.requests().on(|mut req| {
        let _ = req.write_head(200, [("Content-Length", "3")]);
        let _ = req.end_with("hey");
        Dispatch::Handled
    });

    let (local, mut remote) = tokio::io::duplex(4096);
    let task = server.serve_connection(local);
    remote.write_all(b"GET / HTTP/1.1\r\n\r\n").await?;

    let mut out = String::new();
    remote.read_to_string(&mut out).await?;
    assert_eq!(out, "HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nhey");
    task.await?;
    Ok(())
}
