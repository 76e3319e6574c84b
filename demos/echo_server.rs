//! A WebSocket echo server that also serves static files.
//!
//! ```text
//! cargo run --example echo_server -- ./public
//! ```
//!
//! Files below the given directory (the current directory by default) are served over plain
//! HTTP, and WebSocket connections to `/echo` get every text message sent back.
use std::sync::Arc;

use yaws::{http::FileSource, Dispatch, HttpServer, Options, WebSocketServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    simple_logger::init_with_level(log::Level::Debug)?;

    let root = std::env::args().nth(1).unwrap_or_else(|| ".".to_owned());
    let files = Arc::new(FileSource::new(std::fs::canonicalize(root)?)?);

    let server = HttpServer::with_options(
        Options::default()
            .with_max_header_size(16 * 1024)
            .with_max_payload_read(1024 * 1024)
            .with_max_read_buffer(4 * 1024 * 1024),
    );
    let websockets = WebSocketServer::new(&server);

    server.requests().on(move |mut req| {
        if req.method() != "GET" {
            let _ = req.write_head(405, [("Content-Length", "0")]);
            let _ = req.end();
            return Dispatch::Handled;
        }

        let files = Arc::clone(&files);
        tokio::spawn(async move {
            let url = req.url().to_owned();
            if let Err(err) = req.serve_url(&*files, &url).await {
                log::error!("Error serving {url}: {err}");
            }
        });
        Dispatch::Handled
    });

    websockets.requests().on(|req| {
        if req.url() != "/echo" {
            return Dispatch::Unhandled(req);
        }

        match req.accept() {
            Ok(ws) => {
                let echo = ws.clone();
                ws.messages().on(move |text| {
                    if let Err(err) = echo.send(&text) {
                        log::error!("Error echoing: {err}");
                    }
                    Dispatch::Handled
                });
                ws.closes().on(|()| {
                    log::info!("Client disconnected");
                    Dispatch::Handled
                });
                ws.start();
            }
            Err(err) => log::error!("Upgrade failed: {err}"),
        }
        Dispatch::Handled
    });

    let listening = server.listen(8080, None).await?;
    log::info!("Listening on {}", listening.local_addr());
    listening.join().await;

    Ok(())
}
