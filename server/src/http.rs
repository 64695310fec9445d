//! Single-port HTTP facade.
//!
//! Serves the small REST surface used to create and probe games and
//! upgrades `/ws` requests into the duplex channel handled by
//! [`crate::connection`]. Everything listens on one port; TLS is an
//! upstream concern.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::header::{self, HeaderValue};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use log::{error, info, warn};
use serde::Deserialize;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

use shared::MAX_FRAME_BYTES;

use crate::connection;
use crate::directory::{Probe, SessionDirectory};
use crate::store::{QuizStore, StoreError};

#[derive(Deserialize)]
struct CreateGame {
    quiz: String,
}

/// Binds `addr` and serves until the listener fails.
pub async fn run(
    addr: SocketAddr,
    directory: Arc<SessionDirectory>,
    store: Arc<QuizStore>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = std::net::TcpListener::bind(addr)?;
    info!("listening on {}", listener.local_addr()?);
    serve_listener(listener, directory, store).await
}

/// Serves on an already bound listener. Useful when the caller needs the
/// actual port, e.g. after binding port 0.
pub async fn serve_listener(
    listener: std::net::TcpListener,
    directory: Arc<SessionDirectory>,
    store: Arc<QuizStore>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    listener.set_nonblocking(true)?;
    let make_service = make_service_fn(move |_conn| {
        let directory = Arc::clone(&directory);
        let store = Arc::clone(&store);
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                route(req, Arc::clone(&directory), Arc::clone(&store))
            }))
        }
    });
    Server::from_tcp(listener)?.serve(make_service).await?;
    Ok(())
}

async fn route(
    req: Request<Body>,
    directory: Arc<SessionDirectory>,
    store: Arc<QuizStore>,
) -> Result<Response<Body>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/ws") => upgrade_websocket(req, directory),
        (&Method::POST, "/api/games") => create_game(req, &directory, &store).await,
        (&Method::GET, path) if path.starts_with("/api/games/") => {
            let code = &path["/api/games/".len()..];
            probe_game(code, &directory).await
        }
        _ => json(StatusCode::NOT_FOUND, r#"{"error":"notFound"}"#),
    };
    Ok(response)
}

/// Completes the WebSocket handshake and hands the upgraded stream to the
/// connection layer.
fn upgrade_websocket(mut req: Request<Body>, directory: Arc<SessionDirectory>) -> Response<Body> {
    let is_upgrade = req
        .headers()
        .get(header::UPGRADE)
        .map_or(false, |v| v.as_bytes().eq_ignore_ascii_case(b"websocket"));
    let accept_key = req
        .headers()
        .get(header::SEC_WEBSOCKET_KEY)
        .map(|key| derive_accept_key(key.as_bytes()));
    let Some(accept_key) = accept_key.filter(|_| is_upgrade) else {
        return json(StatusCode::BAD_REQUEST, r#"{"error":"badRequest"}"#);
    };

    tokio::spawn(async move {
        match hyper::upgrade::on(&mut req).await {
            Ok(upgraded) => {
                let ws = WebSocketStream::from_raw_socket(upgraded, Role::Server, None).await;
                connection::serve(ws, directory).await;
            }
            Err(err) => warn!("websocket upgrade failed: {err}"),
        }
    });

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    if let Ok(value) = HeaderValue::from_str(&accept_key) {
        headers.insert(header::SEC_WEBSOCKET_ACCEPT, value);
    }
    response
}

async fn create_game(
    req: Request<Body>,
    directory: &Arc<SessionDirectory>,
    store: &QuizStore,
) -> Response<Body> {
    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(body) if body.len() <= MAX_FRAME_BYTES => body,
        Ok(_) => return json(StatusCode::PAYLOAD_TOO_LARGE, r#"{"error":"tooLarge"}"#),
        Err(_) => return json(StatusCode::BAD_REQUEST, r#"{"error":"badRequest"}"#),
    };
    let Ok(CreateGame { quiz }) = serde_json::from_slice::<CreateGame>(&body) else {
        return json(StatusCode::BAD_REQUEST, r#"{"error":"badRequest"}"#);
    };

    match store.load(&quiz).await {
        Ok(quiz) => {
            let code = directory.create(quiz).await;
            json(StatusCode::CREATED, &format!(r#"{{"code":"{code}"}}"#))
        }
        Err(StoreError::NotFound(_)) | Err(StoreError::InvalidId) => {
            json(StatusCode::NOT_FOUND, r#"{"error":"notFound"}"#)
        }
        Err(err @ StoreError::Parse(_)) | Err(err @ StoreError::Invalid(_)) => {
            warn!("rejected quiz {quiz:?}: {err}");
            json(StatusCode::UNPROCESSABLE_ENTITY, r#"{"error":"invalidQuiz"}"#)
        }
        Err(err) => {
            error!("failed to load quiz {quiz:?}: {err}");
            json(StatusCode::INTERNAL_SERVER_ERROR, r#"{"error":"internal"}"#)
        }
    }
}

async fn probe_game(code: &str, directory: &SessionDirectory) -> Response<Body> {
    match directory.probe(code).await {
        Probe::Open => json(StatusCode::OK, r#"{"ok":true}"#),
        Probe::AlreadyStarted => json(StatusCode::CONFLICT, r#"{"error":"alreadyStarted"}"#),
        Probe::NotFound => json(StatusCode::NOT_FOUND, r#"{"error":"notFound"}"#),
    }
}

fn json(status: StatusCode, body: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(body.to_owned()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
