//! Integration tests over the real listen port: the REST facade and the
//! WebSocket upgrade into the duplex channel.

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use hyper::{Body, Client, Method, Request, StatusCode};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use server::directory::SessionDirectory;
use server::http;
use server::store::QuizStore;
use shared::{ClientMessage, Selection, ServerMessage};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn quiz_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("quiz-api-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("maths.json"),
        r#"{"questions":[{"question":"2+2?","answers":["3","4","5","6"],"correct":1}]}"#,
    )
    .unwrap();
    std::fs::write(dir.join("broken.json"), r#"{"questions":[]}"#).unwrap();
    dir
}

async fn start_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let directory = SessionDirectory::new();
    let store = Arc::new(QuizStore::new(quiz_dir()));
    tokio::spawn(async move {
        http::serve_listener(listener, directory, store)
            .await
            .unwrap();
    });
    format!("127.0.0.1:{}", addr.port())
}

async fn post_create(addr: &str, body: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("http://{addr}/api/games"))
        .body(Body::from(body.to_owned()))
        .unwrap();
    let response = Client::new().request(request).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn get(addr: &str, path: &str) -> (StatusCode, serde_json::Value) {
    let uri: hyper::Uri = format!("http://{addr}{path}").parse().unwrap();
    let response = Client::new().get(uri).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn create_game(addr: &str) -> String {
    let (status, body) = post_create(addr, r#"{"quiz":"maths"}"#).await;
    assert_eq!(status, StatusCode::CREATED);
    body["code"].as_str().unwrap().to_owned()
}

async fn connect_ws(addr: &str) -> Ws {
    let (ws, _response) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("websocket handshake failed");
    ws
}

async fn send(ws: &mut Ws, msg: &ClientMessage) {
    ws.send(Message::Text(serde_json::to_string(msg).unwrap()))
        .await
        .unwrap();
}

async fn recv(ws: &mut Ws) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn create_join_and_probe_lifecycle() {
    let addr = start_server().await;
    let code = create_game(&addr).await;
    assert_eq!(code.len(), 6);

    let (status, body) = get(&addr, &format!("/api/games/{code}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let mut host = connect_ws(&addr).await;
    send(&mut host, &ClientMessage::HostJoin { pin: code.clone() }).await;
    assert_eq!(recv(&mut host).await, ServerMessage::HostJoined { pin: code.clone() });

    let mut player = connect_ws(&addr).await;
    send(
        &mut player,
        &ClientMessage::PlayerJoin {
            pin: code.clone(),
            name: "Alice".into(),
        },
    )
    .await;
    assert!(matches!(recv(&mut player).await, ServerMessage::Joined { .. }));
    assert_eq!(
        recv(&mut host).await,
        ServerMessage::PlayerJoined { name: "Alice".into(), count: 1 }
    );

    send(&mut host, &ClientMessage::StartGame { pin: code.clone() }).await;
    assert!(matches!(
        recv(&mut player).await,
        ServerMessage::Question { index: 0, correct: None, .. }
    ));
    assert!(matches!(
        recv(&mut host).await,
        ServerMessage::Question { correct: Some(_), .. }
    ));

    // A running game no longer accepts joiners.
    let (status, body) = get(&addr, &format!("/api/games/{code}")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "alreadyStarted");

    // The answer flows end to end through the socket as well.
    send(
        &mut player,
        &ClientMessage::Answer {
            pin: code.clone(),
            answer: Selection::One(1),
            is_final: false,
        },
    )
    .await;
    assert!(matches!(
        recv(&mut player).await,
        ServerMessage::AnswerReceived { correct: true, .. }
    ));
    assert_eq!(recv(&mut host).await, ServerMessage::AnswerCount { count: 1, total: 1 });
}

#[tokio::test]
async fn probe_and_create_report_unknown_resources() {
    let addr = start_server().await;

    let (status, body) = get(&addr, "/api/games/000000").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "notFound");

    let (status, _) = post_create(&addr, r#"{"quiz":"no-such-quiz"}"#).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = post_create(&addr, r#"{"quiz":"broken"}"#).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "invalidQuiz");

    let (status, _) = post_create(&addr, "not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(&addr, "/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn join_with_unknown_code_is_an_error_frame() {
    let addr = start_server().await;
    let mut ws = connect_ws(&addr).await;
    send(
        &mut ws,
        &ClientMessage::PlayerJoin {
            pin: "000000".into(),
            name: "Alice".into(),
        },
    )
    .await;
    assert_eq!(
        recv(&mut ws).await,
        ServerMessage::Error { message: "Game not found".into() }
    );
}

#[tokio::test]
async fn bad_frames_are_dropped_but_the_connection_survives() {
    let addr = start_server().await;
    let code = create_game(&addr).await;
    let mut ws = connect_ws(&addr).await;

    // Oversized frames get an error and are otherwise ignored.
    let oversized = "a".repeat(shared::MAX_FRAME_BYTES + 1);
    ws.send(Message::Text(oversized)).await.unwrap();
    assert_eq!(
        recv(&mut ws).await,
        ServerMessage::Error { message: "Message too large".into() }
    );

    // Malformed JSON, unknown types and bad pins are dropped silently.
    ws.send(Message::Text("{not json".into())).await.unwrap();
    ws.send(Message::Text(r#"{"type":"mystery","pin":"123456"}"#.into()))
        .await
        .unwrap();
    send(
        &mut ws,
        &ClientMessage::PlayerJoin {
            pin: "12".into(),
            name: "Alice".into(),
        },
    )
    .await;

    // The very next valid join still works, with no stray errors first.
    send(
        &mut ws,
        &ClientMessage::PlayerJoin {
            pin: code.clone(),
            name: "Alice".into(),
        },
    )
    .await;
    assert!(matches!(recv(&mut ws).await, ServerMessage::Joined { .. }));
}

#[tokio::test]
async fn player_disconnect_reaches_the_host() {
    let addr = start_server().await;
    let code = create_game(&addr).await;

    let mut host = connect_ws(&addr).await;
    send(&mut host, &ClientMessage::HostJoin { pin: code.clone() }).await;
    assert!(matches!(recv(&mut host).await, ServerMessage::HostJoined { .. }));

    let mut player = connect_ws(&addr).await;
    send(
        &mut player,
        &ClientMessage::PlayerJoin {
            pin: code.clone(),
            name: "Alice".into(),
        },
    )
    .await;
    assert!(matches!(recv(&mut player).await, ServerMessage::Joined { .. }));
    assert!(matches!(recv(&mut host).await, ServerMessage::PlayerJoined { .. }));

    player.close(None).await.unwrap();
    drop(player);
    assert_eq!(recv(&mut host).await, ServerMessage::PlayerLeft { count: 0 });
}
