/*
[INPUT]:  Test configuration and mock venue requirements
[OUTPUT]: Shared test utilities, fixtures, and a scripted venue server
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for pocketoption-adapter tests.
//!
//! The mock venue is an in-process WebSocket server speaking the venue's
//! framing over plain `ws://`, scripted frame by frame from each test.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use pocketoption_adapter::{AuthPayload, ClientConfig, Endpoint, EndpointPool, PocketOptionClient};

pub type VenueStream = WebSocketStream<TcpStream>;

/// Session payload used across tests, in the form callers capture it
pub const AUTH_RAW: &str =
    r#"42["auth",{"session":"test-session","isDemo":1,"uid":89224537,"platform":2}]"#;

/// Keep-alive frame the client emits; skipped by [`expect_text`]
pub const HEARTBEAT_FRAME: &str = r#"42["ps"]"#;

/// Bind the mock venue and return the endpoint URL clients should use
pub async fn bind_venue() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock venue");
    let addr = listener.local_addr().expect("mock venue address");
    let url = format!("ws://{addr}/socket.io/?EIO=4&transport=websocket");
    (listener, url)
}

/// Accept the next client connection
pub async fn accept_client(listener: &TcpListener) -> VenueStream {
    let (stream, _) = listener.accept().await.expect("accept client");
    tokio_tungstenite::accept_async(stream)
        .await
        .expect("websocket handshake")
}

/// Next text frame from the client, skipping keep-alives
pub async fn expect_text(ws: &mut VenueStream) -> String {
    loop {
        match ws.next().await.expect("client hung up").expect("transport") {
            Message::Text(text) => {
                if text.as_str() == HEARTBEAT_FRAME {
                    continue;
                }
                return text.to_string();
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

/// Send a text frame to the client
pub async fn send_text(ws: &mut VenueStream, text: &str) {
    ws.send(Message::text(text)).await.expect("send text");
}

/// Send a binary frame to the client
pub async fn send_binary(ws: &mut VenueStream, bytes: &[u8]) {
    ws.send(Message::binary(bytes.to_vec()))
        .await
        .expect("send binary");
}

/// Drive the venue side of the full handshake and return the authentication
/// message the client sent
pub async fn perform_handshake(ws: &mut VenueStream) -> String {
    send_text(
        ws,
        r#"0{"sid":"test-sid","pingInterval":25000,"pingTimeout":20000}"#,
    )
    .await;
    let ack = expect_text(ws).await;
    assert_eq!(ack, "40", "client must ack the open frame");
    send_text(ws, r#"40{"sid":"namespace-sid"}"#).await;
    let auth = expect_text(ws).await;
    send_text(ws, r#"451-["successauth"]"#).await;
    auth
}

/// Client configuration tuned for fast, deterministic tests
#[allow(dead_code)]
pub fn test_config() -> ClientConfig {
    ClientConfig {
        connect_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(5),
        history_timeout: Duration::from_secs(5),
        // Long enough that only the immediate post-auth beat appears.
        heartbeat_interval: Duration::from_secs(60),
        reconnect_delay_floor: Duration::from_secs(5),
        reconnect_delay_ceiling: Duration::from_secs(60),
    }
}

/// Client pointed at the mock venue with the shared test session
#[allow(dead_code)]
pub fn test_client(url: &str) -> PocketOptionClient {
    test_client_with(url, test_config())
}

#[allow(dead_code)]
pub fn test_client_with(url: &str, config: ClientConfig) -> PocketOptionClient {
    let pool = EndpointPool::new(vec![
        Endpoint::new(url, "TEST").expect("test endpoint parses"),
    ])
    .expect("test pool");
    PocketOptionClient::with_config(AuthPayload::Raw(AUTH_RAW.to_string()), config)
        .with_endpoints(pool)
}
