/*
[INPUT]:  Scripted mock-venue sessions over plain ws://
[OUTPUT]: End-to-end verification of the realtime client
[POS]:    Integration tests - connection lifecycle, requests, streams
[UPDATE]: When the protocol client changes
*/

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use serde_json::Value;
use tokio::time::{sleep, timeout};

use common::*;
use pocketoption_adapter::{
    AccountMode, ConnectionStatus, Direction, OrderId, PocketOptionError,
};

/// Poll a condition until it holds or two seconds pass
async fn eventually(mut cond: impl FnMut() -> bool, what: &str) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn test_connect_authenticates_and_sends_auth_verbatim() {
    let (listener, url) = bind_venue().await;
    let server = tokio::spawn(async move {
        let mut ws = accept_client(&listener).await;
        let auth = perform_handshake(&mut ws).await;
        // Engine-level heartbeat probe must be answered immediately.
        send_text(&mut ws, "2").await;
        let probe_ack = expect_text(&mut ws).await;
        (auth, probe_ack)
    });

    let client = test_client(&url);
    client.connect().await.unwrap();
    client
        .wait_until_authenticated(Duration::from_secs(5))
        .await
        .unwrap();
    assert!(client.is_connected());
    assert_eq!(client.connection_status(), ConnectionStatus::Authenticated);

    let (auth, probe_ack) = server.await.unwrap();
    assert_eq!(auth, AUTH_RAW, "auth payload must pass through untouched");
    assert_eq!(probe_ack, "3");
    client.close().await;
    assert_eq!(client.connection_status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_sends_queued_before_auth_flush_in_fifo_order() {
    let (listener, url) = bind_venue().await;
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let mut ws = accept_client(&listener).await;
        send_text(&mut ws, r#"0{"sid":"test-sid"}"#).await;
        assert_eq!(expect_text(&mut ws).await, "40");
        send_text(&mut ws, r#"40{"sid":"ns"}"#).await;
        let _auth = expect_text(&mut ws).await;
        // Hold authentication open until the client has queued its sends.
        release_rx.await.unwrap();
        send_text(&mut ws, r#"451-["successauth"]"#).await;
        let first = expect_text(&mut ws).await;
        let second = expect_text(&mut ws).await;
        (first, second)
    });

    let client = test_client(&url);
    client.connect().await.unwrap();

    let mut status = client.status_stream();
    status
        .wait_for(ConnectionStatus::is_connecting)
        .await
        .unwrap();

    client.send_raw(r#"42["first"]"#).await.unwrap();
    client.send_raw(r#"42["second"]"#).await.unwrap();
    release_tx.send(()).unwrap();

    client
        .wait_until_authenticated(Duration::from_secs(5))
        .await
        .unwrap();
    let (first, second) = server.await.unwrap();
    assert_eq!(first, r#"42["first"]"#);
    assert_eq!(second, r#"42["second"]"#);
    client.close().await;
}

#[tokio::test]
async fn test_balance_push_updates_account_state() {
    let (listener, url) = bind_venue().await;
    let server = tokio::spawn(async move {
        let mut ws = accept_client(&listener).await;
        perform_handshake(&mut ws).await;
        send_binary(&mut ws, br#"{"balance": 1000, "isDemo": 1, "uid": 77}"#).await;
        sleep(Duration::from_millis(500)).await;
    });

    let client = test_client(&url);
    client.connect().await.unwrap();
    client
        .wait_until_authenticated(Duration::from_secs(5))
        .await
        .unwrap();

    eventually(|| client.balance().is_some(), "balance update").await;
    let account = client.account();
    assert_eq!(account.balance, Some(Decimal::from(1000)));
    assert_eq!(account.mode, Some(AccountMode::Demo));
    assert_eq!(account.uid, Some(77));
    assert!(account.connected);

    client.close().await;
    server.abort();
}

#[tokio::test]
async fn test_open_order_round_trip() {
    let (listener, url) = bind_venue().await;
    let server = tokio::spawn(async move {
        let mut ws = accept_client(&listener).await;
        perform_handshake(&mut ws).await;
        let order = expect_text(&mut ws).await;
        send_binary(
            &mut ws,
            br#"{"requestId":"buy","id":123,"asset":"EURUSD_otc","amount":1.0}"#,
        )
        .await;
        sleep(Duration::from_millis(200)).await;
        order
    });

    let client = test_client(&url);
    client.connect().await.unwrap();
    client
        .wait_until_authenticated(Duration::from_secs(5))
        .await
        .unwrap();

    let request = pocketoption_adapter::OpenOrderRequest::new(
        "EURUSD_otc",
        Decimal::ONE,
        Direction::Call,
        60,
    )
    .with_request_id("buy");
    let order = client.open_order(request).await.unwrap();
    assert_eq!(order.id, Some(OrderId::Num(123)));
    assert_eq!(order.asset.as_deref(), Some("EURUSD_otc"));

    let sent = server.await.unwrap();
    let body: Value = serde_json::from_str(sent.trim_start_matches("42")).unwrap();
    assert_eq!(body[0], "openOrder");
    assert_eq!(body[1]["requestId"], "buy");
    assert_eq!(body[1]["action"], "call");
    client.close().await;
}

#[tokio::test]
async fn test_open_order_rejection_surfaces_to_caller() {
    let (listener, url) = bind_venue().await;
    let _server = tokio::spawn(async move {
        let mut ws = accept_client(&listener).await;
        perform_handshake(&mut ws).await;
        let _order = expect_text(&mut ws).await;
        send_binary(&mut ws, br#"{"requestId":"buy","error":"not enough money"}"#).await;
        sleep(Duration::from_millis(500)).await;
    });

    let client = test_client(&url);
    client.connect().await.unwrap();
    client
        .wait_until_authenticated(Duration::from_secs(5))
        .await
        .unwrap();

    let request = pocketoption_adapter::OpenOrderRequest::new(
        "EURUSD_otc",
        Decimal::ONE,
        Direction::Put,
        60,
    )
    .with_request_id("buy");
    let err = client.open_order(request).await.unwrap_err();
    assert!(matches!(err, PocketOptionError::Rejected(message) if message.contains("money")));
    client.close().await;
}

#[tokio::test]
async fn test_open_order_times_out_without_reply() {
    let (listener, url) = bind_venue().await;
    let _server = tokio::spawn(async move {
        let mut ws = accept_client(&listener).await;
        perform_handshake(&mut ws).await;
        let _order = expect_text(&mut ws).await;
        // Never reply; keep the connection healthy.
        sleep(Duration::from_secs(5)).await;
    });

    let mut config = test_config();
    config.request_timeout = Duration::from_millis(300);
    let client = test_client_with(&url, config);
    client.connect().await.unwrap();
    client
        .wait_until_authenticated(Duration::from_secs(5))
        .await
        .unwrap();

    let started = Instant::now();
    let err = client
        .buy("EURUSD_otc", Decimal::ONE, Direction::Call, 60)
        .await
        .unwrap_err();
    let elapsed = started.elapsed();
    assert!(matches!(err, PocketOptionError::RequestTimeout { .. }));
    assert!(elapsed >= Duration::from_millis(250), "failed too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "failed too late: {elapsed:?}");
    // A timed-out request does not tear the connection down.
    assert!(client.is_connected());
    client.close().await;
}

#[tokio::test]
async fn test_disconnect_fails_pending_requests() {
    let (listener, url) = bind_venue().await;
    let _server = tokio::spawn(async move {
        let mut ws = accept_client(&listener).await;
        perform_handshake(&mut ws).await;
        let _order = expect_text(&mut ws).await;
        // Drop the connection with the request still pending.
    });

    let client = test_client(&url);
    client.connect().await.unwrap();
    client
        .wait_until_authenticated(Duration::from_secs(5))
        .await
        .unwrap();

    let started = Instant::now();
    let err = client
        .buy("EURUSD_otc", Decimal::ONE, Direction::Call, 60)
        .await
        .unwrap_err();
    assert!(matches!(err, PocketOptionError::ConnectionLost(_)));
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "fail_all must resolve pending requests promptly"
    );
    client.close().await;
}

#[tokio::test]
async fn test_close_fails_pending_requests() {
    let (listener, url) = bind_venue().await;
    let _server = tokio::spawn(async move {
        let mut ws = accept_client(&listener).await;
        perform_handshake(&mut ws).await;
        let _order = expect_text(&mut ws).await;
        sleep(Duration::from_secs(5)).await;
    });

    let client = Arc::new(test_client(&url));
    client.connect().await.unwrap();
    client
        .wait_until_authenticated(Duration::from_secs(5))
        .await
        .unwrap();

    let waiter = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .buy("EURUSD_otc", Decimal::ONE, Direction::Call, 60)
                .await
        }
    });
    sleep(Duration::from_millis(100)).await;
    client.close().await;

    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, PocketOptionError::ConnectionLost(_)));
}

#[tokio::test]
async fn test_not_authorized_is_fatal() {
    let (listener, url) = bind_venue().await;
    let _server = tokio::spawn(async move {
        let mut ws = accept_client(&listener).await;
        send_text(&mut ws, r#"0{"sid":"test-sid"}"#).await;
        assert_eq!(expect_text(&mut ws).await, "40");
        send_text(&mut ws, r#"40{"sid":"ns"}"#).await;
        let _auth = expect_text(&mut ws).await;
        send_text(&mut ws, r#"42["NotAuthorized"]"#).await;
        sleep(Duration::from_millis(500)).await;
    });

    let client = test_client(&url);
    client.connect().await.unwrap();
    let err = client
        .wait_until_authenticated(Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(err.is_auth_error());
    assert_eq!(client.connection_status(), ConnectionStatus::AuthRejected);

    // The session stays rejected; no sends are accepted.
    let err = client.send_raw(r#"42["ps"]"#).await.unwrap_err();
    assert!(matches!(err, PocketOptionError::AuthRejected(_)));
    client.close().await;
    assert_eq!(client.connection_status(), ConnectionStatus::AuthRejected);
}

#[tokio::test]
async fn test_load_history_round_trip() {
    let (listener, url) = bind_venue().await;
    let server = tokio::spawn(async move {
        let mut ws = accept_client(&listener).await;
        perform_handshake(&mut ws).await;
        let request = expect_text(&mut ws).await;
        send_text(&mut ws, r#"451-["loadHistoryPeriod"]"#).await;
        send_binary(
            &mut ws,
            br#"{"asset":"EURUSD_otc","period":60,"data":[{"time":120.0,"price":1.2},{"time":60.0,"price":1.1}]}"#,
        )
        .await;
        sleep(Duration::from_millis(200)).await;
        request
    });

    let client = test_client(&url);
    client.connect().await.unwrap();
    client
        .wait_until_authenticated(Duration::from_secs(5))
        .await
        .unwrap();

    let batch = client
        .load_history("EURUSD_otc", 60, 3600, Some(1_000_000))
        .await
        .unwrap();
    assert_eq!(batch.asset.as_deref(), Some("EURUSD_otc"));
    assert_eq!(batch.data.len(), 2);
    let points = batch.sorted_points();
    assert!(points[0].time < points[1].time);

    let sent = server.await.unwrap();
    let body: Value = serde_json::from_str(sent.trim_start_matches("42")).unwrap();
    assert_eq!(body[0], "loadHistoryPeriod");
    assert_eq!(body[1]["asset"], "EURUSD_otc");
    assert_eq!(body[1]["time"], 1_000_000);
    client.close().await;
}

#[tokio::test]
async fn test_history_without_end_time_needs_synchronized_clock() {
    let (listener, url) = bind_venue().await;
    let _server = tokio::spawn(async move {
        let mut ws = accept_client(&listener).await;
        perform_handshake(&mut ws).await;
        sleep(Duration::from_secs(2)).await;
    });

    let client = test_client(&url);
    client.connect().await.unwrap();
    client
        .wait_until_authenticated(Duration::from_secs(5))
        .await
        .unwrap();

    // No stream update has arrived, so the server clock is unknown.
    let err = client
        .load_history("EURUSD_otc", 60, 3600, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PocketOptionError::Unsynchronized));
    client.close().await;
}

#[tokio::test]
async fn test_stream_ticks_and_time_sync() {
    let (listener, url) = bind_venue().await;
    let _server = tokio::spawn(async move {
        let mut ws = accept_client(&listener).await;
        perform_handshake(&mut ws).await;
        let subscribe = expect_text(&mut ws).await;
        let body: Value = serde_json::from_str(subscribe.trim_start_matches("42")).unwrap();
        assert_eq!(body[0], "changeSymbol");
        send_text(&mut ws, r#"451-["updateStream"]"#).await;
        send_binary(&mut ws, br#"[["EURUSD_otc",1712345678.5,1.0854]]"#).await;
        sleep(Duration::from_secs(2)).await;
    });

    let client = test_client(&url);
    client.connect().await.unwrap();
    client
        .wait_until_authenticated(Duration::from_secs(5))
        .await
        .unwrap();
    assert!(client.server_time().is_err(), "clock starts unsynchronized");

    let mut ticks = client.subscribe_symbol("EURUSD_otc", 60).await.unwrap();
    let tick = timeout(Duration::from_secs(2), ticks.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tick.asset, "EURUSD_otc");
    assert_eq!(tick.price, 1.0854);

    // The stream frame synchronized the server clock.
    let now = client.server_time().unwrap();
    assert!((now - 1712345678.5).abs() < 2.0);
    assert!(client.server_datetime().is_ok());
    client.close().await;
}

#[tokio::test]
async fn test_payout_table_snapshot() {
    let (listener, url) = bind_venue().await;
    let _server = tokio::spawn(async move {
        let mut ws = accept_client(&listener).await;
        perform_handshake(&mut ws).await;
        send_binary(
            &mut ws,
            br##"[[5,"#AAPL","Apple","stock",2,50],[6,"EURUSD_otc","EUR/USD","currency",1,92]]"##,
        )
        .await;
        sleep(Duration::from_secs(2)).await;
    });

    let client = test_client(&url);
    client.connect().await.unwrap();
    client
        .wait_until_authenticated(Duration::from_secs(5))
        .await
        .unwrap();

    eventually(|| client.payouts().is_some(), "payout table").await;
    assert_eq!(client.payout("EURUSD_otc"), Some(92));
    assert_eq!(client.payout("#AAPL"), Some(50));
    assert_eq!(client.payout("GBPUSD"), None);
    client.close().await;
}

#[tokio::test]
async fn test_heartbeat_emitted_on_interval() {
    let (listener, url) = bind_venue().await;
    let (count_tx, count_rx) = tokio::sync::oneshot::channel();
    let _server = tokio::spawn(async move {
        let mut ws = accept_client(&listener).await;
        perform_handshake(&mut ws).await;
        let mut beats = 0;
        use futures_util::StreamExt;
        use tokio_tungstenite::tungstenite::Message;
        while beats < 3 {
            match ws.next().await {
                Some(Ok(Message::Text(text))) if text.as_str() == HEARTBEAT_FRAME => beats += 1,
                Some(Ok(_)) => {}
                _ => break,
            }
        }
        let _ = count_tx.send(beats);
        sleep(Duration::from_millis(200)).await;
    });

    let mut config = test_config();
    config.heartbeat_interval = Duration::from_millis(150);
    let client = test_client_with(&url, config);
    client.connect().await.unwrap();
    client
        .wait_until_authenticated(Duration::from_secs(5))
        .await
        .unwrap();

    let beats = timeout(Duration::from_secs(3), count_rx)
        .await
        .expect("heartbeats within deadline")
        .unwrap();
    assert_eq!(beats, 3);
    client.close().await;
}

#[tokio::test]
async fn test_reconnects_and_reauthenticates_after_drop() {
    let (listener, url) = bind_venue().await;
    let server = tokio::spawn(async move {
        let mut ws = accept_client(&listener).await;
        perform_handshake(&mut ws).await;
        drop(ws);
        let dropped_at = Instant::now();

        let mut ws = accept_client(&listener).await;
        let auth = perform_handshake(&mut ws).await;
        // Hold the second session so the client observes authentication.
        sleep(Duration::from_millis(300)).await;
        (auth, dropped_at.elapsed())
    });

    let mut config = test_config();
    config.reconnect_delay_floor = Duration::from_millis(100);
    config.reconnect_delay_ceiling = Duration::from_secs(1);
    let client = test_client_with(&url, config);
    client.connect().await.unwrap();
    client
        .wait_until_authenticated(Duration::from_secs(5))
        .await
        .unwrap();

    let (auth, gap) = timeout(Duration::from_secs(5), server)
        .await
        .expect("second session within deadline")
        .unwrap();
    assert_eq!(auth, AUTH_RAW, "reconnect re-sends the auth payload");
    assert!(
        gap >= Duration::from_millis(80),
        "reconnect must wait out the backoff floor, gap was {gap:?}"
    );

    eventually(|| client.is_connected(), "re-authentication").await;
    client.close().await;
}

#[tokio::test]
async fn test_duplicate_request_id_fails_without_network() {
    let (listener, url) = bind_venue().await;
    let _server = tokio::spawn(async move {
        let mut ws = accept_client(&listener).await;
        perform_handshake(&mut ws).await;
        let _first = expect_text(&mut ws).await;
        // Never reply, keep both attempts pending from the venue's view.
        sleep(Duration::from_secs(5)).await;
    });

    let client = Arc::new(test_client(&url));
    client.connect().await.unwrap();
    client
        .wait_until_authenticated(Duration::from_secs(5))
        .await
        .unwrap();

    let first = tokio::spawn({
        let client = client.clone();
        async move {
            let request = pocketoption_adapter::OpenOrderRequest::new(
                "EURUSD_otc",
                Decimal::ONE,
                Direction::Call,
                60,
            )
            .with_request_id("buy");
            client.open_order(request).await
        }
    });
    sleep(Duration::from_millis(100)).await;

    let request = pocketoption_adapter::OpenOrderRequest::new(
        "EURUSD_otc",
        Decimal::ONE,
        Direction::Call,
        60,
    )
    .with_request_id("buy");
    let err = client.open_order(request).await.unwrap_err();
    assert!(matches!(err, PocketOptionError::DuplicateRequestId(key) if key == "buy"));

    first.abort();
    client.close().await;
}
