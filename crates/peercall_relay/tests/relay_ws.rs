/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use futures_util::{SinkExt, StreamExt};
use peercall_relay::{serve_with_shutdown, AppState, RelayConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_relay(cfg: RelayConfig) -> (SocketAddr, AppState) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState::new(cfg);
    tokio::spawn(serve_with_shutdown(
        listener,
        state.clone(),
        std::future::pending::<()>(),
    ));
    (addr, state)
}

async fn join(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    ws
}

async fn wait_channels(state: &AppState, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while state.hub.len().await != n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("channels registered");
}

async fn next_text(ws: &mut Client) -> Option<String> {
    let fut = async {
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(t) = msg {
                return Some(t);
            }
        }
        None
    };
    tokio::time::timeout(Duration::from_millis(500), fut)
        .await
        .ok()
        .flatten()
}

#[tokio::test]
async fn three_participants_all_receive_offer() {
    let (addr, state) = start_relay(RelayConfig::default()).await;
    let mut a = join(addr).await;
    let mut b = join(addr).await;
    let mut c = join(addr).await;
    wait_channels(&state, 3).await;

    let offer = r#"{"type":"offer","session_id":"s1","from":"alice","sdp":"v=0"}"#;
    a.send(Message::Text(offer.to_string())).await.unwrap();

    assert_eq!(next_text(&mut b).await.as_deref(), Some(offer));
    assert_eq!(next_text(&mut c).await.as_deref(), Some(offer));
    assert_eq!(next_text(&mut a).await, None);
}

#[tokio::test]
async fn answer_flows_back_and_order_is_kept() {
    let (addr, state) = start_relay(RelayConfig::default()).await;
    let mut a = join(addr).await;
    let mut b = join(addr).await;
    wait_channels(&state, 2).await;

    let mut sent = Vec::new();
    for i in 0..10 {
        let c = format!(
            r#"{{"type":"candidate","session_id":"s1","from":"bob","candidate":{{"candidate":"candidate:{i}"}}}}"#
        );
        b.send(Message::Text(c.clone())).await.unwrap();
        sent.push(c);
    }
    let answer = r#"{"type":"answer","session_id":"s1","from":"bob","sdp":"v=0"}"#.to_string();
    b.send(Message::Text(answer.clone())).await.unwrap();
    sent.push(answer);

    let mut got = Vec::new();
    for _ in 0..sent.len() {
        got.push(next_text(&mut a).await.expect("frame"));
    }
    assert_eq!(got, sent);
}

#[tokio::test]
async fn drops_unknown_kinds() {
    let (addr, state) = start_relay(RelayConfig::default()).await;
    let mut a = join(addr).await;
    let mut b = join(addr).await;
    wait_channels(&state, 2).await;

    a.send(Message::Text(r#"{"type":"chat","text":"hi"}"#.into())).await.unwrap();
    a.send(Message::Text("garbage".into())).await.unwrap();
    assert_eq!(next_text(&mut b).await, None);
}

#[tokio::test]
async fn survives_disconnect_between_frames() {
    let (addr, state) = start_relay(RelayConfig::default()).await;
    let mut a = join(addr).await;
    let b = join(addr).await;
    let mut c = join(addr).await;
    wait_channels(&state, 3).await;

    drop(b);
    let offer = r#"{"type":"offer","session_id":"s1","from":"alice","sdp":"v=0"}"#;
    a.send(Message::Text(offer.to_string())).await.unwrap();
    assert_eq!(next_text(&mut c).await.as_deref(), Some(offer));

    wait_channels(&state, 2).await;
    a.send(Message::Text(offer.to_string())).await.unwrap();
    assert_eq!(next_text(&mut c).await.as_deref(), Some(offer));
}

#[tokio::test]
async fn notifies_peers_on_disconnect_when_enabled() {
    let cfg = RelayConfig {
        peer_disconnect_notify: true,
        ..RelayConfig::default()
    };
    let (addr, state) = start_relay(cfg).await;
    let mut a = join(addr).await;
    let mut b = join(addr).await;
    wait_channels(&state, 2).await;

    let offer = r#"{"type":"offer","session_id":"s1","from":"alice","sdp":"v=0"}"#;
    a.send(Message::Text(offer.to_string())).await.unwrap();
    assert_eq!(next_text(&mut b).await.as_deref(), Some(offer));

    a.close(None).await.unwrap();
    let bye = next_text(&mut b).await.expect("bye");
    let v: serde_json::Value = serde_json::from_str(&bye).unwrap();
    assert_eq!(v["type"], "bye");
    assert_eq!(v["from"], "alice");
}

#[tokio::test]
async fn oversized_frame_is_dropped_and_channel_survives() {
    let cfg = RelayConfig {
        max_message_bytes: 1024,
        ..RelayConfig::default()
    };
    let (addr, state) = start_relay(cfg).await;
    let mut a = join(addr).await;
    let mut b = join(addr).await;
    wait_channels(&state, 2).await;

    let big = format!(
        r#"{{"type":"offer","session_id":"s1","from":"alice","sdp":"{}"}}"#,
        "x".repeat(2048)
    );
    a.send(Message::Text(big)).await.unwrap();
    let offer = r#"{"type":"offer","session_id":"s1","from":"alice","sdp":"v=0"}"#;
    a.send(Message::Text(offer.to_string())).await.unwrap();

    assert_eq!(next_text(&mut b).await.as_deref(), Some(offer));
    assert_eq!(state.hub.len().await, 2);
}
