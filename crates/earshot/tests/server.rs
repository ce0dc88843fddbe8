//! Integration tests for the voice server: signaling handler, native
//! listener, and audio crossing between the two.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use earshot::prelude::*;
use earshot_protocol::{NativeCodec, NativePacket, SessionGrant};
use futures_util::{SinkExt, StreamExt};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const WAIT: Duration = Duration::from_secs(2);

struct TestServer {
    core: Arc<VoiceCore>,
    voice_addr: SocketAddr,
    signaling_addr: SocketAddr,
    shutdown: Arc<watch::Sender<bool>>,
    handle: tokio::task::JoinHandle<Result<(), EarshotError>>,
}

fn test_config() -> VoiceConfig {
    VoiceConfig {
        bind_host: "127.0.0.1".into(),
        voice_port: 0,
        signaling_port: 0,
        ..VoiceConfig::default()
    }
}

/// Starts a server on random ports.
async fn start_server(config: VoiceConfig) -> TestServer {
    let server = VoiceServerBuilder::new()
        .config(config)
        .build(OpenAuthenticator)
        .await
        .expect("server should build");

    let core = server.core();
    let voice_addr = server.voice_addr().expect("voice addr");
    let signaling_addr = server.signaling_addr().expect("signaling addr");
    let shutdown = server.shutdown_handle();
    let handle = tokio::spawn(server.run());

    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(10)).await;
    TestServer {
        core,
        voice_addr,
        signaling_addr,
        shutdown,
        handle,
    }
}

async fn connect(addr: SocketAddr) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("should connect");
    ws
}

async fn send_signal(ws: &mut ClientWs, msg: &SignalMessage) {
    let text = serde_json::to_string(msg).expect("encode");
    ws.send(Message::Text(text.into())).await.expect("send");
}

/// Next text frame as a signaling message. Binary frames are skipped.
async fn recv_signal(ws: &mut ClientWs) -> SignalMessage {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("signal within timeout")
            .expect("stream open")
            .expect("frame ok");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("decode");
        }
    }
}

/// Next binary frame. Text frames are skipped.
async fn recv_binary(ws: &mut ClientWs) -> Vec<u8> {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("audio within timeout")
            .expect("stream open")
            .expect("frame ok");
        if let Message::Binary(data) = msg {
            return data.to_vec();
        }
    }
}

async fn authenticate(ws: &mut ClientWs, username: &str) -> SessionGrant {
    send_signal(
        ws,
        &SignalMessage::Authenticate {
            username: username.into(),
            auth_code: String::new(),
        },
    )
    .await;
    match recv_signal(ws).await {
        SignalMessage::AuthSuccess(grant) => grant,
        other => panic!("expected AuthSuccess, got {other:?}"),
    }
}

fn error_code_of(msg: &SignalMessage) -> &str {
    match msg {
        SignalMessage::Error { code, .. } => code,
        other => panic!("expected Error, got {other:?}"),
    }
}

/// A native client socket with a helper codec.
struct NativePeer {
    socket: UdpSocket,
    codec: NativeCodec,
    id: SessionId,
}

impl NativePeer {
    async fn new(server: SocketAddr) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        socket.connect(server).await.expect("connect");
        Self {
            socket,
            codec: NativeCodec::default(),
            id: SessionId::random(),
        }
    }

    async fn send(&self, packet: &NativePacket) {
        let bytes = self.codec.encode(packet).expect("encode");
        self.socket.send(&bytes).await.expect("send");
    }

    async fn recv(&self) -> NativePacket {
        let mut buf = vec![0u8; 65_536];
        let n = tokio::time::timeout(WAIT, self.socket.recv(&mut buf))
            .await
            .expect("datagram within timeout")
            .expect("recv");
        self.codec.decode(&buf[..n]).expect("decode")
    }

    /// Sends Authenticate and returns `(accepted, message)`.
    async fn handshake(&self, username: &str) -> (bool, String) {
        self.send(&NativePacket::Authenticate {
            session_id: self.id,
            username: username.into(),
        })
        .await;
        match self.recv().await {
            NativePacket::AuthenticateAck {
                session_id,
                accepted,
                message,
            } => {
                assert_eq!(session_id, self.id);
                (accepted, message)
            }
            other => panic!("expected AuthenticateAck, got {other:?}"),
        }
    }
}

// =========================================================================
// Browser signaling
// =========================================================================

#[tokio::test]
async fn test_browser_authenticate_returns_grant() {
    let server = start_server(test_config()).await;
    let mut ws = connect(server.signaling_addr).await;

    let grant = authenticate(&mut ws, "alice").await;

    assert!(!grant.resume_token.is_empty());
    assert_eq!(grant.resume_window_ms, 30_000);
    assert_eq!(grant.heartbeat_interval_ms, 5_000);
    assert!(server.core.is_session_connected(grant.session_id));
}

#[tokio::test]
async fn test_browser_auth_failure_keeps_connection_open() {
    let server = start_server(test_config()).await;
    let mut ws = connect(server.signaling_addr).await;

    send_signal(
        &mut ws,
        &SignalMessage::Authenticate {
            username: "   ".into(),
            auth_code: String::new(),
        },
    )
    .await;
    let reply = recv_signal(&mut ws).await;
    assert_eq!(error_code_of(&reply), "auth_failed");

    // Same connection, second try.
    let grant = authenticate(&mut ws, "bob").await;
    assert!(server.core.is_session_connected(grant.session_id));
}

#[tokio::test]
async fn test_browser_second_authenticate_is_rejected() {
    let server = start_server(test_config()).await;
    let mut ws = connect(server.signaling_addr).await;
    authenticate(&mut ws, "alice").await;

    send_signal(
        &mut ws,
        &SignalMessage::Authenticate {
            username: "alice".into(),
            auth_code: String::new(),
        },
    )
    .await;

    assert_eq!(error_code_of(&recv_signal(&mut ws).await), "already_authenticated");
}

#[tokio::test]
async fn test_browser_message_before_auth_is_not_authenticated() {
    let server = start_server(test_config()).await;
    let mut ws = connect(server.signaling_addr).await;

    send_signal(&mut ws, &SignalMessage::ListGroups).await;

    assert_eq!(error_code_of(&recv_signal(&mut ws).await), "not_authenticated");
}

#[tokio::test]
async fn test_browser_garbage_text_is_invalid_message() {
    let server = start_server(test_config()).await;
    let mut ws = connect(server.signaling_addr).await;

    ws.send(Message::Text("{not json".into())).await.expect("send");

    assert_eq!(error_code_of(&recv_signal(&mut ws).await), "invalid_message");
}

#[tokio::test]
async fn test_browser_heartbeat_echoes_timestamp() {
    let server = start_server(test_config()).await;
    let mut ws = connect(server.signaling_addr).await;
    authenticate(&mut ws, "alice").await;

    send_signal(&mut ws, &SignalMessage::Heartbeat { timestamp: 1234 }).await;

    assert_eq!(
        recv_signal(&mut ws).await,
        SignalMessage::HeartbeatAck { timestamp: 1234 }
    );
}

#[tokio::test]
async fn test_browser_resume_after_drop_keeps_session() {
    let server = start_server(test_config()).await;
    let mut ws = connect(server.signaling_addr).await;
    let grant = authenticate(&mut ws, "alice").await;
    server.core.on_player_join(grant.session_id, "alice", 1.0, 2.0, 3.0, "overworld");

    ws.close(None).await.expect("close");
    drop(ws);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!server.core.is_session_connected(grant.session_id));

    let mut ws = connect(server.signaling_addr).await;
    send_signal(
        &mut ws,
        &SignalMessage::Resume {
            session_id: grant.session_id,
            resume_token: grant.resume_token.clone(),
        },
    )
    .await;

    match recv_signal(&mut ws).await {
        SignalMessage::Resumed(resumed) => {
            assert_eq!(resumed.session_id, grant.session_id);
            assert_ne!(resumed.resume_token, grant.resume_token);
        }
        other => panic!("expected Resumed, got {other:?}"),
    }
    assert!(server.core.is_session_connected(grant.session_id));
    assert!(server.core.positions().get(grant.session_id).is_some());
}

#[tokio::test]
async fn test_browser_resume_with_bad_token_fails_then_authenticates() {
    let server = start_server(test_config()).await;
    let mut ws = connect(server.signaling_addr).await;
    let grant = authenticate(&mut ws, "alice").await;
    drop(ws);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut ws = connect(server.signaling_addr).await;
    send_signal(
        &mut ws,
        &SignalMessage::Resume {
            session_id: grant.session_id,
            resume_token: "0000".into(),
        },
    )
    .await;
    assert_eq!(error_code_of(&recv_signal(&mut ws).await), "resume_failed");

    // The connection stays usable for a full authenticate.
    let fresh = authenticate(&mut ws, "alice").await;
    assert_ne!(fresh.session_id, grant.session_id);
}

#[tokio::test]
async fn test_browser_resume_after_window_fails() {
    let config = VoiceConfig {
        resume_window_ms: 200,
        ..test_config()
    };
    let server = start_server(config).await;
    let mut ws = connect(server.signaling_addr).await;
    let grant = authenticate(&mut ws, "alice").await;
    drop(ws);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let mut ws = connect(server.signaling_addr).await;
    send_signal(
        &mut ws,
        &SignalMessage::Resume {
            session_id: grant.session_id,
            resume_token: grant.resume_token,
        },
    )
    .await;

    assert_eq!(error_code_of(&recv_signal(&mut ws).await), "resume_failed");
    assert!(server.core.sessions().get(grant.session_id).is_none());
}

#[tokio::test]
async fn test_browser_reply_queued_before_disconnect_is_flushed() {
    let server = start_server(test_config()).await;
    let mut ws = connect(server.signaling_addr).await;
    authenticate(&mut ws, "alice").await;

    send_signal(&mut ws, &SignalMessage::Heartbeat { timestamp: 99 }).await;
    send_signal(&mut ws, &SignalMessage::Disconnect).await;

    assert_eq!(recv_signal(&mut ws).await, SignalMessage::HeartbeatAck { timestamp: 99 });
    let rest = tokio::time::timeout(WAIT, ws.next()).await.expect("closes within timeout");
    assert!(matches!(rest, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
}

#[tokio::test]
async fn test_browser_disconnect_tears_down_without_resume() {
    let server = start_server(test_config()).await;
    let mut ws = connect(server.signaling_addr).await;
    let grant = authenticate(&mut ws, "alice").await;

    send_signal(&mut ws, &SignalMessage::Disconnect).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(server.core.sessions().get(grant.session_id).is_none());
    assert!(server.core.resume().get(grant.session_id).is_none());
}

// =========================================================================
// Groups over signaling
// =========================================================================

#[tokio::test]
async fn test_groups_create_join_and_member_updates() {
    let server = start_server(test_config()).await;
    let mut alice = connect(server.signaling_addr).await;
    let mut bob = connect(server.signaling_addr).await;
    let a = authenticate(&mut alice, "alice").await.session_id;
    let b = authenticate(&mut bob, "bob").await.session_id;

    send_signal(
        &mut alice,
        &SignalMessage::CreateGroup {
            name: "Squad".into(),
            is_permanent: false,
        },
    )
    .await;
    let group = match recv_signal(&mut alice).await {
        SignalMessage::GroupCreated(info) => {
            assert_eq!(info.members, vec![a]);
            info.group_id
        }
        other => panic!("expected GroupCreated, got {other:?}"),
    };

    send_signal(&mut bob, &SignalMessage::JoinGroup { group_id: group }).await;
    match recv_signal(&mut bob).await {
        SignalMessage::GroupJoined(info) => assert_eq!(info.members, vec![a, b]),
        other => panic!("expected GroupJoined, got {other:?}"),
    }
    assert_eq!(
        recv_signal(&mut alice).await,
        SignalMessage::GroupMembersUpdated {
            group_id: group,
            members: vec![a, b],
        }
    );

    send_signal(&mut bob, &SignalMessage::LeaveGroup).await;
    assert_eq!(
        recv_signal(&mut bob).await,
        SignalMessage::GroupLeft {
            group_id: group,
            disbanded: false,
        }
    );
    assert_eq!(
        recv_signal(&mut alice).await,
        SignalMessage::GroupMembersUpdated {
            group_id: group,
            members: vec![a],
        }
    );
}

#[tokio::test]
async fn test_groups_invalid_name_is_group_error() {
    let server = start_server(test_config()).await;
    let mut ws = connect(server.signaling_addr).await;
    authenticate(&mut ws, "alice").await;

    send_signal(
        &mut ws,
        &SignalMessage::CreateGroup {
            name: "no!".into(),
            is_permanent: false,
        },
    )
    .await;

    assert_eq!(error_code_of(&recv_signal(&mut ws).await), "group_error");
}

// =========================================================================
// Native handshake
// =========================================================================

#[tokio::test]
async fn test_native_handshake_accepted() {
    let server = start_server(test_config()).await;
    let peer = NativePeer::new(server.voice_addr).await;

    let (accepted, message) = peer.handshake("Steve").await;

    assert!(accepted);
    assert_eq!(message, "welcome, Steve");
    assert!(server.core.is_session_connected(peer.id));
}

#[tokio::test]
async fn test_native_handshake_empty_username_rejected() {
    let server = start_server(test_config()).await;
    let peer = NativePeer::new(server.voice_addr).await;

    let (accepted, message) = peer.handshake("").await;

    assert!(!accepted);
    assert_eq!(message, "username must not be empty");
    assert!(server.core.sessions().get(peer.id).is_none());
}

#[tokio::test]
async fn test_native_handshake_repeat_from_same_address_reacks() {
    let server = start_server(test_config()).await;
    let peer = NativePeer::new(server.voice_addr).await;

    assert!(peer.handshake("Steve").await.0);
    assert!(peer.handshake("Steve").await.0);
    assert_eq!(server.core.sessions().len(), 1);
}

#[tokio::test]
async fn test_native_handshake_identity_active_elsewhere_rejected() {
    let server = start_server(test_config()).await;
    let first = NativePeer::new(server.voice_addr).await;
    let mut second = NativePeer::new(server.voice_addr).await;
    second.id = first.id;

    assert!(first.handshake("Steve").await.0);
    let (accepted, message) = second.handshake("Steve").await;

    assert!(!accepted);
    assert_eq!(message, "session already active");
}

// =========================================================================
// Audio across transports
// =========================================================================

#[tokio::test]
async fn test_native_audio_reaches_browser_in_range() {
    let server = start_server(test_config()).await;
    let native = NativePeer::new(server.voice_addr).await;
    assert!(native.handshake("Steve").await.0);
    let mut ws = connect(server.signaling_addr).await;
    let web = authenticate(&mut ws, "alice").await.session_id;
    server.core.on_player_join(native.id, "Steve", 0.0, 64.0, 0.0, "overworld");
    server.core.on_player_join(web, "alice", 10.0, 64.0, 10.0, "overworld");

    native
        .send(&NativePacket::Audio {
            session_id: native.id,
            sequence: 1,
            payload: vec![1, 2, 3],
        })
        .await;

    assert_eq!(recv_binary(&mut ws).await, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_silent_native_listener_with_keepalive_survives_idle_sweep() {
    let config = VoiceConfig {
        native_idle_timeout_ms: 400,
        ..test_config()
    };
    let server = start_server(config).await;
    let listener = NativePeer::new(server.voice_addr).await;
    assert!(listener.handshake("Steve").await.0);
    let idle = NativePeer::new(server.voice_addr).await;
    assert!(idle.handshake("Alex").await.0);
    server.core.on_player_join(listener.id, "Steve", 0.0, 64.0, 0.0, "overworld");
    server.core.on_player_join(idle.id, "Alex", 5.0, 64.0, 0.0, "overworld");

    // Long enough for the once-a-second sweep to run; only the listener
    // keeps repeating its handshake.
    for _ in 0..8 {
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(listener.handshake("Steve").await.0);
    }
    assert!(server.core.is_session_connected(listener.id));
    assert!(server.core.positions().get(listener.id).is_some());
    assert!(!server.core.is_session_connected(idle.id));

    let mut ws = connect(server.signaling_addr).await;
    let web = authenticate(&mut ws, "alice").await.session_id;
    server.core.on_player_join(web, "alice", 10.0, 64.0, 10.0, "overworld");
    ws.send(Message::Binary(vec![7, 7].into())).await.expect("send");

    match listener.recv().await {
        NativePacket::Audio {
            session_id, payload, ..
        } => {
            assert_eq!(session_id, web);
            assert_eq!(payload, vec![7, 7]);
        }
        other => panic!("expected Audio, got {other:?}"),
    }
}

#[tokio::test]
async fn test_browser_audio_reaches_native_under_browser_identity() {
    let server = start_server(test_config()).await;
    let native = NativePeer::new(server.voice_addr).await;
    assert!(native.handshake("Steve").await.0);
    let mut ws = connect(server.signaling_addr).await;
    let web = authenticate(&mut ws, "alice").await.session_id;
    server.core.on_player_join(native.id, "Steve", 0.0, 64.0, 0.0, "overworld");
    server.core.on_player_join(web, "alice", 3.0, 64.0, 4.0, "overworld");

    ws.send(Message::Binary(vec![9, 9].into())).await.expect("send");

    match native.recv().await {
        NativePacket::Audio {
            session_id, payload, ..
        } => {
            assert_eq!(session_id, web);
            assert_eq!(payload, vec![9, 9]);
        }
        other => panic!("expected Audio, got {other:?}"),
    }
}

#[tokio::test]
async fn test_browser_json_audio_is_routed() {
    let server = start_server(test_config()).await;
    let mut alice = connect(server.signaling_addr).await;
    let mut bob = connect(server.signaling_addr).await;
    let a = authenticate(&mut alice, "alice").await.session_id;
    let b = authenticate(&mut bob, "bob").await.session_id;
    server.core.on_player_join(a, "alice", 0.0, 0.0, 0.0, "overworld");
    server.core.on_player_join(b, "bob", 0.0, 0.0, 30.0, "overworld");

    send_signal(
        &mut alice,
        &SignalMessage::Audio {
            audio_data: vec![7, 7, 7],
        },
    )
    .await;

    assert_eq!(recv_binary(&mut bob).await, vec![7, 7, 7]);
}

#[tokio::test]
async fn test_audio_out_of_range_is_not_delivered() {
    let server = start_server(test_config()).await;
    let native = NativePeer::new(server.voice_addr).await;
    assert!(native.handshake("Steve").await.0);
    let mut ws = connect(server.signaling_addr).await;
    let web = authenticate(&mut ws, "alice").await.session_id;
    server.core.on_player_join(native.id, "Steve", 0.0, 64.0, 0.0, "overworld");
    server.core.on_player_join(web, "alice", 200.0, 64.0, 0.0, "overworld");

    native
        .send(&NativePacket::Audio {
            session_id: native.id,
            sequence: 1,
            payload: vec![1],
        })
        .await;

    let deadline = tokio::time::Instant::now() + WAIT;
    while server.core.router_stats().processed == 0 {
        assert!(tokio::time::Instant::now() < deadline, "frame never processed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.core.router_stats().forwarded, 0);
}

#[tokio::test]
async fn test_native_audio_from_spoofed_address_is_dropped() {
    let server = start_server(test_config()).await;
    let victim = NativePeer::new(server.voice_addr).await;
    assert!(victim.handshake("Steve").await.0);
    server.core.on_player_join(victim.id, "Steve", 0.0, 0.0, 0.0, "overworld");

    let attacker = NativePeer::new(server.voice_addr).await;
    attacker
        .send(&NativePacket::Audio {
            session_id: victim.id,
            sequence: 1,
            payload: vec![6, 6, 6],
        })
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(server.core.router_stats().accepted, 0);
}

// =========================================================================
// Shutdown
// =========================================================================

#[tokio::test]
async fn test_shutdown_stops_run_and_clears_registries() {
    let server = start_server(test_config()).await;
    let mut ws = connect(server.signaling_addr).await;
    authenticate(&mut ws, "alice").await;

    server.shutdown.send_replace(true);
    let result = tokio::time::timeout(WAIT, server.handle)
        .await
        .expect("run returns")
        .expect("task not panicked");

    assert!(result.is_ok());
    assert!(server.core.sessions().is_empty());
}
