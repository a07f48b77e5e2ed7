//! scenario 5: digest auth + reconnect. Server requires Digest auth; the
//! client supplies matching credentials, observes a successful handshake,
//! then tears down the connection from inside its own `on_connect`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::RecordingHandler;
use linear_rs::auth::{AuthContext, AuthorizationContext};
use linear_rs::handshake::WsRequestContext;
use linear_rs::socket::SocketKind;
use linear_rs::{Client, Error, ErrorKind, Handler, Server, Socket};

struct SelfDisconnectHandler {
    recording: RecordingHandler,
}

impl Handler for SelfDisconnectHandler {
    fn on_connect(&self, socket: Socket) {
        self.recording.on_connect(socket.clone());
        socket.disconnect().expect("client-initiated disconnect should succeed");
    }

    fn on_disconnect(&self, socket: Socket, error: Error) {
        self.recording.on_disconnect(socket, error);
    }
}

#[tokio::test]
async fn digest_auth_succeeds_and_client_initiated_disconnect_reports_ok() {
    let server_handler = Arc::new(RecordingHandler::default());
    let auth = AuthContext::Digest {
        realm: "realm is here".into(),
        nonce: "a-fixed-test-nonce".into(),
    };
    let credentials = AuthorizationContext {
        username: "user".into(),
        password: "password".into(),
    };
    let server = Arc::new(Server::new(server_handler, SocketKind::Ws).with_auth(auth, credentials.clone()));
    let addr = server.clone().start("127.0.0.1", 0).await.unwrap();

    let client_handler = Arc::new(SelfDisconnectHandler {
        recording: RecordingHandler::default(),
    });
    let client = Client::new(client_handler.clone());
    let ws_request = WsRequestContext {
        path: "/ws".into(),
        credentials: Some(credentials),
        ..Default::default()
    };
    let socket = client.create_ws_socket(SocketKind::Ws, ws_request);
    socket.connect(&addr.ip().to_string(), addr.port()).unwrap();

    let kind = client_handler
        .recording
        .wait_for_disconnect(Duration::from_secs(2))
        .await;

    // a successful handshake is the only path to `on_connect` firing at all;
    // wrong credentials would have failed `connect()` with `EWS` instead.
    assert_eq!(client_handler.recording.connect_count(), 1);
    assert_eq!(kind, ErrorKind::Ok);
}

#[tokio::test]
async fn digest_auth_rejects_wrong_credentials() {
    let server_handler = Arc::new(RecordingHandler::default());
    let auth = AuthContext::Digest {
        realm: "realm is here".into(),
        nonce: "a-fixed-test-nonce".into(),
    };
    let credentials = AuthorizationContext {
        username: "user".into(),
        password: "password".into(),
    };
    let server = Arc::new(Server::new(server_handler, SocketKind::Ws).with_auth(auth, credentials));
    let addr = server.clone().start("127.0.0.1", 0).await.unwrap();

    let client_handler = Arc::new(RecordingHandler::default());
    let client = Client::new(client_handler.clone());
    let ws_request = WsRequestContext {
        path: "/ws".into(),
        credentials: Some(AuthorizationContext {
            username: "user".into(),
            password: "wrong-password".into(),
        }),
        ..Default::default()
    };
    let socket = client.create_ws_socket(SocketKind::Ws, ws_request);
    socket.connect(&addr.ip().to_string(), addr.port()).unwrap();

    let kind = client_handler
        .wait_for_disconnect(Duration::from_secs(2))
        .await;

    assert_eq!(client_handler.connect_count(), 0);
    assert_eq!(kind, ErrorKind::Ws);
}
