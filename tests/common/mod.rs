//! shared test handler: records every callback into atomics/Mutex state and
//! wakes waiters via `Notify`, mirroring the `MockHandler` actions in
//! `original_source/test/wss_client_server_connection_test.cpp`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use linear_rs::{Error, ErrorKind, Handler, Message, Socket};

#[derive(Default)]
pub struct RecordingHandler {
    pub connects: AtomicU32,
    pub disconnect_kind: Mutex<Option<ErrorKind>>,
    pub messages: Mutex<Vec<Message>>,
    pub notify: tokio::sync::Notify,
}

impl Handler for RecordingHandler {
    fn on_connect(&self, _socket: Socket) {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn on_disconnect(&self, _socket: Socket, error: Error) {
        *self.disconnect_kind.lock().unwrap() = Some(error.kind);
        self.notify.notify_one();
    }

    fn on_message(&self, _socket: Socket, message: Message) {
        self.messages.lock().unwrap().push(message);
        self.notify.notify_one();
    }
}

impl RecordingHandler {
    pub async fn wait_for_disconnect(&self, timeout: std::time::Duration) -> ErrorKind {
        tokio::time::timeout(timeout, async {
            loop {
                if let Some(kind) = *self.disconnect_kind.lock().unwrap() {
                    return kind;
                }
                self.notify.notified().await;
            }
        })
        .await
        .expect("disconnect callback did not fire before timeout")
    }

    pub async fn wait_for_connect(&self, timeout: std::time::Duration) {
        tokio::time::timeout(timeout, async {
            loop {
                if self.connects.load(Ordering::SeqCst) > 0 {
                    return;
                }
                self.notify.notified().await;
            }
        })
        .await
        .expect("connect callback did not fire before timeout")
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

/// a server-side handler that disconnects itself as soon as it connects —
/// used by the "normal close from server" scenario.
#[derive(Default)]
pub struct DisconnectOnConnectHandler {
    pub recording: RecordingHandler,
}

impl Handler for DisconnectOnConnectHandler {
    fn on_connect(&self, socket: Socket) {
        self.recording.on_connect(socket.clone());
        socket.disconnect().expect("server-side disconnect should succeed right after connect");
    }

    fn on_disconnect(&self, socket: Socket, error: Error) {
        self.recording.on_disconnect(socket, error);
    }
}
