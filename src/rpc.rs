//! outstanding-request bookkeeping for the RPC layer on top of the message codec.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use rmpv::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{Error, ErrorKind};

/// a request awaiting its matching response.
pub struct OutstandingRequest {
    pub method: String,
    pub deadline: Instant,
    slot: oneshot::Sender<Result<Value, Error>>,
}

/// tracks in-flight requests by id; id allocation, completion and bulk
/// teardown on disconnect.
#[derive(Default)]
pub struct RpcTracker {
    next_id: AtomicU32,
    outstanding: Mutex<HashMap<u32, OutstandingRequest>>,
}

impl RpcTracker {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            outstanding: Mutex::new(HashMap::new()),
        }
    }

    /// allocate the next request id and register a waiter for it.
    pub fn register(
        &self,
        method: impl Into<String>,
        timeout: Duration,
    ) -> (u32, oneshot::Receiver<Result<Value, Error>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let request = OutstandingRequest {
            method: method.into(),
            deadline: Instant::now() + timeout,
            slot: tx,
        };
        self.outstanding.lock().unwrap().insert(id, request);
        (id, rx)
    }

    /// deliver a response to its waiter; a response for an unknown or
    /// already-completed id (e.g. it already timed out) is silently dropped.
    pub fn complete(&self, id: u32, result: Result<Value, Value>) {
        if let Some(request) = self.outstanding.lock().unwrap().remove(&id) {
            let mapped = result.map_err(|_| Error::new(ErrorKind::Invalid));
            let _ = request.slot.send(mapped);
        }
    }

    /// drop a waiter without completing it (used once its deadline passed).
    pub fn forget(&self, id: u32) {
        self.outstanding.lock().unwrap().remove(&id);
    }

    /// fail every outstanding request with `error`; called on disconnect so
    /// no caller blocks forever on a socket that will never answer again.
    pub fn drain_with(&self, error: Error) {
        let mut map = self.outstanding.lock().unwrap();
        for (_, request) in map.drain() {
            let _ = request.slot.send(Err(error));
        }
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_delivers_the_result_to_the_registered_waiter() {
        let tracker = RpcTracker::new();
        let (id, rx) = tracker.register("echo", Duration::from_secs(5));
        tracker.complete(id, Ok(Value::from("pong")));
        assert_eq!(rx.await.unwrap().unwrap(), Value::from("pong"));
    }

    #[tokio::test]
    async fn complete_for_unknown_id_is_a_no_op() {
        let tracker = RpcTracker::new();
        tracker.complete(999, Ok(Value::Nil));
        assert_eq!(tracker.outstanding_count(), 0);
    }

    #[tokio::test]
    async fn drain_with_fails_every_outstanding_waiter() {
        let tracker = RpcTracker::new();
        let (_, rx1) = tracker.register("a", Duration::from_secs(5));
        let (_, rx2) = tracker.register("b", Duration::from_secs(5));
        tracker.drain_with(Error::new(ErrorKind::ConnReset));
        assert_eq!(rx1.await.unwrap().unwrap_err().kind, ErrorKind::ConnReset);
        assert_eq!(rx2.await.unwrap().unwrap_err().kind, ErrorKind::ConnReset);
        assert_eq!(tracker.outstanding_count(), 0);
    }

    #[tokio::test]
    async fn ids_are_allocated_monotonically() {
        let tracker = RpcTracker::new();
        let (id1, _) = tracker.register("a", Duration::from_secs(1));
        let (id2, _) = tracker.register("b", Duration::from_secs(1));
        assert!(id2 > id1);
    }
}
