//! one dedicated OS thread running a single-threaded Tokio runtime.
//!
//! `tokio::runtime::Handle::spawn` is already a thread-safe, ordered command
//! queue: any thread holding a `Handle` can enqueue work onto the reactor
//! without a hand-rolled channel. A [`Reactor`] just owns the thread and the
//! runtime that backs that handle, plus a registry of the live sockets it is
//! currently driving so `shutdown()` can tear them down in one pass.

use std::sync::{Mutex, OnceLock, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::runtime::Handle;

/// anything the reactor can forcibly tear down on `shutdown()`. `SocketCore`
/// is the only implementor; the trait exists so this module doesn't need to
/// know about sockets directly.
pub trait Cancelable: Send + Sync {
    /// abort the connection immediately, delivering `onDisconnect(ECANCELED)`
    /// to a still-live socket. A no-op once the socket is already
    /// `Disconnected`.
    fn cancel(&self);
}

/// a background Tokio current-thread runtime plus the OS thread driving it.
pub struct Reactor {
    handle: Handle,
    join: Mutex<Option<JoinHandle<()>>>,
    shutdown: Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
    live: Mutex<Vec<Weak<dyn Cancelable + Send + Sync>>>,
}

impl Reactor {
    /// spawn a fresh reactor thread.
    pub fn new() -> Self {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let join = std::thread::Builder::new()
            .name("linear-reactor".into())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to build reactor runtime");
                let handle = runtime.handle().clone();
                ready_tx.send(handle).expect("reactor creator dropped");
                runtime.block_on(async move {
                    let _ = shutdown_rx.await;
                });
            })
            .expect("failed to spawn reactor thread");
        let handle = ready_rx.recv().expect("reactor thread panicked before ready");
        Self {
            handle,
            join: Mutex::new(Some(join)),
            shutdown: Mutex::new(Some(shutdown_tx)),
            live: Mutex::new(Vec::new()),
        }
    }

    /// the process-wide default reactor, lazily started on first use.
    pub fn shared() -> &'static Reactor {
        static SHARED: OnceLock<Reactor> = OnceLock::new();
        SHARED.get_or_init(Reactor::new)
    }

    /// a cheap, cloneable handle; use this to enqueue work from any thread.
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// track a socket so `shutdown()` can cancel it if it's still live when
    /// the reactor goes down. Called once per socket handle, at construction.
    pub fn register_live(&self, socket: Weak<dyn Cancelable + Send + Sync>) {
        self.live.lock().unwrap().push(socket);
    }

    /// drain pending timers and live sockets with `ECANCELED`, then stop the
    /// runtime and join the thread. Per `spec.md` §4.2. Idempotent: a second
    /// call finds nothing left to cancel and nothing left to join.
    pub fn shutdown(&self) {
        let live: Vec<_> = std::mem::take(&mut *self.live.lock().unwrap());
        for socket in live.iter().filter_map(Weak::upgrade) {
            socket.cancel();
        }

        // the cancellations above are just channel sends / oneshot fires;
        // give the runtime a beat to actually run the resulting disconnect
        // paths (and their onDisconnect callbacks) before the thread stops.
        if !live.is_empty() {
            let (done_tx, done_rx) = std::sync::mpsc::channel();
            self.handle.spawn(async move {
                tokio::task::yield_now().await;
                let _ = done_tx.send(());
            });
            let _ = done_rx.recv_timeout(Duration::from_millis(200));
        }

        if let Some(tx) = self.shutdown.lock().unwrap().take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.lock().unwrap().take() {
            let _ = join.join();
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn spawned_work_runs_on_the_reactor_thread() {
        let reactor = Reactor::new();
        let this_thread = std::thread::current().id();
        let (tx, rx) = std::sync::mpsc::channel();
        reactor.handle().spawn(async move {
            tx.send(std::thread::current().id()).unwrap();
        });
        let reactor_thread = rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
        assert_ne!(this_thread, reactor_thread);
    }

    #[test]
    fn shared_reactor_is_a_single_instance() {
        let a = Reactor::shared().handle();
        let b = Reactor::shared().handle();
        // two handles to the same runtime can both spawn and observe each other
        let (tx, rx) = std::sync::mpsc::channel();
        let tx2 = tx.clone();
        a.spawn(async move { tx.send(1).unwrap() });
        b.spawn(async move { tx2.send(2).unwrap() });
        let mut seen: Vec<i32> = (0..2).map(|_| rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap()).collect();
        seen.sort();
        assert_eq!(seen, vec![1, 2]);
    }

    struct Flag(std::sync::atomic::AtomicBool);

    impl Cancelable for Flag {
        fn cancel(&self) {
            self.0.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn shutdown_cancels_registered_live_sockets_then_joins() {
        let reactor = Reactor::new();
        let flag = Arc::new(Flag(std::sync::atomic::AtomicBool::new(false)));
        let weak: Weak<dyn Cancelable + Send + Sync> = Arc::downgrade(&flag);
        reactor.register_live(weak);

        reactor.shutdown();

        assert!(flag.0.load(std::sync::atomic::Ordering::SeqCst));
        assert!(reactor.join.lock().unwrap().is_none());
    }

    #[test]
    fn shutdown_ignores_a_registration_whose_socket_already_dropped() {
        let reactor = Reactor::new();
        {
            let flag = Arc::new(Flag(std::sync::atomic::AtomicBool::new(false)));
            let weak: Weak<dyn Cancelable + Send + Sync> = Arc::downgrade(&flag);
            reactor.register_live(weak);
        }
        // dropped; shutdown must not panic trying to upgrade a dead Weak.
        reactor.shutdown();
    }
}
