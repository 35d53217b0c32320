mod worker;

use std::fmt;
use std::io;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};

use crate::server::context::ServerContext;

#[derive(Debug)]
pub enum PoolError {
    Spawn { worker_id: usize, source: io::Error },
    GateClosed { worker_id: usize },
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn { worker_id, source } => {
                write!(f, "failed to spawn worker {worker_id}: {source}")
            }
            Self::GateClosed { worker_id } => {
                write!(f, "worker {worker_id} no longer listens on its gate")
            }
        }
    }
}

impl std::error::Error for PoolError {}

/// What travels through a worker's gate.
#[derive(Debug)]
pub enum GateSignal {
    Assigned(TcpStream),
    Wake,
}

/// One pool member. `connected` is set only by the dispatcher and cleared only by the owning
/// worker; the handle is a clone the dispatcher can force-close during shutdown.
#[derive(Debug)]
pub struct WorkerSlot {
    id: usize,
    connected: AtomicBool,
    handle: Mutex<Option<TcpStream>>,
    assigned_at: Mutex<Option<DateTime<Utc>>>,
    gate: SyncSender<GateSignal>,
}

impl WorkerSlot {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn assigned_at(&self) -> Option<DateTime<Utc>> {
        *self.assigned_at.lock().expect("worker slot lock poisoned")
    }

    /// First half of a hand-off: record the connection before anything is signalled.
    pub fn reserve(&self, handle: TcpStream) {
        *self.handle.lock().expect("worker slot lock poisoned") = Some(handle);
        *self.assigned_at.lock().expect("worker slot lock poisoned") = Some(Utc::now());
        self.connected.store(true, Ordering::SeqCst);
    }

    /// Second half of a hand-off. A worker that is gone drops the stream, closing it.
    pub fn signal_assigned(&self, stream: TcpStream) -> Result<(), PoolError> {
        self.gate
            .send(GateSignal::Assigned(stream))
            .map_err(|_| PoolError::GateClosed { worker_id: self.id })
    }

    pub fn release(&self) {
        self.handle.lock().expect("worker slot lock poisoned").take();
        self.assigned_at.lock().expect("worker slot lock poisoned").take();
        self.connected.store(false, Ordering::SeqCst);
    }

    fn force_close(&self) -> bool {
        match self.handle.lock().expect("worker slot lock poisoned").as_ref() {
            Some(handle) => {
                let _ = handle.shutdown(Shutdown::Both);
                true
            }
            None => false,
        }
    }

    fn wake(&self) {
        // A full gate already holds a signal the worker consumes before checking quit.
        let _ = self.gate.try_send(GateSignal::Wake);
    }
}

/// Fixed-size pool of worker threads, one per slot, created before the first accept.
pub struct WorkerPool {
    slots: Vec<Arc<WorkerSlot>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(size: usize, context: Arc<ServerContext>) -> Result<Self, PoolError> {
        let mut slots = Vec::with_capacity(size);
        let mut handles = Vec::with_capacity(size);

        for id in 0..size {
            let (gate, gate_rx) = mpsc::sync_channel(1);
            let slot = Arc::new(WorkerSlot {
                id,
                connected: AtomicBool::new(false),
                handle: Mutex::new(None),
                assigned_at: Mutex::new(None),
                gate,
            });

            let worker_slot = Arc::clone(&slot);
            let worker_context = Arc::clone(&context);
            let spawned = thread::Builder::new()
                .name(format!("signal-worker-{id}"))
                .spawn(move || worker::run(worker_slot, gate_rx, worker_context));

            match spawned {
                Ok(handle) => {
                    slots.push(slot);
                    handles.push(handle);
                }
                Err(source) => {
                    // Already running workers must not outlive a failed startup.
                    context.request_shutdown();
                    let partial = Self { slots, handles };
                    partial.wake_all();
                    partial.join();
                    return Err(PoolError::Spawn {
                        worker_id: id,
                        source,
                    });
                }
            }
        }

        Ok(Self { slots, handles })
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn busy_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_connected()).count()
    }

    /// Lowest-index slot without a connection.
    pub fn find_idle(&self) -> Option<&Arc<WorkerSlot>> {
        self.slots.iter().find(|slot| !slot.is_connected())
    }

    pub fn close_connected(&self) -> usize {
        self.slots.iter().filter(|slot| slot.force_close()).count()
    }

    pub fn wake_all(&self) {
        for slot in &self.slots {
            slot.wake();
        }
    }

    /// Waits for every worker thread. Returns the number of workers that panicked.
    pub fn join(self) -> usize {
        self.handles
            .into_iter()
            .map(JoinHandle::join)
            .filter(Result::is_err)
            .count()
    }
}
