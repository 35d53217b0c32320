use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::logging::Logger;
use crate::queue::SignalQueue;

/// State shared by the dispatcher and every worker for the lifetime of one server run.
#[derive(Debug)]
pub struct ServerContext {
    pub queue: SignalQueue,
    pub logger: Arc<Logger>,
    quit: Arc<AtomicBool>,
}

impl ServerContext {
    pub fn new(queue_capacity: usize, logger: Arc<Logger>) -> Self {
        Self {
            queue: SignalQueue::new(queue_capacity),
            logger,
            quit: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn quit_flag(&self) -> &AtomicBool {
        &self.quit
    }

    /// Shared handle on the quit flag, for signal handlers.
    pub fn quit_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.quit)
    }

    pub fn request_shutdown(&self) {
        self.quit.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }
}
