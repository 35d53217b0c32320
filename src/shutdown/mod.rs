use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[cfg(unix)]
use signal_hook::consts::signal::{SIGINT, SIGTERM};
#[cfg(unix)]
use signal_hook::flag;
#[cfg(unix)]
use signal_hook::low_level::unregister;
#[cfg(unix)]
use signal_hook::SigId;

/// SIGINT/SIGTERM raise the server's quit flag, the same flag a shutdown frame raises.
pub struct ShutdownHooks {
    #[cfg(unix)]
    sig_ids: Vec<SigId>,
}

impl ShutdownHooks {
    pub fn install(quit: Arc<AtomicBool>) -> io::Result<Self> {
        #[cfg(unix)]
        {
            let id_int = flag::register(SIGINT, Arc::clone(&quit))?;
            let id_term = flag::register(SIGTERM, Arc::clone(&quit))?;
            Ok(Self {
                sig_ids: vec![id_int, id_term],
            })
        }

        #[cfg(not(unix))]
        {
            drop(quit);
            Ok(Self {})
        }
    }
}

impl Drop for ShutdownHooks {
    fn drop(&mut self) {
        #[cfg(unix)]
        for id in self.sig_ids.drain(..) {
            unregister(id);
        }
    }
}
