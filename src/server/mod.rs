pub mod context;

use std::fmt;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;

use crate::config::{AppConfig, ServerConfig};
use crate::logging::{LogLevel, ScopedLogger};
use crate::pools::{PoolError, WorkerPool};
use crate::wire::codec::{self, CodecError, Role};
use crate::wire::signal::SignalState;

use self::context::ServerContext;

#[derive(Debug)]
pub enum ServerError {
    Bind {
        address: String,
        source: io::Error,
    },
    SetNonBlocking {
        source: io::Error,
    },
    ControlFrame(CodecError),
    Pool(PoolError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind { address, source } => {
                write!(f, "failed to bind TCP server on {address}: {source}")
            }
            Self::SetNonBlocking { source } => {
                write!(f, "failed to set TCP server to non-blocking mode: {source}")
            }
            Self::ControlFrame(source) => write!(f, "failed to encode control frame: {source}"),
            Self::Pool(source) => write!(f, "failed to start worker pool: {source}"),
        }
    }
}

impl std::error::Error for ServerError {}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub forced_closed: usize,
    pub worker_panics: usize,
    pub undelivered: usize,
}

/// Replies written right after accept, encoded once at bind time.
#[derive(Debug)]
struct ControlFrames {
    ok: Vec<u8>,
    busy: Vec<u8>,
}

impl ControlFrames {
    fn encode() -> Result<Self, CodecError> {
        Ok(Self {
            ok: codec::encode(Role::Shutdown, false, SignalState::ACK)?,
            busy: codec::encode(Role::Shutdown, true, SignalState::ACK)?,
        })
    }
}

/// Owns the listening socket and the worker pool. `run` is the dispatcher loop.
pub struct SignalServer {
    listener: TcpListener,
    context: Arc<ServerContext>,
    pool: WorkerPool,
    control_frames: ControlFrames,
    accept_poll_interval: Duration,
    log: ScopedLogger,
}

impl SignalServer {
    pub fn bind(
        config: &ServerConfig,
        workers: usize,
        context: Arc<ServerContext>,
    ) -> Result<Self, ServerError> {
        let control_frames = ControlFrames::encode().map_err(ServerError::ControlFrame)?;
        let address = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&address).map_err(|source| ServerError::Bind {
            address,
            source,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ServerError::SetNonBlocking { source })?;

        let pool = WorkerPool::spawn(workers, Arc::clone(&context)).map_err(ServerError::Pool)?;

        Ok(Self {
            listener,
            log: ScopedLogger::dispatcher(&context.logger),
            context,
            pool,
            control_frames,
            accept_poll_interval: Duration::from_millis(config.accept_poll_interval_ms),
        })
    }

    pub fn from_app_config(
        app_config: &AppConfig,
        context: Arc<ServerContext>,
    ) -> Result<Self, ServerError> {
        Self::bind(&app_config.server, app_config.pool.workers, context)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts until the quit flag is raised, then tears the pool down.
    pub fn run(self) -> ShutdownReport {
        while !self.context.is_shutting_down() {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => self.dispatch(stream, peer_addr),
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(self.accept_poll_interval);
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    self.log.warn(&format!("accept failed: {error}"));
                    thread::sleep(self.accept_poll_interval);
                }
            }
        }

        self.shutdown()
    }

    fn dispatch(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let log = &self.log;

        // Accepted sockets may inherit the listener's non-blocking mode.
        if let Err(error) = stream
            .set_nonblocking(false)
            .and_then(|()| stream.set_nodelay(true))
        {
            log.warn(&format!(
                "failed to configure connection from {peer_addr}: {error}"
            ));
            return;
        }

        let Some(slot) = self.pool.find_idle() else {
            self.reject_busy(stream, peer_addr);
            return;
        };

        let handle = match stream.try_clone() {
            Ok(handle) => handle,
            Err(error) => {
                log.warn(&format!(
                    "failed to clone connection from {peer_addr}: {error}"
                ));
                return;
            }
        };

        slot.reserve(handle);
        if let Err(error) = (&stream).write_all(&self.control_frames.ok) {
            log.warn(&format!("failed to send welcome to {peer_addr}: {error}"));
            slot.release();
            return;
        }

        if let Err(error) = slot.signal_assigned(stream) {
            log.error(&format!("hand-off failed: {error}"));
            slot.release();
            return;
        }

        log.event(
            LogLevel::Info,
            "Accepted connection",
            json!({
                "peer_addr": peer_addr.to_string(),
                "worker_id": slot.id(),
                "busy_workers": self.pool.busy_count(),
                "pool_size": self.pool.size(),
            }),
        );
    }

    fn reject_busy(&self, stream: TcpStream, peer_addr: SocketAddr) {
        if let Err(error) = (&stream).write_all(&self.control_frames.busy) {
            self.log
                .debug(&format!("failed to send busy reply to {peer_addr}: {error}"));
        }
        let _ = stream.shutdown(Shutdown::Both);

        self.log.event(
            LogLevel::Warn,
            "Rejected connection, no idle worker",
            json!({
                "peer_addr": peer_addr.to_string(),
                "pool_size": self.pool.size(),
            }),
        );
    }

    fn shutdown(self) -> ShutdownReport {
        let Self {
            listener,
            context,
            pool,
            log,
            ..
        } = self;

        log.info("Shutdown requested, closing listening socket");
        drop(listener);

        let forced_closed = pool.close_connected();
        pool.wake_all();
        let worker_panics = pool.join();
        if worker_panics > 0 {
            log.error(&format!("{worker_panics} worker(s) panicked before shutdown"));
        }

        let undelivered = context.queue.drain();
        let report = ShutdownReport {
            forced_closed,
            worker_panics,
            undelivered,
        };
        log.event(
            LogLevel::Info,
            "All workers joined",
            json!({
                "forced_closed": report.forced_closed,
                "worker_panics": report.worker_panics,
                "undelivered": report.undelivered,
            }),
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use std::io::{ErrorKind, Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};
    use std::time::{Duration, Instant};

    use super::context::ServerContext;
    use super::{ControlFrames, ServerError, ShutdownReport, SignalServer};
    use crate::config::{AppConfig, ServerConfig};
    use crate::logging::tests::{memory_logger, silent_logger};
    use crate::logging::{LogLevel, Logger};

    const OK_FRAME: [u8; 6] = *b"X|F|\x01\0";
    const BUSY_FRAME: [u8; 6] = *b"X|T|\x01\0";
    const IO_TIMEOUT: Duration = Duration::from_secs(5);

    struct Harness {
        addr: SocketAddr,
        context: Arc<ServerContext>,
        server: JoinHandle<ShutdownReport>,
    }

    fn local_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_owned(),
            port: 0,
            accept_poll_interval_ms: 5,
        }
    }

    fn start_with_logger(workers: usize, capacity: usize, logger: Logger) -> Harness {
        let context = Arc::new(ServerContext::new(capacity, Arc::new(logger)));
        let server = SignalServer::bind(&local_config(), workers, Arc::clone(&context))
            .expect("server should bind");
        let addr = server.local_addr().expect("local addr should exist");
        let server = thread::spawn(move || server.run());
        Harness {
            addr,
            context,
            server,
        }
    }

    fn start(workers: usize, capacity: usize) -> Harness {
        start_with_logger(workers, capacity, silent_logger())
    }

    fn connect(addr: SocketAddr) -> TcpStream {
        let stream = TcpStream::connect(addr).expect("client should connect");
        stream
            .set_read_timeout(Some(IO_TIMEOUT))
            .expect("read timeout should be set");
        stream
    }

    fn read_control_frame(stream: &mut TcpStream) -> [u8; 6] {
        let mut frame = [0_u8; 6];
        stream
            .read_exact(&mut frame)
            .expect("control frame should arrive");
        frame
    }

    /// Reads until the server closes. A reset counts as closed.
    fn read_until_closed(stream: &mut TcpStream) -> Vec<u8> {
        let mut received = Vec::new();
        match stream.read_to_end(&mut received) {
            Ok(_) => {}
            Err(error) if error.kind() == ErrorKind::ConnectionReset => {}
            Err(error) => panic!("unexpected read error: {error}"),
        }
        received
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + IO_TIMEOUT;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn stop(harness: Harness) -> ShutdownReport {
        harness.context.request_shutdown();
        harness.server.join().expect("dispatcher thread panicked")
    }

    #[test]
    fn writer_then_reader_round_trip() {
        let harness = start(2, 50);

        let mut writer = connect(harness.addr);
        assert_eq!(read_control_frame(&mut writer), OK_FRAME);
        writer.write_all(b"W|F|\0").expect("role should send");
        writer.write_all(b"\x01\0").expect("payload should send");
        assert!(wait_until(|| harness.context.queue.size() == 1));
        drop(writer);

        let mut reader = connect(harness.addr);
        assert_eq!(read_control_frame(&mut reader), OK_FRAME);
        reader.write_all(b"R|F|\0").expect("role should send");
        assert_eq!(read_until_closed(&mut reader), b"\x01\0".to_vec());
        assert!(harness.context.queue.is_empty());

        let report = stop(harness);
        assert_eq!(report.undelivered, 0);
        assert_eq!(report.worker_panics, 0);
    }

    #[test]
    fn reader_on_empty_queue_is_closed_immediately() {
        let harness = start(1, 50);

        let mut reader = connect(harness.addr);
        assert_eq!(read_control_frame(&mut reader), OK_FRAME);
        reader.write_all(b"r|F|\0").expect("role should send");
        assert!(read_until_closed(&mut reader).is_empty());

        stop(harness);
    }

    #[test]
    fn busy_frame_when_every_worker_is_connected() {
        let harness = start(2, 50);

        let mut held = Vec::new();
        for _ in 0..2 {
            let mut client = connect(harness.addr);
            assert_eq!(read_control_frame(&mut client), OK_FRAME);
            held.push(client);
        }

        let mut rejected = connect(harness.addr);
        assert_eq!(read_control_frame(&mut rejected), BUSY_FRAME);
        assert!(read_until_closed(&mut rejected).is_empty());

        let report = stop(harness);
        assert_eq!(report.forced_closed, 2);
        drop(held);
    }

    #[test]
    fn oversized_writer_frame_closes_connection_without_enqueueing() {
        let harness = start(2, 50);

        let mut writer = connect(harness.addr);
        assert_eq!(read_control_frame(&mut writer), OK_FRAME);
        writer.write_all(b"W|F|\0").expect("role should send");
        let mut oversized = vec![b'A'; 39];
        oversized.push(0);
        writer.write_all(&oversized).expect("frame should send");

        read_until_closed(&mut writer);
        assert_eq!(harness.context.queue.size(), 0);

        stop(harness);
    }

    #[test]
    fn queue_full_drops_additional_writes() {
        let harness = start(2, 2);

        let mut writer = connect(harness.addr);
        assert_eq!(read_control_frame(&mut writer), OK_FRAME);
        writer
            .write_all(b"W|F|\0\x01\0\x03\0\x05\0")
            .expect("frames should send");
        writer
            .shutdown(std::net::Shutdown::Write)
            .expect("half close should succeed");
        read_until_closed(&mut writer);

        assert_eq!(harness.context.queue.size(), 2);
        let report = stop(harness);
        assert_eq!(report.undelivered, 2);
    }

    #[test]
    fn unknown_role_is_closed_without_reply() {
        let harness = start(1, 50);

        let mut client = connect(harness.addr);
        assert_eq!(read_control_frame(&mut client), OK_FRAME);
        client.write_all(b"Q|F|\0").expect("frame should send");
        assert!(read_until_closed(&mut client).is_empty());
        assert!(harness.context.queue.is_empty());

        // The slot is handed out again once the worker has released it.
        assert!(wait_until(|| {
            let mut next = connect(harness.addr);
            read_control_frame(&mut next) == OK_FRAME
        }));

        stop(harness);
    }

    #[test]
    fn oversized_role_frame_is_closed_without_touching_the_queue() {
        let (logger, sink) = memory_logger(LogLevel::Warn);
        let harness = start_with_logger(1, 50, logger);

        let mut client = connect(harness.addr);
        assert_eq!(read_control_frame(&mut client), OK_FRAME);
        let mut role_frame = vec![b'W'; 39];
        role_frame.push(0);
        client.write_all(&role_frame).expect("frame should send");

        read_until_closed(&mut client);
        assert!(harness.context.queue.is_empty());
        assert!(wait_until(|| sink.contains("invalid role frame from")));

        assert!(wait_until(|| {
            let mut next = connect(harness.addr);
            read_control_frame(&mut next) == OK_FRAME
        }));

        let report = stop(harness);
        assert_eq!(report.undelivered, 0);
    }

    #[test]
    fn control_frames_are_encoded_replies() {
        let frames = ControlFrames::encode().expect("control frames encode");
        assert_eq!(frames.ok, OK_FRAME.to_vec());
        assert_eq!(frames.busy, BUSY_FRAME.to_vec());
    }

    #[test]
    fn shutdown_frame_stops_dispatcher_and_joins_workers() {
        let (logger, sink) = memory_logger(LogLevel::Info);
        let harness = start_with_logger(2, 50, logger);

        let mut client = connect(harness.addr);
        assert_eq!(read_control_frame(&mut client), OK_FRAME);
        client.write_all(b"X|F|\0").expect("frame should send");

        let report = harness.server.join().expect("dispatcher thread panicked");
        assert!(harness.context.is_shutting_down());
        assert_eq!(report.worker_panics, 0);
        assert!(sink.contains("shutdown requested by"));
        assert!(sink.contains("All workers joined"));
    }

    #[test]
    fn external_stop_unblocks_connected_writer() {
        let harness = start(2, 50);

        let mut writer = connect(harness.addr);
        assert_eq!(read_control_frame(&mut writer), OK_FRAME);
        writer.write_all(b"W|F|\0\x01\0").expect("frames should send");
        assert!(wait_until(|| harness.context.queue.size() == 1));

        let report = stop(harness);
        assert_eq!(report.forced_closed, 1);
        assert_eq!(report.undelivered, 1);
        assert!(read_until_closed(&mut writer).is_empty());
    }

    #[test]
    fn bind_failure_is_reported() {
        let first = start(1, 1);
        let config = ServerConfig {
            port: first.addr.port(),
            ..local_config()
        };
        let context = Arc::new(ServerContext::new(1, Arc::new(silent_logger())));

        let result = SignalServer::bind(&config, 1, context);
        assert!(matches!(result, Err(ServerError::Bind { .. })));

        stop(first);
    }

    #[test]
    fn builds_server_from_app_config() {
        let mut app_config = AppConfig::default();
        app_config.server = local_config();
        app_config.pool.workers = 1;
        let context = Arc::new(ServerContext::new(
            app_config.queue.capacity,
            Arc::new(silent_logger()),
        ));

        let server = SignalServer::from_app_config(&app_config, Arc::clone(&context))
            .expect("server should build from app config");
        let bound = server.local_addr().expect("bound address should be present");
        assert_eq!(bound.ip().to_string(), "127.0.0.1");
        assert_eq!(context.queue.capacity(), 50);

        context.request_shutdown();
        server.run();
    }
}
