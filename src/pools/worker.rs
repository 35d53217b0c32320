use std::io::BufReader;
use std::net::{Shutdown, TcpStream};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use serde_json::json;

use crate::logging::{LogLevel, ScopedLogger};
use crate::server::context::ServerContext;
use crate::utils::timing::ScopedExecutionTimer;
use crate::wire::codec::{self, Role};
use crate::wire::session::{self, FrameRead, WriterEnd};

use super::{GateSignal, WorkerSlot};

/// Worker thread body: idle on the gate, run one connection, go idle again.
pub(super) fn run(slot: Arc<WorkerSlot>, gate: Receiver<GateSignal>, context: Arc<ServerContext>) {
    let log = ScopedLogger::worker(&context.logger, slot.id());
    log.verbose("worker idle");

    while let Ok(signal) = gate.recv() {
        if let GateSignal::Assigned(stream) = signal {
            if context.is_shutting_down() {
                let _ = stream.shutdown(Shutdown::Both);
            } else {
                let _timer = ScopedExecutionTimer::new("connection session", &log);
                serve_connection(&stream, &context, &log);
                let _ = stream.shutdown(Shutdown::Both);
            }
            log.event(
                LogLevel::Verbose,
                "releasing slot",
                json!({
                    "assigned_at": slot.assigned_at().map(|at| at.to_rfc3339()),
                }),
            );
            slot.release();
        }

        if context.is_shutting_down() {
            break;
        }
        log.verbose("worker idle");
    }

    log.debug("worker exiting");
}

fn serve_connection(stream: &TcpStream, context: &ServerContext, log: &ScopedLogger) {
    let peer_addr = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_owned());
    let mut reader = BufReader::new(stream);

    let first_frame = match session::read_frame(&mut reader) {
        Ok(FrameRead::Frame(frame)) => frame,
        Ok(FrameRead::Closed) => {
            log.debug(&format!("{peer_addr} closed before announcing a role"));
            return;
        }
        Err(error) => {
            log.warn(&format!(
                "read error on {peer_addr}: {error}; closing connection"
            ));
            return;
        }
    };

    let message = match codec::decode(&first_frame) {
        Ok(message) => message,
        Err(error) => {
            log.warn(&format!(
                "invalid role frame from {peer_addr}: {error}; closing connection"
            ));
            return;
        }
    };

    log.event(
        LogLevel::Debug,
        "role announced",
        json!({
            "peer_addr": peer_addr,
            "role": message.role.as_str(),
            "client_error": message.error,
            "state": message.state.to_string(),
        }),
    );

    let quit = context.quit_flag();
    match message.role {
        Role::Reader => {
            let mut writer = stream;
            let report = session::run_reader(&context.queue, quit, &mut writer);
            match report.send_error {
                Some(error) => log.warn(&format!(
                    "reader {peer_addr} disconnected after {} payloads: {error}",
                    report.delivered
                )),
                None => log.event(
                    LogLevel::Info,
                    "reader drained queue",
                    json!({
                        "peer_addr": peer_addr,
                        "delivered": report.delivered,
                        "queue_len": context.queue.size(),
                    }),
                ),
            }
        }
        Role::Writer => {
            let report = session::run_writer(&context.queue, quit, &mut reader);
            let level = match report.end {
                WriterEnd::PeerClosed | WriterEnd::Quit => LogLevel::Info,
                WriterEnd::InvalidFrame { .. } | WriterEnd::ReadFailed(_) => LogLevel::Warn,
            };
            log.event(
                level,
                &format!("writer session ended: {}", report.end),
                json!({
                    "peer_addr": peer_addr,
                    "accepted": report.accepted,
                    "dropped_queue_full": report.dropped,
                    "last_state": report.last_state.map(|state| state.to_string()),
                    "last_state_blinking": report.last_state.map(|state| state.is_blinking()),
                    "queue_len": context.queue.size(),
                }),
            );
        }
        Role::Shutdown => {
            log.warn(&format!("shutdown requested by {peer_addr}"));
            context.request_shutdown();
        }
        Role::Unknown => {
            log.debug(&format!("unknown role from {peer_addr}; closing connection"));
        }
    }
}
