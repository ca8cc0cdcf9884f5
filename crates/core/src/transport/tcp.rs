use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::clients::{ClientId, ClientTable};
use crate::protocol::{COMMAND_LEN, Command, CommandHandler};
use crate::session::TalkArbiter;

/// Poll interval between non-blocking accept attempts, so the `running`
/// flag is observed promptly on shutdown.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Non-blocking control accept loop.
///
/// Accepted connections claim a slot in the client table; when the table is
/// full the stream is dropped, which closes it. Each accepted client gets
/// its own thread running the fixed-size command loop.
pub fn accept_loop(
    listener: TcpListener,
    clients: ClientTable,
    arbiter: TalkArbiter,
    write_timeout: Duration,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                // Responses and doorbell fan-out must never block a thread
                // indefinitely on a stalled client.
                let _ = stream.set_write_timeout(Some(write_timeout));

                let table_stream = match stream.try_clone() {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                let id = match clients.add(table_stream, peer_addr.ip()) {
                    Ok(id) => id,
                    Err(e) => {
                        tracing::warn!(%peer_addr, error = %e, "rejecting connection");
                        continue;
                    }
                };

                let c = clients.clone();
                let a = arbiter.clone();
                let r = running.clone();
                thread::spawn(move || {
                    Connection::handle(stream, id, peer_addr, c, a, r);
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// A single control connection with its own lifecycle.
struct Connection {
    stream: TcpStream,
    client_id: ClientId,
    peer_addr: SocketAddr,
    handler: CommandHandler,
}

impl Connection {
    /// Entry point: run the command loop, then clean up the client's slot
    /// and any talk session it held.
    fn handle(
        stream: TcpStream,
        client_id: ClientId,
        peer_addr: SocketAddr,
        clients: ClientTable,
        arbiter: TalkArbiter,
        running: Arc<AtomicBool>,
    ) {
        tracing::info!(client = client_id, %peer_addr, "client connected");

        let handler = CommandHandler::new(client_id, arbiter.clone());
        let mut conn = Connection {
            stream,
            client_id,
            peer_addr,
            handler,
        };

        let reason = conn.run(&running);
        arbiter.on_client_disconnect(client_id);
        debug_assert!(!clients.is_connected(client_id));

        tracing::info!(client = client_id, peer = %conn.peer_addr, reason, "client disconnected");
    }

    /// Fixed-size command loop. Returns the reason for exiting.
    fn run(&mut self, running: &Arc<AtomicBool>) -> &'static str {
        let mut frame = [0u8; COMMAND_LEN];
        while running.load(Ordering::SeqCst) {
            match self.stream.read_exact(&mut frame) {
                Ok(()) => {}
                Err(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return "connection closed by client";
                }
                Err(_) => return "read error",
            }

            let Some(command) = Command::from_wire(frame) else {
                tracing::warn!(
                    client = self.client_id,
                    raw = u32::from_ne_bytes(frame),
                    "unknown command code"
                );
                continue;
            };

            tracing::debug!(client = self.client_id, peer = %self.peer_addr, ?command, "command");

            if let Some(response) = self.handler.handle(command) {
                tracing::debug!(client = self.client_id, ?response, "response");
                if self.stream.write_all(&response.to_wire()).is_err() {
                    return "write error";
                }
            }
        }
        "device shutting down"
    }
}
