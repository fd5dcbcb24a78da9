//! IPC server implementation
//!
//! Each connection is served by one task that reads requests, writes replies
//! and, once the client subscribes, forwards hub events. Requests reach the
//! service as [`Inbound`] values carrying the peer's role and a [`Responder`]
//! for the reply, so the service never looks clients up.

use cellblock_api::{ClientInfo, ClientRole, Command, Request, Response};
use serde::Serialize;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{EventHub, IpcResult};

/// A request from a connected client
#[derive(Debug)]
pub struct Inbound {
    pub client: ClientInfo,
    pub request: Request,
    pub responder: Responder,
}

/// Carries the reply to one request back down its connection
#[derive(Debug)]
pub struct Responder {
    tx: mpsc::UnboundedSender<Response>,
}

impl Responder {
    /// Deliver the reply; false if the client has gone away
    pub fn send(self, response: Response) -> bool {
        self.tx.send(response).is_ok()
    }
}

/// Unix socket shared by the game host bridge and admin tools
pub struct IpcServer {
    socket_path: PathBuf,
    listener: UnixListener,
    events: EventHub,
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl IpcServer {
    /// Bind the socket, replacing a stale one, and return the request stream
    pub fn bind(
        socket_path: impl AsRef<Path>,
        events: EventHub,
    ) -> IpcResult<(Self, mpsc::UnboundedReceiver<Inbound>)> {
        let socket_path = socket_path.as_ref().to_path_buf();
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&socket_path)?;
        std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o660))?;
        info!(path = %socket_path.display(), "IPC server listening");

        let (inbound, requests) = mpsc::unbounded_channel();
        let server = Self {
            socket_path,
            listener,
            events,
            inbound,
        };
        Ok((server, requests))
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until the task is dropped
    pub async fn run(&self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    let client = client_info_for(peer_uid(&stream));
                    info!(
                        client_id = %client.client_id,
                        uid = ?client.uid,
                        role = ?client.role,
                        "Client connected"
                    );
                    tokio::spawn(serve(stream, client, self.inbound.clone(), self.events.clone()));
                }
                Err(e) => error!(error = %e, "Failed to accept connection"),
            }
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

async fn serve(
    stream: UnixStream,
    client: ClientInfo,
    inbound: mpsc::UnboundedSender<Inbound>,
    hub: EventHub,
) {
    let (read_half, mut writer) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let (reply_tx, mut replies) = mpsc::unbounded_channel::<Response>();
    let mut events = hub.subscribe();
    let mut subscribed = false;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        debug!(client_id = %client.client_id, error = %e, "Read error");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                let request = match serde_json::from_str::<Request>(line.trim()) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(client_id = %client.client_id, error = %e, "Invalid request");
                        continue;
                    }
                };
                match request.command {
                    Command::SubscribeEvents => subscribed = true,
                    Command::UnsubscribeEvents => subscribed = false,
                    _ => {}
                }

                let inbound_request = Inbound {
                    client: client.clone(),
                    request,
                    responder: Responder { tx: reply_tx.clone() },
                };
                if inbound.send(inbound_request).is_err() {
                    debug!("Service stopped; closing connection");
                    break;
                }
            }

            Some(response) = replies.recv() => {
                if let Err(e) = write_line(&mut writer, &response).await {
                    debug!(client_id = %client.client_id, error = %e, "Write error");
                    break;
                }
            }

            event = events.recv() => match event {
                Ok(event) if subscribed => {
                    if let Err(e) = write_line(&mut writer, &event).await {
                        debug!(client_id = %client.client_id, error = %e, "Event write error");
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) if subscribed => {
                    warn!(client_id = %client.client_id, missed, "Subscriber fell behind; events dropped");
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    debug!(client_id = %client.client_id, "Client disconnected");
}

async fn write_line<T: Serialize>(writer: &mut OwnedWriteHalf, value: &T) -> IpcResult<()> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    Ok(())
}

/// Root and the service's own user administer; everyone else observes
fn client_info_for(uid: Option<u32>) -> ClientInfo {
    let role = match uid {
        Some(0) => ClientRole::Admin,
        Some(u) if u == nix::unistd::getuid().as_raw() => ClientRole::Admin,
        _ => ClientRole::Observer,
    };

    let info = ClientInfo::new(role);
    match uid {
        Some(u) => info.with_uid(u),
        None => info,
    }
}

fn peer_uid(stream: &UnixStream) -> Option<u32> {
    use std::os::unix::io::AsFd;

    nix::sys::socket::getsockopt(&stream.as_fd(), nix::sys::socket::sockopt::PeerCredentials)
        .map(|cred| cred.uid())
        .ok()
}
