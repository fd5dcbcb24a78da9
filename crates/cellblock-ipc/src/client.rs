//! IPC client for admin tools and host bridges

use cellblock_api::{Command, Event, Request, Response, ResponsePayload, ResponseResult};
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tracing::debug;

use crate::{IpcError, IpcResult};

/// A line from the server; a subscribed connection interleaves events with
/// replies
#[derive(Deserialize)]
#[serde(untagged)]
enum Incoming {
    Reply(Response),
    Event(Event),
}

/// Connection to cellblockd
pub struct IpcClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    next_request_id: u64,
    /// Events read while waiting for a reply
    backlog: VecDeque<Event>,
}

impl IpcClient {
    pub async fn connect(socket_path: impl AsRef<Path>) -> IpcResult<Self> {
        Ok(Self::from_stream(UnixStream::connect(socket_path).await?))
    }

    fn from_stream(stream: UnixStream) -> Self {
        let (read_half, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read_half).lines(),
            writer,
            next_request_id: 1,
            backlog: VecDeque::new(),
        }
    }

    async fn read(&mut self) -> IpcResult<Incoming> {
        loop {
            let line = self.lines.next_line().await?.ok_or(IpcError::ConnectionClosed)?;
            if !line.trim().is_empty() {
                return Ok(serde_json::from_str(line.trim())?);
            }
        }
    }

    /// Issue a command and wait for its payload; error replies become
    /// [`IpcError::ServerError`]
    pub async fn request(&mut self, command: Command) -> IpcResult<ResponsePayload> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let mut line = serde_json::to_vec(&Request::new(request_id, command))?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;

        loop {
            match self.read().await? {
                Incoming::Event(event) => self.backlog.push_back(event),
                Incoming::Reply(reply) if reply.request_id != request_id => {
                    return Err(IpcError::UnexpectedReply(reply.request_id));
                }
                Incoming::Reply(reply) => {
                    return match reply.result {
                        ResponseResult::Ok(payload) => Ok(payload),
                        ResponseResult::Err(e) => Err(IpcError::ServerError(e.message)),
                    };
                }
            }
        }
    }

    /// Subscribe and turn this connection into an event stream
    pub async fn subscribe(mut self) -> IpcResult<EventStream> {
        self.request(Command::SubscribeEvents).await?;
        Ok(EventStream { client: self })
    }
}

/// Events from cellblockd, in publish order
pub struct EventStream {
    client: IpcClient,
}

impl EventStream {
    pub async fn next(&mut self) -> IpcResult<Event> {
        if let Some(event) = self.client.backlog.pop_front() {
            return Ok(event);
        }
        loop {
            match self.client.read().await? {
                Incoming::Event(event) => return Ok(event),
                Incoming::Reply(reply) => {
                    debug!(request_id = reply.request_id, "Ignoring reply on event stream");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellblock_api::{ErrorCode, ErrorInfo, EventPayload};
    use cellblock_util::ClientId;

    async fn send_line<T: serde::Serialize>(stream: &mut UnixStream, value: &T) {
        let mut line = serde_json::to_vec(value).unwrap();
        line.push(b'\n');
        stream.write_all(&line).await.unwrap();
    }

    #[tokio::test]
    async fn test_event_ahead_of_subscribe_reply_is_kept() {
        let (ours, mut theirs) = UnixStream::pair().unwrap();
        let client = IpcClient::from_stream(ours);

        send_line(&mut theirs, &Event::new(EventPayload::Shutdown)).await;
        let subscribed = ResponsePayload::Subscribed {
            client_id: ClientId::new(),
        };
        send_line(&mut theirs, &Response::success(1, subscribed)).await;

        let mut events = client.subscribe().await.unwrap();
        let event = events.next().await.unwrap();
        assert!(matches!(event.payload, EventPayload::Shutdown));
    }

    #[tokio::test]
    async fn test_error_reply_becomes_server_error() {
        let (ours, mut theirs) = UnixStream::pair().unwrap();
        let mut client = IpcClient::from_stream(ours);

        let denied = ErrorInfo::new(ErrorCode::PermissionDenied, "Command requires an admin client");
        send_line(&mut theirs, &Response::error(1, denied)).await;

        match client.request(Command::Save).await {
            Err(IpcError::ServerError(message)) => assert!(message.contains("admin")),
            other => panic!("Expected ServerError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_closed_connection() {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let mut client = IpcClient::from_stream(ours);
        drop(theirs);

        assert!(client.request(Command::Ping).await.is_err());
    }
}
