//! Per-connection state machine.
//!
//! A connection starts unauthenticated, becomes authenticated after a
//! successful `login` and is closed on logout, a fatal error, an idle
//! timeout or when the peer goes away. One task owns the socket and
//! multiplexes inbound requests with outbound pushes.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use courier_shared::protocol::{GroupEntry, Inbound, Push, Reply, Request, Response, SessionClaim};
use courier_shared::types::{Role, UserId};
use courier_shared::{JsonLinesCodec, ProtocolError};

use crate::error::{AuthError, ServiceError};
use crate::registry::ConnectionId;
use crate::router::Destination;
use crate::state::AppState;

/// The logged-in identity bound to a connection.
#[derive(Debug, Clone)]
struct Identity {
    user_id: UserId,
    username: String,
    session_id: String,
}

enum Phase {
    Unauthenticated,
    Authenticated(Identity),
}

/// What to write back for one request, and whether to hang up afterwards.
struct Outcome {
    response: Response,
    request_id: Option<Value>,
    close: bool,
}

impl Outcome {
    fn failed(request_id: Option<Value>, err: &ServiceError) -> Self {
        Self {
            response: Response::error(err.wire_message()),
            request_id,
            close: err.is_fatal(),
        }
    }
}

struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    state: AppState,
    push_tx: mpsc::Sender<Push>,
    phase: Phase,
}

/// Drive one client connection to completion.
pub async fn handle_connection<S>(stream: S, peer: SocketAddr, state: AppState)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let id = state.registry.next_connection_id();
    let idle = state.config.idle_timeout;
    let (push_tx, mut push_rx) = mpsc::channel::<Push>(state.config.push_buffer);
    let mut framed = Framed::new(stream, JsonLinesCodec::new());

    info!(conn = id, peer = %peer, "Connection opened");

    let mut conn = Connection {
        id,
        peer,
        state,
        push_tx,
        phase: Phase::Unauthenticated,
    };

    let deadline = tokio::time::sleep(idle);
    tokio::pin!(deadline);

    let reason = loop {
        tokio::select! {
            frame = framed.next() => {
                let frame = match frame {
                    None => break "peer closed",
                    Some(Ok(frame)) => frame,
                    Some(Err(ProtocolError::Io(e))) => {
                        warn!(conn = id, error = %e, "Transport error");
                        break "transport error";
                    }
                    Some(Err(e)) => {
                        warn!(conn = id, error = %e, "Undecodable frame");
                        let err = ServiceError::Protocol(e);
                        let _ = write_frame(&mut framed, error_value(&err), idle, id).await;
                        break "protocol error";
                    }
                };

                deadline.as_mut().reset(Instant::now() + idle);

                let outcome = conn.handle_frame(&frame).await;
                let value = match outcome.response.to_value(outcome.request_id.as_ref()) {
                    Ok(value) => value,
                    Err(e) => {
                        error!(conn = id, error = %e, "Failed to encode response");
                        break "encode error";
                    }
                };
                if let Err(reason) = write_frame(&mut framed, value, idle, id).await {
                    break reason;
                }
                if outcome.close {
                    break "closed by server";
                }
            }
            Some(push) = push_rx.recv() => {
                if let Err(reason) = write_frame(&mut framed, push, idle, id).await {
                    break reason;
                }
            }
            _ = &mut deadline => break "idle timeout",
        }
    };

    conn.sign_out().await;
    info!(conn = id, peer = %peer, reason, "Connection closed");
}

/// Write one frame. A peer that stops reading for longer than `limit` is
/// treated as gone.
async fn write_frame<S, T>(
    framed: &mut Framed<S, JsonLinesCodec>,
    item: T,
    limit: Duration,
    conn: ConnectionId,
) -> Result<(), &'static str>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: Serialize,
{
    match tokio::time::timeout(limit, framed.send(item)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            warn!(conn, error = %e, "Failed to write frame");
            Err("write error")
        }
        Err(_) => {
            warn!(conn, ?limit, "Peer stopped reading");
            Err("write timeout")
        }
    }
}

fn error_value(err: &ServiceError) -> Value {
    serde_json::json!({ "status": "error", "message": err.wire_message() })
}

impl Connection {
    async fn handle_frame(&mut self, frame: &[u8]) -> Outcome {
        let Inbound {
            request_id,
            request,
        } = match Inbound::from_frame(frame) {
            Ok(inbound) => inbound,
            Err(e) => {
                debug!(conn = self.id, error = %e, "Rejecting malformed request");
                return Outcome::failed(None, &ServiceError::Protocol(e));
            }
        };

        let kind = request.kind();
        debug!(conn = self.id, kind, "Request received");

        if !self.state.rate_limiter.check(self.peer.ip()).await {
            warn!(conn = self.id, peer = %self.peer, kind, "Rate limit exceeded");
            return Outcome::failed(request_id, &ServiceError::RateLimited);
        }

        match self.dispatch(request).await {
            Ok((response, close)) => Outcome {
                response,
                request_id,
                close,
            },
            Err(err) => {
                match &err {
                    ServiceError::Internal(detail) => {
                        error!(conn = self.id, kind, error = %detail, "Request failed")
                    }
                    other => debug!(conn = self.id, kind, error = %other, "Request rejected"),
                }
                Outcome::failed(request_id, &err)
            }
        }
    }

    async fn dispatch(&mut self, request: Request) -> Result<(Response, bool), ServiceError> {
        let reply = match request {
            Request::Register { username, password } => {
                self.reject_if_authenticated()?;
                let user_id = self.state.auth.register(&username, &password).await?;
                return Ok((Response::Registered { user_id }, false));
            }

            Request::Login { username, password } => {
                self.reject_if_authenticated()?;
                return Ok(self.login(&username, &password).await);
            }

            Request::GetUserChats { session } => {
                let user = self.reader(session).await?;
                let chats = self.state.router.get_user_chats(user).await?;
                Reply::Chats {
                    chats: chats.into_iter().map(Into::into).collect(),
                }
            }

            Request::GetMessages {
                chat_id,
                session,
                limit,
            } => {
                let user = self.reader(session).await?;
                let messages = self
                    .state
                    .router
                    .get_chat_messages(user, chat_id, limit)
                    .await?;
                Reply::Messages {
                    chat_id,
                    messages: messages.into_iter().map(Into::into).collect(),
                }
            }

            Request::Message {
                content,
                chat_id,
                group_id,
                recipient_id,
            } => {
                let me = self.require_session().await?;
                let destination = Destination::resolve(chat_id, group_id, recipient_id)?;
                let delivery = self
                    .state
                    .router
                    .send_message(me.user_id, content, destination)
                    .await?;

                let queued = self
                    .state
                    .registry
                    .fan_out(&delivery.participants, me.user_id, &delivery.push())
                    .await;
                debug!(
                    conn = self.id,
                    chat = %delivery.message.chat_id,
                    message = %delivery.message.id,
                    queued,
                    "Message routed"
                );

                Reply::MessageSent {
                    message_id: delivery.message.id,
                    chat_id: delivery.message.chat_id,
                    timestamp: delivery.message.timestamp,
                }
            }

            Request::SearchUsers { query } => {
                let me = self.require_session().await?;
                let users = self.state.directory.search_users(&query, me.user_id).await?;
                Reply::Users {
                    users: users.into_iter().map(Into::into).collect(),
                }
            }

            Request::CreateGroup { name, member_ids } => {
                let me = self.require_session().await?;
                let group = self
                    .state
                    .directory
                    .create_group(&name, me.user_id, member_ids)
                    .await?;
                Reply::Group {
                    group: group.into_entry(Some(Role::Owner)),
                }
            }

            Request::AddMember {
                group_id,
                user_id,
                role,
            } => {
                let me = self.require_session().await?;
                self.state
                    .directory
                    .add_member(me.user_id, user_id, group_id, role)
                    .await?;
                Reply::Done {}
            }

            Request::RemoveMember { group_id, user_id } => {
                let me = self.require_session().await?;
                self.state
                    .directory
                    .remove_member(me.user_id, user_id, group_id)
                    .await?;
                Reply::Done {}
            }

            Request::DeleteGroup { group_id } => {
                let me = self.require_session().await?;
                self.state.directory.delete_group(group_id, me.user_id).await?;
                Reply::Done {}
            }

            Request::ListGroups {} => {
                let me = self.require_session().await?;
                let groups = self.state.directory.list_groups(me.user_id).await?;
                Reply::Groups {
                    groups: groups
                        .into_iter()
                        .map(|(group, role)| group.into_entry(Some(role)))
                        .collect::<Vec<GroupEntry>>(),
                }
            }

            Request::Logout {} => {
                let me = self.require_session().await?;
                self.state.auth.logout(&me.session_id).await?;
                self.sign_out().await;
                info!(conn = self.id, user = %me.user_id, "User logged out");
                return Ok((Response::ok(Reply::Done {}), true));
            }
        };

        Ok((Response::ok(reply), false))
    }

    /// A failed login is answered and then the connection is closed.
    async fn login(&mut self, username: &str, password: &str) -> (Response, bool) {
        let session = match self.state.auth.login(username, password).await {
            Ok(session) => session,
            Err(err) => {
                if let ServiceError::Internal(detail) = &err {
                    error!(conn = self.id, error = %detail, "Login failed");
                }
                return (Response::error(err.wire_message()), true);
            }
        };

        self.state
            .registry
            .register(session.user_id, self.id, self.push_tx.clone())
            .await;
        info!(conn = self.id, user = %session.user_id, "Connection authenticated");

        let reply = Reply::LoggedIn {
            user_id: session.user_id,
            username: session.username.clone(),
            session_id: session.session_id.clone(),
        };
        self.phase = Phase::Authenticated(Identity {
            user_id: session.user_id,
            username: session.username,
            session_id: session.session_id,
        });

        (Response::ok(reply), false)
    }

    fn reject_if_authenticated(&self) -> Result<(), ServiceError> {
        match &self.phase {
            Phase::Authenticated(me) => Err(ServiceError::Validation(format!(
                "already logged in as {}",
                me.username
            ))),
            Phase::Unauthenticated => Ok(()),
        }
    }

    /// The connection's identity, re-checked against the session store. A
    /// session expired elsewhere signs the connection out.
    async fn require_session(&mut self) -> Result<Identity, ServiceError> {
        let me = match &self.phase {
            Phase::Authenticated(me) => me.clone(),
            Phase::Unauthenticated => return Err(ServiceError::NotAuthenticated),
        };

        if self
            .state
            .auth
            .validate_session(&me.session_id, me.user_id)
            .await?
        {
            Ok(me)
        } else {
            info!(conn = self.id, user = %me.user_id, "Session no longer valid");
            self.sign_out().await;
            Err(ServiceError::NotAuthenticated)
        }
    }

    /// Identity for read requests. An explicit session claim takes precedence
    /// over the connection's own login.
    async fn reader(&mut self, claim: Option<SessionClaim>) -> Result<UserId, ServiceError> {
        let Some(claim) = claim else {
            return self.require_session().await.map(|me| me.user_id);
        };

        if self
            .state
            .auth
            .validate_session(&claim.session_id, claim.user_id)
            .await?
        {
            return Ok(claim.user_id);
        }

        match self.phase {
            Phase::Authenticated(_) => Err(AuthError::InvalidSession.into()),
            Phase::Unauthenticated => Err(ServiceError::NotAuthenticated),
        }
    }

    async fn sign_out(&mut self) {
        if let Phase::Authenticated(me) = std::mem::replace(&mut self.phase, Phase::Unauthenticated)
        {
            self.state.registry.unregister(me.user_id, self.id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use crate::config::ServerConfig;
    use crate::state::test_support::temp_state;

    use super::*;

    #[tokio::test]
    async fn client_that_stops_reading_is_released() {
        let config = ServerConfig {
            idle_timeout: Duration::from_millis(200),
            ..ServerConfig::for_tests()
        };
        let (_dir, state) = temp_state(config);
        state.auth.register("alice", "pw").await.unwrap();

        let (client, server) = tokio::io::duplex(16);
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let task = tokio::spawn(handle_connection(server, peer, state.clone()));

        let mut client = BufReader::new(client);
        client
            .get_mut()
            .write_all(b"{\"type\":\"login\",\"username\":\"alice\",\"password\":\"pw\"}\n")
            .await
            .unwrap();
        let mut line = String::new();
        client.read_line(&mut line).await.unwrap();
        assert!(line.contains("\"ok\""), "{line}");
        assert_eq!(state.registry.stats().await, (1, 1));

        // The reply is larger than the pipe and nobody reads it.
        client
            .get_mut()
            .write_all(b"{\"type\":\"list_groups\"}\n")
            .await
            .unwrap();

        let finished = tokio::time::timeout(Duration::from_secs(2), task).await;
        assert!(finished.is_ok(), "connection task still running");
        assert_eq!(state.registry.stats().await, (0, 0));
        drop(client);
    }
}
