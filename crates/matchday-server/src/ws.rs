//! Duplex channel: WebSocket sessions bridging clients to the hub.
//!
//! Each socket gets two halves: a writer task draining the connection's hub
//! queue, and a reader loop turning client frames into hub, delivery,
//! typing and read-state calls. A bad frame is answered with an `error`
//! event; the connection stays open.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use matchday_shared::protocol::{ClientEvent, ServerEvent};
use matchday_shared::{ConnectionId, ParticipantId, RoomId};
use matchday_store::Participant;

use crate::api::AppState;
use crate::auth::Authenticated;
use crate::delivery::check_send;
use crate::error::ServerError;

/// The authenticated side of one live connection.
pub struct LiveSession {
    pub connection: ConnectionId,
    pub participant: Participant,
}

impl LiveSession {
    fn me(&self) -> ParticipantId {
        self.participant.id
    }

    /// The other participant of `room`, or `Forbidden` if we are not in it.
    fn peer_in(&self, room: &RoomId) -> Result<ParticipantId, ServerError> {
        room.peer_of(self.me())
            .ok_or_else(|| ServerError::Forbidden(format!("not a participant of room {room}")))
    }
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Authenticated(participant): Authenticated,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| run_session(socket, state, participant))
}

async fn run_session(socket: WebSocket, state: AppState, participant: Participant) {
    let (connection, outbound) = state.hub.connect(participant.id).await;
    let session = LiveSession {
        connection,
        participant,
    };
    let (sink, mut stream) = socket.split();
    let mut writer = spawn_writer(sink, outbound);

    loop {
        tokio::select! {
            frame = stream.next() => {
                let Some(Ok(frame)) = frame else { break };
                if handle_frame(&state, &session, frame).await == FrameOutcome::Close {
                    break;
                }
            }
            _ = &mut writer => break,
        }
    }

    writer.abort();
    close_session(&state, &session).await;
}

/// Drain a connection's queue into its socket until either side goes away.
fn spawn_writer<S>(mut sink: S, mut outbound: mpsc::Receiver<ServerEvent>) -> JoinHandle<()>
where
    S: Sink<Message> + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let text = match event.to_text() {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to encode server event");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameOutcome {
    Continue,
    Close,
}

async fn handle_frame(state: &AppState, session: &LiveSession, frame: Message) -> FrameOutcome {
    match frame {
        Message::Text(text) => {
            handle_text(state, session, text.as_str()).await;
            FrameOutcome::Continue
        }
        Message::Binary(_) => {
            state
                .hub
                .send_to(session.connection, ServerEvent::error("Binary frames are not supported"))
                .await;
            FrameOutcome::Continue
        }
        Message::Close(_) => FrameOutcome::Close,
        _ => FrameOutcome::Continue,
    }
}

/// Parse and apply one text frame. Rejections are answered with an `error`
/// event on the same connection. Returns whether the frame was applied.
pub async fn handle_text(state: &AppState, session: &LiveSession, text: &str) -> bool {
    let result = match ClientEvent::from_text(text) {
        Ok(event) => handle_client_event(state, session, event).await,
        Err(e) => Err(ServerError::from(e)),
    };
    match result {
        Ok(()) => true,
        Err(e) => {
            debug!(connection = %session.connection, error = %e, "Client event rejected");
            state
                .hub
                .send_to(session.connection, ServerEvent::error(e.public_message()))
                .await;
            false
        }
    }
}

/// Tear down a connection: leave every room and stop its typing indicators.
pub async fn close_session(state: &AppState, session: &LiveSession) {
    let rooms = state.hub.disconnect(session.connection).await;
    state.typing.clear_connection(session.connection).await;
    info!(
        connection = %session.connection,
        participant = %session.participant.id.short(),
        rooms = rooms.len(),
        "Live session ended"
    );
}

/// Apply one client event on behalf of an authenticated session.
pub async fn handle_client_event(
    state: &AppState,
    session: &LiveSession,
    event: ClientEvent,
) -> Result<(), ServerError> {
    match event {
        ClientEvent::JoinRoom(room) => {
            state.hub.join(session.connection, &room).await?;
        }
        ClientEvent::LeaveRoom(room) => {
            state.hub.leave(session.connection, &room).await?;
        }
        ClientEvent::SendMessage(send) => {
            let receiver = session.peer_in(&send.room_id)?;
            check_send(session.me(), receiver, &send.content)?;
            if !state.throttle.check(session.me()).await {
                return Err(ServerError::TooManyRequests);
            }
            let view = state
                .coordinator
                .send_message(session.me(), receiver, &send.content, Some(session.connection))
                .await?;
            state
                .hub
                .send_to(session.connection, ServerEvent::MessageSent(view))
                .await;
        }
        ClientEvent::Typing(typing) => {
            session.peer_in(&typing.room_id)?;
            state
                .typing
                .set_typing(
                    typing.room_id,
                    session.me(),
                    session.participant.display_name.clone(),
                    typing.is_typing,
                    Some(session.connection),
                )
                .await;
        }
        ClientEvent::MarkRead(mark) => {
            let peer = session.peer_in(&mark.room_id)?;
            state.read_state.mark_read(session.me(), peer).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::store::MessageStore;
    use matchday_shared::protocol::{MarkRead, SendMessage, Typing};
    use matchday_shared::resolve;
    use tokio::sync::mpsc::Receiver;

    async fn open(state: &AppState, participant: &Participant) -> (LiveSession, Receiver<ServerEvent>) {
        let (connection, rx) = state.hub.connect(participant.id).await;
        (
            LiveSession {
                connection,
                participant: participant.clone(),
            },
            rx,
        )
    }

    async fn setup() -> (AppState, Participant, Participant) {
        let store = MessageStore::in_memory().unwrap();
        let a = store.create_participant("Eagles".into(), "a".into()).await.unwrap();
        let b = store.create_participant("Hawks".into(), "b".into()).await.unwrap();
        (AppState::new(store, ServerConfig::default()), a, b)
    }

    #[tokio::test]
    async fn test_send_acks_origin_and_pushes_to_peer() {
        let (state, a, b) = setup().await;
        let room = resolve(a.id, b.id);
        let (session_a, mut rx_a) = open(&state, &a).await;
        let (session_b, mut rx_b) = open(&state, &b).await;

        handle_client_event(&state, &session_a, ClientEvent::JoinRoom(room.clone())).await.unwrap();
        handle_client_event(&state, &session_b, ClientEvent::JoinRoom(room.clone())).await.unwrap();

        let send = ClientEvent::SendMessage(SendMessage {
            room_id: room.clone(),
            content: "kick-off at 6?".into(),
        });
        handle_client_event(&state, &session_a, send).await.unwrap();

        match rx_a.try_recv().unwrap() {
            ServerEvent::MessageSent(view) => assert_eq!(view.content, "kick-off at 6?"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx_a.try_recv().is_err());
        match rx_b.try_recv().unwrap() {
            ServerEvent::NewMessage(view) => {
                assert_eq!(view.sender_id, a.id);
                assert_eq!(view.receiver_id, b.id);
                assert_eq!(view.sender_name, "Eagles");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_outsider_cannot_join_or_send() {
        let (state, a, b) = setup().await;
        let outsider = state
            .store
            .create_participant("Lions".into(), "c".into())
            .await
            .unwrap();
        let room = resolve(a.id, b.id);
        let (session, _rx) = open(&state, &outsider).await;

        let err = handle_client_event(&state, &session, ClientEvent::JoinRoom(room.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Forbidden(_)));

        let send = ClientEvent::SendMessage(SendMessage {
            room_id: room.clone(),
            content: "hi".into(),
        });
        assert!(matches!(
            handle_client_event(&state, &session, send).await,
            Err(ServerError::Forbidden(_))
        ));

        let typing = ClientEvent::Typing(Typing {
            room_id: room.clone(),
            is_typing: true,
            display_name: Some("Eagles".into()),
        });
        assert!(handle_client_event(&state, &session, typing).await.is_err());
        assert!(state.store.list_between(a.id, b.id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_typing_uses_directory_name() {
        let (state, a, b) = setup().await;
        let room = resolve(a.id, b.id);
        let (session_a, _rx_a) = open(&state, &a).await;
        let (session_b, mut rx_b) = open(&state, &b).await;
        handle_client_event(&state, &session_b, ClientEvent::JoinRoom(room.clone())).await.unwrap();

        let typing = ClientEvent::Typing(Typing {
            room_id: room,
            is_typing: true,
            display_name: Some("Definitely Not Eagles".into()),
        });
        handle_client_event(&state, &session_a, typing).await.unwrap();

        match rx_b.try_recv().unwrap() {
            ServerEvent::UserTyping(notice) => assert_eq!(notice.display_name, "Eagles"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mark_read_over_channel() {
        let (state, a, b) = setup().await;
        let room = resolve(a.id, b.id);
        state.store.append(a.id, b.id, "hi".into()).await.unwrap();
        let (session_b, _rx) = open(&state, &b).await;

        let mark = ClientEvent::MarkRead(MarkRead { room_id: room });
        handle_client_event(&state, &session_b, mark).await.unwrap();
        assert_eq!(state.store.unread_count_from(a.id, b.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_close_session_leaves_rooms() {
        let (state, a, b) = setup().await;
        let room = resolve(a.id, b.id);
        let (session, _rx) = open(&state, &a).await;
        handle_client_event(&state, &session, ClientEvent::JoinRoom(room.clone())).await.unwrap();
        assert_eq!(state.hub.room_member_count(&room).await, 1);

        close_session(&state, &session).await;
        assert_eq!(state.hub.room_member_count(&room).await, 0);
        assert_eq!(state.hub.connection_count().await, 0);
    }

    fn expect_error(rx: &mut Receiver<ServerEvent>) -> String {
        match rx.try_recv().unwrap() {
            ServerEvent::Error(notice) => notice.message,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_frame_answers_error_and_stays_open() {
        let (state, a, b) = setup().await;
        let room = resolve(a.id, b.id);
        let (session, mut rx) = open(&state, &a).await;

        assert!(!handle_text(&state, &session, "{not json").await);
        expect_error(&mut rx);

        let outcome = handle_frame(&state, &session, Message::Text(r#"{"event":"dance"}"#.into())).await;
        assert_eq!(outcome, FrameOutcome::Continue);
        expect_error(&mut rx);

        let join = format!(r#"{{"event":"join-room","data":"{room}"}}"#);
        assert!(handle_text(&state, &session, &join).await);
        assert!(rx.try_recv().is_err());
        assert_eq!(state.hub.room_member_count(&room).await, 1);
    }

    #[tokio::test]
    async fn test_binary_and_close_frames() {
        let (state, a, _b) = setup().await;
        let (session, mut rx) = open(&state, &a).await;

        let outcome = handle_frame(&state, &session, Message::Binary(vec![1u8, 2, 3].into())).await;
        assert_eq!(outcome, FrameOutcome::Continue);
        assert!(expect_error(&mut rx).contains("Binary"));

        assert_eq!(
            handle_frame(&state, &session, Message::Close(None)).await,
            FrameOutcome::Close
        );
    }

    #[tokio::test]
    async fn test_rejected_sends_do_not_spend_quota() {
        let store = MessageStore::in_memory().unwrap();
        let a = store.create_participant("Eagles".into(), "a".into()).await.unwrap();
        let b = store.create_participant("Hawks".into(), "b".into()).await.unwrap();
        let config = ServerConfig {
            send_rate: 0.001,
            send_burst: 1.0,
            ..ServerConfig::default()
        };
        let state = AppState::new(store, config);
        let room = resolve(a.id, b.id);
        let (session, mut rx) = open(&state, &a).await;

        let empty = format!(r#"{{"event":"send-message","data":{{"roomId":"{room}","content":"  "}}}}"#);
        assert!(!handle_text(&state, &session, &empty).await);
        expect_error(&mut rx);

        let valid = format!(r#"{{"event":"send-message","data":{{"roomId":"{room}","content":"hi"}}}}"#);
        assert!(handle_text(&state, &session, &valid).await);
        assert!(matches!(rx.try_recv().unwrap(), ServerEvent::MessageSent(_)));
    }

    #[tokio::test]
    async fn test_writer_forwards_frames_until_queue_closes() {
        let (sink, mut frames) = futures::channel::mpsc::unbounded::<Message>();
        let (tx, outbound) = mpsc::channel(4);
        let writer = spawn_writer(sink, outbound);

        tx.send(ServerEvent::error("first")).await.unwrap();
        match frames.next().await.unwrap() {
            Message::Text(text) => {
                assert_eq!(
                    ServerEvent::from_text(text.as_str()).unwrap(),
                    ServerEvent::error("first")
                );
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        drop(tx);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_writer_stops_when_socket_goes_away() {
        let (sink, frames) = futures::channel::mpsc::unbounded::<Message>();
        let (tx, outbound) = mpsc::channel(4);
        let writer = spawn_writer(sink, outbound);

        drop(frames);
        tx.send(ServerEvent::error("lost")).await.unwrap();
        writer.await.unwrap();
    }
}
