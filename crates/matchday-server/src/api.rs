use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use matchday_shared::constants::MAX_DISPLAY_NAME_CHARS;
use matchday_shared::protocol::MessageView;
use matchday_shared::{ParticipantId, RoomId};
use matchday_store::{Message, Participant};

use crate::auth::{generate_token, hash_token, verify_admin_token, Authenticated};
use crate::config::ServerConfig;
use crate::delivery::{check_send, message_view, DeliveryCoordinator, LiveTransport, PollingOnly};
use crate::error::ServerError;
use crate::hub::ChannelHub;
use crate::read_state::{ReadStateTracker, UnreadSummary};
use crate::store::MessageStore;
use crate::throttle::SendThrottle;
use crate::typing::TypingTracker;
use crate::ws::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub store: MessageStore,
    pub hub: ChannelHub,
    pub coordinator: DeliveryCoordinator,
    pub read_state: ReadStateTracker,
    pub typing: TypingTracker,
    pub throttle: SendThrottle,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wire every component around one store. With the live channel off,
    /// publishes go to [`PollingOnly`] and the hub stays empty.
    pub fn new(store: MessageStore, config: ServerConfig) -> Self {
        let hub = ChannelHub::new(config.connection_queue);
        let transport: Arc<dyn LiveTransport> = if config.live_channel {
            Arc::new(hub.clone())
        } else {
            Arc::new(PollingOnly)
        };

        Self {
            coordinator: DeliveryCoordinator::new(store.clone(), transport.clone()),
            read_state: ReadStateTracker::new(store.clone(), transport.clone()),
            typing: TypingTracker::new(transport, config.typing_ttl),
            throttle: SendThrottle::new(config.send_rate, config.send_burst),
            store,
            hub,
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers(Any);

    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route(
            "/messages",
            get(list_messages).post(send_message).patch(mark_read),
        )
        .route(
            "/rooms/{room_id}/messages",
            get(room_history).post(send_to_room),
        )
        .route("/conversations", get(list_conversations))
        .route("/participants", get(list_participants))
        .route("/unread", get(unread_summary))
        .route("/unread/{peer_id}", get(unread_from_peer))
        .route("/admin/participants", post(admin_create_participant));

    if state.config.live_channel {
        router = router.route("/ws", get(ws_handler));
    }

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    live_channel: bool,
    poll_interval_secs: u64,
    connected_clients: usize,
    active_rooms: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest {
    content: String,
    receiver_id: ParticipantId,
}

#[derive(Deserialize)]
struct RoomSendRequest {
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryQuery {
    other_participant_id: ParticipantId,
    since: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct RoomHistoryQuery {
    since: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadRequest {
    sender_id: ParticipantId,
}

#[derive(Serialize)]
struct MarkReadResponse {
    success: bool,
    updated: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PeerView {
    id: ParticipantId,
    display_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConversationView {
    peer: PeerView,
    last_message: Option<MessageView>,
    unread_count: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DirectoryEntry {
    id: ParticipantId,
    display_name: String,
    unread_count: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateParticipantRequest {
    display_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateParticipantResponse {
    id: ParticipantId,
    display_name: String,
    /// Shown once; only its hash is stored.
    token: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        live_channel: state.coordinator.transport().is_live(),
        poll_interval_secs: state.config.poll_interval.as_secs(),
        connected_clients: state.hub.connection_count().await,
        active_rooms: state.hub.list_rooms().await.len(),
    })
}

// ─── Messages ───

async fn send_message(
    State(state): State<AppState>,
    Authenticated(me): Authenticated,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<MessageView>, ServerError> {
    deliver(&state, &me, req.receiver_id, &req.content).await.map(Json)
}

async fn send_to_room(
    State(state): State<AppState>,
    Authenticated(me): Authenticated,
    Path(room_id): Path<String>,
    Json(req): Json<RoomSendRequest>,
) -> Result<Json<MessageView>, ServerError> {
    let (_, peer) = room_and_peer(&room_id, &me)?;
    deliver(&state, &me, peer, &req.content).await.map(Json)
}

/// HTTP sends are broadcast to every live member of the room, the
/// sender's own open tabs included.
async fn deliver(
    state: &AppState,
    me: &Participant,
    receiver: ParticipantId,
    content: &str,
) -> Result<MessageView, ServerError> {
    check_send(me.id, receiver, content)?;
    if !state.throttle.check(me.id).await {
        return Err(ServerError::TooManyRequests);
    }
    Ok(state
        .coordinator
        .send_message(me.id, receiver, content, None)
        .await?)
}

async fn list_messages(
    State(state): State<AppState>,
    Authenticated(me): Authenticated,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MessageView>>, ServerError> {
    let peer = state.store.participant(query.other_participant_id).await?;
    history(&state, &me, &peer, query.since).await.map(Json)
}

/// Room history; opening a room marks the peer's messages read.
async fn room_history(
    State(state): State<AppState>,
    Authenticated(me): Authenticated,
    Path(room_id): Path<String>,
    Query(query): Query<RoomHistoryQuery>,
) -> Result<Json<Vec<MessageView>>, ServerError> {
    let (room, peer_id) = room_and_peer(&room_id, &me)?;
    let peer = state.store.participant(peer_id).await?;

    let updated = state.read_state.mark_read(me.id, peer.id).await?;
    info!(room = %room, updated, "Room opened");

    history(&state, &me, &peer, query.since).await.map(Json)
}

async fn history(
    state: &AppState,
    me: &Participant,
    peer: &Participant,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<MessageView>, ServerError> {
    if me.id == peer.id {
        return Err(ServerError::BadRequest(
            "A participant has no conversation with itself".into(),
        ));
    }
    let names: HashMap<ParticipantId, String> = [
        (me.id, me.display_name.clone()),
        (peer.id, peer.display_name.clone()),
    ]
    .into_iter()
    .collect();

    let messages = state.store.list_between(me.id, peer.id, since).await?;
    Ok(messages
        .into_iter()
        .map(|m| named_view(m, &names))
        .collect())
}

async fn mark_read(
    State(state): State<AppState>,
    Authenticated(me): Authenticated,
    Json(req): Json<MarkReadRequest>,
) -> Result<Json<MarkReadResponse>, ServerError> {
    let updated = state.read_state.mark_read(me.id, req.sender_id).await?;
    Ok(Json(MarkReadResponse {
        success: true,
        updated,
    }))
}

fn room_and_peer(room_id: &str, me: &Participant) -> Result<(RoomId, ParticipantId), ServerError> {
    let room = RoomId::parse(room_id)?;
    let peer = room
        .peer_of(me.id)
        .ok_or_else(|| ServerError::Forbidden(format!("not a participant of room {room}")))?;
    Ok((room, peer))
}

fn named_view(message: Message, names: &HashMap<ParticipantId, String>) -> MessageView {
    let sender_name = names.get(&message.sender_id).cloned().unwrap_or_default();
    message_view(message, sender_name)
}

// ─── Inbox ───

async fn list_conversations(
    State(state): State<AppState>,
    Authenticated(me): Authenticated,
) -> Result<Json<Vec<ConversationView>>, ServerError> {
    let summaries = state.store.conversations_for(me.id).await?;

    let views = summaries
        .into_iter()
        .map(|summary| {
            let names: HashMap<ParticipantId, String> = [
                (me.id, me.display_name.clone()),
                (summary.peer.id, summary.peer.display_name.clone()),
            ]
            .into_iter()
            .collect();
            ConversationView {
                last_message: summary.last_message.map(|m| named_view(m, &names)),
                unread_count: summary.unread_count,
                peer: PeerView {
                    id: summary.peer.id,
                    display_name: summary.peer.display_name,
                },
            }
        })
        .collect();

    Ok(Json(views))
}

async fn list_participants(
    State(state): State<AppState>,
    Authenticated(me): Authenticated,
) -> Result<Json<Vec<DirectoryEntry>>, ServerError> {
    let others = state.store.participants_except(me.id).await?;
    let unread: HashMap<ParticipantId, u64> = state
        .store
        .unread_counts(me.id)
        .await?
        .into_iter()
        .map(|c| (c.peer_id, c.count))
        .collect();

    let entries = others
        .into_iter()
        .map(|p| DirectoryEntry {
            unread_count: unread.get(&p.id).copied().unwrap_or(0),
            id: p.id,
            display_name: p.display_name,
        })
        .collect();

    Ok(Json(entries))
}

async fn unread_summary(
    State(state): State<AppState>,
    Authenticated(me): Authenticated,
) -> Result<Json<UnreadSummary>, ServerError> {
    Ok(Json(state.read_state.unread_summary(me.id).await?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PeerUnreadResponse {
    peer_id: ParticipantId,
    count: u64,
}

async fn unread_from_peer(
    State(state): State<AppState>,
    Authenticated(me): Authenticated,
    Path(peer_id): Path<ParticipantId>,
) -> Result<Json<PeerUnreadResponse>, ServerError> {
    let count = state.read_state.unread_from(me.id, peer_id).await?;
    Ok(Json(PeerUnreadResponse { peer_id, count }))
}

// ─── Admin ───

async fn admin_create_participant(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<CreateParticipantRequest>,
) -> Result<Json<CreateParticipantResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let display_name = req.display_name.trim().to_string();
    if display_name.is_empty() {
        return Err(ServerError::BadRequest("Display name is empty".into()));
    }
    if display_name.chars().count() > MAX_DISPLAY_NAME_CHARS {
        return Err(ServerError::BadRequest(format!(
            "Display name exceeds {MAX_DISPLAY_NAME_CHARS} characters"
        )));
    }

    let token = generate_token();
    let participant = state
        .store
        .create_participant(display_name, hash_token(&token))
        .await?;

    info!(participant = %participant.id, name = %participant.display_name, "Admin registered participant");

    Ok(Json(CreateParticipantResponse {
        id: participant.id,
        display_name: participant.display_name,
        token,
    }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
