use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use mirrorchat_store::{snapshot::ChannelSnapshot, Channel, Message, User};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::NodeConfig;
use crate::error::ServerError;
use crate::replication::{self, Replication};
use crate::service::{ChatService, HistoryPage, MessageView, Profile, UnreadCount};

/// Header through which the external auth layer names the calling user.
pub const CALLER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ChatService>,
    pub config: Arc<NodeConfig>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/channels", get(list_channels).post(create_channel))
        .route("/message", get(get_messages).post(post_message))
        .route("/fetch", get(fetch_unread))
        .route("/history/:channel_id", get(history))
        .route("/profile", post(update_profile))
        .route("/profile/:name", get(profile))
        .route("/haveread", post(have_read))
        .route("/dump", get(dump))
        .route("/sync/user", post(sync_user))
        .route("/sync/channel", post(sync_channel))
        .route("/sync/message", post(sync_message))
        .route(
            "/sync/haveread/:channel_id/:user_id/:message_id",
            post(sync_have_read),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The calling user's ID as supplied by the auth layer.
fn caller(headers: &HeaderMap) -> Result<i64, ServerError> {
    headers
        .get(CALLER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| ServerError::Forbidden("not logged in".into()))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    node: String,
    users: usize,
    channels: usize,
    messages: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let (users, channels, messages) = state.service.store().counts().await;
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        node: state.config.node_id.clone(),
        users,
        channels,
        messages,
    })
}

// ─── Users ───

#[derive(Deserialize)]
struct Credentials {
    name: String,
    password: String,
}

#[derive(Serialize)]
struct UserIdResponse {
    id: i64,
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<Credentials>,
) -> Result<(StatusCode, Json<UserIdResponse>), ServerError> {
    let user = state.service.create_user(&req.name, &req.password).await?;
    Ok((StatusCode::CREATED, Json(UserIdResponse { id: user.id })))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<Credentials>,
) -> Result<Json<UserIdResponse>, ServerError> {
    let user = state.service.verify_password(&req.name, &req.password).await?;
    Ok(Json(UserIdResponse { id: user.id }))
}

async fn profile(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Profile>, ServerError> {
    Ok(Json(state.service.profile(&name).await?))
}

#[derive(Deserialize)]
struct ProfileUpdate {
    display_name: Option<String>,
    avatar_icon: Option<String>,
}

async fn update_profile(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<ProfileUpdate>,
) -> Result<Json<Profile>, ServerError> {
    let caller = caller(&headers)?;
    let user = state
        .service
        .update_profile(caller, req.display_name.as_deref(), req.avatar_icon.as_deref())
        .await?;
    Ok(Json(user.into()))
}

// ─── Channels ───

async fn list_channels(State(state): State<AppState>) -> Json<Vec<Channel>> {
    Json(state.service.list_channels().await)
}

#[derive(Deserialize)]
struct NewChannel {
    name: String,
    description: String,
}

async fn create_channel(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<NewChannel>,
) -> Result<(StatusCode, Json<Channel>), ServerError> {
    caller(&headers)?;
    let channel = state
        .service
        .create_channel(&req.name, &req.description)
        .await?;
    Ok((StatusCode::CREATED, Json(channel)))
}

// ─── Messages ───

#[derive(Deserialize)]
struct NewMessage {
    channel_id: i64,
    message: String,
}

async fn post_message(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<NewMessage>,
) -> Result<StatusCode, ServerError> {
    let caller = caller(&headers)?;
    state
        .service
        .post_message(caller, req.channel_id, &req.message)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct MessageQuery {
    channel_id: i64,
    last_message_id: i64,
}

async fn get_messages(
    headers: HeaderMap,
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
) -> Result<Json<Vec<MessageView>>, ServerError> {
    let caller = caller(&headers)?;
    let views = state
        .service
        .fetch_messages_after(caller, query.channel_id, query.last_message_id)
        .await?;
    Ok(Json(views))
}

async fn fetch_unread(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<UnreadCount>>, ServerError> {
    let caller = caller(&headers)?;
    Ok(Json(state.service.fetch_unread_counts(caller).await))
}

#[derive(Deserialize)]
struct HistoryQuery {
    page: Option<i64>,
}

async fn history(
    State(state): State<AppState>,
    Path(channel_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryPage>, ServerError> {
    if channel_id <= 0 {
        return Err(ServerError::BadRequest(format!("invalid channel {channel_id}")));
    }
    let page = state
        .service
        .history(channel_id, query.page.unwrap_or(1))
        .await?;
    Ok(Json(page))
}

#[derive(Deserialize)]
struct HaveRead {
    channel_id: i64,
    message_id: i64,
}

#[derive(Serialize)]
struct HaveReadResponse {
    advanced: bool,
}

async fn have_read(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<HaveRead>,
) -> Result<Json<HaveReadResponse>, ServerError> {
    let caller = caller(&headers)?;
    let advanced = state
        .service
        .record_read_position(caller, req.channel_id, req.message_id)
        .await?;
    Ok(Json(HaveReadResponse { advanced }))
}

// ─── Operator dump ───

#[derive(Serialize)]
struct Dump {
    users: HashMap<i64, Profile>,
    channels: HashMap<i64, ChannelSnapshot>,
    messages: HashMap<i64, Message>,
}

async fn dump(State(state): State<AppState>) -> Json<Dump> {
    let snapshot = state.service.store().snapshot().await;
    Json(Dump {
        users: snapshot
            .users
            .into_iter()
            .map(|(id, u)| (id, Profile::from(u)))
            .collect(),
        channels: snapshot.channels,
        messages: snapshot.messages,
    })
}

// ─── Replication receiver ───
//
// These apply a peer's write locally and never broadcast it further.

async fn sync_user(
    State(state): State<AppState>,
    Json(user): Json<User>,
) -> Result<StatusCode, ServerError> {
    replication::apply(state.service.store(), Replication::User(user)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn sync_channel(
    State(state): State<AppState>,
    Json(channel): Json<Channel>,
) -> Result<StatusCode, ServerError> {
    replication::apply(state.service.store(), Replication::Channel(channel)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn sync_message(
    State(state): State<AppState>,
    Json(message): Json<Message>,
) -> Result<StatusCode, ServerError> {
    replication::apply(state.service.store(), Replication::Message(message)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn sync_have_read(
    State(state): State<AppState>,
    Path((channel_id, user_id, message_id)): Path<(i64, i64, i64)>,
) -> Result<StatusCode, ServerError> {
    replication::apply(
        state.service.store(),
        Replication::ReadPosition {
            channel_id,
            user_id,
            message_id,
        },
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn serve(app: Router, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "Starting HTTP server");
    axum::serve(listener, app).await?;
    Ok(())
}
