//! WebSocket feed of alarm events, notifications and state changes
//!
//! Each text frame is one JSON [`StreamMessage`]. A client first receives the
//! current status and progress of both alarms, then every change as it
//! happens. Slow clients skip missed events rather than stall the engine.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use serde::Serialize;
use tracing::{debug, warn};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::alarm::{AlarmEvent, AlarmProgress};
use crate::api::AppState;
use crate::models::{GetOffAlarmStatus, GetOnAlarmStatus};
use crate::services::notifier::Notification;

#[derive(Debug, Serialize, ToSchema)]
#[serde(tag = "channel", content = "data", rename_all = "snake_case")]
pub enum StreamMessage {
    Event(AlarmEvent),
    Notification(Notification),
    GetOnStatus(Option<GetOnAlarmStatus>),
    GetOnProgress(AlarmProgress),
    GetOffStatus(Option<GetOffAlarmStatus>),
    GetOffProgress(AlarmProgress),
}

pub fn router() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(stream_events))
}

/// Upgrade to a WebSocket streaming [`StreamMessage`] frames
#[utoipa::path(
    get,
    path = "/api/events",
    responses(
        (status = 101, description = "Switching to WebSocket", body = StreamMessage)
    ),
    tag = "events"
)]
pub async fn stream_events(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| forward(socket, state))
}

async fn send(socket: &mut WebSocket, message: &StreamMessage) -> bool {
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "Failed to serialize stream message");
            return true;
        }
    };
    socket.send(Message::Text(text.into())).await.is_ok()
}

async fn forward(mut socket: WebSocket, state: AppState) {
    let get_on = state.engine.get_on();
    let get_off = state.engine.get_off();

    let mut events = state.engine.subscribe_events();
    let mut notifications = state.notifier.subscribe();
    let mut get_on_status = get_on.subscribe_status();
    let mut get_on_progress = get_on.subscribe_progress();
    let mut get_off_status = get_off.subscribe_status();
    let mut get_off_progress = get_off.subscribe_progress();

    debug!("Event stream client connected");

    let snapshot = [
        StreamMessage::GetOnStatus(get_on_status.latest()),
        StreamMessage::GetOnProgress(get_on_progress.latest()),
        StreamMessage::GetOffStatus(get_off_status.latest()),
        StreamMessage::GetOffProgress(get_off_progress.latest()),
    ];
    for message in &snapshot {
        if !send(&mut socket, message).await {
            return;
        }
    }

    loop {
        let message = tokio::select! {
            Some(event) = events.recv() => StreamMessage::Event(event),
            Some(notification) = notifications.recv() => StreamMessage::Notification(notification),
            Some(status) = get_on_status.changed() => StreamMessage::GetOnStatus(status),
            Some(progress) = get_on_progress.changed() => StreamMessage::GetOnProgress(progress),
            Some(status) = get_off_status.changed() => StreamMessage::GetOffStatus(status),
            Some(progress) = get_off_progress.changed() => StreamMessage::GetOffProgress(progress),
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Pings are answered by axum; other client frames are ignored
                Some(Ok(_)) => continue,
            },
            else => break,
        };

        if !send(&mut socket, &message).await {
            break;
        }
    }

    debug!("Event stream client disconnected");
}
