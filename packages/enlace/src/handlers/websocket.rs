use axum::{
    body::Bytes,
    extract::{
        Query, State, WebSocketUpgrade,
        rejection::QueryRejection,
        ws::{CloseFrame, Message, WebSocket, close_code, rejection::WebSocketUpgradeRejection},
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use enlace_hub::{Frame, Inbound};
use futures::{SinkExt, StreamExt, future};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::AppState;
use crate::gateway::{self, GatewayRejection};

#[derive(Debug, Default, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// GET /api/v1/notifications/ws
///
/// Authenticates before looking at the upgrade itself, so a bad credential
/// is always a 401 and never reaches the hub.
pub async fn notifications_websocket_handler(
    State(state): State<AppState>,
    query: Result<Query<WsAuthQuery>, QueryRejection>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let query = match query {
        Ok(Query(query)) => query,
        Err(e) => {
            warn!("Rejecting upgrade with malformed query: {}", e.body_text());
            state.metrics.upgrade_rejected();
            return GatewayRejection::InvalidCredential.into_response();
        }
    };
    let credential = gateway::credential_from_request(query.token, &headers);

    let user_id = match gateway::authenticate(
        state.verifier.as_ref(),
        state.repository.as_ref(),
        credential.as_deref(),
    )
    .await
    {
        Ok(user_id) => user_id,
        Err(rejection) => {
            state.metrics.upgrade_rejected();
            return rejection.into_response();
        }
    };

    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| serve_connection(socket, state, user_id)),
        Err(rejection) => rejection.into_response(),
    }
}

async fn serve_connection(socket: WebSocket, state: AppState, user_id: Uuid) {
    let connection = match state.hub.register(user_id).await {
        Ok(connection) => connection,
        Err(e) => {
            warn!(user_id = %user_id, "Dropping upgraded socket: {}", e);
            return;
        }
    };
    let conn_id = connection.id();
    info!(user_id = %user_id, conn_id = %conn_id, "WebSocket connected");
    state.metrics.connection_opened();

    let (sink, stream) = socket.split();
    let sink = sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(to_message(frame))));
    let stream = stream.map(|message| message.map(classify));

    connection
        .spawn_pumps(state.hub.clone(), sink, stream, state.pump_config.clone())
        .join()
        .await;

    state.metrics.connection_closed();
    info!(user_id = %user_id, conn_id = %conn_id, "WebSocket disconnected");
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Ping => Message::Ping(Bytes::new()),
        Frame::Close => Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "".into(),
        })),
    }
}

fn classify(message: Message) -> Inbound {
    match message {
        Message::Close(_) => Inbound::Close,
        _ => Inbound::Message,
    }
}
