//! WebSocket upgrade + message loop. Each client message is parsed as JSON and
//! answered with one JSON message; progress events of the socket's current
//! subscription are forwarded as they arrive.
//!
//! A socket holds at most one subscription. `generate_course` subscribes to the
//! new job; `subscribe` switches jobs; `unsubscribe` or closing drops it.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tokio::sync::mpsc;
use tracing::{info, error, instrument, debug};

use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::logic::start_watched_course;
use crate::scheduler::ProgressEvent;
use crate::state::AppState;

type Subscription = Option<mpsc::Receiver<ProgressEvent>>;

#[instrument(level = "info", skip(state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "coursegen", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn next_event(sub: &mut Subscription) -> Option<ProgressEvent> {
  match sub {
    Some(rx) => rx.recv().await,
    None => std::future::pending().await,
  }
}

fn encode(msg: &ServerWsMessage) -> String {
  serde_json::to_string(msg).unwrap_or_else(|e| {
    serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
  })
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "coursegen", "WebSocket connected");
  let mut sub: Subscription = None;

  loop {
    let reply_msg = tokio::select! {
      incoming = socket.recv() => match incoming {
        Some(Ok(Message::Text(txt))) => match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => {
            debug!(target: "coursegen", "WS received: {:?}", &incoming);
            handle_client_ws(incoming, &state, &mut sub).await
          }
          Err(e) => ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) },
        },
        Some(Ok(Message::Ping(payload))) => {
          let _ = socket.send(Message::Pong(payload)).await;
          continue;
        }
        Some(Ok(Message::Close(_))) | None => break,
        Some(Ok(_)) => continue,
        Some(Err(e)) => {
          error!(target: "coursegen", error = %e, "WS receive error");
          break;
        }
      },
      event = next_event(&mut sub) => match event {
        Some(event) => ServerWsMessage::from(event),
        None => {
          // The job finished and dropped its subscribers.
          sub = None;
          continue;
        }
      },
    };

    if let Err(e) = socket.send(Message::Text(encode(&reply_msg))).await {
      error!(target: "coursegen", error = %e, "WS send error");
      break;
    }
  }
  info!(target: "coursegen", "WebSocket disconnected");
}

#[instrument(level = "info", skip(state, sub))]
async fn handle_client_ws(msg: ClientWsMessage, state: &AppState, sub: &mut Subscription) -> ServerWsMessage {
  match msg {
    ClientWsMessage::Ping => ServerWsMessage::Pong,

    ClientWsMessage::GenerateCourse { spec } => match start_watched_course(state, spec).await {
      Ok((artifact, rx)) => {
        *sub = Some(rx);
        info!(target: "coursegen", job_id = %artifact.job_id, "WS course started");
        ServerWsMessage::Course { artifact }
      }
      Err(message) => ServerWsMessage::Error { message },
    },

    ClientWsMessage::Subscribe { job_id } => match state.scheduler.on_unit_ready(&job_id).await {
      Some(rx) => {
        *sub = Some(rx);
        info!(target: "coursegen", %job_id, "WS subscribed");
        ServerWsMessage::Subscribed { job_id }
      }
      None => ServerWsMessage::Error { message: format!("unknown job {job_id}") },
    },

    ClientWsMessage::Unsubscribe => {
      *sub = None;
      ServerWsMessage::Unsubscribed
    }
  }
}
