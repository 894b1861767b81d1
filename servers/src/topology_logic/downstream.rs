use crate::topology_logic::config::Settings;
use crate::topology_logic::state::AppState;
use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
};
use lib_topology::core::topology;
use lib_topology::{DeviceDescriptor, SupervisorError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

pub fn router(app_state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/topology", get(topology_handler))
        .route("/ws/topology", get(ws_handler))
        .route("/api/device", get(list_devices_handler).post(add_device_handler))
        .route("/api/device/{name}", delete(remove_device_handler))
        .layer(cors)
        .with_state(app_state)
}

pub async fn run(settings: Settings, app_state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Downstream server listening on {}", addr);

    axum::serve(listener, router(app_state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::info!("Downstream server shutting down.");
        })
        .await?;
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn topology_handler(State(state): State<AppState>) -> Response {
    match topology::snapshot(state.store.as_ref()).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to build topology");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn list_devices_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.supervisor.devices().await)
}

async fn add_device_handler(State(state): State<AppState>, Json(device): Json<DeviceDescriptor>) -> Response {
    let name = device.name.clone();
    match state.supervisor.start(device).await {
        Ok(()) => (StatusCode::CREATED, name).into_response(),
        Err(e) => supervisor_error(e),
    }
}

async fn remove_device_handler(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.supervisor.stop(&name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => supervisor_error(e),
    }
}

pub fn status_for(error: &SupervisorError) -> StatusCode {
    match error {
        SupervisorError::AlreadyRunning(_) => StatusCode::CONFLICT,
        SupervisorError::UnknownDevice(_) => StatusCode::NOT_FOUND,
        SupervisorError::EmptyName => StatusCode::BAD_REQUEST,
        SupervisorError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn supervisor_error(error: SupervisorError) -> Response {
    let status = status_for(&error);
    if status.is_server_error() {
        tracing::error!(error = %error, "device request failed");
    } else {
        tracing::info!(error = %error, "device request rejected");
    }
    (status, error.to_string()).into_response()
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let (client_id, mut snapshots) = match state.hub.subscribe_channel().await {
        Ok(subscription) => subscription,
        Err(e) => {
            tracing::info!(error = %e, "viewer left before the first snapshot");
            return;
        }
    };
    tracing::info!("Viewer {} connected", client_id);

    loop {
        tokio::select! {
            // Snapshots pushed by the hub
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break; // pruned by the hub
                }
                let snapshot = Arc::clone(&snapshots.borrow_and_update());
                let json = match serde_json::to_string(snapshot.as_ref()) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize topology");
                        continue;
                    }
                };
                if socket.send(Message::Text(json.into())).await.is_err() {
                    break; // viewer disconnected
                }
            }
            // Viewers only listen; anything but a close is ignored
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.hub.unsubscribe(client_id).await;
    tracing::info!("Viewer {} disconnected", client_id);
}
