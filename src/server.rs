use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::any,
    Router,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use tokio::{net::TcpListener, select};
use tower_http::trace::TraceLayer;
use tracing::{error, info, trace};

use crate::{
    api,
    channel::{Broadcaster, ConnectionId},
    config::ServerConfig,
    market::PriceGenerator,
    seed::seed_demo_data,
    simulation::Simulation,
    store::{SharedStore, Store},
};

pub struct ServerState {
    pub store: SharedStore,
    pub broadcaster: Arc<Broadcaster>,
}

pub type SharedServerState = Arc<ServerState>;

impl ServerState {
    pub fn new(store: SharedStore, send_buffer: usize) -> SharedServerState {
        let broadcaster = Arc::new(Broadcaster::new(store.clone(), send_buffer));
        Arc::new(Self { store, broadcaster })
    }
}

pub fn router(state: SharedServerState) -> Router {
    Router::new()
        .route("/ws", any(ws_handler))
        .merge(api::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: SharedServerState) -> Result<()> {
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Builds the store, starts the tick and serves HTTP and `/ws` until the
/// listener fails.
pub async fn start(config: ServerConfig) -> Result<()> {
    let mut store = Store::new();
    if config.seed_demo_data {
        seed_demo_data(&mut store)?;
    }
    let state = ServerState::new(store.shared(), config.send_buffer);

    let generator = match config.rng_seed {
        Some(seed) => PriceGenerator::seeded(seed),
        None => PriceGenerator::new(),
    };
    let simulation = Simulation::new(
        state.store.clone(),
        Arc::new(generator),
        state.broadcaster.clone(),
        config.tick_interval,
    );
    simulation.start();

    let listener = TcpListener::bind(&config.address).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    let result = serve(listener, state).await;
    simulation.stop();
    result
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedServerState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedServerState) {
    let (id, mut rx) = state.broadcaster.connect().await;
    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::task::spawn(async move {
        while let Some(message) = rx.recv().await {
            let msg = match serde_json::ser::to_string(&message) {
                Ok(msg) => msg,
                Err(err) => {
                    error!("Failed to serialize message for connection {id} : {err}");
                    continue;
                }
            };
            if sender.send(Message::Text(msg.into())).await.is_err() {
                return;
            }
        }
    });

    let mut recv_task = tokio::task::spawn({
        let broadcaster = state.broadcaster.clone();
        async move { receive(id, &mut receiver, &broadcaster).await }
    });

    select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    state.broadcaster.disconnect(id).await;
}

async fn receive(
    id: ConnectionId,
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    broadcaster: &Broadcaster,
) {
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => broadcaster.handle_text(id, text.as_str()).await,
            Ok(Message::Close(frame)) => {
                trace!("Connection {id} sent close : {:?}", frame);
                return;
            }
            Ok(_) => {}
            Err(err) => {
                info!("Connection {id} transport error : {err}");
                return;
            }
        }
    }
}
