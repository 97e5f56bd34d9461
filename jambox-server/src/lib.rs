mod auth;
mod context;
mod errors;
mod playlist;
mod rooms;
mod streaming;
mod ws;

use std::{
    net::{Ipv6Addr, SocketAddr},
    sync::Arc,
};

use jambox_collab::Collab;
use log::info;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

pub use context::ServerContext;
pub use errors::*;

/// The default port the server will listen on.
pub const DEFAULT_PORT: u16 = 8080;

pub type Router = axum::Router<ServerContext>;

/// Starts the jambox server and serves until the listener fails or ctrl-c is pressed.
pub async fn run_server(collab: Arc<Collab>, port: u16) -> std::io::Result<()> {
    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_router = Router::new()
        .merge(rooms::router())
        .merge(playlist::router())
        .merge(streaming::router());

    let root_router = Router::new()
        .nest("/api", api_router)
        .merge(ws::router())
        .layer(cors)
        .with_state(ServerContext { collab });

    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, root_router.into_make_service())
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down...");
            }
        })
        .await
}
