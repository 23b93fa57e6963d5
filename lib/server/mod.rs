//! The HTTP wire surface: routes, handlers, state, and authentication.

mod auth;
mod handlers;
mod routes;
mod state;
mod types;

use crate::{config::Portside, PortsideResult};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use routes::*;
pub use state::*;
pub use types::*;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Binds the configured port and serves the registry until the process is
/// stopped.
pub async fn serve(config: Portside) -> PortsideResult<()> {
    let port = *config.get_server().get_port();
    let state = ServerState::new(config).await?;
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("registry listening on {}", listener.local_addr()?);

    axum::serve(listener, router).await?;
    Ok(())
}
