// src/handlers/disconnect.rs
// Socket disconnect cleanup.

use socketioxide::extract::{SocketRef, State};
use tracing::info;

use super::{transport_of, AppState};

pub async fn on_disconnect(socket: SocketRef, State(state): State<AppState>) {
    let transport = transport_of(&socket);

    let Some(user_id) = state.sockets.detach(&transport).await else {
        info!("[-] unregistered socket {transport} disconnected");
        return;
    };

    // Only this transport's entry goes; a newer reconnect of the same user stays.
    state.relay.disconnect(&transport, &user_id).await;
}
