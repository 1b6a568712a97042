// src/handlers/connect.rs
// Handshake: `callerId` is mandatory, `fcmToken` optional.

use socketioxide::extract::{SocketRef, State};
use tokio::sync::mpsc;
use tracing::warn;

use super::{disconnect::on_disconnect, signal, transport_of, AppState, EventSink, SocketRegistry};
use crate::{
    error::RelayError,
    relay::Relay,
    types::{ConnectQuery, TransportId, UserId},
};

pub async fn on_connect(socket: SocketRef, State(state): State<AppState>) {
    let transport = transport_of(&socket);
    let query = ConnectQuery::from_uri(&socket.req_parts().uri);

    let user_id = match admit(&state.relay, &state.sockets, transport.clone(), &query, socket.clone()).await {
        Ok(id) => id,
        Err(e) => {
            if let Err(err) = socket.disconnect() {
                warn!("[!] closing {transport} after '{e}' failed: {err}");
            }
            return;
        }
    };

    let (queue, events) = mpsc::unbounded_channel();
    signal::register(&socket, queue);
    signal::spawn_dispatcher(state.relay.clone(), transport, user_id, events);

    socket.on_disconnect(on_disconnect);
}

/// Attaches the socket, then publishes presence, so anything routed to the new
/// registration already has somewhere to go. A refused handshake is detached again.
pub(crate) async fn admit<S: EventSink>(
    relay: &Relay,
    sockets: &SocketRegistry<S>,
    transport: TransportId,
    query: &ConnectQuery,
    sink: S,
) -> Result<UserId, RelayError> {
    let claimed = query.caller_id.clone().unwrap_or_default();
    sockets.attach(transport.clone(), claimed, sink).await;

    match relay.connect(transport.clone(), query).await {
        Ok(user_id) => Ok(user_id),
        Err(e) => {
            sockets.detach(&transport).await;
            Err(e)
        }
    }
}
