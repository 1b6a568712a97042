// src/handlers/signal.rs
// Call-control events, decoded and queued for this socket's dispatcher.
//
// socketioxide spawns a task per async handler call, so handlers here stay sync and only
// enqueue. One dispatcher per socket drains the queue, which keeps arrival order.

use std::sync::Arc;

use socketioxide::extract::{Data, SocketRef};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    relay::Relay,
    types::{
        event, AnswerCallPayload, CallPayload, ClientEvent, EndCallPayload, IceCandidatePayload,
        TransportId, UserId,
    },
};

pub type EventQueue = mpsc::UnboundedSender<ClientEvent>;

/// Wires the call-control events of `socket` into `queue`.
pub fn register(socket: &SocketRef, queue: EventQueue) {
    let tx = queue.clone();
    socket.on(event::CALL, move |Data(p): Data<CallPayload>| enqueue(&tx, ClientEvent::Call(p)));

    let tx = queue.clone();
    socket.on(event::ANSWER_CALL, move |Data(p): Data<AnswerCallPayload>| {
        enqueue(&tx, ClientEvent::AnswerCall(p))
    });

    let tx = queue.clone();
    socket.on(event::ICE_CANDIDATE, move |Data(p): Data<IceCandidatePayload>| {
        enqueue(&tx, ClientEvent::IceCandidate(p))
    });

    let tx = queue;
    socket.on(event::END_CALL, move |Data(p): Data<EndCallPayload>| enqueue(&tx, ClientEvent::EndCall(p)));
}

fn enqueue(queue: &EventQueue, event: ClientEvent) {
    let name = event.name();
    if queue.send(event).is_err() {
        warn!("[!] {name} arrived after the dispatcher stopped");
    }
}

/// Hands queued events to the relay one at a time until every sender is gone.
/// The sender is always the identity this socket presented at connect.
pub fn spawn_dispatcher(
    relay: Arc<Relay>,
    transport: TransportId,
    sender: UserId,
    mut events: mpsc::UnboundedReceiver<ClientEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            relay.handle(&transport, &sender, event).await;
        }
        debug!("[-] dispatcher for {transport} stopped");
    })
}
