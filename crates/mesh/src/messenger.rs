//! Messenger: typed request/reply over a pluggable transport.
//!
//! Outbound requests are signed with the identity bound to their message
//! type and always carry a deadline. Inbound requests are dispatched to the
//! handler registered for their type.

use crate::error::{MeshError, MeshResult};
use crate::message::{Body, MessageType, Payload, Reply, Request};
use async_trait::async_trait;
use mapmesh_core::PeerAddress;
use mapmesh_identity::{SignerGenerator, SigningIdentity};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

/// Moves a request to a peer and brings back its reply.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn round_trip(&self, to: PeerAddress, request: Request) -> MeshResult<Reply>;
}

/// Serves one message type.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, request: Request) -> Reply;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Reply> + Send + 'static,
{
    async fn handle(&self, request: Request) -> Reply {
        (self)(request).await
    }
}

pub struct Messenger {
    local: PeerAddress,
    transport: Arc<dyn Transport>,
    handlers: RwLock<HashMap<MessageType, Arc<dyn Handler>>>,
    signers: RwLock<HashMap<MessageType, Arc<SigningIdentity>>>,
    timeout: Duration,
    next_id: AtomicU64,
}

impl Messenger {
    pub fn new(local: PeerAddress, transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self {
            local,
            transport,
            handlers: RwLock::new(HashMap::new()),
            signers: RwLock::new(HashMap::new()),
            timeout,
            next_id: AtomicU64::new(rand::random::<u32>() as u64),
        }
    }

    pub fn local(&self) -> PeerAddress {
        self.local
    }

    /// Deadline applied to every outbound round trip and inbound read.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn add_handler(&self, message_type: MessageType, handler: Arc<dyn Handler>) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.insert(message_type, handler);
        }
    }

    /// Bind `identity` to subsequent sends of `message_types`.
    pub fn update_signer(&self, identity: Arc<SigningIdentity>, message_types: &[MessageType]) {
        if let Ok(mut signers) = self.signers.write() {
            for message_type in message_types {
                signers.insert(*message_type, identity.clone());
            }
        }
    }

    /// Bind the signer's current identity to `message_types` and return it.
    pub async fn bind_current(
        &self,
        signer: &SignerGenerator,
        message_types: &[MessageType],
    ) -> MeshResult<Arc<SigningIdentity>> {
        let identity = signer.current().await?;
        self.update_signer(identity.clone(), message_types);
        Ok(identity)
    }

    pub fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Sign `payload` with the identity bound to `message_type` and send it.
    pub async fn send(
        &self,
        payload: &Payload,
        to: PeerAddress,
        message_type: MessageType,
    ) -> MeshResult<Reply> {
        self.send_with_id(payload, to, self.next_request_id(), message_type)
            .await
    }

    pub async fn send_with_id(
        &self,
        payload: &Payload,
        to: PeerAddress,
        request_id: u64,
        message_type: MessageType,
    ) -> MeshResult<Reply> {
        let identity = self
            .signers
            .read()
            .ok()
            .and_then(|signers| signers.get(&message_type).cloned())
            .ok_or_else(|| MeshError::Internal(format!("no signer bound for {message_type}")))?;
        let envelope = identity.seal(payload.encode()?);
        let request = Request {
            id: request_id,
            message_type,
            sender: self.local.domain,
            body: Body::Signed(envelope),
        };
        self.round_trip(to, request).await
    }

    /// Send without a signature; only trust-material queries use this.
    pub async fn send_unsigned(
        &self,
        payload: Payload,
        to: PeerAddress,
        message_type: MessageType,
    ) -> MeshResult<Reply> {
        let request = Request {
            id: self.next_request_id(),
            message_type,
            sender: self.local.domain,
            body: Body::Unsigned(payload),
        };
        self.round_trip(to, request).await
    }

    async fn round_trip(&self, to: PeerAddress, request: Request) -> MeshResult<Reply> {
        let id = request.id;
        let message_type = request.message_type;
        tracing::debug!(peer = %to, request_id = id, %message_type, "sending request");
        match tokio::time::timeout(self.timeout, self.transport.round_trip(to, request)).await {
            Ok(reply) => reply,
            Err(_) => Err(MeshError::Transport(format!(
                "{message_type} request {id} to {to} timed out after {:?}",
                self.timeout
            ))),
        }
    }

    /// Route an inbound request to its handler.
    pub async fn dispatch(&self, request: Request) -> Reply {
        let handler = self
            .handlers
            .read()
            .ok()
            .and_then(|handlers| handlers.get(&request.message_type).cloned());
        match handler {
            Some(handler) => handler.handle(request).await,
            None => {
                tracing::warn!(
                    local = %self.local,
                    message_type = %request.message_type,
                    "no handler registered"
                );
                Reply::error("unsupported message type")
            }
        }
    }
}

/// In-process transport: peers are messengers in the same process.
///
/// Requests and replies still pass through the JSON codec, and every
/// request is handled in its own task.
#[derive(Default)]
pub struct LocalTransport {
    nodes: RwLock<HashMap<PeerAddress, Weak<Messenger>>>,
}

impl LocalTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `messenger` reachable at its local address.
    pub fn attach(&self, messenger: &Arc<Messenger>) {
        if let Ok(mut nodes) = self.nodes.write() {
            nodes.insert(messenger.local(), Arc::downgrade(messenger));
        }
    }

    /// Make `address` unreachable.
    pub fn detach(&self, address: PeerAddress) {
        if let Ok(mut nodes) = self.nodes.write() {
            nodes.remove(&address);
        }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn round_trip(&self, to: PeerAddress, request: Request) -> MeshResult<Reply> {
        let target = self
            .nodes
            .read()
            .ok()
            .and_then(|nodes| nodes.get(&to).and_then(Weak::upgrade))
            .ok_or_else(|| MeshError::Transport(format!("{to} unreachable")))?;

        let request: Request = serde_json::from_slice(&serde_json::to_vec(&request)?)?;
        let reply = tokio::spawn(async move { target.dispatch(request).await })
            .await
            .map_err(|e| MeshError::Internal(format!("handler task failed: {e}")))?;
        Ok(serde_json::from_slice(&serde_json::to_vec(&reply)?)?)
    }
}
