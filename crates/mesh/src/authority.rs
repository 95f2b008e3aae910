//! Certificate authority over the messenger.
//!
//! Chains and TRCs carry their own signatures, so both queries travel
//! unsigned: a node needs them before it can sign anything.

use crate::error::MeshError;
use crate::message::{Ack, AckCode, ChainQuery, ChainReply, MessageType, Payload, Reply, Request};
use crate::messenger::Messenger;
use async_trait::async_trait;
use mapmesh_core::{DomainId, PeerAddress, ServiceKind};
use mapmesh_crypto::SubjectKeyId;
use mapmesh_identity::{
    AuthorityError, CertificateAuthority, CertificateChain, RootOfTrust, RootOfTrustQuery,
};
use std::sync::Arc;

/// [`CertificateAuthority`] client that queries a node running a
/// [`CertificateService`].
pub struct RemoteCertificateAuthority {
    messenger: Arc<Messenger>,
    authority: PeerAddress,
}

impl RemoteCertificateAuthority {
    pub fn new(messenger: Arc<Messenger>, authority_domain: DomainId) -> Self {
        Self {
            messenger,
            authority: PeerAddress::new(authority_domain, ServiceKind::CertificateAuthority),
        }
    }

    async fn query(&self, payload: Payload, message_type: MessageType) -> Result<Payload, AuthorityError> {
        self.messenger
            .send_unsigned(payload, self.authority, message_type)
            .await
            .and_then(Reply::into_unsigned)
            .map_err(|e| match e {
                MeshError::Rejected(reason) => AuthorityError::NotFound(reason),
                MeshError::Codec(_) | MeshError::UnexpectedPayload { .. } => {
                    AuthorityError::Malformed(e.to_string())
                }
                other => AuthorityError::Unavailable(other.to_string()),
            })
    }
}

fn malformed(e: MeshError) -> AuthorityError {
    AuthorityError::Malformed(e.to_string())
}

#[async_trait]
impl CertificateAuthority for RemoteCertificateAuthority {
    async fn get_chains(
        &self,
        domain: DomainId,
        subject_key_id: &SubjectKeyId,
    ) -> Result<Vec<CertificateChain>, AuthorityError> {
        let query = Payload::ChainQuery(ChainQuery {
            domain,
            subject_key_id: subject_key_id.clone(),
        });
        let reply = self
            .query(query, MessageType::ChainQuery)
            .await?
            .into_chain_reply()
            .map_err(malformed)?;
        Ok(reply.chains)
    }

    async fn get_root_of_trust(
        &self,
        query: RootOfTrustQuery,
    ) -> Result<RootOfTrust, AuthorityError> {
        let trc = self
            .query(Payload::RootQuery(query), MessageType::RootQuery)
            .await?
            .into_root_reply()
            .map_err(malformed)?;
        if trc.id.isd != query.isd || query.serial.is_some_and(|s| s != trc.id.serial) {
            return Err(AuthorityError::Malformed(format!(
                "asked for ISD {} serial {:?}, got {}",
                query.isd, query.serial, trc.id
            )));
        }
        Ok(trc)
    }
}

/// Answers chain and TRC queries from a local [`CertificateAuthority`].
pub struct CertificateService {
    authority: Arc<dyn CertificateAuthority>,
}

impl CertificateService {
    pub fn new(authority: Arc<dyn CertificateAuthority>) -> Self {
        Self { authority }
    }

    pub async fn handle(&self, request: &Request) -> Reply {
        let payload = match request.payload() {
            Ok(payload) => payload,
            Err(e) => return Reply::reject(&e),
        };
        let result = match payload {
            Payload::ChainQuery(query) => self
                .authority
                .get_chains(query.domain, &query.subject_key_id)
                .await
                .map(|chains| Payload::ChainReply(ChainReply { chains })),
            Payload::RootQuery(query) => self
                .authority
                .get_root_of_trust(query)
                .await
                .map(Payload::RootReply),
            other => {
                return Reply::reject(&MeshError::UnexpectedPayload {
                    expected: "chain_query or root_query",
                    found: other.kind(),
                })
            }
        };
        match result {
            Ok(payload) => Reply::Unsigned(payload),
            Err(AuthorityError::NotFound(what)) => Reply::Ack(Ack {
                code: AckCode::Rejected,
                reason: what,
            }),
            Err(e) => {
                tracing::warn!(sender = %request.sender, error = %e, "trust material lookup failed");
                Reply::error(e.to_string())
            }
        }
    }

    /// Register the `ChainQuery` and `RootQuery` handlers on `messenger`.
    pub fn install(self: &Arc<Self>, messenger: &Messenger) {
        for message_type in [MessageType::ChainQuery, MessageType::RootQuery] {
            let service = self.clone();
            messenger.add_handler(
                message_type,
                Arc::new(move |request: Request| {
                    let service = service.clone();
                    async move { service.handle(&request).await }
                }),
            );
        }
    }
}
