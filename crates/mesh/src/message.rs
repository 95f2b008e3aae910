//! Wire payloads.
//!
//! Every blob inside a [`SignedEnvelope`] is the JSON encoding of a
//! [`Payload`]. The `kind` discriminant tells the receiver what it holds, so
//! unwrapping a nested envelope is a match rather than a guess.

use crate::error::{MeshError, MeshResult};
use crate::reconcile::Outcome;
use mapmesh_core::DomainId;
use mapmesh_crypto::SignedEnvelope;
use mapmesh_identity::{CertificateChain, RootOfTrust, RootOfTrustQuery};
use mapmesh_crypto::SubjectKeyId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reachability announced by one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRecord {
    pub domain: DomainId,
    /// IP prefixes reachable through `domain`
    pub prefixes: Vec<String>,
    pub timestamp: u64,
}

/// The unit being gossiped.
///
/// `payload` is the origin-signed inner envelope (normally a mapping). The
/// entry itself travels inside a second origin-signed envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub origin_domain: DomainId,
    pub entry_type: String,
    /// Unix seconds
    pub timestamp: u64,
    pub commit_id: String,
    pub payload: SignedEnvelope,
}

/// Relay's answer to an aggregator's `AddEntry`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryReceipt {
    pub origin_domain: DomainId,
    pub entry_type: String,
    pub commit_id: String,
    pub outcome: Outcome,
}

/// Origin-signed entry envelopes, signed as a whole by the sending relay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryBatch {
    pub entries: Vec<SignedEnvelope>,
}

/// Filter for stored entries; `*`, `%` or an empty string match anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryQuery {
    pub entry_type: String,
    pub origin_domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub node_id: String,
    pub domain: DomainId,
}

/// One known gossip node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRecord {
    pub node_id: String,
    pub domain: DomainId,
    /// Registrant-signed registration envelope, when known
    #[serde(default)]
    pub raw: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipQuery {
    /// Domain filter; `*`, `%` or empty match anything
    pub domain: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipList {
    pub records: Vec<MembershipRecord>,
}

impl MembershipList {
    /// Keep the first record for each node ID.
    pub fn dedup(records: Vec<MembershipRecord>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let records = records
            .into_iter()
            .filter(|r| seen.insert(r.node_id.clone()))
            .collect();
        Self { records }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainQuery {
    pub domain: DomainId,
    pub subject_key_id: SubjectKeyId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReply {
    pub chains: Vec<CertificateChain>,
}

/// Every payload kind that can appear on the wire or inside an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Payload {
    Mapping(MappingRecord),
    Entry(Entry),
    EntryReceipt(EntryReceipt),
    EntryBatch(EntryBatch),
    EntryQuery(EntryQuery),
    Registration(Registration),
    MembershipQuery(MembershipQuery),
    MembershipList(MembershipList),
    ChainQuery(ChainQuery),
    ChainReply(ChainReply),
    RootQuery(RootOfTrustQuery),
    RootReply(RootOfTrust),
}

macro_rules! expect_variant {
    ($name:ident, $variant:ident, $ty:ty, $label:literal) => {
        pub fn $name(self) -> MeshResult<$ty> {
            match self {
                Payload::$variant(inner) => Ok(inner),
                other => Err(MeshError::UnexpectedPayload {
                    expected: $label,
                    found: other.kind(),
                }),
            }
        }
    };
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Mapping(_) => "mapping",
            Payload::Entry(_) => "entry",
            Payload::EntryReceipt(_) => "entry_receipt",
            Payload::EntryBatch(_) => "entry_batch",
            Payload::EntryQuery(_) => "entry_query",
            Payload::Registration(_) => "registration",
            Payload::MembershipQuery(_) => "membership_query",
            Payload::MembershipList(_) => "membership_list",
            Payload::ChainQuery(_) => "chain_query",
            Payload::ChainReply(_) => "chain_reply",
            Payload::RootQuery(_) => "root_query",
            Payload::RootReply(_) => "root_reply",
        }
    }

    pub fn encode(&self) -> MeshResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> MeshResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Decode the blob of an envelope. Does not verify the signature.
    pub fn open(envelope: &SignedEnvelope) -> MeshResult<Self> {
        Self::decode(&envelope.blob)
    }

    expect_variant!(into_mapping, Mapping, MappingRecord, "mapping");
    expect_variant!(into_entry, Entry, Entry, "entry");
    expect_variant!(into_receipt, EntryReceipt, EntryReceipt, "entry_receipt");
    expect_variant!(into_batch, EntryBatch, EntryBatch, "entry_batch");
    expect_variant!(into_entry_query, EntryQuery, EntryQuery, "entry_query");
    expect_variant!(into_registration, Registration, Registration, "registration");
    expect_variant!(into_membership_query, MembershipQuery, MembershipQuery, "membership_query");
    expect_variant!(into_membership_list, MembershipList, MembershipList, "membership_list");
    expect_variant!(into_chain_query, ChainQuery, ChainQuery, "chain_query");
    expect_variant!(into_chain_reply, ChainReply, ChainReply, "chain_reply");
    expect_variant!(into_root_query, RootQuery, RootOfTrustQuery, "root_query");
    expect_variant!(into_root_reply, RootReply, RootOfTrust, "root_reply");
}

/// Message types a handler can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Aggregator pushes a single entry to a relay
    AddEntry,
    /// Relay gossips a batch of entries to another relay
    GossipBatch,
    EntryQuery,
    Register,
    MembershipQuery,
    /// Registry pushes its membership list downstream
    MembershipPush,
    ChainQuery,
    RootQuery,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::AddEntry => "add_entry",
            MessageType::GossipBatch => "gossip_batch",
            MessageType::EntryQuery => "entry_query",
            MessageType::Register => "register",
            MessageType::MembershipQuery => "membership_query",
            MessageType::MembershipPush => "membership_push",
            MessageType::ChainQuery => "chain_query",
            MessageType::RootQuery => "root_query",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Body {
    Signed(SignedEnvelope),
    Unsigned(Payload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub message_type: MessageType,
    /// Domain the sender claims; signed bodies are verified against it
    pub sender: DomainId,
    pub body: Body,
}

impl Request {
    /// The signed envelope, or [`MeshError::Unsigned`].
    pub fn signed(&self) -> MeshResult<&SignedEnvelope> {
        match &self.body {
            Body::Signed(envelope) => Ok(envelope),
            Body::Unsigned(_) => Err(MeshError::Unsigned),
        }
    }

    /// Decoded payload regardless of signing.
    pub fn payload(&self) -> MeshResult<Payload> {
        match &self.body {
            Body::Signed(envelope) => Payload::open(envelope),
            Body::Unsigned(payload) => Ok(payload.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckCode {
    Ok,
    Rejected,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub code: AckCode,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Reply {
    Ack(Ack),
    Signed(SignedEnvelope),
    Unsigned(Payload),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Ack(Ack {
            code: AckCode::Ok,
            reason: String::new(),
        })
    }

    /// Negative acknowledgment for `error`: verification, staleness and
    /// malformed input are rejections, anything else is an internal error.
    pub fn reject(error: &MeshError) -> Self {
        let code = match error {
            MeshError::Transport(_)
            | MeshError::Store(_)
            | MeshError::Sign(_)
            | MeshError::Internal(_) => AckCode::Error,
            _ => AckCode::Rejected,
        };
        Reply::Ack(Ack {
            code,
            reason: error.ack_reason().to_string(),
        })
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Reply::Ack(Ack {
            code: AckCode::Error,
            reason: reason.into(),
        })
    }

    /// Succeeds only for a positive acknowledgment.
    pub fn into_ack(self) -> MeshResult<()> {
        match self {
            Reply::Ack(Ack {
                code: AckCode::Ok, ..
            }) => Ok(()),
            Reply::Ack(ack) => Err(MeshError::Rejected(ack.reason)),
            Reply::Signed(_) | Reply::Unsigned(_) => Err(MeshError::UnexpectedPayload {
                expected: "ack",
                found: "payload",
            }),
        }
    }

    /// The signed envelope of a reply; negative acks become errors.
    pub fn into_signed(self) -> MeshResult<SignedEnvelope> {
        match self {
            Reply::Signed(envelope) => Ok(envelope),
            Reply::Ack(ack) => Err(MeshError::Rejected(ack.reason)),
            Reply::Unsigned(payload) => Err(MeshError::UnexpectedPayload {
                expected: "signed payload",
                found: payload.kind(),
            }),
        }
    }

    pub fn into_unsigned(self) -> MeshResult<Payload> {
        match self {
            Reply::Unsigned(payload) => Ok(payload),
            Reply::Ack(ack) => Err(MeshError::Rejected(ack.reason)),
            Reply::Signed(_) => Err(MeshError::UnexpectedPayload {
                expected: "unsigned payload",
                found: "signed payload",
            }),
        }
    }
}
