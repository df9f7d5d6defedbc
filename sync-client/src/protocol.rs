//! Sync protocol client.
//!
//! One round is a single request/response exchange: the dirty set goes out
//! sealed with the account's [`RecordKey`], and server deltas come back
//! sealed the same way. Every failure carries an [`ErrorKind`] so the
//! orchestrator can map it to exactly one outcome.

use std::time::Duration;

use sync_core::ErrorKind;
use sync_types::{
    Account, AnchorUpdate, DirtyRecord, DirtyReason, EntityType, FaultCode, IdMap,
    IncomingRecord, Message, OutgoingRecord, RequestId, Restrictions, SaveSalt, ServerId,
    ServerRecord, SyncAnchor, SyncDirective, SyncRequest, WireError, WirePayload,
    PROTOCOL_VERSION,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::collector::DirtySet;
use crate::crypto::{CryptoError, RecordKey, Salt};
use crate::transport::{Transport, TransportError, MAX_MESSAGE_SIZE};

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The exchange did not complete in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The exchange was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// A message could not be encoded or decoded.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// A record payload could not be encoded or sealed.
    #[error("failed to encode payload: {0}")]
    Encode(String),

    /// A server payload could not be decrypted.
    #[error("cannot decrypt {entity} {server_id}")]
    Decrypt {
        /// Entity type of the record.
        entity: EntityType,
        /// Server id of the record.
        server_id: ServerId,
    },

    /// A decrypted server payload is malformed.
    #[error("malformed {entity} {server_id}: {detail}")]
    Payload {
        /// Entity type of the record.
        entity: EntityType,
        /// Server id of the record.
        server_id: ServerId,
        /// What was wrong.
        detail: String,
    },

    /// The response belongs to another request.
    #[error("response does not match request {0}")]
    RequestMismatch(RequestId),

    /// The server answered with an unexpected message type.
    #[error("unexpected {0} message")]
    UnexpectedMessage(&'static str),

    /// The response exceeds the size limit.
    #[error("response too large: {0} bytes")]
    TooLarge(usize),

    /// The server reported a fault.
    #[error("server fault {code:?}: {message}")]
    Fault {
        /// Failure class.
        code: FaultCode,
        /// Server detail.
        message: String,
    },
}

impl ProtocolError {
    /// The failure kind, for outcome mapping.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::Transport(_) | ProtocolError::Timeout(_) => ErrorKind::Network,
            ProtocolError::Cancelled => ErrorKind::Cancelled,
            ProtocolError::Decrypt { .. } => ErrorKind::InvalidKey,
            ProtocolError::Wire(_)
            | ProtocolError::Encode(_)
            | ProtocolError::Payload { .. }
            | ProtocolError::RequestMismatch(_)
            | ProtocolError::UnexpectedMessage(_)
            | ProtocolError::TooLarge(_) => ErrorKind::Parse,
            ProtocolError::Fault { code, .. } => match code {
                FaultCode::Unauthorized => ErrorKind::Auth,
                FaultCode::BadRequest | FaultCode::Internal | FaultCode::Unavailable => {
                    ErrorKind::Server
                }
            },
        }
    }
}

/// What the client asks for in one round, besides the dirty set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundOptions {
    /// Markers sent to the server.
    pub anchors: SyncAnchor,
    /// Ask the server to include restrictions.
    pub request_restrictions: bool,
    /// Ask the server to resend photos for every contact.
    pub explicit_photo_save: bool,
}

/// A server response with its deltas still sealed.
///
/// Deltas are opened with [`RoundResponse::open_deltas`] only once the
/// caller knows it will merge them. A directive or a restriction-forced
/// resync discards them unread.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoundResponse {
    /// New markers.
    pub anchors: AnchorUpdate,
    /// Sealed group deltas.
    pub groups: Vec<IncomingRecord>,
    /// Sealed contact deltas.
    pub contacts: Vec<IncomingRecord>,
    /// Server ids for new groups.
    pub group_ids: IdMap,
    /// Server ids for new contacts.
    pub contact_ids: IdMap,
    /// Directive overriding normal processing.
    pub directive: Option<SyncDirective>,
    /// Current restrictions.
    pub restrictions: Option<Restrictions>,
}

impl RoundResponse {
    /// Sealed deltas for one entity type.
    pub fn deltas(&self, entity: EntityType) -> &[IncomingRecord] {
        match entity {
            EntityType::Contact => &self.contacts,
            EntityType::ContactGroup => &self.groups,
        }
    }

    /// Decrypt the deltas for one entity type.
    ///
    /// A delta that fails authentication is [`ErrorKind::InvalidKey`].
    pub fn open_deltas(
        &self,
        entity: EntityType,
        key: &RecordKey,
    ) -> Result<Vec<ServerRecord>, ProtocolError> {
        open_all(entity, self.deltas(entity).to_vec(), key)
    }

    /// Id map for one entity type.
    pub fn id_map(&self, entity: EntityType) -> &IdMap {
        match entity {
            EntityType::Contact => &self.contact_ids,
            EntityType::ContactGroup => &self.group_ids,
        }
    }
}

/// Client for the request/response sync protocol.
pub struct SyncProtocolClient<T: Transport> {
    transport: T,
    server_address: String,
    timeout: Duration,
}

impl<T: Transport> SyncProtocolClient<T> {
    /// Create a client talking to `server_address` over `transport`.
    pub fn new(transport: T, server_address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            transport,
            server_address: server_address.into(),
            timeout,
        }
    }

    /// Run one sync round.
    ///
    /// Nothing is written locally and server deltas are not decrypted; the
    /// caller opens and applies them.
    pub async fn sync(
        &self,
        account: &Account,
        token: &str,
        dirty: &DirtySet,
        options: RoundOptions,
        key: &RecordKey,
        cancel: &CancellationToken,
    ) -> Result<RoundResponse, ProtocolError> {
        let request_id = RequestId::new();
        let request = SyncRequest {
            version: PROTOCOL_VERSION,
            request_id,
            auth_token: token.to_string(),
            anchors: options.anchors,
            sync_contacts: dirty.sync_contacts,
            groups: seal_all(&dirty.groups, key)?,
            contacts: seal_all(&dirty.contacts, key)?,
            group_id_requests: dirty.group_id_requests.clone(),
            contact_id_requests: dirty.contact_id_requests.clone(),
            request_restrictions: options.request_restrictions,
            explicit_photo_save: options.explicit_photo_save,
        };

        tracing::debug!(
            account = %account,
            %request_id,
            groups = request.groups.len(),
            contacts = request.contacts.len(),
            sync_contacts = request.sync_contacts,
            "Sending sync request"
        );

        let response = match self
            .exchange(&Message::SyncRequest(request), cancel)
            .await?
        {
            Message::SyncResponse(resp) => resp,
            other => return Err(unexpected(other)),
        };
        if response.request_id != request_id {
            return Err(ProtocolError::RequestMismatch(request_id));
        }

        let result = RoundResponse {
            anchors: response.anchors,
            groups: response.groups,
            contacts: response.contacts,
            group_ids: response.group_ids,
            contact_ids: response.contact_ids,
            directive: response.directive,
            restrictions: response.restrictions,
        };

        tracing::debug!(
            account = %account,
            groups = result.groups.len(),
            contacts = result.contacts.len(),
            new_group_ids = result.group_ids.len(),
            new_contact_ids = result.contact_ids.len(),
            directive = ?result.directive,
            "Received sync response"
        );
        Ok(result)
    }

    /// Store the account's key-derivation salt on the server.
    pub async fn save_salt(
        &self,
        account: &Account,
        token: &str,
        salt: &Salt,
        cancel: &CancellationToken,
    ) -> Result<(), ProtocolError> {
        let request_id = RequestId::new();
        let message = Message::SaveSalt(SaveSalt {
            request_id,
            auth_token: token.to_string(),
            salt: salt.as_bytes().to_vec(),
        });

        tracing::debug!(account = %account, %request_id, "Saving salt");
        match self.exchange(&message, cancel).await? {
            Message::SaltAck(ack) if ack.request_id == request_id => Ok(()),
            Message::SaltAck(_) => Err(ProtocolError::RequestMismatch(request_id)),
            other => Err(unexpected(other)),
        }
    }

    /// Send one message and wait for one reply, bounded by the timeout and
    /// the cancellation token. The connection is always closed afterwards.
    async fn exchange(
        &self,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<Message, ProtocolError> {
        let bytes = message.to_bytes()?;

        let round_trip = async {
            self.transport.connect(&self.server_address).await?;
            self.transport.send(&bytes).await?;
            self.transport.recv().await
        };

        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProtocolError::Cancelled),
            result = tokio::time::timeout(self.timeout, round_trip) => match result {
                Ok(Ok(data)) => Ok(data),
                Ok(Err(e)) => Err(ProtocolError::Transport(e)),
                Err(_) => Err(ProtocolError::Timeout(self.timeout)),
            },
        };

        if self.transport.is_connected() {
            if let Err(e) = self.transport.close().await {
                tracing::warn!(error = %e, "Failed to close connection");
            }
        }

        let data = received?;
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::TooLarge(data.len()));
        }

        match Message::from_bytes(&data)? {
            Message::Fault(fault) => {
                tracing::warn!(code = ?fault.code, message = %fault.message, "Server fault");
                Err(ProtocolError::Fault {
                    code: fault.code,
                    message: fault.message,
                })
            }
            reply => Ok(reply),
        }
    }
}

fn unexpected(message: Message) -> ProtocolError {
    ProtocolError::UnexpectedMessage(message.kind())
}

fn seal_all(records: &[DirtyRecord], key: &RecordKey) -> Result<Vec<OutgoingRecord>, ProtocolError> {
    records.iter().map(|r| seal(r, key)).collect()
}

fn seal(record: &DirtyRecord, key: &RecordKey) -> Result<OutgoingRecord, ProtocolError> {
    let deleted = record.reason == DirtyReason::Deleted;
    let sealed = match (&record.payload, deleted) {
        (Some(payload), false) => {
            let plain =
                rmp_serde::to_vec(payload).map_err(|e| ProtocolError::Encode(e.to_string()))?;
            Some(
                key.seal(&plain)
                    .map_err(|e: CryptoError| ProtocolError::Encode(e.to_string()))?,
            )
        }
        _ => None,
    };
    Ok(OutgoingRecord {
        local_id: record.local_id,
        server_id: record.server_id,
        deleted,
        sealed,
    })
}

fn open_all(
    entity: EntityType,
    records: Vec<IncomingRecord>,
    key: &RecordKey,
) -> Result<Vec<ServerRecord>, ProtocolError> {
    records.into_iter().map(|r| open(entity, r, key)).collect()
}

fn open(
    entity: EntityType,
    record: IncomingRecord,
    key: &RecordKey,
) -> Result<ServerRecord, ProtocolError> {
    let server_id = record.server_id;
    if record.deleted {
        return Ok(ServerRecord {
            server_id,
            deleted: true,
            payload: None,
        });
    }

    let sealed = record.sealed.ok_or_else(|| ProtocolError::Payload {
        entity,
        server_id,
        detail: "live record without payload".to_string(),
    })?;
    let plain = key
        .open(&sealed)
        .map_err(|_| ProtocolError::Decrypt { entity, server_id })?;
    let payload: WirePayload =
        rmp_serde::from_slice(&plain).map_err(|e| ProtocolError::Payload {
            entity,
            server_id,
            detail: e.to_string(),
        })?;
    if payload.entity_type() != entity {
        return Err(ProtocolError::Payload {
            entity,
            server_id,
            detail: format!("payload is a {}", payload.entity_type()),
        });
    }

    Ok(ServerRecord {
        server_id,
        deleted: false,
        payload: Some(payload),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::AccountSecret;
    use crate::transport::MockTransport;
    use sync_types::{Group, LocalId, Marker, SaltAck, SyncResponse, WireContact};

    fn account() -> Account {
        Account::new("alice@example.com", "org.contactsync")
    }

    fn key() -> RecordKey {
        RecordKey::derive(&AccountSecret::random().unwrap()).unwrap()
    }

    fn client(transport: &MockTransport) -> SyncProtocolClient<MockTransport> {
        SyncProtocolClient::new(transport.clone(), "server:443", Duration::from_secs(5))
    }

    fn options() -> RoundOptions {
        RoundOptions {
            anchors: SyncAnchor::default(),
            request_restrictions: false,
            explicit_photo_save: false,
        }
    }

    fn new_group_dirty_set() -> DirtySet {
        DirtySet {
            groups: vec![DirtyRecord {
                local_id: LocalId::new(1),
                server_id: None,
                reason: DirtyReason::Created,
                revision: 1,
                payload: Some(WirePayload::Group(Group::new("Family"))),
            }],
            contacts: vec![],
            sync_contacts: false,
            group_id_requests: vec![LocalId::new(1)],
            contact_id_requests: vec![],
        }
    }

    fn sealed(key: &RecordKey, payload: &WirePayload) -> Vec<u8> {
        key.seal(&rmp_serde::to_vec(payload).unwrap()).unwrap()
    }

    // ===========================================
    // Happy Path Tests
    // ===========================================

    #[tokio::test]
    async fn sync_round_trip_opens_payloads() {
        let transport = MockTransport::new();
        let key = key();
        let payload = WirePayload::Contact(WireContact {
            display_name: "Ada".into(),
            ..WireContact::default()
        });
        let blob = sealed(&key, &payload);
        transport.set_responder(move |sent| {
            let request = match Message::from_bytes(sent).ok()? {
                Message::SyncRequest(r) => r,
                _ => return None,
            };
            let mut group_ids = IdMap::new();
            group_ids.insert(LocalId::new(1), ServerId::new(900));
            let response = SyncResponse {
                request_id: request.request_id,
                anchors: AnchorUpdate {
                    contact: None,
                    group: Some(Marker::new(1)),
                },
                contacts: vec![IncomingRecord {
                    server_id: ServerId::new(44),
                    deleted: false,
                    sealed: Some(blob.clone()),
                }],
                group_ids,
                ..SyncResponse::default()
            };
            Message::SyncResponse(response).to_bytes().ok()
        });

        let response = client(&transport)
            .sync(
                &account(),
                "tok",
                &new_group_dirty_set(),
                options(),
                &key,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(response.anchors.group, Some(Marker::new(1)));
        assert_eq!(response.group_ids.get(LocalId::new(1)), Some(ServerId::new(900)));
        let contacts = response.open_deltas(EntityType::Contact, &key).unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].payload, Some(payload));
        assert_eq!(transport.connected_address(), Some("server:443".to_string()));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn save_salt_expects_matching_ack() {
        let transport = MockTransport::new();
        transport.set_responder(|sent| match Message::from_bytes(sent).ok()? {
            Message::SaveSalt(s) => Message::SaltAck(SaltAck {
                request_id: s.request_id,
            })
            .to_bytes()
            .ok(),
            _ => None,
        });
        let salt = Salt::random().unwrap();
        client(&transport)
            .save_salt(&account(), "tok", &salt, &CancellationToken::new())
            .await
            .unwrap();

        match Message::from_bytes(&transport.last_sent().unwrap()).unwrap() {
            Message::SaveSalt(s) => assert_eq!(s.salt, salt.as_bytes().to_vec()),
            other => panic!("Expected SaveSalt, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn sync_request_carries_sealed_records() {
        let transport = MockTransport::new();
        let key = key();
        transport.queue_response(
            Message::SyncResponse(SyncResponse::default())
                .to_bytes()
                .unwrap(),
        );

        // The queued response has a default request id, so the round fails
        // with a mismatch after the request has been captured.
        let result = client(&transport)
            .sync(
                &account(),
                "tok",
                &new_group_dirty_set(),
                options(),
                &key,
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(ProtocolError::RequestMismatch(_))));

        let sent = Message::from_bytes(&transport.last_sent().unwrap()).unwrap();
        let request = match sent {
            Message::SyncRequest(r) => r,
            other => panic!("Expected SyncRequest, got {:?}", other),
        };
        assert_eq!(request.auth_token, "tok");
        assert!(!request.sync_contacts);
        assert_eq!(request.group_id_requests, vec![LocalId::new(1)]);

        let sealed = request.groups[0].sealed.as_ref().unwrap();
        let plain = key.open(sealed).unwrap();
        let payload: WirePayload = rmp_serde::from_slice(&plain).unwrap();
        assert_eq!(payload, WirePayload::Group(Group::new("Family")));
        assert!(!transport.is_connected());
    }

    // ===========================================
    // Failure Kind Tests
    // ===========================================

    #[tokio::test]
    async fn connect_failure_is_network() {
        let transport = MockTransport::new();
        transport.fail_next_connect("refused");
        let err = client(&transport)
            .sync(
                &account(),
                "tok",
                &DirtySet::default(),
                options(),
                &key(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
    }

    #[tokio::test]
    async fn fault_maps_by_code() {
        for (code, kind) in [
            (FaultCode::Unauthorized, ErrorKind::Auth),
            (FaultCode::Internal, ErrorKind::Server),
            (FaultCode::Unavailable, ErrorKind::Server),
        ] {
            let transport = MockTransport::new();
            transport.queue_response(
                Message::Fault(sync_types::Fault {
                    request_id: None,
                    code,
                    message: "nope".into(),
                })
                .to_bytes()
                .unwrap(),
            );
            let err = client(&transport)
                .sync(
                    &account(),
                    "tok",
                    &DirtySet::default(),
                    options(),
                    &key(),
                    &CancellationToken::new(),
                )
                .await
                .unwrap_err();
            assert_eq!(err.kind(), kind);
        }
    }

    #[tokio::test]
    async fn garbage_response_is_parse() {
        let transport = MockTransport::new();
        transport.queue_response(vec![0xC1, 0xC1]);
        let err = client(&transport)
            .sync(
                &account(),
                "tok",
                &DirtySet::default(),
                options(),
                &key(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[tokio::test]
    async fn unexpected_message_is_parse() {
        let transport = MockTransport::new();
        transport.queue_response(
            Message::SaltAck(SaltAck {
                request_id: RequestId::new(),
            })
            .to_bytes()
            .unwrap(),
        );
        let err = client(&transport)
            .sync(
                &account(),
                "tok",
                &DirtySet::default(),
                options(),
                &key(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedMessage("SaltAck")));
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_server_times_out() {
        let transport = MockTransport::new();
        transport.stall_next_recv();
        let err = client(&transport)
            .sync(
                &account(),
                "tok",
                &DirtySet::default(),
                options(),
                &key(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout(_)));
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn cancellation_wins() {
        let transport = MockTransport::new();
        transport.stall_next_recv();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client(&transport)
            .sync(
                &account(),
                "tok",
                &DirtySet::default(),
                options(),
                &key(),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Cancelled));
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    // ===========================================
    // Payload Opening Tests
    // ===========================================

    #[tokio::test]
    async fn sync_leaves_foreign_deltas_sealed() {
        let transport = MockTransport::new();
        let foreign = sealed(&key(), &WirePayload::Group(Group::new("x")));
        transport.set_responder(move |sent| {
            let request = match Message::from_bytes(sent).ok()? {
                Message::SyncRequest(r) => r,
                _ => return None,
            };
            Message::SyncResponse(SyncResponse {
                request_id: request.request_id,
                groups: vec![IncomingRecord {
                    server_id: ServerId::new(7),
                    deleted: false,
                    sealed: Some(foreign.clone()),
                }],
                directive: Some(SyncDirective::InvalidKey),
                ..SyncResponse::default()
            })
            .to_bytes()
            .ok()
        });

        let key = key();
        let response = client(&transport)
            .sync(
                &account(),
                "tok",
                &DirtySet::default(),
                options(),
                &key,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(response.directive, Some(SyncDirective::InvalidKey));
        assert_eq!(response.deltas(EntityType::ContactGroup).len(), 1);
        let err = response
            .open_deltas(EntityType::ContactGroup, &key)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidKey);
    }

    #[test]
    fn open_rejects_foreign_key() {
        let record = IncomingRecord {
            server_id: ServerId::new(7),
            deleted: false,
            sealed: Some(sealed(&key(), &WirePayload::Group(Group::new("x")))),
        };
        let err = open(EntityType::ContactGroup, record, &key()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidKey);
    }

    #[test]
    fn open_rejects_wrong_entity() {
        let key = key();
        let record = IncomingRecord {
            server_id: ServerId::new(7),
            deleted: false,
            sealed: Some(sealed(&key, &WirePayload::Group(Group::new("x")))),
        };
        let err = open(EntityType::Contact, record, &key).unwrap_err();
        assert!(matches!(err, ProtocolError::Payload { .. }));
    }

    #[test]
    fn open_deleted_ignores_payload() {
        let record = IncomingRecord {
            server_id: ServerId::new(7),
            deleted: true,
            sealed: Some(vec![1, 2, 3]),
        };
        let opened = open(EntityType::Contact, record, &key()).unwrap();
        assert!(opened.deleted);
        assert!(opened.payload.is_none());
    }

    #[test]
    fn deleted_records_are_sent_without_payload() {
        let record = DirtyRecord {
            local_id: LocalId::new(3),
            server_id: Some(ServerId::new(30)),
            reason: DirtyReason::Deleted,
            revision: 2,
            payload: None,
        };
        let out = seal(&record, &key()).unwrap();
        assert!(out.deleted);
        assert!(out.sealed.is_none());
    }

    #[test]
    fn response_accessors() {
        let mut response = RoundResponse::default();
        response.group_ids.insert(LocalId::new(1), ServerId::new(2));
        response.anchors.group = Some(Marker::new(5));
        assert_eq!(response.id_map(EntityType::ContactGroup).len(), 1);
        assert!(response.id_map(EntityType::Contact).is_empty());
        assert!(response.deltas(EntityType::Contact).is_empty());
    }
}
