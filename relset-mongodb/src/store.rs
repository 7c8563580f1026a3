use async_trait::async_trait;
use bson::{DateTime as BsonDateTime, Document, doc};
use chrono::{DateTime, Utc};
use mongodb::{
    Client, Collection as MongoCollection, IndexModel,
    error::{Error as MongoError, ErrorKind, RETRYABLE_WRITE_ERROR, WriteFailure},
    options::{
        Acknowledgment, ClientOptions, CollectionOptions, IndexOptions, ReadConcern,
        ReadPreference, SelectionCriteria, WriteConcern,
    },
};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use relset_core::{
    backend::{MutationOutcome, SetBackend, SetBackendBuilder},
    condition::Condition,
    error::{RelationshipStoreError, RelationshipStoreResult},
    item::{MEMBERS_ATTRIBUTE, OWNER_ATTRIBUTE, RelationshipItem, TTL_ATTRIBUTE},
    options::ReadConsistency,
};

use crate::{filter::MongoGuardTranslator, sanitizer::RelationNameSanitizer};

/// Upper bound on delete/pull/classify rounds of one remove.
pub const REMOVE_ATTEMPTS_MAX: u32 = 8;

const DUPLICATE_KEY: i32 = 11000;
/// Rate limiting codes (request rate too large, ingress rate limit).
const THROTTLED_CODES: [i32; 2] = [16500, 462];
/// Failover, shutdown and timeout codes.
const UNAVAILABLE_CODES: [i32; 8] = [50, 89, 91, 189, 262, 10107, 11600, 13436];

/// MongoDB relationship set backend.
///
/// Every relation is stored in its own collection, one document per owner:
/// `{ _id: <owner>, members: [<member>, ...], ttl?: <datetime> }`. Writes use majority write
/// concern; strong reads use majority read concern on the primary and eventual reads
/// prefer secondaries.
///
/// Adds are one `update_one` carrying the guard in its filter. Removes delete the document
/// when the member is its sole element and `$pull` otherwise, so an emptied document is
/// never left behind.
#[derive(Debug, Clone)]
pub struct MongoSetBackend {
    client: Client,
    database: String,
}

impl MongoSetBackend {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoSetBackendBuilder {
        MongoSetBackendBuilder::new(dsn, database)
    }

    fn get_collection(
        &self,
        relation: &str,
        consistency: ReadConsistency,
    ) -> MongoCollection<Document> {
        let options = match consistency {
            ReadConsistency::Strong => CollectionOptions::builder()
                .selection_criteria(SelectionCriteria::ReadPreference(ReadPreference::Primary))
                .read_concern(ReadConcern::majority())
                .write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build())
                .build(),
            ReadConsistency::Eventual => CollectionOptions::builder()
                .selection_criteria(SelectionCriteria::ReadPreference(
                    ReadPreference::SecondaryPreferred {
                        options: Default::default(),
                    },
                ))
                .read_concern(ReadConcern::local())
                .build(),
        };

        self.client
            .database(&self.database)
            .collection_with_options(&RelationNameSanitizer::collection_name(relation), options)
    }

    fn write_collection(&self, relation: &str) -> MongoCollection<Document> {
        self.get_collection(relation, ReadConsistency::Strong)
    }

    async fn find_item(
        &self,
        relation: &str,
        owner: &str,
        consistency: ReadConsistency,
    ) -> RelationshipStoreResult<Option<RelationshipItem>> {
        self.get_collection(relation, consistency)
            .find_one(doc! { OWNER_ATTRIBUTE: owner })
            .await
            .map_err(classify_error)?
            .map(RelationshipItem::from_document)
            .transpose()
    }

    /// Applies `$addToSet` to an existing document only.
    async fn add_to_existing(
        &self,
        relation: &str,
        owner: &str,
        member: &str,
        guard: Option<&Condition>,
    ) -> RelationshipStoreResult<MutationOutcome> {
        let result = self
            .write_collection(relation)
            .update_one(
                MongoGuardTranslator::owner_filter(owner, guard)?,
                doc! { "$addToSet": { MEMBERS_ATTRIBUTE: member } },
            )
            .await
            .map_err(classify_error)?;

        Ok(if result.matched_count > 0 {
            MutationOutcome::Applied
        } else {
            MutationOutcome::Rejected
        })
    }

    async fn shutdown(self) -> RelationshipStoreResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

#[async_trait]
impl SetBackend for MongoSetBackend {
    #[instrument(skip(self, guard), fields(guarded = guard.is_some()))]
    async fn add_member(
        &self,
        relation: &str,
        owner: &str,
        member: &str,
        guard: Option<Condition>,
    ) -> RelationshipStoreResult<MutationOutcome> {
        let guard = guard.as_ref();

        // Without an upsert the server never creates a document the guard did not admit.
        if !guard.is_none_or(Condition::admits_absent) {
            return self.add_to_existing(relation, owner, member, guard).await;
        }

        let result = self
            .write_collection(relation)
            .update_one(
                MongoGuardTranslator::owner_filter(owner, guard)?,
                doc! { "$addToSet": { MEMBERS_ATTRIBUTE: member } },
            )
            .upsert(true)
            .await;

        match result {
            Ok(_) => Ok(MutationOutcome::Applied),
            // The guard rejected an existing document, or a concurrent add created it first.
            // Either way the document exists now, so the guard decides on it alone.
            Err(err) if is_duplicate_key(&err) => {
                debug!("guarded upsert hit an existing document");
                self.add_to_existing(relation, owner, member, guard).await
            }
            Err(err) => Err(classify_error(err)),
        }
    }

    #[instrument(skip(self, guard), fields(guarded = guard.is_some()))]
    async fn remove_member(
        &self,
        relation: &str,
        owner: &str,
        member: &str,
        guard: Option<Condition>,
    ) -> RelationshipStoreResult<MutationOutcome> {
        let guard = guard.as_ref();
        let collection = self.write_collection(relation);
        let owner_filter = MongoGuardTranslator::owner_filter(owner, guard)?;

        for attempt in 1..=REMOVE_ATTEMPTS_MAX {
            let sole_member = doc! {
                "$and": [
                    owner_filter.clone(),
                    { MEMBERS_ATTRIBUTE: [member] },
                ],
            };
            let deleted = collection
                .delete_one(sole_member)
                .await
                .map_err(classify_error)?;
            if deleted.deleted_count > 0 {
                debug!("removed last member, document deleted");
                return Ok(MutationOutcome::Applied);
            }

            let several_members = doc! {
                "$and": [
                    owner_filter.clone(),
                    { format!("{MEMBERS_ATTRIBUTE}.1"): { "$exists": true } },
                ],
            };
            let pulled = collection
                .update_one(several_members, doc! { "$pull": { MEMBERS_ATTRIBUTE: member } })
                .await
                .map_err(classify_error)?;
            if pulled.matched_count > 0 {
                return Ok(MutationOutcome::Applied);
            }

            // Neither write matched: the guard failed, the member is absent from a
            // single-member document, or the document changed between the two writes.
            let item = self
                .find_item(relation, owner, ReadConsistency::Strong)
                .await?;

            if !guard.is_none_or(|guard| guard.evaluate(item.as_ref())) {
                return Ok(MutationOutcome::Rejected);
            }
            if !item.is_some_and(|item| item.contains(member)) {
                return Ok(MutationOutcome::Applied);
            }

            warn!(attempt, "document changed during remove, retrying");
        }

        Err(RelationshipStoreError::Contended {
            owner: owner.to_string(),
            attempts: REMOVE_ATTEMPTS_MAX,
        })
    }

    #[instrument(skip(self))]
    async fn get_item(
        &self,
        relation: &str,
        owner: &str,
        consistency: ReadConsistency,
    ) -> RelationshipStoreResult<Option<RelationshipItem>> {
        self.find_item(relation, owner, consistency).await
    }

    #[instrument(skip(self))]
    async fn check(
        &self,
        relation: &str,
        owner: &str,
        condition: Condition,
        consistency: ReadConsistency,
    ) -> RelationshipStoreResult<bool> {
        let collection = self.get_collection(relation, consistency);

        let matched = collection
            .count_documents(MongoGuardTranslator::owner_filter(owner, Some(&condition))?)
            .limit(1)
            .await
            .map_err(classify_error)?;
        if matched > 0 {
            return Ok(true);
        }
        if !condition.admits_absent() {
            return Ok(false);
        }

        // The condition also holds for an absent document, so it holds unless one exists.
        let present = collection
            .count_documents(doc! { OWNER_ATTRIBUTE: owner })
            .limit(1)
            .await
            .map_err(classify_error)?;

        Ok(present == 0)
    }

    #[instrument(skip(self))]
    async fn set_ttl(
        &self,
        relation: &str,
        owner: &str,
        ttl: Option<DateTime<Utc>>,
    ) -> RelationshipStoreResult<MutationOutcome> {
        let update = match ttl {
            Some(ttl) => doc! { "$set": { TTL_ATTRIBUTE: BsonDateTime::from_chrono(ttl) } },
            None => doc! { "$unset": { TTL_ATTRIBUTE: "" } },
        };

        let result = self
            .write_collection(relation)
            .update_one(doc! { OWNER_ATTRIBUTE: owner }, update)
            .await
            .map_err(classify_error)?;

        Ok(if result.matched_count > 0 {
            MutationOutcome::Applied
        } else {
            MutationOutcome::Rejected
        })
    }

    /// Creates the TTL index that lets the server expire items. Idempotent.
    async fn prepare_relation(&self, relation: &str) -> RelationshipStoreResult<()> {
        self.write_collection(relation)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { TTL_ATTRIBUTE: 1 })
                    .options(
                        IndexOptions::builder()
                            .expire_after(Duration::ZERO)
                            .build()
                    )
                    .build()
            )
            .await
            .map_err(classify_error)?;

        Ok(())
    }

    async fn shutdown(self) -> RelationshipStoreResult<()> {
        self.shutdown().await
    }
}

fn is_duplicate_key(err: &MongoError) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => write_error.code == DUPLICATE_KEY,
        ErrorKind::Command(command_error) => command_error.code == DUPLICATE_KEY,
        _ => false,
    }
}

/// Maps a server error code onto the retriable part of the error taxonomy.
fn classify_code(code: i32, message: &str) -> Option<RelationshipStoreError> {
    if THROTTLED_CODES.contains(&code) {
        Some(RelationshipStoreError::Throttled(message.to_string()))
    } else if UNAVAILABLE_CODES.contains(&code) {
        Some(RelationshipStoreError::BackendUnavailable(message.to_string()))
    } else {
        None
    }
}

fn classify_error(err: MongoError) -> RelationshipStoreError {
    let message = err.to_string();
    let classified = match err.kind.as_ref() {
        ErrorKind::Io(_)
        | ErrorKind::ServerSelection { .. }
        | ErrorKind::ConnectionPoolCleared { .. } => {
            Some(RelationshipStoreError::BackendUnavailable(message.clone()))
        }
        ErrorKind::Command(command_error) => classify_code(command_error.code, &message),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => {
            classify_code(write_error.code, &message)
        }
        ErrorKind::Write(WriteFailure::WriteConcernError(concern_error)) => {
            classify_code(concern_error.code, &message)
        }
        _ => None,
    };

    classified.unwrap_or_else(|| {
        if err.contains_label(RETRYABLE_WRITE_ERROR) {
            RelationshipStoreError::BackendUnavailable(message)
        } else {
            RelationshipStoreError::Backend(message)
        }
    })
}

pub struct MongoSetBackendBuilder {
    dsn: String,
    database: String,
}

impl MongoSetBackendBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl SetBackendBuilder for MongoSetBackendBuilder {
    type Backend = MongoSetBackend;

    async fn build(self) -> RelationshipStoreResult<Self::Backend> {
        Ok(MongoSetBackend::new(
            Client::with_options(
                ClientOptions::parse(&self.dsn)
                    .await
                    .map_err(|e| RelationshipStoreError::Initialization(e.to_string()))?,
            )
            .map_err(|e| RelationshipStoreError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}
