//! Tests against a running MongoDB deployment.
//!
//! Run with `MONGODB_URI=mongodb://localhost:27017 cargo test -p relset-mongodb -- --ignored`.
//! Each test works in its own relation and drops its collection afterwards.

use bson::{Document, doc, oid::ObjectId};
use mongodb::Client;
use relset_core::{
    backend::{MutationOutcome, SetBackend, SetBackendBuilder},
    condition::Guard,
    error::RelationshipStoreError,
    options::{AddOptions, ReadConsistency, RemoveOptions},
    store::RelationshipSetStore,
};
use relset_mongodb::MongoSetBackend;

const DATABASE: &str = "relset_test";

struct Fixture {
    client: Client,
    relation: String,
    store: RelationshipSetStore<MongoSetBackend>,
}

impl Fixture {
    async fn new() -> Self {
        let uri = std::env::var("MONGODB_URI").unwrap_or_else(|_| "mongodb://localhost:27017".into());
        let backend = MongoSetBackend::builder(&uri, DATABASE)
            .build()
            .await
            .expect("MongoDB connection failed");
        let relation = format!("follows{}", ObjectId::new().to_hex());

        Self {
            client: Client::with_uri_str(&uri).await.expect("MongoDB connection failed"),
            store: RelationshipSetStore::new(backend, relation.as_str()),
            relation,
        }
    }

    fn collection(&self) -> mongodb::Collection<Document> {
        self.client
            .database(DATABASE)
            .collection(&format!("rel_{}", self.relation))
    }

    async fn stored(&self, owner: &str) -> Option<Document> {
        self.collection()
            .find_one(doc! { "_id": owner })
            .await
            .expect("find_one failed")
    }

    async fn teardown(self) {
        self.collection().drop().await.expect("drop failed");
        self.store.shutdown().await.expect("shutdown failed");
    }
}

#[tokio::test]
#[ignore = "requires running MongoDB"]
async fn test_last_remove_deletes_document() {
    let fixture = Fixture::new().await;
    let store = &fixture.store;

    store.add("U1", "F1", AddOptions::new()).await.unwrap();
    store.add("U1", "F2", AddOptions::new()).await.unwrap();
    assert_eq!(
        fixture.stored("U1").await,
        Some(doc! { "_id": "U1", "members": ["F1", "F2"] })
    );

    store.remove("U1", "F1", RemoveOptions::new()).await.unwrap();
    assert_eq!(
        fixture.stored("U1").await,
        Some(doc! { "_id": "U1", "members": ["F2"] })
    );

    store.remove("U1", "F2", RemoveOptions::new()).await.unwrap();
    assert_eq!(fixture.stored("U1").await, None);
    assert!(store.list("U1").await.unwrap().is_empty());

    // Removing from an absent owner is a no-op.
    store.remove("U1", "F2", RemoveOptions::new()).await.unwrap();
    assert_eq!(fixture.stored("U1").await, None);

    fixture.teardown().await;
}

#[tokio::test]
#[ignore = "requires running MongoDB"]
async fn test_require_existing_changes_nothing() {
    let fixture = Fixture::new().await;
    let store = &fixture.store;
    let strict = RemoveOptions::new().require_existing(true);

    let err = store.remove("U1", "F1", strict).await.unwrap_err();
    assert!(matches!(err, RelationshipStoreError::NotFound { .. }));
    assert_eq!(fixture.stored("U1").await, None);

    store.add("U1", "F1", AddOptions::new()).await.unwrap();
    let err = store.remove("U1", "F2", strict).await.unwrap_err();
    assert!(matches!(err, RelationshipStoreError::NotFound { .. }));
    assert_eq!(
        fixture.stored("U1").await,
        Some(doc! { "_id": "U1", "members": ["F1"] })
    );

    store.remove("U1", "F1", strict).await.unwrap();
    assert_eq!(fixture.stored("U1").await, None);

    fixture.teardown().await;
}

#[tokio::test]
#[ignore = "requires running MongoDB"]
async fn test_capacity_rejects_next_distinct_add() {
    let fixture = Fixture::new().await;
    let store = &fixture.store;
    let capped = AddOptions::new().max_size(2);

    store.add("U1", "F1", capped).await.unwrap();
    store.add("U1", "F2", capped).await.unwrap();

    let err = store.add("U1", "F3", capped).await.unwrap_err();
    assert_eq!(
        err,
        RelationshipStoreError::CapacityExceeded {
            owner: "U1".into(),
            max_size: 2
        }
    );
    store.add("U1", "F2", capped).await.unwrap();
    assert_eq!(store.list("U1").await.unwrap().len(), 2);

    let err = store
        .add("U2", "F1", AddOptions::new().max_size(0))
        .await
        .unwrap_err();
    assert!(matches!(err, RelationshipStoreError::CapacityExceeded { .. }));
    assert_eq!(fixture.stored("U2").await, None);

    fixture.teardown().await;
}

#[tokio::test]
#[ignore = "requires running MongoDB"]
async fn test_guarded_add_on_existing_document() {
    let fixture = Fixture::new().await;
    let backend = fixture.store.backend();
    let relation = fixture.relation.as_str();

    // The guard admits an absent document, so the first add upserts.
    let outcome = backend
        .add_member(relation, "U1", "F1", Some(Guard::size_below(1)))
        .await
        .unwrap();
    assert_eq!(outcome, MutationOutcome::Applied);

    // The upsert now collides with the existing document and the guard decides.
    let outcome = backend
        .add_member(relation, "U1", "F2", Some(Guard::size_below(1)))
        .await
        .unwrap();
    assert_eq!(outcome, MutationOutcome::Rejected);

    let outcome = backend
        .add_member(relation, "U1", "F2", Some(Guard::lacks_member("F2")))
        .await
        .unwrap();
    assert_eq!(outcome, MutationOutcome::Applied);

    // A guard that rejects an absent document never creates one.
    let outcome = backend
        .add_member(relation, "U2", "F1", Some(Guard::exists()))
        .await
        .unwrap();
    assert_eq!(outcome, MutationOutcome::Rejected);
    assert_eq!(fixture.stored("U2").await, None);

    let item = backend
        .get_item(relation, "U1", ReadConsistency::Strong)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.members().iter().collect::<Vec<_>>(), vec!["F1", "F2"]);

    fixture.teardown().await;
}

#[tokio::test]
#[ignore = "requires running MongoDB"]
async fn test_add_new_and_contains() {
    let fixture = Fixture::new().await;
    let store = &fixture.store;

    assert!(store.add_new("U1", "F1", AddOptions::new()).await.unwrap());
    assert!(!store.add_new("U1", "F1", AddOptions::new()).await.unwrap());
    assert!(store.contains("U1", "F1").await.unwrap());
    assert!(!store.contains("U1", "F2").await.unwrap());
    assert!(
        store
            .check("U2", Guard::lacks_member("F1"), ReadConsistency::Strong)
            .await
            .unwrap()
    );

    fixture.teardown().await;
}

#[tokio::test]
#[ignore = "requires running MongoDB"]
async fn test_ttl_is_stored_as_datetime() {
    let fixture = Fixture::new().await;
    let store = &fixture.store;
    store.prepare().await.unwrap();

    let ttl = chrono::Utc::now() + chrono::Duration::days(1);
    let err = store.set_ttl("U1", Some(ttl)).await.unwrap_err();
    assert!(matches!(err, RelationshipStoreError::ItemNotFound { .. }));

    store.add("U1", "F1", AddOptions::new()).await.unwrap();
    store.set_ttl("U1", Some(ttl)).await.unwrap();

    let stored = fixture.stored("U1").await.unwrap();
    assert!(stored.get_datetime("ttl").is_ok());

    let item = store
        .backend()
        .get_item(&fixture.relation, "U1", ReadConsistency::Strong)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        item.ttl.map(|ttl| ttl.timestamp_millis()),
        Some(ttl.timestamp_millis())
    );

    fixture.teardown().await;
}
