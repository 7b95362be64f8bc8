//! Keeps the full-text index in step with committed transactions.
//!
//! A `Session` records every mutation of an entity in `PendingChanges`. Its
//! commit routine hands that log to `CommitHooks::run_commit`, which
//!
//! 1. right before the commit, folds the log into one `ChangeSet` per
//!    collection that has observers registered,
//! 2. commits,
//! 3. only when the commit succeeded, hands each `ChangeSet` to its observers.
//!
//! A failed or rolled back transaction never reaches step 3, so the index
//! never sees a mutation that did not land in the database. Index writes are
//! fire-and-forget: a failure leaves the index stale until the next change to
//! the same row or a `reindex`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::schema::{is_searchable, Entity};
use crate::store::RowSource;
use crate::Result;

use super::{IndexDocument, SearchIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
struct PendingChange {
    collection: &'static str,
    kind: ChangeKind,
    document: IndexDocument,
}

/// mutations made inside one open transaction, in the order they happened
#[derive(Debug, Default)]
pub struct PendingChanges {
    changes: Vec<PendingChange>,
}

impl PendingChanges {
    fn record<E: Entity>(&mut self, kind: ChangeKind, entity: &E) {
        self.changes.push(PendingChange {
            collection: E::COLLECTION,
            kind,
            document: IndexDocument::from_entity(entity),
        });
    }

    pub fn record_insert<E: Entity>(&mut self, entity: &E) {
        self.record(ChangeKind::Insert, entity);
    }

    pub fn record_update<E: Entity>(&mut self, entity: &E) {
        self.record(ChangeKind::Update, entity);
    }

    pub fn record_delete<E: Entity>(&mut self, entity: &E) {
        self.record(ChangeKind::Delete, entity);
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// net effect of one transaction on one collection
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub collection: &'static str,
    pub added: Vec<IndexDocument>,
    pub updated: Vec<IndexDocument>,
    pub deleted: Vec<IndexDocument>,
}

/// where a row stands after all the changes seen so far
enum NetChange {
    Added(IndexDocument),
    Updated(IndexDocument),
    Deleted(IndexDocument),
    /// inserted and deleted in the same transaction
    Vanished,
}

impl ChangeSet {
    /// folds the log so every row appears at most once
    pub fn diff(pending: &PendingChanges, collection: &'static str) -> Self {
        let mut order: Vec<i64> = Vec::new();
        let mut net: HashMap<i64, NetChange> = HashMap::new();

        let changes = pending.changes.iter();
        for change in changes.filter(|c| c.collection == collection) {
            let id = change.document.id;
            let document = change.document.clone();
            let next = match (net.remove(&id), change.kind) {
                (None, ChangeKind::Insert) => NetChange::Added(document),
                (None, ChangeKind::Update) => NetChange::Updated(document),
                (None, ChangeKind::Delete) => NetChange::Deleted(document),
                (Some(NetChange::Added(_)), ChangeKind::Insert | ChangeKind::Update) => {
                    NetChange::Added(document)
                }
                (Some(NetChange::Added(_)), ChangeKind::Delete) => NetChange::Vanished,
                (Some(NetChange::Updated(_)), ChangeKind::Delete) => NetChange::Deleted(document),
                (Some(NetChange::Updated(_) | NetChange::Deleted(_)), _) => {
                    NetChange::Updated(document)
                }
                (Some(NetChange::Vanished), ChangeKind::Insert) => NetChange::Added(document),
                (Some(NetChange::Vanished), _) => NetChange::Vanished,
            };
            if !order.contains(&id) {
                order.push(id);
            }
            net.insert(id, next);
        }

        let mut change_set = ChangeSet {
            collection,
            added: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        };
        for id in order {
            match net.remove(&id) {
                Some(NetChange::Added(document)) => change_set.added.push(document),
                Some(NetChange::Updated(document)) => change_set.updated.push(document),
                Some(NetChange::Deleted(document)) => change_set.deleted.push(document),
                Some(NetChange::Vanished) | None => (),
            }
        }
        change_set
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// receives the net changes of a collection once they are durable
#[async_trait]
pub trait CommitObserver: Send + Sync {
    async fn after_commit(&self, changes: &ChangeSet);
}

/// change sets computed before a commit, waiting for it to succeed
pub struct StagedChanges {
    batches: Vec<(Arc<dyn CommitObserver>, ChangeSet)>,
}

/// observers registered per collection, run by the transaction commit routine
#[derive(Default)]
pub struct CommitHooks {
    observers: Vec<(&'static str, Arc<dyn CommitObserver>)>,
}

impl CommitHooks {
    pub fn register<E: Entity>(&mut self, observer: Arc<dyn CommitObserver>) {
        if !is_searchable::<E>() {
            tracing::warn!(
                "{} has no searchable fields, its documents will be empty",
                E::COLLECTION
            );
        }
        self.observers.push((E::COLLECTION, observer));
    }

    /// pre-commit step
    pub fn before_commit(&self, pending: &PendingChanges) -> StagedChanges {
        let batches = self
            .observers
            .iter()
            .map(|(collection, observer)| {
                (observer.clone(), ChangeSet::diff(pending, *collection))
            })
            .filter(|(_, changes)| !changes.is_empty())
            .collect();
        StagedChanges { batches }
    }

    /// post-commit step, only ever called after a successful commit
    pub async fn after_commit(&self, staged: StagedChanges) {
        for (observer, changes) in staged.batches {
            observer.after_commit(&changes).await;
        }
    }

    /// runs `commit` between the two hook points. when `commit` fails the staged
    /// change sets are dropped and the error is returned untouched
    pub async fn run_commit<F>(&self, pending: PendingChanges, commit: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send,
    {
        let staged = self.before_commit(&pending);
        drop(pending);
        commit.await?;
        self.after_commit(staged).await;
        Ok(())
    }
}

/// projects committed changes of searchable entities into the index and
/// answers searches with rows in relevance order
pub struct IndexSync {
    index: SearchIndex,
}

impl IndexSync {
    pub fn new(index: SearchIndex) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &SearchIndex {
        &self.index
    }

    /// rows matching `query`, in exactly the order the index ranked them
    pub async fn search<E, R>(
        &self,
        rows: &R,
        query: &str,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<E>, u64)>
    where
        E: Entity,
        R: RowSource<E> + ?Sized,
    {
        let (ids, total) = self
            .index
            .index_query(E::COLLECTION, query, page, page_size)
            .await;
        if total == 0 || ids.is_empty() {
            return Ok((Vec::new(), total));
        }

        let mut by_id: HashMap<i64, E> = rows
            .fetch_by_ids(&ids)
            .await?
            .into_iter()
            .map(|row| (row.id(), row))
            .collect();
        // ids can outlive their rows until the delete reaches the index
        let ordered = ids.iter().filter_map(|id| by_id.remove(id)).collect();
        Ok((ordered, total))
    }

    /// pushes every current row to the index. used to bootstrap an empty index
    pub async fn reindex<E, R>(&self, rows: &R) -> Result<usize>
    where
        E: Entity,
        R: RowSource<E> + ?Sized,
    {
        let all = rows.fetch_all().await?;
        for row in &all {
            self.index
                .index_upsert(E::COLLECTION, &IndexDocument::from_entity(row))
                .await;
        }
        tracing::info!("reindexed {} rows of {}", all.len(), E::COLLECTION);
        Ok(all.len())
    }
}

#[async_trait]
impl CommitObserver for IndexSync {
    async fn after_commit(&self, changes: &ChangeSet) {
        tracing::debug!(
            "syncing {} to the index, added: {}, updated: {}, deleted: {}",
            changes.collection,
            changes.added.len(),
            changes.updated.len(),
            changes.deleted.len()
        );
        for document in changes.added.iter().chain(&changes.updated) {
            self.index.index_upsert(changes.collection, document).await;
        }
        for document in &changes.deleted {
            self.index.index_remove(changes.collection, document.id).await;
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;

    use super::*;
    use crate::search::MemoryIndex;
    use crate::store::memory::MemoryStore;
    use crate::types::{Post, UserId};

    fn post(id: i64, body: &str) -> Post {
        Post {
            id,
            body: body.to_string(),
            timestamp: Utc::now(),
            user_id: UserId(1),
            language: None,
        }
    }

    fn memory_sync() -> (Arc<IndexSync>, Arc<CommitHooks>) {
        let sync = Arc::new(IndexSync::new(SearchIndex::new(Arc::new(
            MemoryIndex::default(),
        ))));
        let mut hooks = CommitHooks::default();
        hooks.register::<Post>(sync.clone());
        (sync, Arc::new(hooks))
    }

    fn ids(posts: &[Post]) -> Vec<i64> {
        posts.iter().map(|p| p.id).collect()
    }

    #[derive(Default)]
    struct CountingObserver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CommitObserver for CountingObserver {
        async fn after_commit(&self, _changes: &ChangeSet) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn insert_then_update_is_still_an_add_with_the_latest_fields() {
        let mut pending = PendingChanges::default();
        pending.record_insert(&post(1, "draft"));
        pending.record_update(&post(1, "final"));
        let changes = ChangeSet::diff(&pending, "post");
        assert_eq!(changes.added.len(), 1);
        assert_eq!(changes.added[0].fields["body"], "final");
        assert!(changes.updated.is_empty());
    }

    #[test]
    fn insert_then_delete_cancels_out() {
        let mut pending = PendingChanges::default();
        pending.record_insert(&post(1, "oops"));
        pending.record_delete(&post(1, "oops"));
        assert!(ChangeSet::diff(&pending, "post").is_empty());
    }

    #[test]
    fn repeated_updates_collapse_and_update_then_delete_is_a_delete() {
        let mut pending = PendingChanges::default();
        pending.record_update(&post(1, "a"));
        pending.record_update(&post(1, "b"));
        pending.record_update(&post(2, "c"));
        pending.record_delete(&post(2, "c"));
        let changes = ChangeSet::diff(&pending, "post");
        assert_eq!(changes.updated.len(), 1);
        assert_eq!(changes.updated[0].fields["body"], "b");
        assert_eq!(changes.deleted.len(), 1);
        assert_eq!(changes.deleted[0].id, 2);
    }

    #[test]
    fn other_collections_are_not_part_of_the_change_set() {
        let mut pending = PendingChanges::default();
        pending.record_insert(&post(1, "a"));
        assert!(ChangeSet::diff(&pending, "message").is_empty());
    }

    #[tokio::test]
    async fn failed_commit_reaches_no_observer() {
        let observer = Arc::new(CountingObserver::default());
        let mut hooks = CommitHooks::default();
        hooks.register::<Post>(observer.clone());

        let mut pending = PendingChanges::default();
        pending.record_insert(&post(1, "never lands"));
        let result = hooks
            .run_commit(pending, async {
                Err(crate::Error::IndexBackend("serialization failure".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(observer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_transaction_does_not_notify() {
        let observer = Arc::new(CountingObserver::default());
        let mut hooks = CommitHooks::default();
        hooks.register::<Post>(observer.clone());
        hooks
            .run_commit(PendingChanges::default(), async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(observer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rolled_back_session_writes_nothing_to_the_index() {
        let (sync, hooks) = memory_sync();
        let store = MemoryStore::default();

        let mut session = store.session(hooks.clone());
        session.insert_post(UserId(1), "rolled back words");
        session.rollback();

        let mut session = store.session(hooks.clone());
        session.insert_post(UserId(1), "failed commit words");
        assert!(session.commit_failing().await.is_err());

        let hits = sync.index().index_query("post", "words", 1, 10).await;
        assert_eq!(hits, (vec![], 0));
        assert!(store.all_posts().is_empty());
    }

    #[tokio::test]
    async fn hello_and_goodbye_world() {
        let (sync, hooks) = memory_sync();
        let store = MemoryStore::default();

        let mut session = store.session(hooks.clone());
        let p1 = session.insert_post(UserId(1), "hello world");
        let p2 = session.insert_post(UserId(1), "goodbye world");
        session.commit().await.unwrap();

        let (ranked, index_total) = sync.index().index_query("post", "world", 1, 10).await;
        let (posts, total) = sync
            .search::<Post, _>(&store, "world", 1, 10)
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(index_total, 2);
        assert_eq!(ids(&posts), ranked);
        assert!(ranked.contains(&p1.id) && ranked.contains(&p2.id));

        let mut session = store.session(hooks.clone());
        session.delete_post(p1.id);
        session.commit().await.unwrap();

        let (posts, total) = sync
            .search::<Post, _>(&store, "world", 1, 10)
            .await
            .unwrap();
        assert_eq!(ids(&posts), vec![p2.id]);
        assert_eq!(total, 1);
        let (posts, total) = sync
            .search::<Post, _>(&store, "hello", 1, 10)
            .await
            .unwrap();
        assert!(posts.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn updated_post_is_reindexed_with_new_body() {
        let (sync, hooks) = memory_sync();
        let store = MemoryStore::default();

        let mut session = store.session(hooks.clone());
        let post = session.insert_post(UserId(1), "typo in here");
        session.commit().await.unwrap();

        let mut session = store.session(hooks.clone());
        session.update_post(post.id, "fixed in here");
        session.commit().await.unwrap();

        assert_eq!(sync.index().index_query("post", "typo", 1, 10).await.1, 0);
        assert_eq!(
            sync.index().index_query("post", "fixed", 1, 10).await.0,
            vec![post.id]
        );
    }

    #[tokio::test]
    async fn search_keeps_index_order_not_row_order() {
        let (sync, hooks) = memory_sync();
        let store = MemoryStore::default();

        let mut session = store.session(hooks.clone());
        // shortest body has the densest match and so ranks first
        let long = session.insert_post(UserId(1), "rust and a lot of other words");
        let short = session.insert_post(UserId(1), "rust");
        let medium = session.insert_post(UserId(1), "rust is fun");
        session.commit().await.unwrap();

        store.reverse_row_order();
        let (posts, total) = sync.search::<Post, _>(&store, "rust", 1, 10).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(ids(&posts), vec![short.id, medium.id, long.id]);
    }

    #[tokio::test]
    async fn no_hits_never_touch_the_database() {
        let (sync, _hooks) = memory_sync();
        let store = MemoryStore::default();
        let (posts, total) = sync
            .search::<Post, _>(&store, "anything", 1, 10)
            .await
            .unwrap();
        assert!(posts.is_empty());
        assert_eq!(total, 0);
        assert_eq!(store.row_fetches(), 0);
    }

    #[tokio::test]
    async fn rows_deleted_behind_the_index_are_skipped() {
        let (sync, hooks) = memory_sync();
        let store = MemoryStore::default();
        let mut session = store.session(hooks.clone());
        let kept = session.insert_post(UserId(1), "stale entry");
        let gone = session.insert_post(UserId(1), "stale entry too");
        session.commit().await.unwrap();

        store.remove_row_behind_the_index(gone.id);
        let (posts, total) = sync
            .search::<Post, _>(&store, "stale", 1, 10)
            .await
            .unwrap();
        assert_eq!(ids(&posts), vec![kept.id]);
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn reindex_reproduces_incremental_ranking() {
        let (incremental, hooks) = memory_sync();
        let store = MemoryStore::default();
        let mut session = store.session(hooks.clone());
        session.insert_post(UserId(1), "the quick brown fox");
        session.insert_post(UserId(2), "fox fox");
        session.insert_post(UserId(3), "a fox and a hound");
        session.insert_post(UserId(3), "no match");
        session.commit().await.unwrap();

        let rebuilt = IndexSync::new(SearchIndex::new(Arc::new(MemoryIndex::default())));
        assert_eq!(rebuilt.reindex::<Post, _>(&store).await.unwrap(), 4);

        for query in ["fox", "hound", "quick brown"] {
            assert_eq!(
                rebuilt.index().index_query("post", query, 1, 10).await,
                incremental.index().index_query("post", query, 1, 10).await,
                "query `{query}`"
            );
        }
    }
}
