//! Store facade: a pool, the write policy, and the change feed.
//!
//! Every write goes through a [`Session`], which owns exactly one SQLite
//! transaction. The module-level operations in [`catalog`], [`relation`],
//! [`images`] and [`media`] all take `&mut SqliteConnection`; the session
//! hands them its transaction and records what they touched. Committing
//! publishes a single [`ChangeSet`] to every subscriber. Dropping a session
//! without committing rolls the transaction back and publishes nothing.
//!
//! Sessions are serialized: [`Store::begin`] waits until no other session of
//! the same store is open. A deferred SQLite transaction that reads before
//! it writes cannot be upgraded while another writer holds the lock, and
//! fails with `SQLITE_BUSY` instead of waiting out the busy timeout.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};

use crate::aggregate;
use crate::catalog;
use crate::config::{Config, Policy};
use crate::db;
use crate::delete_queue::{self, DeleteEntry, FileRemover, ReapReport};
use crate::error::{Result, StoreError};
use crate::images::{self, NewImage, NewTrailer};
use crate::media::{self, DeleteOutcome, ShowRef};
use crate::migrate;
use crate::models::{DimensionKind, EpisodeNumber, MediaRef, Scraped};
use crate::orphans;
use crate::record::{self, FullRecord};
use crate::relation;

const CHANGE_FEED_CAPACITY: usize = 64;

/// What one committed session changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    /// Media rows inserted or modified, including their edges and images.
    pub touched: BTreeSet<MediaRef>,
    pub deleted: BTreeSet<MediaRef>,
    /// Catalog kinds that gained, lost, or had entities reclaimed.
    pub dimensions: BTreeSet<DimensionKind>,
    pub released_files: BTreeSet<i64>,
    /// Number of delete-queue entries written.
    pub queued: usize,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.touched.is_empty()
            && self.deleted.is_empty()
            && self.dimensions.is_empty()
            && self.released_files.is_empty()
            && self.queued == 0
    }

    fn record_delete(&mut self, outcome: &DeleteOutcome) {
        for media in &outcome.deleted {
            self.touched.remove(media);
            self.deleted.insert(*media);
        }
        self.dimensions.extend(outcome.reclaimed.keys().copied());
        self.released_files.extend(outcome.released_files.iter().copied());
        self.queued += outcome.queued.len();
    }
}

#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    policy: Policy,
    events: broadcast::Sender<ChangeSet>,
    writer: Arc<Semaphore>,
}

impl Store {
    /// Wrap an already migrated pool.
    pub fn new(pool: SqlitePool, policy: Policy) -> Self {
        let (events, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            pool,
            policy,
            events,
            writer: Arc::new(Semaphore::new(1)),
        }
    }

    /// Connect, bring the schema up to date, and run the on-open sweep if
    /// configured.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        let version = migrate::run_migrations(&pool).await?;
        tracing::debug!(path = %config.db.path.display(), version, "store opened");

        let store = Self::new(pool, config.policy);
        if config.maintenance.sweep_on_open {
            let mut session = store.begin().await?;
            let removed = session.sweep_all().await?;
            session.commit().await?;
            tracing::info!(
                removed = removed.values().map(BTreeSet::len).sum::<usize>(),
                "startup orphan sweep"
            );
        }
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeSet> {
        self.events.subscribe()
    }

    /// Open a write session, waiting for any open session to finish.
    pub async fn begin(&self) -> Result<Session> {
        let permit = Arc::clone(&self.writer)
            .acquire_owned()
            .await
            .map_err(|_| StoreError::Closed)?;
        let tx = self.pool.begin().await?;
        Ok(Session {
            tx,
            _permit: permit,
            policy: self.policy,
            changes: ChangeSet::default(),
            events: self.events.clone(),
        })
    }

    pub async fn full_record(&self, media: MediaRef) -> Result<FullRecord> {
        let mut conn = self.pool.acquire().await?;
        record::full_record(&mut conn, media).await
    }

    pub async fn aggregate(&self, media: MediaRef, kind: DimensionKind) -> Result<String> {
        let mut conn = self.pool.acquire().await?;
        aggregate::aggregate(&mut conn, media, kind).await
    }

    pub async fn pending_deletes(&self) -> Result<Vec<DeleteEntry>> {
        let mut conn = self.pool.acquire().await?;
        delete_queue::pending(&mut conn).await
    }

    /// Drain the delete queue. Never call while holding a [`Session`] on a
    /// single-connection pool.
    pub async fn reap(&self, remover: &dyn FileRemover, dry_run: bool) -> Result<ReapReport> {
        delete_queue::reap(&self.pool, remover, dry_run).await
    }

    pub async fn close(self) {
        self.writer.close();
        self.pool.close().await;
    }
}

/// One write transaction against the store.
pub struct Session {
    tx: Transaction<'static, Sqlite>,
    // Released after `tx` is dropped, so a rollback finishes first.
    _permit: OwnedSemaphorePermit,
    policy: Policy,
    changes: ChangeSet,
    events: broadcast::Sender<ChangeSet>,
}

impl Session {
    /// The underlying transaction, for reads or for module-level operations
    /// the session does not wrap. Changes made this way are not recorded in
    /// the [`ChangeSet`].
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut *self.tx
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    /// Commit and publish the change set. Returns what was published.
    pub async fn commit(self) -> Result<ChangeSet> {
        let Session {
            tx,
            changes,
            events,
            ..
        } = self;
        tx.commit().await?;
        // No subscribers is not an error.
        let _ = events.send(changes.clone());
        Ok(changes)
    }

    /// Roll back explicitly. Dropping the session has the same effect.
    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    pub async fn intern(&mut self, kind: DimensionKind, name: &str) -> Result<i64> {
        let id = catalog::intern(&mut *self.tx, kind, name).await?;
        self.changes.dimensions.insert(kind);
        Ok(id)
    }

    pub async fn delete_dimension(&mut self, kind: DimensionKind, id: i64) -> Result<()> {
        catalog::delete(&mut *self.tx, kind, id).await?;
        self.changes.dimensions.insert(kind);
        Ok(())
    }

    pub async fn link(
        &mut self,
        media: MediaRef,
        kind: DimensionKind,
        name: &str,
        role: Option<&str>,
    ) -> Result<i64> {
        let id = relation::link(&mut *self.tx, self.policy.link, media, kind, name, role).await?;
        self.changes.touched.insert(media);
        self.changes.dimensions.insert(kind);
        Ok(id)
    }

    pub async fn unlink(&mut self, media: MediaRef, kind: DimensionKind, dimension_id: i64) -> Result<bool> {
        let removed = relation::unlink(&mut *self.tx, media, kind, dimension_id).await?;
        if removed {
            self.changes.touched.insert(media);
            self.changes.dimensions.insert(kind);
        }
        Ok(removed)
    }

    pub async fn sweep_orphans(&mut self, kind: DimensionKind) -> Result<BTreeSet<i64>> {
        let removed = orphans::sweep_orphans(&mut *self.tx, kind).await?;
        if !removed.is_empty() {
            self.changes.dimensions.insert(kind);
        }
        Ok(removed)
    }

    pub async fn sweep_all(&mut self) -> Result<BTreeMap<DimensionKind, BTreeSet<i64>>> {
        let removed = orphans::sweep_all(&mut *self.tx).await?;
        self.changes.dimensions.extend(removed.keys().copied());
        Ok(removed)
    }

    pub async fn recount_usage(&mut self) -> Result<u64> {
        let mut updated = 0;
        for kind in DimensionKind::ALL {
            updated += catalog::recount_usage(&mut *self.tx, kind).await?;
        }
        Ok(updated)
    }

    pub async fn register_file(&mut self, path: &str) -> Result<i64> {
        media::register_file(&mut *self.tx, path).await
    }

    /// Insert a movie anchored to `file_id`. Any entity previously anchored
    /// to the file is deleted first.
    pub async fn insert_movie(&mut self, file_id: i64, scraped: &Scraped) -> Result<i64> {
        self.clear_file(file_id).await?;
        let id = media::insert_movie(&mut *self.tx, file_id, scraped).await?;
        self.changes.touched.insert(MediaRef::movie(id));
        Ok(id)
    }

    pub async fn insert_show(&mut self, scraped: &Scraped) -> Result<i64> {
        let id = media::insert_show(&mut *self.tx, scraped).await?;
        self.changes.touched.insert(MediaRef::show(id));
        Ok(id)
    }

    /// Insert an episode; returns `(episode id, show id)`.
    pub async fn insert_episode(
        &mut self,
        file_id: i64,
        show: ShowRef<'_>,
        number: EpisodeNumber,
        scraped: &Scraped,
    ) -> Result<(i64, i64)> {
        self.clear_file(file_id).await?;
        let (id, show_id) = media::insert_episode(&mut *self.tx, file_id, show, number, scraped).await?;
        self.changes.touched.insert(MediaRef::episode(id));
        self.changes.touched.insert(MediaRef::show(show_id));
        Ok((id, show_id))
    }

    pub async fn update_scraped(&mut self, media: MediaRef, scraped: &Scraped) -> Result<()> {
        media::update_scraped(&mut *self.tx, media, scraped).await?;
        self.changes.touched.insert(media);
        Ok(())
    }

    pub async fn refresh_cached(&mut self, media: MediaRef) -> Result<()> {
        aggregate::refresh_cached(&mut *self.tx, media).await
    }

    pub async fn delete(&mut self, media: MediaRef) -> Result<DeleteOutcome> {
        let outcome = media::delete_media(&mut *self.tx, self.policy, media).await?;
        self.changes.record_delete(&outcome);
        Ok(outcome)
    }

    pub async fn release_file(&mut self, file_id: i64) -> Result<Option<DeleteOutcome>> {
        let outcome = media::release_file(&mut *self.tx, self.policy, file_id).await?;
        match &outcome {
            Some(outcome) => self.changes.record_delete(outcome),
            None => {
                self.changes.released_files.insert(file_id);
            }
        }
        Ok(outcome)
    }

    pub async fn sweep_empty_shows(&mut self) -> Result<Vec<i64>> {
        let ids = media::sweep_empty_shows(&mut *self.tx, self.policy).await?;
        self.changes.deleted.extend(ids.iter().map(|id| MediaRef::show(*id)));
        Ok(ids)
    }

    pub async fn insert_image(&mut self, owner: MediaRef, image: &NewImage) -> Result<i64> {
        let id = images::insert_or_find(&mut *self.tx, self.policy.image_dedup, owner, image).await?;
        self.changes.touched.insert(owner);
        Ok(id)
    }

    pub async fn delete_image(&mut self, owner: MediaRef, id: i64) -> Result<Vec<DeleteEntry>> {
        let queued = images::delete_image(&mut *self.tx, owner.kind, id).await?;
        self.changes.touched.insert(owner);
        self.changes.queued += queued.len();
        Ok(queued)
    }

    pub async fn insert_trailer(&mut self, movie_id: i64, trailer: &NewTrailer) -> Result<i64> {
        let id = images::insert_trailer(&mut *self.tx, movie_id, trailer).await?;
        self.changes.touched.insert(MediaRef::movie(movie_id));
        Ok(id)
    }

    /// Re-pointing cascade for the inserts above; its deletions land in the
    /// change set.
    async fn clear_file(&mut self, file_id: i64) -> Result<()> {
        let outcome = media::clear_file(&mut *self.tx, self.policy, file_id).await?;
        self.changes.record_delete(&outcome);
        Ok(())
    }
}
