//! Media entity root: movies, shows and episodes, and the cascade that runs
//! when one of them is deleted.
//!
//! Movies and episodes are anchored to exactly one scanned file and stamp
//! that file's linkage fields on insert. Shows have no file and only live
//! while at least one episode points at them.
//!
//! Deleting a media row, inside the caller's transaction:
//!
//! 1. drops its edges, images and trailers (foreign-key cascade),
//! 2. reclaims the catalog entries it referenced, for the kinds the
//!    [`ReclaimPolicy`](crate::orphans::ReclaimPolicy) covers,
//! 3. resets the scanned file's linkage to unscraped,
//! 4. queues its cover and image files on the delete queue,
//! 5. for an episode, deletes the show when no sibling episode remains.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::config::Policy;
use crate::delete_queue::{self, DeleteEntry};
use crate::error::{Result, StoreError};
use crate::images;
use crate::models::{
    supported_dimensions, DimensionKind, EpisodeNumber, EpisodeRow, Linkage, MediaKind, MediaRef,
    MediaRow, Scraped, UNSCRAPED,
};
use crate::orphans;
use crate::relation;

const SCALAR_COLUMNS: &str = "name, released, rating, plot, online_id, imdb_id, content_rating, cover";

/// Everything a delete cascade did.
#[derive(Debug, Default, Clone, Serialize)]
pub struct DeleteOutcome {
    /// Media rows removed, the requested one first.
    pub deleted: Vec<MediaRef>,
    pub reclaimed: BTreeMap<DimensionKind, BTreeSet<i64>>,
    pub queued: Vec<DeleteEntry>,
    /// Files whose linkage was reset to unscraped.
    pub released_files: Vec<i64>,
}

impl DeleteOutcome {
    fn absorb(&mut self, other: DeleteOutcome) {
        self.deleted.extend(other.deleted);
        for (kind, ids) in other.reclaimed {
            self.reclaimed.entry(kind).or_default().extend(ids);
        }
        self.queued.extend(other.queued);
        self.released_files.extend(other.released_files);
    }
}

/// Show an episode belongs to: an existing row, or one to create.
#[derive(Debug, Clone, Copy)]
pub enum ShowRef<'a> {
    Id(i64),
    New(&'a Scraped),
}

fn scraped_from_row(row: &SqliteRow) -> Scraped {
    Scraped {
        name: row.get("name"),
        date: row.get("released"),
        rating: row.get("rating"),
        plot: row.get("plot"),
        online_id: row.get("online_id"),
        imdb_id: row.get("imdb_id"),
        content_rating: row.get("content_rating"),
        cover: row.get("cover"),
    }
}

/// Register a scanned file by path, returning its id. Re-registering the
/// same path returns the existing id and leaves its linkage untouched.
pub async fn register_file(conn: &mut SqliteConnection, path: &str) -> Result<i64> {
    sqlx::query("INSERT INTO scanned_files (path) VALUES (?) ON CONFLICT(path) DO NOTHING")
        .bind(path)
        .execute(&mut *conn)
        .await?;

    let id: i64 = sqlx::query_scalar("SELECT id FROM scanned_files WHERE path = ?")
        .bind(path)
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}

pub async fn file_path(conn: &mut SqliteConnection, file_id: i64) -> Result<Option<String>> {
    let path = sqlx::query_scalar("SELECT path FROM scanned_files WHERE id = ?")
        .bind(file_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(path)
}

pub async fn file_linkage(conn: &mut SqliteConnection, file_id: i64) -> Result<Linkage> {
    let row = sqlx::query("SELECT scraper_id, scraper_kind FROM scanned_files WHERE id = ?")
        .bind(file_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("scanned file {}", file_id)))?;

    let id: i64 = row.get("scraper_id");
    let code: i64 = row.get("scraper_kind");
    Ok(match MediaKind::from_linkage_code(code) {
        Some(kind) if id != UNSCRAPED => Linkage::Linked(MediaRef { kind, id }),
        _ => Linkage::Unscraped,
    })
}

async fn set_linkage(conn: &mut SqliteConnection, file_id: i64, id: i64, code: i64) -> Result<()> {
    sqlx::query("UPDATE scanned_files SET scraper_id = ?, scraper_kind = ? WHERE id = ?")
        .bind(id)
        .bind(code)
        .bind(file_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Media row anchored to `file_id`, looked up through the media tables
/// rather than the linkage fields.
pub async fn find_by_file(conn: &mut SqliteConnection, file_id: i64) -> Result<Option<MediaRef>> {
    for kind in [MediaKind::Movie, MediaKind::Episode] {
        let id: Option<i64> =
            sqlx::query_scalar(&format!("SELECT id FROM {} WHERE file_id = ?", kind.table()))
                .bind(file_id)
                .fetch_optional(&mut *conn)
                .await?;
        if let Some(id) = id {
            return Ok(Some(MediaRef { kind, id }));
        }
    }
    Ok(None)
}

/// Detach whatever is attached to `file_id` so a new entity can take it.
pub async fn clear_file(conn: &mut SqliteConnection, policy: Policy, file_id: i64) -> Result<DeleteOutcome> {
    if file_path(conn, file_id).await?.is_none() {
        return Err(StoreError::NotFound(format!("scanned file {}", file_id)));
    }

    let mut outcome = DeleteOutcome::default();
    if let Some(previous) = find_by_file(conn, file_id).await? {
        tracing::info!(file_id, %previous, "re-pointing scanned file, deleting previous entity");
        outcome.absorb(delete_media(conn, policy, previous).await?);
    }
    Ok(outcome)
}

/// Insert a movie anchored to `file_id`, which must already be free (see
/// [`clear_file`]).
pub async fn insert_movie(conn: &mut SqliteConnection, file_id: i64, scraped: &Scraped) -> Result<i64> {
    validate(scraped)?;

    let id = sqlx::query(&format!(
        "INSERT INTO movies (file_id, {SCALAR_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(file_id)
    .bind(&scraped.name)
    .bind(&scraped.date)
    .bind(scraped.rating)
    .bind(&scraped.plot)
    .bind(scraped.online_id)
    .bind(&scraped.imdb_id)
    .bind(&scraped.content_rating)
    .bind(&scraped.cover)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    set_linkage(conn, file_id, id, crate::models::LINKAGE_MOVIE).await?;
    tracing::info!(id, file_id, name = %scraped.name, "inserted movie");
    Ok(id)
}

/// Insert a show row. A show with no episode is removed by the next
/// cascade that touches it or by [`sweep_empty_shows`].
pub async fn insert_show(conn: &mut SqliteConnection, scraped: &Scraped) -> Result<i64> {
    validate(scraped)?;

    let id = sqlx::query(&format!(
        "INSERT INTO shows ({SCALAR_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&scraped.name)
    .bind(&scraped.date)
    .bind(scraped.rating)
    .bind(&scraped.plot)
    .bind(scraped.online_id)
    .bind(&scraped.imdb_id)
    .bind(&scraped.content_rating)
    .bind(&scraped.cover)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    tracing::info!(id, name = %scraped.name, "inserted show");
    Ok(id)
}

/// Existing show matching `scraped`: by online id when it has one, else by
/// exact name.
pub async fn find_show(conn: &mut SqliteConnection, scraped: &Scraped) -> Result<Option<i64>> {
    let id = match scraped.online_id {
        Some(online_id) => {
            sqlx::query_scalar("SELECT id FROM shows WHERE online_id = ? ORDER BY id LIMIT 1")
                .bind(online_id)
                .fetch_optional(&mut *conn)
                .await?
        }
        None => {
            sqlx::query_scalar("SELECT id FROM shows WHERE name = ? ORDER BY id LIMIT 1")
                .bind(&scraped.name)
                .fetch_optional(&mut *conn)
                .await?
        }
    };
    Ok(id)
}

/// Insert an episode. With [`ShowRef::New`] the show is looked up (see
/// [`find_show`]) and created if missing. Returns `(episode id, show id)`.
/// The file must already be free (see [`clear_file`]).
pub async fn insert_episode(
    conn: &mut SqliteConnection,
    file_id: i64,
    show: ShowRef<'_>,
    number: EpisodeNumber,
    scraped: &Scraped,
) -> Result<(i64, i64)> {
    validate(scraped)?;

    let show_id = match show {
        ShowRef::Id(id) => {
            relation::ensure_media(conn, MediaRef::show(id)).await?;
            id
        }
        ShowRef::New(show) => match find_show(conn, show).await? {
            Some(id) => id,
            None => insert_show(conn, show).await?,
        },
    };

    let id = sqlx::query(&format!(
        "INSERT INTO episodes (file_id, show_id, season, episode, {SCALAR_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(file_id)
    .bind(show_id)
    .bind(number.season)
    .bind(number.episode)
    .bind(&scraped.name)
    .bind(&scraped.date)
    .bind(scraped.rating)
    .bind(&scraped.plot)
    .bind(scraped.online_id)
    .bind(&scraped.imdb_id)
    .bind(&scraped.content_rating)
    .bind(&scraped.cover)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    set_linkage(conn, file_id, id, crate::models::LINKAGE_EPISODE).await?;
    tracing::info!(id, show_id, file_id, season = number.season, episode = number.episode, "inserted episode");
    Ok((id, show_id))
}

fn validate(scraped: &Scraped) -> Result<()> {
    if scraped.name.trim().is_empty() {
        return Err(StoreError::InvalidInput("media name must not be empty".into()));
    }
    Ok(())
}

/// Overwrite the scalar attributes of a media row.
pub async fn update_scraped(conn: &mut SqliteConnection, media: MediaRef, scraped: &Scraped) -> Result<()> {
    validate(scraped)?;
    let result = sqlx::query(&format!(
        r#"
        UPDATE {} SET name = ?, released = ?, rating = ?, plot = ?, online_id = ?,
            imdb_id = ?, content_rating = ?, cover = ?
        WHERE id = ?
        "#,
        media.kind.table()
    ))
    .bind(&scraped.name)
    .bind(&scraped.date)
    .bind(scraped.rating)
    .bind(&scraped.plot)
    .bind(scraped.online_id)
    .bind(&scraped.imdb_id)
    .bind(&scraped.content_rating)
    .bind(&scraped.cover)
    .bind(media.id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(media.to_string()));
    }
    Ok(())
}

/// Movie or show row. Episodes are read with [`get_episode`].
pub async fn get_media(conn: &mut SqliteConnection, media: MediaRef) -> Result<Option<MediaRow>> {
    let file_col = match media.kind {
        MediaKind::Show => "NULL AS file_id",
        MediaKind::Movie | MediaKind::Episode => "file_id",
    };
    let row = sqlx::query(&format!(
        "SELECT id, {file_col}, {SCALAR_COLUMNS} FROM {} WHERE id = ?",
        media.kind.table()
    ))
    .bind(media.id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|row| MediaRow {
        media,
        file_id: row.get("file_id"),
        scraped: scraped_from_row(&row),
    }))
}

fn episode_from_row(row: &SqliteRow) -> EpisodeRow {
    EpisodeRow {
        id: row.get("id"),
        show_id: row.get("show_id"),
        file_id: row.get("file_id"),
        number: EpisodeNumber {
            season: row.get("season"),
            episode: row.get("episode"),
        },
        scraped: scraped_from_row(row),
    }
}

pub async fn get_episode(conn: &mut SqliteConnection, id: i64) -> Result<Option<EpisodeRow>> {
    let row = sqlx::query(&format!(
        "SELECT id, show_id, file_id, season, episode, {SCALAR_COLUMNS} FROM episodes WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.as_ref().map(episode_from_row))
}

/// Episodes of a show, by season then episode number.
pub async fn episodes_of(conn: &mut SqliteConnection, show_id: i64) -> Result<Vec<EpisodeRow>> {
    let rows = sqlx::query(&format!(
        "SELECT id, show_id, file_id, season, episode, {SCALAR_COLUMNS} FROM episodes WHERE show_id = ? ORDER BY season, episode, id"
    ))
    .bind(show_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.iter().map(episode_from_row).collect())
}

pub async fn count(conn: &mut SqliteConnection, kind: MediaKind) -> Result<i64> {
    let n = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", kind.table()))
        .fetch_one(&mut *conn)
        .await?;
    Ok(n)
}

/// Delete any media row with its full cascade.
pub async fn delete_media(conn: &mut SqliteConnection, policy: Policy, media: MediaRef) -> Result<DeleteOutcome> {
    match media.kind {
        MediaKind::Movie => delete_row(conn, policy, media).await,
        MediaKind::Episode => delete_episode(conn, policy, media.id).await,
        MediaKind::Show => delete_show(conn, policy, media.id).await,
    }
}

pub async fn delete_movie(conn: &mut SqliteConnection, policy: Policy, id: i64) -> Result<DeleteOutcome> {
    delete_row(conn, policy, MediaRef::movie(id)).await
}

/// Delete an episode, and its show when this was the last episode.
pub async fn delete_episode(conn: &mut SqliteConnection, policy: Policy, id: i64) -> Result<DeleteOutcome> {
    let episode = get_episode(conn, id)
        .await?
        .ok_or_else(|| StoreError::NotFound(MediaRef::episode(id).to_string()))?;

    let mut outcome = delete_row(conn, policy, MediaRef::episode(id)).await?;

    let siblings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM episodes WHERE show_id = ?")
        .bind(episode.show_id)
        .fetch_one(&mut *conn)
        .await?;
    if siblings == 0 {
        tracing::info!(show_id = episode.show_id, "last episode deleted, removing show");
        outcome.absorb(delete_row(conn, policy, MediaRef::show(episode.show_id)).await?);
    }
    Ok(outcome)
}

/// Delete a show together with all of its episodes.
pub async fn delete_show(conn: &mut SqliteConnection, policy: Policy, id: i64) -> Result<DeleteOutcome> {
    relation::ensure_media(conn, MediaRef::show(id)).await?;

    let mut outcome = DeleteOutcome::default();
    for episode in episodes_of(conn, id).await? {
        outcome.absorb(delete_row(conn, policy, MediaRef::episode(episode.id)).await?);
    }
    // Report the show first.
    let mut show = delete_row(conn, policy, MediaRef::show(id)).await?;
    show.absorb(outcome);
    Ok(show)
}

/// Remove shows that no episode references. Returns the removed ids.
pub async fn sweep_empty_shows(conn: &mut SqliteConnection, policy: Policy) -> Result<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM shows s WHERE NOT EXISTS (SELECT 1 FROM episodes e WHERE e.show_id = s.id)",
    )
    .fetch_all(&mut *conn)
    .await?;

    for id in &ids {
        delete_row(conn, policy, MediaRef::show(*id)).await?;
    }
    Ok(ids)
}

/// Delete whatever entity is attached to `file_id`, leaving the file
/// unscraped. `None` when nothing was attached.
pub async fn release_file(
    conn: &mut SqliteConnection,
    policy: Policy,
    file_id: i64,
) -> Result<Option<DeleteOutcome>> {
    let outcome = clear_file(conn, policy, file_id).await?;
    if outcome.deleted.is_empty() {
        // Nothing anchored here, but make sure a stale stamp does not survive.
        set_linkage(conn, file_id, UNSCRAPED, UNSCRAPED).await?;
        return Ok(None);
    }
    Ok(Some(outcome))
}

/// Single-row cascade shared by every delete path. Does not look at
/// sibling episodes.
async fn delete_row(conn: &mut SqliteConnection, policy: Policy, media: MediaRef) -> Result<DeleteOutcome> {
    let row = get_media(conn, media)
        .await?
        .ok_or_else(|| StoreError::NotFound(media.to_string()))?;

    let mut candidates: BTreeMap<DimensionKind, Vec<i64>> = BTreeMap::new();
    for kind in supported_dimensions(media.kind).filter(|k| policy.reclaim_on_delete.covers(*k)) {
        let ids = relation::dimension_ids(conn, media, kind).await?;
        if !ids.is_empty() {
            candidates.insert(kind, ids);
        }
    }

    let mut paths: Vec<String> = images::local_paths_of(conn, media).await?;
    if let Some(cover) = row.scraped.cover.as_deref().filter(|c| !c.is_empty()) {
        paths.push(cover.to_string());
    }
    paths.sort();
    paths.dedup();

    // Edges, images and trailers go with the row.
    sqlx::query(&format!("DELETE FROM {} WHERE id = ?", media.kind.table()))
        .bind(media.id)
        .execute(&mut *conn)
        .await?;

    let mut outcome = DeleteOutcome {
        deleted: vec![media],
        ..Default::default()
    };

    for (kind, ids) in candidates {
        let removed = orphans::reclaim(conn, kind, &ids).await?;
        if !removed.is_empty() {
            outcome.reclaimed.insert(kind, removed);
        }
    }

    if let Some(file_id) = row.file_id {
        if file_linkage(conn, file_id).await? == Linkage::Linked(media) {
            set_linkage(conn, file_id, UNSCRAPED, UNSCRAPED).await?;
            outcome.released_files.push(file_id);
        }
    }

    for path in paths {
        outcome.queued.push(delete_queue::enqueue(conn, &path).await?);
    }

    tracing::info!(
        %media,
        reclaimed = outcome.reclaimed.values().map(BTreeSet::len).sum::<usize>(),
        queued = outcome.queued.len(),
        "deleted media"
    );
    Ok(outcome)
}
