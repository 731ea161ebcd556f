//! Image variant store: artwork rows owned by a movie or show, plus movie
//! trailers.
//!
//! Artwork lives in `movie_images` / `show_images` and cascades with its
//! owner. Deleting an image queues its files on the delete queue with the
//! number of rows that still reference them.

use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection};

use crate::delete_queue::{self, DeleteEntry};
use crate::error::{Result, StoreError};
use crate::models::{ImageKind, MediaKind, MediaRef};
use crate::relation::ensure_media;

/// Which image kinds reuse an existing row with the same file path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageDedup {
    /// Posters and backdrops only.
    #[default]
    Legacy,
    /// Every kind.
    All,
}

impl ImageDedup {
    pub fn dedups(self, kind: ImageKind) -> bool {
        match self {
            ImageDedup::Legacy => kind.dedups_by_path(),
            ImageDedup::All => true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageFiles {
    pub thumb_url: Option<String>,
    pub thumb_file: Option<String>,
    pub large_url: Option<String>,
    pub large_file: Option<String>,
}

impl ImageFiles {
    /// Local path used for deduplication: the large file, else the thumb.
    fn dedup_path(&self) -> Option<&str> {
        fn local(p: &Option<String>) -> Option<&str> {
            p.as_deref().filter(|p| !p.is_empty())
        }
        local(&self.large_file).or_else(|| local(&self.thumb_file))
    }

    fn local_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = [&self.large_file, &self.thumb_file]
            .into_iter()
            .flatten()
            .filter(|p| !p.is_empty())
            .cloned()
            .collect();
        paths.dedup();
        paths
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewImage {
    pub kind: ImageKind,
    /// Season a show poster belongs to; `None` for the show-wide poster.
    #[serde(default)]
    pub season: Option<i64>,
    #[serde(flatten)]
    pub files: ImageFiles,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Image {
    pub id: i64,
    pub owner: MediaRef,
    pub kind: ImageKind,
    pub season: Option<i64>,
    #[serde(flatten)]
    pub files: ImageFiles,
}

/// Remote trailer reference; no local file is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTrailer {
    pub site: String,
    pub video_key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trailer {
    pub id: i64,
    pub movie_id: i64,
    pub site: String,
    pub video_key: String,
    pub name: Option<String>,
    pub language: Option<String>,
}

fn images_table(owner: MediaKind) -> Option<&'static str> {
    match owner {
        MediaKind::Movie => Some("movie_images"),
        MediaKind::Show => Some("show_images"),
        MediaKind::Episode => None,
    }
}

fn table_for(kind: ImageKind, owner: MediaKind) -> Result<&'static str> {
    match images_table(owner) {
        Some(table) if kind.allowed_on(owner) => Ok(table),
        _ => Err(StoreError::UnsupportedImage(kind, owner)),
    }
}

/// Insert an image for `owner`, or return the id of the existing row when
/// `dedup` says this kind is deduplicated and the same path is already
/// stored for this owner and kind.
pub async fn insert_or_find(
    conn: &mut SqliteConnection,
    dedup: ImageDedup,
    owner: MediaRef,
    image: &NewImage,
) -> Result<i64> {
    let table = table_for(image.kind, owner.kind)?;
    ensure_media(conn, owner).await?;

    if dedup.dedups(image.kind) {
        if let Some(path) = image.files.dedup_path() {
            let existing: Option<i64> = sqlx::query_scalar(&format!(
                r#"
                SELECT id FROM {table}
                WHERE owner_id = ? AND kind = ?
                  AND COALESCE(NULLIF(large_file, ''), thumb_file) = ?
                ORDER BY id LIMIT 1
                "#
            ))
            .bind(owner.id)
            .bind(image.kind.as_str())
            .bind(path)
            .fetch_optional(&mut *conn)
            .await?;

            if let Some(id) = existing {
                return Ok(id);
            }
        }
    }

    let id = sqlx::query(&format!(
        r#"
        INSERT INTO {table} (owner_id, kind, season, thumb_url, thumb_file, large_url, large_file)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#
    ))
    .bind(owner.id)
    .bind(image.kind.as_str())
    .bind(image.season)
    .bind(&image.files.thumb_url)
    .bind(&image.files.thumb_file)
    .bind(&image.files.large_url)
    .bind(&image.files.large_file)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    tracing::debug!(%owner, kind = %image.kind, id, "stored image");
    Ok(id)
}

fn image_from_row(row: &sqlx::sqlite::SqliteRow, owner_kind: MediaKind) -> Result<Image> {
    let kind: String = row.get("kind");
    Ok(Image {
        id: row.get("id"),
        owner: MediaRef {
            kind: owner_kind,
            id: row.get("owner_id"),
        },
        kind: kind.parse()?,
        season: row.get("season"),
        files: ImageFiles {
            thumb_url: row.get("thumb_url"),
            thumb_file: row.get("thumb_file"),
            large_url: row.get("large_url"),
            large_file: row.get("large_file"),
        },
    })
}

pub async fn get_image(
    conn: &mut SqliteConnection,
    owner_kind: MediaKind,
    id: i64,
) -> Result<Option<Image>> {
    let Some(table) = images_table(owner_kind) else {
        return Ok(None);
    };
    let row = sqlx::query(&format!("SELECT * FROM {table} WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|r| image_from_row(&r, owner_kind)).transpose()
}

/// Images of `owner`, optionally restricted to one kind, in insertion order.
pub async fn images_for(
    conn: &mut SqliteConnection,
    owner: MediaRef,
    kind: Option<ImageKind>,
) -> Result<Vec<Image>> {
    let Some(table) = images_table(owner.kind) else {
        return Ok(Vec::new());
    };

    let rows = match kind {
        Some(kind) => {
            sqlx::query(&format!(
                "SELECT * FROM {table} WHERE owner_id = ? AND kind = ? ORDER BY id"
            ))
            .bind(owner.id)
            .bind(kind.as_str())
            .fetch_all(&mut *conn)
            .await?
        }
        None => {
            sqlx::query(&format!("SELECT * FROM {table} WHERE owner_id = ? ORDER BY id"))
                .bind(owner.id)
                .fetch_all(&mut *conn)
                .await?
        }
    };

    rows.iter()
        .map(|row| image_from_row(row, owner.kind))
        .collect()
}

/// Distinct local file paths held by `owner`'s images.
pub(crate) async fn local_paths_of(
    conn: &mut SqliteConnection,
    owner: MediaRef,
) -> Result<Vec<String>> {
    let mut paths: Vec<String> = images_for(conn, owner, None)
        .await?
        .into_iter()
        .flat_map(|img| img.files.local_paths())
        .collect();
    paths.sort();
    paths.dedup();
    Ok(paths)
}

/// Delete one image and queue its files. Returns the queue entries written.
pub async fn delete_image(
    conn: &mut SqliteConnection,
    owner_kind: MediaKind,
    id: i64,
) -> Result<Vec<DeleteEntry>> {
    let image = get_image(conn, owner_kind, id)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("{} image {}", owner_kind, id)))?;
    let table = table_for(image.kind, owner_kind)?;

    sqlx::query(&format!("DELETE FROM {table} WHERE id = ?"))
        .bind(id)
        .execute(&mut *conn)
        .await?;

    let mut queued = Vec::new();
    for path in image.files.local_paths() {
        queued.push(delete_queue::enqueue(conn, &path).await?);
    }
    Ok(queued)
}

/// Store a trailer reference for a movie. The same (site, key) pair is
/// stored once per movie; a repeat returns the existing id.
pub async fn insert_trailer(
    conn: &mut SqliteConnection,
    movie_id: i64,
    trailer: &NewTrailer,
) -> Result<i64> {
    ensure_media(conn, MediaRef::movie(movie_id)).await?;

    sqlx::query(
        r#"
        INSERT INTO movie_trailers (owner_id, site, video_key, name, language)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(owner_id, site, video_key) DO NOTHING
        "#,
    )
    .bind(movie_id)
    .bind(&trailer.site)
    .bind(&trailer.video_key)
    .bind(&trailer.name)
    .bind(&trailer.language)
    .execute(&mut *conn)
    .await?;

    // The insert above is silent on conflict, so look the row up either way.
    let id: i64 = sqlx::query_scalar(
        "SELECT id FROM movie_trailers WHERE owner_id = ? AND site = ? AND video_key = ?",
    )
    .bind(movie_id)
    .bind(&trailer.site)
    .bind(&trailer.video_key)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

pub async fn trailers_for(conn: &mut SqliteConnection, movie_id: i64) -> Result<Vec<Trailer>> {
    let rows = sqlx::query(
        "SELECT id, owner_id, site, video_key, name, language FROM movie_trailers WHERE owner_id = ? ORDER BY id",
    )
    .bind(movie_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .iter()
        .map(|row| Trailer {
            id: row.get("id"),
            movie_id: row.get("owner_id"),
            site: row.get("site"),
            video_key: row.get("video_key"),
            name: row.get("name"),
            language: row.get("language"),
        })
        .collect())
}
