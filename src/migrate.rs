//! Schema migrations.
//!
//! The schema is built by an ordered list of [`Migration`] steps. Each step
//! carries a version number, and the highest applied version is recorded in
//! `schema_version`. Steps are forward-only and every statement is written
//! to be safe to re-run (`IF NOT EXISTS`), so a step can be applied on its
//! own in tests. There is no downgrade path; [`reset`] drops everything.

use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::error::{Result, StoreError};
use crate::models::{edge_table, supported_dimensions, DimensionKind, MediaKind};

/// A single forward-only schema step.
#[derive(Debug)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub statements: fn() -> Vec<String>,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "scanned_files_and_media",
        statements: media_tables,
    },
    Migration {
        version: 2,
        name: "dimension_catalog",
        statements: catalog_tables,
    },
    Migration {
        version: 3,
        name: "relation_store",
        statements: edge_tables,
    },
    Migration {
        version: 4,
        name: "image_variants",
        statements: image_tables,
    },
    Migration {
        version: 5,
        name: "delete_queue",
        statements: delete_queue_tables,
    },
];

/// Highest version this build knows how to create.
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

fn media_tables() -> Vec<String> {
    let mut stmts = vec![
        r#"
        CREATE TABLE IF NOT EXISTS scanned_files (
            id INTEGER PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            scraper_id INTEGER NOT NULL DEFAULT 0,
            scraper_kind INTEGER NOT NULL DEFAULT 0
        )
        "#
        .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_scanned_files_linkage ON scanned_files(scraper_kind, scraper_id)"
            .to_string(),
    ];

    for kind in MediaKind::ALL {
        let anchor = match kind {
            MediaKind::Movie => "file_id INTEGER NOT NULL UNIQUE REFERENCES scanned_files(id),",
            MediaKind::Show => "",
            MediaKind::Episode => {
                "file_id INTEGER NOT NULL UNIQUE REFERENCES scanned_files(id),
                 show_id INTEGER NOT NULL REFERENCES shows(id),
                 season INTEGER NOT NULL DEFAULT 0,
                 episode INTEGER NOT NULL DEFAULT 0,"
            }
        };
        let cached: String = supported_dimensions(kind)
            .map(|d| format!(",\n            {} TEXT", d.cache_column()))
            .collect();
        stmts.push(format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                {anchor}
                name TEXT NOT NULL,
                released TEXT,
                rating REAL,
                plot TEXT,
                online_id INTEGER,
                imdb_id TEXT,
                content_rating TEXT,
                cover TEXT{cached}
            )
            "#,
            table = kind.table(),
        ));
    }

    stmts.push("CREATE INDEX IF NOT EXISTS idx_episodes_show_id ON episodes(show_id)".to_string());
    stmts
}

fn catalog_tables() -> Vec<String> {
    DimensionKind::ALL
        .into_iter()
        .map(|kind| {
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    usage_count INTEGER NOT NULL DEFAULT 0
                )
                "#,
                kind.table()
            )
        })
        .collect()
}

fn edge_tables() -> Vec<String> {
    let mut stmts = Vec::new();
    for media in MediaKind::ALL {
        for kind in supported_dimensions(media) {
            let Some(table) = edge_table(media, kind) else {
                continue;
            };
            let role = if kind.has_attribute() {
                "role TEXT,"
            } else {
                ""
            };
            stmts.push(format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    media_id INTEGER NOT NULL REFERENCES {media_table}(id) ON DELETE CASCADE,
                    dimension_id INTEGER NOT NULL REFERENCES {dim_table}(id) ON DELETE RESTRICT,
                    {role}
                    seq INTEGER NOT NULL,
                    PRIMARY KEY (media_id, dimension_id)
                )
                "#,
                media_table = media.table(),
                dim_table = kind.table(),
            ));
            // Reclamation probes every edge table by dimension id.
            stmts.push(format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_dimension_id ON {table}(dimension_id)"
            ));
            stmts.push(format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_media_seq ON {table}(media_id, seq)"
            ));
        }
    }
    stmts
}

fn image_tables() -> Vec<String> {
    let mut stmts = Vec::new();
    for owner in [MediaKind::Movie, MediaKind::Show] {
        let table = format!("{}_images", owner.as_str());
        stmts.push(format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY,
                owner_id INTEGER NOT NULL REFERENCES {owner_table}(id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                season INTEGER,
                thumb_url TEXT,
                thumb_file TEXT,
                large_url TEXT,
                large_file TEXT
            )
            "#,
            owner_table = owner.table(),
        ));
        stmts.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_owner ON {table}(owner_id, kind)"
        ));
        stmts.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_large_file ON {table}(large_file)"
        ));
        stmts.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_thumb_file ON {table}(thumb_file)"
        ));
    }

    stmts.push(
        r#"
        CREATE TABLE IF NOT EXISTS movie_trailers (
            id INTEGER PRIMARY KEY,
            owner_id INTEGER NOT NULL REFERENCES movies(id) ON DELETE CASCADE,
            site TEXT NOT NULL,
            video_key TEXT NOT NULL,
            name TEXT,
            language TEXT,
            UNIQUE(owner_id, site, video_key)
        )
        "#
        .to_string(),
    );
    stmts
}

fn delete_queue_tables() -> Vec<String> {
    let mut stmts = vec![
        r#"
        CREATE TABLE IF NOT EXISTS delete_queue (
            id INTEGER PRIMARY KEY,
            path TEXT NOT NULL,
            use_count INTEGER NOT NULL,
            enqueued_at INTEGER NOT NULL
        )
        "#
        .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_delete_queue_path ON delete_queue(path)".to_string(),
    ];
    for kind in MediaKind::ALL {
        stmts.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{t}_cover ON {t}(cover)",
            t = kind.table()
        ));
    }
    stmts
}

async fn ensure_version_table(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Highest applied migration version, `0` for an empty database.
pub async fn current_version(conn: &mut SqliteConnection) -> Result<i64> {
    ensure_version_table(conn).await?;
    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(&mut *conn)
        .await?;
    Ok(version.unwrap_or(0))
}

/// Apply the statements of one step on `conn`. Safe to repeat.
pub async fn apply_step(conn: &mut SqliteConnection, step: &Migration) -> Result<()> {
    for stmt in (step.statements)() {
        sqlx::query(&stmt)
            .execute(&mut *conn)
            .await
            .map_err(|source| StoreError::Migration {
                version: step.version,
                name: step.name,
                source,
            })?;
    }
    Ok(())
}

/// Bring the schema up to [`latest_version`], one transaction per step.
///
/// Returns the version the store is at afterwards. A failed step leaves the
/// store at the previous version; the documented recovery is [`reset`].
pub async fn run_migrations(pool: &SqlitePool) -> Result<i64> {
    let mut conn = pool.acquire().await?;
    let start = current_version(&mut *conn).await?;
    drop(conn);

    let latest = latest_version();
    if start > latest {
        return Err(StoreError::SchemaTooNew {
            found: start,
            supported: latest,
        });
    }

    let mut current = start;
    for step in MIGRATIONS.iter().filter(|m| m.version > start) {
        let mut tx = pool.begin().await?;
        apply_step(&mut *tx, step).await?;
        sqlx::query("INSERT INTO schema_version (version, name, applied_at) VALUES (?, ?, ?)")
            .bind(step.version)
            .bind(step.name)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(version = step.version, name = step.name, "applied migration");
        current = step.version;
    }

    Ok(current)
}

/// Drop every table. Destructive; the only way back from a failed upgrade.
pub async fn reset(pool: &SqlitePool) -> Result<()> {
    let mut conn = pool.acquire().await?;

    let tables: Vec<String> = sqlx::query(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
    )
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(|row| row.get("name"))
    .collect();

    sqlx::query("PRAGMA foreign_keys = OFF")
        .execute(&mut *conn)
        .await?;
    for table in &tables {
        sqlx::query(&format!("DROP TABLE IF EXISTS \"{}\"", table))
            .execute(&mut *conn)
            .await?;
    }
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&mut *conn)
        .await?;

    tracing::warn!(tables = tables.len(), "store reset");
    Ok(())
}
