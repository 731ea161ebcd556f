//! Orphan reclamation.
//!
//! An entity is an orphan when no edge table of any media kind points at
//! it. Full sweeps scan a whole catalog table and belong in maintenance
//! jobs; [`reclaim`] only probes the ids it is given and is what media
//! deletion uses.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use sqlx::SqliteConnection;

use crate::error::Result;
use crate::models::{edge_table, DimensionKind};

/// Which kinds media deletion reclaims immediately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclaimPolicy {
    /// Actor, director, studio and genre only; the rest wait for a sweep.
    #[default]
    Legacy,
    /// Every dimension kind.
    All,
    /// Nothing; orphans accumulate until [`sweep_orphans`] runs.
    None,
}

impl ReclaimPolicy {
    pub fn covers(self, kind: DimensionKind) -> bool {
        match self {
            ReclaimPolicy::Legacy => matches!(
                kind,
                DimensionKind::Actor
                    | DimensionKind::Director
                    | DimensionKind::Studio
                    | DimensionKind::Genre
            ),
            ReclaimPolicy::All => true,
            ReclaimPolicy::None => false,
        }
    }
}

const CANDIDATE_BATCH: usize = 500;

/// `NOT EXISTS` conjunction over every edge table referencing `kind`,
/// correlated on the catalog table's `id`.
fn orphan_predicate(kind: DimensionKind) -> String {
    let clauses: Vec<String> = kind
        .partitions()
        .filter_map(|media| edge_table(media, kind))
        .map(|edge| {
            format!(
                "NOT EXISTS (SELECT 1 FROM {edge} e WHERE e.dimension_id = {table}.id)",
                table = kind.table()
            )
        })
        .collect();
    if clauses.is_empty() {
        "1".to_string()
    } else {
        clauses.join(" AND ")
    }
}

/// Ids of every `kind` entity with no remaining edges.
pub async fn find_orphans(
    conn: &mut SqliteConnection,
    kind: DimensionKind,
) -> Result<BTreeSet<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(&format!(
        "SELECT id FROM {table} WHERE {pred}",
        table = kind.table(),
        pred = orphan_predicate(kind)
    ))
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids.into_iter().collect())
}

/// Identify and delete every orphan of `kind`. Returns the deleted ids.
pub async fn sweep_orphans(
    conn: &mut SqliteConnection,
    kind: DimensionKind,
) -> Result<BTreeSet<i64>> {
    let orphans = find_orphans(conn, kind).await?;
    if orphans.is_empty() {
        return Ok(orphans);
    }

    let result = sqlx::query(&format!(
        "DELETE FROM {table} WHERE {pred}",
        table = kind.table(),
        pred = orphan_predicate(kind)
    ))
    .execute(&mut *conn)
    .await?;

    tracing::info!(%kind, removed = result.rows_affected(), "swept orphans");
    Ok(orphans)
}

/// Sweep every dimension kind.
pub async fn sweep_all(
    conn: &mut SqliteConnection,
) -> Result<BTreeMap<DimensionKind, BTreeSet<i64>>> {
    let mut out = BTreeMap::new();
    for kind in DimensionKind::ALL {
        let removed = sweep_orphans(conn, kind).await?;
        if !removed.is_empty() {
            out.insert(kind, removed);
        }
    }
    Ok(out)
}

/// Delete those of `candidates` that have become orphans.
///
/// Only the given ids are probed, through the `dimension_id` indexes, so
/// the cost is proportional to the candidate list rather than the catalog.
pub async fn reclaim(
    conn: &mut SqliteConnection,
    kind: DimensionKind,
    candidates: &[i64],
) -> Result<BTreeSet<i64>> {
    let mut removed = BTreeSet::new();
    let pred = orphan_predicate(kind);

    for batch in candidates.chunks(CANDIDATE_BATCH) {
        let placeholders = vec!["?"; batch.len()].join(", ");

        let select = format!(
            "SELECT id FROM {table} WHERE id IN ({placeholders}) AND {pred}",
            table = kind.table()
        );
        let mut query = sqlx::query_scalar::<_, i64>(&select);
        for id in batch {
            query = query.bind(*id);
        }
        let orphans = query.fetch_all(&mut *conn).await?;
        if orphans.is_empty() {
            continue;
        }

        let delete_placeholders = vec!["?"; orphans.len()].join(", ");
        let delete = format!(
            "DELETE FROM {table} WHERE id IN ({delete_placeholders})",
            table = kind.table()
        );
        let mut query = sqlx::query(&delete);
        for id in &orphans {
            query = query.bind(*id);
        }
        query.execute(&mut *conn).await?;
        removed.extend(orphans);
    }

    if !removed.is_empty() {
        tracing::debug!(%kind, removed = removed.len(), "reclaimed orphans");
    }
    Ok(removed)
}
