//! Full record reads for detail views.
//!
//! Joins one media row against every dimension kind it supports, its
//! artwork and trailers, and its scanned file. Used by `scrapedb show` and
//! by anything that needs the whole picture in one call.

use std::collections::BTreeMap;

use serde::Serialize;
use sqlx::SqliteConnection;

use crate::aggregate::format_edges;
use crate::error::{Result, StoreError};
use crate::images::{self, Image, Trailer};
use crate::media;
use crate::models::{supported_dimensions, DimensionKind, Edge, EpisodeNumber, MediaKind, MediaRef, Scraped};
use crate::relation;

#[derive(Debug, Clone, Serialize)]
pub struct FullRecord {
    pub media: MediaRef,
    pub scraped: Scraped,
    pub file_id: Option<i64>,
    pub file_path: Option<String>,
    /// Parent show, for episodes.
    pub show_id: Option<i64>,
    pub number: Option<EpisodeNumber>,
    pub credits: BTreeMap<DimensionKind, Vec<Edge>>,
    /// Display strings, computed from `credits`.
    pub aggregates: BTreeMap<DimensionKind, String>,
    /// Own images for movies and shows; the show's images for episodes.
    pub images: Vec<Image>,
    pub trailers: Vec<Trailer>,
}

pub async fn full_record(conn: &mut SqliteConnection, media: MediaRef) -> Result<FullRecord> {
    let not_found = || StoreError::NotFound(media.to_string());

    let (scraped, file_id, show_id, number) = match media.kind {
        MediaKind::Episode => {
            let ep = media::get_episode(conn, media.id).await?.ok_or_else(not_found)?;
            (ep.scraped, Some(ep.file_id), Some(ep.show_id), Some(ep.number))
        }
        MediaKind::Movie | MediaKind::Show => {
            let row = media::get_media(conn, media).await?.ok_or_else(not_found)?;
            (row.scraped, row.file_id, None, None)
        }
    };

    let file_path = match file_id {
        Some(id) => media::file_path(conn, id).await?,
        None => None,
    };

    let mut credits = BTreeMap::new();
    let mut aggregates = BTreeMap::new();
    for kind in supported_dimensions(media.kind) {
        let edges = relation::edges(conn, media, kind).await?;
        if edges.is_empty() {
            continue;
        }
        aggregates.insert(kind, format_edges(kind, &edges));
        credits.insert(kind, edges);
    }

    let image_owner = match show_id {
        Some(show_id) => MediaRef::show(show_id),
        None => media,
    };
    let images = images::images_for(conn, image_owner, None).await?;

    let trailers = match media.kind {
        MediaKind::Movie => images::trailers_for(conn, media.id).await?,
        _ => Vec::new(),
    };

    Ok(FullRecord {
        media,
        scraped,
        file_id,
        file_path,
        show_id,
        number,
        credits,
        aggregates,
        images,
        trailers,
    })
}
