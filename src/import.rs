//! Import of scraper output.
//!
//! A scraper describes what it found as JSON: movies anchored to a file,
//! and shows with their episodes. [`import_batch`] writes a whole batch in
//! one [`Session`], so a failure anywhere leaves the store untouched, and
//! refreshes the cached aggregation strings of every row it wrote.
//!
//! Re-importing a file replaces whatever entity was attached to it.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{self, StoreError};
use crate::images::{NewImage, NewTrailer};
use crate::media::ShowRef;
use crate::models::{DimensionKind, EpisodeNumber, MediaRef, Scraped};
use crate::store::{Session, Store};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImportBatch {
    pub movies: Vec<ScrapedMovie>,
    pub shows: Vec<ScrapedShow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CastMember {
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// Named listings, one per dimension kind, in display order.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Credits {
    pub actors: Vec<CastMember>,
    pub directors: Vec<String>,
    pub writers: Vec<String>,
    pub producers: Vec<String>,
    pub screenwriters: Vec<String>,
    pub composers: Vec<String>,
    pub countries: Vec<String>,
    pub taglines: Vec<String>,
    pub season_plots: Vec<String>,
    pub genres: Vec<String>,
    pub studios: Vec<String>,
}

impl Credits {
    fn names(&self, kind: DimensionKind) -> &[String] {
        match kind {
            DimensionKind::Actor => &[],
            DimensionKind::Director => &self.directors,
            DimensionKind::Writer => &self.writers,
            DimensionKind::Producer => &self.producers,
            DimensionKind::Screenwriter => &self.screenwriters,
            DimensionKind::Composer => &self.composers,
            DimensionKind::Country => &self.countries,
            DimensionKind::Tagline => &self.taglines,
            DimensionKind::SeasonPlot => &self.season_plots,
            DimensionKind::Genre => &self.genres,
            DimensionKind::Studio => &self.studios,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrapedMovie {
    /// Path of the scanned video file.
    pub file: String,
    #[serde(flatten)]
    pub scraped: Scraped,
    #[serde(default)]
    pub credits: Credits,
    #[serde(default)]
    pub images: Vec<NewImage>,
    #[serde(default)]
    pub trailers: Vec<NewTrailer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrapedShow {
    #[serde(flatten)]
    pub scraped: Scraped,
    #[serde(default)]
    pub credits: Credits,
    #[serde(default)]
    pub images: Vec<NewImage>,
    pub episodes: Vec<ScrapedEpisode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrapedEpisode {
    pub file: String,
    pub season: i64,
    pub episode: i64,
    #[serde(flatten)]
    pub scraped: Scraped,
    #[serde(default)]
    pub credits: Credits,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub movies: Vec<i64>,
    pub shows: Vec<i64>,
    pub episodes: Vec<i64>,
    /// Links skipped because the edge already existed.
    pub duplicate_links: usize,
}

/// Parse a batch file and import it. Used by `scrapedb import`.
pub async fn run_import(config: &Config, path: &Path) -> Result<ImportReport> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read import file: {}", path.display()))?;
    let batch: ImportBatch = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse import file: {}", path.display()))?;

    let store = Store::open(config).await?;
    let report = import_batch(&store, &batch).await?;
    store.close().await;

    println!(
        "Imported {} movie(s), {} show(s), {} episode(s)",
        report.movies.len(),
        report.shows.len(),
        report.episodes.len()
    );
    if report.duplicate_links > 0 {
        println!("  {} duplicate link(s) skipped", report.duplicate_links);
    }
    Ok(report)
}

/// Import everything in `batch` in a single transaction.
pub async fn import_batch(store: &Store, batch: &ImportBatch) -> error::Result<ImportReport> {
    let mut session = store.begin().await?;
    let mut report = ImportReport::default();

    for movie in &batch.movies {
        let id = import_movie(&mut session, movie, &mut report).await?;
        report.movies.push(id);
    }
    for show in &batch.shows {
        let id = import_show(&mut session, show, &mut report).await?;
        report.shows.push(id);
    }

    session.commit().await?;
    tracing::info!(
        movies = report.movies.len(),
        shows = report.shows.len(),
        episodes = report.episodes.len(),
        "import committed"
    );
    Ok(report)
}

pub async fn import_movie(
    session: &mut Session,
    movie: &ScrapedMovie,
    report: &mut ImportReport,
) -> error::Result<i64> {
    let file_id = session.register_file(&movie.file).await?;
    let id = session.insert_movie(file_id, &movie.scraped).await?;
    let media = MediaRef::movie(id);

    link_credits(session, media, &movie.credits, report).await?;
    for image in &movie.images {
        session.insert_image(media, image).await?;
    }
    for trailer in &movie.trailers {
        session.insert_trailer(id, trailer).await?;
    }
    session.refresh_cached(media).await?;
    Ok(id)
}

/// Import a show and its episodes. Episodes go first: re-pointing the file
/// of a show's only episode removes the show, and the episode insert then
/// finds or recreates it by online id or name.
pub async fn import_show(
    session: &mut Session,
    show: &ScrapedShow,
    report: &mut ImportReport,
) -> error::Result<i64> {
    if show.episodes.is_empty() {
        return Err(StoreError::InvalidInput(format!(
            "show '{}' has no episodes",
            show.scraped.name
        )));
    }

    let mut show_id = None;
    let mut episodes = Vec::with_capacity(show.episodes.len());
    for ep in &show.episodes {
        let file_id = session.register_file(&ep.file).await?;
        let number = EpisodeNumber {
            season: ep.season,
            episode: ep.episode,
        };
        let (id, sid) = session
            .insert_episode(file_id, ShowRef::New(&show.scraped), number, &ep.scraped)
            .await?;
        show_id = Some(sid);
        episodes.push((id, ep));
    }
    let show_id = show_id.ok_or_else(|| StoreError::InvalidInput("show has no episodes".into()))?;
    let show_ref = MediaRef::show(show_id);

    session.update_scraped(show_ref, &show.scraped).await?;
    link_credits(session, show_ref, &show.credits, report).await?;
    for image in &show.images {
        session.insert_image(show_ref, image).await?;
    }
    session.refresh_cached(show_ref).await?;

    for (id, ep) in episodes {
        let media = MediaRef::episode(id);
        link_credits(session, media, &ep.credits, report).await?;
        session.refresh_cached(media).await?;
        report.episodes.push(id);
    }
    Ok(show_id)
}

async fn link_credits(
    session: &mut Session,
    media: MediaRef,
    credits: &Credits,
    report: &mut ImportReport,
) -> error::Result<()> {
    for actor in &credits.actors {
        let linked = session
            .link(media, DimensionKind::Actor, &actor.name, actor.role.as_deref())
            .await;
        tolerate_duplicate(linked, report)?;
    }
    for kind in DimensionKind::ALL {
        for name in credits.names(kind) {
            let linked = session.link(media, kind, name, None).await;
            tolerate_duplicate(linked, report)?;
        }
    }
    Ok(())
}

fn tolerate_duplicate(
    linked: error::Result<i64>,
    report: &mut ImportReport,
) -> error::Result<()> {
    match linked {
        Ok(_) => Ok(()),
        Err(e) if e.is_recoverable() => {
            tracing::debug!(error = %e, "skipping duplicate link");
            report.duplicate_links += 1;
            Ok(())
        }
        Err(e) => Err(e),
    }
}
