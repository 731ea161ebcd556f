//! Core data types shared by every part of the store.
//!
//! Media entities (movies, shows, episodes), the eleven dimension kinds that
//! can be linked to them, and the naming rules that map both onto SQLite
//! tables. Table and column names are only ever derived from these enums,
//! never from caller-supplied strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// The three kinds of scraped media record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Movie,
    Show,
    Episode,
}

impl MediaKind {
    pub const ALL: [MediaKind; 3] = [MediaKind::Movie, MediaKind::Show, MediaKind::Episode];

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Show => "show",
            MediaKind::Episode => "episode",
        }
    }

    /// Table holding rows of this kind.
    pub fn table(self) -> &'static str {
        match self {
            MediaKind::Movie => "movies",
            MediaKind::Show => "shows",
            MediaKind::Episode => "episodes",
        }
    }

    /// Value stamped into `scanned_files.scraper_kind` for file-backed kinds.
    ///
    /// Shows have no file, so they have no linkage code.
    pub fn linkage_code(self) -> Option<i64> {
        match self {
            MediaKind::Movie => Some(LINKAGE_MOVIE),
            MediaKind::Show => None,
            MediaKind::Episode => Some(LINKAGE_EPISODE),
        }
    }

    pub fn from_linkage_code(code: i64) -> Option<MediaKind> {
        match code {
            LINKAGE_MOVIE => Some(MediaKind::Movie),
            LINKAGE_EPISODE => Some(MediaKind::Episode),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" | "movies" => Ok(MediaKind::Movie),
            "show" | "shows" => Ok(MediaKind::Show),
            "episode" | "episodes" => Ok(MediaKind::Episode),
            other => Err(StoreError::InvalidInput(format!(
                "unknown media kind '{}': expected movie, show or episode",
                other
            ))),
        }
    }
}

/// Linkage sentinel for a scanned file that has not been scraped.
pub const UNSCRAPED: i64 = 0;
pub const LINKAGE_MOVIE: i64 = 1;
pub const LINKAGE_EPISODE: i64 = 3;

/// Address of one media row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub id: i64,
}

impl MediaRef {
    pub fn movie(id: i64) -> Self {
        Self { kind: MediaKind::Movie, id }
    }

    pub fn show(id: i64) -> Self {
        Self { kind: MediaKind::Show, id }
    }

    pub fn episode(id: i64) -> Self {
        Self { kind: MediaKind::Episode, id }
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// A deduplicated descriptive entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionKind {
    Actor,
    Director,
    Writer,
    Producer,
    Screenwriter,
    Composer,
    Country,
    Tagline,
    SeasonPlot,
    Genre,
    Studio,
}

impl DimensionKind {
    pub const ALL: [DimensionKind; 11] = [
        DimensionKind::Actor,
        DimensionKind::Director,
        DimensionKind::Writer,
        DimensionKind::Producer,
        DimensionKind::Screenwriter,
        DimensionKind::Composer,
        DimensionKind::Country,
        DimensionKind::Tagline,
        DimensionKind::SeasonPlot,
        DimensionKind::Genre,
        DimensionKind::Studio,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DimensionKind::Actor => "actor",
            DimensionKind::Director => "director",
            DimensionKind::Writer => "writer",
            DimensionKind::Producer => "producer",
            DimensionKind::Screenwriter => "screenwriter",
            DimensionKind::Composer => "composer",
            DimensionKind::Country => "country",
            DimensionKind::Tagline => "tagline",
            DimensionKind::SeasonPlot => "season_plot",
            DimensionKind::Genre => "genre",
            DimensionKind::Studio => "studio",
        }
    }

    /// Catalog table for this kind. Also the suffix of every edge table.
    pub fn table(self) -> &'static str {
        match self {
            DimensionKind::Actor => "actors",
            DimensionKind::Director => "directors",
            DimensionKind::Writer => "writers",
            DimensionKind::Producer => "producers",
            DimensionKind::Screenwriter => "screenwriters",
            DimensionKind::Composer => "composers",
            DimensionKind::Country => "countries",
            DimensionKind::Tagline => "taglines",
            DimensionKind::SeasonPlot => "season_plots",
            DimensionKind::Genre => "genres",
            DimensionKind::Studio => "studios",
        }
    }

    /// Whether edges of this kind carry an attribute (the actor's role).
    pub fn has_attribute(self) -> bool {
        matches!(self, DimensionKind::Actor)
    }

    /// Column on the media row caching this kind's aggregation string.
    pub fn cache_column(self) -> String {
        format!("cached_{}", self.table())
    }

    /// Media kinds that can reference this dimension kind.
    pub fn partitions(self) -> impl Iterator<Item = MediaKind> {
        MediaKind::ALL.into_iter().filter(move |m| supports(*m, self))
    }
}

impl fmt::Display for DimensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DimensionKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DimensionKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s || k.table() == s)
            .ok_or_else(|| StoreError::InvalidInput(format!("unknown dimension kind '{}'", s)))
    }
}

/// Which dimension kinds a media kind can be linked to.
pub fn supports(media: MediaKind, dimension: DimensionKind) -> bool {
    use DimensionKind::*;
    match media {
        MediaKind::Movie => dimension != SeasonPlot,
        MediaKind::Show => true,
        MediaKind::Episode => matches!(
            dimension,
            Actor | Director | Writer | Producer | Screenwriter | Composer
        ),
    }
}

/// Edge table name for a supported (media, dimension) pair.
pub fn edge_table(media: MediaKind, dimension: DimensionKind) -> Option<String> {
    supports(media, dimension).then(|| format!("{}_{}", media.as_str(), dimension.table()))
}

/// Dimension kinds a media kind can be linked to, in catalog order.
pub fn supported_dimensions(media: MediaKind) -> impl Iterator<Item = DimensionKind> {
    DimensionKind::ALL
        .into_iter()
        .filter(move |d| supports(media, *d))
}

/// One catalog row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dimension {
    pub id: i64,
    pub kind: DimensionKind,
    pub name: String,
    pub usage_count: i64,
}

/// One relation between a media row and a catalog row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
    pub dimension_id: i64,
    pub name: String,
    pub role: Option<String>,
    pub seq: i64,
}

/// Scalar attributes shared by every media kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scraped {
    pub name: String,
    /// Release year for movies, premiere date for shows, air date for episodes.
    pub date: Option<String>,
    pub rating: Option<f64>,
    pub plot: Option<String>,
    pub online_id: Option<i64>,
    pub imdb_id: Option<String>,
    pub content_rating: Option<String>,
    pub cover: Option<String>,
}

/// A movie or show row as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaRow {
    pub media: MediaRef,
    /// Anchoring scanned file; `None` for shows.
    pub file_id: Option<i64>,
    pub scraped: Scraped,
}

/// Episode-specific placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeNumber {
    pub season: i64,
    pub episode: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeRow {
    pub id: i64,
    pub show_id: i64,
    pub file_id: i64,
    pub number: EpisodeNumber,
    pub scraped: Scraped,
}

/// Artwork variants attachable to a movie or show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    Poster,
    Backdrop,
    Logo,
    StudioLogo,
    NetworkLogo,
    ActorPhoto,
}

impl ImageKind {
    pub const ALL: [ImageKind; 6] = [
        ImageKind::Poster,
        ImageKind::Backdrop,
        ImageKind::Logo,
        ImageKind::StudioLogo,
        ImageKind::NetworkLogo,
        ImageKind::ActorPhoto,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ImageKind::Poster => "poster",
            ImageKind::Backdrop => "backdrop",
            ImageKind::Logo => "logo",
            ImageKind::StudioLogo => "studio_logo",
            ImageKind::NetworkLogo => "network_logo",
            ImageKind::ActorPhoto => "actor_photo",
        }
    }

    /// Whether an image of this kind may be owned by `owner`.
    pub fn allowed_on(self, owner: MediaKind) -> bool {
        match owner {
            MediaKind::Movie => self != ImageKind::NetworkLogo,
            MediaKind::Show => true,
            MediaKind::Episode => false,
        }
    }

    /// Kinds that historically deduplicate by local file path.
    pub fn dedups_by_path(self) -> bool {
        matches!(self, ImageKind::Poster | ImageKind::Backdrop)
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| StoreError::InvalidInput(format!("unknown image kind '{}'", s)))
    }
}

/// Linkage fields of a scanned file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    Unscraped,
    Linked(MediaRef),
}
