//! # Scrape Store
//!
//! Normalized metadata store for a local video-library scraper cache.
//!
//! Movies, shows and episodes are linked many-to-many to deduplicated
//! descriptive entities (actors, directors, genres, studios, ...). Catalog
//! entities that nothing references anymore are garbage collected, either
//! as part of a media delete or by a maintenance sweep. Artwork is kept
//! per owner, and files that may no longer be needed on disk go through a
//! reference-counted delete queue instead of being removed inline.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────────────────────────┐
//! │  Importer  │──▶│ Session (one write transaction)│──▶ ChangeSet feed
//! │  (JSON)    │   └──────────────┬────────────────┘
//! └────────────┘                  ▼
//!        ┌──────────┬──────────┬──────────┬──────────────┐
//!        │  media   │ relation │  images  │ delete_queue │
//!        └────┬─────┴────┬─────┴──────────┴──────┬───────┘
//!             ▼          ▼                       ▼
//!        ┌─────────┐ ┌─────────┐           ┌──────────┐
//!        │ orphans │ │ catalog │           │   reap   │ (outside tx)
//!        └─────────┘ └─────────┘           └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! scrapedb init                     # create database
//! scrapedb import scraped.json      # import scraper output
//! scrapedb show movie 1             # full record as JSON
//! scrapedb sweep                    # remove orphaned entities
//! scrapedb reap --dry-run           # see which cached files can go
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and table naming |
//! | [`error`] | Store error type |
//! | [`db`] | Database connection |
//! | [`migrate`] | Versioned schema migrations |
//! | [`catalog`] | Deduplicated dimension entities |
//! | [`relation`] | Media-to-entity edges |
//! | [`aggregate`] | Comma-joined display strings |
//! | [`orphans`] | Orphan reclamation and sweeps |
//! | [`images`] | Artwork variants and trailers |
//! | [`delete_queue`] | Reference-counted file deletion |
//! | [`media`] | Media rows and the delete cascade |
//! | [`record`] | Full record reads |
//! | [`store`] | Store facade, sessions and change feed |
//! | [`import`] | Scraper batch import |
//! | [`stats`] | Database statistics |

pub mod aggregate;
pub mod catalog;
pub mod config;
pub mod db;
pub mod delete_queue;
pub mod error;
pub mod images;
pub mod import;
pub mod media;
pub mod migrate;
pub mod models;
pub mod orphans;
pub mod record;
pub mod relation;
pub mod stats;
pub mod store;
