use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::broadcast::error::TryRecvError;

use scrape_store::catalog;
use scrape_store::config::{Config, Policy};
use scrape_store::delete_queue::{self, FileRemover};
use scrape_store::error::StoreError;
use scrape_store::images::{self, ImageDedup, ImageFiles, NewImage, NewTrailer};
use scrape_store::import::{self, ImportBatch};
use scrape_store::media::{self, ShowRef};
use scrape_store::models::{
    DimensionKind, EpisodeNumber, ImageKind, Linkage, MediaKind, MediaRef, Scraped,
};
use scrape_store::orphans::ReclaimPolicy;
use scrape_store::relation::{self, LinkPolicy};
use scrape_store::store::{Session, Store};

async fn open_store(policy: Policy) -> (TempDir, Store) {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::minimal(tmp.path().join("data/scrape.sqlite"));
    config.policy = policy;
    let store = Store::open(&config).await.unwrap();
    (tmp, store)
}

fn scraped(name: &str) -> Scraped {
    Scraped {
        name: name.to_string(),
        ..Default::default()
    }
}

fn with_cover(name: &str, cover: &str) -> Scraped {
    Scraped {
        cover: Some(cover.to_string()),
        ..scraped(name)
    }
}

async fn new_movie(session: &mut Session, file: &str, data: &Scraped) -> MediaRef {
    let file_id = session.register_file(file).await.unwrap();
    MediaRef::movie(session.insert_movie(file_id, data).await.unwrap())
}

fn poster(path: &str) -> NewImage {
    NewImage {
        kind: ImageKind::Poster,
        season: None,
        files: ImageFiles {
            large_file: Some(path.to_string()),
            ..Default::default()
        },
    }
}

#[tokio::test]
async fn test_intern_returns_same_id_and_is_case_sensitive() {
    let (_tmp, store) = open_store(Policy::default()).await;
    let mut s = store.begin().await.unwrap();

    let a = s.intern(DimensionKind::Genre, "Drama").await.unwrap();
    let again = s.intern(DimensionKind::Genre, "Drama").await.unwrap();
    let lower = s.intern(DimensionKind::Genre, "drama").await.unwrap();
    assert_eq!(a, again);
    assert_ne!(a, lower);

    // Same name in another catalog is a separate entity.
    s.intern(DimensionKind::Tagline, "Drama").await.unwrap();
    assert_eq!(catalog::count(s.conn(), DimensionKind::Genre).await.unwrap(), 2);

    let err = s.intern(DimensionKind::Genre, "").await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidInput(_)));
}

#[tokio::test]
async fn test_delete_linked_dimension_is_refused() {
    let (_tmp, store) = open_store(Policy::default()).await;
    let mut s = store.begin().await.unwrap();
    let movie = new_movie(&mut s, "/v/heat.mkv", &scraped("Heat")).await;
    let id = s.link(movie, DimensionKind::Studio, "Warner", None).await.unwrap();

    let err = s.delete_dimension(DimensionKind::Studio, id).await.unwrap_err();
    match err {
        StoreError::ReferentialIntegrity { kind, id: got, edges } => {
            assert_eq!(kind, DimensionKind::Studio);
            assert_eq!(got, id);
            assert_eq!(edges, 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!StoreError::ReferentialIntegrity {
        kind: DimensionKind::Studio,
        id,
        edges: 1
    }
    .is_recoverable());

    assert!(s.unlink(movie, DimensionKind::Studio, id).await.unwrap());
    s.delete_dimension(DimensionKind::Studio, id).await.unwrap();
    assert!(catalog::get(s.conn(), DimensionKind::Studio, id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_recount_usage_is_advisory() {
    let (_tmp, store) = open_store(Policy::default()).await;
    let mut s = store.begin().await.unwrap();
    let a = new_movie(&mut s, "/v/a.mkv", &scraped("A")).await;
    let b = new_movie(&mut s, "/v/b.mkv", &scraped("B")).await;
    let id = s.link(a, DimensionKind::Genre, "Crime", None).await.unwrap();
    s.link(b, DimensionKind::Genre, "Crime", None).await.unwrap();

    let before = catalog::get(s.conn(), DimensionKind::Genre, id).await.unwrap().unwrap();
    assert_eq!(before.usage_count, 0);

    s.recount_usage().await.unwrap();
    let after = catalog::get(s.conn(), DimensionKind::Genre, id).await.unwrap().unwrap();
    assert_eq!(after.usage_count, 2);
}

#[tokio::test]
async fn test_replace_policy_updates_role_and_keeps_position() {
    let (_tmp, store) = open_store(Policy::default()).await;
    let mut s = store.begin().await.unwrap();
    let movie = new_movie(&mut s, "/v/heat.mkv", &scraped("Heat")).await;

    let pacino = s
        .link(movie, DimensionKind::Actor, "Al Pacino", Some("Hanna"))
        .await
        .unwrap();
    s.link(movie, DimensionKind::Actor, "Robert De Niro", Some("McCauley"))
        .await
        .unwrap();
    let again = s
        .link(movie, DimensionKind::Actor, "Al Pacino", Some("Vincent Hanna"))
        .await
        .unwrap();
    assert_eq!(pacino, again);

    let edges = relation::edges(s.conn(), movie, DimensionKind::Actor).await.unwrap();
    assert_eq!(edges.len(), 2);
    assert_eq!(edges[0].name, "Al Pacino");
    assert_eq!(edges[0].role.as_deref(), Some("Vincent Hanna"));
    assert_eq!(edges[1].name, "Robert De Niro");
}

#[tokio::test]
async fn test_insert_once_policy_rejects_duplicate() {
    let policy = Policy {
        link: LinkPolicy::InsertOnce,
        ..Default::default()
    };
    let (_tmp, store) = open_store(policy).await;
    let mut s = store.begin().await.unwrap();
    let movie = new_movie(&mut s, "/v/heat.mkv", &scraped("Heat")).await;

    s.link(movie, DimensionKind::Actor, "Al Pacino", Some("Hanna"))
        .await
        .unwrap();
    let err = s
        .link(movie, DimensionKind::Actor, "Al Pacino", Some("Other"))
        .await
        .unwrap_err();
    assert!(err.is_recoverable());
    assert!(matches!(err, StoreError::DuplicateRelation { .. }));

    let edges = relation::edges(s.conn(), movie, DimensionKind::Actor).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].role.as_deref(), Some("Hanna"));
}

#[tokio::test]
async fn test_legacy_policy_per_pair() {
    let policy = Policy {
        link: LinkPolicy::Legacy,
        ..Default::default()
    };
    let (_tmp, store) = open_store(policy).await;
    let mut s = store.begin().await.unwrap();
    let file = s.register_file("/v/tp/s01e01.mkv").await.unwrap();
    let show_data = scraped("Twin Peaks");
    let (_, show_id) = s
        .insert_episode(
            file,
            ShowRef::New(&show_data),
            EpisodeNumber { season: 1, episode: 1 },
            &scraped("Pilot"),
        )
        .await
        .unwrap();
    let show = MediaRef::show(show_id);
    let movie = new_movie(&mut s, "/v/heat.mkv", &scraped("Heat")).await;

    // Show actors replace.
    s.link(show, DimensionKind::Actor, "Kyle MacLachlan", Some("Cooper"))
        .await
        .unwrap();
    s.link(show, DimensionKind::Actor, "Kyle MacLachlan", Some("Dale Cooper"))
        .await
        .unwrap();
    assert_eq!(
        scrape_store::aggregate::aggregate(s.conn(), show, DimensionKind::Actor)
            .await
            .unwrap(),
        "Kyle MacLachlan (Dale Cooper)"
    );

    // Everything else is insert-once.
    s.link(show, DimensionKind::Genre, "Drama", None).await.unwrap();
    assert!(s.link(show, DimensionKind::Genre, "Drama", None).await.is_err());
    s.link(movie, DimensionKind::Actor, "Al Pacino", None).await.unwrap();
    assert!(s.link(movie, DimensionKind::Actor, "Al Pacino", None).await.is_err());
}

#[tokio::test]
async fn test_link_order_is_insertion_order() {
    let (_tmp, store) = open_store(Policy::default()).await;
    let mut s = store.begin().await.unwrap();
    let movie = new_movie(&mut s, "/v/m.mkv", &scraped("M")).await;

    for name in ["Zeta", "Alpha", "Mu"] {
        s.link(movie, DimensionKind::Country, name, None).await.unwrap();
    }
    assert_eq!(
        scrape_store::aggregate::aggregate(s.conn(), movie, DimensionKind::Country)
            .await
            .unwrap(),
        "Zeta, Alpha, Mu"
    );
}

#[tokio::test]
async fn test_unsupported_pairs_and_missing_media() {
    let (_tmp, store) = open_store(Policy::default()).await;
    let mut s = store.begin().await.unwrap();
    let movie = new_movie(&mut s, "/v/m.mkv", &scraped("M")).await;

    let err = s
        .link(movie, DimensionKind::SeasonPlot, "Plot", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::UnsupportedRelation(DimensionKind::SeasonPlot, MediaKind::Movie)
    ));

    let err = s
        .link(MediaRef::movie(999), DimensionKind::Genre, "Crime", None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));

    let logo = NewImage {
        kind: ImageKind::NetworkLogo,
        season: None,
        files: ImageFiles::default(),
    };
    let err = s.insert_image(movie, &logo).await.unwrap_err();
    assert!(matches!(err, StoreError::UnsupportedImage(..)));
}

#[tokio::test]
async fn test_heat_scenario_with_sweep() {
    let policy = Policy {
        reclaim_on_delete: ReclaimPolicy::None,
        ..Default::default()
    };
    let (_tmp, store) = open_store(policy).await;
    let mut s = store.begin().await.unwrap();
    let movie = new_movie(&mut s, "/v/heat.mkv", &scraped("Heat")).await;

    let pacino = s
        .link(movie, DimensionKind::Actor, "Al Pacino", Some("Vincent Hanna"))
        .await
        .unwrap();
    let de_niro = s
        .link(movie, DimensionKind::Actor, "Robert De Niro", Some("Neil McCauley"))
        .await
        .unwrap();
    s.commit().await.unwrap();

    assert_eq!(
        store.aggregate(movie, DimensionKind::Actor).await.unwrap(),
        "Al Pacino (Vincent Hanna), Robert De Niro (Neil McCauley)"
    );

    let mut s = store.begin().await.unwrap();
    let outcome = s.delete(movie).await.unwrap();
    assert!(outcome.reclaimed.is_empty());
    assert_eq!(catalog::count(s.conn(), DimensionKind::Actor).await.unwrap(), 2);

    let swept = s.sweep_orphans(DimensionKind::Actor).await.unwrap();
    assert_eq!(swept.into_iter().collect::<Vec<_>>(), {
        let mut ids = vec![pacino, de_niro];
        ids.sort();
        ids
    });
    assert_eq!(catalog::count(s.conn(), DimensionKind::Actor).await.unwrap(), 0);
    s.commit().await.unwrap();
}

#[tokio::test]
async fn test_legacy_reclaim_runs_at_delete_time_for_four_kinds() {
    let (_tmp, store) = open_store(Policy::default()).await;
    let mut s = store.begin().await.unwrap();
    let movie = new_movie(&mut s, "/v/heat.mkv", &scraped("Heat")).await;
    s.link(movie, DimensionKind::Actor, "Al Pacino", Some("Vincent Hanna"))
        .await
        .unwrap();
    s.link(movie, DimensionKind::Actor, "Robert De Niro", None)
        .await
        .unwrap();
    s.link(movie, DimensionKind::Genre, "Crime", None).await.unwrap();
    let writer = s
        .link(movie, DimensionKind::Writer, "Michael Mann", None)
        .await
        .unwrap();

    let outcome = s.delete(movie).await.unwrap();
    assert_eq!(outcome.reclaimed[&DimensionKind::Actor].len(), 2);
    assert_eq!(outcome.reclaimed[&DimensionKind::Genre].len(), 1);
    assert!(!outcome.reclaimed.contains_key(&DimensionKind::Writer));
    assert_eq!(catalog::count(s.conn(), DimensionKind::Actor).await.unwrap(), 0);

    // Writers wait for a sweep.
    assert_eq!(catalog::count(s.conn(), DimensionKind::Writer).await.unwrap(), 1);
    let swept = s.sweep_orphans(DimensionKind::Writer).await.unwrap();
    assert!(swept.contains(&writer));
}

#[tokio::test]
async fn test_shared_entity_survives_delete() {
    let (_tmp, store) = open_store(Policy {
        reclaim_on_delete: ReclaimPolicy::All,
        ..Default::default()
    })
    .await;
    let mut s = store.begin().await.unwrap();
    let heat = new_movie(&mut s, "/v/heat.mkv", &scraped("Heat")).await;
    let godfather = new_movie(&mut s, "/v/gf2.mkv", &scraped("The Godfather Part II")).await;
    let pacino = s.link(heat, DimensionKind::Actor, "Al Pacino", None).await.unwrap();
    s.link(godfather, DimensionKind::Actor, "Al Pacino", Some("Michael"))
        .await
        .unwrap();

    let outcome = s.delete(heat).await.unwrap();
    assert!(outcome.reclaimed.is_empty());
    assert!(catalog::get(s.conn(), DimensionKind::Actor, pacino)
        .await
        .unwrap()
        .is_some());
    assert!(relation::edges(s.conn(), heat, DimensionKind::Actor)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_entity_shared_across_media_kinds_is_not_an_orphan() {
    let (_tmp, store) = open_store(Policy::default()).await;
    let mut s = store.begin().await.unwrap();
    let movie = new_movie(&mut s, "/v/m.mkv", &scraped("Mulholland Drive")).await;
    let file = s.register_file("/v/tp/s01e01.mkv").await.unwrap();
    let show_data = scraped("Twin Peaks");
    let (ep, _) = s
        .insert_episode(
            file,
            ShowRef::New(&show_data),
            EpisodeNumber { season: 1, episode: 1 },
            &scraped("Pilot"),
        )
        .await
        .unwrap();
    let lynch = s
        .link(movie, DimensionKind::Director, "David Lynch", None)
        .await
        .unwrap();
    s.link(MediaRef::episode(ep), DimensionKind::Director, "David Lynch", None)
        .await
        .unwrap();

    s.delete(movie).await.unwrap();
    assert!(s.sweep_orphans(DimensionKind::Director).await.unwrap().is_empty());
    assert!(catalog::get(s.conn(), DimensionKind::Director, lynch)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_show_lifecycle() {
    let (_tmp, store) = open_store(Policy::default()).await;
    let mut s = store.begin().await.unwrap();
    let show_data = scraped("Twin Peaks");

    let f1 = s.register_file("/v/tp/s01e01.mkv").await.unwrap();
    let f2 = s.register_file("/v/tp/s01e02.mkv").await.unwrap();
    let (e1, show_id) = s
        .insert_episode(f1, ShowRef::New(&show_data), EpisodeNumber { season: 1, episode: 1 }, &scraped("Pilot"))
        .await
        .unwrap();
    let (e2, same_show) = s
        .insert_episode(f2, ShowRef::Id(show_id), EpisodeNumber { season: 1, episode: 2 }, &scraped("Traces"))
        .await
        .unwrap();
    assert_eq!(show_id, same_show);

    let outcome = s.delete(MediaRef::episode(e1)).await.unwrap();
    assert_eq!(outcome.deleted, vec![MediaRef::episode(e1)]);
    assert!(media::get_media(s.conn(), MediaRef::show(show_id)).await.unwrap().is_some());

    let outcome = s.delete(MediaRef::episode(e2)).await.unwrap();
    assert_eq!(
        outcome.deleted,
        vec![MediaRef::episode(e2), MediaRef::show(show_id)]
    );
    assert!(media::get_media(s.conn(), MediaRef::show(show_id)).await.unwrap().is_none());
    assert_eq!(media::file_linkage(s.conn(), f2).await.unwrap(), Linkage::Unscraped);
}

#[tokio::test]
async fn test_delete_show_takes_its_episodes() {
    let (_tmp, store) = open_store(Policy::default()).await;
    let mut s = store.begin().await.unwrap();
    let show_data = scraped("Twin Peaks");
    let mut files = Vec::new();
    let mut show_id = 0;
    for ep in 1..=3 {
        let file = s.register_file(&format!("/v/tp/s01e0{ep}.mkv")).await.unwrap();
        let (_, sid) = s
            .insert_episode(
                file,
                ShowRef::New(&show_data),
                EpisodeNumber { season: 1, episode: ep },
                &scraped(&format!("Episode {ep}")),
            )
            .await
            .unwrap();
        show_id = sid;
        files.push(file);
    }
    assert_eq!(media::episodes_of(s.conn(), show_id).await.unwrap().len(), 3);

    let outcome = s.delete(MediaRef::show(show_id)).await.unwrap();
    assert_eq!(outcome.deleted[0], MediaRef::show(show_id));
    assert_eq!(outcome.deleted.len(), 4);
    assert_eq!(outcome.released_files.len(), 3);
    assert_eq!(media::count(s.conn(), MediaKind::Episode).await.unwrap(), 0);
    for file in files {
        assert_eq!(media::file_linkage(s.conn(), file).await.unwrap(), Linkage::Unscraped);
    }
}

#[tokio::test]
async fn test_repointing_file_replaces_entity() {
    let (_tmp, store) = open_store(Policy::default()).await;
    let mut s = store.begin().await.unwrap();
    let file = s.register_file("/v/unknown.mkv").await.unwrap();
    assert_eq!(media::file_linkage(s.conn(), file).await.unwrap(), Linkage::Unscraped);

    let first = s.insert_movie(file, &scraped("Wrong Match")).await.unwrap();
    s.link(MediaRef::movie(first), DimensionKind::Actor, "Nobody", None)
        .await
        .unwrap();
    assert_eq!(
        media::file_linkage(s.conn(), file).await.unwrap(),
        Linkage::Linked(MediaRef::movie(first))
    );

    let second = s.insert_movie(file, &scraped("Right Match")).await.unwrap();
    assert_ne!(first, second);
    assert!(media::get_media(s.conn(), MediaRef::movie(first)).await.unwrap().is_none());
    assert_eq!(
        media::file_linkage(s.conn(), file).await.unwrap(),
        Linkage::Linked(MediaRef::movie(second))
    );
    assert_eq!(catalog::count(s.conn(), DimensionKind::Actor).await.unwrap(), 0);

    // The same file can turn out to be an episode.
    let show_data = scraped("Show");
    let (ep, _) = s
        .insert_episode(file, ShowRef::New(&show_data), EpisodeNumber { season: 1, episode: 1 }, &scraped("Pilot"))
        .await
        .unwrap();
    assert_eq!(media::count(s.conn(), MediaKind::Movie).await.unwrap(), 0);
    assert_eq!(
        media::file_linkage(s.conn(), file).await.unwrap(),
        Linkage::Linked(MediaRef::episode(ep))
    );

    let changes = s.commit().await.unwrap();
    assert!(changes.deleted.contains(&MediaRef::movie(first)));
    assert!(changes.deleted.contains(&MediaRef::movie(second)));
    assert!(changes.touched.contains(&MediaRef::episode(ep)));
    assert!(changes.touched.is_disjoint(&changes.deleted));
}

#[tokio::test]
async fn test_swept_dimension_id_is_not_reused() {
    let policy = Policy {
        reclaim_on_delete: ReclaimPolicy::None,
        ..Default::default()
    };
    let (_tmp, store) = open_store(policy).await;
    let mut s = store.begin().await.unwrap();
    let movie = new_movie(&mut s, "/v/heat.mkv", &scraped("Heat")).await;
    let old = s.link(movie, DimensionKind::Actor, "Val Kilmer", None).await.unwrap();
    s.unlink(movie, DimensionKind::Actor, old).await.unwrap();

    let swept = s.sweep_orphans(DimensionKind::Actor).await.unwrap();
    assert!(swept.contains(&old));

    let new = s.link(movie, DimensionKind::Actor, "Jon Voight", None).await.unwrap();
    assert_ne!(old, new);
    assert!(catalog::get(s.conn(), DimensionKind::Actor, old).await.unwrap().is_none());
}

#[tokio::test]
async fn test_sessions_wait_for_each_other() {
    let (_tmp, store) = open_store(Policy::default()).await;

    let mut first = store.begin().await.unwrap();
    assert_eq!(catalog::count(first.conn(), DimensionKind::Actor).await.unwrap(), 0);

    let other = store.clone();
    let second = tokio::spawn(async move {
        let mut s = other.begin().await?;
        catalog::count(s.conn(), DimensionKind::Actor).await?;
        s.intern(DimensionKind::Actor, "Robert De Niro").await?;
        s.commit().await?;
        Ok::<_, StoreError>(())
    });

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(!second.is_finished());

    first.intern(DimensionKind::Actor, "Al Pacino").await.unwrap();
    first.commit().await.unwrap();

    second.await.unwrap().unwrap();
    let mut conn = store.pool().acquire().await.unwrap();
    assert_eq!(catalog::count(&mut conn, DimensionKind::Actor).await.unwrap(), 2);
}

#[tokio::test]
async fn test_begin_after_close_fails() {
    let (_tmp, store) = open_store(Policy::default()).await;
    let handle = store.clone();
    store.close().await;
    assert!(matches!(handle.begin().await, Err(StoreError::Closed)));
}

#[tokio::test]
async fn test_release_file() {
    let (_tmp, store) = open_store(Policy::default()).await;
    let mut s = store.begin().await.unwrap();
    let movie = new_movie(&mut s, "/v/heat.mkv", &scraped("Heat")).await;
    let file = media::get_media(s.conn(), movie).await.unwrap().unwrap().file_id.unwrap();

    let outcome = s.release_file(file).await.unwrap().unwrap();
    assert_eq!(outcome.deleted, vec![movie]);
    assert_eq!(outcome.released_files, vec![file]);
    assert!(s.release_file(file).await.unwrap().is_none());

    let err = s.release_file(12345).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn test_sweep_empty_shows() {
    let (_tmp, store) = open_store(Policy::default()).await;
    let mut s = store.begin().await.unwrap();
    let lonely = s.insert_show(&scraped("Pilot Only")).await.unwrap();
    assert_eq!(s.sweep_empty_shows().await.unwrap(), vec![lonely]);
    assert_eq!(media::count(s.conn(), MediaKind::Show).await.unwrap(), 0);
}

#[tokio::test]
async fn test_poster_dedup_scenario() {
    let (_tmp, store) = open_store(Policy::default()).await;
    let mut s = store.begin().await.unwrap();
    let movie = new_movie(&mut s, "/v/heat.mkv", &scraped("Heat")).await;

    let a = s.insert_image(movie, &poster("poster.jpg")).await.unwrap();
    let b = s.insert_image(movie, &poster("poster.jpg")).await.unwrap();
    assert_eq!(a, b);
    let posters = images::images_for(s.conn(), movie, Some(ImageKind::Poster))
        .await
        .unwrap();
    assert_eq!(posters.len(), 1);

    // Logos are not deduplicated under the legacy rule.
    let logo = NewImage {
        kind: ImageKind::Logo,
        ..poster("logo.png")
    };
    let l1 = s.insert_image(movie, &logo).await.unwrap();
    let l2 = s.insert_image(movie, &logo).await.unwrap();
    assert_ne!(l1, l2);
}

#[tokio::test]
async fn test_dedup_all_covers_every_kind() {
    let (_tmp, store) = open_store(Policy {
        image_dedup: ImageDedup::All,
        ..Default::default()
    })
    .await;
    let mut s = store.begin().await.unwrap();
    let movie = new_movie(&mut s, "/v/heat.mkv", &scraped("Heat")).await;
    let photo = NewImage {
        kind: ImageKind::ActorPhoto,
        ..poster("pacino.jpg")
    };
    let a = s.insert_image(movie, &photo).await.unwrap();
    let b = s.insert_image(movie, &photo).await.unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn test_cover_enqueued_with_remaining_use_count() {
    let (_tmp, store) = open_store(Policy::default()).await;
    let mut s = store.begin().await.unwrap();
    let a = new_movie(&mut s, "/v/a.mkv", &with_cover("A", "/cache/shared.jpg")).await;
    let b = new_movie(&mut s, "/v/b.mkv", &with_cover("B", "/cache/shared.jpg")).await;

    let outcome = s.delete(a).await.unwrap();
    assert_eq!(outcome.queued.len(), 1);
    assert_eq!(outcome.queued[0].path, "/cache/shared.jpg");
    assert_eq!(outcome.queued[0].use_count, 1);

    let outcome = s.delete(b).await.unwrap();
    assert_eq!(outcome.queued[0].use_count, 0);
    assert_eq!(delete_queue::pending(s.conn()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_delete_image_queues_files() {
    let (_tmp, store) = open_store(Policy::default()).await;
    let mut s = store.begin().await.unwrap();
    let movie = new_movie(&mut s, "/v/heat.mkv", &scraped("Heat")).await;
    let image = NewImage {
        kind: ImageKind::Backdrop,
        season: None,
        files: ImageFiles {
            thumb_url: Some("https://img/t.jpg".into()),
            thumb_file: Some("/cache/t.jpg".into()),
            large_url: Some("https://img/l.jpg".into()),
            large_file: Some("/cache/l.jpg".into()),
        },
    };
    let id = s.insert_image(movie, &image).await.unwrap();

    let queued = s.delete_image(movie, id).await.unwrap();
    let mut paths: Vec<_> = queued.iter().map(|e| e.path.as_str()).collect();
    paths.sort();
    assert_eq!(paths, vec!["/cache/l.jpg", "/cache/t.jpg"]);
    assert!(queued.iter().all(|e| e.use_count == 0));
    assert!(images::get_image(s.conn(), MediaKind::Movie, id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_trailers_are_unique_per_movie() {
    let (_tmp, store) = open_store(Policy::default()).await;
    let mut s = store.begin().await.unwrap();
    let movie = new_movie(&mut s, "/v/heat.mkv", &scraped("Heat")).await;
    let trailer = NewTrailer {
        site: "youtube".into(),
        video_key: "2GfZl4kuVNI".into(),
        name: Some("Official Trailer".into()),
        language: Some("en".into()),
    };
    let a = s.insert_trailer(movie.id, &trailer).await.unwrap();
    let b = s.insert_trailer(movie.id, &trailer).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(images::trailers_for(s.conn(), movie.id).await.unwrap().len(), 1);
}

#[derive(Default)]
struct RecordingRemover {
    removed: Mutex<Vec<PathBuf>>,
    fail: bool,
}

#[async_trait]
impl FileRemover for RecordingRemover {
    async fn remove(&self, path: &Path) -> std::io::Result<()> {
        if self.fail {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only cache",
            ));
        }
        self.removed.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

#[tokio::test]
async fn test_reap_rechecks_use_count() {
    let (_tmp, store) = open_store(Policy::default()).await;
    let mut s = store.begin().await.unwrap();
    let a = new_movie(&mut s, "/v/a.mkv", &with_cover("A", "/cache/a.jpg")).await;
    let b = new_movie(&mut s, "/v/b.mkv", &with_cover("B", "/cache/shared.jpg")).await;
    new_movie(&mut s, "/v/c.mkv", &with_cover("C", "/cache/shared.jpg")).await;
    s.delete(a).await.unwrap();
    s.delete(b).await.unwrap();
    s.commit().await.unwrap();

    let remover = RecordingRemover::default();
    let report = store.reap(&remover, true).await.unwrap();
    assert_eq!(report.removed, vec!["/cache/a.jpg".to_string()]);
    assert_eq!(report.kept, vec!["/cache/shared.jpg".to_string()]);
    assert!(remover.removed.lock().unwrap().is_empty());
    assert_eq!(store.pending_deletes().await.unwrap().len(), 2);

    let report = store.reap(&remover, false).await.unwrap();
    assert_eq!(report.removed, vec!["/cache/a.jpg".to_string()]);
    assert_eq!(
        *remover.removed.lock().unwrap(),
        vec![PathBuf::from("/cache/a.jpg")]
    );
    assert!(store.pending_deletes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_removal_stays_queued() {
    let (_tmp, store) = open_store(Policy::default()).await;
    let mut s = store.begin().await.unwrap();
    let a = new_movie(&mut s, "/v/a.mkv", &with_cover("A", "/cache/a.jpg")).await;
    s.delete(a).await.unwrap();
    s.commit().await.unwrap();

    let remover = RecordingRemover {
        fail: true,
        ..Default::default()
    };
    let report = store.reap(&remover, false).await.unwrap();
    assert!(report.removed.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(store.pending_deletes().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_dropped_session_rolls_back_silently() {
    let (_tmp, store) = open_store(Policy::default()).await;
    let mut rx = store.subscribe();

    {
        let mut s = store.begin().await.unwrap();
        let movie = new_movie(&mut s, "/v/heat.mkv", &scraped("Heat")).await;
        s.link(movie, DimensionKind::Actor, "Al Pacino", None).await.unwrap();
    }

    let mut s = store.begin().await.unwrap();
    assert_eq!(media::count(s.conn(), MediaKind::Movie).await.unwrap(), 0);
    assert_eq!(catalog::count(s.conn(), DimensionKind::Actor).await.unwrap(), 0);
    s.rollback().await.unwrap();
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_commit_publishes_one_change_set() {
    let (_tmp, store) = open_store(Policy::default()).await;
    let mut rx = store.subscribe();

    let mut s = store.begin().await.unwrap();
    let movie = new_movie(&mut s, "/v/heat.mkv", &scraped("Heat")).await;
    s.link(movie, DimensionKind::Actor, "Al Pacino", None).await.unwrap();
    s.link(movie, DimensionKind::Genre, "Crime", None).await.unwrap();
    let published = s.commit().await.unwrap();

    let received = rx.try_recv().unwrap();
    assert_eq!(received, published);
    assert!(received.touched.contains(&movie));
    assert!(received.dimensions.contains(&DimensionKind::Actor));
    assert!(received.dimensions.contains(&DimensionKind::Genre));
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_full_record_of_episode_uses_show_images() {
    let (_tmp, store) = open_store(Policy::default()).await;
    let mut s = store.begin().await.unwrap();
    let file = s.register_file("/v/tp/s01e01.mkv").await.unwrap();
    let show_data = scraped("Twin Peaks");
    let (ep, show_id) = s
        .insert_episode(file, ShowRef::New(&show_data), EpisodeNumber { season: 1, episode: 1 }, &scraped("Pilot"))
        .await
        .unwrap();
    s.insert_image(MediaRef::show(show_id), &poster("/cache/tp.jpg"))
        .await
        .unwrap();
    s.link(MediaRef::episode(ep), DimensionKind::Writer, "Mark Frost", None)
        .await
        .unwrap();
    s.commit().await.unwrap();

    let record = store.full_record(MediaRef::episode(ep)).await.unwrap();
    assert_eq!(record.scraped.name, "Pilot");
    assert_eq!(record.show_id, Some(show_id));
    assert_eq!(record.file_path.as_deref(), Some("/v/tp/s01e01.mkv"));
    assert_eq!(record.images.len(), 1);
    assert_eq!(record.aggregates[&DimensionKind::Writer], "Mark Frost");

    let err = store.full_record(MediaRef::movie(42)).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn test_import_writes_cached_aggregates() {
    let (_tmp, store) = open_store(Policy::default()).await;
    let batch: ImportBatch = serde_json::from_str(
        r#"{"movies": [{
            "file": "/v/heat.mkv",
            "name": "Heat",
            "credits": {"actors": [{"name": "Al Pacino", "role": "Vincent Hanna"}], "genres": ["Crime", "Thriller"]}
        }]}"#,
    )
    .unwrap();
    let report = import::import_batch(&store, &batch).await.unwrap();
    assert_eq!(report.movies.len(), 1);

    let cached: Option<String> =
        sqlx::query_scalar("SELECT cached_genres FROM movies WHERE id = ?")
            .bind(report.movies[0])
            .fetch_one(store.pool())
            .await
            .unwrap();
    assert_eq!(cached.as_deref(), Some("Crime, Thriller"));
    let cached: Option<String> =
        sqlx::query_scalar("SELECT cached_directors FROM movies WHERE id = ?")
            .bind(report.movies[0])
            .fetch_one(store.pool())
            .await
            .unwrap();
    assert_eq!(cached, None);
}

#[tokio::test]
async fn test_failed_import_leaves_store_untouched() {
    let (_tmp, store) = open_store(Policy::default()).await;
    let batch: ImportBatch = serde_json::from_str(
        r#"{
            "movies": [{"file": "/v/heat.mkv", "name": "Heat"}],
            "shows": [{"name": "Empty", "episodes": []}]
        }"#,
    )
    .unwrap();
    let err = import::import_batch(&store, &batch).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidInput(_)));

    let mut conn = store.pool().acquire().await.unwrap();
    assert_eq!(media::count(&mut conn, MediaKind::Movie).await.unwrap(), 0);
}

#[tokio::test]
async fn test_sweep_on_open() {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::minimal(tmp.path().join("scrape.sqlite"));
    config.policy.reclaim_on_delete = ReclaimPolicy::None;

    let store = Store::open(&config).await.unwrap();
    let mut s = store.begin().await.unwrap();
    let movie = new_movie(&mut s, "/v/heat.mkv", &scraped("Heat")).await;
    s.link(movie, DimensionKind::Actor, "Al Pacino", None).await.unwrap();
    s.delete(movie).await.unwrap();
    s.commit().await.unwrap();
    store.close().await;

    config.maintenance.sweep_on_open = true;
    let store = Store::open(&config).await.unwrap();
    let mut conn = store.pool().acquire().await.unwrap();
    assert_eq!(catalog::count(&mut conn, DimensionKind::Actor).await.unwrap(), 0);
}
