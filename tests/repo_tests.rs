mod common;

use common::{new_presentation, TestEnv};
use folio::models::*;
// Bring trait method namespaces into scope so calls on SqliteRepo resolve.
use folio::repo::{AnalyticsRepo, CommentRepo, FileRepo, PresentationRepo, RepoError};

fn new_file(id: &str, presentation_id: &str, primary: bool) -> NewFile {
    NewFile {
        id: id.into(),
        presentation_id: presentation_id.into(),
        original_name: format!("{id}.pdf"),
        file_path: format!("files-{id}.pdf"),
        file_type: ".pdf".into(),
        file_size: 10,
        mime_type: "application/pdf".into(),
        is_primary: primary,
    }
}

#[tokio::test]
async fn tags_and_metadata_round_trip() {
    let env = TestEnv::new().await;
    let mut new = new_presentation("p1", "Intro");
    new.tags = vec!["b".into(), "a".into(), "b".into()];
    new.metadata = serde_json::json!({"files_count": 1, "nested": {"k": [1, 2]}});
    env.repo.create_presentation(new).await.unwrap();

    let p = env.repo.get_presentation("p1").await.unwrap();
    assert_eq!(p.tags, vec!["b", "a", "b"]);
    assert_eq!(p.metadata["nested"]["k"][1], 2);
    assert_eq!(p.category.as_deref(), Some("general"));
    assert!(p.is_public);
    assert_eq!((p.view_count, p.download_count), (0, 0));
}

#[tokio::test]
async fn listing_is_public_only_unless_admin() {
    let env = TestEnv::new().await;
    env.repo.create_presentation(new_presentation("pub", "Visible")).await.unwrap();
    let mut hidden = new_presentation("priv", "Hidden");
    hidden.is_public = false;
    env.repo.create_presentation(hidden).await.unwrap();

    let public = env.repo.list_presentations(&PresentationFilters::default()).await.unwrap();
    assert_eq!(public.len(), 1);
    assert!(public.iter().all(|p| p.is_public));

    let admin = PresentationFilters { include_private: true, ..Default::default() };
    assert_eq!(env.repo.list_presentations(&admin).await.unwrap().len(), 2);
    assert_eq!(env.repo.count_presentations(&admin).await.unwrap(), 2);

    // private rows are still reachable by id
    assert!(!env.repo.get_presentation("priv").await.unwrap().is_public);
}

#[tokio::test]
async fn listing_filters_order_and_paging() {
    let env = TestEnv::new().await;
    for (id, title, author, category) in [
        ("1", "Rust ownership", "Ann Lee", "systems"),
        ("2", "async basics", "Bob", "systems"),
        ("3", "CSS grids", "Annabel", "web"),
    ] {
        let mut p = new_presentation(id, title);
        p.author = author.into();
        p.category = category.into();
        env.repo.create_presentation(p).await.unwrap();
    }

    // newest first by default
    let all = env.repo.list_presentations(&PresentationFilters::default()).await.unwrap();
    let ids: Vec<_> = all.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["3", "2", "1"]);

    let f = PresentationFilters { category: Some("systems".into()), ..Default::default() };
    assert_eq!(env.repo.list_presentations(&f).await.unwrap().len(), 2);

    let f = PresentationFilters { author: Some("Ann".into()), ..Default::default() };
    assert_eq!(env.repo.list_presentations(&f).await.unwrap().len(), 2);

    let f = PresentationFilters { sort: SortKey::Title, order: SortOrder::Asc, ..Default::default() };
    let titles: Vec<_> = env.repo.list_presentations(&f).await.unwrap().into_iter().map(|p| p.title).collect();
    assert_eq!(titles, vec!["async basics", "CSS grids", "Rust ownership"]);

    let f = PresentationFilters { limit: Some(2), offset: Some(2), ..Default::default() };
    let page = env.repo.list_presentations(&f).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, "1");
    assert_eq!(env.repo.count_presentations(&f).await.unwrap(), 3);
}

#[tokio::test]
async fn search_matches_tags_and_escapes_wildcards() {
    let env = TestEnv::new().await;
    env.repo.create_presentation(new_presentation("a", "100% coverage")).await.unwrap();
    env.repo.create_presentation(new_presentation("b", "1000 tests")).await.unwrap();
    let mut tagged = new_presentation("c", "Untitled");
    tagged.tags = vec!["sqlite".into()];
    env.repo.create_presentation(tagged).await.unwrap();

    let f = PresentationFilters { search: Some("0%".into()), ..Default::default() };
    let hits = env.repo.list_presentations(&f).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "a");

    let f = PresentationFilters { search: Some("SQLite".into()), ..Default::default() };
    assert_eq!(env.repo.list_presentations(&f).await.unwrap()[0].id, "c");

    let f = PresentationFilters { search: Some("nothing like this".into()), ..Default::default() };
    assert!(env.repo.list_presentations(&f).await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_update_fails_without_mutating() {
    let env = TestEnv::new().await;
    env.repo.create_presentation(new_presentation("p1", "Before")).await.unwrap();

    let err = env.repo.update_presentation("p1", UpdatePresentation::default()).await.unwrap_err();
    assert!(matches!(err, RepoError::EmptyUpdate));
    assert_eq!(env.repo.get_presentation("p1").await.unwrap().title, "Before");

    let upd = UpdatePresentation {
        title: Some("After".into()),
        tags: Some(vec!["x".into(), "y".into()]),
        is_public: Some(false),
        ..Default::default()
    };
    let p = env.repo.update_presentation("p1", upd).await.unwrap();
    assert_eq!(p.title, "After");
    assert_eq!(p.tags, vec!["x", "y"]);
    assert!(!p.is_public);
    assert_eq!(p.author, "Alice");

    let missing = UpdatePresentation { title: Some("x".into()), ..Default::default() };
    assert!(matches!(env.repo.update_presentation("nope", missing).await, Err(RepoError::NotFound)));
}

#[tokio::test]
async fn concurrent_view_increments_are_not_lost() {
    const K: usize = 20;
    let env = TestEnv::new().await;
    env.repo.create_presentation(new_presentation("hot", "Popular")).await.unwrap();

    let tasks = (0..K).map(|_| {
        let repo = env.repo.clone();
        tokio::spawn(async move { repo.increment_view_count("hot").await })
    });
    for res in futures_util::future::join_all(tasks).await {
        res.unwrap().unwrap();
    }
    assert_eq!(env.repo.get_presentation("hot").await.unwrap().view_count, K as i64);

    env.repo.increment_download_count("hot").await.unwrap();
    assert_eq!(env.repo.get_presentation("hot").await.unwrap().download_count, 1);
    assert!(matches!(env.repo.increment_view_count("nope").await, Err(RepoError::NotFound)));
}

#[tokio::test]
async fn create_upload_orders_files_primary_first() {
    let env = TestEnv::new().await;
    let files = vec![new_file("f1", "p1", true), new_file("f2", "p1", false), new_file("f3", "p1", false)];
    env.repo.create_upload(new_presentation("p1", "Deck"), files).await.unwrap();

    let listed = env.repo.list_files("p1").await.unwrap();
    let ids: Vec<_> = listed.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, vec!["f1", "f2", "f3"]);
    assert_eq!(listed.iter().filter(|f| f.is_primary).count(), 1);

    env.repo.delete_file("f2").await.unwrap();
    assert_eq!(env.repo.list_files("p1").await.unwrap().len(), 2);
    assert!(matches!(env.repo.get_file("f2").await, Err(RepoError::NotFound)));
}

#[tokio::test]
async fn create_file_attaches_to_existing_presentation() {
    let env = TestEnv::new().await;
    env.repo.create_presentation(new_presentation("p1", "Deck")).await.unwrap();

    let created = env.repo.create_file(new_file("extra", "p1", false)).await.unwrap();
    assert_eq!(created.id, "extra");
    assert_eq!(created.presentation_id.as_deref(), Some("p1"));
    assert_eq!(created.original_name, "extra.pdf");
    assert!(!created.is_primary);

    let fetched = env.repo.get_file("extra").await.unwrap();
    assert_eq!(fetched.file_path, "files-extra.pdf");
    assert_eq!(fetched.mime_type.as_deref(), Some("application/pdf"));
    assert_eq!(env.repo.list_files("p1").await.unwrap().len(), 1);

    // foreign key to presentations is enforced
    let orphan = env.repo.create_file(new_file("orphan", "nope", false)).await.unwrap_err();
    assert!(matches!(orphan, RepoError::Storage(_)));
    assert!(matches!(env.repo.get_file("orphan").await, Err(RepoError::NotFound)));
}

#[tokio::test]
async fn update_can_clear_nullable_fields() {
    let env = TestEnv::new().await;
    let mut new = new_presentation("p1", "Deck");
    new.description = Some("old".into());
    new.date_presented = chrono::NaiveDate::from_ymd_opt(2024, 3, 1);
    env.repo.create_presentation(new).await.unwrap();

    let upd = UpdatePresentation { description: Some(None), category: Some(None), date_presented: Some(None), ..Default::default() };
    assert!(!upd.is_empty());
    let p = env.repo.update_presentation("p1", upd).await.unwrap();
    assert!(p.description.is_none());
    assert!(p.category.is_none());
    assert!(p.date_presented.is_none());
    assert_eq!(p.title, "Deck");
}

#[tokio::test]
async fn failed_upload_registration_leaves_no_rows() {
    let env = TestEnv::new().await;
    // second file collides on id, so the whole unit must roll back
    let files = vec![new_file("dup", "p1", true), new_file("dup", "p1", false)];
    let err = env.repo.create_upload(new_presentation("p1", "Deck"), files).await.unwrap_err();
    assert!(matches!(err, RepoError::Storage(_)));
    assert!(matches!(env.repo.get_presentation("p1").await, Err(RepoError::NotFound)));
}

#[tokio::test]
async fn delete_cascades_and_keeps_analytics_history() {
    let env = TestEnv::new().await;
    env.repo
        .create_upload(new_presentation("p1", "Doomed"), vec![new_file("f1", "p1", true)])
        .await
        .unwrap();
    let comment = env
        .repo
        .create_comment(NewComment {
            presentation_id: "p1".into(),
            author_name: Some("Bob".into()),
            author_email: None,
            content: "nice".into(),
        })
        .await
        .unwrap();
    assert!(!comment.is_approved);
    let client = ClientInfo { user_agent: Some("test".into()), ip: Some("127.0.0.1".into()) };
    env.repo.record_event(NewEvent::new(EventKind::View, Some("p1"), &client)).await.unwrap();

    env.repo.delete_presentation("p1").await.unwrap();

    assert!(env.repo.list_files("p1").await.unwrap().is_empty());
    assert!(env.repo.list_comments("p1").await.unwrap().is_empty());
    let events = env.repo.recent_events(10).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "view");
    assert_eq!(events[0].presentation_id, None);
    assert!(matches!(env.repo.delete_presentation("p1").await, Err(RepoError::NotFound)));
}

#[tokio::test]
async fn event_stats_group_by_type_and_day() {
    let env = TestEnv::new().await;
    env.repo.create_presentation(new_presentation("p1", "Stats")).await.unwrap();
    env.repo.create_presentation(new_presentation("p2", "Other")).await.unwrap();
    let client = ClientInfo::default();
    for kind in [EventKind::View, EventKind::View, EventKind::Download] {
        env.repo.record_event(NewEvent::new(kind, Some("p1"), &client)).await.unwrap();
    }
    env.repo.record_event(NewEvent::new(EventKind::View, Some("p2"), &client)).await.unwrap();
    env.repo
        .record_event(NewEvent::new(EventKind::Search, None, &client).with_metadata(serde_json::json!({"query": "x"})))
        .await
        .unwrap();

    let today = chrono::Utc::now().date_naive().to_string();
    let stats = env.repo.event_stats(Some("p1"), Timeframe::Week).await.unwrap();
    assert_eq!(stats.len(), 2);
    let views = stats.iter().find(|s| s.event_type == "view").unwrap();
    assert_eq!((views.count, views.date.as_str()), (2, today.as_str()));

    let global = env.repo.event_stats(None, Timeframe::default()).await.unwrap();
    let total: i64 = global.iter().map(|s| s.count).sum();
    assert_eq!(total, 5);

    let recent = env.repo.recent_events(1).await.unwrap();
    assert_eq!(recent[0].event_type, "search");
    assert_eq!(recent[0].metadata["query"], "x");
}

#[tokio::test]
async fn category_summaries_and_totals_cover_public_rows() {
    let env = TestEnv::new().await;
    for (id, category) in [("1", "talks"), ("2", "talks"), ("3", "")] {
        let mut p = new_presentation(id, "t");
        p.category = category.into();
        env.repo.create_presentation(p).await.unwrap();
    }
    let mut hidden = new_presentation("4", "t");
    hidden.is_public = false;
    env.repo.create_presentation(hidden).await.unwrap();
    env.repo.increment_view_count("1").await.unwrap();
    env.repo.increment_download_count("2").await.unwrap();
    env.repo.increment_view_count("4").await.unwrap();

    let cats = env.repo.category_summaries().await.unwrap();
    assert_eq!(cats[0].name, "talks");
    assert_eq!(cats[0].count, 2);
    assert!(cats[0].latest.is_some());
    assert_eq!(cats[1].name, "uncategorized");

    let totals = env.repo.content_totals().await.unwrap();
    assert_eq!(totals.total_presentations, 3);
    assert_eq!(totals.total_views, 1);
    assert_eq!(totals.total_downloads, 1);
}
