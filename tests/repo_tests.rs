#![cfg(feature = "inmem-store")]

use chrono::NaiveDate;
use marquee::{
    models::*,
    query::{MovieFilter, MovieQuery},
    rating::RatingScore,
    repo::{inmem::InMemRepo, Entity, RepoError},
};
// Bring trait method namespaces into scope so calls on InMemRepo resolve.
use marquee::repo::{CatalogRepo, CommentRepo, EngagementRepo, MovieRepo, ProfileRepo, RatingRepo};

/// Helper that returns a fresh, empty repository for every test run.
fn repo() -> InMemRepo {
    InMemRepo::ephemeral()
}

fn new_movie(title: &str, year: i32, category: Vec<Category>) -> NewMovie {
    NewMovie {
        title: title.into(),
        category,
        year_of_production: NaiveDate::from_ymd_opt(year, 6, 1),
        ..NewMovie::default()
    }
}

fn score(v: i32) -> RatingScore {
    RatingScore::try_from(v).unwrap()
}

fn comment(user: UserId, movie_id: Id, parent_id: Option<Id>) -> NewComment {
    NewComment {
        user_id: user,
        username: format!("user{user}"),
        movie_id,
        content: "great".into(),
        parent_id,
        active: true,
    }
}

#[tokio::test]
async fn movie_crud_slug_and_defaults() {
    let r = repo();
    let m = r.create_movie(new_movie("The Big Sleep", 1946, vec![Category::Crime])).await.unwrap();
    assert_eq!(m.slug, "the-big-sleep");
    assert_eq!(m.image, DEFAULT_POSTER);
    assert_eq!(m.banner, DEFAULT_BANNER);
    assert_eq!(m.view_count, 0);

    // same title gets the next free suffix; an explicit clash is refused
    let remake = r.create_movie(new_movie("The Big Sleep", 1978, vec![])).await.unwrap();
    assert_eq!(remake.slug, "the-big-sleep-2");
    let mut explicit = new_movie("The Big Sleep", 2030, vec![]);
    explicit.slug = Some("the-big-sleep-2".into());
    assert!(matches!(r.create_movie(explicit).await, Err(RepoError::Conflict(_))));

    // update keeps slug, views and creation time
    r.record_view(m.id).await.unwrap();
    let upd = r.update_movie(m.id, new_movie("The Big Sleep (1946)", 1946, vec![Category::Drama])).await.unwrap();
    assert_eq!(upd.slug, "the-big-sleep");
    assert_eq!(upd.view_count, 1);
    assert_eq!(upd.created_at, m.created_at);
    assert_eq!(upd.category, vec![Category::Drama]);

    // explicit slug change must stay unique
    let other = r.create_movie(new_movie("Vertigo", 1958, vec![])).await.unwrap();
    let mut clash = new_movie("Vertigo", 1958, vec![]);
    clash.slug = Some("the-big-sleep".into());
    assert!(matches!(r.update_movie(other.id, clash).await, Err(RepoError::Conflict(_))));

    assert!(matches!(r.get_movie(999).await, Err(RepoError::NotFound(Entity::Movie))));
}

#[tokio::test]
async fn view_count_increments_once_per_call() {
    let r = repo();
    let m = r.create_movie(new_movie("Heat", 1995, vec![])).await.unwrap();
    for _ in 0..3 {
        r.record_view(m.id).await.unwrap();
    }
    assert_eq!(r.get_movie(m.id).await.unwrap().view_count, 3);
}

#[tokio::test]
async fn list_movies_filters_and_pages() {
    let r = repo();
    r.create_movie(new_movie("Alien", 1979, vec![Category::Horror, Category::ScienceFiction])).await.unwrap();
    r.create_movie(new_movie("Aliens", 1986, vec![Category::Action])).await.unwrap();
    r.create_movie(new_movie("Casablanca", 1942, vec![Category::Romance])).await.unwrap();

    let q = MovieQuery { filter: MovieFilter { search: Some("alien".into()), ..MovieFilter::default() }, ..MovieQuery::default() };
    let page = r.list_movies(&q, 20).await.unwrap();
    assert_eq!(page.total, 2);

    let q = MovieQuery { filter: MovieFilter { category: Some("fiction".into()), ..MovieFilter::default() }, ..MovieQuery::default() };
    let page = r.list_movies(&q, 20).await.unwrap();
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].title, "Alien");

    let q = MovieQuery { page: 2, ..MovieQuery::default() };
    let page = r.list_movies(&q, 2).await.unwrap();
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.last_page, 2);
}

#[tokio::test]
async fn delete_movie_cascades() {
    let r = repo();
    let m = r.create_movie(new_movie("Jaws", 1975, vec![])).await.unwrap();
    let p = r.create_person(NewPerson { name: Some("Roy Scheider".into()), ..NewPerson::default() }).await.unwrap();
    let cast = r
        .create_cast(NewMovieCast { person_id: p.id, movie_id: m.id, played_as: Some("Brody".into()), order: 0 })
        .await
        .unwrap();
    let (rating, _) = r.upsert_rating(5, m.id, score(9)).await.unwrap();
    let c = r.create_comment(comment(5, m.id, None)).await.unwrap();
    r.toggle_watchlist(5, m.id).await.unwrap();

    r.delete_movie(m.id).await.unwrap();
    assert!(matches!(r.get_cast(cast.id).await, Err(RepoError::NotFound(Entity::Cast))));
    assert!(matches!(r.get_rating(rating.id).await, Err(RepoError::NotFound(_))));
    assert!(matches!(r.get_comment(c.id).await, Err(RepoError::NotFound(_))));
    assert!(r.list_watchlist(5).await.unwrap().is_empty());
    assert!(r.list_activity(5).await.unwrap().is_empty());
    // the person outlives the movie
    assert!(r.get_person(p.id).await.is_ok());
    assert!(r.filmography(p.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn cast_pair_is_unique_and_ordered() {
    let r = repo();
    let m = r.create_movie(new_movie("Tootsie", 1982, vec![])).await.unwrap();
    let a = r.create_person(NewPerson { name: Some("A".into()), ..NewPerson::default() }).await.unwrap();
    let b = r.create_person(NewPerson { name: Some("B".into()), ..NewPerson::default() }).await.unwrap();
    r.create_cast(NewMovieCast { person_id: a.id, movie_id: m.id, played_as: None, order: 2 }).await.unwrap();
    r.create_cast(NewMovieCast { person_id: b.id, movie_id: m.id, played_as: None, order: 1 }).await.unwrap();

    let dup = r.create_cast(NewMovieCast { person_id: a.id, movie_id: m.id, played_as: None, order: 3 }).await;
    assert!(matches!(dup, Err(RepoError::Conflict(_))));
    let missing = r.create_cast(NewMovieCast { person_id: 999, movie_id: m.id, played_as: None, order: 0 }).await;
    assert!(matches!(missing, Err(RepoError::NotFound(Entity::Person))));

    let members = r.cast_for_movie(m.id).await.unwrap();
    let names: Vec<_> = members.iter().map(|c| c.person.name.clone().unwrap()).collect();
    assert_eq!(names, vec!["B", "A"]);

    let only_a = r.list_cast(CastFilter { person: Some(a.id), movie: None }).await.unwrap();
    assert_eq!(only_a.len(), 1);
    assert_eq!(r.filmography(a.id).await.unwrap()[0].id, m.id);
}

#[tokio::test]
async fn second_rating_replaces_first() {
    let r = repo();
    let m = r.create_movie(new_movie("Up", 2009, vec![Category::Animated])).await.unwrap();
    let (first, outcome) = r.upsert_rating(3, m.id, score(4)).await.unwrap();
    assert_eq!(outcome, Upserted::Created);
    let (second, outcome) = r.upsert_rating(3, m.id, score(9)).await.unwrap();
    assert_eq!(outcome, Upserted::Updated);
    assert_eq!(first.id, second.id);
    assert_eq!(r.movie_scores(m.id).await.unwrap(), vec![9]);

    r.upsert_rating(4, m.id, score(7)).await.unwrap();
    assert_eq!(r.movie_scores(m.id).await.unwrap().len(), 2);

    let rate_logs = r.list_activity(3).await.unwrap().into_iter().filter(|a| a.action == "rate").count();
    assert_eq!(rate_logs, 2);

    assert!(matches!(r.upsert_rating(3, 999, score(5)).await, Err(RepoError::NotFound(Entity::Movie))));
}

#[tokio::test]
async fn one_comment_per_user_and_movie() {
    let r = repo();
    let m = r.create_movie(new_movie("Ran", 1985, vec![])).await.unwrap();
    let root = r.create_comment(comment(1, m.id, None)).await.unwrap();
    let err = r.create_comment(comment(1, m.id, None)).await.unwrap_err();
    assert!(matches!(err, RepoError::Conflict(_)));

    // replies count as the user's comment too
    r.create_comment(comment(2, m.id, Some(root.id))).await.unwrap();
    assert!(matches!(r.create_comment(comment(2, m.id, None)).await, Err(RepoError::Conflict(_))));

    let orphan = r.create_comment(comment(3, m.id, Some(999))).await;
    assert!(matches!(orphan, Err(RepoError::NotFound(Entity::Comment))));
}

#[tokio::test]
async fn deleting_comment_removes_reply_subtree() {
    let r = repo();
    let m = r.create_movie(new_movie("Ikiru", 1952, vec![])).await.unwrap();
    let root = r.create_comment(comment(1, m.id, None)).await.unwrap();
    let reply = r.create_comment(comment(2, m.id, Some(root.id))).await.unwrap();
    r.create_comment(comment(3, m.id, Some(reply.id))).await.unwrap();
    let other = r.create_comment(comment(4, m.id, None)).await.unwrap();

    assert_eq!(r.delete_comment(root.id).await.unwrap(), 3);
    let left = r.list_comments(CommentFilter { movie: Some(m.id), ..CommentFilter::default() }).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, other.id);
}

#[tokio::test]
async fn moderation_flag_filters_listing() {
    let r = repo();
    let m = r.create_movie(new_movie("Stalker", 1979, vec![])).await.unwrap();
    let mut pending = comment(1, m.id, None);
    pending.active = false;
    let c = r.create_comment(pending).await.unwrap();
    let visible = CommentFilter { movie: Some(m.id), active: Some(true), ..CommentFilter::default() };
    assert!(r.list_comments(visible.clone()).await.unwrap().is_empty());

    r.set_comment_active(c.id, true).await.unwrap();
    assert_eq!(r.list_comments(visible).await.unwrap().len(), 1);
}

#[tokio::test]
async fn watchlist_toggle_clears_history_and_logs() {
    let r = repo();
    let m = r.create_movie(new_movie("Paprika", 2006, vec![])).await.unwrap();
    let (_, inserted) = r.add_history(9, m.id).await.unwrap();
    assert!(inserted);
    let (_, inserted) = r.add_history(9, m.id).await.unwrap();
    assert!(!inserted, "history add is idempotent");

    assert_eq!(r.toggle_watchlist(9, m.id).await.unwrap(), Toggled::Added);
    assert!(r.list_history(9).await.unwrap().is_empty());
    assert_eq!(r.toggle_watchlist(9, m.id).await.unwrap(), Toggled::Removed);
    assert!(r.list_watchlist(9).await.unwrap().is_empty());

    let actions: Vec<_> = r.list_activity(9).await.unwrap().into_iter().map(|a| a.action).collect();
    assert_eq!(actions, vec!["watchlist_remove", "watchlist_add", "history_add"]);
}

#[tokio::test]
async fn watchlist_orders_important_then_year() {
    let r = repo();
    let old = r.create_movie(new_movie("Metropolis", 1927, vec![])).await.unwrap();
    let new = r.create_movie(new_movie("Dune", 2021, vec![])).await.unwrap();
    let mid = r.create_movie(new_movie("Blade Runner", 1982, vec![])).await.unwrap();
    for m in [&old, &new, &mid] {
        r.toggle_watchlist(1, m.id).await.unwrap();
    }
    let entry = r.set_watchlist_important(1, old.id, true).await.unwrap();
    assert!(entry.important);

    let ids: Vec<_> = r.list_watchlist(1).await.unwrap().into_iter().map(|(_, m)| m.id).collect();
    assert_eq!(ids, vec![old.id, new.id, mid.id]);

    let missing = r.set_watchlist_important(2, old.id, true).await;
    assert!(matches!(missing, Err(RepoError::NotFound(Entity::WatchList))));
}

#[tokio::test]
async fn blocklist_toggles() {
    let r = repo();
    let m = r.create_movie(new_movie("Cats", 2019, vec![])).await.unwrap();
    assert_eq!(r.toggle_blocklist(1, m.id).await.unwrap(), Toggled::Added);
    assert_eq!(r.list_blocklist(1).await.unwrap().len(), 1);
    assert_eq!(r.toggle_blocklist(1, m.id).await.unwrap(), Toggled::Removed);
    assert!(r.list_blocklist(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn history_count_among_filmography() {
    let r = repo();
    let a = r.create_movie(new_movie("A", 2000, vec![])).await.unwrap();
    let b = r.create_movie(new_movie("B", 2001, vec![])).await.unwrap();
    r.add_history(1, a.id).await.unwrap();
    assert_eq!(r.count_history_among(1, &[a.id, b.id]).await.unwrap(), 1);
    assert_eq!(r.count_history_among(2, &[a.id, b.id]).await.unwrap(), 0);
}

#[tokio::test]
async fn related_and_featured() {
    let r = repo();
    let base = r.create_movie(new_movie("Base", 2000, vec![Category::Comedy, Category::Drama])).await.unwrap();
    r.create_movie(new_movie("Zed", 2000, vec![Category::Drama])).await.unwrap();
    r.create_movie(new_movie("Amy", 2000, vec![Category::Comedy])).await.unwrap();
    r.create_movie(new_movie("Other", 2000, vec![Category::Horror])).await.unwrap();

    let titles: Vec<_> = r.related_movies(base.id, 10).await.unwrap().into_iter().map(|m| m.title).collect();
    assert_eq!(titles, vec!["Amy", "Zed"]);

    let mut top = new_movie("Top", 2000, vec![]);
    top.status = Some(Status::TopRated);
    r.create_movie(top).await.unwrap();
    assert_eq!(r.movies_by_status(Status::TopRated, 10).await.unwrap().len(), 1);
    assert!(r.movies_by_status(Status::MostWatched, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn snapshot_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let id = {
        let r = InMemRepo::with_snapshot(path.clone());
        r.create_movie(new_movie("Persisted", 1999, vec![])).await.unwrap().id
    };
    let reopened = InMemRepo::with_snapshot(path);
    assert_eq!(reopened.get_movie(id).await.unwrap().title, "Persisted");
    // ids keep increasing after reload
    let next = reopened.create_movie(new_movie("Next", 2000, vec![])).await.unwrap();
    assert!(next.id > id);
}

#[tokio::test]
async fn snapshot_is_replaced_atomically_in_a_fresh_dir() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("state.json");
    let r = InMemRepo::with_snapshot(path.clone());
    for title in ["One", "Two", "Three"] {
        r.create_movie(new_movie(title, 2001, vec![])).await.unwrap();
    }
    r.upsert_profile(7, ProfileUpdate { city: Some("Oslo".into()), ..ProfileUpdate::default() }).await.unwrap();

    // only the snapshot itself is left behind, no half-written temp files
    let names: Vec<_> = std::fs::read_dir(path.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(names, vec!["state.json".to_string()]);

    let reopened = InMemRepo::with_snapshot(path);
    let q = MovieQuery::default();
    assert_eq!(reopened.list_movies(&q, 10).await.unwrap().total, 3);
    assert_eq!(reopened.get_profile(7).await.unwrap().unwrap().city.as_deref(), Some("Oslo"));
}

#[tokio::test]
async fn unwritable_snapshot_surfaces_as_error() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let r = InMemRepo::with_snapshot(blocker.join("state.json"));
    let err = r.create_movie(new_movie("Lost", 2001, vec![])).await.unwrap_err();
    assert!(matches!(err, RepoError::Internal(_)));
}

#[tokio::test]
async fn comment_edit_keeps_moderation_state() {
    let r = repo();
    let m = r.create_movie(new_movie("Ikiru", 1952, vec![])).await.unwrap();
    let mut pending = comment(3, m.id, None);
    pending.active = false;
    let c = r.create_comment(pending).await.unwrap();
    let edited = r.update_comment_content(c.id, "revised".into()).await.unwrap();
    assert_eq!(edited.content, "revised");
    assert!(!edited.active);
    assert!(edited.updated_at >= c.updated_at);
    assert_eq!(edited.created_at, c.created_at);
    assert!(matches!(r.update_comment_content(999, "x".into()).await, Err(RepoError::NotFound(Entity::Comment))));
}

#[tokio::test]
async fn profile_upsert_checks_movie_and_clears_on_delete() {
    let r = repo();
    assert_eq!(r.get_profile(5).await.unwrap(), None);
    let m = r.create_movie(new_movie("Seven Samurai", 1954, vec![])).await.unwrap();
    let upd = ProfileUpdate { favorite_category: vec![Category::Action], favorite_movie: Some(m.id), ..ProfileUpdate::default() };
    let p = r.upsert_profile(5, upd).await.unwrap();
    assert_eq!(p.favorite_movie, Some(m.id));

    let missing = ProfileUpdate { favorite_movie: Some(12345), ..ProfileUpdate::default() };
    assert!(matches!(r.upsert_profile(5, missing).await, Err(RepoError::NotFound(Entity::Movie))));

    r.delete_movie(m.id).await.unwrap();
    let p = r.get_profile(5).await.unwrap().unwrap();
    assert_eq!(p.favorite_movie, None);
    assert_eq!(p.favorite_category, vec![Category::Action]);
}

#[tokio::test]
async fn persons_keep_aliases() {
    let r = repo();
    let p = r
        .create_person(NewPerson {
            name: Some("Toshiro Mifune".into()),
            also_known_as: Some("三船 敏郎".into()),
            profile_path: Some("/mifune.jpg".into()),
            ..NewPerson::default()
        })
        .await
        .unwrap();
    let fetched = r.get_person(p.id).await.unwrap();
    assert_eq!(fetched.also_known_as.as_deref(), Some("三船 敏郎"));
    assert_eq!(fetched.profile_path.as_deref(), Some("/mifune.jpg"));
}
