//! Lock-guarded in-memory store, optionally snapshotted to JSON after every write.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::*;
use crate::comments::subtree_ids;
use crate::query;
use crate::validation::slugify;

const SNAPSHOT_FILE: &str = "state.json";

#[derive(Default, Serialize, Deserialize)]
struct State {
    movies: BTreeMap<Id, Movie>,
    persons: BTreeMap<Id, Person>,
    casts: BTreeMap<Id, MovieCast>,
    links: BTreeMap<Id, MovieLink>,
    ratings: BTreeMap<Id, Rating>,
    comments: BTreeMap<Id, Comment>,
    history: BTreeMap<Id, HistoryEntry>,
    watchlist: BTreeMap<Id, WatchListEntry>,
    blocklist: BTreeMap<Id, BlockListEntry>,
    activity: BTreeMap<Id, Activity>,
    #[serde(default)]
    profiles: BTreeMap<UserId, UserProfile>,
    next_id: Id,
}

impl State {
    fn next_id(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }

    fn movie(&self, id: Id) -> RepoResult<&Movie> {
        self.movies.get(&id).ok_or(RepoError::NotFound(Entity::Movie))
    }

    fn log(&mut self, user_id: UserId, movie_id: Id, action: ActivityAction) {
        let id = self.next_id();
        self.activity.insert(id, Activity { id, user_id, movie_id, action: action.as_str().to_string(), created_at: Utc::now() });
    }

    fn slug_taken(&self, slug: &str, except: Option<Id>) -> bool {
        self.movies.values().any(|m| m.slug == slug && Some(m.id) != except)
    }

    fn free_slug(&self, base: &str) -> String {
        free_slug(base, |candidate| self.slug_taken(candidate, None))
    }

    fn with_movies<E>(&self, entries: impl Iterator<Item = E>, movie_of: impl Fn(&E) -> Id) -> Vec<(E, Movie)> {
        entries
            .filter_map(|e| {
                let movie = self.movies.get(&movie_of(&e))?.clone();
                Some((e, movie))
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct InMemRepo {
    state: Arc<RwLock<State>>,
    snapshot_path: Option<Arc<PathBuf>>,
}

impl InMemRepo {
    fn data_dir() -> PathBuf {
        std::env::var("MARQUEE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"))
    }

    fn load_state_from(path: &Path) -> State {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                Ok(s) => {
                    info!(path = %path.display(), movies = s.movies.len(), "loaded snapshot");
                    s
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable snapshot, starting empty");
                    State::default()
                }
            },
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no snapshot, starting empty");
                State::default()
            }
        }
    }

    /// Store backed by `<MARQUEE_DATA_DIR>/state.json` (default `data/`).
    pub fn new() -> Self {
        let mut path = Self::data_dir();
        path.push(SNAPSHOT_FILE);
        Self::with_snapshot(path)
    }

    pub fn with_snapshot(path: PathBuf) -> Self {
        let state = Self::load_state_from(&path);
        Self { state: Arc::new(RwLock::new(state)), snapshot_path: Some(Arc::new(path)) }
    }

    /// Store that never touches disk.
    pub fn ephemeral() -> Self {
        Self { state: Arc::new(RwLock::new(State::default())), snapshot_path: None }
    }

    fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
    }

    fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
    }

    /// Writes `state` to a temp file beside the snapshot and renames it into place. Callers hold
    /// the write guard, so snapshots land in the order the writes happened.
    fn persist(&self, state: &State) -> RepoResult<()> {
        let Some(path) = self.snapshot_path.as_deref() else { return Ok(()) };
        let bytes = serde_json::to_vec_pretty(state).map_err(|e| RepoError::Internal(format!("serialise snapshot: {e}")))?;
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let io = |e: std::io::Error| {
            warn!(path = %path.display(), error = %e, "failed to write snapshot");
            RepoError::Internal(format!("write snapshot: {e}"))
        };
        std::fs::create_dir_all(dir).map_err(io)?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(io)?;
        tmp.write_all(&bytes).map_err(io)?;
        tmp.as_file().sync_all().map_err(io)?;
        tmp.persist(path).map_err(|e| io(e.error))?;
        Ok(())
    }
}

impl Default for InMemRepo {
    fn default() -> Self { Self::new() }
}

fn build_movie(id: Id, slug: String, new: NewMovie, prev: Option<&Movie>) -> RepoResult<Movie> {
    let year_of_production = new
        .year_of_production
        .or(prev.map(|p| p.year_of_production))
        .ok_or_else(|| RepoError::Internal("year_of_production missing".into()))?;
    Ok(Movie {
        id,
        title: new.title,
        description: new.description,
        image: new.image.unwrap_or_else(|| DEFAULT_POSTER.to_string()),
        banner: new.banner.unwrap_or_else(|| DEFAULT_BANNER.to_string()),
        category: new.category,
        language: new.language,
        status: new.status,
        director: new.director,
        year_of_production,
        view_count: prev.map(|p| p.view_count).unwrap_or(0),
        movie_trailer: new.movie_trailer.filter(|t| !t.is_empty()),
        slug,
        created_at: prev.map(|p| p.created_at).unwrap_or_else(Utc::now),
    })
}

#[async_trait]
impl MovieRepo for InMemRepo {
    async fn list_movies(&self, q: &MovieQuery, page_size: u32) -> RepoResult<Page<Movie>> {
        let s = self.read()?;
        Ok(query::run(s.movies.values().cloned(), q, page_size))
    }

    async fn get_movie(&self, id: Id) -> RepoResult<Movie> {
        let s = self.read()?;
        s.movie(id).cloned()
    }

    async fn create_movie(&self, mut new: NewMovie) -> RepoResult<Movie> {
        let mut s = self.write()?;
        let slug = match new.slug.take() {
            Some(explicit) if s.slug_taken(&explicit, None) => {
                return Err(RepoError::Conflict("a movie with this slug already exists"));
            }
            Some(explicit) => explicit,
            None => s.free_slug(&slugify(&new.title)),
        };
        let id = s.next_id();
        let movie = build_movie(id, slug, new, None)?;
        s.movies.insert(id, movie.clone());
        self.persist(&s)?;
        Ok(movie)
    }

    async fn update_movie(&self, id: Id, mut upd: NewMovie) -> RepoResult<Movie> {
        let mut s = self.write()?;
        let prev = s.movie(id)?.clone();
        let slug = upd.slug.take().unwrap_or_else(|| prev.slug.clone());
        if s.slug_taken(&slug, Some(id)) {
            return Err(RepoError::Conflict("a movie with this slug already exists"));
        }
        let movie = build_movie(id, slug, upd, Some(&prev))?;
        s.movies.insert(id, movie.clone());
        self.persist(&s)?;
        Ok(movie)
    }

    async fn delete_movie(&self, id: Id) -> RepoResult<()> {
        let mut s = self.write()?;
        s.movies.remove(&id).ok_or(RepoError::NotFound(Entity::Movie))?;
        s.casts.retain(|_, c| c.movie_id != id);
        s.links.retain(|_, l| l.movie_id != id);
        s.ratings.retain(|_, r| r.movie_id != id);
        s.comments.retain(|_, c| c.movie_id != id);
        s.history.retain(|_, h| h.movie_id != id);
        s.watchlist.retain(|_, w| w.movie_id != id);
        s.blocklist.retain(|_, b| b.movie_id != id);
        s.activity.retain(|_, a| a.movie_id != id);
        for profile in s.profiles.values_mut().filter(|p| p.favorite_movie == Some(id)) {
            profile.favorite_movie = None;
        }
        self.persist(&s)?;
        Ok(())
    }

    async fn record_view(&self, id: Id) -> RepoResult<Movie> {
        let mut s = self.write()?;
        let movie = s.movies.get_mut(&id).ok_or(RepoError::NotFound(Entity::Movie))?;
        movie.view_count += 1;
        let movie = movie.clone();
        self.persist(&s)?;
        Ok(movie)
    }

    async fn movies_by_status(&self, status: Status, limit: u32) -> RepoResult<Vec<Movie>> {
        let s = self.read()?;
        let mut v: Vec<_> = s.movies.values().filter(|m| m.status == Some(status)).cloned().collect();
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        v.truncate(limit as usize);
        Ok(v)
    }

    async fn related_movies(&self, id: Id, limit: u32) -> RepoResult<Vec<Movie>> {
        let s = self.read()?;
        let base = s.movie(id)?;
        let mut v: Vec<_> = s
            .movies
            .values()
            .filter(|m| m.id != id && m.category.iter().any(|c| base.category.contains(c)))
            .cloned()
            .collect();
        query::sort_movies(&mut v, Some(query::SortOrder::TitleAsc));
        v.truncate(limit as usize);
        Ok(v)
    }
}

#[async_trait]
impl CatalogRepo for InMemRepo {
    async fn create_person(&self, new: NewPerson) -> RepoResult<Person> {
        let mut s = self.write()?;
        let id = s.next_id();
        let person = Person {
            id,
            name: new.name,
            image: new.image.unwrap_or_else(|| DEFAULT_PORTRAIT.to_string()),
            birthday: new.birthday,
            death: new.death,
            gender: new.gender,
            biography: new.biography,
            known_for_department: new.known_for_department,
            place_of_birth: new.place_of_birth,
            also_known_as: new.also_known_as,
            profile_path: new.profile_path,
        };
        s.persons.insert(id, person.clone());
        self.persist(&s)?;
        Ok(person)
    }

    async fn get_person(&self, id: Id) -> RepoResult<Person> {
        let s = self.read()?;
        s.persons.get(&id).cloned().ok_or(RepoError::NotFound(Entity::Person))
    }

    async fn filmography(&self, person_id: Id) -> RepoResult<Vec<Movie>> {
        let s = self.read()?;
        if !s.persons.contains_key(&person_id) {
            return Err(RepoError::NotFound(Entity::Person));
        }
        let mut v: Vec<Movie> = s
            .casts
            .values()
            .filter(|c| c.person_id == person_id)
            .filter_map(|c| s.movies.get(&c.movie_id).cloned())
            .collect();
        v.sort_by(|a, b| b.year_of_production.cmp(&a.year_of_production).then(a.id.cmp(&b.id)));
        Ok(v)
    }

    async fn list_cast(&self, filter: CastFilter) -> RepoResult<Vec<MovieCast>> {
        let s = self.read()?;
        let mut v: Vec<_> = s
            .casts
            .values()
            .filter(|c| filter.person.map_or(true, |p| c.person_id == p))
            .filter(|c| filter.movie.map_or(true, |m| c.movie_id == m))
            .cloned()
            .collect();
        v.sort_by_key(|c| (c.movie_id, c.person_id));
        Ok(v)
    }

    async fn get_cast(&self, id: Id) -> RepoResult<MovieCast> {
        let s = self.read()?;
        s.casts.get(&id).cloned().ok_or(RepoError::NotFound(Entity::Cast))
    }

    async fn create_cast(&self, new: NewMovieCast) -> RepoResult<MovieCast> {
        let mut s = self.write()?;
        s.movie(new.movie_id)?;
        if !s.persons.contains_key(&new.person_id) {
            return Err(RepoError::NotFound(Entity::Person));
        }
        if s.casts.values().any(|c| c.person_id == new.person_id && c.movie_id == new.movie_id) {
            return Err(RepoError::Conflict("this person is already credited on this movie"));
        }
        let id = s.next_id();
        let cast = MovieCast { id, person_id: new.person_id, movie_id: new.movie_id, played_as: new.played_as, order: new.order };
        s.casts.insert(id, cast.clone());
        self.persist(&s)?;
        Ok(cast)
    }

    async fn cast_for_movie(&self, movie_id: Id) -> RepoResult<Vec<CastMember>> {
        let s = self.read()?;
        s.movie(movie_id)?;
        let mut v: Vec<_> = s
            .casts
            .values()
            .filter(|c| c.movie_id == movie_id)
            .filter_map(|c| {
                s.persons.get(&c.person_id).map(|p| CastMember {
                    cast_id: c.id,
                    person: p.clone(),
                    played_as: c.played_as.clone(),
                    order: c.order,
                })
            })
            .collect();
        v.sort_by_key(|m| (m.order, m.cast_id));
        Ok(v)
    }

    async fn list_links(&self, movie_id: Id) -> RepoResult<Vec<MovieLink>> {
        let s = self.read()?;
        s.movie(movie_id)?;
        Ok(s.links.values().filter(|l| l.movie_id == movie_id).cloned().collect())
    }

    async fn create_link(&self, movie_id: Id, new: NewMovieLink) -> RepoResult<MovieLink> {
        let mut s = self.write()?;
        s.movie(movie_id)?;
        let id = s.next_id();
        let link = MovieLink { id, movie_id, link_type: new.link_type, link: new.link };
        s.links.insert(id, link.clone());
        self.persist(&s)?;
        Ok(link)
    }
}

#[async_trait]
impl RatingRepo for InMemRepo {
    async fn upsert_rating(&self, user: UserId, movie_id: Id, score: RatingScore) -> RepoResult<(Rating, Upserted)> {
        let mut s = self.write()?;
        s.movie(movie_id)?;
        let existing = s.ratings.values().find(|r| r.user_id == user && r.movie_id == movie_id).map(|r| r.id);
        let outcome = match existing.and_then(|id| s.ratings.get_mut(&id)) {
            Some(r) => {
                r.rating = score.get();
                (r.clone(), Upserted::Updated)
            }
            None => {
                let id = s.next_id();
                let r = Rating { id, user_id: user, movie_id, rating: score.get(), created_at: Utc::now() };
                s.ratings.insert(id, r.clone());
                (r, Upserted::Created)
            }
        };
        s.log(user, movie_id, ActivityAction::Rate);
        self.persist(&s)?;
        Ok(outcome)
    }

    async fn get_rating(&self, id: Id) -> RepoResult<Rating> {
        let s = self.read()?;
        s.ratings.get(&id).cloned().ok_or(RepoError::NotFound(Entity::Rating))
    }

    async fn delete_rating(&self, id: Id) -> RepoResult<()> {
        let mut s = self.write()?;
        s.ratings.remove(&id).ok_or(RepoError::NotFound(Entity::Rating))?;
        self.persist(&s)?;
        Ok(())
    }

    async fn movie_scores(&self, movie_id: Id) -> RepoResult<Vec<i32>> {
        let s = self.read()?;
        s.movie(movie_id)?;
        Ok(s.ratings.values().filter(|r| r.movie_id == movie_id).map(|r| r.rating).collect())
    }
}

#[async_trait]
impl CommentRepo for InMemRepo {
    async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
        let mut s = self.write()?;
        s.movie(new.movie_id)?;
        if s.comments.values().any(|c| c.user_id == new.user_id && c.movie_id == new.movie_id) {
            return Err(RepoError::Conflict("you have already commented on this movie"));
        }
        if let Some(parent) = new.parent_id {
            if !s.comments.contains_key(&parent) {
                return Err(RepoError::NotFound(Entity::Comment));
            }
        }
        let id = s.next_id();
        let now = Utc::now();
        let comment = Comment {
            id,
            user_id: new.user_id,
            username: new.username,
            movie_id: new.movie_id,
            content: new.content,
            parent_id: new.parent_id,
            active: new.active,
            created_at: now,
            updated_at: now,
        };
        s.comments.insert(id, comment.clone());
        self.persist(&s)?;
        Ok(comment)
    }

    async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
        let s = self.read()?;
        s.comments.get(&id).cloned().ok_or(RepoError::NotFound(Entity::Comment))
    }

    async fn list_comments(&self, filter: CommentFilter) -> RepoResult<Vec<Comment>> {
        let s = self.read()?;
        let mut v: Vec<_> = s
            .comments
            .values()
            .filter(|c| filter.user.map_or(true, |u| c.user_id == u))
            .filter(|c| filter.movie.map_or(true, |m| c.movie_id == m))
            .filter(|c| filter.active.map_or(true, |a| c.active == a))
            .cloned()
            .collect();
        v.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(v)
    }

    async fn set_comment_active(&self, id: Id, active: bool) -> RepoResult<Comment> {
        let mut s = self.write()?;
        let c = s.comments.get_mut(&id).ok_or(RepoError::NotFound(Entity::Comment))?;
        c.active = active;
        c.updated_at = Utc::now();
        let c = c.clone();
        self.persist(&s)?;
        Ok(c)
    }

    async fn update_comment_content(&self, id: Id, content: String) -> RepoResult<Comment> {
        let mut s = self.write()?;
        let c = s.comments.get_mut(&id).ok_or(RepoError::NotFound(Entity::Comment))?;
        c.content = content;
        c.updated_at = Utc::now();
        let c = c.clone();
        self.persist(&s)?;
        Ok(c)
    }

    async fn delete_comment(&self, id: Id) -> RepoResult<u64> {
        let mut s = self.write()?;
        if !s.comments.contains_key(&id) {
            return Err(RepoError::NotFound(Entity::Comment));
        }
        let all: Vec<Comment> = s.comments.values().cloned().collect();
        let doomed = subtree_ids(&all, id);
        s.comments.retain(|cid, _| !doomed.contains(cid));
        self.persist(&s)?;
        Ok(doomed.len() as u64)
    }
}

#[async_trait]
impl EngagementRepo for InMemRepo {
    async fn toggle_watchlist(&self, user: UserId, movie_id: Id) -> RepoResult<Toggled> {
        let mut s = self.write()?;
        s.movie(movie_id)?;
        let existing = s.watchlist.values().find(|w| w.user_id == user && w.movie_id == movie_id).map(|w| w.id);
        let toggled = match existing {
            Some(id) => {
                s.watchlist.remove(&id);
                s.log(user, movie_id, ActivityAction::WatchlistRemove);
                Toggled::Removed
            }
            None => {
                let id = s.next_id();
                s.watchlist.insert(id, WatchListEntry { id, user_id: user, movie_id, important: false, created_at: Utc::now() });
                s.history.retain(|_, h| !(h.user_id == user && h.movie_id == movie_id));
                s.log(user, movie_id, ActivityAction::WatchlistAdd);
                Toggled::Added
            }
        };
        self.persist(&s)?;
        Ok(toggled)
    }

    async fn set_watchlist_important(&self, user: UserId, movie_id: Id, important: bool) -> RepoResult<WatchListEntry> {
        let mut s = self.write()?;
        let entry = s
            .watchlist
            .values_mut()
            .find(|w| w.user_id == user && w.movie_id == movie_id)
            .ok_or(RepoError::NotFound(Entity::WatchList))?;
        entry.important = important;
        let entry = entry.clone();
        self.persist(&s)?;
        Ok(entry)
    }

    async fn list_watchlist(&self, user: UserId) -> RepoResult<Vec<(WatchListEntry, Movie)>> {
        let s = self.read()?;
        let mut v = s.with_movies(s.watchlist.values().filter(|w| w.user_id == user).cloned(), |w| w.movie_id);
        v.sort_by(|(wa, ma), (wb, mb)| {
            wb.important
                .cmp(&wa.important)
                .then(mb.year_of_production.year().cmp(&ma.year_of_production.year()))
                .then(wb.created_at.cmp(&wa.created_at))
        });
        Ok(v)
    }

    async fn add_history(&self, user: UserId, movie_id: Id) -> RepoResult<(HistoryEntry, bool)> {
        let mut s = self.write()?;
        s.movie(movie_id)?;
        if let Some(h) = s.history.values().find(|h| h.user_id == user && h.movie_id == movie_id) {
            return Ok((h.clone(), false));
        }
        let id = s.next_id();
        let entry = HistoryEntry { id, user_id: user, movie_id, created_at: Utc::now() };
        s.history.insert(id, entry.clone());
        s.log(user, movie_id, ActivityAction::HistoryAdd);
        self.persist(&s)?;
        Ok((entry, true))
    }

    async fn list_history(&self, user: UserId) -> RepoResult<Vec<(HistoryEntry, Movie)>> {
        let s = self.read()?;
        let mut v = s.with_movies(s.history.values().filter(|h| h.user_id == user).cloned(), |h| h.movie_id);
        v.sort_by(|(a, _), (b, _)| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(v)
    }

    async fn count_history_among(&self, user: UserId, movie_ids: &[Id]) -> RepoResult<u64> {
        let s = self.read()?;
        Ok(s.history.values().filter(|h| h.user_id == user && movie_ids.contains(&h.movie_id)).count() as u64)
    }

    async fn toggle_blocklist(&self, user: UserId, movie_id: Id) -> RepoResult<Toggled> {
        let mut s = self.write()?;
        s.movie(movie_id)?;
        let existing = s.blocklist.values().find(|b| b.user_id == user && b.movie_id == movie_id).map(|b| b.id);
        let toggled = match existing {
            Some(id) => {
                s.blocklist.remove(&id);
                s.log(user, movie_id, ActivityAction::BlocklistRemove);
                Toggled::Removed
            }
            None => {
                let id = s.next_id();
                s.blocklist.insert(id, BlockListEntry { id, user_id: user, movie_id, created_at: Utc::now() });
                s.log(user, movie_id, ActivityAction::BlocklistAdd);
                Toggled::Added
            }
        };
        self.persist(&s)?;
        Ok(toggled)
    }

    async fn list_blocklist(&self, user: UserId) -> RepoResult<Vec<(BlockListEntry, Movie)>> {
        let s = self.read()?;
        let mut v = s.with_movies(s.blocklist.values().filter(|b| b.user_id == user).cloned(), |b| b.movie_id);
        v.sort_by(|(a, _), (b, _)| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(v)
    }

    async fn list_activity(&self, user: UserId) -> RepoResult<Vec<Activity>> {
        let s = self.read()?;
        let mut v: Vec<_> = s.activity.values().filter(|a| a.user_id == user).cloned().collect();
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(v)
    }
}

#[async_trait]
impl ProfileRepo for InMemRepo {
    async fn get_profile(&self, user: UserId) -> RepoResult<Option<UserProfile>> {
        let s = self.read()?;
        Ok(s.profiles.get(&user).cloned())
    }

    async fn upsert_profile(&self, user: UserId, upd: ProfileUpdate) -> RepoResult<UserProfile> {
        let mut s = self.write()?;
        if let Some(movie_id) = upd.favorite_movie {
            s.movie(movie_id)?;
        }
        let profile = UserProfile {
            user_id: user,
            city: upd.city,
            address: upd.address,
            favorite_category: upd.favorite_category,
            favorite_movie: upd.favorite_movie,
        };
        s.profiles.insert(user, profile.clone());
        self.persist(&s)?;
        Ok(profile)
    }
}
