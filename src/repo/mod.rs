use std::fmt;

use async_trait::async_trait;

use crate::models::*;
use crate::query::{MovieQuery, Page};
use crate::rating::RatingScore;

#[cfg(feature = "inmem-store")]
pub mod inmem;
#[cfg(feature = "postgres-store")]
pub mod pg;

/// Kind of record a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Movie,
    Person,
    Cast,
    Link,
    Rating,
    Comment,
    WatchList,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Movie => "movie",
            Entity::Person => "person",
            Entity::Cast => "cast credit",
            Entity::Link => "link",
            Entity::Rating => "rating",
            Entity::Comment => "comment",
            Entity::WatchList => "watchlist entry",
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("{0} not found")] NotFound(Entity),
    #[error("conflict: {0}")] Conflict(&'static str),
    #[error("storage error: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// `base` if `taken` rejects it, otherwise the first free `base-2`, `base-3`, ...
pub(crate) fn free_slug(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    let mut n = 2u32;
    loop {
        let candidate = format!("{base}-{n}");
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// A cast credit joined with the person it credits.
#[derive(Debug, Clone, PartialEq, serde::Serialize, utoipa::ToSchema)]
pub struct CastMember {
    pub cast_id: Id,
    pub person: Person,
    pub played_as: Option<String>,
    pub order: i32,
}

#[async_trait]
pub trait MovieRepo: Send + Sync {
    async fn list_movies(&self, q: &MovieQuery, page_size: u32) -> RepoResult<Page<Movie>>;
    async fn get_movie(&self, id: Id) -> RepoResult<Movie>;
    /// An explicit slug must be free. A slug derived from the title gets a `-2`, `-3`, ... suffix
    /// until it is.
    async fn create_movie(&self, new: NewMovie) -> RepoResult<Movie>;
    /// Replaces every editable field. The slug only changes when `upd.slug` is set.
    async fn update_movie(&self, id: Id, upd: NewMovie) -> RepoResult<Movie>;
    /// Removes the movie and every row that references it.
    async fn delete_movie(&self, id: Id) -> RepoResult<()>;
    /// Atomically bumps `view_count` and returns the updated movie.
    async fn record_view(&self, id: Id) -> RepoResult<Movie>;
    async fn movies_by_status(&self, status: Status, limit: u32) -> RepoResult<Vec<Movie>>;
    /// Other movies sharing at least one category, by title.
    async fn related_movies(&self, id: Id, limit: u32) -> RepoResult<Vec<Movie>>;
}

#[async_trait]
pub trait CatalogRepo: Send + Sync {
    async fn create_person(&self, new: NewPerson) -> RepoResult<Person>;
    async fn get_person(&self, id: Id) -> RepoResult<Person>;
    /// Movies a person is credited in, newest production first.
    async fn filmography(&self, person_id: Id) -> RepoResult<Vec<Movie>>;
    async fn list_cast(&self, filter: CastFilter) -> RepoResult<Vec<MovieCast>>;
    async fn get_cast(&self, id: Id) -> RepoResult<MovieCast>;
    async fn create_cast(&self, new: NewMovieCast) -> RepoResult<MovieCast>;
    async fn cast_for_movie(&self, movie_id: Id) -> RepoResult<Vec<CastMember>>;
    async fn list_links(&self, movie_id: Id) -> RepoResult<Vec<MovieLink>>;
    async fn create_link(&self, movie_id: Id, new: NewMovieLink) -> RepoResult<MovieLink>;
}

#[async_trait]
pub trait RatingRepo: Send + Sync {
    /// Inserts or replaces the caller's single rating for a movie and logs a `rate` activity.
    async fn upsert_rating(&self, user: UserId, movie_id: Id, score: RatingScore) -> RepoResult<(Rating, Upserted)>;
    async fn get_rating(&self, id: Id) -> RepoResult<Rating>;
    async fn delete_rating(&self, id: Id) -> RepoResult<()>;
    async fn movie_scores(&self, movie_id: Id) -> RepoResult<Vec<i32>>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    async fn create_comment(&self, new: NewComment) -> RepoResult<Comment>;
    async fn get_comment(&self, id: Id) -> RepoResult<Comment>;
    async fn list_comments(&self, filter: CommentFilter) -> RepoResult<Vec<Comment>>;
    async fn set_comment_active(&self, id: Id, active: bool) -> RepoResult<Comment>;
    /// Replaces the text and bumps `updated_at`; moderation state is left alone.
    async fn update_comment_content(&self, id: Id, content: String) -> RepoResult<Comment>;
    /// Deletes the comment and its reply subtree, returning how many rows went.
    async fn delete_comment(&self, id: Id) -> RepoResult<u64>;
}

#[async_trait]
pub trait EngagementRepo: Send + Sync {
    /// Adds or removes a watchlist entry. Adding also drops the movie from the user's history.
    async fn toggle_watchlist(&self, user: UserId, movie_id: Id) -> RepoResult<Toggled>;
    async fn set_watchlist_important(&self, user: UserId, movie_id: Id, important: bool) -> RepoResult<WatchListEntry>;
    /// Important entries first, then newest production year.
    async fn list_watchlist(&self, user: UserId) -> RepoResult<Vec<(WatchListEntry, Movie)>>;
    /// Idempotent; the flag tells whether a row was inserted.
    async fn add_history(&self, user: UserId, movie_id: Id) -> RepoResult<(HistoryEntry, bool)>;
    async fn list_history(&self, user: UserId) -> RepoResult<Vec<(HistoryEntry, Movie)>>;
    async fn count_history_among(&self, user: UserId, movie_ids: &[Id]) -> RepoResult<u64>;
    async fn toggle_blocklist(&self, user: UserId, movie_id: Id) -> RepoResult<Toggled>;
    async fn list_blocklist(&self, user: UserId) -> RepoResult<Vec<(BlockListEntry, Movie)>>;
    /// Newest first.
    async fn list_activity(&self, user: UserId) -> RepoResult<Vec<Activity>>;
}

#[async_trait]
pub trait ProfileRepo: Send + Sync {
    async fn get_profile(&self, user: UserId) -> RepoResult<Option<UserProfile>>;
    /// Creates or fully replaces the user's profile. A missing `favorite_movie` is `NotFound(Movie)`.
    async fn upsert_profile(&self, user: UserId, upd: ProfileUpdate) -> RepoResult<UserProfile>;
}

pub trait Repo: MovieRepo + CatalogRepo + RatingRepo + CommentRepo + EngagementRepo + ProfileRepo {}

impl<T> Repo for T where T: MovieRepo + CatalogRepo + RatingRepo + CommentRepo + EngagementRepo + ProfileRepo {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_slug_appends_the_first_unused_suffix() {
        let taken = ["dune", "dune-2", "dune-4"];
        assert_eq!(free_slug("dune", |s| taken.contains(&s)), "dune-3");
        assert_eq!(free_slug("heat", |s| taken.contains(&s)), "heat");
    }
}
