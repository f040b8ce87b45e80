use crate::comments::CommentView;
use crate::error::ApiErrorBody;
use crate::models::{
    Activity, Category, Gender, HistoryEntry, Language, LinkType, Movie, MovieCast, MovieLink, NewMovie, NewMovieCast,
    NewMovieLink, NewPerson, Person, ProfileUpdate, Status, Toggled, UserProfile, WatchListEntry,
};
use crate::rating::{RatingSummary, ScoreCount};
use crate::repo::CastMember;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::list_movies,
        crate::routes::create_movie,
        crate::routes::featured_movies,
        crate::routes::movie_detail,
        crate::routes::update_movie,
        crate::routes::delete_movie,
        crate::routes::related_movies,
        crate::routes::list_links,
        crate::routes::create_link,
        crate::routes::movie_ratings,
        crate::routes::rating_detail,
        crate::routes::rate_movie,
        crate::routes::delete_rating,
        crate::routes::create_comment,
        crate::routes::movie_comments,
        crate::routes::all_comments,
        crate::routes::list_comments,
        crate::routes::comment_replies,
        crate::routes::approve_comment,
        crate::routes::edit_comment,
        crate::routes::delete_comment,
        crate::routes::create_person,
        crate::routes::person_detail,
        crate::routes::list_cast,
        crate::routes::get_cast,
        crate::routes::create_cast,
        crate::routes::list_watchlist,
        crate::routes::toggle_watchlist,
        crate::routes::mark_important,
        crate::routes::list_history,
        crate::routes::add_history,
        crate::routes::list_blocklist,
        crate::routes::toggle_blocklist,
        crate::routes::list_activity,
        crate::routes::current_user,
        crate::routes::get_profile,
        crate::routes::update_profile,
    ),
    components(schemas(
        Movie, NewMovie, Category, Language, Status, Person, NewPerson, Gender,
        MovieCast, NewMovieCast, CastMember, MovieLink, NewMovieLink, LinkType,
        HistoryEntry, WatchListEntry, Activity, Toggled, CommentView, RatingSummary, ScoreCount,
        UserProfile, ProfileUpdate,
        ApiErrorBody, crate::auth::Role,
        crate::routes::MovieDetail, crate::routes::Featured, crate::routes::RatingDetail,
        crate::routes::RateRequest, crate::routes::RateResponse,
        crate::routes::CommentRequest, crate::routes::CommentEditRequest, crate::routes::CommentCreated,
        crate::routes::PersonDetail, crate::routes::WatchListItem, crate::routes::ListedMovie,
        crate::routes::ImportantRequest, crate::routes::ToggleResponse, crate::routes::CurrentUser,
    )),
    tags(
        (name = "movies", description = "Catalog listing, detail and administration"),
        (name = "ratings", description = "Scores and aggregates"),
        (name = "comments", description = "Threaded, moderated comments"),
        (name = "people", description = "Persons and cast credits"),
        (name = "lists", description = "Watchlist, history, blocklist and activity"),
        (name = "users", description = "Caller identity and profile"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/v1/movies",
            "/api/v1/rate",
            "/api/v1/comments/{id}",
            "/api/v1/comments/{id}/approve",
            "/api/v1/users/current",
            "/api/v1/users/current/profile",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
