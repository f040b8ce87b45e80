use std::sync::Arc;
use std::time::Duration;

use actix_web::middleware::NormalizePath;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::auth::{Auth, Role};
use crate::comments;
use crate::error::ApiError;
use crate::models::*;
use crate::query::{parse_page, MovieListParams, MovieQuery, Page, DEFAULT_PAGE_SIZE};
use crate::rate_limit::RateLimiterFacade;
use crate::rating::{self, RatingScore};
use crate::repo::{CastMember, Entity, Repo, RepoError};
use crate::require_role;
use crate::validation::{self, FieldErrors};

/// Movies per status shelf on `/movies/featured`.
pub const FEATURED_LIMIT: u32 = 10;
pub const RELATED_LIMIT: u32 = 10;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .wrap(NormalizePath::trim())
            .app_data(web::JsonConfig::default().error_handler(|err, _req| {
                ApiError::from(FieldErrors::single("body", err.to_string())).into()
            }))
            .app_data(web::QueryConfig::default().error_handler(|err, _req| {
                ApiError::from(FieldErrors::single("query", err.to_string())).into()
            }))
            .service(
                web::resource("/movies")
                    .route(web::get().to(list_movies))
                    .route(web::post().to(create_movie)),
            )
            .service(web::resource("/movies/featured").route(web::get().to(featured_movies)))
            .service(
                web::resource("/movies/{id}")
                    .route(web::get().to(movie_detail))
                    .route(web::put().to(update_movie))
                    .route(web::delete().to(delete_movie)),
            )
            .service(web::resource("/movies/{id}/related").route(web::get().to(related_movies)))
            .service(
                web::resource("/movies/{id}/links")
                    .route(web::get().to(list_links))
                    .route(web::post().to(create_link)),
            )
            .service(web::resource("/movies/{id}/comments").route(web::get().to(movie_comments)))
            .service(web::resource("/movies/{id}/ratings").route(web::get().to(movie_ratings)))
            .service(web::resource("/rating_detail/{movie_id}").route(web::get().to(rating_detail)))
            .service(web::resource("/rate").route(web::post().to(rate_movie)))
            .service(web::resource("/rating/{id}").route(web::delete().to(delete_rating)))
            .service(web::resource("/comment").route(web::post().to(create_comment)))
            .service(web::resource("/all_comments/{movie_id}").route(web::get().to(all_comments)))
            .service(web::resource("/comments").route(web::get().to(list_comments)))
            .service(
                web::resource("/comments/{id}")
                    .route(web::put().to(edit_comment))
                    .route(web::delete().to(delete_comment)),
            )
            .service(web::resource("/comments/{id}/replies").route(web::get().to(comment_replies)))
            .service(web::resource("/comments/{id}/approve").route(web::post().to(approve_comment)))
            .service(web::resource("/persons").route(web::post().to(create_person)))
            .service(web::resource("/persons/{id}").route(web::get().to(person_detail)))
            .service(
                web::resource("/cast")
                    .route(web::get().to(list_cast))
                    .route(web::post().to(create_cast)),
            )
            .service(web::resource("/cast/{id}").route(web::get().to(get_cast)))
            .service(web::resource("/watchlist").route(web::get().to(list_watchlist)))
            .service(
                web::resource("/watchlist/{movie_id}")
                    .route(web::post().to(toggle_watchlist))
                    .route(web::put().to(mark_important)),
            )
            .service(web::resource("/history").route(web::get().to(list_history)))
            .service(web::resource("/history/{movie_id}").route(web::post().to(add_history)))
            .service(web::resource("/blocklist").route(web::get().to(list_blocklist)))
            .service(web::resource("/blocklist/{movie_id}").route(web::post().to(toggle_blocklist)))
            .service(web::resource("/activity").route(web::get().to(list_activity)))
            .service(web::resource("/users/current").route(web::get().to(current_user)))
            .service(
                web::resource("/users/current/profile")
                    .route(web::get().to(get_profile))
                    .route(web::put().to(update_profile)),
            ),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub page_size: u32,
    pub rate_limiter: Option<RateLimiterFacade>,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repo>) -> Self {
        Self { repo, page_size: DEFAULT_PAGE_SIZE, rate_limiter: None }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_rate_limiter(mut self, rl: RateLimiterFacade) -> Self {
        self.rate_limiter = Some(rl);
        self
    }

    fn throttle(&self, check: impl FnOnce(&RateLimiterFacade) -> Result<(), Duration>) -> Result<(), ApiError> {
        match &self.rate_limiter {
            Some(rl) => check(rl).map_err(ApiError::TooManyRequests),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageParams {
    /// 1-based page number.
    pub page: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MovieDetail {
    pub movie: Movie,
    pub links: Vec<MovieLink>,
    pub cast: Vec<CastMember>,
    pub avg_rating: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Featured {
    pub top_rated: Vec<Movie>,
    pub most_watched: Vec<Movie>,
    pub recently_added: Vec<Movie>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RatingDetail {
    pub avg_rate: f64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RateRequest {
    pub movie: Id,
    pub rating: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RateResponse {
    pub id: Id,
    pub movie: Id,
    pub rating: i32,
    pub label: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CommentRequest {
    pub movie: Id,
    pub content: String,
    pub parent: Option<Id>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CommentEditRequest {
    pub content: String,
}

/// Echo of a freshly stored comment.
#[derive(Debug, Serialize, ToSchema)]
pub struct CommentCreated {
    pub id: Id,
    pub sender: String,
    pub movie: String,
    pub content: String,
    pub parent: Option<Id>,
    /// False while awaiting moderation.
    pub active: bool,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CommentListParams {
    pub user: Option<UserId>,
    pub movie: Option<Id>,
    /// Moderators only: list comments awaiting approval.
    pub pending: Option<bool>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PersonDetail {
    pub person: Person,
    pub movies: Vec<Movie>,
    /// Filmography entries in the caller's history; absent for anonymous callers.
    pub history_count: Option<u64>,
    pub history_percentage: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WatchListItem {
    pub id: Id,
    pub important: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub movie: Movie,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListedMovie {
    pub id: Id,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub movie: Movie,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ImportantRequest {
    pub important: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ToggleResponse {
    pub status: Toggled,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CurrentUser {
    pub id: UserId,
    pub username: String,
    pub roles: Vec<Role>,
}

fn page_of(params: &PageParams) -> Result<u32, ApiError> {
    Ok(parse_page(params.page.as_deref())?)
}

// ---------------------------------------------------------------- movies

#[utoipa::path(
    get,
    path = "/api/v1/movies",
    params(MovieListParams),
    responses(
        (status = 200, description = "Paged movies: {data, total, page, last_page}"),
        (status = 400, description = "Invalid query parameter")
    ),
    tag = "movies"
)]
pub async fn list_movies(data: web::Data<AppState>, params: web::Query<MovieListParams>) -> Result<HttpResponse, ApiError> {
    let q = MovieQuery::try_from(params.into_inner())?;
    let page = data.repo.list_movies(&q, data.page_size).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[utoipa::path(
    post,
    path = "/api/v1/movies",
    request_body = NewMovie,
    responses(
        (status = 201, description = "Movie created; a slug derived from the title is suffixed until unique", body = Movie),
        (status = 400, description = "Invalid fields"),
        (status = 403, description = "Admins only"),
        (status = 409, description = "Explicit slug already taken")
    ),
    tag = "movies"
)]
pub async fn create_movie(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewMovie>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let new = payload.into_inner();
    validation::validate_movie(&new)?;
    let movie = data.repo.create_movie(new).await?;
    tracing::info!(id = movie.id, slug = %movie.slug, "movie created");
    Ok(HttpResponse::Created().json(movie))
}

#[utoipa::path(
    get,
    path = "/api/v1/movies/featured",
    responses((status = 200, description = "Movies grouped by status", body = Featured)),
    tag = "movies"
)]
pub async fn featured_movies(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let featured = Featured {
        top_rated: data.repo.movies_by_status(Status::TopRated, FEATURED_LIMIT).await?,
        most_watched: data.repo.movies_by_status(Status::MostWatched, FEATURED_LIMIT).await?,
        recently_added: data.repo.movies_by_status(Status::RecentlyAdded, FEATURED_LIMIT).await?,
    };
    Ok(HttpResponse::Ok().json(featured))
}

#[utoipa::path(
    get,
    path = "/api/v1/movies/{id}",
    params(("id" = i64, Path, description = "Movie id")),
    responses(
        (status = 200, description = "Movie with links, cast and average rating; counts a view", body = MovieDetail),
        (status = 404, description = "Movie not found")
    ),
    tag = "movies"
)]
pub async fn movie_detail(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let movie = data.repo.record_view(path.into_inner()).await?;
    let links = data.repo.list_links(movie.id).await?;
    let cast = data.repo.cast_for_movie(movie.id).await?;
    let scores = data.repo.movie_scores(movie.id).await?;
    Ok(HttpResponse::Ok().json(MovieDetail { movie, links, cast, avg_rating: rating::average(&scores) }))
}

#[utoipa::path(
    put,
    path = "/api/v1/movies/{id}",
    params(("id" = i64, Path, description = "Movie id")),
    request_body = NewMovie,
    responses(
        (status = 200, description = "Movie replaced", body = Movie),
        (status = 400, description = "Invalid fields"),
        (status = 403, description = "Admins only"),
        (status = 404, description = "Movie not found"),
        (status = 409, description = "Slug already taken")
    ),
    tag = "movies"
)]
pub async fn update_movie(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewMovie>,
) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let upd = payload.into_inner();
    validation::validate_movie(&upd)?;
    let movie = data.repo.update_movie(path.into_inner(), upd).await?;
    Ok(HttpResponse::Ok().json(movie))
}

#[utoipa::path(
    delete,
    path = "/api/v1/movies/{id}",
    params(("id" = i64, Path, description = "Movie id")),
    responses(
        (status = 204, description = "Movie and everything referencing it removed"),
        (status = 403, description = "Admins only"),
        (status = 404, description = "Movie not found")
    ),
    tag = "movies"
)]
pub async fn delete_movie(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let id = path.into_inner();
    data.repo.delete_movie(id).await?;
    tracing::info!(id, "movie deleted");
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    get,
    path = "/api/v1/movies/{id}/related",
    params(("id" = i64, Path, description = "Movie id")),
    responses(
        (status = 200, description = "Movies sharing a category", body = [Movie]),
        (status = 404, description = "Movie not found")
    ),
    tag = "movies"
)]
pub async fn related_movies(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let related = data.repo.related_movies(path.into_inner(), RELATED_LIMIT).await?;
    Ok(HttpResponse::Ok().json(related))
}

#[utoipa::path(
    get,
    path = "/api/v1/movies/{id}/links",
    params(("id" = i64, Path, description = "Movie id")),
    responses(
        (status = 200, description = "Download and watch links", body = [MovieLink]),
        (status = 404, description = "Movie not found")
    ),
    tag = "movies"
)]
pub async fn list_links(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let links = data.repo.list_links(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(links))
}

#[utoipa::path(
    post,
    path = "/api/v1/movies/{id}/links",
    params(("id" = i64, Path, description = "Movie id")),
    request_body = NewMovieLink,
    responses(
        (status = 201, description = "Link added", body = MovieLink),
        (status = 400, description = "Invalid URL"),
        (status = 403, description = "Admins only"),
        (status = 404, description = "Movie not found")
    ),
    tag = "movies"
)]
pub async fn create_link(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewMovieLink>,
) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let new = payload.into_inner();
    validation::validate_link(&new)?;
    let link = data.repo.create_link(path.into_inner(), new).await?;
    Ok(HttpResponse::Created().json(link))
}

// ---------------------------------------------------------------- ratings

#[utoipa::path(
    get,
    path = "/api/v1/movies/{id}/ratings",
    params(("id" = i64, Path, description = "Movie id")),
    responses(
        (status = 200, description = "Average, vote count and per-score distribution", body = rating::RatingSummary),
        (status = 404, description = "Movie not found")
    ),
    tag = "ratings"
)]
pub async fn movie_ratings(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let scores = data.repo.movie_scores(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(rating::summarize(&scores)))
}

#[utoipa::path(
    get,
    path = "/api/v1/rating_detail/{movie_id}",
    params(("movie_id" = i64, Path, description = "Movie id")),
    responses(
        (status = 200, description = "Average rating rounded to one decimal", body = RatingDetail),
        (status = 404, description = "Movie not found")
    ),
    tag = "ratings"
)]
pub async fn rating_detail(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let scores = data.repo.movie_scores(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(RatingDetail { avg_rate: rating::display_average(&scores) }))
}

#[utoipa::path(
    post,
    path = "/api/v1/rate",
    request_body = RateRequest,
    responses(
        (status = 201, description = "First rating stored", body = RateResponse),
        (status = 200, description = "Existing rating replaced", body = RateResponse),
        (status = 400, description = "Score outside 1..=10"),
        (status = 401, description = "Authentication required"),
        (status = 404, description = "Movie not found"),
        (status = 429, description = "Too many ratings")
    ),
    tag = "ratings"
)]
pub async fn rate_movie(auth: Auth, data: web::Data<AppState>, payload: web::Json<RateRequest>) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    let score = RatingScore::try_from(req.rating)?;
    data.throttle(|rl| rl.allow_rating(auth.user_id()))?;
    let (stored, outcome) = data.repo.upsert_rating(auth.user_id(), req.movie, score).await?;
    let body = RateResponse { id: stored.id, movie: stored.movie_id, rating: stored.rating, label: score.label().to_string() };
    Ok(match outcome {
        Upserted::Created => HttpResponse::Created().json(body),
        Upserted::Updated => HttpResponse::Ok().json(body),
    })
}

#[utoipa::path(
    delete,
    path = "/api/v1/rating/{id}",
    params(("id" = i64, Path, description = "Rating id")),
    responses(
        (status = 204, description = "Rating removed"),
        (status = 401, description = "Authentication required"),
        (status = 403, description = "Neither owner nor admin"),
        (status = 404, description = "Rating not found")
    ),
    tag = "ratings"
)]
pub async fn delete_rating(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let r = data.repo.get_rating(path.into_inner()).await?;
    if r.user_id != auth.user_id() && !auth.has_role(Role::Admin) {
        return Err(ApiError::Forbidden);
    }
    data.repo.delete_rating(r.id).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ---------------------------------------------------------------- comments

#[utoipa::path(
    post,
    path = "/api/v1/comment",
    request_body = CommentRequest,
    responses(
        (status = 201, description = "Comment stored; inactive until approved unless posted by staff", body = CommentCreated),
        (status = 400, description = "Empty content, or a parent on another movie, missing or awaiting moderation"),
        (status = 401, description = "Authentication required"),
        (status = 404, description = "Movie not found"),
        (status = 409, description = "Already commented on this movie"),
        (status = 429, description = "Too many comments")
    ),
    tag = "comments"
)]
pub async fn create_comment(auth: Auth, data: web::Data<AppState>, payload: web::Json<CommentRequest>) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    validation::validate_comment_content(&req.content)?;
    let movie = data.repo.get_movie(req.movie).await?;
    if let Some(parent_id) = req.parent {
        match data.repo.get_comment(parent_id).await {
            Ok(parent) if parent.movie_id != movie.id => {
                return Err(FieldErrors::single("parent", "reply must belong to the same movie").into())
            }
            Ok(parent) if !parent.active => {
                return Err(FieldErrors::single("parent", "parent comment is awaiting moderation").into())
            }
            Ok(_) => {}
            Err(RepoError::NotFound(_)) => return Err(FieldErrors::single("parent", "parent comment does not exist").into()),
            Err(e) => return Err(e.into()),
        }
    }
    data.throttle(|rl| rl.allow_comment(auth.user_id()))?;
    let comment = data
        .repo
        .create_comment(NewComment {
            user_id: auth.user_id(),
            username: auth.username().to_string(),
            movie_id: movie.id,
            content: req.content.trim().to_string(),
            parent_id: req.parent,
            active: auth.is_staff(),
        })
        .await?;
    Ok(HttpResponse::Created().json(CommentCreated {
        id: comment.id,
        sender: comment.username,
        movie: movie.title,
        content: comment.content,
        parent: comment.parent_id,
        active: comment.active,
    }))
}

async fn visible_comments(data: &AppState, movie_id: Id) -> Result<Vec<Comment>, ApiError> {
    data.repo.get_movie(movie_id).await?;
    let filter = CommentFilter { movie: Some(movie_id), active: Some(true), ..CommentFilter::default() };
    Ok(data.repo.list_comments(filter).await?)
}

#[utoipa::path(
    get,
    path = "/api/v1/movies/{id}/comments",
    params(("id" = i64, Path, description = "Movie id")),
    responses(
        (status = 200, description = "Root comments, oldest first, with reply counts", body = [comments::CommentView]),
        (status = 404, description = "Movie not found")
    ),
    tag = "comments"
)]
pub async fn movie_comments(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let visible = visible_comments(&data, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(comments::roots(&visible)))
}

#[utoipa::path(
    get,
    path = "/api/v1/all_comments/{movie_id}",
    params(("movie_id" = i64, Path, description = "Movie id")),
    responses(
        (status = 200, description = "Every visible comment, newest first", body = [comments::CommentView]),
        (status = 404, description = "Movie not found")
    ),
    tag = "comments"
)]
pub async fn all_comments(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let visible = visible_comments(&data, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(comments::newest_first(&visible)))
}

#[utoipa::path(
    get,
    path = "/api/v1/comments",
    params(CommentListParams),
    responses(
        (status = 200, description = "Comments, newest first", body = [comments::CommentView]),
        (status = 401, description = "pending=true without a token"),
        (status = 403, description = "pending=true without moderator role")
    ),
    tag = "comments"
)]
pub async fn list_comments(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    params: web::Query<CommentListParams>,
) -> Result<HttpResponse, ApiError> {
    let p = params.into_inner();
    let pending = p.pending.unwrap_or(false);
    if pending {
        let auth = auth.ok_or(ApiError::Unauthorized)?;
        require_role!(auth, Role::Moderator);
    }
    let listed = data
        .repo
        .list_comments(CommentFilter { user: p.user, movie: p.movie, active: Some(!pending) })
        .await?;
    Ok(HttpResponse::Ok().json(comments::newest_first(&listed)))
}

#[utoipa::path(
    get,
    path = "/api/v1/comments/{id}/replies",
    params(("id" = i64, Path, description = "Parent comment id")),
    responses(
        (status = 200, description = "Direct replies, oldest first", body = [comments::CommentView]),
        (status = 404, description = "Comment not found")
    ),
    tag = "comments"
)]
pub async fn comment_replies(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let parent = data.repo.get_comment(path.into_inner()).await?;
    if !parent.active {
        return Err(ApiError::NotFound(Entity::Comment));
    }
    let visible = visible_comments(&data, parent.movie_id).await?;
    Ok(HttpResponse::Ok().json(comments::replies_of(&visible, parent.id)))
}

#[utoipa::path(
    post,
    path = "/api/v1/comments/{id}/approve",
    params(("id" = i64, Path, description = "Comment id")),
    responses(
        (status = 200, description = "Comment now visible", body = comments::CommentView),
        (status = 403, description = "Moderators only"),
        (status = 404, description = "Comment not found")
    ),
    tag = "comments"
)]
pub async fn approve_comment(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Moderator);
    let approved = data.repo.set_comment_active(path.into_inner(), true).await?;
    let visible = visible_comments(&data, approved.movie_id).await?;
    Ok(HttpResponse::Ok().json(comments::view_of(&visible, &approved)))
}

#[utoipa::path(
    put,
    path = "/api/v1/comments/{id}",
    params(("id" = i64, Path, description = "Comment id")),
    request_body = CommentEditRequest,
    responses(
        (status = 200, description = "Content replaced", body = comments::CommentView),
        (status = 400, description = "Empty or oversized content"),
        (status = 401, description = "Authentication required"),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Comment not found")
    ),
    tag = "comments"
)]
pub async fn edit_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<CommentEditRequest>,
) -> Result<HttpResponse, ApiError> {
    let c = data.repo.get_comment(path.into_inner()).await?;
    if c.user_id != auth.user_id() {
        return Err(ApiError::Forbidden);
    }
    let content = payload.into_inner().content;
    validation::validate_comment_content(&content)?;
    let edited = data.repo.update_comment_content(c.id, content.trim().to_string()).await?;
    let siblings = if edited.active { visible_comments(&data, edited.movie_id).await? } else { Vec::new() };
    Ok(HttpResponse::Ok().json(comments::view_of(&siblings, &edited)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/comments/{id}",
    params(("id" = i64, Path, description = "Comment id")),
    responses(
        (status = 204, description = "Comment and its replies removed"),
        (status = 403, description = "Neither author nor moderator"),
        (status = 404, description = "Comment not found")
    ),
    tag = "comments"
)]
pub async fn delete_comment(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let c = data.repo.get_comment(path.into_inner()).await?;
    if c.user_id != auth.user_id() && !auth.is_staff() {
        return Err(ApiError::Forbidden);
    }
    let removed = data.repo.delete_comment(c.id).await?;
    tracing::info!(id = c.id, removed, "comment thread deleted");
    Ok(HttpResponse::NoContent().finish())
}

// ---------------------------------------------------------------- people & cast

#[utoipa::path(
    post,
    path = "/api/v1/persons",
    request_body = NewPerson,
    responses(
        (status = 201, description = "Person created", body = Person),
        (status = 400, description = "Invalid fields"),
        (status = 403, description = "Admins only")
    ),
    tag = "people"
)]
pub async fn create_person(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewPerson>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let new = payload.into_inner();
    validation::validate_person(&new)?;
    let person = data.repo.create_person(new).await?;
    Ok(HttpResponse::Created().json(person))
}

#[utoipa::path(
    get,
    path = "/api/v1/persons/{id}",
    params(("id" = i64, Path, description = "Person id")),
    responses(
        (status = 200, description = "Person with filmography", body = PersonDetail),
        (status = 404, description = "Person not found")
    ),
    tag = "people"
)]
pub async fn person_detail(auth: Option<Auth>, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let person = data.repo.get_person(path.into_inner()).await?;
    let movies = data.repo.filmography(person.id).await?;
    let (history_count, history_percentage) = match auth {
        Some(auth) => {
            let ids: Vec<Id> = movies.iter().map(|m| m.id).collect();
            let seen = data.repo.count_history_among(auth.user_id(), &ids).await?;
            let pct = if ids.is_empty() { 0 } else { seen * 100 / ids.len() as u64 };
            (Some(seen), Some(pct))
        }
        None => (None, None),
    };
    Ok(HttpResponse::Ok().json(PersonDetail { person, movies, history_count, history_percentage }))
}

#[utoipa::path(
    get,
    path = "/api/v1/cast",
    params(
        ("person" = Option<i64>, Query, description = "Only credits of this person"),
        ("movie" = Option<i64>, Query, description = "Only credits on this movie")
    ),
    responses((status = 200, description = "Cast credits ordered by movie then person", body = [MovieCast])),
    tag = "people"
)]
pub async fn list_cast(data: web::Data<AppState>, filter: web::Query<CastFilter>) -> Result<HttpResponse, ApiError> {
    let credits = data.repo.list_cast(filter.into_inner()).await?;
    Ok(HttpResponse::Ok().json(credits))
}

#[utoipa::path(
    get,
    path = "/api/v1/cast/{id}",
    params(("id" = i64, Path, description = "Cast credit id")),
    responses(
        (status = 200, description = "Cast credit", body = MovieCast),
        (status = 404, description = "Cast credit not found")
    ),
    tag = "people"
)]
pub async fn get_cast(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let credit = data.repo.get_cast(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(credit))
}

#[utoipa::path(
    post,
    path = "/api/v1/cast",
    request_body = NewMovieCast,
    responses(
        (status = 201, description = "Credit added", body = MovieCast),
        (status = 403, description = "Admins only"),
        (status = 404, description = "Movie or person not found"),
        (status = 409, description = "Person already credited on this movie")
    ),
    tag = "people"
)]
pub async fn create_cast(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewMovieCast>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let new = payload.into_inner();
    validation::validate_played_as(new.played_as.as_deref())?;
    let credit = data.repo.create_cast(new).await?;
    Ok(HttpResponse::Created().json(credit))
}

// ---------------------------------------------------------------- personal lists

#[utoipa::path(
    get,
    path = "/api/v1/watchlist",
    params(PageParams),
    responses(
        (status = 200, description = "Paged watchlist, important first, then newest production year"),
        (status = 401, description = "Authentication required")
    ),
    tag = "lists"
)]
pub async fn list_watchlist(auth: Auth, data: web::Data<AppState>, params: web::Query<PageParams>) -> Result<HttpResponse, ApiError> {
    let page = page_of(&params)?;
    let entries = data.repo.list_watchlist(auth.user_id()).await?;
    let paged = Page::slice(entries, page, data.page_size).map(|(entry, movie)| WatchListItem {
        id: entry.id,
        important: entry.important,
        created_at: entry.created_at,
        movie,
    });
    Ok(HttpResponse::Ok().json(paged))
}

#[utoipa::path(
    post,
    path = "/api/v1/watchlist/{movie_id}",
    params(("movie_id" = i64, Path, description = "Movie id")),
    responses(
        (status = 200, description = "Entry added or removed", body = ToggleResponse),
        (status = 401, description = "Authentication required"),
        (status = 404, description = "Movie not found")
    ),
    tag = "lists"
)]
pub async fn toggle_watchlist(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let status = data.repo.toggle_watchlist(auth.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ToggleResponse { status }))
}

#[utoipa::path(
    put,
    path = "/api/v1/watchlist/{movie_id}",
    params(("movie_id" = i64, Path, description = "Movie id")),
    request_body = ImportantRequest,
    responses(
        (status = 200, description = "Entry updated", body = WatchListEntry),
        (status = 401, description = "Authentication required"),
        (status = 404, description = "Movie not on the watchlist")
    ),
    tag = "lists"
)]
pub async fn mark_important(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<ImportantRequest>,
) -> Result<HttpResponse, ApiError> {
    let entry = data
        .repo
        .set_watchlist_important(auth.user_id(), path.into_inner(), payload.important)
        .await?;
    Ok(HttpResponse::Ok().json(entry))
}

#[utoipa::path(
    get,
    path = "/api/v1/history",
    params(PageParams),
    responses(
        (status = 200, description = "Paged history, newest first"),
        (status = 401, description = "Authentication required")
    ),
    tag = "lists"
)]
pub async fn list_history(auth: Auth, data: web::Data<AppState>, params: web::Query<PageParams>) -> Result<HttpResponse, ApiError> {
    let page = page_of(&params)?;
    let entries = data.repo.list_history(auth.user_id()).await?;
    let paged = Page::slice(entries, page, data.page_size)
        .map(|(entry, movie)| ListedMovie { id: entry.id, created_at: entry.created_at, movie });
    Ok(HttpResponse::Ok().json(paged))
}

#[utoipa::path(
    post,
    path = "/api/v1/history/{movie_id}",
    params(("movie_id" = i64, Path, description = "Movie id")),
    responses(
        (status = 201, description = "Added to history", body = HistoryEntry),
        (status = 200, description = "Already in history", body = HistoryEntry),
        (status = 401, description = "Authentication required"),
        (status = 404, description = "Movie not found")
    ),
    tag = "lists"
)]
pub async fn add_history(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let (entry, inserted) = data.repo.add_history(auth.user_id(), path.into_inner()).await?;
    Ok(if inserted { HttpResponse::Created().json(entry) } else { HttpResponse::Ok().json(entry) })
}

#[utoipa::path(
    get,
    path = "/api/v1/blocklist",
    params(PageParams),
    responses(
        (status = 200, description = "Paged blocklist, newest first"),
        (status = 401, description = "Authentication required")
    ),
    tag = "lists"
)]
pub async fn list_blocklist(auth: Auth, data: web::Data<AppState>, params: web::Query<PageParams>) -> Result<HttpResponse, ApiError> {
    let page = page_of(&params)?;
    let entries = data.repo.list_blocklist(auth.user_id()).await?;
    let paged = Page::slice(entries, page, data.page_size)
        .map(|(entry, movie)| ListedMovie { id: entry.id, created_at: entry.created_at, movie });
    Ok(HttpResponse::Ok().json(paged))
}

#[utoipa::path(
    post,
    path = "/api/v1/blocklist/{movie_id}",
    params(("movie_id" = i64, Path, description = "Movie id")),
    responses(
        (status = 200, description = "Entry added or removed", body = ToggleResponse),
        (status = 401, description = "Authentication required"),
        (status = 404, description = "Movie not found")
    ),
    tag = "lists"
)]
pub async fn toggle_blocklist(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let status = data.repo.toggle_blocklist(auth.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ToggleResponse { status }))
}

#[utoipa::path(
    get,
    path = "/api/v1/activity",
    params(PageParams),
    responses(
        (status = 200, description = "Paged activity log, newest first"),
        (status = 401, description = "Authentication required")
    ),
    tag = "lists"
)]
pub async fn list_activity(auth: Auth, data: web::Data<AppState>, params: web::Query<PageParams>) -> Result<HttpResponse, ApiError> {
    let page = page_of(&params)?;
    let log = data.repo.list_activity(auth.user_id()).await?;
    Ok(HttpResponse::Ok().json(Page::slice(log, page, data.page_size)))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/current",
    responses(
        (status = 200, description = "Identity carried by the bearer token", body = CurrentUser),
        (status = 401, description = "Authentication required")
    ),
    tag = "users"
)]
pub async fn current_user(auth: Auth) -> Result<HttpResponse, ApiError> {
    let Auth(claims) = auth;
    Ok(HttpResponse::Ok().json(CurrentUser { id: claims.sub, username: claims.name, roles: claims.roles }))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/current/profile",
    responses(
        (status = 200, description = "Stored profile, or an empty one", body = UserProfile),
        (status = 401, description = "Authentication required")
    ),
    tag = "users"
)]
pub async fn get_profile(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let user = auth.user_id();
    let profile = data.repo.get_profile(user).await?.unwrap_or_else(|| UserProfile::empty(user));
    Ok(HttpResponse::Ok().json(profile))
}

#[utoipa::path(
    put,
    path = "/api/v1/users/current/profile",
    request_body = ProfileUpdate,
    responses(
        (status = 200, description = "Profile replaced", body = UserProfile),
        (status = 400, description = "Invalid fields or unknown favorite movie"),
        (status = 401, description = "Authentication required")
    ),
    tag = "users"
)]
pub async fn update_profile(auth: Auth, data: web::Data<AppState>, payload: web::Json<ProfileUpdate>) -> Result<HttpResponse, ApiError> {
    let upd = payload.into_inner();
    validation::validate_profile(&upd)?;
    match data.repo.upsert_profile(auth.user_id(), upd).await {
        Ok(profile) => Ok(HttpResponse::Ok().json(profile)),
        Err(RepoError::NotFound(Entity::Movie)) => Err(FieldErrors::single("favorite_movie", "movie does not exist").into()),
        Err(e) => Err(e.into()),
    }
}
