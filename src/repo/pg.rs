//! Postgres store. Uniqueness rules live in the schema (`migrations/0001_catalog.sql`); this
//! module maps constraint violations back onto [`RepoError`].

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgConnection, Pool, Postgres, QueryBuilder};
use tracing::debug;

use super::*;
use crate::query::{page_offset, MovieFilter, SortOrder};

const MOVIE_COLS: &str = "id, title, description, image, banner, category, language, status, director, \
     year_of_production, view_count, movie_trailer, slug, created_at";
const MOVIE_COLS_M: &str = "m.id, m.title, m.description, m.image, m.banner, m.category, m.language, m.status, \
     m.director, m.year_of_production, m.view_count, m.movie_trailer, m.slug, m.created_at";
const PERSON_COLS: &str =
    "id, name, image, birthday, death, gender, biography, known_for_department, place_of_birth, also_known_as, profile_path";
const CAST_COLS: &str = r#"id, person_id, movie_id, played_as, "order""#;
const COMMENT_COLS: &str = "id, user_id, username, movie_id, content, parent_id, active, created_at, updated_at";
const PROFILE_COLS: &str = "user_id, city, address, favorite_category, favorite_movie";
/// Inserts retried when a concurrent writer takes the derived slug first.
const SLUG_ATTEMPTS: usize = 3;

const UNIQUE_VIOLATION: &str = "23505";
const FK_VIOLATION: &str = "23503";

fn sql_code(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    }
}

/// Maps a driver error: missing row → `NotFound(entity)`, unique violation → `Conflict`,
/// foreign key violation → `NotFound(Movie)`.
fn db_err(entity: Entity, conflict: &'static str) -> impl Fn(sqlx::Error) -> RepoError {
    move |e| match sql_code(&e).as_deref() {
        Some(UNIQUE_VIOLATION) => RepoError::Conflict(conflict),
        Some(FK_VIOLATION) => RepoError::NotFound(Entity::Movie),
        _ if matches!(e, sqlx::Error::RowNotFound) => RepoError::NotFound(entity),
        _ => RepoError::Internal(e.to_string()),
    }
}

fn internal(e: sqlx::Error) -> RepoError {
    RepoError::Internal(e.to_string())
}

fn parse_opt<T: FromStr<Err = UnknownChoice>>(v: Option<String>) -> RepoResult<Option<T>> {
    v.filter(|s| !s.is_empty())
        .map(|s| s.parse::<T>())
        .transpose()
        .map_err(|e| RepoError::Internal(e.to_string()))
}

fn escape_like(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len());
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Escapes `LIKE` wildcards and wraps the needle for substring matching.
fn like_pattern(needle: &str) -> String {
    format!("%{}%", escape_like(needle))
}

#[derive(sqlx::FromRow)]
struct MovieRow {
    id: Id,
    title: String,
    description: Option<String>,
    image: String,
    banner: String,
    category: Vec<String>,
    language: Option<String>,
    status: Option<String>,
    director: Option<String>,
    year_of_production: NaiveDate,
    view_count: i64,
    movie_trailer: Option<String>,
    slug: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MovieRow> for Movie {
    type Error = RepoError;

    fn try_from(r: MovieRow) -> RepoResult<Movie> {
        let category = r
            .category
            .iter()
            .map(|c| c.parse::<Category>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RepoError::Internal(e.to_string()))?;
        Ok(Movie {
            id: r.id,
            title: r.title,
            description: r.description,
            image: r.image,
            banner: r.banner,
            category,
            language: parse_opt(r.language)?,
            status: parse_opt(r.status)?,
            director: r.director,
            year_of_production: r.year_of_production,
            view_count: r.view_count,
            movie_trailer: r.movie_trailer,
            slug: r.slug,
            created_at: r.created_at,
        })
    }
}

fn movies(rows: Vec<MovieRow>) -> RepoResult<Vec<Movie>> {
    rows.into_iter().map(Movie::try_from).collect()
}

#[derive(sqlx::FromRow)]
struct PersonRow {
    id: Id,
    name: Option<String>,
    image: String,
    birthday: Option<NaiveDate>,
    death: Option<NaiveDate>,
    gender: Option<String>,
    biography: Option<String>,
    known_for_department: Option<String>,
    place_of_birth: Option<String>,
    also_known_as: Option<String>,
    profile_path: Option<String>,
}

impl TryFrom<PersonRow> for Person {
    type Error = RepoError;

    fn try_from(r: PersonRow) -> RepoResult<Person> {
        Ok(Person {
            id: r.id,
            name: r.name,
            image: r.image,
            birthday: r.birthday,
            death: r.death,
            gender: parse_opt(r.gender)?,
            biography: r.biography,
            known_for_department: r.known_for_department,
            place_of_birth: r.place_of_birth,
            also_known_as: r.also_known_as,
            profile_path: r.profile_path,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    user_id: UserId,
    city: Option<String>,
    address: Option<String>,
    favorite_category: Vec<String>,
    favorite_movie: Option<Id>,
}

impl TryFrom<ProfileRow> for UserProfile {
    type Error = RepoError;

    fn try_from(r: ProfileRow) -> RepoResult<UserProfile> {
        let favorite_category = r
            .favorite_category
            .iter()
            .map(|c| c.parse::<Category>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RepoError::Internal(e.to_string()))?;
        Ok(UserProfile {
            user_id: r.user_id,
            city: r.city,
            address: r.address,
            favorite_category,
            favorite_movie: r.favorite_movie,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CastMemberRow {
    cast_id: Id,
    played_as: Option<String>,
    order: i32,
    #[sqlx(flatten)]
    person: PersonRow,
}

#[derive(sqlx::FromRow)]
struct LinkRow {
    id: Id,
    movie_id: Id,
    #[sqlx(rename = "type")]
    link_type: String,
    link: String,
}

impl TryFrom<LinkRow> for MovieLink {
    type Error = RepoError;

    fn try_from(r: LinkRow) -> RepoResult<MovieLink> {
        Ok(MovieLink {
            id: r.id,
            movie_id: r.movie_id,
            link_type: r.link_type.parse().map_err(|e: UnknownChoice| RepoError::Internal(e.to_string()))?,
            link: r.link,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RatingUpsertRow {
    #[sqlx(flatten)]
    rating: Rating,
    inserted: bool,
}

/// A personal-list entry joined with its movie.
#[derive(sqlx::FromRow)]
struct EntryRow {
    entry_id: Id,
    entry_user_id: UserId,
    entry_important: bool,
    entry_created_at: DateTime<Utc>,
    #[sqlx(flatten)]
    movie: MovieRow,
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, f: &MovieFilter) {
    qb.push(" WHERE TRUE");
    if let Some(q) = &f.search {
        let pat = like_pattern(q);
        qb.push(" AND (title ILIKE ").push_bind(pat.clone()).push(" OR slug ILIKE ").push_bind(pat).push(")");
    }
    if let Some(c) = &f.category {
        qb.push(" AND EXISTS (SELECT 1 FROM unnest(category) AS c WHERE c ILIKE ")
            .push_bind(like_pattern(c))
            .push(")");
    }
    if let Some(l) = &f.language {
        qb.push(" AND language ILIKE ").push_bind(like_pattern(l));
    }
    if let Some(s) = &f.status {
        qb.push(" AND status ILIKE ").push_bind(like_pattern(s));
    }
    if let Some(y) = f.year {
        qb.push(" AND EXTRACT(YEAR FROM year_of_production)::int = ").push_bind(y);
    }
}

async fn log_activity(conn: &mut PgConnection, user: UserId, movie_id: Id, action: ActivityAction) -> RepoResult<()> {
    sqlx::query("INSERT INTO activity (user_id, movie_id, action) VALUES ($1, $2, $3)")
        .bind(user)
        .bind(movie_id)
        .bind(action.as_str())
        .execute(conn)
        .await
        .map_err(internal)?;
    Ok(())
}

#[derive(Clone)]
pub struct PgRepo { pool: Pool<Postgres> }

impl PgRepo {
    pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

    /// Pings the database until it answers, sleeping `200ms * attempt^2` between tries.
    pub async fn wait_until_ready(&self, max_attempts: u32) -> anyhow::Result<()> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match sqlx::query("SELECT 1").execute(&self.pool).await {
                Ok(_) => return Ok(()),
                Err(e) if attempt >= max_attempts => {
                    tracing::error!(attempt, error = %e, "database unreachable");
                    return Err(anyhow::anyhow!("database unreachable after {attempt} attempts: {e}"));
                }
                Err(e) => {
                    let backoff_ms = 200 * u64::from(attempt).pow(2);
                    tracing::warn!(attempt, error = %e, backoff_ms, "database not ready, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                }
            }
        }
    }

    async fn ensure_movie(&self, id: Id) -> RepoResult<()> {
        let found: Option<Id> = sqlx::query_scalar("SELECT id FROM movies WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        found.map(|_| ()).ok_or(RepoError::NotFound(Entity::Movie))
    }

    /// First free slug in the `base`, `base-2`, ... sequence as of now.
    async fn free_slug(&self, base: &str) -> RepoResult<String> {
        let taken: Vec<String> = sqlx::query_scalar("SELECT slug FROM movies WHERE slug = $1 OR slug LIKE $2")
            .bind(base)
            .bind(format!("{}-%", escape_like(base)))
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
        Ok(free_slug(base, |candidate| taken.iter().any(|t| t == candidate)))
    }

    async fn insert_movie(&self, new: &NewMovie, slug: &str) -> RepoResult<Movie> {
        let row = sqlx::query_as::<_, MovieRow>(&format!(
            "INSERT INTO movies (title, description, image, banner, category, language, status, director, \
             year_of_production, movie_trailer, slug) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11) RETURNING {MOVIE_COLS}"
        ))
        .bind(&new.title)
        .bind(&new.description)
        .bind(new.image.as_deref().unwrap_or(DEFAULT_POSTER))
        .bind(new.banner.as_deref().unwrap_or(DEFAULT_BANNER))
        .bind(category_strings(&new.category))
        .bind(new.language.map(Language::as_str))
        .bind(new.status.map(Status::as_str))
        .bind(&new.director)
        .bind(new.year_of_production)
        .bind(new.movie_trailer.as_deref().filter(|t| !t.is_empty()))
        .bind(slug)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err(Entity::Movie, "a movie with this slug already exists"))?;
        row.try_into()
    }

    async fn entries(&self, sql: &str, user: UserId) -> RepoResult<Vec<EntryRow>> {
        sqlx::query_as::<_, EntryRow>(sql)
            .bind(user)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)
    }
}

fn category_strings(cats: &[Category]) -> Vec<String> {
    cats.iter().map(|c| c.as_str().to_string()).collect()
}

#[async_trait]
impl MovieRepo for PgRepo {
    async fn list_movies(&self, q: &MovieQuery, page_size: u32) -> RepoResult<Page<Movie>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM movies");
        push_filter(&mut count, &q.filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await.map_err(internal)?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {MOVIE_COLS} FROM movies"));
        push_filter(&mut select, &q.filter);
        select.push(match q.sort {
            None => " ORDER BY id",
            Some(SortOrder::TitleAsc) => " ORDER BY lower(title) ASC, id",
            Some(SortOrder::TitleDesc) => " ORDER BY lower(title) DESC, id",
        });
        let offset = i64::try_from(page_offset(q.page, page_size)).unwrap_or(i64::MAX);
        select.push(" LIMIT ").push_bind(i64::from(page_size)).push(" OFFSET ").push_bind(offset);
        let rows: Vec<MovieRow> = select.build_query_as().fetch_all(&self.pool).await.map_err(internal)?;

        debug!(total, page = q.page, "movie listing");
        Ok(Page::from_parts(movies(rows)?, total.max(0) as u64, q.page, page_size))
    }

    async fn get_movie(&self, id: Id) -> RepoResult<Movie> {
        let row = sqlx::query_as::<_, MovieRow>(&format!("SELECT {MOVIE_COLS} FROM movies WHERE id = $1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err(Entity::Movie, "movie"))?;
        row.try_into()
    }

    async fn create_movie(&self, new: NewMovie) -> RepoResult<Movie> {
        if let Some(explicit) = new.slug.as_deref() {
            return self.insert_movie(&new, explicit).await;
        }
        let base = crate::validation::slugify(&new.title);
        for attempt in 1..=SLUG_ATTEMPTS {
            let slug = self.free_slug(&base).await?;
            match self.insert_movie(&new, &slug).await {
                Err(RepoError::Conflict(_)) if attempt < SLUG_ATTEMPTS => {
                    debug!(slug = %slug, attempt, "derived slug taken concurrently, retrying");
                }
                other => return other,
            }
        }
        Err(RepoError::Conflict("a movie with this slug already exists"))
    }

    async fn update_movie(&self, id: Id, upd: NewMovie) -> RepoResult<Movie> {
        let row = sqlx::query_as::<_, MovieRow>(&format!(
            "UPDATE movies SET title = $2, description = $3, image = $4, banner = $5, category = $6, language = $7, \
             status = $8, director = $9, year_of_production = COALESCE($10, year_of_production), movie_trailer = $11, \
             slug = COALESCE($12, slug) WHERE id = $1 RETURNING {MOVIE_COLS}"
        ))
        .bind(id)
        .bind(&upd.title)
        .bind(&upd.description)
        .bind(upd.image.as_deref().unwrap_or(DEFAULT_POSTER))
        .bind(upd.banner.as_deref().unwrap_or(DEFAULT_BANNER))
        .bind(category_strings(&upd.category))
        .bind(upd.language.map(Language::as_str))
        .bind(upd.status.map(Status::as_str))
        .bind(&upd.director)
        .bind(upd.year_of_production)
        .bind(upd.movie_trailer.as_deref().filter(|t| !t.is_empty()))
        .bind(&upd.slug)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err(Entity::Movie, "a movie with this slug already exists"))?;
        row.try_into()
    }

    async fn delete_movie(&self, id: Id) -> RepoResult<()> {
        let res = sqlx::query("DELETE FROM movies WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound(Entity::Movie));
        }
        Ok(())
    }

    async fn record_view(&self, id: Id) -> RepoResult<Movie> {
        let row = sqlx::query_as::<_, MovieRow>(&format!(
            "UPDATE movies SET view_count = view_count + 1 WHERE id = $1 RETURNING {MOVIE_COLS}"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err(Entity::Movie, "movie"))?;
        row.try_into()
    }

    async fn movies_by_status(&self, status: Status, limit: u32) -> RepoResult<Vec<Movie>> {
        let rows = sqlx::query_as::<_, MovieRow>(&format!(
            "SELECT {MOVIE_COLS} FROM movies WHERE status = $1 ORDER BY created_at DESC, id DESC LIMIT $2"
        ))
        .bind(status.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        movies(rows)
    }

    async fn related_movies(&self, id: Id, limit: u32) -> RepoResult<Vec<Movie>> {
        self.ensure_movie(id).await?;
        let rows = sqlx::query_as::<_, MovieRow>(&format!(
            "SELECT {MOVIE_COLS} FROM movies WHERE id <> $1 \
             AND category && (SELECT category FROM movies WHERE id = $1) \
             ORDER BY lower(title), id LIMIT $2"
        ))
        .bind(id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        movies(rows)
    }
}

#[async_trait]
impl CatalogRepo for PgRepo {
    async fn create_person(&self, new: NewPerson) -> RepoResult<Person> {
        let row = sqlx::query_as::<_, PersonRow>(&format!(
            "INSERT INTO persons (name, image, birthday, death, gender, biography, known_for_department, place_of_birth, \
             also_known_as, profile_path) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10) RETURNING {PERSON_COLS}"
        ))
        .bind(&new.name)
        .bind(new.image.as_deref().unwrap_or(DEFAULT_PORTRAIT))
        .bind(new.birthday)
        .bind(new.death)
        .bind(new.gender.map(Gender::as_str))
        .bind(&new.biography)
        .bind(&new.known_for_department)
        .bind(&new.place_of_birth)
        .bind(&new.also_known_as)
        .bind(&new.profile_path)
        .fetch_one(&self.pool)
        .await
        .map_err(internal)?;
        row.try_into()
    }

    async fn get_person(&self, id: Id) -> RepoResult<Person> {
        let row = sqlx::query_as::<_, PersonRow>(&format!("SELECT {PERSON_COLS} FROM persons WHERE id = $1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err(Entity::Person, "person"))?;
        row.try_into()
    }

    async fn filmography(&self, person_id: Id) -> RepoResult<Vec<Movie>> {
        self.get_person(person_id).await?;
        let rows = sqlx::query_as::<_, MovieRow>(&format!(
            "SELECT {MOVIE_COLS_M} FROM movies m JOIN movie_casts c ON c.movie_id = m.id \
             WHERE c.person_id = $1 ORDER BY m.year_of_production DESC, m.id"
        ))
        .bind(person_id)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        movies(rows)
    }

    async fn list_cast(&self, filter: CastFilter) -> RepoResult<Vec<MovieCast>> {
        sqlx::query_as::<_, MovieCast>(&format!(
            "SELECT {CAST_COLS} FROM movie_casts \
             WHERE ($1::bigint IS NULL OR person_id = $1) AND ($2::bigint IS NULL OR movie_id = $2) \
             ORDER BY movie_id, person_id"
        ))
        .bind(filter.person)
        .bind(filter.movie)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }

    async fn get_cast(&self, id: Id) -> RepoResult<MovieCast> {
        sqlx::query_as::<_, MovieCast>(&format!("SELECT {CAST_COLS} FROM movie_casts WHERE id = $1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err(Entity::Cast, "cast"))
    }

    async fn create_cast(&self, new: NewMovieCast) -> RepoResult<MovieCast> {
        self.ensure_movie(new.movie_id).await?;
        self.get_person(new.person_id).await?;
        sqlx::query_as::<_, MovieCast>(&format!(
            r#"INSERT INTO movie_casts (person_id, movie_id, played_as, "order") VALUES ($1,$2,$3,$4) RETURNING {CAST_COLS}"#
        ))
        .bind(new.person_id)
        .bind(new.movie_id)
        .bind(&new.played_as)
        .bind(new.order)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err(Entity::Cast, "this person is already credited on this movie"))
    }

    async fn cast_for_movie(&self, movie_id: Id) -> RepoResult<Vec<CastMember>> {
        self.ensure_movie(movie_id).await?;
        let rows = sqlx::query_as::<_, CastMemberRow>(
            r#"SELECT c.id AS cast_id, c.played_as, c."order",
                      p.id, p.name, p.image, p.birthday, p.death, p.gender, p.biography,
                      p.known_for_department, p.place_of_birth, p.also_known_as, p.profile_path
               FROM movie_casts c JOIN persons p ON p.id = c.person_id
               WHERE c.movie_id = $1
               ORDER BY c."order", c.id"#,
        )
        .bind(movie_id)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        rows.into_iter()
            .map(|r| -> RepoResult<CastMember> {
                Ok(CastMember { cast_id: r.cast_id, person: r.person.try_into()?, played_as: r.played_as, order: r.order })
            })
            .collect()
    }

    async fn list_links(&self, movie_id: Id) -> RepoResult<Vec<MovieLink>> {
        self.ensure_movie(movie_id).await?;
        let rows = sqlx::query_as::<_, LinkRow>("SELECT id, movie_id, type, link FROM movie_links WHERE movie_id = $1 ORDER BY id")
            .bind(movie_id)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
        rows.into_iter().map(MovieLink::try_from).collect()
    }

    async fn create_link(&self, movie_id: Id, new: NewMovieLink) -> RepoResult<MovieLink> {
        let row = sqlx::query_as::<_, LinkRow>(
            "INSERT INTO movie_links (movie_id, type, link) VALUES ($1,$2,$3) RETURNING id, movie_id, type, link",
        )
        .bind(movie_id)
        .bind(new.link_type.as_str())
        .bind(&new.link)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err(Entity::Link, "link"))?;
        row.try_into()
    }
}

#[async_trait]
impl RatingRepo for PgRepo {
    async fn upsert_rating(&self, user: UserId, movie_id: Id, score: RatingScore) -> RepoResult<(Rating, Upserted)> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        let row = sqlx::query_as::<_, RatingUpsertRow>(
            "INSERT INTO ratings (user_id, movie_id, rating) VALUES ($1,$2,$3) \
             ON CONFLICT (user_id, movie_id) DO UPDATE SET rating = EXCLUDED.rating \
             RETURNING id, user_id, movie_id, rating, created_at, (xmax = 0) AS inserted",
        )
        .bind(user)
        .bind(movie_id)
        .bind(score.get())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err(Entity::Rating, "rating"))?;
        log_activity(&mut tx, user, movie_id, ActivityAction::Rate).await?;
        tx.commit().await.map_err(internal)?;
        let outcome = if row.inserted { Upserted::Created } else { Upserted::Updated };
        Ok((row.rating, outcome))
    }

    async fn get_rating(&self, id: Id) -> RepoResult<Rating> {
        sqlx::query_as::<_, Rating>("SELECT id, user_id, movie_id, rating, created_at FROM ratings WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err(Entity::Rating, "rating"))
    }

    async fn delete_rating(&self, id: Id) -> RepoResult<()> {
        let res = sqlx::query("DELETE FROM ratings WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound(Entity::Rating));
        }
        Ok(())
    }

    async fn movie_scores(&self, movie_id: Id) -> RepoResult<Vec<i32>> {
        self.ensure_movie(movie_id).await?;
        sqlx::query_scalar("SELECT rating FROM ratings WHERE movie_id = $1")
            .bind(movie_id)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)
    }
}

#[async_trait]
impl CommentRepo for PgRepo {
    async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
        self.ensure_movie(new.movie_id).await?;
        sqlx::query_as::<_, Comment>(&format!(
            "INSERT INTO comments (user_id, username, movie_id, content, parent_id, active) \
             VALUES ($1,$2,$3,$4,$5,$6) RETURNING {COMMENT_COLS}"
        ))
        .bind(new.user_id)
        .bind(&new.username)
        .bind(new.movie_id)
        .bind(&new.content)
        .bind(new.parent_id)
        .bind(new.active)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match sql_code(&e).as_deref() {
            // the movie was checked above, so a dangling reference is the parent
            Some(FK_VIOLATION) => RepoError::NotFound(Entity::Comment),
            _ => db_err(Entity::Comment, "you have already commented on this movie")(e),
        })
    }

    async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
        sqlx::query_as::<_, Comment>(&format!("SELECT {COMMENT_COLS} FROM comments WHERE id = $1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err(Entity::Comment, "comment"))
    }

    async fn list_comments(&self, filter: CommentFilter) -> RepoResult<Vec<Comment>> {
        sqlx::query_as::<_, Comment>(&format!(
            "SELECT {COMMENT_COLS} FROM comments \
             WHERE ($1::bigint IS NULL OR user_id = $1) AND ($2::bigint IS NULL OR movie_id = $2) \
             AND ($3::boolean IS NULL OR active = $3) ORDER BY created_at, id"
        ))
        .bind(filter.user)
        .bind(filter.movie)
        .bind(filter.active)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }

    async fn set_comment_active(&self, id: Id, active: bool) -> RepoResult<Comment> {
        sqlx::query_as::<_, Comment>(&format!(
            "UPDATE comments SET active = $2, updated_at = now() WHERE id = $1 RETURNING {COMMENT_COLS}"
        ))
        .bind(id)
        .bind(active)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err(Entity::Comment, "comment"))
    }

    async fn update_comment_content(&self, id: Id, content: String) -> RepoResult<Comment> {
        sqlx::query_as::<_, Comment>(&format!(
            "UPDATE comments SET content = $2, updated_at = now() WHERE id = $1 RETURNING {COMMENT_COLS}"
        ))
        .bind(id)
        .bind(&content)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err(Entity::Comment, "comment"))
    }

    async fn delete_comment(&self, id: Id) -> RepoResult<u64> {
        let res = sqlx::query(
            "WITH RECURSIVE sub AS ( \
                 SELECT id FROM comments WHERE id = $1 \
                 UNION ALL SELECT c.id FROM comments c JOIN sub ON c.parent_id = sub.id) \
             DELETE FROM comments WHERE id IN (SELECT id FROM sub)",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        match res.rows_affected() {
            0 => Err(RepoError::NotFound(Entity::Comment)),
            n => Ok(n),
        }
    }
}

#[async_trait]
impl EngagementRepo for PgRepo {
    async fn toggle_watchlist(&self, user: UserId, movie_id: Id) -> RepoResult<Toggled> {
        self.ensure_movie(movie_id).await?;
        let mut tx = self.pool.begin().await.map_err(internal)?;
        let removed = sqlx::query("DELETE FROM watchlist WHERE user_id = $1 AND movie_id = $2")
            .bind(user)
            .bind(movie_id)
            .execute(&mut *tx)
            .await
            .map_err(internal)?
            .rows_affected();
        let toggled = if removed > 0 {
            log_activity(&mut tx, user, movie_id, ActivityAction::WatchlistRemove).await?;
            Toggled::Removed
        } else {
            sqlx::query("INSERT INTO watchlist (user_id, movie_id) VALUES ($1, $2) ON CONFLICT (user_id, movie_id) DO NOTHING")
                .bind(user)
                .bind(movie_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err(Entity::WatchList, "watchlist"))?;
            sqlx::query("DELETE FROM history WHERE user_id = $1 AND movie_id = $2")
                .bind(user)
                .bind(movie_id)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
            log_activity(&mut tx, user, movie_id, ActivityAction::WatchlistAdd).await?;
            Toggled::Added
        };
        tx.commit().await.map_err(internal)?;
        Ok(toggled)
    }

    async fn set_watchlist_important(&self, user: UserId, movie_id: Id, important: bool) -> RepoResult<WatchListEntry> {
        sqlx::query_as::<_, WatchListEntry>(
            "UPDATE watchlist SET important = $3 WHERE user_id = $1 AND movie_id = $2 \
             RETURNING id, user_id, movie_id, important, created_at",
        )
        .bind(user)
        .bind(movie_id)
        .bind(important)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err(Entity::WatchList, "watchlist"))
    }

    async fn list_watchlist(&self, user: UserId) -> RepoResult<Vec<(WatchListEntry, Movie)>> {
        let rows = self
            .entries(
                &format!(
                    "SELECT w.id AS entry_id, w.user_id AS entry_user_id, w.important AS entry_important, \
                     w.created_at AS entry_created_at, {MOVIE_COLS_M} \
                     FROM watchlist w JOIN movies m ON m.id = w.movie_id WHERE w.user_id = $1 \
                     ORDER BY w.important DESC, EXTRACT(YEAR FROM m.year_of_production) DESC, w.created_at DESC"
                ),
                user,
            )
            .await?;
        rows.into_iter()
            .map(|r| -> RepoResult<(WatchListEntry, Movie)> {
                let movie = Movie::try_from(r.movie)?;
                let entry = WatchListEntry {
                    id: r.entry_id,
                    user_id: r.entry_user_id,
                    movie_id: movie.id,
                    important: r.entry_important,
                    created_at: r.entry_created_at,
                };
                Ok((entry, movie))
            })
            .collect()
    }

    async fn add_history(&self, user: UserId, movie_id: Id) -> RepoResult<(HistoryEntry, bool)> {
        self.ensure_movie(movie_id).await?;
        let mut tx = self.pool.begin().await.map_err(internal)?;
        let inserted = sqlx::query_as::<_, HistoryEntry>(
            "INSERT INTO history (user_id, movie_id) VALUES ($1, $2) ON CONFLICT (user_id, movie_id) DO NOTHING \
             RETURNING id, user_id, movie_id, created_at",
        )
        .bind(user)
        .bind(movie_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(internal)?;
        let outcome = match inserted {
            Some(entry) => {
                log_activity(&mut tx, user, movie_id, ActivityAction::HistoryAdd).await?;
                (entry, true)
            }
            None => {
                let entry = sqlx::query_as::<_, HistoryEntry>(
                    "SELECT id, user_id, movie_id, created_at FROM history WHERE user_id = $1 AND movie_id = $2",
                )
                .bind(user)
                .bind(movie_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(internal)?;
                (entry, false)
            }
        };
        tx.commit().await.map_err(internal)?;
        Ok(outcome)
    }

    async fn list_history(&self, user: UserId) -> RepoResult<Vec<(HistoryEntry, Movie)>> {
        let rows = self
            .entries(
                &format!(
                    "SELECT h.id AS entry_id, h.user_id AS entry_user_id, FALSE AS entry_important, \
                     h.created_at AS entry_created_at, {MOVIE_COLS_M} \
                     FROM history h JOIN movies m ON m.id = h.movie_id WHERE h.user_id = $1 \
                     ORDER BY h.created_at DESC, h.id DESC"
                ),
                user,
            )
            .await?;
        rows.into_iter()
            .map(|r| -> RepoResult<(HistoryEntry, Movie)> {
                let movie = Movie::try_from(r.movie)?;
                let entry = HistoryEntry { id: r.entry_id, user_id: r.entry_user_id, movie_id: movie.id, created_at: r.entry_created_at };
                Ok((entry, movie))
            })
            .collect()
    }

    async fn count_history_among(&self, user: UserId, movie_ids: &[Id]) -> RepoResult<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM history WHERE user_id = $1 AND movie_id = ANY($2)")
            .bind(user)
            .bind(movie_ids.to_vec())
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
        Ok(n.max(0) as u64)
    }

    async fn toggle_blocklist(&self, user: UserId, movie_id: Id) -> RepoResult<Toggled> {
        self.ensure_movie(movie_id).await?;
        let mut tx = self.pool.begin().await.map_err(internal)?;
        let removed = sqlx::query("DELETE FROM blocklist WHERE user_id = $1 AND movie_id = $2")
            .bind(user)
            .bind(movie_id)
            .execute(&mut *tx)
            .await
            .map_err(internal)?
            .rows_affected();
        let toggled = if removed > 0 {
            log_activity(&mut tx, user, movie_id, ActivityAction::BlocklistRemove).await?;
            Toggled::Removed
        } else {
            sqlx::query("INSERT INTO blocklist (user_id, movie_id) VALUES ($1, $2) ON CONFLICT (user_id, movie_id) DO NOTHING")
                .bind(user)
                .bind(movie_id)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
            log_activity(&mut tx, user, movie_id, ActivityAction::BlocklistAdd).await?;
            Toggled::Added
        };
        tx.commit().await.map_err(internal)?;
        Ok(toggled)
    }

    async fn list_blocklist(&self, user: UserId) -> RepoResult<Vec<(BlockListEntry, Movie)>> {
        let rows = self
            .entries(
                &format!(
                    "SELECT b.id AS entry_id, b.user_id AS entry_user_id, FALSE AS entry_important, \
                     b.created_at AS entry_created_at, {MOVIE_COLS_M} \
                     FROM blocklist b JOIN movies m ON m.id = b.movie_id WHERE b.user_id = $1 \
                     ORDER BY b.created_at DESC, b.id DESC"
                ),
                user,
            )
            .await?;
        rows.into_iter()
            .map(|r| -> RepoResult<(BlockListEntry, Movie)> {
                let movie = Movie::try_from(r.movie)?;
                let entry = BlockListEntry { id: r.entry_id, user_id: r.entry_user_id, movie_id: movie.id, created_at: r.entry_created_at };
                Ok((entry, movie))
            })
            .collect()
    }

    async fn list_activity(&self, user: UserId) -> RepoResult<Vec<Activity>> {
        sqlx::query_as::<_, Activity>(
            "SELECT id, user_id, movie_id, action, created_at FROM activity WHERE user_id = $1 ORDER BY created_at DESC, id DESC",
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }
}

#[async_trait]
impl ProfileRepo for PgRepo {
    async fn get_profile(&self, user: UserId) -> RepoResult<Option<UserProfile>> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!("SELECT {PROFILE_COLS} FROM user_profiles WHERE user_id = $1"))
            .bind(user)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.map(UserProfile::try_from).transpose()
    }

    async fn upsert_profile(&self, user: UserId, upd: ProfileUpdate) -> RepoResult<UserProfile> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "INSERT INTO user_profiles (user_id, city, address, favorite_category, favorite_movie) VALUES ($1,$2,$3,$4,$5) \
             ON CONFLICT (user_id) DO UPDATE SET city = EXCLUDED.city, address = EXCLUDED.address, \
             favorite_category = EXCLUDED.favorite_category, favorite_movie = EXCLUDED.favorite_movie \
             RETURNING {PROFILE_COLS}"
        ))
        .bind(user)
        .bind(&upd.city)
        .bind(&upd.address)
        .bind(category_strings(&upd.favorite_category))
        .bind(upd.favorite_movie)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err(Entity::Movie, "profile"))?;
        row.try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("alien"), "%alien%");
        assert_eq!(like_pattern("100%_x\\"), "%100\\%\\_x\\\\%");
    }

    #[test]
    fn slug_prefix_pattern_escapes_underscores() {
        assert_eq!(format!("{}-%", escape_like("snake_case")), "snake\\_case-%");
    }
}
