use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub type Id = i64;
pub type UserId = i64;

pub const DEFAULT_POSTER: &str = "movies/poster-not-available.jpg";
pub const DEFAULT_BANNER: &str = "banners/no-banner-available.jpg";
pub const DEFAULT_PORTRAIT: &str = "persons/person-no-available.jpg";

/// Raised when a stored or submitted string is not one of an enumeration's values.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownChoice {
    pub kind: &'static str,
    pub value: String,
}

// Fixed enumerations are stored and serialised by their slug form.
macro_rules! choice_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal, { $($variant:ident => ($slug:literal, $label:literal)),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
        pub enum $name {
            $(#[serde(rename = $slug)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self { $($name::$variant => $slug),+ }
            }

            pub fn label(self) -> &'static str {
                match self { $($name::$variant => $label),+ }
            }
        }

        impl FromStr for $name {
            type Err = UnknownChoice;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($slug => Ok($name::$variant),)+
                    other => Err(UnknownChoice { kind: $kind, value: other.to_string() }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

choice_enum!(Category, "category", {
    Action => ("action", "ACTION"),
    Adventure => ("adventure", "ADVENTURE"),
    Animated => ("animated", "ANIMATED"),
    Comedy => ("comedy", "COMEDY"),
    Crime => ("crime", "CRIME"),
    Drama => ("drama", "DRAMA"),
    Fantasy => ("fantasy", "FANTASY"),
    Horror => ("horror", "HORROR"),
    Historical => ("historical", "HISTORICAL"),
    Romance => ("romance", "ROMANCE"),
    Western => ("western", "WESTERN"),
    ScienceFiction => ("science-fiction", "SCIENCE FICTION"),
});

choice_enum!(Language, "language", {
    English => ("english", "ENGLISH"),
    Hebrew => ("hebrew", "HEBREW"),
    Spanish => ("spanish", "SPANISH"),
});

choice_enum!(
    /// Editorial shelf a movie is shown on.
    Status, "status", {
    RecentlyAdded => ("recently-added", "RECENTLY ADDED"),
    MostWatched => ("most-watched", "MOST WATCHED"),
    TopRated => ("top-rated", "TOP RATED"),
});

choice_enum!(Gender, "gender", {
    Male => ("male", "Male"),
    Female => ("female", "Female"),
    Unspecified => ("none", "None"),
});

choice_enum!(LinkType, "link type", {
    Download => ("download", "DOWNLOAD LINK"),
    Watch => ("watch", "WATCH LINK"),
});

/// Most categories a single movie may carry.
pub const MAX_CATEGORIES: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Movie {
    pub id: Id,
    pub title: String,
    pub description: Option<String>,
    pub image: String,
    pub banner: String,
    pub category: Vec<Category>,
    pub language: Option<Language>,
    pub status: Option<Status>,
    pub director: Option<String>,
    pub year_of_production: NaiveDate,
    pub view_count: i64,
    pub movie_trailer: Option<String>,
    pub slug: String,
    pub created_at: DateTime<Utc>,
}

/// Editable movie fields; used for both creation and full (`PUT`) replacement.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct NewMovie {
    pub title: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub banner: Option<String>,
    #[serde(default)]
    pub category: Vec<Category>,
    pub language: Option<Language>,
    pub status: Option<Status>,
    pub director: Option<String>,
    pub year_of_production: Option<NaiveDate>,
    pub movie_trailer: Option<String>,
    pub slug: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Person {
    pub id: Id,
    pub name: Option<String>,
    pub image: String,
    pub birthday: Option<NaiveDate>,
    pub death: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub biography: Option<String>,
    pub known_for_department: Option<String>,
    pub place_of_birth: Option<String>,
    pub also_known_as: Option<String>,
    pub profile_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct NewPerson {
    pub name: Option<String>,
    pub image: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub death: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub biography: Option<String>,
    pub known_for_department: Option<String>,
    pub place_of_birth: Option<String>,
    pub also_known_as: Option<String>,
    pub profile_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, sqlx::FromRow)]
pub struct MovieCast {
    pub id: Id,
    pub person_id: Id,
    pub movie_id: Id,
    pub played_as: Option<String>,
    pub order: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewMovieCast {
    pub person_id: Id,
    pub movie_id: Id,
    pub played_as: Option<String>,
    #[serde(default)]
    pub order: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CastFilter {
    pub person: Option<Id>,
    pub movie: Option<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct MovieLink {
    pub id: Id,
    pub movie_id: Id,
    #[serde(rename = "type")]
    pub link_type: LinkType,
    pub link: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewMovieLink {
    #[serde(rename = "type")]
    pub link_type: LinkType,
    pub link: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, sqlx::FromRow)]
pub struct Rating {
    pub id: Id,
    pub user_id: UserId,
    pub movie_id: Id,
    pub rating: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Created,
    Updated,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, sqlx::FromRow)]
pub struct Comment {
    pub id: Id,
    pub user_id: UserId,
    pub username: String,
    pub movie_id: Id,
    pub content: String,
    pub parent_id: Option<Id>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Comment as handed to the store; identity comes from the bearer token, not the body.
#[derive(Debug, Clone)]
pub struct NewComment {
    pub user_id: UserId,
    pub username: String,
    pub movie_id: Id,
    pub content: String,
    pub parent_id: Option<Id>,
    pub active: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CommentFilter {
    pub user: Option<UserId>,
    pub movie: Option<Id>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, sqlx::FromRow)]
pub struct HistoryEntry {
    pub id: Id,
    pub user_id: UserId,
    pub movie_id: Id,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, sqlx::FromRow)]
pub struct WatchListEntry {
    pub id: Id,
    pub user_id: UserId,
    pub movie_id: Id,
    pub important: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, sqlx::FromRow)]
pub struct BlockListEntry {
    pub id: Id,
    pub user_id: UserId,
    pub movie_id: Id,
    pub created_at: DateTime<Utc>,
}

/// Per-user preferences. A user without a stored row reads as [`UserProfile::empty`].
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct UserProfile {
    pub user_id: UserId,
    pub city: Option<String>,
    pub address: Option<String>,
    pub favorite_category: Vec<Category>,
    /// Cleared when the movie is deleted.
    pub favorite_movie: Option<Id>,
}

impl UserProfile {
    pub fn empty(user_id: UserId) -> Self {
        Self { user_id, city: None, address: None, favorite_category: Vec::new(), favorite_movie: None }
    }
}

/// Full replacement of a profile's editable fields.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct ProfileUpdate {
    pub city: Option<String>,
    pub address: Option<String>,
    #[serde(default)]
    pub favorite_category: Vec<Category>,
    pub favorite_movie: Option<Id>,
}

/// Outcome of a list toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Toggled {
    Added,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    WatchlistAdd,
    WatchlistRemove,
    BlocklistAdd,
    BlocklistRemove,
    HistoryAdd,
    Rate,
}

impl ActivityAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityAction::WatchlistAdd => "watchlist_add",
            ActivityAction::WatchlistRemove => "watchlist_remove",
            ActivityAction::BlocklistAdd => "blocklist_add",
            ActivityAction::BlocklistRemove => "blocklist_remove",
            ActivityAction::HistoryAdd => "history_add",
            ActivityAction::Rate => "rate",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, sqlx::FromRow)]
pub struct Activity {
    pub id: Id,
    pub user_id: UserId,
    pub movie_id: Id,
    pub action: String,
    pub created_at: DateTime<Utc>,
}
