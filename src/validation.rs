//! Field-level validation of request payloads.
//!
//! Validators collect every problem into a [`FieldErrors`] map rather than stopping at the first
//! one; handlers return the map as a `400` body keyed by field name.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use deunicode::deunicode;
use serde::Serialize;
use url::Url;

use crate::models::{NewMovie, NewMovieLink, NewPerson, ProfileUpdate, MAX_CATEGORIES};

pub const TITLE_MAX: usize = 100;
pub const TEXT_MAX: usize = 1000;
pub const DIRECTOR_MAX: usize = 100;
pub const PLAYED_AS_MAX: usize = 256;
pub const NAME_MAX: usize = 255;
pub const COMMENT_MAX: usize = 2000;
pub const ALIAS_MAX: usize = 100;
pub const PROFILE_TEXT_MAX: usize = 128;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, msgs) in &self.0 {
            for msg in msgs {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{field}: {msg}")?;
                first = false;
            }
        }
        Ok(())
    }
}

impl std::error::Error for FieldErrors {}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, msg: impl Into<String>) -> Self {
        let mut e = Self::new();
        e.add(field, msg);
        e
    }

    pub fn add(&mut self, field: &str, msg: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(msg.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

fn check_len(errs: &mut FieldErrors, field: &str, value: Option<&str>, max: usize) {
    if let Some(v) = value {
        if v.chars().count() > max {
            errs.add(field, format!("ensure this field has no more than {max} characters"));
        }
    }
}

/// Absolute `http`/`https` URL with a host.
pub fn is_http_url(s: &str) -> bool {
    match Url::parse(s.trim()) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some_and(|h| !h.is_empty()),
        Err(_) => false,
    }
}

/// Django-compatible slug: transliterated to ASCII, then alphanumerics, `_` and `-` kept,
/// lower-cased, whitespace and dash runs collapsed to one `-`, leading/trailing `-`/`_` stripped.
pub fn slugify(input: &str) -> String {
    let ascii = deunicode(input);
    let mut out = String::with_capacity(ascii.len());
    let mut pending_dash = false;
    for ch in ascii.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        } else if ch.is_whitespace() || ch == '-' {
            pending_dash = true;
        }
    }
    out.trim_matches(|c| c == '-' || c == '_').to_string()
}

pub fn validate_movie(m: &NewMovie) -> Result<(), FieldErrors> {
    let mut errs = FieldErrors::new();
    if m.title.trim().is_empty() {
        errs.add("title", "this field may not be blank");
    }
    check_len(&mut errs, "title", Some(&m.title), TITLE_MAX);
    check_len(&mut errs, "description", m.description.as_deref(), TEXT_MAX);
    check_len(&mut errs, "director", m.director.as_deref(), DIRECTOR_MAX);
    if m.year_of_production.is_none() {
        errs.add("year_of_production", "this field is required");
    }
    let distinct: BTreeSet<_> = m.category.iter().collect();
    if distinct.len() != m.category.len() {
        errs.add("category", "categories must be distinct");
    }
    if m.category.len() > MAX_CATEGORIES {
        errs.add("category", format!("select at most {MAX_CATEGORIES} categories"));
    }
    if let Some(t) = m.movie_trailer.as_deref() {
        if !t.is_empty() && !is_http_url(t) {
            errs.add("movie_trailer", "enter a valid URL");
        }
    }
    if let Some(slug) = m.slug.as_deref() {
        if slug.is_empty() || slugify(slug) != slug {
            errs.add("slug", "enter a valid slug of lowercase letters, numbers, underscores or hyphens");
        }
    } else if slugify(&m.title).is_empty() && !m.title.trim().is_empty() {
        errs.add("slug", "cannot derive a slug from this title; supply one");
    }
    errs.into_result()
}

pub fn validate_person(p: &NewPerson) -> Result<(), FieldErrors> {
    let mut errs = FieldErrors::new();
    check_len(&mut errs, "name", p.name.as_deref(), NAME_MAX);
    check_len(&mut errs, "biography", p.biography.as_deref(), TEXT_MAX);
    check_len(&mut errs, "known_for_department", p.known_for_department.as_deref(), 100);
    check_len(&mut errs, "place_of_birth", p.place_of_birth.as_deref(), NAME_MAX);
    check_len(&mut errs, "also_known_as", p.also_known_as.as_deref(), ALIAS_MAX);
    check_len(&mut errs, "profile_path", p.profile_path.as_deref(), ALIAS_MAX);
    if let (Some(born), Some(died)) = (p.birthday, p.death) {
        if died < born {
            errs.add("death", "must not precede birthday");
        }
    }
    errs.into_result()
}

pub fn validate_link(l: &NewMovieLink) -> Result<(), FieldErrors> {
    let mut errs = FieldErrors::new();
    if !is_http_url(&l.link) {
        errs.add("link", "enter a valid URL");
    }
    errs.into_result()
}

pub fn validate_played_as(played_as: Option<&str>) -> Result<(), FieldErrors> {
    let mut errs = FieldErrors::new();
    check_len(&mut errs, "played_as", played_as, PLAYED_AS_MAX);
    errs.into_result()
}

pub fn validate_comment_content(content: &str) -> Result<(), FieldErrors> {
    let mut errs = FieldErrors::new();
    if content.trim().is_empty() {
        errs.add("content", "this field may not be blank");
    }
    check_len(&mut errs, "content", Some(content), COMMENT_MAX);
    errs.into_result()
}

/// Shape checks only; whether `favorite_movie` exists is up to the caller.
pub fn validate_profile(p: &ProfileUpdate) -> Result<(), FieldErrors> {
    let mut errs = FieldErrors::new();
    check_len(&mut errs, "city", p.city.as_deref(), PROFILE_TEXT_MAX);
    check_len(&mut errs, "address", p.address.as_deref(), PROFILE_TEXT_MAX);
    let distinct: BTreeSet<_> = p.favorite_category.iter().collect();
    if distinct.len() != p.favorite_category.len() {
        errs.add("favorite_category", "categories must be distinct");
    }
    errs.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;
    use chrono::NaiveDate;

    fn movie(title: &str) -> NewMovie {
        NewMovie {
            title: title.into(),
            year_of_production: NaiveDate::from_ymd_opt(1999, 3, 31),
            ..Default::default()
        }
    }

    #[test]
    fn slugify_matches_django() {
        assert_eq!(slugify("The Matrix"), "the-matrix");
        assert_eq!(slugify("  Spider-Man:  No Way Home! "), "spider-man-no-way-home");
        assert_eq!(slugify("snake_case -- title"), "snake_case-title");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn slugify_transliterates_accents() {
        assert_eq!(slugify("Amélie"), "amelie");
        assert_eq!(slugify("Léon: The Professional"), "leon-the-professional");
        assert_eq!(slugify("Crème brûlée"), "creme-brulee");
    }

    #[test]
    fn movie_errors_are_collected_per_field() {
        let mut m = movie("");
        m.year_of_production = None;
        m.category = vec![Category::Action, Category::Drama, Category::Crime, Category::Horror, Category::Comedy];
        m.movie_trailer = Some("ftp://x".into());
        let errs = validate_movie(&m).unwrap_err();
        assert!(errs.get("title").is_some());
        assert!(errs.get("year_of_production").is_some());
        assert!(errs.get("category").is_some());
        assert!(errs.get("movie_trailer").is_some());
    }

    #[test]
    fn explicit_slug_must_already_be_slug_shaped() {
        let mut m = movie("Heat");
        m.slug = Some("Heat 1995".into());
        assert!(validate_movie(&m).unwrap_err().get("slug").is_some());
        m.slug = Some("heat-1995".into());
        assert!(validate_movie(&m).is_ok());
    }

    #[test]
    fn url_check() {
        assert!(is_http_url("https://example.com/watch?v=1"));
        assert!(!is_http_url("https://"));
        assert!(!is_http_url("example.com"));
        assert!(is_http_url("HTTPS://example.com"));
        assert!(is_http_url("http://localhost:8080/a"));
        for bad in ["https://?", "https://::::", "https://[", "ftp://example.com", "mailto:a@b.c"] {
            assert!(!is_http_url(bad), "{bad} should be rejected");
        }
    }

    #[test]
    fn person_aliases_are_length_checked() {
        let p = NewPerson {
            name: Some("Jean Reno".into()),
            also_known_as: Some("x".repeat(ALIAS_MAX + 1)),
            profile_path: Some("/reno.jpg".into()),
            ..NewPerson::default()
        };
        let errs = validate_person(&p).unwrap_err();
        assert!(errs.get("also_known_as").is_some());
        assert!(errs.get("profile_path").is_none());
    }

    #[test]
    fn profile_checks_lengths_and_distinct_categories() {
        let ok = ProfileUpdate { city: Some("Haifa".into()), favorite_category: vec![Category::Drama], ..Default::default() };
        assert!(validate_profile(&ok).is_ok());
        let bad = ProfileUpdate {
            address: Some("a".repeat(PROFILE_TEXT_MAX + 1)),
            favorite_category: vec![Category::Drama, Category::Drama],
            ..Default::default()
        };
        let errs = validate_profile(&bad).unwrap_err();
        assert!(errs.get("address").is_some());
        assert!(errs.get("favorite_category").is_some());
        assert!(errs.get("city").is_none());
    }

    #[test]
    fn errors_serialise_as_field_map() {
        let errs = FieldErrors::single("rating", "must be between 1 and 10");
        let v = serde_json::to_value(&errs).unwrap();
        assert_eq!(v, serde_json::json!({"rating": ["must be between 1 and 10"]}));
    }
}
