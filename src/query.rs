//! Movie listing query: parameter parsing, predicate matching, ordering and pagination.
//!
//! The in-memory store evaluates [`MovieQuery`] directly; the Postgres store translates the
//! same struct into SQL so both backends agree on semantics.

use serde::{Deserialize, Serialize};
use utoipa::IntoParams;

use crate::models::Movie;
use crate::validation::FieldErrors;

pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Raw query-string parameters, exactly as the client sent them.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MovieListParams {
    /// Case-insensitive substring of title or slug.
    pub search: Option<String>,
    pub category: Option<String>,
    #[serde(alias = "language")]
    pub lang: Option<String>,
    pub status: Option<String>,
    pub year: Option<String>,
    /// `asc` or `desc` by title.
    pub sort: Option<String>,
    pub page: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    TitleAsc,
    TitleDesc,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovieFilter {
    pub search: Option<String>,
    pub category: Option<String>,
    pub language: Option<String>,
    pub status: Option<String>,
    pub year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovieQuery {
    pub filter: MovieFilter,
    pub sort: Option<SortOrder>,
    pub page: u32,
}

impl Default for MovieQuery {
    fn default() -> Self {
        Self { filter: MovieFilter::default(), sort: None, page: 1 }
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Parses a 1-based page number; absent means page 1.
pub fn parse_page(raw: Option<&str>) -> Result<u32, FieldErrors> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(1),
        Some(s) => match s.parse::<u32>() {
            Ok(p) if p >= 1 => Ok(p),
            _ => Err(FieldErrors::single("page", "must be a positive integer")),
        },
    }
}

impl TryFrom<MovieListParams> for MovieQuery {
    type Error = FieldErrors;

    fn try_from(p: MovieListParams) -> Result<Self, Self::Error> {
        let mut errs = FieldErrors::new();

        let sort = match non_empty(p.sort).as_deref() {
            None => None,
            Some("asc") => Some(SortOrder::TitleAsc),
            Some("desc") => Some(SortOrder::TitleDesc),
            Some(_) => {
                errs.add("sort", "must be 'asc' or 'desc'");
                None
            }
        };

        let year = match non_empty(p.year) {
            None => None,
            Some(y) => match y.parse::<i32>() {
                Ok(y) => Some(y),
                Err(_) => {
                    errs.add("year", "must be an integer year");
                    None
                }
            },
        };

        let page = match parse_page(p.page.as_deref()) {
            Ok(page) => page,
            Err(_) => {
                errs.add("page", "must be a positive integer");
                1
            }
        };

        errs.into_result()?;
        Ok(MovieQuery {
            filter: MovieFilter {
                search: non_empty(p.search),
                category: non_empty(p.category),
                language: non_empty(p.lang),
                status: non_empty(p.status),
                year,
            },
            sort,
            page,
        })
    }
}

fn icontains(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

impl MovieFilter {
    pub fn matches(&self, m: &Movie) -> bool {
        if let Some(q) = &self.search {
            if !icontains(&m.title, q) && !icontains(&m.slug, q) {
                return false;
            }
        }
        if let Some(c) = &self.category {
            if !m.category.iter().any(|cat| icontains(cat.as_str(), c)) {
                return false;
            }
        }
        if let Some(l) = &self.language {
            if !m.language.is_some_and(|lang| icontains(lang.as_str(), l)) {
                return false;
            }
        }
        if let Some(s) = &self.status {
            if !m.status.is_some_and(|st| icontains(st.as_str(), s)) {
                return false;
            }
        }
        if let Some(y) = self.year {
            if chrono::Datelike::year(&m.year_of_production) != y {
                return false;
            }
        }
        true
    }
}

/// Orders movies in place. Without an explicit sort, insertion (id) order is kept.
pub fn sort_movies(movies: &mut [Movie], sort: Option<SortOrder>) {
    match sort {
        None => movies.sort_by_key(|m| m.id),
        Some(SortOrder::TitleAsc) => {
            movies.sort_by(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase()).then(a.id.cmp(&b.id)))
        }
        Some(SortOrder::TitleDesc) => {
            movies.sort_by(|a, b| b.title.to_lowercase().cmp(&a.title.to_lowercase()).then(a.id.cmp(&b.id)))
        }
    }
}

/// `ceil(total / page_size)`; zero when there is nothing to show.
pub fn last_page(total: u64, page_size: u32) -> u64 {
    if page_size == 0 {
        return 0;
    }
    total.div_ceil(u64::from(page_size))
}

/// Zero-based offset of the first row of `page`.
pub fn page_offset(page: u32, page_size: u32) -> u64 {
    u64::from(page.saturating_sub(1)) * u64::from(page_size)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub last_page: u64,
}

impl<T> Page<T> {
    /// Cuts one page out of an already filtered and ordered result set.
    pub fn slice(all: Vec<T>, page: u32, page_size: u32) -> Self {
        let total = all.len() as u64;
        let start = usize::try_from(page_offset(page, page_size)).unwrap_or(usize::MAX);
        let data = all.into_iter().skip(start).take(page_size as usize).collect();
        Self { data, total, page, last_page: last_page(total, page_size) }
    }

    /// Wraps a page fetched with `LIMIT`/`OFFSET` plus a separate count.
    pub fn from_parts(data: Vec<T>, total: u64, page: u32, page_size: u32) -> Self {
        Self { data, total, page, last_page: last_page(total, page_size) }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page { data: self.data.into_iter().map(f).collect(), total: self.total, page: self.page, last_page: self.last_page }
    }
}

/// Evaluates a full listing query over an in-memory collection.
pub fn run(movies: impl IntoIterator<Item = Movie>, q: &MovieQuery, page_size: u32) -> Page<Movie> {
    let mut hits: Vec<Movie> = movies.into_iter().filter(|m| q.filter.matches(m)).collect();
    sort_movies(&mut hits, q.sort);
    Page::slice(hits, q.page, page_size)
}
