//! Comment threads: reply counting, ordering and subtree collection.
//!
//! All functions work on the set of comments the caller may see; counts therefore only include
//! visible replies.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{Comment, Id, UserId};

/// Public shape of a comment in listings.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct CommentView {
    pub id: Id,
    pub sender_id: UserId,
    pub sender: String,
    pub movie_id: Id,
    pub content: String,
    pub parent: Option<Id>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    /// Bumped by edits and moderation.
    pub updated_at: DateTime<Utc>,
    pub reply_count: u64,
}

impl CommentView {
    fn new(c: &Comment, reply_count: u64) -> Self {
        Self {
            id: c.id,
            sender_id: c.user_id,
            sender: c.username.clone(),
            movie_id: c.movie_id,
            content: c.content.clone(),
            parent: c.parent_id,
            active: c.active,
            created_at: c.created_at,
            updated_at: c.updated_at,
            reply_count,
        }
    }
}

/// Number of direct children per comment id. Comments without replies are absent.
pub fn reply_counts(comments: &[Comment]) -> HashMap<Id, u64> {
    let mut counts = HashMap::new();
    for c in comments {
        if let Some(parent) = c.parent_id {
            *counts.entry(parent).or_insert(0) += 1;
        }
    }
    counts
}

fn views<'a>(comments: &[Comment], selected: impl Iterator<Item = &'a Comment>) -> Vec<CommentView> {
    let counts = reply_counts(comments);
    selected
        .map(|c| CommentView::new(c, counts.get(&c.id).copied().unwrap_or(0)))
        .collect()
}

fn oldest_first(a: &Comment, b: &Comment) -> std::cmp::Ordering {
    a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id))
}

/// Root comments (no parent), oldest first.
pub fn roots(comments: &[Comment]) -> Vec<CommentView> {
    let mut selected: Vec<&Comment> = comments.iter().filter(|c| c.parent_id.is_none()).collect();
    selected.sort_by(|a, b| oldest_first(a, b));
    views(comments, selected.into_iter())
}

/// Direct replies of `parent`, oldest first.
pub fn replies_of(comments: &[Comment], parent: Id) -> Vec<CommentView> {
    let mut selected: Vec<&Comment> = comments.iter().filter(|c| c.parent_id == Some(parent)).collect();
    selected.sort_by(|a, b| oldest_first(a, b));
    views(comments, selected.into_iter())
}

/// Every comment, roots and replies alike, newest first.
pub fn newest_first(comments: &[Comment]) -> Vec<CommentView> {
    let mut selected: Vec<&Comment> = comments.iter().collect();
    selected.sort_by(|a, b| oldest_first(b, a));
    views(comments, selected.into_iter())
}

pub fn view_of(comments: &[Comment], c: &Comment) -> CommentView {
    let count = comments.iter().filter(|o| o.parent_id == Some(c.id)).count() as u64;
    CommentView::new(c, count)
}

/// `root` and all of its transitive replies.
pub fn subtree_ids(comments: &[Comment], root: Id) -> HashSet<Id> {
    let mut children: HashMap<Id, Vec<Id>> = HashMap::new();
    for c in comments {
        if let Some(p) = c.parent_id {
            children.entry(p).or_default().push(c.id);
        }
    }
    let mut out = HashSet::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if out.insert(id) {
            if let Some(kids) = children.get(&id) {
                stack.extend(kids);
            }
        }
    }
    out
}
