//! Cursor pagination over ordered indices.
//!
//! Pages are always newest-first. A cursor names a position by score and,
//! optionally, member ID; a timestamp-only cursor excludes every member with
//! that exact score.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::types::IndexEntry;

/// Position in an ordered index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCursor {
    score: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    member: Option<i64>,
}

impl IndexCursor {
    /// Cursor at a bare timestamp.
    pub fn at_score(score: i64) -> Self {
        Self {
            score,
            member: None,
        }
    }

    /// Cursor at an exact index entry.
    pub fn at_entry(entry: IndexEntry) -> Self {
        Self {
            score: entry.score,
            member: Some(entry.member),
        }
    }

    pub fn score(&self) -> i64 {
        self.score
    }

    pub fn member(&self) -> Option<i64> {
        self.member
    }

    /// Whether `entry` sorts strictly after (older than) this cursor.
    pub fn is_before(&self, entry: &IndexEntry) -> bool {
        let member = self.member.unwrap_or(i64::MIN);
        (entry.score, entry.member) < (self.score, member)
    }

    /// Whether `entry` sorts strictly before (newer than) this cursor.
    pub fn is_after(&self, entry: &IndexEntry) -> bool {
        let member = self.member.unwrap_or(i64::MAX);
        (entry.score, entry.member) > (self.score, member)
    }
}

/// How a page is positioned within its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PageMode {
    /// Skip `offset` newest members.
    FromStart { offset: u64 },
    /// Newest members strictly newer than the cursor.
    After(IndexCursor),
    /// Newest members strictly older than the cursor.
    Before(IndexCursor),
}

impl PageMode {
    pub fn start() -> Self {
        PageMode::FromStart { offset: 0 }
    }

    /// Opaque URL-safe token for this position.
    pub fn encode(&self) -> Result<String, PaginationError> {
        let serialized = serde_json::to_vec(self)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(serialized))
    }

    pub fn decode(token: &str) -> Result<Self, PaginationError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))
    }

    /// Position continuing in the same direction after `entries` was served.
    pub fn next(&self, entries: &[IndexEntry], limit: u64) -> Option<PageMode> {
        match self {
            PageMode::FromStart { .. } | PageMode::Before(_) => {
                if (entries.len() as u64) < limit {
                    return None;
                }
                entries
                    .last()
                    .map(|entry| PageMode::Before(IndexCursor::at_entry(*entry)))
            }
            PageMode::After(cursor) => Some(PageMode::After(
                entries
                    .first()
                    .map(|entry| IndexCursor::at_entry(*entry))
                    .unwrap_or(*cursor),
            )),
        }
    }
}

/// Cursor-aware pagination request.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub mode: PageMode,
    pub limit: u32,
}

impl PageRequest {
    pub fn new(mode: PageMode, limit: u32) -> Self {
        Self { mode, limit }
    }

    pub fn first(limit: u32) -> Self {
        Self::new(PageMode::start(), limit)
    }
}

/// Cursor-aware page result.
#[derive(Debug, Clone, Serialize)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> CursorPage<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        Self { items, next_cursor }
    }
}

#[derive(Debug, Error)]
pub enum PaginationError {
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
    #[error("page size must be between 1 and {max}, got {requested}")]
    InvalidLimit { requested: u32, max: u32 },
}
