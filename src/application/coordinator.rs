//! Pagination coordinator: page requests to index windows and records.

use std::sync::Arc;

use tracing::instrument;

use crate::application::error::AppError;
use crate::application::index::OrderedIndex;
use crate::application::pagination::{CursorPage, PageMode, PageRequest, PaginationError};
use crate::application::resolver::Resolver;
use crate::domain::entities::{
    CommentRecord, ConversationRecord, MessageRecord, PostRecord, Record,
};
use crate::domain::types::{Container, IndexEntry};

pub const MAX_PAGE_SIZE: u32 = 100;

pub struct Coordinator {
    index: Arc<OrderedIndex>,
    resolver: Arc<Resolver>,
}

impl Coordinator {
    pub fn new(index: Arc<OrderedIndex>, resolver: Arc<Resolver>) -> Self {
        Self { index, resolver }
    }

    /// Member IDs of one page, newest first.
    pub async fn page(
        &self,
        container: Container,
        mode: PageMode,
        page_size: u32,
    ) -> Result<Vec<i64>, AppError> {
        let entries = self.page_entries(container, mode, page_size).await?;
        Ok(entries.iter().map(|entry| entry.member).collect())
    }

    pub async fn page_entries(
        &self,
        container: Container,
        mode: PageMode,
        page_size: u32,
    ) -> Result<Vec<IndexEntry>, AppError> {
        validate_page_size(page_size)?;
        self.index
            .page_entries(container, mode, u64::from(page_size))
            .await
    }

    pub async fn messages(
        &self,
        conversation_id: i64,
        request: PageRequest,
    ) -> Result<CursorPage<MessageRecord>, AppError> {
        self.records(Container::conversation_messages(conversation_id), request)
            .await
    }

    pub async fn posts(
        &self,
        network_id: i64,
        request: PageRequest,
    ) -> Result<CursorPage<PostRecord>, AppError> {
        self.records(Container::network_posts(network_id), request)
            .await
    }

    pub async fn comments(
        &self,
        post_id: i64,
        request: PageRequest,
    ) -> Result<CursorPage<CommentRecord>, AppError> {
        self.records(Container::post_comments(post_id), request)
            .await
    }

    /// A user's conversations, most recently active first.
    pub async fn conversations(
        &self,
        user_id: i64,
        request: PageRequest,
    ) -> Result<CursorPage<ConversationRecord>, AppError> {
        self.records(Container::user_conversations(user_id), request)
            .await
    }

    /// One page materialized into records, with the cursor for the next page.
    ///
    /// Members that cannot be resolved are left out of `items`; the cursor is
    /// still derived from the index page so paging never stalls on them.
    #[instrument(skip(self, request), fields(container = %container, limit = request.limit))]
    async fn records<R: Record>(
        &self,
        container: Container,
        request: PageRequest,
    ) -> Result<CursorPage<R>, AppError> {
        if container.kind.member_kind() != R::KIND {
            return Err(AppError::validation(format!(
                "{container} does not hold {} records",
                R::KIND.as_str()
            )));
        }
        let entries = self
            .page_entries(container, request.mode, request.limit)
            .await?;
        let next_cursor = request
            .mode
            .next(&entries, u64::from(request.limit))
            .map(|mode| mode.encode())
            .transpose()?;
        if entries.is_empty() {
            return Ok(CursorPage::new(Vec::new(), next_cursor));
        }

        let ids: Vec<i64> = entries.iter().map(|entry| entry.member).collect();
        let items = self.resolver.resolve_many::<R>(&ids).await?;
        Ok(CursorPage::new(items, next_cursor))
    }
}

fn validate_page_size(page_size: u32) -> Result<(), PaginationError> {
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(PaginationError::InvalidLimit {
            requested: page_size,
            max: MAX_PAGE_SIZE,
        });
    }
    Ok(())
}
