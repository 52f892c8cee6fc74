use thiserror::Error;

use crate::model::ids::{BranchId, QuizId, TopicId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TopicError {
    #[error("topic name cannot be empty")]
    EmptyName,

    #[error("content block {index} has no text")]
    EmptyBlock { index: usize },
}

/// One paged unit of reading material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentBlock {
    pub title: String,
    pub text: String,
}

impl ContentBlock {
    #[must_use]
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
        }
    }
}

/// Curriculum unit: reading material plus an optional quiz.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    id: TopicId,
    branch_id: BranchId,
    position: u32,
    name: String,
    intro: String,
    blocks: Vec<ContentBlock>,
    quiz_id: Option<QuizId>,
}

impl Topic {
    /// # Errors
    ///
    /// Returns `TopicError::EmptyName` for a blank name and
    /// `TopicError::EmptyBlock` if any block has no text.
    pub fn new(
        id: TopicId,
        branch_id: BranchId,
        position: u32,
        name: impl Into<String>,
        intro: impl Into<String>,
        blocks: Vec<ContentBlock>,
        quiz_id: Option<QuizId>,
    ) -> Result<Self, TopicError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(TopicError::EmptyName);
        }
        if let Some(index) = blocks.iter().position(|b| b.text.trim().is_empty()) {
            return Err(TopicError::EmptyBlock { index });
        }
        Ok(Self {
            id,
            branch_id,
            position,
            name,
            intro: intro.into(),
            blocks,
            quiz_id,
        })
    }

    #[must_use]
    pub fn id(&self) -> TopicId {
        self.id
    }

    #[must_use]
    pub fn branch_id(&self) -> BranchId {
        self.branch_id
    }

    #[must_use]
    pub fn position(&self) -> u32 {
        self.position
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn intro(&self) -> &str {
        &self.intro
    }

    #[must_use]
    pub fn blocks(&self) -> &[ContentBlock] {
        &self.blocks
    }

    #[must_use]
    pub fn quiz_id(&self) -> Option<QuizId> {
        self.quiz_id
    }

    /// Number of pages shown while reading. A topic without blocks still has
    /// one page: its intro.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.blocks.len().max(1)
    }

    /// Clamp a requested page into `[0, page_count - 1]`.
    #[must_use]
    pub fn clamp_page(&self, requested: i64) -> usize {
        let last = self.page_count() - 1;
        usize::try_from(requested.max(0)).map_or(last, |page| page.min(last))
    }

    #[must_use]
    pub fn is_last_page(&self, page: usize) -> bool {
        page + 1 >= self.page_count()
    }
}

/// Orders topics the way the curriculum presents them.
pub fn sort_curriculum(topics: &mut [Topic]) {
    topics.sort_by_key(|topic| (topic.position(), topic.id()));
}
