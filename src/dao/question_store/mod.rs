mod file;

pub use file::FileQuestionStore;

use crate::dao::models::{QuestionSetEntity, QuestionSetSummaryEntity};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;

/// Abstraction over wherever authored question sets live.
pub trait QuestionStore: Send + Sync {
    fn find_question_set(
        &self,
        id: String,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionSetEntity>>>;
    fn list_question_sets(&self) -> BoxFuture<'static, StorageResult<Vec<QuestionSetSummaryEntity>>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
