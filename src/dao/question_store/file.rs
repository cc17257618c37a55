use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use tracing::{info, warn};
use validator::Validate;

use super::QuestionStore;
use crate::dao::{
    models::{QuestionSetEntity, QuestionSetSummaryEntity},
    storage::{StorageError, StorageResult},
};

/// Question sets read once from `*.json` files in a directory and served from memory.
#[derive(Clone, Default)]
pub struct FileQuestionStore {
    sets: Arc<DashMap<String, QuestionSetEntity>>,
    directory: Option<PathBuf>,
}

impl FileQuestionStore {
    /// Load every question set found in `directory`.
    ///
    /// A missing directory yields an empty store; unreadable or malformed files are skipped
    /// with a warning so a single bad file does not keep the server from starting.
    pub fn load(directory: &Path) -> StorageResult<Self> {
        let store = Self {
            sets: Arc::new(DashMap::new()),
            directory: Some(directory.to_path_buf()),
        };

        let entries = match fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %directory.display(),
                    "question set directory not found; starting with no question sets"
                );
                return Ok(store);
            }
            Err(err) => {
                return Err(StorageError::unavailable(
                    format!("cannot read {}", directory.display()),
                    err,
                ));
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match read_set(&path) {
                Ok(set) => {
                    store.sets.insert(set.id.clone(), set);
                }
                Err(err) => warn!(path = %path.display(), error = %err, "skipping question set"),
            }
        }

        info!(
            path = %directory.display(),
            count = store.sets.len(),
            "loaded question sets"
        );
        Ok(store)
    }

    /// Build a store over in-memory sets, used for tests and embedded setups.
    pub fn from_sets(sets: impl IntoIterator<Item = QuestionSetEntity>) -> Self {
        let map = DashMap::new();
        for set in sets {
            map.insert(set.id.clone(), set);
        }
        Self {
            sets: Arc::new(map),
            directory: None,
        }
    }

    /// Number of question sets currently available.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// Whether no question set is available.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

impl QuestionStore for FileQuestionStore {
    fn find_question_set(
        &self,
        id: String,
    ) -> BoxFuture<'static, StorageResult<Option<QuestionSetEntity>>> {
        let sets = Arc::clone(&self.sets);
        Box::pin(async move { Ok(sets.get(&id).map(|entry| entry.value().clone())) })
    }

    fn list_question_sets(&self) -> BoxFuture<'static, StorageResult<Vec<QuestionSetSummaryEntity>>> {
        let sets = Arc::clone(&self.sets);
        Box::pin(async move {
            let mut summaries: Vec<QuestionSetSummaryEntity> = sets
                .iter()
                .map(|entry| QuestionSetSummaryEntity::from(entry.value()))
                .collect();
            summaries.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(summaries)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let directory = self.directory.clone();
        Box::pin(async move {
            match directory {
                Some(path) if path.exists() && !path.is_dir() => Err(StorageError::malformed(
                    path.display().to_string(),
                    "question set path is not a directory",
                )),
                _ => Ok(()),
            }
        })
    }
}

fn read_set(path: &Path) -> StorageResult<QuestionSetEntity> {
    let location = path.display().to_string();
    let contents = fs::read_to_string(path)
        .map_err(|err| StorageError::unavailable(format!("cannot read {location}"), err))?;
    let mut set: QuestionSetEntity = serde_json::from_str(&contents)
        .map_err(|err| StorageError::malformed(location.clone(), err.to_string()))?;
    if set.id.trim().is_empty() {
        // fall back to the file stem so hand-written files need not repeat their name
        set.id = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_string();
    }
    set.validate()
        .map_err(|err| StorageError::malformed(location, err.to_string()))?;
    Ok(set)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("question-sets-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn loads_json_files_and_skips_broken_ones() {
        let dir = scratch_dir();
        fs::write(
            dir.join("capitals.json"),
            r#"{
                "id": "",
                "title": "Capitals",
                "questions": [{
                    "id": "q1",
                    "prompt": "Capital of France?",
                    "options": [{"text": "Paris", "correct": true}, {"text": "Lyon"}]
                }]
            }"#,
        )
        .unwrap();
        fs::write(dir.join("broken.json"), "{ not json").unwrap();
        fs::write(
            dir.join("worthless.json"),
            r#"{
                "id": "worthless",
                "title": "Zero points",
                "questions": [{
                    "id": "q1",
                    "prompt": "Free?",
                    "points": 0,
                    "options": [{"text": "yes", "correct": true}]
                }]
            }"#,
        )
        .unwrap();
        fs::write(
            dir.join("unanswerable.json"),
            r#"{
                "id": "unanswerable",
                "title": "No right answer",
                "questions": [{
                    "id": "q1",
                    "prompt": "Pick one",
                    "options": [{"text": "a"}, {"text": "b"}]
                }]
            }"#,
        )
        .unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let store = FileQuestionStore::load(&dir).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.find_question_set("worthless".into()).await.unwrap().is_none());

        let set = store
            .find_question_set("capitals".into())
            .await
            .unwrap()
            .expect("set keyed by file stem");
        assert_eq!(set.questions[0].time_limit_secs, 20);
        assert_eq!(set.questions[0].points, 100);
        assert!(!set.questions[0].options[1].correct);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn missing_directory_yields_empty_store() {
        let dir = std::env::temp_dir().join(format!("absent-{}", Uuid::new_v4()));
        let store = FileQuestionStore::load(&dir).unwrap();
        assert!(store.is_empty());
        assert!(store.list_question_sets().await.unwrap().is_empty());
        assert!(store.health_check().await.is_ok());
    }
}
