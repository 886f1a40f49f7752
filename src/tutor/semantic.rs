use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::learning::{LearningRepoError, LessonRecord, SharedLearningStore};
use crate::settings::EmbeddingSettings;

const MIN_SIMILARITY: f32 = 0.3;
const INDEX_CHUNK_CHARS: usize = 800;
const MAX_INDEXED_LESSONS: usize = 10_000;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Transport(String),
    #[error("embedding response invalid: {0}")]
    Protocol(String),
    #[error(transparent)]
    Store(#[from] LearningRepoError),
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// OpenAI-compatible `/embeddings` client.
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn from_settings(settings: &EmbeddingSettings) -> Option<Self> {
        let base_url = settings.base_url.as_deref()?.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .ok()?;
        Some(Self {
            client,
            base_url,
            model: settings.model.clone(),
            api_key: settings.api_key.clone(),
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&json!({ "model": self.model, "input": text }));
        if let Some(key) = self.api_key.as_deref() {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| EmbeddingError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(EmbeddingError::Transport(format!("status {status}")));
        }
        let parsed = response
            .json::<EmbeddingResponse>()
            .await
            .map_err(|e| EmbeddingError::Protocol(e.to_string()))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| EmbeddingError::Protocol(String::from("no embedding returned")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Semantic,
    Keyword,
}

#[derive(Debug, Clone)]
pub struct RankedLesson {
    pub lesson: LessonRecord,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Passage {
    pub lesson_id: String,
    pub content: String,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct LessonSearchResult {
    pub match_type: MatchType,
    pub lessons: Vec<RankedLesson>,
}

#[derive(Debug, Clone)]
pub struct PassageSearchResult {
    pub match_type: MatchType,
    pub passages: Vec<Passage>,
}

/// Embedding-similarity tier over stored lesson chunks.
pub struct EmbeddingSearch {
    store: SharedLearningStore,
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingSearch {
    pub fn new(store: SharedLearningStore, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    pub async fn passages(
        &self,
        query: &str,
        lesson_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Passage>, EmbeddingError> {
        let query_vector = self.embedder.embed(query).await?;
        let lesson_filter = lesson_id.map(str::to_string);
        let rows = self
            .store
            .run_blocking(move |store| store.list_lesson_embeddings(lesson_filter.as_deref()))
            .await?;

        let mut scored = rows
            .into_iter()
            .map(|row| {
                let score = cosine_similarity(&query_vector, &row.embedding);
                (row, score)
            })
            .filter(|(_, score)| *score >= MIN_SIMILARITY)
            .collect::<Vec<_>>();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(limit);
        Ok(scored
            .into_iter()
            .map(|(row, score)| Passage {
                lesson_id: row.lesson_id,
                content: row.content,
                score: f64::from(score),
            })
            .collect())
    }

    pub async fn lessons(
        &self,
        query: &str,
        grade_level: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RankedLesson>, EmbeddingError> {
        let passages = self.passages(query, None, limit * 4).await?;
        let mut best = HashMap::<String, f64>::new();
        for passage in passages {
            let entry = best.entry(passage.lesson_id).or_insert(passage.score);
            if passage.score > *entry {
                *entry = passage.score;
            }
        }
        let mut ranked = best.into_iter().collect::<Vec<_>>();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let ids = ranked;
        let lessons = self
            .store
            .run_blocking(move |store| {
                let mut out = Vec::new();
                for (id, score) in ids {
                    match store.get_lesson(id.as_str()) {
                        Ok(lesson) => out.push(RankedLesson { lesson, score }),
                        Err(LearningRepoError::NotFound) => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(out)
            })
            .await?;
        Ok(lessons
            .into_iter()
            .filter(|hit| match (grade_level, hit.lesson.grade_level) {
                (Some(wanted), Some(actual)) => wanted == actual,
                _ => true,
            })
            .take(limit)
            .collect())
    }

    /// Splits the lesson content into chunks and stores one embedding per chunk.
    pub async fn index_lesson(&self, lesson_id: &str) -> Result<usize, EmbeddingError> {
        let id = lesson_id.to_string();
        let source = self
            .store
            .run_blocking(move |store| store.lesson_content_source(id.as_str()))
            .await?;
        let mut text = String::new();
        for (en, ar) in &source.blocks {
            for part in [en, ar] {
                if !part.trim().is_empty() {
                    text.push_str(part.trim());
                    text.push('\n');
                }
            }
        }
        if text.is_empty() {
            text = format!(
                "{} {}\n{} {}",
                source.lesson.title_en,
                source.lesson.title_ar,
                source.lesson.description_en,
                source.lesson.description_ar
            );
        }

        let chunks = chunk_text(text.as_str(), INDEX_CHUNK_CHARS);
        let keep = chunks.len() as i64;
        for (index, chunk) in chunks.iter().enumerate() {
            let vector = self.embedder.embed(chunk.as_str()).await?;
            let lesson = lesson_id.to_string();
            let content = chunk.clone();
            self.store
                .run_blocking(move |store| {
                    store.store_lesson_embedding(
                        lesson.as_str(),
                        index as i64,
                        content.as_str(),
                        &vector,
                    )
                })
                .await?;
        }
        let lesson = lesson_id.to_string();
        self.store
            .run_blocking(move |store| store.prune_lesson_embeddings(lesson.as_str(), keep))
            .await?;
        Ok(chunks.len())
    }

    /// Indexes one lesson, or every published lesson when `lesson_id` is `None`.
    pub async fn index_lessons(&self, lesson_id: Option<&str>) -> Result<IndexReport, EmbeddingError> {
        let ids = match lesson_id {
            Some(id) => vec![id.to_string()],
            None => self
                .store
                .run_blocking(|store| store.list_lessons(None, None, MAX_INDEXED_LESSONS))
                .await?
                .into_iter()
                .map(|lesson| lesson.id)
                .collect(),
        };
        let mut report = IndexReport::default();
        for id in ids {
            let chunks = self.index_lesson(id.as_str()).await?;
            info!(lesson_id = %id, chunks, "lesson indexed for semantic search");
            report.lessons += 1;
            report.chunks += chunks;
        }
        Ok(report)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub lessons: usize,
    pub chunks: usize,
}

/// Substring tier over bilingual titles, descriptions and content blocks.
pub struct KeywordSearch {
    store: SharedLearningStore,
}

impl KeywordSearch {
    pub fn new(store: SharedLearningStore) -> Self {
        Self { store }
    }

    pub async fn lessons(
        &self,
        query: &str,
        grade_level: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RankedLesson>, LearningRepoError> {
        let query = query.to_string();
        let hits = self
            .store
            .run_blocking(move |store| store.keyword_search_lessons(query.as_str(), grade_level, limit))
            .await?;
        Ok(hits
            .into_iter()
            .map(|hit| RankedLesson {
                score: hit.matched_terms as f64,
                lesson: hit.lesson,
            })
            .collect())
    }

    pub async fn passages(
        &self,
        query: &str,
        lesson_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Passage>, LearningRepoError> {
        let query = query.to_string();
        let lesson_id = lesson_id.map(str::to_string);
        self.store
            .run_blocking(move |store| {
                let lesson_ids = match lesson_id {
                    Some(id) => vec![id],
                    None => store
                        .keyword_search_lessons(query.as_str(), None, limit)?
                        .into_iter()
                        .map(|hit| hit.lesson.id)
                        .collect(),
                };
                let terms = query
                    .split_whitespace()
                    .map(str::to_lowercase)
                    .filter(|t| t.chars().count() >= 2)
                    .collect::<Vec<_>>();

                let mut passages = Vec::new();
                for id in lesson_ids {
                    let source = match store.lesson_content_source(id.as_str()) {
                        Ok(source) => source,
                        Err(LearningRepoError::NotFound) => continue,
                        Err(e) => return Err(e),
                    };
                    let mut candidates = source
                        .blocks
                        .iter()
                        .flat_map(|(en, ar)| [en.clone(), ar.clone()])
                        .filter(|text| !text.trim().is_empty())
                        .collect::<Vec<_>>();
                    if candidates.is_empty() {
                        candidates.push(source.lesson.description_en.clone());
                        candidates.push(source.lesson.description_ar.clone());
                        candidates.retain(|text| !text.trim().is_empty());
                    }
                    for content in candidates {
                        let lowered = content.to_lowercase();
                        let matched = terms.iter().filter(|t| lowered.contains(t.as_str())).count();
                        if matched > 0 || terms.is_empty() {
                            passages.push(Passage {
                                lesson_id: id.clone(),
                                content,
                                score: matched as f64,
                            });
                        }
                    }
                }
                passages.sort_by(|a, b| b.score.total_cmp(&a.score));
                passages.truncate(limit);
                Ok(passages)
            })
            .await
    }
}

/// Semantic tier first; keyword tier when no embedder, on error, or on zero hits.
pub struct LessonSearch {
    semantic: Option<EmbeddingSearch>,
    keyword: KeywordSearch,
}

impl LessonSearch {
    pub fn new(store: SharedLearningStore, embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self {
            semantic: embedder.map(|e| EmbeddingSearch::new(Arc::clone(&store), e)),
            keyword: KeywordSearch::new(store),
        }
    }

    pub fn keyword_only(store: SharedLearningStore) -> Self {
        Self::new(store, None)
    }

    pub fn has_semantic_tier(&self) -> bool {
        self.semantic.is_some()
    }

    pub fn semantic(&self) -> Option<&EmbeddingSearch> {
        self.semantic.as_ref()
    }

    pub async fn lessons(
        &self,
        query: &str,
        grade_level: Option<i64>,
        limit: usize,
    ) -> Result<LessonSearchResult, LearningRepoError> {
        if let Some(semantic) = self.semantic.as_ref() {
            match semantic.lessons(query, grade_level, limit).await {
                Ok(lessons) if !lessons.is_empty() => {
                    return Ok(LessonSearchResult {
                        match_type: MatchType::Semantic,
                        lessons,
                    })
                }
                Ok(_) => debug!(query, "semantic lesson search found nothing; using keywords"),
                Err(error) => warn!(%error, "semantic lesson search failed; using keywords"),
            }
        }
        Ok(LessonSearchResult {
            match_type: MatchType::Keyword,
            lessons: self.keyword.lessons(query, grade_level, limit).await?,
        })
    }

    pub async fn passages(
        &self,
        query: &str,
        lesson_id: Option<&str>,
        limit: usize,
    ) -> Result<PassageSearchResult, LearningRepoError> {
        if let Some(semantic) = self.semantic.as_ref() {
            match semantic.passages(query, lesson_id, limit).await {
                Ok(passages) if !passages.is_empty() => {
                    return Ok(PassageSearchResult {
                        match_type: MatchType::Semantic,
                        passages,
                    })
                }
                Ok(_) => debug!(query, "semantic passage search found nothing; using keywords"),
                Err(error) => warn!(%error, "semantic passage search failed; using keywords"),
            }
        }
        Ok(PassageSearchResult {
            match_type: MatchType::Keyword,
            passages: self.keyword.passages(query, lesson_id, limit).await?,
        })
    }
}

/// Returns 0.0 for mismatched lengths or zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut mag_a = 0.0f32;
    let mut mag_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }
    let denom = mag_a.sqrt() * mag_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if !current.is_empty() && current.chars().count() + line.chars().count() > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Maps known words onto fixed axes so similarity is predictable.
    pub struct VocabularyEmbedder {
        pub vocabulary: Vec<&'static str>,
        pub fail: bool,
    }

    #[async_trait]
    impl Embedder for VocabularyEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if self.fail {
                return Err(EmbeddingError::Transport(String::from("offline")));
            }
            let lowered = text.to_lowercase();
            Ok(self
                .vocabulary
                .iter()
                .map(|word| if lowered.contains(word) { 1.0 } else { 0.0 })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::db::learning::test_support::temp_store;
    use crate::db::learning::{ContentBlockInput, UpsertLessonInput, UpsertSubjectInput};

    use super::test_support::VocabularyEmbedder;
    use super::*;

    fn seed(store: &SharedLearningStore) -> (String, String) {
        let subject = store
            .upsert_subject(UpsertSubjectInput {
                slug: String::from("science"),
                name_en: String::from("Science"),
                name_ar: String::from("العلوم"),
                ..UpsertSubjectInput::default()
            })
            .expect("subject");
        let plants = store
            .upsert_lesson(UpsertLessonInput {
                subject_id: subject.id.clone(),
                title_en: String::from("Plants"),
                description_en: Some(String::from("How plants grow")),
                ..UpsertLessonInput::default()
            })
            .expect("lesson");
        store
            .append_content_block(ContentBlockInput {
                lesson_id: plants.id.clone(),
                body_en: String::from("Leaves use sunlight to make food."),
                body_ar: String::new(),
            })
            .expect("block");
        let water = store
            .upsert_lesson(UpsertLessonInput {
                subject_id: subject.id,
                title_en: String::from("Water cycle"),
                description_en: Some(String::from("Rain and evaporation")),
                ..UpsertLessonInput::default()
            })
            .expect("lesson");
        (plants.id, water.id)
    }

    #[test]
    fn cosine_handles_edge_cases() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn chunking_respects_limit_and_keeps_all_lines() {
        let text = "aaaa\nbbbb\ncccc";
        let chunks = chunk_text(text, 9);
        assert_eq!(chunks, vec!["aaaa\nbbbb", "cccc"]);
    }

    #[tokio::test]
    async fn semantic_tier_answers_when_index_matches() {
        let store = temp_store();
        let (plants_id, _) = seed(&store);
        let embedder: Arc<dyn Embedder> = Arc::new(VocabularyEmbedder {
            vocabulary: vec!["sunlight", "rain"],
            fail: false,
        });
        let search = LessonSearch::new(Arc::clone(&store), Some(embedder));
        let indexed = search
            .semantic()
            .expect("semantic tier")
            .index_lesson(plants_id.as_str())
            .await
            .expect("index");
        assert_eq!(indexed, 1);

        let result = search.lessons("why do plants need sunlight", None, 5).await.expect("search");
        assert_eq!(result.match_type, MatchType::Semantic);
        assert_eq!(result.lessons[0].lesson.id, plants_id);
    }

    #[tokio::test]
    async fn indexing_every_lesson_makes_the_semantic_tier_reachable() {
        let store = temp_store();
        let (plants_id, water_id) = seed(&store);
        let embedder: Arc<dyn Embedder> = Arc::new(VocabularyEmbedder {
            vocabulary: vec!["sunlight", "rain"],
            fail: false,
        });
        let search = LessonSearch::new(Arc::clone(&store), Some(embedder));
        let before = search.lessons("rain", None, 5).await.expect("search");
        assert_eq!(before.match_type, MatchType::Keyword);

        let semantic = search.semantic().expect("semantic tier");
        let report = semantic.index_lessons(None).await.expect("index");
        assert_eq!(report, IndexReport { lessons: 2, chunks: 2 });
        let again = semantic.index_lessons(None).await.expect("reindex");
        assert_eq!(again, report);
        assert_eq!(store.list_lesson_embeddings(None).expect("rows").len(), 2);

        let after = search.lessons("rain", None, 5).await.expect("search");
        assert_eq!(after.match_type, MatchType::Semantic);
        assert_eq!(after.lessons[0].lesson.id, water_id);

        let single = semantic
            .index_lessons(Some(plants_id.as_str()))
            .await
            .expect("single");
        assert_eq!(single.lessons, 1);
    }

    #[test]
    fn pruning_drops_chunks_past_the_new_length() {
        let store = temp_store();
        let (plants_id, _) = seed(&store);
        for index in 0..3 {
            store
                .store_lesson_embedding(plants_id.as_str(), index, "old", &[1.0, 0.0])
                .expect("store");
        }
        assert_eq!(
            store
                .prune_lesson_embeddings(plants_id.as_str(), 1)
                .expect("prune"),
            2
        );
        assert_eq!(
            store
                .list_lesson_embeddings(Some(plants_id.as_str()))
                .expect("rows")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn failing_embedder_falls_back_to_keywords() {
        let store = temp_store();
        let (_, water_id) = seed(&store);
        let embedder: Arc<dyn Embedder> = Arc::new(VocabularyEmbedder {
            vocabulary: vec![],
            fail: true,
        });
        let search = LessonSearch::new(Arc::clone(&store), Some(embedder));
        let result = search.lessons("evaporation", None, 5).await.expect("search");
        assert_eq!(result.match_type, MatchType::Keyword);
        assert_eq!(result.lessons.len(), 1);
        assert_eq!(result.lessons[0].lesson.id, water_id);

        let passages = search
            .passages("sunlight", None, 3)
            .await
            .expect("passages");
        assert_eq!(passages.match_type, MatchType::Keyword);
        assert_eq!(passages.passages[0].content, "Leaves use sunlight to make food.");
    }
}
