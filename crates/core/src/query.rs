use crate::citation::{build_citations, build_context, build_prompt};
use crate::embeddings::Embedder;
use crate::error::{GenerationError, QueryError};
use crate::generation::Generator;
use crate::index::ChunkIndex;
use crate::models::{QueryResponse, ScoredChunk};
use crate::traits::ChunkStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const NO_CONTEXT_ANSWER: &str = "I cannot find this information in the provided documents.";

/// Cosine floor for retrieved evidence. Unrelated text still shares
/// character trigrams with the question and scores around 0.2 to 0.3 under
/// [`CharacterNgramEmbedder`](crate::embeddings::CharacterNgramEmbedder).
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.35;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub top_k: usize,
    /// Cumulative chunk-text budget for the prompt. The best chunk is always kept.
    pub max_context_chars: usize,
    pub snippet_chars: usize,
    /// Hits scoring at or below this are not evidence.
    pub min_similarity: f32,
    /// Returned verbatim when no evidence survives retrieval.
    pub no_context_answer: String,
    pub retry: RetryPolicy,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            top_k: 15,
            max_context_chars: 12_000,
            snippet_chars: 250,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            no_context_answer: NO_CONTEXT_ANSWER.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct QueryEngine<S, E, G> {
    index: Arc<ChunkIndex<S, E>>,
    generator: G,
    options: QueryOptions,
}

impl<S, E, G> QueryEngine<S, E, G>
where
    S: ChunkStore,
    E: Embedder,
    G: Generator,
{
    pub fn new(index: Arc<ChunkIndex<S, E>>, generator: G, options: QueryOptions) -> Self {
        Self {
            index,
            generator,
            options,
        }
    }

    pub async fn answer(&self, question: &str) -> Result<QueryResponse, QueryError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(QueryError::InvalidArgument("question is empty".to_string()));
        }

        let query_vector = self.index.embed(question).await?;
        let hits = self.index.search(&query_vector, self.options.top_k).await?;
        let evidence = self.admit_evidence(hits);

        info!(retrieved = evidence.len(), "retrieval finished");

        if evidence.is_empty() {
            return Ok(QueryResponse {
                answer_text: self.options.no_context_answer.clone(),
                citations: Vec::new(),
            });
        }

        let prompt = build_prompt(question, &build_context(&evidence));
        let answer_text = self.generate_with_retry(&prompt).await?;
        let citations = if self.is_refusal(&answer_text) {
            Vec::new()
        } else {
            build_citations(&answer_text, &evidence, self.options.snippet_chars)
        };

        Ok(QueryResponse {
            answer_text,
            citations,
        })
    }

    fn admit_evidence(&self, hits: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
        let mut used = 0usize;
        let mut evidence = Vec::new();

        for hit in hits {
            if hit.score <= self.options.min_similarity {
                continue;
            }
            let length = hit.chunk.text.chars().count();
            if !evidence.is_empty() && used + length > self.options.max_context_chars {
                break;
            }
            used += length;
            evidence.push(hit);
        }

        evidence
    }

    /// The model declined to answer from the supplied context, so no chunk
    /// supports the answer.
    fn is_refusal(&self, answer: &str) -> bool {
        let answer = refusal_key(answer);
        !answer.is_empty()
            && (answer == refusal_key(NO_CONTEXT_ANSWER)
                || answer == refusal_key(&self.options.no_context_answer))
    }

    async fn generate_with_retry(&self, prompt: &str) -> Result<String, GenerationError> {
        let policy = self.options.retry;
        let mut attempt = 0;

        loop {
            match self.generator.generate(prompt).await {
                Ok(text) => return Ok(text),
                Err(error) if error.is_retryable() && attempt < policy.max_retries => {
                    let delay = policy.backoff(attempt);
                    warn!(%error, attempt = attempt + 1, ?delay, "generation failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn refusal_key(text: &str) -> String {
    text.to_lowercase()
        .split(|character: char| !character.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::stores::InMemoryChunkStore;
    use crate::test_support::{chunk, ScriptedGenerator};

    type Index = ChunkIndex<InMemoryChunkStore, CharacterNgramEmbedder>;

    async fn index_with(texts: &[(&str, u32, &str)]) -> Arc<Index> {
        let index = ChunkIndex::new(InMemoryChunkStore::new(), CharacterNgramEmbedder::default());
        let chunks: Vec<_> = texts
            .iter()
            .map(|(file, page, text)| chunk(file, *page, text))
            .collect();
        index.upsert(&chunks).await.unwrap();
        Arc::new(index)
    }

    #[tokio::test]
    async fn empty_index_short_circuits_without_generation() {
        let index = index_with(&[]).await;
        let generator = ScriptedGenerator::answering("should never be used");
        let calls = generator.calls();
        let engine = QueryEngine::new(index, generator, QueryOptions::default());

        let response = engine.answer("What is the concrete grade?").await.unwrap();
        assert_eq!(response.answer_text, NO_CONTEXT_ANSWER);
        assert!(response.citations.is_empty());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn irrelevant_hits_below_floor_short_circuit() {
        let index = index_with(&[("a.pdf", 1, "wind load per IS 875")]).await;
        let generator = ScriptedGenerator::answering("unused");
        let calls = generator.calls();
        let options = QueryOptions {
            min_similarity: 0.99,
            ..QueryOptions::default()
        };
        let engine = QueryEngine::new(index, generator, options);

        let response = engine.answer("What is the concrete grade?").await.unwrap();
        assert!(response.citations.is_empty());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unrelated_question_short_circuits_with_default_options() {
        let index =
            index_with(&[("a.pdf", 1, "Wind load per IS 875 part 3 for the roof truss")]).await;
        let generator = ScriptedGenerator::answering("unused");
        let calls = generator.calls();
        let engine = QueryEngine::new(index, generator, QueryOptions::default());

        let response = engine.answer("xylophone quartz jukebox?").await.unwrap();
        assert_eq!(response.answer_text, NO_CONTEXT_ANSWER);
        assert!(response.citations.is_empty());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refusal_from_the_model_carries_no_citations() {
        let index = index_with(&[("specs.pdf", 1, "concrete grade M35 for footings")]).await;
        let generator = ScriptedGenerator::answering(
            "I cannot find this information in the provided documents",
        );
        let calls = generator.calls();
        let engine = QueryEngine::new(index, generator, QueryOptions::default());

        let response = engine.answer("concrete grade").await.unwrap();
        assert!(response.citations.is_empty());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn refusal_matching_ignores_case_and_punctuation() {
        assert_eq!(
            refusal_key("I cannot find this information in the provided documents."),
            refusal_key("i cannot find this information in the provided documents")
        );
        assert_ne!(refusal_key("Grade is M35 [1]."), refusal_key(NO_CONTEXT_ANSWER));
    }

    #[tokio::test]
    async fn citations_come_from_chunks_not_model_text() {
        let index = index_with(&[(
            "specs.pdf",
            4,
            "The concrete grade shall be M35 for all footings.",
        )])
        .await;
        let generator =
            ScriptedGenerator::answering("The grade is M50 per page 99 of fake.pdf [1].");
        let engine = QueryEngine::new(index, generator, QueryOptions::default());

        let response = engine.answer("concrete grade").await.unwrap();
        assert_eq!(response.citations.len(), 1);
        let citation = &response.citations[0];
        assert_eq!(citation.id, 1);
        assert_eq!(citation.source_file, "specs.pdf");
        assert_eq!(citation.page_number, 4);
        assert!("The concrete grade shall be M35 for all footings.".contains(&citation.snippet));
    }

    #[tokio::test]
    async fn unmarked_answer_cites_every_retrieved_chunk() {
        let index = index_with(&[
            ("specs.pdf", 1, "concrete grade M35"),
            ("specs.pdf", 2, "concrete cover 50 mm"),
        ])
        .await;
        let engine = QueryEngine::new(
            index,
            ScriptedGenerator::answering("Use M35 concrete."),
            QueryOptions::default(),
        );

        let response = engine.answer("concrete").await.unwrap();
        let ids: Vec<_> = response.citations.iter().map(|citation| citation.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn context_budget_keeps_at_least_the_best_chunk() {
        let index = index_with(&[
            ("specs.pdf", 1, "concrete grade M35 for footings"),
            ("specs.pdf", 2, "concrete grade M30 for slabs"),
        ])
        .await;
        let options = QueryOptions {
            max_context_chars: 5,
            ..QueryOptions::default()
        };
        let engine = QueryEngine::new(index, ScriptedGenerator::answering("M35 [1]"), options);

        let response = engine.answer("concrete grade M35 for footings").await.unwrap();
        assert_eq!(response.citations.len(), 1);
        assert_eq!(response.citations[0].page_number, 1);
    }

    #[tokio::test]
    async fn generation_failure_is_surfaced() {
        let index = index_with(&[("specs.pdf", 1, "concrete grade M35")]).await;
        let engine = QueryEngine::new(
            index,
            ScriptedGenerator::failing(|| GenerationError::Unauthorized("bad key".to_string())),
            QueryOptions::default(),
        );

        let result = engine.answer("concrete grade").await;
        assert!(matches!(
            result,
            Err(QueryError::ServiceUnavailable(GenerationError::Unauthorized(_)))
        ));
    }

    #[tokio::test]
    async fn retryable_failures_are_retried_when_policy_allows() {
        let index = index_with(&[("specs.pdf", 1, "concrete grade M35")]).await;
        let generator = ScriptedGenerator::rate_limited_then("Grade M35 [1]", 2);
        let calls = generator.calls();
        let options = QueryOptions {
            retry: RetryPolicy {
                max_retries: 2,
                initial_backoff: Duration::from_millis(1),
            },
            ..QueryOptions::default()
        };
        let engine = QueryEngine::new(index, generator, options);

        let response = engine.answer("concrete grade").await.unwrap();
        assert_eq!(response.answer_text, "Grade M35 [1]");
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn default_policy_does_not_retry() {
        let index = index_with(&[("specs.pdf", 1, "concrete grade M35")]).await;
        let generator = ScriptedGenerator::rate_limited_then("Grade M35 [1]", 1);
        let calls = generator.calls();
        let engine = QueryEngine::new(index, generator, QueryOptions::default());

        assert!(engine.answer("concrete grade").await.is_err());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blank_question_is_rejected() {
        let index = index_with(&[]).await;
        let engine = QueryEngine::new(
            index,
            ScriptedGenerator::answering("unused"),
            QueryOptions::default(),
        );
        assert!(matches!(
            engine.answer("   ").await,
            Err(QueryError::InvalidArgument(_))
        ));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
    }
}
