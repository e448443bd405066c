//! Retrieval-augmented question answering.
//!
//! A query is embedded, the closest chunks are pulled from the vector
//! store, and the chat model answers from a fixed prompt built around
//! them. Failures never escape [`QueryService::query`]; they are reported
//! in the answer text with an empty source list.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{Config, ContextMode};
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::generation::{self, ChatModel};
use crate::models::{QueryResponse, SourceDocument};
use crate::vector_store;

pub const DEFAULT_CONTEXT_TYPE: &str = "general";

const CONNECTION_TEST_PROMPT: &str =
    "Please respond with 'OK' to confirm the connection is working.";

/// Fill the answer prompt.
///
/// `content_type` adds a labelled line ahead of the question when set.
pub fn build_prompt(context: &str, question: &str, content_type: Option<&str>) -> String {
    let label = content_type
        .map(|t| format!("Content type: {}\n\n", t))
        .unwrap_or_default();
    format!(
        "You are an expert aviation operations assistant. Use the following context to answer \
         the question accurately and concisely.\n\n\
         Context: {context}\n\n\
         {label}Question: {question}\n\n\
         If the context doesn't contain relevant information, say so and do not hallucinate.\n\n\
         Answer:"
    )
}

/// The question used for retrieval and generation under the given mode.
pub fn effective_question(question: &str, context_type: &str, mode: ContextMode) -> String {
    if mode == ContextMode::RetrievalPrefix && context_type != DEFAULT_CONTEXT_TYPE {
        format!("{} CONTEXT: {}", context_type.to_uppercase(), question)
    } else {
        question.to_string()
    }
}

pub struct QueryService {
    embedder: Arc<dyn EmbeddingProvider>,
    chat: Arc<dyn ChatModel>,
    docstore: SqlitePool,
    top_k: usize,
    context_mode: ContextMode,
}

impl QueryService {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatModel>,
        docstore: SqlitePool,
        top_k: usize,
        context_mode: ContextMode,
    ) -> Self {
        Self {
            embedder,
            chat,
            docstore,
            top_k,
            context_mode,
        }
    }

    /// Build providers and open the document store from configuration.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let embedder = embedding::create_provider(&config.embedding)?;
        let chat = generation::create_chat_model(&config.generation)?;
        let docstore = db::connect_docstore(config).await?;
        Ok(Self::new(
            embedder,
            chat,
            docstore,
            config.retrieval.top_k,
            config.retrieval.context_mode,
        ))
    }

    pub fn docstore(&self) -> &SqlitePool {
        &self.docstore
    }

    /// Answer a question. Errors are folded into the response.
    pub async fn query(&self, question: &str, context_type: &str) -> QueryResponse {
        let question = effective_question(question, context_type, self.context_mode);
        match self.answer(&question, context_type).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "query failed");
                QueryResponse {
                    answer: format!("Error: {:#}", e),
                    source_documents: Vec::new(),
                    question,
                }
            }
        }
    }

    async fn answer(&self, question: &str, context_type: &str) -> Result<QueryResponse> {
        let query_vec = embedding::embed_query(self.embedder.as_ref(), question).await?;
        let hits = vector_store::search(&self.docstore, &query_vec, self.top_k, None).await?;
        debug!(hits = hits.len(), "retrieved context");

        let context = hits
            .iter()
            .map(|h| h.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let label = match self.context_mode {
            ContextMode::GenerationLabel if context_type != DEFAULT_CONTEXT_TYPE => {
                Some(context_type)
            }
            _ => None,
        };
        let prompt = build_prompt(&context, question, label);
        let answer = self.chat.complete(&prompt).await?;

        Ok(QueryResponse {
            answer: answer.trim().to_string(),
            source_documents: hits
                .into_iter()
                .map(|h| SourceDocument {
                    content: h.text,
                    metadata: h.metadata,
                })
                .collect(),
            question: question.to_string(),
        })
    }

    /// Round-trip a fixed prompt through the chat model.
    pub async fn test_connection(&self) -> Result<String> {
        self.chat.complete(CONNECTION_TEST_PROMPT).await
    }

    pub fn available_models(&self) -> Vec<String> {
        vec![self.chat.model_name().to_string()]
    }
}

/// CLI entry point for `avrag query`.
pub async fn run_query(config: &Config, question: &str, context_type: &str) -> Result<()> {
    let service = QueryService::from_config(config).await?;
    let response = service.query(question, context_type).await;

    println!("{}", response.answer);
    if !response.source_documents.is_empty() {
        println!();
        println!("sources:");
        for (i, doc) in response.source_documents.iter().enumerate() {
            let filename = doc
                .metadata
                .get("filename")
                .and_then(|f| f.as_str())
                .unwrap_or("-");
            let category = doc
                .metadata
                .get("category")
                .and_then(|c| c.as_str())
                .unwrap_or("-");
            println!("  {}. {} [{}]", i + 1, filename, category);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            bail!("throttled")
        }
    }

    #[derive(Default)]
    struct RecordingChat {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatModel for RecordingChat {
        fn model_name(&self) -> &str {
            "recording-chat"
        }
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(" The context does not cover this. ".to_string())
        }
    }

    async fn empty_store() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::migrate_docstore(&pool).await.unwrap();
        pool
    }

    #[test]
    fn retrieval_prefix_rewrites_non_general_questions() {
        assert_eq!(
            effective_question("max stack height?", "cargo", ContextMode::RetrievalPrefix),
            "CARGO CONTEXT: max stack height?"
        );
        assert_eq!(
            effective_question("max stack height?", "general", ContextMode::RetrievalPrefix),
            "max stack height?"
        );
        assert_eq!(
            effective_question("max stack height?", "cargo", ContextMode::GenerationLabel),
            "max stack height?"
        );
    }

    #[test]
    fn prompt_contains_context_question_and_guardrail() {
        let prompt = build_prompt("ULDs must be latched.", "How are ULDs secured?", None);
        assert!(prompt.starts_with("You are an expert aviation operations assistant."));
        assert!(prompt.contains("Context: ULDs must be latched."));
        assert!(prompt.contains("Question: How are ULDs secured?"));
        assert!(prompt.contains("do not hallucinate"));
        assert!(prompt.ends_with("Answer:"));
        assert!(!prompt.contains("Content type:"));

        let labelled = build_prompt("", "q", Some("safety"));
        assert!(labelled.contains("Content type: safety\n\nQuestion: q"));
    }

    #[tokio::test]
    async fn empty_retrieval_still_generates() {
        let chat = Arc::new(RecordingChat::default());
        let service = QueryService::new(
            Arc::new(FixedEmbedder),
            chat.clone(),
            empty_store().await,
            3,
            ContextMode::RetrievalPrefix,
        );

        let response = service.query("What is a ULD?", "general").await;
        assert!(response.source_documents.is_empty());
        assert_eq!(response.answer, "The context does not cover this.");
        assert_eq!(response.question, "What is a ULD?");
        assert_eq!(chat.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failures_are_folded_into_the_answer() {
        let chat = Arc::new(RecordingChat::default());
        let service = QueryService::new(
            Arc::new(FailingEmbedder),
            chat.clone(),
            empty_store().await,
            3,
            ContextMode::RetrievalPrefix,
        );

        let response = service.query("Deicing holdover?", "safety").await;
        assert!(response.answer.starts_with("Error: "));
        assert!(response.answer.contains("throttled"));
        assert!(response.source_documents.is_empty());
        assert_eq!(response.question, "SAFETY CONTEXT: Deicing holdover?");
        assert!(chat.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn generation_label_mode_labels_the_prompt() {
        let chat = Arc::new(RecordingChat::default());
        let service = QueryService::new(
            Arc::new(FixedEmbedder),
            chat.clone(),
            empty_store().await,
            3,
            ContextMode::GenerationLabel,
        );

        let response = service.query("Battery limits?", "regulations").await;
        assert_eq!(response.question, "Battery limits?");
        let prompts = chat.prompts.lock().unwrap();
        assert!(prompts[0].contains("Content type: regulations"));
    }

    #[tokio::test]
    async fn available_models_reports_chat_model() {
        let service = QueryService::new(
            Arc::new(FixedEmbedder),
            Arc::new(RecordingChat::default()),
            empty_store().await,
            3,
            ContextMode::RetrievalPrefix,
        );
        assert_eq!(service.available_models(), vec!["recording-chat".to_string()]);
    }
}
