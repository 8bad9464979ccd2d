use std::collections::HashMap;
use std::sync::Arc;

use ai_client::{EmbedAgent, OpenAi};
use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use opportunity_common::file_config::ModelsConfig;
use opportunity_common::{AppConfig, EmbedProvider};

use crate::traits::{EmbeddingBatch, TextEmbedder};

/// OpenAI's hard limit is 2048 inputs per request.
const OPENAI_MAX_BATCH: usize = 2048;
/// Self-hosted sentence-transformer servers run on modest hardware.
const LOCAL_MAX_BATCH: usize = 256;

/// Embeddings through any OpenAI-compatible endpoint, tagged with the
/// provider it stands for.
pub struct Embedder {
    client: OpenAi,
    provider: EmbedProvider,
}

impl Embedder {
    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            client: OpenAi::new(api_key, model).with_embedding_model(model),
            provider: EmbedProvider::OpenAi,
        }
    }

    /// A miniLM or bge model served behind `base_url`. Such servers
    /// normally take no key.
    pub fn local(provider: EmbedProvider, base_url: &str, model: &str) -> Self {
        Self {
            client: OpenAi::new("", model)
                .with_base_url(base_url)
                .with_embedding_model(model),
            provider,
        }
    }
}

#[async_trait]
impl TextEmbedder for Embedder {
    fn provider(&self) -> EmbedProvider {
        self.provider
    }

    fn max_batch(&self) -> usize {
        if self.provider.is_local() {
            LOCAL_MAX_BATCH
        } else {
            OPENAI_MAX_BATCH
        }
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<EmbeddingBatch> {
        let embeddings = self.client.embed_batch(texts).await?;
        Ok(EmbeddingBatch {
            vectors: embeddings.vectors,
            tokens: embeddings.usage.map(|u| u.prompt_tokens),
        })
    }
}

/// Every provider that can be reached with the given configuration.
/// Local providers need `EMBEDDING_BASE_URL`; without it they are left
/// out and runs asking for them fall back to random sampling.
pub fn build_embedders(
    app: &AppConfig,
    models: &ModelsConfig,
) -> HashMap<EmbedProvider, Arc<dyn TextEmbedder>> {
    let mut embedders: HashMap<EmbedProvider, Arc<dyn TextEmbedder>> = HashMap::new();

    if app.openai_api_key.is_empty() {
        warn!("OPENAI_API_KEY is empty, openai embeddings unavailable");
    } else {
        let model = models.embedding_model(EmbedProvider::OpenAi);
        embedders.insert(
            EmbedProvider::OpenAi,
            Arc::new(Embedder::openai(&app.openai_api_key, model)),
        );
    }

    match app.embedding_base_url.as_deref() {
        Some(base_url) => {
            for provider in [EmbedProvider::MiniLm, EmbedProvider::Bge] {
                let model = models.embedding_model(provider);
                embedders.insert(provider, Arc::new(Embedder::local(provider, base_url, model)));
            }
        }
        None => info!("EMBEDDING_BASE_URL not set, miniLM and bge embeddings unavailable"),
    }

    embedders
}
