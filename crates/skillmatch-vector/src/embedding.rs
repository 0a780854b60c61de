//! Embedding service trait and implementations.
//!
//! - `OnnxEmbeddingService` loads a sentence-transformer ONNX model (e.g.
//!   all-MiniLM-L6-v2) via ort and tokenizes with the HuggingFace tokenizers
//!   crate. This is the production embedding backend.
//! - `HashEmbedding` is a deterministic feature-hashing embedder used when no
//!   model is configured, and by the tests.
//!
//! Both reject empty or whitespace-only text with `SkillmatchError::Embedding`
//! rather than producing a zero vector.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use ort::session::Session;
use ort::value::TensorRef;
use skillmatch_core::error::{Result, SkillmatchError};
use tokenizers::Tokenizer;
use tracing::info;

/// Service for generating text embeddings.
///
/// Implementations convert text into fixed-dimensional vectors and must be
/// deterministic for a given model version. A single instance is shared by
/// every catalog and every concurrent query.
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>>> + Send;

    /// Embed several texts, preserving input order.
    ///
    /// Must return exactly what calling [`embed`](Self::embed) on each element
    /// would. The default implementation does just that.
    fn embed_batch(&self, texts: &[String]) -> impl Future<Output = Result<Vec<Vec<f32>>>> + Send {
        async move {
            let mut vectors = Vec::with_capacity(texts.len());
            for text in texts {
                vectors.push(self.embed(text).await?);
            }
            Ok(vectors)
        }
    }

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;

    /// Identifier of the underlying model, reported in catalog stats.
    fn model_name(&self) -> &str;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// `EmbeddingService` returns `impl Future` and so cannot be used as a trait
/// object. This trait boxes the futures instead, allowing the process-wide
/// embedder to live behind `Arc<dyn DynEmbeddingService>`.
pub trait DynEmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text (boxed future).
    fn embed_boxed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>>>;

    /// Embed several texts in order (boxed future).
    fn embed_batch_boxed<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>>;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;

    /// Identifier of the underlying model.
    fn model_name(&self) -> &str;
}

/// Blanket impl: any `EmbeddingService` automatically implements `DynEmbeddingService`.
impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>>> {
        Box::pin(self.embed(text))
    }

    fn embed_batch_boxed<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
        Box::pin(self.embed_batch(texts))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }

    fn model_name(&self) -> &str {
        EmbeddingService::model_name(self)
    }
}

/// Check that a produced vector has the advertised dimension.
pub fn check_dimension(vector: &[f32], expected: usize) -> Result<()> {
    if vector.len() != expected {
        return Err(SkillmatchError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

fn reject_blank(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(SkillmatchError::Embedding(
            "Cannot embed empty text".to_string(),
        ));
    }
    Ok(())
}

fn l2_normalize(values: &mut [f32]) {
    let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in values.iter_mut() {
            *val /= norm;
        }
    }
}

// ---------------------------------------------------------------------------
// OnnxEmbeddingService - real ONNX Runtime inference
// ---------------------------------------------------------------------------

struct OnnxModel {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    dimensions: usize,
}

/// ONNX Runtime-backed embedding service using a sentence-transformer model.
///
/// Expects a model directory containing:
/// - `model.onnx` - the sentence-transformer ONNX export
/// - `tokenizer.json` - the HuggingFace fast-tokenizer file
///
/// The model should accept `input_ids`, `attention_mask`, and
/// `token_type_ids` as i64 inputs and produce token-level embeddings.
/// Mean pooling (masked) is applied to produce a single vector per input.
#[derive(Clone)]
pub struct OnnxEmbeddingService {
    model: Arc<OnnxModel>,
    model_name: String,
}

impl std::fmt::Debug for OnnxEmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingService")
            .field("model_name", &self.model_name)
            .field("dimensions", &self.model.dimensions)
            .finish()
    }
}

impl OnnxEmbeddingService {
    /// Load a sentence-transformer model from the given directory.
    ///
    /// The directory must contain `model.onnx` and `tokenizer.json`.
    pub fn from_directory(model_dir: &Path, model_name: &str) -> Result<Self> {
        Self::from_files(
            &model_dir.join("model.onnx"),
            &model_dir.join("tokenizer.json"),
            model_name,
        )
    }

    /// Load from explicit model and tokenizer file paths.
    pub fn from_files(model_path: &Path, tokenizer_path: &Path, model_name: &str) -> Result<Self> {
        if !model_path.exists() {
            return Err(SkillmatchError::Embedding(format!(
                "ONNX model not found at {}",
                model_path.display()
            )));
        }
        if !tokenizer_path.exists() {
            return Err(SkillmatchError::Embedding(format!(
                "Tokenizer not found at {}",
                tokenizer_path.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| SkillmatchError::Embedding(format!("ONNX session builder: {}", e)))?
            .with_intra_threads(1)
            .map_err(|e| SkillmatchError::Embedding(format!("ONNX set threads: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| SkillmatchError::Embedding(format!("ONNX load model: {}", e)))?;

        // Sentence-transformer output is [batch, seq_len, hidden_dim].
        let dimensions = session
            .outputs()
            .first()
            .and_then(|out| out.dtype().tensor_shape())
            .and_then(|shape| shape.last().copied())
            .map(|d| if d > 0 { d as usize } else { 384 })
            .unwrap_or(384);

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| SkillmatchError::Embedding(format!("Failed to load tokenizer: {}", e)))?;

        info!(
            model = %model_path.display(),
            dimensions,
            "Loaded ONNX embedding model"
        );

        Ok(Self {
            model: Arc::new(OnnxModel {
                session: Mutex::new(session),
                tokenizer,
                dimensions,
            }),
            model_name: model_name.to_string(),
        })
    }
}

impl OnnxModel {
    /// Tokenize, run inference, and mean-pool the output.
    fn embed_sync(&self, text: &str) -> Result<Vec<f32>> {
        reject_blank(text)?;

        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| SkillmatchError::Embedding(format!("Tokenization failed: {}", e)))?;

        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();
        let token_type_ids: Vec<i64> = encoding.get_type_ids().iter().map(|&t| t as i64).collect();

        let seq_len = input_ids.len();
        let tensor_err = |what: &str, e: &dyn std::fmt::Display| {
            SkillmatchError::Embedding(format!("{}: {}", what, e))
        };

        let ids_array = ndarray::Array2::from_shape_vec((1, seq_len), input_ids)
            .map_err(|e| tensor_err("input_ids array", &e))?;
        let mask_array = ndarray::Array2::from_shape_vec((1, seq_len), attention_mask.clone())
            .map_err(|e| tensor_err("attention_mask array", &e))?;
        let type_array = ndarray::Array2::from_shape_vec((1, seq_len), token_type_ids)
            .map_err(|e| tensor_err("token_type_ids array", &e))?;

        let ids_ref = TensorRef::from_array_view(&ids_array)
            .map_err(|e| tensor_err("TensorRef input_ids", &e))?;
        let mask_ref = TensorRef::from_array_view(&mask_array)
            .map_err(|e| tensor_err("TensorRef attention_mask", &e))?;
        let type_ref = TensorRef::from_array_view(&type_array)
            .map_err(|e| tensor_err("TensorRef token_type_ids", &e))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| SkillmatchError::Embedding(format!("Session lock poisoned: {}", e)))?;
        let outputs = session
            .run(ort::inputs![ids_ref, mask_ref, type_ref])
            .map_err(|e| tensor_err("ONNX inference failed", &e))?;

        // Token embeddings as a flat slice: [1, seq_len, hidden_dim].
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| tensor_err("Extract embeddings", &e))?;

        let shape_dims: Vec<i64> = shape.iter().copied().collect();
        let mut pooled = mean_pool(data, &shape_dims, &attention_mask)?;

        l2_normalize(&mut pooled);
        check_dimension(&pooled, self.dimensions)?;
        Ok(pooled)
    }
}

/// Masked mean over token embeddings laid out as `[1, seq_len, hidden]`.
///
/// Fails on any other layout, including models that already pool to
/// `[1, hidden]`.
fn mean_pool(data: &[f32], shape: &[i64], attention_mask: &[i64]) -> Result<Vec<f32>> {
    let seq_len = attention_mask.len();
    let hidden_dim = match shape {
        [1, tokens, hidden] if *tokens as usize == seq_len && *hidden > 0 => *hidden as usize,
        _ => {
            return Err(SkillmatchError::Embedding(format!(
                "Unexpected output shape {:?}, want [1, {}, hidden]",
                shape, seq_len
            )))
        }
    };
    if data.len() < seq_len * hidden_dim {
        return Err(SkillmatchError::Embedding(format!(
            "Output holds {} floats, shape {:?} needs {}",
            data.len(),
            shape,
            seq_len * hidden_dim
        )));
    }

    let mut pooled = vec![0.0f32; hidden_dim];
    let mut count = 0.0f32;
    for (tok_idx, &mask_val) in attention_mask.iter().enumerate() {
        if mask_val > 0 {
            let token = &data[tok_idx * hidden_dim..(tok_idx + 1) * hidden_dim];
            for (slot, value) in pooled.iter_mut().zip(token) {
                *slot += value;
            }
            count += 1.0;
        }
    }

    if count > 0.0 {
        for val in &mut pooled {
            *val /= count;
        }
    }
    Ok(pooled)
}

impl EmbeddingService for OnnxEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // ONNX Runtime inference is CPU-bound; run on a blocking thread.
        let model = Arc::clone(&self.model);
        let text_owned = text.to_string();

        tokio::task::spawn_blocking(move || model.embed_sync(&text_owned))
            .await
            .map_err(|e| SkillmatchError::Embedding(format!("Embedding task panicked: {}", e)))?
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // One blocking task for the whole batch, same per-text routine as `embed`.
        let model = Arc::clone(&self.model);
        let texts_owned = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            texts_owned
                .iter()
                .map(|text| model.embed_sync(text))
                .collect::<Result<Vec<_>>>()
        })
        .await
        .map_err(|e| SkillmatchError::Embedding(format!("Embedding task panicked: {}", e)))?
    }

    fn dimensions(&self) -> usize {
        self.model.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

// ---------------------------------------------------------------------------
// HashEmbedding - deterministic feature hashing
// ---------------------------------------------------------------------------

/// Feature-hashing embedder.
///
/// Each lowercased alphanumeric token is hashed into one of `dimensions`
/// buckets with a pseudo-random sign, and the result is L2-normalized. Texts
/// sharing tokens end up close in Euclidean space, so ranking stays
/// meaningful without a neural model.
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimensions: usize,
    model_name: String,
}

impl HashEmbedding {
    pub const MODEL_NAME: &'static str = "feature-hash-v1";

    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            model_name: Self::MODEL_NAME.to_string(),
        }
    }

    fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
    }

    // FNV-1a: stable across toolchains, so persisted vectors stay valid
    // after a rebuild of the binary.
    fn fnv1a(bytes: &[u8]) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for b in bytes {
            hash ^= u64::from(*b);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash
    }

    fn embed_sync(&self, text: &str) -> Result<Vec<f32>> {
        reject_blank(text)?;

        let mut vector = vec![0.0f32; self.dimensions];
        let mut seen = 0usize;
        for token in Self::tokens(text) {
            let h = Self::fnv1a(token.as_bytes());
            let bucket = (h % self.dimensions as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
            seen += 1;
        }

        if seen == 0 {
            return Err(SkillmatchError::Embedding(format!(
                "No embeddable tokens in {:?}",
                text
            )));
        }

        l2_normalize(&mut vector);
        Ok(vector)
    }
}

impl Default for HashEmbedding {
    fn default() -> Self {
        Self::new(384)
    }
}

impl EmbeddingService for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_sync(text)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
