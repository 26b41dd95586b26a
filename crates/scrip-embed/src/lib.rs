//! Embedding backends for the catalog.
//!
//! [`XlmRobertaEmbedder`] runs a local XLM-RoBERTa sentence encoder (the
//! `KURE-v1` / `bge-m3` family) through candle. [`FakeEmbedder`] hashes
//! whitespace tokens into a fixed-size vector and is used by tests and by
//! `APP_USE_FAKE_EMBEDDINGS=1`.

use anyhow::{Result, anyhow};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use candle_core::{Device, DType, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{XLMRobertaModel, Config as XLMRobertaConfig};
use scrip_core::config::{expand_path, EmbeddingSettings};
use scrip_core::traits::Embedder;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

pub mod device;
pub mod pool;
pub mod tokenize;

pub use pool::{masked_mean_l2, Pooling};

pub struct XlmRobertaEmbedder {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    pooling: Pooling,
    dim: usize,
    max_len: usize,
    id: String,
}

impl XlmRobertaEmbedder {
    pub fn load(model_dir: &Path, max_len: usize) -> Result<Self> {
        let device = device::select_device();
        info!(dir = %model_dir.display(), "loading embedding model");

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;

        let config_path = model_dir.join("config.json");
        let raw_config = std::fs::read_to_string(&config_path)?;
        let config: XLMRobertaConfig = serde_json::from_str(&raw_config)?;
        let dim = serde_json::from_str::<serde_json::Value>(&raw_config)?
            .get("hidden_size")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| anyhow!("{} has no hidden_size", config_path.display()))? as usize;

        let vb = load_weights(model_dir, DType::F32, &device)?;
        let model = XLMRobertaModel::new(&config, vb)?;
        let pooling = read_pooling(model_dir);
        let name = model_dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| "xlm-roberta".to_string());
        info!(dim, ?pooling, "embedding model loaded");
        Ok(Self { model, tokenizer, device, pooling, dim, max_len, id: format!("local:{name}:d{dim}") })
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() { return Ok(Vec::new()); }
        let start = Instant::now();
        let batch = tokenize::encode_batch(&self.tokenizer, texts, self.max_len, &self.device)?;
        let token_type_ids = Tensor::zeros((texts.len(), batch.seq_len), DType::I64, &self.device)?;
        let hidden = self.model.forward(&batch.input_ids, &batch.attention_mask, &token_type_ids, None, None, None)?;
        let pooled = pool::pool(self.pooling, &hidden, &batch.attention_mask)?;
        let vectors: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu)?.to_vec2()?;
        if let Some(v) = vectors.iter().find(|v| v.len() != self.dim) { return Err(anyhow!("model produced {} dims, expected {}", v.len(), self.dim)); }
        let ms = start.elapsed().as_millis() as u64;
        debug!(texts = texts.len(), seq_len = batch.seq_len, ms, "embedded batch");
        Ok(vectors)
    }
}

impl Embedder for XlmRobertaEmbedder {
    fn id(&self) -> &str { &self.id }
    fn dim(&self) -> usize { self.dim }
    fn max_len(&self) -> usize { self.max_len }
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> { self.embed_texts(texts) }
}

/// Weights from `model.safetensors`, or `pytorch_model.bin` when there is none.
pub fn load_weights(model_dir: &Path, dtype: DType, device: &Device) -> Result<VarBuilder<'static>> {
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.exists() {
        debug!(path = %safetensors.display(), "reading safetensors weights");
        let bytes = std::fs::read(&safetensors)?;
        return Ok(VarBuilder::from_buffered_safetensors(bytes, dtype, device)?);
    }
    let weights_path = model_dir.join("pytorch_model.bin");
    debug!(path = %weights_path.display(), "reading pickled weights");
    let weights = candle_core::pickle::read_all(&weights_path)?;
    let weights_map: std::collections::HashMap<String, Tensor> = weights.into_iter().collect();
    Ok(VarBuilder::from_tensors(weights_map, dtype, device))
}

/// Sentence-transformers checkpoints declare their pooling; bare checkpoints get CLS.
fn read_pooling(model_dir: &Path) -> Pooling {
    let path = model_dir.join("1_Pooling").join("config.json");
    let Ok(raw) = std::fs::read_to_string(&path) else { return Pooling::Cls };
    let Ok(v) = serde_json::from_str::<serde_json::Value>(&raw) else { return Pooling::Cls };
    if v.get("pooling_mode_mean_tokens").and_then(serde_json::Value::as_bool) == Some(true) { Pooling::Mean } else { Pooling::Cls }
}

/// Deterministic hashed bag-of-tokens embedder.
pub struct FakeEmbedder { dim: usize, id: String }

impl FakeEmbedder {
    pub fn new(dim: usize) -> Self { Self { dim, id: format!("fake:d{dim}") } }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher}; use twox_hash::XxHash64;
        let mut v = vec![0f32; self.dim];
        for (i, token) in text.split_whitespace().enumerate() {
            let mut hasher = XxHash64::with_seed(0); token.to_lowercase().hash(&mut hasher); let h = hasher.finish();
            let idx = (h as usize) % self.dim; let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += val + (i as f32 % 3.0) * 0.01;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6); for x in &mut v { *x /= norm; } v
    }
}

impl Embedder for FakeEmbedder {
    fn id(&self) -> &str { &self.id }
    fn dim(&self) -> usize { self.dim }
    fn max_len(&self) -> usize { usize::MAX }
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> { Ok(texts.iter().map(|t| self.embed_one(t)).collect()) }
}

pub fn use_fake_from_env() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

pub fn get_default_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    if settings.use_fake || use_fake_from_env() { info!(dim = settings.fake_dim, "using FakeEmbedder"); return Ok(Arc::new(FakeEmbedder::new(settings.fake_dim))); }
    let model_dir = resolve_model_dir(settings.model_dir.as_deref())?;
    Ok(Arc::new(XlmRobertaEmbedder::load(&model_dir, settings.max_len)?))
}

fn resolve_model_dir(configured: Option<&str>) -> Result<PathBuf> {
    if let Some(dir) = configured { let p = expand_path(dir); if p.exists() { return Ok(p); } warn!(dir = %p.display(), "configured model dir does not exist"); }
    if let Ok(dir) = std::env::var("APP_MODEL_DIR") { let p = PathBuf::from(&dir); if p.exists() { info!(dir = %p.display(), "using APP_MODEL_DIR"); return Ok(p); } }
    if let Ok(dir) = std::env::var("MODEL_DIR") { let p = PathBuf::from(&dir); if p.exists() { info!(dir = %p.display(), "using MODEL_DIR"); return Ok(p); } }
    let local = Path::new("models/KURE-v1"); if local.exists() { return Ok(local.to_path_buf()); }
    Err(anyhow!("Could not locate an embedding model directory (set embedding.model_dir or APP_MODEL_DIR)"))
}
