use std::sync::Arc;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use scrip_core::traits::Embedder;

/// Advances a progress bar by one tick per embedded text.
pub struct ProgressEmbedder {
    inner: Arc<dyn Embedder>,
    pb: ProgressBar,
}

impl ProgressEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, total: usize) -> Result<Self> {
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} records ({percent}%) {msg}",
            )?
            .progress_chars("#>-"),
        );
        Ok(Self { inner, pb })
    }

    pub fn finish(&self, msg: &'static str) {
        self.pb.finish_with_message(msg);
    }
}

impl Embedder for ProgressEmbedder {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn max_len(&self) -> usize {
        self.inner.max_len()
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let out = self.inner.embed_batch(texts)?;
        self.pb.inc(texts.len() as u64);
        Ok(out)
    }
}
