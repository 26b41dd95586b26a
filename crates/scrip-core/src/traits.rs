/// Opaque text → vector capability used by the catalog store and the engine.
///
/// Implementations may be a local model or a remote service. They are not
/// required to normalize; the index normalizes on insert and on query.
pub trait Embedder: Send + Sync {
    /// Stable identifier for the provider/model (e.g., `fake:d256`).
    fn id(&self) -> &str;
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;

    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("embedder returned no vector"))
    }
}
