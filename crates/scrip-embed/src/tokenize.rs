use anyhow::{Result, anyhow};
use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

/// XLM-RoBERTa pad token id.
pub const PAD_ID: u32 = 1;

/// `[batch, seq_len]` id and mask tensors, padded to the longest row.
pub struct EncodedBatch {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    pub seq_len: usize,
}

/// Tokenize `texts`, truncating each to `max_len` tokens and right-padding
/// the batch to its longest row.
pub fn encode_batch(tokenizer: &Tokenizer, texts: &[String], max_len: usize, device: &Device) -> Result<EncodedBatch> {
    let mut rows = Vec::with_capacity(texts.len());
    for text in texts {
        let enc = tokenizer.encode(text.as_str(), true).map_err(|e| anyhow!("Tokenization failed: {}", e))?;
        let n = enc.get_ids().len().min(max_len);
        rows.push((enc.get_ids()[..n].to_vec(), enc.get_attention_mask()[..n].to_vec()));
    }
    let seq_len = rows.iter().map(|(ids, _)| ids.len()).max().unwrap_or(0).max(1);

    let mut ids = Vec::with_capacity(rows.len() * seq_len);
    let mut mask = Vec::with_capacity(rows.len() * seq_len);
    for (row_ids, row_mask) in rows {
        let pad = seq_len - row_ids.len();
        ids.extend(row_ids);
        ids.extend(std::iter::repeat(PAD_ID).take(pad));
        mask.extend(row_mask);
        mask.extend(std::iter::repeat(0u32).take(pad));
    }
    let input_ids = Tensor::from_vec(ids, (texts.len(), seq_len), device)?;
    let attention_mask = Tensor::from_vec(mask, (texts.len(), seq_len), device)?;
    Ok(EncodedBatch { input_ids, attention_mask, seq_len })
}
