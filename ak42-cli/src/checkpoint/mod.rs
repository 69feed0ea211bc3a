//! Safetensors checkpoint loading.
//!
//! A checkpoint is one `.safetensors` file or a directory of model-parallel
//! shards. Shards are read in parallel and merged in file order.

use ak42_format::{LayerWeights, ModelWeights, Tensor, TensorRole};
use anyhow::{Context, Result};
use rayon::prelude::*;
use safetensors::SafeTensors;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::common::{bytes_to_f32, discover_safetensor_files};
use crate::config::export_config::ParamsFile;

pub type TensorMap = BTreeMap<String, Tensor>;

/// Axis along which model-parallel shards of a 2-D tensor are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcatAxis {
    Rows,
    Columns,
}

/// Embedding, attention output and second FFN projection are split by
/// columns; everything else by rows.
pub fn concat_axis(name: &str) -> ConcatAxis {
    if name.starts_with("tok_embeddings.")
        || name.ends_with(TensorRole::Wo.key())
        || name.ends_with(TensorRole::W2.key())
    {
        ConcatAxis::Columns
    } else {
        ConcatAxis::Rows
    }
}

/// Remove the first matching prefix from a tensor name.
pub fn strip_prefix<'a>(name: &'a str, prefixes: &[String]) -> &'a str {
    prefixes
        .iter()
        .find_map(|p| name.strip_prefix(p.as_str()))
        .unwrap_or(name)
}

/// Read every tensor of one safetensors file, widened to f32.
pub fn read_shard(path: &Path, prefixes: &[String]) -> Result<TensorMap> {
    let data = fs::read(path).with_context(|| format!("Failed to read: {}", path.display()))?;
    let st = SafeTensors::deserialize(&data)
        .with_context(|| format!("Failed to parse: {}", path.display()))?;

    let mut tensors = TensorMap::new();
    for (name, view) in st.tensors() {
        let shape = view.shape().to_vec();
        let numel: usize = shape.iter().product();
        let values = bytes_to_f32(view.data(), view.dtype(), numel)
            .with_context(|| format!("Tensor '{}' in {}", name, path.display()))?;
        let key = strip_prefix(&name, prefixes).to_string();
        tensors.insert(key, Tensor::new(shape, values)?);
    }

    debug!(path = %path.display(), tensors = tensors.len(), "read shard");
    Ok(tensors)
}

/// Join 2-D pieces along `axis`.
pub fn concat(pieces: &[Tensor], axis: ConcatAxis) -> Result<Tensor> {
    let mut dims = Vec::with_capacity(pieces.len());
    for p in pieces {
        match *p.shape() {
            [rows, cols] => dims.push((rows, cols)),
            ref other => anyhow::bail!("Cannot concatenate tensor of shape {:?}", other),
        }
    }
    let Some(&(rows, cols)) = dims.first() else {
        anyhow::bail!("Nothing to concatenate");
    };

    match axis {
        ConcatAxis::Rows => {
            if let Some(&(_, c)) = dims.iter().find(|(_, c)| *c != cols) {
                anyhow::bail!("Row concat needs equal columns, got {} and {}", cols, c);
            }
            let total_rows = dims.iter().map(|(r, _)| r).sum();
            let data = pieces.iter().flat_map(|p| p.data().iter().copied()).collect();
            Ok(Tensor::new(vec![total_rows, cols], data)?)
        }
        ConcatAxis::Columns => {
            if let Some(&(r, _)) = dims.iter().find(|(r, _)| *r != rows) {
                anyhow::bail!("Column concat needs equal rows, got {} and {}", rows, r);
            }
            let total_cols: usize = dims.iter().map(|(_, c)| c).sum();
            let mut data = Vec::with_capacity(rows * total_cols);
            for r in 0..rows {
                for (p, &(_, c)) in pieces.iter().zip(&dims) {
                    data.extend_from_slice(&p.data()[r * c..(r + 1) * c]);
                }
            }
            Ok(Tensor::new(vec![rows, total_cols], data)?)
        }
    }
}

/// Merge model-parallel shards. Names come from the first shard; 1-D
/// tensors are replicated across shards and taken from the first.
pub fn merge_shards(shards: Vec<TensorMap>) -> Result<TensorMap> {
    let mut shards = shards.into_iter();
    let Some(first) = shards.next() else {
        anyhow::bail!("No shards to merge");
    };
    let mut rest: Vec<TensorMap> = shards.collect();
    if rest.is_empty() {
        return Ok(first);
    }

    let mut merged = TensorMap::new();
    for (name, tensor) in first {
        if tensor.shape().len() == 1 {
            merged.insert(name, tensor);
            continue;
        }
        let mut pieces = vec![tensor];
        for (i, shard) in rest.iter_mut().enumerate() {
            let piece = shard
                .remove(&name)
                .with_context(|| format!("Tensor '{}' missing from shard {}", name, i + 1))?;
            pieces.push(piece);
        }
        let joined = concat(&pieces, concat_axis(&name))
            .with_context(|| format!("Failed to merge '{}'", name))?;
        merged.insert(name, joined);
    }
    Ok(merged)
}

/// Load and merge all tensors under `path`.
pub fn load_tensors(path: &Path, prefixes: &[String]) -> Result<TensorMap> {
    let files = discover_safetensor_files(path)?;
    info!(files = files.len(), path = %path.display(), "loading checkpoint");

    let shards = files
        .par_iter()
        .map(|f| read_shard(f, prefixes))
        .collect::<Result<Vec<_>>>()?;
    merge_shards(shards)
}

fn take(tensors: &mut TensorMap, role: TensorRole, layer: Option<usize>) -> Result<Tensor> {
    let name = role.tensor_name(layer);
    tensors
        .remove(&name)
        .with_context(|| format!("Missing tensor in checkpoint: {}", name))
}

/// Assemble a model from named tensors. A missing `output.weight` means
/// the classifier is tied to the embedding.
pub fn build_model(
    mut tensors: TensorMap,
    params: &ParamsFile,
    default_max_seq_len: usize,
) -> Result<ModelWeights> {
    let tok_embeddings = take(&mut tensors, TensorRole::TokenEmbedding, None)?;
    let norm = take(&mut tensors, TensorRole::FinalNorm, None)?;

    let mut layers = Vec::with_capacity(params.n_layers);
    for i in 0..params.n_layers {
        let l = Some(i);
        layers.push(LayerWeights {
            attention_norm: take(&mut tensors, TensorRole::AttentionNorm, l)?,
            ffn_norm: take(&mut tensors, TensorRole::FfnNorm, l)?,
            wq: take(&mut tensors, TensorRole::Wq, l)?,
            wk: take(&mut tensors, TensorRole::Wk, l)?,
            wv: take(&mut tensors, TensorRole::Wv, l)?,
            wo: take(&mut tensors, TensorRole::Wo, l)?,
            w1: take(&mut tensors, TensorRole::W1, l)?,
            w2: take(&mut tensors, TensorRole::W2, l)?,
            w3: take(&mut tensors, TensorRole::W3, l)?,
        });
    }

    let output = match tensors.remove(TensorRole::Output.key()) {
        Some(t) => t,
        None => {
            info!("no output.weight in checkpoint, tying classifier to embedding");
            tok_embeddings.clone()
        }
    };

    if !tensors.is_empty() {
        debug!(unused = ?tensors.keys().collect::<Vec<_>>(), "ignoring tensors");
    }

    let embedding_rows = tok_embeddings.shape().first().copied().unwrap_or(0);
    Ok(ModelWeights {
        args: params.to_args(embedding_rows, default_max_seq_len),
        tok_embeddings,
        layers,
        norm,
        output,
    })
}
