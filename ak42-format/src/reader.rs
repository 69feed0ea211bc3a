//! Companion reader for ak42 files.
//!
//! Decodes a file back into [`ModelWeights`], dequantizing int8/int4
//! payloads. Tensor sizes come from the header and the fixed ordering.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{Error, Result};
use crate::formats::{ExportHeader, FormatVersion};
use crate::model::{LayerWeights, ModelParams, ModelWeights, Tensor, TensorRole};
use crate::ordering::{TensorSlot, norm_slots, weight_slots};
use crate::quant::{QuantCodec, dequantize};
use crate::tensor_io;

/// Read and validate the 256-byte header.
pub fn read_header<R: Read>(r: &mut R) -> Result<ExportHeader> {
    ExportHeader::read_from(r)
}

/// Decode a whole model from a reader positioned at byte 0.
///
/// Header counts are untrusted: tensor sizes are computed with checked
/// arithmetic and storage grows only as payload bytes actually arrive.
pub fn read_model<R: Read>(r: &mut R) -> Result<(ExportHeader, ModelWeights)> {
    let header = read_header(r)?;
    let params = header.params;
    if params.dim == 0 {
        return Err(Error::InvalidHeader("dim is zero".to_string()));
    }

    let mut slots = DecodedSlots::default();
    for slot in norm_slots(params.n_layers) {
        let numel = payload_numel(&slot, &params)?;
        let data = tensor_io::read_f32(r, numel)?;
        slots.insert(slot, Tensor::new(slot.shape(&params), data)?)?;
    }

    let codec = match header.version {
        FormatVersion::V1 => None,
        FormatVersion::V2 => Some(QuantCodec::Q8_0),
        FormatVersion::V3 => Some(QuantCodec::Q4_0),
    };
    for slot in weight_slots(params.n_layers, header.shared_classifier) {
        let numel = payload_numel(&slot, &params)?;
        let data = match (codec, header.group_size) {
            (Some(codec), Some(group_size)) => {
                if !numel.is_multiple_of(group_size) {
                    return Err(Error::GroupMisaligned {
                        name: slot.name(),
                        numel,
                        group_size,
                    });
                }
                let (values, scales) = tensor_io::read_quantized(r, codec, numel, group_size)?;
                dequantize(&values, &scales, group_size)
            }
            _ => tensor_io::read_f32(r, numel)?,
        };
        slots.insert(slot, Tensor::new(slot.shape(&params), data)?)?;
    }

    let model = slots.assemble(&params, header.shared_classifier)?;
    Ok((header, model))
}

/// Open and decode a model file.
pub fn read_model_file(path: impl AsRef<Path>) -> Result<(ExportHeader, ModelWeights)> {
    let mut reader = BufReader::new(File::open(path)?);
    read_model(&mut reader)
}

/// Element count of a slot whose fp32 byte size also fits in `usize`.
fn payload_numel(slot: &TensorSlot, params: &ModelParams) -> Result<usize> {
    slot.checked_numel(params)
        .filter(|n| n.checked_mul(4).is_some())
        .ok_or_else(|| {
            Error::InvalidHeader(format!("{} shape {:?} overflows", slot.name(), slot.shape(params)))
        })
}

/// Tensors decoded so far, keyed by their slot.
#[derive(Default)]
struct DecodedSlots {
    globals: [Option<Tensor>; 3],
    per_layer: Vec<[Option<Tensor>; 9]>,
}

impl DecodedSlots {
    fn insert(&mut self, slot: TensorSlot, tensor: Tensor) -> Result<()> {
        let name = slot.name();
        let cell = match (slot.role, slot.layer) {
            (TensorRole::TokenEmbedding, _) => &mut self.globals[0],
            (TensorRole::FinalNorm, _) => &mut self.globals[1],
            (TensorRole::Output, _) => &mut self.globals[2],
            (role, Some(i)) => {
                let idx = layer_index(role).ok_or_else(|| invalid(&name))?;
                // Attention norms arrive first, one per layer in order
                if i == self.per_layer.len() && role == TensorRole::AttentionNorm {
                    self.per_layer.push(Default::default());
                }
                let layer = self.per_layer.get_mut(i).ok_or_else(|| invalid(&name))?;
                &mut layer[idx]
            }
            (_, None) => return Err(invalid(&name)),
        };
        *cell = Some(tensor);
        Ok(())
    }

    /// Build the model, cloning the embedding as the classifier when it is
    /// shared.
    fn assemble(self, params: &ModelParams, shared_classifier: bool) -> Result<ModelWeights> {
        if self.per_layer.len() != params.n_layers {
            return Err(Error::LayerCountMismatch {
                expected: params.n_layers,
                actual: self.per_layer.len(),
            });
        }

        let [tok_embeddings, norm, output] = self.globals;
        let tok_embeddings = tok_embeddings.ok_or_else(|| invalid("tok_embeddings.weight"))?;
        let norm = norm.ok_or_else(|| invalid("norm.weight"))?;
        let output = match output {
            Some(t) => t,
            None if shared_classifier => tok_embeddings.clone(),
            None => return Err(invalid("output.weight")),
        };

        let layers = self
            .per_layer
            .into_iter()
            .map(|cells| {
                let [an, fn_, wq, wk, wv, wo, w1, w2, w3] = cells.map(|c| c.ok_or_else(|| invalid("layer")));
                Ok(LayerWeights {
                    attention_norm: an?,
                    ffn_norm: fn_?,
                    wq: wq?,
                    wk: wk?,
                    wv: wv?,
                    wo: wo?,
                    w1: w1?,
                    w2: w2?,
                    w3: w3?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ModelWeights {
            args: params.to_args(),
            tok_embeddings,
            layers,
            norm,
            output,
        })
    }
}

fn layer_index(role: TensorRole) -> Option<usize> {
    let idx = match role {
        TensorRole::AttentionNorm => 0,
        TensorRole::FfnNorm => 1,
        TensorRole::Wq => 2,
        TensorRole::Wk => 3,
        TensorRole::Wv => 4,
        TensorRole::Wo => 5,
        TensorRole::W1 => 6,
        TensorRole::W2 => 7,
        TensorRole::W3 => 8,
        _ => return None,
    };
    Some(idx)
}

fn invalid(name: &str) -> Error {
    Error::InvalidHeader(format!("layout has no slot for {name}"))
}
