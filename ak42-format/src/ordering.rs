//! Deterministic tensor ordering of the payload.
//!
//! The reader indexes tensors by position, so this order is part of the
//! format: all norm weights first (attention norms across layers, then
//! feed-forward norms, then the final norm), followed by the heavy weights
//! category by category (embedding, wq, wk, wv, wo, w1, w2, w3 each across
//! all layers) and finally the classifier unless it is shared.

use crate::error::{Error, Result};
use crate::model::{ModelParams, ModelWeights, Tensor, TensorRole};

/// Position of one tensor in the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorSlot {
    pub role: TensorRole,
    pub layer: Option<usize>,
}

impl TensorSlot {
    pub fn name(&self) -> String {
        self.role.tensor_name(self.layer)
    }

    pub fn shape(&self, params: &ModelParams) -> Vec<usize> {
        self.role.expected_shape(params)
    }

    pub fn numel(&self, params: &ModelParams) -> usize {
        self.shape(params).iter().product()
    }

    /// Element count, or `None` when the shape overflows `usize`.
    pub fn checked_numel(&self, params: &ModelParams) -> Option<usize> {
        self.shape(params)
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }
}

/// Payload order split into fp32 norms and heavy weights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub norms: Vec<TensorSlot>,
    pub weights: Vec<TensorSlot>,
}

const LAYER_NORMS: [TensorRole; 2] = [TensorRole::AttentionNorm, TensorRole::FfnNorm];

const LAYER_WEIGHTS: [TensorRole; 7] = [
    TensorRole::Wq,
    TensorRole::Wk,
    TensorRole::Wv,
    TensorRole::Wo,
    TensorRole::W1,
    TensorRole::W2,
    TensorRole::W3,
];

fn per_layer<const N: usize>(
    roles: [TensorRole; N],
    n_layers: usize,
) -> impl Iterator<Item = TensorSlot> {
    roles.into_iter().flat_map(move |role| {
        (0..n_layers).map(move |i| TensorSlot {
            role,
            layer: Some(i),
        })
    })
}

fn global(role: TensorRole) -> TensorSlot {
    TensorSlot { role, layer: None }
}

/// Norm slots in file order, generated lazily so a header's layer count
/// never sizes an allocation.
pub fn norm_slots(n_layers: usize) -> impl Iterator<Item = TensorSlot> {
    per_layer(LAYER_NORMS, n_layers).chain(std::iter::once(global(TensorRole::FinalNorm)))
}

/// Heavy weight slots in file order.
pub fn weight_slots(n_layers: usize, shared_classifier: bool) -> impl Iterator<Item = TensorSlot> {
    let output = (!shared_classifier).then(|| global(TensorRole::Output));
    std::iter::once(global(TensorRole::TokenEmbedding))
        .chain(per_layer(LAYER_WEIGHTS, n_layers))
        .chain(output)
}

impl Layout {
    pub fn new(n_layers: usize, shared_classifier: bool) -> Self {
        Self {
            norms: norm_slots(n_layers).collect(),
            weights: weight_slots(n_layers, shared_classifier).collect(),
        }
    }

    /// All slots in file order.
    pub fn iter(&self) -> impl Iterator<Item = &TensorSlot> {
        self.norms.iter().chain(self.weights.iter())
    }

    pub fn len(&self) -> usize {
        self.norms.len() + self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A tensor borrowed from the model together with its position.
#[derive(Debug, Clone, Copy)]
pub struct NamedTensor<'a> {
    pub slot: TensorSlot,
    pub tensor: &'a Tensor,
}

impl NamedTensor<'_> {
    pub fn name(&self) -> String {
        self.slot.name()
    }
}

/// Model tensors resolved in payload order.
#[derive(Debug, Clone)]
pub struct WeightOrdering<'a> {
    pub shared_classifier: bool,
    pub norms: Vec<NamedTensor<'a>>,
    pub weights: Vec<NamedTensor<'a>>,
}

impl<'a> WeightOrdering<'a> {
    pub fn new(model: &'a ModelWeights) -> Result<Self> {
        let shared_classifier = model.shared_classifier();
        let layout = Layout::new(model.layers.len(), shared_classifier);
        let resolve = |slots: &[TensorSlot]| -> Result<Vec<NamedTensor<'a>>> {
            slots
                .iter()
                .map(|&slot| {
                    let tensor = model.tensor(slot.role, slot.layer).ok_or_else(|| {
                        Error::LayerCountMismatch {
                            expected: slot.layer.map_or(0, |i| i + 1),
                            actual: model.layers.len(),
                        }
                    })?;
                    Ok(NamedTensor { slot, tensor })
                })
                .collect()
        };

        Ok(Self {
            shared_classifier,
            norms: resolve(&layout.norms)?,
            weights: resolve(&layout.weights)?,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedTensor<'a>> {
        self.norms.iter().chain(self.weights.iter())
    }

    /// Check every heavy weight divides into whole groups.
    pub fn check_group_alignment(&self, group_size: usize) -> Result<()> {
        for w in &self.weights {
            let numel = w.tensor.numel();
            if !numel.is_multiple_of(group_size) {
                return Err(Error::GroupMisaligned {
                    name: w.name(),
                    numel,
                    group_size,
                });
            }
        }
        Ok(())
    }
}
