//! In-memory transformer weights handed to the exporter.
//!
//! Tensors are plain owned `f32` buffers with a row-major shape. The
//! exporter only ever borrows them read-only.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Dense row-major `f32` tensor.
///
/// Equality is element-wise `f32` equality plus identical shape, so a
/// tensor holding NaN never equals another tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Create a tensor, checking the buffer length against the shape.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            return Err(Error::BufferLength {
                len: data.len(),
                shape,
            });
        }
        Ok(Self { shape, data })
    }

    /// Create a tensor by evaluating `f` at every flat index.
    pub fn from_fn(shape: Vec<usize>, f: impl FnMut(usize) -> f32) -> Self {
        let numel: usize = shape.iter().product();
        let data = (0..numel).map(f).collect();
        Self { shape, data }
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::from_fn(shape, |_| 0.0)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Flat row-major view of the elements.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }
}

/// Hyperparameters as configured for the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelArgs {
    pub dim: usize,
    pub n_layers: usize,
    pub n_heads: usize,
    /// Defaults to `n_heads` (no grouped-query attention) when absent.
    #[serde(default)]
    pub n_kv_heads: Option<usize>,
    pub vocab_size: usize,
    pub max_seq_len: usize,
}

impl ModelArgs {
    pub fn n_kv_heads(&self) -> usize {
        self.n_kv_heads.unwrap_or(self.n_heads)
    }
}

/// The seven integers written to the file header, fully resolved.
///
/// Field order is the on-disk order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelParams {
    pub dim: usize,
    pub hidden_dim: usize,
    pub n_layers: usize,
    pub n_heads: usize,
    pub n_kv_heads: usize,
    pub vocab_size: usize,
    pub max_seq_len: usize,
}

impl ModelParams {
    /// Row count of the key/value projections.
    pub fn kv_dim(&self) -> usize {
        if self.n_heads == 0 {
            return 0;
        }
        self.dim * self.n_kv_heads / self.n_heads
    }

    /// Fields paired with their header names, in on-disk order.
    pub fn fields(&self) -> [(&'static str, usize); 7] {
        [
            ("dim", self.dim),
            ("hidden_dim", self.hidden_dim),
            ("n_layers", self.n_layers),
            ("n_heads", self.n_heads),
            ("n_kv_heads", self.n_kv_heads),
            ("vocab_size", self.vocab_size),
            ("max_seq_len", self.max_seq_len),
        ]
    }

    pub fn to_args(&self) -> ModelArgs {
        ModelArgs {
            dim: self.dim,
            n_layers: self.n_layers,
            n_heads: self.n_heads,
            n_kv_heads: Some(self.n_kv_heads),
            vocab_size: self.vocab_size,
            max_seq_len: self.max_seq_len,
        }
    }
}

/// Role of a tensor within the transformer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TensorRole {
    AttentionNorm,
    FfnNorm,
    FinalNorm,
    TokenEmbedding,
    Wq,
    Wk,
    Wv,
    Wo,
    W1,
    W2,
    W3,
    Output,
}

impl TensorRole {
    /// Checkpoint key without the `layers.{i}.` prefix.
    pub fn key(self) -> &'static str {
        match self {
            Self::AttentionNorm => "attention_norm.weight",
            Self::FfnNorm => "ffn_norm.weight",
            Self::FinalNorm => "norm.weight",
            Self::TokenEmbedding => "tok_embeddings.weight",
            Self::Wq => "attention.wq.weight",
            Self::Wk => "attention.wk.weight",
            Self::Wv => "attention.wv.weight",
            Self::Wo => "attention.wo.weight",
            Self::W1 => "feed_forward.w1.weight",
            Self::W2 => "feed_forward.w2.weight",
            Self::W3 => "feed_forward.w3.weight",
            Self::Output => "output.weight",
        }
    }

    pub fn is_per_layer(self) -> bool {
        !matches!(self, Self::FinalNorm | Self::TokenEmbedding | Self::Output)
    }

    /// Norm weights stay fp32 in every format version.
    pub fn is_norm(self) -> bool {
        matches!(self, Self::AttentionNorm | Self::FfnNorm | Self::FinalNorm)
    }

    /// Full checkpoint name, e.g. `layers.3.attention.wq.weight`.
    pub fn tensor_name(self, layer: Option<usize>) -> String {
        match layer {
            Some(i) if self.is_per_layer() => format!("layers.{}.{}", i, self.key()),
            _ => self.key().to_string(),
        }
    }

    /// Shape the reader assumes for this role.
    pub fn expected_shape(self, p: &ModelParams) -> Vec<usize> {
        match self {
            Self::AttentionNorm | Self::FfnNorm | Self::FinalNorm => vec![p.dim],
            Self::TokenEmbedding | Self::Output => vec![p.vocab_size, p.dim],
            Self::Wq | Self::Wo => vec![p.dim, p.dim],
            Self::Wk | Self::Wv => vec![p.kv_dim(), p.dim],
            Self::W1 | Self::W3 => vec![p.hidden_dim, p.dim],
            Self::W2 => vec![p.dim, p.hidden_dim],
        }
    }
}

/// Weights of one transformer block.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerWeights {
    pub attention_norm: Tensor,
    pub ffn_norm: Tensor,
    pub wq: Tensor,
    pub wk: Tensor,
    pub wv: Tensor,
    pub wo: Tensor,
    pub w1: Tensor,
    pub w2: Tensor,
    pub w3: Tensor,
}

impl LayerWeights {
    pub fn get(&self, role: TensorRole) -> Option<&Tensor> {
        match role {
            TensorRole::AttentionNorm => Some(&self.attention_norm),
            TensorRole::FfnNorm => Some(&self.ffn_norm),
            TensorRole::Wq => Some(&self.wq),
            TensorRole::Wk => Some(&self.wk),
            TensorRole::Wv => Some(&self.wv),
            TensorRole::Wo => Some(&self.wo),
            TensorRole::W1 => Some(&self.w1),
            TensorRole::W2 => Some(&self.w2),
            TensorRole::W3 => Some(&self.w3),
            TensorRole::FinalNorm | TensorRole::TokenEmbedding | TensorRole::Output => None,
        }
    }
}

/// Complete weight set of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelWeights {
    pub args: ModelArgs,
    pub tok_embeddings: Tensor,
    pub layers: Vec<LayerWeights>,
    pub norm: Tensor,
    pub output: Tensor,
}

impl ModelWeights {
    /// Look up a tensor by role and, for per-layer roles, layer index.
    pub fn tensor(&self, role: TensorRole, layer: Option<usize>) -> Option<&Tensor> {
        match role {
            TensorRole::FinalNorm => Some(&self.norm),
            TensorRole::TokenEmbedding => Some(&self.tok_embeddings),
            TensorRole::Output => Some(&self.output),
            _ => self.layers.get(layer?)?.get(role),
        }
    }

    /// Resolve header parameters.
    ///
    /// `hidden_dim` is read from the first layer's `w1` rows, not from
    /// any stored hyperparameter.
    pub fn params(&self) -> Result<ModelParams> {
        let first = self.layers.first().ok_or(Error::MissingLayers)?;
        let hidden_dim = first.w1.shape().first().copied().unwrap_or(0);
        Ok(ModelParams {
            dim: self.args.dim,
            hidden_dim,
            n_layers: self.args.n_layers,
            n_heads: self.args.n_heads,
            n_kv_heads: self.args.n_kv_heads(),
            vocab_size: self.args.vocab_size,
            max_seq_len: self.args.max_seq_len,
        })
    }

    /// Embedding and classifier are element-wise identical.
    pub fn shared_classifier(&self) -> bool {
        self.tok_embeddings == self.output
    }

    /// Check every tensor against the shape the reader will assume.
    pub fn validate(&self, params: &ModelParams) -> Result<()> {
        if self.layers.len() != params.n_layers {
            return Err(Error::LayerCountMismatch {
                expected: params.n_layers,
                actual: self.layers.len(),
            });
        }

        let globals = [
            TensorRole::TokenEmbedding,
            TensorRole::FinalNorm,
            TensorRole::Output,
        ];
        for role in globals {
            if let Some(t) = self.tensor(role, None) {
                check_shape(role, None, t, params)?;
            }
        }

        for (i, layer) in self.layers.iter().enumerate() {
            for role in PER_LAYER_ROLES {
                if let Some(t) = layer.get(role) {
                    check_shape(role, Some(i), t, params)?;
                }
            }
        }
        Ok(())
    }
}

const PER_LAYER_ROLES: [TensorRole; 9] = [
    TensorRole::AttentionNorm,
    TensorRole::FfnNorm,
    TensorRole::Wq,
    TensorRole::Wk,
    TensorRole::Wv,
    TensorRole::Wo,
    TensorRole::W1,
    TensorRole::W2,
    TensorRole::W3,
];

fn check_shape(
    role: TensorRole,
    layer: Option<usize>,
    tensor: &Tensor,
    params: &ModelParams,
) -> Result<()> {
    let expected = role.expected_shape(params);
    if tensor.shape() != expected.as_slice() {
        return Err(Error::ShapeMismatch {
            name: role.tensor_name(layer),
            expected,
            actual: tensor.shape().to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_layer(dim: usize, hidden: usize) -> LayerWeights {
        LayerWeights {
            attention_norm: Tensor::zeros(vec![dim]),
            ffn_norm: Tensor::zeros(vec![dim]),
            wq: Tensor::zeros(vec![dim, dim]),
            wk: Tensor::zeros(vec![dim, dim]),
            wv: Tensor::zeros(vec![dim, dim]),
            wo: Tensor::zeros(vec![dim, dim]),
            w1: Tensor::zeros(vec![hidden, dim]),
            w2: Tensor::zeros(vec![dim, hidden]),
            w3: Tensor::zeros(vec![hidden, dim]),
        }
    }

    fn tiny_model() -> ModelWeights {
        ModelWeights {
            args: ModelArgs {
                dim: 4,
                n_layers: 1,
                n_heads: 2,
                n_kv_heads: None,
                vocab_size: 6,
                max_seq_len: 16,
            },
            tok_embeddings: Tensor::from_fn(vec![6, 4], |i| i as f32),
            layers: vec![tiny_layer(4, 12)],
            norm: Tensor::zeros(vec![4]),
            output: Tensor::from_fn(vec![6, 4], |i| -(i as f32)),
        }
    }

    // ==================== Tensor tests ====================

    #[test]
    fn test_tensor_new_checks_length() {
        assert!(Tensor::new(vec![2, 3], vec![0.0; 6]).is_ok());
        let err = Tensor::new(vec![2, 3], vec![0.0; 5]).unwrap_err();
        assert!(matches!(err, Error::BufferLength { len: 5, .. }));
    }

    #[test]
    fn test_tensor_equality_is_exact() {
        let a = Tensor::from_fn(vec![2, 2], |i| i as f32);
        let mut data = a.data().to_vec();
        assert_eq!(a, Tensor::new(vec![2, 2], data.clone()).unwrap());

        data[3] += 1e-6;
        assert_ne!(a, Tensor::new(vec![2, 2], data).unwrap());

        // Same elements, different shape
        assert_ne!(a, Tensor::from_fn(vec![4], |i| i as f32));
    }

    #[test]
    fn test_tensor_nan_never_equal() {
        let a = Tensor::new(vec![1], vec![f32::NAN]).unwrap();
        assert_ne!(a, a.clone());
    }

    // ==================== TensorRole tests ====================

    #[test]
    fn test_tensor_names() {
        assert_eq!(TensorRole::Wq.tensor_name(Some(3)), "layers.3.attention.wq.weight");
        assert_eq!(TensorRole::W2.tensor_name(Some(0)), "layers.0.feed_forward.w2.weight");
        assert_eq!(TensorRole::AttentionNorm.tensor_name(Some(1)), "layers.1.attention_norm.weight");
        assert_eq!(TensorRole::FinalNorm.tensor_name(None), "norm.weight");
        assert_eq!(TensorRole::Output.tensor_name(Some(5)), "output.weight");
    }

    #[test]
    fn test_expected_shapes_with_gqa() {
        let p = ModelParams {
            dim: 16,
            hidden_dim: 40,
            n_layers: 2,
            n_heads: 4,
            n_kv_heads: 2,
            vocab_size: 32,
            max_seq_len: 64,
        };
        assert_eq!(p.kv_dim(), 8);
        assert_eq!(TensorRole::Wk.expected_shape(&p), vec![8, 16]);
        assert_eq!(TensorRole::Wq.expected_shape(&p), vec![16, 16]);
        assert_eq!(TensorRole::W2.expected_shape(&p), vec![16, 40]);
        assert_eq!(TensorRole::Output.expected_shape(&p), vec![32, 16]);
        assert_eq!(TensorRole::FfnNorm.expected_shape(&p), vec![16]);
    }

    // ==================== ModelWeights tests ====================

    #[test]
    fn test_params_derive_hidden_dim_from_w1() {
        let model = tiny_model();
        let p = model.params().unwrap();
        assert_eq!(p.hidden_dim, 12);
        assert_eq!(p.n_kv_heads, 2); // defaults to n_heads
        assert!(model.validate(&p).is_ok());
    }

    #[test]
    fn test_params_without_layers() {
        let mut model = tiny_model();
        model.layers.clear();
        assert!(matches!(model.params(), Err(Error::MissingLayers)));
    }

    #[test]
    fn test_validate_rejects_wrong_shape() {
        let mut model = tiny_model();
        model.layers[0].wo = Tensor::zeros(vec![4, 5]);
        let p = model.params().unwrap();
        match model.validate(&p) {
            Err(Error::ShapeMismatch { name, expected, actual }) => {
                assert_eq!(name, "layers.0.attention.wo.weight");
                assert_eq!(expected, vec![4, 4]);
                assert_eq!(actual, vec![4, 5]);
            }
            other => panic!("expected ShapeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_layer_count() {
        let mut model = tiny_model();
        model.args.n_layers = 2;
        let p = model.params().unwrap();
        assert!(matches!(
            model.validate(&p),
            Err(Error::LayerCountMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_shared_classifier_detection() {
        let mut model = tiny_model();
        assert!(!model.shared_classifier());
        model.output = model.tok_embeddings.clone();
        assert!(model.shared_classifier());
    }

    #[test]
    fn test_args_roundtrip_json() {
        let json = r#"{"dim": 8, "n_layers": 2, "n_heads": 2, "vocab_size": 10, "max_seq_len": 32}"#;
        let args: ModelArgs = serde_json::from_str(json).unwrap();
        assert_eq!(args.n_kv_heads, None);
        assert_eq!(args.n_kv_heads(), 2);
    }
}
