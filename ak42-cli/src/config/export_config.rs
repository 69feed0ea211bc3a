//! Export configuration and checkpoint hyperparameters.

use ak42_format::{DEFAULT_GROUP_SIZE, ModelArgs};
use serde::{Deserialize, Serialize};

/// Configuration for exporting a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Format version: 1 (fp32), 2 (int8) or 3 (int4)
    #[serde(default = "default_version")]
    pub version: i32,

    /// Requested quantization group size, reduced when it does not divide dim
    #[serde(default = "default_group_size")]
    pub group_size: usize,

    /// Prefixes stripped from checkpoint tensor names (e.g. from torch.compile)
    #[serde(default = "default_strip_prefixes")]
    pub strip_prefixes: Vec<String>,

    /// Used when params.json does not set max_seq_len
    #[serde(default = "default_max_seq_len")]
    pub max_seq_len: usize,
}

fn default_version() -> i32 {
    2
}

fn default_group_size() -> usize {
    DEFAULT_GROUP_SIZE
}

fn default_strip_prefixes() -> Vec<String> {
    vec!["_orig_mod.".to_string()]
}

fn default_max_seq_len() -> usize {
    2048
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            group_size: default_group_size(),
            strip_prefixes: default_strip_prefixes(),
            max_seq_len: default_max_seq_len(),
        }
    }
}

impl ExportConfig {
    /// Apply command-line overrides.
    pub fn with_overrides(mut self, version: Option<i32>, group_size: Option<usize>) -> Self {
        if let Some(v) = version {
            self.version = v;
        }
        if let Some(gs) = group_size {
            self.group_size = gs;
        }
        self
    }
}

/// `params.json` shipped next to a checkpoint. Unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamsFile {
    pub dim: usize,
    pub n_layers: usize,
    pub n_heads: usize,
    /// Missing or zero means "same as n_heads".
    #[serde(default)]
    pub n_kv_heads: Option<usize>,
    /// Missing or non-positive means "take it from the embedding".
    #[serde(default)]
    pub vocab_size: Option<i64>,
    #[serde(default)]
    pub max_seq_len: Option<usize>,
}

impl ParamsFile {
    pub fn to_args(&self, embedding_rows: usize, default_max_seq_len: usize) -> ModelArgs {
        let vocab_size = match self.vocab_size {
            Some(v) if v > 0 => v as usize,
            _ => embedding_rows,
        };
        ModelArgs {
            dim: self.dim,
            n_layers: self.n_layers,
            n_heads: self.n_heads,
            n_kv_heads: self.n_kv_heads.filter(|&n| n > 0),
            vocab_size,
            max_seq_len: self.max_seq_len.unwrap_or(default_max_seq_len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== ExportConfig tests ====================

    #[test]
    fn test_export_config_default() {
        let config = ExportConfig::default();
        assert_eq!(config.version, 2);
        assert_eq!(config.group_size, 64);
        assert_eq!(config.strip_prefixes, vec!["_orig_mod."]);
        assert_eq!(config.max_seq_len, 2048);
    }

    #[test]
    fn test_export_config_empty_json_uses_defaults() {
        let config: ExportConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ExportConfig::default());
    }

    #[test]
    fn test_export_config_partial_json() {
        let config: ExportConfig =
            serde_json::from_str(r#"{"version": 3, "strip_prefixes": []}"#).unwrap();
        assert_eq!(config.version, 3);
        assert_eq!(config.group_size, 64);
        assert!(config.strip_prefixes.is_empty());
    }

    #[test]
    fn test_export_config_serialization() {
        let config = ExportConfig {
            version: 1,
            group_size: 32,
            strip_prefixes: vec!["model.".to_string()],
            max_seq_len: 512,
        };
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: ExportConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_overrides() {
        let config = ExportConfig::default().with_overrides(Some(3), None);
        assert_eq!(config.version, 3);
        assert_eq!(config.group_size, 64);

        let config = ExportConfig::default().with_overrides(None, Some(16));
        assert_eq!(config.version, 2);
        assert_eq!(config.group_size, 16);
    }

    // ==================== ParamsFile tests ====================

    #[test]
    fn test_params_ignores_unknown_keys() {
        let json = r#"{
            "dim": 288, "n_layers": 6, "n_heads": 6,
            "multiple_of": 32, "norm_eps": 1e-5, "vocab_size": -1
        }"#;
        let params: ParamsFile = serde_json::from_str(json).unwrap();
        assert_eq!(params.dim, 288);
        assert_eq!(params.n_kv_heads, None);
        assert_eq!(params.vocab_size, Some(-1));
    }

    #[test]
    fn test_params_vocab_derived_from_embedding() {
        let params: ParamsFile =
            serde_json::from_str(r#"{"dim": 8, "n_layers": 1, "n_heads": 2, "vocab_size": -1}"#)
                .unwrap();
        let args = params.to_args(32000, 2048);
        assert_eq!(args.vocab_size, 32000);
        assert_eq!(args.max_seq_len, 2048);
        assert_eq!(args.n_kv_heads(), 2);
    }

    #[test]
    fn test_params_explicit_values_win() {
        let params = ParamsFile {
            dim: 8,
            n_layers: 1,
            n_heads: 2,
            n_kv_heads: Some(1),
            vocab_size: Some(10),
            max_seq_len: Some(256),
        };
        let args = params.to_args(99, 2048);
        assert_eq!(args.vocab_size, 10);
        assert_eq!(args.max_seq_len, 256);
        assert_eq!(args.n_kv_heads(), 1);
    }

    #[test]
    fn test_params_zero_kv_heads_falls_back() {
        let params: ParamsFile =
            serde_json::from_str(r#"{"dim": 8, "n_layers": 1, "n_heads": 2, "n_kv_heads": 0}"#)
                .unwrap();
        let args = params.to_args(10, 2048);
        assert_eq!(args.n_kv_heads, None);
        assert_eq!(args.n_kv_heads(), 2);
    }
}
