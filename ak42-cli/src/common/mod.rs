//! Common utilities shared between the export and inspect commands.

pub mod progress;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

/// Discover safetensor files from a path (file or directory).
pub fn discover_safetensor_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        match path.extension().and_then(|s| s.to_str()) {
            Some("safetensors") => Ok(vec![path.to_path_buf()]),
            _ => anyhow::bail!("Expected .safetensors file, got: {}", path.display()),
        }
    } else if path.is_dir() {
        let mut files: Vec<PathBuf> = fs::read_dir(path)
            .with_context(|| format!("Failed to read directory: {}", path.display()))?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("safetensors"))
            .collect();

        if files.is_empty() {
            anyhow::bail!("No .safetensors files found in: {}", path.display());
        }
        files.sort_unstable();
        Ok(files)
    } else {
        anyhow::bail!("Path does not exist: {}", path.display())
    }
}

/// Load a JSON config file, falling back to defaults when no path is given.
pub fn load_config<T: DeserializeOwned + Default>(config_path: Option<&str>) -> Result<T> {
    match config_path {
        Some(path) => load_json(Path::new(path)),
        None => Ok(T::default()),
    }
}

/// Read and parse a JSON file.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read: {}", path.display()))?;

    serde_json::from_str(&json).with_context(|| format!("Failed to parse: {}", path.display()))
}

/// Convert raw little-endian bytes to f32 based on dtype.
pub fn bytes_to_f32(data: &[u8], dtype: safetensors::Dtype, count: usize) -> Result<Vec<f32>> {
    use safetensors::Dtype;

    let width = match dtype {
        Dtype::F32 => 4,
        Dtype::F16 | Dtype::BF16 => 2,
        _ => anyhow::bail!("Unsupported dtype: {:?}. Only F32, F16, BF16 supported.", dtype),
    };
    if data.len() != count * width {
        anyhow::bail!(
            "{:?} size mismatch: expected {} bytes, got {}",
            dtype,
            count * width,
            data.len()
        );
    }

    let values = match dtype {
        Dtype::F32 => data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        Dtype::F16 => data
            .chunks_exact(2)
            .map(|c| half::f16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect(),
        _ => data
            .chunks_exact(2)
            .map(|c| half::bf16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect(),
    };
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use safetensors::Dtype;
    use tempfile::TempDir;

    // ==================== discover_safetensor_files tests ====================

    #[test]
    fn test_discover_single_safetensor_file() {
        let dir = TempDir::new().unwrap();
        let file_path = dir.path().join("model.safetensors");
        fs::File::create(&file_path).unwrap();

        let result = discover_safetensor_files(&file_path).unwrap();
        assert_eq!(result, vec![file_path]);
    }

    #[test]
    fn test_discover_rejects_non_safetensor_file() {
        let dir = TempDir::new().unwrap();
        let file_path = dir.path().join("consolidated.00.pth");
        fs::File::create(&file_path).unwrap();

        let result = discover_safetensor_files(&file_path);
        assert!(result.unwrap_err().to_string().contains("Expected .safetensors file"));
    }

    #[test]
    fn test_discover_directory_sorted() {
        let dir = TempDir::new().unwrap();
        fs::File::create(dir.path().join("consolidated.01.safetensors")).unwrap();
        fs::File::create(dir.path().join("consolidated.00.safetensors")).unwrap();
        fs::File::create(dir.path().join("params.json")).unwrap(); // ignored

        let result = discover_safetensor_files(dir.path()).unwrap();
        assert_eq!(result.len(), 2);
        assert!(result[0].to_string_lossy().ends_with("00.safetensors"));
        assert!(result[1].to_string_lossy().ends_with("01.safetensors"));
    }

    #[test]
    fn test_discover_empty_directory_fails() {
        let dir = TempDir::new().unwrap();
        let result = discover_safetensor_files(dir.path());
        assert!(result.unwrap_err().to_string().contains("No .safetensors files found"));
    }

    #[test]
    fn test_discover_nonexistent_path_fails() {
        let result = discover_safetensor_files(Path::new("/nonexistent/path"));
        assert!(result.unwrap_err().to_string().contains("Path does not exist"));
    }

    // ==================== load_config tests ====================

    #[derive(Debug, Default, serde::Deserialize)]
    struct TestConfig {
        #[serde(default)]
        value: i32,
    }

    #[test]
    fn test_load_config_defaults_without_path() {
        let config: TestConfig = load_config(None).unwrap();
        assert_eq!(config.value, 0);
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"value": 42}"#).unwrap();

        let config: TestConfig = load_config(path.to_str()).unwrap();
        assert_eq!(config.value, 42);
    }

    #[test]
    fn test_load_config_invalid_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();

        let result: Result<TestConfig> = load_config(path.to_str());
        assert!(result.unwrap_err().to_string().contains("Failed to parse"));
    }

    #[test]
    fn test_load_json_missing_file() {
        let result: Result<TestConfig> = load_json(Path::new("/nonexistent/config.json"));
        assert!(result.unwrap_err().to_string().contains("Failed to read"));
    }

    // ==================== bytes_to_f32 tests ====================

    #[test]
    fn test_bytes_to_f32_f32() {
        let bytes: Vec<u8> = [1.5f32, -2.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        assert_eq!(bytes_to_f32(&bytes, Dtype::F32, 2).unwrap(), vec![1.5, -2.0]);
    }

    #[test]
    fn test_bytes_to_f32_f16() {
        let bytes: Vec<u8> = [half::f16::from_f32(0.5), half::f16::from_f32(-3.0)]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        assert_eq!(bytes_to_f32(&bytes, Dtype::F16, 2).unwrap(), vec![0.5, -3.0]);
    }

    #[test]
    fn test_bytes_to_f32_bf16() {
        let bytes: Vec<u8> = half::bf16::from_f32(2.0).to_le_bytes().to_vec();
        assert_eq!(bytes_to_f32(&bytes, Dtype::BF16, 1).unwrap(), vec![2.0]);
    }

    #[test]
    fn test_bytes_to_f32_size_mismatch() {
        let result = bytes_to_f32(&[0u8; 6], Dtype::F32, 2);
        assert!(result.unwrap_err().to_string().contains("size mismatch"));
    }

    #[test]
    fn test_bytes_to_f32_unsupported_dtype() {
        let result = bytes_to_f32(&[0u8; 4], Dtype::I32, 1);
        assert!(result.unwrap_err().to_string().contains("Unsupported dtype"));
    }
}
