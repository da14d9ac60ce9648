//! Makes sure the model and voice files exist on disk, downloading them once
//! when they are missing.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;

use crate::config::EngineConfig;
use crate::error::TtsError;

/// Ensures the files an [`EngineConfig`] points at are present locally.
pub struct ModelProvisioner {
    model_dir: PathBuf,
    files: Vec<String>,
    base_url: String,
    local_only: bool,
    expected_sizes: HashMap<String, u64>,
}

impl ModelProvisioner {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            model_dir: config.model_dir.clone(),
            files: vec![config.model_file.clone(), config.voices_file.clone()],
            base_url: config.download_base_url.trim_end_matches('/').to_string(),
            local_only: config.local_only,
            expected_sizes: config.expected_sizes.clone(),
        }
    }

    /// Check for every required file, fetching the missing ones.
    ///
    /// Files already on disk are never re-downloaded. A failed download leaves
    /// no partial file at the final path.
    pub fn ensure_model_present(&self) -> Result<(), TtsError> {
        let missing: Vec<&str> = self
            .files
            .iter()
            .map(String::as_str)
            .filter(|name| !self.model_dir.join(name).is_file())
            .collect();
        if missing.is_empty() {
            log::debug!("Model files present in {}", self.model_dir.display());
            return Ok(());
        }

        if self.local_only {
            return Err(TtsError::ModelMissing(self.model_dir.join(missing[0])));
        }

        fs::create_dir_all(&self.model_dir)?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        for name in missing {
            let url = format!("{}/{name}", self.base_url);
            log::info!("Downloading {name} from {url}");
            self.download_file(&client, &url, name)?;
            log::info!("Downloaded {name}");
        }
        Ok(())
    }

    fn download_file(&self, client: &Client, url: &str, name: &str) -> Result<(), TtsError> {
        let dest = self.model_dir.join(name);
        let temp_path = dest.with_extension("part");
        let result = (|| -> Result<(), TtsError> {
            let mut response = client
                .get(url)
                .send()
                .and_then(|r| r.error_for_status())
                .map_err(|e| TtsError::Download {
                    file: name.to_string(),
                    reason: e.to_string(),
                })?;

            let expected = self
                .expected_sizes
                .get(name)
                .copied()
                .or_else(|| response.content_length());

            let mut file = File::create(&temp_path)?;
            let written = io::copy(&mut response, &mut file)?;
            file.flush()?;
            drop(file);

            verify_length(name, expected, written)?;
            fs::rename(&temp_path, &dest)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }
}

fn verify_length(name: &str, expected: Option<u64>, actual: u64) -> Result<(), TtsError> {
    match expected {
        Some(expected) if expected != actual => Err(TtsError::IntegrityMismatch {
            file: name.to_string(),
            expected,
            actual,
        }),
        None if actual == 0 => Err(TtsError::Download {
            file: name.to_string(),
            reason: "server returned an empty body".to_string(),
        }),
        _ => Ok(()),
    }
}

/// File names of the `.onnx` models in `dir`, sorted.
pub fn list_models(dir: &Path) -> Result<Vec<String>, TtsError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut models = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("onnx") {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                models.push(name.to_string());
            }
        }
    }
    models.sort();
    Ok(models)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfigBuilder;

    fn config_for(dir: &Path, local_only: bool) -> EngineConfig {
        EngineConfigBuilder::default()
            .model_dir(dir)
            .local_only(local_only)
            .download_base_url("http://127.0.0.1:9/unreachable")
            .build()
            .unwrap()
    }

    #[test]
    fn local_only_reports_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = ModelProvisioner::from_config(&config_for(dir.path(), true));
        let err = provisioner.ensure_model_present().unwrap_err();
        assert!(
            matches!(err, TtsError::ModelMissing(ref path) if path.ends_with("kokoro-v1.0.fp16.onnx"))
        );
    }

    #[test]
    fn present_files_are_not_fetched() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("kokoro-v1.0.fp16.onnx"), b"onnx").unwrap();
        fs::write(dir.path().join("voices-v1.0.bin"), b"npz").unwrap();

        // The base URL is unreachable, so success proves nothing was downloaded.
        let provisioner = ModelProvisioner::from_config(&config_for(dir.path(), false));
        provisioner.ensure_model_present().unwrap();
    }

    #[test]
    fn failed_download_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("voices-v1.0.bin"), b"npz").unwrap();

        let provisioner = ModelProvisioner::from_config(&config_for(dir.path(), false));
        assert!(provisioner.ensure_model_present().is_err());
        assert!(!dir.path().join("kokoro-v1.0.fp16.onnx").exists());
        assert!(!dir.path().join("kokoro-v1.0.fp16.part").exists());
    }

    #[test]
    fn length_mismatch_is_an_integrity_error() {
        assert!(verify_length("model.onnx", Some(10), 10).is_ok());
        assert!(verify_length("model.onnx", None, 10).is_ok());
        assert!(matches!(
            verify_length("model.onnx", Some(10), 7),
            Err(TtsError::IntegrityMismatch {
                expected: 10,
                actual: 7,
                ..
            })
        ));
        assert!(matches!(
            verify_length("model.onnx", None, 0),
            Err(TtsError::Download { .. })
        ));
    }

    #[test]
    fn lists_onnx_models_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["kokoro-v1.0.onnx", "voices-v1.0.bin", "kokoro-v1.0.int8.onnx"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        assert_eq!(
            list_models(dir.path()).unwrap(),
            vec!["kokoro-v1.0.int8.onnx", "kokoro-v1.0.onnx"]
        );
        assert!(list_models(&dir.path().join("missing")).unwrap().is_empty());
    }
}
