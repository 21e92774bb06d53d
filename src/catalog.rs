use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use sysinfo::System;

use crate::error::DownloadError;

const HF_BASE: &str = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/";
const HF_MIRROR_BASE: &str = "https://hf-mirror.com/ggerganov/whisper.cpp/resolve/main/";

/// Immutable description of a downloadable model artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    /// File name under the model directory; the `.part` temp file derives
    /// from it.
    pub file_name: String,
    /// Approximate artifact size. Mirrors can differ slightly in exact byte
    /// count, so comparisons use `DownloadConfig::size_tolerance`.
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 digest. `None` means verification is skipped
    /// by policy and the size check is the sole gate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub primary_url: String,
    #[serde(default)]
    pub fallback_urls: Vec<String>,
}

impl ModelDescriptor {
    /// All download sources in the order they should be attempted.
    #[must_use]
    pub fn sources(&self) -> Vec<&str> {
        std::iter::once(self.primary_url.as_str())
            .chain(self.fallback_urls.iter().map(String::as_str))
            .collect()
    }
}

/// Registry of known model artifacts.
#[derive(Debug, Clone)]
pub struct Catalog {
    models: Vec<ModelDescriptor>,
}

impl Catalog {
    /// The canonical whisper.cpp GGML model set.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            models: BUILTIN_MODELS.clone(),
        }
    }

    #[must_use]
    pub fn from_descriptors(models: Vec<ModelDescriptor>) -> Self {
        Self { models }
    }

    pub fn describe(&self, model_id: &str) -> Result<&ModelDescriptor, DownloadError> {
        self.models
            .iter()
            .find(|model| model.id == model_id)
            .ok_or_else(|| DownloadError::NotFound(model_id.to_string()))
    }

    #[must_use]
    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

static BUILTIN_MODELS: Lazy<Vec<ModelDescriptor>> = Lazy::new(|| {
    vec![
        ggml("tiny", "Tiny", 78_643_200),
        ggml("base", "Base", 148_897_792),
        ggml("small", "Small", 488_636_416),
        ggml("medium", "Medium", 1_604_321_280),
    ]
});

fn ggml(id: &str, display_name: &str, size_bytes: u64) -> ModelDescriptor {
    let file_name = format!("ggml-{id}.bin");
    ModelDescriptor {
        id: id.to_string(),
        display_name: display_name.to_string(),
        size_bytes,
        checksum: None,
        primary_url: format!("{HF_BASE}{file_name}"),
        fallback_urls: vec![format!("{HF_MIRROR_BASE}{file_name}")],
        file_name,
    }
}

/// Map a host memory tier to a suggested model id. Pure; no host access.
#[must_use]
pub fn recommend_for_ram_gb(ram_gb: f64) -> &'static str {
    if ram_gb < 4.0 {
        "tiny"
    } else if ram_gb < 8.0 {
        "base"
    } else if ram_gb < 16.0 {
        "small"
    } else {
        "medium"
    }
}

/// Suggest a model for this host based on installed memory.
#[must_use]
pub fn recommend() -> &'static str {
    let mut system = System::new();
    system.refresh_memory();
    let ram_gb = system.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0);
    recommend_for_ram_gb(ram_gb)
}
