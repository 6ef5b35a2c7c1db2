//! Model profiles
//!
//! Identity, location, and prompt-format family for a model file, with
//! best-effort architecture detection from the filename.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Prompt-format family of a model
///
/// Drives prompt templating and the default stop-sequence set. `Generic`
/// is the deterministic fallback and maps to generic chat markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelArchitecture {
    /// Llama 2 family (`[INST]` markup)
    Llama2,
    /// Llama 3 family (header-id markup)
    Llama3,
    /// Mistral / Mixtral family
    Mistral,
    /// Gemma family (turn markup)
    Gemma,
    /// Phi family
    Phi,
    /// Qwen family (chat markup)
    Qwen,
    /// Unknown family; generic chat markup
    Generic,
}

/// Ordered filename-substring detection rules, most specific first.
///
/// Ordering matters: "codellama" must match before the bare "llama"
/// entries, and versioned names before the family catch-all.
const DETECTION_RULES: &[(&str, ModelArchitecture)] = &[
    ("qwen", ModelArchitecture::Qwen),
    ("mixtral", ModelArchitecture::Mistral),
    ("mistral", ModelArchitecture::Mistral),
    ("gemma", ModelArchitecture::Gemma),
    ("phi", ModelArchitecture::Phi),
    ("codellama", ModelArchitecture::Llama2),
    ("llama-3", ModelArchitecture::Llama3),
    ("llama3", ModelArchitecture::Llama3),
    ("llama-2", ModelArchitecture::Llama2),
    ("llama2", ModelArchitecture::Llama2),
    ("tinyllama", ModelArchitecture::Llama2),
    ("llama", ModelArchitecture::Llama3),
];

impl ModelArchitecture {
    /// Best-effort detection from a model filename.
    ///
    /// Walks the ordered rule list and returns the first substring match;
    /// falls back to [`ModelArchitecture::Generic`].
    pub fn detect_from_filename(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        for (needle, arch) in DETECTION_RULES {
            if name.contains(needle) {
                return *arch;
            }
        }

        ModelArchitecture::Generic
    }
}

/// Identity and location of a model file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Stable identifier; defaults to the path string
    pub id: String,
    /// Path to the model file
    pub path: PathBuf,
    /// Prompt-format family
    pub architecture: ModelArchitecture,
}

impl ModelProfile {
    /// Create a profile with an explicit architecture tag
    pub fn new(path: impl Into<PathBuf>, architecture: ModelArchitecture) -> Self {
        let path = path.into();
        Self {
            id: path.to_string_lossy().to_string(),
            path,
            architecture,
        }
    }

    /// Create a profile, detecting the architecture from the filename
    pub fn detect(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let architecture = ModelArchitecture::detect_from_filename(&path);
        Self::new(path, architecture)
    }

    /// Replace the identifier
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// The same profile retagged with the generic fallback architecture
    pub fn with_generic_architecture(mut self) -> Self {
        self.architecture = ModelArchitecture::Generic;
        self
    }
}
