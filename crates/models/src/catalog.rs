//! Static catalog of downloadable GGUF models.

use crate::{ModelError, Result};

/// Direct links to the GGUF files offered for chat and benchmarking.
pub const HUGGING_FACE_URLS: &[&str] = &[
    "https://huggingface.co/bartowski/gemma-2-2b-it-GGUF/resolve/main/gemma-2-2b-it-IQ3_M.gguf",
    "https://huggingface.co/Qwen/Qwen2.5-3B-Instruct-GGUF/resolve/main/qwen2.5-3b-instruct-q4_0.gguf",
    "https://huggingface.co/QuantFactory/SmolLM-360M-GGUF/resolve/main/SmolLM-360M.Q8_0.gguf",
    "https://huggingface.co/TheBloke/Mistral-7B-Claude-Chat-GGUF/resolve/main/mistral-7b-claude-chat.Q5_K_S.gguf",
];

/// Link to the repository page a model comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelLink {
    /// `owner/repo`
    pub label: String,
    pub address: String,
}

/// Identity of a remote model artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    pub url: String,
    /// Local file name, taken from the last URL segment.
    pub file_name: String,
    /// File name without its extension.
    pub model_name: String,
    pub repo_link: Option<ModelLink>,
}

impl ModelSource {
    pub fn from_hugging_face_url(url: &str) -> Result<Self> {
        let file_name = url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ModelError::InvalidUrl(url.to_string()))?;

        let model_name = file_name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(file_name);

        Ok(Self {
            url: url.to_string(),
            file_name: file_name.to_string(),
            model_name: model_name.to_string(),
            repo_link: repo_link(url),
        })
    }
}

fn repo_link(url: &str) -> Option<ModelLink> {
    let (address, _) = url.split_once("resolve")?;
    let (_, after_host) = url.split_once("co/")?;
    let (label, _) = after_host.split_once("/resolve")?;

    Some(ModelLink {
        label: label.to_string(),
        address: address.to_string(),
    })
}
