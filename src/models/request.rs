use crate::error::{MuseError, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CHECKPOINT_VERSION_ID: u64 = 275167;
pub const DEFAULT_CHECKPOINT_NAME: &str = "Qwen_Image_v1.safetensors";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoraArg {
    pub model_version_id: u64,
    pub scale: f32,
}

impl LoraArg {
    pub fn new(model_version_id: u64, scale: f32) -> Self {
        Self {
            model_version_id,
            scale,
        }
    }
}

/// Model, sampler and style settings sent alongside the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelArgs {
    pub checkpoint_version_id: u64,
    pub checkpoint_name: String,
    /// `None` falls back to the client's configured LoRA list.
    pub lora_args: Option<Vec<LoraArg>>,
    pub negative_prompt: String,
    pub sampler: String,
    pub guidance_scale: f32,
    /// -1 lets the service pick a random seed.
    pub seed: i64,
    pub inference_steps: u32,
    pub images_per_prompt: u32,
    /// Merged verbatim into the `modelArgs` object of the submit body.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for ModelArgs {
    fn default() -> Self {
        Self {
            checkpoint_version_id: DEFAULT_CHECKPOINT_VERSION_ID,
            checkpoint_name: DEFAULT_CHECKPOINT_NAME.to_string(),
            lora_args: None,
            negative_prompt: String::new(),
            sampler: "Euler".to_string(),
            guidance_scale: 3.0,
            seed: -1,
            inference_steps: 60,
            images_per_prompt: 4,
            extra: serde_json::Map::new(),
        }
    }
}

impl ModelArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpoint(mut self, version_id: u64, name: impl Into<String>) -> Self {
        self.checkpoint_version_id = version_id;
        self.checkpoint_name = name.into();
        self
    }

    pub fn with_lora_args(mut self, lora_args: Vec<LoraArg>) -> Self {
        self.lora_args = Some(lora_args);
        self
    }

    pub fn with_negative_prompt(mut self, negative_prompt: impl Into<String>) -> Self {
        self.negative_prompt = negative_prompt.into();
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_images_per_prompt(mut self, count: u32) -> Self {
        self.images_per_prompt = count;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// A validated text-to-image request. Fields are fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    prompt: String,
    width: u32,
    height: u32,
    model_args: ModelArgs,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, width: u32, height: u32) -> Result<Self> {
        Self::with_model_args(prompt, width, height, ModelArgs::default())
    }

    pub fn with_model_args(
        prompt: impl Into<String>,
        width: u32,
        height: u32,
        model_args: ModelArgs,
    ) -> Result<Self> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(MuseError::InvalidRequest("prompt must not be empty".into()));
        }
        if width == 0 || height == 0 {
            return Err(MuseError::InvalidRequest(format!(
                "image dimensions must be positive, got {}x{}",
                width, height
            )));
        }
        if model_args.images_per_prompt == 0 {
            return Err(MuseError::InvalidRequest(
                "images_per_prompt must be at least 1".into(),
            ));
        }

        Ok(Self {
            prompt,
            width,
            height,
            model_args,
        })
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn model_args(&self) -> &ModelArgs {
        &self.model_args
    }

    /// Short prompt preview for log lines.
    pub fn prompt_preview(&self) -> String {
        let preview: String = self.prompt.chars().take(50).collect();
        if self.prompt.chars().count() > 50 {
            format!("{}...", preview)
        } else {
            preview
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_prompt() {
        let err = GenerationRequest::new("   ", 512, 512).unwrap_err();
        assert!(matches!(err, MuseError::InvalidRequest(_)));
    }

    #[test]
    fn rejects_zero_dimensions() {
        assert!(GenerationRequest::new("a cat", 0, 512).is_err());
        assert!(GenerationRequest::new("a cat", 512, 0).is_err());
    }

    #[test]
    fn accepts_valid_request() {
        let request = GenerationRequest::new("a cat", 512, 768).unwrap();
        assert_eq!(request.prompt(), "a cat");
        assert_eq!((request.width(), request.height()), (512, 768));
        assert_eq!(request.model_args().sampler, "Euler");
        assert!(request.model_args().negative_prompt.is_empty());
    }

    #[test]
    fn lora_args_serialize_in_provider_casing() {
        let value = serde_json::to_value(LoraArg::new(334516, 0.5)).unwrap();
        assert_eq!(value["modelVersionId"], 334516);
        assert_eq!(value["scale"], 0.5);
    }

    #[test]
    fn long_prompts_are_truncated_in_preview() {
        let request = GenerationRequest::new("x".repeat(80), 64, 64).unwrap();
        assert_eq!(request.prompt_preview().len(), 53);
    }
}
