//! Prompt inputs
//!
//! A prompt is either text alone or text with an image. The image arrives
//! as a `data:` URI and is decoded before anything is submitted to the worker.

use crate::errors::{EngineError, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Prompt given to [`crate::InferenceEngine::infer_prompt`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PromptInput {
    /// Text only; encoded into token ids
    Text(String),
    /// Text plus an image as a `data:<mime>;base64,<payload>` URI; encoded
    /// into token ids and pixel values
    TextWithImage { prompt: String, image: String },
}

impl PromptInput {
    /// Text-only prompt
    pub fn text(prompt: impl Into<String>) -> Self {
        PromptInput::Text(prompt.into())
    }

    /// Prompt with an attached image
    pub fn with_image(prompt: impl Into<String>, image: impl Into<String>) -> Self {
        PromptInput::TextWithImage {
            prompt: prompt.into(),
            image: image.into(),
        }
    }

    /// Build from the optional-image form used on the wire
    pub fn from_parts(prompt: impl Into<String>, image: Option<String>) -> Self {
        match image {
            Some(image) => Self::with_image(prompt, image),
            None => Self::text(prompt),
        }
    }

    /// The prompt text
    pub fn prompt(&self) -> &str {
        match self {
            PromptInput::Text(prompt) => prompt,
            PromptInput::TextWithImage { prompt, .. } => prompt,
        }
    }
}

/// Decoded image bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    /// MIME type from the data URI (e.g., "image/png")
    pub mime_type: String,
    /// Raw image bytes
    pub bytes: Vec<u8>,
}

impl ImageInput {
    /// Decode a `data:<mime>;base64,<payload>` URI
    pub fn from_data_uri(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("data:")
            .ok_or_else(|| EngineError::Encoding("image must be a data: URI".to_string()))?;

        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| EngineError::Encoding("data URI has no payload".to_string()))?;

        let mime_type = header
            .strip_suffix(";base64")
            .ok_or_else(|| EngineError::Encoding("data URI is not base64 encoded".to_string()))?;

        if !mime_type.starts_with("image/") {
            return Err(EngineError::Encoding(format!(
                "unsupported media type: {}",
                mime_type
            )));
        }

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| EngineError::Encoding(format!("invalid base64 image payload: {}", e)))?;

        if bytes.is_empty() {
            return Err(EngineError::Encoding("image payload is empty".to_string()));
        }

        Ok(Self {
            mime_type: mime_type.to_string(),
            bytes,
        })
    }

    /// Encode raw bytes as a data URI
    pub fn to_data_uri(mime_type: &str, bytes: &[u8]) -> String {
        format!(
            "data:{};base64,{}",
            mime_type,
            base64::engine::general_purpose::STANDARD.encode(bytes)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_data_uri() {
        let uri = ImageInput::to_data_uri("image/png", &[0, 128, 255]);
        let image = ImageInput::from_data_uri(&uri).unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.bytes, vec![0, 128, 255]);
    }

    #[test]
    fn test_malformed_images_are_encoding_errors() {
        let cases = [
            "https://example.com/cat.png",
            "data:image/png;base64",
            "data:image/png,AAAA",
            "data:text/plain;base64,SGVsbG8=",
            "data:image/png;base64,@@@not-base64@@@",
            "data:image/png;base64,",
        ];
        for case in cases {
            let err = ImageInput::from_data_uri(case).unwrap_err();
            assert!(
                matches!(err, EngineError::Encoding(_)),
                "{} should be an encoding error, got {:?}",
                case,
                err
            );
        }
    }

    #[test]
    fn test_prompt_input_from_parts() {
        assert_eq!(PromptInput::from_parts("hi", None), PromptInput::text("hi"));
        let with_image = PromptInput::from_parts("hi", Some("data:image/png;base64,AA==".into()));
        assert!(matches!(with_image, PromptInput::TextWithImage { .. }));
        assert_eq!(with_image.prompt(), "hi");
    }
}
