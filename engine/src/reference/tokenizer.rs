//! Byte-level tokenizer
//!
//! Ids 0..3 are reserved (pad, bos, eos); every UTF-8 byte `b` maps to
//! `b + 3`. Images are "preprocessed" by scaling their bytes into `[0, 1]`.

use crate::errors::{EngineError, Result};
use crate::inference::input::ImageInput;
use crate::inference::tensor::Tensor;
use crate::model::loader::Tokenizer;

/// Padding token id
pub const PAD_TOKEN_ID: u32 = 0;
/// Beginning-of-sequence token id
pub const BOS_TOKEN_ID: u32 = 1;
/// Default end-of-sequence token id
pub const EOS_TOKEN_ID: u32 = 2;
/// Offset of byte tokens
pub const BYTE_OFFSET: u32 = 3;
/// Smallest vocabulary that covers every byte
pub const MIN_VOCAB_SIZE: usize = 256 + BYTE_OFFSET as usize;

/// Maximum image payload accepted (bytes)
const MAX_IMAGE_BYTES: usize = 16 * 1024 * 1024;

/// Tokenizer mapping bytes to ids
#[derive(Debug, Clone)]
pub struct ByteTokenizer {
    eos_token_id: u32,
}

impl ByteTokenizer {
    /// Create a tokenizer with the given end-of-sequence id
    pub fn new(eos_token_id: u32) -> Self {
        Self { eos_token_id }
    }

    fn token_ids(text: &str) -> Vec<u32> {
        std::iter::once(BOS_TOKEN_ID)
            .chain(text.bytes().map(|b| b as u32 + BYTE_OFFSET))
            .collect()
    }

    /// Decode ids back to text, skipping reserved ids
    pub fn decode(ids: &[u32]) -> String {
        let bytes: Vec<u8> = ids
            .iter()
            .filter(|&&id| (BYTE_OFFSET..BYTE_OFFSET + 256).contains(&id))
            .map(|&id| (id - BYTE_OFFSET) as u8)
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Default for ByteTokenizer {
    fn default() -> Self {
        Self::new(EOS_TOKEN_ID)
    }
}

impl Tokenizer for ByteTokenizer {
    fn encode(&mut self, text: &str) -> Result<Tensor> {
        Ok(Tensor::from_token_ids(&Self::token_ids(text)))
    }

    fn encode_with_image(&mut self, text: &str, image: &ImageInput) -> Result<(Tensor, Tensor)> {
        if image.bytes.len() > MAX_IMAGE_BYTES {
            return Err(EngineError::Encoding(format!(
                "image is {} bytes (max: {})",
                image.bytes.len(),
                MAX_IMAGE_BYTES
            )));
        }
        let pixels: Vec<f32> = image.bytes.iter().map(|&b| b as f32 / 255.0).collect();
        let pixel_values = Tensor::new(pixels, vec![1, image.bytes.len()])?;
        Ok((self.encode(text)?, pixel_values))
    }

    fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_prefixes_bos() {
        let mut tokenizer = ByteTokenizer::default();
        let t = tokenizer.encode("hi").unwrap();
        assert_eq!(t.shape, vec![1, 3]);
        assert_eq!(
            t.data,
            vec![
                BOS_TOKEN_ID as f32,
                (b'h' as u32 + BYTE_OFFSET) as f32,
                (b'i' as u32 + BYTE_OFFSET) as f32
            ]
        );
    }

    #[test]
    fn test_decode_skips_reserved() {
        let ids = [BOS_TOKEN_ID, b'o' as u32 + 3, b'k' as u32 + 3, EOS_TOKEN_ID];
        assert_eq!(ByteTokenizer::decode(&ids), "ok");
    }

    #[test]
    fn test_image_pixels_are_normalized() {
        let mut tokenizer = ByteTokenizer::default();
        let image = ImageInput {
            mime_type: "image/png".to_string(),
            bytes: vec![0, 255, 51],
        };
        let (ids, pixels) = tokenizer.encode_with_image("x", &image).unwrap();
        assert_eq!(ids.shape, vec![1, 2]);
        assert_eq!(pixels.shape, vec![1, 3]);
        assert_eq!(pixels.data[0], 0.0);
        assert_eq!(pixels.data[1], 1.0);
        assert!((pixels.data[2] - 0.2).abs() < 1e-6);
    }
}
