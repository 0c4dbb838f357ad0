//! Tokenizer wrapper

use std::path::Path;
use textgen_common::config::TokenizerOptions;
use textgen_common::error::{Result, TextgenError};

/// End-of-sequence markers tried when the model config names none
const EOS_CANDIDATES: &[&str] = &[
    "</s>",
    "<|endoftext|>",
    "<|end_of_text|>",
    "<|eot_id|>",
    "<|im_end|>",
    "<eos>",
];

/// Text tokenizer backed by a `tokenizer.json`
pub struct TextTokenizer {
    tokenizer: tokenizers::Tokenizer,
    add_special_tokens: bool,
}

impl TextTokenizer {
    /// Load a tokenizer from a `tokenizer.json` file
    pub fn from_file<P: AsRef<Path>>(path: P, options: &TokenizerOptions) -> Result<Self> {
        let path = path.as_ref();
        let tokenizer = tokenizers::Tokenizer::from_file(path).map_err(|e| {
            TextgenError::tokenizer(format!("Failed to load {}: {}", path.display(), e))
        })?;

        Ok(Self {
            tokenizer,
            add_special_tokens: options.add_special_tokens,
        })
    }

    /// Load a tokenizer from serialized `tokenizer.json` contents
    pub fn from_bytes(bytes: impl AsRef<[u8]>, add_special_tokens: bool) -> Result<Self> {
        let tokenizer = tokenizers::Tokenizer::from_bytes(bytes)
            .map_err(|e| TextgenError::tokenizer(format!("Failed to load tokenizer: {}", e)))?;

        Ok(Self {
            tokenizer,
            add_special_tokens,
        })
    }

    /// Encode the input text
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        self.tokenizer
            .encode(text, self.add_special_tokens)
            .map(|encoding| encoding.get_ids().to_vec())
            .map_err(|e| TextgenError::tokenizer(format!("Failed to encode: {}", e)))
    }

    /// Decode tokens to text, skipping special tokens
    pub fn decode(&self, tokens: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(tokens, true)
            .map_err(|e| TextgenError::tokenizer(format!("Failed to decode: {}", e)))
    }

    /// Decode the text the generated tokens add after the prompt
    ///
    /// Decoding the generated tokens on their own loses the whitespace some
    /// decoders only emit between tokens, so the prompt is decoded with and
    /// without them and the difference is returned.
    pub fn continuation(&self, prompt: &[u32], generated: &[u32]) -> Result<String> {
        if generated.is_empty() {
            return Ok(String::new());
        }

        let prefix = self.decode(prompt)?;
        let full = self.decode(&[prompt, generated].concat())?;
        match full.strip_prefix(prefix.as_str()) {
            Some(rest) => Ok(rest.to_string()),
            None => self.decode(generated),
        }
    }

    /// Get token id from the input string
    pub fn token_id(&self, token: &str) -> Option<u32> {
        self.tokenizer.token_to_id(token)
    }

    /// End-of-sequence ids: the configured ones, else well-known markers
    pub fn eos_token_ids(&self, configured: &[u32]) -> Vec<u32> {
        if !configured.is_empty() {
            return configured.to_vec();
        }

        EOS_CANDIDATES
            .iter()
            .filter_map(|token| self.token_id(token))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::word_tokenizer;

    #[test]
    fn test_encode_decode() {
        let tokenizer = word_tokenizer();
        let tokens = tokenizer.encode("hello world").unwrap();

        assert_eq!(tokens, vec![1, 2]);
        assert_eq!(tokenizer.decode(&tokens).unwrap(), "hello world");
    }

    #[test]
    fn test_unknown_words_map_to_unk() {
        let tokenizer = word_tokenizer();
        assert_eq!(tokenizer.encode("hello zebra").unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_continuation() {
        let tokenizer = word_tokenizer();
        let prompt = tokenizer.encode("hello world").unwrap();
        let generated = tokenizer.encode("foo bar").unwrap();

        assert_eq!(tokenizer.continuation(&prompt, &generated).unwrap(), " foo bar");
        assert_eq!(tokenizer.continuation(&prompt, &[]).unwrap(), "");
    }

    #[test]
    fn test_eos_token_ids() {
        let tokenizer = word_tokenizer();

        assert_eq!(tokenizer.eos_token_ids(&[7]), vec![7]);
        assert_eq!(tokenizer.eos_token_ids(&[]), vec![5]);
        assert_eq!(tokenizer.token_id("missing"), None);
    }
}
