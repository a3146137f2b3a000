use std::collections::HashMap;

use fancy_regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::TemplateMinerError;

/// Configuration form of a masking rule, as it appears in a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskingInstructionConfig {
    pub pattern: String,
    pub mask_with: String,
}

/// A compiled rewrite rule: every match of `pattern` is replaced with
/// `<PREFIX>mask_with<SUFFIX>`.
#[derive(Debug)]
pub struct MaskingInstruction {
    regex: Regex,
    mask_with: String,
}

impl MaskingInstruction {
    pub fn new(pattern: &str, mask_with: &str) -> Result<Self, TemplateMinerError> {
        let regex = Regex::new(pattern).map_err(|e| {
            TemplateMinerError::ConfigInvalid(format!("bad masking pattern {pattern:?}: {e}"))
        })?;
        Ok(Self {
            regex,
            mask_with: mask_with.to_string(),
        })
    }

    pub fn from_config(config: &MaskingInstructionConfig) -> Result<Self, TemplateMinerError> {
        Self::new(&config.pattern, &config.mask_with)
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    pub fn mask_with(&self) -> &str {
        &self.mask_with
    }

    fn mask(&self, content: &str, mask_prefix: &str, mask_suffix: &str) -> String {
        let mask = format!("{mask_prefix}{}{mask_suffix}", self.mask_with);
        self.regex.replace_all(content, mask.as_str()).into_owned()
    }
}

/// Applies an ordered list of masking rules to a raw log line, so volatile
/// substrings become named placeholders before mining. Each rule sees the
/// output of the previous one.
#[derive(Debug)]
pub struct LogMasker {
    instructions: Vec<MaskingInstruction>,
    mask_name_to_instructions: HashMap<String, Vec<usize>>,
    pub mask_prefix: String,
    pub mask_suffix: String,
}

impl LogMasker {
    pub fn new(instructions: Vec<MaskingInstruction>, mask_prefix: &str, mask_suffix: &str) -> Self {
        let mut mask_name_to_instructions: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, instruction) in instructions.iter().enumerate() {
            mask_name_to_instructions
                .entry(instruction.mask_with().to_string())
                .or_default()
                .push(index);
        }

        Self {
            instructions,
            mask_name_to_instructions,
            mask_prefix: mask_prefix.to_string(),
            mask_suffix: mask_suffix.to_string(),
        }
    }

    pub fn mask(&self, content: &str) -> String {
        let mut masked_content = content.to_string();
        for instruction in &self.instructions {
            masked_content = instruction.mask(&masked_content, &self.mask_prefix, &self.mask_suffix);
        }
        masked_content
    }

    pub fn mask_names(&self) -> impl Iterator<Item = &str> {
        self.mask_name_to_instructions.keys().map(String::as_str)
    }

    pub fn instructions_by_mask_name(&self, mask_name: &str) -> Vec<&MaskingInstruction> {
        self.mask_name_to_instructions
            .get(mask_name)
            .map(|indices| indices.iter().map(|i| &self.instructions[*i]).collect())
            .unwrap_or_default()
    }
}
