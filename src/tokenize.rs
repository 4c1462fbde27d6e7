//! Text → term-frequency tokenization.
//!
//! Both tokenizers first normalize the text: bullet and enumeration marks
//! are stripped, surrounding whitespace trimmed, and everything lowercased.

use async_trait::async_trait;
use std::collections::BTreeMap;

use deckindex_core::models::TermFreqMap;

use crate::config::ToolsConfig;
use crate::tools::{run_command, ToolError};

#[async_trait]
pub trait Tokenizer: Send + Sync {
    async fn tokenize(&self, text: &str) -> Result<TermFreqMap, ToolError>;
}

const STRIPPED_MARKS: [char; 3] = ['\u{f06c}', '•', '、'];

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it", "of", "on",
    "or", "that", "the", "this", "to", "was", "were", "with",
];

pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !STRIPPED_MARKS.contains(c))
        .collect::<String>()
        .trim()
        .to_lowercase()
}

/// Built-in tokenizer: alphanumeric runs, stop words and one-letter
/// tokens dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleTokenizer;

impl SimpleTokenizer {
    pub fn terms(text: &str) -> TermFreqMap {
        let mut freqs = TermFreqMap::new();
        for token in normalize(text).split(|c: char| !c.is_alphanumeric()) {
            if token.chars().count() < 2 || STOP_WORDS.contains(&token) {
                continue;
            }
            *freqs.entry(token.to_string()).or_insert(0) += 1;
        }
        freqs
    }
}

#[async_trait]
impl Tokenizer for SimpleTokenizer {
    async fn tokenize(&self, text: &str) -> Result<TermFreqMap, ToolError> {
        Ok(Self::terms(text))
    }
}

/// External tokenizer: the normalized text is passed as the last argument
/// and a JSON object `{"term": count, ...}` is read from stdout.
pub struct CommandTokenizer {
    argv: Vec<String>,
}

impl CommandTokenizer {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

#[async_trait]
impl Tokenizer for CommandTokenizer {
    async fn tokenize(&self, text: &str) -> Result<TermFreqMap, ToolError> {
        let (program, args) = self.argv.split_first().ok_or_else(|| ToolError::MalformedOutput {
            program: String::new(),
            detail: "empty tokenizer command".to_string(),
        })?;

        let mut full_args: Vec<String> = args.to_vec();
        full_args.push(normalize(text));
        let stdout = run_command(program, &full_args).await?;
        parse_term_freqs(program, &stdout)
    }
}

/// Parse a `{term: count}` JSON object. Non-positive counts are dropped.
pub fn parse_term_freqs(program: &str, stdout: &[u8]) -> Result<TermFreqMap, ToolError> {
    let raw: BTreeMap<String, i64> =
        serde_json::from_slice(stdout).map_err(|e| ToolError::MalformedOutput {
            program: program.to_string(),
            detail: e.to_string(),
        })?;
    Ok(raw
        .into_iter()
        .filter(|(term, n)| *n > 0 && !term.is_empty())
        .collect())
}

pub fn tokenizer_from_config(tools: &ToolsConfig) -> Box<dyn Tokenizer> {
    if tools.tokenizer_command.is_empty() {
        Box::new(SimpleTokenizer)
    } else {
        Box::new(CommandTokenizer::new(tools.tokenizer_command.clone()))
    }
}
