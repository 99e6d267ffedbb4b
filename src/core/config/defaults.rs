//! Compiled-in defaults used on first run and for self-healing migration.

use std::collections::BTreeMap;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub fn base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

pub fn system_prompt() -> String {
    "You are an AI assistant embedded in a clipboard tool. Your output is \
     often pasted somewhere else verbatim, so be concise, skip preambles \
     like 'Here is your text', and answer in plain text unless markdown is \
     explicitly requested. When given an error log, explain the cause."
        .to_string()
}

pub fn temperature() -> f64 {
    0.7
}

pub fn max_tokens() -> u32 {
    8000
}

pub fn models() -> BTreeMap<String, Vec<String>> {
    let mut map = BTreeMap::new();
    for mode in ["general", "code", "vision", "ocr", "audio"] {
        map.insert(mode.to_string(), vec![DEFAULT_MODEL.to_string()]);
    }
    map
}

pub fn search_model() -> String {
    "gpt-4o-search-preview".to_string()
}

pub fn history_max_messages() -> usize {
    30
}

pub fn history_max_chars() -> usize {
    50_000
}

pub fn attachment_char_cost() -> usize {
    2000
}
