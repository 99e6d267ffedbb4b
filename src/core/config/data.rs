use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::config::defaults;

/// Per-provider settings persisted in `config.toml`.
///
/// Every field has a compiled-in default so a partially written or older
/// config file deserializes cleanly; [`Config::heal`] backfills whatever a
/// previous version left out and reports whether the file needs a rewrite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Credential pool. Keys are opaque secrets; an empty pool degrades to
    /// a single anonymous credential at request time.
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default = "defaults::base_url")]
    pub base_url: String,
    #[serde(default = "defaults::system_prompt")]
    pub system_prompt: String,
    #[serde(default = "defaults::temperature")]
    pub temperature: f64,
    #[serde(default = "defaults::max_tokens")]
    pub max_tokens: u32,
    /// Mode name → ordered model cascade for that mode.
    #[serde(default = "defaults::models")]
    pub models: BTreeMap<String, Vec<String>>,
    /// Model used for the provider-native tier of the web search tool.
    #[serde(default = "defaults::search_model")]
    pub search_model: String,
    /// Credentials for the fallback third-party search API.
    #[serde(default)]
    pub search_api_keys: Vec<String>,
    #[serde(default = "defaults::history_max_messages")]
    pub history_max_messages: usize,
    #[serde(default = "defaults::history_max_chars")]
    pub history_max_chars: usize,
    /// Fixed character-equivalent cost charged per attachment when
    /// budgeting history, regardless of encoded size.
    #[serde(default = "defaults::attachment_char_cost")]
    pub attachment_char_cost: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_keys: Vec::new(),
            base_url: defaults::base_url(),
            system_prompt: defaults::system_prompt(),
            temperature: defaults::temperature(),
            max_tokens: defaults::max_tokens(),
            models: defaults::models(),
            search_model: defaults::search_model(),
            search_api_keys: Vec::new(),
            history_max_messages: defaults::history_max_messages(),
            history_max_chars: defaults::history_max_chars(),
            attachment_char_cost: defaults::attachment_char_cost(),
        }
    }
}

impl Config {
    /// Backfill empty or out-of-range fields from the compiled-in defaults.
    /// Returns true when anything changed, i.e. the file should be
    /// rewritten.
    pub fn heal(&mut self) -> bool {
        let mut dirty = false;

        if self.base_url.trim().is_empty() {
            self.base_url = defaults::base_url();
            dirty = true;
        }
        if self.system_prompt.trim().is_empty() {
            self.system_prompt = defaults::system_prompt();
            dirty = true;
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            self.temperature = defaults::temperature();
            dirty = true;
        }
        if self.max_tokens == 0 {
            self.max_tokens = defaults::max_tokens();
            dirty = true;
        }
        if self.search_model.trim().is_empty() {
            self.search_model = defaults::search_model();
            dirty = true;
        }
        if self.history_max_messages == 0 {
            self.history_max_messages = defaults::history_max_messages();
            dirty = true;
        }
        if self.history_max_chars == 0 {
            self.history_max_chars = defaults::history_max_chars();
            dirty = true;
        }
        if self.attachment_char_cost == 0 {
            self.attachment_char_cost = defaults::attachment_char_cost();
            dirty = true;
        }

        for (mode, cascade) in defaults::models() {
            let missing = self
                .models
                .get(&mode)
                .map(|list| list.is_empty())
                .unwrap_or(true);
            if missing {
                self.models.insert(mode, cascade);
                dirty = true;
            }
        }

        dirty
    }

    /// The ordered model cascade for a mode name, falling back to the
    /// `general` list and finally the built-in default.
    pub fn models_for_mode(&self, mode: &str) -> Vec<String> {
        if let Some(list) = self.models.get(mode).filter(|list| !list.is_empty()) {
            return list.clone();
        }
        if let Some(list) = self.models.get("general").filter(|list| !list.is_empty()) {
            return list.clone();
        }
        vec![defaults::DEFAULT_MODEL.to_string()]
    }

    /// Append a credential to the pool, moving an existing copy to the end.
    pub fn add_api_key(&mut self, key: &str) {
        self.api_keys.retain(|existing| existing != key);
        self.api_keys.push(key.to_string());
    }

    /// Append a search credential, ignoring duplicates.
    pub fn add_search_api_key(&mut self, key: &str) {
        if !self.search_api_keys.iter().any(|existing| existing == key) {
            self.search_api_keys.push(key.to_string());
        }
    }

    /// Credentials with blank entries filtered out, in stored order.
    pub fn credential_pool(&self) -> Vec<String> {
        self.api_keys
            .iter()
            .filter(|key| !key.trim().is_empty())
            .cloned()
            .collect()
    }
}
