//! Credential and model cascade selection.
//!
//! For one invocation the cascade fixes an ordered model list for the
//! chosen mode and a freshly shuffled credential order. Attempts walk
//! credentials first: only when every remaining credential has failed for
//! a model does the cascade concede a worse model, because rate limits are
//! typically per-account and a different key often recovers the attempt.

use std::collections::HashSet;

use crate::core::config::Config;
use crate::core::mode::Mode;

/// Deterministic Fisher-Yates shuffle driven by an explicit seed, so
/// cascade-order tests can pin the permutation.
pub fn shuffle<T>(items: &mut [T], seed: u64) {
    // xorshift64*; zero would be a fixed point, so nudge it.
    let mut state = seed.max(1);
    let mut next = move || {
        state ^= state >> 12;
        state ^= state << 25;
        state ^= state >> 27;
        state = state.wrapping_mul(0x2545_f491_4f6c_dd1d);
        state
    };
    for i in (1..items.len()).rev() {
        let j = (next() % (i as u64 + 1)) as usize;
        items.swap(i, j);
    }
}

/// Entropy for the production shuffle.
pub fn random_seed() -> u64 {
    let mut bytes = [0u8; 8];
    if getrandom::fill(&mut bytes).is_err() {
        // Degrade to the clock; the shuffle only balances key usage.
        return std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1);
    }
    u64::from_le_bytes(bytes)
}

/// The per-invocation attempt space over (model, credential) pairs.
pub struct Cascade {
    models: Vec<String>,
    credentials: Vec<String>,
    invalidated: HashSet<String>,
}

impl Cascade {
    pub fn new(mode: Mode, config: &Config, seed: u64) -> Self {
        let models = config.models_for_mode(mode.as_str());
        let mut credentials = config.credential_pool();
        if credentials.is_empty() {
            // Some endpoints accept keyless calls; keep the cascade shape
            // uniform with a single anonymous credential.
            credentials.push(String::new());
        }
        shuffle(&mut credentials, seed);
        Cascade {
            models,
            credentials,
            invalidated: HashSet::new(),
        }
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Credentials still eligible for attempts, in shuffled order.
    pub fn usable_credentials(&self) -> Vec<String> {
        self.credentials
            .iter()
            .filter(|key| !self.invalidated.contains(*key))
            .cloned()
            .collect()
    }

    /// Fixed ordering for state-machine tests, bypassing the shuffle.
    #[cfg(test)]
    pub fn with_order(models: Vec<String>, credentials: Vec<String>) -> Self {
        Cascade {
            models,
            credentials,
            invalidated: HashSet::new(),
        }
    }

    /// Exclude a credential for the remainder of this invocation. The
    /// stored pool is untouched; exclusion never persists across runs.
    pub fn invalidate(&mut self, credential: &str) {
        self.invalidated.insert(credential.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;

    fn config_with_keys(keys: &[&str]) -> Config {
        Config {
            api_keys: keys.iter().map(|k| k.to_string()).collect(),
            ..Config::default()
        }
    }

    #[test]
    fn shuffle_is_deterministic_per_seed() {
        let mut a = vec![1, 2, 3, 4, 5, 6];
        let mut b = vec![1, 2, 3, 4, 5, 6];
        shuffle(&mut a, 42);
        shuffle(&mut b, 42);
        assert_eq!(a, b);

        let mut c = vec![1, 2, 3, 4, 5, 6];
        shuffle(&mut c, 43);
        // Different seeds should normally differ; a collision here would
        // mean the generator is degenerate for small seeds.
        assert_ne!(a, c);
    }

    #[test]
    fn shuffle_preserves_elements() {
        let mut items = vec!["a", "b", "c", "d"];
        shuffle(&mut items, 7);
        let mut sorted = items.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn empty_pool_degrades_to_anonymous_credential() {
        let cascade = Cascade::new(Mode::General, &config_with_keys(&[]), 1);
        assert_eq!(cascade.usable_credentials(), vec![String::new()]);
    }

    #[test]
    fn invalidation_excludes_for_this_cascade_only() {
        let config = config_with_keys(&["k1", "k2"]);
        let mut cascade = Cascade::new(Mode::General, &config, 1);
        cascade.invalidate("k1");
        assert_eq!(cascade.usable_credentials(), vec!["k2".to_string()]);

        // A fresh cascade from the same config sees the full pool again.
        let fresh = Cascade::new(Mode::General, &config, 1);
        assert_eq!(fresh.usable_credentials().len(), 2);
    }

    #[test]
    fn models_come_from_mode_list() {
        let mut config = config_with_keys(&["k1"]);
        config.models.insert(
            "code".to_string(),
            vec!["m-code-1".to_string(), "m-code-2".to_string()],
        );
        let cascade = Cascade::new(Mode::Code, &config, 1);
        assert_eq!(cascade.models(), ["m-code-1", "m-code-2"]);
    }
}
