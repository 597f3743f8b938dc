//! Stable hashing of generation configs. Two campaigns with the same
//! normalised parameters share one offset record, which is what makes
//! cross-campaign de-duplication work.

use recondor_model::{DomainGenerationParams, PatternType};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{CoreError, Result};

/// Canonical form of the parameters that determine the combinatorial space.
/// Field order is fixed; the hash is sha256 over this struct's JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedGenerationConfig {
    pub pattern_type: String,
    pub variable_length: u32,
    pub character_set: String,
    pub constant_string: String,
    pub tld: String,
}

impl NormalizedGenerationConfig {
    /// Normalisation rules: charset lowercased and sorted, pattern type
    /// lowercased, TLD lowercased and reduced to a single leading dot.
    /// The constant string stays case-sensitive; generation emits it as-is.
    pub fn from_params(params: &DomainGenerationParams) -> Self {
        let mut chars: Vec<char> = params.character_set.to_lowercase().chars().collect();
        chars.sort_unstable();
        let character_set: String = chars.into_iter().collect();

        let trimmed = params.tld.to_lowercase();
        let trimmed = trimmed.trim_matches('.');
        let tld = if trimmed.is_empty() {
            String::new()
        } else {
            format!(".{trimmed}")
        };

        Self {
            pattern_type: params.pattern_type.as_str().to_string(),
            variable_length: params.variable_length,
            character_set,
            constant_string: params.constant_string.clone(),
            tld,
        }
    }

    pub fn pattern_type(&self) -> Result<PatternType> {
        PatternType::parse(&self.pattern_type).map_err(CoreError::from)
    }

    /// Hex-encoded sha256 over the canonical JSON form.
    pub fn hash(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        let digest = Sha256::digest(&json);
        Ok(hex::encode(digest))
    }
}

/// Convenience wrapper: normalise and hash in one step.
pub fn config_hash(params: &DomainGenerationParams) -> Result<(NormalizedGenerationConfig, String)> {
    let normalized = NormalizedGenerationConfig::from_params(params);
    let hash = normalized.hash()?;
    Ok((normalized, hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(charset: &str, tld: &str) -> DomainGenerationParams {
        DomainGenerationParams {
            pattern_type: PatternType::Prefix,
            variable_length: 2,
            character_set: charset.into(),
            constant_string: "shop".into(),
            tld: tld.into(),
            num_domains_to_generate: 0,
            total_possible_combinations: 0,
            current_offset: 0,
            config_hash: String::new(),
        }
    }

    #[test]
    fn charset_order_and_case_do_not_change_the_hash() {
        let a = config_hash(&params("abc", "com")).unwrap().1;
        let b = config_hash(&params("CBA", "com")).unwrap().1;
        assert_eq!(a, b);
    }

    #[test]
    fn tld_is_dot_normalised() {
        let a = config_hash(&params("abc", "com")).unwrap().1;
        let b = config_hash(&params("abc", ".COM.")).unwrap().1;
        assert_eq!(a, b);

        let normalized = NormalizedGenerationConfig::from_params(&params("abc", "com"));
        assert_eq!(normalized.tld, ".com");
    }

    #[test]
    fn constant_string_stays_case_sensitive() {
        let mut upper = params("abc", "com");
        upper.constant_string = "Shop".into();
        let a = config_hash(&params("abc", "com")).unwrap().1;
        let b = config_hash(&upper).unwrap().1;
        assert_ne!(a, b);
    }

    #[test]
    fn different_lengths_hash_differently() {
        let mut longer = params("abc", "com");
        longer.variable_length = 3;
        assert_ne!(
            config_hash(&params("abc", "com")).unwrap().1,
            config_hash(&longer).unwrap().1
        );
    }
}
