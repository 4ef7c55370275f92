use serde::Deserialize;
use spv_pow::difficulty::REGTEST_POW_LIMIT_BITS;

pub const DEFAULT_FILTER_FP_RATE: f64 = 0.0001;

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Easiest compact target a header may claim.
    pub pow_limit_bits: u32,
    pub filter_fp_rate: f64,
    /// Fixed bloom tweak; random when unset.
    pub filter_tweak: Option<u32>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            pow_limit_bits: REGTEST_POW_LIMIT_BITS,
            filter_fp_rate: DEFAULT_FILTER_FP_RATE,
            filter_tweak: None,
        }
    }
}

impl ChainConfig {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_overrides_pow_limit() {
        let config = ChainConfig::from_json(r#"{"pow_limit_bits":486604799}"#).expect("parse");
        assert_eq!(config.pow_limit_bits, 0x1d00_ffff);
        assert_eq!(config.filter_fp_rate, DEFAULT_FILTER_FP_RATE);
        assert!(config.filter_tweak.is_none());
    }
}
