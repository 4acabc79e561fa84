use rand::{rngs::StdRng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

const ENV_ENABLED: &str = "SPIRAL_DETERMINISTIC";
const ENV_SEED: &str = "SPIRAL_DETERMINISTIC_SEED";
const DEFAULT_SEED: u64 = 42;

/// Seeding policy for parameter initialisers and dropout masks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeterminismConfig {
    /// When set, RNGs without an explicit seed derive one from `base_seed`
    /// and their label instead of pulling host entropy.
    pub enabled: bool,
    /// Root seed every labelled component derives from.
    pub base_seed: u64,
}

impl Default for DeterminismConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_seed: DEFAULT_SEED,
        }
    }
}

impl DeterminismConfig {
    /// Reads `SPIRAL_DETERMINISTIC` and `SPIRAL_DETERMINISTIC_SEED`.
    pub fn from_env() -> Self {
        let enabled = std::env::var(ENV_ENABLED)
            .ok()
            .map(|v| parse_flag(&v))
            .unwrap_or(false);
        let base_seed = std::env::var(ENV_SEED)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_SEED);
        Self { enabled, base_seed }
    }

    /// Derives a stable seed for a component label.
    pub fn seed_for<L: Hash>(&self, label: L) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.base_seed.hash(&mut hasher);
        label.hash(&mut hasher);
        hasher.finish()
    }
}

fn parse_flag(raw: &str) -> bool {
    !matches!(
        raw.trim(),
        "" | "0" | "false" | "False" | "FALSE" | "off" | "OFF"
    )
}

static CONFIG: OnceLock<DeterminismConfig> = OnceLock::new();

/// Returns the lazily initialised process configuration.
pub fn config() -> &'static DeterminismConfig {
    CONFIG.get_or_init(DeterminismConfig::from_env)
}

/// Installs `cfg` unless a configuration was already observed, returning the
/// configuration that is in effect.
pub fn configure(cfg: DeterminismConfig) -> &'static DeterminismConfig {
    CONFIG.get_or_init(|| cfg)
}

/// RNG for a labelled component. Host entropy unless determinism is enabled.
pub fn rng_from_label(label: &str) -> StdRng {
    let cfg = config();
    if cfg.enabled {
        StdRng::seed_from_u64(cfg.seed_for(label))
    } else {
        StdRng::from_entropy()
    }
}

/// RNG seeded from an explicit seed when given, otherwise from the label.
pub fn rng_from_optional(seed: Option<u64>, label: &str) -> StdRng {
    match seed {
        Some(value) => StdRng::seed_from_u64(value),
        None => rng_from_label(label),
    }
}

/// Splits an optional root seed into a per-component seed so sibling layers
/// built from one seed do not share streams.
pub fn child_seed(seed: Option<u64>, label: &str) -> Option<u64> {
    seed.map(|root| {
        let mut hasher = DefaultHasher::new();
        root.hash(&mut hasher);
        label.hash(&mut hasher);
        hasher.finish()
    })
}
