//! Environment-driven configuration.
//!
//! Every handler reads its configuration from `SLUICE_*` variables at
//! startup. Only the deployment root is required; everything else has a
//! default. Values that are present but malformed are rejected rather than
//! silently replaced by defaults.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `SLUICE_DEPLOYMENT_ROOT` | required | expected storage root |
//! | `SLUICE_CODEC` | `json` | payload codec (`json`, `yaml`) |
//! | `SLUICE_LOG_FORMAT` | `pretty` | `json` or `pretty` |
//! | `SLUICE_DELETE_PROBE` | `true` | probe concrete keys before delete |
//! | `SLUICE_TRIGGER_SUFFIXES` | `processed=.trigger` | per-type object suffixes |
//! | `SLUICE_BROADCAST_THRESHOLD` | `100` | bisect envelopes above this size |
//! | `SLUICE_BROADCAST_KILL_INTERVAL` | `10` | deliveries between kill checks |
//! | `SLUICE_BROADCAST_MAX_IDS` | `1000000` | exclusive broadcast size limit |
//! | `SLUICE_BROADCAST_KILL_ID` | `kill` | id of the kill-signal message |
//! | `SLUICE_TIERS` | 2g/8g/16g/64g | `queue:executable,...`, smallest first |
//! | `SLUICE_TIMEOUT_MULTIPLIER` | `5` | wallclock multiplier |
//! | `SLUICE_MIN_TIMEOUT_SECS` | `1200` | lower timeout clamp |
//! | `SLUICE_MAX_TIMEOUT_SECS` | `172800` | upper timeout clamp |
//! | `SLUICE_MEMORY_EXIT_CODES` | `31,32,33,34` | exit codes meaning out-of-memory |
//! | `SLUICE_TIMEOUT_GROWTH` | `1.5` | timeout scale factor per timeout |
//! | `SLUICE_MAX_RETRIES` | `4` | retries before exhaustion |

use std::str::FromStr;

use sluice_core::LogFormat;

use crate::broadcast::BroadcastConfig;
use crate::codec::CodecKind;
use crate::error::{Error, Result};
use crate::escalation::EscalationPolicy;
use crate::messages::{MessageEncoding, MessageType};
use crate::planner::{PlannerConfig, ResourceTier};

const ENV_DEPLOYMENT_ROOT: &str = "SLUICE_DEPLOYMENT_ROOT";
const ENV_CODEC: &str = "SLUICE_CODEC";
const ENV_LOG_FORMAT: &str = "SLUICE_LOG_FORMAT";
const ENV_DELETE_PROBE: &str = "SLUICE_DELETE_PROBE";
const ENV_TRIGGER_SUFFIXES: &str = "SLUICE_TRIGGER_SUFFIXES";
const ENV_BROADCAST_THRESHOLD: &str = "SLUICE_BROADCAST_THRESHOLD";
const ENV_BROADCAST_KILL_INTERVAL: &str = "SLUICE_BROADCAST_KILL_INTERVAL";
const ENV_BROADCAST_MAX_IDS: &str = "SLUICE_BROADCAST_MAX_IDS";
const ENV_BROADCAST_KILL_ID: &str = "SLUICE_BROADCAST_KILL_ID";
const ENV_TIERS: &str = "SLUICE_TIERS";
const ENV_TIMEOUT_MULTIPLIER: &str = "SLUICE_TIMEOUT_MULTIPLIER";
const ENV_MIN_TIMEOUT_SECS: &str = "SLUICE_MIN_TIMEOUT_SECS";
const ENV_MAX_TIMEOUT_SECS: &str = "SLUICE_MAX_TIMEOUT_SECS";
const ENV_MEMORY_EXIT_CODES: &str = "SLUICE_MEMORY_EXIT_CODES";
const ENV_TIMEOUT_GROWTH: &str = "SLUICE_TIMEOUT_GROWTH";
const ENV_MAX_RETRIES: &str = "SLUICE_MAX_RETRIES";

/// Complete handler configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SluiceConfig {
    /// The storage root this deployment owns.
    pub deployment_root: String,
    /// Payload and metadata codec.
    pub codec: CodecKind,
    /// Log output format.
    pub log_format: LogFormat,
    /// Probe concrete keys before deleting them.
    pub check_exists_before_delete: bool,
    /// Per-type object-name suffixes.
    pub encoding: MessageEncoding,
    /// Broadcast tuning.
    pub broadcast: BroadcastConfig,
    /// Planner tuning.
    pub planner: PlannerConfig,
    /// Escalation tuning.
    pub escalation: EscalationPolicy,
}

impl SluiceConfig {
    /// Creates a configuration with defaults for one deployment root.
    #[must_use]
    pub fn new(deployment_root: impl Into<String>) -> Self {
        Self {
            deployment_root: deployment_root.into(),
            codec: CodecKind::default(),
            log_format: LogFormat::default(),
            check_exists_before_delete: true,
            encoding: MessageEncoding::default(),
            broadcast: BroadcastConfig::default(),
            planner: PlannerConfig::default(),
            escalation: EscalationPolicy::default(),
        }
    }

    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the root is missing or any value
    /// is malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads configuration with a custom environment source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the root is missing or any value
    /// is malformed.
    pub fn from_env_with<F>(get_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let deployment_root = get_env(ENV_DEPLOYMENT_ROOT)
            .filter(|root| !root.trim().is_empty())
            .ok_or_else(|| Error::configuration(format!("{ENV_DEPLOYMENT_ROOT} is required")))?;
        let mut config = Self::new(deployment_root.trim());

        if let Some(raw) = get_env(ENV_CODEC) {
            config.codec = raw.parse()?;
        }
        if let Some(raw) = get_env(ENV_LOG_FORMAT) {
            config.log_format = raw
                .parse()
                .map_err(|e| Error::configuration(format!("{ENV_LOG_FORMAT}: {e}")))?;
        }
        if let Some(raw) = get_env(ENV_DELETE_PROBE) {
            config.check_exists_before_delete = parse_bool(ENV_DELETE_PROBE, &raw)?;
        }
        if let Some(raw) = get_env(ENV_TRIGGER_SUFFIXES) {
            config.encoding = parse_suffixes(&raw)?;
        }

        let broadcast = &mut config.broadcast;
        broadcast.bifurcation_threshold =
            parse_positive(&get_env, ENV_BROADCAST_THRESHOLD, broadcast.bifurcation_threshold)?;
        broadcast.kill_check_interval =
            parse_positive(&get_env, ENV_BROADCAST_KILL_INTERVAL, broadcast.kill_check_interval)?;
        broadcast.max_ids = parse_positive(&get_env, ENV_BROADCAST_MAX_IDS, broadcast.max_ids)?;
        if let Some(raw) = get_env(ENV_BROADCAST_KILL_ID) {
            broadcast.kill_id = raw.trim().to_string();
        }

        let planner = &mut config.planner;
        if let Some(raw) = get_env(ENV_TIERS) {
            planner.tiers = parse_tiers(&raw)?;
        }
        planner.timeout_multiplier =
            parse_positive_f64(&get_env, ENV_TIMEOUT_MULTIPLIER, planner.timeout_multiplier)?;
        planner.min_timeout_seconds =
            parse_positive(&get_env, ENV_MIN_TIMEOUT_SECS, planner.min_timeout_seconds)?;
        planner.max_timeout_seconds =
            parse_positive(&get_env, ENV_MAX_TIMEOUT_SECS, planner.max_timeout_seconds)?;
        if planner.min_timeout_seconds > planner.max_timeout_seconds {
            return Err(Error::configuration(format!(
                "{ENV_MIN_TIMEOUT_SECS} must not exceed {ENV_MAX_TIMEOUT_SECS}"
            )));
        }

        let escalation = &mut config.escalation;
        if let Some(raw) = get_env(ENV_MEMORY_EXIT_CODES) {
            escalation.memory_exit_codes = parse_list(ENV_MEMORY_EXIT_CODES, &raw)?;
        }
        escalation.timeout_growth =
            parse_positive_f64(&get_env, ENV_TIMEOUT_GROWTH, escalation.timeout_growth)?;
        escalation.max_retries = parse_positive(&get_env, ENV_MAX_RETRIES, escalation.max_retries)?;

        Ok(config)
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::configuration(format!(
            "{key} must be a boolean, got '{raw}'"
        ))),
    }
}

fn parse_positive<F, T>(get_env: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialEq + Default,
{
    let Some(raw) = get_env(key) else {
        return Ok(default);
    };
    let parsed = raw.trim().parse::<T>().map_err(|_| {
        Error::configuration(format!("{key} must be a positive integer, got '{raw}'"))
    })?;
    if parsed == T::default() {
        return Err(Error::configuration(format!(
            "{key} must be greater than zero"
        )));
    }
    Ok(parsed)
}

fn parse_positive_f64<F>(get_env: &F, key: &str, default: f64) -> Result<f64>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => Ok(value),
        _ => Err(Error::configuration(format!(
            "{key} must be a positive number, got '{raw}'"
        ))),
    }
}

fn parse_list<T: FromStr>(key: &str, raw: &str) -> Result<Vec<T>> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse()
                .map_err(|_| Error::configuration(format!("{key}: invalid entry '{item}'")))
        })
        .collect()
}

fn parse_tiers(raw: &str) -> Result<Vec<ResourceTier>> {
    let tiers = raw
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| match item.split_once(':') {
            Some((queue, executable)) if !queue.is_empty() && !executable.is_empty() => {
                Ok(ResourceTier::new(queue, executable))
            }
            _ => Err(Error::configuration(format!(
                "{ENV_TIERS}: expected queue:executable, got '{item}'"
            ))),
        })
        .collect::<Result<Vec<_>>>()?;
    if tiers.is_empty() {
        return Err(Error::configuration(format!("{ENV_TIERS} lists no tiers")));
    }
    Ok(tiers)
}

fn parse_suffixes(raw: &str) -> Result<MessageEncoding> {
    let mut encoding = MessageEncoding::none();
    for item in raw.split(',').map(str::trim).filter(|i| !i.is_empty()) {
        let (kind, suffix) = item.split_once('=').ok_or_else(|| {
            Error::configuration(format!(
                "{ENV_TRIGGER_SUFFIXES}: expected type=suffix, got '{item}'"
            ))
        })?;
        let kind: MessageType = kind
            .trim()
            .parse()
            .map_err(|e| Error::configuration(format!("{ENV_TRIGGER_SUFFIXES}: {e}")))?;
        let suffix = suffix.trim();
        if !suffix.starts_with('.') || suffix.len() < 2 {
            return Err(Error::configuration(format!(
                "{ENV_TRIGGER_SUFFIXES}: suffix for {kind} must start with '.'"
            )));
        }
        encoding = encoding.with_suffix(kind, suffix);
    }
    Ok(encoding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<SluiceConfig> {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        SluiceConfig::from_env_with(|key| env.get(key).cloned())
    }

    #[test]
    fn root_is_required() {
        assert!(matches!(load(&[]), Err(Error::Configuration { .. })));
        assert!(load(&[(ENV_DEPLOYMENT_ROOT, "  ")]).is_err());
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[(ENV_DEPLOYMENT_ROOT, "hst-processing-dev")]).unwrap();
        assert_eq!(config, SluiceConfig::new("hst-processing-dev"));
        assert_eq!(config.encoding.suffix(MessageType::Processed), ".trigger");
        assert_eq!(config.planner.tiers.len(), 4);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            (ENV_DEPLOYMENT_ROOT, "ops"),
            (ENV_CODEC, "yaml"),
            (ENV_LOG_FORMAT, "json"),
            (ENV_DELETE_PROBE, "false"),
            (ENV_TRIGGER_SUFFIXES, "processed=.done, error=.trigger"),
            (ENV_BROADCAST_THRESHOLD, "50"),
            (ENV_TIERS, "small:job-s, big:job-b"),
            (ENV_TIMEOUT_GROWTH, "2.0"),
            (ENV_MEMORY_EXIT_CODES, "137"),
        ])
        .unwrap();
        assert_eq!(config.codec, CodecKind::Yaml);
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(!config.check_exists_before_delete);
        assert_eq!(config.encoding.suffix(MessageType::Processed), ".done");
        assert_eq!(config.encoding.suffix(MessageType::Error), ".trigger");
        assert_eq!(config.broadcast.bifurcation_threshold, 50);
        assert_eq!(config.planner.tiers[1], ResourceTier::new("big", "job-b"));
        assert!((config.escalation.timeout_growth - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.escalation.memory_exit_codes, vec![137]);
    }

    #[test]
    fn malformed_values_are_rejected() {
        for (key, value) in [
            (ENV_CODEC, "toml"),
            (ENV_DELETE_PROBE, "maybe"),
            (ENV_BROADCAST_THRESHOLD, "0"),
            (ENV_BROADCAST_MAX_IDS, "-5"),
            (ENV_TIERS, "no-colon"),
            (ENV_TIMEOUT_MULTIPLIER, "NaN"),
            (ENV_TRIGGER_SUFFIXES, "bogus=.x"),
            (ENV_MEMORY_EXIT_CODES, "31,abc"),
            (ENV_MIN_TIMEOUT_SECS, "999999"),
        ] {
            let result = load(&[(ENV_DEPLOYMENT_ROOT, "dev"), (key, value)]);
            assert!(
                matches!(result, Err(Error::Configuration { .. })),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn empty_suffix_list_disables_suffixes() {
        let config = load(&[(ENV_DEPLOYMENT_ROOT, "dev"), (ENV_TRIGGER_SUFFIXES, "")]).unwrap();
        assert_eq!(config.encoding.suffix(MessageType::Processed), "");
    }
}
