//! Provider failover and health tracking
//!
//! Ranks and rotates among backend providers per language and stage.
//! Attempts go to the top-ranked provider; failures and timeouts demote a
//! provider into a cool-down window, sustained elevated latency does the
//! same, and an excluded provider is reinstated automatically once its
//! cool-down elapses or an explicit health probe succeeds.
//!
//! The health table is the one piece of state shared across all sessions
//! for a given language: writes take the lock exclusively, reads are
//! concurrent, and nothing is held across an await point.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;

/// Pipeline stage a provider serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Speech-to-text
    Transcription,
    /// Language-model generation
    Generation,
    /// Text-to-speech
    Synthesis,
}

impl ProviderKind {
    /// Stage name for logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transcription => "transcription",
            Self::Generation => "generation",
            Self::Synthesis => "synthesis",
        }
    }
}

/// Target latency/quality tier for a configured provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderTier {
    /// Interactive budget, demoted aggressively on slow responses
    Realtime,
    /// Default conversational budget
    #[default]
    Standard,
    /// Quality over latency
    Quality,
}

impl ProviderTier {
    /// Latency above which a successful call still counts as a strike
    #[must_use]
    pub const fn target_latency(self) -> Duration {
        match self {
            Self::Realtime => Duration::from_millis(800),
            Self::Standard => Duration::from_millis(2500),
            Self::Quality => Duration::from_millis(6000),
        }
    }
}

/// One ranked provider in a chain
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEntry {
    /// Provider id, resolved against the provider registry
    pub id: String,
    /// Latency/quality tier
    #[serde(default)]
    pub tier: ProviderTier,
}

impl ProviderEntry {
    /// Convenience constructor for the default tier
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            tier: ProviderTier::default(),
        }
    }
}

/// Ordered provider lists for each pipeline stage
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderChain {
    /// Speech-to-text providers, highest rank first
    #[serde(default)]
    pub transcription: Vec<ProviderEntry>,
    /// Language-model providers, highest rank first
    #[serde(default)]
    pub generation: Vec<ProviderEntry>,
    /// Text-to-speech providers, highest rank first
    #[serde(default)]
    pub synthesis: Vec<ProviderEntry>,
}

impl ProviderChain {
    /// Chain slice for one stage
    #[must_use]
    pub fn for_kind(&self, kind: ProviderKind) -> &[ProviderEntry] {
        match kind {
            ProviderKind::Transcription => &self.transcription,
            ProviderKind::Generation => &self.generation,
            ProviderKind::Synthesis => &self.synthesis,
        }
    }
}

/// Provider chains keyed by language tag, with a default chain
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderChains {
    /// Chain used when no language-specific chain matches
    #[serde(default)]
    pub default: ProviderChain,
    /// Language-specific overrides, keyed by BCP 47 tag or primary subtag
    #[serde(default)]
    pub languages: HashMap<String, ProviderChain>,
}

impl ProviderChains {
    /// Chains for a deployment with no chains file: the `OpenAI` stack
    /// first, the independent vendors as fallbacks.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            default: ProviderChain {
                transcription: vec![
                    ProviderEntry::new("whisper"),
                    ProviderEntry::new("deepgram"),
                ],
                generation: vec![ProviderEntry::new("openai-chat")],
                synthesis: vec![
                    ProviderEntry::new("openai-tts"),
                    ProviderEntry::new("elevenlabs"),
                ],
            },
            languages: HashMap::new(),
        }
    }

    /// Resolve the chain for a language tag.
    ///
    /// Tries the exact tag, then the primary subtag (`es-MX` -> `es`),
    /// then the default chain.
    #[must_use]
    pub fn chain_for(&self, language: &str) -> &ProviderChain {
        if let Some(chain) = self.languages.get(language) {
            return chain;
        }
        if let Some(primary) = language.split('-').next() {
            if let Some(chain) = self.languages.get(primary) {
                return chain;
            }
        }
        &self.default
    }
}

/// Demotion and reinstatement policy
#[derive(Debug, Clone, Copy)]
pub struct FailoverPolicy {
    /// Consecutive failures before a provider is excluded from rotation
    pub max_consecutive_failures: u32,
    /// How long an excluded provider stays out of rotation
    pub cooldown: Duration,
    /// Successful-but-slow responses tolerated before demotion
    pub elevated_latency_strikes: u32,
}

impl Default for FailoverPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            cooldown: Duration::from_secs(30),
            elevated_latency_strikes: 3,
        }
    }
}

/// Health record for one provider, shared across sessions
#[derive(Debug, Clone)]
pub struct ProviderHealth {
    /// Provider id
    pub id: String,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// When the provider last succeeded
    pub last_success: Option<Instant>,
    /// Excluded from rotation until this instant
    pub cooldown_until: Option<Instant>,
    /// Successful calls over the tier latency target since the last
    /// on-target response
    pub latency_strikes: u32,
}

impl ProviderHealth {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            consecutive_failures: 0,
            last_success: None,
            cooldown_until: None,
            latency_strikes: 0,
        }
    }

    /// Whether the provider is currently excluded from rotation
    #[must_use]
    pub fn in_cooldown(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }
}

/// Ranks providers and rotates around unhealthy ones
pub struct FailoverManager {
    chains: ProviderChains,
    policy: FailoverPolicy,
    health: RwLock<HashMap<String, ProviderHealth>>,
}

impl FailoverManager {
    /// Create a manager over the configured chains
    #[must_use]
    pub fn new(chains: ProviderChains, policy: FailoverPolicy) -> Self {
        Self {
            chains,
            policy,
            health: RwLock::new(HashMap::new()),
        }
    }

    /// Providers to attempt for a stage and language, in rank order,
    /// with cooled-down providers excluded.
    ///
    /// Providers whose cool-down has elapsed are reinstated here with a
    /// fresh failure count.
    #[must_use]
    pub fn candidates(&self, kind: ProviderKind, language: &str) -> Vec<ProviderEntry> {
        let chain = self.chains.chain_for(language).for_kind(kind);
        let now = Instant::now();
        let mut health = self.health.write().unwrap_or_else(std::sync::PoisonError::into_inner);

        chain
            .iter()
            .filter(|entry| {
                let record = health
                    .entry(entry.id.clone())
                    .or_insert_with(|| ProviderHealth::new(&entry.id));

                if let Some(until) = record.cooldown_until {
                    if until > now {
                        return false;
                    }
                    // Cool-down elapsed: reinstate with a clean slate
                    record.cooldown_until = None;
                    record.consecutive_failures = 0;
                    record.latency_strikes = 0;
                    tracing::info!(provider = %entry.id, "provider reinstated after cool-down");
                }
                true
            })
            .cloned()
            .collect()
    }

    /// Record a successful provider call.
    ///
    /// Resets the failure count. A success slower than the tier target
    /// counts as a latency strike; sustained strikes demote the provider
    /// into cool-down even though it never errored.
    pub fn report_success(&self, id: &str, tier: ProviderTier, latency: Duration) {
        let now = Instant::now();
        let mut health = self.health.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let record = health
            .entry(id.to_string())
            .or_insert_with(|| ProviderHealth::new(id));

        record.consecutive_failures = 0;
        record.last_success = Some(now);

        if latency > tier.target_latency() {
            record.latency_strikes += 1;
            tracing::debug!(
                provider = id,
                latency_ms = latency.as_millis() as u64,
                strikes = record.latency_strikes,
                "provider over latency target"
            );
            if record.latency_strikes >= self.policy.elevated_latency_strikes {
                record.cooldown_until = Some(now + self.policy.cooldown);
                record.latency_strikes = 0;
                tracing::warn!(provider = id, "provider demoted for sustained elevated latency");
            }
        } else {
            record.latency_strikes = 0;
        }
    }

    /// Record a failed or timed-out provider call.
    ///
    /// Reaching the consecutive-failure limit excludes the provider from
    /// rotation for the cool-down window.
    pub fn report_failure(&self, id: &str) {
        let now = Instant::now();
        let mut health = self.health.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let record = health
            .entry(id.to_string())
            .or_insert_with(|| ProviderHealth::new(id));

        record.consecutive_failures += 1;
        if record.consecutive_failures >= self.policy.max_consecutive_failures {
            record.cooldown_until = Some(now + self.policy.cooldown);
            tracing::warn!(
                provider = id,
                failures = record.consecutive_failures,
                "provider excluded from rotation"
            );
        }
    }

    /// Reinstate a provider immediately after a successful health probe
    pub fn probe_success(&self, id: &str) {
        let mut health = self.health.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let record = health
            .entry(id.to_string())
            .or_insert_with(|| ProviderHealth::new(id));
        record.cooldown_until = None;
        record.consecutive_failures = 0;
        record.latency_strikes = 0;
        record.last_success = Some(Instant::now());
        tracing::info!(provider = id, "provider reinstated by health probe");
    }

    /// Snapshot of all tracked provider health records
    #[must_use]
    pub fn snapshot(&self) -> Vec<ProviderHealth> {
        let health = self.health.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut records: Vec<ProviderHealth> = health.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chains(ids: &[&str]) -> ProviderChains {
        ProviderChains {
            default: ProviderChain {
                generation: ids.iter().map(|id| ProviderEntry::new(id)).collect(),
                ..ProviderChain::default()
            },
            languages: HashMap::new(),
        }
    }

    fn candidate_ids(mgr: &FailoverManager) -> Vec<String> {
        mgr.candidates(ProviderKind::Generation, "en")
            .into_iter()
            .map(|e| e.id)
            .collect()
    }

    #[test]
    fn candidates_follow_configured_rank() {
        let mgr = FailoverManager::new(chains(&["primary", "backup"]), FailoverPolicy::default());
        assert_eq!(candidate_ids(&mgr), vec!["primary", "backup"]);
    }

    #[test]
    fn nth_consecutive_failure_excludes_provider() {
        let policy = FailoverPolicy {
            max_consecutive_failures: 3,
            ..FailoverPolicy::default()
        };
        let mgr = FailoverManager::new(chains(&["primary", "backup"]), policy);

        mgr.report_failure("primary");
        mgr.report_failure("primary");
        assert_eq!(candidate_ids(&mgr), vec!["primary", "backup"]);

        mgr.report_failure("primary");
        assert_eq!(candidate_ids(&mgr), vec!["backup"]);
    }

    #[test]
    fn success_resets_failure_count() {
        let policy = FailoverPolicy {
            max_consecutive_failures: 2,
            ..FailoverPolicy::default()
        };
        let mgr = FailoverManager::new(chains(&["primary"]), policy);

        mgr.report_failure("primary");
        mgr.report_success("primary", ProviderTier::Standard, Duration::from_millis(100));
        mgr.report_failure("primary");
        // Only one consecutive failure after the reset
        assert_eq!(candidate_ids(&mgr), vec!["primary"]);
    }

    #[test]
    fn probe_success_reinstates_immediately() {
        let policy = FailoverPolicy {
            max_consecutive_failures: 1,
            cooldown: Duration::from_secs(3600),
            ..FailoverPolicy::default()
        };
        let mgr = FailoverManager::new(chains(&["primary"]), policy);

        mgr.report_failure("primary");
        assert!(candidate_ids(&mgr).is_empty());

        mgr.probe_success("primary");
        assert_eq!(candidate_ids(&mgr), vec!["primary"]);
    }

    #[test]
    fn sustained_elevated_latency_demotes() {
        let policy = FailoverPolicy {
            elevated_latency_strikes: 2,
            cooldown: Duration::from_secs(3600),
            ..FailoverPolicy::default()
        };
        let mgr = FailoverManager::new(chains(&["primary", "backup"]), policy);
        let slow = ProviderTier::Realtime.target_latency() + Duration::from_millis(500);

        mgr.report_success("primary", ProviderTier::Realtime, slow);
        assert_eq!(candidate_ids(&mgr), vec!["primary", "backup"]);

        mgr.report_success("primary", ProviderTier::Realtime, slow);
        assert_eq!(candidate_ids(&mgr), vec!["backup"]);
    }

    #[test]
    fn on_target_success_clears_latency_strikes() {
        let policy = FailoverPolicy {
            elevated_latency_strikes: 2,
            ..FailoverPolicy::default()
        };
        let mgr = FailoverManager::new(chains(&["primary"]), policy);
        let slow = ProviderTier::Standard.target_latency() + Duration::from_millis(500);

        mgr.report_success("primary", ProviderTier::Standard, slow);
        mgr.report_success("primary", ProviderTier::Standard, Duration::from_millis(50));
        mgr.report_success("primary", ProviderTier::Standard, slow);
        assert_eq!(candidate_ids(&mgr), vec!["primary"]);
    }

    #[test]
    fn chain_resolution_falls_back_by_subtag() {
        let mut languages = HashMap::new();
        languages.insert(
            "es".to_string(),
            ProviderChain {
                generation: vec![ProviderEntry::new("spanish-llm")],
                ..ProviderChain::default()
            },
        );
        let chains = ProviderChains {
            default: ProviderChain {
                generation: vec![ProviderEntry::new("default-llm")],
                ..ProviderChain::default()
            },
            languages,
        };

        assert_eq!(chains.chain_for("es-MX").generation[0].id, "spanish-llm");
        assert_eq!(chains.chain_for("es").generation[0].id, "spanish-llm");
        assert_eq!(chains.chain_for("fr").generation[0].id, "default-llm");
    }

    #[test]
    fn chains_parse_from_toml() {
        let toml = r#"
            [default]
            generation = [{ id = "gpt", tier = "standard" }, { id = "fallback" }]
            transcription = [{ id = "whisper", tier = "realtime" }]

            [languages.es]
            generation = [{ id = "spanish-llm", tier = "quality" }]
        "#;
        let chains: ProviderChains = toml::from_str(toml).unwrap();
        assert_eq!(chains.default.generation.len(), 2);
        assert_eq!(chains.default.transcription[0].tier, ProviderTier::Realtime);
        assert_eq!(chains.chain_for("es").generation[0].id, "spanish-llm");
    }
}
