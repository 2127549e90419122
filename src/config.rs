//! Configuration management for the relay
//!
//! Everything loads from environment variables with sane defaults; the
//! provider failover chains additionally load from an optional TOML file.

use std::path::PathBuf;
use std::time::Duration;

use crate::providers::failover::{FailoverPolicy, ProviderChains};
use crate::{Error, Result};

/// Relay configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP/WebSocket API listens on
    pub port: u16,

    /// Utterance boundary and fallback tuning
    pub ingest: IngestConfig,

    /// Silence supervision tuning
    pub supervisor: SupervisorConfig,

    /// Per-stage latency budgets and history window
    pub pipeline: PipelineConfig,

    /// Response cache tuning
    pub cache: CacheConfig,

    /// Latency window size and alert target
    pub metrics: MetricsConfig,

    /// Provider failover chains and policy
    pub chains: ProviderChains,

    /// Failover thresholds
    pub failover: FailoverPolicy,

    /// Workflow service base URL, when contexts load over HTTP
    pub workflow_url: Option<String>,

    /// API keys
    pub api_keys: ApiKeys,

    /// Path to data directory (provider chains file, etc)
    pub data_dir: PathBuf,
}

/// Utterance boundary detection tuning
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Minimum buffered bytes before a boundary can hold
    pub boundary_bytes: usize,

    /// Minimum buffered span before a boundary can hold
    pub boundary_span: Duration,

    /// Minimum buffered chunk count before a boundary can hold
    pub boundary_chunks: usize,

    /// Fallback flush window measured from first buffered chunk
    pub fallback_window: Duration,
}

/// Silence supervision tuning
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Inactivity span that triggers one re-engagement prompt
    pub silence_budget: Duration,

    /// Consecutive silent periods tolerated before farewell teardown
    pub max_silent_periods: u32,

    /// Prompt spoken after each silent period
    pub reengagement_prompt: String,

    /// Farewell spoken before silence teardown
    pub farewell: String,
}

/// Per-stage pipeline latency budgets
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Transcription budget
    pub transcription_budget: Duration,

    /// Generation budget
    pub generation_budget: Duration,

    /// Synthesis budget
    pub synthesis_budget: Duration,

    /// Number of recent turns forwarded to generation
    pub history_window: usize,
}

/// Response cache tuning
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum cached entries before LRU eviction
    pub capacity: usize,

    /// Cosine similarity threshold for semantic hits
    pub similarity_threshold: f32,
}

/// Rolling latency metrics tuning
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Samples kept in the rolling window
    pub window: usize,

    /// p95 latency above this raises a performance alert
    pub p95_target: Duration,
}

/// API keys for external providers
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper, chat, TTS, embeddings)
    pub openai: Option<String>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<String>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<String>,
}

/// Return the data directory, creating it if needed
///
/// Uses `~/.local/share/callflow/relay/` on Linux
pub fn data_dir() -> PathBuf {
    let dir = directories::ProjectDirs::from("dev", "callflow", "callflow").map_or_else(
        || PathBuf::from(".callflow/relay"),
        |d| d.data_dir().join("relay"),
    );

    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!(
            path = %dir.display(),
            error = %e,
            "failed to create data directory"
        );
    }

    dir
}

impl Config {
    /// Load configuration from the environment
    ///
    /// # Errors
    ///
    /// Returns error if the provider chains file exists but cannot be
    /// parsed, or a tuning value is out of range.
    pub fn load() -> Result<Self> {
        let api_keys = ApiKeys {
            openai: std::env::var("OPENAI_API_KEY").ok(),
            deepgram: std::env::var("DEEPGRAM_API_KEY").ok(),
            elevenlabs: std::env::var("ELEVENLABS_API_KEY").ok(),
        };

        let port = std::env::var("CALLFLOW_PORT")
            .or_else(|_| std::env::var("PORT"))
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(18750);

        let ingest = IngestConfig {
            boundary_bytes: env_parse("CALLFLOW_BOUNDARY_BYTES", 1600),
            boundary_span: Duration::from_millis(env_parse("CALLFLOW_BOUNDARY_SPAN_MS", 700)),
            boundary_chunks: env_parse("CALLFLOW_BOUNDARY_CHUNKS", 2),
            fallback_window: Duration::from_millis(env_parse(
                "CALLFLOW_FALLBACK_WINDOW_MS",
                3000,
            )),
        };

        let supervisor = SupervisorConfig {
            silence_budget: Duration::from_millis(env_parse("CALLFLOW_SILENCE_BUDGET_MS", 15_000)),
            max_silent_periods: env_parse("CALLFLOW_MAX_SILENT_PERIODS", 2),
            reengagement_prompt: std::env::var("CALLFLOW_REENGAGEMENT_PROMPT")
                .unwrap_or_else(|_| "Are you still there?".to_string()),
            farewell: std::env::var("CALLFLOW_FAREWELL").unwrap_or_else(|_| {
                "It seems we got disconnected. Goodbye for now.".to_string()
            }),
        };

        let pipeline = PipelineConfig {
            transcription_budget: Duration::from_millis(env_parse("CALLFLOW_STT_BUDGET_MS", 5000)),
            generation_budget: Duration::from_millis(env_parse(
                "CALLFLOW_GENERATION_BUDGET_MS",
                8000,
            )),
            synthesis_budget: Duration::from_millis(env_parse("CALLFLOW_TTS_BUDGET_MS", 5000)),
            history_window: env_parse("CALLFLOW_HISTORY_WINDOW", 8),
        };

        let cache = CacheConfig {
            capacity: env_parse("CALLFLOW_CACHE_CAPACITY", 256),
            similarity_threshold: env_parse("CALLFLOW_CACHE_SIMILARITY", 0.85_f32),
        };
        if !(0.0..=1.0).contains(&cache.similarity_threshold) {
            return Err(Error::Config(format!(
                "CALLFLOW_CACHE_SIMILARITY must be within [0, 1], got {}",
                cache.similarity_threshold
            )));
        }
        if cache.capacity == 0 {
            return Err(Error::Config(
                "CALLFLOW_CACHE_CAPACITY must be at least 1".to_string(),
            ));
        }

        let metrics = MetricsConfig {
            window: env_parse("CALLFLOW_METRICS_WINDOW", 100),
            p95_target: Duration::from_millis(env_parse("CALLFLOW_P95_TARGET_MS", 2500)),
        };

        let data_dir = data_dir();

        // Failover chains load from TOML when the file is present and
        // otherwise fall back to the built-in chains.
        let chains = match std::env::var("CALLFLOW_PROVIDERS_FILE") {
            Ok(path) => Self::load_chains(PathBuf::from(path))?,
            Err(_) => {
                let default = data_dir.join("providers.toml");
                if default.exists() {
                    Self::load_chains(default)?
                } else {
                    ProviderChains::builtin()
                }
            }
        };

        let failover = FailoverPolicy::default();
        let workflow_url = std::env::var("CALLFLOW_WORKFLOW_URL").ok();

        Ok(Self {
            port,
            ingest,
            supervisor,
            pipeline,
            cache,
            metrics,
            chains,
            failover,
            workflow_url,
            api_keys,
            data_dir,
        })
    }

    /// Parse a provider chains file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    fn load_chains(path: PathBuf) -> Result<ProviderChains> {
        let text = std::fs::read_to_string(&path)?;
        let chains: ProviderChains = toml::from_str(&text)?;
        tracing::info!(path = %path.display(), "loaded provider chains");
        Ok(chains)
    }
}

/// Parse an env var, falling back to a default on absence or parse failure
fn env_parse<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
