use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use callflow_relay::api::ApiServer;
use callflow_relay::events::TracingSink;
use callflow_relay::providers::ProviderRegistry;
use callflow_relay::providers::deepgram::DeepgramTranscriber;
use callflow_relay::providers::elevenlabs::ElevenLabsSynthesizer;
use callflow_relay::providers::openai::{
    OpenAiChat, OpenAiEmbedder, OpenAiSpeech, WhisperTranscriber,
};
use callflow_relay::workflow::{
    HttpWorkflowSource, StaticWorkflowSource, WorkflowContext, WorkflowSource,
};
use callflow_relay::{Config, Orchestrator};

/// Callflow - real-time audio relay for voice-agent phone calls
#[derive(Parser)]
#[command(name = "callflow", version, about)]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "CALLFLOW_PORT", default_value = "18750")]
    port: u16,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Validate configuration and provider credentials, then exit
    Check,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,callflow_relay=info",
        1 => "info,callflow_relay=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;

    if let Some(Command::Check) = cli.command {
        return check(&config);
    }

    tracing::info!(port = cli.port, "starting callflow relay");

    let providers = Arc::new(build_providers(&config)?);
    if !providers.has_transcriber() {
        tracing::warn!("no transcription backend configured; only dtmf input will work");
    }
    if !providers.has_synthesizer() {
        tracing::warn!("no synthesis backend configured; replies will be text only");
    }
    let workflows = build_workflows(&config)?;
    let events = Arc::new(TracingSink);

    let port = cli.port;
    let orchestrator = Arc::new(Orchestrator::new(config, providers, workflows, events)?);
    let server = ApiServer::new(orchestrator, port);

    tracing::info!("callflow relay ready");
    server.run().await?;

    Ok(())
}

/// Register every backend the configured API keys allow
fn build_providers(config: &Config) -> anyhow::Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();

    if let Some(key) = &config.api_keys.openai {
        registry.register_transcriber(
            "whisper",
            Arc::new(WhisperTranscriber::new(key.clone(), "whisper-1".to_string())?),
        );
        registry.register_language_model("openai-chat", Arc::new(OpenAiChat::new(key.clone())?));
        registry.register_synthesizer("openai-tts", Arc::new(OpenAiSpeech::new(key.clone(), 1.0)?));
        registry.set_embedder(Arc::new(OpenAiEmbedder::new(key.clone())?));
    }

    if let Some(key) = &config.api_keys.deepgram {
        registry.register_transcriber(
            "deepgram",
            Arc::new(DeepgramTranscriber::new(key.clone(), "nova-2".to_string())?),
        );
    }

    if let Some(key) = &config.api_keys.elevenlabs {
        registry.register_synthesizer(
            "elevenlabs",
            Arc::new(ElevenLabsSynthesizer::new(key.clone())?),
        );
    }

    Ok(registry)
}

/// Workflow contexts come over HTTP when a URL is configured, otherwise
/// from a permissive static fallback
fn build_workflows(config: &Config) -> anyhow::Result<Arc<dyn WorkflowSource>> {
    match &config.workflow_url {
        Some(url) => Ok(Arc::new(HttpWorkflowSource::new(url.clone())?)),
        None => {
            tracing::warn!("no workflow URL configured, serving a default context");
            let fallback = WorkflowContext {
                instructions: "You are a helpful voice assistant. Keep replies short and \
                               conversational."
                    .to_string(),
                ..WorkflowContext::default()
            };
            Ok(Arc::new(
                StaticWorkflowSource::new().with_fallback(fallback),
            ))
        }
    }
}

/// Print what the loaded configuration can do
fn check(config: &Config) -> anyhow::Result<()> {
    println!("port:               {}", config.port);
    println!(
        "boundary:           {} bytes / {} ms / {} chunks",
        config.ingest.boundary_bytes,
        config.ingest.boundary_span.as_millis(),
        config.ingest.boundary_chunks
    );
    println!(
        "fallback window:    {} ms",
        config.ingest.fallback_window.as_millis()
    );
    println!(
        "silence budget:     {} ms x {}",
        config.supervisor.silence_budget.as_millis(),
        config.supervisor.max_silent_periods
    );
    println!(
        "cache:              {} entries, similarity {}",
        config.cache.capacity, config.cache.similarity_threshold
    );
    println!(
        "openai key:         {}",
        if config.api_keys.openai.is_some() { "set" } else { "missing" }
    );
    println!(
        "deepgram key:       {}",
        if config.api_keys.deepgram.is_some() { "set" } else { "missing" }
    );
    println!(
        "elevenlabs key:     {}",
        if config.api_keys.elevenlabs.is_some() { "set" } else { "missing" }
    );
    println!(
        "workflow source:    {}",
        config.workflow_url.as_deref().unwrap_or("static fallback")
    );

    if config.api_keys.openai.is_none() {
        anyhow::bail!("no OpenAI API key set; the relay cannot generate replies");
    }

    println!("configuration ok");
    Ok(())
}
