use std::env;
use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use clap::Args;
use owo_colors::OwoColorize;
use serde_json::{Value, json};
use tracing::info;

use crate::config::{self, ProfileConfig};
use crate::llm::provider::{
    PromptPayload, Provider, ProviderSettings, build_adapter, is_api_key_present,
};
use crate::observe::{LlmCall, LogObserver, MemoryObserver, Observer};
use crate::workflow::context::{ConversationContext, DEFAULT_HISTORY_LIMIT, Turn};
use crate::workflow::prompts::{DEFAULT_PERSONA, PromptBuilder, Stage};
use crate::workflow::{ExhaustionPolicy, GenerationWorkflow, WorkflowReport};

#[derive(Debug, Args, Clone)]
pub struct ReplyArgs {
    /// LLM provider: openai or gemini
    #[arg(long)]
    provider: Option<String>,
    /// Model identifier passed to the provider
    #[arg(long)]
    model: Option<String>,
    /// Profile name from the config file
    #[arg(long)]
    profile: Option<String>,
    /// JSON file with prior turns: [{"role":"user","text":"..."}]
    #[arg(long, value_name = "FILE")]
    history: Option<PathBuf>,
    /// Override the assistant persona
    #[arg(long)]
    system: Option<String>,
    /// Override the provider API base URL
    #[arg(long)]
    base_url: Option<String>,
    /// Per-request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Transport retries on throttling and server errors
    #[arg(long)]
    retries: Option<u32>,
    /// Base retry delay in milliseconds
    #[arg(long)]
    retry_delay: Option<u64>,
    /// Number of prior turns kept from the history file
    #[arg(long)]
    history_limit: Option<usize>,
    /// Answer when no draft passes both gates: last-draft or fallback
    #[arg(long)]
    on_exhaustion: Option<String>,
    /// Output format: text or json
    #[arg(long)]
    output: Option<String>,
    /// Shorthand for --output json
    #[arg(long)]
    json: bool,
    /// Print the intent request without calling the provider
    #[arg(long)]
    dry_run: bool,
    /// Print every LLM call to stderr
    #[arg(long)]
    trace: bool,
    /// Debug logging on stderr
    #[arg(short, long)]
    pub verbose: bool,
    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,
    /// User message; read from stdin when omitted
    message: Option<String>,
}

impl ReplyArgs {
    pub fn log_directive(&self) -> &'static str {
        if self.quiet {
            "error"
        } else if self.verbose {
            "debug"
        } else {
            "warn"
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Text,
    Json,
}

impl OutputMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }
}

#[derive(Debug)]
struct ResolvedRequest {
    provider: Provider,
    model: String,
    persona: String,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
    retries: u32,
    retry_delay_ms: u64,
    history_limit: usize,
    exhaustion: ExhaustionPolicy,
    output: OutputMode,
}

pub async fn run(args: ReplyArgs) -> Result<()> {
    let profile = match args.profile.as_deref() {
        Some(name) => config::load_profile(name)?,
        None => ProfileConfig::default(),
    };
    let request = resolve(&args, &profile)?;
    let message = read_message(args.message.as_deref())?;
    let context = load_history(args.history.as_deref(), request.history_limit)?;
    let prompts = PromptBuilder::new(request.persona.clone());

    if args.dry_run {
        print_dry_run(&request, &prompts, &message, &context)?;
        return Ok(());
    }

    info!(
        provider = request.provider.as_str(),
        model = %request.model,
        api_key_present = is_api_key_present(request.provider),
        history_turns = context.len(),
        "resolved reply request"
    );

    let mut settings = ProviderSettings::from_env(request.provider)?;
    settings.base_url = request.base_url.clone();
    settings.timeout_secs = request.timeout_secs;
    settings.retries = request.retries;
    settings.retry_delay_ms = request.retry_delay_ms;

    let recorder = Arc::new(MemoryObserver::new());
    let observer: Arc<dyn Observer> = if args.trace || request.output == OutputMode::Json {
        recorder.clone() as Arc<dyn Observer>
    } else {
        Arc::new(LogObserver)
    };

    let workflow = GenerationWorkflow::new(build_adapter(request.provider, settings))
        .with_observer(observer)
        .with_prompts(prompts)
        .with_exhaustion_policy(request.exhaustion);
    let report = workflow.run(&request.model, &message, &context).await;
    let calls = recorder.calls();

    if args.trace && !args.quiet {
        print_trace(&calls);
    }

    match request.output {
        OutputMode::Text => println!("{}", report.answer),
        OutputMode::Json => println!("{}", report_json(&request, &report, &calls)),
    }
    Ok(())
}

fn resolve(args: &ReplyArgs, profile: &ProfileConfig) -> Result<ResolvedRequest> {
    let provider = match (&args.provider, env_value("RG_PROVIDER"), &profile.provider) {
        (Some(value), _, _) => parse_provider(value, "--provider")?,
        (None, Some(value), _) => parse_provider(&value, "RG_PROVIDER")?,
        (None, None, Some(value)) => parse_provider(value, "profile provider")?,
        (None, None, None) => Provider::Openai,
    };

    let model = args
        .model
        .clone()
        .or_else(|| env_value("RG_MODEL"))
        .or_else(|| profile.model.clone())
        .filter(|model| !model.trim().is_empty())
        .ok_or_else(|| anyhow!("No model provided. Use --model or set RG_MODEL."))?;

    let output = if args.json {
        OutputMode::Json
    } else {
        let raw = args
            .output
            .clone()
            .or_else(|| env_value("RG_OUTPUT"))
            .or_else(|| profile.output.clone());
        match raw.as_deref().map(str::trim) {
            None | Some("text") => OutputMode::Text,
            Some("json") => OutputMode::Json,
            Some(other) => bail!("Invalid output '{other}'. Supported values: text, json."),
        }
    };

    let exhaustion = match args.on_exhaustion.as_ref().or(profile.on_exhaustion.as_ref()) {
        Some(value) => value.parse::<ExhaustionPolicy>().map_err(|value| {
            anyhow!("Invalid --on-exhaustion '{value}'. Supported values: last-draft, fallback.")
        })?,
        None => ExhaustionPolicy::default(),
    };

    Ok(ResolvedRequest {
        provider,
        model,
        persona: args
            .system
            .clone()
            .or_else(|| profile.system.clone())
            .unwrap_or_else(|| DEFAULT_PERSONA.to_string()),
        base_url: args.base_url.clone().or_else(|| profile.base_url.clone()),
        timeout_secs: numeric(args.timeout, "RG_TIMEOUT", profile.timeout)?,
        retries: numeric(args.retries, "RG_RETRIES", profile.retries)?.unwrap_or(0),
        retry_delay_ms: numeric(args.retry_delay, "RG_RETRY_DELAY", profile.retry_delay)?
            .unwrap_or(500),
        history_limit: args
            .history_limit
            .or(profile.history_limit)
            .unwrap_or(DEFAULT_HISTORY_LIMIT),
        exhaustion,
        output,
    })
}

fn parse_provider(value: &str, source: &str) -> Result<Provider> {
    value
        .parse::<Provider>()
        .map_err(|_| anyhow!("Invalid {source} '{value}'. Supported values: openai, gemini."))
}

fn numeric<T: std::str::FromStr>(cli: Option<T>, key: &str, profile: Option<T>) -> Result<Option<T>> {
    if cli.is_some() {
        return Ok(cli);
    }
    match env_value(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow!("Invalid {key} '{raw}'. Expected a non-negative integer.")),
        None => Ok(profile),
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_message(argument: Option<&str>) -> Result<String> {
    let message = match argument {
        Some(message) => message.to_string(),
        None if !io::stdin().is_terminal() => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .map_err(|err| anyhow!("Failed to read message from stdin: {err}"))?;
            buffer
        }
        None => String::new(),
    };

    let message = message.trim();
    if message.is_empty() {
        bail!("No message provided. Pass it as an argument or via stdin.");
    }
    Ok(message.to_string())
}

fn load_history(path: Option<&Path>, limit: usize) -> Result<ConversationContext> {
    let mut context = ConversationContext::with_limit(limit);
    let Some(path) = path else {
        return Ok(context);
    };

    let raw = fs::read_to_string(path)
        .map_err(|err| anyhow!("Failed to read history file '{}': {err}", path.display()))?;
    let turns: Vec<Turn> = serde_json::from_str(&raw)
        .map_err(|err| anyhow!("Failed to parse history file '{}': {err}", path.display()))?;
    context.extend(turns);
    Ok(context)
}

fn print_dry_run(
    request: &ResolvedRequest,
    prompts: &PromptBuilder,
    message: &str,
    context: &ConversationContext,
) -> Result<()> {
    let mut body = json!({
        "dry_run": true,
        "provider": request.provider.as_str(),
        "model": request.model,
        "output": request.output.as_str(),
        "stage": Stage::Intent.as_str(),
        "history_turns": context.len(),
        "on_exhaustion": request.exhaustion.as_str(),
        "timeout": request.timeout_secs,
        "retries": request.retries,
    });
    match prompts.intent(message).to_payload(request.provider.shape()) {
        PromptPayload::Messages(messages) => body["messages"] = serde_json::to_value(messages)?,
        PromptPayload::Flattened(prompt) => body["prompt"] = Value::String(prompt),
    }
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

fn print_trace(calls: &[LlmCall]) {
    for (index, call) in calls.iter().enumerate() {
        let label = match call.stage {
            Stage::Intent => call.stage.as_str().cyan().to_string(),
            Stage::Draft => call.stage.as_str().green().to_string(),
            Stage::Toxicity => call.stage.as_str().red().to_string(),
            Stage::Fulfillment => call.stage.as_str().yellow().to_string(),
        };
        match &call.error {
            Some(err) => eprintln!("[{}] {label} {}", index + 1, err.red()),
            None => eprintln!(
                "[{}] {label} {}",
                index + 1,
                call.completion.trim().replace('\n', " ").dimmed()
            ),
        }
    }
}

fn report_json(request: &ResolvedRequest, report: &WorkflowReport, calls: &[LlmCall]) -> Value {
    json!({
        "provider": request.provider.as_str(),
        "model": request.model,
        "answer": report.answer,
        "outcome": report.outcome,
        "drafts": report.drafts,
        "intent": report.intent,
        "reasons": report.reasons,
        "calls": calls,
    })
}
