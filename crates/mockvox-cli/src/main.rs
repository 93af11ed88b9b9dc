use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use mockvox_client::device::{MemoryOutput, WavFileCapture, WavFileOutput};
use mockvox_client::{
    AudioPipeline, Conversation, Entry, OutputDevice, PipelineOptions, SessionHandle, SessionOptions,
};
use mockvox_core::config::{Config, LoggingConfig};
use mockvox_core::content::ContentStore;
use mockvox_gateway::{GatewayState, start_gateway};
use mockvox_providers::{UpstreamSettings, validate_upstream};

#[derive(Parser)]
#[command(name = "mockvox", about = "Realtime voice mock-interview server and client", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the interview gateway
    Gateway {
        /// Port to listen on (default: 3000)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Check that the upstream model service is reachable
    Validate {
        #[arg(long)]
        api_key: Option<String>,

        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        base_url: Option<String>,
    },

    /// List industries, interview types and stage thresholds
    Content,

    /// Run one interview turn from a WAV recording
    Talk {
        /// 16-bit PCM WAV file with the answer
        #[arg(short, long)]
        input: PathBuf,

        /// Where to write the interviewer's audio
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long)]
        industry: Option<String>,

        #[arg(long = "type")]
        interview_type: Option<String>,

        /// Realtime endpoint (default: client.url or the local gateway)
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let config = Config::load(&config_path)?;

    init_logging(cli.verbose, config.logging.as_ref());

    let (warnings, errors) = config.validate();
    for warning in &warnings {
        tracing::warn!("{warning}");
    }
    if !errors.is_empty() {
        for error in &errors {
            tracing::error!("{error}");
        }
        anyhow::bail!("invalid configuration in {}", config_path.display());
    }

    match cli.command {
        Commands::Gateway { port } => {
            let port = port.unwrap_or_else(|| config.gateway_port());
            let content = load_content(&config)?;
            tracing::info!(
                industries = content.industries().len(),
                interview_types = content.interview_types().len(),
                "Starting mockvox gateway on port {port}"
            );
            let state = GatewayState::new(Arc::new(config), Arc::new(content));
            start_gateway(Arc::new(state), port).await?;
        }
        Commands::Validate {
            api_key,
            model,
            base_url,
        } => {
            let settings = UpstreamSettings {
                api_key: api_key.or_else(|| config.api_key()),
                model: model.or_else(|| Some(config.chat_model())),
                base_url: base_url.or_else(|| Some(config.base_url())),
            };
            let models = validate_upstream(&settings).await?;
            println!("Configuration verified ({models} models available)");
        }
        Commands::Content => {
            let content = load_content(&config)?;
            print_content(&content);
        }
        Commands::Talk {
            input,
            output,
            industry,
            interview_type,
            url,
        } => {
            let industry = industry.unwrap_or_else(|| config.default_industry());
            let interview_type = interview_type.unwrap_or_else(|| config.default_interview_type());
            let base = url.unwrap_or_else(|| config.client_url());
            let url = reqwest::Url::parse_with_params(
                &base,
                &[("industry", industry.as_str()), ("type", interview_type.as_str())],
            )?;
            talk(&config, url.as_str(), &input, output.as_deref()).await?;
        }
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise `logging.level` (or info/debug by `--verbose`)
/// plus the per-crate filters.
fn init_logging(verbose: bool, logging: Option<&LoggingConfig>) {
    let level = logging
        .and_then(|l| l.level.clone())
        .unwrap_or_else(|| if verbose { "debug" } else { "info" }.to_string());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = EnvFilter::new(level);
        for directive in logging.map(|l| l.filters.as_slice()).unwrap_or_default() {
            match directive.parse() {
                Ok(d) => filter = filter.add_directive(d),
                Err(e) => eprintln!("Ignoring log filter '{directive}': {e}"),
            }
        }
        filter
    });

    let writer = match logging.map(|l| l.output.as_str()) {
        Some("stdout") => BoxMakeWriter::new(std::io::stdout),
        _ => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    if logging.is_some_and(|l| l.format == "json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_content(config: &Config) -> anyhow::Result<ContentStore> {
    let content = match config.content_path() {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading interview content");
            ContentStore::load(&path)?
        }
        None => ContentStore::builtin()?,
    };
    Ok(content)
}

fn print_content(content: &ContentStore) {
    println!("Industries:");
    for industry in content.industries() {
        println!("  {:<12} {}", industry.id, industry.name);
    }

    println!("\nInterview types:");
    for interview in content.interview_types() {
        println!("  {:<12} {}", interview.id, interview.name);
        let mut threshold = 0;
        for (index, stage) in interview.stages.iter().enumerate() {
            println!(
                "    {}. {:<20} from {threshold} turns ({} prompts)",
                index + 1,
                stage.name,
                stage.prompts.len()
            );
            threshold += stage.expected_duration;
        }
    }
}

async fn talk(config: &Config, url: &str, input: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let session = SessionHandle::new(
        SessionOptions::new(url).with_turn_timeout(Duration::from_secs(config.turn_timeout_secs())),
    );
    let output_device: Box<dyn OutputDevice> = match output {
        Some(path) => Box::new(WavFileOutput::new(path)),
        None => Box::new(MemoryOutput::new()),
    };
    let pipeline = AudioPipeline::new(
        session,
        Box::new(WavFileCapture::new(input)),
        output_device,
        PipelineOptions::from_config(config),
    );

    pipeline.connect().await?;
    let result = run_interview(&pipeline).await;
    pipeline.disconnect().await;

    let conversation = result?;
    for entry in conversation.entries() {
        match entry {
            Entry::Candidate(text) => println!("You: {text}"),
            Entry::Interviewer(text) => println!("Interviewer: {text}"),
            Entry::StageChange { stage, progress } => {
                println!("-- {stage} ({}%) --", progress.progress_percent)
            }
            Entry::Notice(text) => println!("[{text}]"),
        }
    }
    if let Some(path) = output {
        println!("Interviewer audio saved to {}", path.display());
    }
    Ok(())
}

async fn run_interview(pipeline: &AudioPipeline) -> anyhow::Result<Conversation> {
    let mut conversation = Conversation::new();
    conversation.record(&pipeline.begin().await?);

    pipeline.start_recording().await?;
    while !pipeline.capture_finished().await {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    match pipeline.stop_and_submit(conversation.history()).await {
        Ok(outcome) => conversation.record(&outcome),
        Err(e) => conversation.record_failure(&e),
    }

    let closing = pipeline.session().finish(conversation.history()).await?;
    conversation.record(&closing);
    Ok(conversation)
}
