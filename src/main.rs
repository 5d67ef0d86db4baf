use std::io::{self, IsTerminal};
use std::process;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, shells};
use replygate::commands::config::{self, ConfigArgs};
use replygate::commands::reply::{self, ReplyArgs};
use tracing_subscriber::EnvFilter;

const ROOT_HELP_EXAMPLES: &str = "Examples:\n  replygate reply --provider gemini --model gemini-2.5-flash \"How do I create a post?\"\n  echo \"How do I register?\" | replygate reply --provider openai --model gpt-4o-mini --json\n  replygate config check\n  replygate completion bash > ~/.local/share/bash-completion/completions/replygate";

const REPLY_HELP_EXAMPLES: &str = "Examples:\n  replygate reply --provider openai --model gpt-4o-mini \"How do I create a post?\"\n  replygate reply --profile blog --history turns.json --trace \"And how do I add images?\"\n  replygate reply --provider gemini --model gemini-2.5-flash --dry-run \"Hi\"";

#[derive(Debug, Parser)]
#[command(
    name = "replygate",
    about = "Gated LLM reply generation for chat assistants",
    after_help = ROOT_HELP_EXAMPLES
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Generate one gated reply", after_help = REPLY_HELP_EXAMPLES)]
    Reply(ReplyArgs),
    #[command(about = "Manage local config")]
    Config(ConfigArgs),
    #[command(about = "Generate shell completion script")]
    Completion {
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

fn print_completion(shell: CompletionShell) {
    let mut cmd = Cli::command();
    match shell {
        CompletionShell::Bash => generate(shells::Bash, &mut cmd, "replygate", &mut io::stdout()),
        CompletionShell::Zsh => generate(shells::Zsh, &mut cmd, "replygate", &mut io::stdout()),
        CompletionShell::Fish => generate(shells::Fish, &mut cmd, "replygate", &mut io::stdout()),
    }
}

fn init_logging(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let directive = match &cli.command {
        Commands::Reply(args) => args.log_directive(),
        _ => "warn",
    };
    init_logging(directive);

    let result = match cli.command {
        Commands::Reply(args) => reply::run(args).await,
        Commands::Config(args) => config::run(args),
        Commands::Completion { shell } => {
            print_completion(shell);
            Ok(())
        }
    };

    if let Err(err) = result {
        eprintln!("{err}");
        process::exit(1);
    }
}
