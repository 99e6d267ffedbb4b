//! Command-line adapter.
//!
//! The only layer that knows about argv, stdin, stdout/stderr separation,
//! and process exit codes. Everything else is handed to the engine as one
//! [`Invocation`].

use clap::Parser;
use std::error::Error;
use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;

use crate::core::attachment::Attachment;
use crate::core::config::Config;
use crate::core::engine::{Engine, Invocation, Reply};
use crate::core::history::HistoryStore;
use crate::core::mode::ModeSelection;
use crate::core::provider::OpenAiCompatProvider;
use crate::logging;

#[derive(Parser, Debug)]
#[command(
    name = "clipgen",
    version,
    about = "Send a prompt (with optional files) to a hosted LLM and print the answer",
    after_help = "The prompt is taken from the positional arguments, with piped stdin \
                  appended. A prompt of exactly /clear wipes the selected conversation."
)]
pub struct Args {
    /// Attach a file (repeatable); text files are inlined, binary files
    /// are sent as data URLs
    #[arg(short = 'f', long = "file", value_name = "PATH")]
    pub files: Vec<PathBuf>,

    /// Override the configured system prompt for this invocation
    #[arg(short = 's', long = "system", value_name = "PROMPT")]
    pub system: Option<String>,

    /// Ask for a JSON object response and strip markdown fences from it
    #[arg(short = 'j', long = "json")]
    pub json: bool,

    /// Request mode: auto, general, code, vision, ocr, or audio
    #[arg(short = 'm', long = "mode", default_value = "auto")]
    pub mode: ModeSelection,

    /// Sampling temperature for this invocation (0.0 to 2.0)
    #[arg(short = 't', long = "temperature", value_name = "T")]
    pub temperature: Option<f64>,

    /// Continue the named conversation, persisting this exchange
    #[arg(short = 'c', long = "chat", value_name = "NAME")]
    pub chat: Option<String>,

    /// Delete the named conversation and exit
    #[arg(long = "clear-chat", value_name = "NAME")]
    pub clear_chat: Option<String>,

    /// Store an API key in the credential pool and exit
    #[arg(long = "save-key", value_name = "KEY")]
    pub save_key: Option<String>,

    /// Store a web-search API key and exit
    #[arg(long = "save-search-key", value_name = "KEY")]
    pub save_search_key: Option<String>,

    /// Disable tool calling for this invocation
    #[arg(long = "no-tools")]
    pub no_tools: bool,

    /// Verbose diagnostics on stderr
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// The prompt itself
    #[arg(value_name = "PROMPT", trailing_var_arg = true)]
    pub prompt: Vec<String>,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    logging::init(args.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<(), Box<dyn Error>> {
    let config_path = Config::default_path().ok_or("could not determine a config directory")?;
    let mut config = Config::load_or_init(&config_path)?;

    // Key management and conversation deletion are side commands: they
    // touch local state and exit without contacting any provider.
    if let Some(key) = &args.save_key {
        config.add_api_key(key);
        config.save_to_path(&config_path)?;
        println!("API key saved ({} in pool).", config.api_keys.len());
        return Ok(());
    }
    if let Some(key) = &args.save_search_key {
        config.add_search_api_key(key);
        config.save_to_path(&config_path)?;
        println!("Search API key saved.");
        return Ok(());
    }

    let conversation_dir =
        Config::default_conversation_dir().ok_or("could not determine a data directory")?;
    let history = HistoryStore::new(
        conversation_dir,
        config.history_max_messages,
        config.history_max_chars,
        config.attachment_char_cost,
    );

    if let Some(id) = &args.clear_chat {
        history.clear(id)?;
        println!("Conversation '{id}' cleared.");
        return Ok(());
    }

    let prompt = read_prompt(&args.prompt);
    if prompt.trim().is_empty() && args.files.is_empty() {
        use clap::CommandFactory;
        Args::command().print_help()?;
        return Ok(());
    }

    let attachments = args
        .files
        .iter()
        .map(|path| Attachment::from_path(path))
        .collect::<Result<Vec<_>, _>>()?;

    let provider = Arc::new(OpenAiCompatProvider::new(&config.base_url)?);
    let engine = Engine::new(config, provider, history);

    let invocation = Invocation {
        prompt,
        attachments,
        mode: args.mode,
        conversation: args.chat.clone(),
        json_only: args.json,
        system_prompt: args.system.clone(),
        temperature: args.temperature,
        tools_enabled: !args.no_tools,
    };

    match engine.run(invocation).await {
        Ok(Reply::Text(text)) => {
            let output = if args.json {
                strip_json_fences(&text)
            } else {
                text
            };
            println!("{output}");
            Ok(())
        }
        Ok(Reply::ConversationCleared) => {
            println!("Conversation cleared.");
            Ok(())
        }
        Err(err) => {
            error!("invocation failed: {err}");
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}

/// Positional arguments joined with spaces, with piped stdin appended.
/// Stdin is only consumed when it is not a terminal, so an interactive
/// invocation never blocks waiting for input.
fn read_prompt(words: &[String]) -> String {
    let mut prompt = words.join(" ");
    let mut stdin = std::io::stdin();
    if !stdin.is_terminal() {
        let mut piped = String::new();
        if stdin.read_to_string(&mut piped).is_ok() && !piped.trim().is_empty() {
            if !prompt.is_empty() {
                prompt.push_str("\n\n");
            }
            prompt.push_str(piped.trim_end());
        }
    }
    prompt
}

/// Models often wrap a requested JSON object in a markdown code fence;
/// strip one surrounding fence (with or without a `json` tag).
fn strip_json_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let Some(inner) = rest.strip_suffix("```") else {
        return trimmed.to_string();
    };
    inner.trim().to_string()
}
