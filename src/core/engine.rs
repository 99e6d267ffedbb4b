//! Invocation orchestration.
//!
//! One `Engine::run` call takes a prompt plus attachments through mode
//! classification, cascade construction, the retry state machine, the
//! bounded tool loop, and finally history persistence. The engine holds
//! no per-invocation state; everything volatile lives in the cascade and
//! the working message list of a single run.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::api::{ChatMessage, ContentPart, MessageContent, ToolDefinition};
use crate::core::attachment::{Attachment, MimeCategory};
use crate::core::cascade::{random_seed, Cascade};
use crate::core::config::Config;
use crate::core::error::EngineError;
use crate::core::executor::Executor;
use crate::core::history::{ChatHistory, HistoryRole, HistoryStore};
use crate::core::mode::{classify, Mode, ModeSelection};
use crate::core::provider::{CompletionOutcome, CompletionProvider, CompletionRequest};
use crate::tools::ToolRegistry;

/// Tool round trips allowed within one attempt before it is abandoned.
const MAX_TOOL_ROUNDS: usize = 5;

/// Pause between attempts after a rate limit or upstream outage.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1500);

/// Everything one invocation needs, assembled by the CLI layer.
pub struct Invocation {
    pub prompt: String,
    pub attachments: Vec<Attachment>,
    pub mode: ModeSelection,
    /// Conversation id for durable history; `None` runs stateless.
    pub conversation: Option<String>,
    pub json_only: bool,
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
    pub tools_enabled: bool,
}

pub enum Reply {
    Text(String),
    ConversationCleared,
}

pub struct Engine {
    config: Config,
    provider: Arc<dyn CompletionProvider>,
    tools: ToolRegistry,
    history: HistoryStore,
    retry_delay: Duration,
    shuffle_seed: Option<u64>,
}

impl Engine {
    pub fn new(config: Config, provider: Arc<dyn CompletionProvider>, history: HistoryStore) -> Self {
        let tools = ToolRegistry::builtin(&config, Arc::clone(&provider));
        Engine {
            config,
            provider,
            tools,
            history,
            retry_delay: DEFAULT_RETRY_DELAY,
            shuffle_seed: None,
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Pin the credential shuffle for reproducible runs.
    pub fn with_shuffle_seed(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    pub async fn run(&self, invocation: Invocation) -> Result<Reply, EngineError> {
        // The clear command is intercepted before any request goes out.
        if invocation.prompt.trim() == "/clear" {
            if let Some(id) = &invocation.conversation {
                self.history.clear(id)?;
            }
            return Ok(Reply::ConversationCleared);
        }

        let mode = classify(invocation.mode, &invocation.prompt, &invocation.attachments);
        info!(mode = %mode, attachments = invocation.attachments.len(), "classified request");

        let user_content = build_user_content(&invocation.prompt, &invocation.attachments, mode);

        let mut history = invocation
            .conversation
            .as_deref()
            .map(|id| self.history.load(id));

        let system_prompt = invocation
            .system_prompt
            .as_deref()
            .unwrap_or(&self.config.system_prompt);
        let mut base_messages = vec![ChatMessage::system(system_prompt)];
        if let Some(history) = &history {
            base_messages.extend(replay(history));
        }
        base_messages.push(ChatMessage::user(user_content.clone()));

        let temperature = invocation.temperature.unwrap_or(self.config.temperature);
        let tool_definitions = (invocation.tools_enabled && !self.tools.is_empty())
            .then(|| self.tools.definitions());

        let seed = self.shuffle_seed.unwrap_or_else(random_seed);
        let mut cascade = Cascade::new(mode, &self.config, seed);
        let executor = Executor::new(self.retry_delay);

        let answer = executor
            .run(&mut cascade, |model, credential| {
                self.attempt(
                    model,
                    credential,
                    base_messages.clone(),
                    tool_definitions.clone(),
                    temperature,
                    invocation.json_only,
                )
            })
            .await?;

        let answer = if mode == Mode::Audio {
            scrub_transcription_artifacts(&answer)
        } else {
            answer
        };

        if let Some(history) = &mut history {
            // History failures degrade to a warning; the answer already
            // exists and must still reach the caller.
            if let Err(err) = self.history.append(history, user_content, &answer) {
                warn!("could not persist conversation: {err}");
            }
        }

        Ok(Reply::Text(answer))
    }

    /// One attempt against a fixed (model, credential) pair, running the
    /// bounded tool loop until the model produces final text.
    async fn attempt(
        &self,
        model: String,
        credential: String,
        mut messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
        temperature: f64,
        json_only: bool,
    ) -> Result<String, EngineError> {
        for round in 0..MAX_TOOL_ROUNDS {
            let request = CompletionRequest {
                model: model.clone(),
                credential: credential.clone(),
                messages: messages.clone(),
                temperature,
                max_tokens: self.config.max_tokens,
                tools: tools.clone(),
                json_only,
            };

            match self.provider.complete(&request).await? {
                CompletionOutcome::Text(text) => return Ok(text),
                CompletionOutcome::ToolCalls { assistant, calls } => {
                    debug!(round, calls = calls.len(), "model requested tools");
                    messages.push(assistant);
                    for call in calls {
                        let result = self
                            .tools
                            .dispatch(&call.function.name, &call.function.arguments)
                            .await;
                        messages.push(ChatMessage::tool_result(
                            call.id,
                            call.function.name,
                            result,
                        ));
                    }
                }
            }
        }
        Err(EngineError::ToolLoopDidNotConverge)
    }
}

/// Assemble the outgoing user content: prompt text (or the mode's
/// placeholder when only attachments were given), inlined text attachments,
/// and data URL parts for everything binary.
fn build_user_content(prompt: &str, attachments: &[Attachment], mode: Mode) -> MessageContent {
    let mut text = prompt.trim().to_string();
    if text.is_empty() && !attachments.is_empty() {
        if let Some(placeholder) = mode.placeholder_prompt() {
            text = placeholder.to_string();
        }
    }

    let mut binary_parts = Vec::new();
    for attachment in attachments {
        if let Some(inline) = attachment.inline_text() {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(&inline);
        } else if attachment.category != MimeCategory::Other {
            binary_parts.push(ContentPart::data_url(attachment.data_url()));
        } else {
            warn!(name = %attachment.name, "skipping attachment with unsupported type");
        }
    }

    if binary_parts.is_empty() {
        MessageContent::Text(text)
    } else {
        let mut parts = Vec::with_capacity(binary_parts.len() + 1);
        if !text.is_empty() {
            parts.push(ContentPart::text(text));
        }
        parts.extend(binary_parts);
        MessageContent::Parts(parts)
    }
}

/// Past exchanges replayed into the wire format. Tool turns are never
/// persisted, and blank turns are dropped defensively on the way out.
fn replay(history: &ChatHistory) -> Vec<ChatMessage> {
    history
        .messages
        .iter()
        .filter(|message| !message.content.is_blank())
        .filter_map(|message| match message.role {
            HistoryRole::User => Some(ChatMessage::user(message.content.clone())),
            HistoryRole::Assistant => Some(ChatMessage::assistant(message.content.clone())),
            HistoryRole::Tool => None,
        })
        .collect()
}

/// Boilerplate closers that speech models hallucinate on silent or
/// trailing audio. Stripped only in audio mode.
const TRANSCRIPTION_ARTIFACTS: &[&str] = &[
    "Subtitles by the Amara.org community",
    "Subtitles by the Amara.org community.",
    "Thanks for watching!",
    "Thank you for watching!",
    "Please subscribe to the channel",
];

fn scrub_transcription_artifacts(text: &str) -> String {
    let mut cleaned = text.trim().to_string();
    loop {
        let before = cleaned.len();
        for artifact in TRANSCRIPTION_ARTIFACTS {
            if let Some(stripped) = cleaned.strip_suffix(artifact) {
                cleaned = stripped.trim_end().to_string();
            }
        }
        if cleaned.len() == before {
            break;
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    use crate::api::{ToolCall, ToolCallFunction};
    use crate::core::provider::{ClassifiedFailure, FailureKind};
    use crate::tools::calculator::Calculator;

    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<CompletionOutcome, ClassifiedFailure>>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<CompletionOutcome, ClassifiedFailure>>) -> Arc<Self> {
            Arc::new(ScriptedProvider {
                script: Mutex::new(VecDeque::from(script)),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> Result<CompletionOutcome, ClassifiedFailure> {
            self.requests.lock().unwrap().push(request.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ClassifiedFailure::new(FailureKind::BadRequest, "empty")))
        }
    }

    fn tool_call_outcome(name: &str, arguments: &str) -> CompletionOutcome {
        let call = ToolCall {
            id: "call_1".to_string(),
            kind: "function".to_string(),
            function: ToolCallFunction {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        };
        CompletionOutcome::ToolCalls {
            assistant: ChatMessage {
                role: "assistant".to_string(),
                content: None,
                name: None,
                tool_call_id: None,
                tool_calls: Some(vec![call.clone()]),
            },
            calls: vec![call],
        }
    }

    fn engine(dir: &TempDir, provider: Arc<ScriptedProvider>) -> Engine {
        let config = Config {
            api_keys: vec!["k1".to_string()],
            ..Config::default()
        };
        let history = HistoryStore::new(dir.path().to_path_buf(), 30, 50_000, 2000);
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(Calculator));
        Engine::new(config, provider, history)
            .with_tools(tools)
            .with_retry_delay(Duration::ZERO)
            .with_shuffle_seed(1)
    }

    fn invocation(prompt: &str) -> Invocation {
        Invocation {
            prompt: prompt.to_string(),
            attachments: Vec::new(),
            mode: ModeSelection::Auto,
            conversation: None,
            json_only: false,
            system_prompt: None,
            temperature: None,
            tools_enabled: true,
        }
    }

    fn reply_text(reply: Reply) -> String {
        match reply {
            Reply::Text(text) => text,
            Reply::ConversationCleared => panic!("expected text reply"),
        }
    }

    #[tokio::test]
    async fn plain_completion_returns_text() {
        let dir = TempDir::new().expect("temp dir");
        let provider = ScriptedProvider::new(vec![Ok(CompletionOutcome::Text(
            "hello there".to_string(),
        ))]);
        let engine = engine(&dir, provider.clone());

        let reply = engine.run(invocation("hi")).await.expect("reply");
        assert_eq!(reply_text(reply), "hello there");

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages[0].role, "system");
        assert_eq!(requests[0].messages[1].role, "user");
    }

    #[tokio::test]
    async fn tool_results_are_fed_back_before_the_final_answer() {
        let dir = TempDir::new().expect("temp dir");
        let provider = ScriptedProvider::new(vec![
            Ok(tool_call_outcome(
                "calculator",
                r#"{"expression": "6*7"}"#,
            )),
            Ok(CompletionOutcome::Text("the answer is 42".to_string())),
        ]);
        let engine = engine(&dir, provider.clone());

        let reply = engine.run(invocation("what is 6*7?")).await.expect("reply");
        assert_eq!(reply_text(reply), "the answer is 42");

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        // Second round carries the assistant tool request and its result.
        let second = &requests[1].messages;
        assert_eq!(second[second.len() - 2].role, "assistant");
        let tool_turn = &second[second.len() - 1];
        assert_eq!(tool_turn.role, "tool");
        assert_eq!(tool_turn.content.as_ref().map(|c| c.as_text()).as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn tool_loop_aborts_after_the_round_ceiling() {
        let dir = TempDir::new().expect("temp dir");
        let script: Vec<_> = (0..MAX_TOOL_ROUNDS)
            .map(|_| Ok(tool_call_outcome("calculator", r#"{"expression": "1"}"#)))
            .collect();
        let provider = ScriptedProvider::new(script);
        let engine = engine(&dir, provider.clone());

        let result = engine.run(invocation("loop forever")).await;
        assert!(matches!(result, Err(EngineError::ToolLoopDidNotConverge)));
        assert_eq!(provider.requests().len(), MAX_TOOL_ROUNDS);
    }

    #[tokio::test]
    async fn conversation_history_persists_and_replays() {
        let dir = TempDir::new().expect("temp dir");
        let provider = ScriptedProvider::new(vec![
            Ok(CompletionOutcome::Text("first answer".to_string())),
            Ok(CompletionOutcome::Text("second answer".to_string())),
        ]);
        let engine = engine(&dir, provider.clone());

        let mut first = invocation("first question");
        first.conversation = Some("work".to_string());
        engine.run(first).await.expect("first reply");

        let mut second = invocation("second question");
        second.conversation = Some("work".to_string());
        engine.run(second).await.expect("second reply");

        let requests = provider.requests();
        // Second request replays the first exchange: system, user,
        // assistant, then the new user turn.
        let replayed = &requests[1].messages;
        assert_eq!(replayed.len(), 4);
        assert_eq!(
            replayed[2].content.as_ref().map(|c| c.as_text()).as_deref(),
            Some("first answer")
        );
    }

    #[tokio::test]
    async fn failed_invocation_leaves_history_untouched() {
        let dir = TempDir::new().expect("temp dir");
        let provider = ScriptedProvider::new(vec![Err(ClassifiedFailure::new(
            FailureKind::BadRequest,
            "rejected",
        ))]);
        let engine = engine(&dir, provider);

        let mut inv = invocation("doomed");
        inv.conversation = Some("work".to_string());
        assert!(engine.run(inv).await.is_err());
        assert!(engine.history.load("work").messages.is_empty());
    }

    #[tokio::test]
    async fn clear_command_skips_the_provider_entirely() {
        let dir = TempDir::new().expect("temp dir");
        let provider = ScriptedProvider::new(vec![Ok(CompletionOutcome::Text(
            "seed".to_string(),
        ))]);
        let engine = engine(&dir, provider.clone());

        let mut seed = invocation("remember this");
        seed.conversation = Some("work".to_string());
        engine.run(seed).await.expect("seed reply");
        assert!(!engine.history.load("work").messages.is_empty());

        let mut clear = invocation("/clear");
        clear.conversation = Some("work".to_string());
        let reply = engine.run(clear).await.expect("clear reply");
        assert!(matches!(reply, Reply::ConversationCleared));
        assert!(engine.history.load("work").messages.is_empty());
        // Only the seed request reached the provider.
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn attachments_become_multipart_content_with_placeholder_prompt() {
        let dir = TempDir::new().expect("temp dir");
        let provider = ScriptedProvider::new(vec![Ok(CompletionOutcome::Text(
            "a cat".to_string(),
        ))]);
        let engine = engine(&dir, provider.clone());

        let mut inv = invocation("");
        inv.attachments = vec![Attachment::from_bytes("photo.png", vec![1, 2, 3])];
        engine.run(inv).await.expect("reply");

        let requests = provider.requests();
        let user = requests[0].messages.last().expect("user turn");
        match user.content.as_ref().expect("content") {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                assert_eq!(
                    parts[0],
                    ContentPart::text("Describe this image in detail.")
                );
                assert!(matches!(parts[1], ContentPart::ImageUrl { .. }));
            }
            other => panic!("expected multipart content, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn text_attachments_are_inlined_not_multipart() {
        let dir = TempDir::new().expect("temp dir");
        let provider = ScriptedProvider::new(vec![Ok(CompletionOutcome::Text(
            "summarized".to_string(),
        ))]);
        let engine = engine(&dir, provider.clone());

        let mut inv = invocation("summarize");
        inv.attachments = vec![Attachment::from_bytes("notes.txt", b"meeting notes".to_vec())];
        engine.run(inv).await.expect("reply");

        let requests = provider.requests();
        let user = requests[0].messages.last().expect("user turn");
        let text = user.content.as_ref().expect("content").as_text();
        assert!(text.starts_with("summarize"));
        assert!(text.contains("--- File: notes.txt ---"));
        assert!(text.contains("meeting notes"));
    }

    #[tokio::test]
    async fn audio_mode_scrubs_hallucinated_closers() {
        let dir = TempDir::new().expect("temp dir");
        let provider = ScriptedProvider::new(vec![Ok(CompletionOutcome::Text(
            "Actual speech content. Thanks for watching!".to_string(),
        ))]);
        let engine = engine(&dir, provider);

        let mut inv = invocation("");
        inv.attachments = vec![Attachment::from_bytes("memo.mp3", vec![1, 2, 3])];
        let reply = engine.run(inv).await.expect("reply");
        assert_eq!(reply_text(reply), "Actual speech content.");
    }

    #[test]
    fn artifact_scrubbing_is_suffix_only_and_repeated() {
        assert_eq!(
            scrub_transcription_artifacts(
                "Real text. Thanks for watching! Subtitles by the Amara.org community"
            ),
            "Real text."
        );
        // Mid-text occurrences are genuine content and survive.
        assert_eq!(
            scrub_transcription_artifacts("He said Thanks for watching! and left."),
            "He said Thanks for watching! and left."
        );
    }
}
