use std::time::Duration;

use anyhow::Result;
use rand::seq::SliceRandom;

use crate::commands::{assign_relationship, parse_directive, CommandEngine, Directive};
use crate::config::Config;
use crate::memory::{ChatRole, MemoryStore};
use crate::persona::Persona;
use crate::provider::{
    system_prompt_for, CompletionBackend, CompletionClient, FALLBACK_REPLIES, QUOTA_REPLIES,
};
use crate::relationship::Relationship;
use crate::social::SocialGraph;

/// Fixed reply for an unauthorized directive attempt.
pub const PERMISSION_DENIED: &str = "You don't have permission for that~";

/// Short pause before replying in the interactive loop.
pub const TYPING_DELAY: Duration = Duration::from_millis(500);

/// Owns all mutable state and processes one inbound message at a time.
/// Mutating access is serialized by ownership; the oracle call is the
/// only suspending operation.
pub struct BotHandler {
    config: Config,
    memory: MemoryStore,
    persona: Persona,
    social: SocialGraph,
    engine: CommandEngine,
    oracle: Box<dyn CompletionBackend>,
}

impl BotHandler {
    pub fn new(config: Config) -> Result<Self> {
        let oracle = Box::new(CompletionClient::new(config.provider.clone())?);
        Self::with_backend(config, oracle)
    }

    pub fn with_backend(config: Config, oracle: Box<dyn CompletionBackend>) -> Result<Self> {
        let memory = MemoryStore::new(&config)?;
        let persona = Persona::load_or_default(&config);

        // The graph is a view over the store; rebuild it from the
        // persisted records so exclusivity holds across restarts. The
        // pinned user is already seeded into the store.
        let mut social = SocialGraph::new();
        for record in memory.records() {
            social.assign(&record.id, record.relationship);
        }

        let engine = CommandEngine::new(&config.admins);

        Ok(BotHandler {
            config,
            memory,
            persona,
            social,
            engine,
            oracle,
        })
    }

    /// Single entry point for an inbound message. Never fails the
    /// overall handling of a message; the next message is always
    /// served regardless of this one's outcome.
    pub async fn handle_incoming(&mut self, sender_id: &str, text: &str) -> String {
        let text = text.trim();

        if let Some(directive) = parse_directive(text) {
            return self.handle_directive(sender_id, &directive);
        }

        self.handle_chat(sender_id, text).await
    }

    fn handle_directive(&mut self, sender_id: &str, directive: &Directive) -> String {
        // Every attempt is audited, authorized or not
        let allowed = self.engine.authorize(sender_id, directive);
        if !allowed {
            tracing::info!(caller = sender_id, verb = %directive.verb, "directive denied");
            return PERMISSION_DENIED.to_string();
        }

        match directive.verb.as_str() {
            "status" => self.status_report(),
            "set_relation" => self.handle_set_relation(&directive.args),
            "export" => self.handle_export(&directive.args),
            _ => {
                self.engine
                    .dispatch(
                        directive,
                        sender_id,
                        &mut self.persona,
                        &mut self.memory,
                        &mut self.social,
                        &self.config,
                    )
                    .text
            }
        }
    }

    async fn handle_chat(&mut self, sender_id: &str, text: &str) -> String {
        let record = self.memory.get_or_create(sender_id);
        let relationship = record.relationship;

        // Snapshot the context before recording this turn, so the
        // current message is not duplicated into the prior context.
        let context = self
            .memory
            .recent_context(sender_id, self.config.context_length);

        if let Err(e) = self.memory.append_turn(sender_id, ChatRole::User, text) {
            tracing::error!(user = sender_id, "failed to persist user turn: {}", e);
        }
        if let Err(e) = self.persona.update_energy(text) {
            tracing::error!("failed to persist persona state: {}", e);
        }

        tracing::info!(user = sender_id, relationship = %relationship, "incoming message");

        // Offline mode answers from the emotion-keyed template pool
        // without consulting the oracle.
        let reply = if self.persona.settings.online {
            self.complete_with_retry(relationship, &context, text).await
        } else {
            self.persona.response_template()
        };

        if let Err(e) = self
            .memory
            .append_turn(sender_id, ChatRole::Assistant, &reply)
        {
            tracing::error!(user = sender_id, "failed to persist assistant turn: {}", e);
        }

        tracing::info!(user = sender_id, "reply sent");
        reply
    }

    /// Bounded retry with fixed backoff; quota rejections short-circuit
    /// and total failure degrades to a canned reply.
    async fn complete_with_retry(
        &self,
        relationship: Relationship,
        context: &[crate::memory::ChatTurn],
        user_turn: &str,
    ) -> String {
        let system_prompt = system_prompt_for(relationship);
        let retries = self.config.provider.retries.max(1);

        for attempt in 1..=retries {
            match self.oracle.complete(system_prompt, context, user_turn).await {
                Ok(reply) => return reply,
                Err(e) if e.is_quota() => {
                    tracing::warn!("oracle quota rejection");
                    return pick(QUOTA_REPLIES);
                }
                Err(e) => {
                    tracing::warn!(attempt, "oracle attempt failed: {}", e);
                    if attempt < retries {
                        tokio::time::sleep(self.config.provider.backoff()).await;
                    }
                }
            }
        }

        pick(FALLBACK_REPLIES)
    }

    pub fn status_report(&self) -> String {
        let stats = self.memory.stats();
        let pinned = self
            .config
            .pinned_user
            .as_ref()
            .map(|p| p.user_id.clone())
            .unwrap_or_else(|| "none".to_string());

        format!(
            "🤖 Bot status\n\
             ├─ Active users: {}\n\
             ├─ Context length: {}\n\
             └─ Pinned user: {}",
            stats.total_users, self.config.context_length, pinned
        )
    }

    fn handle_set_relation(&mut self, args: &[String]) -> String {
        let (target, token) = match (args.first(), args.get(1)) {
            (Some(target), Some(token)) => (target, token),
            _ => {
                return format!(
                    "Usage: set_relation <userId> <type> | valid: {}",
                    Relationship::valid_tokens()
                )
            }
        };

        let relationship: Relationship = match token.parse() {
            Ok(r) => r,
            Err(_) => {
                return format!(
                    "❌ Invalid relationship, valid: {}",
                    Relationship::valid_tokens()
                )
            }
        };

        match assign_relationship(&mut self.memory, &mut self.social, target, relationship) {
            Ok(()) => format!("✅ User [{}] set to {}", target, relationship),
            Err(e) => format!("❌ Set failed: {}", e),
        }
    }

    fn handle_export(&mut self, args: &[String]) -> String {
        let Some(target) = args.first() else {
            return "Usage: export <userId>".to_string();
        };
        self.export_transcript(target)
    }

    /// Render a user's stored context as a flat labeled transcript and
    /// write it next to the other data files.
    pub fn export_transcript(&mut self, target: &str) -> String {
        if !self.memory.contains(target) {
            return format!("User [{}] does not exist~", target);
        }

        let history = self.memory.recent_context(target, self.config.context_length);
        if history.is_empty() {
            return format!("User [{}] has no chat history~", target);
        }

        let mut transcript = format!("=== Chat history for user [{}] ===\n", target);
        for turn in &history {
            let label = match turn.role {
                ChatRole::User => "User",
                ChatRole::Assistant => "Bot",
            };
            transcript.push_str(&format!("{}: {}\n", label, turn.content));
        }
        transcript.push_str("=== End of export ===");

        let path = self.config.export_file(target);
        match std::fs::write(&path, transcript) {
            Ok(()) => {
                tracing::info!(user = %target, "chat history exported");
                format!("✅ Chat history exported to: {}", path.display())
            }
            Err(e) => {
                tracing::error!("failed to write export: {}", e);
                format!("❌ Export failed: {}", e)
            }
        }
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn social(&self) -> &SocialGraph {
        &self.social
    }

    pub fn audit_history(&self, limit: usize) -> &[crate::commands::AuditEntry] {
        self.engine.recent_history(limit)
    }
}

fn pick(pool: &[&str]) -> String {
    let mut rng = rand::thread_rng();
    pool.choose(&mut rng).unwrap_or(&"...").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PinnedUser;
    use crate::error::OracleError;
    use crate::memory::ChatTurn;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct RecordedCall {
        system_prompt: String,
        context_len: usize,
        user_turn: String,
    }

    type CallLog = Arc<Mutex<Vec<RecordedCall>>>;

    /// Scripted oracle: pops the next canned outcome per call and
    /// records what it was asked.
    struct MockOracle {
        outcomes: Mutex<Vec<Result<String, OracleError>>>,
        calls: CallLog,
    }

    impl MockOracle {
        fn replying(reply: &str) -> Self {
            MockOracle {
                outcomes: Mutex::new(vec![Ok(reply.to_string())]),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn failing() -> Self {
            MockOracle {
                outcomes: Mutex::new(Vec::new()),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn quota() -> Self {
            MockOracle {
                outcomes: Mutex::new(vec![Err(OracleError::Quota)]),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn call_log(&self) -> CallLog {
            Arc::clone(&self.calls)
        }
    }

    #[async_trait]
    impl CompletionBackend for MockOracle {
        async fn complete(
            &self,
            system_prompt: &str,
            context: &[ChatTurn],
            user_turn: &str,
        ) -> Result<String, OracleError> {
            self.calls.lock().unwrap().push(RecordedCall {
                system_prompt: system_prompt.to_string(),
                context_len: context.len(),
                user_turn: user_turn.to_string(),
            });
            self.outcomes
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(OracleError::Api("scripted failure".to_string())))
        }
    }

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::new(Some(dir.to_path_buf())).unwrap();
        config.admins = vec!["admin".to_string()];
        config.provider.backoff_ms = 1;
        config
    }

    #[tokio::test]
    async fn test_fresh_user_hello_flow() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = MockOracle::replying("hey there!");
        let mut handler =
            BotHandler::with_backend(test_config(dir.path()), Box::new(oracle)).unwrap();

        let reply = handler.handle_incoming("newcomer", "hello").await;
        assert_eq!(reply, "hey there!");

        let record = handler.memory().get("newcomer").unwrap();
        assert_eq!(record.relationship, Relationship::Stranger);
        assert_eq!(record.chat_history.len(), 2);
        assert_eq!(record.chat_history[0].role, ChatRole::User);
        assert_eq!(record.chat_history[0].content, "hello");
        assert_eq!(record.chat_history[1].role, ChatRole::Assistant);
    }

    #[tokio::test]
    async fn test_oracle_called_with_stranger_tone_and_empty_context() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = MockOracle::replying("hi");
        let call_log = oracle.call_log();
        let mut handler =
            BotHandler::with_backend(test_config(dir.path()), Box::new(oracle)).unwrap();

        handler.handle_incoming("newcomer", "hello").await;

        let calls = call_log.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].context_len, 0);
        assert_eq!(calls[0].user_turn, "hello");
        assert_eq!(
            calls[0].system_prompt,
            system_prompt_for(Relationship::Stranger)
        );
    }

    #[tokio::test]
    async fn test_privileged_emotion_directive() {
        let dir = tempfile::tempdir().unwrap();
        let mut handler = BotHandler::with_backend(
            test_config(dir.path()),
            Box::new(MockOracle::failing()),
        )
        .unwrap();

        let reply = handler.handle_incoming("admin", "//emotion happy").await;
        assert!(reply.contains("happy"));
        assert_eq!(handler.persona().settings.emotion, "happy");

        let audit = handler.audit_history(1);
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].verb, "emotion");
    }

    #[tokio::test]
    async fn test_unprivileged_clean_denied_but_audited() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::write(config.export_file("u1"), "transcript").unwrap();
        let export_path = config.export_file("u1");

        let mut handler =
            BotHandler::with_backend(config, Box::new(MockOracle::failing())).unwrap();

        let reply = handler.handle_incoming("nobody", "//clean").await;
        assert_eq!(reply, PERMISSION_DENIED);
        // No cleanup happened
        assert!(export_path.exists());

        let audit = handler.audit_history(1);
        assert_eq!(audit[0].verb, "clean");
        assert_eq!(audit[0].caller, "nobody");
    }

    #[tokio::test]
    async fn test_three_failures_degrade_to_canned_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let mut handler = BotHandler::with_backend(
            test_config(dir.path()),
            Box::new(MockOracle::failing()),
        )
        .unwrap();

        let reply = handler.handle_incoming("u1", "hello?").await;
        assert!(FALLBACK_REPLIES.contains(&reply.as_str()));

        // User turn is still recorded
        let record = handler.memory().get("u1").unwrap();
        assert!(record
            .chat_history
            .iter()
            .any(|t| t.role == ChatRole::User && t.content == "hello?"));
    }

    #[tokio::test]
    async fn test_quota_rejection_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let mut handler = BotHandler::with_backend(
            test_config(dir.path()),
            Box::new(MockOracle::quota()),
        )
        .unwrap();

        let reply = handler.handle_incoming("u1", "hi").await;
        assert!(QUOTA_REPLIES.contains(&reply.as_str()));
    }

    #[tokio::test]
    async fn test_set_relation_and_export() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = MockOracle::replying("nice to meet you");
        let config = test_config(dir.path());
        let export_path = config.export_file("u2");
        let mut handler = BotHandler::with_backend(config, Box::new(oracle)).unwrap();

        handler.handle_incoming("u2", "hello").await;

        let reply = handler
            .handle_incoming("admin", "//set_relation u2 love")
            .await;
        assert!(reply.starts_with("✅"));
        assert_eq!(
            handler.memory().get("u2").unwrap().relationship,
            Relationship::Love
        );
        assert_eq!(handler.social().holder_of(Relationship::Love), Some("u2"));

        let reply = handler.handle_incoming("admin", "//export u2").await;
        assert!(reply.starts_with("✅"));
        let transcript = std::fs::read_to_string(export_path).unwrap();
        assert!(transcript.contains("User: hello"));
        assert!(transcript.contains("Bot: nice to meet you"));
    }

    #[tokio::test]
    async fn test_exclusive_reassignment_demotes_previous_holder() {
        let dir = tempfile::tempdir().unwrap();
        let mut handler = BotHandler::with_backend(
            test_config(dir.path()),
            Box::new(MockOracle::failing()),
        )
        .unwrap();

        handler
            .handle_incoming("admin", "//set_relation alice love")
            .await;
        handler
            .handle_incoming("admin", "//set_relation bob love")
            .await;

        assert_eq!(handler.social().holder_of(Relationship::Love), Some("bob"));
        assert_eq!(
            handler.memory().get("bob").unwrap().relationship,
            Relationship::Love
        );
        // The store agrees with the graph: alice lost the label
        assert_eq!(
            handler.memory().get("alice").unwrap().relationship,
            Relationship::Stranger
        );
    }

    #[tokio::test]
    async fn test_exclusive_holder_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        {
            let mut handler =
                BotHandler::with_backend(config.clone(), Box::new(MockOracle::failing()))
                    .unwrap();
            handler
                .handle_incoming("admin", "//set_relation alice love")
                .await;
        }

        let handler =
            BotHandler::with_backend(config, Box::new(MockOracle::failing())).unwrap();
        assert_eq!(
            handler.social().holder_of(Relationship::Love),
            Some("alice")
        );
        assert_eq!(handler.social().label_of("alice"), Some(Relationship::Love));
    }

    #[tokio::test]
    async fn test_set_relation_on_pinned_user_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.pinned_user = Some(PinnedUser {
            user_id: "beloved".to_string(),
            relationship: Relationship::Love,
        });

        let mut handler =
            BotHandler::with_backend(config, Box::new(MockOracle::failing())).unwrap();

        let reply = handler
            .handle_incoming("admin", "//set_relation beloved friend")
            .await;
        assert!(reply.starts_with("❌"));
        assert_eq!(
            handler.memory().get("beloved").unwrap().relationship,
            Relationship::Love
        );
    }

    #[tokio::test]
    async fn test_status_report() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = MockOracle::replying("hi");
        let mut handler =
            BotHandler::with_backend(test_config(dir.path()), Box::new(oracle)).unwrap();

        handler.handle_incoming("u1", "hello").await;
        let reply = handler.handle_incoming("admin", "//status").await;
        assert!(reply.contains("Active users: 1"));
    }

    #[tokio::test]
    async fn test_offline_mode_skips_oracle() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = MockOracle::failing();
        let call_log = oracle.call_log();
        let mut handler =
            BotHandler::with_backend(test_config(dir.path()), Box::new(oracle)).unwrap();

        handler.handle_incoming("admin", "//online off").await;
        let reply = handler.handle_incoming("u1", "hello").await;

        assert!(!reply.is_empty());
        assert!(call_log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_verb_failure_reply() {
        let dir = tempfile::tempdir().unwrap();
        let mut handler = BotHandler::with_backend(
            test_config(dir.path()),
            Box::new(MockOracle::failing()),
        )
        .unwrap();

        let reply = handler.handle_incoming("admin", "//teleport home").await;
        assert!(reply.contains("teleport"));
    }
}
