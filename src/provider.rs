use async_trait::async_trait;

use crate::config::ProviderConfig;
use crate::error::OracleError;
use crate::memory::ChatTurn;
use crate::relationship::Relationship;

/// Canned replies when the oracle reports a quota/billing rejection.
pub const QUOTA_REPLIES: &[&str] = &[
    "Oops, having a little trouble on my end~",
    "Give me just a second~",
];

/// Canned replies when every attempt fails. Raw error text never
/// reaches the end user.
pub const FALLBACK_REPLIES: &[&str] = &[
    "The network is a bit laggy~",
    "Sorry, I didn't catch that, say it again?~",
];

/// Tone selection by relationship label. Labels without a dedicated
/// entry get the stranger tone.
pub fn system_prompt_for(relationship: Relationship) -> &'static str {
    match relationship {
        Relationship::Love => {
            "You are chatting online with your partner. Be affectionate and \
             a little clingy, like a real person chatting. Always refer back \
             to the conversation history and pick up where the last message \
             left off. Keep replies very short, one or two sentences, never \
             use stage directions in parentheses, never repeat yourself."
        }
        Relationship::Friend => {
            "You are chatting online with a good friend. Be casual and \
             down-to-earth, banter and tease a little. Stay on the topic of \
             the previous messages, keep replies short and natural."
        }
        _ => {
            "You are chatting online with someone you just met. Be polite \
             and warm without being awkward, find small topics but don't \
             interrogate. Remember the basics they've told you, keep replies \
             short, and warm up slowly."
        }
    }
}

/// The external text-completion service, treated as a black box that
/// returns text given a prompt and context.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        context: &[ChatTurn],
        user_turn: &str,
    ) -> Result<String, OracleError>;
}

/// OpenAI-compatible chat-completions client. One bounded attempt per
/// call; retry policy lives with the caller.
pub struct CompletionClient {
    http_client: reqwest::Client,
    config: ProviderConfig,
}

impl CompletionClient {
    pub fn new(config: ProviderConfig) -> Result<Self, OracleError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(CompletionClient {
            http_client,
            config,
        })
    }
}

#[async_trait]
impl CompletionBackend for CompletionClient {
    async fn complete(
        &self,
        system_prompt: &str,
        context: &[ChatTurn],
        user_turn: &str,
    ) -> Result<String, OracleError> {
        let mut messages = Vec::new();
        messages.push(serde_json::json!({
            "role": "system",
            "content": system_prompt,
        }));
        for turn in context {
            messages.push(serde_json::json!({
                "role": turn.role.to_string(),
                "content": turn.content,
            }));
        }
        messages.push(serde_json::json!({
            "role": "user",
            "content": user_turn,
        }));

        let request_body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": 1.0,
            "max_tokens": 100,
            "stream": false,
        });

        let mut request = self
            .http_client
            .post(&self.config.api_url)
            .header("Content-Type", "application/json")
            .json(&request_body);
        if let Some(api_key) = &self.config.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request.send().await?;

        if response.status().as_u16() == 402 {
            return Err(OracleError::Quota);
        }
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(OracleError::Api(format!("{}: {}", status, error_text)));
        }

        let response_json: serde_json::Value = response.json().await?;
        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or(OracleError::Malformed)?
            .trim()
            .to_string();

        Ok(content)
    }
}
