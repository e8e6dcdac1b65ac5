use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use courier_core::dispatch::DEFAULT_MAX_MESSAGE_LEN;
use courier_core::{Dispatcher, MessageHandle, Outbound};
use reqwest::{Client, ClientBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::callbacks::{choice_data, Update};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Rejection text for markup the platform cannot parse
const PARSE_ERROR: &str = "can't parse entities";
/// Edit with identical text; the message already shows what we want
const NOT_MODIFIED: &str = "message is not modified";

/// Telegram Bot API dispatcher: one chat, Markdown with plain-text retry
pub struct TelegramDispatcher {
    client: Client,
    api_base: String,
    token: String,
    chat_id: String,
    max_message_len: usize,
}

#[derive(Debug, Deserialize)]
struct ApiReply {
    ok: bool,
    result: Option<Value>,
    description: Option<String>,
}

impl TelegramDispatcher {
    pub fn new(token: &str, chat_id: &str) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            token: token.to_string(),
            chat_id: chat_id.to_string(),
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        })
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_message_len(mut self, len: usize) -> Self {
        self.max_message_len = len;
        self
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// One button per row. Tagged choices carry the session and the
    /// 1-based option number so a tap can be routed back to the agent.
    fn keyboard(choices: &[String], tag: Option<&str>) -> Option<Value> {
        if choices.is_empty() {
            return None;
        }
        let rows: Vec<Value> = choices
            .iter()
            .enumerate()
            .map(|(i, choice)| {
                let data = match tag {
                    Some(session_id) => choice_data(session_id, i + 1),
                    None => format!("option_{}", i + 1),
                };
                json!([{"text": choice, "callback_data": data}])
            })
            .collect();
        Some(json!({ "inline_keyboard": rows }))
    }

    /// Long-poll for button taps newer than `offset`
    pub async fn get_updates(&self, offset: i64, timeout: Duration) -> Result<Vec<Update>> {
        let body = json!({
            "offset": offset,
            "timeout": timeout.as_secs(),
            "allowed_updates": ["callback_query"],
        });
        let result = self.call("getUpdates", &body).await?;
        serde_json::from_value(result).context("Telegram getUpdates returned unexpected shape")
    }

    /// Stop the button's spinner, optionally showing a short toast
    pub async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        let mut body = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        self.call("answerCallbackQuery", &body).await?;
        Ok(())
    }

    async fn call(&self, method: &str, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Telegram {} request failed", method))?;

        let status = response.status();
        let reply: ApiReply = response
            .json()
            .await
            .with_context(|| format!("Telegram {} returned non-JSON ({})", method, status))?;

        if !reply.ok {
            return Err(anyhow!(
                "Telegram {} failed ({}): {}",
                method,
                status,
                reply.description.unwrap_or_default()
            ));
        }
        reply
            .result
            .ok_or_else(|| anyhow!("Telegram {} returned no result", method))
    }

    /// Try Markdown first; resend as plain text if the markup is rejected
    async fn call_with_fallback(&self, method: &str, mut body: Value) -> Result<Value> {
        body["parse_mode"] = json!("Markdown");
        match self.call(method, &body).await {
            Err(e) if e.to_string().contains(PARSE_ERROR) => {
                warn!(method, "Markdown rejected, retrying as plain text");
                if let Some(obj) = body.as_object_mut() {
                    obj.remove("parse_mode");
                }
                self.call(method, &body).await
            }
            other => other,
        }
    }

    fn handle_from(&self, result: &Value) -> Result<MessageHandle> {
        let message_id = result
            .get("message_id")
            .and_then(Value::as_i64)
            .context("Telegram reply missing message_id")?;
        Ok(MessageHandle {
            chat_id: self.chat_id.clone(),
            message_id,
        })
    }
}

#[async_trait]
impl Dispatcher for TelegramDispatcher {
    async fn send(&self, message: &Outbound) -> Result<MessageHandle> {
        let mut body = json!({
            "chat_id": self.chat_id,
            "text": message.text,
        });
        if let Some(keyboard) = Self::keyboard(&message.choices, message.choice_tag.as_deref()) {
            body["reply_markup"] = keyboard;
        }

        let result = self.call_with_fallback("sendMessage", body).await?;
        let handle = self.handle_from(&result)?;
        debug!(message_id = handle.message_id, chars = message.text.chars().count(), "Telegram message sent");
        Ok(handle)
    }

    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<MessageHandle> {
        let body = json!({
            "chat_id": handle.chat_id,
            "message_id": handle.message_id,
            "text": text,
        });

        match self.call_with_fallback("editMessageText", body).await {
            Ok(_) => {
                debug!(message_id = handle.message_id, "Telegram message edited");
                Ok(handle.clone())
            }
            Err(e) if e.to_string().contains(NOT_MODIFIED) => Ok(handle.clone()),
            Err(e) => Err(e),
        }
    }

    fn max_message_len(&self) -> usize {
        self.max_message_len
    }
}
