//! Thin Telegram Bot API client over reqwest.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use vipgate_core::{Error, Result};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
struct ChatMember {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ChatInviteLink {
    invite_link: String,
}

#[derive(Clone)]
pub struct TelegramApi {
    client: Client,
    token: String,
}

impl TelegramApi {
    pub fn new(token: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            token: token.to_string(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", TELEGRAM_API_BASE, self.token, method)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let response = self
            .client
            .post(&self.api_url(method))
            .json(&params)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Telegram request failed: {}", e)))?;

        let parsed: TelegramResponse<T> = response
            .json()
            .await
            .map_err(|e| Error::Channel(format!("Failed to parse Telegram response: {}", e)))?;

        if !parsed.ok {
            return Err(Error::Channel(
                parsed
                    .description
                    .unwrap_or_else(|| format!("{} failed", method)),
            ));
        }
        parsed
            .result
            .ok_or_else(|| Error::Channel(format!("{} returned no result", method)))
    }

    pub async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>> {
        let mut params = json!({
            "timeout": 30,
            "allowed_updates": ["message", "callback_query"],
        });
        if let Some(off) = offset {
            params["offset"] = json!(off);
        }
        self.call("getUpdates", params).await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<Value>,
    ) -> Result<()> {
        let mut params = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        if let Some(markup) = reply_markup {
            params["reply_markup"] = markup;
        }
        let _: Message = self.call("sendMessage", params).await?;
        Ok(())
    }

    /// Membership status of a user in a chat. `Ok(None)` when the API
    /// rejects the lookup (bot not in chat, user never seen), which gate
    /// checks treat as unverifiable rather than an outage.
    pub async fn get_chat_member(&self, chat_id: &str, user_id: i64) -> Result<Option<String>> {
        let params = json!({"chat_id": chat_id, "user_id": user_id});
        match self.call::<ChatMember>("getChatMember", params).await {
            Ok(member) => Ok(Some(member.status)),
            Err(Error::Channel(desc)) => {
                debug!(chat = chat_id, user = user_id, "getChatMember rejected: {}", desc);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Single-use invite link expiring after `expire_secs`.
    pub async fn create_invite_link(
        &self,
        chat_id: &str,
        name: &str,
        expire_secs: i64,
    ) -> Result<String> {
        let expire_date = chrono::Utc::now().timestamp() + expire_secs;
        let params = json!({
            "chat_id": chat_id,
            "name": name,
            "expire_date": expire_date,
            "member_limit": 1,
            "creates_join_request": false,
        });
        let link: ChatInviteLink = self.call("createChatInviteLink", params).await?;
        Ok(link.invite_link)
    }

    /// Fallback when the bot lacks the invite-management right: the chat's
    /// primary link (not single-use).
    pub async fn export_invite_link(&self, chat_id: &str) -> Result<String> {
        self.call("exportChatInviteLink", json!({"chat_id": chat_id}))
            .await
    }

    pub async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        let mut params = json!({"callback_query_id": callback_id});
        if let Some(t) = text {
            params["text"] = json!(t);
        }
        let _: bool = self.call("answerCallbackQuery", params).await?;
        Ok(())
    }

    pub async fn get_me(&self) -> Result<User> {
        self.call("getMe", json!({})).await
    }
}
