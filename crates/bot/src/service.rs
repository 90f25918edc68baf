//! Long-poll bot service: /start storefront entry and the membership
//! recheck callback.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use vipgate_core::{Config, Result};
use vipgate_storage::Store;

use crate::api::{CallbackQuery, Message, TelegramApi, Update};
use crate::gate::{check_gate, GateOutcome};

const RECHECK_CALLBACK: &str = "gate:recheck";

pub struct BotService {
    api: TelegramApi,
    config: Config,
    #[allow(dead_code)]
    store: Arc<Store>,
}

impl BotService {
    pub fn new(config: Config, store: Arc<Store>) -> Self {
        let api = TelegramApi::new(&config.bot.token);
        Self { api, config, store }
    }

    pub fn api(&self) -> &TelegramApi {
        &self.api
    }

    /// URL the storefront button opens.
    fn webapp_url(&self) -> String {
        if !self.config.bot.webapp_url.is_empty() {
            return self.config.bot.webapp_url.clone();
        }
        format!(
            "{}/webapp/index.html",
            self.config.gateway.base_url.trim_end_matches('/')
        )
    }

    pub async fn run_loop(self: Arc<Self>, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        if self.config.bot.token.is_empty() {
            warn!("Bot token not configured; bot loop not started");
            return;
        }

        info!("Bot loop started");
        let mut offset: Option<i64> = None;

        loop {
            tokio::select! {
                result = self.api.get_updates(offset) => {
                    match result {
                        Ok(updates) => {
                            for update in updates {
                                offset = Some(update.update_id + 1);
                                if let Err(e) = self.handle_update(update).await {
                                    error!("Failed to handle update: {}", e);
                                }
                            }
                        }
                        Err(e) => {
                            error!("Failed to get updates: {}", e);
                            tokio::select! {
                                _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                                _ = shutdown.recv() => {
                                    info!("Bot loop shutting down");
                                    break;
                                }
                            }
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Bot loop shutting down");
                    break;
                }
            }
        }
    }

    async fn handle_update(&self, update: Update) -> Result<()> {
        if let Some(message) = update.message {
            return self.handle_message(message).await;
        }
        if let Some(callback) = update.callback_query {
            return self.handle_callback(callback).await;
        }
        Ok(())
    }

    async fn handle_message(&self, message: Message) -> Result<()> {
        let Some(user) = &message.from else {
            return Ok(());
        };
        let text = message.text.as_deref().unwrap_or("");
        if !text.starts_with("/start") {
            return Ok(());
        }

        let outcome = check_gate(&self.api, &self.config.bot.gate, user.id).await?;
        self.send_gate_response(message.chat.id, user.first_name.as_deref(), &outcome)
            .await
    }

    async fn handle_callback(&self, callback: CallbackQuery) -> Result<()> {
        if callback.data.as_deref() != Some(RECHECK_CALLBACK) {
            let _ = self.api.answer_callback_query(&callback.id, None).await;
            return Ok(());
        }

        let outcome = check_gate(&self.api, &self.config.bot.gate, callback.from.id).await?;
        let note = if outcome.passed {
            "Keanggotaan terverifikasi ✅"
        } else {
            "Masih ada grup/channel yang belum diikuti"
        };
        let _ = self.api.answer_callback_query(&callback.id, Some(note)).await;

        if let Some(message) = callback.message {
            self.send_gate_response(message.chat.id, callback.from.first_name.as_deref(), &outcome)
                .await?;
        }
        Ok(())
    }

    async fn send_gate_response(
        &self,
        chat_id: i64,
        first_name: Option<&str>,
        outcome: &GateOutcome,
    ) -> Result<()> {
        let name = first_name.unwrap_or("kak");
        if outcome.passed {
            let text = format!(
                "Halo {}! 🛍️\n\nKamu sudah memenuhi syarat. Buka katalog untuk memilih grup VIP.",
                name
            );
            let markup = json!({
                "inline_keyboard": [[{
                    "text": "🛒 Buka Katalog",
                    "web_app": {"url": self.webapp_url()},
                }]]
            });
            return self.api.send_message(chat_id, &text, Some(markup)).await;
        }

        let text = format!(
            "Halo {}! Untuk lanjut, gabung dulu ke {} dari {} grup/channel berikut, lalu tekan \"Cek ulang\".",
            name,
            outcome.total - outcome.joined_count,
            outcome.total
        );
        self.api
            .send_message(chat_id, &text, Some(join_keyboard(outcome)))
            .await
    }
}

/// Keyboard listing join buttons for missing chats plus the recheck row.
fn join_keyboard(outcome: &GateOutcome) -> Value {
    let mut rows: Vec<Value> = Vec::new();
    for missing in &outcome.missing {
        let Some(link) = &missing.invite_link else {
            continue;
        };
        let label = if missing.is_channel {
            "📣 Gabung Channel"
        } else {
            "👥 Gabung Grup"
        };
        rows.push(json!([{"text": label, "url": link}]));
    }
    rows.push(json!([{"text": "🔄 Cek ulang", "callback_data": RECHECK_CALLBACK}]));
    json!({"inline_keyboard": rows})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::MissingChat;

    #[test]
    fn test_join_keyboard_lists_links_then_recheck() {
        let outcome = GateOutcome {
            passed: false,
            missing: vec![
                MissingChat {
                    chat_id: "-100123".into(),
                    invite_link: Some("https://t.me/+abc".into()),
                    is_channel: false,
                },
                MissingChat {
                    chat_id: "-100456".into(),
                    invite_link: None,
                    is_channel: true,
                },
            ],
            joined_count: 0,
            total: 2,
        };
        let keyboard = join_keyboard(&outcome);
        let rows = keyboard["inline_keyboard"].as_array().unwrap();
        // One link row (the link-less chat is skipped) plus the recheck row.
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0]["url"], "https://t.me/+abc");
        assert_eq!(rows[1][0]["callback_data"], RECHECK_CALLBACK);
    }
}
