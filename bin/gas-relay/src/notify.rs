//! Operator notifications for relay events.
//!
//! Every event is logged. When a Telegram bot is configured the same text is
//! posted to the chat; delivery problems are logged and otherwise ignored.

use std::time::Duration;

use alloy::primitives::utils::{format_ether, format_units};
use eyre::{Result, WrapErr as _};
use gas_relay::{RelayEvent, RetryPolicy, Subscription};
use reqwest::Client;
use serde_json::json;
use tracing::{info, warn};

/// Three attempts, two and four seconds apart.
const SEND_RETRY: RetryPolicy = RetryPolicy {
    max_retries: 2,
    initial_delay: Duration::from_secs(2),
    max_delay: Duration::from_secs(4),
    jitter: false,
    transient_only: false,
};

#[derive(Debug, Clone)]
pub(crate) struct TelegramConfig {
    pub(crate) bot_token: String,
    pub(crate) chat_id: String,
    /// Forum topic the messages are posted to.
    pub(crate) topic_id: Option<i64>,
}

struct Telegram {
    client: Client,
    api_base: String,
    chat_id: String,
    topic_id: Option<i64>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Telegram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telegram")
            .field("api_base", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .field("topic_id", &self.topic_id)
            .field("retry", &self.retry)
            .finish()
    }
}

impl Telegram {
    fn new(config: TelegramConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .wrap_err("failed to build Telegram HTTP client")?;

        Ok(Self {
            client,
            api_base: format!("https://api.telegram.org/bot{}", config.bot_token),
            chat_id: config.chat_id,
            topic_id: config.topic_id,
            retry: SEND_RETRY,
        })
    }

    fn payload(&self, text: &str) -> serde_json::Value {
        let mut body = json!({
            "chat_id": self.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        if let Some(topic_id) = self.topic_id {
            body["message_thread_id"] = json!(topic_id);
        }
        body
    }

    async fn post(&self, body: &serde_json::Value) -> Result<()> {
        self.client
            .post(format!("{}/sendMessage", self.api_base))
            .json(body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(reqwest::Error::without_url)
            .wrap_err("telegram sendMessage failed")?;
        Ok(())
    }

    /// Posts `text`; failures are logged once the retries are used up.
    async fn send_message(&self, text: &str) -> bool {
        let body = self.payload(text);

        match self.retry.retry("telegram_send", || self.post(&body)).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    attempts = self.retry.max_attempts(),
                    error = %err,
                    "giving up on telegram message"
                );
                false
            }
        }
    }
}

/// Renders relay events as plain text and fans them out to the log and,
/// optionally, Telegram.
#[derive(Debug)]
pub(crate) struct Notifier {
    token_decimals: u8,
    telegram: Option<Telegram>,
}

impl Notifier {
    pub(crate) fn new(token_decimals: u8, telegram: Option<TelegramConfig>) -> Result<Self> {
        Ok(Self {
            token_decimals,
            telegram: telegram.map(Telegram::new).transpose()?,
        })
    }

    pub(crate) fn render(&self, event: &RelayEvent) -> String {
        match event {
            RelayEvent::BridgeDetected(deposit) => {
                let amount = format_units(deposit.amount, self.token_decimals)
                    .unwrap_or_else(|_| deposit.amount.to_string());
                format!(
                    "Bridge event detected\nAmount: {amount}\nFrom: {}\nTx: {}",
                    deposit.from, deposit.tx_hash
                )
            }
            RelayEvent::FundingCompleted(funding) => format!(
                "Funding completed\nRecipient: {}\nAmount: {} ETH\nTx: {}",
                funding.recipient,
                format_ether(funding.amount),
                funding.tx_hash
            ),
            RelayEvent::FundingSkipped(deposit) => {
                format!("Funding skipped\nTx: {}", deposit.tx_hash)
            }
        }
    }

    pub(crate) async fn notify(&self, event: &RelayEvent) {
        let text = self.render(event);
        info!(kind = %event.kind(), message = %text, "relay notification");

        if let Some(telegram) = &self.telegram {
            telegram.send_message(&text).await;
        }
    }

    /// Forwards events until the bus is dropped.
    pub(crate) async fn run(self, mut events: Subscription) {
        while let Some(event) = events.recv().await {
            self.notify(&event).await;
        }
    }
}
