use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tracing::info;

use hdb_core::{
    claims::{notifier::TicketNotifier, ClaimCoordinator},
    config::Config,
    messaging::port::MessagingPort,
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub claims: Arc<ClaimCoordinator>,
    pub notifier: Arc<TicketNotifier>,
    pub messenger: Arc<dyn MessagingPort>,
}

impl AppState {
    pub fn new(
        cfg: Arc<Config>,
        claims: Arc<ClaimCoordinator>,
        messenger: Arc<dyn MessagingPort>,
    ) -> Self {
        let notifier = Arc::new(TicketNotifier::new(messenger.clone(), claims.clone()));
        Self {
            cfg,
            claims,
            notifier,
            messenger,
        }
    }
}

pub async fn run_polling(cfg: Arc<Config>, claims: Arc<ClaimCoordinator>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    if let Ok(me) = bot.get_me().await {
        info!("hdb started: @{}", me.username());
    }
    info!(
        store = %claims.store().endpoint(),
        chats = cfg.helpdesk_chat_ids.len(),
        "claim coordination ready"
    );

    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let state = Arc::new(AppState::new(cfg, claims, messenger));

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}
