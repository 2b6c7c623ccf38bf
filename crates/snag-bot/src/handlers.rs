use crate::telegram::TelegramChat;
use snag_core::RequestHandler;
use std::sync::Arc;
use teloxide::{prelude::*, utils::command::BotCommands};
use tracing::{error, info};

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    #[command(description = "Start the bot.")]
    Start,
    #[command(description = "Show how to use the bot.")]
    Help,
}

const USAGE: &str = "Send me a link and I'll send back what's behind it.\n\n\
If the link is a web page, I'll ask which file extensions you want \
(for example: jpg, png, mp4) and collect every matching file on the page.\n\n\
Reply with \"links\" instead to get the page's raw link list. \
Add \"+browser\" to your reply to load the page in a real browser first.";

pub async fn handle_command(bot: Bot, msg: Message, cmd: Command) -> ResponseResult<()> {
    match cmd {
        Command::Start => {
            let name = msg
                .from
                .as_ref()
                .map(|u| u.first_name.clone())
                .unwrap_or_else(|| "there".to_string());
            bot.send_message(msg.chat.id, format!("Hi, {}!\n\n{}", name, USAGE))
                .await?;
        }
        Command::Help => {
            bot.send_message(
                msg.chat.id,
                format!("{}\n\n{}", USAGE, Command::descriptions()),
            )
            .await?;
        }
    }
    Ok(())
}

pub async fn handle_text(
    bot: Bot,
    msg: Message,
    handler: Arc<RequestHandler>,
) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let chat = Arc::new(TelegramChat::from_message(bot, &msg));
    info!("Handling message {} in chat {}", msg.id.0, msg.chat.id);
    if let Err(e) = handler.handle_text(chat, text).await {
        error!("Failed to handle message in chat {}: {}", msg.chat.id, e);
    }
    Ok(())
}
