use crate::{
    engine::Engine,
    error::{EngineError, TransportError},
    profile::{Gender, ParticipantId, ParticipantStatus, ProfileUpdate, SetupStage, ROOMS},
    relay::{MessageOrigin, RelayForwarder},
    transport::{ChatPayload, DeliveredMessageId, Transport},
};
use async_trait::async_trait;
use std::sync::Arc;
use teloxide::{
    prelude::*,
    types::InputFile,
    utils::command::BotCommands,
    ApiError, RequestError,
};
use tracing::{error, info};

const NOT_IN_CHAT_HINT: &str =
    "You're not in an active chat. Use /search to find someone to talk to.";
const STILL_SEARCHING_HINT: &str = "Still looking for a chat partner, hang tight...";
const DELIVERY_FAILED_REPLY: &str = "Oops! Something went wrong with sending your message.";

/// Outbound half of the Telegram adapter. In one-to-one bot chats the chat
/// id equals the participant's user id, so recipients resolve directly.
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn map_request_error(e: RequestError) -> TransportError {
    match e {
        RequestError::Api(ApiError::BotBlocked) | RequestError::Api(ApiError::UserDeactivated) => {
            TransportError::Unreachable
        }
        RequestError::Network(_) => TransportError::Timeout,
        other => TransportError::Api(other.to_string()),
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn notify(&self, recipient: ParticipantId, text: &str) -> Result<(), TransportError> {
        self.bot
            .send_message(ChatId(recipient.0), text)
            .await
            .map_err(map_request_error)?;
        Ok(())
    }

    async fn deliver_payload(
        &self,
        recipient: ParticipantId,
        payload: &ChatPayload,
    ) -> Result<DeliveredMessageId, TransportError> {
        let chat = ChatId(recipient.0);
        let sent = match payload {
            ChatPayload::Text(text) => self.bot.send_message(chat, text).await,
            ChatPayload::Photo { file_id, caption } => {
                let req = self.bot.send_photo(chat, InputFile::file_id(file_id.clone()));
                match caption {
                    Some(c) => req.caption(c.clone()).await,
                    None => req.await,
                }
            }
            ChatPayload::Video { file_id, caption } => {
                let req = self.bot.send_video(chat, InputFile::file_id(file_id.clone()));
                match caption {
                    Some(c) => req.caption(c.clone()).await,
                    None => req.await,
                }
            }
            ChatPayload::Audio { file_id, caption } => {
                let req = self.bot.send_audio(chat, InputFile::file_id(file_id.clone()));
                match caption {
                    Some(c) => req.caption(c.clone()).await,
                    None => req.await,
                }
            }
            ChatPayload::Voice { file_id } => {
                self.bot
                    .send_voice(chat, InputFile::file_id(file_id.clone()))
                    .await
            }
            ChatPayload::Document { file_id, caption } => {
                let req = self
                    .bot
                    .send_document(chat, InputFile::file_id(file_id.clone()));
                match caption {
                    Some(c) => req.caption(c.clone()).await,
                    None => req.await,
                }
            }
        }
        .map_err(map_request_error)?;

        Ok(sent.id.0 as i64)
    }
}

#[derive(BotCommands, Clone)]
#[command(
    rename_rule = "lowercase",
    description = "These commands are supported:"
)]
enum Command {
    #[command(description = "Register and set up your profile.")]
    Start,
    #[command(description = "Display this text.")]
    Help,
    #[command(description = "Look for a chat partner.")]
    Search,
    #[command(description = "End the current chat.")]
    End,
    #[command(description = "Update your age: /age <18-99>")]
    Age(String),
    #[command(description = "Update your gender: /gender <m|w>")]
    Gender(String),
    #[command(description = "Update your room: /room <name>")]
    Room(String),
}

/// Inbound half of the Telegram adapter: the teloxide dispatcher plus the
/// setup dialogue. Engine and relay results are translated into replies
/// here; the core never formats chat text itself.
#[derive(Clone)]
pub struct TelegramInterface {
    engine: Arc<Engine>,
    relay: Arc<RelayForwarder>,
}

impl TelegramInterface {
    pub fn new(engine: Arc<Engine>, relay: Arc<RelayForwarder>) -> Self {
        Self { engine, relay }
    }

    pub async fn run(&self, bot: Bot) -> anyhow::Result<()> {
        info!("Starting Telegram dispatcher...");

        let handler = Update::filter_message()
            .branch(
                dptree::entry()
                    .filter_command::<Command>()
                    .endpoint(answer_command),
            )
            .branch(dptree::entry().endpoint(answer_message));

        Dispatcher::builder(bot, handler)
            .dependencies(dptree::deps![self.clone()])
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        Ok(())
    }
}

/// Prompt for whichever profile field the setup dialogue asks for next.
fn stage_prompt(stage: SetupStage) -> String {
    match stage {
        SetupStage::Age => "Please enter your age (18-99):".to_string(),
        SetupStage::Gender => "Now your gender (m/w):".to_string(),
        SetupStage::Room => format!("And finally pick a room: {}", ROOMS.join(", ")),
        SetupStage::Complete => {
            "Setup complete! Use /search to find someone to chat with.".to_string()
        }
    }
}

fn engine_error_reply(e: &EngineError) -> String {
    match e {
        EngineError::Validation(reason) => format!("That doesn't work: {}.", reason),
        EngineError::ProfileIncomplete => {
            "Please complete your setup using /start first.".to_string()
        }
        EngineError::AlreadySearching => "You're already searching for a chat partner.".to_string(),
        EngineError::AlreadyChatting => {
            "Finish your current chat with /end before searching for a new one.".to_string()
        }
        EngineError::NotInChat => "You're not in an active chat right now.".to_string(),
        EngineError::DeliveryFailed(_) => DELIVERY_FAILED_REPLY.to_string(),
        EngineError::PartnerUnresolved | EngineError::Store(_) => {
            "Something went wrong on our side, please try again.".to_string()
        }
    }
}

async fn answer_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    interface: TelegramInterface,
) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let id = ParticipantId(user.id.0 as i64);
    let engine = &interface.engine;

    match cmd {
        Command::Start => match engine.registry().ensure_exists(id).await {
            Ok(existed) => {
                if existed && engine.registry().is_complete(id).await {
                    bot.send_message(
                        msg.chat.id,
                        "Welcome back! Use /search to find someone to chat with.\n\
                         Update your settings with /age, /gender, or /room.",
                    )
                    .await?;
                } else {
                    let stage = engine
                        .registry()
                        .get(id)
                        .await
                        .map(|p| p.stage())
                        .unwrap_or(SetupStage::Age);
                    bot.send_message(
                        msg.chat.id,
                        format!("Welcome to the anonymous chat! {}", stage_prompt(stage)),
                    )
                    .await?;
                }
            }
            Err(e) => {
                error!("Failed to register participant {}: {}", id, e);
                bot.send_message(msg.chat.id, engine_error_reply(&e)).await?;
            }
        },
        Command::Help => {
            bot.send_message(msg.chat.id, Command::descriptions().to_string())
                .await?;
        }
        Command::Search => match engine.request_search(id).await {
            Ok(()) => {
                // A match may already have fired its own notice; this reply
                // covers the still-waiting case.
                if engine.status(id).await == ParticipantStatus::Waiting {
                    bot.send_message(msg.chat.id, "Looking for a chat partner...")
                        .await?;
                }
            }
            Err(e) => {
                bot.send_message(msg.chat.id, engine_error_reply(&e)).await?;
            }
        },
        Command::End => match engine.end_chat(id).await {
            Ok(()) => {
                bot.send_message(msg.chat.id, "Chat ended. Want to start another? Use /search.")
                    .await?;
            }
            Err(e) => {
                bot.send_message(msg.chat.id, engine_error_reply(&e)).await?;
            }
        },
        Command::Age(arg) => {
            apply_field_command(&bot, &msg, &interface, id, FieldArg::Age(arg)).await?;
        }
        Command::Gender(arg) => {
            apply_field_command(&bot, &msg, &interface, id, FieldArg::Gender(arg)).await?;
        }
        Command::Room(arg) => {
            apply_field_command(&bot, &msg, &interface, id, FieldArg::Room(arg)).await?;
        }
    }

    Ok(())
}

enum FieldArg {
    Age(String),
    Gender(String),
    Room(String),
}

async fn apply_field_command(
    bot: &Bot,
    msg: &Message,
    interface: &TelegramInterface,
    id: ParticipantId,
    field: FieldArg,
) -> ResponseResult<()> {
    let update = match &field {
        FieldArg::Age(arg) => match arg.trim().parse::<u8>() {
            Ok(age) => ProfileUpdate::Age(age),
            Err(_) => {
                bot.send_message(msg.chat.id, "Usage: /age <18-99>").await?;
                return Ok(());
            }
        },
        FieldArg::Gender(arg) => match Gender::parse(arg) {
            Some(gender) => ProfileUpdate::Gender(gender),
            None => {
                bot.send_message(msg.chat.id, "Usage: /gender <m|w>").await?;
                return Ok(());
            }
        },
        FieldArg::Room(arg) => {
            if arg.trim().is_empty() {
                bot.send_message(msg.chat.id, format!("Usage: /room <{}>", ROOMS.join("|")))
                    .await?;
                return Ok(());
            }
            ProfileUpdate::Room(arg.clone())
        }
    };

    match interface.engine.registry().upsert(id, update).await {
        Ok(profile) => {
            let confirmation = if profile.is_complete() {
                "Updated. Use /search to find someone to chat with.".to_string()
            } else {
                // Mid-setup updates keep the dialogue moving.
                format!("Updated. {}", stage_prompt(profile.stage()))
            };
            bot.send_message(msg.chat.id, confirmation).await?;
        }
        Err(e) => {
            bot.send_message(msg.chat.id, engine_error_reply(&e)).await?;
        }
    }

    Ok(())
}

async fn answer_message(bot: Bot, msg: Message, interface: TelegramInterface) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let id = ParticipantId(user.id.0 as i64);

    match interface.engine.status(id).await {
        ParticipantStatus::SettingUp => {
            handle_setup_reply(&bot, &msg, &interface, id).await?;
        }
        ParticipantStatus::Chatting => {
            handle_relay(&bot, &msg, &interface, id).await?;
        }
        ParticipantStatus::Waiting => {
            bot.send_message(msg.chat.id, STILL_SEARCHING_HINT).await?;
        }
        ParticipantStatus::Idle => {
            bot.send_message(msg.chat.id, NOT_IN_CHAT_HINT).await?;
        }
    }

    Ok(())
}

/// One step of the setup dialogue: the current stage decides how the
/// free-text reply is interpreted. Validation failures re-prompt the same
/// stage.
async fn handle_setup_reply(
    bot: &Bot,
    msg: &Message,
    interface: &TelegramInterface,
    id: ParticipantId,
) -> ResponseResult<()> {
    let registry = interface.engine.registry();
    if let Err(e) = registry.ensure_exists(id).await {
        error!("Failed to register participant {}: {}", id, e);
        bot.send_message(msg.chat.id, engine_error_reply(&e)).await?;
        return Ok(());
    }

    let stage = registry
        .get(id)
        .await
        .map(|p| p.stage())
        .unwrap_or(SetupStage::Age);

    let Some(text) = msg.text() else {
        bot.send_message(msg.chat.id, stage_prompt(stage)).await?;
        return Ok(());
    };

    let update = match stage {
        SetupStage::Age => match text.trim().parse::<u8>() {
            Ok(age) => ProfileUpdate::Age(age),
            Err(_) => {
                bot.send_message(msg.chat.id, format!("That's not an age. {}", stage_prompt(stage)))
                    .await?;
                return Ok(());
            }
        },
        SetupStage::Gender => match Gender::parse(text) {
            Some(gender) => ProfileUpdate::Gender(gender),
            None => {
                bot.send_message(
                    msg.chat.id,
                    format!("Please answer m or w. {}", stage_prompt(stage)),
                )
                .await?;
                return Ok(());
            }
        },
        SetupStage::Room => ProfileUpdate::Room(text.to_string()),
        SetupStage::Complete => {
            bot.send_message(msg.chat.id, stage_prompt(SetupStage::Complete))
                .await?;
            return Ok(());
        }
    };

    match registry.upsert(id, update).await {
        Ok(profile) => {
            bot.send_message(msg.chat.id, stage_prompt(profile.stage()))
                .await?;
        }
        Err(e) => {
            bot.send_message(
                msg.chat.id,
                format!("{} {}", engine_error_reply(&e), stage_prompt(stage)),
            )
            .await?;
        }
    }

    Ok(())
}

async fn handle_relay(
    bot: &Bot,
    msg: &Message,
    interface: &TelegramInterface,
    id: ParticipantId,
) -> ResponseResult<()> {
    let Some(payload) = payload_from_message(msg) else {
        bot.send_message(msg.chat.id, "Unsupported content type.")
            .await?;
        return Ok(());
    };

    let origin = MessageOrigin {
        message_id: msg.id.0 as i64,
        chat_id: msg.chat.id.0,
    };

    if let Err(e) = interface.relay.relay(id, origin, payload).await {
        error!("Relay from {} failed: {}", id, e);
        bot.send_message(msg.chat.id, engine_error_reply(&e)).await?;
    }

    Ok(())
}

/// Map an inbound Telegram message onto an opaque relay payload. Media is
/// re-sent by file id; for photos Telegram lists sizes ascending, so the
/// last one is the original resolution.
fn payload_from_message(msg: &Message) -> Option<ChatPayload> {
    let caption = msg.caption().map(|c| c.to_string());

    if let Some(text) = msg.text() {
        return Some(ChatPayload::Text(text.to_string()));
    }
    if let Some(sizes) = msg.photo() {
        let best = sizes.last()?;
        return Some(ChatPayload::Photo {
            file_id: best.file.id.clone(),
            caption,
        });
    }
    if let Some(video) = msg.video() {
        return Some(ChatPayload::Video {
            file_id: video.file.id.clone(),
            caption,
        });
    }
    if let Some(audio) = msg.audio() {
        return Some(ChatPayload::Audio {
            file_id: audio.file.id.clone(),
            caption,
        });
    }
    if let Some(voice) = msg.voice() {
        return Some(ChatPayload::Voice {
            file_id: voice.file.id.clone(),
        });
    }
    if let Some(document) = msg.document() {
        return Some(ChatPayload::Document {
            file_id: document.file.id.clone(),
            caption,
        });
    }

    None
}
