mod imagine;
mod quiz;

use std::collections::HashMap;
use std::env;
use std::fs::File;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use dotenv::dotenv;
use teloxide::prelude::*;
use teloxide::types::{
    ChatAction, ChatId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId,
    ParseMode, User,
};
use teloxide::utils::command::BotCommands;
use teloxide::utils::html;

use imagine::{EnvFileTokenStore, GenerateRequest, ImageGenerator, ImagineError};
use quiz::codeguess::SolutionsDb;
use quiz::math::MathBank;
use quiz::scores::{guessing_points_policy, ScoreStore};
use quiz::session::{QuizSession, ScorePolicy, SubmitOutcome};
use quiz::MultiChoiceQuiz;

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
type SessionKey = (ChatId, MessageId);

const CODEGUESSR_CHOICES: usize = 5;
const CODEGUESSR_TIMEOUT: Duration = Duration::from_secs(60);
const MATH_QUIZ_TIMEOUT: Duration = Duration::from_secs(240);

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
enum Command {
    #[command(description = "hello!")]
    Hello,
    #[command(description = "turns your prompts into art.")]
    Imagine(String),
    #[command(description = "solve a short math question.")]
    MathQuiz,
    #[command(description = "guess the programming language.")]
    CodeGuessr,
    #[command(description = "show the top 10 code guessrs.")]
    Top10,
    #[command(description = "display this text.")]
    Help,
}

struct BotContext {
    sessions: Mutex<HashMap<SessionKey, QuizSession>>,
    math: MathBank,
    solutions: SolutionsDb,
    scores: Arc<ScoreStore>,
    imagine: ImageGenerator,
}

#[tokio::main]
async fn main() {
    dotenv().expect("Failed to load .env file");
    pretty_env_logger::init();
    log::info!("Starting classy bot...");

    let bot = Bot::from_env();

    println!("Loading the math question bank...");
    let math_path = env::var("MATH_QA_PATH").unwrap_or_else(|_| "data/math_qa.json".to_string());
    let math_file = File::open(&math_path).expect("Failed to open the math question bank");
    let math = MathBank::new(math_file).expect("Failed to load the math question bank");
    println!("Math question bank loaded ({} problems)", math.len());

    println!("Opening the solutions database...");
    let solutions_path =
        env::var("CODEGUESSR_DB").unwrap_or_else(|_| "data/codeguessr.db".to_string());
    let solutions =
        SolutionsDb::open(&solutions_path).expect("Failed to open the solutions database");
    println!("Solutions database opened");

    let scores_path =
        env::var("SCORES_DB").unwrap_or_else(|_| "data/codeguessr_scores.db".to_string());
    let scores = Arc::new(ScoreStore::open(&scores_path).expect("Failed to open the scores database"));

    let refresh_token = env::var("MAGE_REFRESH_TOKEN").expect("MAGE_REFRESH_TOKEN is not set");
    let token_file = env::var("MAGE_TOKEN_FILE").unwrap_or_else(|_| ".env".to_string());
    let imagine = ImageGenerator::new(
        refresh_token,
        Box::new(EnvFileTokenStore::new(token_file, "MAGE_REFRESH_TOKEN")),
    );

    let ctx = Arc::new(BotContext {
        sessions: Mutex::new(HashMap::new()),
        math,
        solutions,
        scores,
        imagine,
    });

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(Update::filter_callback_query().endpoint(handle_answer));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![ctx])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_command(
    bot: Bot,
    ctx: Arc<BotContext>,
    msg: Message,
    cmd: Command,
) -> HandlerResult {
    match cmd {
        Command::Hello => {
            bot.send_message(msg.chat.id, "Hello").await?;
        }
        Command::Help => {
            bot.send_message(msg.chat.id, Command::descriptions().to_string())
                .await?;
        }
        Command::Imagine(prompt) => imagine_command(bot, ctx, msg, prompt).await?,
        Command::MathQuiz => {
            let quiz = ctx.math.random_quiz();
            start_quiz(bot, ctx, msg.chat.id, quiz, "🔵", MATH_QUIZ_TIMEOUT, None).await?;
        }
        Command::CodeGuessr => {
            let quiz = ctx.solutions.random_quiz(CODEGUESSR_CHOICES)?;
            let policy = guessing_points_policy(ctx.scores.clone());
            start_quiz(
                bot,
                ctx,
                msg.chat.id,
                quiz,
                "⚫",
                CODEGUESSR_TIMEOUT,
                Some(policy),
            )
            .await?;
        }
        Command::Top10 => show_leaderboard(bot, ctx, msg).await?,
    }
    Ok(())
}

async fn start_quiz(
    bot: Bot,
    ctx: Arc<BotContext>,
    chat_id: ChatId,
    quiz: MultiChoiceQuiz,
    accent: &'static str,
    timeout: Duration,
    policy: Option<ScorePolicy>,
) -> HandlerResult {
    let mut session = QuizSession::new(quiz, accent, timeout, policy)?;
    let display = session.display();
    let options = display.options.unwrap_or_default();

    let sent = bot
        .send_message(chat_id, display.text)
        .parse_mode(ParseMode::Html)
        .reply_markup(answer_keyboard(&options))
        .await?;

    session.mark_sent(sent.date)?;

    let key = (chat_id, sent.id);
    let deadline = session.timeout();
    ctx.sessions.lock().unwrap().insert(key, session);
    log::info!("Started quiz {:?} with a {:?} deadline", key, deadline);

    tokio::spawn(expire_quiz(bot, ctx, key, deadline));
    Ok(())
}

async fn expire_quiz(bot: Bot, ctx: Arc<BotContext>, key: SessionKey, timeout: Duration) {
    tokio::time::sleep(timeout).await;

    let display = {
        let mut sessions = ctx.sessions.lock().unwrap();
        match sessions.remove(&key) {
            Some(mut session) => session.finalize(),
            None => None,
        }
    };

    if let Some(display) = display {
        let edit = bot
            .edit_message_text(key.0, key.1, display.text)
            .parse_mode(ParseMode::Html);
        if let Err(error) = edit.await {
            log::warn!(
                "Failed to publish the final state of quiz {:?}: {}",
                key,
                error
            );
        }
    }
}

async fn handle_answer(bot: Bot, ctx: Arc<BotContext>, q: CallbackQuery) -> HandlerResult {
    let (message, label) = match (&q.message, &q.data) {
        (Some(message), Some(label)) => (message.clone(), label.clone()),
        // Telegram no longer carries the message, or the press had no
        // payload. Nothing to do beyond acknowledging it.
        _ => {
            bot.answer_callback_query(q.id).await?;
            return Ok(());
        }
    };

    let key = (message.chat.id, message.id);
    let received_at = Utc::now();

    let result = {
        let mut sessions = ctx.sessions.lock().unwrap();
        match sessions.get_mut(&key) {
            // The quiz already timed out and was dropped; stale press.
            None => None,
            Some(session) => Some(
                session
                    .submit(q.from.id, mention_of(&q.from), &label, received_at)
                    .map(|outcome| (outcome, session.display())),
            ),
        }
    };

    match result {
        None => {
            bot.answer_callback_query(q.id).await?;
        }
        Some(Err(error)) => {
            log::error!("Rejected interaction on quiz {:?}: {}", key, error);
            bot.answer_callback_query(q.id)
                .text("Something went wrong")
                .await?;
        }
        Some(Ok((SubmitOutcome::Accepted, display))) => {
            bot.answer_callback_query(q.id).await?;
            let mut edit = bot
                .edit_message_text(key.0, key.1, display.text)
                .parse_mode(ParseMode::Html);
            if let Some(options) = &display.options {
                edit = edit.reply_markup(answer_keyboard(options));
            }
            edit.await?;
        }
        Some(Ok((SubmitOutcome::AlreadySubmitted, _))) => {
            bot.answer_callback_query(q.id)
                .text("You have already submitted an answer")
                .show_alert(true)
                .await?;
        }
        Some(Ok((SubmitOutcome::Closed, _))) => {
            bot.answer_callback_query(q.id).await?;
        }
    }

    Ok(())
}

async fn imagine_command(
    bot: Bot,
    ctx: Arc<BotContext>,
    msg: Message,
    prompt: String,
) -> HandlerResult {
    let prompt = prompt.trim().to_string();
    if prompt.is_empty() {
        bot.send_message(
            msg.chat.id,
            "Describe the image you want, e.g. /imagine a cat in a spacesuit",
        )
        .await?;
        return Ok(());
    }

    // We don't really care if this fails, the generation result is what counts
    let _ = bot
        .send_chat_action(msg.chat.id, ChatAction::UploadPhoto)
        .await;

    match ctx.imagine.generate(&GenerateRequest::new(prompt.clone())).await {
        Ok(image) if image.is_nsfw => {
            bot.send_message(msg.chat.id, "<b>NSFW content detected</b>")
                .parse_mode(ParseMode::Html)
                .await?;
        }
        Ok(image) => {
            let photo = InputFile::url(image.url.parse::<url::Url>()?);
            let mut caption = format!("&gt; {}", html::escape(&elide(&prompt, 128)));
            if let Some(user) = msg.from() {
                caption.push_str(&format!("\nby {}", mention_of(user)));
            }
            bot.send_photo(msg.chat.id, photo)
                .caption(caption)
                .parse_mode(ParseMode::Html)
                .await?;
        }
        Err(ImagineError::Nsfw) => {
            bot.send_message(msg.chat.id, "<b>NSFW content detected</b>")
                .parse_mode(ParseMode::Html)
                .await?;
        }
        Err(error) => {
            bot.send_message(msg.chat.id, "<b>Something went wrong</b>")
                .parse_mode(ParseMode::Html)
                .await?;
            return Err(error.into());
        }
    }

    Ok(())
}

async fn show_leaderboard(bot: Bot, ctx: Arc<BotContext>, msg: Message) -> HandlerResult {
    let top_players = ctx.scores.top_n(10)?;

    let mut lines = vec!["<b>Top 10 code guessrs</b>".to_string()];
    for (rank, (user_id, points)) in top_players.iter().enumerate() {
        let name = match bot.get_chat(ChatId(*user_id as i64)).await {
            Ok(chat) => chat
                .first_name()
                .map(|name| name.to_string())
                .unwrap_or_else(|| "mystery guessr".to_string()),
            Err(_) => "mystery guessr".to_string(),
        };
        let unit = if *points == 1 || *points == -1 {
            "point"
        } else {
            "points"
        };
        lines.push(format!(
            "{}. {}  {} {}",
            rank + 1,
            html::escape(&name),
            points,
            unit
        ));
    }

    bot.send_message(msg.chat.id, lines.join("\n"))
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

fn answer_keyboard(options: &[String]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(
        options
            .iter()
            .map(|option| vec![InlineKeyboardButton::callback(option.clone(), option.clone())]),
    )
}

fn mention_of(user: &User) -> String {
    format!(
        "<a href=\"tg://user?id={}\">{}</a>",
        user.id.0,
        html::escape(&user.full_name())
    )
}

fn elide(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars - 3).collect();
    format!("{}...", kept)
}
