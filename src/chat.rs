//! `docchat ask`, `docchat chat`, and `docchat feedback`.
//!
//! Answers are revealed on stdout through a [`TerminalObserver`]. In an
//! interactive session Ctrl-C cancels the question in flight instead of
//! exiting; `/quit` or end of input ends the session.

use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use docchat_core::backend::Backend;
use docchat_core::conversation::{feedback_thanks, ConversationStore, SubmitOutcome};
use docchat_core::models::{FeedbackRequest, Rating};
use docchat_core::notice::Notice;
use docchat_core::reveal::RevealScheduler;

use crate::clock::TokioFrameClock;
use crate::config::Config;
use crate::present::{print_notice, TerminalObserver};

/// A line typed in an interactive session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    Question(String),
    Rate { rating: Rating, comment: String },
    Quit,
    Empty,
    Unknown(String),
}

pub fn parse_input(line: &str) -> ChatInput {
    let line = line.trim();
    if line.is_empty() {
        return ChatInput::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return ChatInput::Question(line.to_string());
    };
    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(n, r)| (n, r.trim()))
        .unwrap_or((command, ""));
    match name {
        "up" => ChatInput::Rate {
            rating: Rating::Up,
            comment: rest.to_string(),
        },
        "down" => ChatInput::Rate {
            rating: Rating::Down,
            comment: rest.to_string(),
        },
        "quit" | "exit" => ChatInput::Quit,
        other => ChatInput::Unknown(other.to_string()),
    }
}

/// Command-line override of `chat.auto_enrich`: `--auto-enrich` forces it on,
/// `--no-auto-enrich` forces it off, neither keeps the configured value.
pub fn enrich_override(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (false, true) => Some(false),
        (false, false) => None,
    }
}

fn conversation(config: &Config, backend: Arc<dyn Backend>) -> ConversationStore {
    let clock = Arc::new(TokioFrameClock::from_millis(config.chat.frame_ms));
    let reveal = RevealScheduler::new(config.chat.reveal_step, clock);
    ConversationStore::new(backend, reveal).with_observer(Arc::new(TerminalObserver::new()))
}

/// Ask one question and print the answer. Fails the process on a failed answer.
pub async fn run_ask(
    config: &Config,
    backend: Arc<dyn Backend>,
    query: &str,
    auto_enrich: Option<bool>,
) -> Result<()> {
    let store = conversation(config, backend);
    let auto_enrich = auto_enrich.unwrap_or(config.chat.auto_enrich);
    match store.submit(query, auto_enrich).await {
        SubmitOutcome::Answered { .. } => Ok(()),
        SubmitOutcome::Rejected(notice) => bail!("{}", notice),
        SubmitOutcome::Failed { message, .. } => bail!("{}", message),
        SubmitOutcome::Superseded { .. } => bail!("question was cancelled"),
    }
}

/// Interactive session reading questions from stdin.
pub async fn run_chat(
    config: &Config,
    backend: Arc<dyn Backend>,
    auto_enrich: Option<bool>,
) -> Result<()> {
    let auto_enrich = auto_enrich.unwrap_or(config.chat.auto_enrich);
    let store = conversation(config, backend).with_greeting(&config.chat.greeting);
    if let Some(greeting) = store.turns().first() {
        println!("{}", greeting.content);
    }
    eprintln!("Type a question, /up or /down [comment] to rate the last answer, /quit to leave.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_input(&line) {
            ChatInput::Empty => continue,
            ChatInput::Quit => break,
            ChatInput::Unknown(name) => {
                print_notice(&Notice::info(format!("Unknown command: /{}", name)));
            }
            ChatInput::Rate { rating, comment } => {
                let notice = match store.last_answer() {
                    Some(turn) => store.send_feedback(turn.id, rating, &comment).await,
                    None => Notice::info("Nothing to rate yet."),
                };
                print_notice(&notice);
            }
            ChatInput::Question(query) => {
                tokio::select! {
                    outcome = store.submit(&query, auto_enrich) => {
                        if let SubmitOutcome::Rejected(notice) = outcome {
                            print_notice(&notice);
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        store.cancel();
                    }
                }
            }
        }
    }
    Ok(())
}

/// Rate an answer by its query id, outside of a session.
pub async fn run_feedback(
    backend: Arc<dyn Backend>,
    query_id: &str,
    rating: Rating,
    comment: &str,
) -> Result<()> {
    let request = FeedbackRequest {
        query_id: query_id.to_string(),
        rating: rating.value(),
        comment: comment.to_string(),
    };
    match backend.send_feedback(&request).await {
        Ok(_) => {
            print_notice(&Notice::success(feedback_thanks(rating)));
            Ok(())
        }
        Err(err) => Err(err.context("Failed to send feedback")),
    }
}
