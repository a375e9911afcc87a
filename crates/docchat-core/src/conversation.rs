//! Conversation store: the turn lifecycle of a chat session.
//!
//! A submission appends a user turn and an empty assistant placeholder,
//! asks the [`Backend`], attaches [`TurnMeta`] once the answer settles, and
//! hands the answer text to the [`RevealScheduler`].
//!
//! # Fencing
//!
//! Every submission owns a [`CancellationToken`] and addresses its
//! placeholder by [`TurnId`], never by position. Submitting again (or calling
//! [`ConversationStore::cancel`]) retires the previous submission:
//!
//! - still waiting for its answer: the request future is dropped and the
//!   placeholder becomes a `Cancelled` turn;
//! - mid-reveal: the placeholder is flushed to the full answer text.
//!
//! A completion that arrives after its submission was retired is discarded,
//! so at most one assistant turn is ever pending or revealing.
//!
//! The state mutex is only taken between awaits, never across one.

use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{select, Either};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::models::{
    AskRequest, FeedbackRequest, HistoryEntry, Rating, Role, Turn, TurnId, TurnMeta, TurnState,
};
use crate::notice::Notice;
use crate::reveal::{RevealOutcome, RevealScheduler};

/// Content written to a placeholder whose submission was retired before
/// the answer arrived.
pub const SUPERSEDED_MESSAGE: &str = "Cancelled: superseded by a newer question.";

/// Text revealed when the service answers with an empty string.
pub const EMPTY_ANSWER: &str = "No answer.";

/// Acknowledgement shown after a rating is accepted.
pub fn feedback_thanks(rating: Rating) -> &'static str {
    match rating {
        Rating::Up => "Thanks for the feedback!",
        Rating::Down => "Got it, we'll improve this.",
    }
}

/// Receives every turn after it changes.
pub trait TurnObserver: Send + Sync {
    fn turn_changed(&self, turn: &Turn);
}

/// Observer that ignores all changes.
pub struct NoObserver;

impl TurnObserver for NoObserver {
    fn turn_changed(&self, _turn: &Turn) {}
}

/// Result of [`ConversationStore::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Input was invalid; nothing was appended or sent.
    Rejected(Notice),
    /// The answer was fully revealed into `turn`.
    Answered { turn: TurnId },
    /// The request failed; `turn` holds the error text.
    Failed { turn: TurnId, message: String },
    /// A newer submission or an explicit cancel retired this one.
    Superseded { turn: TurnId },
}

struct ActiveAnswer {
    turn: TurnId,
    cancel: CancellationToken,
    /// Full answer text once received.
    answer: Option<String>,
}

struct ConversationState {
    turns: Vec<Turn>,
    next_id: u64,
    active: Option<ActiveAnswer>,
}

impl ConversationState {
    fn allocate(&mut self) -> TurnId {
        self.next_id += 1;
        TurnId(self.next_id)
    }

    fn turn_mut(&mut self, id: TurnId) -> Option<&mut Turn> {
        self.turns.iter_mut().find(|t| t.id == id)
    }

    fn is_current(&self, id: TurnId, cancel: &CancellationToken) -> bool {
        !cancel.is_cancelled() && self.active.as_ref().is_some_and(|a| a.turn == id)
    }

    /// Retire the active submission, finalizing its placeholder.
    fn retire_active(&mut self) -> Option<Turn> {
        let active = self.active.take()?;
        active.cancel.cancel();
        let turn = self.turn_mut(active.turn)?;
        match active.answer {
            Some(text) => {
                turn.content = text;
                turn.state = TurnState::Complete;
            }
            None => {
                turn.content = SUPERSEDED_MESSAGE.to_string();
                turn.state = TurnState::Cancelled;
            }
        }
        Some(turn.clone())
    }
}

/// Shared handle to one conversation.
///
/// Cloning is cheap; all clones see the same turns.
#[derive(Clone)]
pub struct ConversationStore {
    backend: Arc<dyn Backend>,
    reveal: RevealScheduler,
    observer: Arc<dyn TurnObserver>,
    state: Arc<Mutex<ConversationState>>,
}

impl ConversationStore {
    pub fn new(backend: Arc<dyn Backend>, reveal: RevealScheduler) -> Self {
        Self {
            backend,
            reveal,
            observer: Arc::new(NoObserver),
            state: Arc::new(Mutex::new(ConversationState {
                turns: Vec::new(),
                next_id: 0,
                active: None,
            })),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn TurnObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Seed the conversation with an assistant greeting.
    ///
    /// The greeting is part of the history sent with every question.
    pub fn with_greeting(self, greeting: &str) -> Self {
        if !greeting.trim().is_empty() {
            let mut state = self.lock();
            let id = state.allocate();
            state.turns.push(Turn::assistant(id, greeting));
        }
        self
    }

    fn lock(&self) -> MutexGuard<'_, ConversationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, turns: &[Turn]) {
        for turn in turns {
            self.observer.turn_changed(turn);
        }
    }

    /// Snapshot of all turns in order.
    pub fn turns(&self) -> Vec<Turn> {
        self.lock().turns.clone()
    }

    pub fn turn(&self, id: TurnId) -> Option<Turn> {
        self.lock().turns.iter().find(|t| t.id == id).cloned()
    }

    /// The placeholder currently waiting for or revealing an answer.
    pub fn pending_turn(&self) -> Option<TurnId> {
        self.lock().active.as_ref().map(|a| a.turn)
    }

    /// Most recent assistant turn that carries metadata.
    pub fn last_answer(&self) -> Option<Turn> {
        self.lock()
            .turns
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant && t.meta.is_some())
            .cloned()
    }

    /// Retire the active submission, if any. Returns whether one was active.
    pub fn cancel(&self) -> bool {
        let retired = self.lock().retire_active();
        match retired {
            Some(turn) => {
                debug!(turn = %turn.id, "cancelled active submission");
                self.notify(&[turn]);
                true
            }
            None => false,
        }
    }

    /// Submit a question and drive it to completion.
    ///
    /// The user turn and the placeholder are appended before the request is
    /// sent. Remote failures end up in the placeholder, never in the return
    /// type's error path.
    pub async fn submit(&self, query: &str, auto_enrich: bool) -> SubmitOutcome {
        let query = query.trim();
        if query.is_empty() {
            return SubmitOutcome::Rejected(Notice::info("Type a question first."));
        }

        let (turn_id, cancel, request, changed) = {
            let mut state = self.lock();
            let mut changed = Vec::with_capacity(3);
            if let Some(retired) = state.retire_active() {
                debug!(turn = %retired.id, "superseded by new submission");
                changed.push(retired);
            }

            let user = Turn::user(state.allocate(), query);
            state.turns.push(user.clone());
            let history = state
                .turns
                .iter()
                .map(|t| HistoryEntry {
                    role: t.role,
                    content: t.content.clone(),
                })
                .collect();

            let placeholder = Turn::placeholder(state.allocate());
            let turn_id = placeholder.id;
            state.turns.push(placeholder.clone());

            let cancel = CancellationToken::new();
            state.active = Some(ActiveAnswer {
                turn: turn_id,
                cancel: cancel.clone(),
                answer: None,
            });
            changed.push(user);
            changed.push(placeholder);

            let request = AskRequest {
                query: query.to_string(),
                history,
                auto_enrich,
            };
            (turn_id, cancel, request, changed)
        };
        self.notify(&changed);

        let settled = {
            let ask = pin!(self.backend.ask(&request));
            let cancelled = pin!(cancel.cancelled());
            match select(ask, cancelled).await {
                Either::Left((result, _)) => Some(result),
                Either::Right(_) => None,
            }
        };
        let Some(result) = settled else {
            debug!(turn = %turn_id, "ask abandoned after supersession");
            return SubmitOutcome::Superseded { turn: turn_id };
        };

        let response = match result {
            Ok(response) => response,
            Err(err) => return self.fail(turn_id, &cancel, format!("{:#}", err)),
        };

        let text = response
            .answer
            .clone()
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| EMPTY_ANSWER.to_string());
        let meta = TurnMeta::from_response(&response);

        let attached = {
            let mut state = self.lock();
            if state.is_current(turn_id, &cancel) {
                if let Some(active) = state.active.as_mut() {
                    active.answer = Some(text.clone());
                }
                state.turn_mut(turn_id).map(|turn| {
                    turn.meta = Some(meta);
                    turn.state = TurnState::Revealing;
                    turn.clone()
                })
            } else {
                None
            }
        };
        match attached {
            Some(turn) => self.notify(&[turn]),
            None => {
                debug!(turn = %turn_id, "discarded stale answer");
                return SubmitOutcome::Superseded { turn: turn_id };
            }
        }

        let outcome = self
            .reveal
            .run(&text, &cancel, |prefix| self.write_prefix(turn_id, &cancel, prefix))
            .await;
        if let RevealOutcome::Superseded { writes } = outcome {
            debug!(turn = %turn_id, writes, "reveal superseded");
            return SubmitOutcome::Superseded { turn: turn_id };
        }

        let finished = {
            let mut state = self.lock();
            if state.is_current(turn_id, &cancel) {
                state.active = None;
                state.turn_mut(turn_id).map(|turn| {
                    turn.content = text;
                    turn.state = TurnState::Complete;
                    turn.clone()
                })
            } else {
                None
            }
        };
        match finished {
            Some(turn) => {
                self.notify(&[turn]);
                SubmitOutcome::Answered { turn: turn_id }
            }
            None => SubmitOutcome::Superseded { turn: turn_id },
        }
    }

    fn write_prefix(&self, id: TurnId, cancel: &CancellationToken, prefix: &str) -> bool {
        let written = {
            let mut state = self.lock();
            if !state.is_current(id, cancel) {
                return false;
            }
            state.turn_mut(id).map(|turn| {
                turn.content = prefix.to_string();
                turn.clone()
            })
        };
        match written {
            Some(turn) => {
                self.notify(&[turn]);
                true
            }
            None => false,
        }
    }

    fn fail(&self, id: TurnId, cancel: &CancellationToken, message: String) -> SubmitOutcome {
        warn!(turn = %id, error = %message, "ask failed");
        let failed = {
            let mut state = self.lock();
            if state.is_current(id, cancel) {
                state.active = None;
                state.turn_mut(id).map(|turn| {
                    turn.content = format!("⚠️ {}", message);
                    turn.meta = None;
                    turn.state = TurnState::Failed;
                    turn.clone()
                })
            } else {
                None
            }
        };
        match failed {
            Some(turn) => {
                self.notify(&[turn]);
                SubmitOutcome::Failed { turn: id, message }
            }
            None => SubmitOutcome::Superseded { turn: id },
        }
    }

    /// Rate an answer.
    ///
    /// The rating is recorded optimistically and rolled back if the service
    /// rejects it, so an answer can be rated at most once.
    pub async fn send_feedback(&self, id: TurnId, rating: Rating, comment: &str) -> Notice {
        let query_id = {
            let mut state = self.lock();
            let Some(turn) = state.turn_mut(id) else {
                return Notice::info("That answer is no longer available.");
            };
            match turn.meta.as_mut() {
                Some(meta) if meta.feedback.is_some() => {
                    return Notice::info("Feedback already sent for this answer.");
                }
                Some(TurnMeta {
                    query_id: Some(query_id),
                    feedback,
                    ..
                }) => {
                    *feedback = Some(rating);
                    query_id.clone()
                }
                _ => return Notice::info("This answer cannot be rated."),
            }
        };

        let request = FeedbackRequest {
            query_id,
            rating: rating.value(),
            comment: comment.to_string(),
        };
        match self.backend.send_feedback(&request).await {
            Ok(_) => {
                if let Some(turn) = self.turn(id) {
                    self.notify(&[turn]);
                }
                Notice::success(feedback_thanks(rating))
            }
            Err(err) => {
                warn!(turn = %id, error = %err, "feedback failed");
                if let Some(meta) = self.lock().turn_mut(id).and_then(|t| t.meta.as_mut()) {
                    meta.feedback = None;
                }
                Notice::error("Failed to send feedback")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{Call, InMemoryBackend};
    use crate::models::{AskResponse, Citation, Confidence, OriginMode};
    use crate::reveal::FrameClock;
    use async_trait::async_trait;
    use futures::poll;
    use std::task::Poll;

    struct YieldClock;

    #[async_trait]
    impl FrameClock for YieldClock {
        async fn next_frame(&self) {
            tokio::task::yield_now().await;
        }
    }

    fn store(backend: &Arc<InMemoryBackend>) -> ConversationStore {
        ConversationStore::new(backend.clone(), RevealScheduler::immediate())
    }

    struct Recorder(Mutex<Vec<Turn>>);

    impl TurnObserver for Recorder {
        fn turn_changed(&self, turn: &Turn) {
            self.0.lock().unwrap().push(turn.clone());
        }
    }

    #[tokio::test]
    async fn empty_query_is_rejected_without_side_effects() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = store(&backend);
        let outcome = store.submit("   \n", false).await;
        assert!(matches!(outcome, SubmitOutcome::Rejected(_)));
        assert!(store.turns().is_empty());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn turns_are_appended_before_the_answer_settles() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = store(&backend).with_greeting("Hi!");
        let gate = backend.hold_next_ask();

        let mut fut = Box::pin(store.submit("What is the refund window?", false));
        assert!(matches!(poll!(&mut fut), Poll::Pending));

        let turns = store.turns();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1].role, Role::User);
        assert_eq!(turns[2].role, Role::Assistant);
        assert_eq!(turns[2].content, "");
        assert_eq!(turns[2].state, TurnState::Pending);
        assert_eq!(store.pending_turn(), Some(turns[2].id));

        gate.release();
        assert!(matches!(fut.await, SubmitOutcome::Answered { .. }));
        assert_eq!(store.pending_turn(), None);
    }

    #[tokio::test]
    async fn answer_attaches_meta_and_reveals_full_text() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.push_answer(AskResponse {
            answer: Some("Refunds are accepted within 14 days of purchase.".into()),
            confidence: Some("high".into()),
            citations: vec![Citation {
                filename: "policy.pdf".into(),
                page_start: Some(2),
                page_end: Some(2),
                ..Default::default()
            }],
            query_id: Some("q-1".into()),
            ..Default::default()
        });
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let store = ConversationStore::new(
            backend.clone(),
            RevealScheduler::new(8, Arc::new(YieldClock)),
        )
        .with_greeting("Hi!")
        .with_observer(recorder.clone());

        let outcome = store.submit("  What is the refund window?  ", true).await;
        let SubmitOutcome::Answered { turn } = outcome else {
            panic!("unexpected outcome: {:?}", outcome);
        };

        let answered = store.turn(turn).unwrap();
        assert_eq!(answered.content, "Refunds are accepted within 14 days of purchase.");
        assert_eq!(answered.state, TurnState::Complete);
        let meta = answered.meta.unwrap();
        assert_eq!(meta.confidence, Confidence::High);
        assert_eq!(meta.query_id.as_deref(), Some("q-1"));
        assert_eq!(meta.origin.mode, OriginMode::Local);

        let Call::Ask(request) = &backend.calls()[0] else {
            panic!("expected an ask call");
        };
        assert_eq!(request.query, "What is the refund window?");
        assert!(request.auto_enrich);
        let roles: Vec<Role> = request.history.iter().map(|h| h.role).collect();
        assert_eq!(roles, vec![Role::Assistant, Role::User]);
        assert_eq!(request.history[1].content, "What is the refund window?");

        // Every reveal write carried the metadata and extended the previous one.
        let writes: Vec<String> = recorder
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.id == turn && t.state == TurnState::Revealing && !t.content.is_empty())
            .inspect(|t| assert!(t.meta.is_some()))
            .map(|t| t.content.clone())
            .collect();
        let length = "Refunds are accepted within 14 days of purchase.".chars().count();
        assert_eq!(writes.len(), length.div_ceil(8));
        for pair in writes.windows(2) {
            assert!(pair[1].starts_with(&pair[0]));
        }
    }

    #[tokio::test]
    async fn failure_renders_inline_without_meta() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.push_ask_error("connection refused");
        let store = store(&backend);

        let outcome = store.submit("hello", false).await;
        let SubmitOutcome::Failed { turn, message } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(message, "connection refused");
        let failed = store.turn(turn).unwrap();
        assert_eq!(failed.content, "⚠️ connection refused");
        assert_eq!(failed.state, TurnState::Failed);
        assert!(failed.meta.is_none());
        assert_eq!(store.pending_turn(), None);
    }

    #[tokio::test]
    async fn newer_submission_discards_stale_answer() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = store(&backend);
        let gate = backend.hold_next_ask();

        let mut first = Box::pin(store.submit("first", false));
        assert!(matches!(poll!(&mut first), Poll::Pending));
        let first_turn = store.pending_turn().unwrap();

        let second = store.submit("second", false).await;
        let SubmitOutcome::Answered { turn: second_turn } = second else {
            panic!("second submission should answer");
        };

        gate.release();
        assert_eq!(first.await, SubmitOutcome::Superseded { turn: first_turn });

        let stale = store.turn(first_turn).unwrap();
        assert_eq!(stale.state, TurnState::Cancelled);
        assert_eq!(stale.content, SUPERSEDED_MESSAGE);
        assert!(stale.meta.is_none());
        assert_eq!(store.turn(second_turn).unwrap().content, "You asked: second");

        let active = store
            .turns()
            .iter()
            .filter(|t| t.state.is_active())
            .count();
        assert_eq!(active, 0);
    }

    #[tokio::test]
    async fn newer_submission_flushes_reveal_in_progress() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.push_answer(AskResponse {
            answer: Some("A long answer that takes several frames to reveal.".into()),
            ..Default::default()
        });
        let store = ConversationStore::new(
            backend.clone(),
            RevealScheduler::new(8, Arc::new(YieldClock)),
        );

        let mut first = Box::pin(store.submit("first", false));
        assert!(matches!(poll!(&mut first), Poll::Pending));
        let first_turn = store.pending_turn().unwrap();
        let partial = store.turn(first_turn).unwrap();
        assert_eq!(partial.state, TurnState::Revealing);
        assert_eq!(partial.content, "A long a");

        let second = store.submit("second", false).await;
        assert!(matches!(second, SubmitOutcome::Answered { .. }));
        assert_eq!(first.await, SubmitOutcome::Superseded { turn: first_turn });

        let flushed = store.turn(first_turn).unwrap();
        assert_eq!(flushed.state, TurnState::Complete);
        assert_eq!(flushed.content, "A long answer that takes several frames to reveal.");
        assert!(flushed.meta.is_some());
    }

    #[tokio::test]
    async fn explicit_cancel_retires_pending_submission() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = store(&backend);
        let _gate = backend.hold_next_ask();

        let mut fut = Box::pin(store.submit("slow question", false));
        assert!(matches!(poll!(&mut fut), Poll::Pending));
        assert!(store.cancel());
        assert!(matches!(fut.await, SubmitOutcome::Superseded { .. }));
        assert!(!store.cancel());
        assert_eq!(store.turns()[1].state, TurnState::Cancelled);
    }

    #[tokio::test]
    async fn feedback_is_recorded_once() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.push_answer(AskResponse {
            answer: Some("Yes.".into()),
            query_id: Some("q-9".into()),
            ..Default::default()
        });
        backend.push_answer(AskResponse {
            answer: Some("No id.".into()),
            ..Default::default()
        });
        let store = store(&backend);

        let SubmitOutcome::Answered { turn } = store.submit("rated?", false).await else {
            panic!("expected answer");
        };
        let notice = store.send_feedback(turn, Rating::Up, "").await;
        assert_eq!(notice, Notice::success("Thanks for the feedback!"));
        assert_eq!(
            store.turn(turn).unwrap().meta.unwrap().feedback,
            Some(Rating::Up)
        );

        let again = store.send_feedback(turn, Rating::Down, "").await;
        assert_eq!(again.level, crate::notice::NoticeLevel::Info);

        let SubmitOutcome::Answered { turn: unrated } = store.submit("no id", false).await else {
            panic!("expected answer");
        };
        let refused = store.send_feedback(unrated, Rating::Up, "").await;
        assert_eq!(refused, Notice::info("This answer cannot be rated."));

        let sent: Vec<_> = backend
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Feedback(_)))
            .collect();
        assert_eq!(sent.len(), 1);
        let Call::Feedback(req) = &sent[0] else { unreachable!() };
        assert_eq!(req.query_id, "q-9");
        assert_eq!(req.rating, 1);
    }
}
