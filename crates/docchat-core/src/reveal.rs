//! Progressive reveal of an already-received answer.
//!
//! The service returns answers whole; the [`RevealScheduler`] discloses them
//! as if they were streamed. Each frame advances a character cursor by a
//! fixed step and writes `text[..cursor]` to the target. The cursor counts
//! Unicode scalar values, so every write ends on a character boundary.
//!
//! # Algorithm
//!
//! 1. Write the first `step` characters immediately.
//! 2. Wait for one frame from the [`FrameClock`].
//! 3. Advance the cursor by `step` and write the longer prefix.
//! 4. Stop once the cursor reaches the end of the text, when the
//!    cancellation token fires, or when the writer reports its target gone.
//!
//! A text of `L` characters therefore takes `ceil(L / step)` writes, each a
//! strict extension of the previous one, the last being the full text.
//!
//! ```rust
//! use docchat_core::reveal::reveal_steps;
//!
//! let steps: Vec<&str> = reveal_steps("refund window", 8).collect();
//! assert_eq!(steps, vec!["refund w", "refund window"]);
//! ```

use std::pin::pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{select, Either};
use tokio_util::sync::CancellationToken;

/// Characters revealed per frame unless configured otherwise.
pub const DEFAULT_REVEAL_STEP: usize = 8;

/// Source of animation frames.
#[async_trait]
pub trait FrameClock: Send + Sync {
    /// Resolve when the next frame is due.
    async fn next_frame(&self);
}

/// A clock whose frames are always due. Reveals complete without waiting.
pub struct ImmediateClock;

#[async_trait]
impl FrameClock for ImmediateClock {
    async fn next_frame(&self) {}
}

/// Iterator over the successive prefixes written by a reveal.
pub struct RevealSteps<'a> {
    text: &'a str,
    step: usize,
    cursor: usize,
}

/// Prefixes of `text` in `step`-character increments, ending with `text`.
///
/// Yields nothing for an empty text. A `step` of 0 is treated as 1.
pub fn reveal_steps(text: &str, step: usize) -> RevealSteps<'_> {
    RevealSteps {
        text,
        step: step.max(1),
        cursor: 0,
    }
}

impl<'a> Iterator for RevealSteps<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.cursor >= self.text.len() {
            return None;
        }
        let rest = &self.text[self.cursor..];
        let advance = rest
            .char_indices()
            .nth(self.step)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        self.cursor += advance;
        Some(&self.text[..self.cursor])
    }
}

/// How a reveal ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealOutcome {
    /// The full text was written.
    Completed { writes: usize },
    /// Stopped early by cancellation or because the target went away.
    Superseded { writes: usize },
}

/// Frame-driven writer of answer prefixes.
#[derive(Clone)]
pub struct RevealScheduler {
    step: usize,
    clock: Arc<dyn FrameClock>,
}

impl RevealScheduler {
    pub fn new(step: usize, clock: Arc<dyn FrameClock>) -> Self {
        Self {
            step: step.max(1),
            clock,
        }
    }

    /// Scheduler with the default step and no frame delay.
    pub fn immediate() -> Self {
        Self::new(DEFAULT_REVEAL_STEP, Arc::new(ImmediateClock))
    }

    pub fn step(&self) -> usize {
        self.step
    }

    /// Reveal `text` through `write`.
    ///
    /// `write` receives each prefix and returns `false` when its target no
    /// longer accepts writes, which ends the reveal as superseded. The token
    /// is checked before every write and raced against every frame wait.
    pub async fn run<F>(&self, text: &str, cancel: &CancellationToken, mut write: F) -> RevealOutcome
    where
        F: FnMut(&str) -> bool + Send,
    {
        let mut writes = 0;
        for (i, prefix) in reveal_steps(text, self.step).enumerate() {
            if i > 0 {
                let frame = pin!(self.clock.next_frame());
                let cancelled = pin!(cancel.cancelled());
                if let Either::Right(_) = select(frame, cancelled).await {
                    return RevealOutcome::Superseded { writes };
                }
            }
            if cancel.is_cancelled() || !write(prefix) {
                return RevealOutcome::Superseded { writes };
            }
            writes += 1;
        }
        RevealOutcome::Completed { writes }
    }
}
