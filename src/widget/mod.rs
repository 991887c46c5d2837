//! Chat-widget session helpers.
//!
//! The web widget owns two pieces of client-side state the turn pipeline
//! does not: the in-progress scripted-flow state it echoes back each turn,
//! and the guided breathing timer. The timer ticks into a channel owned by
//! the bubble that started it; `dispose` stops every future tick, so a
//! closed widget never mutates a dead view.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::detect::Language;
use crate::flows::FlowState;
use crate::storage::Channel;

/// Phase of one guided breathing cycle (4-4-6 pattern).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreathingPhase {
    Inhale,
    Hold,
    Exhale,
}

impl BreathingPhase {
    /// Seconds the phase lasts.
    pub fn duration_secs(&self) -> u64 {
        match self {
            BreathingPhase::Inhale => 4,
            BreathingPhase::Hold => 4,
            BreathingPhase::Exhale => 6,
        }
    }

    /// On-screen instruction for the phase.
    pub fn label(&self, language: Language) -> &'static str {
        match (self, language) {
            (BreathingPhase::Inhale, Language::En) => "Breathe in slowly",
            (BreathingPhase::Hold, Language::En) => "Hold",
            (BreathingPhase::Exhale, Language::En) => "Breathe out gently",
            (BreathingPhase::Inhale, Language::Sw) => "Vuta pumzi taratibu",
            (BreathingPhase::Hold, Language::Sw) => "Shikilia",
            (BreathingPhase::Exhale, Language::Sw) => "Toa pumzi polepole",
        }
    }

    fn next(&self) -> BreathingPhase {
        match self {
            BreathingPhase::Inhale => BreathingPhase::Hold,
            BreathingPhase::Hold => BreathingPhase::Exhale,
            BreathingPhase::Exhale => BreathingPhase::Inhale,
        }
    }
}

/// One timer tick delivered to the spawning bubble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreathingTick {
    pub phase: BreathingPhase,
    /// 1-based cycle counter.
    pub cycle: u32,
    /// Instruction text in the session language.
    pub label: &'static str,
}

/// Guided breathing timer. Ticks phase transitions into the channel until
/// the requested cycles complete or the timer is disposed.
pub struct BreathingTimer {
    task: Option<JoinHandle<()>>,
}

impl BreathingTimer {
    /// Start a timer for `cycles` full inhale-hold-exhale rounds. Returns
    /// the timer handle and the tick receiver for the spawning bubble.
    pub fn start(cycles: u32, language: Language) -> (Self, mpsc::Receiver<BreathingTick>) {
        // Three ticks per cycle; buffered so a slow consumer never stalls
        // the clock.
        let (tx, rx) = mpsc::channel(cycles as usize * 3 + 1);

        let task = tokio::spawn(async move {
            let mut phase = BreathingPhase::Inhale;
            for cycle in 1..=cycles {
                loop {
                    let tick = BreathingTick {
                        phase,
                        cycle,
                        label: phase.label(language),
                    };
                    if tx.send(tick).await.is_err() {
                        // Receiver dropped: the bubble is gone.
                        return;
                    }
                    tokio::time::sleep(Duration::from_secs(phase.duration_secs())).await;
                    phase = phase.next();
                    if phase == BreathingPhase::Inhale {
                        break;
                    }
                }
            }
        });

        (Self { task: Some(task) }, rx)
    }

    /// Stop the timer. No tick is delivered after this returns; disposing
    /// twice is a no-op.
    pub fn dispose(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Breathing timer disposed");
        }
    }

    /// Whether the timer has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.task.is_none()
    }
}

impl Drop for BreathingTimer {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Client-side widget session state.
pub struct WidgetSession {
    pub session_id: String,
    pub language: Language,
    /// Scripted-flow state echoed back to the engine on the next turn.
    pub flow: Option<FlowState>,
    timer: Option<BreathingTimer>,
}

impl WidgetSession {
    /// Open a widget session. The widget always speaks on the web channel.
    pub fn new(session_id: impl Into<String>, language: Language) -> Self {
        Self {
            session_id: session_id.into(),
            language,
            flow: None,
            timer: None,
        }
    }

    /// The channel a widget session reports to the engine.
    pub fn channel(&self) -> Channel {
        Channel::Web
    }

    /// Start a guided breathing exercise, replacing any running one.
    pub fn start_breathing(&mut self, cycles: u32) -> mpsc::Receiver<BreathingTick> {
        if let Some(mut previous) = self.timer.take() {
            previous.dispose();
        }
        let (timer, rx) = BreathingTimer::start(cycles, self.language);
        self.timer = Some(timer);
        rx
    }

    /// Whether a breathing exercise is currently running.
    pub fn breathing_active(&self) -> bool {
        self.timer.as_ref().is_some_and(|t| !t.is_disposed())
    }

    /// Close the session: dispose the timer and drop flow state.
    pub fn close(&mut self) {
        if let Some(mut timer) = self.timer.take() {
            timer.dispose();
        }
        self.flow = None;
    }
}
