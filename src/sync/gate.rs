use std::fmt;
use std::time::{Duration, Instant};

/// Longest tolerated underflow before the buffer is reset
pub const MAX_IDLE_TIME: Duration = Duration::from_millis(200);

/// Stalls shorter than this are not worth a log line
pub const STALL_LOG_FLOOR: Duration = Duration::from_millis(5);

/// Output gating state of a sync buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateState {
    /// Nothing pushed yet
    #[default]
    Empty,
    /// Accepting input until enough blocks are queued
    Buffering,
    /// Emitting packets every tick
    Running,
    /// Too few blocks queued; output suspended
    Underflow,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GateState::Empty => "empty",
            GateState::Buffering => "buffering",
            GateState::Running => "running",
            GateState::Underflow => "underflow",
        };
        f.write_str(name)
    }
}

/// What the owner has to do after the gate was polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateAction {
    /// Nothing to emit this tick
    Hold,
    /// Buffering finished; rewind the scan and start emitting
    Start,
    /// Keep emitting
    Run,
    /// Output just got suspended
    Stall,
    /// Blocks recovered after the given stall
    Resume(Duration),
    /// Blocks stayed short for too long; drop everything
    Reset,
}

/// State machine deciding when queued packets may flow out.
#[derive(Debug, Default)]
pub struct BufferingGate {
    state: GateState,
    stall_since: Option<Instant>,
}

impl BufferingGate {
    /// A gate in the `Empty` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> GateState {
        self.state
    }

    /// Packets are flowing.
    pub fn is_running(&self) -> bool {
        self.state == GateState::Running
    }

    /// First data arrived.
    pub fn on_push(&mut self) {
        if self.state == GateState::Empty {
            self.state = GateState::Buffering;
        }
    }

    /// Back to buffering, e.g. after a reset.
    pub fn rebuffer(&mut self) {
        self.state = GateState::Buffering;
        self.stall_since = None;
    }

    /// Advances the state machine given the queued block count.
    pub fn poll(&mut self, num_blocks: usize, enough: usize, low: usize, now: Instant) -> GateAction {
        match self.state {
            GateState::Empty => GateAction::Hold,
            GateState::Buffering => {
                if num_blocks >= enough {
                    self.state = GateState::Running;
                    GateAction::Start
                } else {
                    GateAction::Hold
                }
            }
            GateState::Running => {
                if num_blocks < low {
                    self.state = GateState::Underflow;
                    self.stall_since = Some(now);
                    GateAction::Stall
                } else {
                    GateAction::Run
                }
            }
            GateState::Underflow => {
                let stalled = self
                    .stall_since
                    .map(|since| now.saturating_duration_since(since))
                    .unwrap_or_default();
                if num_blocks >= low {
                    self.state = GateState::Running;
                    self.stall_since = None;
                    GateAction::Resume(stalled)
                } else if stalled > MAX_IDLE_TIME {
                    self.rebuffer();
                    GateAction::Reset
                } else {
                    GateAction::Hold
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_buffering_to_running() {
        let mut gate = BufferingGate::new();
        let now = Instant::now();
        assert_eq!(gate.poll(20, 10, 5, now), GateAction::Hold);

        gate.on_push();
        assert_eq!(gate.state(), GateState::Buffering);
        assert_eq!(gate.poll(9, 10, 5, now), GateAction::Hold);
        assert_eq!(gate.poll(10, 10, 5, now), GateAction::Start);
        assert!(gate.is_running());
        assert_eq!(gate.poll(5, 10, 5, now), GateAction::Run);
    }

    #[test]
    fn test_underflow_resume() {
        let mut gate = BufferingGate::new();
        let now = Instant::now();
        gate.on_push();
        gate.poll(10, 10, 5, now);

        assert_eq!(gate.poll(4, 10, 5, now), GateAction::Stall);
        assert_eq!(gate.state(), GateState::Underflow);
        assert_eq!(gate.poll(4, 10, 5, now + Duration::from_millis(50)), GateAction::Hold);
        assert_eq!(
            gate.poll(5, 10, 5, now + Duration::from_millis(80)),
            GateAction::Resume(Duration::from_millis(80))
        );
        assert!(gate.is_running());
    }

    #[test]
    fn test_underflow_timeout_resets() {
        let mut gate = BufferingGate::new();
        let now = Instant::now();
        gate.on_push();
        gate.poll(10, 10, 5, now);
        gate.poll(0, 10, 5, now);

        assert_eq!(gate.poll(0, 10, 5, now + MAX_IDLE_TIME), GateAction::Hold);
        assert_eq!(
            gate.poll(4, 10, 5, now + MAX_IDLE_TIME + Duration::from_millis(1)),
            GateAction::Reset
        );
        assert_eq!(gate.state(), GateState::Buffering);
    }

    #[test]
    fn test_recovered_blocks_win_over_late_poll() {
        let mut gate = BufferingGate::new();
        let now = Instant::now();
        gate.on_push();
        gate.poll(10, 10, 5, now);
        gate.poll(0, 10, 5, now);

        let late = Duration::from_millis(250);
        assert_eq!(gate.poll(5, 10, 5, now + late), GateAction::Resume(late));
        assert!(gate.is_running());
    }

    #[test]
    fn test_display() {
        assert_eq!(GateState::Underflow.to_string(), "underflow");
    }
}
