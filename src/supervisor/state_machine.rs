use thiserror::Error;

/// `start` 한 번의 진행 단계. 재진입 없는 단일 패스입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPhase {
    Probe,
    AlreadyRunning,
    Provision,
    Launch,
    Settle,
    Announce,
    Done,
}

#[derive(Error, Debug)]
pub enum TransitionError {
    #[error("invalid transition: {0:?} -> {1:?}")]
    InvalidTransition(StartPhase, StartPhase),
}

pub struct StateMachine {
    pub phase: StartPhase,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self {
            phase: StartPhase::Probe,
        }
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_transition(&self, to: &StartPhase) -> bool {
        matches!(
            (&self.phase, to),
            (StartPhase::Probe, StartPhase::AlreadyRunning)
                | (StartPhase::Probe, StartPhase::Provision)
                | (StartPhase::Provision, StartPhase::AlreadyRunning)
                | (StartPhase::Provision, StartPhase::Launch)
                | (StartPhase::Launch, StartPhase::Settle)
                | (StartPhase::Settle, StartPhase::Announce)
                | (StartPhase::AlreadyRunning, StartPhase::Done)
                | (StartPhase::Announce, StartPhase::Done)
        )
    }

    pub fn transition(&mut self, to: StartPhase) -> Result<(), TransitionError> {
        if self.can_transition(&to) {
            tracing::info!("Start phase: {:?} -> {:?}", self.phase, to);
            self.phase = to;
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition(self.phase, to))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_launch_path() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.phase, StartPhase::Probe);
        for phase in [
            StartPhase::Provision,
            StartPhase::Launch,
            StartPhase::Settle,
            StartPhase::Announce,
            StartPhase::Done,
        ] {
            assert!(sm.transition(phase).is_ok(), "-> {phase:?}");
        }
        assert_eq!(sm.phase, StartPhase::Done);
    }

    #[test]
    fn already_running_path() {
        let mut sm = StateMachine::new();
        assert!(sm.transition(StartPhase::AlreadyRunning).is_ok());
        assert!(sm.transition(StartPhase::Done).is_ok());
    }

    #[test]
    fn bind_race_after_provision() {
        let mut sm = StateMachine::new();
        sm.transition(StartPhase::Provision).unwrap();
        assert!(sm.transition(StartPhase::AlreadyRunning).is_ok());
    }

    #[test]
    fn invalid_transition() {
        let mut sm = StateMachine::new();
        // Probe 에서 바로 Launch 로 갈 수 없음 (프로비저닝 생략 불가)
        let result = sm.transition(StartPhase::Launch);
        assert!(result.is_err());
        assert_eq!(sm.phase, StartPhase::Probe);
    }

    #[test]
    fn no_reentry_after_done() {
        let mut sm = StateMachine::new();
        sm.transition(StartPhase::AlreadyRunning).unwrap();
        sm.transition(StartPhase::Done).unwrap();
        assert!(sm.transition(StartPhase::Probe).is_err());
        assert!(sm.transition(StartPhase::Provision).is_err());
    }
}
