/// Counts model round trips within one turn and enforces the optional cap.
#[derive(Debug, Clone)]
pub struct LoopController {
    max_rounds: Option<u32>,
    rounds: u32,
}

impl LoopController {
    pub fn new(max_rounds: Option<u32>) -> Self {
        Self {
            max_rounds,
            rounds: 0,
        }
    }

    /// Start the next round and return its 1-based number.
    pub fn begin_round(&mut self) -> u32 {
        self.rounds += 1;
        self.rounds
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// True once no further follow-up round may be started.
    pub fn should_stop(&self) -> bool {
        match self.max_rounds {
            Some(max) => self.rounds >= max,
            None => false,
        }
    }
}
