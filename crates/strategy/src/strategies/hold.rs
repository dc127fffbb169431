use common::Signal;

use crate::{Phase, Strategy, StrategyContext, StrategyError};

/// Never trades. The default when no strategy is configured.
pub struct Hold {
    name: String,
}

impl Hold {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Strategy for Hold {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "hold"
    }

    fn phase(&self) -> Phase {
        Phase::Idle
    }

    fn evaluate(&mut self, _ctx: &StrategyContext<'_>) -> Result<Signal, StrategyError> {
        Ok(Signal::hold("hold_strategy"))
    }
}
