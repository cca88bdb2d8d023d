use brainstorm_core::config::AgentConfig;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnDecision {
    Allow,
    Stop { reason_code: &'static str, user_message: String },
}

/// Bounds the number of assistant turns one graph invocation may take.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnGuard {
    pub max_turns: Option<u32>,
}

impl Default for TurnGuard {
    fn default() -> Self {
        Self { max_turns: Some(25) }
    }
}

impl TurnGuard {
    pub fn unbounded() -> Self {
        Self { max_turns: None }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self { max_turns: config.max_turns }
    }

    /// `completed_turns` is the number of assistant steps already taken in this invocation.
    pub fn evaluate(&self, completed_turns: u32) -> TurnDecision {
        match self.max_turns {
            Some(limit) if completed_turns >= limit => TurnDecision::Stop {
                reason_code: "turn_limit_reached",
                user_message: format!(
                    "I stopped after {limit} reasoning steps without reaching an answer. \
                     Ask me to continue if you want me to keep going."
                ),
            },
            _ => TurnDecision::Allow,
        }
    }
}

#[cfg(test)]
mod tests {
    use brainstorm_core::config::{AgentConfig, AppConfig};

    use super::{TurnDecision, TurnGuard};

    #[test]
    fn allows_until_the_limit_then_stops() {
        let guard = TurnGuard { max_turns: Some(2) };

        assert_eq!(guard.evaluate(0), TurnDecision::Allow);
        assert_eq!(guard.evaluate(1), TurnDecision::Allow);

        let (reason_code, user_message) = match guard.evaluate(2) {
            TurnDecision::Stop { reason_code, user_message } => (reason_code, user_message),
            TurnDecision::Allow => ("", String::new()),
        };
        assert_eq!(reason_code, "turn_limit_reached");
        assert!(user_message.contains("after 2 reasoning steps"));
    }

    #[test]
    fn unbounded_guard_never_stops() {
        assert_eq!(TurnGuard::unbounded().evaluate(10_000), TurnDecision::Allow);
    }

    #[test]
    fn follows_agent_config() {
        let defaults = AppConfig::default().agent;
        let unbounded = AgentConfig { max_turns: None, ..defaults.clone() };

        assert_eq!(TurnGuard::from_config(&unbounded), TurnGuard::unbounded());
        assert_eq!(TurnGuard::from_config(&defaults), TurnGuard::default());
    }
}
