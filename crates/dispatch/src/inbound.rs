//! Inbound message recognition.
//!
//! A message is a command only if it carries the command prefix after
//! trimming. The setup prefix registers the sender as master, exactly once,
//! only while no master is configured. Everything else is ignored.

use aman_core::config::AgentConfig;

/// Classification of one raw inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Command text with the prefix stripped.
    Command(String),
    /// One-time master registration request.
    Setup,
    /// Not addressed to the agent.
    Ignored,
}

pub fn classify(raw: &str, config: &AgentConfig) -> Inbound {
    let trimmed = raw.trim();
    if trimmed.starts_with(&config.setup_prefix) {
        return Inbound::Setup;
    }
    if let Some(rest) = trimmed.strip_prefix(&config.command_prefix) {
        return Inbound::Command(rest.to_string());
    }
    Inbound::Ignored
}

#[cfg(test)]
mod tests {
    use super::*;
    use aman_core::config::AppConfig;

    fn config() -> AgentConfig {
        AppConfig::default().agent
    }

    #[test]
    fn recognizes_prefixed_commands() {
        assert_eq!(
            classify("AMAN:status", &config()),
            Inbound::Command("status".into())
        );
        assert_eq!(
            classify("  AMAN:sms to=1 message=hi  ", &config()),
            Inbound::Command("sms to=1 message=hi".into())
        );
    }

    #[test]
    fn ignores_unprefixed_text() {
        assert_eq!(classify("hello there", &config()), Inbound::Ignored);
        assert_eq!(classify("aman:status", &config()), Inbound::Ignored);
    }

    #[test]
    fn recognizes_setup_prefix() {
        assert_eq!(classify("AMAN_SETUP:SET_MASTER", &config()), Inbound::Setup);
    }
}
