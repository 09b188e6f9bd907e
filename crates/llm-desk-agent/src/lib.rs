//! Background task agent.
//!
//! A [`TaskAgent`] drains the task queue one task at a time: it polls the
//! store for the oldest pending task, streams a reply through the provider
//! router, records the outcome, and posts successful results to a target
//! conversation.

use std::time::Duration;

use llm_desk_core::config::{Config, DEFAULT_AGENT_SYSTEM_PROMPT};

pub mod runtime;

pub use runtime::TaskAgent;

/// Result text recorded when a task is cancelled mid-flight.
pub const ABORTED_RESULT: &str = "Task aborted by user.";

/// Scheduling and prompt settings for one agent instance.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Delay before re-polling an empty queue.
    pub poll_interval: Duration,
    /// Delay between finishing one task and polling for the next.
    pub retry_delay: Duration,
    pub system_prompt: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            retry_delay: Duration::from_millis(100),
            system_prompt: DEFAULT_AGENT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl AgentSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            retry_delay: config.retry_delay(),
            system_prompt: config.agent_system_prompt(),
        }
    }
}

/// Message appended to the target conversation for a completed task.
pub fn format_task_result(task_id: u64, text: &str) -> String {
    format!("Task Result (ID: {task_id}):\n{text}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        config
            .set_path("agent.poll_interval_ms", serde_json::json!(250))
            .unwrap();
        let settings = AgentSettings::from_config(&config);
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.retry_delay, Duration::from_millis(100));
        assert_eq!(settings.system_prompt, DEFAULT_AGENT_SYSTEM_PROMPT);
    }

    #[test]
    fn test_format_task_result() {
        assert_eq!(format_task_result(7, "X is..."), "Task Result (ID: 7):\nX is...");
    }
}
