//! Agent worker: poll, execute, record, repeat.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use llm_desk_core::config::ConfigSource;
use llm_desk_core::conversation::{ConversationSink, NewMessage};
use llm_desk_core::error::{DeskError, Result};
use llm_desk_core::task::{Task, TaskStatus, TaskStore};
use llm_desk_core::types::{ChatMessage, ChatRole};
use llm_desk_providers::ChatProvider;
use llm_desk_providers::router::resolve_vendor;

use crate::{ABORTED_RESULT, AgentSettings, format_task_result};

/// Credentials and target supplied to [`TaskAgent::start`].
#[derive(Clone)]
struct AgentSession {
    api_key: String,
    model: String,
    conversation_id: String,
}

struct ActiveSession {
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

/// Single-flight scheduler draining the task queue.
///
/// At most one worker runs per instance. Separate instances share nothing
/// beyond the collaborators they were given.
pub struct TaskAgent {
    tasks: Arc<dyn TaskStore>,
    conversations: Arc<dyn ConversationSink>,
    provider: Arc<dyn ChatProvider>,
    config: Arc<dyn ConfigSource>,
    settings: AgentSettings,
    active: Mutex<Option<ActiveSession>>,
}

impl TaskAgent {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        conversations: Arc<dyn ConversationSink>,
        provider: Arc<dyn ChatProvider>,
        config: Arc<dyn ConfigSource>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            tasks,
            conversations,
            provider,
            config,
            settings,
            active: Mutex::new(None),
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start the worker and poll immediately.
    ///
    /// Empty arguments are a configuration error. Starting a running agent is
    /// a logged no-op.
    pub fn start(&self, api_key: &str, model: &str, conversation_id: &str) -> Result<()> {
        if api_key.trim().is_empty() || model.trim().is_empty() || conversation_id.trim().is_empty() {
            warn!("Cannot start agent: API key, model or conversation id is missing");
            return Err(DeskError::config(
                "agent requires an API key, a model and a conversation id",
            ));
        }

        let mut active = self.lock_active();
        if active.is_some() {
            info!("Agent is already running");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let worker = Worker {
            tasks: self.tasks.clone(),
            conversations: self.conversations.clone(),
            provider: self.provider.clone(),
            config: self.config.clone(),
            settings: self.settings.clone(),
            session: AgentSession {
                api_key: api_key.to_string(),
                model: model.to_string(),
                conversation_id: conversation_id.to_string(),
            },
            cancel: cancel.clone(),
        };

        info!(model, conversation_id, "Starting agent loop");
        let worker = tokio::spawn(worker.run());
        *active = Some(ActiveSession { cancel, worker });
        Ok(())
    }

    /// Stop the worker, abort any in-flight request and discard the session.
    ///
    /// Returns once the worker has recorded the state of the task it was
    /// running. Stopping an idle agent is a logged no-op.
    pub async fn stop(&self) {
        let active = { self.lock_active().take() };
        let Some(active) = active else {
            info!("Agent is not running");
            return;
        };

        info!("Stopping agent loop");
        active.cancel.cancel();
        if let Err(e) = active.worker.await {
            error!(%e, "Agent worker ended abnormally");
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock_active().is_some()
    }
}

struct Worker {
    tasks: Arc<dyn TaskStore>,
    conversations: Arc<dyn ConversationSink>,
    provider: Arc<dyn ChatProvider>,
    config: Arc<dyn ConfigSource>,
    settings: AgentSettings,
    session: AgentSession,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) {
        info!(conversation_id = %self.session.conversation_id, "Agent loop started");

        while !self.cancel.is_cancelled() {
            let delay = match self.step().await {
                Ok(true) => self.settings.retry_delay,
                Ok(false) => self.settings.poll_interval,
                Err(e) => {
                    error!(%e, "Failed to fetch next task");
                    self.settings.poll_interval
                }
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("Agent loop stopped");
    }

    /// One poll. Returns whether a task was executed.
    async fn step(&self) -> Result<bool> {
        let Some(task) = self.tasks.next_pending().await? else {
            debug!("No pending tasks");
            return Ok(false);
        };

        let task_id = task.id;
        if let Err(e) = self.process(&task).await {
            error!(task_id, %e, "Task failed");
            if let Err(store_err) = self
                .tasks
                .set_status(task_id, TaskStatus::Failed, Some(e.to_string()))
                .await
            {
                error!(task_id, %store_err, "Failed to record task failure");
            }
        }
        Ok(true)
    }

    async fn process(&self, task: &Task) -> Result<()> {
        let task_id = task.id;
        info!(task_id, content = %task.content, "Processing task");
        self.tasks
            .set_status(task_id, TaskStatus::Processing, None)
            .await?;

        match self.stream_reply(task).await? {
            Some(text) => {
                self.tasks
                    .set_status(task_id, TaskStatus::Completed, Some(text.clone()))
                    .await?;

                let mut message = NewMessage::new(
                    self.session.conversation_id.as_str(),
                    ChatRole::Assistant,
                    format_task_result(task_id, &text),
                );
                message.model = Some(self.session.model.clone());
                self.conversations.append(message).await?;

                info!(task_id, chars = text.len(), "Task completed");
            }
            None => {
                info!(task_id, "Task aborted");
                self.tasks
                    .set_status(task_id, TaskStatus::Failed, Some(ABORTED_RESULT.to_string()))
                    .await?;
            }
        }
        Ok(())
    }

    /// Stream the reply for one task. `None` means the request was cancelled.
    async fn stream_reply(&self, task: &Task) -> Result<Option<String>> {
        // The session key and model override the source, which may carry neither.
        let mut config = self.config.chat_settings()?;
        config.api_key = self.session.api_key.clone();
        config.model = self.session.model.clone();
        resolve_vendor(&config)?;

        let history = [
            ChatMessage::system(self.settings.system_prompt.as_str()),
            ChatMessage::user(task.content.as_str()),
        ];

        let request_cancel = self.cancel.child_token();
        let mut stream = match self
            .provider
            .stream_chat(&config, &history, request_cancel.clone())
            .await
        {
            Ok(stream) => stream,
            Err(_) if request_cancel.is_cancelled() => return Ok(None),
            Err(e) => return Err(e),
        };

        // Only the cancel branch aborts; a reply that already ended is kept.
        let mut text = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = request_cancel.cancelled() => return Ok(None),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(delta)) => text.push_str(&delta),
                Some(Err(e)) => return Err(e),
                None => return Ok(Some(text)),
            }
        }
    }
}
