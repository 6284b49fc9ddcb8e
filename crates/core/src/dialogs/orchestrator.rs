use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::activity::Activity;
use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use crate::config::AppConfig;
use crate::dialogs::definition::DialogId;
use crate::dialogs::nlu::{Recognition, Recognizer};
use crate::dialogs::prompts::PromptId;
use crate::dialogs::registry::DialogRegistry;
use crate::dialogs::sequencer::{Answer, Progress, SequenceError, Sequencer, TurnEnv};
use crate::dialogs::stack::DialogStack;
use crate::dialogs::store::{ConversationId, ConversationStore, StoreError};

pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrchestratorSettings {
    /// Consecutive rejections of one prompt before the stack is cancelled; 0 never cancels.
    pub max_prompt_retries: u32,
    pub min_confidence: f32,
    pub recognizer_timeout: Duration,
    pub store_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_prompt_retries: 3,
            min_confidence: 0.3,
            recognizer_timeout: Duration::from_secs(5),
            store_timeout: Duration::from_secs(5),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_prompt_retries: config.dialog.max_prompt_retries,
            min_confidence: config.nlu.min_confidence,
            recognizer_timeout: Duration::from_secs(config.nlu.timeout_secs),
            store_timeout: Duration::from_secs(config.dialog.store_timeout_secs),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    Message,
    ConversationUpdate,
    Event,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnInput {
    pub conversation_id: ConversationId,
    pub kind: TurnKind,
    pub text: Option<String>,
    pub correlation_id: String,
}

impl TurnInput {
    pub fn message(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            conversation_id: ConversationId::new(conversation_id),
            kind: TurnKind::Message,
            text: Some(text.into()),
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnStatus {
    /// A prompt is pending and the stack was persisted.
    Suspended { dialog: DialogId, prompt: PromptId },
    /// The last active dialog ended this turn.
    NoActiveDialog { ended: Option<DialogId> },
    /// No dialog was running and no intent mapped to one.
    NoDialogSelected { intent: Option<String> },
    /// Too many rejected answers; the whole stack was dropped.
    Cancelled { dialog: DialogId, prompt: PromptId, retries: u32 },
    /// Not a message turn.
    Ignored,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TurnOutcome {
    pub activities: Vec<Activity>,
    pub status: TurnStatus,
}

impl TurnOutcome {
    pub fn ignored() -> Self {
        Self { activities: Vec::new(), status: TurnStatus::Ignored }
    }

    pub fn texts(&self) -> Vec<&str> {
        self.activities.iter().filter_map(Activity::text).collect()
    }
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout { operation: &'static str, timeout_ms: u64 },
}

impl TurnError {
    /// Collaborator failures the caller may retry; definition and step faults are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(StoreError::Unavailable(_)) | Self::Timeout { .. })
    }
}

/// Drives one turn per call: resume or begin a dialog, then write the stack back once.
pub struct Orchestrator {
    registry: Arc<DialogRegistry>,
    store: Arc<dyn ConversationStore>,
    recognizer: Arc<dyn Recognizer>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    settings: OrchestratorSettings,
    locks: TurnLocks,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<DialogRegistry>,
        store: Arc<dyn ConversationStore>,
        recognizer: Arc<dyn Recognizer>,
    ) -> Self {
        Self {
            registry,
            store,
            recognizer,
            audit: Arc::new(TracingAuditSink),
            clock: Arc::new(SystemClock),
            settings: OrchestratorSettings::default(),
            locks: TurnLocks::default(),
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn registry(&self) -> &DialogRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub async fn handle_turn(&self, input: TurnInput) -> Result<TurnOutcome, TurnError> {
        if input.kind != TurnKind::Message {
            tracing::debug!(
                event_name = "dialog.turn.ignored",
                correlation_id = %input.correlation_id,
                conversation_id = %input.conversation_id,
                kind = ?input.kind,
                "non-message turn skipped"
            );
            return Ok(TurnOutcome::ignored());
        }

        let result = self.serialized(&input.conversation_id, self.run_turn(&input)).await;
        match &result {
            Ok(outcome) => tracing::info!(
                event_name = "dialog.turn.completed",
                correlation_id = %input.correlation_id,
                conversation_id = %input.conversation_id,
                status = ?outcome.status,
                activities = outcome.activities.len(),
                "turn completed"
            ),
            Err(error) => {
                tracing::warn!(
                    event_name = "dialog.turn.failed",
                    correlation_id = %input.correlation_id,
                    conversation_id = %input.conversation_id,
                    transient = error.is_transient(),
                    error = %error,
                    "turn failed without writing state"
                );
                self.audit.emit(
                    self.event(&input, "turn.failed", AuditCategory::Turn, AuditOutcome::Failed)
                        .with_metadata("error", error.to_string())
                        .with_metadata("transient", error.is_transient().to_string()),
                );
            }
        }
        result
    }

    /// Drops whatever the conversation had on its stack.
    pub async fn reset(
        &self,
        conversation: &ConversationId,
        correlation_id: &str,
    ) -> Result<(), TurnError> {
        let cleared = self
            .serialized(conversation, async {
                let timeout_ms = millis(self.settings.store_timeout);
                tokio::time::timeout(self.settings.store_timeout, self.store.clear(conversation))
                    .await
                    .map_err(|_| TurnError::Timeout { operation: "store.clear", timeout_ms })?
                    .map_err(TurnError::from)
            })
            .await;
        if cleared.is_ok() {
            tracing::info!(
                event_name = "dialog.conversation.reset",
                correlation_id = %correlation_id,
                conversation_id = %conversation,
                "conversation reset"
            );
        }
        cleared
    }

    async fn run_turn(&self, input: &TurnInput) -> Result<TurnOutcome, TurnError> {
        let utterance = input.text.as_deref().unwrap_or_default();
        let mut stack = self.load_stack(input).await?;
        let today = self.clock.today();
        let sequencer = Sequencer::new(&self.registry);
        let mut activities = Vec::new();

        let status = if stack.pending().is_some() {
            let env = TurnEnv { today, entities: None };
            match sequencer.resume(&mut stack, utterance, env, &mut activities)? {
                Answer::Accepted(progress) => self.settle(input, progress),
                Answer::Rejected { dialog, prompt, retries, rejection, retry_text } => {
                    let reason = rejection.reason().unwrap_or("type_mismatch");
                    self.audit.emit(
                        self.event(
                            input,
                            "prompt.rejected",
                            AuditCategory::Prompt,
                            AuditOutcome::Rejected,
                        )
                        .with_metadata("dialog", dialog.as_str())
                        .with_metadata("prompt", prompt.0.as_str())
                        .with_metadata("retries", retries.to_string())
                        .with_metadata("reason", reason),
                    );
                    let limit = self.settings.max_prompt_retries;
                    if limit > 0 && retries >= limit {
                        stack.clear();
                        self.audit.emit(
                            self.event(
                                input,
                                "dialog.cancelled",
                                AuditCategory::Dialog,
                                AuditOutcome::Cancelled,
                            )
                            .with_metadata("dialog", dialog.as_str())
                            .with_metadata("prompt", prompt.0.as_str())
                            .with_metadata("retries", retries.to_string()),
                        );
                        TurnStatus::Cancelled { dialog, prompt, retries }
                    } else {
                        activities.push(Activity::message(retry_text));
                        TurnStatus::Suspended { dialog, prompt }
                    }
                }
            }
        } else {
            let recognition = self.recognize(input, utterance).await?;
            let routed = recognition
                .confident_intent(self.settings.min_confidence)
                .and_then(|label| self.registry.route(label))
                .cloned();
            match routed {
                Some(dialog) => {
                    self.audit.emit(
                        self.event(
                            input,
                            "dialog.started",
                            AuditCategory::Dialog,
                            AuditOutcome::Success,
                        )
                        .with_metadata("dialog", dialog.as_str()),
                    );
                    let env = TurnEnv { today, entities: Some(&recognition.entities) };
                    let progress = sequencer.begin(&mut stack, &dialog, env, &mut activities)?;
                    self.settle(input, progress)
                }
                None => TurnStatus::NoDialogSelected {
                    intent: recognition.intent.map(|intent| intent.label),
                },
            }
        };

        self.write_back(input, &stack).await?;
        Ok(TurnOutcome { activities, status })
    }

    fn settle(&self, input: &TurnInput, progress: Progress) -> TurnStatus {
        match progress {
            Progress::Suspended { dialog, prompt } => TurnStatus::Suspended { dialog, prompt },
            Progress::Exhausted { ended } => {
                let mut event =
                    self.event(input, "dialog.ended", AuditCategory::Dialog, AuditOutcome::Success);
                if let Some(dialog) = &ended {
                    event = event.with_metadata("dialog", dialog.as_str());
                }
                self.audit.emit(event);
                TurnStatus::NoActiveDialog { ended }
            }
        }
    }

    async fn load_stack(&self, input: &TurnInput) -> Result<DialogStack, TurnError> {
        let conversation = &input.conversation_id;
        let timeout_ms = millis(self.settings.store_timeout);
        let loaded =
            tokio::time::timeout(self.settings.store_timeout, self.store.load(conversation))
                .await
                .map_err(|_| TurnError::Timeout { operation: "store.load", timeout_ms })?;

        let stack = match loaded {
            Ok(stack) => stack.unwrap_or_default(),
            Err(StoreError::Decode(reason)) => {
                tracing::warn!(
                    event_name = "dialog.stack.discarded",
                    correlation_id = %input.correlation_id,
                    conversation_id = %conversation,
                    reason = %reason,
                    "persisted dialog stack unreadable, starting fresh"
                );
                DialogStack::new()
            }
            Err(error) => return Err(error.into()),
        };

        if let Err(stale) = stack.check_against(&self.registry) {
            tracing::warn!(
                event_name = "dialog.stack.discarded",
                correlation_id = %input.correlation_id,
                conversation_id = %conversation,
                reason = %stale,
                "persisted dialog stack no longer matches registry, starting fresh"
            );
            return Ok(DialogStack::new());
        }
        Ok(stack)
    }

    async fn recognize(
        &self,
        input: &TurnInput,
        utterance: &str,
    ) -> Result<Recognition, TurnError> {
        if utterance.trim().is_empty() {
            return Ok(Recognition::none());
        }

        let limit = self.settings.recognizer_timeout;
        let timeout_ms = millis(limit);
        let recognized = tokio::time::timeout(limit, self.recognizer.recognize(utterance))
            .await
            .map_err(|_| TurnError::Timeout { operation: "recognizer", timeout_ms })?;

        match recognized {
            Ok(recognition) => Ok(recognition),
            Err(error) => {
                tracing::warn!(
                    event_name = "dialog.recognizer.failed",
                    correlation_id = %input.correlation_id,
                    conversation_id = %input.conversation_id,
                    error = %error,
                    "recognizer failed, treating turn as no intent"
                );
                Ok(Recognition::none())
            }
        }
    }

    async fn write_back(&self, input: &TurnInput, stack: &DialogStack) -> Result<(), TurnError> {
        let conversation = &input.conversation_id;
        let timeout_ms = millis(self.settings.store_timeout);
        let written = if stack.is_empty() {
            tokio::time::timeout(self.settings.store_timeout, self.store.clear(conversation)).await
        } else {
            tokio::time::timeout(self.settings.store_timeout, self.store.save(conversation, stack))
                .await
        };
        written.map_err(|_| TurnError::Timeout { operation: "store.save", timeout_ms })??;
        Ok(())
    }

    /// Runs `work` while holding the conversation's turn lock.
    async fn serialized<T, F>(&self, conversation: &ConversationId, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let claim = TurnClaim::new(&self.locks, conversation);
        let _turn = claim.lock.lock().await;
        work.await
    }

    fn event(
        &self,
        input: &TurnInput,
        event_type: &str,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> AuditEvent {
        AuditEvent::new(
            input.conversation_id.clone(),
            input.correlation_id.clone(),
            event_type,
            category,
            outcome,
        )
    }
}

type TurnLocks = StdMutex<HashMap<ConversationId, Arc<Mutex<()>>>>;

/// One caller's interest in a conversation's turn lock. Dropping it, even when the turn
/// future is cancelled mid-await, forgets the entry once nobody else holds it.
struct TurnClaim<'a> {
    locks: &'a TurnLocks,
    conversation: &'a ConversationId,
    lock: Arc<Mutex<()>>,
}

impl<'a> TurnClaim<'a> {
    fn new(locks: &'a TurnLocks, conversation: &'a ConversationId) -> Self {
        let mut entries = locks.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = Arc::clone(entries.entry(conversation.clone()).or_default());
        Self { locks, conversation, lock }
    }
}

impl Drop for TurnClaim<'_> {
    fn drop(&mut self) {
        let mut entries = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and this claim are the only holders left.
        let unshared = entries.get(self.conversation).is_some_and(|entry| {
            Arc::ptr_eq(entry, &self.lock) && Arc::strong_count(&self.lock) == 2
        });
        if unshared {
            entries.remove(self.conversation);
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::NaiveDate;

    use super::{
        FixedClock, Orchestrator, OrchestratorSettings, TurnError, TurnInput, TurnKind, TurnStatus,
    };
    use crate::audit::InMemoryAuditSink;
    use crate::dialogs::definition::{DialogDefinition, DialogId, PromptTarget};
    use crate::dialogs::nlu::{Recognition, Recognizer, RecognizerError};
    use crate::dialogs::prompts::{Prompt, PromptId};
    use crate::dialogs::registry::DialogRegistry;
    use crate::dialogs::slots::{SlotName, SlotStore};
    use crate::dialogs::stack::{DialogInvocation, DialogStack, PendingPrompt};
    use crate::dialogs::steps::{CollectSlot, EndStep, SayStep};
    use crate::dialogs::store::{
        ConversationId, ConversationStore, InMemoryConversationStore, StoreError,
    };

    enum Script {
        Intent(&'static str, f32),
        Fail,
        Hang,
    }

    struct ScriptedRecognizer(Script);

    #[async_trait]
    impl Recognizer for ScriptedRecognizer {
        async fn recognize(&self, _utterance: &str) -> Result<Recognition, RecognizerError> {
            match self.0 {
                Script::Intent(label, score) => Ok(Recognition::intent(label, score)),
                Script::Fail => Err(RecognizerError::Transport("connection refused".to_owned())),
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(Recognition::none())
                }
            }
        }
    }

    /// Loads from an inner store but refuses every write.
    struct ReadOnlyStore(InMemoryConversationStore);

    #[async_trait]
    impl ConversationStore for ReadOnlyStore {
        async fn load(
            &self,
            conversation: &ConversationId,
        ) -> Result<Option<DialogStack>, StoreError> {
            self.0.load(conversation).await
        }

        async fn save(
            &self,
            _conversation: &ConversationId,
            _stack: &DialogStack,
        ) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disk full".to_owned()))
        }

        async fn clear(&self, _conversation: &ConversationId) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disk full".to_owned()))
        }
    }

    /// Never answers `load`; counts every write attempt.
    #[derive(Default)]
    struct HangingStore {
        writes: AtomicUsize,
    }

    #[async_trait]
    impl ConversationStore for HangingStore {
        async fn load(
            &self,
            _conversation: &ConversationId,
        ) -> Result<Option<DialogStack>, StoreError> {
            std::future::pending().await
        }

        async fn save(
            &self,
            _conversation: &ConversationId,
            _stack: &DialogStack,
        ) -> Result<(), StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn clear(&self, _conversation: &ConversationId) -> Result<(), StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn store_timeout(millis: u64) -> OrchestratorSettings {
        OrchestratorSettings {
            store_timeout: Duration::from_millis(millis),
            ..OrchestratorSettings::default()
        }
    }

    fn registry() -> Arc<DialogRegistry> {
        let registry = DialogRegistry::builder()
            .dialog(
                DialogDefinition::builder("greet")
                    .slot("name")
                    .prompt(Prompt::text("name", "Please tell me your name."))
                    .step(CollectSlot::new("name", "name", "What is your name?"))
                    .step(EndStep::with_message("Nice to meet you."))
                    .build(),
            )
            .dialog(
                DialogDefinition::builder("ping")
                    .step(SayStep::new("pong", "pong"))
                    .step(EndStep::new())
                    .build(),
            )
            .route("Greet", "greet")
            .route("Ping", "ping")
            .build()
            .expect("registry builds");
        Arc::new(registry)
    }

    fn orchestrator(
        store: Arc<dyn ConversationStore>,
        script: Script,
        audit: &InMemoryAuditSink,
    ) -> Orchestrator {
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).expect("valid date");
        Orchestrator::new(registry(), store, Arc::new(ScriptedRecognizer(script)))
            .with_clock(Arc::new(FixedClock(today)))
            .with_audit_sink(Arc::new(audit.clone()))
            .with_settings(OrchestratorSettings {
                max_prompt_retries: 2,
                recognizer_timeout: Duration::from_millis(50),
                ..OrchestratorSettings::default()
            })
    }

    #[tokio::test]
    async fn non_message_turns_are_ignored_without_touching_state() {
        let audit = InMemoryAuditSink::default();
        let store = Arc::new(InMemoryConversationStore::new());
        let orchestrator = orchestrator(store.clone(), Script::Intent("Greet", 0.9), &audit);

        let outcome = orchestrator
            .handle_turn(TurnInput {
                kind: TurnKind::ConversationUpdate,
                ..TurnInput::message("conv-1", "")
            })
            .await
            .expect("turn");

        assert_eq!(outcome.status, TurnStatus::Ignored);
        assert!(outcome.activities.is_empty());
        assert_eq!(store.len().await, 0);
        assert!(audit.events().is_empty());
    }

    #[tokio::test]
    async fn unknown_or_weak_intent_selects_no_dialog() {
        let audit = InMemoryAuditSink::default();
        let store = Arc::new(InMemoryConversationStore::new());

        let outcome = orchestrator(store.clone(), Script::Intent("Weather", 0.99), &audit)
            .handle_turn(TurnInput::message("conv-1", "is it raining"))
            .await
            .expect("turn");
        assert_eq!(
            outcome.status,
            TurnStatus::NoDialogSelected { intent: Some("Weather".to_owned()) }
        );
        assert!(outcome.activities.is_empty());

        let outcome = orchestrator(store, Script::Intent("Greet", 0.1), &audit)
            .handle_turn(TurnInput::message("conv-1", "hmm hello?"))
            .await
            .expect("turn");
        assert!(matches!(outcome.status, TurnStatus::NoDialogSelected { .. }));
    }

    #[tokio::test]
    async fn recognizer_failure_falls_back_to_no_intent() {
        let audit = InMemoryAuditSink::default();
        let store = Arc::new(InMemoryConversationStore::new());

        let outcome = orchestrator(store, Script::Fail, &audit)
            .handle_turn(TurnInput::message("conv-1", "hello"))
            .await
            .expect("turn");

        assert_eq!(outcome.status, TurnStatus::NoDialogSelected { intent: None });
    }

    #[tokio::test]
    async fn recognizer_timeout_is_transient_and_leaves_state_alone() {
        let audit = InMemoryAuditSink::default();
        let store = Arc::new(InMemoryConversationStore::new());

        let error = orchestrator(store.clone(), Script::Hang, &audit)
            .handle_turn(TurnInput::message("conv-1", "hello").with_correlation_id("req-77"))
            .await
            .expect_err("timeout");

        assert!(matches!(error, TurnError::Timeout { operation: "recognizer", .. }));
        assert!(error.is_transient());
        assert_eq!(store.len().await, 0);
        let events = audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "turn.failed");
        assert_eq!(events[0].correlation_id, "req-77");
    }

    #[tokio::test]
    async fn store_load_timeout_is_transient_and_writes_nothing() {
        let audit = InMemoryAuditSink::default();
        let store = Arc::new(HangingStore::default());
        let orchestrator = orchestrator(store.clone(), Script::Intent("Greet", 1.0), &audit)
            .with_settings(store_timeout(50));

        let error = orchestrator
            .handle_turn(TurnInput::message("conv-1", "hi").with_correlation_id("req-78"))
            .await
            .expect_err("timeout");

        assert!(matches!(error, TurnError::Timeout { operation: "store.load", timeout_ms: 50 }));
        assert!(error.is_transient());
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
        assert_eq!(audit.event_types(), vec!["turn.failed"]);
        assert_eq!(audit.events()[0].correlation_id, "req-78");
        assert!(orchestrator.locks.lock().expect("locks").is_empty());
    }

    #[tokio::test]
    async fn abandoned_turn_releases_its_conversation_lock() {
        let audit = InMemoryAuditSink::default();
        let store = Arc::new(HangingStore::default());
        let orchestrator = orchestrator(store.clone(), Script::Intent("Greet", 1.0), &audit)
            .with_settings(store_timeout(5_000));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            orchestrator.handle_turn(TurnInput::message("conv-1", "hi")),
        )
        .await;

        assert!(abandoned.is_err());
        assert!(orchestrator.locks.lock().expect("locks").is_empty());
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn chained_dialog_ends_on_the_turn_it_starts() {
        let audit = InMemoryAuditSink::default();
        let store = Arc::new(InMemoryConversationStore::new());

        let outcome = orchestrator(store.clone(), Script::Intent("ping", 1.0), &audit)
            .handle_turn(TurnInput::message("conv-1", "ping"))
            .await
            .expect("turn");

        assert_eq!(outcome.texts(), vec!["pong"]);
        assert_eq!(
            outcome.status,
            TurnStatus::NoActiveDialog { ended: Some(DialogId::from("ping")) }
        );
        assert_eq!(store.len().await, 0);
        assert_eq!(audit.event_types(), vec!["dialog.started", "dialog.ended"]);
    }

    #[tokio::test]
    async fn repeated_rejections_cancel_the_stack() {
        let audit = InMemoryAuditSink::default();
        let store = Arc::new(InMemoryConversationStore::new());
        let orchestrator = orchestrator(store.clone(), Script::Intent("Greet", 1.0), &audit);

        orchestrator.handle_turn(TurnInput::message("conv-1", "hi")).await.expect("start");
        let first =
            orchestrator.handle_turn(TurnInput::message("conv-1", "  ")).await.expect("first");
        assert_eq!(first.texts(), vec!["Please tell me your name."]);
        assert!(matches!(first.status, TurnStatus::Suspended { .. }));

        let second =
            orchestrator.handle_turn(TurnInput::message("conv-1", "")).await.expect("second");
        assert!(second.activities.is_empty());
        assert_eq!(
            second.status,
            TurnStatus::Cancelled {
                dialog: DialogId::from("greet"),
                prompt: PromptId::from("name"),
                retries: 2,
            }
        );
        assert_eq!(store.len().await, 0);
        assert!(audit.event_types().contains(&"dialog.cancelled".to_owned()));
    }

    #[tokio::test]
    async fn zero_retry_limit_keeps_prompting() {
        let audit = InMemoryAuditSink::default();
        let store = Arc::new(InMemoryConversationStore::new());
        let orchestrator = orchestrator(store.clone(), Script::Intent("Greet", 1.0), &audit)
            .with_settings(OrchestratorSettings {
                max_prompt_retries: 0,
                ..OrchestratorSettings::default()
            });

        orchestrator.handle_turn(TurnInput::message("conv-1", "hi")).await.expect("start");
        for _ in 0..10 {
            let outcome =
                orchestrator.handle_turn(TurnInput::message("conv-1", "")).await.expect("retry");
            assert!(matches!(outcome.status, TurnStatus::Suspended { .. }));
        }

        let stack = store.load(&ConversationId::from("conv-1")).await.expect("load");
        let retries = stack.and_then(|stack| stack.pending().map(|pending| pending.retries));
        assert_eq!(retries, Some(10));
    }

    #[tokio::test]
    async fn failed_write_back_surfaces_error_and_keeps_previous_state() {
        let audit = InMemoryAuditSink::default();
        let inner = InMemoryConversationStore::new();
        let mut suspended = DialogStack::new();
        let mut invocation = DialogInvocation::new(DialogId::from("greet"), SlotStore::new());
        invocation.pending = Some(PendingPrompt {
            prompt: PromptId::from("name"),
            target: PromptTarget::Slot(SlotName::from("name")),
            retries: 0,
        });
        suspended.push(invocation);
        inner.save(&ConversationId::from("conv-2"), &suspended).await.expect("seed");
        let store = Arc::new(ReadOnlyStore(inner));

        let error = orchestrator(store.clone(), Script::Intent("Greet", 1.0), &audit)
            .handle_turn(TurnInput::message("conv-2", "Ada"))
            .await
            .expect_err("save fails");

        assert!(matches!(error, TurnError::Store(StoreError::Unavailable(_))));
        assert!(error.is_transient());
        let persisted = store.load(&ConversationId::from("conv-2")).await.expect("load");
        assert_eq!(persisted, Some(suspended));
    }

    #[tokio::test]
    async fn stale_stack_is_discarded_and_turn_starts_fresh() {
        let audit = InMemoryAuditSink::default();
        let store = Arc::new(InMemoryConversationStore::new());
        let mut stale = DialogStack::new();
        stale.push(DialogInvocation::new(DialogId::from("retired"), SlotStore::new()));
        store.save(&ConversationId::from("conv-1"), &stale).await.expect("seed");

        let outcome = orchestrator(store.clone(), Script::Intent("Greet", 1.0), &audit)
            .handle_turn(TurnInput::message("conv-1", "hello"))
            .await
            .expect("turn");

        assert_eq!(outcome.texts(), vec!["What is your name?"]);
        let stack = store.load(&ConversationId::from("conv-1")).await.expect("load");
        let top = stack.and_then(|stack| stack.top().map(|top| top.dialog.clone()));
        assert_eq!(top, Some(DialogId::from("greet")));
    }

    #[tokio::test]
    async fn reset_clears_the_conversation() {
        let audit = InMemoryAuditSink::default();
        let store = Arc::new(InMemoryConversationStore::new());
        let orchestrator = orchestrator(store.clone(), Script::Intent("Greet", 1.0), &audit);

        orchestrator.handle_turn(TurnInput::message("conv-1", "hi")).await.expect("start");
        assert_eq!(store.len().await, 1);

        orchestrator.reset(&ConversationId::from("conv-1"), "req-1").await.expect("reset");
        assert_eq!(store.len().await, 0);
    }
}
