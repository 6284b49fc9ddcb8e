pub mod dates;
pub mod definition;
pub mod entities;
pub mod nlu;
pub mod orchestrator;
pub mod prompts;
pub mod registry;
pub mod sequencer;
pub mod slots;
pub mod stack;
pub mod steps;
pub mod store;

pub use dates::{parse_date_expression, DateExpression, DateWindow, TimeOfDay, WindowViolation};
pub use definition::{
    DialogDefinition, DialogId, PromptRequest, PromptTarget, Step, StepAction, StepContext,
    StepError,
};
pub use entities::{
    merge_entities, EntityCandidate, EntityValue, ExtractedEntities, Extraction, PrefillRule,
};
pub use nlu::{IntentScore, Recognition, Recognizer, RecognizerError};
pub use orchestrator::{
    Clock, FixedClock, Orchestrator, OrchestratorSettings, SystemClock, TurnError, TurnInput,
    TurnKind, TurnOutcome, TurnStatus,
};
pub use prompts::{Prompt, PromptId, PromptKind, Rejection, ValidationContext};
pub use registry::{DefinitionError, DialogRegistry, DialogRegistryBuilder};
pub use sequencer::{Answer, Progress, SequenceError, Sequencer, TurnEnv, MAX_STEPS_PER_TURN};
pub use slots::{FillSource, Slot, SlotError, SlotName, SlotStore, SlotValue};
pub use stack::{DialogInvocation, DialogStack, PendingPrompt, StaleStack};
pub use steps::{BeginDialog, CollectSlot, EndStep, ReplaceDialog, SayStep};
pub use store::{ConversationId, ConversationStore, InMemoryConversationStore, StoreError};
