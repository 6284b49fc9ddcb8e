//! Reusable waterfall steps shared by every dialog.

use crate::dialogs::definition::{DialogId, PromptTarget, Step, StepAction, StepContext, StepError};
use crate::dialogs::prompts::PromptId;
use crate::dialogs::slots::SlotName;

/// Sends a fixed message and moves on.
#[derive(Clone, Debug)]
pub struct SayStep {
    name: String,
    text: String,
}

impl SayStep {
    pub fn new(name: &str, text: &str) -> Self {
        Self { name: name.to_owned(), text: text.to_owned() }
    }
}

impl Step for SayStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, context: &mut StepContext<'_>) -> Result<StepAction, StepError> {
        context.say(self.text.clone());
        Ok(StepAction::Continue)
    }
}

/// Skips when the slot is already filled, otherwise suspends on its prompt.
#[derive(Clone, Debug)]
pub struct CollectSlot {
    name: String,
    slot: SlotName,
    prompt: PromptId,
    message: String,
}

impl CollectSlot {
    pub fn new(slot: &str, prompt: &str, message: &str) -> Self {
        Self {
            name: format!("collect_{slot}"),
            slot: SlotName::from(slot),
            prompt: PromptId::from(prompt),
            message: message.to_owned(),
        }
    }
}

impl Step for CollectSlot {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, context: &mut StepContext<'_>) -> Result<StepAction, StepError> {
        if context.slots.contains(&self.slot) {
            return Ok(StepAction::Continue);
        }
        Ok(StepAction::prompt(
            self.prompt.clone(),
            PromptTarget::Slot(self.slot.clone()),
            self.message.clone(),
        ))
    }

    fn slots(&self) -> Vec<SlotName> {
        vec![self.slot.clone()]
    }

    fn prompts(&self) -> Vec<PromptId> {
        vec![self.prompt.clone()]
    }
}

/// Pushes a child dialog; the parent continues at its next step once the child ends.
#[derive(Clone, Debug)]
pub struct BeginDialog {
    name: String,
    target: DialogId,
}

impl BeginDialog {
    pub fn new(target: &str) -> Self {
        Self { name: format!("begin_{target}"), target: DialogId::from(target) }
    }
}

impl Step for BeginDialog {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, _context: &mut StepContext<'_>) -> Result<StepAction, StepError> {
        Ok(StepAction::Begin(self.target.clone()))
    }

    fn targets(&self) -> Vec<DialogId> {
        vec![self.target.clone()]
    }
}

#[derive(Clone, Debug)]
pub struct ReplaceDialog {
    name: String,
    target: DialogId,
}

impl ReplaceDialog {
    pub fn new(target: &str) -> Self {
        Self { name: format!("replace_with_{target}"), target: DialogId::from(target) }
    }
}

impl Step for ReplaceDialog {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, _context: &mut StepContext<'_>) -> Result<StepAction, StepError> {
        Ok(StepAction::Replace(self.target.clone()))
    }

    fn targets(&self) -> Vec<DialogId> {
        vec![self.target.clone()]
    }

    fn is_terminal(&self) -> bool {
        true
    }
}

#[derive(Clone, Debug, Default)]
pub struct EndStep {
    farewell: Option<String>,
}

impl EndStep {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(text: &str) -> Self {
        Self { farewell: Some(text.to_owned()) }
    }
}

impl Step for EndStep {
    fn name(&self) -> &str {
        "end"
    }

    fn run(&self, context: &mut StepContext<'_>) -> Result<StepAction, StepError> {
        if let Some(text) = &self.farewell {
            context.say(text.clone());
        }
        Ok(StepAction::End)
    }

    fn is_terminal(&self) -> bool {
        true
    }
}
