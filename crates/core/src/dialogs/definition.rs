use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::activity::Activity;
use crate::dialogs::entities::PrefillRule;
use crate::dialogs::prompts::{Prompt, PromptId};
use crate::dialogs::slots::{SlotError, SlotName, SlotStore, SlotValue};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DialogId(pub String);

impl DialogId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DialogId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where an accepted prompt answer goes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "slot", rename_all = "snake_case")]
pub enum PromptTarget {
    /// Fill an empty slot.
    Slot(SlotName),
    /// Overwrite an already filled slot.
    Correct(SlotName),
    /// Hand the value to the next step only.
    StepInput,
}

impl PromptTarget {
    pub fn slot(&self) -> Option<&SlotName> {
        match self {
            Self::Slot(name) | Self::Correct(name) => Some(name),
            Self::StepInput => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptRequest {
    pub prompt: PromptId,
    pub target: PromptTarget,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepAction {
    Continue,
    Prompt(PromptRequest),
    End,
    Replace(DialogId),
    Begin(DialogId),
}

impl StepAction {
    pub fn prompt(
        prompt: impl Into<PromptId>,
        target: PromptTarget,
        message: impl Into<String>,
    ) -> Self {
        Self::Prompt(PromptRequest { prompt: prompt.into(), target, message: message.into() })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StepError {
    #[error(transparent)]
    Slot(#[from] SlotError),
    #[error("step expected a prompt result but none was supplied")]
    MissingResult,
    #[error("step received an unexpected value: {0}")]
    UnexpectedValue(String),
    #[error("step failed: {0}")]
    Failed(String),
}

/// What a step may see and touch while it runs.
pub struct StepContext<'a> {
    pub slots: &'a mut SlotStore,
    result: Option<&'a SlotValue>,
    today: NaiveDate,
    outbox: &'a mut Vec<Activity>,
}

impl<'a> StepContext<'a> {
    pub fn new(
        slots: &'a mut SlotStore,
        result: Option<&'a SlotValue>,
        today: NaiveDate,
        outbox: &'a mut Vec<Activity>,
    ) -> Self {
        Self { slots, result, today, outbox }
    }

    /// The validated answer to the prompt the previous step suspended on, if any.
    pub fn result(&self) -> Option<&SlotValue> {
        self.result
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn say(&mut self, text: impl Into<String>) {
        self.outbox.push(Activity::message(text));
    }

    pub fn send(&mut self, activity: Activity) {
        self.outbox.push(activity);
    }
}

/// One stage of a waterfall. Steps are stateless; everything per-conversation lives in the
/// slot store or arrives as the prompt result.
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, context: &mut StepContext<'_>) -> Result<StepAction, StepError>;

    /// Slots this step reads or prompts for.
    fn slots(&self) -> Vec<SlotName> {
        Vec::new()
    }

    fn prompts(&self) -> Vec<PromptId> {
        Vec::new()
    }

    /// Dialogs this step may begin or replace itself with.
    fn targets(&self) -> Vec<DialogId> {
        Vec::new()
    }

    /// True when every path through the step ends or replaces the dialog.
    fn is_terminal(&self) -> bool {
        false
    }
}

pub struct DialogDefinition {
    id: DialogId,
    slots: Vec<SlotName>,
    prompts: BTreeMap<PromptId, Prompt>,
    steps: Vec<Arc<dyn Step>>,
    prefill: Vec<PrefillRule>,
    duplicate_prompts: Vec<PromptId>,
}

impl fmt::Debug for DialogDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialogDefinition")
            .field("id", &self.id)
            .field("slots", &self.slots)
            .field("prompts", &self.prompts.keys().collect::<Vec<_>>())
            .field("steps", &self.steps.iter().map(|step| step.name()).collect::<Vec<_>>())
            .field("prefill", &self.prefill)
            .finish()
    }
}

impl DialogDefinition {
    pub fn builder(id: impl Into<DialogId>) -> DialogDefinitionBuilder {
        DialogDefinitionBuilder {
            definition: Self {
                id: id.into(),
                slots: Vec::new(),
                prompts: BTreeMap::new(),
                steps: Vec::new(),
                prefill: Vec::new(),
                duplicate_prompts: Vec::new(),
            },
        }
    }

    pub fn id(&self) -> &DialogId {
        &self.id
    }

    pub fn slots(&self) -> &[SlotName] {
        &self.slots
    }

    pub fn declares_slot(&self, slot: &SlotName) -> bool {
        self.slots.contains(slot)
    }

    pub fn prompt(&self, id: &PromptId) -> Option<&Prompt> {
        self.prompts.get(id)
    }

    pub fn prompts(&self) -> impl Iterator<Item = &Prompt> {
        self.prompts.values()
    }

    pub fn step(&self, index: usize) -> Option<&dyn Step> {
        self.steps.get(index).map(Arc::as_ref)
    }

    pub fn steps(&self) -> impl Iterator<Item = &dyn Step> + '_ {
        self.steps.iter().map(|step| step.as_ref() as &dyn Step)
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn prefill_rules(&self) -> &[PrefillRule] {
        &self.prefill
    }

    pub(crate) fn duplicate_prompts(&self) -> &[PromptId] {
        &self.duplicate_prompts
    }
}

pub struct DialogDefinitionBuilder {
    definition: DialogDefinition,
}

impl DialogDefinitionBuilder {
    pub fn slot(mut self, name: &str) -> Self {
        let name = SlotName::from(name);
        if !self.definition.slots.contains(&name) {
            self.definition.slots.push(name);
        }
        self
    }

    pub fn prompt(mut self, prompt: Prompt) -> Self {
        let id = prompt.id().clone();
        if self.definition.prompts.insert(id.clone(), prompt).is_some() {
            self.definition.duplicate_prompts.push(id);
        }
        self
    }

    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.definition.steps.push(Arc::new(step));
        self
    }

    pub fn prefill(mut self, rule: PrefillRule) -> Self {
        self.definition.prefill.push(rule);
        self
    }

    /// Structural checks happen when the definition is registered.
    pub fn build(self) -> DialogDefinition {
        self.definition
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{DialogDefinition, PromptTarget, StepAction, StepContext};
    use crate::activity::Activity;
    use crate::dialogs::prompts::{Prompt, PromptId};
    use crate::dialogs::slots::{SlotName, SlotStore, SlotValue};
    use crate::dialogs::steps::{CollectSlot, EndStep, SayStep};

    #[test]
    fn builder_keeps_registration_order_and_flags_duplicate_prompts() {
        let definition = DialogDefinition::builder("payee")
            .slot("payee")
            .slot("payee")
            .prompt(Prompt::text("payee", "Who is the payee?"))
            .prompt(Prompt::text("payee", "Who?"))
            .step(SayStep::new("intro", "Let's find the payee."))
            .step(CollectSlot::new("payee", "payee", "Who is the payee?"))
            .step(EndStep::new())
            .build();

        assert_eq!(definition.slots(), &[SlotName::from("payee")]);
        assert_eq!(definition.step_count(), 3);
        assert_eq!(definition.step(0).map(|step| step.name()), Some("intro"));
        assert!(definition.step(3).is_none());
        assert_eq!(definition.duplicate_prompts(), &[PromptId::from("payee")]);
        assert!(definition.prompt(&PromptId::from("payee")).is_some());
    }

    #[test]
    fn step_context_collects_outbound_activities() {
        let mut slots = SlotStore::new();
        let mut outbox = Vec::new();
        let value = SlotValue::Boolean(true);
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).expect("valid date");

        let mut context = StepContext::new(&mut slots, Some(&value), today, &mut outbox);
        context.say("first");
        context.send(Activity::Typing);
        assert_eq!(context.result(), Some(&SlotValue::Boolean(true)));
        assert_eq!(context.today(), today);

        assert_eq!(outbox, vec![Activity::message("first"), Activity::Typing]);
    }

    #[test]
    fn prompt_target_exposes_slot() {
        assert_eq!(
            PromptTarget::Correct(SlotName::from("amount")).slot(),
            Some(&SlotName::from("amount"))
        );
        assert_eq!(PromptTarget::StepInput.slot(), None);
        assert!(matches!(
            StepAction::prompt("confirm", PromptTarget::StepInput, "Sure?"),
            StepAction::Prompt(request) if request.message == "Sure?"
        ));
    }
}
