use chrono::NaiveDate;
use thiserror::Error;

use crate::activity::Activity;
use crate::dialogs::definition::{DialogId, PromptTarget, StepAction, StepContext, StepError};
use crate::dialogs::entities::{merge_entities, ExtractedEntities};
use crate::dialogs::prompts::{PromptId, Rejection, ValidationContext};
use crate::dialogs::registry::{DefinitionError, DialogRegistry};
use crate::dialogs::slots::{FillSource, SlotValue};
use crate::dialogs::stack::{DialogInvocation, DialogStack, PendingPrompt};

/// Upper bound on steps executed in one turn; hitting it means dialogs begin each other in a
/// loop.
pub const MAX_STEPS_PER_TURN: usize = 128;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SequenceError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error("step `{step}` of dialog `{dialog}` failed: {source}")]
    Step {
        dialog: DialogId,
        step: String,
        #[source]
        source: StepError,
    },
    #[error("no prompt is pending on the dialog stack")]
    NothingPending,
}

/// Per-turn inputs shared by every step that runs this turn.
#[derive(Clone, Copy, Debug)]
pub struct TurnEnv<'e> {
    pub today: NaiveDate,
    /// Only present on turns that went through the recognizer.
    pub entities: Option<&'e ExtractedEntities>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Progress {
    /// The top invocation is waiting for the next utterance.
    Suspended { dialog: DialogId, prompt: PromptId },
    /// Every invocation ended; `ended` is the last one popped.
    Exhausted { ended: Option<DialogId> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Answer {
    Accepted(Progress),
    Rejected {
        dialog: DialogId,
        prompt: PromptId,
        retries: u32,
        rejection: Rejection,
        retry_text: String,
    },
}

/// Walks dialog steps against a borrowed stack. Holds no state of its own.
#[derive(Clone, Copy, Debug)]
pub struct Sequencer<'r> {
    registry: &'r DialogRegistry,
}

impl<'r> Sequencer<'r> {
    pub fn new(registry: &'r DialogRegistry) -> Self {
        Self { registry }
    }

    /// Pushes a fresh invocation pre-filled from the turn's entities and runs it.
    pub fn begin(
        &self,
        stack: &mut DialogStack,
        dialog: &DialogId,
        env: TurnEnv<'_>,
        outbox: &mut Vec<Activity>,
    ) -> Result<Progress, SequenceError> {
        self.push(stack, dialog, env)?;
        self.run(stack, None, env, outbox)
    }

    /// Treats the utterance as the answer to the pending prompt on top of the stack.
    pub fn resume(
        &self,
        stack: &mut DialogStack,
        utterance: &str,
        env: TurnEnv<'_>,
        outbox: &mut Vec<Activity>,
    ) -> Result<Answer, SequenceError> {
        let Some(top) = stack.top_mut() else {
            return Err(SequenceError::NothingPending);
        };
        let Some(pending) = top.pending.clone() else {
            return Err(SequenceError::NothingPending);
        };
        let definition = self.registry.require(&top.dialog)?;
        let Some(prompt) = definition.prompt(&pending.prompt) else {
            return Err(DefinitionError::UnknownPrompt {
                dialog: top.dialog.clone(),
                step: step_name(self.registry, top),
                prompt: pending.prompt,
            }
            .into());
        };

        let value = match prompt.validate(utterance, &ValidationContext { today: env.today }) {
            Ok(value) => value,
            Err(rejection) => {
                let retries = pending.retries.saturating_add(1);
                if let Some(marker) = top.pending.as_mut() {
                    marker.retries = retries;
                }
                return Ok(Answer::Rejected {
                    dialog: top.dialog.clone(),
                    prompt: pending.prompt,
                    retries,
                    retry_text: prompt.retry_text(&rejection),
                    rejection,
                });
            }
        };

        let stored = match pending.target {
            PromptTarget::Slot(name) => {
                top.slots.fill(name, value.clone(), FillSource::UserEntered)
            }
            PromptTarget::Correct(name) => top.slots.correct(name, value.clone()),
            PromptTarget::StepInput => Ok(()),
        };
        if let Err(error) = stored {
            return Err(SequenceError::Step {
                dialog: top.dialog.clone(),
                step: step_name(self.registry, top),
                source: error.into(),
            });
        }
        top.pending = None;
        top.cursor += 1;

        self.run(stack, Some(value), env, outbox).map(Answer::Accepted)
    }

    /// Executes steps on the top invocation until one suspends or the stack empties.
    pub fn run(
        &self,
        stack: &mut DialogStack,
        mut result: Option<SlotValue>,
        env: TurnEnv<'_>,
        outbox: &mut Vec<Activity>,
    ) -> Result<Progress, SequenceError> {
        let mut ended = None;

        for _ in 0..MAX_STEPS_PER_TURN {
            let Some(top) = stack.top_mut() else {
                return Ok(Progress::Exhausted { ended });
            };
            let definition = self.registry.require(&top.dialog)?;
            let Some(step) = definition.step(top.cursor) else {
                return Err(DefinitionError::RanOffEnd {
                    dialog: top.dialog.clone(),
                    steps: definition.step_count(),
                }
                .into());
            };

            let input = result.take();
            let action = {
                let mut context =
                    StepContext::new(&mut top.slots, input.as_ref(), env.today, outbox);
                step.run(&mut context)
            };
            let action = action.map_err(|source| SequenceError::Step {
                dialog: top.dialog.clone(),
                step: step.name().to_owned(),
                source,
            })?;

            match action {
                StepAction::Continue => top.cursor += 1,
                StepAction::Prompt(request) => {
                    if definition.prompt(&request.prompt).is_none() {
                        return Err(DefinitionError::UnknownPrompt {
                            dialog: top.dialog.clone(),
                            step: step.name().to_owned(),
                            prompt: request.prompt,
                        }
                        .into());
                    }
                    if let Some(slot) = request.target.slot() {
                        if !definition.declares_slot(slot) {
                            return Err(DefinitionError::UndeclaredSlot {
                                dialog: top.dialog.clone(),
                                origin: step.name().to_owned(),
                                slot: slot.clone(),
                            }
                            .into());
                        }
                    }
                    outbox.push(Activity::message(request.message));
                    top.pending = Some(PendingPrompt {
                        prompt: request.prompt.clone(),
                        target: request.target,
                        retries: 0,
                    });
                    return Ok(Progress::Suspended {
                        dialog: top.dialog.clone(),
                        prompt: request.prompt,
                    });
                }
                StepAction::End => {
                    ended = stack.pop().map(|invocation| invocation.dialog);
                    if let Some(parent) = stack.top_mut() {
                        parent.cursor += 1;
                    }
                }
                StepAction::Replace(target) => {
                    ended = stack.pop().map(|invocation| invocation.dialog);
                    self.push(stack, &target, env)?;
                }
                StepAction::Begin(target) => self.push(stack, &target, env)?,
            }
        }

        match stack.top() {
            Some(top) => Err(DefinitionError::RunawayDialog {
                dialog: top.dialog.clone(),
                limit: MAX_STEPS_PER_TURN,
            }
            .into()),
            None => Ok(Progress::Exhausted { ended }),
        }
    }

    fn push(
        &self,
        stack: &mut DialogStack,
        dialog: &DialogId,
        env: TurnEnv<'_>,
    ) -> Result<(), SequenceError> {
        let definition = self.registry.require(dialog)?;
        let slots = merge_entities(definition.prefill_rules(), env.entities, env.today);
        stack.push(DialogInvocation::new(dialog.clone(), slots));
        Ok(())
    }
}

fn step_name(registry: &DialogRegistry, invocation: &DialogInvocation) -> String {
    registry
        .get(&invocation.dialog)
        .and_then(|definition| definition.step(invocation.cursor))
        .map(|step| step.name().to_owned())
        .unwrap_or_default()
}
