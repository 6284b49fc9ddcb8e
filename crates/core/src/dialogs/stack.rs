use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dialogs::definition::{DialogId, PromptTarget};
use crate::dialogs::prompts::PromptId;
use crate::dialogs::registry::DialogRegistry;
use crate::dialogs::slots::SlotStore;

/// Marker left on a suspended invocation until its prompt is answered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPrompt {
    pub prompt: PromptId,
    pub target: PromptTarget,
    pub retries: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogInvocation {
    pub dialog: DialogId,
    pub slots: SlotStore,
    pub cursor: usize,
    pub pending: Option<PendingPrompt>,
}

impl DialogInvocation {
    pub fn new(dialog: DialogId, slots: SlotStore) -> Self {
        Self { dialog, slots, cursor: 0, pending: None }
    }
}

/// Why a persisted stack can no longer be resumed against the current registry.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StaleStack {
    #[error("dialog `{0}` is no longer registered")]
    UnknownDialog(DialogId),
    #[error("cursor {cursor} is outside dialog `{dialog}`")]
    CursorOutOfRange { dialog: DialogId, cursor: usize },
    #[error("prompt `{prompt}` is not registered on dialog `{dialog}`")]
    UnknownPrompt { dialog: DialogId, prompt: PromptId },
    #[error("invocation of `{0}` below the top is awaiting input")]
    BuriedPrompt(DialogId),
    #[error("top invocation of `{0}` is not awaiting input")]
    NotSuspended(DialogId),
}

/// Active invocations for one conversation, innermost last.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogStack {
    invocations: Vec<DialogInvocation>,
}

impl DialogStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.invocations.len()
    }

    pub fn top(&self) -> Option<&DialogInvocation> {
        self.invocations.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut DialogInvocation> {
        self.invocations.last_mut()
    }

    pub fn push(&mut self, invocation: DialogInvocation) {
        self.invocations.push(invocation);
    }

    pub fn pop(&mut self) -> Option<DialogInvocation> {
        self.invocations.pop()
    }

    pub fn clear(&mut self) {
        self.invocations.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &DialogInvocation> {
        self.invocations.iter()
    }

    /// The prompt the top invocation is waiting on, if any.
    pub fn pending(&self) -> Option<&PendingPrompt> {
        self.top().and_then(|invocation| invocation.pending.as_ref())
    }

    /// Between turns a non-empty stack always has its top suspended and nothing else.
    pub fn check_against(&self, registry: &DialogRegistry) -> Result<(), StaleStack> {
        let last = self.invocations.len().saturating_sub(1);
        for (index, invocation) in self.invocations.iter().enumerate() {
            let Some(definition) = registry.get(&invocation.dialog) else {
                return Err(StaleStack::UnknownDialog(invocation.dialog.clone()));
            };
            if invocation.cursor >= definition.step_count() {
                return Err(StaleStack::CursorOutOfRange {
                    dialog: invocation.dialog.clone(),
                    cursor: invocation.cursor,
                });
            }
            match (&invocation.pending, index == last) {
                (Some(pending), true) => {
                    if definition.prompt(&pending.prompt).is_none() {
                        return Err(StaleStack::UnknownPrompt {
                            dialog: invocation.dialog.clone(),
                            prompt: pending.prompt.clone(),
                        });
                    }
                }
                (Some(_), false) => return Err(StaleStack::BuriedPrompt(invocation.dialog.clone())),
                (None, true) => return Err(StaleStack::NotSuspended(invocation.dialog.clone())),
                (None, false) => {}
            }
        }
        Ok(())
    }
}
