use std::collections::BTreeMap;

use thiserror::Error;

use crate::dialogs::definition::{DialogDefinition, DialogId};
use crate::dialogs::prompts::PromptId;
use crate::dialogs::slots::SlotName;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("dialog `{0}` is registered more than once")]
    DuplicateDialog(DialogId),
    #[error("dialog `{0}` has no steps")]
    EmptyDialog(DialogId),
    #[error("dialog `{dialog}` registers prompt `{prompt}` more than once")]
    DuplicatePrompt { dialog: DialogId, prompt: PromptId },
    #[error("dialog `{dialog}` must finish with an end or replace step, found `{step}`")]
    MissingTerminalStep { dialog: DialogId, step: String },
    #[error("step `{step}` of dialog `{dialog}` uses unregistered prompt `{prompt}`")]
    UnknownPrompt { dialog: DialogId, step: String, prompt: PromptId },
    #[error("`{origin}` in dialog `{dialog}` uses undeclared slot `{slot}`")]
    UndeclaredSlot { dialog: DialogId, origin: String, slot: SlotName },
    #[error("step `{step}` of dialog `{dialog}` targets unknown dialog `{target}`")]
    UnknownTarget { dialog: DialogId, step: String, target: DialogId },
    #[error("intent `{intent}` routes to unknown dialog `{target}`")]
    UnknownRouteTarget { intent: String, target: DialogId },
    #[error("dialog `{0}` is not registered")]
    UnknownDialog(DialogId),
    #[error("dialog `{dialog}` ran past its last step ({steps} steps) without ending")]
    RanOffEnd { dialog: DialogId, steps: usize },
    #[error("dialog `{dialog}` exceeded {limit} steps in one turn")]
    RunawayDialog { dialog: DialogId, limit: usize },
}

/// Immutable set of dialog definitions plus the intent routing table. Built once at startup
/// and shared read-only by every conversation.
#[derive(Debug, Default)]
pub struct DialogRegistry {
    dialogs: BTreeMap<DialogId, DialogDefinition>,
    routes: BTreeMap<String, DialogId>,
}

impl DialogRegistry {
    pub fn builder() -> DialogRegistryBuilder {
        DialogRegistryBuilder::default()
    }

    pub fn get(&self, id: &DialogId) -> Option<&DialogDefinition> {
        self.dialogs.get(id)
    }

    pub fn require(&self, id: &DialogId) -> Result<&DialogDefinition, DefinitionError> {
        self.get(id).ok_or_else(|| DefinitionError::UnknownDialog(id.clone()))
    }

    pub fn contains(&self, id: &DialogId) -> bool {
        self.dialogs.contains_key(id)
    }

    /// Intent labels match case-insensitively.
    pub fn route(&self, intent: &str) -> Option<&DialogId> {
        self.routes.get(&intent.trim().to_lowercase())
    }

    pub fn dialog_ids(&self) -> impl Iterator<Item = &DialogId> {
        self.dialogs.keys()
    }

    pub fn routes(&self) -> impl Iterator<Item = (&str, &DialogId)> {
        self.routes.iter().map(|(intent, dialog)| (intent.as_str(), dialog))
    }
}

#[derive(Default)]
pub struct DialogRegistryBuilder {
    dialogs: Vec<DialogDefinition>,
    routes: Vec<(String, DialogId)>,
}

impl DialogRegistryBuilder {
    pub fn dialog(mut self, definition: DialogDefinition) -> Self {
        self.dialogs.push(definition);
        self
    }

    pub fn route(mut self, intent: &str, dialog: &str) -> Self {
        self.routes.push((intent.trim().to_lowercase(), DialogId::from(dialog)));
        self
    }

    pub fn build(self) -> Result<DialogRegistry, DefinitionError> {
        let mut dialogs = BTreeMap::new();
        for definition in self.dialogs {
            let id = definition.id().clone();
            if dialogs.insert(id.clone(), definition).is_some() {
                return Err(DefinitionError::DuplicateDialog(id));
            }
        }

        for definition in dialogs.values() {
            validate_definition(definition, &dialogs)?;
        }

        let mut routes = BTreeMap::new();
        for (intent, target) in self.routes {
            if !dialogs.contains_key(&target) {
                return Err(DefinitionError::UnknownRouteTarget { intent, target });
            }
            routes.insert(intent, target);
        }

        Ok(DialogRegistry { dialogs, routes })
    }
}

fn validate_definition(
    definition: &DialogDefinition,
    dialogs: &BTreeMap<DialogId, DialogDefinition>,
) -> Result<(), DefinitionError> {
    let dialog = definition.id();

    if let Some(prompt) = definition.duplicate_prompts().first() {
        return Err(DefinitionError::DuplicatePrompt {
            dialog: dialog.clone(),
            prompt: prompt.clone(),
        });
    }

    let Some(last) = definition.steps().last() else {
        return Err(DefinitionError::EmptyDialog(dialog.clone()));
    };
    if !last.is_terminal() {
        return Err(DefinitionError::MissingTerminalStep {
            dialog: dialog.clone(),
            step: last.name().to_owned(),
        });
    }

    for step in definition.steps() {
        for prompt in step.prompts() {
            if definition.prompt(&prompt).is_none() {
                return Err(DefinitionError::UnknownPrompt {
                    dialog: dialog.clone(),
                    step: step.name().to_owned(),
                    prompt,
                });
            }
        }
        for slot in step.slots() {
            if !definition.declares_slot(&slot) {
                return Err(DefinitionError::UndeclaredSlot {
                    dialog: dialog.clone(),
                    origin: step.name().to_owned(),
                    slot,
                });
            }
        }
        for target in step.targets() {
            if !dialogs.contains_key(&target) {
                return Err(DefinitionError::UnknownTarget {
                    dialog: dialog.clone(),
                    step: step.name().to_owned(),
                    target,
                });
            }
        }
    }

    for rule in definition.prefill_rules() {
        if !definition.declares_slot(&rule.slot) {
            return Err(DefinitionError::UndeclaredSlot {
                dialog: dialog.clone(),
                origin: format!("prefill:{}", rule.entity),
                slot: rule.slot.clone(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{DefinitionError, DialogRegistry};
    use crate::dialogs::definition::{DialogDefinition, DialogId};
    use crate::dialogs::entities::{Extraction, PrefillRule};
    use crate::dialogs::prompts::{Prompt, PromptId};
    use crate::dialogs::slots::SlotName;
    use crate::dialogs::steps::{BeginDialog, CollectSlot, EndStep, SayStep};

    fn payee_dialog() -> DialogDefinition {
        DialogDefinition::builder("payee")
            .slot("payee")
            .prompt(Prompt::text("payee", "Who is the payee?"))
            .step(CollectSlot::new("payee", "payee", "Who is the payee?"))
            .step(EndStep::new())
            .build()
    }

    #[test]
    fn valid_registry_routes_intents_case_insensitively() {
        let registry = DialogRegistry::builder()
            .dialog(payee_dialog())
            .route("AddPayee", "payee")
            .build()
            .expect("registry builds");

        assert_eq!(registry.route("addpayee"), Some(&DialogId::from("payee")));
        assert_eq!(registry.route(" ADDPAYEE "), Some(&DialogId::from("payee")));
        assert_eq!(registry.route("balance"), None);
        assert!(registry.contains(&DialogId::from("payee")));
    }

    #[test]
    fn dialog_without_terminal_step_is_rejected() {
        let definition = DialogDefinition::builder("chatty")
            .step(SayStep::new("hello", "Hello."))
            .build();

        let error = DialogRegistry::builder().dialog(definition).build().expect_err("must fail");
        assert_eq!(
            error,
            DefinitionError::MissingTerminalStep {
                dialog: DialogId::from("chatty"),
                step: "hello".to_owned(),
            }
        );
    }

    #[test]
    fn empty_and_duplicate_dialogs_are_rejected() {
        let error = DialogRegistry::builder()
            .dialog(DialogDefinition::builder("nothing").build())
            .build()
            .expect_err("empty dialog");
        assert_eq!(error, DefinitionError::EmptyDialog(DialogId::from("nothing")));

        let error = DialogRegistry::builder()
            .dialog(payee_dialog())
            .dialog(payee_dialog())
            .build()
            .expect_err("duplicate dialog");
        assert_eq!(error, DefinitionError::DuplicateDialog(DialogId::from("payee")));
    }

    #[test]
    fn unregistered_prompt_is_rejected() {
        let definition = DialogDefinition::builder("payee")
            .slot("payee")
            .step(CollectSlot::new("payee", "payee_name", "Who is the payee?"))
            .step(EndStep::new())
            .build();

        let error = DialogRegistry::builder().dialog(definition).build().expect_err("must fail");
        assert!(matches!(
            error,
            DefinitionError::UnknownPrompt { ref prompt, .. }
                if *prompt == PromptId::from("payee_name")
        ));
    }

    #[test]
    fn undeclared_slots_are_rejected_for_steps_and_prefill() {
        let definition = DialogDefinition::builder("payee")
            .prompt(Prompt::text("payee", "Who is the payee?"))
            .step(CollectSlot::new("payee", "payee", "Who is the payee?"))
            .step(EndStep::new())
            .build();
        let error = DialogRegistry::builder().dialog(definition).build().expect_err("step slot");
        assert!(matches!(error, DefinitionError::UndeclaredSlot { ref slot, .. }
            if *slot == SlotName::from("payee")));

        let definition = DialogDefinition::builder("balance")
            .step(EndStep::new())
            .prefill(PrefillRule::new("AccountLabel", "account", Extraction::FirstText))
            .build();
        let error = DialogRegistry::builder().dialog(definition).build().expect_err("prefill");
        assert!(matches!(error, DefinitionError::UndeclaredSlot { ref origin, .. }
            if origin == "prefill:AccountLabel"));
    }

    #[test]
    fn unknown_begin_target_and_route_target_are_rejected() {
        let definition = DialogDefinition::builder("root")
            .step(BeginDialog::new("missing"))
            .step(EndStep::new())
            .build();
        let error = DialogRegistry::builder().dialog(definition).build().expect_err("target");
        assert!(matches!(error, DefinitionError::UnknownTarget { ref target, .. }
            if *target == DialogId::from("missing")));

        let error = DialogRegistry::builder()
            .dialog(payee_dialog())
            .route("transfer", "transfer")
            .build()
            .expect_err("route");
        assert_eq!(
            error,
            DefinitionError::UnknownRouteTarget {
                intent: "transfer".to_owned(),
                target: DialogId::from("transfer"),
            }
        );
    }

    #[test]
    fn duplicate_prompt_registration_is_rejected() {
        let definition = DialogDefinition::builder("payee")
            .slot("payee")
            .prompt(Prompt::text("payee", "Who is the payee?"))
            .prompt(Prompt::text("payee", "Who?"))
            .step(CollectSlot::new("payee", "payee", "Who is the payee?"))
            .step(EndStep::new())
            .build();

        let error = DialogRegistry::builder().dialog(definition).build().expect_err("must fail");
        assert!(matches!(error, DefinitionError::DuplicatePrompt { .. }));
    }
}
