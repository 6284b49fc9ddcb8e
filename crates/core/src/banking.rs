//! The transfer and balance conversations, built on the waterfall engine.

use std::sync::Arc;

use chrono::NaiveDate;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::activity::Activity;
use crate::dialogs::dates::DateWindow;
use crate::dialogs::definition::{
    DialogDefinition, PromptTarget, Step, StepAction, StepContext, StepError,
};
use crate::dialogs::entities::{Extraction, PrefillRule};
use crate::dialogs::prompts::{Prompt, PromptId};
use crate::dialogs::registry::{DefinitionError, DialogRegistry};
use crate::dialogs::slots::{SlotName, SlotStore};
use crate::dialogs::steps::{CollectSlot, EndStep, SayStep};

pub const TRANSFER_DIALOG: &str = "transfer";
pub const BALANCE_DIALOG: &str = "balance";

pub const ENTITY_ACCOUNT: &str = "AccountLabel";
pub const ENTITY_MONEY: &str = "money";
pub const ENTITY_DATE: &str = "datetimeV2";
pub const ENTITY_PAYEE: &str = "Payee";

pub const SLOT_AMOUNT: &str = "amount";
pub const SLOT_DATE: &str = "date";
pub const SLOT_ACCOUNT: &str = "account";
pub const SLOT_PAYEE: &str = "payee";

/// Transfers are scheduled for an evening within this many days.
pub const TRANSFER_WINDOW_DAYS: u32 = 14;
pub const SCHEDULING_DELAY_MS: u64 = 3_000;

pub const DONE_MESSAGE: &str = "OK, we're done here. What is next?";
pub const TRANSFER_CANCELLED_MESSAGE: &str = "OK, we have canceled the transfer.";

const CONFIRM_PROMPT: &str = "confirm";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub amount: Decimal,
    pub account: String,
    pub date: NaiveDate,
    pub payee: String,
}

impl TransferRequest {
    fn from_slots(slots: &SlotStore) -> Result<Self, StepError> {
        let amount = slots.require(&SlotName::from(SLOT_AMOUNT))?;
        let date = slots.require(&SlotName::from(SLOT_DATE))?;
        let account = slots.require(&SlotName::from(SLOT_ACCOUNT))?;
        let payee = slots.require(&SlotName::from(SLOT_PAYEE))?;

        Ok(Self {
            amount: amount
                .as_decimal()
                .ok_or_else(|| StepError::UnexpectedValue(format!("amount {amount}")))?,
            date: date
                .as_date()
                .ok_or_else(|| StepError::UnexpectedValue(format!("date {date}")))?,
            account: account.to_string(),
            payee: payee.to_string(),
        })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Back-office operations the banking dialogs call into. Implementations must not block.
pub trait AccountLedger: Send + Sync {
    fn balance(&self, account: Option<&str>) -> Result<Decimal, LedgerError>;

    /// Schedules the transfer and returns its reference number.
    fn schedule_transfer(&self, transfer: &TransferRequest) -> Result<String, LedgerError>;
}

/// Demo ledger: balances are random whole pounds below 5000.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomLedger;

impl AccountLedger for RandomLedger {
    fn balance(&self, _account: Option<&str>) -> Result<Decimal, LedgerError> {
        let pounds: i64 = rand::thread_rng().gen_range(0..5_000);
        Ok(Decimal::from(pounds))
    }

    fn schedule_transfer(&self, transfer: &TransferRequest) -> Result<String, LedgerError> {
        let reference: String =
            Uuid::new_v4().simple().to_string().to_ascii_uppercase().chars().take(9).collect();
        tracing::info!(
            event_name = "banking.transfer.scheduled",
            reference = %reference,
            amount = %transfer.amount,
            date = %transfer.date,
            "transfer scheduled"
        );
        Ok(reference)
    }
}

fn transfer_slots() -> Vec<SlotName> {
    [SLOT_AMOUNT, SLOT_ACCOUNT, SLOT_DATE, SLOT_PAYEE].into_iter().map(SlotName::from).collect()
}

/// Asks the user to confirm the collected transfer details.
struct ConfirmTransfer;

impl Step for ConfirmTransfer {
    fn name(&self) -> &str {
        "confirm_transfer"
    }

    fn run(&self, context: &mut StepContext<'_>) -> Result<StepAction, StepError> {
        let slots = &*context.slots;
        let slot = |name: &str| slots.require(&SlotName::from(name)).map(ToString::to_string);
        let message = format!(
            "Ok, I'll transfer `{}` from `{}` on `{}` to `{}`, is this correct?",
            slot(SLOT_AMOUNT)?,
            slot(SLOT_ACCOUNT)?,
            slot(SLOT_DATE)?,
            slot(SLOT_PAYEE)?,
        );
        Ok(StepAction::prompt(CONFIRM_PROMPT, PromptTarget::StepInput, message))
    }

    fn slots(&self) -> Vec<SlotName> {
        transfer_slots()
    }

    fn prompts(&self) -> Vec<PromptId> {
        vec![PromptId::from(CONFIRM_PROMPT)]
    }
}

/// Schedules or drops the transfer depending on the confirmation answer.
struct CompleteTransfer {
    ledger: Arc<dyn AccountLedger>,
}

impl Step for CompleteTransfer {
    fn name(&self) -> &str {
        "complete_transfer"
    }

    fn run(&self, context: &mut StepContext<'_>) -> Result<StepAction, StepError> {
        let confirmed = context.result().ok_or(StepError::MissingResult)?;
        let confirmed = confirmed
            .as_bool()
            .ok_or_else(|| StepError::UnexpectedValue(confirmed.to_string()))?;

        if confirmed {
            let transfer = TransferRequest::from_slots(context.slots)?;
            let reference = self
                .ledger
                .schedule_transfer(&transfer)
                .map_err(|error| StepError::Failed(error.to_string()))?;
            context.send(Activity::Typing);
            context.send(Activity::delay(SCHEDULING_DELAY_MS));
            context.say(format!("Your transfer is scheduled. Reference number: #{reference}"));
        } else {
            context.say(TRANSFER_CANCELLED_MESSAGE);
        }
        Ok(StepAction::Continue)
    }

    fn slots(&self) -> Vec<SlotName> {
        transfer_slots()
    }
}

/// Looks up the balance and reports it; never prompts.
struct ReportBalance {
    ledger: Arc<dyn AccountLedger>,
}

impl Step for ReportBalance {
    fn name(&self) -> &str {
        "report_balance"
    }

    fn run(&self, context: &mut StepContext<'_>) -> Result<StepAction, StepError> {
        let account = context.slots.get(&SlotName::from(SLOT_ACCOUNT)).map(ToString::to_string);
        let balance = self
            .ledger
            .balance(account.as_deref())
            .map_err(|error| StepError::Failed(error.to_string()))?;

        match account {
            Some(account) => context.say(format!("Your {account} balance is £{balance}")),
            None => context.say(format!("Your balance is £{balance}")),
        }
        Ok(StepAction::Continue)
    }

    fn slots(&self) -> Vec<SlotName> {
        vec![SlotName::from(SLOT_ACCOUNT)]
    }
}

pub fn transfer_dialog(ledger: Arc<dyn AccountLedger>) -> DialogDefinition {
    let window = DateWindow::evenings_within(TRANSFER_WINDOW_DAYS);

    DialogDefinition::builder(TRANSFER_DIALOG)
        .slot(SLOT_AMOUNT)
        .slot(SLOT_DATE)
        .slot(SLOT_ACCOUNT)
        .slot(SLOT_PAYEE)
        .prompt(Prompt::integer(
            SLOT_AMOUNT,
            Some(0),
            None,
            "How much do you want to transfer? You can say a number, for example 23, 100, 10 or \
             ten.",
        ))
        .prompt(Prompt::date(SLOT_DATE, window, "Please enter a date and time for the transfer."))
        .prompt(Prompt::text(
            SLOT_ACCOUNT,
            "Which account do you want to transfer from? For example Joint, Current, Savings etc.",
        ))
        .prompt(Prompt::text(
            SLOT_PAYEE,
            "Who is the payee? This needs to be the name of a person or company you have already \
             set up, for example Martin Kearn or BT.",
        ))
        .prompt(Prompt::confirm(
            CONFIRM_PROMPT,
            "Should I make the transfer for you? Please enter `yes` or `no`.",
        ))
        .prefill(PrefillRule::new(ENTITY_MONEY, SLOT_AMOUNT, Extraction::FirstNonZeroAmount))
        .prefill(PrefillRule::new(ENTITY_DATE, SLOT_DATE, Extraction::DateWithin(window)))
        .prefill(PrefillRule::new(ENTITY_ACCOUNT, SLOT_ACCOUNT, Extraction::FirstText))
        .prefill(PrefillRule::new(ENTITY_PAYEE, SLOT_PAYEE, Extraction::FirstText))
        .step(SayStep::new("announce", "OK, we're going to make a transfer."))
        .step(CollectSlot::new(SLOT_AMOUNT, SLOT_AMOUNT, "How much?"))
        .step(CollectSlot::new(SLOT_DATE, SLOT_DATE, "When do you want the transfer to happen?"))
        .step(CollectSlot::new(SLOT_ACCOUNT, SLOT_ACCOUNT, "Which account?"))
        .step(CollectSlot::new(SLOT_PAYEE, SLOT_PAYEE, "Who is the payee?"))
        .step(ConfirmTransfer)
        .step(CompleteTransfer { ledger })
        .step(EndStep::with_message(DONE_MESSAGE))
        .build()
}

pub fn balance_dialog(ledger: Arc<dyn AccountLedger>) -> DialogDefinition {
    DialogDefinition::builder(BALANCE_DIALOG)
        .slot(SLOT_ACCOUNT)
        .prefill(PrefillRule::new(ENTITY_ACCOUNT, SLOT_ACCOUNT, Extraction::FirstText))
        .step(ReportBalance { ledger })
        .step(EndStep::with_message(DONE_MESSAGE))
        .build()
}

/// Registry with both banking dialogs, routed from the `transfer` and `balance` intents.
pub fn banking_registry(
    ledger: Arc<dyn AccountLedger>,
) -> Result<DialogRegistry, DefinitionError> {
    DialogRegistry::builder()
        .dialog(transfer_dialog(Arc::clone(&ledger)))
        .dialog(balance_dialog(ledger))
        .route("transfer", TRANSFER_DIALOG)
        .route("balance", BALANCE_DIALOG)
        .build()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::{
        banking_registry, AccountLedger, LedgerError, RandomLedger, TransferRequest,
        BALANCE_DIALOG, TRANSFER_DIALOG,
    };
    use crate::dialogs::definition::DialogId;

    struct FixedLedger;

    impl AccountLedger for FixedLedger {
        fn balance(&self, _account: Option<&str>) -> Result<Decimal, LedgerError> {
            Ok(Decimal::from(1234))
        }

        fn schedule_transfer(&self, _transfer: &TransferRequest) -> Result<String, LedgerError> {
            Ok("K89HG38SZ".to_owned())
        }
    }

    #[test]
    fn banking_registry_validates_and_routes_intents() {
        let registry = banking_registry(Arc::new(FixedLedger)).expect("registry builds");

        assert_eq!(registry.route("Transfer"), Some(&DialogId::from(TRANSFER_DIALOG)));
        assert_eq!(registry.route("BALANCE"), Some(&DialogId::from(BALANCE_DIALOG)));
        assert_eq!(registry.route("None"), None);

        let transfer = registry.get(&DialogId::from(TRANSFER_DIALOG)).expect("transfer");
        assert_eq!(transfer.step_count(), 8);
        assert_eq!(transfer.prefill_rules().len(), 4);
    }

    #[test]
    fn random_ledger_stays_in_range_and_issues_short_references() {
        let ledger = RandomLedger;
        for _ in 0..50 {
            let balance = ledger.balance(None).expect("balance");
            assert!(balance >= Decimal::ZERO && balance < Decimal::from(5_000));
        }

        let reference = ledger
            .schedule_transfer(&TransferRequest {
                amount: Decimal::from(100),
                account: "Savings".to_owned(),
                date: NaiveDate::from_ymd_opt(2026, 10, 19).expect("valid date"),
                payee: "BT".to_owned(),
            })
            .expect("scheduled");
        assert_eq!(reference.len(), 9);
        assert!(reference.chars().all(|ch| ch.is_ascii_digit() || ch.is_ascii_uppercase()));
    }
}
