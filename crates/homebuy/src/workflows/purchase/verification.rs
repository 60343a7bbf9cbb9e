use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{BuyerId, BuyerType, Role};
use super::error::EngineError;

/// Verification steps a marketplace account can complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationKind {
    Email,
    Phone,
    Identity,
    Financial,
    Property,
}

impl VerificationKind {
    pub const fn ordered() -> [Self; 5] {
        [
            Self::Email,
            Self::Phone,
            Self::Identity,
            Self::Financial,
            Self::Property,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Identity => "identity",
            Self::Financial => "financial",
            Self::Property => "property",
        }
    }

    /// Step that must already be recorded before this one is accepted.
    pub const fn prerequisite(self) -> Option<Self> {
        match self {
            Self::Email | Self::Phone => None,
            Self::Identity => Some(Self::Phone),
            Self::Financial | Self::Property => Some(Self::Identity),
        }
    }
}

impl fmt::Display for VerificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A completed verification reported by one of the intake forms (OTP, document upload,
/// financial assessment). Document contents are validated upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationEvent {
    pub kind: VerificationKind,
    pub buyer_id: BuyerId,
}

/// Ledger flag set without the flag it depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{flag} is verified but {prerequisite} is not")]
pub struct IntegrityViolation {
    pub flag: VerificationKind,
    pub prerequisite: VerificationKind,
}

/// Completed verification facts for one account. Flags only ever flip to true.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationLedger {
    pub email_verified: bool,
    pub phone_verified: bool,
    pub identity_verified: bool,
    pub financially_verified: bool,
    pub property_verified: bool,
    pub buyer_type: BuyerType,
    pub roles: BTreeSet<Role>,
}

impl VerificationLedger {
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            roles: roles.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn is_verified(&self, kind: VerificationKind) -> bool {
        match kind {
            VerificationKind::Email => self.email_verified,
            VerificationKind::Phone => self.phone_verified,
            VerificationKind::Identity => self.identity_verified,
            VerificationKind::Financial => self.financially_verified,
            VerificationKind::Property => self.property_verified,
        }
    }

    fn flag_mut(&mut self, kind: VerificationKind) -> &mut bool {
        match kind {
            VerificationKind::Email => &mut self.email_verified,
            VerificationKind::Phone => &mut self.phone_verified,
            VerificationKind::Identity => &mut self.identity_verified,
            VerificationKind::Financial => &mut self.financially_verified,
            VerificationKind::Property => &mut self.property_verified,
        }
    }

    /// Checks the prerequisite chain over every flag.
    pub fn validate(&self) -> Result<(), IntegrityViolation> {
        for flag in VerificationKind::ordered() {
            if !self.is_verified(flag) {
                continue;
            }
            if let Some(prerequisite) = flag.prerequisite() {
                if !self.is_verified(prerequisite) {
                    return Err(IntegrityViolation { flag, prerequisite });
                }
            }
        }
        Ok(())
    }

    /// Records a completed verification, returning the updated ledger.
    ///
    /// Re-applying a flag that is already set returns an identical ledger.
    pub fn apply(&self, event: &VerificationEvent) -> Result<Self, EngineError> {
        self.verify(event.kind)
    }

    fn verify(&self, kind: VerificationKind) -> Result<Self, EngineError> {
        self.validate().map_err(EngineError::LedgerIntegrity)?;

        if self.is_verified(kind) {
            return Ok(self.clone());
        }

        if let Some(missing) = kind.prerequisite() {
            if !self.is_verified(missing) {
                return Err(EngineError::PrerequisiteNotMet { kind, missing });
            }
        }

        let mut next = self.clone();
        *next.flag_mut(kind) = true;
        Ok(next)
    }

    /// Folds one account event into the ledger.
    pub fn apply_account_event(&self, event: &AccountEvent) -> Result<Self, EngineError> {
        match event {
            AccountEvent::VerificationCompleted { kind } => self.verify(*kind),
            AccountEvent::BuyerTypeSelected { buyer_type } => {
                let mut next = self.clone();
                next.buyer_type = *buyer_type;
                Ok(next)
            }
            AccountEvent::RoleGranted { role } => {
                let mut next = self.clone();
                next.roles.insert(*role);
                Ok(next)
            }
        }
    }
}

/// Changes recorded against an account's append-only log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccountEvent {
    VerificationCompleted { kind: VerificationKind },
    BuyerTypeSelected { buyer_type: BuyerType },
    RoleGranted { role: Role },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountEntry {
    pub recorded_at: DateTime<Utc>,
    pub event: AccountEvent,
}

/// Rebuilds a ledger from a stored event log.
///
/// A log that breaks the prerequisite chain was never produced by [`BuyerAccount::record`],
/// so ordering failures surface as integrity violations here.
pub fn replay<'a>(
    events: impl IntoIterator<Item = &'a AccountEvent>,
) -> Result<VerificationLedger, EngineError> {
    events
        .into_iter()
        .try_fold(VerificationLedger::default(), |ledger, event| {
            ledger
                .apply_account_event(event)
                .map_err(|err| match err {
                    EngineError::PrerequisiteNotMet { kind, missing } => {
                        EngineError::LedgerIntegrity(IntegrityViolation {
                            flag: kind,
                            prerequisite: missing,
                        })
                    }
                    other => other,
                })
        })
}

/// Stored account: identity plus the event log the ledger is derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyerAccount {
    pub buyer_id: BuyerId,
    pub created_at: DateTime<Utc>,
    entries: Vec<AccountEntry>,
}

impl BuyerAccount {
    pub fn open(
        buyer_id: BuyerId,
        roles: impl IntoIterator<Item = Role>,
        now: DateTime<Utc>,
    ) -> Self {
        let roles: BTreeSet<Role> = roles.into_iter().collect();
        let entries = roles
            .into_iter()
            .map(|role| AccountEntry {
                recorded_at: now,
                event: AccountEvent::RoleGranted { role },
            })
            .collect();

        Self {
            buyer_id,
            created_at: now,
            entries,
        }
    }

    /// Number of recorded events, used as the compare-and-swap token.
    pub fn revision(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[AccountEntry] {
        &self.entries
    }

    pub fn ledger(&self) -> Result<VerificationLedger, EngineError> {
        replay(self.entries.iter().map(|entry| &entry.event))
    }

    /// Validates `event` against the current ledger and appends it when it changes state.
    ///
    /// Returns the account unchanged (same revision) when the event is a no-op.
    pub fn record(&self, event: AccountEvent, now: DateTime<Utc>) -> Result<Self, EngineError> {
        let current = self.ledger()?;
        let next = current.apply_account_event(&event)?;
        if next == current {
            return Ok(self.clone());
        }

        let mut account = self.clone();
        account.entries.push(AccountEntry {
            recorded_at: now,
            event,
        });
        Ok(account)
    }
}
