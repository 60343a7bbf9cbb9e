use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::error;

use super::domain::{BuyerType, Role};
use super::error::EngineError;
use super::verification::VerificationLedger;

/// Trust tier derived from the verification ledger. Ordered from least to most trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycLevel {
    None,
    Email,
    Phone,
    Identity,
    Financial,
}

impl KycLevel {
    pub const fn ordered() -> [Self; 5] {
        [
            Self::None,
            Self::Email,
            Self::Phone,
            Self::Identity,
            Self::Financial,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Identity => "identity",
            Self::Financial => "financial",
        }
    }
}

impl fmt::Display for KycLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Capability tokens consumed by dashboards and by the offer/payment rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    BrowseProperties,
    SaveFavorites,
    ContactSeller,
    ScheduleViewing,
    MakeOffer,
    SubmitPayment,
    InstallmentApply,
    RespondToInquiries,
    ListProperty,
    PublishVerifiedListing,
}

impl Permission {
    pub const fn label(self) -> &'static str {
        match self {
            Self::BrowseProperties => "browse_properties",
            Self::SaveFavorites => "save_favorites",
            Self::ContactSeller => "contact_seller",
            Self::ScheduleViewing => "schedule_viewing",
            Self::MakeOffer => "make_offer",
            Self::SubmitPayment => "submit_payment",
            Self::InstallmentApply => "installment_apply",
            Self::RespondToInquiries => "respond_to_inquiries",
            Self::ListProperty => "list_property",
            Self::PublishVerifiedListing => "publish_verified_listing",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn require(&self, permission: Permission) -> Result<(), EngineError> {
        if self.contains(permission) {
            Ok(())
        } else {
            Err(EngineError::PermissionDenied(permission))
        }
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn checked(ledger: &VerificationLedger) -> Result<(), EngineError> {
    ledger.validate().map_err(|violation| {
        error!(%violation, "refusing to derive a tier from an invalid verification ledger");
        EngineError::LedgerIntegrity(violation)
    })
}

/// Highest verification level the ledger supports.
pub fn derive_level(ledger: &VerificationLedger) -> Result<KycLevel, EngineError> {
    checked(ledger)?;

    let level = match (
        ledger.financially_verified,
        ledger.identity_verified,
        ledger.phone_verified,
        ledger.email_verified,
    ) {
        (true, _, _, _) => KycLevel::Financial,
        (false, true, _, _) => KycLevel::Identity,
        (false, false, true, _) => KycLevel::Phone,
        (false, false, false, true) => KycLevel::Email,
        (false, false, false, false) => KycLevel::None,
    };
    Ok(level)
}

/// Capabilities granted to the account. Buyer and seller grants are computed
/// independently and unioned.
pub fn derive_permissions(
    ledger: &VerificationLedger,
    buyer_type: BuyerType,
    roles: &BTreeSet<Role>,
) -> Result<PermissionSet, EngineError> {
    let level = derive_level(ledger)?;

    let mut granted = BTreeSet::new();
    for role in roles {
        match role {
            Role::Buyer => granted.extend(buyer_grants(level, buyer_type)),
            Role::Seller => granted.extend(seller_grants(level, ledger.property_verified)),
        }
    }
    Ok(PermissionSet(granted))
}

/// Shorthand for [`derive_permissions`] using the buyer type and roles stored on the ledger.
pub fn ledger_permissions(ledger: &VerificationLedger) -> Result<PermissionSet, EngineError> {
    derive_permissions(ledger, ledger.buyer_type, &ledger.roles)
}

fn buyer_grants(level: KycLevel, buyer_type: BuyerType) -> Vec<Permission> {
    let mut grants = vec![Permission::BrowseProperties];
    match level {
        KycLevel::None => {}
        KycLevel::Email => grants.push(Permission::SaveFavorites),
        KycLevel::Phone => grants.extend([
            Permission::SaveFavorites,
            Permission::ContactSeller,
            Permission::ScheduleViewing,
        ]),
        KycLevel::Identity | KycLevel::Financial => grants.extend([
            Permission::SaveFavorites,
            Permission::ContactSeller,
            Permission::ScheduleViewing,
            Permission::MakeOffer,
            Permission::SubmitPayment,
        ]),
    }

    if level == KycLevel::Financial && buyer_type == BuyerType::Installment {
        grants.push(Permission::InstallmentApply);
    }
    grants
}

fn seller_grants(level: KycLevel, property_verified: bool) -> Vec<Permission> {
    let mut grants = match level {
        KycLevel::None | KycLevel::Email => Vec::new(),
        KycLevel::Phone => vec![Permission::RespondToInquiries],
        KycLevel::Identity | KycLevel::Financial => {
            vec![Permission::RespondToInquiries, Permission::ListProperty]
        }
    };

    if property_verified && level >= KycLevel::Identity {
        grants.push(Permission::PublishVerifiedListing);
    }
    grants
}
