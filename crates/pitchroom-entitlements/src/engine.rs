use std::sync::Arc;

use chrono::{DateTime, Utc};
use pitchroom_db::Database;
use pitchroom_types::models::{PlanGrant, PlanKind, Role, User};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// The two gated actions this core arbitrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    SubmitIdea,
    StartConversation,
}

/// Machine-distinguishable denial reasons. Callers map these to remediation
/// guidance ("purchase a plan" vs "plan expired" vs "wrong account type").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Denial {
    #[error("this action requires a different account role")]
    WrongRole,
    #[error("no active plan covers this action")]
    NoActivePlan,
    #[error("plan has expired")]
    Expired,
    #[error("single-use plan has already been used")]
    AlreadyConsumed,
}

impl Denial {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Denial::WrongRole => "wrong_role",
            Denial::NoActivePlan => "no_active_plan",
            Denial::Expired => "expired",
            Denial::AlreadyConsumed => "already_consumed",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// Store failures surface verbatim; retries belong to the caller.
    #[error("store unavailable: {0}")]
    Store(#[source] anyhow::Error),
    #[error("user not found")]
    UserNotFound,
}

/// Owns the plan state transitions on the user record. `grant` and `consume`
/// are each one atomic record update; `check` is a pure read.
#[derive(Clone)]
pub struct EntitlementEngine {
    db: Arc<Database>,
}

impl EntitlementEngine {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Unconditionally overwrite the user's plan state from a classified
    /// purchase. Overwrite semantics, no merge: re-granting at any state
    /// resets to the newly granted state.
    pub fn grant(&self, user_id: Uuid, grant: &PlanGrant) -> Result<(), EngineError> {
        let expires = grant.expires_at.map(|t| t.to_rfc3339());
        let updated = self
            .db
            .apply_grant(&user_id.to_string(), grant.kind.as_str(), expires.as_deref())
            .map_err(EngineError::Store)?;
        if !updated {
            return Err(EngineError::UserNotFound);
        }
        info!(%user_id, plan = grant.kind.as_str(), "plan granted");
        Ok(())
    }

    /// One-shot invalidation of a `single` plan. Never applies to leased
    /// plans. Returns true iff this call spent the token; a false return
    /// means a concurrent submission (or an earlier one) got there first,
    /// and the caller must not proceed with the gated action.
    pub fn consume(&self, user_id: Uuid) -> Result<bool, EngineError> {
        let flipped = self
            .db
            .consume_single(&user_id.to_string())
            .map_err(EngineError::Store)?;
        if flipped {
            info!(%user_id, "single-use entitlement consumed");
        } else {
            // Entitlement was already spent or the plan changed underneath
            // us; the conditional update kept the record consistent.
            warn!(%user_id, "consume was a no-op");
        }
        Ok(flipped)
    }

    /// Is this user currently entitled to perform `action`? Pure read: no
    /// state mutation, expiry evaluated against the caller's clock. Leased
    /// plans keep `is_entitled` set in the store after expiry; denial comes
    /// from the timestamp comparison here.
    pub fn check(user: &User, action: Action, now: DateTime<Utc>) -> Result<(), Denial> {
        match action {
            Action::SubmitIdea => {
                if user.role != Role::Giver {
                    return Err(Denial::WrongRole);
                }
                match user.plan {
                    Some(PlanKind::Unlimited) => {
                        if !user.is_entitled {
                            return Err(Denial::NoActivePlan);
                        }
                        match user.expires_at {
                            Some(expiry) if expiry > now => Ok(()),
                            _ => Err(Denial::Expired),
                        }
                    }
                    // Single plans carry no expiry; the entitlement flag is
                    // the whole state.
                    Some(PlanKind::Single) if user.is_entitled => Ok(()),
                    Some(PlanKind::Single) => Err(Denial::AlreadyConsumed),
                    _ => Err(Denial::NoActivePlan),
                }
            }
            Action::StartConversation => {
                if user.role != Role::Investor {
                    return Err(Denial::WrongRole);
                }
                if user.plan != Some(PlanKind::Investor) || !user.is_entitled {
                    return Err(Denial::NoActivePlan);
                }
                match user.expires_at {
                    None => Ok(()),
                    Some(expiry) if expiry > now => Ok(()),
                    Some(_) => Err(Denial::Expired),
                }
            }
        }
    }
}
