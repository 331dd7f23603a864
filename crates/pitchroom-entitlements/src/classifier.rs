use chrono::{DateTime, Months, Utc};
use pitchroom_types::models::{PlanGrant, PlanKind};
use thiserror::Error;

/// Fixed policy term for leased plans: 5 calendar years.
const PLAN_TERM_MONTHS: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClassificationError {
    #[error("unknown product")]
    UnknownProduct,
}

/// Maps a purchase's free-text product name and price into a canonical plan
/// grant. Pure: no store access, no clock reads (the caller passes `now`).
pub struct Classifier {
    single_price: String,
}

impl Classifier {
    pub fn new(single_price: impl Into<String>) -> Self {
        Self {
            single_price: single_price.into(),
        }
    }

    /// Rules are evaluated in precedence order; first match wins. Labels may
    /// contain multiple keywords ("Single Giver Special"), so the ordering is
    /// the tie-break.
    pub fn classify(
        &self,
        product_name: &str,
        price: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<PlanGrant, ClassificationError> {
        let label = product_name.to_lowercase();

        if label.contains("single") || price == Some(self.single_price.as_str()) {
            return Ok(PlanGrant {
                kind: PlanKind::Single,
                expires_at: None,
            });
        }

        if label.contains("unlimited") || label.contains("giver") {
            return Ok(PlanGrant {
                kind: PlanKind::Unlimited,
                expires_at: Some(term_end(now)),
            });
        }

        if label.contains("investor") {
            return Ok(PlanGrant {
                kind: PlanKind::Investor,
                expires_at: Some(term_end(now)),
            });
        }

        Err(ClassificationError::UnknownProduct)
    }
}

fn term_end(now: DateTime<Utc>) -> DateTime<Utc> {
    // Calendar years, not day counts. Saturate rather than panic on the
    // (unreachable) overflow.
    now.checked_add_months(Months::new(PLAN_TERM_MONTHS))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
