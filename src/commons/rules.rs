//! Simulation rule set.
//!
//! A rule set is a pure function from (commons snapshot, participant state,
//! tick timestamp) to the participant's next state plus the notable events
//! that happened along the way. Rule sets never read the clock or touch a
//! store; the tick job supplies everything they need through [`TickInput`].
//!
//! [`StandardRules`] is the default policy:
//! - within carrying capacity the herd recovers `recovery_rate` health;
//! - over capacity it loses `degradation_rate × overload`, capped at
//!   `max_crowding_penalty`;
//! - a zero-capacity pasture applies `max_crowding_penalty` outright;
//! - milk pays `num_cows × milk_price × health / 100` per tick;
//! - at zero health `die_off_per_tick` cows die each tick.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::commons::model::{CommonsConfig, MAX_HEALTH, MIN_HEALTH, ParticipantState};
use crate::error::RuleError;

/// Read-only inputs shared by every participant of one commons in one tick.
#[derive(Debug, Clone, Copy)]
pub struct TickInput<'a> {
    pub config: &'a CommonsConfig,
    /// Total cows grazing the commons in this tick's snapshot.
    pub total_cows: u64,
    pub tick_at: DateTime<Utc>,
}

/// Something worth surfacing from one participant's tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TickEvent {
    /// The participant already carries this tick's timestamp.
    AlreadyApplied,
    /// Milk was sold for `amount`.
    MilkSold { amount: Decimal },
    /// Herd health fell to or below the commons' critical threshold.
    HealthCritical { health: Decimal },
    /// Cows died because health reached zero.
    CowsLost { count: u32 },
    /// The last cow died.
    HerdDiedOut,
}

impl std::fmt::Display for TickEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyApplied => write!(f, "tick already applied"),
            Self::MilkSold { amount } => write!(f, "milk sold for {amount}"),
            Self::HealthCritical { health } => write!(f, "herd health critical ({health})"),
            Self::CowsLost { count } => write!(f, "{count} cow(s) lost"),
            Self::HerdDiedOut => write!(f, "herd died out"),
        }
    }
}

/// Result of applying one tick to one participant.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub state: ParticipantState,
    pub events: Vec<TickEvent>,
    /// Money paid out this tick.
    pub milk_income: Decimal,
    /// Cows that grazed the pasture this tick.
    pub resource_draw: u32,
}

impl TickOutcome {
    fn unchanged(state: ParticipantState, events: Vec<TickEvent>) -> Self {
        Self {
            state,
            events,
            milk_income: Decimal::ZERO,
            resource_draw: 0,
        }
    }

    /// Whether this outcome is the idempotent no-op for a re-applied tick.
    pub fn already_applied(&self) -> bool {
        self.events.contains(&TickEvent::AlreadyApplied)
    }
}

/// A pluggable simulation policy.
pub trait RuleSet: Send + Sync {
    /// Compute a participant's next state. Must be deterministic and must
    /// keep health within bounds. Errors only concern this participant.
    fn apply_tick(
        &self,
        input: &TickInput<'_>,
        state: &ParticipantState,
    ) -> Result<TickOutcome, RuleError>;
}

/// The default rule set.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardRules;

impl StandardRules {
    /// Signed health change for the whole commons this tick.
    pub fn health_delta(config: &CommonsConfig, total_cows: u64) -> Result<Decimal, RuleError> {
        let capacity = u64::from(config.carrying_capacity);
        if capacity == 0 {
            return Ok(-config.max_crowding_penalty);
        }
        if total_cows <= capacity {
            return Ok(config.recovery_rate);
        }
        let overload = Decimal::from(total_cows - capacity) / Decimal::from(capacity);
        let penalty = config
            .degradation_rate
            .checked_mul(overload)
            .ok_or(RuleError::Overflow("crowding penalty"))?;
        Ok(-penalty.min(config.max_crowding_penalty))
    }
}

impl RuleSet for StandardRules {
    fn apply_tick(
        &self,
        input: &TickInput<'_>,
        state: &ParticipantState,
    ) -> Result<TickOutcome, RuleError> {
        if state.last_tick_at.is_some_and(|last| last >= input.tick_at) {
            return Ok(TickOutcome::unchanged(
                state.clone(),
                vec![TickEvent::AlreadyApplied],
            ));
        }

        let mut next = state.clone();
        next.last_tick_at = Some(input.tick_at);

        if state.num_cows == 0 {
            return Ok(TickOutcome::unchanged(next, Vec::new()));
        }

        let config = input.config;
        let mut events = Vec::new();

        let delta = Self::health_delta(config, input.total_cows)?;
        next.cow_health = state
            .cow_health
            .checked_add(delta)
            .ok_or(RuleError::Overflow("cow health"))?
            .clamp(MIN_HEALTH, MAX_HEALTH);

        let milk_income = Decimal::from(state.num_cows)
            .checked_mul(config.milk_price)
            .and_then(|gross| gross.checked_mul(next.cow_health))
            .and_then(|gross| gross.checked_div(dec!(100)))
            .ok_or(RuleError::Overflow("milk income"))?
            .round_dp(2);
        next.total_wealth = state
            .total_wealth
            .checked_add(milk_income)
            .ok_or(RuleError::Overflow("total wealth"))?;
        if milk_income > Decimal::ZERO {
            events.push(TickEvent::MilkSold {
                amount: milk_income,
            });
        }

        if next.cow_health <= config.critical_health {
            events.push(TickEvent::HealthCritical {
                health: next.cow_health,
            });
        }

        if next.cow_health == MIN_HEALTH && config.die_off_per_tick > 0 {
            let lost = config.die_off_per_tick.min(state.num_cows);
            next.num_cows = state.num_cows.saturating_sub(config.die_off_per_tick);
            events.push(TickEvent::CowsLost { count: lost });
            if next.num_cows == 0 {
                events.push(TickEvent::HerdDiedOut);
            }
        }

        Ok(TickOutcome {
            state: next,
            events,
            milk_income,
            resource_draw: state.num_cows,
        })
    }
}
