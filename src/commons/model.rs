//! Commons, participant and user types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Lowest possible herd health.
pub const MIN_HEALTH: Decimal = dec!(0);
/// Highest possible herd health.
pub const MAX_HEALTH: Decimal = dec!(100);

/// One shared pasture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commons {
    pub id: i64,
    pub name: String,
    /// Inactive commons are skipped by the tick; they are never deleted.
    pub active: bool,
    pub config: CommonsConfig,
}

impl Commons {
    pub fn new(id: i64, name: impl Into<String>, config: CommonsConfig) -> Self {
        Self {
            id,
            name: name.into(),
            active: true,
            config,
        }
    }

    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Tunable economics of a commons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonsConfig {
    /// Number of cows the pasture sustains without degrading.
    pub carrying_capacity: u32,
    /// Price of one cow.
    pub cow_price: Decimal,
    /// Payout per cow per tick at full health.
    pub milk_price: Decimal,
    /// Health points lost per tick when the pasture is 100% overloaded.
    pub degradation_rate: Decimal,
    /// Health points regained per tick while within capacity.
    pub recovery_rate: Decimal,
    /// Upper bound on one tick's health loss. Also the penalty applied when
    /// the carrying capacity is zero.
    pub max_crowding_penalty: Decimal,
    /// Health at or below which `HealthCritical` is reported.
    pub critical_health: Decimal,
    /// Cows lost per tick while herd health sits at zero.
    pub die_off_per_tick: u32,
}

impl Default for CommonsConfig {
    fn default() -> Self {
        Self {
            carrying_capacity: 100,
            cow_price: dec!(100.00),
            milk_price: dec!(10.00),
            degradation_rate: dec!(10),
            recovery_rate: dec!(2),
            max_crowding_penalty: dec!(25),
            critical_health: dec!(20),
            die_off_per_tick: 1,
        }
    }
}

impl CommonsConfig {
    /// Check the configuration is usable by the rule set.
    pub fn validate(&self) -> Result<(), String> {
        let non_negative = [
            ("cow_price", self.cow_price),
            ("milk_price", self.milk_price),
            ("degradation_rate", self.degradation_rate),
            ("recovery_rate", self.recovery_rate),
            ("max_crowding_penalty", self.max_crowding_penalty),
        ];
        for (field, value) in non_negative {
            if value.is_sign_negative() && !value.is_zero() {
                return Err(format!("{field} must not be negative, got {value}"));
            }
        }
        if self.critical_health < MIN_HEALTH || self.critical_health > MAX_HEALTH {
            return Err(format!(
                "critical_health must be within {MIN_HEALTH}..={MAX_HEALTH}, got {}",
                self.critical_health
            ));
        }
        Ok(())
    }
}

/// A user's herd within one commons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantState {
    pub commons_id: i64,
    pub user_id: i64,
    pub num_cows: u32,
    /// Aggregate herd health, `MIN_HEALTH..=MAX_HEALTH`.
    pub cow_health: Decimal,
    pub total_wealth: Decimal,
    /// Timestamp of the last tick applied to this record.
    pub last_tick_at: Option<DateTime<Utc>>,
}

impl ParticipantState {
    pub fn new(commons_id: i64, user_id: i64, num_cows: u32) -> Self {
        Self {
            commons_id,
            user_id,
            num_cows,
            cow_health: MAX_HEALTH,
            total_wealth: Decimal::ZERO,
            last_tick_at: None,
        }
    }

    pub fn with_health(mut self, health: Decimal) -> Self {
        self.cow_health = health;
        self
    }

    pub fn with_wealth(mut self, wealth: Decimal) -> Self {
        self.total_wealth = wealth;
        self
    }

    /// Check the record against the data-model invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.cow_health < MIN_HEALTH || self.cow_health > MAX_HEALTH {
            return Err(format!(
                "cow_health {} outside {MIN_HEALTH}..={MAX_HEALTH}",
                self.cow_health
            ));
        }
        Ok(())
    }

    /// Key identifying this participant.
    pub fn key(&self) -> (i64, i64) {
        (self.commons_id, self.user_id)
    }
}

/// A player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub full_name: String,
    pub email: String,
}

impl User {
    pub fn new(id: i64, full_name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            full_name: full_name.into(),
            email: email.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(CommonsConfig::default().validate().is_ok());
    }

    #[test]
    fn config_rejects_negative_prices() {
        let config = CommonsConfig {
            milk_price: dec!(-1),
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("milk_price"));
    }

    #[test]
    fn config_rejects_critical_out_of_range() {
        let config = CommonsConfig {
            critical_health: dec!(101),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn participant_health_bounds() {
        assert!(ParticipantState::new(1, 1, 3).validate().is_ok());
        assert!(
            ParticipantState::new(1, 1, 3)
                .with_health(dec!(100.5))
                .validate()
                .is_err()
        );
        assert!(
            ParticipantState::new(1, 1, 3)
                .with_health(dec!(-0.1))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn deactivated_commons() {
        let commons = Commons::new(7, "Pasture", CommonsConfig::default()).deactivated();
        assert!(!commons.active);
    }
}
