//! The simulation tick job.
//!
//! Walks every active commons in id order, applies the rule set to each
//! participant and writes the result back. Problems with a single
//! participant are recorded on the context and skipped; only failing to
//! enumerate commons or participants ends the run.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::commons::model::{Commons, ParticipantState};
use crate::commons::rules::{RuleSet, StandardRules, TickInput};
use crate::error::{Error, TickError};
use crate::jobs::{Job, JobContext};
use crate::store::{CommonsStore, SaveOutcome};

/// Registered name of the simulation tick job.
pub const SIMULATION_TICK_JOB: &str = "simulation_tick";

/// Running totals for one tick.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickTotals {
    pub commons: usize,
    pub participants_processed: usize,
    /// Participants that already carried this tick's timestamp.
    pub participants_skipped: usize,
    pub failures: usize,
    pub cows_affected: u64,
    pub milk_paid: Decimal,
}

/// Applies one simulation tick to every active commons.
pub struct SimulationTickJob {
    store: Arc<dyn CommonsStore>,
    rules: Arc<dyn RuleSet>,
}

impl SimulationTickJob {
    pub fn new(store: Arc<dyn CommonsStore>, rules: Arc<dyn RuleSet>) -> Self {
        Self { store, rules }
    }

    /// Tick job with the standard rule set.
    pub fn standard(store: Arc<dyn CommonsStore>) -> Self {
        Self::new(store, Arc::new(StandardRules))
    }

    /// Run the tick and return its totals.
    pub async fn tick(&self, ctx: &JobContext) -> Result<TickTotals, TickError> {
        ctx.log("Starting simulation tick").await;

        let mut commons = self
            .store
            .list_active_commons()
            .await
            .map_err(TickError::ListCommons)?;
        commons.sort_by_key(|c| c.id);
        ctx.log(format!("Found {} active commons", commons.len())).await;

        let mut totals = TickTotals::default();

        for commons in &commons {
            if ctx.is_cancelled() {
                ctx.mark_stopped_early();
                ctx.log("Simulation tick cancelled").await;
                break;
            }

            self.tick_commons(ctx, commons, &mut totals).await?;
            ctx.mark_commons_processed(commons.id).await;
            totals.commons += 1;

            if ctx.is_cancelled() {
                ctx.mark_stopped_early();
                ctx.log(format!(
                    "Simulation tick cancelled after commons {}",
                    commons.name
                ))
                .await;
                break;
            }
        }

        totals.failures = ctx.failure_count().await;
        ctx.log(format!(
            "Simulation tick complete: {} commons, {} participants processed, {} skipped, \
             {} failures, {} cows affected, {} paid out",
            totals.commons,
            totals.participants_processed,
            totals.participants_skipped,
            totals.failures,
            totals.cows_affected,
            totals.milk_paid
        ))
        .await;

        Ok(totals)
    }

    async fn tick_commons(
        &self,
        ctx: &JobContext,
        commons: &Commons,
        totals: &mut TickTotals,
    ) -> Result<(), TickError> {
        ctx.log(format!("Processing commons: {} (id {})", commons.name, commons.id))
            .await;

        if let Err(reason) = commons.config.validate() {
            ctx.log(format!(
                "Commons {} has questionable configuration: {}",
                commons.name, reason
            ))
            .await;
        }

        let listing = self
            .store
            .list_participants(commons.id)
            .await
            .map_err(|source| TickError::ListParticipants {
                commons_id: commons.id,
                source,
            })?;
        let mut participants = listing.participants;
        participants.sort_by_key(|p| p.user_id);

        for unreadable in listing.unreadable {
            let user = unreadable
                .user_id
                .map_or_else(|| "unknown".to_string(), |id| id.to_string());
            let err = TickError::UnreadableParticipant {
                commons_id: unreadable.commons_id,
                reason: unreadable.reason,
            };
            ctx.record_failure(
                format!("commons {} / user {}", unreadable.commons_id, user),
                err.to_string(),
            )
            .await;
        }

        let total_cows: u64 = participants.iter().map(|p| u64::from(p.num_cows)).sum();
        ctx.log(format!(
            "{} participants, {} cows on capacity {}",
            participants.len(),
            total_cows,
            commons.config.carrying_capacity
        ))
        .await;

        let input = TickInput {
            config: &commons.config,
            total_cows,
            tick_at: ctx.started_at(),
        };

        for participant in &participants {
            match self.tick_participant(ctx, &input, participant).await {
                Ok(ParticipantOutcome::Saved {
                    cows,
                    milk_income,
                }) => {
                    totals.participants_processed += 1;
                    totals.cows_affected += u64::from(cows);
                    totals.milk_paid = totals
                        .milk_paid
                        .checked_add(milk_income)
                        .unwrap_or(Decimal::MAX);
                }
                Ok(ParticipantOutcome::Skipped) => totals.participants_skipped += 1,
                Err(e) => {
                    ctx.record_failure(
                        format!("commons {} / user {}", participant.commons_id, participant.user_id),
                        e.to_string(),
                    )
                    .await;
                }
            }
        }

        Ok(())
    }

    async fn tick_participant(
        &self,
        ctx: &JobContext,
        input: &TickInput<'_>,
        participant: &ParticipantState,
    ) -> Result<ParticipantOutcome, TickError> {
        participant
            .validate()
            .map_err(|reason| TickError::MalformedParticipant {
                commons_id: participant.commons_id,
                user_id: participant.user_id,
                reason,
            })?;

        let user = self
            .store
            .get_user(participant.user_id)
            .await
            .map_err(|source| TickError::UserLookup {
                user_id: participant.user_id,
                source,
            })?
            .ok_or(TickError::UserNotFound {
                commons_id: participant.commons_id,
                user_id: participant.user_id,
            })?;

        let outcome = self
            .rules
            .apply_tick(input, participant)
            .map_err(|source| TickError::Rules {
                commons_id: participant.commons_id,
                user_id: participant.user_id,
                source,
            })?;
        if outcome.already_applied() {
            ctx.log(format!(
                "User: {} already ticked at {}, skipping",
                user.full_name, input.tick_at
            ))
            .await;
            return Ok(ParticipantOutcome::Skipped);
        }

        let saved = self
            .store
            .save_participant(&outcome.state)
            .await
            .map_err(|source| TickError::SaveFailed {
                commons_id: participant.commons_id,
                user_id: participant.user_id,
                source,
            })?;
        if saved == SaveOutcome::Stale {
            ctx.log(format!(
                "User: {} was already ticked by a newer run, skipping",
                user.full_name
            ))
            .await;
            return Ok(ParticipantOutcome::Skipped);
        }

        ctx.log(format!(
            "User: {}, numCows: {}, cowHealth: {} -> {}, wealth: {} -> {}",
            user.full_name,
            participant.num_cows,
            participant.cow_health,
            outcome.state.cow_health,
            participant.total_wealth,
            outcome.state.total_wealth
        ))
        .await;
        for event in &outcome.events {
            ctx.log(format!("  {}: {}", user.full_name, event)).await;
        }

        Ok(ParticipantOutcome::Saved {
            cows: participant.num_cows,
            milk_income: outcome.milk_income,
        })
    }
}

enum ParticipantOutcome {
    Saved { cows: u32, milk_income: Decimal },
    Skipped,
}

#[async_trait]
impl Job for SimulationTickJob {
    async fn run(&self, ctx: &JobContext) -> Result<(), Error> {
        self.tick(ctx).await?;
        Ok(())
    }
}
