//! The four orphan rules.
//!
//! Each rule is an independent predicate over one number and its external signals. They
//! are evaluated as a set: every rule runs and every match is reported.

use chrono::{DateTime, Duration, Utc};

use crate::{
    db::{NumberState, PhoneNumber},
    settings::ClassifierSettings,
    signals::{AgentSignals, OrganizationSignals},
};

use super::OrphanSignal;

pub struct RuleContext<'a> {
    pub number: &'a PhoneNumber,
    pub organization: Option<&'a OrganizationSignals>,
    pub agent: Option<&'a AgentSignals>,
    pub settings: &'a ClassifierSettings,
    pub now: DateTime<Utc>,
}

pub type OrphanRule = fn(&RuleContext<'_>) -> Option<OrphanSignal>;

pub const RULES: [OrphanRule; 4] = [
    canceled_subscription,
    inactive_org,
    deactivated_agent,
    grace_period,
];

fn whole_days(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_days().max(0)
}

pub fn canceled_subscription(ctx: &RuleContext<'_>) -> Option<OrphanSignal> {
    let organization = ctx.organization?;
    if !organization.subscription_status.is_terminal() {
        return None;
    }
    let days_since_canceled = organization
        .subscription_canceled_at
        .map(|canceled_at| whole_days(canceled_at, ctx.now))
        .unwrap_or(0);
    Some(OrphanSignal::CanceledSubscription { days_since_canceled })
}

pub fn inactive_org(ctx: &RuleContext<'_>) -> Option<OrphanSignal> {
    let organization = ctx.organization?;
    // Nobody ever logged in: measure from when the organization was created.
    let last_seen = organization.last_login().unwrap_or(organization.created_at);
    if ctx.now - last_seen <= Duration::days(ctx.settings.inactive_org_days) {
        return None;
    }
    Some(OrphanSignal::InactiveOrg {
        days_since_login: whole_days(last_seen, ctx.now),
    })
}

pub fn deactivated_agent(ctx: &RuleContext<'_>) -> Option<OrphanSignal> {
    let agent = ctx.agent?;
    if agent.is_active {
        return None;
    }
    if ctx.now - agent.updated_at <= Duration::days(ctx.settings.deactivated_agent_days) {
        return None;
    }
    Some(OrphanSignal::DeactivatedAgent {
        days_since_agent_update: whole_days(agent.updated_at, ctx.now),
    })
}

pub fn grace_period(ctx: &RuleContext<'_>) -> Option<OrphanSignal> {
    if ctx.number.state != NumberState::GracePeriod {
        return None;
    }
    let ends_at = ctx.number.grace_period_ends_at?;
    Some(OrphanSignal::GracePeriod {
        days_remaining: (ends_at - ctx.now).num_days().max(0),
    })
}

/// Runs every rule and keeps each match.
pub fn evaluate(ctx: &RuleContext<'_>) -> Vec<OrphanSignal> {
    RULES.iter().filter_map(|rule| rule(ctx)).collect()
}
