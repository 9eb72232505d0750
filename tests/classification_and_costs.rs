mod common;

use chrono::{Duration, Utc};
use common::{agent, canceled_organization, days_ago, harness, new_number, organization, Harness};
use phone_lifecycle::{
    lifecycle::commands::{flag_number_for_release, release_number},
    orphans::AnomalyKind,
    ActionRequest, EventType, NumberState, OrphanCategory, OrphanSignal, PhoneNumber,
};

struct Fleet {
    canceled: PhoneNumber,
    idle: PhoneNumber,
    dead_agent: PhoneNumber,
    healthy: PhoneNumber,
    spare: PhoneNumber,
    released: PhoneNumber,
    unknown_org: PhoneNumber,
    winding_down: PhoneNumber,
}

async fn register_priced(
    h: &Harness,
    raw_number: &str,
    organization_id: Option<&str>,
    agent_id: Option<&str>,
    monthly_cost_cents: i64,
) -> PhoneNumber {
    let mut number = new_number(raw_number, organization_id);
    number.agent_reference_id = agent_id.map(str::to_string);
    number.monthly_cost_cents = Some(monthly_cost_cents);
    h.service.executor.register_number(number, None).await.unwrap()
}

async fn seed_fleet(h: &Harness) -> Fleet {
    let db = &h.service.db;
    db.upsert_organization(&canceled_organization("org-canceled", "Closed Co", 10))
        .await
        .unwrap();
    let mut idle = organization("org-idle", "Quiet Dental");
    idle.members[0].last_login_at = Some(days_ago(30));
    db.upsert_organization(&idle).await.unwrap();
    db.upsert_organization(&organization("org-healthy", "Busy Law")).await.unwrap();
    db.upsert_agent(&agent("agent-off", "org-healthy", false, 20)).await.unwrap();
    db.upsert_agent(&agent("agent-on", "org-healthy", true, 20)).await.unwrap();

    let fleet = Fleet {
        canceled: register_priced(h, "+15551000001", Some("org-canceled"), None, 150).await,
        idle: register_priced(h, "+15551000002", Some("org-idle"), None, 300).await,
        dead_agent: register_priced(h, "+15551000003", Some("org-healthy"), Some("agent-off"), 200).await,
        healthy: register_priced(h, "+15551000004", Some("org-healthy"), Some("agent-on"), 150).await,
        spare: register_priced(h, "+15551000005", None, None, 150).await,
        released: register_priced(h, "+15551000006", Some("org-healthy"), None, 150).await,
        unknown_org: register_priced(h, "+15551000007", Some("org-healthy"), None, 100).await,
        winding_down: register_priced(h, "+15551000008", Some("org-healthy"), None, 120).await,
    };
    h.service
        .executor
        .flag_for_release(&fleet.winding_down.id, "downsizing", Some(30), None)
        .await
        .unwrap();
    // The owning organization was deleted upstream after the number was assigned.
    let orphaned_id = fleet.unknown_org.id.clone();
    db.execute(move |conn| {
        conn.execute(
            "UPDATE phone_numbers SET organization_id = 'org-missing' WHERE id = ?1",
            [&orphaned_id],
        )?;
        Ok(())
    })
    .await
    .unwrap();
    h.service
        .executor
        .release(&fleet.released.id, "customer request", None)
        .await
        .unwrap();
    fleet
}

#[tokio::test]
async fn classifier_reports_each_signal_with_its_measurement() {
    let h = harness().await;
    let fleet = seed_fleet(&h).await;

    let report = h.service.classifier.classify(Utc::now()).await.unwrap();

    let canceled = report.entry(&fleet.canceled.id).unwrap();
    assert_eq!(
        canceled.signals,
        vec![OrphanSignal::CanceledSubscription {
            days_since_canceled: 10
        }]
    );
    assert_eq!(canceled.org_name.as_deref(), Some("Closed Co"));

    let idle = report.entry(&fleet.idle.id).unwrap();
    assert_eq!(idle.signals, vec![OrphanSignal::InactiveOrg { days_since_login: 30 }]);

    let dead_agent = report.entry(&fleet.dead_agent.id).unwrap();
    assert_eq!(
        dead_agent.signals,
        vec![OrphanSignal::DeactivatedAgent {
            days_since_agent_update: 20
        }]
    );

    assert!(!report.entry(&fleet.healthy.id).unwrap().is_orphan());
    assert!(report.entry(&fleet.spare.id).is_none());
    assert!(report.entry(&fleet.released.id).is_none());

    let winding_down = report.entry(&fleet.winding_down.id).unwrap();
    assert_eq!(winding_down.state, NumberState::GracePeriod);
    assert!(matches!(
        winding_down.signals.as_slice(),
        [OrphanSignal::GracePeriod { days_remaining: 29 }]
    ));

    assert_eq!(report.orphan_count(), 4);
    assert_eq!(report.in_category(OrphanCategory::InactiveOrg).len(), 1);
    assert_eq!(report.in_category(OrphanCategory::GracePeriod).len(), 1);
    assert_eq!(report.summary.total_active, 5);
    assert_eq!(report.summary.total_grace_period, 1);
    assert_eq!(report.summary.total_pooled, 1);
    assert_eq!(report.summary.total_released, 1);
}

#[tokio::test]
async fn missing_organization_is_an_anomaly_not_a_failure() {
    let h = harness().await;
    let fleet = seed_fleet(&h).await;

    let report = h.service.classifier.classify(Utc::now()).await.unwrap();

    let entry = report.entry(&fleet.unknown_org.id).unwrap();
    assert!(entry.signals.is_empty());
    assert_eq!(entry.org_name, None);
    assert!(report.anomalies.iter().any(|anomaly| {
        anomaly.kind == AnomalyKind::MissingOrganization
            && anomaly.phone_number_id.as_deref() == Some(fleet.unknown_org.id.as_str())
    }));
}

#[tokio::test]
async fn grace_period_signal_counts_whole_days_left() {
    let h = harness().await;
    let fleet = seed_fleet(&h).await;
    let flagged = h
        .service
        .executor
        .flag_for_release(&fleet.healthy.id, "downsizing", Some(9), None)
        .await
        .unwrap();
    let ends_at = flagged.grace_period_ends_at.unwrap();

    let now = ends_at - Duration::days(9) + Duration::hours(1);
    let report = h.service.classifier.classify(now).await.unwrap();
    let entry = report.entry(&fleet.healthy.id).unwrap();
    assert_eq!(entry.state, NumberState::GracePeriod);
    assert_eq!(entry.signals, vec![OrphanSignal::GracePeriod { days_remaining: 8 }]);
    assert_eq!(report.summary.total_grace_period, 2);
}

#[tokio::test]
async fn cost_summary_totals_and_savings() {
    let h = harness().await;
    seed_fleet(&h).await;

    let summary = h.service.costs.summary(Utc::now()).await.unwrap();

    assert_eq!(summary.total_numbers, 8);
    assert_eq!(summary.active_numbers, 6);
    assert_eq!(summary.total_monthly_cost_cents, 1170);
    assert_eq!(summary.cost_by_state.get(&NumberState::Active), Some(&900));
    assert_eq!(summary.cost_by_state.get(&NumberState::Pooled), Some(&150));
    assert_eq!(summary.cost_by_state.get(&NumberState::GracePeriod), Some(&120));
    assert!(!summary.cost_by_state.contains_key(&NumberState::Released));
    // canceled (150) + idle (300) + deactivated agent (200) + in grace (120)
    assert_eq!(summary.potential_savings_cents, 770);

    let orgs: Vec<(&str, i64)> = summary
        .cost_by_org
        .iter()
        .map(|org| (org.organization_id.as_str(), org.monthly_cost_cents))
        .collect();
    assert_eq!(
        orgs,
        vec![
            ("org-healthy", 470),
            ("org-idle", 300),
            ("org-canceled", 150),
            ("org-missing", 100),
        ]
    );
    let healthy = &summary.cost_by_org[0];
    assert_eq!(healthy.number_count, 3);
    assert_eq!(healthy.org_name.as_deref(), Some("Busy Law"));
    assert_eq!(healthy.subscription_tier.as_deref(), Some("business"));
    assert_eq!(summary.cost_by_org[3].org_name, None);

}

#[tokio::test]
async fn reassigning_a_pooled_number_moves_its_cost() {
    let h = harness().await;
    let fleet = seed_fleet(&h).await;
    let before = h.service.costs.summary(Utc::now()).await.unwrap();

    h.service
        .executor
        .reassign(&fleet.spare.id, "org-idle", "expansion", None)
        .await
        .unwrap();
    let after = h.service.costs.summary(Utc::now()).await.unwrap();

    let idle_cost = |summary: &phone_lifecycle::CostSummary| {
        summary
            .cost_by_org
            .iter()
            .find(|org| org.organization_id == "org-idle")
            .map(|org| (org.number_count, org.monthly_cost_cents))
    };
    assert_eq!(idle_cost(&before), Some((1, 300)));
    assert_eq!(idle_cost(&after), Some((2, 450)));
    assert_eq!(after.cost_by_org[0].organization_id, "org-healthy");
    assert_eq!(after.cost_by_org[1].organization_id, "org-idle");
    assert_eq!(after.total_monthly_cost_cents, before.total_monthly_cost_cents);
    assert_eq!(after.cost_by_state.get(&NumberState::Pooled), Some(&0));
}

#[tokio::test]
async fn releasing_an_orphan_realises_its_savings() {
    let h = harness().await;
    let fleet = seed_fleet(&h).await;

    h.service
        .executor
        .release(&fleet.idle.id, "inactive customer", None)
        .await
        .unwrap();
    let summary = h.service.costs.summary(Utc::now()).await.unwrap();

    assert_eq!(summary.total_monthly_cost_cents, 870);
    assert_eq!(summary.potential_savings_cents, 470);
    assert!(summary
        .cost_by_org
        .iter()
        .all(|org| org.organization_id != "org-idle"));
}

#[tokio::test]
async fn empty_ledger_summarises_to_zero() {
    let h = harness().await;
    let summary = h.service.costs.summary(Utc::now()).await.unwrap();
    assert_eq!(summary.total_numbers, 0);
    assert_eq!(summary.total_monthly_cost_cents, 0);
    assert_eq!(summary.potential_savings_cents, 0);
    assert!(summary.cost_by_org.is_empty());
}

#[tokio::test]
async fn canceled_customer_number_walks_through_reclamation() {
    let h = harness().await;
    h.service
        .db
        .upsert_organization(&canceled_organization("org-gone", "Former Client", 10))
        .await
        .unwrap();
    let number = register_priced(&h, "+15551000100", Some("org-gone"), None, 150).await;

    let report = h.service.classifier.classify(Utc::now()).await.unwrap();
    assert_eq!(
        report.entry(&number.id).unwrap().signals,
        vec![OrphanSignal::CanceledSubscription {
            days_since_canceled: 10
        }]
    );

    let flagged = flag_number_for_release(
        &h.service.executor,
        ActionRequest {
            phone_number_id: number.id.clone(),
            reason: "admin_manual".into(),
            grace_days: Some(30),
            ..ActionRequest::default()
        },
    )
    .await;
    assert!(flagged.success, "{:?}", flagged.error);
    let flagged = flagged.phone_number.unwrap();
    assert_eq!(flagged.state, NumberState::GracePeriod);
    let ends_at = flagged.grace_period_ends_at.unwrap();
    let expected = Utc::now() + Duration::days(30);
    assert!((expected - ends_at).num_seconds().abs() < 5);

    let events = h.service.history.timeline(&number.id).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].event_type, EventType::FlaggedForRelease);
    assert_eq!(events[1].reason.as_deref(), Some("admin_manual"));

    h.provider.set_failing(true);
    let released = release_number(
        &h.service.executor,
        ActionRequest {
            phone_number_id: number.id.clone(),
            reason: "admin_manual".into(),
            ..ActionRequest::default()
        },
    )
    .await;
    assert!(!released.success);
    assert!(released.error.is_some());

    let current = h.service.db.get_phone_number(&number.id).await.unwrap().unwrap();
    assert_eq!(current.state, NumberState::GracePeriod);
    assert_eq!(current.grace_period_ends_at, Some(ends_at));
    assert_eq!(h.service.history.timeline(&number.id).await.unwrap().len(), 2);

    let report = h.service.classifier.classify(Utc::now()).await.unwrap();
    let entry = report.entry(&number.id).unwrap();
    assert!(entry.signal(OrphanCategory::CanceledSubscription).is_some());
    assert!(matches!(
        entry.signal(OrphanCategory::GracePeriod),
        Some(OrphanSignal::GracePeriod { days_remaining: 29 })
    ));
    let summary = h.service.costs.summary(Utc::now()).await.unwrap();
    assert_eq!(summary.potential_savings_cents, 150);
}
