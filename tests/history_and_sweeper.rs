mod common;

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use common::{harness, harness_with, register};
use phone_lifecycle::{
    lifecycle::replay_state,
    settings::LifecycleSettings,
    sweeper::sweep_expired_grace_periods,
    EventType, HistoryQuery, LifecycleError, NumberState, SweeperController,
};

#[tokio::test]
async fn history_is_newest_first_and_paginated() {
    let h = harness().await;
    let first = register(&h.service, "+15552000001", Some("org-a")).await;
    let second = register(&h.service, "+15552000002", Some("org-a")).await;
    h.service.executor.pool(&first.id, "churned", None).await.unwrap();
    h.service
        .executor
        .flag_for_release(&second.id, "idle", Some(30), None)
        .await
        .unwrap();

    let page = h
        .service
        .history
        .list(HistoryQuery {
            limit: Some(3),
            ..HistoryQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(page.entries.len(), 3);
    assert!(page.has_more);
    let kinds: Vec<EventType> = page.entries.iter().map(|entry| entry.event.event_type).collect();
    assert_eq!(
        kinds,
        vec![EventType::FlaggedForRelease, EventType::Pooled, EventType::Assigned]
    );
    assert_eq!(page.entries[0].raw_number, "+15552000002");
    assert!(page.entries.windows(2).all(|pair| pair[0].event.seq > pair[1].event.seq));

    let rest = h
        .service
        .history
        .list(HistoryQuery {
            limit: Some(3),
            offset: 3,
            ..HistoryQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(rest.entries.len(), 1);
    assert!(!rest.has_more);
    assert_eq!(rest.entries[0].event.phone_number_id, first.id);
}

#[tokio::test]
async fn history_filters_by_number_and_caps_page_size() {
    let h = harness().await;
    let first = register(&h.service, "+15552000003", Some("org-a")).await;
    register(&h.service, "+15552000004", Some("org-a")).await;
    h.service.executor.pool(&first.id, "churned", None).await.unwrap();

    let page = h
        .service
        .history
        .list(HistoryQuery {
            phone_number_id: Some(first.id.clone()),
            limit: Some(10_000),
            offset: 0,
        })
        .await
        .unwrap();
    assert_eq!(page.limit, 500);
    assert_eq!(page.entries.len(), 2);
    assert!(page.entries.iter().all(|entry| entry.event.phone_number_id == first.id));

    let zero = h
        .service
        .history
        .list(HistoryQuery {
            limit: Some(0),
            ..HistoryQuery::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(zero, LifecycleError::Validation(_)));
}

#[tokio::test]
async fn replaying_events_reproduces_current_state() {
    let h = harness().await;
    h.service
        .db
        .upsert_organization(&common::organization("org-b", "Bright"))
        .await
        .unwrap();
    let a = register(&h.service, "+15552000010", Some("org-a")).await;
    let b = register(&h.service, "+15552000011", Some("org-a")).await;
    let c = register(&h.service, "+15552000012", None).await;
    let d = register(&h.service, "+15552000013", Some("org-a")).await;

    h.service.executor.flag_for_release(&a.id, "idle", Some(30), None).await.unwrap();
    h.service.executor.pool(&b.id, "churned", None).await.unwrap();
    h.service.executor.reassign(&b.id, "org-b", "resold", None).await.unwrap();
    h.service.executor.reassign(&c.id, "org-b", "new", None).await.unwrap();
    h.service.executor.flag_for_release(&d.id, "idle", Some(30), None).await.unwrap();
    h.service.executor.release(&d.id, "expired", None).await.unwrap();

    for number in h.service.db.list_phone_numbers(&[]).await.unwrap() {
        let events = h.service.history.timeline(&number.id).await.unwrap();
        assert_eq!(replay_state(&events), Some(number.state), "{}", number.raw_number);
        assert_eq!(
            h.service.history.replayed_state(&number.id).await.unwrap(),
            Some(number.state)
        );
    }
}

#[tokio::test]
async fn timeline_of_unknown_number_is_not_found() {
    let h = harness().await;
    let err = h.service.history.timeline("missing").await.unwrap_err();
    assert!(matches!(err, LifecycleError::NotFound(_)));
}

#[tokio::test]
async fn event_log_rejects_updates_and_deletes() {
    let h = harness().await;
    register(&h.service, "+15552000020", Some("org-a")).await;

    let update = h
        .service
        .db
        .execute(|conn| {
            conn.execute("UPDATE phone_assignment_events SET reason = 'rewritten'", [])?;
            Ok(())
        })
        .await
        .unwrap_err();
    assert!(format!("{update:#}").contains("append-only"));

    let delete = h
        .service
        .db
        .execute(|conn| {
            conn.execute("DELETE FROM phone_assignment_events", [])?;
            Ok(())
        })
        .await
        .unwrap_err();
    assert!(format!("{delete:#}").contains("append-only"));
}

#[tokio::test]
async fn sweep_releases_only_expired_grace_numbers() {
    let h = harness().await;
    let short = register(&h.service, "+15552000030", Some("org-a")).await;
    let long = register(&h.service, "+15552000031", Some("org-a")).await;
    let executor = &h.service.executor;
    executor.flag_for_release(&short.id, "idle", Some(1), None).await.unwrap();
    executor.flag_for_release(&long.id, "idle", Some(30), None).await.unwrap();

    let later = Utc::now() + ChronoDuration::days(2);
    let report = sweep_expired_grace_periods(executor, &h.service.db, "grace_period_expired", later)
        .await
        .unwrap();

    assert_eq!(report.expired, 1);
    assert_eq!(report.released, vec![short.id.clone()]);
    assert!(report.failed.is_empty());

    let released = h.service.db.get_phone_number(&short.id).await.unwrap().unwrap();
    assert_eq!(released.state, NumberState::Released);
    assert_eq!(released.release_reason.as_deref(), Some("grace_period_expired"));
    let events = h.service.history.timeline(&short.id).await.unwrap();
    let release = events
        .iter()
        .find(|event| event.event_type == EventType::Released)
        .unwrap();
    assert_eq!(release.performed_by, None);

    let untouched = h.service.db.get_phone_number(&long.id).await.unwrap().unwrap();
    assert_eq!(untouched.state, NumberState::GracePeriod);
}

#[tokio::test]
async fn sweep_keeps_numbers_in_grace_when_provider_fails() {
    let h = harness().await;
    let number = register(&h.service, "+15552000032", Some("org-a")).await;
    h.service
        .executor
        .flag_for_release(&number.id, "idle", Some(1), None)
        .await
        .unwrap();
    h.provider.set_failing(true);

    let later = Utc::now() + ChronoDuration::days(2);
    let report = sweep_expired_grace_periods(&h.service.executor, &h.service.db, "expired", later)
        .await
        .unwrap();

    assert!(report.released.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].error_kind, "provider");
    assert!(report.failed[0].retryable);
    let current = h.service.db.get_phone_number(&number.id).await.unwrap().unwrap();
    assert_eq!(current.state, NumberState::GracePeriod);
}

#[tokio::test]
async fn sweeper_controller_runs_until_stopped() {
    let mut settings = LifecycleSettings::default();
    settings.sweeper.interval_secs = 1;
    let h = harness_with(settings).await;
    let number = register(&h.service, "+15552000040", Some("org-a")).await;
    h.service
        .executor
        .flag_for_release(&number.id, "idle", Some(1), None)
        .await
        .unwrap();
    let id = number.id.clone();
    h.service
        .db
        .execute(move |conn| {
            conn.execute(
                "UPDATE phone_numbers SET grace_period_ends_at = '2020-01-01T00:00:00.000000Z'
                 WHERE id = ?1",
                [&id],
            )?;
            Ok(())
        })
        .await
        .unwrap();

    let mut controller = SweeperController::new();
    h.service.start_sweeper(&mut controller).unwrap();
    assert!(controller.is_running());
    assert!(h.service.start_sweeper(&mut controller).is_err());

    // The first tick fires immediately.
    tokio::time::sleep(Duration::from_millis(500)).await;
    controller.stop().await.unwrap();
    assert!(!controller.is_running());

    let current = h.service.db.get_phone_number(&number.id).await.unwrap().unwrap();
    assert_eq!(current.state, NumberState::Released);
    assert_eq!(h.provider.calls(), 1);
}

#[tokio::test]
async fn disabled_sweeper_does_not_start() {
    let mut settings = LifecycleSettings::default();
    settings.sweeper.enabled = false;
    let h = harness_with(settings).await;

    let mut controller = SweeperController::new();
    h.service.start_sweeper(&mut controller).unwrap();
    assert!(!controller.is_running());
}

#[tokio::test]
async fn service_refuses_a_blank_sweep_reason() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = LifecycleSettings::default();
    settings.sweeper.release_reason = String::new();

    let result = phone_lifecycle::LifecycleService::open(
        dir.path().join("ledger.sqlite3"),
        settings,
        std::sync::Arc::new(common::MockProvider::default()),
    )
    .await;
    assert!(result.is_err());
}
