/*
 * SPDX-FileCopyrightText: 2025 Halcyon Groupware Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use super::{Backend, Opener, registry, runtime, stored_event, UID};
use itip::lookup::{CalendarMatch, LookupEngine, LookupRequest};
use registry::{ItemKind, Registry, SourceId};
use std::sync::Arc;
use tokio::sync::watch;

fn request() -> LookupRequest {
    LookupRequest {
        kind: ItemKind::Event,
        uid: UID.to_string(),
        recurrence_id: None,
        range: Some((1770000000, 1770003600)),
        account: None,
        with_conflicts: false,
    }
}

async fn find(backend: &Arc<Backend>, registry: &Registry, request: &LookupRequest) -> CalendarMatch {
    let (_cancel, rx) = watch::channel(false);
    LookupEngine::new(Arc::new(Opener(backend.clone())))
        .find_current(registry, request, rx)
        .await
}

#[test]
fn winner_follows_configuration_order() {
    runtime().block_on(async {
        let backend = Arc::new(Backend::default());
        backend.put("work", UID, None, &stored_event(1));
        backend.put("home", UID, None, &stored_event(4));
        let registry = registry();

        let result = find(&backend, &registry, &request()).await;
        let current = result.current.unwrap();
        assert_eq!(current.source, SourceId::new("work"));
        assert_eq!(current.sequence, Some(1));
        assert!(!current.exact_instance);
        assert_eq!(
            result.writable,
            vec![SourceId::new("work"), SourceId::new("home")]
        );
        assert!(result.failures.is_empty());
        assert!(!result.cancelled);
    })
}

#[test]
fn account_sources_are_probed_first() {
    runtime().block_on(async {
        let backend = Arc::new(Backend::default());
        backend.put("work", UID, None, &stored_event(1));
        backend.put("corp", UID, None, &stored_event(2));
        let mut registry = registry();
        registry.sources.push(super::source("corp", "Corporate", ItemKind::Event));
        registry.sources.last_mut().unwrap().account = Some("corp-account".to_string());

        let mut req = request();
        req.account = Some("corp-account".to_string());
        let result = find(&backend, &registry, &req).await;
        assert_eq!(result.current.unwrap().source, SourceId::new("corp"));

        req.account = None;
        let result = find(&backend, &registry, &req).await;
        assert_eq!(result.current.unwrap().source, SourceId::new("work"));
    })
}

#[test]
fn read_only_sources_are_skipped_entirely() {
    runtime().block_on(async {
        let backend = Arc::new(Backend::default());
        backend.put("work", UID, None, &stored_event(3));
        backend.set_busy("work", 2);
        backend.set_read_only("work");
        let registry = registry();

        let mut req = request();
        req.with_conflicts = true;
        let result = find(&backend, &registry, &req).await;
        assert!(result.current.is_none());
        assert!(result.conflicts.is_empty());
        assert_eq!(result.writable, vec![SourceId::new("home")]);
    })
}

#[test]
fn failing_sources_are_reported_not_fatal() {
    runtime().block_on(async {
        let backend = Arc::new(Backend::default());
        backend.put("home", UID, None, &stored_event(1));
        backend.refuse_open("work");
        let registry = registry();

        let result = find(&backend, &registry, &request()).await;
        assert_eq!(result.current.unwrap().source, SourceId::new("home"));
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].name, "Work");
        assert_eq!(result.writable, vec![SourceId::new("home")]);
    })
}

#[test]
fn conflicts_only_from_opted_in_sources() {
    runtime().block_on(async {
        let backend = Arc::new(Backend::default());
        backend.set_busy("work", 2);
        backend.set_busy("home", 3);
        let registry = registry();

        let mut req = request();
        req.with_conflicts = true;
        let result = find(&backend, &registry, &req).await;
        // Only "Work" has conflict_search enabled.
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].source, SourceId::new("work"));
        assert_eq!(result.conflicts[0].count, 2);

        req.with_conflicts = false;
        let result = find(&backend, &registry, &req).await;
        assert!(result.conflicts.is_empty());
    })
}

#[test]
fn exact_instance_preferred_over_the_master() {
    runtime().block_on(async {
        let backend = Arc::new(Backend::default());
        backend.put("work", UID, None, &stored_event(1));
        backend.put("work", UID, Some(1770000000), &stored_event(1));
        let registry = registry();

        let mut req = request();
        req.recurrence_id = Some(1770000000);
        let result = find(&backend, &registry, &req).await;
        assert!(result.current.unwrap().exact_instance);

        // An unknown instance falls back to the series master.
        req.recurrence_id = Some(9999);
        let result = find(&backend, &registry, &req).await;
        assert!(!result.current.unwrap().exact_instance);
    })
}

#[test]
fn stored_sequence_is_the_highest_component_revision() {
    runtime().block_on(async {
        let backend = Arc::new(Backend::default());
        let raw = super::ics(&[
            "BEGIN:VCALENDAR",
            "VERSION:2.0",
            "BEGIN:VEVENT",
            &format!("UID:{UID}"),
            "SEQUENCE:3",
            "DTSTAMP:20260301T090000Z",
            "DTSTART:20260309T090000Z",
            "RRULE:FREQ=DAILY;COUNT=5",
            "END:VEVENT",
            "BEGIN:VEVENT",
            &format!("UID:{UID}"),
            "SEQUENCE:4",
            "RECURRENCE-ID:20260311T090000Z",
            "DTSTAMP:20260301T090000Z",
            "DTSTART:20260311T100000Z",
            "END:VEVENT",
            "END:VCALENDAR",
        ]);
        backend.put("work", UID, None, &raw);
        let registry = registry();

        let result = find(&backend, &registry, &request()).await;
        assert_eq!(result.current.unwrap().sequence, Some(4));
    })
}

#[test]
fn cancellation_short_circuits_the_fan_out() {
    runtime().block_on(async {
        let backend = Arc::new(Backend::default());
        backend.put("work", UID, None, &stored_event(1));
        let registry = registry();

        let (cancel, rx) = watch::channel(false);
        cancel.send(true).unwrap();
        let result = LookupEngine::new(Arc::new(Opener(backend.clone())))
            .find_current(&registry, &request(), rx)
            .await;
        assert!(result.cancelled);
        assert!(result.current.is_none());
        assert!(result.writable.is_empty());
    })
}

#[test]
fn dropped_cancel_handle_does_not_cancel() {
    runtime().block_on(async {
        let backend = Arc::new(Backend::default());
        backend.put("work", UID, None, &stored_event(1));
        let registry = registry();

        let (cancel, rx) = watch::channel(false);
        drop(cancel);
        let result = LookupEngine::new(Arc::new(Opener(backend)))
            .find_current(&registry, &request(), rx)
            .await;
        assert!(!result.cancelled);
        assert!(result.current.is_some());
    })
}

#[test]
fn disabled_sources_are_never_probed() {
    runtime().block_on(async {
        let backend = Arc::new(Backend::default());
        backend.put("work", UID, None, &stored_event(1));
        let mut registry = registry();
        registry
            .sources
            .iter_mut()
            .find(|source| source.id == SourceId::new("work"))
            .unwrap()
            .enabled = false;

        let result = find(&backend, &registry, &request()).await;
        assert!(result.current.is_none());
        assert_eq!(result.writable, vec![SourceId::new("home")]);
    })
}
