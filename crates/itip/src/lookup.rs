/*
 * SPDX-FileCopyrightText: 2025 Halcyon Groupware Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::{
    backend::{CAP_UNACCEPTED_MEETINGS, CalendarClient, ClientOpener, TimeRangeQuery},
    error::LookupFailure,
};
use calcard::icalendar::{ICalendar, ICalendarProperty};
use registry::{CalendarSource, ItemKind, Registry, SourceId};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// What to search for across the configured sources.
#[derive(Debug, Clone)]
pub struct LookupRequest {
    pub kind: ItemKind,
    pub uid: String,
    pub recurrence_id: Option<i64>,
    /// Invitation time range, when known; enables the busy search.
    pub range: Option<(i64, i64)>,
    /// Mail account the message arrived on; its sources are probed first.
    pub account: Option<String>,
    /// Search for conflicting events alongside the stored copy.
    pub with_conflicts: bool,
}

/// The stored copy backing an invitation, kept as a defensive snapshot.
#[derive(Debug, Clone)]
pub struct StoredCopy {
    pub source: SourceId,
    pub document: ICalendar,
    pub sequence: Option<i64>,
    /// The requested recurrence instance itself was found, not just the
    /// series master.
    pub exact_instance: bool,
    /// The holding source tracks unaccepted items, so declining a stored
    /// memo is meaningful.
    pub unaccepted_meetings: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictInfo {
    pub source: SourceId,
    pub name: String,
    pub count: usize,
}

/// Consolidated result of one fan-out. Emitted exactly once per lookup,
/// cancelled or not.
#[derive(Debug, Clone, Default)]
pub struct CalendarMatch {
    pub current: Option<StoredCopy>,
    pub conflicts: Vec<ConflictInfo>,
    /// Sources that answered and accept writes, in configuration order.
    pub writable: Vec<SourceId>,
    pub failures: Vec<LookupFailure>,
    pub cancelled: bool,
}

struct ProbeOutcome {
    source: SourceId,
    name: String,
    document: Option<ICalendar>,
    exact_instance: bool,
    unaccepted_meetings: bool,
    writable: bool,
    conflicts: usize,
    failure: Option<String>,
}

pub struct LookupEngine {
    opener: Arc<dyn ClientOpener>,
}

impl LookupEngine {
    pub fn new(opener: Arc<dyn ClientOpener>) -> Self {
        LookupEngine { opener }
    }

    /// Probes every enabled source of the requested kind concurrently and
    /// consolidates the answers. The current copy is the first successful
    /// fetch in source order, so the outcome does not depend on which
    /// backend answered first; sources of the receiving account are
    /// ordered to the front.
    pub async fn find_current(
        &self,
        registry: &Registry,
        request: &LookupRequest,
        mut cancel: watch::Receiver<bool>,
    ) -> CalendarMatch {
        let sources = ordered_sources(registry, request);
        debug!(
            uid = request.uid.as_str(),
            sources = sources.len(),
            "calendar lookup started"
        );

        let probes = sources
            .iter()
            .map(|source| self.probe(source, request))
            .collect::<Vec<_>>();

        // Biased so a token signalled before the fan-out starts always
        // wins over probes that complete immediately.
        let outcomes = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => {
                debug!(uid = request.uid.as_str(), "calendar lookup cancelled");
                return CalendarMatch {
                    cancelled: true,
                    ..Default::default()
                };
            }
            outcomes = futures::future::join_all(probes) => outcomes,
        };

        let mut result = CalendarMatch::default();
        for outcome in outcomes {
            if let Some(message) = outcome.failure {
                warn!(
                    source = outcome.source.as_str(),
                    message = message.as_str(),
                    "calendar source failed during lookup"
                );
                result.failures.push(LookupFailure {
                    source_id: outcome.source,
                    name: outcome.name,
                    message,
                });
                continue;
            }
            if outcome.writable {
                result.writable.push(outcome.source.clone());
            }
            if outcome.conflicts > 0 {
                result.conflicts.push(ConflictInfo {
                    source: outcome.source.clone(),
                    name: outcome.name.clone(),
                    count: outcome.conflicts,
                });
            }
            if result.current.is_none()
                && let Some(document) = outcome.document
            {
                let sequence = stored_sequence(&document, &request.uid);
                result.current = Some(StoredCopy {
                    source: outcome.source,
                    document,
                    sequence,
                    exact_instance: outcome.exact_instance,
                    unaccepted_meetings: outcome.unaccepted_meetings,
                });
            }
        }

        debug!(
            uid = request.uid.as_str(),
            found = result.current.is_some(),
            conflicts = result.conflicts.len(),
            "calendar lookup finished"
        );
        result
    }

    async fn probe(&self, source: &CalendarSource, request: &LookupRequest) -> ProbeOutcome {
        let mut outcome = ProbeOutcome {
            source: source.id.clone(),
            name: source.name.clone(),
            document: None,
            exact_instance: false,
            unaccepted_meetings: false,
            writable: false,
            conflicts: 0,
            failure: None,
        };

        let client = match self.opener.open(&source.id).await {
            Ok(client) => client,
            Err(err) => {
                outcome.failure = Some(err.to_string());
                return outcome;
            }
        };

        let read_only = match client.is_read_only().await {
            Ok(read_only) => read_only,
            Err(err) => {
                outcome.failure = Some(err.to_string());
                return outcome;
            }
        };
        if read_only {
            // A read-only copy must never become the commit target, so
            // the source is not queried at all.
            return outcome;
        }
        outcome.writable = true;

        match fetch_copy(client.as_ref(), request).await {
            Ok(Some((document, exact_instance))) => {
                outcome.document = Some(document);
                outcome.exact_instance = exact_instance;
                if request.kind == ItemKind::Memo {
                    outcome.unaccepted_meetings =
                        client.has_capability(CAP_UNACCEPTED_MEETINGS).await;
                }
            }
            Ok(None) => {}
            Err(err) => {
                outcome.failure = Some(err.to_string());
                return outcome;
            }
        }

        if request.with_conflicts
            && source.conflict_search
            && request.kind == ItemKind::Event
            && let Some((start, end)) = request.range
        {
            let query = TimeRangeQuery {
                start,
                end,
                exclude_uid: request.uid.clone(),
            };
            match client.get_objects_in_range(&query).await {
                Ok(objects) => outcome.conflicts = objects.len(),
                Err(err) => {
                    // Busy search failing does not invalidate the fetch.
                    warn!(
                        source = source.id.as_str(),
                        message = err.to_string().as_str(),
                        "busy search failed"
                    );
                }
            }
        }

        outcome
    }
}

async fn fetch_copy(
    client: &dyn CalendarClient,
    request: &LookupRequest,
) -> crate::backend::BackendResult<Option<(ICalendar, bool)>> {
    if let Some(recurrence_id) = request.recurrence_id {
        if let Some(document) = client.get_object(&request.uid, Some(recurrence_id)).await? {
            return Ok(Some((document, true)));
        }
    }
    Ok(client
        .get_object(&request.uid, None)
        .await?
        .map(|document| (document, false)))
}

fn ordered_sources<'x>(registry: &'x Registry, request: &LookupRequest) -> Vec<&'x CalendarSource> {
    let mut sources: Vec<&CalendarSource> = registry.sources_for(request.kind).collect();
    if let Some(account) = request.account.as_deref() {
        sources.sort_by_key(|source| !source.belongs_to_account(account));
    }
    sources
}

/// Highest SEQUENCE across the stored components of the item, for the
/// staleness check against the incoming revision.
fn stored_sequence(document: &ICalendar, uid: &str) -> Option<i64> {
    document
        .components
        .iter()
        .filter(|comp| {
            comp.component_type.is_scheduling_object()
                && comp.uid().is_none_or(|comp_uid| comp_uid == uid)
        })
        .filter_map(|comp| {
            comp.entries.iter().find_map(|entry| {
                if entry.name == ICalendarProperty::Sequence {
                    entry.values.first().and_then(|v| v.as_integer())
                } else {
                    None
                }
            })
        })
        .max()
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            // Sender gone means nobody can cancel this lookup anymore.
            std::future::pending::<()>().await;
        }
    }
}
