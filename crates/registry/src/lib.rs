/*
 * SPDX-FileCopyrightText: 2025 Halcyon Groupware Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

pub mod source;

pub use source::{CalendarSource, SourceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemKind {
    Event,
    Task,
    Memo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FolderKind {
    Regular,
    Sent,
    Drafts,
    Outbox,
    Junk,
    Trash,
}

/// A configured mail identity, with the extra addresses mail for this
/// identity may arrive on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Identity {
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EngineOptions {
    /// Delete the invitation message once it has been processed.
    #[serde(default)]
    pub delete_processed: bool,
    /// Attach the default reminder to accepted events that carry none.
    #[serde(default)]
    pub default_reminder: bool,
}

/// Explicitly injected engine context: identities, calendar sources and
/// options. Callers construct one per account setup and hand it to the
/// engine; nothing here is read from process-global state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    pub identities: Vec<Identity>,
    pub sources: Vec<CalendarSource>,
    #[serde(default)]
    pub options: EngineOptions,
}

impl Registry {
    pub fn parse(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Enabled sources holding items of the given kind, in configuration
    /// order.
    pub fn sources_for(&self, kind: ItemKind) -> impl Iterator<Item = &CalendarSource> + '_ {
        self.sources
            .iter()
            .filter(move |source| source.enabled && source.kind == kind)
    }

    pub fn source(&self, id: &SourceId) -> Option<&CalendarSource> {
        self.sources.iter().find(|source| &source.id == id)
    }

    pub fn default_source(&self, kind: ItemKind) -> Option<&CalendarSource> {
        self.sources_for(kind).find(|source| source.is_default)
    }

    /// All addresses the account owner may appear under, lowercased.
    pub fn own_addresses(&self) -> Vec<String> {
        let mut addresses = Vec::with_capacity(self.identities.len());
        for identity in &self.identities {
            addresses.push(identity.address.to_lowercase());
            for alias in &identity.aliases {
                addresses.push(alias.to_lowercase());
            }
        }
        addresses
    }

    pub fn identity_matching(&self, address: &str) -> Option<&Identity> {
        self.identities.iter().find(|identity| identity.covers(address))
    }

    /// Source display names keyed by id, for rendering lookup results.
    pub fn source_names(&self) -> AHashMap<SourceId, String> {
        self.sources
            .iter()
            .map(|source| (source.id.clone(), source.name.clone()))
            .collect()
    }
}

impl Identity {
    pub fn covers(&self, address: &str) -> bool {
        self.address.eq_ignore_ascii_case(address)
            || self
                .aliases
                .iter()
                .any(|alias| alias.eq_ignore_ascii_case(address))
    }
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Event => "event",
            ItemKind::Task => "task",
            ItemKind::Memo => "memo",
        }
    }

    /// The container label used in user-facing messages.
    pub fn container_label(&self) -> &'static str {
        match self {
            ItemKind::Event => "calendar",
            ItemKind::Task => "task list",
            ItemKind::Memo => "memo list",
        }
    }
}

impl FolderKind {
    /// Invitations shown from these folders were sent or discarded by the
    /// user and must not offer response actions.
    pub fn suppresses_actions(&self) -> bool {
        matches!(
            self,
            FolderKind::Sent | FolderKind::Drafts | FolderKind::Outbox | FolderKind::Junk | FolderKind::Trash
        )
    }
}

impl Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
