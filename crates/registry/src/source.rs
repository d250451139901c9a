/*
 * SPDX-FileCopyrightText: 2025 Halcyon Groupware Project
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::ItemKind;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub String);

/// A configured calendar, task list or memo list backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CalendarSource {
    pub id: SourceId,
    pub name: String,
    pub kind: ItemKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Include this source when searching for conflicting events.
    #[serde(default)]
    pub conflict_search: bool,
    /// Offer this source when an invitation has no stored copy anywhere.
    #[serde(default)]
    pub is_default: bool,
    /// Mail account this source belongs to, when it mirrors a
    /// groupware account inbox.
    #[serde(default)]
    pub account: Option<String>,
}

fn default_true() -> bool {
    true
}

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        SourceId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl CalendarSource {
    pub fn belongs_to_account(&self, account: &str) -> bool {
        self.account
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case(account))
    }
}
