// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable data model (spec.md §3): boards, cards, and the small value types
//! threaded through the runner.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A named collection of cards, optionally running an autopilot program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Board {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub cards: Vec<Card>,
    /// Source text of the autopilot program, if any.
    #[serde(default)]
    pub autopilot_source: Option<String>,
    /// Default state-mode for cards declaring `StateMode::Default`.
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub saved_at: Option<u64>,
    #[serde(default)]
    pub rules: Option<String>,
    #[serde(default)]
    pub board_code: Option<String>,
    #[serde(default)]
    pub board_ui: Option<String>,
}

impl Board {
    pub fn card(&self, name: &str) -> Option<&Card> {
        self.cards.iter().find(|c| c.name == name)
    }

    /// Authoritative state mode, per spec.md §9(b): `board.ephemeral` wins,
    /// `settings.ephemeral` is presentational only.
    pub fn is_ephemeral_by_default(&self) -> bool {
        self.ephemeral
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardType {
    Value,
    Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StateMode {
    #[default]
    Default,
    Ephemeral,
    NonEphemeral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Pre,
    Post,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: LinkType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigParamSpec {
    #[serde(rename = "type")]
    pub param_type: Option<String>,
    #[serde(default)]
    pub default_value: Option<serde_json::Value>,
    #[serde(default)]
    pub visible: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PresetOverride {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub config_params: Option<BTreeMap<String, ConfigParamSpec>>,
}

/// A unit of board logic: a *value* (derived datum) or an *action* (invoked code).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub name: String,
    #[serde(rename = "type")]
    pub card_type: CardType,
    #[serde(default)]
    pub rules_code: String,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub config_params: BTreeMap<String, ConfigParamSpec>,
    #[serde(default)]
    pub links: Vec<LinkSpec>,
    #[serde(default)]
    pub presets: BTreeMap<String, PresetOverride>,
    #[serde(default)]
    pub return_type: Option<String>,
    #[serde(default)]
    pub fallback_value: Option<serde_json::Value>,
    #[serde(default)]
    pub enable_return_custom_fallback: bool,
    #[serde(default)]
    pub response_key: Option<String>,
    #[serde(default)]
    pub persist_value: bool,
    #[serde(default)]
    pub keep_history: bool,
    #[serde(default)]
    pub history_retention_days: Option<u32>,
    #[serde(default)]
    pub state_mode: StateMode,
    #[serde(default)]
    pub chain_terminator: bool,
    #[serde(default)]
    pub request_approval: bool,
    #[serde(default)]
    pub approval_message: Option<String>,
    #[serde(default)]
    pub always_report_value: bool,
    #[serde(default)]
    pub suppress_reload: bool,
}

impl Card {
    /// Apply a named preset's overrides, producing the effective card used
    /// for an aliased invocation `card.preset` (spec.md §4.5 step 1).
    pub fn with_preset_applied(&self, preset_name: &str) -> Option<Card> {
        let preset = self.presets.get(preset_name)?;
        let mut effective = self.clone();
        if let Some(params) = &preset.config_params {
            for (name, spec) in params {
                effective.config_params.insert(name.clone(), spec.clone());
            }
        }
        Some(effective)
    }
}

/// Resolve an invocation name of the form `card` or `card.preset` into the
/// base card name and optional preset name.
pub fn split_aliased_name(name: &str) -> (&str, Option<&str>) {
    match name.split_once('.') {
        Some((base, preset)) => (base, Some(preset)),
        None => (name, None),
    }
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
