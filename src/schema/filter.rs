//! Filter Selection Model
//!
//! Holds the discovered filter sets, the user's per-option selection and any
//! number of panels. A panel binds to a set *by name* and is resolved at read
//! time, so a panel whose set disappeared simply shows nothing.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Name of the measurement dimension
pub const MEASUREMENT_SET: &str = "_measurement";
/// Name of the field dimension
pub const FIELD_SET: &str = "_field";
/// Name of the synthetic set carrying catalog load errors
pub const LOAD_ERROR_SET: &str = "load_error";

/// One selectable schema value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterOption {
    value: String,
    pub selected: bool,
}

impl FilterOption {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            selected: false,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// One discovered schema dimension and its values
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterSet {
    name: String,
    options: Vec<FilterOption>,
    #[serde(skip)]
    synthetic: bool,
}

impl FilterSet {
    /// Build a set from raw values; options come out sorted (byte order) and deduplicated
    pub fn new<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let unique: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        Self {
            name: name.into(),
            options: unique.into_iter().map(FilterOption::new).collect(),
            synthetic: false,
        }
    }

    /// The synthetic set used to surface catalog errors through the normal data path
    pub fn load_error(message: impl Into<String>) -> Self {
        Self {
            name: LOAD_ERROR_SET.to_string(),
            options: vec![FilterOption::new(message)],
            synthetic: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &[FilterOption] {
        &self.options
    }

    /// Only sets built by [`FilterSet::load_error`] are synthetic
    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    pub fn selected_values(&self) -> impl Iterator<Item = &str> {
        self.options
            .iter()
            .filter(|o| o.selected)
            .map(FilterOption::value)
    }

    pub fn has_selection(&self) -> bool {
        self.options.iter().any(|o| o.selected)
    }

    fn option_mut(&mut self, value: &str) -> Option<&mut FilterOption> {
        self.options.iter_mut().find(|o| o.value == value)
    }
}

/// Stable handle to a panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PanelId(u64);

impl fmt::Display for PanelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panel-{}", self.0)
    }
}

/// A view onto one filter set, with its own search text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterPanel {
    pub id: PanelId,
    pub bound_name: String,
    pub search_text: String,
}

/// Errors from panel and selection operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("No filter sets have been discovered")]
    NoFilterSets,

    #[error("Panel not found: {0}")]
    PanelNotFound(PanelId),
}

/// All filter sets, the names offered for panel binding, and the panels
#[derive(Debug, Default)]
pub struct FilterModel {
    sets: Vec<FilterSet>,
    available_names: Vec<String>,
    panels: Vec<FilterPanel>,
    next_panel_id: u64,
}

impl FilterModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the catalog with freshly discovered sets.
    ///
    /// Available names are rebuilt from the discovered sets in discovery order.
    /// A trailing `load_error` set is appended when `error` is present; it is
    /// visible as data but not offered as a panel binding.
    pub fn install(&mut self, sets: Vec<FilterSet>, error: Option<String>) {
        self.sets = sets;
        self.panels.clear();
        self.available_names = self.sets.iter().map(|s| s.name.clone()).collect();

        if let Some(message) = error {
            self.sets.push(FilterSet::load_error(message));
        }

        self.ensure_panel();
    }

    /// Drop every set and panel
    pub fn clear(&mut self) {
        self.sets.clear();
        self.available_names.clear();
        self.panels.clear();
    }

    pub fn sets(&self) -> &[FilterSet] {
        &self.sets
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn available_names(&self) -> &[String] {
        &self.available_names
    }

    pub fn panels(&self) -> &[FilterPanel] {
        &self.panels
    }

    pub fn panel(&self, id: PanelId) -> Option<&FilterPanel> {
        self.panels.iter().find(|p| p.id == id)
    }

    /// Look a set up by its exact name (tag keys are case-sensitive)
    pub fn set(&self, name: &str) -> Option<&FilterSet> {
        self.sets.iter().find(|s| s.name == name)
    }

    fn set_mut(&mut self, name: &str) -> Option<&mut FilterSet> {
        self.sets.iter_mut().find(|s| s.name == name)
    }

    /// Set a panel binding resolves to: the exact name, else the only
    /// case-insensitive match
    fn bound_set(&self, name: &str) -> Option<&FilterSet> {
        if let Some(set) = self.set(name) {
            return Some(set);
        }
        let mut matches = self.sets.iter().filter(|s| s.name.eq_ignore_ascii_case(name));
        match (matches.next(), matches.next()) {
            (Some(set), None) => Some(set),
            _ => None,
        }
    }

    /// Whether any real (non-synthetic) option is selected
    pub fn has_selection(&self) -> bool {
        self.sets
            .iter()
            .filter(|s| !s.is_synthetic())
            .any(FilterSet::has_selection)
    }

    /// Set an option's selection; returns false when the set or value is unknown
    pub fn select(&mut self, set_name: &str, value: &str, selected: bool) -> bool {
        match self.set_mut(set_name).and_then(|s| s.option_mut(value)) {
            Some(option) => {
                option.selected = selected;
                true
            }
            None => false,
        }
    }

    /// Flip an option's selection; returns the new state
    pub fn toggle(&mut self, set_name: &str, value: &str) -> Option<bool> {
        let option = self.set_mut(set_name)?.option_mut(value)?;
        option.selected = !option.selected;
        Some(option.selected)
    }

    /// Deselect everything
    pub fn clear_selection(&mut self) {
        for option in self.sets.iter_mut().flat_map(|s| s.options.iter_mut()) {
            option.selected = false;
        }
    }

    /// Options of the panel's bound set that match its search text.
    ///
    /// The match is a trimmed, case-insensitive substring test. An unknown panel
    /// or a binding to an absent set yields an empty view.
    pub fn visible_options(&self, id: PanelId) -> Vec<&FilterOption> {
        let Some(panel) = self.panel(id) else {
            return Vec::new();
        };
        let Some(set) = self.bound_set(&panel.bound_name) else {
            return Vec::new();
        };

        let needle = panel.search_text.trim().to_lowercase();
        if needle.is_empty() {
            return set.options.iter().collect();
        }

        set.options
            .iter()
            .filter(|o| o.value.to_lowercase().contains(&needle))
            .collect()
    }

    /// Append a panel bound to the first available name
    pub fn add_panel(&mut self) -> Result<PanelId, FilterError> {
        if self.sets.is_empty() {
            return Err(FilterError::NoFilterSets);
        }
        Ok(self.push_default_panel())
    }

    /// Remove a panel; refused for the last remaining panel or an unknown id
    pub fn remove_panel(&mut self, id: PanelId) -> bool {
        if self.panels.len() <= 1 {
            return false;
        }
        match self.panels.iter().position(|p| p.id == id) {
            Some(idx) => {
                self.panels.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Rebind a panel to another set name
    pub fn bind_panel(&mut self, id: PanelId, name: &str) -> Result<(), FilterError> {
        let panel = self.panel_mut(id)?;
        panel.bound_name = name.to_string();
        Ok(())
    }

    pub fn set_search_text(&mut self, id: PanelId, text: &str) -> Result<(), FilterError> {
        let panel = self.panel_mut(id)?;
        panel.search_text = text.to_string();
        Ok(())
    }

    fn panel_mut(&mut self, id: PanelId) -> Result<&mut FilterPanel, FilterError> {
        self.panels
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(FilterError::PanelNotFound(id))
    }

    fn ensure_panel(&mut self) {
        if self.panels.is_empty() && !self.sets.is_empty() {
            self.push_default_panel();
        }
    }

    fn push_default_panel(&mut self) -> PanelId {
        let id = PanelId(self.next_panel_id);
        self.next_panel_id += 1;
        self.panels.push(FilterPanel {
            id,
            bound_name: self.available_names.first().cloned().unwrap_or_default(),
            search_text: String::new(),
        });
        id
    }
}
