/// Local dirtiness detection
/// Compares the full serialized edit surface against the value it had at mount time
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::{LockingError, Result};

/// The document form being edited
pub trait EditSurface {
    /// Serialize every field of the surface
    fn serialize(&self) -> Result<String>;

    /// Write one field; refused while the surface is disabled
    fn write_field(&mut self, name: &str, value: &str) -> Result<()>;

    fn set_enabled(&mut self, enabled: bool);

    fn is_enabled(&self) -> bool;
}

/// In-memory form with named fields kept in key order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormSurface {
    fields: BTreeMap<String, String>,
    #[serde(skip)]
    disabled: bool,
}

impl FormSurface {
    pub fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
            disabled: false,
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

impl Default for FormSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl EditSurface for FormSurface {
    fn serialize(&self) -> Result<String> {
        serde_json::to_string(&self.fields)
            .map_err(|e| LockingError::Serialization(e.to_string()))
    }

    fn write_field(&mut self, name: &str, value: &str) -> Result<()> {
        if self.disabled {
            return Err(LockingError::SurfaceLocked(format!(
                "cannot write field '{}'",
                name
            )));
        }
        self.fields.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.disabled = !enabled;
    }

    fn is_enabled(&self) -> bool {
        !self.disabled
    }
}

/// Tracks whether the edit surface differs from its baseline
#[derive(Debug, Clone, Default)]
pub struct DirtinessMonitor {
    baseline: Option<String>,
    dirty: bool,
}

impl DirtinessMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the clean state. Only the first call is accepted.
    pub fn capture_baseline(&mut self, surface: &impl EditSurface) -> Result<()> {
        if self.baseline.is_some() {
            return Err(LockingError::Baseline(
                "baseline already captured".to_string(),
            ));
        }
        self.baseline = Some(surface.serialize()?);
        self.dirty = false;
        Ok(())
    }

    /// Re-serialize the whole surface and compare with the baseline
    ///
    /// Without a baseline the surface counts as clean.
    pub fn recompute(&mut self, surface: &impl EditSurface) -> Result<bool> {
        let Some(baseline) = self.baseline.as_deref() else {
            return Ok(false);
        };
        let current = surface.serialize()?;
        self.dirty = current != baseline;
        debug!(dirty = self.dirty, "recomputed local dirtiness");
        Ok(self.dirty)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_surface_refuses_writes_when_disabled() {
        let mut form = FormSurface::new().with_field("title", "Draft");

        form.set_enabled(false);
        let result = form.write_field("title", "Changed");
        assert!(matches!(result, Err(LockingError::SurfaceLocked(_))));
        assert_eq!(form.field("title"), Some("Draft"));

        form.set_enabled(true);
        assert!(form.write_field("title", "Changed").is_ok());
        assert_eq!(form.field("title"), Some("Changed"));
    }

    #[test]
    fn test_dirty_follows_full_value() {
        let mut form = FormSurface::new().with_field("title", "Draft").with_field("body", "");
        let mut monitor = DirtinessMonitor::new();
        monitor.capture_baseline(&form).unwrap();

        assert!(!monitor.recompute(&form).unwrap());

        form.write_field("body", "hello").unwrap();
        assert!(monitor.recompute(&form).unwrap());
        assert!(monitor.is_dirty());

        // Typing back the original value makes the form clean again
        form.write_field("body", "").unwrap();
        assert!(!monitor.recompute(&form).unwrap());
    }

    #[test]
    fn test_new_field_counts_as_dirty() {
        let mut form = FormSurface::new().with_field("title", "Draft");
        let mut monitor = DirtinessMonitor::new();
        monitor.capture_baseline(&form).unwrap();

        form.write_field("slug", "draft").unwrap();
        assert!(monitor.recompute(&form).unwrap());
    }

    #[test]
    fn test_baseline_only_once() {
        let form = FormSurface::new();
        let mut monitor = DirtinessMonitor::new();

        assert!(monitor.capture_baseline(&form).is_ok());
        assert!(matches!(
            monitor.capture_baseline(&form),
            Err(LockingError::Baseline(_))
        ));
    }

    #[test]
    fn test_clean_without_baseline() {
        let mut form = FormSurface::new();
        let mut monitor = DirtinessMonitor::new();

        form.write_field("title", "x").unwrap();
        assert!(!monitor.recompute(&form).unwrap());
        assert!(!monitor.is_dirty());
    }
}
