//! Extension descriptors.
//!
//! This module defines the validated description of one broker extension:
//! - `UnitRef`: opaque name of a compiled implementation unit
//! - `ExtensionDescriptor`: immutable identity, ordering and code references
//! - `DescriptorBuilder`: fluent accumulator with a single validating `build`
//!
//! Descriptors never touch the filesystem. Code units are only resolved to
//! bytes later, by [`crate::package::ExtensionPackager`].
//!
//! ```rust,ignore
//! use brokerlab::ExtensionDescriptor;
//!
//! let descriptor = ExtensionDescriptor::builder()
//!     .id("modifier-extension")
//!     .name("Modifier Extension")
//!     .version("1.0")
//!     .main_class("com.example.ModifierMain")
//!     .add_additional_class("com.example.PublishModifier")
//!     .build()?;
//! ```

use crate::error::{DescriptorField, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Unit Reference
// =============================================================================

/// Fully-qualified name of a compiled implementation unit (e.g.
/// `com.example.Main`).
///
/// The harness never loads or invokes units; it only records them and hands
/// them to a [`crate::package::UnitResolver`] when packaging.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitRef(String);

impl UnitRef {
    /// Creates a unit reference.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the fully-qualified name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the last dotted segment (`Main` for `com.example.Main`).
    pub fn simple_name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    /// Returns the namespace segments (`["com", "example"]`).
    pub fn namespace(&self) -> Vec<&str> {
        let mut segments: Vec<&str> = self.0.split('.').collect();
        segments.pop();
        segments
    }
}

impl From<&str> for UnitRef {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for UnitRef {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for UnitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Extension Descriptor
// =============================================================================

/// Validated, immutable description of one extension.
///
/// Created only through [`DescriptorBuilder::build`]. All fields are private
/// and exposed through getters, so a built descriptor cannot change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionDescriptor {
    id: String,
    name: String,
    version: String,
    priority: i32,
    start_priority: i32,
    disabled_on_startup: bool,
    main_class: UnitRef,
    additional_classes: Vec<UnitRef>,
}

impl ExtensionDescriptor {
    /// Returns a new builder with all defaults.
    pub fn builder() -> DescriptorBuilder {
        DescriptorBuilder::default()
    }

    /// Unique key of the extension within one broker.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable name, also the default readiness-marker token.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version string, opaque to the harness.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Evaluation-order hint.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Startup-order hint.
    pub fn start_priority(&self) -> i32 {
        self.start_priority
    }

    /// Whether the broker should load but not activate the extension.
    pub fn is_disabled_on_startup(&self) -> bool {
        self.disabled_on_startup
    }

    /// Entry-point unit.
    pub fn main_class(&self) -> &UnitRef {
        &self.main_class
    }

    /// Auxiliary units, in insertion order, duplicates kept.
    pub fn additional_classes(&self) -> &[UnitRef] {
        &self.additional_classes
    }
}

// =============================================================================
// Descriptor Builder
// =============================================================================

/// Fluent accumulator for [`ExtensionDescriptor`].
///
/// Setters never validate. [`build`](Self::build) consumes the builder, so
/// reusing it after building does not compile.
#[derive(Debug, Clone, Default)]
pub struct DescriptorBuilder {
    id: Option<String>,
    name: Option<String>,
    version: Option<String>,
    priority: i32,
    start_priority: i32,
    disabled_on_startup: bool,
    main_class: Option<UnitRef>,
    additional_classes: Vec<UnitRef>,
}

impl DescriptorBuilder {
    /// Sets the extension id.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the extension name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the extension version.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Sets the evaluation priority (default 0).
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the start priority (default 0).
    pub fn start_priority(mut self, start_priority: i32) -> Self {
        self.start_priority = start_priority;
        self
    }

    /// Marks the extension disabled on startup (default false).
    pub fn disabled_on_startup(mut self, disabled: bool) -> Self {
        self.disabled_on_startup = disabled;
        self
    }

    /// Sets the entry-point unit.
    pub fn main_class(mut self, unit: impl Into<UnitRef>) -> Self {
        self.main_class = Some(unit.into());
        self
    }

    /// Appends an auxiliary unit.
    pub fn add_additional_class(mut self, unit: impl Into<UnitRef>) -> Self {
        self.additional_classes.push(unit.into());
        self
    }

    /// Validates and produces the descriptor.
    ///
    /// Checks run in the order id, name, version, main class; the first
    /// violation is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDescriptor`] naming the first missing field.
    pub fn build(self) -> Result<ExtensionDescriptor> {
        let id = required(self.id, DescriptorField::Id)?;
        let name = required(self.name, DescriptorField::Name)?;
        let version = required(self.version, DescriptorField::Version)?;
        let main_class = self.main_class.ok_or(Error::InvalidDescriptor {
            field: DescriptorField::MainClass,
        })?;

        Ok(ExtensionDescriptor {
            id,
            name,
            version,
            priority: self.priority,
            start_priority: self.start_priority,
            disabled_on_startup: self.disabled_on_startup,
            main_class,
            additional_classes: self.additional_classes,
        })
    }
}

fn required(value: Option<String>, field: DescriptorField) -> Result<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::InvalidDescriptor { field }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_ref_segments() {
        let unit = UnitRef::new("com.example.sub.Main");
        assert_eq!(unit.simple_name(), "Main");
        assert_eq!(unit.namespace(), vec!["com", "example", "sub"]);

        let bare = UnitRef::new("Main");
        assert_eq!(bare.simple_name(), "Main");
        assert!(bare.namespace().is_empty());
    }

    #[test]
    fn test_empty_string_counts_as_missing() {
        let err = ExtensionDescriptor::builder()
            .id("")
            .name("n")
            .version("1")
            .main_class("a.B")
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidDescriptor {
                field: DescriptorField::Id
            }
        ));
    }

    #[test]
    fn test_descriptor_serializes_camel_case() {
        let descriptor = ExtensionDescriptor::builder()
            .id("ext")
            .name("Ext")
            .version("1.0")
            .start_priority(5)
            .main_class("a.Main")
            .build()
            .unwrap();
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["startPriority"], 5);
        assert_eq!(json["mainClass"], "a.Main");
        assert_eq!(json["disabledOnStartup"], false);
    }
}
