use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::perception::zoning::{build_element_index, ElementIndex};

/// Screen-pixel bounding box of one UI node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementBounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ElementBounds {
    pub fn width(&self) -> i32 {
        (self.right - self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.bottom - self.top).max(0)
    }

    /// Centre point in screen pixels.
    pub fn center(&self) -> (i32, i32) {
        (
            self.left + self.width() / 2,
            self.top + self.height() / 2,
        )
    }

    /// Zero or negative extent in either dimension.
    pub fn is_degenerate(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }
}

/// One node of the observed UI tree. Immutable per capture — the automation
/// surface owns the native handles; the core only ever sees these values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiElement {
    /// Widget class / role (e.g. "Button", "EditText").
    pub class_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Accessible label when the visible text is absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_desc: Option<String>,
    pub clickable: bool,
    pub editable: bool,
    pub scrollable: bool,
    pub checkable: bool,
    pub checked: bool,
    pub enabled: bool,
    pub focused: bool,
    pub bounds: ElementBounds,
    pub child_count: u32,
}

impl UiElement {
    /// Visible text, falling back to the accessible description.
    pub fn label(&self) -> Option<&str> {
        self.text
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.content_desc.as_deref().filter(|d| !d.trim().is_empty()))
    }

    pub fn is_interactive(&self) -> bool {
        self.clickable || self.editable || self.scrollable || self.checkable
    }

    /// One-line rendering used in oracle-facing element listings.
    pub fn describe(&self) -> String {
        let mut flags = Vec::new();
        if self.clickable {
            flags.push("clickable");
        }
        if self.editable {
            flags.push("editable");
        }
        if self.scrollable {
            flags.push("scrollable");
        }
        if self.checkable {
            flags.push(if self.checked { "checked" } else { "unchecked" });
        }
        if !self.enabled {
            flags.push("disabled");
        }
        if self.focused {
            flags.push("focused");
        }
        let label = self.label().unwrap_or("<no label>");
        if flags.is_empty() {
            format!("{} \"{}\"", self.class_name, label)
        } else {
            format!("{} \"{}\" ({})", self.class_name, label, flags.join(", "))
        }
    }
}

/// One immutable capture of the observed UI state.
///
/// The element index is derived lazily, built exactly once per snapshot and
/// never mutated. Indices are capture-local: the same on-screen control can
/// get a different index on the next capture.
#[derive(Debug)]
pub struct ScreenSnapshot {
    /// Application identity (e.g. Android package name).
    pub package: String,
    /// Screen identity within the application (e.g. activity name).
    pub activity: String,
    pub elements: Vec<UiElement>,
    /// Position of the focused element in `elements`, if any.
    pub focused: Option<usize>,
    pub captured_at: chrono::DateTime<chrono::Utc>,
    index: OnceLock<ElementIndex>,
}

impl ScreenSnapshot {
    pub fn new(
        package: impl Into<String>,
        activity: impl Into<String>,
        elements: Vec<UiElement>,
    ) -> Self {
        let focused = elements.iter().position(|e| e.focused);
        Self {
            package: package.into(),
            activity: activity.into(),
            elements,
            focused,
            captured_at: chrono::Utc::now(),
            index: OnceLock::new(),
        }
    }

    /// The zoned, deduplicated, 1-based element index for this capture.
    pub fn element_index(&self) -> &ElementIndex {
        self.index.get_or_init(|| build_element_index(&self.elements))
    }

    /// Looks up an element by its capture-local 1-based index.
    pub fn element_by_id(&self, id: u32) -> Option<&UiElement> {
        self.element_index()
            .position_of(id)
            .map(|pos| &self.elements[pos])
    }

    pub fn focused_element(&self) -> Option<&UiElement> {
        self.focused.map(|i| &self.elements[i])
    }

    /// First editable element in index order, if any.
    pub fn first_editable(&self) -> Option<(u32, &UiElement)> {
        self.element_index()
            .entries()
            .iter()
            .map(|e| (e.ordinal, &self.elements[e.position]))
            .find(|(_, el)| el.editable)
    }
}

impl Clone for ScreenSnapshot {
    fn clone(&self) -> Self {
        // The index is cheap to rebuild; a clone starts with a fresh cell.
        Self {
            package: self.package.clone(),
            activity: self.activity.clone(),
            elements: self.elements.clone(),
            focused: self.focused,
            captured_at: self.captured_at,
            index: OnceLock::new(),
        }
    }
}
