//! Zoning and indexing of captured snapshots.
//!
//! Partitions a snapshot's elements into top-bar / content / bottom-bar
//! regions and assigns each meaningful element a capture-local 1-based
//! index. Navigation controls concentrate in the bars, so those are kept
//! in left-to-right reading order while content flows top-to-bottom; the
//! deterministic ordering lets the same control usually keep a
//! similar-feeling position across consecutive captures even though the
//! indices themselves are never persistent.

use serde::{Deserialize, Serialize};

use crate::perception::types::UiElement;

/// Centre-position quantum for the alias-dedup signature, in pixels.
/// Accessibility trees frequently expose several nodes for one visual
/// control; bucketing the centre collapses them.
const DEDUP_BUCKET_PX: i32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    TopBar,
    Content,
    BottomBar,
}

/// One slot of the per-capture index: a 1-based ordinal, the zone it was
/// assigned to, and the element's position in the snapshot's raw list.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub ordinal: u32,
    pub zone: Zone,
    pub position: usize,
}

/// Bijection from 1..N onto the snapshot's meaningful, deduplicated
/// elements. Built once per capture, never mutated.
#[derive(Debug, Default)]
pub struct ElementIndex {
    entries: Vec<IndexEntry>,
}

impl ElementIndex {
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw-list position for a 1-based index, if in range.
    pub fn position_of(&self, ordinal: u32) -> Option<usize> {
        if ordinal == 0 {
            return None;
        }
        self.entries
            .get(ordinal as usize - 1)
            .map(|entry| entry.position)
    }
}

/// An element is meaningful if it carries a label, is interactive, or at
/// least occupies a real on-screen box.
fn is_meaningful(element: &UiElement) -> bool {
    element.label().is_some()
        || element.is_interactive()
        || (!element.bounds.is_degenerate()
            && element.bounds.left >= 0
            && element.bounds.top >= 0)
}

/// Dedup signature: label, quantized centre bucket, clickable, editable.
fn dedup_signature(element: &UiElement) -> (String, i32, i32, bool, bool) {
    let (cx, cy) = element.bounds.center();
    (
        element.label().unwrap_or("").to_string(),
        cx / DEDUP_BUCKET_PX,
        cy / DEDUP_BUCKET_PX,
        element.clickable,
        element.editable,
    )
}

fn zone_of(element: &UiElement, screen_height: i32) -> Zone {
    let (_, cy) = element.bounds.center();
    if cy < screen_height / 8 {
        Zone::TopBar
    } else if cy > screen_height * 7 / 8 {
        Zone::BottomBar
    } else {
        Zone::Content
    }
}

/// Builds the zoned 1-based index over a snapshot's raw element list.
///
/// The maximum observed right/bottom bounds stand in for the screen size,
/// since the capture layer reports no display metrics of its own.
pub fn build_element_index(elements: &[UiElement]) -> ElementIndex {
    let screen_height = elements
        .iter()
        .map(|e| e.bounds.bottom)
        .max()
        .unwrap_or(0)
        .max(1);

    let mut seen = std::collections::HashSet::new();
    let mut top = Vec::new();
    let mut content = Vec::new();
    let mut bottom = Vec::new();

    for (position, element) in elements.iter().enumerate() {
        if !is_meaningful(element) {
            continue;
        }
        if !seen.insert(dedup_signature(element)) {
            continue;
        }
        match zone_of(element, screen_height) {
            Zone::TopBar => top.push((position, element)),
            Zone::Content => content.push((position, element)),
            Zone::BottomBar => bottom.push((position, element)),
        }
    }

    // Bars read left→right, content reads top→bottom; the secondary key
    // keeps the order total so identical input yields identical indices.
    top.sort_by_key(|(_, e)| (e.bounds.left, e.bounds.top));
    content.sort_by_key(|(_, e)| (e.bounds.top, e.bounds.left));
    bottom.sort_by_key(|(_, e)| (e.bounds.left, e.bounds.top));

    let mut entries = Vec::with_capacity(top.len() + content.len() + bottom.len());
    let zoned = top
        .into_iter()
        .map(|(p, _)| (Zone::TopBar, p))
        .chain(content.into_iter().map(|(p, _)| (Zone::Content, p)))
        .chain(bottom.into_iter().map(|(p, _)| (Zone::BottomBar, p)));
    for (ordinal, (zone, position)) in zoned.enumerate() {
        entries.push(IndexEntry {
            ordinal: ordinal as u32 + 1,
            zone,
            position,
        });
    }

    ElementIndex { entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::types::ElementBounds;

    fn element(label: &str, bounds: ElementBounds, clickable: bool) -> UiElement {
        UiElement {
            class_name: "Button".into(),
            text: Some(label.to_string()),
            content_desc: None,
            clickable,
            editable: false,
            scrollable: false,
            checkable: false,
            checked: false,
            enabled: true,
            focused: false,
            bounds,
            child_count: 0,
        }
    }

    fn bounds(left: i32, top: i32, right: i32, bottom: i32) -> ElementBounds {
        ElementBounds { left, top, right, bottom }
    }

    #[test]
    fn index_is_a_bijection_over_meaningful_elements() {
        let elements = vec![
            element("Back", bounds(0, 10, 80, 90), true),       // top bar
            element("Title", bounds(100, 10, 400, 90), false),  // top bar
            element("Item A", bounds(0, 400, 1080, 500), true), // content
            element("Item B", bounds(0, 600, 1080, 700), true), // content
            element("Home", bounds(0, 1900, 200, 2000), true),  // bottom bar
        ];
        let index = build_element_index(&elements);
        assert_eq!(index.len(), 5);

        let positions: std::collections::HashSet<usize> =
            index.entries().iter().map(|e| e.position).collect();
        assert_eq!(positions.len(), 5);
        for (i, entry) in index.entries().iter().enumerate() {
            assert_eq!(entry.ordinal, i as u32 + 1);
        }
    }

    #[test]
    fn ordering_is_bars_first_and_deterministic() {
        let elements = vec![
            element("Item A", bounds(0, 400, 1080, 500), true),
            element("Home", bounds(0, 1900, 200, 2000), true),
            element("Back", bounds(0, 10, 80, 90), true),
        ];
        let first = build_element_index(&elements);
        let second = build_element_index(&elements);

        let labels: Vec<&str> = first
            .entries()
            .iter()
            .map(|e| elements[e.position].label().unwrap())
            .collect();
        // top bar, then content, then bottom bar
        assert_eq!(labels, vec!["Back", "Item A", "Home"]);

        let again: Vec<usize> = second.entries().iter().map(|e| e.position).collect();
        let orig: Vec<usize> = first.entries().iter().map(|e| e.position).collect();
        assert_eq!(orig, again);
    }

    #[test]
    fn aliased_accessibility_nodes_are_deduplicated() {
        let elements = vec![
            element("Submit", bounds(100, 500, 300, 560), true),
            // Same label, near-identical position: an accessibility alias.
            element("Submit", bounds(102, 502, 298, 558), true),
            element("Submit", bounds(100, 1200, 300, 1260), true), // different row, kept
        ];
        let index = build_element_index(&elements);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn meaningless_elements_are_dropped() {
        let mut blank = element("", bounds(-5, -5, -1, -1), false);
        blank.text = None;
        let elements = vec![blank, element("Ok", bounds(0, 400, 100, 460), true)];
        let index = build_element_index(&elements);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn zone_assignment_follows_vertical_eighths() {
        let elements = vec![
            element("top", bounds(0, 0, 100, 100), true),        // cy=50 < 2000/8
            element("mid", bounds(0, 900, 100, 1000), true),     // content
            element("bot", bounds(0, 1900, 100, 2000), true),    // cy=1950 > 1750
        ];
        let index = build_element_index(&elements);
        let zones: Vec<Zone> = index.entries().iter().map(|e| e.zone).collect();
        assert_eq!(zones, vec![Zone::TopBar, Zone::Content, Zone::BottomBar]);
    }
}
