use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A node of the document outline (table of contents).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineNode {
    pub name: String,
    /// Child nodes. A leaf carries an empty list.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<OutlineNode>,
}

/// One run of text on a page, positioned in PDF user space.
///
/// `y` is the baseline offset and grows upward from the bottom of the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRun {
    pub text: String,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub height: f32,
}

/// A named jump target resolved to a page and anchored to the page text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    /// 0-based page index.
    pub page: usize,
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub z: Option<f32>,
    /// Index into the page's text runs of the anchor run. Equal to the
    /// page's run count when nothing on the page is at or below `y`.
    pub text_start: usize,
    pub text: Option<TextRun>,
}

/// A page annotation (link, highlight, note, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub subtype: String,
    /// `[x0, y0, x1, y1]` in PDF user space.
    pub rect: [f32; 4],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
}

impl Annotation {
    /// Top edge of the annotation rectangle.
    pub fn top(&self) -> f32 {
        self.rect[1].max(self.rect[3])
    }

    /// Left edge of the annotation rectangle.
    pub fn left(&self) -> f32 {
        self.rect[0].min(self.rect[2])
    }
}

/// Structural navigation data derived from a PDF.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PdfInfo {
    /// `None` when the document has no outline at all.
    #[serde(default)]
    pub outline: Option<Vec<OutlineNode>>,
    #[serde(default)]
    pub destinations: BTreeMap<String, Destination>,
    /// One list per page, in reading order.
    #[serde(default)]
    pub annotations: Vec<Vec<Annotation>>,
}

/// A reference already known for the analysed paper.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnownReference {
    pub title: String,
    pub authors: Vec<String>,
}
