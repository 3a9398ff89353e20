//! Layout composition per dashboard mode.
//!
//! | Mode      | Layout             | Content                                                  |
//! |-----------|--------------------|----------------------------------------------------------|
//! | main      | `double_text_wall` | top: topLeft, bottomLeft; bottom: topRight, bottomRight, 2 newest items |
//! | expanded  | `text_wall`        | "topLeft \| topRight" header, newest item                |
//! | always_on | `text_line`        | topLeft and newest always-on item joined by " \| "       |

use halo_core::messages::{DashboardMode, Layout, SystemSection};

use super::queue::ContentQueue;

/// Separator between inline fragments.
const INLINE_SEPARATOR: &str = " | ";

/// The system app's four corner sections.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SystemSections {
    top_left: String,
    top_right: String,
    bottom_left: String,
    bottom_right: String,
}

impl SystemSections {
    /// Text of a section.
    pub fn get(&self, section: SystemSection) -> &str {
        match section {
            SystemSection::TopLeft => &self.top_left,
            SystemSection::TopRight => &self.top_right,
            SystemSection::BottomLeft => &self.bottom_left,
            SystemSection::BottomRight => &self.bottom_right,
        }
    }

    /// Replace a section. Returns whether the text changed.
    pub fn set(&mut self, section: SystemSection, content: String) -> bool {
        let slot = match section {
            SystemSection::TopLeft => &mut self.top_left,
            SystemSection::TopRight => &mut self.top_right,
            SystemSection::BottomLeft => &mut self.bottom_left,
            SystemSection::BottomRight => &mut self.bottom_right,
        };
        if *slot == content {
            return false;
        }
        *slot = content;
        true
    }

    /// Blank every section. Returns whether anything was set.
    pub fn clear(&mut self) -> bool {
        let had_content = *self != Self::default();
        *self = Self::default();
        had_content
    }
}

/// How many queue items a mode shows.
pub fn visible_items(mode: DashboardMode) -> usize {
    match mode {
        DashboardMode::Main => 2,
        DashboardMode::Expanded | DashboardMode::AlwaysOn => 1,
    }
}

/// Build the layout for `mode` from the system sections and its queue.
pub fn compose(mode: DashboardMode, sections: &SystemSections, queue: &ContentQueue) -> Layout {
    let items = queue.visible(visible_items(mode)).map(|i| i.content.as_str());
    match mode {
        DashboardMode::Main => Layout::DoubleTextWall {
            top_text: join_lines([
                sections.get(SystemSection::TopLeft),
                sections.get(SystemSection::BottomLeft),
            ]),
            bottom_text: join_lines(
                [
                    sections.get(SystemSection::TopRight),
                    sections.get(SystemSection::BottomRight),
                ]
                .into_iter()
                .chain(items),
            ),
        },
        DashboardMode::Expanded => {
            let header = join_inline([
                sections.get(SystemSection::TopLeft),
                sections.get(SystemSection::TopRight),
            ]);
            Layout::TextWall {
                text: join_lines(std::iter::once(header.as_str()).chain(items)),
            }
        }
        DashboardMode::AlwaysOn => Layout::TextLine {
            text: join_inline(std::iter::once(sections.get(SystemSection::TopLeft)).chain(items)),
        },
    }
}

fn join_lines<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    join_non_empty(parts, "\n")
}

fn join_inline<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    join_non_empty(parts, INLINE_SEPARATOR)
}

fn join_non_empty<'a>(parts: impl IntoIterator<Item = &'a str>, separator: &str) -> String {
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}
