//! Abstract display layouts.
//!
//! The relay never renders anything; it hands one of these descriptions to
//! a display sink, which forwards it to the glasses.

use serde::{Deserialize, Serialize};

/// A display layout, tagged by `layoutType` on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "layoutType", rename_all = "snake_case")]
pub enum Layout {
    /// A single block of text.
    TextWall {
        /// Body text.
        text: String,
    },
    /// Two stacked blocks of text.
    #[serde(rename_all = "camelCase")]
    DoubleTextWall {
        /// Upper block.
        top_text: String,
        /// Lower block.
        bottom_text: String,
    },
    /// Titled card.
    ReferenceCard {
        /// Card title.
        title: String,
        /// Card body.
        text: String,
    },
    /// One entry per row.
    TextRows {
        /// Rows, top to bottom.
        text: Vec<String>,
    },
    /// A single line, used by the always-on overlay.
    TextLine {
        /// Line text.
        text: String,
    },
    /// Clears the view.
    Empty,
}

/// Which view a layout targets on the glasses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayView {
    /// Full-screen app view.
    #[default]
    Main,
    /// The dashboard shown on head-up.
    Dashboard,
    /// The persistent always-on overlay.
    AlwaysOn,
}
