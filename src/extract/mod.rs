//! Selector-driven extraction shared by the static and dynamic strategies.

pub mod detail;
pub mod list;
pub mod text;

pub use detail::{parse_detail_html, DetailResult, ImageRef};
pub use list::{parse_list_items, RawListItem};
pub use text::html_to_text;
