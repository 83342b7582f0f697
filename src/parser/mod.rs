pub mod item;
pub mod page;

pub use item::extract;
pub use page::{parse_page, ParsedPage};
