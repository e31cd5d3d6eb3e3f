pub mod event;
pub mod feed;
pub mod item;
pub mod timeline;

pub use event::StatusEvent;
pub use feed::{CursorOutcome, CursorUpdate, Feed, FeedGroup, FeedId, FeedStatus, RefreshPolicy};
pub use item::{Item, ItemKey};
pub use timeline::{Page, TimelineEntry, TimelineFilter};
