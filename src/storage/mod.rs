mod cursor;
mod headlines;
mod live_feed;
mod schema;
mod types;

pub use schema::LocalStore;
pub use types::{
    DataStats, HeadlineRecord, LiveFeedEntry, LiveFeedSnapshot, NewHeadline, ParseSentimentError,
    Sentiment, StorageError,
};
