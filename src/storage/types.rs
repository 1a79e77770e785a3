use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Local store failures.
///
/// Reads never surface these (they degrade to empty results); writes return
/// them so the coordinator can report the failed generation.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store failed to open or initialize and is running degraded
    #[error("Local store is unavailable")]
    Unavailable,

    /// Live-feed snapshot could not be encoded or decoded
    #[error("Live feed snapshot is corrupt: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// Generic database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

// ============================================================================
// Sentiment
// ============================================================================

/// Sentiment bucket assigned to a headline by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
}

impl Sentiment {
    pub fn as_str(self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown sentiment '{0}' (expected 'positive' or 'negative')")]
pub struct ParseSentimentError(String);

impl FromStr for Sentiment {
    type Err = ParseSentimentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Ok(Sentiment::Positive),
            "negative" => Ok(Sentiment::Negative),
            _ => Err(ParseSentimentError(s.to_string())),
        }
    }
}

// ============================================================================
// Headlines
// ============================================================================

/// A headline as delivered by a bulk update, before it is stored.
///
/// Optional fields default the same way the service omits them: zero
/// confidence and empty URLs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewHeadline {
    pub headline: String,
    pub category: String,
    pub sentiment: Sentiment,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub source_url: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub image_url: String,
    pub timestamp: String,
}

/// A stored headline row.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadlineRecord {
    pub id: i64,
    pub headline: String,
    pub category: String,
    pub sentiment: Sentiment,
    pub confidence: f64,
    pub source_url: String,
    pub image_url: String,
    pub timestamp: String,
    /// Generation that produced this row
    pub update_id: String,
    /// Local insert time
    pub created_at: String,
}

/// Internal row type for headline queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct HeadlineDbRow {
    pub id: i64,
    pub headline: String,
    pub category: String,
    pub sentiment: String,
    pub confidence: f64,
    pub source_url: String,
    pub image_url: String,
    pub timestamp: String,
    pub update_id: String,
    pub created_at: String,
}

impl HeadlineDbRow {
    /// Returns `None` for rows whose sentiment no longer parses.
    pub(crate) fn into_record(self) -> Option<HeadlineRecord> {
        let sentiment = match self.sentiment.parse() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(id = self.id, error = %e, "Skipping headline row with bad sentiment");
                return None;
            }
        };
        Some(HeadlineRecord {
            id: self.id,
            headline: self.headline,
            category: self.category,
            sentiment,
            confidence: self.confidence,
            source_url: self.source_url,
            image_url: self.image_url,
            timestamp: self.timestamp,
            update_id: self.update_id,
            created_at: self.created_at,
        })
    }
}

// ============================================================================
// Live Feed
// ============================================================================

/// Lightweight entry of the unversioned live feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveFeedEntry {
    pub quick_id: String,
    pub source: String,
    pub category: String,
    pub headline: String,
    pub timestamp: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub source_url: String,
}

/// The live feed as one opaque unit: replaced wholesale, never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveFeedSnapshot {
    pub entries: Vec<LiveFeedEntry>,
    /// Listing time reported by the service, if any
    pub remote_timestamp: Option<String>,
}

// ============================================================================
// Diagnostics
// ============================================================================

/// Aggregate view of the headline table, for diagnostics only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataStats {
    pub total_headlines: i64,
    pub latest_timestamp: Option<String>,
    pub last_update_id: Option<String>,
    pub last_sync_time: Option<String>,
    pub has_data: bool,
}

// ============================================================================
// Helpers
// ============================================================================

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
