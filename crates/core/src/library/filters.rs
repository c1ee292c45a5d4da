//! Document listing filters and client-side sorting.

use std::cmp::Ordering;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::backend::DocumentSummary;

use super::LibraryError;

/// Filters for `GET /documents`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentFilters {
    /// Only documents reporting this currency (e.g. "AUD").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Only documents using this rounding scale (e.g. "thousands").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rounding: Option<String>,
    /// Minimum extraction quality, 0.0 to 1.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_quality: Option<f64>,
    #[serde(default = "default_limit")]
    pub limit: u64,
    #[serde(default)]
    pub skip: u64,
    /// Case-insensitive file name substring. Applied client-side only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

fn default_limit() -> u64 {
    50
}

impl Default for DocumentFilters {
    fn default() -> Self {
        Self {
            currency: None,
            rounding: None,
            min_quality: None,
            limit: default_limit(),
            skip: 0,
            search: None,
        }
    }
}

impl DocumentFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    pub fn with_rounding(mut self, rounding: impl Into<String>) -> Self {
        self.rounding = Some(rounding.into());
        self
    }

    pub fn with_min_quality(mut self, min_quality: f64) -> Self {
        self.min_quality = Some(min_quality);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn validate(&self) -> Result<(), LibraryError> {
        if let Some(q) = self.min_quality {
            if !(0.0..=1.0).contains(&q) {
                return Err(LibraryError::InvalidFilter(format!(
                    "min_quality must be between 0 and 1, got {}",
                    q
                )));
            }
        }
        Ok(())
    }

    /// Query string pairs. Empty filters are omitted.
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("limit", self.limit.to_string()),
            ("skip", self.skip.to_string()),
        ];
        if let Some(currency) = self.currency.as_deref().filter(|c| !c.is_empty()) {
            params.push(("currency", currency.to_string()));
        }
        if let Some(rounding) = self.rounding.as_deref().filter(|r| !r.is_empty()) {
            params.push(("rounding", rounding.to_string()));
        }
        if let Some(q) = self.min_quality {
            params.push(("min_quality", q.to_string()));
        }
        params
    }

    /// Whether a summary passes every filter, including the file name search.
    pub fn matches(&self, doc: &DocumentSummary) -> bool {
        if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
            if !doc
                .filename
                .to_lowercase()
                .contains(&search.to_lowercase())
            {
                return false;
            }
        }
        if let Some(currency) = &self.currency {
            if !doc.currencies.iter().any(|c| c.eq_ignore_ascii_case(currency)) {
                return false;
            }
        }
        if let Some(rounding) = &self.rounding {
            if !doc
                .rounding_scales
                .iter()
                .any(|r| r.eq_ignore_ascii_case(rounding))
            {
                return false;
            }
        }
        if let Some(min) = self.min_quality {
            if doc.extraction_quality.unwrap_or(0.0) < min {
                return false;
            }
        }
        true
    }
}

/// Field to sort document listings by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    UploadTimestamp,
    Filename,
    Status,
    ExtractionQuality,
    StatementCount,
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload_timestamp" | "date" => Ok(SortField::UploadTimestamp),
            "filename" | "name" => Ok(SortField::Filename),
            "status" => Ok(SortField::Status),
            "extraction_quality" | "quality" => Ok(SortField::ExtractionQuality),
            "statement_count" | "statements" => Ok(SortField::StatementCount),
            other => Err(format!("unknown sort field: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(format!("unknown sort direction: {}", other)),
        }
    }
}

/// Sort summaries in place. The sort is stable; documents without a quality
/// score sort before any scored document.
pub fn sort_documents(docs: &mut [DocumentSummary], field: SortField, direction: SortDirection) {
    docs.sort_by(|a, b| {
        let ord = match field {
            SortField::UploadTimestamp => a.upload_timestamp.cmp(&b.upload_timestamp),
            SortField::Filename => a.filename.cmp(&b.filename),
            SortField::Status => a.status.cmp(&b.status),
            SortField::ExtractionQuality => compare_quality(a.extraction_quality, b.extraction_quality),
            SortField::StatementCount => a.statement_count.cmp(&b.statement_count),
        };
        match direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });
}

fn compare_quality(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
