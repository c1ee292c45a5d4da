//! Export of extraction results as JSON or CSV.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::backend::ExtractionResult;

use super::LibraryError;

const CSV_HEADERS: [&str; 7] = [
    "Statement Type",
    "Company",
    "Line Item",
    "Year",
    "Value",
    "Currency",
    "Rounding",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(format!("unknown export format: {}", other)),
        }
    }
}

/// Render a result in the requested format.
///
/// CSV has one row per statement, line item and year.
pub fn export_result(result: &ExtractionResult, format: ExportFormat) -> Result<String, LibraryError> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(result)?),
        ExportFormat::Csv => Ok(to_csv(result)),
    }
}

/// Download file name: the source name without `.pdf`, plus the format extension.
pub fn export_file_name(result: &ExtractionResult, format: ExportFormat) -> String {
    let stem = result
        .filename
        .strip_suffix(".pdf")
        .or_else(|| result.filename.strip_suffix(".PDF"))
        .unwrap_or(&result.filename);
    format!("{}.{}", stem, format.extension())
}

fn to_csv(result: &ExtractionResult) -> String {
    let mut lines = vec![CSV_HEADERS.join(",")];

    for stmt in &result.statements {
        for item in &stmt.line_items {
            for (year, value) in &item.values {
                let row = [
                    csv_field(&stmt.statement_type),
                    csv_field(&stmt.company_name),
                    csv_field(&item.label),
                    csv_field(year),
                    value.to_string(),
                    csv_field(&stmt.currency),
                    csv_field(&stmt.rounding),
                ];
                lines.push(row.join(","));
            }
        }
    }

    lines.join("\n")
}

/// Quote a field containing a delimiter, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
