use super::calculator::{Number, parse_number};
use super::{ToolError, ToolFuture, ToolInfo, ToolOutput, ToolTrait};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

const REPORT_FILE: &str = "report.csv";
const PREVIEW_ROWS: usize = 3;
const TEXT_READ_CHARS: usize = 1000;
const TEXT_SNIPPET_CHARS: usize = 500;
// Enough bytes for `TEXT_READ_CHARS` chars of UTF-8.
const TEXT_READ_BYTES: u64 = TEXT_READ_CHARS as u64 * 4;

pub struct FileReaderTool {
    base_path: PathBuf,
}

impl FileReaderTool {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }
}

impl ToolTrait for FileReaderTool {
    fn info(&self) -> ToolInfo {
        ToolInfo {
            name: "FileReaderTool".to_string(),
            description: "Reads content of 'report.csv' for sales data analysis or very simple .txt files. Input: filename (e.g., 'report.csv'). For policy document queries, use PolicyDocumentQA."
                .to_string(),
        }
    }

    fn execute(&self, input: String) -> ToolFuture {
        let base_path = self.base_path.clone();
        Box::pin(async move { read_file(&base_path, &input).await })
    }
}

/// Rejected names and missing files are observations; a failed read is a `ToolError`.
async fn read_file(base_path: &Path, raw_name: &str) -> Result<ToolOutput, ToolError> {
    let filename = raw_name.trim().replace(['\'', '"'], "");
    if filename.is_empty() {
        return Ok(ToolOutput::Failure("Error: No filename provided to FileReaderTool.".to_string()));
    }

    let lower = filename.to_lowercase();
    let is_report = lower == REPORT_FILE;
    if !is_report && !lower.ends_with(".txt") {
        return Ok(ToolOutput::Failure(format!(
            "Error: FileReaderTool is primarily for '{REPORT_FILE}' or .txt files. For the policy document, use PolicyDocumentQA."
        )));
    }

    let path = base_path.join(&filename);
    let display_path = std::path::absolute(&path).unwrap_or_else(|_| path.clone());
    let is_file = tokio::fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false);
    if !is_file {
        return Ok(ToolOutput::Failure(format!(
            "Error: File '{filename}' not found or is not a file at '{}'.",
            display_path.display()
        )));
    }

    if is_report {
        let bytes = tokio::fs::read(&path).await?;
        return Ok(describe_csv(&filename, &String::from_utf8_lossy(&bytes)));
    }

    let mut bytes = Vec::new();
    tokio::fs::File::open(&path)
        .await?
        .take(TEXT_READ_BYTES)
        .read_to_end(&mut bytes)
        .await?;
    let snippet: String = String::from_utf8_lossy(&bytes).chars().take(TEXT_SNIPPET_CHARS).collect();
    Ok(ToolOutput::Success(format!(
        "Successfully read snippet from '{filename}' (TXT):\n{snippet}..."
    )))
}

fn describe_csv(filename: &str, content: &str) -> ToolOutput {
    let mut rows = parse_csv(content).into_iter();
    let Some(header) = rows.next() else {
        return ToolOutput::Failure(format!(
            "Error processing file '{filename}': EmptyDataError - No columns to parse from file."
        ));
    };
    let records: Vec<Vec<String>> = rows.collect();
    if records.is_empty() {
        return ToolOutput::Success(format!("File '{filename}' (CSV) is empty."));
    }

    let columns = header.join(", ");
    let preview = render_preview(&header, &records[..records.len().min(PREVIEW_ROWS)]);

    let revenue = header
        .iter()
        .position(|column| column == "Revenue")
        .and_then(|index| numeric_column(&records, index));

    match revenue {
        Some(values) => ToolOutput::Success(format!(
            "Successfully read '{filename}' (CSV). Columns: {columns}. Extracted 'Revenue' values: {values}. Use CalculatorTool with these values if calculation is needed. Data preview:\n{preview}"
        )),
        None => ToolOutput::Success(format!(
            "Successfully read '{filename}' (CSV). Columns: {columns}. Data preview:\n{preview}. No specific numerical 'Revenue' column for auto-extraction, but other calculations might be possible on numbers observed in preview."
        )),
    }
}

/// Renders the column as a list literal, or `None` if any cell is not numeric.
/// Missing cells are dropped, and like a float-typed column they force every value to a float.
fn numeric_column(records: &[Vec<String>], index: usize) -> Option<String> {
    let mut values = Vec::new();
    let mut has_gaps = false;

    for record in records {
        match record.get(index).map(|cell| cell.trim()) {
            None | Some("") => has_gaps = true,
            Some(cell) => values.push(parse_number(cell)?),
        }
    }

    let as_float = has_gaps || values.iter().any(|v| matches!(v, Number::Float(_)));
    let rendered: Vec<String> = values
        .into_iter()
        .map(|value| match (as_float, value) {
            (true, Number::Int(v)) => Number::Float(v as f64).to_string(),
            (_, value) => value.to_string(),
        })
        .collect();

    Some(format!("[{}]", rendered.join(", ")))
}

fn render_preview(header: &[String], records: &[Vec<String>]) -> String {
    let widths: Vec<usize> = header
        .iter()
        .enumerate()
        .map(|(i, column)| {
            records
                .iter()
                .filter_map(|record| record.get(i))
                .map(|cell| cell.chars().count())
                .chain(std::iter::once(column.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let render_row = |cells: &[String]| {
        widths
            .iter()
            .enumerate()
            .map(|(i, width)| format!("{:>width$}", cells.get(i).map(String::as_str).unwrap_or(""), width = width))
            .collect::<Vec<_>>()
            .join("  ")
    };

    std::iter::once(render_row(header))
        .chain(records.iter().map(|record| render_row(record.as_slice())))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Line-oriented CSV: quoted fields and `""` escapes, blank lines skipped.
fn parse_csv(content: &str) -> Vec<Vec<String>> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_csv_line)
        .collect()
}

fn parse_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field).trim().to_string()),
            _ => field.push(c),
        }
    }
    fields.push(field.trim().to_string());
    fields
}
