//! CSV reader

use serde_json::Value;

use super::dates::number_value;
use super::error::ParseError;
use super::rows::Grid;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Read CSV bytes into a grid. Rows may have differing field counts.
pub fn read_grid(data: &[u8]) -> Result<Grid, ParseError> {
    let data = data.strip_prefix(UTF8_BOM).unwrap_or(data);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data);

    let mut grid = Grid::new();
    for result in reader.byte_records() {
        let record = result?;
        let cells = record
            .iter()
            .map(|field| detect_type(&String::from_utf8_lossy(field)))
            .collect();
        grid.push_row(cells);
    }

    Ok(grid)
}

/// Detect the type of a field value
fn detect_type(field: &str) -> Value {
    let trimmed = field.trim();

    if trimmed.is_empty() {
        return Value::Null;
    }

    match trimmed {
        "TRUE" | "true" => return Value::Bool(true),
        "FALSE" | "false" => return Value::Bool(false),
        _ => {}
    }

    // Keep zero-padded codes like "007" as text
    let leading_zero = trimmed.len() > 1
        && trimmed.starts_with('0')
        && !trimmed.starts_with("0.");
    if !leading_zero {
        if let Ok(n) = trimmed.parse::<f64>() {
            if n.is_finite() {
                return number_value(n);
            }
        }
    }

    Value::String(field.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::records_from_grid;
    use serde_json::json;

    #[test]
    fn test_csv_records_with_types() {
        let data = "\u{feff}Task,Owner,Hours,Done,Code\n\
                    Report,Ana,4,false,007\n\
                    \"Deck, v2\",Bo,2.5,TRUE,12\n";
        let records = records_from_grid(read_grid(data.as_bytes()).unwrap());

        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["Task"], "Report");
        assert_eq!(records[0]["Hours"], json!(4));
        assert_eq!(records[0]["Done"], json!(false));
        assert_eq!(records[0]["Code"], "007");
        assert_eq!(records[1]["Task"], "Deck, v2");
        assert_eq!(records[1]["Hours"], json!(2.5));
        assert_eq!(records[1]["Done"], json!(true));
    }

    #[test]
    fn test_ragged_rows_and_blank_lines() {
        let data = "Task,Owner\nReport\n,,\nDeck,Bo,extra\n";
        let records = records_from_grid(read_grid(data.as_bytes()).unwrap());

        assert_eq!(records.len(), 2);
        assert!(records[0].get("Owner").is_none());
        assert_eq!(records[1]["__EMPTY"], "extra");
    }

    #[test]
    fn test_dates_stay_text() {
        let data = "Due\n2024-06-10\n";
        let records = records_from_grid(read_grid(data.as_bytes()).unwrap());
        assert_eq!(records[0]["Due"], "2024-06-10");
    }
}
