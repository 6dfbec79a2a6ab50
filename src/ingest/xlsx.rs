//! XLSX reader (first worksheet only)

use std::collections::HashMap;
use std::io::{BufReader, Cursor, Read, Seek};

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde_json::Value;

use super::dates::{is_date_format, number_value, serial_to_value};
use super::error::ParseError;
use super::rows::{Grid, MAX_SHEET_COLS, MAX_SHEET_ROWS};

/// Read the first worksheet of an XLSX workbook into a grid.
pub fn read_grid(data: &[u8]) -> Result<Grid, ParseError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))?;

    // Verify this is an XLSX file
    if archive.by_name("[Content_Types].xml").is_err() {
        return Err(ParseError::InvalidFormat(
            "Missing [Content_Types].xml".into(),
        ));
    }

    let shared_strings = read_shared_strings(&mut archive)?;
    let date_styles = read_date_styles(&mut archive)?;
    let workbook = read_workbook_xml(&mut archive)?;
    let sheet_paths = read_workbook_rels(&mut archive)?;

    let path = workbook
        .first_sheet_rid
        .as_ref()
        .and_then(|rid| sheet_paths.get(rid))
        .cloned()
        .unwrap_or_else(|| "xl/worksheets/sheet1.xml".to_string());

    tracing::debug!("Reading worksheet {}", path);

    let ctx = CellContext {
        shared_strings: &shared_strings,
        date_styles: &date_styles,
        date_1904: workbook.date_1904,
    };
    read_worksheet(&mut archive, &path, &ctx)
}

struct WorkbookInfo {
    first_sheet_rid: Option<String>,
    date_1904: bool,
}

struct CellContext<'a> {
    shared_strings: &'a [String],
    /// One flag per `cellXfs` entry: does the style display a date?
    date_styles: &'a [bool],
    date_1904: bool,
}

/// Decode Excel's `_xHHHH_` escape sequences in strings.
fn decode_excel_escapes(s: &str) -> String {
    if !s.contains("_x") {
        return s.to_string();
    }

    let mut result = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find("_x") {
        result.push_str(&rest[..pos]);
        let candidate = &rest[pos..];
        let decoded = candidate
            .get(2..6)
            .filter(|hex| hex.chars().all(|c| c.is_ascii_hexdigit()))
            .filter(|_| candidate.as_bytes().get(6) == Some(&b'_'))
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
            .and_then(char::from_u32);

        match decoded {
            Some(c) => {
                result.push(c);
                rest = &candidate[7..];
            }
            None => {
                result.push_str("_x");
                rest = &candidate[2..];
            }
        }
    }
    result.push_str(rest);
    result
}

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .and_then(|attr| attr.unescape_value().ok().map(|s| s.to_string()))
}

fn read_shared_strings<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<Vec<String>, ParseError> {
    let mut strings = Vec::new();

    let file = match archive.by_name("xl/sharedStrings.xml") {
        Ok(f) => f,
        Err(_) => return Ok(strings), // No shared strings is valid
    };

    let mut xml_reader = Reader::from_reader(BufReader::new(file));

    let mut buf = Vec::new();
    let mut current = String::new();
    let mut in_si = false;
    let mut in_t = false;
    // Phonetic runs (<rPh>) carry reading hints, not cell text
    let mut in_phonetic = false;

    loop {
        match xml_reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"rPh" => in_phonetic = true,
                b"t" if in_si && !in_phonetic => in_t = true,
                _ => {}
            },
            Event::Empty(e) if e.name().as_ref() == b"si" => strings.push(String::new()),
            Event::End(e) => match e.name().as_ref() {
                b"si" => {
                    strings.push(decode_excel_escapes(&current));
                    in_si = false;
                }
                b"rPh" => in_phonetic = false,
                b"t" => in_t = false,
                _ => {}
            },
            Event::Text(e) if in_t => current.push_str(&e.unescape()?),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(strings)
}

/// Read `xl/styles.xml` and flag which cell formats display dates.
fn read_date_styles<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<Vec<bool>, ParseError> {
    let file = match archive.by_name("xl/styles.xml") {
        Ok(f) => f,
        Err(_) => return Ok(Vec::new()),
    };

    let mut xml_reader = Reader::from_reader(BufReader::new(file));
    let mut buf = Vec::new();
    let mut custom_formats: HashMap<u16, String> = HashMap::new();
    let mut xf_format_ids: Vec<u16> = Vec::new();
    let mut in_cell_xfs = false;

    loop {
        match xml_reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) => match e.name().as_ref() {
                b"numFmt" => {
                    let id = attr_value(&e, b"numFmtId").and_then(|s| s.parse::<u16>().ok());
                    if let (Some(id), Some(code)) = (id, attr_value(&e, b"formatCode")) {
                        custom_formats.insert(id, code);
                    }
                }
                b"cellXfs" => in_cell_xfs = true,
                b"xf" if in_cell_xfs => {
                    let id = attr_value(&e, b"numFmtId")
                        .and_then(|s| s.parse::<u16>().ok())
                        .unwrap_or(0);
                    xf_format_ids.push(id);
                }
                _ => {}
            },
            Event::End(e) if e.name().as_ref() == b"cellXfs" => in_cell_xfs = false,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(xf_format_ids
        .into_iter()
        .map(|id| is_date_format(id, custom_formats.get(&id).map(String::as_str)))
        .collect())
}

fn read_workbook_xml<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<WorkbookInfo, ParseError> {
    let file = archive
        .by_name("xl/workbook.xml")
        .map_err(|_| ParseError::MissingPart("xl/workbook.xml".into()))?;

    let mut xml_reader = Reader::from_reader(BufReader::new(file));
    let mut buf = Vec::new();
    let mut info = WorkbookInfo {
        first_sheet_rid: None,
        date_1904: false,
    };

    loop {
        match xml_reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) => match e.name().as_ref() {
                b"workbookPr" => {
                    info.date_1904 = attr_value(&e, b"date1904")
                        .map_or(false, |v| v == "1" || v == "true");
                }
                b"sheet" if info.first_sheet_rid.is_none() => {
                    info.first_sheet_rid = attr_value(&e, b"r:id");
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(info)
}

/// Map relationship id to worksheet part path.
fn read_workbook_rels<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<HashMap<String, String>, ParseError> {
    let mut rels = HashMap::new();
    let file = match archive.by_name("xl/_rels/workbook.xml.rels") {
        Ok(f) => f,
        Err(_) => return Ok(rels),
    };

    let mut xml_reader = Reader::from_reader(BufReader::new(file));
    let mut buf = Vec::new();

    loop {
        match xml_reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"Relationship" => {
                let id = attr_value(&e, b"Id");
                let target = attr_value(&e, b"Target");
                let rel_type = attr_value(&e, b"Type");

                if let (Some(id), Some(target), Some(rel_type)) = (id, target, rel_type) {
                    if rel_type.ends_with("/worksheet") {
                        // Target is relative to xl/ folder
                        let full_path = match target.strip_prefix('/') {
                            Some(absolute) => absolute.to_string(),
                            None => format!("xl/{}", target),
                        };
                        rels.insert(id, full_path);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(rels)
}

/// Parse an A1-style reference into zero-based (row, col).
fn parse_cell_ref(reference: &str) -> Result<(usize, usize), ParseError> {
    let invalid = || ParseError::InvalidFormat(format!("bad cell reference {:?}", reference));

    let split = reference
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() {
        return Err(invalid());
    }

    let mut col = 0usize;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return Err(invalid());
        }
        let digit = c.to_ascii_uppercase() as usize - 'A' as usize + 1;
        col = col
            .checked_mul(26)
            .and_then(|n| n.checked_add(digit))
            .filter(|&n| n <= MAX_SHEET_COLS)
            .ok_or_else(invalid)?;
    }
    let row = parse_row_number(digits)?;
    Ok((row - 1, col - 1))
}

/// Parse a one-based row number, bounded by the largest sheet.
fn parse_row_number(digits: &str) -> Result<usize, ParseError> {
    digits
        .parse::<usize>()
        .ok()
        .filter(|&n| (1..=MAX_SHEET_ROWS).contains(&n))
        .ok_or_else(|| ParseError::InvalidFormat(format!("bad row number {:?}", digits)))
}

#[derive(Default)]
struct PendingCell {
    position: (usize, usize),
    cell_type: Option<String>,
    style: Option<usize>,
    value: Option<String>,
    inline_text: String,
}

impl PendingCell {
    fn into_value(self, ctx: &CellContext<'_>) -> Value {
        match self.cell_type.as_deref() {
            Some("s") => self
                .value
                .and_then(|v| v.trim().parse::<usize>().ok())
                .and_then(|idx| ctx.shared_strings.get(idx))
                .map(|s| Value::String(s.clone()))
                .unwrap_or(Value::Null),
            Some("inlineStr") => {
                if self.inline_text.is_empty() {
                    Value::Null
                } else {
                    Value::String(decode_excel_escapes(&self.inline_text))
                }
            }
            Some("b") => match self.value.as_deref().map(str::trim) {
                Some("1") | Some("true") => Value::Bool(true),
                Some("0") | Some("false") => Value::Bool(false),
                _ => Value::Null,
            },
            Some("str") | Some("e") | Some("d") => self
                .value
                .filter(|v| !v.is_empty())
                .map(Value::String)
                .unwrap_or(Value::Null),
            _ => {
                let Some(raw) = self.value else {
                    return Value::Null;
                };
                match raw.trim().parse::<f64>() {
                    Ok(n) => {
                        let is_date = self
                            .style
                            .and_then(|s| ctx.date_styles.get(s))
                            .copied()
                            .unwrap_or(false);
                        if is_date {
                            serial_to_value(n, ctx.date_1904)
                        } else {
                            number_value(n)
                        }
                    }
                    Err(_) => Value::String(raw),
                }
            }
        }
    }
}

fn read_worksheet<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    path: &str,
    ctx: &CellContext<'_>,
) -> Result<Grid, ParseError> {
    let file = archive
        .by_name(path)
        .map_err(|_| ParseError::MissingPart(path.to_string()))?;

    let mut xml_reader = Reader::from_reader(BufReader::new(file));
    let mut buf = Vec::new();
    let mut grid = Grid::new();

    let mut current_row = 0usize;
    let mut next_col = 0usize;
    let mut cell: Option<PendingCell> = None;
    let mut in_value = false;
    let mut in_inline_text = false;

    loop {
        match xml_reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"row" => {
                    if let Some(r) = attr_value(&e, b"r") {
                        current_row = parse_row_number(&r)? - 1;
                    }
                    next_col = 0;
                }
                b"c" => cell = Some(start_cell(&e, current_row, next_col)?),
                b"v" if cell.is_some() => in_value = true,
                b"t" if cell.is_some() => in_inline_text = true,
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"c" => {
                    // Value-less cell; only advances the column cursor
                    let pending = start_cell(&e, current_row, next_col)?;
                    next_col = pending.position.1 + 1;
                }
                b"row" => {
                    // Empty row element: the next row follows it
                    current_row = match attr_value(&e, b"r") {
                        Some(r) => parse_row_number(&r)?,
                        None => current_row + 1,
                    };
                }
                _ => {}
            },
            Event::Text(e) => {
                if let Some(pending) = cell.as_mut() {
                    let text = e.unescape()?;
                    if in_value {
                        pending.value.get_or_insert_with(String::new).push_str(&text);
                    } else if in_inline_text {
                        pending.inline_text.push_str(&text);
                    }
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"v" => in_value = false,
                b"t" => in_inline_text = false,
                b"c" => {
                    if let Some(pending) = cell.take() {
                        let (row, col) = pending.position;
                        next_col = col + 1;
                        grid.set(row, col, pending.into_value(ctx))?;
                    }
                }
                b"row" => current_row += 1,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(grid)
}

fn start_cell(
    e: &BytesStart<'_>,
    current_row: usize,
    next_col: usize,
) -> Result<PendingCell, ParseError> {
    let position = match attr_value(e, b"r") {
        Some(reference) => parse_cell_ref(&reference)?,
        None => (current_row, next_col),
    };
    Ok(PendingCell {
        position,
        cell_type: attr_value(e, b"t"),
        style: attr_value(e, b"s").and_then(|s| s.parse::<usize>().ok()),
        ..PendingCell::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::records_from_grid;
    use serde_json::json;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"></Types>"#;

    const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
  <workbookPr/>
  <sheets>
    <sheet name="Plan" sheetId="1" r:id="rId1"/>
    <sheet name="Other" sheetId="2" r:id="rId2"/>
  </sheets>
</workbook>"#;

    const RELS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
  <Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet2.xml"/>
  <Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/>
</Relationships>"#;

    const SHARED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="6" uniqueCount="6">
  <si><t>Task</t></si>
  <si><t>Owner</t></si>
  <si><t>Due</t></si>
  <si><r><t>Quarterly </t></r><r><t>report</t></r></si>
  <si><t>Ana</t></si>
  <si><t>Line_x000a_break</t></si>
</sst>"#;

    const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
  <numFmts count="1"><numFmt numFmtId="164" formatCode="dd/mm/yyyy"/></numFmts>
  <cellStyleXfs count="1"><xf numFmtId="0"/></cellStyleXfs>
  <cellXfs count="3">
    <xf numFmtId="0" fontId="0"/>
    <xf numFmtId="164" fontId="0" applyNumberFormat="1"/>
    <xf numFmtId="14" fontId="0" applyNumberFormat="1"/>
  </cellXfs>
</styleSheet>"#;

    const SHEET1: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
  <sheetData>
    <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c><c r="C1" t="s"><v>2</v></c><c r="D1" t="inlineStr"><is><t>Hours</t></is></c><c r="E1" t="inlineStr"><is><t>Notes</t></is></c></row>
    <row r="2"><c r="A2" t="s"><v>3</v></c><c r="B2" t="s"><v>4</v></c><c r="C2" s="1"><v>45453</v></c><c r="D2"><v>4</v></c><c r="E2" t="s"><v>5</v></c></row>
    <row r="4"><c r="A4" t="str"><f>UPPER("deck")</f><v>DECK</v></c><c r="C4" s="2"><v>45454</v></c><c r="D4"><v>2.5</v></c><c r="E4" t="b"><v>1</v></c></row>
  </sheetData>
</worksheet>"#;

    fn build_xlsx(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = SimpleFileOptions::default();
            for (name, body) in parts {
                writer.start_file(*name, options).unwrap();
                writer.write_all(body.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    fn standard_parts() -> Vec<(&'static str, &'static str)> {
        vec![
            ("[Content_Types].xml", CONTENT_TYPES),
            ("xl/workbook.xml", WORKBOOK),
            ("xl/_rels/workbook.xml.rels", RELS),
            ("xl/sharedStrings.xml", SHARED),
            ("xl/styles.xml", STYLES),
            ("xl/worksheets/sheet1.xml", SHEET1),
            (
                "xl/worksheets/sheet2.xml",
                r#"<worksheet><sheetData><row r="1"><c r="A1" t="inlineStr"><is><t>Ignored</t></is></c></row></sheetData></worksheet>"#,
            ),
        ]
    }

    #[test]
    fn test_reads_first_sheet_records() {
        let data = build_xlsx(&standard_parts());
        let records = records_from_grid(read_grid(&data).unwrap());

        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["Task"], "Quarterly report");
        assert_eq!(records[0]["Owner"], "Ana");
        assert_eq!(records[0]["Due"], "2024-06-10");
        assert_eq!(records[0]["Hours"], json!(4));
        assert_eq!(records[0]["Notes"], "Line\nbreak");

        assert_eq!(records[1]["Task"], "DECK");
        assert!(records[1].get("Owner").is_none());
        assert_eq!(records[1]["Due"], "2024-06-11");
        assert_eq!(records[1]["Hours"], json!(2.5));
        assert_eq!(records[1]["Notes"], json!(true));
    }

    #[test]
    fn test_missing_content_types_is_invalid() {
        let parts: Vec<_> = standard_parts()
            .into_iter()
            .filter(|(name, _)| *name != "[Content_Types].xml")
            .collect();
        let err = read_grid(&build_xlsx(&parts)).unwrap_err();
        assert!(matches!(err, ParseError::InvalidFormat(_)));
    }

    #[test]
    fn test_missing_worksheet_part() {
        let parts: Vec<_> = standard_parts()
            .into_iter()
            .filter(|(name, _)| *name != "xl/worksheets/sheet1.xml")
            .collect();
        let err = read_grid(&build_xlsx(&parts)).unwrap_err();
        assert!(matches!(err, ParseError::MissingPart(_)));
    }

    fn parts_with_sheet(sheet: &'static str) -> Vec<(&'static str, &'static str)> {
        standard_parts()
            .into_iter()
            .map(|(name, body)| {
                if name == "xl/worksheets/sheet1.xml" {
                    (name, sheet)
                } else {
                    (name, body)
                }
            })
            .collect()
    }

    #[test]
    fn test_oversized_cell_reference_is_invalid() {
        let sheet = r#"<worksheet><sheetData><row r="1"><c r="A1" t="inlineStr"><is><t>Task</t></is></c></row><row r="2"><c r="A4000000000" t="inlineStr"><is><t>Far away</t></is></c></row></sheetData></worksheet>"#;
        let err = read_grid(&build_xlsx(&parts_with_sheet(sheet))).unwrap_err();
        assert!(matches!(err, ParseError::InvalidFormat(_)));
    }

    #[test]
    fn test_oversized_row_number_is_invalid() {
        let sheet = r#"<worksheet><sheetData><row r="4000000000"><c t="inlineStr"><is><t>Task</t></is></c></row></sheetData></worksheet>"#;
        let err = read_grid(&build_xlsx(&parts_with_sheet(sheet))).unwrap_err();
        assert!(matches!(err, ParseError::InvalidFormat(_)));
    }

    #[test]
    fn test_parse_cell_ref() {
        assert_eq!(parse_cell_ref("A1").unwrap(), (0, 0));
        assert_eq!(parse_cell_ref("AB12").unwrap(), (11, 27));
        assert_eq!(parse_cell_ref("XFD1048576").unwrap(), (1_048_575, 16_383));
        assert!(parse_cell_ref("12").is_err());
        assert!(parse_cell_ref("A0").is_err());
        assert!(parse_cell_ref("XFE1").is_err());
        assert!(parse_cell_ref("A1048577").is_err());
        assert!(parse_cell_ref("A4000000000").is_err());
        assert!(parse_cell_ref("ZZZZZZZZZZZZZZZZZZZZ1").is_err());
    }

    #[test]
    fn test_decode_excel_escapes() {
        assert_eq!(decode_excel_escapes("a_x000d_b"), "a\rb");
        assert_eq!(decode_excel_escapes("snake_xcase"), "snake_xcase");
        assert_eq!(decode_excel_escapes("plain"), "plain");
    }
}
