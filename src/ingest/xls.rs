//! XLS (BIFF8) reader (first worksheet only)
//!
//! Opens the compound file, reads the `Workbook` stream and walks its records.
//! A BIFF8 record is a 4-byte header (type u16 + body length u16) followed by
//! the body; CONTINUE records extend the preceding record's body.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use serde_json::Value;

use super::dates::{is_date_format, number_value, serial_to_value};
use super::error::ParseError;
use super::rows::Grid;

mod records {
    pub const BOF: u16 = 0x0809;
    pub const EOF: u16 = 0x000A;
    pub const CONTINUE: u16 = 0x003C;
    pub const BOUNDSHEET: u16 = 0x0085;
    pub const SST: u16 = 0x00FC;
    pub const DATEMODE: u16 = 0x0022;
    pub const FORMAT: u16 = 0x041E;
    pub const XF: u16 = 0x00E0;
    pub const LABELSST: u16 = 0x00FD;
    pub const LABEL: u16 = 0x0204;
    pub const NUMBER: u16 = 0x0203;
    pub const RK: u16 = 0x027E;
    pub const MULRK: u16 = 0x00BD;
    pub const BOOLERR: u16 = 0x0205;
    pub const FORMULA: u16 = 0x0006;
    pub const STRING: u16 = 0x0207;

    pub const BOF_WORKBOOK_GLOBALS: u16 = 0x0005;
    pub const BOF_WORKSHEET: u16 = 0x0010;
    pub const BIFF8_VERSION: u16 = 0x0600;
}

/// A BIFF8 record with CONTINUE bodies merged in.
#[derive(Debug)]
struct BiffRecord {
    record_type: u16,
    data: Vec<u8>,
    stream_offset: usize,
}

/// Sheet entry from a BOUNDSHEET record.
#[derive(Debug)]
struct SheetInfo {
    /// Byte offset of the sheet's BOF in the Workbook stream.
    offset: usize,
    /// 0 = worksheet, 2 = chart, 6 = macro sheet
    sheet_type: u8,
    name: String,
}

#[derive(Default)]
struct Globals {
    sst: Vec<String>,
    sheets: Vec<SheetInfo>,
    date_1904: bool,
    formats: HashMap<u16, String>,
    xf_formats: Vec<u16>,
}

impl Globals {
    fn is_date_xf(&self, xf: u16) -> bool {
        self.xf_formats
            .get(xf as usize)
            .map_or(false, |&fmt| {
                is_date_format(fmt, self.formats.get(&fmt).map(String::as_str))
            })
    }

    fn number_cell(&self, xf: u16, n: f64) -> Value {
        if self.is_date_xf(xf) {
            serial_to_value(n, self.date_1904)
        } else {
            number_value(n)
        }
    }
}

/// Read the first worksheet of an XLS workbook into a grid.
pub fn read_grid(data: &[u8]) -> Result<Grid, ParseError> {
    let mut compound = cfb::CompoundFile::open(Cursor::new(data))?;

    let stream_path = if compound.exists("/Workbook") {
        "/Workbook"
    } else if compound.exists("/Book") {
        "/Book"
    } else {
        return Err(ParseError::InvalidFormat(
            "no Workbook stream found in compound file".into(),
        ));
    };

    let mut stream_data = Vec::new();
    compound.open_stream(stream_path)?.read_to_end(&mut stream_data)?;

    let all_records = read_all_records(&stream_data)?;
    let (globals, globals_end) = read_globals(&all_records)?;

    let sheet_records = worksheet_records(&all_records, &globals, globals_end);
    let mut grid = Grid::new();
    read_cells(sheet_records, &globals, &mut grid)?;
    Ok(grid)
}

fn read_all_records(stream: &[u8]) -> Result<Vec<BiffRecord>, ParseError> {
    let mut records_out: Vec<BiffRecord> = Vec::new();
    let mut offset = 0usize;

    while offset + 4 <= stream.len() {
        let stream_offset = offset;
        let record_type = read_u16(stream, &mut offset)?;
        let body_len = read_u16(stream, &mut offset)? as usize;

        let body = stream
            .get(offset..offset + body_len)
            .ok_or_else(|| {
                ParseError::Record(format!(
                    "record 0x{record_type:04X} at offset {stream_offset} runs past end of stream"
                ))
            })?
            .to_vec();
        offset += body_len;

        if record_type == records::CONTINUE {
            if let Some(prev) = records_out.last_mut() {
                prev.data.extend_from_slice(&body);
            }
        } else {
            records_out.push(BiffRecord {
                record_type,
                data: body,
                stream_offset,
            });
        }
    }

    Ok(records_out)
}

/// Parse the workbook globals substream; returns the index of its EOF.
fn read_globals(all_records: &[BiffRecord]) -> Result<(Globals, usize), ParseError> {
    let mut globals = Globals::default();

    let first = all_records
        .first()
        .filter(|r| r.record_type == records::BOF)
        .ok_or_else(|| ParseError::InvalidFormat("stream does not start with BOF".into()))?;
    let (version, dt) = parse_bof(&first.data)?;
    if dt != records::BOF_WORKBOOK_GLOBALS {
        return Err(ParseError::InvalidFormat(
            "no workbook globals BOF found".into(),
        ));
    }
    if version != records::BIFF8_VERSION {
        return Err(ParseError::InvalidFormat(format!(
            "expected BIFF8 (0x0600), got 0x{version:04X}"
        )));
    }

    for (idx, rec) in all_records.iter().enumerate().skip(1) {
        match rec.record_type {
            records::EOF => return Ok((globals, idx)),
            records::SST => globals.sst = parse_sst(&rec.data)?,
            records::BOUNDSHEET => globals.sheets.push(parse_boundsheet(&rec.data)?),
            records::DATEMODE => {
                let mut offset = 0;
                globals.date_1904 = read_u16(&rec.data, &mut offset)? == 1;
            }
            records::FORMAT => {
                let mut offset = 0;
                let id = read_u16(&rec.data, &mut offset)?;
                let code = read_unicode_string(&rec.data, &mut offset)?;
                globals.formats.insert(id, code);
            }
            records::XF => {
                let mut offset = 2;
                globals.xf_formats.push(read_u16(&rec.data, &mut offset)?);
            }
            _ => {}
        }
    }

    Err(ParseError::InvalidFormat(
        "workbook globals are not terminated".into(),
    ))
}

/// Records of the first worksheet substream, without its BOF/EOF.
fn worksheet_records<'a>(
    all_records: &'a [BiffRecord],
    globals: &Globals,
    globals_end: usize,
) -> &'a [BiffRecord] {
    let rest = &all_records[globals_end + 1..];

    let by_offset = globals
        .sheets
        .iter()
        .find(|s| s.sheet_type == 0)
        .and_then(|sheet| {
            tracing::debug!("Reading worksheet {}", sheet.name);
            rest.iter().position(|r| r.stream_offset == sheet.offset)
        });
    let by_scan = || {
        rest.iter().position(|r| {
            r.record_type == records::BOF
                && parse_bof(&r.data).map_or(false, |(_, dt)| dt == records::BOF_WORKSHEET)
        })
    };

    let Some(start) = by_offset.or_else(by_scan) else {
        return &[];
    };

    // Walk to the matching EOF, skipping nested substreams (embedded charts)
    let mut depth = 0usize;
    for (i, rec) in rest.iter().enumerate().skip(start) {
        match rec.record_type {
            records::BOF => depth += 1,
            records::EOF => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return &rest[start + 1..i];
                }
            }
            _ => {}
        }
    }
    &rest[start + 1..]
}

fn read_cells(records_in: &[BiffRecord], globals: &Globals, grid: &mut Grid) -> Result<(), ParseError> {
    // A FORMULA with a string result is followed by a STRING record holding the text
    let mut pending_string_cell: Option<(usize, usize)> = None;

    for rec in records_in {
        let data = &rec.data;
        let mut offset = 0usize;
        match rec.record_type {
            records::LABELSST => {
                let (row, col, _xf) = read_cell_header(data, &mut offset)?;
                let idx = read_u32(data, &mut offset)? as usize;
                if let Some(s) = globals.sst.get(idx) {
                    grid.set(row, col, text_value(s.clone()))?;
                }
                pending_string_cell = None;
            }
            records::LABEL => {
                let (row, col, _xf) = read_cell_header(data, &mut offset)?;
                let s = read_unicode_string(data, &mut offset)?;
                grid.set(row, col, text_value(s))?;
                pending_string_cell = None;
            }
            records::NUMBER => {
                let (row, col, xf) = read_cell_header(data, &mut offset)?;
                let n = read_f64(data, &mut offset)?;
                grid.set(row, col, globals.number_cell(xf, n))?;
                pending_string_cell = None;
            }
            records::RK => {
                let (row, col, xf) = read_cell_header(data, &mut offset)?;
                let n = decode_rk(read_u32(data, &mut offset)?);
                grid.set(row, col, globals.number_cell(xf, n))?;
                pending_string_cell = None;
            }
            records::MULRK => {
                let row = read_u16(data, &mut offset)? as usize;
                let first_col = read_u16(data, &mut offset)? as usize;
                // (xf u16 + rk u32) pairs, then last_col u16
                let count = data.len().saturating_sub(6) / 6;
                for i in 0..count {
                    let xf = read_u16(data, &mut offset)?;
                    let n = decode_rk(read_u32(data, &mut offset)?);
                    grid.set(row, first_col + i, globals.number_cell(xf, n))?;
                }
                pending_string_cell = None;
            }
            records::BOOLERR => {
                let (row, col, _xf) = read_cell_header(data, &mut offset)?;
                let value = read_u8(data, &mut offset)?;
                let is_error = read_u8(data, &mut offset)? != 0;
                if !is_error {
                    grid.set(row, col, Value::Bool(value != 0))?;
                }
                pending_string_cell = None;
            }
            records::FORMULA => {
                let (row, col, xf) = read_cell_header(data, &mut offset)?;
                let result = data
                    .get(offset..offset + 8)
                    .ok_or_else(|| ParseError::Record("FORMULA record too short".into()))?;
                pending_string_cell = None;
                if result[6] == 0xFF && result[7] == 0xFF {
                    match result[0] {
                        0 => pending_string_cell = Some((row, col)),
                        1 => grid.set(row, col, Value::Bool(result[2] != 0))?,
                        _ => {}
                    }
                } else {
                    let n = read_f64(data, &mut offset)?;
                    grid.set(row, col, globals.number_cell(xf, n))?;
                }
            }
            records::STRING => {
                if let Some((row, col)) = pending_string_cell.take() {
                    let s = read_unicode_string(data, &mut offset)?;
                    grid.set(row, col, text_value(s))?;
                }
            }
            _ => {}
        }
    }

    Ok(())
}

fn text_value(s: String) -> Value {
    if s.is_empty() {
        Value::Null
    } else {
        Value::String(s)
    }
}

/// row(2) + col(2) + xf(2)
fn read_cell_header(data: &[u8], offset: &mut usize) -> Result<(usize, usize, u16), ParseError> {
    let row = read_u16(data, offset)? as usize;
    let col = read_u16(data, offset)? as usize;
    let xf = read_u16(data, offset)?;
    Ok((row, col, xf))
}

fn parse_bof(data: &[u8]) -> Result<(u16, u16), ParseError> {
    let mut offset = 0;
    let version = read_u16(data, &mut offset)?;
    let dt = read_u16(data, &mut offset)?;
    Ok((version, dt))
}

fn parse_boundsheet(data: &[u8]) -> Result<SheetInfo, ParseError> {
    let mut offset = 0;
    let abs_offset = read_u32(data, &mut offset)? as usize;
    let _visibility = read_u8(data, &mut offset)?;
    let sheet_type = read_u8(data, &mut offset)?;
    let name = read_short_string(data, &mut offset)?;
    Ok(SheetInfo {
        offset: abs_offset,
        sheet_type,
        name,
    })
}

/// Shared String Table: total refs (u32), unique count (u32), then the strings.
fn parse_sst(data: &[u8]) -> Result<Vec<String>, ParseError> {
    let mut offset = 0;
    let _total = read_u32(data, &mut offset)?;
    let unique_count = read_u32(data, &mut offset)? as usize;

    let mut strings = Vec::with_capacity(unique_count.min(65_536));
    for i in 0..unique_count {
        match read_unicode_string(data, &mut offset) {
            Ok(s) => strings.push(s),
            Err(e) => {
                // Some writers pad or truncate the table; keep what decoded
                tracing::warn!("SST parse error at string {}/{}: {}", i, unique_count, e);
                break;
            }
        }
    }
    Ok(strings)
}

fn short_read(offset: usize, need: usize) -> ParseError {
    ParseError::Record(format!(
        "unexpected end of data at offset {}, need {} bytes",
        offset, need
    ))
}

fn read_u8(data: &[u8], offset: &mut usize) -> Result<u8, ParseError> {
    let v = *data.get(*offset).ok_or_else(|| short_read(*offset, 1))?;
    *offset += 1;
    Ok(v)
}

fn read_u16(data: &[u8], offset: &mut usize) -> Result<u16, ParseError> {
    let bytes = data
        .get(*offset..*offset + 2)
        .ok_or_else(|| short_read(*offset, 2))?;
    *offset += 2;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(data: &[u8], offset: &mut usize) -> Result<u32, ParseError> {
    let bytes = data
        .get(*offset..*offset + 4)
        .ok_or_else(|| short_read(*offset, 4))?;
    *offset += 4;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_f64(data: &[u8], offset: &mut usize) -> Result<f64, ParseError> {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(
        data.get(*offset..*offset + 8)
            .ok_or_else(|| short_read(*offset, 8))?,
    );
    *offset += 8;
    Ok(f64::from_le_bytes(bytes))
}

/// Decode an RK-encoded number.
///
/// Bit 0 set: divide by 100. Bit 1 set: bits 2..31 are a signed 30-bit integer;
/// otherwise they are the upper 30 bits of an IEEE 754 double.
fn decode_rk(rk: u32) -> f64 {
    let value = if rk & 0x02 != 0 {
        ((rk as i32) >> 2) as f64
    } else {
        f64::from_bits(((rk & 0xFFFF_FFFC) as u64) << 32)
    };

    if rk & 0x01 != 0 {
        value / 100.0
    } else {
        value
    }
}

/// String with a 1-byte length prefix (BOUNDSHEET).
fn read_short_string(data: &[u8], offset: &mut usize) -> Result<String, ParseError> {
    let char_count = read_u8(data, offset)? as usize;
    let flags = read_u8(data, offset)?;
    read_character_data(data, offset, char_count, flags)
}

/// String with a 2-byte length prefix; skips rich-text runs and phonetic data.
fn read_unicode_string(data: &[u8], offset: &mut usize) -> Result<String, ParseError> {
    let char_count = read_u16(data, offset)? as usize;
    let flags = read_u8(data, offset)?;

    let run_count = if flags & 0x08 != 0 {
        read_u16(data, offset)? as usize
    } else {
        0
    };
    let ext_size = if flags & 0x04 != 0 {
        read_u32(data, offset)? as usize
    } else {
        0
    };

    let text = read_character_data(data, offset, char_count, flags)?;
    *offset += run_count * 4 + ext_size;
    Ok(text)
}

/// Flags bit 0: 0 = compressed Latin-1, 1 = UTF-16LE.
fn read_character_data(
    data: &[u8],
    offset: &mut usize,
    char_count: usize,
    flags: u8,
) -> Result<String, ParseError> {
    if flags & 0x01 != 0 {
        let bytes = data
            .get(*offset..*offset + char_count * 2)
            .ok_or_else(|| short_read(*offset, char_count * 2))?;
        *offset += char_count * 2;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units)
            .map_err(|e| ParseError::Record(format!("invalid UTF-16 string: {e}")))
    } else {
        let bytes = data
            .get(*offset..*offset + char_count)
            .ok_or_else(|| short_read(*offset, char_count))?;
        *offset += char_count;
        Ok(bytes.iter().map(|&b| b as char).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::records_from_grid;
    use serde_json::json;
    use std::io::Write;

    fn record(record_type: u16, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(body.len() + 4);
        out.extend_from_slice(&record_type.to_le_bytes());
        out.extend_from_slice(&(body.len() as u16).to_le_bytes());
        out.extend_from_slice(body);
        out
    }

    fn bof(dt: u16) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&records::BIFF8_VERSION.to_le_bytes());
        body.extend_from_slice(&dt.to_le_bytes());
        body.extend_from_slice(&[0u8; 12]);
        record(records::BOF, &body)
    }

    fn xf(format_id: u16) -> Vec<u8> {
        let mut body = vec![0u8; 20];
        body[2..4].copy_from_slice(&format_id.to_le_bytes());
        record(records::XF, &body)
    }

    fn sst(strings: &[&str]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&(strings.len() as u32).to_le_bytes());
        body.extend_from_slice(&(strings.len() as u32).to_le_bytes());
        for s in strings {
            body.extend_from_slice(&(s.len() as u16).to_le_bytes());
            body.push(0x00);
            body.extend_from_slice(s.as_bytes());
        }
        record(records::SST, &body)
    }

    fn boundsheet(offset: u32, name: &str) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&offset.to_le_bytes());
        body.push(0); // visible
        body.push(0); // worksheet
        body.push(name.len() as u8);
        body.push(0x00);
        body.extend_from_slice(name.as_bytes());
        record(records::BOUNDSHEET, &body)
    }

    fn cell_header(row: u16, col: u16, xf: u16) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&row.to_le_bytes());
        body.extend_from_slice(&col.to_le_bytes());
        body.extend_from_slice(&xf.to_le_bytes());
        body
    }

    fn labelsst(row: u16, col: u16, idx: u32) -> Vec<u8> {
        let mut body = cell_header(row, col, 0);
        body.extend_from_slice(&idx.to_le_bytes());
        record(records::LABELSST, &body)
    }

    fn number(row: u16, col: u16, xf: u16, n: f64) -> Vec<u8> {
        let mut body = cell_header(row, col, xf);
        body.extend_from_slice(&n.to_le_bytes());
        record(records::NUMBER, &body)
    }

    fn rk_int(row: u16, col: u16, n: i32) -> Vec<u8> {
        let mut body = cell_header(row, col, 0);
        body.extend_from_slice(&(((n << 2) as u32) | 0x02).to_le_bytes());
        record(records::RK, &body)
    }

    fn workbook_stream() -> Vec<u8> {
        let globals = |sheet_offset: u32| {
            let mut g = Vec::new();
            g.extend(bof(records::BOF_WORKBOOK_GLOBALS));
            g.extend(xf(0));
            g.extend(xf(14));
            g.extend(sst(&["Task", "Owner", "Due", "Report", "Ana", "Deck"]));
            g.extend(boundsheet(sheet_offset, "Plan"));
            g.extend(record(records::EOF, &[]));
            g
        };
        let placeholder_len = globals(0).len() as u32;
        let mut stream = globals(placeholder_len);

        stream.extend(bof(records::BOF_WORKSHEET));
        stream.extend(labelsst(0, 0, 0));
        stream.extend(labelsst(0, 1, 1));
        stream.extend(labelsst(0, 2, 2));
        stream.extend(labelsst(1, 0, 3));
        stream.extend(labelsst(1, 1, 4));
        stream.extend(number(1, 2, 1, 45453.0));
        stream.extend(labelsst(2, 0, 5));
        stream.extend(rk_int(2, 1, 7));
        stream.extend(record(records::EOF, &[]));
        stream
    }

    fn compound_file(stream_name: &str, stream: &[u8]) -> Vec<u8> {
        let mut compound = cfb::CompoundFile::create(Cursor::new(Vec::new())).unwrap();
        {
            let mut s = compound.create_stream(stream_name).unwrap();
            s.write_all(stream).unwrap();
            s.flush().unwrap();
        }
        compound.flush().unwrap();
        compound.into_inner().into_inner()
    }

    #[test]
    fn test_reads_first_worksheet() {
        let data = compound_file("/Workbook", &workbook_stream());
        let records = records_from_grid(read_grid(&data).unwrap());

        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["Task"], "Report");
        assert_eq!(records[0]["Owner"], "Ana");
        assert_eq!(records[0]["Due"], "2024-06-10");
        assert_eq!(records[1]["Task"], "Deck");
        assert_eq!(records[1]["Owner"], json!(7));
    }

    #[test]
    fn test_missing_workbook_stream() {
        let data = compound_file("/Other", b"nothing");
        let err = read_grid(&data).unwrap_err();
        assert!(matches!(err, ParseError::InvalidFormat(_)));
    }

    #[test]
    fn test_not_a_compound_file() {
        let err = read_grid(b"plain text pretending to be xls").unwrap_err();
        assert!(matches!(err, ParseError::Io(_)));
    }

    #[test]
    fn test_continue_record_is_merged() {
        let mut stream = record(records::SST, &[1, 2]);
        stream.extend(record(records::CONTINUE, &[3, 4]));
        let merged = read_all_records(&stream).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_decode_rk() {
        assert_eq!(decode_rk((42u32 << 2) | 0x02), 42.0);
        assert_eq!(decode_rk(((-5i32 << 2) as u32) | 0x02), -5.0);
        assert_eq!(decode_rk((4200u32 << 2) | 0x03), 42.0);
        let upper = ((42.0_f64.to_bits() >> 32) as u32) & 0xFFFF_FFFC;
        assert_eq!(decode_rk(upper), 42.0);
    }

    #[test]
    fn test_read_wide_string() {
        let data = [0x02, 0x00, 0x01, b'H', 0x00, b'i', 0x00];
        let mut offset = 0;
        assert_eq!(read_unicode_string(&data, &mut offset).unwrap(), "Hi");
        assert_eq!(offset, 7);
    }
}
