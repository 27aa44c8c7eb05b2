// 📦 Stata Reader - .dta files into a typed Table
// Tagged layout (releases 117, 118, 119) and legacy binary layout (113-115)
//
// Only what the price panel needs: numeric storage types and fixed-width
// strings. Value labels, characteristics and strL storage are not read.
// Stata's numeric missing codes (. and .a-.z) become Value::Missing here.

use crate::error::{FusionError, Result, Stage};
use crate::table::{Table, Value};
use std::path::Path;

/// Smallest double Stata reserves for missing values (2^1023)
pub const STATA_DOUBLE_MISSING: f64 = 8.98846567431158e307;
/// Smallest float Stata reserves for missing values (2^127)
pub const STATA_FLOAT_MISSING: f32 = 1.701_411_8e38;
const STATA_BYTE_MAX: i8 = 100;
const STATA_INT_MAX: i16 = 32_740;
const STATA_LONG_MAX: i32 = 2_147_483_620;

// ============================================================================
// COLUMN TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Byte,
    Int,
    Long,
    Float,
    Double,
    Str(usize),
    StrL,
}

impl ColumnType {
    fn from_tagged(code: u16) -> std::result::Result<Self, String> {
        match code {
            1..=2045 => Ok(ColumnType::Str(code as usize)),
            32768 => Ok(ColumnType::StrL),
            65526 => Ok(ColumnType::Double),
            65527 => Ok(ColumnType::Float),
            65528 => Ok(ColumnType::Long),
            65529 => Ok(ColumnType::Int),
            65530 => Ok(ColumnType::Byte),
            other => Err(format!("unknown variable type code {}", other)),
        }
    }

    fn from_legacy(code: u8) -> std::result::Result<Self, String> {
        match code {
            1..=244 => Ok(ColumnType::Str(code as usize)),
            251 => Ok(ColumnType::Byte),
            252 => Ok(ColumnType::Int),
            253 => Ok(ColumnType::Long),
            254 => Ok(ColumnType::Float),
            255 => Ok(ColumnType::Double),
            other => Err(format!("unknown variable type code {}", other)),
        }
    }

    fn width(&self) -> usize {
        match self {
            ColumnType::Byte => 1,
            ColumnType::Int => 2,
            ColumnType::Long | ColumnType::Float => 4,
            ColumnType::Double | ColumnType::StrL => 8,
            ColumnType::Str(n) => *n,
        }
    }
}

// ============================================================================
// BYTE READER
// ============================================================================

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    big_endian: bool,
}

macro_rules! read_num {
    ($name:ident, $ty:ty, $n:expr) => {
        fn $name(&mut self) -> std::result::Result<$ty, String> {
            let mut buf = [0u8; $n];
            buf.copy_from_slice(self.take($n)?);
            Ok(if self.big_endian {
                <$ty>::from_be_bytes(buf)
            } else {
                <$ty>::from_le_bytes(buf)
            })
        }
    };
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        ByteReader {
            bytes,
            pos: 0,
            big_endian: false,
        }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> std::result::Result<&'a [u8], String> {
        if n > self.remaining() {
            return Err(format!(
                "unexpected end of file at byte {} (wanted {} more)",
                self.pos, n
            ));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn expect(&mut self, tag: &str) -> std::result::Result<(), String> {
        let at = self.pos;
        let found = self.take(tag.len())?;
        if found != tag.as_bytes() {
            return Err(format!("expected '{}' at byte {}", tag, at));
        }
        Ok(())
    }

    fn seek(&mut self, pos: usize) -> std::result::Result<(), String> {
        if pos > self.bytes.len() {
            return Err(format!("offset {} is past the end of the file", pos));
        }
        self.pos = pos;
        Ok(())
    }

    fn u8(&mut self) -> std::result::Result<u8, String> {
        Ok(self.take(1)?[0])
    }

    read_num!(u16, u16, 2);
    read_num!(u32, u32, 4);
    read_num!(u64, u64, 8);
    read_num!(i16, i16, 2);
    read_num!(i32, i32, 4);
    read_num!(f32, f32, 4);
    read_num!(f64, f64, 8);
}

// ============================================================================
// ENTRY POINTS
// ============================================================================

pub fn read_dta(path: &Path) -> Result<Table> {
    let bytes = std::fs::read(path).map_err(|source| FusionError::Io {
        stage: Stage::Load,
        path: path.to_path_buf(),
        source,
    })?;

    parse_dta(&path.display().to_string(), &bytes).map_err(|message| FusionError::Format {
        stage: Stage::Load,
        path: path.to_path_buf(),
        message,
    })
}

/// Parse an in-memory .dta image. `name` labels the resulting table.
pub fn parse_dta(name: &str, bytes: &[u8]) -> std::result::Result<Table, String> {
    if bytes.starts_with(b"<stata_dta>") {
        parse_tagged(name, bytes)
    } else {
        parse_legacy(name, bytes)
    }
}

// ============================================================================
// TAGGED LAYOUT (117+)
// ============================================================================

fn parse_tagged(name: &str, bytes: &[u8]) -> std::result::Result<Table, String> {
    let mut r = ByteReader::new(bytes);

    r.expect("<stata_dta><header><release>")?;
    let release: u16 = std::str::from_utf8(r.take(3)?)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or("unreadable release number")?;
    if !(117..=119).contains(&release) {
        return Err(format!("unsupported release {}", release));
    }

    r.expect("</release><byteorder>")?;
    r.big_endian = match r.take(3)? {
        b"MSF" => true,
        b"LSF" => false,
        other => return Err(format!("unknown byte order '{}'", String::from_utf8_lossy(other))),
    };

    r.expect("</byteorder><K>")?;
    let nvar = if release == 119 {
        r.u32()? as usize
    } else {
        r.u16()? as usize
    };

    r.expect("</K><N>")?;
    let nobs = if release == 117 { r.u32()? as u64 } else { r.u64()? };

    r.expect("</N><label>")?;
    let label_len = if release == 117 {
        r.u8()? as usize
    } else {
        r.u16()? as usize
    };
    r.take(label_len)?;

    r.expect("</label><timestamp>")?;
    let stamp_len = r.u8()? as usize;
    r.take(stamp_len)?;

    r.expect("</timestamp></header><map>")?;
    let mut map = [0u64; 14];
    for offset in map.iter_mut() {
        *offset = r.u64()?;
    }

    r.expect("</map><variable_types>")?;
    let mut types = Vec::with_capacity(nvar);
    for _ in 0..nvar {
        types.push(ColumnType::from_tagged(r.u16()?)?);
    }

    r.expect("</variable_types><varnames>")?;
    let name_width = if release == 117 { 33 } else { 129 };
    let utf8 = release >= 118;
    let mut names = Vec::with_capacity(nvar);
    for _ in 0..nvar {
        names.push(fixed_string(r.take(name_width)?, utf8));
    }

    // map[9] points at <data>; everything in between is metadata we skip
    let data_offset = usize::try_from(map[9]).map_err(|_| "data offset out of range")?;
    r.seek(data_offset)?;
    r.expect("<data>")?;
    let table = read_rows(&mut r, name, names, &types, nobs, utf8)?;
    r.expect("</data>")?;

    Ok(table)
}

// ============================================================================
// LEGACY LAYOUT (113-115)
// ============================================================================

fn parse_legacy(name: &str, bytes: &[u8]) -> std::result::Result<Table, String> {
    let mut r = ByteReader::new(bytes);

    let release = r.u8()?;
    if !(113..=115).contains(&release) {
        return Err(format!("unsupported or unrecognized release {}", release));
    }
    r.big_endian = match r.u8()? {
        1 => true,
        2 => false,
        other => return Err(format!("unknown byte order flag {}", other)),
    };
    r.take(2)?; // filetype, unused

    let nvar = r.u16()? as usize;
    let nobs = r.u32()? as u64;
    r.take(81)?; // data label
    r.take(18)?; // time stamp

    let mut types = Vec::with_capacity(nvar);
    for code in r.take(nvar)? {
        types.push(ColumnType::from_legacy(*code)?);
    }

    let mut names = Vec::with_capacity(nvar);
    for _ in 0..nvar {
        names.push(fixed_string(r.take(33)?, false));
    }

    let format_width = if release == 113 { 12 } else { 49 };
    r.take(2 * (nvar + 1))?; // sort list
    r.take(nvar * format_width)?;
    r.take(nvar * 33)?; // value label names
    r.take(nvar * 81)?; // variable labels

    // expansion fields end with a zero type and zero length
    loop {
        let kind = r.u8()?;
        let len = r.u32()? as usize;
        if kind == 0 && len == 0 {
            break;
        }
        r.take(len)?;
    }

    read_rows(&mut r, name, names, &types, nobs, false)
}

// ============================================================================
// DATA SECTION
// ============================================================================

fn read_rows(
    r: &mut ByteReader<'_>,
    name: &str,
    names: Vec<String>,
    types: &[ColumnType],
    nobs: u64,
    utf8: bool,
) -> std::result::Result<Table, String> {
    if let Some(pos) = types.iter().position(|t| *t == ColumnType::StrL) {
        return Err(format!(
            "column '{}' uses strL storage, which is not supported",
            names[pos]
        ));
    }

    let row_width: usize = types.iter().map(|t| t.width()).sum();
    if row_width == 0 && nobs > 0 {
        return Err(format!("{} observations declared but no variables", nobs));
    }
    let needed = (row_width as u64).saturating_mul(nobs);
    if needed > r.remaining() as u64 {
        return Err(format!(
            "data section truncated: {} rows of {} bytes need {} bytes, {} remain",
            nobs,
            row_width,
            needed,
            r.remaining()
        ));
    }

    let mut table = Table::new(name, names);
    for _ in 0..nobs {
        let mut row = Vec::with_capacity(types.len());
        for column_type in types {
            row.push(read_cell(r, *column_type, utf8)?);
        }
        table.push_row(row);
    }
    Ok(table)
}

fn read_cell(
    r: &mut ByteReader<'_>,
    column_type: ColumnType,
    utf8: bool,
) -> std::result::Result<Value, String> {
    let value = match column_type {
        ColumnType::Byte => {
            let v = r.u8()? as i8;
            (v <= STATA_BYTE_MAX).then_some(v as f64)
        }
        ColumnType::Int => {
            let v = r.i16()?;
            (v <= STATA_INT_MAX).then_some(v as f64)
        }
        ColumnType::Long => {
            let v = r.i32()?;
            (v <= STATA_LONG_MAX).then_some(v as f64)
        }
        ColumnType::Float => {
            let v = r.f32()?;
            (v.is_finite() && v < STATA_FLOAT_MISSING).then_some(v as f64)
        }
        ColumnType::Double => {
            let v = r.f64()?;
            (v.is_finite() && v < STATA_DOUBLE_MISSING).then_some(v)
        }
        ColumnType::Str(width) => {
            let text = fixed_string(r.take(width)?, utf8);
            return Ok(if text.is_empty() {
                Value::Missing
            } else {
                Value::Text(text)
            });
        }
        ColumnType::StrL => return Err("strL storage is not supported".to_string()),
    };
    Ok(Value::from(value))
}

/// NUL-terminated fixed-width field. Pre-118 files are Latin-1.
fn fixed_string(raw: &[u8], utf8: bool) -> String {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    let raw = &raw[..end];
    if utf8 {
        String::from_utf8_lossy(raw).into_owned()
    } else {
        raw.iter().map(|b| *b as char).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STR3: u16 = 3;
    const INT: u16 = 65529;
    const DOUBLE: u16 = 65526;

    fn padded(text: &str, width: usize) -> Vec<u8> {
        let mut field = vec![0u8; width];
        field[..text.len()].copy_from_slice(text.as_bytes());
        field
    }

    /// Minimal release-118 little-endian file
    fn tagged_file(types: &[u16], names: &[&str], nobs: u64, data: &[u8]) -> Vec<u8> {
        tagged_release(118, types, names, nobs, data)
    }

    /// Little-endian tagged file; header field widths follow the release
    fn tagged_release(release: u16, types: &[u16], names: &[&str], nobs: u64, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"<stata_dta><header><release>");
        out.extend_from_slice(release.to_string().as_bytes());
        out.extend_from_slice(b"</release><byteorder>LSF</byteorder><K>");
        match release {
            119 => out.extend_from_slice(&(types.len() as u32).to_le_bytes()),
            _ => out.extend_from_slice(&(types.len() as u16).to_le_bytes()),
        }
        out.extend_from_slice(b"</K><N>");
        match release {
            117 => out.extend_from_slice(&(nobs as u32).to_le_bytes()),
            _ => out.extend_from_slice(&nobs.to_le_bytes()),
        }
        out.extend_from_slice(b"</N><label>");
        match release {
            117 => {
                out.push(4);
                out.extend_from_slice(b"IEA ");
            }
            _ => {
                out.extend_from_slice(&4u16.to_le_bytes());
                out.extend_from_slice(b"IEA ");
            }
        }
        out.extend_from_slice(b"</label><timestamp>");
        out.push(0);
        out.extend_from_slice(b"</timestamp></header><map>");
        let map_pos = out.len();
        out.extend_from_slice(&[0u8; 14 * 8]);
        out.extend_from_slice(b"</map><variable_types>");
        for t in types {
            out.extend_from_slice(&t.to_le_bytes());
        }
        out.extend_from_slice(b"</variable_types><varnames>");
        let name_width = if release == 117 { 33 } else { 129 };
        for name in names {
            out.extend_from_slice(&padded(name, name_width));
        }
        out.extend_from_slice(b"</varnames><sortlist>");
        out.extend_from_slice(&vec![0u8; 2 * (types.len() + 1)]);
        out.extend_from_slice(b"</sortlist>");
        let data_pos = out.len() as u64;
        out[map_pos + 9 * 8..map_pos + 10 * 8].copy_from_slice(&data_pos.to_le_bytes());
        out.extend_from_slice(b"<data>");
        out.extend_from_slice(data);
        out.extend_from_slice(b"</data><strls></strls><value_labels></value_labels></stata_dta>");
        out
    }

    /// Minimal release-114 big-endian file
    fn legacy_file(types: &[u8], names: &[&str], nobs: u32, data: &[u8]) -> Vec<u8> {
        let nvar = types.len();
        let mut out = vec![114u8, 1, 1, 0];
        out.extend_from_slice(&(nvar as u16).to_be_bytes());
        out.extend_from_slice(&nobs.to_be_bytes());
        out.extend_from_slice(&[0u8; 81]);
        out.extend_from_slice(&[0u8; 18]);
        out.extend_from_slice(types);
        for name in names {
            out.extend_from_slice(&padded(name, 33));
        }
        out.extend_from_slice(&vec![0u8; 2 * (nvar + 1)]);
        out.extend_from_slice(&vec![0u8; nvar * 49]);
        out.extend_from_slice(&vec![0u8; nvar * 33]);
        out.extend_from_slice(&vec![0u8; nvar * 81]);
        // one expansion field, then the terminator
        out.push(1);
        out.extend_from_slice(&3u32.to_be_bytes());
        out.extend_from_slice(b"abc");
        out.extend_from_slice(&[0u8; 5]);
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn test_tagged_file_decodes_rows() {
        let mut data = Vec::new();
        data.extend_from_slice(&padded("USA", 3));
        data.extend_from_slice(&2020i16.to_le_bytes());
        data.extend_from_slice(&50.0f64.to_le_bytes());
        data.extend_from_slice(&padded("FRA", 3));
        data.extend_from_slice(&2021i16.to_le_bytes());
        data.extend_from_slice(&STATA_DOUBLE_MISSING.to_le_bytes());

        let bytes = tagged_file(&[STR3, INT, DOUBLE], &["country", "year", "price"], 2, &data);
        let table = parse_dta("prices.dta", &bytes).unwrap();

        assert_eq!(table.columns, vec!["country", "year", "price"]);
        assert_eq!(table.shape(), (2, 3));
        assert_eq!(table.rows[0][0], Value::Text("USA".to_string()));
        assert_eq!(table.rows[0][1], Value::Number(2020.0));
        assert_eq!(table.rows[0][2], Value::Number(50.0));
        assert_eq!(table.rows[1][2], Value::Missing);
    }

    fn two_price_rows() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&padded("BRA", 3));
        data.extend_from_slice(&2019i16.to_le_bytes());
        data.extend_from_slice(&7.25f64.to_le_bytes());
        data.extend_from_slice(&padded("CHN", 3));
        data.extend_from_slice(&2020i16.to_le_bytes());
        data.extend_from_slice(&0.5f64.to_le_bytes());
        data
    }

    #[test]
    fn test_release_117_header_widths() {
        let bytes = tagged_release(117, &[STR3, INT, DOUBLE], &["country", "year", "price"], 2, &two_price_rows());
        let table = parse_dta("r117.dta", &bytes).unwrap();

        assert_eq!(table.columns, vec!["country", "year", "price"]);
        assert_eq!(table.rows[0][0], Value::Text("BRA".to_string()));
        assert_eq!(table.rows[1][1], Value::Number(2020.0));
        assert_eq!(table.rows[1][2], Value::Number(0.5));
    }

    #[test]
    fn test_release_119_header_widths() {
        let bytes = tagged_release(119, &[STR3, INT, DOUBLE], &["country", "year", "price"], 2, &two_price_rows());
        let table = parse_dta("r119.dta", &bytes).unwrap();

        assert_eq!(table.shape(), (2, 3));
        assert_eq!(table.rows[0][2], Value::Number(7.25));
        assert_eq!(table.rows[1][0], Value::Text("CHN".to_string()));
    }

    #[test]
    fn test_rows_without_variables_are_rejected() {
        let bytes = tagged_file(&[], &[], u64::MAX, &[]);
        let err = parse_dta("empty.dta", &bytes).unwrap_err();
        assert!(err.contains("no variables"), "{}", err);
    }

    #[test]
    fn test_extended_missing_codes() {
        // .a is one step above system missing
        let dot_a = f64::from_bits(STATA_DOUBLE_MISSING.to_bits() + (1u64 << 40));
        let mut data = Vec::new();
        data.extend_from_slice(&dot_a.to_le_bytes());
        data.extend_from_slice(&f64::NAN.to_le_bytes());

        let bytes = tagged_file(&[DOUBLE], &["price"], 2, &data);
        let table = parse_dta("prices.dta", &bytes).unwrap();
        assert_eq!(table.rows[0][0], Value::Missing);
        assert_eq!(table.rows[1][0], Value::Missing);
    }

    #[test]
    fn test_legacy_file_big_endian() {
        let mut data = Vec::new();
        data.extend_from_slice(&padded("DEU", 3));
        data.extend_from_slice(&2020i16.to_be_bytes());
        data.extend_from_slice(&12.5f32.to_be_bytes());
        data.push(7);
        data.extend_from_slice(&padded("ITA", 3));
        data.extend_from_slice(&32741i16.to_be_bytes());
        data.extend_from_slice(&STATA_FLOAT_MISSING.to_be_bytes());
        data.push(101);

        let bytes = legacy_file(&[3, 252, 254, 251], &["country", "year", "price", "flag"], 2, &data);
        let table = parse_dta("old.dta", &bytes).unwrap();

        assert_eq!(table.columns, vec!["country", "year", "price", "flag"]);
        assert_eq!(table.rows[0][0], Value::Text("DEU".to_string()));
        assert_eq!(table.rows[0][1], Value::Number(2020.0));
        assert_eq!(table.rows[0][2], Value::Number(12.5));
        assert_eq!(table.rows[0][3], Value::Number(7.0));
        assert_eq!(table.rows[1][1], Value::Missing);
        assert_eq!(table.rows[1][2], Value::Missing);
        assert_eq!(table.rows[1][3], Value::Missing);
    }

    #[test]
    fn test_truncated_data_is_rejected() {
        let bytes = tagged_file(&[DOUBLE], &["price"], 50, &[0u8; 8]);
        let err = parse_dta("short.dta", &bytes).unwrap_err();
        assert!(err.contains("truncated"), "{}", err);
    }

    #[test]
    fn test_strl_is_rejected_by_name() {
        let bytes = tagged_file(&[32768], &["notes"], 0, &[]);
        let err = parse_dta("notes.dta", &bytes).unwrap_err();
        assert!(err.contains("notes"), "{}", err);
    }

    #[test]
    fn test_not_a_stata_file() {
        assert!(parse_dta("x.dta", b"country,year\n").is_err());
    }
}
