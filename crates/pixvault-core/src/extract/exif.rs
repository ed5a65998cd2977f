use std::io::{BufRead, Seek};

use chrono::{FixedOffset, NaiveDateTime};
use exif::{Exif, In, Reader, Tag, Value};

/// Raw capture time from EXIF: local wall time plus the offset tag, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExifDate {
    pub local: NaiveDateTime,
    pub offset: Option<FixedOffset>,
}

/// Date tags in priority order, each with the offset tag that qualifies it.
const DATE_TAGS: [(Tag, Tag); 3] = [
    (Tag::DateTimeOriginal, Tag::OffsetTimeOriginal),
    (Tag::DateTimeDigitized, Tag::OffsetTimeDigitized),
    (Tag::DateTime, Tag::OffsetTime),
];

/// Parse the EXIF block of a container. `Ok(None)` if there is none.
pub fn read_exif<R: BufRead + Seek>(reader: &mut R) -> std::io::Result<Option<Exif>> {
    match Reader::new().read_from_container(reader) {
        Ok(exif) => Ok(Some(exif)),
        Err(exif::Error::Io(e)) => Err(e),
        Err(_) => Ok(None),
    }
}

pub fn capture_date(exif: &Exif) -> Option<ExifDate> {
    for (date_tag, offset_tag) in &DATE_TAGS {
        let Some(raw) = ascii_field(exif, *date_tag) else {
            continue;
        };
        if let Some(local) = parse_exif_datetime(&raw) {
            let offset = ascii_field(exif, *offset_tag).and_then(|s| parse_offset(&s));
            return Some(ExifDate { local, offset });
        }
    }
    None
}

pub fn ascii_field(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Ascii(values) => {
            let raw = values.first()?;
            let s = String::from_utf8_lossy(raw).trim_matches(char::from(0)).trim().to_string();
            (!s.is_empty()).then_some(s)
        }
        _ => None,
    }
}

fn parse_exif_datetime(s: &str) -> Option<NaiveDateTime> {
    let cleaned = s
        .replace('-', ":")
        .replace('/', ":")
        .replace('\\', ":")
        .replace('.', ":");

    // Blank dates are written as "0000:00:00 00:00:00" or spaces
    if cleaned.starts_with("0000") {
        return None;
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(&cleaned, "%Y:%m:%d %H:%M:%S") {
        return Some(dt);
    }

    // Some cameras append subseconds ("2019:05:09 15:47:33:123")
    if let Some(prefix) = cleaned.get(..19) {
        if let Ok(dt) = NaiveDateTime::parse_from_str(prefix, "%Y:%m:%d %H:%M:%S") {
            return Some(dt);
        }
    }

    if let Ok(d) = chrono::NaiveDate::parse_from_str(cleaned.split(' ').next()?, "%Y:%m:%d") {
        return d.and_hms_opt(0, 0, 0);
    }

    None
}

/// Parse an EXIF offset such as `+09:00`, `-0330` or `Z`.
pub fn parse_offset(s: &str) -> Option<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
