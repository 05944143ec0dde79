//! Observation times of image files and ordering of video frames.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use fitrs::{Fits, HeaderValue};
use log::{debug, error};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// formats accepted for DATE-OBS style header values
const HEADER_DATETIME_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
];
const HEADER_DATE_FORMATS: [&str; 1] = ["%Y-%m-%d"];

/// formats tried on a date found inside a file name
const FILENAME_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d-%H-%M-%S",
    "%Y_%m_%d_%H_%M_%S",
    "%Y-%m-%dT%H-%M-%S",
    "%Y%m%d_%H%M%S",
];
const FILENAME_DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y_%m_%d", "%Y%m%d"];

/// date patterns searched for in file names, most specific first
const FILENAME_PATTERNS: [&str; 4] = [
    r"\d{4}[-_]\d{2}[-_]\d{2}[-_T]\d{2}[-_]\d{2}[-_]\d{2}",
    r"\d{4}[-_]\d{2}[-_]\d{2}",
    r"\d{8}[-_]\d{6}",
    r"\d{8}",
];

fn filename_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        FILENAME_PATTERNS
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    error!("bad file name date pattern {}: {}", pattern, e);
                    None
                }
            })
            .collect()
    })
}

/// digit runs and the text between them
fn chunk_pattern() -> Option<&'static Regex> {
    static CHUNKS: OnceLock<Option<Regex>> = OnceLock::new();
    CHUNKS.get_or_init(|| Regex::new(r"\d+|\D+").ok()).as_ref()
}

/// How the inputs of a video are put in order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// plain byte order of the path
    Name,
    /// digit runs compared by value, `file2` before `file10`
    #[default]
    Natural,
    /// observation time from the header or file name, undated files last
    Datetime,
}

fn parse_with(text: &str, datetime_formats: &[&str], date_formats: &[&str]) -> Option<NaiveDateTime> {
    let text = text.trim();
    datetime_formats
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            date_formats
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

/// parse a DATE-OBS style value
pub fn parse_header_datetime(value: &str) -> Option<NaiveDateTime> {
    parse_with(value, &HEADER_DATETIME_FORMATS, &HEADER_DATE_FORMATS)
}

/// date and time embedded in a file name such as `sun_2023-01-01-12-30-00.fits`
pub fn datetime_from_filename(name: &str) -> Option<NaiveDateTime> {
    filename_patterns().iter().find_map(|re| {
        let found = re.find(name)?;
        parse_with(found.as_str(), &FILENAME_DATETIME_FORMATS, &FILENAME_DATE_FORMATS)
    })
}

fn header_date_obs(path: &Path) -> Option<String> {
    let fits = Fits::open(path).ok()?;
    let hdu = fits.get(0)?;
    match hdu.value("DATE-OBS") {
        Some(HeaderValue::CharacterString(s)) => Some(s.trim().to_string()),
        _ => None,
    }
}

/// observation time of a file: DATE-OBS of its primary header, else a date in its name
pub fn extract_datetime<P: AsRef<Path>>(path: P) -> Option<NaiveDateTime> {
    let path = path.as_ref();
    if let Some(dt) = header_date_obs(path).as_deref().and_then(parse_header_datetime) {
        return Some(dt);
    }
    let name = path.file_name()?.to_string_lossy();
    datetime_from_filename(&name)
}

/// local modification time of a file, used when a frame carries no date
pub fn modified_time<P: AsRef<Path>>(path: P) -> Option<NaiveDateTime> {
    let modified: SystemTime = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Local>::from(modified).naive_local())
}

/// `YYYY-MM-DD HH:MM:SS UTC`, or the input unchanged when it cannot be parsed
pub fn format_timestamp(value: &str) -> String {
    match parse_header_datetime(value) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => value.to_string(),
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Chunk {
    Text(String),
    /// digits without leading zeros, compared by length then lexically
    Number(usize, String),
}

fn natural_key(s: &str) -> Vec<Chunk> {
    let Some(chunks) = chunk_pattern() else {
        return vec![Chunk::Text(s.to_lowercase())];
    };
    chunks
        .find_iter(s)
        .map(|m| {
            let part = m.as_str();
            if part.starts_with(|c: char| c.is_ascii_digit()) {
                number_chunk(part)
            } else {
                Chunk::Text(part.to_lowercase())
            }
        })
        .collect()
}

fn number_chunk(digits: &str) -> Chunk {
    let trimmed = digits.trim_start_matches('0');
    Chunk::Number(trimmed.len(), trimmed.to_string())
}

pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    natural_key(a).cmp(&natural_key(b))
}

/// order `files` in place
pub fn sort_files(files: &mut [PathBuf], order: SortOrder) {
    match order {
        SortOrder::Name => files.sort(),
        SortOrder::Natural => {
            files.sort_by(|a, b| natural_cmp(&a.to_string_lossy(), &b.to_string_lossy()))
        }
        SortOrder::Datetime => {
            let mut keyed: Vec<(Option<NaiveDateTime>, PathBuf)> = files
                .iter()
                .map(|path| (extract_datetime(path), path.clone()))
                .collect();
            keyed.sort_by(|(ta, a), (tb, b)| match (ta, tb) {
                (Some(ta), Some(tb)) => ta.cmp(tb),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => natural_cmp(&a.to_string_lossy(), &b.to_string_lossy()),
            });
            let undated = keyed.iter().filter(|(t, _)| t.is_none()).count();
            if undated > 0 {
                debug!("{} files without a date, kept at the end", undated);
            }
            for (slot, (_, path)) in files.iter_mut().zip(keyed) {
                *slot = path;
            }
        }
    }
}
