use chrono::NaiveDateTime;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

const MONTH: &str = "(0[1-9]|1[0-2])";

/// (pattern, chrono format). The pattern's `date` group is parsed with the format.
static PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?P<date>(20|19|18)\d{2}{M}[0-3]\d-\d{6})", "%Y%m%d-%H%M%S"),
        (r"(?P<date>(20|19|18)\d{2}{M}[0-3]\d_\d{6})", "%Y%m%d_%H%M%S"),
        (r"(?P<date>(20|19|18)\d{2}-{M}-[0-3]\d-\d{2}-\d{2}-\d{2})", "%Y-%m-%d-%H-%M-%S"),
        (r"(?P<date>(20|19|18)\d{2}-{M}-[0-3]\d-\d{6})", "%Y-%m-%d-%H%M%S"),
        (r"(?P<date>(20|19|18)\d{2}{M}[0-3]\d{7})", "%Y%m%d%H%M%S"),
        (r"(?P<date>(20|19|18)\d{2}_{M}_[0-3]\d_\d{2}_\d{2}_\d{2})", "%Y_%m_%d_%H_%M_%S"),
    ]
    .into_iter()
    .map(|(pattern, format)| {
        let re = Regex::new(&pattern.replace("{M}", MONTH)).expect("valid date pattern");
        (re, format)
    })
    .collect()
});

/// Capture time encoded in camera/phone file names ("IMG_20190509_154733.jpg").
/// The result carries no zone; callers pick one.
pub fn guess_date_from_filename(path: &Path) -> Option<NaiveDateTime> {
    let basename = path.file_name().and_then(|n| n.to_str())?;

    PATTERNS.iter().find_map(|(re, format)| {
        let date = re.captures(basename)?.name("date")?.as_str();
        // YYYYMMDDhhmmss may run on into milliseconds
        let date = if *format == "%Y%m%d%H%M%S" { date.get(..14)? } else { date };
        NaiveDateTime::parse_from_str(date, format).ok()
    })
}
