//! Text layout of a samples file.
//!
//! ```text
//! $
//! fs=1000000
//! fc=915000000
//! $
//! 1 2;
//! -0.5 0.25;
//! ```
//!
//! A line holding only [`HEADER_DELIMITER`] opens the header section, the next
//! one closes it. Header lines are `key=value`, where the key is the leading
//! run of word characters and the value is everything after the first `=`.
//! Outside the header, every `<real> <imag>;` occurrence on a line is one
//! sample, so a line may carry zero, one, or many samples.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Instant;

use regex::Regex;
use tracing::{debug, trace};

use crate::complex::ComplexSample;
use crate::samples::{Header, SamplesFile};

/// Line marking the start and end of the header section.
pub const HEADER_DELIMITER: char = '$';

/// Terminator written after each sample record.
pub const SAMPLE_TERMINATOR: char = ';';

/// Separator between a header key and its value.
pub const KEY_VALUE_SEPARATOR: char = '=';

const DECIMAL: &str = r"[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?";

fn sample_regex() -> &'static Regex {
    static SAMPLE: OnceLock<Regex> = OnceLock::new();
    SAMPLE.get_or_init(|| {
        let pattern = format!(r"(?P<pair>{DECIMAL}[ \t]+{DECIMAL}){SAMPLE_TERMINATOR}");
        Regex::new(&pattern).unwrap_or_else(|e| unreachable!("sample pattern is valid: {e}"))
    })
}

fn header_regex() -> &'static Regex {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    HEADER.get_or_init(|| {
        Regex::new(r"^(?P<key>\w+)=(?P<value>.*)$")
            .unwrap_or_else(|e| unreachable!("header pattern is valid: {e}"))
    })
}

fn is_delimiter(line: &str) -> bool {
    let mut chars = line.trim_end().chars();
    chars.next() == Some(HEADER_DELIMITER) && chars.next().is_none()
}

/// Parse a samples file from `reader`.
///
/// Header lines without a `key=` prefix are dropped. Duplicate keys keep the
/// last value.
pub fn read_from<R: BufRead>(reader: R, file_name: impl Into<String>) -> io::Result<SamplesFile> {
    let mut file = SamplesFile::new(file_name);
    let mut in_header = false;

    for line in reader.lines() {
        let line = line?;

        if is_delimiter(&line) {
            in_header = !in_header;
            continue;
        }

        if in_header {
            match header_regex().captures(&line) {
                Some(caps) => {
                    file.header.insert(&caps["key"], &caps["value"]);
                }
                None => {
                    debug!(file = %file.file_name, line = %line, "Dropping malformed header line");
                }
            }
        } else {
            file.samples.extend(
                sample_regex()
                    .captures_iter(&line)
                    .map(|caps| ComplexSample::parse(&caps["pair"])),
            );
        }
    }

    Ok(file)
}

/// Serialize a header section followed by sample records into `writer`.
pub fn write_to<W: Write>(
    mut writer: W,
    header: &Header,
    samples: &[ComplexSample],
) -> io::Result<()> {
    writeln!(writer, "{HEADER_DELIMITER}")?;
    for (key, value) in header.iter() {
        writeln!(writer, "{key}{KEY_VALUE_SEPARATOR}{value}")?;
    }
    writeln!(writer, "{HEADER_DELIMITER}")?;

    for sample in samples {
        writeln!(writer, "{sample}{SAMPLE_TERMINATOR}")?;
    }

    writer.flush()
}

/// Read the samples file at `path`, naming it after the path's final component.
pub fn read_path(path: &Path) -> io::Result<SamplesFile> {
    let started = Instant::now();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let file = read_from(BufReader::new(File::open(path)?), name)?;

    debug!(
        path = %path.display(),
        header_entries = file.header.len(),
        samples = file.samples.len(),
        elapsed = ?started.elapsed(),
        "Read samples file"
    );
    Ok(file)
}

/// Write a samples file to `path`, replacing any existing file.
pub fn write_path(path: &Path, header: &Header, samples: &[ComplexSample]) -> io::Result<()> {
    let started = Instant::now();
    write_to(BufWriter::new(File::create(path)?), header, samples)?;

    trace!(
        path = %path.display(),
        samples = samples.len(),
        elapsed = ?started.elapsed(),
        "Wrote samples file"
    );
    Ok(())
}
