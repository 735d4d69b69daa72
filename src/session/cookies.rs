//! Netscape cookie file import.
//!
//! Parses the Netscape HTTP cookie file format (7 TAB-separated fields per line)
//! into [`SessionCookie`] records. Exported browser cookies can stand in for the
//! interactive login when building a [`SessionBundle`](super::SessionBundle).

use std::io::BufRead;

use tracing::{debug, instrument, warn};

use super::SessionCookie;

/// Errors that can occur while parsing a cookie file.
#[derive(Debug, thiserror::Error)]
pub enum CookieError {
    /// A line in the cookie file has an invalid format.
    #[error("line {line_number}: {reason} (got: {content})")]
    InvalidLine {
        /// 1-based line number in the cookie file.
        line_number: usize,
        /// The offending line content, with the value redacted.
        content: String,
        /// Description of what was wrong.
        reason: String,
    },

    /// I/O error reading the cookie file.
    #[error("failed to read cookie file: {0}")]
    Io(#[from] std::io::Error),

    /// No valid cookies found in a non-empty file.
    #[error("no valid cookies found in file ({malformed_count} lines failed to parse)")]
    NoCookiesFound {
        /// Number of malformed lines encountered.
        malformed_count: usize,
    },
}

/// Cookies parsed from a file plus per-line warnings for the lines that were skipped.
#[derive(Debug)]
pub struct ParsedCookies {
    /// Successfully parsed cookies, in file order.
    pub cookies: Vec<SessionCookie>,
    /// Line number and reason for each malformed line.
    pub warnings: Vec<(usize, String)>,
}

/// Parses a Netscape-format cookie file.
///
/// Lines starting with `#` and blank lines are skipped, except for the
/// `#HttpOnly_` prefix browsers use to mark HTTP-only cookies.
///
/// # Errors
///
/// Returns [`CookieError::Io`] on read failure, or
/// [`CookieError::NoCookiesFound`] when a non-empty file yields zero valid cookies.
/// Individual malformed lines are collected as warnings.
#[instrument(level = "debug", skip(reader))]
pub fn parse_netscape_cookies(reader: impl BufRead) -> Result<ParsedCookies, CookieError> {
    let mut cookies = Vec::new();
    let mut warnings = Vec::new();
    let mut data_lines = 0;

    for (idx, line_result) in reader.lines().enumerate() {
        let line_number = idx + 1;
        let line = line_result?;
        let line = line.trim_end();

        if line.is_empty() {
            continue;
        }

        let (line, http_only) = match line.strip_prefix("#HttpOnly_") {
            Some(rest) => (rest, true),
            None if line.starts_with('#') => continue,
            None => (line, false),
        };

        data_lines += 1;

        match parse_cookie_line(line, line_number, http_only) {
            Ok(cookie) => {
                debug!(
                    line = line_number,
                    domain = %cookie.domain,
                    name = %cookie.name,
                    "parsed cookie"
                );
                cookies.push(cookie);
            }
            Err(e) => {
                warn!(line = line_number, reason = %e, "skipping malformed cookie line");
                warnings.push((line_number, e.to_string()));
            }
        }
    }

    if cookies.is_empty() && data_lines > 0 {
        return Err(CookieError::NoCookiesFound {
            malformed_count: warnings.len(),
        });
    }

    Ok(ParsedCookies { cookies, warnings })
}

fn parse_cookie_line(
    line: &str,
    line_number: usize,
    http_only: bool,
) -> Result<SessionCookie, CookieError> {
    let invalid = |reason: String| CookieError::InvalidLine {
        line_number,
        content: redact_line_for_error(line),
        reason,
    };

    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 7 {
        return Err(invalid(format!(
            "expected 7 TAB-separated fields, found {}",
            fields.len()
        )));
    }

    let include_subdomains = parse_bool_field(fields[1], "tailmatch").map_err(&invalid)?;
    let secure = parse_bool_field(fields[3], "secure").map_err(&invalid)?;
    let expires = fields[4].parse::<u64>().map_err(|_| {
        invalid(format!(
            "expires field must be a non-negative integer, got '{}'",
            fields[4]
        ))
    })?;

    if fields[0].is_empty() {
        return Err(invalid("domain field is empty".to_string()));
    }
    if fields[5].is_empty() {
        return Err(invalid("cookie name field is empty".to_string()));
    }

    Ok(SessionCookie {
        name: fields[5].to_string(),
        value: fields[6].to_string(),
        domain: fields[0].to_string(),
        path: fields[2].to_string(),
        secure,
        http_only,
        include_subdomains,
        expires,
    })
}

fn parse_bool_field(value: &str, field_name: &str) -> Result<bool, String> {
    match value {
        "TRUE" => Ok(true),
        "FALSE" => Ok(false),
        _ => Err(format!(
            "{field_name} field must be TRUE or FALSE, got '{value}'"
        )),
    }
}

/// Redacts the cookie value (7th field) so error messages are safe to log.
fn redact_line_for_error(line: &str) -> String {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() >= 7 {
        let mut redacted = fields[..6].join("\t");
        redacted.push_str("\t[REDACTED]");
        redacted
    } else {
        line.to_string()
    }
}
