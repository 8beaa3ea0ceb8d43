//! Music deep links: `<scheme>?<percent-encoded JSON>`.

use std::io;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use serde_json::{
    ser::{Formatter, PrettyFormatter},
    Value,
};
use thiserror::Error;

pub const DEFAULT_SCHEME: &str = "kugou://start.weixin";

/// Commands starting with one of these are already complete links.
pub const DIRECT_SCHEMES: [&str; 6] = [
    "orpheus://",
    "ncm://",
    "qqmusic://",
    "kugou://",
    "kuwo://",
    "music://",
];

/// Display name and launch scheme of the supported music apps.
pub const MUSIC_PLATFORMS: [(&str, &str); 5] = [
    ("网易云音乐", "ncm://start.weixin"),
    ("酷狗音乐", "kugou://start.weixin"),
    ("酷我音乐", "kuwo://start.weixin"),
    ("QQ音乐", "qqmusic://start.weixin"),
    ("Apple Music", "applemusic://start.weixin"),
];

/// Everything except ASCII alphanumerics and `-_.~/` is escaped.
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

#[derive(Debug, Error)]
pub enum DeepLinkError {
    #[error("music payload is not valid JSON: {0}")]
    InvalidPayload(#[source] serde_json::Error),
    #[error("link has no '?' query")]
    MissingQuery,
    #[error("link query is not valid UTF-8 once decoded")]
    InvalidEncoding,
    #[error("link query is not valid JSON: {0}")]
    InvalidQuery(#[source] serde_json::Error),
    #[error("failed to render JSON: {0}")]
    Render(#[source] serde_json::Error),
}

pub fn scheme_for_platform(platform: &str) -> Option<&'static str> {
    MUSIC_PLATFORMS
        .iter()
        .find(|(name, _)| *name == platform)
        .map(|(_, scheme)| *scheme)
}

/// Scheme for a music item: its own `uri_scheme` when set, otherwise the
/// scheme of the configured platform. Empty when neither applies.
pub fn resolve_scheme<'a>(item_scheme: &'a str, platform: &str) -> &'a str {
    match item_scheme.trim() {
        "" => scheme_for_platform(platform.trim()).unwrap_or(""),
        scheme => scheme,
    }
}

pub fn is_direct_link(command: &str) -> bool {
    DIRECT_SCHEMES
        .iter()
        .any(|scheme| command.starts_with(scheme))
}

/// Builds the URI handed to the device. A command that is already a link is
/// returned as is; otherwise it must be a JSON payload, which is re-serialized
/// with `", "`/`": "` separators and percent-encoded after `scheme?`.
pub fn build_uri(command: &str, scheme: &str) -> Result<String, DeepLinkError> {
    let command = command.trim();
    if is_direct_link(command) {
        return Ok(command.to_string());
    }

    let payload: Value = serde_json::from_str(command).map_err(DeepLinkError::InvalidPayload)?;
    let json = to_spaced_json(&payload)?;
    let scheme = match scheme.trim() {
        "" => DEFAULT_SCHEME,
        scheme => scheme,
    };
    Ok(format!(
        "{scheme}?{}",
        utf8_percent_encode(&json, QUERY_ENCODE_SET)
    ))
}

/// Extracts the JSON payload of a pasted music link and pretty-prints it.
/// Backslashes are stripped before parsing since shared links often carry
/// escaped quotes.
pub fn parse_link(link: &str) -> Result<String, DeepLinkError> {
    let (_, query) = link.trim().split_once('?').ok_or(DeepLinkError::MissingQuery)?;
    let decoded = percent_decode_str(query)
        .decode_utf8()
        .map_err(|_| DeepLinkError::InvalidEncoding)?;
    let cleaned = decoded.replace('\\', "");
    let value: Value = serde_json::from_str(&cleaned).map_err(DeepLinkError::InvalidQuery)?;

    let mut out = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"    "));
    value
        .serialize(&mut serializer)
        .map_err(DeepLinkError::Render)?;
    String::from_utf8(out).map_err(|_| DeepLinkError::InvalidEncoding)
}

fn to_spaced_json(value: &Value) -> Result<String, DeepLinkError> {
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, SpacedFormatter);
    value
        .serialize(&mut serializer)
        .map_err(DeepLinkError::Render)?;
    String::from_utf8(out).map_err(|_| DeepLinkError::InvalidEncoding)
}

/// Single-line JSON with a space after every `,` and `:`.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

#[cfg(test)]
#[path = "tests/deeplink_tests.rs"]
mod tests;
