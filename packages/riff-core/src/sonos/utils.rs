//! Shared helpers for Sonos XML handling and URL building.

use std::time::Duration;

use quick_xml::events::BytesStart;
use url::Url;

use crate::protocol_constants::SONOS_DEFAULT_PORT;

// ─────────────────────────────────────────────────────────────────────────────
// XML Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Escapes the five XML special characters.
#[must_use]
pub fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Extracts and unescapes the text content of the first `<tag>` element.
///
/// Handles the self-closing form `<tag/>` as an empty string. Intended for
/// flat SOAP response bodies where the element carries no attributes.
#[must_use]
pub fn extract_xml_text(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");

    if let Some(start) = xml.find(&open) {
        let body_start = start + open.len();
        let end = xml[body_start..].find(&close)? + body_start;
        return Some(html_escape::decode_html_entities(&xml[body_start..end]).into_owned());
    }

    if xml.contains(&format!("<{tag}/>")) || xml.contains(&format!("<{tag} />")) {
        return Some(String::new());
    }

    None
}

/// Reads an attribute from a quick-xml start tag, decoding entities.
#[must_use]
pub fn get_xml_attr(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .map(|a| {
            let raw = String::from_utf8_lossy(&a.value);
            html_escape::decode_html_entities(&raw).into_owned()
        })
}

// ─────────────────────────────────────────────────────────────────────────────
// URL Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Builds `http://{host}:{port}{path}`.
#[must_use]
pub fn build_sonos_url(ip: &str, port: u16, path: &str) -> String {
    format!("http://{ip}:{port}{path}")
}

/// Splits a UPnP `Location` URL into host and port.
///
/// The port defaults to 1400 when the URL omits it.
#[must_use]
pub fn parse_location(location: &str) -> Option<(String, u16)> {
    let url = Url::parse(location.trim()).ok()?;
    let host = url.host_str()?.to_string();
    Some((host, url.port().unwrap_or(SONOS_DEFAULT_PORT)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Duration Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Formats a duration as `H:MM:SS` (the UPnP `REL_TIME` format).
#[must_use]
pub fn format_hms(d: Duration) -> String {
    let total = d.as_secs();
    format!("{}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
}

/// Parses `H:MM:SS` (optionally with fractional seconds) into a duration.
///
/// Unparseable input such as `NOT_IMPLEMENTED` yields zero.
#[must_use]
pub fn parse_hms(s: &str) -> Duration {
    let mut parts = s.trim().splitn(3, ':');
    let (Some(h), Some(m), Some(sec)) = (parts.next(), parts.next(), parts.next()) else {
        return Duration::ZERO;
    };
    let (Ok(h), Ok(m), Ok(sec)) = (h.parse::<u64>(), m.parse::<u64>(), sec.parse::<f64>()) else {
        return Duration::ZERO;
    };
    if !sec.is_finite() || sec < 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs(h * 3600 + m * 60) + Duration::from_secs_f64(sec)
}
