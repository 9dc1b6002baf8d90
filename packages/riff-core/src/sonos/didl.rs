//! DIDL-Lite metadata parsing.
//!
//! Sonos reports the current item as DIDL-Lite XML inside `TrackMetaData`.
//! Well-formed blobs are read with a namespace-aware parser; anything else
//! (missing namespace declarations, odd prefixes, double-escaped bodies) goes
//! through a prefix-agnostic regex fallback.

use std::borrow::Cow;
use std::sync::OnceLock;
use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;
use regex::Regex;

use super::uri::spotify_track_id;
use crate::model::{Platform, Track};

const DIDL_NS: &[u8] = b"urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/";
const DC_NS: &[u8] = b"http://purl.org/dc/elements/1.1/";
const UPNP_NS: &[u8] = b"urn:schemas-upnp-org:metadata-1-0/upnp/";

/// Separators tried in order when splitting a creator string.
const ARTIST_SEPARATORS: [&str; 5] = [" & ", ", ", " feat. ", " ft. ", " featuring "];

#[derive(Debug, Default)]
struct DidlFields {
    title: String,
    creator: String,
    album: String,
}

#[derive(Clone, Copy)]
enum Field {
    Title,
    Creator,
    Album,
}

/// Parses `TrackMetaData` into a track for the given transport URI.
///
/// Returns `None` when the metadata is empty or carries no title. Duration is
/// left at zero; callers fill it from `TrackDuration`.
#[must_use]
pub fn parse_track_metadata(metadata: &str, uri: &str) -> Option<Track> {
    if metadata.trim().is_empty() {
        return None;
    }

    let fields = parse_namespaced(metadata)
        .filter(|f| !f.title.is_empty())
        .or_else(|| {
            log::debug!("[DIDL] Namespace-aware parse failed, using fallback");
            parse_fallback(metadata)
        })?;

    let source = detect_source(uri);
    let id = match source {
        Platform::Spotify => spotify_track_id(uri).unwrap_or_else(|| uri.to_string()),
        Platform::Sonos => uri.to_string(),
    };

    Some(Track {
        id,
        uri: uri.to_string(),
        title: fields.title,
        artists: split_artists(&fields.creator),
        artist: fields.creator,
        album: fields.album,
        duration: Duration::ZERO,
        source,
    })
}

/// Infers the originating platform from a transport URI.
#[must_use]
pub fn detect_source(uri: &str) -> Platform {
    if uri.to_ascii_lowercase().contains("spotify") {
        Platform::Spotify
    } else {
        Platform::Sonos
    }
}

/// Splits a creator string on the first separator it contains.
#[must_use]
pub fn split_artists(creator: &str) -> Vec<String> {
    if creator.trim().is_empty() {
        return Vec::new();
    }

    for sep in ARTIST_SEPARATORS {
        if creator.contains(sep) {
            return creator
                .split(sep)
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
        }
    }

    vec![creator.trim().to_string()]
}

// ─────────────────────────────────────────────────────────────────────────────
// Namespace-aware parse
// ─────────────────────────────────────────────────────────────────────────────

fn in_ns(ns: &ResolveResult<'_>, uri: &[u8]) -> bool {
    matches!(ns, ResolveResult::Bound(Namespace(n)) if *n == uri)
}

/// Reads title/creator/album from the first `<item>` of a DIDL-Lite document.
fn parse_namespaced(xml: &str) -> Option<DidlFields> {
    let mut reader = NsReader::from_str(xml);
    let mut fields = DidlFields::default();
    let mut in_item = false;
    let mut saw_item = false;
    let mut current: Option<Field> = None;

    loop {
        match reader.read_resolved_event() {
            Ok((ns, Event::Start(e))) => {
                let local = e.local_name();
                match local.as_ref() {
                    b"item" if in_ns(&ns, DIDL_NS) && !saw_item => {
                        in_item = true;
                        saw_item = true;
                    }
                    b"title" if in_item && in_ns(&ns, DC_NS) => current = Some(Field::Title),
                    b"creator" if in_item && in_ns(&ns, DC_NS) => current = Some(Field::Creator),
                    b"album" if in_item && in_ns(&ns, UPNP_NS) => current = Some(Field::Album),
                    _ => current = None,
                }
            }
            Ok((_, Event::End(e))) => {
                if e.local_name().as_ref() == b"item" && in_item {
                    break;
                }
                current = None;
            }
            Ok((_, Event::Text(t))) => {
                if let Some(field) = current {
                    let raw = String::from_utf8_lossy(&t);
                    push_field(&mut fields, field, &html_escape::decode_html_entities(&raw));
                }
            }
            Ok((_, Event::GeneralRef(r))) => {
                if let Some(field) = current {
                    let entity = format!("&{};", String::from_utf8_lossy(&r));
                    push_field(
                        &mut fields,
                        field,
                        &html_escape::decode_html_entities(&entity),
                    );
                }
            }
            Ok((_, Event::CData(c))) => {
                if let Some(field) = current {
                    push_field(&mut fields, field, &String::from_utf8_lossy(&c));
                }
            }
            Ok((_, Event::Eof)) => break,
            Err(e) => {
                log::debug!("[DIDL] XML error: {}", e);
                return None;
            }
            _ => {}
        }
    }

    if !saw_item {
        return None;
    }

    fields.title = fields.title.trim().to_string();
    fields.creator = fields.creator.trim().to_string();
    fields.album = fields.album.trim().to_string();
    Some(fields)
}

fn push_field(fields: &mut DidlFields, field: Field, text: &str) {
    match field {
        Field::Title => fields.title.push_str(text),
        Field::Creator => fields.creator.push_str(text),
        Field::Album => fields.album.push_str(text),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Regex fallback
// ─────────────────────────────────────────────────────────────────────────────

struct FallbackPatterns {
    title: Regex,
    creator: Regex,
    album: Regex,
}

fn element_pattern(local_name: &str) -> Option<Regex> {
    Regex::new(&format!(
        r"<(?:\w+:)?{local_name}[^>]*>([^<]*)</(?:\w+:)?{local_name}>"
    ))
    .ok()
}

fn fallback_patterns() -> Option<&'static FallbackPatterns> {
    static PATTERNS: OnceLock<Option<FallbackPatterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(FallbackPatterns {
                title: element_pattern("title")?,
                creator: element_pattern("creator")?,
                album: element_pattern("album")?,
            })
        })
        .as_ref()
}

fn capture(re: &Regex, xml: &str) -> String {
    re.captures(xml)
        .and_then(|c| c.get(1))
        .map(|m| html_escape::decode_html_entities(m.as_str().trim()).into_owned())
        .unwrap_or_default()
}

/// Extracts fields ignoring namespace prefixes. Captured text is unescaped
/// once; an entity-escaped document is first unescaped to expose its tags.
fn parse_fallback(metadata: &str) -> Option<DidlFields> {
    let xml = if metadata.contains('<') {
        Cow::Borrowed(metadata)
    } else {
        html_escape::decode_html_entities(metadata)
    };
    let patterns = fallback_patterns()?;

    let title = capture(&patterns.title, &xml);
    if title.is_empty() {
        return None;
    }

    Some(DidlFields {
        title,
        creator: capture(&patterns.creator, &xml),
        album: capture(&patterns.album, &xml),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn didl(inner: &str) -> String {
        format!(
            r#"<DIDL-Lite xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/" xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/"><item id="-1" parentID="-1">{inner}</item></DIDL-Lite>"#
        )
    }

    #[test]
    fn parses_namespaced_metadata_and_splits_ampersand() {
        let xml = didl("<dc:title>Foo</dc:title><dc:creator>Bar &amp; Baz</dc:creator><upnp:album>Qux</upnp:album>");
        let track = parse_track_metadata(&xml, "x-sonos-spotify:spotify:track:T1?sid=12")
            .expect("track");

        assert_eq!(track.title, "Foo");
        assert_eq!(track.artist, "Bar & Baz");
        assert_eq!(track.artists, vec!["Bar", "Baz"]);
        assert_eq!(track.album, "Qux");
        assert_eq!(track.source, Platform::Spotify);
        assert_eq!(track.id, "T1");
    }

    #[test]
    fn falls_back_when_namespaces_are_missing() {
        let xml = "<DIDL-Lite><item><dc:title>Song</dc:title><dc:creator>A, B</dc:creator><upnp:album>LP</upnp:album></item></DIDL-Lite>";
        let track = parse_track_metadata(xml, "x-file-cifs://nas/song.mp3").expect("track");

        assert_eq!(track.title, "Song");
        assert_eq!(track.artists, vec!["A", "B"]);
        assert_eq!(track.album, "LP");
        assert_eq!(track.source, Platform::Sonos);
        assert_eq!(track.id, "x-file-cifs://nas/song.mp3");
    }

    #[test]
    fn falls_back_on_escaped_metadata() {
        let xml = "&lt;DIDL-Lite&gt;&lt;item&gt;&lt;r:title&gt;Escaped&lt;/r:title&gt;&lt;/item&gt;&lt;/DIDL-Lite&gt;";
        let track = parse_track_metadata(xml, "").expect("track");
        assert_eq!(track.title, "Escaped");
        assert!(track.artists.is_empty());
    }

    #[test]
    fn fallback_text_is_unescaped_exactly_once() {
        let xml = "<DIDL-Lite><item><dc:title>Rock &lt;n&gt; Roll</dc:title><dc:creator>Tom &amp;amp; Jerry</dc:creator></item></DIDL-Lite>";
        let track = parse_track_metadata(xml, "").expect("track");
        assert_eq!(track.title, "Rock <n> Roll");
        assert_eq!(track.artist, "Tom &amp; Jerry");
    }

    #[test]
    fn empty_or_titleless_metadata_is_none() {
        assert!(parse_track_metadata("", "uri").is_none());
        assert!(parse_track_metadata(&didl("<dc:creator>X</dc:creator>"), "uri").is_none());
    }

    #[test]
    fn only_first_item_is_read() {
        let xml = r#"<DIDL-Lite xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/"><item><dc:title>First</dc:title></item><item><dc:title>Second</dc:title></item></DIDL-Lite>"#;
        let track = parse_track_metadata(xml, "uri").expect("track");
        assert_eq!(track.title, "First");
    }

    #[test]
    fn split_artists_uses_first_matching_separator() {
        assert_eq!(split_artists("A feat. B"), vec!["A", "B"]);
        assert_eq!(split_artists("A & B, C"), vec!["A", "B, C"]);
        assert_eq!(split_artists("Solo"), vec!["Solo"]);
        assert!(split_artists("  ").is_empty());
    }

    #[test]
    fn detect_source_is_case_insensitive() {
        assert_eq!(detect_source("X-SONOS-SPOTIFY:abc"), Platform::Spotify);
        assert_eq!(detect_source("x-rincon-queue:RINCON_1#0"), Platform::Sonos);
    }
}
