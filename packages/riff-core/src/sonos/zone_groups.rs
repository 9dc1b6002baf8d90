//! Zone group topology parsing, retrieval and caching.
//!
//! Handles parsing ZoneGroupState XML into structured `ZoneGroup` data,
//! fetching topology from a speaker via SOAP, and a short-lived cache that
//! grouping commands invalidate.

use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::Client;

use super::services::SonosService;
use super::soap::{SoapRequestBuilder, SoapResult};
use super::types::{ZoneGroup, ZoneGroupMember};
use super::utils::{extract_xml_text, get_xml_attr, parse_location};
use crate::protocol_constants::ZONE_GROUP_CACHE_TTL;

/// Parses ZoneGroupState XML into a vector of ZoneGroup structures.
///
/// Expects the raw ZoneGroupState XML (already unescaped). Members without a
/// UUID, a parseable `Location` or a `ZoneName` are skipped, as are Zone
/// Bridges (`IsZoneBridge="1"`) which cannot play audio. Groups left with no
/// members are dropped. The group name is the coordinator's room name.
pub fn parse_zone_group_xml(xml: &str) -> Vec<ZoneGroup> {
    let mut groups = Vec::new();
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    let mut current_coordinator_uuid: Option<String> = None;
    let mut current_group_id = String::new();
    let mut current_members: Vec<ZoneGroupMember> = Vec::new();
    let mut coordinator_zone_name: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"ZoneGroup" => {
                    current_group_id = get_xml_attr(e, b"ID").unwrap_or_default();
                    current_coordinator_uuid = get_xml_attr(e, b"Coordinator");
                    current_members.clear();
                    coordinator_zone_name = None;
                }
                b"ZoneGroupMember" => {
                    if get_xml_attr(e, b"IsZoneBridge").as_deref() == Some("1") {
                        continue;
                    }

                    let Some(uuid) = get_xml_attr(e, b"UUID") else {
                        continue;
                    };
                    let Some(location) = get_xml_attr(e, b"Location") else {
                        continue;
                    };
                    let Some((ip, port)) = parse_location(&location) else {
                        continue;
                    };
                    let Some(zone_name) = get_xml_attr(e, b"ZoneName") else {
                        continue;
                    };

                    if current_coordinator_uuid.as_ref() == Some(&uuid) {
                        coordinator_zone_name = Some(zone_name.clone());
                    }

                    current_members.push(ZoneGroupMember {
                        uuid,
                        ip,
                        port,
                        zone_name,
                        location,
                    });
                }
                _ => {}
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"ZoneGroup" => {
                if let Some(coord_uuid) = current_coordinator_uuid.take() {
                    if !current_members.is_empty() {
                        let name = coordinator_zone_name
                            .take()
                            .unwrap_or_else(|| current_members[0].zone_name.clone());
                        groups.push(ZoneGroup {
                            id: current_group_id.clone(),
                            name,
                            coordinator_uuid: coord_uuid,
                            members: std::mem::take(&mut current_members),
                        });
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                log::warn!("[Sonos] XML parse error in zone groups: {}", e);
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    groups
}

/// Fetches the current zone groups from any speaker on the network.
pub async fn fetch_zone_groups(client: &Client, ip: &str, port: u16) -> SoapResult<Vec<ZoneGroup>> {
    let response = SoapRequestBuilder::new(client, ip, port)
        .service(SonosService::ZoneGroupTopology)
        .action("GetZoneGroupState")
        .send()
        .await?;

    let Some(decoded_xml) = extract_xml_text(&response, "ZoneGroupState") else {
        return Ok(vec![]);
    };

    Ok(parse_zone_group_xml(&decoded_xml))
}

// ─────────────────────────────────────────────────────────────────────────────
// Cache
// ─────────────────────────────────────────────────────────────────────────────

/// Short-lived cache of the zone-group listing.
///
/// Avoids refetching topology several times within one command sequence.
/// Grouping commands call [`ZoneGroupCache::invalidate`] once they succeed.
pub struct ZoneGroupCache {
    ttl: Duration,
    entry: Mutex<Entry>,
}

#[derive(Default)]
struct Entry {
    /// Bumped by every invalidation. A fetch started under an older
    /// generation must not be stored.
    generation: u64,
    cached: Option<(Instant, Vec<ZoneGroup>)>,
}

impl Default for ZoneGroupCache {
    fn default() -> Self {
        Self::new(ZONE_GROUP_CACHE_TTL)
    }
}

impl ZoneGroupCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(Entry::default()),
        }
    }

    /// Returns the cached listing if it is still fresh.
    #[must_use]
    pub fn get(&self) -> Option<Vec<ZoneGroup>> {
        let guard = self.entry.lock();
        match guard.cached.as_ref() {
            Some((at, groups)) if at.elapsed() < self.ttl => Some(groups.clone()),
            _ => None,
        }
    }

    pub fn store(&self, groups: Vec<ZoneGroup>) {
        self.entry.lock().cached = Some((Instant::now(), groups));
    }

    pub fn invalidate(&self) {
        log::debug!("[Sonos] Zone group cache invalidated");
        let mut entry = self.entry.lock();
        entry.generation += 1;
        entry.cached = None;
    }

    /// Returns the cached listing or fetches a fresh one from `ip`.
    pub async fn get_or_fetch(
        &self,
        client: &Client,
        ip: &str,
        port: u16,
    ) -> SoapResult<Vec<ZoneGroup>> {
        self.get_or_load(|| fetch_zone_groups(client, ip, port)).await
    }

    async fn get_or_load<F, Fut>(&self, load: F) -> SoapResult<Vec<ZoneGroup>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SoapResult<Vec<ZoneGroup>>>,
    {
        if let Some(groups) = self.get() {
            return Ok(groups);
        }
        let generation = self.entry.lock().generation;
        let groups = load().await?;

        let mut entry = self.entry.lock();
        if entry.generation == generation {
            entry.cached = Some((Instant::now(), groups.clone()));
        } else {
            log::debug!("[Sonos] Topology changed during fetch, not caching");
        }
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member_xml(uuid: &str, ip: &str, zone_name: &str) -> String {
        format!(
            r#"<ZoneGroupMember UUID="{uuid}" Location="http://{ip}:1400/xml/device_description.xml" ZoneName="{zone_name}" />"#
        )
    }

    fn group_xml(id: &str, coordinator_uuid: &str, members: &[String]) -> String {
        format!(
            r#"<ZoneGroup Coordinator="{coordinator_uuid}" ID="{id}">{}</ZoneGroup>"#,
            members.join("")
        )
    }

    fn zone_groups_xml(groups: &[String]) -> String {
        format!("<ZoneGroupState><ZoneGroups>{}</ZoneGroups></ZoneGroupState>", groups.join(""))
    }

    #[test]
    fn parses_groups_with_coordinator_name() {
        let xml = zone_groups_xml(&[
            group_xml(
                "G1",
                "RINCON_OFFICE",
                &[
                    member_xml("RINCON_KITCHEN", "192.168.1.10", "Kitchen"),
                    member_xml("RINCON_OFFICE", "192.168.1.20", "Office"),
                ],
            ),
            group_xml(
                "G2",
                "RINCON_BED",
                &[member_xml("RINCON_BED", "192.168.1.30", "Bedroom")],
            ),
        ]);

        let groups = parse_zone_group_xml(&xml);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "Office");
        assert_eq!(groups[0].members.len(), 2);
        let coord = groups[0].coordinator().expect("coordinator");
        assert_eq!(coord.ip, "192.168.1.20");
        assert_eq!(coord.port, 1400);
        assert_eq!(groups[1].id, "G2");
    }

    #[test]
    fn skips_zone_bridges_and_empty_groups() {
        let bridge = r#"<ZoneGroupMember UUID="RINCON_BOOST" Location="http://192.168.1.50:1400/xml" ZoneName="BOOST" IsZoneBridge="1" />"#;
        let xml = zone_groups_xml(&[group_xml("G1", "RINCON_BOOST", &[bridge.to_string()])]);
        assert!(parse_zone_group_xml(&xml).is_empty());
    }

    #[test]
    fn skips_members_with_bad_location() {
        let bad = r#"<ZoneGroupMember UUID="RINCON_X" Location="nope" ZoneName="X" />"#;
        let xml = zone_groups_xml(&[group_xml(
            "G1",
            "RINCON_A",
            &[bad.to_string(), member_xml("RINCON_A", "10.0.0.2", "Den")],
        )]);
        let groups = parse_zone_group_xml(&xml);
        assert_eq!(groups[0].members.len(), 1);
        assert_eq!(groups[0].name, "Den");
    }

    #[test]
    fn missing_coordinator_member_uses_first_name() {
        let xml = zone_groups_xml(&[group_xml(
            "G1",
            "RINCON_GONE",
            &[member_xml("RINCON_A", "10.0.0.2", "Den")],
        )]);
        let groups = parse_zone_group_xml(&xml);
        assert_eq!(groups[0].name, "Den");
        assert!(groups[0].coordinator().is_none());
    }

    #[test]
    fn cache_expires_and_invalidates() {
        let cache = ZoneGroupCache::new(Duration::from_secs(60));
        assert!(cache.get().is_none());

        cache.store(vec![]);
        assert!(cache.get().is_some());

        cache.invalidate();
        assert!(cache.get().is_none());

        let stale = ZoneGroupCache::new(Duration::ZERO);
        stale.store(vec![]);
        assert!(stale.get().is_none());
    }

    fn office_group() -> ZoneGroup {
        parse_zone_group_xml(&zone_groups_xml(&[group_xml(
            "G1",
            "RINCON_OFFICE",
            &[member_xml("RINCON_OFFICE", "192.168.1.20", "Office")],
        )]))
        .remove(0)
    }

    #[tokio::test]
    async fn fetch_is_cached() {
        let cache = ZoneGroupCache::new(Duration::from_secs(60));
        let groups = cache
            .get_or_load(|| async { Ok(vec![office_group()]) })
            .await
            .unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(cache.get().map(|g| g.len()), Some(1));
    }

    #[tokio::test]
    async fn invalidation_during_fetch_discards_result() {
        let cache = ZoneGroupCache::new(Duration::from_secs(60));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let (fetched, ()) = tokio::join!(
            cache.get_or_load(|| async move {
                let _ = rx.await;
                Ok(vec![office_group()])
            }),
            async {
                cache.invalidate();
                let _ = tx.send(());
            },
        );

        assert_eq!(fetched.unwrap().len(), 1);
        assert!(cache.get().is_none());
    }
}
