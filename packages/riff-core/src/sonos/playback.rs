//! Transport control for Sonos speakers.
//!
//! AVTransport actions: transport URIs, play/pause/skip/seek, the speaker
//! queue, and the three state reads used to compose a playback snapshot.
//! Commands should be sent to the group coordinator.

use std::time::Duration;

use reqwest::Client;

use super::retry::with_retry;
use super::services::SonosService;
use super::soap::{SoapError, SoapRequestBuilder, SoapResult};
use super::types::{MediaInfo, PositionInfo, TransportState};
use super::utils::{extract_xml_text, format_hms};

fn av_transport<'a>(client: &'a Client, ip: &'a str, port: u16, action: &'a str) -> SoapRequestBuilder<'a> {
    SoapRequestBuilder::new(client, ip, port)
        .service(SonosService::AVTransport)
        .action(action)
        .instance_id()
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Sets the transport URI without starting playback.
pub async fn set_av_transport_uri(
    client: &Client,
    ip: &str,
    port: u16,
    uri: &str,
    metadata: &str,
) -> SoapResult<()> {
    log::info!("[Sonos] SetAVTransportURI: ip={}, uri={}", ip, uri);

    with_retry("SetAVTransportURI", || {
        av_transport(client, ip, port, "SetAVTransportURI")
            .arg("CurrentURI", uri)
            .arg("CurrentURIMetaData", metadata)
            .send()
    })
    .await?;
    Ok(())
}

/// Starts or resumes playback of the current transport URI.
pub async fn play(client: &Client, ip: &str, port: u16) -> SoapResult<()> {
    log::info!("[Sonos] Sending Play command to {}", ip);

    with_retry("Play", || {
        av_transport(client, ip, port, "Play").arg("Speed", "1").send()
    })
    .await?;
    Ok(())
}

/// Pauses playback.
///
/// A 701 fault ("transition not available") means the speaker is already
/// paused or stopped and is treated as success.
pub async fn pause(client: &Client, ip: &str, port: u16) -> SoapResult<()> {
    match av_transport(client, ip, port, "Pause").send().await {
        Ok(_) => Ok(()),
        Err(SoapError::Fault(msg)) if msg.contains("701") => {
            log::debug!("[Sonos] Pause: {} already paused (ignoring 701)", ip);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

pub async fn next(client: &Client, ip: &str, port: u16) -> SoapResult<()> {
    with_retry("Next", || av_transport(client, ip, port, "Next").send()).await?;
    Ok(())
}

pub async fn previous(client: &Client, ip: &str, port: u16) -> SoapResult<()> {
    with_retry("Previous", || av_transport(client, ip, port, "Previous").send()).await?;
    Ok(())
}

/// Seeks within the current track (`Unit=REL_TIME`, target `H:MM:SS`).
pub async fn seek(client: &Client, ip: &str, port: u16, position: Duration) -> SoapResult<()> {
    let target = format_hms(position);
    log::debug!("[Sonos] Seek {} to {}", ip, target);

    with_retry("Seek", || {
        av_transport(client, ip, port, "Seek")
            .arg("Unit", "REL_TIME")
            .arg("Target", target.as_str())
            .send()
    })
    .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue
// ─────────────────────────────────────────────────────────────────────────────

/// Appends a URI to the end of the speaker queue.
pub async fn add_uri_to_queue(client: &Client, ip: &str, port: u16, uri: &str) -> SoapResult<()> {
    log::info!("[Sonos] AddURIToQueue: ip={}, uri={}", ip, uri);

    with_retry("AddURIToQueue", || {
        av_transport(client, ip, port, "AddURIToQueue")
            .arg("EnqueuedURI", uri)
            .arg("EnqueuedURIMetaData", "")
            .arg("DesiredFirstTrackNumberEnqueued", "0")
            .arg("EnqueueAsNext", "0")
            .send()
    })
    .await?;
    Ok(())
}

pub async fn remove_all_tracks_from_queue(client: &Client, ip: &str, port: u16) -> SoapResult<()> {
    av_transport(client, ip, port, "RemoveAllTracksFromQueue")
        .send()
        .await?;
    Ok(())
}

/// Points the transport at the speaker's own queue and starts playing it.
pub async fn play_from_queue(
    client: &Client,
    ip: &str,
    port: u16,
    coordinator_uuid: &str,
) -> SoapResult<()> {
    let queue_uri = format!("x-rincon-queue:{coordinator_uuid}#0");
    set_av_transport_uri(client, ip, port, &queue_uri, "").await?;
    play(client, ip, port).await
}

// ─────────────────────────────────────────────────────────────────────────────
// State Reads
// ─────────────────────────────────────────────────────────────────────────────

pub async fn get_transport_info(client: &Client, ip: &str, port: u16) -> SoapResult<TransportState> {
    let response = av_transport(client, ip, port, "GetTransportInfo")
        .send()
        .await?;

    let state = extract_xml_text(&response, "CurrentTransportState").ok_or(SoapError::Parse)?;
    Ok(state.parse().unwrap_or(TransportState::Unknown(state)))
}

/// Reads the current track number, duration, metadata, URI and position.
///
/// `TrackMetaData` is unescaped once, leaving the DIDL-Lite document.
pub async fn get_position_info(client: &Client, ip: &str, port: u16) -> SoapResult<PositionInfo> {
    let response = av_transport(client, ip, port, "GetPositionInfo")
        .send()
        .await?;
    parse_position_info(&response)
}

pub(crate) fn parse_position_info(response: &str) -> SoapResult<PositionInfo> {
    if !response.contains("GetPositionInfoResponse") {
        return Err(SoapError::Parse);
    }

    Ok(PositionInfo {
        track: extract_xml_text(response, "Track")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0),
        track_duration: extract_xml_text(response, "TrackDuration").unwrap_or_default(),
        track_metadata: extract_xml_text(response, "TrackMetaData")
            .filter(|m| m != "NOT_IMPLEMENTED")
            .unwrap_or_default(),
        track_uri: extract_xml_text(response, "TrackURI").unwrap_or_default(),
        rel_time: extract_xml_text(response, "RelTime").unwrap_or_else(|| "0:00:00".to_string()),
    })
}

pub async fn get_media_info(client: &Client, ip: &str, port: u16) -> SoapResult<MediaInfo> {
    let response = av_transport(client, ip, port, "GetMediaInfo")
        .send()
        .await?;

    if !response.contains("GetMediaInfoResponse") {
        return Err(SoapError::Parse);
    }

    Ok(MediaInfo {
        nr_tracks: extract_xml_text(&response, "NrTracks")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0),
        current_uri: extract_xml_text(&response, "CurrentURI").unwrap_or_default(),
        current_uri_metadata: extract_xml_text(&response, "CurrentURIMetaData")
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_position_info_body() {
        let body = "<s:Envelope><s:Body><u:GetPositionInfoResponse xmlns:u=\"urn:schemas-upnp-org:service:AVTransport:1\">\
            <Track>3</Track><TrackDuration>0:03:25</TrackDuration>\
            <TrackMetaData>&lt;DIDL-Lite&gt;&lt;/DIDL-Lite&gt;</TrackMetaData>\
            <TrackURI>x-sonos-spotify:spotify%3atrack%3aabc</TrackURI>\
            <RelTime>0:01:02</RelTime>\
            </u:GetPositionInfoResponse></s:Body></s:Envelope>";

        let info = parse_position_info(body).expect("info");
        assert_eq!(info.track, 3);
        assert_eq!(info.track_duration, "0:03:25");
        assert_eq!(info.track_metadata, "<DIDL-Lite></DIDL-Lite>");
        assert_eq!(info.track_uri, "x-sonos-spotify:spotify%3atrack%3aabc");
        assert_eq!(info.rel_time, "0:01:02");
    }

    #[test]
    fn position_info_treats_not_implemented_metadata_as_empty() {
        let body = "<u:GetPositionInfoResponse><Track>0</Track><TrackMetaData>NOT_IMPLEMENTED</TrackMetaData><TrackURI/></u:GetPositionInfoResponse>";
        let info = parse_position_info(body).expect("info");
        assert!(info.track_metadata.is_empty());
        assert!(info.track_uri.is_empty());
        assert_eq!(info.rel_time, "0:00:00");
    }

    #[test]
    fn position_info_rejects_unrelated_body() {
        assert!(matches!(
            parse_position_info("<html>nope</html>"),
            Err(SoapError::Parse)
        ));
    }
}
