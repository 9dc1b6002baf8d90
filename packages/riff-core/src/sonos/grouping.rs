//! Group membership and room naming.
//!
//! Joining points a speaker's transport at a coordinator with the x-rincon
//! scheme; leaving makes the speaker the coordinator of its own group.

use reqwest::Client;

use super::retry::with_retry;
use super::services::SonosService;
use super::soap::{SoapError, SoapRequestBuilder, SoapResult};
use super::utils::extract_xml_text;

/// Joins the speaker at `ip` to the group led by `coordinator_uuid`.
pub async fn join_group(
    client: &Client,
    ip: &str,
    port: u16,
    coordinator_uuid: &str,
) -> SoapResult<()> {
    let group_uri = format!("x-rincon:{coordinator_uuid}");
    log::info!(
        "[Sonos] Joining {} to coordinator {} (uri: {})",
        ip,
        coordinator_uuid,
        group_uri
    );

    with_retry("SetAVTransportURI", || {
        SoapRequestBuilder::new(client, ip, port)
            .service(SonosService::AVTransport)
            .action("SetAVTransportURI")
            .instance_id()
            .arg("CurrentURI", group_uri.as_str())
            .arg("CurrentURIMetaData", "")
            .send()
    })
    .await?;

    Ok(())
}

/// Removes the speaker at `ip` from its group. Idempotent.
pub async fn leave_group(client: &Client, ip: &str, port: u16) -> SoapResult<()> {
    log::info!("[Sonos] Speaker {} leaving group (becoming standalone)", ip);

    SoapRequestBuilder::new(client, ip, port)
        .service(SonosService::AVTransport)
        .action("BecomeCoordinatorOfStandaloneGroup")
        .instance_id()
        .send()
        .await?;

    Ok(())
}

/// Reads the room name from DeviceProperties `GetZoneAttributes`.
pub async fn get_zone_name(client: &Client, ip: &str, port: u16) -> SoapResult<String> {
    let response = SoapRequestBuilder::new(client, ip, port)
        .service(SonosService::DeviceProperties)
        .action("GetZoneAttributes")
        .send()
        .await?;

    extract_xml_text(&response, "CurrentZoneName").ok_or(SoapError::Parse)
}
