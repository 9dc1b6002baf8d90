//! Per-speaker volume control via RenderingControl (Master channel).

use reqwest::Client;

use super::services::SonosService;
use super::soap::{SoapError, SoapRequestBuilder, SoapResult};
use super::utils::extract_xml_text;

/// Gets the speaker's master volume (0-100).
pub async fn get_volume(client: &Client, ip: &str, port: u16) -> SoapResult<u8> {
    let response = SoapRequestBuilder::new(client, ip, port)
        .service(SonosService::RenderingControl)
        .action("GetVolume")
        .instance_id()
        .arg("Channel", "Master")
        .send()
        .await?;

    parse_volume(&response)
}

fn parse_volume(response: &str) -> SoapResult<u8> {
    let volume_str = extract_xml_text(response, "CurrentVolume").ok_or(SoapError::Parse)?;
    let volume: u16 = volume_str.trim().parse().map_err(|_| SoapError::Parse)?;
    Ok(volume.min(100) as u8)
}

/// Sets the speaker's master volume; values above 100 are clamped.
pub async fn set_volume(client: &Client, ip: &str, port: u16, volume: u8) -> SoapResult<()> {
    let clamped = volume.min(100);
    log::debug!("[Sonos] SetVolume {} -> {}", ip, clamped);

    SoapRequestBuilder::new(client, ip, port)
        .service(SonosService::RenderingControl)
        .action("SetVolume")
        .instance_id()
        .arg("Channel", "Master")
        .arg("DesiredVolume", clamped.to_string())
        .send()
        .await?;

    Ok(())
}
