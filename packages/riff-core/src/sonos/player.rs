//! [`Player`] implementation for a Sonos speaker.
//!
//! Transport commands go to the coordinator of the speaker's group, found
//! through the shared zone-group cache. When topology is unavailable the
//! speaker itself is addressed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use super::didl::{detect_source, parse_track_metadata};
use super::grouping;
use super::playback;
use super::soap::SoapResult;
use super::types::{MediaInfo, SonosDevice};
use super::uri::{to_sonos_uri, SpotifyUriKind};
use super::utils::parse_hms;
use super::volume;
use super::zone_groups::ZoneGroupCache;
use crate::error::{PlayerError, PlayerResult};
use crate::model::{Device, HistoryEntry, PlaybackState, Platform, Queue, Track};
use crate::player::{cancellable, Player};

/// Address of the speaker commands are sent to.
#[derive(Debug, Clone)]
struct Target {
    ip: String,
    port: u16,
    uuid: String,
    name: String,
}

/// Controls one Sonos speaker (and, through its coordinator, its group).
pub struct SonosPlayer {
    client: Client,
    device: SonosDevice,
    zone_groups: Arc<ZoneGroupCache>,
}

impl SonosPlayer {
    #[must_use]
    pub fn new(client: Client, device: SonosDevice, zone_groups: Arc<ZoneGroupCache>) -> Self {
        Self {
            client,
            device,
            zone_groups,
        }
    }

    #[must_use]
    pub fn device(&self) -> &SonosDevice {
        &self.device
    }

    fn own_target(&self) -> Target {
        Target {
            ip: self.device.ip.clone(),
            port: self.device.port,
            uuid: self.device.uuid.clone(),
            name: self.device.display_name().to_string(),
        }
    }

    /// Resolves the group coordinator for this speaker.
    async fn coordinator(&self) -> Target {
        let groups = match self
            .zone_groups
            .get_or_fetch(&self.client, &self.device.ip, self.device.port)
            .await
        {
            Ok(groups) => groups,
            Err(e) => {
                log::debug!("[Sonos] Topology unavailable, addressing {} directly: {}", self.device.ip, e);
                return self.own_target();
            }
        };

        groups
            .iter()
            .find(|g| g.members.iter().any(|m| m.uuid == self.device.uuid))
            .and_then(|g| g.coordinator())
            .map(|c| Target {
                ip: c.ip.clone(),
                port: c.port,
                uuid: c.uuid.clone(),
                name: c.zone_name.clone(),
            })
            .unwrap_or_else(|| self.own_target())
    }

    async fn play_uri_inner(&self, uri: &str) -> SoapResult<()> {
        let coord = self.coordinator().await;
        let client = &self.client;

        match SpotifyUriKind::of(uri) {
            Some(SpotifyUriKind::Track) | None => {
                let sonos_uri = to_sonos_uri(uri);
                playback::set_av_transport_uri(client, &coord.ip, coord.port, &sonos_uri, "")
                    .await?;
                playback::play(client, &coord.ip, coord.port).await
            }
            Some(_) => {
                if let Err(e) =
                    playback::remove_all_tracks_from_queue(client, &coord.ip, coord.port).await
                {
                    log::debug!("[Sonos] Clearing queue failed (continuing): {}", e);
                }
                playback::add_uri_to_queue(client, &coord.ip, coord.port, &to_sonos_uri(uri))
                    .await?;
                playback::play_from_queue(client, &coord.ip, coord.port, &coord.uuid).await
            }
        }
    }

    async fn state_inner(&self) -> SoapResult<PlaybackState> {
        let coord = self.coordinator().await;
        let client = &self.client;

        let (transport, position, volume) = tokio::try_join!(
            playback::get_transport_info(client, &coord.ip, coord.port),
            playback::get_position_info(client, &coord.ip, coord.port),
            // Volume is per speaker, not per group.
            volume::get_volume(client, &self.device.ip, self.device.port),
        )?;

        let track = if position.track_uri.is_empty() {
            None
        } else {
            let mut track = parse_track_metadata(&position.track_metadata, &position.track_uri)
                .unwrap_or_else(|| Track {
                    id: position.track_uri.clone(),
                    uri: position.track_uri.clone(),
                    title: String::new(),
                    artist: String::new(),
                    artists: Vec::new(),
                    album: String::new(),
                    duration: Duration::ZERO,
                    source: detect_source(&position.track_uri),
                });
            track.duration = parse_hms(&position.track_duration);
            Some(track)
        };

        Ok(PlaybackState {
            track,
            device: Some(Device {
                id: coord.uuid,
                name: coord.name,
                volume: Some(volume),
                ..self.device.to_device()
            }),
            is_playing: transport.is_playing(),
            progress: parse_hms(&position.rel_time),
            volume,
            ..PlaybackState::default()
        })
    }

    /// Joins this speaker to the group led by `coordinator`.
    pub async fn join_group(
        &self,
        coordinator: &SonosDevice,
        cancel: &CancellationToken,
    ) -> PlayerResult<()> {
        cancellable(cancel, async {
            grouping::join_group(&self.client, &self.device.ip, self.device.port, &coordinator.uuid)
                .await?;
            self.zone_groups.invalidate();
            Ok(())
        })
        .await
    }

    /// Makes this speaker standalone.
    pub async fn leave_group(&self, cancel: &CancellationToken) -> PlayerResult<()> {
        cancellable(cancel, async {
            grouping::leave_group(&self.client, &self.device.ip, self.device.port).await?;
            self.zone_groups.invalidate();
            Ok(())
        })
        .await
    }

    /// Room name as reported by the speaker.
    pub async fn zone_name(&self, cancel: &CancellationToken) -> PlayerResult<String> {
        cancellable(cancel, async {
            Ok(grouping::get_zone_name(&self.client, &self.device.ip, self.device.port).await?)
        })
        .await
    }

    /// Current transport source and queue length of the group.
    pub async fn media_info(&self, cancel: &CancellationToken) -> PlayerResult<MediaInfo> {
        cancellable(cancel, async {
            let coord = self.coordinator().await;
            Ok(playback::get_media_info(&self.client, &coord.ip, coord.port).await?)
        })
        .await
    }
}

#[async_trait]
impl Player for SonosPlayer {
    fn platform(&self) -> Platform {
        Platform::Sonos
    }

    async fn play(&self, cancel: &CancellationToken) -> PlayerResult<()> {
        cancellable(cancel, async {
            let coord = self.coordinator().await;
            Ok(playback::play(&self.client, &coord.ip, coord.port).await?)
        })
        .await
    }

    async fn play_uri(&self, uri: &str, cancel: &CancellationToken) -> PlayerResult<()> {
        cancellable(cancel, async { Ok(self.play_uri_inner(uri).await?) }).await
    }

    async fn pause(&self, cancel: &CancellationToken) -> PlayerResult<()> {
        cancellable(cancel, async {
            let coord = self.coordinator().await;
            Ok(playback::pause(&self.client, &coord.ip, coord.port).await?)
        })
        .await
    }

    async fn next(&self, cancel: &CancellationToken) -> PlayerResult<()> {
        cancellable(cancel, async {
            let coord = self.coordinator().await;
            Ok(playback::next(&self.client, &coord.ip, coord.port).await?)
        })
        .await
    }

    async fn prev(&self, cancel: &CancellationToken) -> PlayerResult<()> {
        cancellable(cancel, async {
            let coord = self.coordinator().await;
            Ok(playback::previous(&self.client, &coord.ip, coord.port).await?)
        })
        .await
    }

    async fn seek(&self, position_ms: u64, cancel: &CancellationToken) -> PlayerResult<()> {
        cancellable(cancel, async {
            let coord = self.coordinator().await;
            let position = Duration::from_millis(position_ms);
            Ok(playback::seek(&self.client, &coord.ip, coord.port, position).await?)
        })
        .await
    }

    async fn set_volume(&self, percent: u8, cancel: &CancellationToken) -> PlayerResult<()> {
        cancellable(cancel, async {
            Ok(volume::set_volume(&self.client, &self.device.ip, self.device.port, percent).await?)
        })
        .await
    }

    async fn get_state(&self, cancel: &CancellationToken) -> PlayerResult<PlaybackState> {
        cancellable(cancel, async { Ok(self.state_inner().await?) }).await
    }

    async fn get_queue(&self, _cancel: &CancellationToken) -> PlayerResult<Queue> {
        Err(PlayerError::Unsupported {
            operation: "get_queue",
            platform: Platform::Sonos,
        })
    }

    async fn get_recently_played(
        &self,
        _limit: u32,
        _cancel: &CancellationToken,
    ) -> PlayerResult<Vec<HistoryEntry>> {
        Err(PlayerError::Unsupported {
            operation: "get_recently_played",
            platform: Platform::Sonos,
        })
    }

    async fn add_to_queue(&self, uri: &str, cancel: &CancellationToken) -> PlayerResult<()> {
        cancellable(cancel, async {
            let coord = self.coordinator().await;
            let sonos_uri = to_sonos_uri(uri);
            Ok(playback::add_uri_to_queue(&self.client, &coord.ip, coord.port, &sonos_uri).await?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::sonos::test_fixtures::{envelope, fault, SoapStub, TRACK_METADATA_ESCAPED};
    use axum::http::StatusCode;
    use chrono::Utc;

    fn player_for(stub: &SoapStub) -> SonosPlayer {
        let device = SonosDevice {
            ip: "127.0.0.1".into(),
            port: stub.port,
            uuid: "RINCON_TEST".into(),
            model: String::new(),
            name: "Kitchen".into(),
            location: String::new(),
            last_seen: Utc::now(),
        };
        SonosPlayer::new(Client::new(), device, Arc::new(ZoneGroupCache::default()))
    }

    fn stub_state(stub: &SoapStub) {
        stub.respond(
            "GetTransportInfo",
            envelope(
                "GetTransportInfo",
                "<CurrentTransportState>PLAYING</CurrentTransportState>",
            ),
        );
        stub.respond(
            "GetPositionInfo",
            envelope(
                "GetPositionInfo",
                &format!(
                    "<Track>1</Track><TrackDuration>0:03:20</TrackDuration><TrackMetaData>{TRACK_METADATA_ESCAPED}</TrackMetaData><TrackURI>x-sonos-spotify:spotify:track:T1?sid=12&amp;flags=8224&amp;sn=1</TrackURI><RelTime>0:01:40</RelTime>"
                ),
            ),
        );
        stub.respond(
            "GetVolume",
            envelope("GetVolume", "<CurrentVolume>35</CurrentVolume>"),
        );
    }

    /// `member` (RINCON_TEST) grouped under `coord` (RINCON_COORD).
    fn stub_grouped(coord: &SoapStub, member: &SoapStub) {
        member.respond(
            "GetZoneGroupState",
            envelope(
                "GetZoneGroupState",
                &format!(
                    "<ZoneGroupState>&lt;ZoneGroups&gt;&lt;ZoneGroup Coordinator=&quot;RINCON_COORD&quot; ID=&quot;G1&quot;&gt;&lt;ZoneGroupMember UUID=&quot;RINCON_COORD&quot; Location=&quot;http://127.0.0.1:{}/xml&quot; ZoneName=&quot;Living Room&quot;/&gt;&lt;ZoneGroupMember UUID=&quot;RINCON_TEST&quot; Location=&quot;http://127.0.0.1:{}/xml&quot; ZoneName=&quot;Kitchen&quot;/&gt;&lt;/ZoneGroup&gt;&lt;/ZoneGroups&gt;</ZoneGroupState>",
                    coord.port, member.port
                ),
            ),
        );
    }

    #[tokio::test]
    async fn get_state_composes_three_reads() {
        let stub = SoapStub::start().await;
        stub_state(&stub);
        let player = player_for(&stub);

        let state = player
            .get_state(&CancellationToken::new())
            .await
            .expect("state");

        assert!(state.is_playing);
        assert_eq!(state.volume, 35);
        assert_eq!(state.progress, Duration::from_secs(100));
        assert_eq!(state.progress_percent(), 50.0);
        let track = state.track.expect("track");
        assert_eq!(track.title, "Foo");
        assert_eq!(track.artists, vec!["Bar", "Baz"]);
        assert_eq!(track.duration, Duration::from_secs(200));
        assert_eq!(track.source, Platform::Spotify);
        assert_eq!(state.device.map(|d| d.id), Some("RINCON_TEST".to_string()));
    }

    #[tokio::test]
    async fn get_state_fails_when_any_read_fails() {
        let stub = SoapStub::start().await;
        stub_state(&stub);
        stub.respond_with("GetVolume", StatusCode::INTERNAL_SERVER_ERROR, fault(402));
        let player = player_for(&stub);

        let err = player
            .get_state(&CancellationToken::new())
            .await
            .expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Rejected);
    }

    #[tokio::test]
    async fn play_track_uri_sets_transport_then_plays() {
        let stub = SoapStub::start().await;
        let player = player_for(&stub);

        player
            .play_uri("spotify:track:XYZ", &CancellationToken::new())
            .await
            .expect("play");

        let calls = stub.calls();
        let actions: Vec<_> = calls.iter().map(|c| c.action.as_str()).collect();
        assert_eq!(
            actions,
            vec!["GetZoneGroupState", "SetAVTransportURI", "Play"]
        );
        assert!(calls[1]
            .body
            .contains("x-sonos-spotify:spotify:track:XYZ?sid=12&amp;flags=8224&amp;sn=1"));
    }

    #[tokio::test]
    async fn play_container_goes_through_queue() {
        let stub = SoapStub::start().await;
        let player = player_for(&stub);

        player
            .play_uri("spotify:album:A1", &CancellationToken::new())
            .await
            .expect("play");

        let calls = stub.calls();
        let actions: Vec<_> = calls.iter().map(|c| c.action.as_str()).collect();
        assert_eq!(
            actions,
            vec![
                "GetZoneGroupState",
                "RemoveAllTracksFromQueue",
                "AddURIToQueue",
                "SetAVTransportURI",
                "Play"
            ]
        );
        assert!(calls[2].body.contains("x-rincon-cpcontainer:1004206cspotify:album:A1"));
        assert!(calls[3].body.contains("x-rincon-queue:RINCON_TEST#0"));
    }

    #[tokio::test]
    async fn play_container_ignores_queue_clear_failure() {
        let stub = SoapStub::start().await;
        stub.respond_with(
            "RemoveAllTracksFromQueue",
            StatusCode::INTERNAL_SERVER_ERROR,
            fault(800),
        );
        let player = player_for(&stub);

        player
            .play_uri("spotify:playlist:P1", &CancellationToken::new())
            .await
            .expect("play");
        assert!(stub.actions().contains(&"AddURIToQueue".to_string()));
    }

    #[tokio::test]
    async fn commands_go_to_group_coordinator() {
        let coord = SoapStub::start().await;
        let member = SoapStub::start().await;
        stub_grouped(&coord, &member);
        let player = player_for(&member);

        player.next(&CancellationToken::new()).await.expect("next");

        assert_eq!(coord.actions(), vec!["Next"]);
        assert_eq!(member.actions(), vec!["GetZoneGroupState"]);
    }

    #[tokio::test]
    async fn seek_formats_rel_time() {
        let stub = SoapStub::start().await;
        let player = player_for(&stub);

        player
            .seek(65_000, &CancellationToken::new())
            .await
            .expect("seek");

        let seek = stub
            .calls()
            .into_iter()
            .find(|c| c.action == "Seek")
            .expect("seek call");
        assert!(seek.body.contains("<Unit>REL_TIME</Unit><Target>0:01:05</Target>"));
    }

    #[tokio::test]
    async fn pause_when_already_paused_succeeds() {
        let stub = SoapStub::start().await;
        stub.respond_with("Pause", StatusCode::INTERNAL_SERVER_ERROR, fault(701));
        let player = player_for(&stub);

        player
            .pause(&CancellationToken::new())
            .await
            .expect("pause");
    }

    #[tokio::test]
    async fn set_volume_clamps_on_the_speaker() {
        let stub = SoapStub::start().await;
        let player = player_for(&stub);

        player
            .set_volume(150, &CancellationToken::new())
            .await
            .expect("volume");

        let calls = stub.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0]
            .body
            .contains("<Channel>Master</Channel><DesiredVolume>100</DesiredVolume>"));
    }

    #[tokio::test]
    async fn queue_and_history_are_unsupported() {
        let stub = SoapStub::start().await;
        let player = player_for(&stub);
        let cancel = CancellationToken::new();

        let err = player.get_queue(&cancel).await.expect_err("unsupported");
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        let err = player
            .get_recently_played(10, &cancel)
            .await
            .expect_err("unsupported");
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert!(stub.calls().is_empty());
    }

    #[tokio::test]
    async fn add_to_queue_translates_uri() {
        let stub = SoapStub::start().await;
        let player = player_for(&stub);

        player
            .add_to_queue("spotify:track:T9", &CancellationToken::new())
            .await
            .expect("enqueue");

        let add = stub
            .calls()
            .into_iter()
            .find(|c| c.action == "AddURIToQueue")
            .expect("add call");
        assert!(add.body.contains("<EnqueuedURI>x-sonos-spotify:spotify:track:T9"));
        assert!(add.body.contains("<EnqueueAsNext>0</EnqueueAsNext>"));
    }

    #[tokio::test]
    async fn grouping_invalidates_topology_cache() {
        let stub = SoapStub::start().await;
        let player = player_for(&stub);
        let cancel = CancellationToken::new();

        player.play(&cancel).await.expect("play");
        player.play(&cancel).await.expect("play");
        // second play reuses cached topology
        assert_eq!(
            stub.actions().iter().filter(|a| *a == "GetZoneGroupState").count(),
            1
        );

        player.leave_group(&cancel).await.expect("leave");
        player.play(&cancel).await.expect("play");
        assert_eq!(
            stub.actions().iter().filter(|a| *a == "GetZoneGroupState").count(),
            2
        );
        assert!(stub
            .actions()
            .contains(&"BecomeCoordinatorOfStandaloneGroup".to_string()));
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let stub = SoapStub::start().await;
        let player = player_for(&stub);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = player.play(&cancel).await.expect_err("cancelled");
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn zone_name_reads_device_properties() {
        let stub = SoapStub::start().await;
        stub.respond(
            "GetZoneAttributes",
            envelope(
                "GetZoneAttributes",
                "<CurrentZoneName>Kitchen</CurrentZoneName><CurrentIcon>x</CurrentIcon>",
            ),
        );
        let player = player_for(&stub);

        let name = player
            .zone_name(&CancellationToken::new())
            .await
            .expect("name");
        assert_eq!(name, "Kitchen");
    }

    #[tokio::test]
    async fn media_info_reports_queue_source() {
        let stub = SoapStub::start().await;
        stub.respond(
            "GetMediaInfo",
            envelope(
                "GetMediaInfo",
                "<NrTracks>12</NrTracks><CurrentURI>x-rincon-queue:RINCON_TEST#0</CurrentURI><CurrentURIMetaData></CurrentURIMetaData>",
            ),
        );

        let info = player_for(&stub)
            .media_info(&CancellationToken::new())
            .await
            .expect("media info");
        assert_eq!(info.nr_tracks, 12);
        assert_eq!(info.current_uri, "x-rincon-queue:RINCON_TEST#0");
    }

    #[tokio::test]
    async fn grouped_member_reports_its_own_volume() {
        let coord = SoapStub::start().await;
        let member = SoapStub::start().await;
        stub_grouped(&coord, &member);
        stub_state(&coord);
        coord.respond("GetVolume", envelope("GetVolume", "<CurrentVolume>70</CurrentVolume>"));
        member.respond("GetVolume", envelope("GetVolume", "<CurrentVolume>20</CurrentVolume>"));
        let player = player_for(&member);
        let cancel = CancellationToken::new();

        player.set_volume(20, &cancel).await.expect("volume");
        let state = player.get_state(&cancel).await.expect("state");

        assert_eq!(state.volume, 20);
        assert!(!coord.actions().iter().any(|a| a.contains("Volume")));
        assert!(state.track.is_some());
    }
}
