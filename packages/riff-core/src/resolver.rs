//! Device resolution across both backends, and the no-active-device fallback.
//!
//! A free-text identifier is matched against Spotify devices first (exact id,
//! then case-insensitive name, then substring) and only then against Sonos
//! speakers, including zone-group members that SSDP did not answer for.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, PlayerError, PlayerResult};
use crate::model::{Device, Platform};
use crate::player::cancellable;
use crate::sonos::discovery::members_as_devices;
use crate::sonos::types::{SonosDevice, ZoneGroup};

// ─────────────────────────────────────────────────────────────────────────────
// Backend Seams
// ─────────────────────────────────────────────────────────────────────────────

/// Spotify device listing and playback transfer.
#[async_trait]
pub trait SpotifyDevices: Send + Sync {
    async fn spotify_devices(&self) -> PlayerResult<Vec<Device>>;

    /// Moves playback to `device_id` without necessarily starting it.
    async fn transfer_playback(&self, device_id: &str, play: bool) -> PlayerResult<()>;
}

/// Sonos speaker listing.
#[async_trait]
pub trait SonosDirectory: Send + Sync {
    /// Known speakers. `refresh` bypasses any cache.
    async fn sonos_devices(&self, refresh: bool) -> PlayerResult<Vec<SonosDevice>>;

    async fn sonos_zone_groups(&self) -> PlayerResult<Vec<ZoneGroup>>;
}

/// Asks someone to choose a device when nothing else names one.
#[async_trait]
pub trait DevicePicker: Send + Sync {
    /// Returns the index of the chosen candidate, or `None` if the user
    /// declined. Returns `Cancelled` once `cancel` fires.
    async fn pick(
        &self,
        candidates: &[ResolvedDevice],
        cancel: &CancellationToken,
    ) -> PlayerResult<Option<usize>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolved Device
// ─────────────────────────────────────────────────────────────────────────────

/// A device identified on exactly one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedDevice {
    Spotify { id: String, name: String },
    Sonos { device: SonosDevice, name: String },
}

impl ResolvedDevice {
    fn from_spotify(device: &Device) -> Self {
        Self::Spotify {
            id: device.id.clone(),
            name: device.name.clone(),
        }
    }

    fn from_sonos(device: &SonosDevice) -> Self {
        Self::Sonos {
            name: device.display_name().to_string(),
            device: device.clone(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Spotify { name, .. } | Self::Sonos { name, .. } => name,
        }
    }

    /// Spotify device id or Sonos UUID.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Spotify { id, .. } => id,
            Self::Sonos { device, .. } => &device.uuid,
        }
    }

    #[must_use]
    pub fn platform(&self) -> Platform {
        match self {
            Self::Spotify { .. } => Platform::Spotify,
            Self::Sonos { .. } => Platform::Sonos,
        }
    }
}

/// First match by exact id, then case-insensitive name, then substring.
fn find_match<'a, T>(
    items: &'a [T],
    query: &str,
    ids: impl Fn(&T) -> [&str; 2],
    name: impl Fn(&T) -> &str,
) -> Option<&'a T> {
    let lower = query.to_lowercase();
    items
        .iter()
        .find(|item| ids(item).iter().any(|id| !id.is_empty() && *id == query))
        .or_else(|| items.iter().find(|item| name(item).to_lowercase() == lower))
        .or_else(|| {
            items.iter().find(|item| {
                let n = name(item);
                !n.is_empty() && n.to_lowercase().contains(&lower)
            })
        })
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolver
// ─────────────────────────────────────────────────────────────────────────────

/// Where to send playback when a command reports no active device.
#[derive(Debug, Clone, Default)]
pub struct FallbackConfig {
    /// Device named on the command line.
    pub device: Option<String>,
    /// Configured default device.
    pub default_device: Option<String>,
}

/// Resolves identifiers against whichever backends are configured.
#[derive(Clone, Default)]
pub struct DeviceResolver {
    spotify: Option<Arc<dyn SpotifyDevices>>,
    sonos: Option<Arc<dyn SonosDirectory>>,
}

impl DeviceResolver {
    #[must_use]
    pub fn new(
        spotify: Option<Arc<dyn SpotifyDevices>>,
        sonos: Option<Arc<dyn SonosDirectory>>,
    ) -> Self {
        Self { spotify, sonos }
    }

    async fn spotify_candidates(&self) -> PlayerResult<Vec<Device>> {
        match &self.spotify {
            Some(spotify) => spotify.spotify_devices().await,
            None => Ok(Vec::new()),
        }
    }

    /// Discovered speakers plus zone-group members not among them.
    async fn sonos_candidates(&self, refresh: bool) -> PlayerResult<Vec<SonosDevice>> {
        let Some(sonos) = &self.sonos else {
            return Ok(Vec::new());
        };
        let mut devices = sonos.sonos_devices(refresh).await?;
        match sonos.sonos_zone_groups().await {
            Ok(groups) => {
                for member in members_as_devices(&groups) {
                    match devices.iter_mut().find(|d| d.uuid == member.uuid) {
                        Some(known) if known.name.is_empty() => known.name = member.name,
                        Some(_) => {}
                        None => devices.push(member),
                    }
                }
            }
            Err(e) => log::debug!("[Resolver] Zone groups unavailable: {}", e),
        }
        Ok(devices)
    }

    /// Every device on both backends, Spotify first. A backend that fails
    /// to list is skipped with a warning. `refresh` rediscovers Sonos
    /// speakers instead of using cached ones.
    pub async fn list(&self, refresh: bool) -> Vec<ResolvedDevice> {
        let mut all = Vec::new();
        match self.spotify_candidates().await {
            Ok(devices) => all.extend(devices.iter().map(ResolvedDevice::from_spotify)),
            Err(e) => log::warn!("[Resolver] Spotify devices unavailable: {}", e),
        }
        match self.sonos_candidates(refresh).await {
            Ok(devices) => all.extend(devices.iter().map(ResolvedDevice::from_sonos)),
            Err(e) => log::warn!("[Resolver] Sonos devices unavailable: {}", e),
        }
        all
    }

    /// Resolves `query` to a device.
    ///
    /// Sonos is only consulted when Spotify has no match. If neither backend
    /// matches, the first backend error is returned, else `NotFound`.
    pub async fn resolve(&self, query: &str) -> PlayerResult<ResolvedDevice> {
        let mut first_error = None;

        match self.spotify_candidates().await {
            Ok(devices) => {
                if let Some(d) = find_match(&devices, query, |d| [d.id.as_str(), ""], |d| &d.name) {
                    log::debug!("[Resolver] '{}' -> Spotify device {}", query, d.id);
                    return Ok(ResolvedDevice::from_spotify(d));
                }
            }
            Err(e) => {
                log::warn!("[Resolver] Spotify devices unavailable: {}", e);
                first_error = Some(e);
            }
        }

        match self.sonos_candidates(false).await {
            Ok(devices) => {
                if let Some(d) = find_match(
                    &devices,
                    query,
                    |d| [d.uuid.as_str(), d.ip.as_str()],
                    |d| &d.name,
                ) {
                    log::debug!("[Resolver] '{}' -> Sonos speaker {}", query, d.uuid);
                    return Ok(ResolvedDevice::from_sonos(d));
                }
            }
            Err(e) => {
                log::warn!("[Resolver] Sonos devices unavailable: {}", e);
                first_error.get_or_insert(e);
            }
        }

        Err(first_error.unwrap_or_else(|| PlayerError::NotFound(format!("device '{query}'"))))
    }

    /// Picks the fallback target: the named device, else the configured
    /// default, else whatever `picker` chooses.
    async fn fallback_target(
        &self,
        config: &FallbackConfig,
        picker: Option<&dyn DevicePicker>,
        cancel: &CancellationToken,
    ) -> PlayerResult<ResolvedDevice> {
        if let Some(name) = config.device.as_deref().or(config.default_device.as_deref()) {
            return self.resolve(name).await;
        }

        let Some(picker) = picker else {
            return Err(PlayerError::NoActiveDevice);
        };
        let candidates = self.list(false).await;
        if candidates.is_empty() {
            return Err(PlayerError::NotFound("no devices available".into()));
        }
        match picker.pick(&candidates, cancel).await? {
            Some(index) => candidates
                .into_iter()
                .nth(index)
                .ok_or_else(|| PlayerError::NotFound(format!("device #{}", index + 1))),
            None => Err(PlayerError::NoActiveDevice),
        }
    }

    /// Runs `op`, and if it reports no active device, moves playback to a
    /// fallback target and runs it exactly once more.
    ///
    /// `op` receives `None` on the first run and the target on the retry.
    /// Spotify targets get a paused transfer first; Sonos speakers are
    /// addressed directly. The retry's result is returned unchanged.
    ///
    /// Choosing the fallback stops with `Cancelled` once `cancel` fires.
    pub async fn with_fallback<T, F, Fut>(
        &self,
        config: &FallbackConfig,
        picker: Option<&dyn DevicePicker>,
        cancel: &CancellationToken,
        mut op: F,
    ) -> PlayerResult<T>
    where
        F: FnMut(Option<ResolvedDevice>) -> Fut,
        Fut: Future<Output = PlayerResult<T>>,
    {
        match op(None).await {
            Err(e) if e.kind() == ErrorKind::NoActiveDevice => {
                log::info!("[Resolver] No active device, looking for a fallback");
            }
            other => return other,
        }

        let target =
            cancellable(cancel, self.fallback_target(config, picker, cancel)).await?;
        if let ResolvedDevice::Spotify { id, name } = &target {
            let spotify = self.spotify.as_ref().ok_or(PlayerError::NoActiveDevice)?;
            log::info!("[Resolver] Transferring playback to {}", name);
            spotify.transfer_playback(id, false).await?;
        }
        op(Some(target)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::device;
    use crate::sonos::types::ZoneGroupMember;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockSpotify {
        devices: Vec<Device>,
        fail: bool,
        transfers: Mutex<Vec<(String, bool)>>,
    }

    #[async_trait]
    impl SpotifyDevices for MockSpotify {
        async fn spotify_devices(&self) -> PlayerResult<Vec<Device>> {
            if self.fail {
                return Err(PlayerError::NotAuthenticated("no stored token".into()));
            }
            Ok(self.devices.clone())
        }

        async fn transfer_playback(&self, device_id: &str, play: bool) -> PlayerResult<()> {
            self.transfers.lock().push((device_id.to_string(), play));
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockSonos {
        devices: Vec<SonosDevice>,
        groups: Vec<ZoneGroup>,
        refreshes: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl SonosDirectory for MockSonos {
        async fn sonos_devices(&self, refresh: bool) -> PlayerResult<Vec<SonosDevice>> {
            self.refreshes.lock().push(refresh);
            Ok(self.devices.clone())
        }

        async fn sonos_zone_groups(&self) -> PlayerResult<Vec<ZoneGroup>> {
            Ok(self.groups.clone())
        }
    }

    struct FirstPicker {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DevicePicker for FirstPicker {
        async fn pick(
            &self,
            _candidates: &[ResolvedDevice],
            _cancel: &CancellationToken,
        ) -> PlayerResult<Option<usize>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(0))
        }
    }

    /// Never answers, like a prompt nobody types into.
    struct SilentPicker;

    #[async_trait]
    impl DevicePicker for SilentPicker {
        async fn pick(
            &self,
            _candidates: &[ResolvedDevice],
            _cancel: &CancellationToken,
        ) -> PlayerResult<Option<usize>> {
            std::future::pending().await
        }
    }

    fn speaker(uuid: &str, ip: &str, name: &str) -> SonosDevice {
        SonosDevice {
            ip: ip.into(),
            port: 1400,
            uuid: uuid.into(),
            model: String::new(),
            name: name.into(),
            location: String::new(),
            last_seen: Utc::now(),
        }
    }

    fn member(uuid: &str, ip: &str, name: &str) -> ZoneGroupMember {
        ZoneGroupMember {
            uuid: uuid.into(),
            ip: ip.into(),
            port: 1400,
            zone_name: name.into(),
            location: format!("http://{ip}:1400/xml/device_description.xml"),
        }
    }

    fn build(spotify: MockSpotify, sonos: MockSonos) -> (DeviceResolver, Arc<MockSpotify>) {
        let spotify = Arc::new(spotify);
        let sonos: Arc<dyn SonosDirectory> = Arc::new(sonos);
        let resolver = DeviceResolver::new(
            Some(Arc::clone(&spotify) as Arc<dyn SpotifyDevices>),
            Some(sonos),
        );
        (resolver, spotify)
    }

    #[tokio::test]
    async fn exact_name_beats_earlier_substring() {
        let (resolver, _) = build(
            MockSpotify {
                devices: vec![device("a2", "Kitchen"), device("b1", "Kitchen Speaker")],
                ..Default::default()
            },
            MockSonos::default(),
        );
        assert_eq!(resolver.resolve("Kitchen").await.unwrap().id(), "a2");

        let (resolver, _) = build(
            MockSpotify {
                devices: vec![device("b1", "Kitchen Speaker"), device("a2", "Kitchen")],
                ..Default::default()
            },
            MockSonos::default(),
        );
        assert_eq!(resolver.resolve("kitchen").await.unwrap().id(), "a2");
    }

    #[tokio::test]
    async fn id_match_comes_first_and_substring_last() {
        let (resolver, _) = build(
            MockSpotify {
                devices: vec![device("den", "Office"), device("x9", "Den")],
                ..Default::default()
            },
            MockSonos::default(),
        );
        assert_eq!(resolver.resolve("den").await.unwrap().id(), "den");
        assert_eq!(resolver.resolve("offi").await.unwrap().id(), "den");
    }

    #[tokio::test]
    async fn falls_through_to_sonos_and_zone_members() {
        let (resolver, _) = build(
            MockSpotify {
                devices: vec![device("a1", "Laptop")],
                ..Default::default()
            },
            MockSonos {
                devices: vec![speaker("RINCON_A", "10.0.0.2", "Living Room")],
                groups: vec![ZoneGroup {
                    id: "g1".into(),
                    name: "Living Room".into(),
                    coordinator_uuid: "RINCON_A".into(),
                    members: vec![
                        member("RINCON_A", "10.0.0.2", "Living Room"),
                        member("RINCON_B", "10.0.0.3", "Bedroom"),
                    ],
                }],
                ..Default::default()
            },
        );

        let living = resolver.resolve("living").await.unwrap();
        assert_eq!(living.platform(), Platform::Sonos);
        assert_eq!(living.name(), "Living Room");

        match resolver.resolve("Bedroom").await.unwrap() {
            ResolvedDevice::Sonos { device, .. } => assert_eq!(device.ip, "10.0.0.3"),
            other => panic!("expected a Sonos device, got {other:?}"),
        }

        assert_eq!(resolver.resolve("10.0.0.2").await.unwrap().id(), "RINCON_A");
    }

    #[tokio::test]
    async fn unknown_name_is_not_found() {
        let (resolver, _) = build(MockSpotify::default(), MockSonos::default());
        let err = resolver.resolve("Garage").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn spotify_failure_still_searches_sonos() {
        let (resolver, _) = build(
            MockSpotify {
                fail: true,
                ..Default::default()
            },
            MockSonos {
                devices: vec![speaker("RINCON_A", "10.0.0.2", "Patio")],
                ..Default::default()
            },
        );
        assert_eq!(resolver.resolve("Patio").await.unwrap().id(), "RINCON_A");

        let err = resolver.resolve("Nowhere").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }

    #[tokio::test]
    async fn fallback_transfers_to_default_and_retries_once() {
        let (resolver, spotify) = build(
            MockSpotify {
                devices: vec![device("a2", "Kitchen")],
                ..Default::default()
            },
            MockSonos::default(),
        );
        let config = FallbackConfig {
            device: None,
            default_device: Some("Kitchen".into()),
        };
        let attempts = Mutex::new(Vec::new());

        let out = resolver
            .with_fallback(&config, None, &CancellationToken::new(), |target| {
                attempts.lock().push(target.clone());
                async move {
                    match target {
                        None => Err(PlayerError::NoActiveDevice),
                        Some(t) => Ok(t.name().to_string()),
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(out, "Kitchen");
        assert_eq!(attempts.lock().len(), 2);
        assert_eq!(*spotify.transfers.lock(), vec![("a2".to_string(), false)]);
    }

    #[tokio::test]
    async fn second_failure_is_surfaced_unchanged() {
        let (resolver, _) = build(
            MockSpotify {
                devices: vec![device("a2", "Kitchen")],
                ..Default::default()
            },
            MockSonos::default(),
        );
        let config = FallbackConfig {
            device: Some("a2".into()),
            default_device: None,
        };
        let calls = AtomicUsize::new(0);

        let err = resolver
            .with_fallback(&config, None, &CancellationToken::new(), |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err::<(), _>(PlayerError::NoActiveDevice)
                    } else {
                        Err(PlayerError::Server {
                            status: 502,
                            message: "bad gateway".into(),
                        })
                    }
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(err, PlayerError::Server { status: 502, .. }));
    }

    #[tokio::test]
    async fn other_errors_skip_fallback() {
        let (resolver, spotify) = build(MockSpotify::default(), MockSonos::default());
        let calls = AtomicUsize::new(0);

        let err = resolver
            .with_fallback(&FallbackConfig::default(), None, &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(PlayerError::Network("reset".into())) }
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(spotify.transfers.lock().is_empty());
    }

    #[tokio::test]
    async fn picker_is_asked_without_configured_device() {
        let (resolver, spotify) = build(
            MockSpotify {
                devices: vec![device("p1", "Phone")],
                ..Default::default()
            },
            MockSonos::default(),
        );
        let picker = FirstPicker {
            calls: AtomicUsize::new(0),
        };

        resolver
            .with_fallback(
                &FallbackConfig::default(),
                Some(&picker as &dyn DevicePicker),
                &CancellationToken::new(),
                |target| async move {
                    match target {
                        None => Err(PlayerError::NoActiveDevice),
                        Some(_) => Ok(()),
                    }
                },
            )
            .await
            .unwrap();

        assert_eq!(picker.calls.load(Ordering::SeqCst), 1);
        assert_eq!(spotify.transfers.lock()[0].0, "p1");
    }

    #[tokio::test]
    async fn sonos_target_skips_transfer() {
        let (resolver, spotify) = build(
            MockSpotify::default(),
            MockSonos {
                devices: vec![speaker("RINCON_A", "10.0.0.2", "Patio")],
                ..Default::default()
            },
        );
        let config = FallbackConfig {
            device: Some("Patio".into()),
            default_device: None,
        };

        let platform = resolver
            .with_fallback(&config, None, &CancellationToken::new(), |target| async move {
                match target {
                    None => Err(PlayerError::NoActiveDevice),
                    Some(t) => Ok(t.platform()),
                }
            })
            .await
            .unwrap();

        assert_eq!(platform, Platform::Sonos);
        assert!(spotify.transfers.lock().is_empty());
    }

    #[tokio::test]
    async fn no_target_without_picker_keeps_no_active_device() {
        let (resolver, _) = build(MockSpotify::default(), MockSonos::default());
        let err = resolver
            .with_fallback(&FallbackConfig::default(), None, &CancellationToken::new(), |_| async {
                Err::<(), _>(PlayerError::NoActiveDevice)
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoActiveDevice);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_picking_stops_fallback() {
        let (resolver, spotify) = build(
            MockSpotify {
                devices: vec![device("p1", "Phone")],
                ..Default::default()
            },
            MockSonos::default(),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(3)).await;
            trigger.cancel();
        });
        let calls = AtomicUsize::new(0);

        let err = resolver
            .with_fallback(
                &FallbackConfig::default(),
                Some(&SilentPicker as &dyn DevicePicker),
                &cancel,
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(PlayerError::NoActiveDevice) }
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(spotify.transfers.lock().is_empty());
    }

    #[tokio::test]
    async fn list_refresh_reaches_sonos_but_resolve_uses_cache() {
        let sonos = Arc::new(MockSonos {
            devices: vec![speaker("RINCON_A", "10.0.0.2", "Patio")],
            ..Default::default()
        });
        let resolver = DeviceResolver::new(None, Some(Arc::clone(&sonos) as Arc<dyn SonosDirectory>));

        assert_eq!(resolver.list(true).await.len(), 1);
        resolver.list(false).await;
        resolver.resolve("Patio").await.unwrap();

        assert_eq!(*sonos.refreshes.lock(), vec![true, false, false]);
    }
}
