//! Command implementations over the riff-core backends.

use std::future::Future;
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Local;
use futures::StreamExt;
use reqwest::Client;
use riff_core::protocol_constants::{DEFAULT_SCOPES, DEVICE_CACHE_TTL};
use riff_core::sonos::discovery::{default_cache_path, DeviceCache};
use riff_core::spotify::{
    authorize_url, AuthClient, CallbackServer, FileTokenStore, Pkce, SearchHit, SearchKind,
};
use riff_core::{
    DevicePicker, DeviceResolver, EventFormatter, FallbackConfig, OutputMode, PlaybackState,
    Platform, Player, PlayerError, PlayerResult, ResolvedDevice, SonosDirectory,
    SonosDiscovery, SonosPlayer, SpotifyClient, SpotifyDevices, SpotifyPlayer, Track, Watcher,
    ZoneGroup,
};
use tokio_util::sync::CancellationToken;

use crate::config::RiffConfig;
use crate::picker::StdinPicker;

/// How long `auth login` waits for the browser redirect.
const LOGIN_TIMEOUT: Duration = Duration::from_secs(300);

/// What `riff play` was asked to do.
#[derive(Debug, Default)]
pub struct PlayRequest {
    /// Free-text search, or a `spotify:` URI.
    pub query: Option<String>,
    pub uri: Option<String>,
    /// Search kind; tracks when unset.
    pub kind: Option<SearchKind>,
    pub shuffle: bool,
}

enum PlayTarget {
    Resume,
    Uri(String),
    Search(String, SearchKind),
}

impl PlayRequest {
    fn target(&self) -> PlayTarget {
        if let Some(uri) = &self.uri {
            return PlayTarget::Uri(uri.clone());
        }
        match self.query.as_deref().map(str::trim) {
            None | Some("") => PlayTarget::Resume,
            Some(q) if q.starts_with("spotify:") => PlayTarget::Uri(q.to_string()),
            Some(q) => PlayTarget::Search(q.to_string(), self.kind.unwrap_or(SearchKind::Track)),
        }
    }
}

/// Everything a command needs, built once per invocation.
pub struct App {
    config: RiffConfig,
    device: Option<String>,
    http: Client,
    spotify: Option<Arc<SpotifyClient>>,
    discovery: Arc<SonosDiscovery>,
    resolver: DeviceResolver,
    cancel: CancellationToken,
}

impl App {
    pub fn new(config: RiffConfig, device: Option<String>, cancel: CancellationToken) -> Result<Self> {
        let http = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;

        let spotify = if config.spotify_enabled() {
            let auth = AuthClient::new(
                http.clone(),
                config.spotify.client_id.trim(),
                config.spotify.redirect_uri.clone(),
            );
            let store = FileTokenStore::at_default_location()
                .context("Failed to locate the Spotify token file")?;
            Some(Arc::new(SpotifyClient::new(auth, Arc::new(store))))
        } else {
            log::debug!("Spotify client id not configured, Spotify commands disabled");
            None
        };

        let discovery = Arc::new(SonosDiscovery::new(
            http.clone(),
            config.discovery_timeout(),
            DeviceCache::new(DEVICE_CACHE_TTL, default_cache_path()),
        ));

        let resolver = DeviceResolver::new(
            spotify
                .clone()
                .map(|client| client as Arc<dyn SpotifyDevices>),
            Some(Arc::clone(&discovery) as Arc<dyn SonosDirectory>),
        );

        Ok(Self {
            config,
            device,
            http,
            spotify,
            discovery,
            resolver,
            cancel,
        })
    }

    fn spotify_client(&self) -> PlayerResult<Arc<SpotifyClient>> {
        self.spotify.clone().ok_or_else(|| {
            PlayerError::Config(
                "spotify.client_id is not set (config file or RIFF_SPOTIFY_CLIENT_ID)".into(),
            )
        })
    }

    /// Builds the player for a resolved device.
    fn player_for(&self, target: ResolvedDevice) -> PlayerResult<Arc<dyn Player>> {
        Ok(match target {
            ResolvedDevice::Spotify { id, .. } => {
                Arc::new(SpotifyPlayer::new(self.spotify_client()?).with_device(id))
            }
            ResolvedDevice::Sonos { device, .. } => Arc::new(SonosPlayer::new(
                self.http.clone(),
                device,
                self.discovery.zone_group_cache(),
            )),
        })
    }

    /// The player a command starts with: the `--device` target, else the
    /// active Spotify device, else the configured Sonos room.
    async fn initial_player(&self) -> Result<Arc<dyn Player>> {
        if let Some(query) = &self.device {
            let target = self.resolver.resolve(query).await?;
            log::debug!("Resolved '{}' to {}", query, target.name());
            return Ok(self.player_for(target)?);
        }
        if let Some(client) = &self.spotify {
            return Ok(Arc::new(SpotifyPlayer::new(Arc::clone(client))));
        }
        if let Some(room) = &self.config.sonos.default_room {
            let target = self.resolver.resolve(room).await?;
            return Ok(self.player_for(target)?);
        }
        bail!("No backend configured: set spotify.client_id or sonos.default_room, or pass --device")
    }

    /// Runs a playback command, recovering once from "no active device".
    async fn control<T, F, Fut>(&self, action: F) -> Result<T>
    where
        F: Fn(Arc<dyn Player>, CancellationToken) -> Fut,
        Fut: Future<Output = PlayerResult<T>>,
    {
        let initial = self.initial_player().await?;
        let fallback = FallbackConfig {
            device: self.device.clone(),
            default_device: self.config.defaults.device.clone(),
        };
        let picker = StdinPicker;
        let picker = std::io::stdin()
            .is_terminal()
            .then_some(&picker as &dyn DevicePicker);

        let result = self
            .resolver
            .with_fallback(&fallback, picker, &self.cancel, |target| {
                let player = match target {
                    None => Ok(Arc::clone(&initial)),
                    Some(target) => self.player_for(target),
                };
                let pending = player.map(|p| action(p, self.cancel.clone()));
                async move { pending?.await }
            })
            .await?;
        Ok(result)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Auth
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn auth_login(&self) -> Result<()> {
        let client = self.spotify_client()?;
        let auth = client.auth();
        let pkce = Pkce::generate();
        let url = authorize_url(
            auth.accounts_base(),
            auth.client_id(),
            auth.redirect_uri(),
            DEFAULT_SCOPES,
            &pkce,
        )
        .map_err(PlayerError::from)?;

        let server = CallbackServer::bind(auth.redirect_uri())
            .await
            .map_err(PlayerError::from)
            .context("Failed to start the login callback listener")?;

        println!("Open this URL in your browser to log in:\n\n  {url}\n");
        println!("Waiting for the redirect to {} ...", auth.redirect_uri());

        let code = server
            .wait_for_code(&pkce.state, LOGIN_TIMEOUT, &self.cancel)
            .await
            .map_err(PlayerError::from)?;
        let token = auth
            .exchange_code(&code, &pkce.verifier)
            .await
            .map_err(PlayerError::from)?;
        client.set_token(token).await.map_err(PlayerError::from)?;

        match client.current_user().await {
            Ok(user) => {
                let name = user.display_name.as_deref().unwrap_or(&user.id);
                println!("Logged in as {name}");
                if !user.is_premium() {
                    println!("Note: playback control requires Spotify Premium");
                }
            }
            Err(e) => {
                log::warn!("Logged in, but reading the profile failed: {}", e);
                println!("Logged in");
            }
        }
        Ok(())
    }

    pub async fn auth_logout(&self) -> Result<()> {
        self.spotify_client()?
            .logout()
            .await
            .map_err(PlayerError::from)?;
        println!("Logged out");
        Ok(())
    }

    pub async fn auth_status(&self) -> Result<()> {
        let client = self.spotify_client()?;
        let Some(token) = client.token().await.map_err(PlayerError::from)? else {
            println!("Not logged in");
            return Ok(());
        };

        let expires = token.expires_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S");
        if token.is_expired() {
            println!("Logged in, access token expired at {expires} (refreshed on next use)");
        } else {
            println!("Logged in, access token valid until {expires}");
        }
        if !token.scope.is_empty() {
            println!("Scopes: {}", token.scope);
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Devices and state
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn devices(&self, refresh: bool) -> Result<()> {
        let devices = self.resolver.list(refresh).await;
        if devices.is_empty() {
            println!("No devices found");
            return Ok(());
        }
        for device in &devices {
            println!(
                "{:<8} {:<28} {}",
                device.platform().as_str(),
                device.name(),
                device.id()
            );
        }
        Ok(())
    }

    pub async fn status(&self) -> Result<()> {
        let player = self.initial_player().await?;
        let state = player.get_state(&self.cancel).await?;
        print!("{}", describe_state(&state));
        Ok(())
    }

    pub async fn queue_show(&self) -> Result<()> {
        let player = self.initial_player().await?;
        let queue = player.get_queue(&self.cancel).await?;
        if queue.is_empty() {
            println!("Queue is empty");
            return Ok(());
        }
        if let Some(track) = queue.current() {
            println!("Now: {}", track_line(track));
        }
        for (i, track) in queue.upcoming().iter().enumerate() {
            println!("{:>3}. {}", i + 1, track_line(track));
        }
        Ok(())
    }

    pub async fn history(&self, limit: u32) -> Result<()> {
        let player = self.initial_player().await?;
        let entries = player.get_recently_played(limit, &self.cancel).await?;
        if entries.is_empty() {
            println!("Nothing played recently");
        }
        for entry in &entries {
            let at = entry.played_at.with_timezone(&Local).format("%m-%d %H:%M");
            println!("{at}  {}", track_line(&entry.track));
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Playback control
    // ─────────────────────────────────────────────────────────────────────────

    /// Resumes playback, or plays `request` on the current target.
    pub async fn play(&self, request: PlayRequest) -> Result<()> {
        let (uri, hit) = match request.target() {
            PlayTarget::Resume => (None, None),
            PlayTarget::Uri(uri) => (Some(uri), None),
            PlayTarget::Search(query, kind) => {
                let hit = self
                    .spotify_client()?
                    .search_first(&query, kind)
                    .await
                    .map_err(PlayerError::from)?
                    .with_context(|| format!("no {}s found for '{}'", kind.as_str(), query))?;
                (Some(hit.uri.clone()), Some(hit))
            }
        };

        let platform = match uri {
            Some(uri) => {
                self.control(|p, c| {
                    let uri = uri.clone();
                    async move {
                        p.play_uri(&uri, &c).await?;
                        Ok(p.platform())
                    }
                })
                .await?
            }
            None => {
                self.control(|p, c| async move {
                    p.play(&c).await?;
                    Ok(p.platform())
                })
                .await?
            }
        };

        if request.shuffle {
            self.enable_shuffle(platform).await;
        }
        match hit {
            Some(hit) => println!("{}", hit_line(&hit)),
            None => println!("Playing"),
        }
        Ok(())
    }

    /// Best effort: playback already started, so a failure only warns.
    async fn enable_shuffle(&self, platform: Platform) {
        if platform != Platform::Spotify {
            log::warn!("Shuffle is only supported for Spotify playback");
            return;
        }
        let result = match self.spotify_client() {
            Ok(client) => client.set_shuffle(true, None).await.map_err(PlayerError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            log::warn!("Failed to enable shuffle: {}", e);
        }
    }

    pub async fn pause(&self) -> Result<()> {
        self.control(|p, c| async move { p.pause(&c).await }).await?;
        println!("Paused");
        Ok(())
    }

    pub async fn next(&self) -> Result<()> {
        self.control(|p, c| async move { p.next(&c).await }).await?;
        Ok(())
    }

    pub async fn prev(&self) -> Result<()> {
        self.control(|p, c| async move { p.prev(&c).await }).await?;
        Ok(())
    }

    pub async fn seek(&self, seconds: u64) -> Result<()> {
        let position_ms = seconds.saturating_mul(1000);
        self.control(|p, c| async move { p.seek(position_ms, &c).await })
            .await?;
        println!("Seeked to {}", clock(Duration::from_secs(seconds)));
        Ok(())
    }

    pub async fn volume(&self, level: Option<u8>) -> Result<()> {
        let level = level.unwrap_or(self.config.defaults.volume);
        self.control(|p, c| async move { p.set_volume(level, &c).await })
            .await?;
        println!("Volume: {level}%");
        Ok(())
    }

    pub async fn queue_add(&self, uri: String) -> Result<()> {
        self.control(|p, c| {
            let uri = uri.clone();
            async move { p.add_to_queue(&uri, &c).await }
        })
        .await?;
        println!("Queued {uri}");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Grouping
    // ─────────────────────────────────────────────────────────────────────────

    fn sonos_player(&self, device: riff_core::SonosDevice) -> SonosPlayer {
        SonosPlayer::new(self.http.clone(), device, self.discovery.zone_group_cache())
    }

    pub async fn group_list(&self) -> Result<()> {
        let groups = self.discovery.zone_groups().await?;
        if groups.is_empty() {
            println!("No Sonos groups found");
            return Ok(());
        }
        print!("{}", describe_groups(&groups));
        Ok(())
    }

    pub async fn group_join(&self, room: &str, coordinator: &str) -> Result<()> {
        let member = self
            .discovery
            .find_device(room)
            .await
            .map_err(PlayerError::from)?;
        let leader = self
            .discovery
            .find_device(coordinator)
            .await
            .map_err(PlayerError::from)?;
        if member.uuid == leader.uuid {
            bail!("'{}' and '{}' are the same speaker", room, coordinator);
        }

        self.sonos_player(member.clone())
            .join_group(&leader, &self.cancel)
            .await?;
        println!(
            "{} joined {}",
            member.display_name(),
            leader.display_name()
        );
        Ok(())
    }

    pub async fn group_leave(&self, room: &str) -> Result<()> {
        let member = self
            .discovery
            .find_device(room)
            .await
            .map_err(PlayerError::from)?;
        self.sonos_player(member.clone())
            .leave_group(&self.cancel)
            .await?;
        println!("{} is now standalone", member.display_name());
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tail
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn tail(&self, json: bool, timestamps: bool) -> Result<()> {
        let player = self.initial_player().await?;
        let mode = if json { OutputMode::Json } else { OutputMode::Text };
        let formatter = EventFormatter::new(mode).with_timestamps(timestamps);

        let watcher = Watcher::new(player, self.config.tail_interval());
        log::info!("Watching playback every {:?}", watcher.interval());
        let (mut events, handle) = watcher.spawn(self.cancel.clone());

        while let Some(event) = events.next().await {
            println!("{}", formatter.format(&event));
        }
        if let Err(e) = handle.await {
            log::warn!("Watcher task ended abnormally: {}", e);
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output helpers
// ─────────────────────────────────────────────────────────────────────────────

/// `m:ss`, or `h:mm:ss` past an hour.
fn clock(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

fn track_line(track: &Track) -> String {
    if track.artist.is_empty() {
        track.title.clone()
    } else {
        format!("{} - {}", track.artist, track.title)
    }
}

/// `Playing album: Discovery by Daft Punk`.
fn hit_line(hit: &SearchHit) -> String {
    match &hit.artist {
        Some(artist) => format!("Playing {}: {} by {}", hit.kind.as_str(), hit.name, artist),
        None => format!("Playing {}: {}", hit.kind.as_str(), hit.name),
    }
}

/// One block per group, coordinator marked.
fn describe_groups(groups: &[ZoneGroup]) -> String {
    let mut out = String::new();
    for group in groups {
        out.push_str(&format!("{} (group of {})\n", group.name, group.members.len()));
        for member in &group.members {
            let mark = if member.uuid == group.coordinator_uuid {
                " [coordinator]"
            } else {
                ""
            };
            out.push_str(&format!("  - {}{}\n", member.zone_name, mark));
        }
    }
    out
}

fn describe_state(state: &PlaybackState) -> String {
    let Some(track) = &state.track else {
        return "Nothing playing\n".to_string();
    };

    let mut out = format!(
        "{} {}\n",
        if state.is_playing { "Playing:" } else { "Paused: " },
        track_line(track)
    );
    if !track.album.is_empty() {
        out.push_str(&format!("Album:   {}\n", track.album));
    }
    out.push_str(&format!(
        "Time:    {} / {}\n",
        clock(state.progress),
        clock(track.duration)
    ));
    if let Some(device) = &state.device {
        out.push_str(&format!(
            "Device:  {} ({})\n",
            device.name,
            device.platform.as_str()
        ));
    }
    out.push_str(&format!(
        "Volume:  {}%  Shuffle: {}  Repeat: {}\n",
        state.volume,
        if state.shuffle { "on" } else { "off" },
        state.repeat.as_str()
    ));
    out
}
