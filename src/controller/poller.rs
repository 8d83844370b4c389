//! Background timers that diff remote playback state and broadcast changes

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::Config;
use crate::model::{ArtworkResolver, NowPlaying, PlayStateChange};
use crate::relay::{Event, Relay};

use super::SessionContext;

pub struct Poller {
    context: Arc<SessionContext>,
    relay: Relay,
    artwork: ArtworkResolver,
    cancel: CancellationToken,
}

/// Keeps the timers alive. Dropping it cancels all of them.
pub struct PollerHandle {
    _guard: DropGuard,
}

impl Poller {
    pub fn new(context: Arc<SessionContext>, relay: Relay, artwork: ArtworkResolver) -> Self {
        Self {
            context,
            relay,
            artwork,
            cancel: CancellationToken::new(),
        }
    }

    /// Start the currently-playing, settings and (optional) token timers.
    pub fn spawn(self, config: &Config) -> PollerHandle {
        let cancel = self.cancel.clone();
        let poller = Arc::new(self);
        let mut timers = 2;

        let p = poller.clone();
        spawn_timer(
            cancel.clone(),
            Duration::ZERO,
            config.now_playing_interval,
            move || {
                let p = p.clone();
                async move { p.poll_now_playing().await }
            },
        );

        let p = poller.clone();
        spawn_timer(
            cancel.clone(),
            Duration::ZERO,
            config.settings_interval,
            move || {
                let p = p.clone();
                async move { p.poll_settings().await }
            },
        );

        if let Some(period) = config.token_refresh_interval {
            let p = poller.clone();
            spawn_timer(cancel.clone(), period, period, move || {
                let p = p.clone();
                async move { p.refresh_token().await }
            });
            timers += 1;
        }

        tracing::debug!(timers, "Poller started");
        PollerHandle {
            _guard: cancel.drop_guard(),
        }
    }

    fn is_stale(&self) -> bool {
        if self.cancel.is_cancelled() {
            tracing::debug!("Session torn down, discarding tick result");
            true
        } else {
            false
        }
    }

    pub async fn poll_now_playing(&self) {
        let Some(now) = self.context.session.currently_playing().await else {
            return;
        };
        if self.is_stale() {
            return;
        }

        let changes = self.context.snapshot.lock().await.observe_now_playing(&now);
        if changes.is_empty() {
            return;
        }

        let payload = self.with_local_artwork(now).await;
        if self.is_stale() {
            return;
        }

        match changes.play_state {
            Some(PlayStateChange::Started) => {
                tracing::info!("Playback started");
                self.relay.broadcast(Event::StartedPlaying(payload.clone())).await;
            }
            Some(PlayStateChange::Stopped) => {
                tracing::info!("Playback stopped");
                self.relay.broadcast(Event::PlayingStopped).await;
            }
            None => {}
        }

        if changes.track_changed {
            tracing::info!(
                track = payload.item.as_ref().map(|t| t.name.as_str()).unwrap_or_default(),
                "Track changed"
            );
            self.relay.broadcast(Event::SongChanged(payload)).await;
        }
    }

    async fn with_local_artwork(&self, mut now: NowPlaying) -> NowPlaying {
        if let Some(track) = now.item.as_mut() {
            if track.is_local {
                if let Some(path) = self.artwork.resolve(&track.name).await {
                    track.replace_artwork(path.display().to_string());
                }
            }
        }
        now
    }

    pub async fn poll_settings(&self) {
        let Some(state) = self.context.session.current_playback().await else {
            return;
        };
        if self.is_stale() {
            return;
        }

        let update = self.context.snapshot.lock().await.observe_settings(&state);
        if update.is_empty() {
            return;
        }

        tracing::debug!(update = ?update, "Settings changed");
        self.relay.broadcast(Event::Update(update)).await;
    }

    pub async fn refresh_token(&self) {
        match self.context.session.refresh_auth().await {
            Ok(()) => tracing::info!("Access token refreshed"),
            Err(e) => tracing::warn!(error = %e, "Token refresh failed"),
        }
    }
}

/// Run `tick` every `period`, first after `delay`, until `cancel` fires. A
/// tick always completes before the next one of the same timer starts.
fn spawn_timer<F, Fut>(cancel: CancellationToken, delay: Duration, period: Duration, tick: F)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + delay, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => tick().await,
            }
        }
        tracing::trace!("Timer stopped");
    });
}
