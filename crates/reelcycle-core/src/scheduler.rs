//! Preloading crossfade scheduler
//!
//! The Scheduler owns the two slots, the shuffled playlist and the preload
//! cache. Every playback change goes through `play_video`, which holds the
//! transition flag from load start until the slot swap, so at most one
//! change is ever in progress. Commands that arrive while the flag is held
//! are dropped, not queued.
//!
//! All background work (preload readiness, retry timers, the active slot's
//! listener) runs in tasks that hold a weak reference to the scheduler and
//! select on a cancellation token fired by `destroy()`.

use std::sync::atomic::{ AtomicBool, AtomicU32, Ordering };
use std::sync::{ Arc, Mutex, MutexGuard, Weak };
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{ self, Instant, MissedTickBehavior };
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::command::Command;
use crate::config::{ ConfigError, SchedulerConfig };
use crate::events::{ EventBus, EventKind, PlayerEvent, SubscriptionId };
use crate::playlist::Playlist;
use crate::preload::PreloadCache;
use crate::slots::SlotPair;
use crate::surface::{
    MediaBackend, MediaError, MediaHandle, SlotId, Surface, SurfaceOptions, SurfaceSignal, TimeRange,
};


/// Cumulative failures after which retries give way to skipping.
pub const ERROR_CEILING: u32 = 10;

/// Step of the opacity interpolation.
const FRAME_INTERVAL: Duration = Duration::from_millis( 16 );


/// Errors that can occur while scheduling playback.
#[derive( Debug, Error )]
pub enum SchedulerError {
    #[error( "Configuration error: {0}" )]
    Configuration( #[from] ConfigError ),

    #[error( "Load timed out after {timeout:?}: {url}" )]
    LoadTimeout { url: Url, timeout: Duration },

    #[error( transparent )]
    Media( #[from] MediaError ),

    #[error( "A transition is already in progress" )]
    Busy,

    #[error( "Scheduler has been destroyed" )]
    Destroyed,
}


/// Where the slot pair is in its load/transition cycle.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize )]
pub enum Phase {
    Idle,
    Loading( usize ),
    Ready( usize ),
    Transitioning( usize ),
    Error( usize ),
    Destroyed,
}


/// Read-only snapshot of what is on screen.
#[derive( Debug, Clone, PartialEq, Serialize )]
pub struct VideoInfo {
    pub index: Option<usize>,
    pub total: usize,
    pub url: Option<Url>,
    pub current_time: Duration,
    pub duration: Option<Duration>,
    pub buffered: Vec<TimeRange>,
    pub playing: bool,
}


/// Clears the transition flag when dropped, including on cancellation.
struct TransitionGuard<'a>( &'a AtomicBool );


impl<'a> TransitionGuard<'a> {
    fn acquire( flag: &'a AtomicBool ) -> Option<Self> {
        flag.compare_exchange( false, true, Ordering::AcqRel, Ordering::Acquire )
            .ok()
            .map( |_| Self( flag ) )
    }
}


impl Drop for TransitionGuard<'_> {
    fn drop( &mut self ) {
        self.0.store( false, Ordering::Release );
    }
}


struct State<H: MediaHandle> {
    cursor: Option<usize>,
    attempt: Option<usize>,
    phase: Phase,
    cache: PreloadCache<H>,
    listener: Option<JoinHandle<()>>,
}


struct Inner<B: MediaBackend> {
    backend: B,
    config: SchedulerConfig,
    playlist: Playlist,
    slots: Mutex<SlotPair<B::Surface>>,
    state: Mutex<State<B::Handle>>,
    transitioning: AtomicBool,
    errors: AtomicU32,
    events: EventBus,
    cancel: CancellationToken,
}


impl<B: MediaBackend> Inner<B> {
    fn state( &self ) -> MutexGuard<'_, State<B::Handle>> {
        self.state.lock().unwrap_or_else( |e| e.into_inner() )
    }


    fn slots( &self ) -> MutexGuard<'_, SlotPair<B::Surface>> {
        self.slots.lock().unwrap_or_else( |e| e.into_inner() )
    }
}


/// Navigation commands are dropped, not failed, while a transition runs.
fn ignore_busy( result: Result<(), SchedulerError> ) -> Result<(), SchedulerError> {
    match result {
        Err( SchedulerError::Busy ) => Ok(()),
        other => other,
    }
}


impl<B: MediaBackend> Drop for Inner<B> {
    fn drop( &mut self ) {
        self.cancel.cancel();
        let state = self.state.get_mut().unwrap_or_else( |e| e.into_inner() );
        if let Some( listener ) = state.listener.take() {
            listener.abort();
        }
        state.cache.clear();
    }
}


/// Playback scheduler over a pair of surfaces.
///
/// Cloning is cheap and every clone drives the same scheduler.
pub struct Scheduler<B: MediaBackend> {
    inner: Arc<Inner<B>>,
}


impl<B: MediaBackend> Clone for Scheduler<B> {
    fn clone( &self ) -> Self {
        Self { inner: Arc::clone( &self.inner ) }
    }
}


impl<B: MediaBackend> Scheduler<B> {
    /// Builds a scheduler over two surfaces and a list of clip sources.
    ///
    /// @param backend - Creates the detached handles used for preloading
    /// @param slot_a - Surface that starts out active
    /// @param slot_b - Surface that receives the first clip
    /// @param urls - Clip sources; shuffled once here
    /// @param config - Scheduler options
    ///
    /// @returns The scheduler, or a configuration error if the list is
    /// empty, an entry is not a URL, or an option is out of range
    pub fn initialize<I, S>(
        backend: B,
        slot_a: B::Surface,
        slot_b: B::Surface,
        urls: I,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        config.validate()?;
        let playlist = Playlist::new( urls )?;
        Ok( Self::with_playlist( backend, slot_a, slot_b, playlist, config ) )
    }


    /// Builds a scheduler over an already validated playlist, keeping its order.
    pub fn with_playlist(
        backend: B,
        slot_a: B::Surface,
        slot_b: B::Surface,
        playlist: Playlist,
        config: SchedulerConfig,
    ) -> Self {
        let slots = SlotPair::new( slot_a, slot_b );
        for ( surface, opacity ) in slots.iter().zip([ 1.0, 0.0 ]) {
            surface.configure( SurfaceOptions::SLOT );
            surface.set_opacity( opacity );
        }

        tracing::info!(
            "Scheduler initialized: {} clips, buffer {}, crossfade {:?}",
            playlist.len(),
            config.preload_buffer_size,
            config.crossfade_duration
        );

        Self {
            inner: Arc::new( Inner {
                backend,
                config,
                playlist,
                slots: Mutex::new( slots ),
                state: Mutex::new( State {
                    cursor: None,
                    attempt: None,
                    phase: Phase::Idle,
                    cache: PreloadCache::new(),
                    listener: None,
                }),
                transitioning: AtomicBool::new( false ),
                errors: AtomicU32::new( 0 ),
                events: EventBus::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }


    fn from_weak( inner: &Weak<Inner<B>> ) -> Option<Self> {
        inner.upgrade().map( |inner| Self { inner } )
    }


    /// Loads clip `index` into the inactive slot and crossfades to it.
    ///
    /// `index` wraps onto the playlist. On a load or start failure the
    /// cursor stays put, the error goes through `handle_video_error` (which
    /// has already scheduled a retry or skip by the time this returns) and
    /// is handed back for information.
    pub async fn play_video( &self, index: i64 ) -> Result<(), SchedulerError> {
        if self.is_destroyed() {
            return Err( SchedulerError::Destroyed );
        }

        let cancel = self.inner.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => Err( SchedulerError::Destroyed ),
            result = self.transition_to( index ) => result,
        }
    }


    async fn transition_to( &self, index: i64 ) -> Result<(), SchedulerError> {
        let guard = TransitionGuard::acquire( &self.inner.transitioning )
            .ok_or( SchedulerError::Busy )?;

        let playlist = &self.inner.playlist;
        let target = playlist.normalize( index );
        let url = playlist.urls()[ target ].clone();
        let ( slot, surface ) = self.inner.slots().inactive();

        {
            let mut state = self.inner.state();
            state.attempt = Some( target );
            state.phase = Phase::Loading( target );
        }

        tracing::info!( "Loading clip {}/{} into slot {}: {}", target + 1, playlist.len(), slot, url );

        let mut result = self.load_into( surface.as_ref(), &url ).await;
        if result.is_ok() {
            self.inner.state().phase = Phase::Ready( target );
            result = self.crossfade( target ).await;
        }

        if let Err( error ) = result {
            self.inner.state().phase = Phase::Error( target );
            drop( guard );
            self.handle_video_error( slot, &error );
            return Err( error );
        }

        {
            let mut state = self.inner.state();
            state.cursor = Some( target );
            state.attempt = None;
            state.phase = Phase::Idle;
        }
        drop( guard );

        tracing::info!( "Now playing clip {}/{}: {}", target + 1, playlist.len(), url );
        if self.active_surface().is_playing() {
            self.inner.events.emit( &PlayerEvent::Playing );
        }
        self.update_preload_queue();
        Ok(())
    }


    /// Binds `surface` to `url`, from the preload cache when a ready handle exists.
    async fn load_into( &self, surface: &B::Surface, url: &Url ) -> Result<(), SchedulerError> {
        let cached = self.inner.state().cache.take_ready( url );

        match cached {
            Some( handle ) => {
                tracing::debug!( "Preload hit: {}", handle.url() );
                surface.adopt( &handle );
                let timeout = self.inner.config.setup_timeout;
                let result = time::timeout( timeout, surface.load() ).await;
                handle.release();
                match result {
                    Ok( loaded ) => loaded.map_err( SchedulerError::from ),
                    Err( _ ) => Err( SchedulerError::LoadTimeout { url: url.clone(), timeout } ),
                }
            }
            None => {
                tracing::debug!( "Preload miss, loading directly: {}", url );
                if !self.active_surface().is_playing() {
                    self.inner.events.emit( &PlayerEvent::Buffering );
                }
                surface.set_source( url );
                let timeout = self.inner.config.load_timeout;
                match time::timeout( timeout, surface.load() ).await {
                    Ok( loaded ) => loaded.map_err( SchedulerError::from ),
                    Err( _ ) => Err( SchedulerError::LoadTimeout { url: url.clone(), timeout } ),
                }
            }
        }
    }


    /// Fades the loaded inactive slot in over the active one, then swaps roles.
    ///
    /// This is the only place the active slot changes.
    async fn crossfade( &self, target: usize ) -> Result<(), SchedulerError> {
        let ( ( _, outgoing ), ( incoming_id, incoming ) ) = {
            let slots = self.inner.slots();
            ( slots.active(), slots.inactive() )
        };

        if let Err( error ) = self.start_playback( incoming.as_ref() ).await {
            incoming.pause();
            incoming.set_opacity( 0.0 );
            return Err( error );
        }

        self.inner.state().phase = Phase::Transitioning( target );
        incoming.set_visible( true );

        let duration = self.inner.config.crossfade_duration;
        let steps = ( duration.as_millis() / FRAME_INTERVAL.as_millis() ).max( 1 ) as u32;
        let step = duration / steps;
        let mut frames = time::interval_at( Instant::now() + step, step );
        frames.set_missed_tick_behavior( MissedTickBehavior::Delay );

        tracing::debug!( "Crossfading into slot {} over {:?}", incoming_id, duration );

        for frame in 1..=steps {
            frames.tick().await;
            let progress = frame as f32 / steps as f32;
            incoming.set_opacity( progress );
            outgoing.set_opacity( 1.0 - progress );
        }

        self.inner.slots().swap();
        self.bind_listeners();
        outgoing.pause();
        outgoing.set_visible( false );
        Ok(())
    }


    /// Starts `surface`, retrying rejected play requests up to `max_retries` times.
    async fn start_playback( &self, surface: &B::Surface ) -> Result<(), SchedulerError> {
        let mut attempt = 0;
        loop {
            match surface.play().await {
                Ok(()) => return Ok(()),
                Err( MediaError::PlayRejected( reason ) ) if attempt < self.inner.config.max_retries => {
                    attempt += 1;
                    tracing::debug!( "Play rejected ({}), retry {}/{}", reason, attempt, self.inner.config.max_retries );
                    time::sleep( self.inner.config.retry_delay ).await;
                }
                Err( error ) => return Err( error.into() ),
            }
        }
    }


    /// Forwards the active slot's signals to the event bus.
    ///
    /// Replaces the previous listener, which belonged to the old active slot.
    fn bind_listeners( &self ) {
        let ( slot, surface ) = self.inner.slots().active();
        let mut signals = surface.signals();
        let weak = Arc::downgrade( &self.inner );
        let cancel = self.inner.cancel.clone();

        let listener = tokio::spawn( async move {
            loop {
                let received = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = signals.recv() => received,
                };

                match received {
                    Ok( signal ) => {
                        let Some( scheduler ) = Self::from_weak( &weak ) else {
                            break;
                        };
                        scheduler.on_surface_signal( slot, signal );
                    }
                    Err( RecvError::Lagged( skipped ) ) => {
                        tracing::debug!( "Slot {} listener lagged, {} signals dropped", slot, skipped );
                    }
                    Err( RecvError::Closed ) => break,
                }
            }
        });

        if let Some( previous ) = self.inner.state().listener.replace( listener ) {
            previous.abort();
        }
    }


    fn on_surface_signal( &self, slot: SlotId, signal: SurfaceSignal ) {
        if slot != self.active_slot() || self.is_destroyed() {
            return;
        }

        let events = &self.inner.events;
        match signal {
            SurfaceSignal::Playing => {
                events.emit( &PlayerEvent::Playing );
            }
            SurfaceSignal::Paused => {
                events.emit( &PlayerEvent::Paused );
            }
            SurfaceSignal::Waiting => {
                events.emit( &PlayerEvent::Buffering );
            }
            SurfaceSignal::TimeUpdate { current_time, duration } => {
                events.emit( &PlayerEvent::TimeUpdate { current_time, duration } );
            }
            SurfaceSignal::Ended => {
                events.emit( &PlayerEvent::Ended );
                if self.inner.config.auto_advance {
                    let scheduler = self.clone();
                    tokio::spawn( async move {
                        if let Err( e ) = scheduler.play_next().await {
                            tracing::debug!( "Auto-advance did not complete: {}", e );
                        }
                    });
                }
            }
            SurfaceSignal::Error( error ) => {
                self.handle_video_error( slot, &SchedulerError::Media( error ) );
            }
        }
    }


    /// Evicts cache entries outside the buffer window and preloads the rest.
    ///
    /// Preloads are fire-and-forget: a failed one is logged and its entry
    /// dropped, and the clip is loaded directly when its turn comes.
    pub fn update_preload_queue( &self ) {
        if self.is_destroyed() {
            return;
        }

        let mut state = self.inner.state();
        let Some( cursor ) = state.cursor else {
            return;
        };

        let playlist = &self.inner.playlist;
        let window: Vec<Url> = playlist
            .window( cursor, self.inner.config.preload_buffer_size )
            .into_iter()
            .map( |index| playlist.urls()[ index ].clone() )
            .collect();

        for url in state.cache.retain_window( &window ) {
            tracing::debug!( "Evicted preload: {}", url );
        }

        for url in window {
            if state.cache.contains( &url ) {
                continue;
            }

            let handle = Arc::new( self.inner.backend.create_handle( &url, SurfaceOptions::PRELOAD ) );
            state.cache.insert( url.clone(), Arc::clone( &handle ) );
            tracing::debug!( "Preloading: {}", url );
            self.spawn_preload( url, handle );
        }
    }


    fn spawn_preload( &self, url: Url, handle: Arc<B::Handle> ) {
        let weak = Arc::downgrade( &self.inner );
        let cancel = self.inner.cancel.clone();
        let timeout = self.inner.config.load_timeout;

        tokio::spawn( async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = time::timeout( timeout, handle.wait_ready() ) => outcome,
            };

            let failure = match outcome {
                Ok( Ok(()) ) => {
                    tracing::debug!( "Preloaded: {}", url );
                    return;
                }
                Ok( Err( error ) ) => error.to_string(),
                Err( _ ) => format!( "timed out after {:?}", timeout ),
            };

            tracing::warn!( "Preload failed for {}: {}", url, failure );
            if let Some( inner ) = weak.upgrade() {
                inner.state().cache.discard( &url, &handle );
            }
        });
    }


    /// Plays the clip after the current one, wrapping at the end.
    ///
    /// Does nothing while a transition is in progress.
    pub async fn play_next( &self ) -> Result<(), SchedulerError> {
        let target = match self.current_index() {
            Some( cursor ) => self.inner.playlist.next_index( cursor ),
            None => 0,
        };
        ignore_busy( self.play_video( target as i64 ).await )
    }


    /// Plays the clip before the current one, wrapping at the start.
    ///
    /// Does nothing while a transition is in progress.
    pub async fn play_previous( &self ) -> Result<(), SchedulerError> {
        let target = match self.current_index() {
            Some( cursor ) => self.inner.playlist.previous_index( cursor ),
            None => self.inner.playlist.len() - 1,
        };
        ignore_busy( self.play_video( target as i64 ).await )
    }


    /// Plays a uniformly random clip.
    ///
    /// Does nothing while a transition is in progress.
    pub async fn play_random( &self ) -> Result<(), SchedulerError> {
        let target = self.inner.playlist.random_index();
        ignore_busy( self.play_video( target as i64 ).await )
    }


    /// Records a playback failure and decides between retrying and skipping.
    ///
    /// A failure on the inactive slot belongs to the clip being loaded; one
    /// on the active slot belongs to the clip on screen, and is ignored
    /// while a transition is already replacing it. Past `ERROR_CEILING`
    /// cumulative failures the failing clip is skipped at once. Below it,
    /// the same clip is retried after `retry_delay` unless another
    /// transition has started by then.
    pub fn handle_video_error( &self, slot: SlotId, error: &SchedulerError ) {
        if self.is_destroyed() {
            return;
        }

        let loading = slot == self.inner.slots().inactive_id();
        if !loading && self.is_transitioning() {
            tracing::debug!( "Ignoring error on outgoing slot {}: {}", slot, error );
            return;
        }

        let count = self.inner.errors.fetch_add( 1, Ordering::AcqRel ) + 1;
        tracing::warn!( "Playback error #{} on slot {}: {}", count, slot, error );
        let skipping = count > ERROR_CEILING;
        self.inner.events.emit( &PlayerEvent::video_error( slot, error, skipping ) );

        let target = {
            let state = self.inner.state();
            if loading {
                state.attempt.or( state.cursor )
            } else {
                state.cursor
            }
        };
        let Some( target ) = target else {
            return;
        };

        if skipping {
            let next = self.inner.playlist.next_index( target );
            tracing::warn!( "Error ceiling exceeded, skipping clip {} for {}", target + 1, next + 1 );
            self.spawn_play( next, Duration::ZERO );
        } else {
            self.spawn_play( target, self.inner.config.retry_delay );
        }
    }


    /// Plays `index` after `delay`, unless destroyed or mid-transition by then.
    fn spawn_play( &self, index: usize, delay: Duration ) {
        let weak = Arc::downgrade( &self.inner );
        let cancel = self.inner.cancel.clone();

        tokio::spawn( async move {
            if !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = time::sleep( delay ) => {}
                }
            }

            let Some( scheduler ) = Self::from_weak( &weak ) else {
                return;
            };
            if scheduler.is_transitioning() {
                tracing::debug!( "Transition under way, dropping scheduled play of clip {}", index + 1 );
                return;
            }
            if let Err( e ) = scheduler.play_video( index as i64 ).await {
                tracing::debug!( "Scheduled play of clip {} failed: {}", index + 1, e );
            }
        });
    }


    /// Snapshot of the clip on screen. No side effects.
    pub fn current_video_info( &self ) -> VideoInfo {
        let index = self.current_index();
        let surface = self.active_surface();

        VideoInfo {
            index,
            total: self.inner.playlist.len(),
            url: index.and_then( |i| self.inner.playlist.get( i ).cloned() ),
            current_time: surface.current_time(),
            duration: surface.duration(),
            buffered: surface.buffered(),
            playing: surface.is_playing(),
        }
    }


    /// Runs a parsed command.
    ///
    /// @returns A snapshot for `Info`, nothing otherwise
    pub async fn execute( &self, command: Command ) -> Result<Option<VideoInfo>, SchedulerError> {
        match command {
            Command::Play { index } => self.play_video( index ).await?,
            Command::Next => self.play_next().await?,
            Command::Prev => self.play_previous().await?,
            Command::Random => self.play_random().await?,
            Command::Info => return Ok( Some( self.current_video_info() ) ),
            Command::Quit => self.destroy(),
        }
        Ok( None )
    }


    /// Tears the scheduler down. Idempotent.
    ///
    /// Pending timers and preloads are cancelled, cached handles released,
    /// subscribers dropped and both slots paused. A load still in flight
    /// finishes on its own but its result is discarded.
    pub fn destroy( &self ) {
        if self.is_destroyed() {
            return;
        }
        self.inner.cancel.cancel();

        let released = {
            let mut state = self.inner.state();
            if let Some( listener ) = state.listener.take() {
                listener.abort();
            }
            let released = state.cache.len();
            state.cache.clear();
            state.phase = Phase::Destroyed;
            released
        };

        for surface in self.inner.slots().iter() {
            surface.pause();
        }
        self.inner.events.clear();

        tracing::info!( "Scheduler destroyed, released {} preloaded clips", released );
    }


    /// Subscribes to one kind of playback event.
    pub fn on<F>( &self, kind: EventKind, callback: F ) -> SubscriptionId
    where
        F: Fn( &PlayerEvent ) + Send + Sync + 'static,
    {
        self.inner.events.subscribe( kind, callback )
    }


    pub fn off( &self, id: SubscriptionId ) -> bool {
        self.inner.events.unsubscribe( id )
    }


    pub fn events( &self ) -> &EventBus {
        &self.inner.events
    }


    pub fn is_transitioning( &self ) -> bool {
        self.inner.transitioning.load( Ordering::Acquire )
    }


    pub fn is_destroyed( &self ) -> bool {
        self.inner.cancel.is_cancelled()
    }


    /// Index of the clip on screen, `None` before the first play.
    pub fn current_index( &self ) -> Option<usize> {
        self.inner.state().cursor
    }


    pub fn phase( &self ) -> Phase {
        self.inner.state().phase
    }


    pub fn error_count( &self ) -> u32 {
        self.inner.errors.load( Ordering::Acquire )
    }


    pub fn playlist( &self ) -> &Playlist {
        &self.inner.playlist
    }


    pub fn config( &self ) -> &SchedulerConfig {
        &self.inner.config
    }


    pub fn active_slot( &self ) -> SlotId {
        self.inner.slots().active_id()
    }


    pub fn surface( &self, slot: SlotId ) -> Arc<B::Surface> {
        self.inner.slots().get( slot )
    }


    pub fn active_surface( &self ) -> Arc<B::Surface> {
        self.inner.slots().active().1
    }


    /// URLs currently in the preload cache, loading or ready.
    pub fn preloaded( &self ) -> Vec<Url> {
        self.inner.state().cache.urls()
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::sim::{ SimBackend, SimProfile };


    fn sources( n: usize ) -> Vec<String> {
        ( 0..n ).map( |i| format!( "https://cdn.example.com/clip{}.mp4", i ) ).collect()
    }


    fn scheduler( n: usize, config: SchedulerConfig ) -> ( SimBackend, Scheduler<SimBackend> ) {
        let backend = SimBackend::new( SimProfile {
            clip_length: Duration::from_secs( 600 ),
            ..SimProfile::default()
        });
        let playlist = Playlist::in_order( sources( n ) ).unwrap();
        let scheduler = Scheduler::with_playlist(
            backend.clone(),
            backend.surface( "A" ),
            backend.surface( "B" ),
            playlist,
            config,
        );
        ( backend, scheduler )
    }


    #[test]
    fn test_transition_guard_exclusive() {
        let flag = AtomicBool::new( false );
        let guard = TransitionGuard::acquire( &flag ).unwrap();
        assert!( TransitionGuard::acquire( &flag ).is_none() );
        drop( guard );
        assert!( !flag.load( Ordering::SeqCst ) );
        assert!( TransitionGuard::acquire( &flag ).is_some() );
    }


    #[test]
    fn test_initialize_rejects_empty() {
        let backend = SimBackend::default();
        let result = Scheduler::initialize(
            backend.clone(),
            backend.surface( "A" ),
            backend.surface( "B" ),
            Vec::<String>::new(),
            SchedulerConfig::default(),
        );
        assert!( matches!( result, Err( SchedulerError::Configuration( ConfigError::EmptyPlaylist ) ) ) );
    }


    #[test]
    fn test_initialize_configures_slots() {
        let ( _, scheduler ) = scheduler( 3, SchedulerConfig::default() );
        let a = scheduler.surface( SlotId::A );
        let b = scheduler.surface( SlotId::B );

        assert_eq!( a.options(), Some( SurfaceOptions::SLOT ) );
        assert_eq!( b.options(), Some( SurfaceOptions::SLOT ) );
        assert_eq!( scheduler.active_slot(), SlotId::A );
        assert_eq!( scheduler.current_index(), None );
        assert_eq!( scheduler.phase(), Phase::Idle );
    }


    #[tokio::test( start_paused = true )]
    async fn test_crossfade_ends_fully_swapped() {
        let ( _, scheduler ) = scheduler( 3, SchedulerConfig::default() );

        scheduler.play_video( 0 ).await.unwrap();

        let active = scheduler.active_surface();
        let inactive = scheduler.surface( SlotId::A );
        assert_eq!( scheduler.active_slot(), SlotId::B );
        assert_eq!( active.opacity(), 1.0 );
        assert_eq!( inactive.opacity(), 0.0 );
        assert!( active.is_playing() );
        assert!( !inactive.is_playing() );
    }


    #[tokio::test( start_paused = true )]
    async fn test_crossfade_takes_configured_duration() {
        let config = SchedulerConfig {
            crossfade_duration: Duration::from_millis( 1500 ),
            preload_buffer_size: 0,
            ..SchedulerConfig::default()
        };
        let ( backend, scheduler ) = scheduler( 2, config );

        let started = Instant::now();
        scheduler.play_video( 0 ).await.unwrap();
        let elapsed = started.elapsed();

        let expected = backend.profile().latency + Duration::from_millis( 1500 );
        // Timer resolution is one millisecond; allow for rounding on either side.
        assert!( elapsed + Duration::from_millis( 5 ) >= expected, "elapsed {:?}", elapsed );
        assert!( elapsed < expected + Duration::from_millis( 150 ), "elapsed {:?}", elapsed );
    }


    #[tokio::test( start_paused = true )]
    async fn test_busy_while_transitioning() {
        let ( _, scheduler ) = scheduler( 3, SchedulerConfig::default() );

        let running = scheduler.clone();
        let first = tokio::spawn( async move { running.play_video( 0 ).await } );
        tokio::time::sleep( Duration::from_millis( 10 ) ).await;

        assert!( scheduler.is_transitioning() );
        assert!( matches!( scheduler.play_video( 1 ).await, Err( SchedulerError::Busy ) ) );

        first.await.unwrap().unwrap();
        assert!( !scheduler.is_transitioning() );
        assert_eq!( scheduler.current_index(), Some( 0 ) );
    }


    #[tokio::test( start_paused = true )]
    async fn test_navigation_swallows_busy() {
        let ( backend, scheduler ) = scheduler( 3, SchedulerConfig::default() );

        // Another transition takes the flag between the caller's check and the load.
        let guard = TransitionGuard::acquire( &scheduler.inner.transitioning ).unwrap();
        assert!( scheduler.play_next().await.is_ok() );
        assert!( scheduler.play_previous().await.is_ok() );
        assert!( scheduler.play_random().await.is_ok() );
        assert!( matches!( scheduler.play_video( 0 ).await, Err( SchedulerError::Busy ) ) );
        drop( guard );

        assert_eq!( scheduler.current_index(), None );
        for url in scheduler.playlist().urls() {
            assert_eq!( backend.load_count( url ), 0 );
        }
    }


    #[tokio::test( start_paused = true )]
    async fn test_preload_handles_use_preload_options() {
        let ( _, scheduler ) = scheduler( 5, SchedulerConfig::default() );
        scheduler.play_video( 0 ).await.unwrap();

        let preloaded = scheduler.preloaded();
        assert_eq!( preloaded.len(), 3 );
        let state = scheduler.inner.state();
        for url in &preloaded {
            let handle = state.cache.get( url ).unwrap();
            assert_eq!( handle.options(), SurfaceOptions::PRELOAD );
            assert_eq!( handle.url(), url );
        }
    }


    #[tokio::test( start_paused = true )]
    async fn test_play_rejection_retried() {
        let config = SchedulerConfig { max_retries: 2, ..SchedulerConfig::default() };
        let ( backend, scheduler ) = scheduler( 3, config );
        let clip = scheduler.playlist().urls()[ 0 ].clone();
        backend.reject_play( &clip, 2 );

        scheduler.play_video( 0 ).await.unwrap();
        assert_eq!( scheduler.current_index(), Some( 0 ) );
        assert_eq!( scheduler.error_count(), 0 );
    }


    #[tokio::test( start_paused = true )]
    async fn test_play_rejection_exhausted() {
        let config = SchedulerConfig { max_retries: 1, ..SchedulerConfig::default() };
        let ( backend, scheduler ) = scheduler( 3, config );
        let clip = scheduler.playlist().urls()[ 0 ].clone();
        backend.reject_play( &clip, 5 );

        let result = scheduler.play_video( 0 ).await;
        assert!( matches!( result, Err( SchedulerError::Media( MediaError::PlayRejected( _ ) ) ) ) );
        assert_eq!( scheduler.current_index(), None );
        assert_eq!( scheduler.active_slot(), SlotId::A );
        assert_eq!( scheduler.error_count(), 1 );
        scheduler.destroy();
    }


    #[tokio::test( start_paused = true )]
    async fn test_setup_timeout_on_stalled_cached_clip() {
        let config = SchedulerConfig { preload_buffer_size: 1, ..SchedulerConfig::default() };
        let ( backend, scheduler ) = scheduler( 3, config );
        scheduler.play_video( 0 ).await.unwrap();

        // Let the preload of clip 1 finish, then make its surface load hang.
        tokio::time::sleep( Duration::from_secs( 1 ) ).await;
        let clip = scheduler.playlist().urls()[ 1 ].clone();
        backend.stall( &clip );

        let started = Instant::now();
        let result = scheduler.play_video( 1 ).await;
        assert!( matches!( result, Err( SchedulerError::LoadTimeout { timeout, .. } ) if timeout == Duration::from_secs( 5 ) ) );
        assert!( started.elapsed() < Duration::from_secs( 6 ) );
        assert_eq!( scheduler.current_index(), Some( 0 ) );
        scheduler.destroy();
    }


    #[tokio::test( start_paused = true )]
    async fn test_destroy_is_idempotent() {
        let ( backend, scheduler ) = scheduler( 5, SchedulerConfig::default() );
        scheduler.play_video( 0 ).await.unwrap();
        assert_eq!( scheduler.preloaded().len(), 3 );

        scheduler.destroy();
        scheduler.destroy();

        assert!( scheduler.is_destroyed() );
        assert!( scheduler.preloaded().is_empty() );
        assert_eq!( backend.released_count(), 3 );
        assert_eq!( scheduler.phase(), Phase::Destroyed );
        assert!( matches!( scheduler.play_video( 1 ).await, Err( SchedulerError::Destroyed ) ) );
    }
}
