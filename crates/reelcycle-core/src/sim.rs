//! Simulated media backend
//!
//! Surfaces and handles that behave like media elements on a timer: loads
//! take `latency`, playback advances in `tick` steps and ends after
//! `clip_length`. Faults can be scripted per URL, and every load is
//! counted, so the same backend drives the headless player and the tests.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::{ Arc, Mutex, MutexGuard, Weak };
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{ self, Instant };
use url::Url;

use crate::surface::{
    MediaBackend, MediaError, MediaHandle, PreloadHint, Surface, SurfaceOptions, SurfaceSignal, TimeRange,
};


const SIGNAL_CAPACITY: usize = 64;


/// Timing of the simulated media.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub struct SimProfile {
    /// Time a cold load or preload takes to become playable.
    pub latency: Duration,

    /// Length of every clip.
    pub clip_length: Duration,

    /// Interval between time updates while playing.
    pub tick: Duration,
}


impl Default for SimProfile {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis( 200 ),
            clip_length: Duration::from_secs( 8 ),
            tick: Duration::from_millis( 250 ),
        }
    }
}


#[derive( Debug, Clone, Copy, PartialEq, Eq )]
enum Fault {
    FailNext( u32 ),
    FailAlways,
    Stall,
    RejectPlay( u32 ),
}


#[derive( Debug, Clone, Copy, PartialEq, Eq )]
enum Outcome {
    Ready,
    Fail,
    Stall,
}


#[derive( Debug, Default )]
struct Ledger {
    loads: HashMap<Url, usize>,
    handles: HashMap<Url, usize>,
    released: usize,
}


#[derive( Debug )]
struct Shared {
    profile: SimProfile,
    faults: Mutex<HashMap<Url, Fault>>,
    patterns: Mutex<Vec<String>>,
    ledger: Mutex<Ledger>,
}


fn lock<T>( mutex: &Mutex<T> ) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else( |e| e.into_inner() )
}


impl Shared {
    fn matches_pattern( &self, url: &Url ) -> bool {
        lock( &self.patterns ).iter().any( |p| url.as_str().contains( p.as_str() ) )
    }


    /// Outcome of a surface load. Counts the load and consumes `FailNext`.
    fn load_outcome( &self, url: &Url ) -> Outcome {
        *lock( &self.ledger ).loads.entry( url.clone() ).or_default() += 1;

        if self.matches_pattern( url ) {
            return Outcome::Fail;
        }

        let mut faults = lock( &self.faults );
        match faults.get( url ).copied() {
            Some( Fault::FailNext( remaining ) ) => {
                if remaining <= 1 {
                    faults.remove( url );
                } else {
                    faults.insert( url.clone(), Fault::FailNext( remaining - 1 ) );
                }
                Outcome::Fail
            }
            Some( Fault::FailAlways ) => Outcome::Fail,
            Some( Fault::Stall ) => Outcome::Stall,
            Some( Fault::RejectPlay( _ ) ) | None => Outcome::Ready,
        }
    }


    /// Outcome of a detached preload. `FailNext` is left for surface loads.
    fn preload_outcome( &self, url: &Url ) -> Outcome {
        if self.matches_pattern( url ) {
            return Outcome::Fail;
        }
        match lock( &self.faults ).get( url ) {
            Some( Fault::FailAlways ) => Outcome::Fail,
            Some( Fault::Stall ) => Outcome::Stall,
            _ => Outcome::Ready,
        }
    }


    fn play_rejected( &self, url: &Url ) -> bool {
        let mut faults = lock( &self.faults );
        match faults.get( url ).copied() {
            Some( Fault::RejectPlay( remaining ) ) => {
                if remaining <= 1 {
                    faults.remove( url );
                } else {
                    faults.insert( url.clone(), Fault::RejectPlay( remaining - 1 ) );
                }
                true
            }
            _ => false,
        }
    }
}


/// Backend handing out simulated surfaces and handles.
#[derive( Debug, Clone )]
pub struct SimBackend {
    shared: Arc<Shared>,
}


impl Default for SimBackend {
    fn default() -> Self {
        Self::new( SimProfile::default() )
    }
}


impl SimBackend {
    pub fn new( profile: SimProfile ) -> Self {
        Self {
            shared: Arc::new( Shared {
                profile,
                faults: Mutex::new( HashMap::new() ),
                patterns: Mutex::new( Vec::new() ),
                ledger: Mutex::new( Ledger::default() ),
            }),
        }
    }


    pub fn profile( &self ) -> SimProfile {
        self.shared.profile
    }


    /// Creates a playback surface sharing this backend's faults and ledger.
    pub fn surface( &self, name: &str ) -> SimSurface {
        let ( signals, _ ) = broadcast::channel( SIGNAL_CAPACITY );
        SimSurface {
            inner: Arc::new( SurfaceInner {
                name: name.to_string(),
                shared: Arc::clone( &self.shared ),
                state: Mutex::new( SurfaceState::default() ),
                signals,
            }),
        }
    }


    /// The next `times` surface loads of `url` fail.
    pub fn fail_next( &self, url: &Url, times: u32 ) {
        if times > 0 {
            lock( &self.shared.faults ).insert( url.clone(), Fault::FailNext( times ) );
        }
    }


    /// Every load and preload of `url` fails.
    pub fn fail_always( &self, url: &Url ) {
        lock( &self.shared.faults ).insert( url.clone(), Fault::FailAlways );
    }


    /// Every load and preload of a URL containing `pattern` fails.
    pub fn fail_matching( &self, pattern: impl Into<String> ) {
        lock( &self.shared.patterns ).push( pattern.into() );
    }


    /// Loads of `url` never become playable.
    pub fn stall( &self, url: &Url ) {
        lock( &self.shared.faults ).insert( url.clone(), Fault::Stall );
    }


    /// The next `times` calls to `play()` on `url` are rejected.
    pub fn reject_play( &self, url: &Url, times: u32 ) {
        if times > 0 {
            lock( &self.shared.faults ).insert( url.clone(), Fault::RejectPlay( times ) );
        }
    }


    pub fn clear_faults( &self ) {
        lock( &self.shared.faults ).clear();
        lock( &self.shared.patterns ).clear();
    }


    /// Number of surface loads issued for `url`.
    pub fn load_count( &self, url: &Url ) -> usize {
        lock( &self.shared.ledger ).loads.get( url ).copied().unwrap_or( 0 )
    }


    /// Number of preload handles created for `url`.
    pub fn handle_count( &self, url: &Url ) -> usize {
        lock( &self.shared.ledger ).handles.get( url ).copied().unwrap_or( 0 )
    }


    /// Number of handles released so far.
    pub fn released_count( &self ) -> usize {
        lock( &self.shared.ledger ).released
    }
}


impl MediaBackend for SimBackend {
    type Handle = SimHandle;
    type Surface = SimSurface;


    fn create_handle( &self, url: &Url, options: SurfaceOptions ) -> SimHandle {
        *lock( &self.shared.ledger ).handles.entry( url.clone() ).or_default() += 1;
        SimHandle {
            url: url.clone(),
            options,
            shared: Arc::clone( &self.shared ),
            ready: AtomicBool::new( false ),
            released: AtomicBool::new( false ),
        }
    }
}


/// Detached preload handle.
#[derive( Debug )]
pub struct SimHandle {
    url: Url,
    options: SurfaceOptions,
    shared: Arc<Shared>,
    ready: AtomicBool,
    released: AtomicBool,
}


impl SimHandle {
    pub fn options( &self ) -> SurfaceOptions {
        self.options
    }


    pub fn is_released( &self ) -> bool {
        self.released.load( Ordering::SeqCst )
    }
}


impl MediaHandle for SimHandle {
    fn url( &self ) -> &Url {
        &self.url
    }


    fn wait_ready( &self ) -> impl Future<Output = Result<(), MediaError>> + Send {
        async move {
            if self.options.preload != PreloadHint::Auto {
                return Err( MediaError::NotSupported( format!( "handle not set to preload: {}", self.url ) ) );
            }

            time::sleep( self.shared.profile.latency ).await;

            if self.is_released() {
                return Err( MediaError::Aborted );
            }

            match self.shared.preload_outcome( &self.url ) {
                Outcome::Ready => {
                    self.ready.store( true, Ordering::SeqCst );
                    Ok(())
                }
                Outcome::Fail => Err( MediaError::Network( format!( "simulated preload failure: {}", self.url ) ) ),
                Outcome::Stall => {
                    std::future::pending::<()>().await;
                    Err( MediaError::Aborted )
                }
            }
        }
    }


    fn is_ready( &self ) -> bool {
        self.ready.load( Ordering::SeqCst ) && !self.is_released()
    }


    fn release( &self ) {
        if !self.released.swap( true, Ordering::SeqCst ) {
            lock( &self.shared.ledger ).released += 1;
        }
    }
}


#[derive( Debug )]
struct SurfaceState {
    options: Option<SurfaceOptions>,
    source: Option<Url>,
    warm: bool,
    loaded: bool,
    playing: bool,
    position: Duration,
    duration: Option<Duration>,
    opacity: f32,
    visible: bool,
    ticker: Option<JoinHandle<()>>,
}


impl Default for SurfaceState {
    fn default() -> Self {
        Self {
            options: None,
            source: None,
            warm: false,
            loaded: false,
            playing: false,
            position: Duration::ZERO,
            duration: None,
            opacity: 0.0,
            visible: true,
            ticker: None,
        }
    }
}


impl SurfaceState {
    fn stop_ticker( &mut self ) {
        if let Some( ticker ) = self.ticker.take() {
            ticker.abort();
        }
    }


    fn reset_media( &mut self ) {
        self.stop_ticker();
        self.loaded = false;
        self.playing = false;
        self.position = Duration::ZERO;
        self.duration = None;
    }
}


#[derive( Debug )]
struct SurfaceInner {
    name: String,
    shared: Arc<Shared>,
    state: Mutex<SurfaceState>,
    signals: broadcast::Sender<SurfaceSignal>,
}


impl SurfaceInner {
    fn state( &self ) -> MutexGuard<'_, SurfaceState> {
        lock( &self.state )
    }


    fn send( &self, signal: SurfaceSignal ) {
        // No receivers is normal for the inactive slot.
        let _ = self.signals.send( signal );
    }
}


/// Simulated playback surface.
#[derive( Debug )]
pub struct SimSurface {
    inner: Arc<SurfaceInner>,
}


impl SimSurface {
    pub fn name( &self ) -> &str {
        &self.inner.name
    }


    pub fn opacity( &self ) -> f32 {
        self.inner.state().opacity
    }


    pub fn is_visible( &self ) -> bool {
        self.inner.state().visible
    }


    pub fn options( &self ) -> Option<SurfaceOptions> {
        self.inner.state().options
    }


    /// Injects a signal as if the media element had raised it.
    pub fn raise( &self, signal: SurfaceSignal ) {
        self.inner.send( signal );
    }
}


async fn tick_loop( surface: Weak<SurfaceInner>, tick: Duration, clip_length: Duration ) {
    let mut interval = time::interval_at( Instant::now() + tick, tick );

    loop {
        interval.tick().await;

        let Some( inner ) = surface.upgrade() else {
            break;
        };

        let ( position, ended ) = {
            let mut state = inner.state();
            if !state.playing {
                break;
            }
            state.position = ( state.position + tick ).min( clip_length );
            let ended = state.position >= clip_length;
            if ended {
                state.playing = false;
                state.ticker = None;
            }
            ( state.position, ended )
        };

        inner.send( SurfaceSignal::TimeUpdate {
            current_time: position,
            duration: Some( clip_length ),
        });

        if ended {
            inner.send( SurfaceSignal::Ended );
            break;
        }
    }
}


impl Surface for SimSurface {
    type Handle = SimHandle;


    fn configure( &self, options: SurfaceOptions ) {
        self.inner.state().options = Some( options );
    }


    fn set_source( &self, url: &Url ) {
        let mut state = self.inner.state();
        state.reset_media();
        state.source = Some( url.clone() );
        state.warm = false;
    }


    fn source( &self ) -> Option<Url> {
        self.inner.state().source.clone()
    }


    fn adopt( &self, handle: &SimHandle ) {
        let mut state = self.inner.state();
        state.reset_media();
        state.source = Some( handle.url().clone() );
        state.warm = handle.is_ready();
    }


    fn load( &self ) -> impl Future<Output = Result<(), MediaError>> + Send {
        let inner = Arc::clone( &self.inner );

        async move {
            let ( source, warm ) = {
                let mut state = inner.state();
                state.reset_media();
                ( state.source.clone(), state.warm )
            };

            let Some( url ) = source else {
                return Err( MediaError::NotSupported( "no source set".into() ) );
            };

            let outcome = inner.shared.load_outcome( &url );
            if !warm {
                time::sleep( inner.shared.profile.latency ).await;
            }

            match outcome {
                Outcome::Ready => {
                    let mut state = inner.state();
                    state.loaded = true;
                    state.duration = Some( inner.shared.profile.clip_length );
                    Ok(())
                }
                Outcome::Fail => {
                    let error = MediaError::Network( format!( "simulated load failure: {}", url ) );
                    inner.send( SurfaceSignal::Error( error.clone() ) );
                    Err( error )
                }
                Outcome::Stall => {
                    std::future::pending::<()>().await;
                    Err( MediaError::Aborted )
                }
            }
        }
    }


    fn play( &self ) -> impl Future<Output = Result<(), MediaError>> + Send {
        let inner = Arc::clone( &self.inner );

        async move {
            let ( source, loaded ) = {
                let state = inner.state();
                ( state.source.clone(), state.loaded )
            };

            let url = match source {
                Some( url ) if loaded => url,
                _ => return Err( MediaError::PlayRejected( "nothing loaded".into() ) ),
            };

            if inner.shared.play_rejected( &url ) {
                return Err( MediaError::PlayRejected( format!( "simulated rejection: {}", url ) ) );
            }

            {
                let mut state = inner.state();
                if state.playing {
                    return Ok(());
                }
                state.stop_ticker();
                state.playing = true;
                let profile = inner.shared.profile;
                state.ticker = Some( tokio::spawn( tick_loop(
                    Arc::downgrade( &inner ),
                    profile.tick,
                    profile.clip_length,
                )));
            }

            inner.send( SurfaceSignal::Playing );
            Ok(())
        }
    }


    fn pause( &self ) {
        let was_playing = {
            let mut state = self.inner.state();
            state.stop_ticker();
            std::mem::replace( &mut state.playing, false )
        };
        if was_playing {
            self.inner.send( SurfaceSignal::Paused );
        }
    }


    fn set_opacity( &self, opacity: f32 ) {
        self.inner.state().opacity = opacity.clamp( 0.0, 1.0 );
    }


    fn set_visible( &self, visible: bool ) {
        self.inner.state().visible = visible;
    }


    fn current_time( &self ) -> Duration {
        self.inner.state().position
    }


    fn duration( &self ) -> Option<Duration> {
        self.inner.state().duration
    }


    fn buffered( &self ) -> Vec<TimeRange> {
        let state = self.inner.state();
        match ( state.loaded, state.duration ) {
            ( true, Some( end ) ) => vec![ TimeRange { start: Duration::ZERO, end } ],
            _ => Vec::new(),
        }
    }


    fn is_playing( &self ) -> bool {
        self.inner.state().playing
    }


    fn signals( &self ) -> broadcast::Receiver<SurfaceSignal> {
        self.inner.signals.subscribe()
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn url( name: &str ) -> Url {
        Url::parse( &format!( "https://cdn.example.com/{}.mp4", name ) ).unwrap()
    }


    #[tokio::test( start_paused = true )]
    async fn test_load_and_play_to_end() {
        let backend = SimBackend::new( SimProfile {
            latency: Duration::from_millis( 100 ),
            clip_length: Duration::from_secs( 1 ),
            tick: Duration::from_millis( 250 ),
        });
        let surface = backend.surface( "A" );
        let mut signals = surface.signals();

        surface.set_source( &url( "a" ) );
        surface.load().await.unwrap();
        assert_eq!( surface.duration(), Some( Duration::from_secs( 1 ) ) );
        surface.play().await.unwrap();
        assert!( surface.is_playing() );

        let mut ended = false;
        while let Ok( signal ) = signals.recv().await {
            if signal == SurfaceSignal::Ended {
                ended = true;
                break;
            }
        }
        assert!( ended );
        assert!( !surface.is_playing() );
        assert_eq!( surface.current_time(), Duration::from_secs( 1 ) );
    }


    #[tokio::test( start_paused = true )]
    async fn test_fail_next_counts_down() {
        let backend = SimBackend::default();
        let surface = backend.surface( "A" );
        let clip = url( "flaky" );
        backend.fail_next( &clip, 2 );

        surface.set_source( &clip );
        assert!( surface.load().await.is_err() );
        assert!( surface.load().await.is_err() );
        assert!( surface.load().await.is_ok() );
        assert_eq!( backend.load_count( &clip ), 3 );
    }


    #[tokio::test( start_paused = true )]
    async fn test_preload_ignores_fail_next() {
        let backend = SimBackend::default();
        let clip = url( "flaky" );
        backend.fail_next( &clip, 1 );

        let handle = backend.create_handle( &clip, SurfaceOptions::PRELOAD );
        handle.wait_ready().await.unwrap();
        assert!( handle.is_ready() );
        assert_eq!( backend.handle_count( &clip ), 1 );

        handle.release();
        handle.release();
        assert!( !handle.is_ready() );
        assert_eq!( backend.released_count(), 1 );
    }


    #[tokio::test( start_paused = true )]
    async fn test_handle_needs_auto_preload() {
        let backend = SimBackend::default();
        let clip = url( "lazy" );

        let eager = backend.create_handle( &clip, SurfaceOptions::PRELOAD );
        assert_eq!( eager.options(), SurfaceOptions::PRELOAD );
        assert!( eager.wait_ready().await.is_ok() );

        let lazy = backend.create_handle( &clip, SurfaceOptions { preload: PreloadHint::None, ..SurfaceOptions::PRELOAD } );
        assert!( matches!( lazy.wait_ready().await, Err( MediaError::NotSupported( _ ) ) ) );
        assert!( !lazy.is_ready() );
    }


    #[tokio::test( start_paused = true )]
    async fn test_fail_always_hits_loads_and_preloads() {
        let backend = SimBackend::default();
        let surface = backend.surface( "A" );
        let clip = url( "gone" );
        backend.fail_always( &clip );

        surface.set_source( &clip );
        for _ in 0..3 {
            assert!( matches!( surface.load().await, Err( MediaError::Network( _ ) ) ) );
        }
        assert_eq!( backend.load_count( &clip ), 3 );

        let handle = backend.create_handle( &clip, SurfaceOptions::PRELOAD );
        assert!( handle.wait_ready().await.is_err() );

        backend.clear_faults();
        assert!( surface.load().await.is_ok() );
    }


    #[tokio::test( start_paused = true )]
    async fn test_reject_play() {
        let backend = SimBackend::default();
        let surface = backend.surface( "A" );
        let clip = url( "shy" );
        backend.reject_play( &clip, 1 );

        surface.set_source( &clip );
        surface.load().await.unwrap();
        assert!( matches!( surface.play().await, Err( MediaError::PlayRejected( _ ) ) ) );
        assert!( surface.play().await.is_ok() );
    }


    #[tokio::test( start_paused = true )]
    async fn test_pattern_failure() {
        let backend = SimBackend::default();
        backend.fail_matching( "broken" );
        let surface = backend.surface( "A" );

        surface.set_source( &url( "broken-clip" ) );
        assert!( matches!( surface.load().await, Err( MediaError::Network( _ ) ) ) );
    }
}
