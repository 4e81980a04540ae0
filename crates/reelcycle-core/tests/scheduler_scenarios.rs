//! End-to-end scheduler scenarios on the simulated backend.
//!
//! All tests run on paused Tokio time, so load latency, crossfades and
//! retry delays advance virtually and deterministically.

use std::sync::atomic::{ AtomicUsize, Ordering };
use std::sync::{ Arc, Mutex };
use std::time::Duration;

use reelcycle_core::sim::{ SimBackend, SimProfile };
use reelcycle_core::{
    Command, EventKind, MediaError, Phase, PlayerEvent, Playlist, Scheduler, SchedulerConfig, SlotId,
    Surface, SurfaceSignal,
};
use tokio::time::sleep;
use url::Url;


fn sources( n: usize ) -> Vec<String> {
    ( 0..n ).map( |i| format!( "https://cdn.example.com/clip{}.mp4", i ) ).collect()
}


fn long_clips() -> SimProfile {
    SimProfile {
        clip_length: Duration::from_secs( 600 ),
        ..SimProfile::default()
    }
}


/// Scheduler over an unshuffled playlist so indices are predictable.
fn ordered( n: usize, profile: SimProfile, config: SchedulerConfig ) -> ( SimBackend, Scheduler<SimBackend> ) {
    let backend = SimBackend::new( profile );
    let scheduler = Scheduler::with_playlist(
        backend.clone(),
        backend.surface( "A" ),
        backend.surface( "B" ),
        Playlist::in_order( sources( n ) ).unwrap(),
        config,
    );
    ( backend, scheduler )
}


fn url_at( scheduler: &Scheduler<SimBackend>, index: usize ) -> Url {
    scheduler.playlist().urls()[ index ].clone()
}


#[tokio::test( start_paused = true )]
async fn test_initialize_shuffle_keeps_every_url_once() {
    let backend = SimBackend::new( long_clips() );
    let input = sources( 25 );
    let scheduler = Scheduler::initialize(
        backend.clone(),
        backend.surface( "A" ),
        backend.surface( "B" ),
        &input,
        SchedulerConfig::default(),
    ).unwrap();

    let mut shuffled: Vec<String> = scheduler.playlist().urls().iter().map( |u| u.to_string() ).collect();
    let mut expected = input.clone();
    shuffled.sort();
    expected.sort();
    assert_eq!( shuffled, expected );
}


#[tokio::test( start_paused = true )]
async fn test_cold_start_loads_first_and_preloads_one() {
    let backend = SimBackend::new( long_clips() );
    let config = SchedulerConfig { preload_buffer_size: 1, ..SchedulerConfig::default() };
    let scheduler = Scheduler::initialize(
        backend.clone(),
        backend.surface( "A" ),
        backend.surface( "B" ),
        [ "https://cdn.example.com/a.mp4", "https://cdn.example.com/b.mp4", "https://cdn.example.com/c.mp4" ],
        config,
    ).unwrap();

    scheduler.play_video( 0 ).await.unwrap();

    let first = url_at( &scheduler, 0 );
    let second = url_at( &scheduler, 1 );
    assert_eq!( scheduler.active_surface().source(), Some( first ) );
    assert_eq!( scheduler.preloaded(), vec![ second ] );
    assert_eq!( scheduler.current_index(), Some( 0 ) );
}


#[tokio::test( start_paused = true )]
async fn test_play_video_wraps_any_index() {
    let ( _, scheduler ) = ordered( 4, long_clips(), SchedulerConfig::default() );

    for ( requested, expected ) in [ ( -1, 3 ), ( 5, 1 ), ( -8, 0 ), ( 2, 2 ), ( 11, 3 ) ] {
        scheduler.play_video( requested ).await.unwrap();
        assert_eq!( scheduler.current_index(), Some( expected ), "requested {}", requested );
        assert_eq!( scheduler.current_video_info().index, Some( expected ) );
    }
}


#[tokio::test( start_paused = true )]
async fn test_successful_play_swaps_slots() {
    let ( _, scheduler ) = ordered( 3, long_clips(), SchedulerConfig::default() );
    assert_eq!( scheduler.active_slot(), SlotId::A );

    scheduler.play_video( 0 ).await.unwrap();
    assert_eq!( scheduler.active_slot(), SlotId::B );

    scheduler.play_next().await.unwrap();
    assert_eq!( scheduler.active_slot(), SlotId::A );
    assert_eq!( scheduler.phase(), Phase::Idle );
}


#[tokio::test( start_paused = true )]
async fn test_navigation_ignored_during_transition() {
    let ( backend, scheduler ) = ordered( 5, long_clips(), SchedulerConfig::default() );
    scheduler.play_video( 0 ).await.unwrap();
    let slot_before = scheduler.active_slot();

    let running = scheduler.clone();
    let pending = tokio::spawn( async move { running.play_video( 2 ).await } );
    sleep( Duration::from_millis( 10 ) ).await;
    assert!( scheduler.is_transitioning() );

    scheduler.play_next().await.unwrap();
    scheduler.play_previous().await.unwrap();
    scheduler.play_random().await.unwrap();
    assert_eq!( scheduler.current_index(), Some( 0 ) );
    assert_eq!( scheduler.active_slot(), slot_before );

    pending.await.unwrap().unwrap();
    assert_eq!( scheduler.current_index(), Some( 2 ) );
    assert_eq!( backend.load_count( &url_at( &scheduler, 1 ) ), 0 );
    assert_eq!( backend.load_count( &url_at( &scheduler, 4 ) ), 0 );
}


#[tokio::test( start_paused = true )]
async fn test_next_wraps_to_start() {
    let ( _, scheduler ) = ordered( 3, long_clips(), SchedulerConfig::default() );
    scheduler.play_video( 2 ).await.unwrap();

    scheduler.play_next().await.unwrap();
    assert_eq!( scheduler.current_index(), Some( 0 ) );

    scheduler.play_previous().await.unwrap();
    assert_eq!( scheduler.current_index(), Some( 2 ) );
}


#[tokio::test( start_paused = true )]
async fn test_preload_window_never_exceeds_buffer() {
    let config = SchedulerConfig { preload_buffer_size: 2, ..SchedulerConfig::default() };
    let ( _, scheduler ) = ordered( 7, long_clips(), config );
    let playlist = scheduler.playlist().clone();

    for index in [ 0, 3, 6, 1, 2 ] {
        scheduler.play_video( index ).await.unwrap();
        sleep( Duration::from_millis( 300 ) ).await;

        let cursor = scheduler.current_index().unwrap();
        let preloaded = scheduler.preloaded();
        assert_eq!( preloaded.len(), 2 );
        for url in preloaded {
            let position = playlist.urls().iter().position( |u| *u == url ).unwrap();
            let distance = playlist.forward_distance( cursor, position );
            assert!( ( 1..=2 ).contains( &distance ), "clip {} at distance {}", position, distance );
        }
    }
}


#[tokio::test( start_paused = true )]
async fn test_ready_preload_is_used() {
    let ( backend, scheduler ) = ordered( 5, long_clips(), SchedulerConfig::default() );
    scheduler.play_video( 0 ).await.unwrap();
    sleep( Duration::from_secs( 1 ) ).await;

    let started = tokio::time::Instant::now();
    scheduler.play_next().await.unwrap();

    // A warm slot skips network latency; only the crossfade remains.
    let crossfade = scheduler.config().crossfade_duration;
    assert!( started.elapsed() < crossfade + backend.profile().latency );
    assert_eq!( backend.handle_count( &url_at( &scheduler, 1 ) ), 1 );
    assert_eq!( scheduler.current_index(), Some( 1 ) );
}


#[tokio::test( start_paused = true )]
async fn test_in_flight_preload_falls_back_to_direct_load() {
    let ( backend, scheduler ) = ordered( 5, long_clips(), SchedulerConfig::default() );
    scheduler.play_video( 0 ).await.unwrap();

    // Preload of clip 1 has only just started.
    scheduler.play_video( 1 ).await.unwrap();

    let clip = url_at( &scheduler, 1 );
    assert_eq!( backend.load_count( &clip ), 1 );
    assert_eq!( backend.handle_count( &clip ), 1 );
    assert!( !scheduler.preloaded().contains( &clip ) );
}


#[tokio::test( start_paused = true )]
async fn test_failed_load_retries_same_clip() {
    let ( backend, scheduler ) = ordered( 3, long_clips(), SchedulerConfig::default() );
    let clip = url_at( &scheduler, 0 );
    backend.fail_next( &clip, 1 );

    let errors = Arc::new( Mutex::new( Vec::new() ) );
    let errors_clone = Arc::clone( &errors );
    scheduler.on( EventKind::VideoError, move |event| {
        errors_clone.lock().unwrap().push( event.clone() );
    });

    assert!( scheduler.play_video( 0 ).await.is_err() );
    assert_eq!( scheduler.current_index(), None );
    assert_eq!( scheduler.phase(), Phase::Error( 0 ) );

    sleep( Duration::from_secs( 3 ) ).await;

    assert_eq!( scheduler.current_index(), Some( 0 ) );
    assert_eq!( scheduler.error_count(), 1 );
    assert_eq!( backend.load_count( &clip ), 2 );

    let errors = errors.lock().unwrap();
    assert_eq!( errors.len(), 1 );
    assert!( matches!( &errors[ 0 ], PlayerEvent::VideoError { slot: SlotId::B, skipping: false, .. } ) );
}


#[tokio::test( start_paused = true )]
async fn test_load_timeout_is_retried() {
    let config = SchedulerConfig {
        load_timeout: Duration::from_secs( 2 ),
        preload_buffer_size: 0,
        ..SchedulerConfig::default()
    };
    let ( backend, scheduler ) = ordered( 3, long_clips(), config );
    let clip = url_at( &scheduler, 0 );
    backend.stall( &clip );

    let result = scheduler.play_video( 0 ).await;
    assert!( matches!( result, Err( reelcycle_core::SchedulerError::LoadTimeout { .. } ) ) );

    backend.clear_faults();
    sleep( Duration::from_secs( 4 ) ).await;
    assert_eq!( scheduler.current_index(), Some( 0 ) );
}


#[tokio::test( start_paused = true )]
async fn test_error_ceiling_forces_single_skip() {
    let ( backend, scheduler ) = ordered( 5, long_clips(), SchedulerConfig::default() );
    scheduler.play_video( 0 ).await.unwrap();

    let broken = url_at( &scheduler, 1 );
    backend.fail_next( &broken, 11 );

    assert!( scheduler.play_video( 1 ).await.is_err() );
    sleep( Duration::from_secs( 30 ) ).await;

    assert_eq!( scheduler.error_count(), 11 );
    assert_eq!( backend.load_count( &broken ), 11 );
    assert_eq!( backend.load_count( &url_at( &scheduler, 2 ) ), 1 );
    assert_eq!( backend.load_count( &url_at( &scheduler, 3 ) ), 0 );
    assert_eq!( scheduler.current_index(), Some( 2 ) );
}


#[tokio::test( start_paused = true )]
async fn test_ended_clip_advances() {
    let profile = SimProfile {
        clip_length: Duration::from_secs( 2 ),
        ..SimProfile::default()
    };
    let config = SchedulerConfig {
        crossfade_duration: Duration::from_millis( 500 ),
        ..SchedulerConfig::default()
    };
    let ( _, scheduler ) = ordered( 4, profile, config );

    let ended = Arc::new( AtomicUsize::new( 0 ) );
    let ended_clone = Arc::clone( &ended );
    scheduler.on( EventKind::Ended, move |_| {
        ended_clone.fetch_add( 1, Ordering::SeqCst );
    });

    scheduler.play_video( 0 ).await.unwrap();
    sleep( Duration::from_secs( 3 ) ).await;

    assert_eq!( ended.load( Ordering::SeqCst ), 1 );
    assert_eq!( scheduler.current_index(), Some( 1 ) );
}


#[tokio::test( start_paused = true )]
async fn test_time_updates_forwarded_from_active_slot() {
    let ( _, scheduler ) = ordered( 3, long_clips(), SchedulerConfig::default() );

    let updates = Arc::new( Mutex::new( Vec::new() ) );
    let updates_clone = Arc::clone( &updates );
    scheduler.on( EventKind::TimeUpdate, move |event| {
        if let PlayerEvent::TimeUpdate { current_time, .. } = event {
            updates_clone.lock().unwrap().push( *current_time );
        }
    });

    scheduler.play_video( 0 ).await.unwrap();
    sleep( Duration::from_secs( 2 ) ).await;

    let updates = updates.lock().unwrap();
    assert!( !updates.is_empty() );
    assert!( updates.windows( 2 ).all( |w| w[ 0 ] <= w[ 1 ] ) );
}


#[tokio::test( start_paused = true )]
async fn test_active_slot_error_reloads_current_clip() {
    let ( backend, scheduler ) = ordered( 3, long_clips(), SchedulerConfig::default() );
    scheduler.play_video( 0 ).await.unwrap();
    assert_eq!( scheduler.active_slot(), SlotId::B );

    scheduler.active_surface().raise( SurfaceSignal::Error( MediaError::Decode( "corrupt frame".into() ) ) );
    sleep( Duration::from_secs( 3 ) ).await;

    assert_eq!( scheduler.error_count(), 1 );
    assert_eq!( scheduler.current_index(), Some( 0 ) );
    assert_eq!( scheduler.active_slot(), SlotId::A );
    assert_eq!( backend.load_count( &url_at( &scheduler, 0 ) ), 2 );
}


#[tokio::test( start_paused = true )]
async fn test_panicking_subscriber_does_not_block_others() {
    let ( _, scheduler ) = ordered( 3, long_clips(), SchedulerConfig::default() );

    let reached = Arc::new( AtomicUsize::new( 0 ) );
    scheduler.on( EventKind::Playing, |_| panic!( "subscriber failure" ) );
    let reached_clone = Arc::clone( &reached );
    scheduler.on( EventKind::Playing, move |_| {
        reached_clone.fetch_add( 1, Ordering::SeqCst );
    });

    scheduler.play_video( 0 ).await.unwrap();
    assert!( reached.load( Ordering::SeqCst ) >= 1 );
    assert_eq!( scheduler.current_index(), Some( 0 ) );
}


#[tokio::test( start_paused = true )]
async fn test_destroy_discards_in_flight_load() {
    let ( backend, scheduler ) = ordered( 3, long_clips(), SchedulerConfig::default() );

    let running = scheduler.clone();
    let pending = tokio::spawn( async move { running.play_video( 0 ).await } );
    sleep( Duration::from_millis( 50 ) ).await;

    scheduler.destroy();
    let result = pending.await.unwrap();

    assert!( matches!( result, Err( reelcycle_core::SchedulerError::Destroyed ) ) );
    assert_eq!( scheduler.current_index(), None );
    assert!( !scheduler.is_transitioning() );
    assert!( scheduler.events().is_empty() );
    assert_eq!( backend.load_count( &url_at( &scheduler, 0 ) ), 1 );
}


#[tokio::test( start_paused = true )]
async fn test_execute_dispatches_commands() {
    let ( _, scheduler ) = ordered( 4, long_clips(), SchedulerConfig::default() );

    let result = scheduler.execute( Command::parse( "play 2" ).unwrap() ).await.unwrap();
    assert_eq!( result, None );
    assert_eq!( scheduler.current_index(), Some( 2 ) );

    scheduler.execute( Command::Prev ).await.unwrap();
    assert_eq!( scheduler.current_index(), Some( 1 ) );

    let info = scheduler.execute( Command::Info ).await.unwrap().unwrap();
    assert_eq!( info.index, Some( 1 ) );
    assert_eq!( info.total, 4 );
    assert!( info.playing );
    assert_eq!( info.url, Some( url_at( &scheduler, 1 ) ) );

    scheduler.execute( Command::Quit ).await.unwrap();
    assert!( scheduler.is_destroyed() );
    assert_eq!( scheduler.phase(), Phase::Destroyed );
}


#[tokio::test( start_paused = true )]
async fn test_outgoing_slot_error_mid_crossfade_is_ignored() {
    let ( backend, scheduler ) = ordered( 5, long_clips(), SchedulerConfig::default() );
    scheduler.play_video( 0 ).await.unwrap();
    let outgoing = scheduler.active_surface();

    let running = scheduler.clone();
    let pending = tokio::spawn( async move { running.play_video( 2 ).await } );

    // Clip 2 has loaded and the crossfade is under way.
    sleep( Duration::from_millis( 900 ) ).await;
    assert_eq!( scheduler.phase(), Phase::Transitioning( 2 ) );
    outgoing.raise( SurfaceSignal::Error( MediaError::Decode( "corrupt frame".into() ) ) );

    pending.await.unwrap().unwrap();
    sleep( Duration::from_secs( 5 ) ).await;

    assert_eq!( scheduler.current_index(), Some( 2 ) );
    assert_eq!( scheduler.active_slot(), SlotId::A );
    assert_eq!( scheduler.error_count(), 0 );
    assert_eq!( backend.load_count( &url_at( &scheduler, 2 ) ), 1 );
    assert_eq!( backend.load_count( &url_at( &scheduler, 0 ) ), 1 );
}


#[tokio::test( start_paused = true )]
async fn test_random_when_idle_plays_a_clip() {
    let ( backend, scheduler ) = ordered( 4, long_clips(), SchedulerConfig::default() );

    scheduler.play_random().await.unwrap();

    let index = scheduler.current_index().unwrap();
    assert!( index < 4 );
    assert_eq!( scheduler.active_slot(), SlotId::B );
    assert_eq!( scheduler.active_surface().source(), Some( url_at( &scheduler, index ) ) );
    assert_eq!( backend.load_count( &url_at( &scheduler, index ) ), 1 );
}


#[tokio::test( start_paused = true )]
async fn test_destroy_cancels_pending_retry() {
    let ( backend, scheduler ) = ordered( 3, long_clips(), SchedulerConfig::default() );
    let clip = url_at( &scheduler, 0 );
    backend.fail_always( &clip );

    assert!( scheduler.play_video( 0 ).await.is_err() );
    assert_eq!( backend.load_count( &clip ), 1 );

    // The retry is waiting out its delay.
    scheduler.destroy();
    sleep( Duration::from_secs( 10 ) ).await;

    assert_eq!( backend.load_count( &clip ), 1 );
    assert_eq!( scheduler.error_count(), 1 );
    assert_eq!( scheduler.current_index(), None );
}


#[tokio::test( start_paused = true )]
async fn test_zero_buffer_preloads_nothing() {
    let config = SchedulerConfig { preload_buffer_size: 0, ..SchedulerConfig::default() };
    let ( backend, scheduler ) = ordered( 4, long_clips(), config );

    scheduler.play_video( 0 ).await.unwrap();
    scheduler.play_next().await.unwrap();

    assert!( scheduler.preloaded().is_empty() );
    for url in scheduler.playlist().urls() {
        assert_eq!( backend.handle_count( url ), 0 );
    }
    assert_eq!( scheduler.current_index(), Some( 1 ) );
}


#[tokio::test( start_paused = true )]
async fn test_always_failing_clip_is_eventually_skipped() {
    let ( backend, scheduler ) = ordered( 3, long_clips(), SchedulerConfig::default() );
    let broken = url_at( &scheduler, 0 );
    backend.fail_always( &broken );

    let skips = Arc::new( Mutex::new( Vec::new() ) );
    let skips_clone = Arc::clone( &skips );
    scheduler.on( EventKind::VideoError, move |event| {
        if let PlayerEvent::VideoError { skipping, .. } = event {
            skips_clone.lock().unwrap().push( *skipping );
        }
    });

    assert!( scheduler.play_video( 0 ).await.is_err() );
    sleep( Duration::from_secs( 30 ) ).await;

    assert_eq!( scheduler.error_count(), 11 );
    assert_eq!( backend.load_count( &broken ), 11 );
    assert_eq!( scheduler.current_index(), Some( 1 ) );

    let skips = skips.lock().unwrap();
    assert_eq!( skips.len(), 11 );
    assert!( skips[ ..10 ].iter().all( |s| !s ) );
    assert!( skips[ 10 ] );
}
