//! One-line status messages for playback events.

use reelcycle_core::{ PlayerEvent, VideoInfo };


/// Formats the status line for `event`, given what is on screen.
///
/// Time updates and pauses of the outgoing slot produce no line.
pub fn status_line( event: &PlayerEvent, info: &VideoInfo ) -> Option<String> {
    match event {
        PlayerEvent::Playing => {
            let index = info.index?;
            let url = info.url.as_ref().map( |u| u.as_str() ).unwrap_or( "" );
            Some( format!( "playing {}/{} {}", index, info.total, url ) )
        }
        PlayerEvent::Buffering => Some( "buffering…".to_string() ),
        PlayerEvent::VideoError { slot, error, skipping } => {
            let action = if *skipping { "loading next" } else { "retrying" };
            Some( format!( "error, {} (slot {}: {})", action, slot, error ) )
        }
        PlayerEvent::Ended => Some( "ended".to_string() ),
        PlayerEvent::Paused | PlayerEvent::TimeUpdate { .. } => None,
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::time::Duration;

    use reelcycle_core::SlotId;
    use url::Url;


    fn info( index: Option<usize> ) -> VideoInfo {
        VideoInfo {
            index,
            total: 12,
            url: index.map( |_| Url::parse( "https://cdn.example.com/a.mp4" ).unwrap() ),
            current_time: Duration::ZERO,
            duration: None,
            buffered: Vec::new(),
            playing: index.is_some(),
        }
    }


    #[test]
    fn test_playing_line() {
        let line = status_line( &PlayerEvent::Playing, &info( Some( 3 ) ) );
        assert_eq!( line.as_deref(), Some( "playing 3/12 https://cdn.example.com/a.mp4" ) );
    }


    #[test]
    fn test_playing_before_first_clip() {
        assert_eq!( status_line( &PlayerEvent::Playing, &info( None ) ), None );
    }


    #[test]
    fn test_other_lines() {
        let idle = info( None );
        assert_eq!( status_line( &PlayerEvent::Buffering, &idle ).as_deref(), Some( "buffering…" ) );
        assert_eq!( status_line( &PlayerEvent::Ended, &idle ).as_deref(), Some( "ended" ) );

        let tick = PlayerEvent::TimeUpdate { current_time: Duration::from_secs( 1 ), duration: None };
        assert_eq!( status_line( &tick, &idle ), None );
    }


    #[test]
    fn test_error_line_retry_or_skip() {
        let idle = info( None );

        let retry = PlayerEvent::VideoError { slot: SlotId::B, error: "timed out".into(), skipping: false };
        let line = status_line( &retry, &idle ).unwrap();
        assert_eq!( line, "error, retrying (slot B: timed out)" );

        let skip = PlayerEvent::VideoError { slot: SlotId::A, error: "timed out".into(), skipping: true };
        let line = status_line( &skip, &idle ).unwrap();
        assert!( line.starts_with( "error, loading next" ) );
    }
}
