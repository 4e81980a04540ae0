//! Typed publish/subscribe for playback status
//!
//! Subscribers register per event kind. Emission works on a snapshot of the
//! subscriber list, so callbacks may subscribe or unsubscribe re-entrantly,
//! and every callback runs behind `catch_unwind` so one failing subscriber
//! cannot starve the rest.

use std::collections::HashMap;
use std::panic::{ self, AssertUnwindSafe };
use std::sync::atomic::{ AtomicU64, Ordering };
use std::sync::{ Arc, RwLock };
use std::time::Duration;

use serde::Serialize;

use crate::surface::SlotId;


/// Events emitted to the application layer.
#[derive( Debug, Clone, PartialEq )]
pub enum PlayerEvent {
    Playing,
    Paused,
    Buffering,
    Ended,
    TimeUpdate { current_time: Duration, duration: Option<Duration> },
    /// `skipping` is set once the error ceiling is passed and the failing
    /// clip is abandoned instead of retried.
    VideoError { slot: SlotId, error: String, skipping: bool },
}


/// Event names used for subscription.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize )]
pub enum EventKind {
    Playing,
    Paused,
    Buffering,
    Ended,
    TimeUpdate,
    VideoError,
}


impl PlayerEvent {
    pub fn kind( &self ) -> EventKind {
        match self {
            PlayerEvent::Playing => EventKind::Playing,
            PlayerEvent::Paused => EventKind::Paused,
            PlayerEvent::Buffering => EventKind::Buffering,
            PlayerEvent::Ended => EventKind::Ended,
            PlayerEvent::TimeUpdate { .. } => EventKind::TimeUpdate,
            PlayerEvent::VideoError { .. } => EventKind::VideoError,
        }
    }


    pub(crate) fn video_error( slot: SlotId, error: &impl std::fmt::Display, skipping: bool ) -> Self {
        PlayerEvent::VideoError { slot, error: error.to_string(), skipping }
    }
}


/// Handle returned by `subscribe`, used to unsubscribe.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash )]
pub struct SubscriptionId( u64 );


type Callback = Arc<dyn Fn( &PlayerEvent ) + Send + Sync>;


/// Publish/subscribe registry keyed by event kind.
#[derive( Default )]
pub struct EventBus {
    subscribers: RwLock<HashMap<EventKind, Vec<( SubscriptionId, Callback )>>>,
    next_id: AtomicU64,
}


impl std::fmt::Debug for EventBus {
    fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
        f.debug_struct( "EventBus" )
            .field( "subscribers", &self.len() )
            .finish()
    }
}


impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }


    /// Registers a callback for one event kind.
    pub fn subscribe<F>( &self, kind: EventKind, callback: F ) -> SubscriptionId
    where
        F: Fn( &PlayerEvent ) + Send + Sync + 'static,
    {
        let id = SubscriptionId( self.next_id.fetch_add( 1, Ordering::Relaxed ) );
        self.subscribers
            .write()
            .unwrap_or_else( |e| e.into_inner() )
            .entry( kind )
            .or_default()
            .push(( id, Arc::new( callback ) ));
        id
    }


    /// Removes a subscription. Returns false if it was not registered.
    pub fn unsubscribe( &self, id: SubscriptionId ) -> bool {
        let mut subscribers = self.subscribers.write().unwrap_or_else( |e| e.into_inner() );
        for callbacks in subscribers.values_mut() {
            if let Some( pos ) = callbacks.iter().position( |( sub, _ )| *sub == id ) {
                callbacks.remove( pos );
                return true;
            }
        }
        false
    }


    /// Delivers an event to every subscriber of its kind.
    ///
    /// Returns the number of subscribers that panicked.
    pub fn emit( &self, event: &PlayerEvent ) -> usize {
        let snapshot: Vec<Callback> = {
            let subscribers = self.subscribers.read().unwrap_or_else( |e| e.into_inner() );
            match subscribers.get( &event.kind() ) {
                Some( callbacks ) => callbacks.iter().map( |( _, cb )| Arc::clone( cb ) ).collect(),
                None => return 0,
            }
        };

        let mut failures = 0;
        for callback in snapshot {
            if panic::catch_unwind( AssertUnwindSafe( || callback( event ) ) ).is_err() {
                failures += 1;
                tracing::warn!( "Subscriber for {:?} panicked; continuing", event.kind() );
            }
        }
        failures
    }


    /// Drops every subscription.
    pub fn clear( &self ) {
        self.subscribers.write().unwrap_or_else( |e| e.into_inner() ).clear();
    }


    /// Total number of live subscriptions.
    pub fn len( &self ) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else( |e| e.into_inner() )
            .values()
            .map( Vec::len )
            .sum()
    }


    pub fn is_empty( &self ) -> bool {
        self.len() == 0
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;


    #[test]
    fn test_multiple_subscribers_per_kind() {
        let bus = EventBus::new();
        let count = Arc::new( AtomicUsize::new( 0 ) );

        for _ in 0..3 {
            let count = Arc::clone( &count );
            bus.subscribe( EventKind::Playing, move |_| {
                count.fetch_add( 1, Ordering::SeqCst );
            });
        }

        bus.emit( &PlayerEvent::Playing );
        assert_eq!( count.load( Ordering::SeqCst ), 3 );
    }


    #[test]
    fn test_only_matching_kind_receives() {
        let bus = EventBus::new();
        let seen = Arc::new( Mutex::new( Vec::new() ) );

        let seen_clone = Arc::clone( &seen );
        bus.subscribe( EventKind::TimeUpdate, move |e| {
            seen_clone.lock().unwrap().push( e.clone() );
        });

        bus.emit( &PlayerEvent::Paused );
        bus.emit( &PlayerEvent::TimeUpdate {
            current_time: Duration::from_secs( 2 ),
            duration: Some( Duration::from_secs( 8 ) ),
        });

        let seen = seen.lock().unwrap();
        assert_eq!( seen.len(), 1 );
        assert_eq!( seen[ 0 ].kind(), EventKind::TimeUpdate );
    }


    #[test]
    fn test_panicking_subscriber_isolated() {
        let bus = EventBus::new();
        let reached = Arc::new( AtomicUsize::new( 0 ) );

        let before = Arc::clone( &reached );
        bus.subscribe( EventKind::Ended, move |_| {
            before.fetch_add( 1, Ordering::SeqCst );
        });
        bus.subscribe( EventKind::Ended, |_| panic!( "subscriber failure" ) );
        let after = Arc::clone( &reached );
        bus.subscribe( EventKind::Ended, move |_| {
            after.fetch_add( 1, Ordering::SeqCst );
        });

        let failures = bus.emit( &PlayerEvent::Ended );
        assert_eq!( failures, 1 );
        assert_eq!( reached.load( Ordering::SeqCst ), 2 );

        // The bus stays usable afterwards.
        bus.emit( &PlayerEvent::Ended );
        assert_eq!( reached.load( Ordering::SeqCst ), 4 );
    }


    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let count = Arc::new( AtomicUsize::new( 0 ) );

        let count_clone = Arc::clone( &count );
        let id = bus.subscribe( EventKind::Buffering, move |_| {
            count_clone.fetch_add( 1, Ordering::SeqCst );
        });

        assert!( bus.unsubscribe( id ) );
        assert!( !bus.unsubscribe( id ) );
        bus.emit( &PlayerEvent::Buffering );
        assert_eq!( count.load( Ordering::SeqCst ), 0 );
        assert!( bus.is_empty() );
    }


    #[test]
    fn test_unsubscribe_from_inside_callback() {
        let bus = Arc::new( EventBus::new() );
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new( Mutex::new( None ) );

        let bus_clone = Arc::clone( &bus );
        let slot_clone = Arc::clone( &slot );
        let id = bus.subscribe( EventKind::Playing, move |_| {
            if let Some( id ) = slot_clone.lock().unwrap().take() {
                bus_clone.unsubscribe( id );
            }
        });
        *slot.lock().unwrap() = Some( id );

        bus.emit( &PlayerEvent::Playing );
        assert_eq!( bus.len(), 0 );
    }
}
