//! Display surface contract
//!
//! The scheduler never touches a real video element. It talks to two
//! `Surface`s (the slots) and to detached `MediaHandle`s created by a
//! `MediaBackend`, and only through the operations declared here.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use url::Url;


/// Errors reported by a surface or a preload handle.
#[derive( Debug, Clone, PartialEq, Eq, Error )]
pub enum MediaError {
    #[error( "Network error: {0}" )]
    Network( String ),

    #[error( "Decode error: {0}" )]
    Decode( String ),

    #[error( "Source not supported: {0}" )]
    NotSupported( String ),

    #[error( "Playback rejected: {0}" )]
    PlayRejected( String ),

    #[error( "Load aborted" )]
    Aborted,
}


/// How eagerly a surface or handle should fetch its source.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default, Serialize )]
#[serde( rename_all = "lowercase" )]
pub enum PreloadHint {
    None,
    #[default]
    Metadata,
    Auto,
}


/// Static configuration applied to a surface once.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub struct SurfaceOptions {
    pub muted: bool,
    pub inline: bool,
    pub preload: PreloadHint,
}


impl SurfaceOptions {
    /// Options used for both playback slots.
    pub const SLOT: SurfaceOptions = SurfaceOptions {
        muted: true,
        inline: true,
        preload: PreloadHint::Metadata,
    };

    /// Options for detached preload handles: muted and fetching the whole clip.
    pub const PRELOAD: SurfaceOptions = SurfaceOptions {
        muted: true,
        inline: true,
        preload: PreloadHint::Auto,
    };
}


/// A buffered time range, in media time.
#[derive( Debug, Clone, Copy, PartialEq, Serialize )]
pub struct TimeRange {
    pub start: Duration,
    pub end: Duration,
}


/// Signals delivered by a surface while it holds a source.
#[derive( Debug, Clone, PartialEq )]
pub enum SurfaceSignal {
    Playing,
    Paused,
    Waiting,
    Ended,
    TimeUpdate { current_time: Duration, duration: Option<Duration> },
    Error( MediaError ),
}


/// Identity of one of the two physical slots.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize )]
pub enum SlotId {
    A,
    B,
}


impl SlotId {
    pub(crate) fn index( self ) -> usize {
        match self {
            SlotId::A => 0,
            SlotId::B => 1,
        }
    }


    pub(crate) fn other( self ) -> SlotId {
        match self {
            SlotId::A => SlotId::B,
            SlotId::B => SlotId::A,
        }
    }
}


impl fmt::Display for SlotId {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        match self {
            SlotId::A => write!( f, "A" ),
            SlotId::B => write!( f, "B" ),
        }
    }
}


/// A detached, preloading media element.
pub trait MediaHandle: Send + Sync + 'static {
    /// Source this handle was created for.
    fn url( &self ) -> &Url;

    /// Resolves once enough data is buffered to play through.
    fn wait_ready( &self ) -> impl Future<Output = Result<(), MediaError>> + Send;

    /// True once `wait_ready` has resolved successfully.
    fn is_ready( &self ) -> bool;

    /// Drops the source and frees whatever backs the handle.
    fn release( &self );
}


/// One of the two playback surfaces.
///
/// Methods take `&self`: a surface is a shared handle onto something the
/// host owns, and implementations use interior mutability.
pub trait Surface: Send + Sync + 'static {
    type Handle: MediaHandle;

    fn configure( &self, options: SurfaceOptions );

    fn set_source( &self, url: &Url );

    fn source( &self ) -> Option<Url>;

    /// Rebinds the surface to the source held by a preloaded handle.
    fn adopt( &self, handle: &Self::Handle );

    /// Starts loading the current source.
    ///
    /// Resolves on the "can play" signal, or with the first media error.
    fn load( &self ) -> impl Future<Output = Result<(), MediaError>> + Send;

    fn play( &self ) -> impl Future<Output = Result<(), MediaError>> + Send;

    fn pause( &self );

    fn set_opacity( &self, opacity: f32 );

    fn set_visible( &self, visible: bool );

    fn current_time( &self ) -> Duration;

    fn duration( &self ) -> Option<Duration>;

    fn buffered( &self ) -> Vec<TimeRange>;

    fn is_playing( &self ) -> bool;

    /// Subscribes to this surface's signals.
    fn signals( &self ) -> broadcast::Receiver<SurfaceSignal>;
}


/// Factory tying a surface type to its detached handle type.
pub trait MediaBackend: Send + Sync + 'static {
    type Handle: MediaHandle;
    type Surface: Surface<Handle = Self::Handle>;

    /// Creates a detached handle that starts fetching immediately.
    fn create_handle( &self, url: &Url, options: SurfaceOptions ) -> Self::Handle;
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_slot_other() {
        assert_eq!( SlotId::A.other(), SlotId::B );
        assert_eq!( SlotId::B.other(), SlotId::A );
        assert_eq!( SlotId::B.index(), 1 );
    }


    #[test]
    fn test_slot_options() {
        assert!( SurfaceOptions::SLOT.muted );
        assert!( SurfaceOptions::SLOT.inline );
        assert_eq!( SurfaceOptions::SLOT.preload, PreloadHint::Metadata );
        assert!( SurfaceOptions::PRELOAD.muted );
        assert_eq!( SurfaceOptions::PRELOAD.preload, PreloadHint::Auto );
    }
}
