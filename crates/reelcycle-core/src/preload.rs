//! Windowed preload cache
//!
//! Maps a clip URL to a detached handle that is loading or loaded. The
//! cache never decides on its own what to keep: the scheduler hands it the
//! set of URLs in the live buffer window and everything else is released.

use std::collections::HashMap;
use std::sync::Arc;

use url::Url;

use crate::surface::MediaHandle;


#[derive( Debug )]
pub struct PreloadCache<H: MediaHandle> {
    entries: HashMap<Url, Arc<H>>,
}


impl<H: MediaHandle> Default for PreloadCache<H> {
    fn default() -> Self {
        Self { entries: HashMap::new() }
    }
}


impl<H: MediaHandle> PreloadCache<H> {
    pub fn new() -> Self {
        Self::default()
    }


    /// True if the URL is cached, ready or still loading.
    pub fn contains( &self, url: &Url ) -> bool {
        self.entries.contains_key( url )
    }


    /// True if the URL is cached and its handle has finished loading.
    pub fn is_ready( &self, url: &Url ) -> bool {
        self.entries.get( url ).is_some_and( |h| h.is_ready() )
    }


    pub fn insert( &mut self, url: Url, handle: Arc<H> ) {
        if let Some( previous ) = self.entries.insert( url, handle ) {
            previous.release();
        }
    }


    pub fn get( &self, url: &Url ) -> Option<&Arc<H>> {
        self.entries.get( url )
    }


    /// Removes and returns a handle only if it is ready to play.
    ///
    /// An in-flight entry stays where it is.
    pub fn take_ready( &mut self, url: &Url ) -> Option<Arc<H>> {
        if self.is_ready( url ) {
            self.entries.remove( url )
        } else {
            None
        }
    }


    /// Drops the entry for `url` if it still holds this exact handle.
    ///
    /// @returns true if the entry was removed and released
    pub fn discard( &mut self, url: &Url, handle: &Arc<H> ) -> bool {
        match self.entries.get( url ) {
            Some( current ) if Arc::ptr_eq( current, handle ) => {
                if let Some( removed ) = self.entries.remove( url ) {
                    removed.release();
                }
                true
            }
            _ => false,
        }
    }


    /// Releases every entry whose URL is not in `window`.
    ///
    /// @returns The evicted URLs
    pub fn retain_window( &mut self, window: &[Url] ) -> Vec<Url> {
        let evicted: Vec<Url> = self.entries
            .keys()
            .filter( |url| !window.contains( url ) )
            .cloned()
            .collect();

        for url in &evicted {
            if let Some( handle ) = self.entries.remove( url ) {
                handle.release();
            }
        }

        evicted
    }


    /// Releases every entry.
    pub fn clear( &mut self ) {
        for ( _, handle ) in self.entries.drain() {
            handle.release();
        }
    }


    pub fn len( &self ) -> usize {
        self.entries.len()
    }


    pub fn is_empty( &self ) -> bool {
        self.entries.is_empty()
    }


    pub fn urls( &self ) -> Vec<Url> {
        self.entries.keys().cloned().collect()
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::future::Future;
    use std::sync::atomic::{ AtomicBool, Ordering };

    use crate::surface::MediaError;


    struct StubHandle {
        url: Url,
        ready: bool,
        released: AtomicBool,
    }


    impl StubHandle {
        fn new( url: &str, ready: bool ) -> Arc<Self> {
            Arc::new( Self {
                url: Url::parse( url ).unwrap(),
                ready,
                released: AtomicBool::new( false ),
            })
        }
    }


    impl MediaHandle for StubHandle {
        fn url( &self ) -> &Url {
            &self.url
        }


        fn wait_ready( &self ) -> impl Future<Output = Result<(), MediaError>> + Send {
            std::future::ready( Ok(()) )
        }


        fn is_ready( &self ) -> bool {
            self.ready
        }


        fn release( &self ) {
            self.released.store( true, Ordering::SeqCst );
        }
    }


    #[test]
    fn test_retain_window_releases_outside() {
        let mut cache = PreloadCache::new();
        let a = StubHandle::new( "https://cdn.example.com/a.mp4", true );
        let b = StubHandle::new( "https://cdn.example.com/b.mp4", true );
        cache.insert( a.url.clone(), Arc::clone( &a ) );
        cache.insert( b.url.clone(), Arc::clone( &b ) );

        let evicted = cache.retain_window( &[ b.url.clone() ] );

        assert_eq!( evicted, vec![ a.url.clone() ] );
        assert!( a.released.load( Ordering::SeqCst ) );
        assert!( !b.released.load( Ordering::SeqCst ) );
        assert_eq!( cache.len(), 1 );
    }


    #[test]
    fn test_take_ready_skips_in_flight() {
        let mut cache = PreloadCache::new();
        let loading = StubHandle::new( "https://cdn.example.com/slow.mp4", false );
        cache.insert( loading.url.clone(), Arc::clone( &loading ) );

        assert!( cache.take_ready( &loading.url ).is_none() );
        assert!( cache.contains( &loading.url ) );
    }


    #[test]
    fn test_discard_ignores_replaced_handle() {
        let mut cache = PreloadCache::new();
        let first = StubHandle::new( "https://cdn.example.com/a.mp4", false );
        let second = StubHandle::new( "https://cdn.example.com/a.mp4", true );
        cache.insert( first.url.clone(), Arc::clone( &first ) );
        cache.insert( second.url.clone(), Arc::clone( &second ) );

        assert!( first.released.load( Ordering::SeqCst ) );
        assert!( !cache.discard( &first.url, &first ) );
        assert!( cache.is_ready( &second.url ) );
    }


    #[test]
    fn test_clear_releases_all() {
        let mut cache = PreloadCache::new();
        let a = StubHandle::new( "https://cdn.example.com/a.mp4", true );
        cache.insert( a.url.clone(), Arc::clone( &a ) );
        cache.clear();
        assert!( cache.is_empty() );
        assert!( a.released.load( Ordering::SeqCst ) );
    }
}
