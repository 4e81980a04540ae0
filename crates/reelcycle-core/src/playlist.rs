//! Shuffled clip playlist
//!
//! Holds the validated source URLs in the order they will be played and
//! answers the wrapping index arithmetic the scheduler needs.

use rand::seq::SliceRandom;
use url::Url;

use crate::config::ConfigError;


/// Ordered clip sources, fixed after the initial shuffle.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct Playlist {
    urls: Vec<Url>,
}


impl Playlist {
    /// Validates the sources and shuffles them once.
    ///
    /// @param urls - Source URLs, in any order
    ///
    /// @returns The shuffled playlist, or a configuration error if the list
    /// is empty or any entry does not parse as a URL
    pub fn new<I, S>( urls: I ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut playlist = Self::in_order( urls )?;
        playlist.urls.shuffle( &mut rand::thread_rng() );
        Ok( playlist )
    }


    /// Validates the sources and keeps their order.
    pub fn in_order<I, S>( urls: I ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let urls = urls
            .into_iter()
            .map( |raw| {
                let raw = raw.as_ref().trim();
                Url::parse( raw ).map_err( |source| ConfigError::InvalidUrl {
                    url: raw.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if urls.is_empty() {
            return Err( ConfigError::EmptyPlaylist );
        }

        Ok( Self { urls } )
    }


    /// Gets the number of clips.
    pub fn len( &self ) -> usize {
        self.urls.len()
    }


    /// Always false for a constructed playlist.
    pub fn is_empty( &self ) -> bool {
        self.urls.is_empty()
    }


    pub fn urls( &self ) -> &[Url] {
        &self.urls
    }


    /// Gets the clip at an index, if in range.
    pub fn get( &self, index: usize ) -> Option<&Url> {
        self.urls.get( index )
    }


    /// Maps any integer onto a valid index (mathematical modulo).
    pub fn normalize( &self, index: i64 ) -> usize {
        index.rem_euclid( self.urls.len() as i64 ) as usize
    }


    /// Index after `index`, wrapping to the start.
    pub fn next_index( &self, index: usize ) -> usize {
        ( index + 1 ) % self.urls.len()
    }


    /// Index before `index`, wrapping to the end.
    pub fn previous_index( &self, index: usize ) -> usize {
        ( index + self.urls.len() - 1 ) % self.urls.len()
    }


    /// Forward distance from `from` to `to`, wrapping.
    pub fn forward_distance( &self, from: usize, to: usize ) -> usize {
        ( to + self.urls.len() - from % self.urls.len() ) % self.urls.len()
    }


    /// Indices of the `size` clips following `from`, nearest first.
    ///
    /// Never wraps back onto `from` itself, so the window is at most
    /// `len - 1` entries long.
    pub fn window( &self, from: usize, size: usize ) -> Vec<usize> {
        let span = size.min( self.urls.len().saturating_sub( 1 ) );
        ( 1..=span )
            .map( |offset| ( from + offset ) % self.urls.len() )
            .collect()
    }


    /// Picks a uniformly random index.
    pub fn random_index( &self ) -> usize {
        use rand::Rng;

        rand::thread_rng().gen_range( 0..self.urls.len() )
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::collections::HashSet;


    fn sources( n: usize ) -> Vec<String> {
        ( 0..n ).map( |i| format!( "https://cdn.example.com/clip{}.mp4", i ) ).collect()
    }


    #[test]
    fn test_shuffle_is_permutation() {
        let input = sources( 40 );
        let playlist = Playlist::new( &input ).unwrap();

        assert_eq!( playlist.len(), input.len() );
        let shuffled: HashSet<String> = playlist.urls().iter().map( |u| u.to_string() ).collect();
        let original: HashSet<String> = input.into_iter().collect();
        assert_eq!( shuffled, original );
    }


    #[test]
    fn test_empty_rejected() {
        let result = Playlist::new( Vec::<String>::new() );
        assert!( matches!( result, Err( ConfigError::EmptyPlaylist ) ) );
    }


    #[test]
    fn test_invalid_url_rejected() {
        let result = Playlist::new( [ "https://cdn.example.com/a.mp4", "not a url" ] );
        match result {
            Err( ConfigError::InvalidUrl { url, .. } ) => assert_eq!( url, "not a url" ),
            other => panic!( "expected InvalidUrl, got {:?}", other ),
        }
    }


    #[test]
    fn test_normalize_negative_and_large() {
        let playlist = Playlist::in_order( sources( 3 ) ).unwrap();
        assert_eq!( playlist.normalize( -1 ), 2 );
        assert_eq!( playlist.normalize( -4 ), 2 );
        assert_eq!( playlist.normalize( 3 ), 0 );
        assert_eq!( playlist.normalize( 7 ), 1 );
    }


    #[test]
    fn test_next_previous_wrap() {
        let playlist = Playlist::in_order( sources( 3 ) ).unwrap();
        assert_eq!( playlist.next_index( 2 ), 0 );
        assert_eq!( playlist.previous_index( 0 ), 2 );
    }


    #[test]
    fn test_forward_distance_wraps() {
        let playlist = Playlist::in_order( sources( 5 ) ).unwrap();
        assert_eq!( playlist.forward_distance( 3, 4 ), 1 );
        assert_eq!( playlist.forward_distance( 3, 0 ), 2 );
        assert_eq!( playlist.forward_distance( 3, 3 ), 0 );
        assert_eq!( playlist.forward_distance( 3, 2 ), 4 );
    }


    #[test]
    fn test_window_stops_before_cursor() {
        let playlist = Playlist::in_order( sources( 3 ) ).unwrap();
        assert_eq!( playlist.window( 1, 1 ), vec![ 2 ] );
        assert_eq!( playlist.window( 2, 5 ), vec![ 0, 1 ] );
        assert!( playlist.window( 0, 0 ).is_empty() );
    }


    #[test]
    fn test_single_clip_window_empty() {
        let playlist = Playlist::in_order( sources( 1 ) ).unwrap();
        assert!( playlist.window( 0, 3 ).is_empty() );
        assert_eq!( playlist.next_index( 0 ), 0 );
    }
}
