//! Scheduler options and device-keyed playlist tables
//!
//! Durations are written in milliseconds in files and held as `Duration`
//! in memory.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{ Deserialize, Deserializer, Serialize, Serializer };
use thiserror::Error;


/// Errors raised while building or validating configuration.
#[derive( Debug, Error )]
pub enum ConfigError {
    #[error( "Playlist is empty" )]
    EmptyPlaylist,

    #[error( "Invalid URL '{url}': {source}" )]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error( "Invalid option: {0}" )]
    InvalidOption( String ),

    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Invalid playlist table: {0}" )]
    Parse( #[from] serde_json::Error ),
}


/// Device class, chosen once at startup.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize )]
#[serde( rename_all = "lowercase" )]
pub enum DeviceClass {
    #[default]
    Desktop,
    Mobile,
}


/// Options recognized by the scheduler.
#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
#[serde( default, rename_all = "camelCase" )]
pub struct SchedulerConfig {
    /// Number of upcoming clips kept preloaded.
    pub preload_buffer_size: usize,

    /// Attempts at a rejected `play()` before the transition fails.
    pub max_retries: u32,

    #[serde( with = "millis" )]
    pub retry_delay: Duration,

    #[serde( with = "millis" )]
    pub load_timeout: Duration,

    #[serde( with = "millis" )]
    pub crossfade_duration: Duration,

    /// Bound on rebinding a slot to an already preloaded handle.
    #[serde( with = "millis" )]
    pub setup_timeout: Duration,

    /// Start the next clip when the active one ends.
    pub auto_advance: bool,
}


impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::for_device( DeviceClass::Desktop )
    }
}


impl SchedulerConfig {
    /// Returns the defaults for a device class.
    pub fn for_device( device: DeviceClass ) -> Self {
        let ( preload_buffer_size, crossfade_ms ) = match device {
            DeviceClass::Desktop => ( 3, 1500 ),
            DeviceClass::Mobile => ( 1, 1000 ),
        };

        Self {
            preload_buffer_size,
            max_retries: 3,
            retry_delay: Duration::from_millis( 1000 ),
            load_timeout: Duration::from_millis( 30_000 ),
            crossfade_duration: Duration::from_millis( crossfade_ms ),
            setup_timeout: Duration::from_millis( 5000 ),
            auto_advance: true,
        }
    }


    /// Checks option ranges that the type system cannot express.
    pub fn validate( &self ) -> Result<(), ConfigError> {
        if self.crossfade_duration.is_zero() {
            return Err( ConfigError::InvalidOption( "crossfadeDuration must be greater than zero".into() ) );
        }
        if self.load_timeout.is_zero() {
            return Err( ConfigError::InvalidOption( "loadTimeout must be greater than zero".into() ) );
        }
        if self.setup_timeout.is_zero() {
            return Err( ConfigError::InvalidOption( "setupTimeout must be greater than zero".into() ) );
        }
        Ok(())
    }
}


/// One playlist per device class.
#[derive( Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize )]
#[serde( default )]
pub struct PlaylistTable {
    pub desktop: Vec<String>,
    pub mobile: Vec<String>,
}


impl PlaylistTable {
    /// Reads a table from a JSON file.
    pub fn load( path: &Path ) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string( path )?;
        Self::from_json( &contents )
    }


    pub fn from_json( json: &str ) -> Result<Self, ConfigError> {
        Ok( serde_json::from_str( json )? )
    }


    /// Returns the list for a device class.
    pub fn select( &self, device: DeviceClass ) -> &[String] {
        match device {
            DeviceClass::Desktop => &self.desktop,
            DeviceClass::Mobile => &self.mobile,
        }
    }
}


mod millis {
    use super::*;


    pub fn serialize<S: Serializer>( value: &Duration, serializer: S ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64( value.as_millis() as u64 )
    }


    pub fn deserialize<'de, D: Deserializer<'de>>( deserializer: D ) -> Result<Duration, D::Error> {
        u64::deserialize( deserializer ).map( Duration::from_millis )
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::io::Write;


    #[test]
    fn test_device_defaults() {
        let desktop = SchedulerConfig::for_device( DeviceClass::Desktop );
        assert_eq!( desktop.preload_buffer_size, 3 );
        assert_eq!( desktop.crossfade_duration, Duration::from_millis( 1500 ) );
        assert_eq!( desktop.load_timeout, Duration::from_secs( 30 ) );
        assert_eq!( desktop.retry_delay, Duration::from_secs( 1 ) );
        assert_eq!( desktop.max_retries, 3 );

        let mobile = SchedulerConfig::for_device( DeviceClass::Mobile );
        assert_eq!( mobile.preload_buffer_size, 1 );
        assert!( mobile.crossfade_duration < desktop.crossfade_duration );
    }


    #[test]
    fn test_partial_options_keep_defaults() {
        let config: SchedulerConfig = serde_json::from_str(
            r#"{ "preloadBufferSize": 5, "crossfadeDuration": 800 }"#
        ).unwrap();
        assert_eq!( config.preload_buffer_size, 5 );
        assert_eq!( config.crossfade_duration, Duration::from_millis( 800 ) );
        assert_eq!( config.load_timeout, Duration::from_secs( 30 ) );
    }


    #[test]
    fn test_validate_rejects_zero_crossfade() {
        let config = SchedulerConfig {
            crossfade_duration: Duration::ZERO,
            ..SchedulerConfig::default()
        };
        assert!( matches!( config.validate(), Err( ConfigError::InvalidOption( _ ) ) ) );
    }


    #[test]
    fn test_playlist_table_select() {
        let table = PlaylistTable::from_json(
            r#"{ "desktop": ["https://a.example/1.mp4"], "mobile": ["https://a.example/m.mp4", "https://a.example/n.mp4"] }"#
        ).unwrap();
        assert_eq!( table.select( DeviceClass::Desktop ).len(), 1 );
        assert_eq!( table.select( DeviceClass::Mobile ).len(), 2 );
    }


    #[test]
    fn test_playlist_table_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!( file, r#"{{ "desktop": ["https://cdn.example/a.mp4"] }}"# ).unwrap();

        let table = PlaylistTable::load( file.path() ).unwrap();
        assert_eq!( table.desktop, vec![ "https://cdn.example/a.mp4".to_string() ] );
        assert!( table.mobile.is_empty() );
    }


    #[test]
    fn test_playlist_table_malformed() {
        let result = PlaylistTable::from_json( "{ not json" );
        assert!( matches!( result, Err( ConfigError::Parse( _ ) ) ) );
    }
}
