//! Application settings management
//!
//! Per-device scheduler option overrides, read from
//! `<config dir>/reelcycle/settings.json`. Anything missing falls back to
//! the device defaults.

use std::fs;
use std::path::{ Path, PathBuf };
use std::time::Duration;

use serde::{ Deserialize, Serialize };

use reelcycle_core::{ DeviceClass, SchedulerConfig };


/// Optional replacements for individual scheduler options.
#[derive( Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize )]
#[serde( default, rename_all = "camelCase" )]
pub struct ConfigOverrides {
    pub preload_buffer_size: Option<usize>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub load_timeout_ms: Option<u64>,
    pub crossfade_ms: Option<u64>,
    pub setup_timeout_ms: Option<u64>,
    pub auto_advance: Option<bool>,
}


impl ConfigOverrides {
    /// Writes every present option into `config`.
    pub fn apply( &self, config: &mut SchedulerConfig ) {
        if let Some( size ) = self.preload_buffer_size {
            config.preload_buffer_size = size;
        }
        if let Some( retries ) = self.max_retries {
            config.max_retries = retries;
        }
        if let Some( ms ) = self.retry_delay_ms {
            config.retry_delay = Duration::from_millis( ms );
        }
        if let Some( ms ) = self.load_timeout_ms {
            config.load_timeout = Duration::from_millis( ms );
        }
        if let Some( ms ) = self.crossfade_ms {
            config.crossfade_duration = Duration::from_millis( ms );
        }
        if let Some( ms ) = self.setup_timeout_ms {
            config.setup_timeout = Duration::from_millis( ms );
        }
        if let Some( enabled ) = self.auto_advance {
            config.auto_advance = enabled;
        }
    }
}


/// Application settings.
#[derive( Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize )]
#[serde( default )]
pub struct Settings {
    pub desktop: ConfigOverrides,
    pub mobile: ConfigOverrides,
}


impl Settings {
    /// Returns the path to the settings file.
    fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "reelcycle" ).join( "settings.json" ) )
    }


    /// Loads settings from disk, or returns defaults if not found.
    pub fn load() -> Self {
        match Self::settings_path() {
            Some( path ) => Self::load_from( &path ),
            None => Self::default(),
        }
    }


    /// Loads settings from `path`. Unreadable or malformed files fall back to defaults.
    pub fn load_from( path: &Path ) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string( path ) {
            Ok( contents ) => match serde_json::from_str( &contents ) {
                Ok( settings ) => {
                    tracing::debug!( "Loaded settings from {}", path.display() );
                    settings
                }
                Err( e ) => {
                    tracing::warn!( "Ignoring malformed settings {}: {}", path.display(), e );
                    Self::default()
                }
            },
            Err( e ) => {
                tracing::warn!( "Failed to read settings: {}", e );
                Self::default()
            }
        }
    }


    pub fn overrides( &self, device: DeviceClass ) -> &ConfigOverrides {
        match device {
            DeviceClass::Desktop => &self.desktop,
            DeviceClass::Mobile => &self.mobile,
        }
    }


    /// Device defaults, then this file's overrides, then `flags`.
    pub fn resolve( &self, device: DeviceClass, flags: &ConfigOverrides ) -> SchedulerConfig {
        let mut config = SchedulerConfig::for_device( device );
        self.overrides( device ).apply( &mut config );
        flags.apply( &mut config );
        config
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;


    #[test]
    fn test_missing_file_gives_defaults() {
        let settings = Settings::load_from( Path::new( "/nonexistent/reelcycle/settings.json" ) );
        assert_eq!( settings, Settings::default() );
    }


    #[test]
    fn test_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!( file, r#"{{ "mobile": {{ "preloadBufferSize": 2, "crossfadeMs": 700 }} }}"# ).unwrap();

        let settings = Settings::load_from( file.path() );
        let config = settings.resolve( DeviceClass::Mobile, &ConfigOverrides::default() );
        assert_eq!( config.preload_buffer_size, 2 );
        assert_eq!( config.crossfade_duration, Duration::from_millis( 700 ) );
        assert_eq!( config.max_retries, 3 );

        let desktop = settings.resolve( DeviceClass::Desktop, &ConfigOverrides::default() );
        assert_eq!( desktop, SchedulerConfig::for_device( DeviceClass::Desktop ) );
    }


    #[test]
    fn test_malformed_file_gives_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!( file, "{{ not json" ).unwrap();
        assert_eq!( Settings::load_from( file.path() ), Settings::default() );
    }


    #[test]
    fn test_flags_win_over_file() {
        let settings = Settings {
            desktop: ConfigOverrides { preload_buffer_size: Some( 5 ), ..ConfigOverrides::default() },
            mobile: ConfigOverrides::default(),
        };
        let flags = ConfigOverrides { preload_buffer_size: Some( 1 ), auto_advance: Some( false ), ..ConfigOverrides::default() };

        let config = settings.resolve( DeviceClass::Desktop, &flags );
        assert_eq!( config.preload_buffer_size, 1 );
        assert!( !config.auto_advance );
        assert_eq!( config.crossfade_duration, Duration::from_millis( 1500 ) );
    }
}
