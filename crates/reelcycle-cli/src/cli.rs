//! Command-line argument parsing for Reelcycle.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ Parser, ValueEnum };

use reelcycle_core::sim::SimProfile;
use reelcycle_core::DeviceClass;

use crate::settings::ConfigOverrides;


/// Reelcycle - A headless crossfading clip player.
#[derive( Parser, Debug )]
#[command( name = "reelcycle" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// JSON playlist table with `desktop` and `mobile` lists.
    #[arg( long )]
    pub playlist: PathBuf,

    /// Device class selecting the playlist and defaults.
    #[arg( long, value_enum, default_value_t = DeviceArg::Desktop )]
    pub device: DeviceArg,

    /// Number of upcoming clips kept preloaded.
    #[arg( long )]
    pub buffer: Option<usize>,

    #[arg( long )]
    pub crossfade_ms: Option<u64>,

    #[arg( long )]
    pub load_timeout_ms: Option<u64>,

    #[arg( long )]
    pub retry_delay_ms: Option<u64>,

    /// Retries of a rejected play request.
    #[arg( long )]
    pub max_retries: Option<u32>,

    /// Stay on a clip once it ends instead of advancing.
    #[arg( long )]
    pub no_auto_advance: bool,

    /// Length of every simulated clip, in seconds.
    #[arg( long, default_value_t = 8 )]
    pub clip_secs: u64,

    /// Simulated load latency, in milliseconds.
    #[arg( long, default_value_t = 200 )]
    pub latency_ms: u64,

    /// URLs containing this text fail to load. Repeatable.
    #[arg( long, value_name = "SUBSTRING" )]
    pub fail: Vec<String>,

    /// Log at debug level.
    #[arg( short, long )]
    pub verbose: bool,
}


/// Device class as spelled on the command line.
#[derive( Debug, Clone, Copy, PartialEq, Eq, ValueEnum )]
pub enum DeviceArg {
    Desktop,
    Mobile,
}


impl From<DeviceArg> for DeviceClass {
    fn from( arg: DeviceArg ) -> Self {
        match arg {
            DeviceArg::Desktop => DeviceClass::Desktop,
            DeviceArg::Mobile => DeviceClass::Mobile,
        }
    }
}


impl Args {
    /// Scheduler options given as flags; they win over the settings file.
    pub fn overrides( &self ) -> ConfigOverrides {
        ConfigOverrides {
            preload_buffer_size: self.buffer,
            max_retries: self.max_retries,
            retry_delay_ms: self.retry_delay_ms,
            load_timeout_ms: self.load_timeout_ms,
            crossfade_ms: self.crossfade_ms,
            setup_timeout_ms: None,
            auto_advance: self.no_auto_advance.then_some( false ),
        }
    }


    pub fn profile( &self ) -> SimProfile {
        SimProfile {
            latency: Duration::from_millis( self.latency_ms ),
            clip_length: Duration::from_secs( self.clip_secs ),
            ..SimProfile::default()
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_minimal() {
        let args = Args::try_parse_from([ "reelcycle", "--playlist", "clips.json" ]).unwrap();
        assert_eq!( args.playlist, PathBuf::from( "clips.json" ) );
        assert_eq!( args.device, DeviceArg::Desktop );
        assert_eq!( args.overrides(), ConfigOverrides::default() );
        assert_eq!( args.profile().clip_length, Duration::from_secs( 8 ) );
    }


    #[test]
    fn test_parse_overrides() {
        let args = Args::try_parse_from([
            "reelcycle", "--playlist", "clips.json",
            "--device", "mobile",
            "--buffer", "2",
            "--crossfade-ms", "800",
            "--no-auto-advance",
            "--fail", "broken",
            "--fail", "404",
        ]).unwrap();

        assert_eq!( DeviceClass::from( args.device ), DeviceClass::Mobile );
        let overrides = args.overrides();
        assert_eq!( overrides.preload_buffer_size, Some( 2 ) );
        assert_eq!( overrides.crossfade_ms, Some( 800 ) );
        assert_eq!( overrides.auto_advance, Some( false ) );
        assert_eq!( args.fail, vec![ "broken".to_string(), "404".to_string() ] );
    }


    #[test]
    fn test_playlist_required() {
        assert!( Args::try_parse_from([ "reelcycle" ]).is_err() );
    }
}
