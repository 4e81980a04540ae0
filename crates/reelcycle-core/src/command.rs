//! Playback command parsing.
//!
//! Commands are typed at the driver's `:` prompt and dispatched with
//! `Scheduler::execute`.

use thiserror::Error;


/// Errors that can occur during command parsing.
#[derive( Debug, Error, PartialEq, Eq )]
pub enum CommandError {
    #[error( "Unknown command: {0}" )]
    Unknown( String ),

    #[error( "Invalid argument: {0}" )]
    InvalidArgument( String ),

    #[error( "Missing argument: {0}" )]
    MissingArgument( String ),
}


/// Parsed playback command.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum Command {
    /// Play a clip by playlist position; any integer, wrapped onto the playlist.
    Play { index: i64 },
    Next,
    Prev,
    Random,
    Info,
    Quit,
}


impl Command {
    /// Parses a command string (without the leading `:`).
    ///
    /// @param input - The command string to parse
    ///
    /// @returns The parsed command or an error
    pub fn parse( input: &str ) -> Result<Self, CommandError> {
        let input = input.trim();
        let mut parts = input.splitn( 2, ' ' );
        let cmd = parts.next().unwrap_or( "" ).to_lowercase();
        let args = parts.next().map( |s| s.trim() ).filter( |s| !s.is_empty() );

        match cmd.as_str() {
            "play" | "go" | "g" => {
                let index = args
                    .ok_or_else( || CommandError::MissingArgument( "clip index".into() ) )?;
                let index = index.parse()
                    .map_err( |_| CommandError::InvalidArgument( format!( "Invalid clip index: {}", index ) ) )?;
                Ok( Command::Play { index } )
            }
            "next" | "n" => Ok( Command::Next ),
            "prev" | "previous" | "p" => Ok( Command::Prev ),
            "random" | "rand" | "r" => Ok( Command::Random ),
            "info" | "i" => Ok( Command::Info ),
            "quit" | "q" | "exit" => Ok( Command::Quit ),

            "" => Err( CommandError::Unknown( "empty command".into() ) ),
            other => Err( CommandError::Unknown( other.to_string() ) ),
        }
    }


    /// Returns a brief description of the command for help text.
    pub fn description( &self ) -> &'static str {
        match self {
            Command::Play { .. } => "Play clip by index",
            Command::Next => "Next clip",
            Command::Prev => "Previous clip",
            Command::Random => "Random clip",
            Command::Info => "Show current clip info",
            Command::Quit => "Quit",
        }
    }
}


/// Returns help text listing keys and commands.
pub fn help_text() -> &'static str {
    r#"Keys:
  Right / n       Next clip
  Left / p        Previous clip
  r               Random clip
  0-9             Play clip by index
  i               Show current clip info
  :               Enter a command
  q / Esc         Quit

Commands:
  :play <index>   Play clip by index (wraps)
  :next           Next clip
  :prev           Previous clip
  :random         Random clip
  :info           Show current clip info
  :quit           Quit"#
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_play() {
        let cmd = Command::parse( "play 3" ).unwrap();
        assert_eq!( cmd, Command::Play { index: 3 } );
    }


    #[test]
    fn test_parse_play_negative() {
        let cmd = Command::parse( "g -1" ).unwrap();
        assert_eq!( cmd, Command::Play { index: -1 } );
    }


    #[test]
    fn test_parse_aliases() {
        assert_eq!( Command::parse( "n" ).unwrap(), Command::Next );
        assert_eq!( Command::parse( "previous" ).unwrap(), Command::Prev );
        assert_eq!( Command::parse( "RAND" ).unwrap(), Command::Random );
        assert_eq!( Command::parse( "  info  " ).unwrap(), Command::Info );
        assert_eq!( Command::parse( "exit" ).unwrap(), Command::Quit );
    }


    #[test]
    fn test_parse_unknown() {
        let result = Command::parse( "rewind" );
        assert!( matches!( result, Err( CommandError::Unknown( _ ) ) ) );
    }


    #[test]
    fn test_parse_missing_arg() {
        let result = Command::parse( "play" );
        assert!( matches!( result, Err( CommandError::MissingArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_invalid_index() {
        let result = Command::parse( "play two" );
        assert!( matches!( result, Err( CommandError::InvalidArgument( _ ) ) ) );
    }
}
