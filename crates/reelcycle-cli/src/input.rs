//! Keyboard input handling.
//!
//! Maps keys to playback commands in normal mode and collects text for
//! the `:` command prompt.

use crossterm::event::{ KeyCode, KeyModifiers };

use reelcycle_core::Command;


/// Current input mode of the application.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum InputMode {
    /// Normal mode - keyboard shortcuts active.
    #[default]
    Normal,

    /// Command mode - typing a `:` command.
    Command,
}


/// What a key press in normal mode asks for.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum KeyAction {
    Run( Command ),
    OpenPrompt,
}


/// Maps a normal-mode key to its action.
pub fn normal_key( code: KeyCode, modifiers: KeyModifiers ) -> Option<KeyAction> {
    let action = match code {
        KeyCode::Char( 'c' ) if modifiers.contains( KeyModifiers::CONTROL ) => KeyAction::Run( Command::Quit ),
        KeyCode::Right | KeyCode::Char( 'n' ) => KeyAction::Run( Command::Next ),
        KeyCode::Left | KeyCode::Char( 'p' ) => KeyAction::Run( Command::Prev ),
        KeyCode::Char( 'r' ) => KeyAction::Run( Command::Random ),
        KeyCode::Char( 'i' ) => KeyAction::Run( Command::Info ),
        KeyCode::Char( 'q' ) | KeyCode::Esc => KeyAction::Run( Command::Quit ),
        KeyCode::Char( ':' ) => KeyAction::OpenPrompt,
        KeyCode::Char( c ) if c.is_ascii_digit() => {
            let index = c.to_digit( 10 )? as i64;
            KeyAction::Run( Command::Play { index } )
        }
        _ => return None,
    };
    Some( action )
}


/// Input buffer for command text entry.
#[derive( Debug, Default )]
pub struct InputBuffer {
    content: String,
}


impl InputBuffer {
    pub fn new() -> Self {
        Self::default()
    }


    pub fn insert( &mut self, c: char ) {
        self.content.push( c );
    }


    /// Deletes the last character.
    ///
    /// @returns true if there was one to delete
    pub fn backspace( &mut self ) -> bool {
        self.content.pop().is_some()
    }


    /// Takes the content, leaving the buffer empty.
    pub fn take( &mut self ) -> String {
        std::mem::take( &mut self.content )
    }


    pub fn clear( &mut self ) {
        self.content.clear();
    }


    pub fn content( &self ) -> &str {
        &self.content
    }


    pub fn is_empty( &self ) -> bool {
        self.content.is_empty()
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn key( code: KeyCode ) -> Option<KeyAction> {
        normal_key( code, KeyModifiers::NONE )
    }


    #[test]
    fn test_navigation_keys() {
        assert_eq!( key( KeyCode::Right ), Some( KeyAction::Run( Command::Next ) ) );
        assert_eq!( key( KeyCode::Char( 'n' ) ), Some( KeyAction::Run( Command::Next ) ) );
        assert_eq!( key( KeyCode::Left ), Some( KeyAction::Run( Command::Prev ) ) );
        assert_eq!( key( KeyCode::Char( 'p' ) ), Some( KeyAction::Run( Command::Prev ) ) );
        assert_eq!( key( KeyCode::Char( 'r' ) ), Some( KeyAction::Run( Command::Random ) ) );
    }


    #[test]
    fn test_digit_plays_index() {
        assert_eq!( key( KeyCode::Char( '0' ) ), Some( KeyAction::Run( Command::Play { index: 0 } ) ) );
        assert_eq!( key( KeyCode::Char( '7' ) ), Some( KeyAction::Run( Command::Play { index: 7 } ) ) );
    }


    #[test]
    fn test_quit_keys() {
        assert_eq!( key( KeyCode::Esc ), Some( KeyAction::Run( Command::Quit ) ) );
        assert_eq!( key( KeyCode::Char( 'q' ) ), Some( KeyAction::Run( Command::Quit ) ) );
        assert_eq!(
            normal_key( KeyCode::Char( 'c' ), KeyModifiers::CONTROL ),
            Some( KeyAction::Run( Command::Quit ) )
        );
    }


    #[test]
    fn test_prompt_and_unmapped() {
        assert_eq!( key( KeyCode::Char( ':' ) ), Some( KeyAction::OpenPrompt ) );
        assert_eq!( key( KeyCode::Char( 'x' ) ), None );
        assert_eq!( key( KeyCode::Tab ), None );
    }


    #[test]
    fn test_input_buffer() {
        let mut buffer = InputBuffer::new();
        for c in "play 12".chars() {
            buffer.insert( c );
        }
        assert!( buffer.backspace() );
        assert_eq!( buffer.content(), "play 1" );

        assert_eq!( buffer.take(), "play 1" );
        assert!( buffer.is_empty() );
        assert!( !buffer.backspace() );
    }
}
