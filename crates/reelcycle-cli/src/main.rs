//! Reelcycle CLI - Headless crossfading clip player
//!
//! Drives the scheduler over the simulated backend from the keyboard and
//! prints a status line for each playback event.

mod cli;
mod input;
mod settings;
mod status;

use std::io::{ self, Write };
use std::thread;
use std::time::Duration;

use anyhow::{ Context, Result };
use clap::Parser;
use crossterm::event::{ self, Event, KeyCode, KeyEvent, KeyEventKind };
use crossterm::terminal::{ disable_raw_mode, enable_raw_mode };
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use reelcycle_core::sim::SimBackend;
use reelcycle_core::{ command, Command, DeviceClass, EventKind, PlayerEvent, PlaylistTable, Scheduler };

use cli::Args;
use input::{ InputBuffer, InputMode, KeyAction };
use settings::Settings;


/// How often the key reader checks whether the app is gone.
const KEY_POLL: Duration = Duration::from_millis( 100 );

/// Events that produce a status line.
const STATUS_EVENTS: [EventKind; 4] = [
    EventKind::Playing,
    EventKind::Buffering,
    EventKind::VideoError,
    EventKind::Ended,
];


/// Application state.
struct App {
    scheduler: Scheduler<SimBackend>,
    should_quit: bool,

    // Input state
    input_mode: InputMode,
    input_buffer: InputBuffer,
}


impl App {
    fn new( scheduler: Scheduler<SimBackend> ) -> Self {
        Self {
            scheduler,
            should_quit: false,
            input_mode: InputMode::default(),
            input_buffer: InputBuffer::new(),
        }
    }


    /// Handles keyboard input based on current mode.
    fn handle_key( &mut self, key: KeyEvent ) {
        match self.input_mode {
            InputMode::Normal => self.handle_normal_key( key ),
            InputMode::Command => self.handle_command_key( key.code ),
        }
    }


    fn handle_normal_key( &mut self, key: KeyEvent ) {
        match input::normal_key( key.code, key.modifiers ) {
            Some( KeyAction::Run( command ) ) => self.dispatch( command ),
            Some( KeyAction::OpenPrompt ) => {
                self.input_mode = InputMode::Command;
                self.input_buffer.clear();
                print_inline( ":" );
            }
            None => {}
        }
    }


    fn handle_command_key( &mut self, code: KeyCode ) {
        match code {
            KeyCode::Enter => {
                self.input_mode = InputMode::Normal;
                print_line( "" );

                let text = self.input_buffer.take();
                if text.trim().is_empty() {
                    return;
                }
                match Command::parse( &text ) {
                    Ok( command ) => self.dispatch( command ),
                    Err( e ) => print_line( &e.to_string() ),
                }
            }
            KeyCode::Esc => {
                self.input_mode = InputMode::Normal;
                self.input_buffer.clear();
                print_line( "" );
            }
            KeyCode::Backspace => {
                if self.input_buffer.backspace() {
                    print_inline( "\u{8} \u{8}" );
                }
            }
            KeyCode::Char( c ) => {
                self.input_buffer.insert( c );
                print_inline( c.encode_utf8( &mut [ 0; 4 ] ) );
            }
            _ => {}
        }
    }


    /// Runs a command. Playback changes run in the background so keys stay live.
    fn dispatch( &mut self, command: Command ) {
        match command {
            Command::Info => self.print_info(),
            Command::Quit => self.should_quit = true,
            other => {
                let scheduler = self.scheduler.clone();
                tokio::spawn( async move {
                    if let Err( e ) = scheduler.execute( other ).await {
                        tracing::debug!( "{} did not complete: {}", other.description(), e );
                    }
                });
            }
        }
    }


    fn print_info( &self ) {
        let info = self.scheduler.current_video_info();
        match serde_json::to_string_pretty( &info ) {
            Ok( json ) => print_line( &json ),
            Err( e ) => tracing::warn!( "Failed to serialize clip info: {}", e ),
        }
    }


    fn handle_event( &self, event: &PlayerEvent ) {
        if let Some( line ) = status::status_line( event, &self.scheduler.current_video_info() ) {
            print_line( &line );
        }
    }
}


/// Writes a line in raw mode, where `\n` alone does not return the carriage.
fn print_line( text: &str ) {
    let mut stdout = io::stdout().lock();
    let _ = write!( stdout, "{}\r\n", text.replace( '\n', "\r\n" ) );
    let _ = stdout.flush();
}


fn print_inline( text: &str ) {
    let mut stdout = io::stdout().lock();
    let _ = write!( stdout, "{}", text );
    let _ = stdout.flush();
}


fn init_tracing( verbose: bool ) {
    let filter = if verbose {
        EnvFilter::new( "reelcycle=debug" )
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else( |_| EnvFilter::new( "reelcycle=info" ) )
    };

    tracing_subscriber::fmt()
        .with_env_filter( filter )
        .with_writer( io::stderr )
        .with_target( false )
        .init();
}


/// Reads terminal key presses on a blocking thread.
///
/// The thread stops once the receiver is dropped.
fn spawn_key_reader() -> mpsc::UnboundedReceiver<io::Result<KeyEvent>> {
    let ( tx, rx ) = mpsc::unbounded_channel();

    thread::spawn( move || {
        while !tx.is_closed() {
            match event::poll( KEY_POLL ) {
                Ok( true ) => {}
                Ok( false ) => continue,
                Err( e ) => {
                    let _ = tx.send( Err( e ) );
                    break;
                }
            }

            match event::read() {
                Ok( Event::Key( key ) ) if key.kind == KeyEventKind::Press => {
                    if tx.send( Ok( key ) ).is_err() {
                        break;
                    }
                }
                Ok( _ ) => {}
                Err( e ) => {
                    let _ = tx.send( Err( e ) );
                    break;
                }
            }
        }
    });

    rx
}


async fn run( scheduler: Scheduler<SimBackend>, events: &mut mpsc::UnboundedReceiver<PlayerEvent> ) -> Result<()> {
    let mut app = App::new( scheduler );
    let mut keys = spawn_key_reader();

    print_line( command::help_text() );
    app.dispatch( Command::Play { index: 0 } );

    while !app.should_quit {
        tokio::select! {
            key = keys.recv() => match key {
                Some( Ok( key ) ) => app.handle_key( key ),
                Some( Err( e ) ) => return Err( anyhow::Error::new( e ).context( "Failed to read terminal input" ) ),
                None => break,
            },
            Some( event ) = events.recv() => app.handle_event( &event ),
        }
    }

    Ok(())
}


#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing( args.verbose );

    let device = DeviceClass::from( args.device );
    let table = PlaylistTable::load( &args.playlist )
        .with_context( || format!( "Failed to read playlist table {}", args.playlist.display() ) )?;
    let config = Settings::load().resolve( device, &args.overrides() );

    let backend = SimBackend::new( args.profile() );
    for pattern in &args.fail {
        backend.fail_matching( pattern.as_str() );
    }

    let scheduler = Scheduler::initialize(
        backend.clone(),
        backend.surface( "A" ),
        backend.surface( "B" ),
        table.select( device ),
        config,
    ).context( "Failed to start scheduler" )?;

    let ( event_tx, mut event_rx ) = mpsc::unbounded_channel();
    for kind in STATUS_EVENTS {
        let tx = event_tx.clone();
        scheduler.on( kind, move |event| {
            let _ = tx.send( event.clone() );
        });
    }
    drop( event_tx );

    // Setup terminal
    enable_raw_mode()?;

    let result = run( scheduler.clone(), &mut event_rx ).await;

    // Cleanup
    scheduler.destroy();
    disable_raw_mode()?;

    result
}
