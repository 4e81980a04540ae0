//! Reelcycle Core - Clip playback scheduler
//!
//! This crate cycles a shuffled list of short clips through two
//! alternating display surfaces, crossfading between them, keeping a
//! window of upcoming clips preloaded and absorbing load failures with
//! retry-then-skip.

pub mod command;
pub mod config;
pub mod events;
pub mod playlist;
pub mod preload;
pub mod scheduler;
pub mod sim;
pub mod slots;
pub mod surface;

pub use command::{ Command, CommandError };
pub use config::{ ConfigError, DeviceClass, PlaylistTable, SchedulerConfig };
pub use events::{ EventBus, EventKind, PlayerEvent, SubscriptionId };
pub use playlist::Playlist;
pub use scheduler::{ Phase, Scheduler, SchedulerError, VideoInfo, ERROR_CEILING };
pub use surface::{ MediaBackend, MediaError, MediaHandle, SlotId, Surface, SurfaceSignal };
