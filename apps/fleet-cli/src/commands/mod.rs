pub mod catalog;
pub mod events;
pub mod installs;
pub mod poll;
pub mod util;

pub use catalog::{PluginCmd, SiteCmd, VersionCmd};
pub use events::EventsArgs;
pub use installs::InstallCmd;
pub use poll::PollArgs;
