//! Client-side realtime core: live lists seeded by a snapshot and patched by
//! the change feed, presence channels, and the feature consumers built on them.

pub mod backend;
pub mod change;
pub mod chat;
pub mod config;
pub mod context;
pub mod error;
pub mod live_list;
mod mount;
pub mod notifications;
pub mod presence;
pub mod private;
pub mod reactions;
pub mod reconcile;
pub mod remote;
pub mod roster;

pub use backend::{Backend, Roster};
pub use config::LiveConfig;
pub use context::{AppContext, Session};
pub use error::{LiveError, MalformedChange};
pub use live_list::{ListSource, ListState, LiveList, Phase};
