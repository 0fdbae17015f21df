//! Lifecycle of the link to the co-processor.
//!
//! **Example** - running the lifecycle until Ctrl+C:
//! ```ignore
//! let mut lifecycle = wificom::lifecycle::factory(link);
//! let handle = lifecycle.shutdown_handle();
//! ctrlc::set_handler(move || handle.request())?;
//! std::process::exit(lifecycle.run() as i32);
//! ```

mod events;
mod state_machine;
mod states;

pub use state_machine::{factory, Lifecycle, ShutdownHandle};
