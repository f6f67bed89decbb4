// Active current share between parallel units
// Reference trim from the share bus plus the synchronized start-up pulse

pub mod acs_loop;
pub mod sync_startup;

pub use acs_loop::{AcsInputs, AcsLoop, AcsOutput};
pub use sync_startup::{SyncInputs, SyncPhase, SyncStartup};
