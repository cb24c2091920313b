//! CLI Exit Code Registry
//!
//! Single source of truth for the process exit codes. Schedulers and wrapper
//! scripts branch on them, so they are part of the shell contract.
//!
//! | Code | Meaning                                                  |
//! |------|----------------------------------------------------------|
//! | 0    | Every recipe (and the publish step, when run) succeeded  |
//! | 1    | At least one recipe, the final table or publishing failed |
//! | 2    | Configuration or usage error                             |
//! | 3    | The ERP session could not be acquired or was lost        |
//!
//! A run that both loses its session and has other failures exits 3.

use reportflow_driver::DriverError;

/// Success - all work completed.
pub const EXIT_SUCCESS: u8 = 0;

/// A recipe, the final table or the publisher failed. Files that were not
/// published stay in place for the next run.
pub const EXIT_FAILURES: u8 = 1;

/// Bad config file, unknown `--only` id, malformed `--date`.
pub const EXIT_CONFIG: u8 = 2;

/// NO_SESSION, NO_CONNECTION, or the bridge helper went away.
pub const EXIT_SESSION: u8 = 3;

/// Map a driver error to its exit code.
pub fn driver_exit_code(err: &DriverError) -> u8 {
    if err.is_session_error() {
        EXIT_SESSION
    } else {
        EXIT_FAILURES
    }
}
