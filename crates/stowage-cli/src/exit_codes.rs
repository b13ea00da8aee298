//! Exit codes of the `stowage` binary.
//! These codes are part of the public contract.

use stowage::StowageError;

pub const SUCCESS: i32 = 0;
pub const NOT_AVAILABLE: i32 = 1; // Quota exhausted or item not found
pub const CONFIG_ERROR: i32 = 2; // Bad arguments, config or unresolvable root
pub const IO_ERROR: i32 = 3; // Filesystem or backing store failure

/// Exit code for a command failure. Errors that carry no [`StowageError`]
/// are treated as configuration errors.
pub fn for_error(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<StowageError>())
        .map_or(CONFIG_ERROR, |err| match err.exit_code() {
            NOT_AVAILABLE => NOT_AVAILABLE,
            IO_ERROR => IO_ERROR,
            _ => CONFIG_ERROR,
        })
}
