use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, IndexResult};

/// Fires after a rebuild cleared the index and before the first scanned pair is applied.
pub const REBUILD_AFTER_CLEAR: &str = "rebuild.after_clear";

/// Evaluates the named failpoint, turning a configured `return` action into an error.
///
/// The action parameter selects the error kind: `busy`, `not_serving` or `io` (the default).
/// Compiled to a no-op unless the `failpoints` feature is enabled.
pub fn index_fail_point(name: &str) -> IndexResult<()> {
    fail_point!(name, |parameter| {
        let kind = match parameter.as_deref() {
            Some("busy") => ErrorKind::SourcePartitionBusy,
            Some("not_serving") => ErrorKind::SourceNotServing,
            _ => ErrorKind::SourceIoError,
        };

        bail!(
            kind,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}
