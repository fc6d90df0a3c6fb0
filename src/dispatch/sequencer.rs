//! Ordered, best-effort command execution

use tracing::{info, warn};

use crate::config::CommandSpec;
use crate::transport::Transport;

/// Send each spec in order, waiting its delay first.
///
/// A failed send is logged with the command name and `context` and the
/// remaining specs are still attempted.
pub async fn execute<T>(transport: &T, specs: &[CommandSpec], context: &str)
where
    T: Transport + ?Sized,
{
    for spec in specs {
        if !spec.delay.is_zero() {
            tokio::time::sleep(spec.delay).await;
        }

        match transport.send_command_by_name(&spec.name).await {
            Ok(status) => {
                info!(command = %spec.name, context, %status, "sent");
            }
            Err(e) => {
                warn!(command = %spec.name, context, error = %e, "send failed");
            }
        }
    }
}
