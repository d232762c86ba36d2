use crate::{log, Main};
use jbdmon::Result;
use std::io::Write;
use tokio::time::interval;

impl Main {
    /// Render the shared snapshot periodically until interrupted.
    ///
    /// The observer only reads the store; sessions keep polling at their own
    /// pace whether anyone is watching or not.
    pub async fn run_monitor(&self) -> Result<()> {
        let mut ticker = interval(self.refresh_interval);
        let mut output = std::io::stdout();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.store.all();
                    self.format.format_snapshot(&snapshot, &mut output)?;
                    writeln!(output)?;
                    output.flush()?;
                }
                _ = self.intr.notified() => {
                    log::debug!("Monitor interrupted");
                    return Ok(());
                }
            }
        }
    }
}
