mod args;
mod cmdline;

use args::Args;
use btleplug::{api::Manager as _, platform::Manager};
use jbdmon::{
    Client, DeviceStateStore, Error, LoggingToggle, PollSupervisor, Result, SampleLogger,
};
use std::{path::PathBuf, sync::Arc};
use tokio::{signal::ctrl_c, sync::Notify, task::spawn};
use tracing as log;

#[cfg_attr(feature = "multi-thread", tokio::main)]
#[cfg_attr(not(feature = "multi-thread"), tokio::main(flavor = "current_thread"))]
async fn main() -> Result<()> {
    let args = Args::from_cmdline();

    if args.version {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        if !env!("CARGO_PKG_DESCRIPTION").is_empty() {
            println!("{}", env!("CARGO_PKG_DESCRIPTION"));
        }
        return Ok(());
    }

    #[cfg(feature = "tracing-subscriber")]
    if let Some(log) = args.log_filter() {
        use tracing_subscriber::prelude::*;

        let registry = tracing_subscriber::registry().with(log);

        #[cfg(all(feature = "stderr", feature = "journal"))]
        let registry = registry.with(if !args.journal {
            Some(tracing_subscriber::fmt::Layer::default().with_writer(std::io::stderr))
        } else {
            None
        });

        #[cfg(all(feature = "stderr", not(feature = "journal")))]
        let registry =
            registry.with(tracing_subscriber::fmt::Layer::default().with_writer(std::io::stderr));

        #[cfg(feature = "journal")]
        let registry = registry.with(if args.journal {
            Some(tracing_journald::Layer::new()?)
        } else {
            None
        });

        registry.init();
    }

    log::info!("Start...");
    log::trace!("{args:?}");

    if !args.has_action() {
        println!("Please specify devices to poll (-d name=ADDRESS[@revision]) or -s to scan");
        return Ok(());
    }

    let main = Main::new(args);

    main.run().await.map_err(|error| {
        log::error!("Exit with error: {error}");
        error
    })?;

    log::info!("Stop...");

    Ok(())
}

pub struct Main {
    args: Args,
    intr: Arc<Notify>,
    store: DeviceStateStore,
}

impl core::ops::Deref for Main {
    type Target = Args;
    fn deref(&self) -> &Self::Target {
        &self.args
    }
}

impl Main {
    pub fn new(args: Args) -> Self {
        let intr = Self::intr_notify();
        let store = DeviceStateStore::new();

        Self { args, intr, store }
    }

    pub async fn run(&self) -> Result<()> {
        let manager = Manager::new().await?;

        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                log::error!("No Bluetooth adapters found");
                Error::NotFound
            })?;

        let options = self.client_options();

        if self.scan {
            let found = Client::find(&adapter, &options).await?;
            if found.is_empty() {
                println!("No BMS devices found!");
            } else {
                for device_id in found {
                    println!("{device_id}");
                }
            }
            return Ok(());
        }

        let toggle = LoggingToggle::new(self.log_dir.is_some());
        let log_dir = self
            .args
            .log_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        let logger = SampleLogger::new(log_dir, toggle);

        let mut supervisor = PollSupervisor::new(self.store.clone(), logger, self.timings());

        log::debug!("Use {} devices", self.device.len());

        for config in &self.args.device {
            let client = Client::new(&adapter, &config.address, &options);
            let profile = config.revision.profile().with_checksum(self.verify_checksum);
            supervisor.spawn(config.clone(), profile, client);
        }

        let res = self.run_monitor().await;

        supervisor.stop().await;

        res
    }

    fn intr_notify() -> Arc<Notify> {
        let notify = Arc::new(Notify::new());

        spawn({
            let notify = notify.clone();
            async move {
                log::debug!("Await ctrl-c signal");
                if let Err(error) = ctrl_c().await {
                    log::error!("Error while processing ctrl-c: {error}");
                }
                notify.notify_waiters();
            }
        });

        notify
    }
}
