use crate::{
    log,
    logger::SampleLogger,
    profile::Profile,
    session::{DeviceSession, Timings},
    store::DeviceStateStore,
    transport::Transport,
    types::DeviceConfig,
};
use tokio::{sync::watch, task::JoinSet};

/// Owns the polling tasks, one per configured device.
///
/// Sessions are fault-isolated: a panic or a persistently failing link in one
/// task leaves the others polling. [`PollSupervisor::stop`] broadcasts the
/// stop signal and waits for every session to finish its cleanup.
pub struct PollSupervisor {
    store: DeviceStateStore,
    logger: SampleLogger,
    timings: Timings,
    stop: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl PollSupervisor {
    pub fn new(store: DeviceStateStore, logger: SampleLogger, timings: Timings) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            store,
            logger,
            timings,
            stop,
            tasks: JoinSet::new(),
        }
    }

    pub fn store(&self) -> &DeviceStateStore {
        &self.store
    }

    /// Spawn the polling session for one device
    pub fn spawn(&mut self, config: DeviceConfig, profile: Profile, transport: impl Transport + 'static) {
        log::debug!("[{}] spawning session", config.name);
        let session = DeviceSession::new(
            config,
            profile,
            transport,
            self.store.clone(),
            self.logger.clone(),
            self.timings,
            self.stop.subscribe(),
        );
        self.tasks.spawn(session.run());
    }

    /// Broadcast the stop signal and wait for every session to finish
    pub async fn stop(mut self) {
        log::info!("Stopping {} sessions", self.tasks.len());
        let _ = self.stop.send(true);
        while let Some(result) = self.tasks.join_next().await {
            if let Err(error) = result {
                log::error!("Session task failed: {error}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        transport::NotifyStream, types::DeviceId, Error, LoggingToggle, Result, Revision,
    };
    use async_trait::async_trait;
    use core::time::Duration;
    use tokio::time::sleep;

    #[derive(Clone)]
    enum Mock {
        Healthy,
        Failing,
        Panicking,
    }

    #[async_trait]
    impl Transport for Mock {
        async fn connect(&self) -> Result<()> {
            match self {
                Self::Healthy => Ok(()),
                Self::Failing => Err(Error::LostConnection),
                Self::Panicking => panic!("broken transport"),
            }
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }

        async fn subscribe(&self) -> Result<NotifyStream> {
            Ok(Box::pin(futures::stream::pending()))
        }

        async fn write_command(&self, _data: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    fn config(name: &str) -> DeviceConfig {
        DeviceConfig {
            name: name.into(),
            address: DeviceId::Name(name.into()),
            revision: Revision::Gen1,
        }
    }

    fn supervisor(store: &DeviceStateStore) -> (tempfile::TempDir, PollSupervisor) {
        let dir = tempfile::tempdir().unwrap();
        let logger = SampleLogger::new(dir.path(), LoggingToggle::new(false));
        let supervisor = PollSupervisor::new(store.clone(), logger, Timings::default());
        (dir, supervisor)
    }

    #[tokio::test(start_paused = true)]
    async fn failure_in_one_session_leaves_others_polling() {
        let store = DeviceStateStore::new();
        let (_dir, mut supervisor) = supervisor(&store);
        supervisor.spawn(config("good"), Revision::Gen1.profile(), Mock::Healthy);
        supervisor.spawn(config("bad"), Revision::Gen1.profile(), Mock::Failing);

        sleep(Duration::from_secs(10)).await;

        assert!(store.get("good").unwrap().connected);
        let bad = store.get("bad").unwrap();
        assert!(!bad.connected);
        assert!(bad.status.contains("link failure"));

        supervisor.stop().await;
        assert_eq!(store.get("good").unwrap().status, "stopped");
        assert_eq!(store.get("bad").unwrap().status, "stopped");
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_session_is_contained() {
        let store = DeviceStateStore::new();
        let (_dir, mut supervisor) = supervisor(&store);
        supervisor.spawn(config("good"), Revision::Gen1.profile(), Mock::Healthy);
        supervisor.spawn(config("bomb"), Revision::Gen1.profile(), Mock::Panicking);

        sleep(Duration::from_secs(10)).await;

        assert!(store.get("good").unwrap().connected);

        // join must swallow the panic and still drain the healthy session
        supervisor.stop().await;
        assert_eq!(store.get("good").unwrap().status, "stopped");
    }

    #[tokio::test]
    async fn stop_with_no_sessions_returns() {
        let store = DeviceStateStore::new();
        let (_dir, supervisor) = supervisor(&store);
        supervisor.stop().await;
    }
}
