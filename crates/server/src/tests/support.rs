use std::{
    io,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use dispatcher::{CommandLine, CommandOutput, Dispatcher, ProcessLauncher};
use storage::ConfigStore;
use triggers::{BrokerConfig, ListenerHealthSet};

use crate::api::ApiContext;

#[derive(Default)]
pub(crate) struct RecordingLauncher {
    commands: Mutex<Vec<CommandLine>>,
}

impl RecordingLauncher {
    pub(crate) fn commands(&self) -> Vec<CommandLine> {
        self.commands.lock().expect("lock").clone()
    }
}

#[async_trait]
impl ProcessLauncher for RecordingLauncher {
    async fn spawn(&self, command: &CommandLine) -> io::Result<()> {
        self.commands.lock().expect("lock").push(command.clone());
        Ok(())
    }

    async fn output(&self, command: &CommandLine) -> io::Result<CommandOutput> {
        self.commands.lock().expect("lock").push(command.clone());
        Ok(CommandOutput {
            success: true,
            stdout: format!("ran {command}"),
            stderr: String::new(),
        })
    }
}

pub(crate) async fn test_context(
    dir: &tempfile::TempDir,
) -> (ApiContext, Arc<RecordingLauncher>) {
    let store = ConfigStore::open(dir.path().join("launcher_config.json"))
        .await
        .expect("store");
    let launcher = Arc::new(RecordingLauncher::default());
    let ctx = ApiContext {
        store,
        dispatcher: Dispatcher::new(Arc::clone(&launcher) as Arc<dyn ProcessLauncher>),
        health: ListenerHealthSet::new(),
        broker: BrokerConfig::default(),
    };
    (ctx, launcher)
}
