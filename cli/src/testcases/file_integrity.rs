use super::machine_input;
use async_trait::async_trait;
use harness::machine::Machine;
use harness::validate::{compare_lists, sha256_hex};
use harness::{Cleanup, CleanupReport, Error, Result, TestCase, TestContext};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Deserialize)]
struct Params {
    source: PathBuf,
    destination: Option<String>,
}

/// Copy a local file to a machine and check the copy hashes the same. The copy is removed in
/// teardown.
#[derive(Default)]
pub struct FileIntegrity {
    machine: Option<Arc<dyn Machine>>,
    source: PathBuf,
    destination: String,
    source_hash: String,
    copied: Option<String>,
}

#[async_trait]
impl TestCase for FileIntegrity {
    fn id(&self) -> &str {
        "file-integrity"
    }

    fn name(&self) -> &str {
        "Copy a file and compare hashes"
    }

    fn required_inputs(&self) -> &[&str] {
        &["source"]
    }

    async fn setup(&mut self, ctx: &TestContext) -> Result<()> {
        let params: Params = ctx.inputs().parse()?;
        let file_name = params
            .source
            .file_name()
            .ok_or_else(|| Error::InvalidInput {
                key: "source".into(),
                reason: format!("{} does not name a file", params.source.display()),
            })?
            .to_string_lossy()
            .into_owned();
        let data = tokio::fs::read(&params.source)
            .await
            .map_err(|err| Error::Setup(format!("reading {}: {}", params.source.display(), err)))?;

        self.source_hash = sha256_hex(&data);
        self.destination = params
            .destination
            .unwrap_or_else(|| format!("testbed/{}/{}", ctx.run_id(), file_name));
        self.source = params.source;
        self.machine = Some(machine_input(ctx)?);
        Ok(())
    }

    async fn run(&mut self, _ctx: &TestContext) -> Result<()> {
        let machine = self
            .machine
            .clone()
            .ok_or_else(|| Error::Setup("no machine selected".into()))?;
        machine.copy_from_local(&self.source, &self.destination).await?;
        self.copied = Some(self.destination.clone());
        info!(machine = machine.name(), destination = %self.destination, "copied file");

        let copy_hash = machine.file_hash(&self.destination).await?;
        compare_lists(&[self.source_hash.clone()], &[copy_hash], false)
            .into_result(&format!("sha256 of {}", self.destination))
    }

    async fn tear_down(&mut self, _ctx: &TestContext) -> CleanupReport {
        let mut cleanup = Cleanup::new();
        if let Some(machine) = self.machine.take() {
            cleanup
                .attempt_some("remove copied file", self.copied.take(), |path| async move {
                    machine.delete_file(&path).await
                })
                .await;
        }
        cleanup.finish()
    }
}
