use crate::GlobalOpts;
use relaunch_runtime::DockerClient;

pub async fn logs(opts: &GlobalOpts, follow: bool, tail: Option<u32>) -> anyhow::Result<()> {
    let (_, config) = super::load_project(opts)?;

    let client = DockerClient::new();
    client
        .stream_logs(&config.service.name, follow, Some(tail.unwrap_or(100)))
        .await?;

    Ok(())
}
