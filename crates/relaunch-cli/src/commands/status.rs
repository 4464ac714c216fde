use crate::GlobalOpts;
use relaunch_runtime::DockerClient;

pub async fn status(opts: &GlobalOpts) -> anyhow::Result<()> {
    let (_, config) = super::load_project(opts)?;
    let name = &config.service.name;

    let client = DockerClient::new();
    match client.inspect_container(name).await? {
        Some(status) => println!("{status}"),
        None => println!("{name} is not deployed — run `relaunch` to deploy it"),
    }

    Ok(())
}
