use super::deploy_pipeline::{self, DeployPlan};
use crate::GlobalOpts;
use relaunch_core::CachePolicy;
use relaunch_runtime::{DockerClient, GitClient};

/// Execute the full deploy pipeline.
pub async fn deploy(
    opts: &GlobalOpts,
    force: bool,
    allow_storage_change: bool,
) -> anyhow::Result<()> {
    let (project_dir, config) = super::load_project(opts)?;
    let policy = CachePolicy::from_force(force);
    let plan = DeployPlan::new(&config, &project_dir, policy)
        .allow_storage_change(allow_storage_change);

    let runtime = DockerClient::new();
    let source = GitClient::new(&project_dir, &config.source);

    println!(
        "Deploying {name} ({image}, {policy} build)...",
        name = plan.service_name,
        image = plan.image_tag,
    );

    let outcome = match deploy_pipeline::run(&runtime, &source, &plan).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(stage = e.stage_label(), "deploy aborted");
            return Err(e.into());
        }
    };

    println!();
    for step in &outcome.steps {
        println!("  {step}");
    }
    println!();
    println!(
        "Running: {name} ({id}) at revision {rev}",
        name = plan.service_name,
        id = outcome.container_id.get(..12).unwrap_or(&outcome.container_id),
        rev = outcome.revision,
    );
    println!("Stage:   {}", outcome.stage);
    println!("Data:    {}", outcome.storage);
    println!("Logs:    docker logs -f {}", plan.service_name);

    Ok(())
}
