//! Print the Experiment CustomResourceDefinition as YAML

use experiment_operator::crd::Experiment;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&Experiment::crd())?);
    Ok(())
}
