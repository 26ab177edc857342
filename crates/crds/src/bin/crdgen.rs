//! Prints the provider's CRD manifests as a multi-document YAML stream.
//!
//! `cargo run -p crds --bin crdgen > config/crd/bases.yaml`

use crds::{ACKCluster, ACKMachine};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [ACKCluster::crd(), ACKMachine::crd()];
    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
