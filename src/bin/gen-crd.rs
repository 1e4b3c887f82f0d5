use kube::CustomResourceExt;
use serde_json::{json, Value};
use shipper::crd::{Application, CapacityTarget, Cluster, InstallationTarget, Release, TrafficTarget};

fn main() -> anyhow::Result<()> {
    // Use: cargo run --bin gen-crd | python3 -c "import sys,json,yaml; print(yaml.dump(json.load(sys.stdin), default_flow_style=False))"
    // to convert to YAML
    let items: Vec<Value> = vec![
        serde_json::to_value(Application::crd())?,
        serde_json::to_value(Release::crd())?,
        serde_json::to_value(CapacityTarget::crd())?,
        serde_json::to_value(TrafficTarget::crd())?,
        serde_json::to_value(InstallationTarget::crd())?,
        serde_json::to_value(Cluster::crd())?,
    ];

    let list = json!({
        "apiVersion": "v1",
        "kind": "List",
        "items": items,
    });
    println!("{}", serde_json::to_string_pretty(&list)?);
    Ok(())
}
