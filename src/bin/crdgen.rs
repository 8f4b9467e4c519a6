//! Prints the Operation CRD manifest to stdout.
//!
//! Usage: `cargo run --bin crdgen > config/crd/operation.yaml`

use kube::CustomResourceExt;

use operations_controller::crd::Operation;

fn main() {
    print!(
        "{}",
        serde_yaml::to_string(&Operation::crd()).expect("Failed to serialize Operation CRD")
    );
}
