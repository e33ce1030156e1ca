use kube::CustomResourceExt;

fn main() {
    print!(
        "{}",
        serde_yaml::to_string(&hyperconverged_operator::resources::hyperconvergeds::HyperConverged::crd())
            .unwrap()
    )
}
