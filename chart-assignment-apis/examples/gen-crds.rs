use chart_assignment_apis::ChartAssignment;
use kube::CustomResourceExt;

pub fn main() {
    match serde_yaml::to_string(&ChartAssignment::crd()) {
        Ok(yaml) => println!("{}", yaml),
        Err(e) => eprintln!("failed to render CRD: {}", e),
    }
}
