pub mod provisioner;
pub mod reconciler;
