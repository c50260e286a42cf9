use std::sync::atomic::Ordering;

mod common;
use common::{Harness, OWNER};

#[tokio::test]
async fn seeded_keys_are_returned_without_touching_the_provider() {
    let h = Harness::new();
    h.seed_keys(OWNER);

    let pair = h.keys.ensure_keys(OWNER).await.unwrap();
    assert_eq!(pair.fingerprint, "SHA256:seeded");
    assert_eq!(h.provider.register_calls.load(Ordering::SeqCst), 0);

    let deployment = h.keys.deployment_keys(OWNER).await.unwrap();
    assert!(deployment.public_key.starts_with("ssh-rsa "));
    assert!(deployment
        .private_key_pem
        .contains("BEGIN RSA PRIVATE KEY"));
}

#[tokio::test]
async fn first_use_generates_registers_and_persists_exactly_once() {
    let h = Harness::new();

    let first = h.keys.ensure_keys(OWNER).await.unwrap();
    assert!(first.fingerprint.starts_with("SHA256:"));
    assert_eq!(first.provider_key_id, "provider-key-1");
    assert_eq!(h.provider.register_calls.load(Ordering::SeqCst), 1);

    // Second call is the fast path: no new key, no new registration.
    let second = h.keys.ensure_keys(OWNER).await.unwrap();
    assert_eq!(second.fingerprint, first.fingerprint);
    assert_eq!(h.provider.register_calls.load(Ordering::SeqCst), 1);

    // Round trip through the secret store yields usable key material.
    let deployment = h.keys.deployment_keys(OWNER).await.unwrap();
    assert!(deployment.public_key.starts_with("ssh-rsa "));
    assert!(deployment.private_key_pem.contains("PRIVATE KEY"));
}

#[tokio::test]
async fn key_material_never_rests_in_the_records() {
    let h = Harness::new();
    let pair = h.keys.ensure_keys(OWNER).await.unwrap();

    // References are opaque; neither half of the key appears in them.
    assert!(pair.public_key_reference.starts_with("sealed:"));
    assert!(pair.private_key_reference.starts_with("sealed:"));
    assert!(!pair.public_key_reference.contains("ssh-rsa"));
}
