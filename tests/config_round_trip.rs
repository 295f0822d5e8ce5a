//! Config file round-trip tests.
//!
//! Writes `.env` and template files into a tempdir and reads them back the
//! way the binary does: dotenvy for the env file, `TemplateFile::load` for
//! the TOML overrides.

use std::collections::HashMap;

use rust_decimal_macros::dec;
use tempfile::tempdir;

use podwarden::config::{CredentialMode, DEFAULT_ENDPOINT_PATTERN, TemplateFile};

fn read_env_map(path: &std::path::Path) -> HashMap<String, String> {
    dotenvy::from_path_iter(path)
        .expect("dotenvy should parse the .env file")
        .filter_map(|r| r.ok())
        .collect()
}

#[test]
fn env_file_keeps_patterns_and_lists_intact() {
    let dir = tempdir().unwrap();
    let env_path = dir.path().join(".env");
    std::fs::write(
        &env_path,
        concat!(
            "RUNPOD_API_KEY=rp_test\n",
            "POD_ENDPOINT_PATTERN=\"https://{pod_id}-{port}.proxy.runpod.net\"\n",
            "GEN_POD_GPU_TYPES=\"NVIDIA L40S,NVIDIA RTX A6000\"\n",
            "GEN_POD_ENV=\"MODEL=flux,STEPS=30\"\n",
            "# comment lines are ignored\n",
            "HEALTH_TIMEOUT_SECS=120\n",
        ),
    )
    .unwrap();

    let map = read_env_map(&env_path);

    assert_eq!(
        map.get("POD_ENDPOINT_PATTERN").map(String::as_str),
        Some(DEFAULT_ENDPOINT_PATTERN)
    );
    assert_eq!(
        map.get("GEN_POD_GPU_TYPES").map(String::as_str),
        Some("NVIDIA L40S,NVIDIA RTX A6000")
    );
    assert_eq!(
        map.get("GEN_POD_ENV").map(String::as_str),
        Some("MODEL=flux,STEPS=30")
    );
    assert_eq!(map.get("HEALTH_TIMEOUT_SECS").map(String::as_str), Some("120"));
    assert_eq!(map.len(), 5);
}

#[test]
fn template_file_round_trips_every_section() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("templates.toml");
    std::fs::write(
        &path,
        r#"
data_center_ids = ["EU-RO-1", "US-KS-2"]
cloud_type = "SECURE"
credential_mode = "bootstrap"
forward_secrets = ["HF_TOKEN"]

[generation]
name_prefix = "night-gen"
image = "ghcr.io/acme/gen:1.4"
gpu_type_ids = ["NVIDIA L40S"]
gpu_count = 2
service_port = 7860
extra_ports = ["22/tcp"]
hourly_cost = 0.86

[generation.env]
MODEL = "flux-dev"

[orchestration]
volume_gb = 50
health_path = "/ready"
"#,
    )
    .unwrap();

    let file = TemplateFile::load(&path).unwrap();

    assert_eq!(
        file.data_center_ids,
        Some(vec!["EU-RO-1".to_string(), "US-KS-2".to_string()])
    );
    assert_eq!(file.cloud_type.as_deref(), Some("SECURE"));
    assert_eq!(file.credential_mode, Some(CredentialMode::Bootstrap));
    assert_eq!(file.forward_secrets, Some(vec!["HF_TOKEN".to_string()]));

    let generation = &file.generation;
    assert_eq!(generation.name_prefix.as_deref(), Some("night-gen"));
    assert_eq!(generation.gpu_count, Some(2));
    assert_eq!(generation.service_port, Some(7860));
    assert_eq!(generation.hourly_cost, Some(dec!(0.86)));
    assert_eq!(
        generation
            .env
            .as_ref()
            .and_then(|env| env.get("MODEL"))
            .map(String::as_str),
        Some("flux-dev")
    );

    assert_eq!(file.orchestration.volume_gb, Some(50));
    assert_eq!(file.orchestration.health_path.as_deref(), Some("/ready"));
    assert!(file.orchestration.image.is_none());
}

#[test]
fn missing_template_file_names_the_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    let err = TemplateFile::load(&path).unwrap_err();
    assert!(err.to_string().contains("absent.toml"), "error: {err}");
}
