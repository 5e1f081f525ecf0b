//! Loading configurations from disk and building sessions from them.

use rustydae::config::{ConfigError, DaeConfig};
use rustydae::losses::LossWeights;
use rustydae::nn::ActivationKind;
use rustydae::{DaeError, DaeSession};
use std::io::Write;

#[test]
fn json_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dae.json");
    let config = DaeConfig::new(12, 3, ActivationKind::Sigmoid)
        .with_seed(99)
        .with_loss_weights(LossWeights::from_array([1.0, 1.0, 0.5, 0.1, 0.1, 0.1]));

    config.to_json_file(&path).unwrap();
    let loaded = DaeConfig::from_json_file(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn original_activation_spelling_is_accepted() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"input_dim": 10, "latent_dim": 4, "activation": "paramaterized_leaky_relu"}}"#
    )
    .unwrap();

    let config = DaeConfig::from_json_file(file.path()).unwrap();
    assert_eq!(config.activation, ActivationKind::ParameterizedLeakyRelu);
    let session = DaeSession::new(config).unwrap();
    assert!(session.parameter("dae.decoder2.activation.slope").is_some());
}

#[test]
fn missing_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let err = DaeConfig::from_json_file(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound(_)));
}

#[test]
fn invalid_values_fail_on_load() {
    let err = DaeConfig::from_json_str(r#"{"latent_dim": 0}"#).unwrap_err();
    assert!(matches!(err, ConfigError::ZeroDimension { field: "latent_dim" }));

    let err = DaeConfig::from_json_str(r#"{"loss_weights": {"lambda2": -1.0}}"#).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidLossWeight { name: "lambda2", .. }));
}

#[test]
fn session_rejects_invalid_config() {
    let config = DaeConfig::new(8, 2, ActivationKind::Relu).with_init_std(0.0);
    assert!(matches!(DaeSession::new(config), Err(DaeError::Config(ConfigError::InvalidInitStd(_)))));
}
