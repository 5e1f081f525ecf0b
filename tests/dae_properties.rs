//! Structural and value properties of the decoupled autoencoder.

use approx::assert_abs_diff_eq;
use ndarray::{concatenate, s, Array2, ArrayD, Axis};
use rustydae::config::DaeConfig;
use rustydae::losses::LossWeights;
use rustydae::nn::ActivationKind;
use rustydae::session::DaeSession;

fn sample(batch: usize, dim: usize, k: f32) -> Array2<f32> {
    Array2::from_shape_fn((batch, dim), |(i, j)| ((i * dim + j) as f32 * 0.61 + k).cos())
}

fn session(input_dim: usize, latent_dim: usize, activation: ActivationKind) -> DaeSession {
    DaeSession::new(DaeConfig::new(input_dim, latent_dim, activation).with_seed(17)).unwrap()
}

fn zero_all_parameters(session: &mut DaeSession) {
    let names: Vec<String> = session.parameter_names().map(str::to_string).collect();
    for name in names {
        let shape = session.parameter(&name).unwrap().raw_dim();
        session.set_parameter(&name, ArrayD::zeros(shape)).unwrap();
    }
}

#[test]
fn bottleneck_is_latents_in_branch_order() {
    for activation in ActivationKind::ALL {
        let mut s = session(5, 3, activation);
        let (x1, x2, x3) = (sample(4, 5, 0.0), sample(4, 5, 1.0), sample(4, 5, 2.0));
        let out = s.forward([&x1, &x2, &x3]).unwrap();

        assert_eq!(out.bottleneck.dim(), (4, 9), "{}", activation);
        let expected = concatenate(
            Axis(1),
            &[out.latents[0].view(), out.latents[1].view(), out.latents[2].view()],
        )
        .unwrap();
        assert_eq!(out.bottleneck, expected);
        assert_eq!(out.bottleneck.slice(s![.., 3..6]), out.latents[1]);
    }
}

#[test]
fn embed_matches_forward() {
    let mut s = session(5, 2, ActivationKind::LeakyRelu);
    let (x1, x2, x3) = (sample(3, 5, 0.3), sample(3, 5, 0.6), sample(3, 5, 0.9));
    let bottleneck = s.forward([&x1, &x2, &x3]).unwrap().bottleneck;
    assert_eq!(s.embed([&x1, &x2, &x3]).unwrap(), bottleneck);
}

#[test]
fn branches_are_independent() {
    // Changing view 2 leaves branches 1 and 3 untouched.
    let mut s = session(4, 2, ActivationKind::Tanh);
    let (x1, x2, x3) = (sample(2, 4, 0.0), sample(2, 4, 1.0), sample(2, 4, 2.0));
    let other = sample(2, 4, 5.0);
    let a = s.forward([&x1, &x2, &x3]).unwrap();
    let b = s.forward([&x1, &other, &x3]).unwrap();

    assert_eq!(a.latents[0], b.latents[0]);
    assert_eq!(a.reconstructions[2], b.reconstructions[2]);
    assert_ne!(a.latents[1], b.latents[1]);
}

#[test]
fn zero_input_latents_equal_activation_at_zero() {
    let zeros = Array2::<f32>::zeros((3, 6));
    let cases = [
        (ActivationKind::Sigmoid, 0.5f32),
        (ActivationKind::Tanh, 0.0),
        (ActivationKind::LeakyRelu, 0.0),
        (ActivationKind::ParameterizedLeakyRelu, 0.0),
        (ActivationKind::Relu, 0.0),
        (ActivationKind::Identity, 0.0),
    ];
    for (activation, expected) in cases {
        let mut s = session(6, 4, activation);
        let out = s.forward([&zeros, &zeros, &zeros]).unwrap();
        for z in &out.latents {
            assert!(z.iter().all(|&v| v == expected), "{}: {:?}", activation, z);
        }
    }
}

#[test]
fn loss_is_non_negative() {
    for activation in ActivationKind::ALL {
        let mut s = session(5, 3, activation);
        let (x1, x2, x3) = (sample(4, 5, 0.1), sample(4, 5, 0.2), sample(4, 5, 0.3));
        let loss = s.loss([&x1, &x2, &x3], [&x1, &x2, &x3]).unwrap();
        assert!(loss >= 0.0 && loss.is_finite(), "{}: {}", activation, loss);
    }
}

#[test]
fn loss_is_zero_when_reconstructions_match_and_latents_agree() {
    let mut s = session(4, 2, ActivationKind::Identity);
    zero_all_parameters(&mut s);
    let zeros = Array2::<f32>::zeros((2, 4));
    let loss = s.loss([&zeros, &zeros, &zeros], [&zeros, &zeros, &zeros]).unwrap();
    assert_eq!(loss, 0.0);

    // Same weights, but targets the reconstructions cannot reach.
    let ones = Array2::<f32>::ones((2, 4));
    let loss = s.loss([&zeros, &zeros, &zeros], [&ones, &zeros, &zeros]).unwrap();
    assert_abs_diff_eq!(loss, 1.0, epsilon = 1e-6);
}

#[test]
fn alignment_terms_follow_their_weights() {
    // Perfect reconstructions via the decoder biases, latents 0, 1, 3.
    let config = DaeConfig::new(1, 1, ActivationKind::Identity)
        .with_seed(1)
        .with_loss_weights(LossWeights::from_array([1.0, 1.0, 1.0, 4.0, 5.0, 6.0]));
    let mut s = DaeSession::new(config).unwrap();
    zero_all_parameters(&mut s);
    for (i, z) in [0.0f32, 1.0, 3.0].iter().enumerate() {
        s.set_parameter(&format!("dae.encoder{}.bias", i + 1), ArrayD::from_elem(vec![1, 1], *z))
            .unwrap();
    }
    let x = Array2::<f32>::zeros((1, 1));
    let loss = s.loss([&x, &x, &x], [&x, &x, &x]).unwrap();
    // 4 * 1 + 5 * 4 + 6 * 9
    assert_abs_diff_eq!(loss, 78.0, epsilon = 1e-4);
}

#[test]
fn zero_lambda_removes_reconstruction_gradient() {
    let config = DaeConfig::new(4, 2, ActivationKind::Tanh)
        .with_seed(8)
        .with_init_std(0.3)
        .with_loss_weights(LossWeights::from_array([0.0, 1.0, 1.0, 1.0, 1.0, 1.0]));
    let mut s = DaeSession::new(config).unwrap();
    let (x1, x2, x3) = (sample(3, 4, 0.0), sample(3, 4, 1.0), sample(3, 4, 2.0));
    let (_, grads) = s.gradients([&x1, &x2, &x3], [&x1, &x2, &x3]).unwrap();

    assert!(grads["dae.decoder1.weights"].iter().all(|&g| g == 0.0));
    assert!(grads["dae.decoder1.bias"].iter().all(|&g| g == 0.0));
    assert!(grads["dae.decoder2.weights"].iter().any(|&g| g != 0.0));
    // Encoder 1 still feeds the alignment terms.
    assert!(grads["dae.encoder1.weights"].iter().any(|&g| g != 0.0));
}

#[test]
fn zero_lambdas_isolate_an_encoder() {
    let config = DaeConfig::new(4, 2, ActivationKind::Tanh)
        .with_seed(8)
        .with_init_std(0.3)
        .with_loss_weights(LossWeights::from_array([0.0, 1.0, 1.0, 0.0, 1.0, 0.0]));
    let mut s = DaeSession::new(config).unwrap();
    let (x1, x2, x3) = (sample(3, 4, 0.0), sample(3, 4, 1.0), sample(3, 4, 2.0));
    let (_, grads) = s.gradients([&x1, &x2, &x3], [&x1, &x2, &x3]).unwrap();

    for name in ["dae.encoder1.weights", "dae.encoder1.bias", "dae.decoder1.weights", "dae.decoder1.bias"] {
        assert!(grads[name].iter().all(|&g| g == 0.0), "{} has a gradient", name);
    }
    assert!(grads["dae.encoder2.weights"].iter().any(|&g| g != 0.0));
}

#[test]
fn gradients_cover_every_parameter_with_its_shape() {
    let mut s = session(5, 3, ActivationKind::ParameterizedLeakyRelu);
    let x = sample(2, 5, 0.0);
    let (loss, grads) = s.gradients([&x, &x, &x], [&x, &x, &x]).unwrap();
    assert!(loss > 0.0);
    assert_eq!(grads.len(), 18);
    for (name, grad) in &grads {
        assert_eq!(grad.shape(), s.parameter(name).unwrap().shape(), "{}", name);
    }
}

#[test]
fn initial_weights_are_small_and_biases_zero() {
    let s = session(300, 300, ActivationKind::LeakyRelu);
    let w = s.parameter("dae.encoder2.weights").unwrap();
    assert_eq!(w.shape(), &[300, 300]);
    let std = (w.mapv(|v| v * v).mean().unwrap()).sqrt();
    assert!((std - 0.01).abs() < 1e-3, "std {}", std);
    assert!(s.parameter("dae.decoder3.bias").unwrap().iter().all(|&b| b == 0.0));
}

#[test]
fn same_seed_same_model() {
    let a = session(6, 2, ActivationKind::Tanh);
    let b = session(6, 2, ActivationKind::Tanh);
    assert_eq!(a.parameters(), b.parameters());
}
