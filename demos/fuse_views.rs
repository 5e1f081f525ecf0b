//! Fusing three views of one hidden signal
//!
//! This example demonstrates:
//! - Building a decoupled autoencoder from a JSON config
//! - Training all three branches jointly with Adam
//! - Reading the shared bottleneck as a fused representation
//!
//! Each view is a different nonlinear projection of the same 1-D signal,
//! so after training the three latent codes should agree.
//!
//! Run with: `cargo run --example fuse_views`

use ndarray::{s, Array2};
use rustydae::config::DaeConfig;
use rustydae::optimizers::Adam;
use rustydae::session::DaeSession;

/// Row `i` of view `k` is a projection of `signal[i]` onto `dim` features.
fn generate_views(num_samples: usize, dim: usize) -> [Array2<f32>; 3] {
    let signal: Vec<f32> = (0..num_samples).map(|i| (i as f32 * 0.37).sin()).collect();
    [0.5f32, 1.0, 1.5].map(|scale| {
        Array2::from_shape_fn((num_samples, dim), |(i, j)| {
            let phase = j as f32 * 0.3 * scale;
            0.5 * (signal[i] * (j as f32 + 1.0) * scale + phase).tanh()
        })
    })
}

fn mean_abs_diff(a: &Array2<f32>, b: &Array2<f32>) -> f32 {
    (a - b).mapv(f32::abs).mean().unwrap_or(0.0)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== RustyDAE: fusing three views ===\n");

    let config = DaeConfig::from_json_str(
        r#"{
            "input_dim": 12,
            "latent_dim": 2,
            "activation": "tanh",
            "loss_weights": { "lambda4": 0.5, "lambda5": 0.5, "lambda6": 0.5 },
            "init_std": 0.1,
            "seed": 7
        }"#,
    )?;
    println!("Config:");
    println!("  - Input dim: {}, latent dim: {}", config.input_dim, config.latent_dim);
    println!("  - Activation: {}", config.activation);
    println!("  - Loss weights: {:?}\n", config.loss_weights.as_array());

    let views = generate_views(32, config.input_dim);
    let batch = [&views[0], &views[1], &views[2]];

    let mut session = DaeSession::new(config)?;
    let mut optimizer = Adam::new(0.02);

    let epochs = 400;
    println!("Training for {} steps...\n", epochs);
    println!("Step  | Loss");
    println!("------|----------");
    for step in 0..epochs {
        let loss = session.train_step(&mut optimizer, batch, batch)?;
        if step % 50 == 0 || step == epochs - 1 {
            println!("{:5} | {:.6}", step, loss);
        }
    }

    let fused = session.forward(batch)?;
    println!("\n=== Result ===\n");
    println!("Bottleneck shape: {:?}", fused.bottleneck.dim());
    for (i, (r, x)) in fused.reconstructions.iter().zip(views.iter()).enumerate() {
        println!("  View {} reconstruction error (mean |r - x|): {:.4}", i + 1, mean_abs_diff(r, x));
    }
    println!(
        "  Latent disagreement: z1/z2 {:.4}, z2/z3 {:.4}, z3/z1 {:.4}",
        mean_abs_diff(&fused.latents[0], &fused.latents[1]),
        mean_abs_diff(&fused.latents[1], &fused.latents[2]),
        mean_abs_diff(&fused.latents[2], &fused.latents[0]),
    );

    println!("\nFirst rows of the fused representation:");
    for row in fused.bottleneck.slice(s![..4, ..]).rows() {
        let cells: Vec<String> = row.iter().map(|v| format!("{:+.3}", v)).collect();
        println!("  [{}]", cells.join(", "));
    }
    Ok(())
}
