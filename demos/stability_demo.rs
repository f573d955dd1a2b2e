use burn::prelude::*;
use burn::tensor::Distribution;
use num_complex::Complex32;

use ampssm::device::{Backend, Device, init_device};
use ampssm::{SsmCell, SsmConfig, SsmError, SsmState, StabilityMode};

/// Real part given to every eigenvalue to push the system out of the left half-plane.
const UNSTABLE_RE: f32 = 0.5;

fn main() -> Result<(), SsmError> {
    println!("SSM stability: unconstrained vs left half-plane eigenvalues");
    println!("==========================================================");

    let device = init_device();

    for d_state in [16, 32, 64] {
        println!("\n--- d_state = {d_state} ---");
        let base = SsmConfig::new(d_state, 8).with_blocks(2).with_dt_max(0.5);

        // Fresh initialization is stable under both parameterizations.
        for mode in [StabilityMode::Unconstrained, StabilityMode::LeftHalfPlane] {
            let cell = base.clone().with_stability(mode).init::<Backend>(&device)?;
            let peak = drive(&cell, &device)?;
            println!("{mode:?}: fresh cell peak |y| = {peak:.3e}");
        }

        // Move Re(Λ) to the right half-plane and try again.
        let mut params = base.init::<Backend>(&device)?.parameters()?;
        for z in params.lambda.iter_mut() {
            *z = Complex32::new(UNSTABLE_RE, z.im);
        }

        let unconstrained = base.clone().with_stability(StabilityMode::Unconstrained);
        let cell = SsmCell::<Backend>::from_parameters(&params, &unconstrained, &device)?;
        match drive(&cell, &device) {
            Ok(peak) => println!("Unconstrained: perturbed cell peak |y| = {peak:.3e} (growing)"),
            Err(err) => println!("Unconstrained: perturbed cell failed: {err}"),
        }

        let constrained = base.clone().with_stability(StabilityMode::LeftHalfPlane);
        match SsmCell::<Backend>::from_parameters(&params, &constrained, &device) {
            Ok(_) => println!("LeftHalfPlane: perturbed parameters accepted"),
            Err(err) => println!("LeftHalfPlane: refused at construction: {err}"),
        }
    }

    Ok(())
}

/// Runs 8 chunks of noise through `cell` and returns the largest output magnitude.
fn drive(cell: &SsmCell<Backend>, device: &Device) -> Result<f32, SsmError> {
    let mut state = SsmState::Cold;
    let mut peak = 0.0f32;
    for _ in 0..8 {
        let input =
            Tensor::<Backend, 3>::random([1, 256, 8], Distribution::Normal(0.0, 1.0), device);
        let (y, next) = cell.forward(input, state)?;
        peak = peak.max(y.abs().max().into_scalar());
        state = next;
    }
    Ok(peak)
}
