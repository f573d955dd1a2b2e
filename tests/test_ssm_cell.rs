use ampssm::complex::read_back;
use ampssm::device::{Backend, Device, init_device};
use ampssm::{SsmCell, SsmConfig, SsmState, forward_chunked};
use burn::prelude::*;
use burn::tensor::Distribution;
use num_complex::Complex32;

type TestBackend = Backend;

const D_INNER: usize = 4;

fn cell(config: &SsmConfig, device: &Device) -> SsmCell<TestBackend> {
    config.init::<TestBackend>(device).unwrap()
}

fn base_config() -> SsmConfig {
    SsmConfig::new(8, D_INNER).with_blocks(2).with_seed(42)
}

fn noise(batch: usize, len: usize, device: &Device) -> Tensor<TestBackend, 3> {
    Tensor::random([batch, len, D_INNER], Distribution::Normal(0.0, 1.0), device)
}

fn max_abs_diff(a: Tensor<TestBackend, 3>, b: Tensor<TestBackend, 3>) -> f32 {
    (a - b).abs().max().into_scalar()
}

#[test]
fn chunked_processing_matches_single_pass() {
    let device = init_device();
    let cell = cell(&base_config(), &device);
    let x = noise(2, 24, &device);

    let (whole, whole_state) = cell.forward(x.clone(), SsmState::Cold).unwrap();

    let first = x.clone().slice([0..2, 0..10, 0..D_INNER]);
    let second = x.clone().slice([0..2, 10..24, 0..D_INNER]);
    let (y1, state) = cell.forward(first, SsmState::Cold).unwrap();
    let (y2, split_state) = cell.forward(second, state).unwrap();
    let split = Tensor::cat(vec![y1, y2], 1);

    let diff = max_abs_diff(whole.clone(), split);
    assert!(diff < 1e-4, "chunked output differs by {diff}");

    let (chunked, _) = forward_chunked(&cell, x, SsmState::Cold, 7).unwrap();
    let diff = max_abs_diff(whole, chunked);
    assert!(diff < 1e-4, "windowed output differs by {diff}");

    let h_whole = whole_state.hidden().unwrap().to_host().unwrap();
    let h_split = split_state.hidden().unwrap().to_host().unwrap();
    for (a, b) in h_whole.iter().zip(&h_split) {
        assert!((a - b).norm() < 1e-4);
    }
}

#[test]
fn reset_state_behaves_like_a_fresh_sequence() {
    let device = init_device();
    let cell = cell(&base_config(), &device);
    let x = noise(1, 12, &device);

    let (fresh, _) = cell.forward(x.clone(), SsmState::Cold).unwrap();
    let (_, warm) = cell.forward(noise(1, 30, &device), SsmState::Cold).unwrap();
    let (after_reset, _) = cell.forward(x, warm.reset()).unwrap();

    assert_eq!(
        read_back(&fresh).unwrap(),
        read_back(&after_reset).unwrap()
    );
}

#[test]
fn conjugate_symmetric_output_matches_host_recurrence() {
    let device = init_device();
    let config = base_config().with_conj_sym(true).with_dt_min(0.01);
    let cell = cell(&config, &device);
    assert_eq!(cell.state_width(), 4);

    let len = 16;
    let x = noise(1, len, &device);
    let x_host = read_back(&x).unwrap();
    let (y, _) = cell.forward(x, SsmState::Cold).unwrap();
    let y_host = read_back(&y).unwrap();

    let params = cell.parameters().unwrap();
    let p = params.state_width();
    let h_dim = params.d_inner();
    let softplus = |v: f32| (1.0 + v.exp()).ln();
    let (transition, input): (Vec<Complex32>, Vec<Vec<Complex32>>) = (0..p)
        .map(|i| {
            let delta = softplus(params.inv_dt[i]) * config.step_rescale as f32;
            let half = params.lambda[i] * (delta / 2.0);
            let bl = (Complex32::new(1.0, 0.0) - half).inv();
            let row = (0..h_dim)
                .map(|j| bl * delta * params.b_tilde[i * h_dim + j])
                .collect();
            (bl * (Complex32::new(1.0, 0.0) + half), row)
        })
        .unzip();

    let mut hidden = vec![Complex32::new(0.0, 0.0); p];
    for t in 0..len {
        let x_t = &x_host[t * h_dim..(t + 1) * h_dim];
        for i in 0..p {
            let drive: Complex32 = (0..h_dim).map(|j| input[i][j] * x_t[j]).sum();
            hidden[i] = transition[i] * hidden[i] + drive;
        }
        for k in 0..h_dim {
            let projected: Complex32 = (0..p).map(|i| params.c_tilde[k * p + i] * hidden[i]).sum();
            let want = 2.0 * projected.re + params.d[k] * x_t[k];
            let got = y_host[t * h_dim + k];
            assert!(
                (got - want).abs() < 1e-3 * (1.0 + want.abs()),
                "t={t} k={k}: got {got}, want {want}"
            );
        }
    }
}

#[test]
fn changing_scale_equals_building_with_that_scale() {
    let device = init_device();
    let mut rescaled = cell(&base_config(), &device);
    rescaled.change_scale(48_000.0 / 44_100.0).unwrap();
    let direct = cell(&base_config().with_step_rescale(48_000.0 / 44_100.0), &device);

    let x = noise(1, 20, &device);
    let (a, _) = rescaled.forward(x.clone(), SsmState::Cold).unwrap();
    let (b, _) = direct.forward(x, SsmState::Cold).unwrap();
    assert!(max_abs_diff(a, b) < 1e-6);
}

#[test]
fn per_sample_step_matches_forward() {
    let device = init_device();
    let cell = cell(&base_config(), &device);
    let len = 9;
    let x = noise(2, len, &device);
    let (expected, _) = cell.forward(x.clone(), SsmState::Cold).unwrap();

    let mut state = SsmState::Cold;
    let mut outputs = Vec::with_capacity(len);
    for t in 0..len {
        let sample = x.clone().slice([0..2, t..t + 1, 0..D_INNER]).reshape([2, D_INNER]);
        let (y, next) = cell.step(sample, state).unwrap();
        outputs.push(y.unsqueeze_dim(1));
        state = next;
    }
    let stepped = Tensor::cat(outputs, 1);
    let diff = max_abs_diff(expected, stepped);
    assert!(diff < 1e-4, "step differs by {diff}");
}

#[test]
fn silence_in_silence_out() {
    let device = init_device();
    let cell = cell(&base_config().with_conj_sym(true), &device);
    let (y, state) = cell
        .forward(Tensor::zeros([3, 11, D_INNER], &device), SsmState::Cold)
        .unwrap();
    let peak: f32 = y.abs().max().into_scalar();
    assert_eq!(peak, 0.0);
    assert!(state.is_warm());
}

#[test]
fn same_seed_same_cell() {
    let device = init_device();
    let a = cell(&base_config(), &device).parameters().unwrap();
    let b = cell(&base_config(), &device).parameters().unwrap();
    let c = cell(&base_config().with_seed(43), &device).parameters().unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
}
