//! Centralized backend and device selection.
//!
//! The CPU `NdArray` backend is the default; it is deterministic and is what
//! the tests run on. Building with `--features wgpu` moves everything to the
//! WGPU backend without touching the model code.

use std::sync::OnceLock;

#[cfg(not(feature = "wgpu"))]
mod selected {
    pub type Backend = burn::backend::NdArray<f32>;
    pub type Device = burn::backend::ndarray::NdArrayDevice;
}

#[cfg(feature = "wgpu")]
mod selected {
    pub type Backend = burn::backend::Wgpu<f32, i32>;
    pub type Device = burn::backend::wgpu::WgpuDevice;
}

/// Backend used by the binary, the demos and the tests.
pub type Backend = selected::Backend;

/// Device type of [`Backend`].
pub type Device = selected::Device;

static DEVICE: OnceLock<Device> = OnceLock::new();

/// Returns the process-wide device, creating it on first use.
///
/// # Example
/// ```rust
/// use ampssm::device::init_device;
///
/// let device = init_device();
/// ```
pub fn init_device() -> Device {
    DEVICE
        .get_or_init(|| {
            let device = Device::default();
            log::info!("initialized device {:?}", device);
            device
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Tensor;

    #[test]
    fn device_runs_tensor_ops() {
        let device = init_device();
        let t = Tensor::<Backend, 1>::from_floats([1.0, 2.0, 3.0], &device);
        let doubled = t.clone() + t;
        assert_eq!(doubled.dims(), [3]);
        let values = doubled.into_data().to_vec::<f32>().unwrap();
        assert_eq!(values, vec![2.0, 4.0, 6.0]);
    }
}
