use candle_core::Device;
use tracing::info;

/// Metal when built with the `metal` feature and available, else CPU.
/// `APP_DEVICE=cpu` forces the CPU.
pub fn select_device() -> Device {
    let forced_cpu = std::env::var("APP_DEVICE").is_ok_and(|v| v.eq_ignore_ascii_case("cpu"));
    #[cfg(feature = "metal")]
    {
        if !forced_cpu {
            match Device::new_metal(0) {
                Ok(dev) => {
                    info!("embedding device: Metal");
                    return dev;
                }
                Err(e) => tracing::warn!(error = %e, "Metal unavailable, falling back to CPU"),
            }
        }
    }
    info!(forced_cpu, "embedding device: CPU");
    Device::Cpu
}
