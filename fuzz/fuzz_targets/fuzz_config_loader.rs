#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse and validate must reject bad input without panicking, and a valid
    // config must map onto limits the engine accepts or rejects cleanly.
    let Ok(cfg) = pump_config::load_toml(data) else {
        return;
    };
    if cfg.validate().is_err() {
        return;
    }
    let limits = pump_core::PodLimits::from(&cfg.pod);
    let _ = limits.validate();
    let _ = pump_core::conversions::basal_schedule_from_rows(&cfg.basal.schedule, &limits);
});
