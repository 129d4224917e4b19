#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary raw state must decode or fail with a codec error, and whatever
    // decodes must encode back to an equal state.
    let Ok(raw) = serde_json::from_slice::<pump_core::RawState>(data) else {
        return;
    };
    let Ok(state) = pump_core::PumpState::from_raw_state(&raw) else {
        return;
    };
    let encoded = state.to_raw_state().expect("decoded state encodes");
    let again = pump_core::PumpState::from_raw_state(&encoded).expect("encoded state decodes");
    assert_eq!(state, again);
});
