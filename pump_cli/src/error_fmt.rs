//! Human-readable error descriptions and structured JSON error formatting.

use pump_core::{BuildError, PumpManagerError, StateCodecError};
use pump_traits::CommError;

fn comm_hint(e: &CommError) -> &'static str {
    match e {
        CommError::NotConnected => {
            "The command was not sent; nothing changed on the pod. Move closer to the pod and retry."
        }
        CommError::NoPod => "No pod is paired. Run `podctl activate` to start a new pod.",
        CommError::Rejected(_) => {
            "The pod refused the command; nothing changed. Check `podctl status` (the pod may be suspended or low on insulin)."
        }
        CommError::NoResponse | CommError::Transport(_) => {
            "The command may have been delivered. It is recorded as uncertain; run `podctl refresh` before dosing again."
        }
    }
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(pe) = err.downcast_ref::<PumpManagerError>() {
        return match pe {
            PumpManagerError::Busy => {
                "What happened: Another pod operation is still in progress.\nLikely causes: A bolus is still running, or a previous command is waiting for the pod.\nHow to fix: Wait for it to finish (see `podctl status`) or cancel it first.".to_string()
            }
            PumpManagerError::CommunicationFailure(e) => format!(
                "What happened: Pod communication failed ({e}).\nHow to fix: {}",
                comm_hint(e)
            ),
            PumpManagerError::InvalidProgram(msg) => format!(
                "What happened: The pod cannot run this program ({msg}).\nLikely causes: Amount above the configured maximum, below one pulse (0.05 U), or a temp basal shorter than 30 minutes.\nHow to fix: Adjust the request or the [pod] limits in the config."
            ),
            PumpManagerError::StaleData {
                last_status_date,
                cause,
            } => {
                let last = last_status_date
                    .map_or_else(|| "never".to_string(), |d| d.to_rfc3339());
                format!(
                    "What happened: Pump data is stale (last status: {last}) and could not be refreshed ({cause}).\nHow to fix: Do not dose until `podctl refresh` succeeds."
                )
            }
            PumpManagerError::PersistenceFailure(msg) => format!(
                "What happened: Dose records could not be saved ({msg}).\nLikely causes: The ledger file is unreadable or its directory is not writable.\nHow to fix: Check storage.ledger_file in the config; records are kept and retried on the next run."
            ),
            PumpManagerError::NoActivePod => {
                "What happened: No active pod.\nHow to fix: Run `podctl activate` to start a new pod.".to_string()
            }
        };
    }

    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
            other => format!(
                "What happened: The pump manager could not be assembled ({other}).\nHow to fix: Re-run with --log-level=debug for details."
            ),
        };
    }

    if let Some(ce) = err.downcast_ref::<StateCodecError>() {
        return format!(
            "What happened: The saved pump state could not be restored ({ce}).\nLikely causes: The state file was written by an incompatible version or edited by hand.\nHow to fix: Move storage.state_file aside and run `podctl activate`."
        );
    }

    // String-based heuristics for errors coming from config or CSV loading
    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("basal schedule csv must have headers") {
        return "Invalid headers in basal schedule CSV. Expected 'start_minutes,units_per_hour'."
            .to_string();
    }

    if lower.contains("basal schedule") {
        return format!(
            "What happened: The basal schedule is invalid ({msg}).\nHow to fix: Start at minute 0, keep start times increasing, and use rates in 0.05 U/hr steps."
        );
    }

    if lower.contains("parse config") || lower.contains("invalid config") {
        return format!(
            "What happened: Configuration is invalid ({msg}).\nHow to fix: Edit the TOML config and try again."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes per pump error kind; anything else is 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match err.downcast_ref::<PumpManagerError>() {
        Some(PumpManagerError::Busy) => 3,
        Some(PumpManagerError::CommunicationFailure(_)) => 4,
        Some(PumpManagerError::InvalidProgram(_)) => 5,
        Some(PumpManagerError::StaleData { .. }) => 6,
        Some(PumpManagerError::PersistenceFailure(_)) => 7,
        Some(PumpManagerError::NoActivePod) => 8,
        None => 1,
    }
}

fn reason_name(e: &PumpManagerError) -> &'static str {
    match e {
        PumpManagerError::Busy => "Busy",
        PumpManagerError::CommunicationFailure(_) => "CommunicationFailure",
        PumpManagerError::InvalidProgram(_) => "InvalidProgram",
        PumpManagerError::StaleData { .. } => "StaleData",
        PumpManagerError::PersistenceFailure(_) => "PersistenceFailure",
        PumpManagerError::NoActivePod => "NoActivePod",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let Some(pe) = err.downcast_ref::<PumpManagerError>() else {
        return json!({ "reason": "Error", "message": humanize(err) }).to_string();
    };
    let details = match pe {
        PumpManagerError::CommunicationFailure(e) => Some(json!({
            "comm_error": e.to_string(),
            "may_have_executed": e.may_have_executed(),
        })),
        PumpManagerError::StaleData {
            last_status_date,
            cause,
        } => Some(json!({
            "last_status_date": last_status_date,
            "comm_error": cause.to_string(),
        })),
        _ => None,
    };
    let mut obj = json!({ "reason": reason_name(pe), "message": humanize(err) });
    if let Some(d) = details {
        obj["details"] = d;
    }
    obj.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(PumpManagerError::Busy, 3)]
    #[case(PumpManagerError::CommunicationFailure(CommError::NoResponse), 4)]
    #[case(PumpManagerError::InvalidProgram("x".into()), 5)]
    #[case(PumpManagerError::StaleData { last_status_date: None, cause: CommError::NotConnected }, 6)]
    #[case(PumpManagerError::PersistenceFailure("disk".into()), 7)]
    #[case(PumpManagerError::NoActivePod, 8)]
    fn exit_codes_per_error(#[case] e: PumpManagerError, #[case] code: i32) {
        assert_eq!(exit_code_for_error(&eyre::Report::new(e)), code);
    }

    #[test]
    fn wrapped_errors_keep_their_exit_code() {
        use eyre::WrapErr;
        let r: Result<(), _> = Err(PumpManagerError::Busy);
        let err = r.wrap_err("enact bolus").unwrap_err();
        assert_eq!(exit_code_for_error(&err), 3);
        assert_eq!(exit_code_for_error(&eyre::eyre!("plain")), 1);
    }

    #[test]
    fn uncertain_failure_json_flags_possible_delivery() {
        let err = eyre::Report::new(PumpManagerError::CommunicationFailure(CommError::Transport(
            "reset".into(),
        )));
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "CommunicationFailure");
        assert_eq!(v["details"]["may_have_executed"], true);
        assert!(v["message"].as_str().unwrap().contains("uncertain"));
    }

    #[test]
    fn csv_header_message_is_short() {
        let err = eyre::eyre!("basal schedule CSV must have headers 'start_minutes,units_per_hour', got: a,b");
        assert!(humanize(&err).starts_with("Invalid headers in basal schedule CSV"));
    }
}
