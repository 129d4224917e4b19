//! Subcommand handlers and their text or JSON output.

use std::path::Path;
use std::time::Duration;

use chrono::SecondsFormat;
use pump_config::Config;
use pump_core::conversions::schedule_pairs;
use pump_core::{BasalDeliveryState, BolusState, DoseRecord, PumpManagerStatus};
use pump_sim::PodModel;
use pump_traits::CommError;
use serde_json::{Value, json};

use crate::cli::Commands;
use crate::ledger::Ledger;
use crate::session::Session;

fn emit(json_mode: bool, value: &Value, text: &str) {
    if json_mode {
        println!("{value}");
    } else {
        println!("{text}");
    }
}

fn basal_json(state: &BasalDeliveryState) -> Value {
    match state {
        BasalDeliveryState::Active(since) => json!({ "state": "active", "since": since }),
        BasalDeliveryState::Suspending => json!({ "state": "suspending" }),
        BasalDeliveryState::Suspended(since) => json!({ "state": "suspended", "since": since }),
        BasalDeliveryState::Resuming => json!({ "state": "resuming" }),
        BasalDeliveryState::InitiatingTempBasal => json!({ "state": "initiating_temp_basal" }),
        BasalDeliveryState::TempBasal(dose) => json!({ "state": "temp_basal", "dose": dose }),
        BasalDeliveryState::CancelingTempBasal => json!({ "state": "canceling_temp_basal" }),
    }
}

fn bolus_json(state: &BolusState) -> Value {
    match state {
        BolusState::None => json!({ "state": "none" }),
        BolusState::Initiating => json!({ "state": "initiating" }),
        BolusState::InProgress(dose) => json!({ "state": "in_progress", "dose": dose }),
        BolusState::Canceling => json!({ "state": "canceling" }),
    }
}

fn status_json(session: &Session, status: &PumpManagerStatus) -> Value {
    let manager = &session.manager;
    let state = manager.state();
    let progress = manager.bolus_progress().map(|(p, timer)| {
        json!({
            "delivered_units": p.delivered_units,
            "percent_complete": p.percent_complete,
            "pulse_interval_ms": timer.map(|t| t.interval.num_milliseconds()),
        })
    });
    json!({
        "basal": basal_json(&status.basal_delivery_state),
        "bolus": bolus_json(&status.bolus_state),
        "bolus_progress": progress,
        "utc_offset_secs": status.utc_offset_secs,
        "pump_data_stale": manager.is_pump_data_stale(),
        "last_status_date": state.last_status_date,
        "pod_activated_at": state.pod_activated_at,
        "pod_expires_at": manager.pod_expires_at(),
        "reservoir": state.reservoir_level,
        "unacknowledged_doses": state.finalized_doses.len(),
    })
}

fn dose_json(dose: &DoseRecord) -> Value {
    json!({
        "sync_identifier": dose.sync_identifier(),
        "dose": dose,
        "programmed_units": dose.programmed_units(),
        "total_units": dose.total_units(),
    })
}

fn print_status(session: &Session, json_mode: bool) {
    let status = session.manager.status();
    emit(
        json_mode,
        &status_json(session, &status),
        &session.manager.to_string(),
    );
}

/// Run one subcommand against a session and close it.
pub fn run(cfg: &Config, cmd: &Commands, json_mode: bool, fault: Option<CommError>) -> eyre::Result<()> {
    let activate = matches!(cmd, Commands::Activate);
    let session = Session::open(cfg, activate, fault)?;
    let outcome = dispatch(&session, cfg, cmd, json_mode);
    // State is written even when the command failed.
    let closed = session.close();
    outcome.and(closed)
}

fn dispatch(session: &Session, cfg: &Config, cmd: &Commands, json_mode: bool) -> eyre::Result<()> {
    let manager = &session.manager;
    match cmd {
        Commands::Status => print_status(session, json_mode),
        Commands::Activate => {
            let status = session.wait(manager.get_pod_status())?;
            tracing::info!(?status, "pod activated");
            if !json_mode {
                println!("Pod activated.");
            }
            print_status(session, json_mode);
        }
        Commands::Refresh => {
            session.wait(manager.assert_current_pump_data())?;
            if !json_mode {
                println!("Pump data is current.");
            }
            print_status(session, json_mode);
        }
        Commands::Bolus { units } => {
            let dose = session.wait(manager.enact_bolus(*units, manager.now()))?;
            emit(
                json_mode,
                &dose_json(&dose),
                &format!(
                    "Bolus of {:.2} U started; ends {}",
                    dose.programmed_units(),
                    dose.end_time
                        .map_or_else(|| "n/a".to_string(), |t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                ),
            );
        }
        Commands::CancelBolus => match session.wait(manager.cancel_bolus())? {
            Some(dose) => emit(
                json_mode,
                &dose_json(&dose),
                &format!(
                    "Bolus canceled; delivered {:.2} of {:.2} U",
                    dose.total_units(),
                    dose.programmed_units()
                ),
            ),
            None => emit(json_mode, &Value::Null, "No bolus was running."),
        },
        Commands::TempBasal { rate, minutes } => {
            let duration = Duration::from_secs(minutes.saturating_mul(60));
            let dose = session.wait(manager.enact_temp_basal(*rate, duration))?;
            let text = if dose.duration().is_some_and(|d| d.is_zero()) {
                "Temp basal canceled.".to_string()
            } else {
                format!("Temp basal set: {dose}")
            };
            emit(json_mode, &dose_json(&dose), &text);
        }
        Commands::CancelTempBasal => match session.wait(manager.cancel_temp_basal())? {
            Some(dose) => emit(
                json_mode,
                &dose_json(&dose),
                &format!("Temp basal canceled; delivered {:.2} U", dose.total_units()),
            ),
            None => emit(json_mode, &Value::Null, "No temp basal was running."),
        },
        Commands::Suspend => {
            session.wait(manager.suspend_delivery())?;
            emit(json_mode, &json!({ "suspended": true }), "Delivery suspended.");
        }
        Commands::Resume => {
            session.wait(manager.resume_delivery())?;
            emit(json_mode, &json!({ "suspended": false }), "Delivery resumed.");
        }
        Commands::SetBasal { csv } => {
            let rows = match csv {
                Some(path) => pump_config::load_basal_schedule_csv(path)?,
                None => cfg.basal_rows()?,
            };
            session.wait(manager.set_basal_schedule(&schedule_pairs(&rows)))?;
            let schedule = manager.state().basal_schedule;
            emit(
                json_mode,
                &json!({ "basal_schedule": schedule, "daily_total_units": schedule.daily_total_units() }),
                &format!(
                    "Basal schedule set: {} segments, {:.2} U/day",
                    schedule.entries().len(),
                    schedule.daily_total_units()
                ),
            );
        }
        Commands::Ledger => {
            manager.finalize_and_store();
            let ledger = Ledger::load(Path::new(&cfg.storage.ledger_file))?;
            let text = if ledger.doses.is_empty() {
                "No doses recorded.".to_string()
            } else {
                ledger
                    .doses
                    .iter()
                    .map(|e| e.dose.to_string())
                    .collect::<Vec<_>>()
                    .join("\n")
            };
            emit(json_mode, &serde_json::to_value(&ledger)?, &text);
        }
        Commands::Discard => {
            manager.discard_pod();
            session.pod.replace_model(PodModel::unpaired(manager.now()));
            emit(json_mode, &json!({ "discarded": true }), "Pod discarded.");
        }
    }
    Ok(())
}
