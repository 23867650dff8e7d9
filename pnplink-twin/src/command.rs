use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::message::{CommandRequest, CommandResponse};
use crate::shadow::DeviceShadow;

/// Restart the device
pub const REBOOT: &str = "reboot";

/// Report the temperature statistics since a point in time
pub const MAX_MIN_REPORT: &str = "getMaxMinReport";

const STATUS_ACCEPTED: u16 = 0;
const STATUS_OK: u16 = 200;
const STATUS_NOT_FOUND: u16 = 404;

/// What handling a command resulted in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub response: CommandResponse,

    /// The device should restart once the response is sent
    pub restart: bool,
}

impl CommandOutcome {
    fn respond(response: CommandResponse) -> Self {
        Self {
            response,
            restart: false,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MaxMinReport {
    max_temp: f64,
    min_temp: f64,
    avg_temp: f64,
    start_time: String,
    end_time: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReportSince {
    Object { since: String },
    Bare(String),
}

/// Routes command invocations by exact name
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    started_at: DateTime<Utc>,
}

impl CommandDispatcher {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self { started_at }
    }

    pub fn dispatch(
        &self,
        request: &CommandRequest<'_>,
        shadow: &DeviceShadow,
        now: DateTime<Utc>,
    ) -> CommandOutcome {
        match request.name {
            REBOOT => {
                info!("reboot requested");
                CommandOutcome {
                    response: CommandResponse::new(STATUS_ACCEPTED, Vec::new()),
                    restart: true,
                }
            }
            MAX_MIN_REPORT => CommandOutcome::respond(self.max_min_report(request, shadow, now)),
            name => {
                warn!(command = name, "unknown command");
                CommandOutcome::respond(CommandResponse::new(STATUS_NOT_FOUND, b"{}".to_vec()))
            }
        }
    }

    fn max_min_report(
        &self,
        request: &CommandRequest<'_>,
        shadow: &DeviceShadow,
        now: DateTime<Utc>,
    ) -> CommandResponse {
        let start_time = self.report_since(request.payload);
        let report = MaxMinReport {
            max_temp: shadow.maximum(),
            min_temp: shadow.minimum(),
            avg_temp: shadow.average(),
            start_time: format_time(start_time),
            end_time: format_time(now),
        };

        match serde_json::to_vec(&report) {
            Ok(payload) => CommandResponse::new(STATUS_OK, payload),
            Err(e) => {
                // non-finite statistics cannot be represented in JSON
                warn!("failed to encode report: {e}");
                CommandResponse::new(500, b"{}".to_vec())
            }
        }
    }

    // The report covers the time since boot unless the caller gives a start
    fn report_since(&self, payload: &[u8]) -> DateTime<Utc> {
        if payload.is_empty() {
            return self.started_at;
        }

        let since = match serde_json::from_slice::<ReportSince>(payload) {
            Ok(ReportSince::Object { since }) | Ok(ReportSince::Bare(since)) => since,
            Err(_) => {
                warn!("ignoring malformed report request");
                return self.started_at;
            }
        };

        match DateTime::parse_from_rfc3339(&since) {
            Ok(time) => time.with_timezone(&Utc),
            Err(e) => {
                warn!("ignoring invalid report start time {since}: {e}");
                self.started_at
            }
        }
    }
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}
