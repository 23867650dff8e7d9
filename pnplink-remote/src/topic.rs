//! IoT Hub MQTT topic names

use crate::twin::MessageKind;
use crate::util::types::{DeviceId, ModelId};

const API_VERSION: &str = "2021-04-12";

pub const COMMANDS_FILTER: &str = "$iothub/methods/POST/#";
pub const TWIN_RESPONSE_FILTER: &str = "$iothub/twin/res/#";
pub const TWIN_DESIRED_FILTER: &str = "$iothub/twin/PATCH/properties/desired/#";

const COMMAND_PREFIX: &str = "$iothub/methods/POST/";
const TWIN_RESPONSE_PREFIX: &str = "$iothub/twin/res/";
const TWIN_DESIRED_PREFIX: &str = "$iothub/twin/PATCH/properties/desired/";

const STATUS_OK: u16 = 200;
const STATUS_NO_CONTENT: u16 = 204;

pub fn username(host: &str, device_id: &DeviceId, model_id: &ModelId) -> String {
    format!(
        "{host}/{device_id}/?api-version={API_VERSION}&model-id={}",
        model_id.url_encoded()
    )
}

pub fn telemetry(device_id: &DeviceId) -> String {
    format!("devices/{device_id}/messages/events/")
}

pub fn command_response(status: u16, rid: &str) -> String {
    format!("$iothub/methods/res/{status}/?$rid={rid}")
}

pub fn twin_get(rid: u32) -> String {
    format!("$iothub/twin/GET/?$rid={rid}")
}

pub fn twin_reported(rid: u32) -> String {
    format!("$iothub/twin/PATCH/properties/reported/?$rid={rid}")
}

/// Where an inbound message should go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Command { name: &'a str, rid: &'a str },
    Twin(MessageKind),

    /// The hub rejected a twin request
    Rejected { status: u16 },

    Ignored,
}

/// Classify an inbound topic
///
/// `pending_get` is the request id of the outstanding twin GET, its
/// response carries the full twin document.
pub fn route(topic: &str, pending_get: Option<u32>) -> Route<'_> {
    if let Some(rest) = topic.strip_prefix(COMMAND_PREFIX) {
        return match rest.split_once("/?") {
            Some((name, query)) if !name.is_empty() => match query_param(query, "$rid") {
                Some(rid) => Route::Command { name, rid },
                None => Route::Ignored,
            },
            _ => Route::Ignored,
        };
    }

    if topic.starts_with(TWIN_DESIRED_PREFIX) {
        return Route::Twin(MessageKind::WritablePropertyUpdate);
    }

    if let Some(rest) = topic.strip_prefix(TWIN_RESPONSE_PREFIX) {
        let (status, query) = rest.split_once("/?").unwrap_or((rest, ""));
        let Ok(status) = status.parse::<u16>() else {
            return Route::Ignored;
        };
        let rid = query_param(query, "$rid").and_then(|rid| rid.parse::<u32>().ok());

        return match status {
            STATUS_OK if rid.is_some() && rid == pending_get => {
                Route::Twin(MessageKind::RequestedSnapshot)
            }
            STATUS_NO_CONTENT => Route::Twin(MessageKind::ReportedAck),
            status if status >= 300 => Route::Rejected { status },
            _ => Route::Ignored,
        };
    }

    Route::Ignored
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find_map(|(k, v)| (k == key).then_some(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_builds_the_username() {
        let device_id: DeviceId = "sv_002".parse().unwrap();
        assert_eq!(
            username("my-hub.azure-devices.net", &device_id, &ModelId::default()),
            "my-hub.azure-devices.net/sv_002/?api-version=2021-04-12&model-id=dtmi%3Acom%3Aexample%3AThermostat%3B1"
        );
    }

    #[test]
    fn test_builds_outbound_topics() {
        let device_id: DeviceId = "sv_002".parse().unwrap();
        assert_eq!(telemetry(&device_id), "devices/sv_002/messages/events/");
        assert_eq!(command_response(200, "7"), "$iothub/methods/res/200/?$rid=7");
        assert_eq!(twin_get(1), "$iothub/twin/GET/?$rid=1");
        assert_eq!(
            twin_reported(2),
            "$iothub/twin/PATCH/properties/reported/?$rid=2"
        );
    }

    #[test]
    fn test_routes_commands() {
        assert_eq!(
            route("$iothub/methods/POST/getMaxMinReport/?$rid=3", None),
            Route::Command {
                name: "getMaxMinReport",
                rid: "3"
            }
        );
        assert_eq!(route("$iothub/methods/POST/reboot", None), Route::Ignored);
        assert_eq!(route("$iothub/methods/POST//?$rid=1", None), Route::Ignored);
    }

    #[test]
    fn test_routes_twin_messages() {
        assert_eq!(
            route("$iothub/twin/res/200/?$rid=4", Some(4)),
            Route::Twin(MessageKind::RequestedSnapshot)
        );
        assert_eq!(
            route("$iothub/twin/res/204/?$rid=5&$version=12", Some(4)),
            Route::Twin(MessageKind::ReportedAck)
        );
        assert_eq!(
            route("$iothub/twin/PATCH/properties/desired/?$version=13", None),
            Route::Twin(MessageKind::WritablePropertyUpdate)
        );
    }

    #[test]
    fn test_ignores_unexpected_twin_responses() {
        // snapshot that was not asked for
        assert_eq!(route("$iothub/twin/res/200/?$rid=9", Some(4)), Route::Ignored);
        assert_eq!(route("$iothub/twin/res/200/?$rid=9", None), Route::Ignored);
        assert_eq!(
            route("$iothub/twin/res/429/?$rid=5", Some(4)),
            Route::Rejected { status: 429 }
        );
        assert_eq!(route("$iothub/twin/res/abc", None), Route::Ignored);
        assert_eq!(route("devices/sv_002/messages/devicebound/", None), Route::Ignored);
    }
}
