pub const SEGMENT_THERMOSTAT: &str = "thermostat";
pub const SEGMENT_FURNACE: &str = "furnace";
pub const SEGMENT_AC: &str = "ac";
pub const SEGMENT_TARGET: &str = "target";
pub const SEGMENT_SENSORS: &str = "sensors";
pub const SEGMENT_TEMPERATURE: &str = "temperature";

pub const TOPIC_PREFIX: &str = "hvac";
pub const TOPIC_CONTROLLER_STATUS: &str = "hvac/controller/status";

/// MQTT topic an event is published on: `hvac/<segments>`.
pub fn mqtt_topic(segments: &[String]) -> String {
    let mut topic = String::from(TOPIC_PREFIX);
    for segment in segments {
        topic.push('/');
        topic.push_str(segment);
    }
    topic
}
