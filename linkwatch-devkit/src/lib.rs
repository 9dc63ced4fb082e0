/*!
# Linkwatch DevKit

Development helpers for the linkwatch kernel:
- MQTT stub and the `Publisher` abstraction used by the node simulator
- Wire payload builders for both sensor layouts
- Scriptable metrics source and in-memory record sinks
- `TestHarness` driving the aggregator end to end
*/

pub mod fakes;
pub mod mqtt_stub;
pub mod node_sim;
pub mod payloads;
pub mod test_utils;

pub use fakes::{FlakySink, MemorySink, ScriptedMetricsSource};
pub use mqtt_stub::{MockMqttClient, Publisher};
pub use payloads::PayloadBuilder;
pub use test_utils::TestHarness;
