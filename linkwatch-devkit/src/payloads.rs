/*!
Builders for sensor-node wire payloads, in both layouts the kernel accepts.
*/

/// Message id the sensor nodes derive from their timestamp: the hex encoding
/// of the timestamp's text.
pub fn message_id_for(timestamp: f64) -> String {
    timestamp
        .to_string()
        .bytes()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    timestamp: f64,
    sensor_id: String,
    message_id: Option<String>,
    value: f64,
    wifi_rssi: i64,
    link_quality: i64,
    memory_percent: i64,
    cpu_freq: i64,
    reset_cause: i64,
    qos: i64,
    network_condition: Option<String>,
}

impl PayloadBuilder {
    pub fn new(timestamp: f64, sensor_id: impl Into<String>, value: f64) -> Self {
        Self {
            timestamp,
            sensor_id: sensor_id.into(),
            message_id: None,
            value,
            wifi_rssi: -60,
            link_quality: 0,
            memory_percent: 0,
            cpu_freq: 0,
            reset_cause: 0,
            qos: 1,
            network_condition: None,
        }
    }

    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn rssi(mut self, rssi: i64) -> Self {
        self.wifi_rssi = rssi;
        self
    }

    pub fn link_quality(mut self, quality: i64) -> Self {
        self.link_quality = quality;
        self
    }

    pub fn memory_percent(mut self, percent: i64) -> Self {
        self.memory_percent = percent;
        self
    }

    pub fn cpu_freq(mut self, mhz: i64) -> Self {
        self.cpu_freq = mhz;
        self
    }

    pub fn reset_cause(mut self, cause: i64) -> Self {
        self.reset_cause = cause;
        self
    }

    pub fn qos(mut self, qos: i64) -> Self {
        self.qos = qos;
        self
    }

    pub fn condition(mut self, tag: impl Into<String>) -> Self {
        self.network_condition = Some(tag.into());
        self
    }

    fn id(&self) -> String {
        self.message_id
            .clone()
            .unwrap_or_else(|| message_id_for(self.timestamp))
    }

    /// Full layout; the condition tag is appended only when set.
    pub fn full(&self) -> String {
        let mut out = format!(
            "{},{},{},{},{},{},{},{},{},{}",
            self.timestamp,
            self.sensor_id,
            self.id(),
            self.value,
            self.wifi_rssi,
            self.link_quality,
            self.memory_percent,
            self.cpu_freq,
            self.reset_cause,
            self.qos
        );
        if let Some(tag) = &self.network_condition {
            out.push(',');
            out.push_str(tag);
        }
        out
    }

    /// Legacy layout: timestamp, sensor id, message id, value, rssi.
    pub fn legacy(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.timestamp,
            self.sensor_id,
            self.id(),
            self.value,
            self.wifi_rssi
        )
    }
}
