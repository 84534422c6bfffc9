use std::collections::HashMap;

#[derive(Debug, Clone)]
pub enum MetricValue {
    Gauge(f64),
}

impl MetricValue {
    pub const fn as_f64(&self) -> f64 {
        match self {
            Self::Gauge(v) => *v,
        }
    }
}

pub type Labels = HashMap<String, String>;

#[derive(Debug, Clone)]
pub struct MetricPoint {
    pub name: &'static str,
    pub labels: Labels,
    pub value: MetricValue,
    pub help: &'static str,
}

impl MetricPoint {
    pub fn gauge(name: &'static str, labels: Labels, value: f64, help: &'static str) -> Self {
        Self {
            name,
            labels,
            value: MetricValue::Gauge(value),
            help,
        }
    }

    pub const fn type_name(&self) -> &'static str {
        match self.value {
            MetricValue::Gauge(_) => "gauge",
        }
    }
}
