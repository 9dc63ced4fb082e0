//! Communication-issue classification.
//!
//! Rules are an ordered table of `(predicate, category)` pairs; the first
//! predicate that holds decides the category. Connection problems come first
//! and dominate every other diagnosis.

use crate::models::{ConnectionState, IssueCategory};

pub const PACKET_LOSS_THRESHOLD_PERCENT: f64 = 5.0;
pub const LATENCY_THRESHOLD_MS: f64 = 500.0;
pub const THROUGHPUT_FLOOR_BPS: f64 = 1000.0;
pub const RESOURCE_THRESHOLD_PERCENT: f64 = 90.0;

/// Inputs the classifier looks at for one reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierInput {
    pub connection: ConnectionState,
    pub packet_loss_percent: f64,
    pub latency_ms: f64,
    pub throughput_bps: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

pub type Predicate = fn(&ClassifierInput) -> bool;

pub struct Rule {
    pub name: &'static str,
    pub matches: Predicate,
    pub category: IssueCategory,
}

fn disconnected(m: &ClassifierInput) -> bool {
    m.connection != ConnectionState::Connected
}

fn lossy(m: &ClassifierInput) -> bool {
    m.packet_loss_percent > PACKET_LOSS_THRESHOLD_PERCENT
}

fn slow(m: &ClassifierInput) -> bool {
    m.latency_ms > LATENCY_THRESHOLD_MS
}

fn starved(m: &ClassifierInput) -> bool {
    m.throughput_bps < THROUGHPUT_FLOOR_BPS
}

fn overloaded(m: &ClassifierInput) -> bool {
    m.cpu_percent > RESOURCE_THRESHOLD_PERCENT || m.memory_percent > RESOURCE_THRESHOLD_PERCENT
}

pub const RULES: &[Rule] = &[
    Rule {
        name: "connection",
        matches: disconnected,
        category: IssueCategory::Connection,
    },
    Rule {
        name: "packet_loss",
        matches: lossy,
        category: IssueCategory::PacketLoss,
    },
    Rule {
        name: "latency",
        matches: slow,
        category: IssueCategory::Latency,
    },
    Rule {
        name: "throughput",
        matches: starved,
        category: IssueCategory::Throughput,
    },
    Rule {
        name: "resources",
        matches: overloaded,
        category: IssueCategory::ResourceConstraint,
    },
];

pub fn classify(input: &ClassifierInput) -> IssueCategory {
    RULES
        .iter()
        .find(|rule| (rule.matches)(input))
        .map(|rule| rule.category)
        .unwrap_or(IssueCategory::Normal)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nominal() -> ClassifierInput {
        ClassifierInput {
            connection: ConnectionState::Connected,
            packet_loss_percent: 0.0,
            latency_ms: 50.0,
            throughput_bps: 5000.0,
            cpu_percent: 20.0,
            memory_percent: 20.0,
        }
    }

    #[test]
    fn test_nominal_is_normal() {
        assert_eq!(classify(&nominal()), IssueCategory::Normal);
    }

    #[test]
    fn test_connection_dominates_latency() {
        let input = ClassifierInput {
            connection: ConnectionState::Reconnecting,
            latency_ms: 900.0,
            ..nominal()
        };
        assert_eq!(classify(&input), IssueCategory::Connection);
    }

    #[test]
    fn test_each_rule_alone() {
        let cases = [
            (
                ClassifierInput {
                    packet_loss_percent: 5.5,
                    ..nominal()
                },
                IssueCategory::PacketLoss,
            ),
            (
                ClassifierInput {
                    latency_ms: 500.1,
                    ..nominal()
                },
                IssueCategory::Latency,
            ),
            (
                ClassifierInput {
                    throughput_bps: 999.0,
                    ..nominal()
                },
                IssueCategory::Throughput,
            ),
            (
                ClassifierInput {
                    cpu_percent: 91.0,
                    ..nominal()
                },
                IssueCategory::ResourceConstraint,
            ),
            (
                ClassifierInput {
                    memory_percent: 95.0,
                    ..nominal()
                },
                IssueCategory::ResourceConstraint,
            ),
        ];
        for (input, expected) in cases {
            assert_eq!(classify(&input), expected, "{input:?}");
        }
    }

    #[test]
    fn test_thresholds_are_exclusive() {
        let input = ClassifierInput {
            packet_loss_percent: 5.0,
            latency_ms: 500.0,
            throughput_bps: 1000.0,
            cpu_percent: 90.0,
            memory_percent: 90.0,
            ..nominal()
        };
        assert_eq!(classify(&input), IssueCategory::Normal);
    }

    #[test]
    fn test_priority_order() {
        let input = ClassifierInput {
            latency_ms: 800.0,
            throughput_bps: 10.0,
            cpu_percent: 99.0,
            ..nominal()
        };
        assert_eq!(classify(&input), IssueCategory::Latency);

        let input = ClassifierInput {
            throughput_bps: 10.0,
            cpu_percent: 99.0,
            ..nominal()
        };
        assert_eq!(classify(&input), IssueCategory::Throughput);
    }

    #[test]
    fn test_rule_table_order() {
        let names: Vec<&str> = RULES.iter().map(|r| r.name).collect();
        assert_eq!(names, ["connection", "packet_loss", "latency", "throughput", "resources"]);
    }
}
