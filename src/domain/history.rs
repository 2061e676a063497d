// Rolling history of recent samples for live display
use std::collections::VecDeque;

use crate::domain::sample::Sample;

/// Default number of samples retained per metric.
pub const DEFAULT_CAPACITY: usize = 100;

/// Five parallel bounded sequences (time, voltage, current, power,
/// temperature) with strict FIFO eviction. All five always have equal
/// length; index i across them refers to the same accepted sample.
#[derive(Debug)]
pub struct HistoryStore {
    capacity: usize,
    time: VecDeque<f64>,
    voltage: VecDeque<f64>,
    current: VecDeque<f64>,
    power: VecDeque<f64>,
    temperature: VecDeque<f64>,
}

/// Owned copy of the history sequences handed to presentation. Read-only
/// by construction; mutating it cannot touch the store.
#[derive(Debug, Clone, Default)]
pub struct HistorySnapshot {
    pub time: Vec<f64>,
    pub voltage: Vec<f64>,
    pub current: Vec<f64>,
    pub power: Vec<f64>,
    pub temperature: Vec<f64>,
}

impl HistoryStore {
    /// Capacity is fixed for the lifetime of the store.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            time: VecDeque::with_capacity(capacity),
            voltage: VecDeque::with_capacity(capacity),
            current: VecDeque::with_capacity(capacity),
            power: VecDeque::with_capacity(capacity),
            temperature: VecDeque::with_capacity(capacity),
        }
    }

    /// Push one sample onto every sequence, evicting the oldest entry first
    /// when at capacity.
    pub fn append(&mut self, sample: &Sample) {
        if self.time.len() == self.capacity {
            self.time.pop_front();
            self.voltage.pop_front();
            self.current.pop_front();
            self.power.pop_front();
            self.temperature.pop_front();
        }
        self.time.push_back(sample.session_elapsed);
        self.voltage.push_back(sample.voltage);
        self.current.push_back(sample.current);
        self.power.push_back(sample.power);
        self.temperature.push_back(sample.temperature);
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            time: self.time.iter().copied().collect(),
            voltage: self.voltage.iter().copied().collect(),
            current: self.current.iter().copied().collect(),
            power: self.power.iter().copied().collect(),
            temperature: self.temperature.iter().copied().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}
