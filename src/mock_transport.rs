//! We use this mocking module in unit tests to emulate a device behind a [`Transport`].
//!
//! Clones share the same device, so a test can hand one clone to an adapter and keep
//! another to inspect what was written.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::{Arc, Mutex},
};

use crate::{error::TransportError, transport::Transport};

/// One recorded operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    ReadRegisters { address: u16, count: u16 },
    Registers { address: u16, words: Vec<u16> },
    ReadVariable(String),
    Variable { name: String, value: f64 },
    ReadVector(String),
    Vector { name: String, values: Vec<f64> },
}

impl Op {
    pub fn is_write(&self) -> bool {
        matches!(self, Op::Registers { .. } | Op::Variable { .. } | Op::Vector { .. })
    }
}

#[derive(Default)]
struct Device {
    registers: BTreeMap<u16, u16>,
    variables: BTreeMap<String, f64>,
    vectors: BTreeMap<String, Vec<f64>>,
    log: Vec<Op>,
    /// Successive values returned by reads of an address. The last one sticks.
    scripted: BTreeMap<u16, VecDeque<u16>>,
    /// Writes to these addresses are acknowledged but not stored.
    ignored: BTreeSet<u16>,
    fail_next: Option<TransportError>,
    closed: bool,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    device: Arc<Mutex<Device>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Device) -> T) -> T {
        let mut device = self.device.lock().unwrap();
        f(&mut device)
    }

    pub fn set_register(&self, address: u16, value: u16) {
        self.with(|d| d.registers.insert(address, value));
    }

    pub fn set_registers(&self, address: u16, words: &[u16]) {
        for (i, word) in words.iter().enumerate() {
            self.set_register(address + i as u16, *word);
        }
    }

    pub fn register(&self, address: u16) -> u16 {
        self.with(|d| d.registers.get(&address).copied().unwrap_or(0))
    }

    /// Two registers, high word first.
    pub fn register_u32(&self, address: u16) -> u32 {
        ((self.register(address) as u32) << 16) | self.register(address + 1) as u32
    }

    pub fn set_variable(&self, name: &str, value: f64) {
        self.with(|d| d.variables.insert(name.to_string(), value));
    }

    pub fn variable(&self, name: &str) -> Option<f64> {
        self.with(|d| d.variables.get(name).copied())
    }

    pub fn set_vector(&self, name: &str, values: &[f64]) {
        self.with(|d| d.vectors.insert(name.to_string(), values.to_vec()));
    }

    pub fn vector(&self, name: &str) -> Option<Vec<f64>> {
        self.with(|d| d.vectors.get(name).cloned())
    }

    /// Make reads of `address` return `values` in turn, repeating the last.
    pub fn script_reads(&self, address: u16, values: &[u16]) {
        self.with(|d| d.scripted.insert(address, values.iter().copied().collect()));
    }

    /// Acknowledge writes to `address` without storing them.
    pub fn ignore_writes(&self, address: u16) {
        self.with(|d| d.ignored.insert(address));
    }

    /// Fail the next operation with `error`.
    pub fn fail_next(&self, error: TransportError) {
        self.with(|d| d.fail_next = Some(error));
    }

    pub fn log(&self) -> Vec<Op> {
        self.with(|d| d.log.clone())
    }

    pub fn writes(&self) -> Vec<Op> {
        self.log().into_iter().filter(Op::is_write).collect()
    }

    /// Start address of every register write, in order.
    pub fn write_addresses(&self) -> Vec<u16> {
        self.writes()
            .into_iter()
            .filter_map(|op| match op {
                Op::Registers { address, .. } => Some(address),
                _ => None,
            })
            .collect()
    }

    /// Name of every variable or vector write, in order.
    pub fn write_names(&self) -> Vec<String> {
        self.writes()
            .into_iter()
            .filter_map(|op| match op {
                Op::Variable { name, .. } | Op::Vector { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }

    /// How many reads covered `address`.
    pub fn read_count(&self, address: u16) -> usize {
        self.log()
            .iter()
            .filter(|op| match op {
                Op::ReadRegisters { address: start, count } => {
                    (*start..start + count).contains(&address)
                }
                _ => false,
            })
            .count()
    }

    pub fn clear_log(&self) {
        self.with(|d| d.log.clear());
    }

    pub fn is_closed(&self) -> bool {
        self.with(|d| d.closed)
    }
}

impl Device {
    fn check(&mut self) -> Result<(), TransportError> {
        match self.fail_next.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn read_one(&mut self, address: u16) -> u16 {
        if let Some(queue) = self.scripted.get_mut(&address) {
            let value = if queue.len() > 1 { queue.pop_front() } else { queue.front().copied() };
            if let Some(value) = value {
                return value;
            }
        }
        self.registers.get(&address).copied().unwrap_or(0)
    }
}

impl Transport for MockTransport {
    fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, TransportError> {
        self.with(|d| {
            d.log.push(Op::ReadRegisters { address, count });
            d.check()?;
            Ok((0..count).map(|i| d.read_one(address + i)).collect())
        })
    }

    fn write_registers(&mut self, address: u16, words: &[u16]) -> Result<(), TransportError> {
        self.with(|d| {
            d.log.push(Op::Registers {
                address,
                words: words.to_vec(),
            });
            d.check()?;
            for (i, word) in words.iter().enumerate() {
                let target = address + i as u16;
                if !d.ignored.contains(&target) {
                    d.registers.insert(target, *word);
                }
            }
            Ok(())
        })
    }

    fn read_variable(&mut self, name: &str) -> Result<f64, TransportError> {
        self.with(|d| {
            d.log.push(Op::ReadVariable(name.to_string()));
            d.check()?;
            d.variables
                .get(name)
                .copied()
                .ok_or_else(|| TransportError::Remote(format!("no variable {name}")))
        })
    }

    fn write_variable(&mut self, name: &str, value: f64) -> Result<(), TransportError> {
        self.with(|d| {
            d.log.push(Op::Variable {
                name: name.to_string(),
                value,
            });
            d.check()?;
            d.variables.insert(name.to_string(), value);
            Ok(())
        })
    }

    fn read_vector(&mut self, name: &str) -> Result<Vec<f64>, TransportError> {
        self.with(|d| {
            d.log.push(Op::ReadVector(name.to_string()));
            d.check()?;
            Ok(d.vectors.get(name).cloned().unwrap_or_default())
        })
    }

    fn write_vector(&mut self, name: &str, values: &[f64]) -> Result<(), TransportError> {
        self.with(|d| {
            d.log.push(Op::Vector {
                name: name.to_string(),
                values: values.to_vec(),
            });
            d.check()?;
            d.vectors.insert(name.to_string(), values.to_vec());
            Ok(())
        })
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.with(|d| d.closed = true);
        Ok(())
    }
}
