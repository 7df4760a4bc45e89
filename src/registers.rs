//! Register storage for the slave side
//!
//! An in-process key/value store of register type and address to value
//! sequence, with an optional change-notification hook fired after committed
//! writes.

use std::collections::HashMap;

use tracing::debug;

/// The four Modbus register categories.
///
/// Coils and holding registers are writable through the transport; discrete
/// inputs and input registers are read-only from the protocol's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterType {
    /// Single-bit, read/write (COILS)
    Coils,
    /// Single-bit, read-only (ISTS)
    DiscreteInputs,
    /// 16-bit, read/write (HREGS)
    HoldingRegisters,
    /// 16-bit, read-only (IREGS)
    InputRegisters,
}

impl RegisterType {
    /// True for register types the transport may write to
    pub fn is_writable(&self) -> bool {
        matches!(self, RegisterType::Coils | RegisterType::HoldingRegisters)
    }

    /// True for the single-bit categories
    pub fn is_bit(&self) -> bool {
        matches!(self, RegisterType::Coils | RegisterType::DiscreteInputs)
    }
}

/// Observer invoked after a write has been committed to the bank
pub type ChangeListener = Box<dyn Fn(RegisterType, u16, &[u16]) + Send>;

/// In-memory register bank keyed by `(register type, address)`.
///
/// Values are stored as word sequences; scalar registers are one-element
/// sequences, which keeps read responses uniform. Coil values are 0 or 1.
#[derive(Default)]
pub struct RegisterBank {
    registers: HashMap<(RegisterType, u16), Vec<u16>>,
    change_listener: Option<ChangeListener>,
}

impl RegisterBank {
    /// Create an empty bank
    pub fn new() -> Self {
        Self::default()
    }

    /// True if an address is defined for the given register type
    pub fn contains(&self, register_type: RegisterType, address: u16) -> bool {
        self.registers.contains_key(&(register_type, address))
    }

    /// Value sequence at an address, if defined
    pub fn get(&self, register_type: RegisterType, address: u16) -> Option<&[u16]> {
        self.registers
            .get(&(register_type, address))
            .map(Vec::as_slice)
    }

    /// Define or overwrite the value sequence at an address
    pub fn set(&mut self, register_type: RegisterType, address: u16, values: Vec<u16>) {
        debug!(
            "Register {:?}[{}] set to {:?}",
            register_type, address, values
        );
        self.registers.insert((register_type, address), values);
    }

    /// Remove an address from the bank
    pub fn remove(&mut self, register_type: RegisterType, address: u16) -> bool {
        self.registers.remove(&(register_type, address)).is_some()
    }

    // ========================================================================
    // Typed helpers
    // ========================================================================

    /// Register a coil
    pub fn add_coil(&mut self, address: u16, value: bool) {
        self.set(RegisterType::Coils, address, vec![u16::from(value)]);
    }

    /// Update a coil
    pub fn set_coil(&mut self, address: u16, value: bool) {
        self.add_coil(address, value);
    }

    /// Current coil state, if defined
    pub fn coil(&self, address: u16) -> Option<bool> {
        self.get(RegisterType::Coils, address)
            .and_then(|values| values.first())
            .map(|&v| v != 0)
    }

    /// Register a discrete input
    pub fn add_ist(&mut self, address: u16, value: bool) {
        self.set(RegisterType::DiscreteInputs, address, vec![u16::from(value)]);
    }

    /// Current discrete input state, if defined
    pub fn ist(&self, address: u16) -> Option<bool> {
        self.get(RegisterType::DiscreteInputs, address)
            .and_then(|values| values.first())
            .map(|&v| v != 0)
    }

    /// Register a holding register
    pub fn add_hreg(&mut self, address: u16, value: u16) {
        self.set(RegisterType::HoldingRegisters, address, vec![value]);
    }

    /// Update a holding register
    pub fn set_hreg(&mut self, address: u16, value: u16) {
        self.add_hreg(address, value);
    }

    /// Current holding register value, if defined
    pub fn hreg(&self, address: u16) -> Option<u16> {
        self.get(RegisterType::HoldingRegisters, address)
            .and_then(|values| values.first())
            .copied()
    }

    /// Register an input register
    pub fn add_ireg(&mut self, address: u16, value: u16) {
        self.set(RegisterType::InputRegisters, address, vec![value]);
    }

    /// Current input register value, if defined
    pub fn ireg(&self, address: u16) -> Option<u16> {
        self.get(RegisterType::InputRegisters, address)
            .and_then(|values| values.first())
            .copied()
    }

    // ========================================================================
    // Change notification
    // ========================================================================

    /// Install the observer fired after each committed transport write
    pub fn on_change(&mut self, listener: ChangeListener) {
        self.change_listener = Some(listener);
    }

    /// Notify the observer of a committed write
    pub(crate) fn notify_change(&self, register_type: RegisterType, address: u16, values: &[u16]) {
        if let Some(listener) = &self.change_listener {
            listener(register_type, address, values);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_register_type_capabilities() {
        assert!(RegisterType::Coils.is_writable());
        assert!(RegisterType::HoldingRegisters.is_writable());
        assert!(!RegisterType::DiscreteInputs.is_writable());
        assert!(!RegisterType::InputRegisters.is_writable());

        assert!(RegisterType::Coils.is_bit());
        assert!(!RegisterType::HoldingRegisters.is_bit());
    }

    #[test]
    fn test_bank_get_set_contains() {
        let mut bank = RegisterBank::new();
        assert!(!bank.contains(RegisterType::HoldingRegisters, 10));

        bank.add_hreg(10, 42);
        assert!(bank.contains(RegisterType::HoldingRegisters, 10));
        assert_eq!(bank.hreg(10), Some(42));
        assert_eq!(bank.get(RegisterType::HoldingRegisters, 10), Some(&[42u16][..]));

        // Same address in another register type is distinct
        assert!(!bank.contains(RegisterType::InputRegisters, 10));

        bank.set_hreg(10, 7);
        assert_eq!(bank.hreg(10), Some(7));

        assert!(bank.remove(RegisterType::HoldingRegisters, 10));
        assert_eq!(bank.hreg(10), None);
    }

    #[test]
    fn test_coil_storage_is_normalized() {
        let mut bank = RegisterBank::new();
        bank.add_coil(3, true);
        assert_eq!(bank.get(RegisterType::Coils, 3), Some(&[1u16][..]));
        bank.set_coil(3, false);
        assert_eq!(bank.coil(3), Some(false));
    }

    #[test]
    fn test_sequence_values() {
        let mut bank = RegisterBank::new();
        bank.set(RegisterType::InputRegisters, 100, vec![1, 2, 3]);
        assert_eq!(
            bank.get(RegisterType::InputRegisters, 100),
            Some(&[1u16, 2, 3][..])
        );
    }

    #[test]
    fn test_change_listener_fires() {
        let (tx, rx) = mpsc::channel();
        let mut bank = RegisterBank::new();
        bank.on_change(Box::new(move |reg_type, address, values| {
            tx.send((reg_type, address, values.to_vec())).unwrap();
        }));

        bank.set_hreg(5, 99);
        bank.notify_change(RegisterType::HoldingRegisters, 5, &[99]);

        let (reg_type, address, values) = rx.recv().unwrap();
        assert_eq!(reg_type, RegisterType::HoldingRegisters);
        assert_eq!(address, 5);
        assert_eq!(values, vec![99]);
    }
}
