//! Request dispatching for the slave side
//!
//! Routes each parsed request to the register bank through a closed mapping
//! from function code to target, applies protocol validation, and answers
//! with either a normal or an exception response. Validation failures are
//! not faults: the exception response is the correct protocol outcome and
//! the dispatch still reports success.

use std::net::SocketAddr;
use std::time::Duration;

use tracing::debug;

use crate::config::ServerConfig;
use crate::constants::{
    EXCEPTION_ILLEGAL_DATA_ADDRESS, EXCEPTION_ILLEGAL_DATA_VALUE, EXCEPTION_ILLEGAL_FUNCTION,
    FC_READ_COILS, FC_READ_DISCRETE_INPUTS, FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS,
    FC_WRITE_SINGLE_COIL, FC_WRITE_SINGLE_REGISTER,
};
use crate::error::Result;
use crate::registers::{ChangeListener, RegisterBank, RegisterType};
use crate::server::{ModbusTcpServer, ParsedRequest};

/// Dispatch target of a supported function code.
///
/// Write variants exist only for the two writable register categories, so a
/// write into a read-only bank is unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionTarget {
    /// FC01-FC04: read from one of the four register categories
    Read(RegisterType),
    /// FC05: write a single coil
    WriteCoil,
    /// FC06: write a single holding register
    WriteRegister,
}

/// Map a function code to its dispatch target.
///
/// Total over the six function codes this slave serves; everything else
/// yields `None` and is answered with ILLEGAL_FUNCTION.
pub fn function_target(function_code: u8) -> Option<FunctionTarget> {
    match function_code {
        FC_READ_COILS => Some(FunctionTarget::Read(RegisterType::Coils)),
        FC_READ_DISCRETE_INPUTS => Some(FunctionTarget::Read(RegisterType::DiscreteInputs)),
        FC_READ_HOLDING_REGISTERS => Some(FunctionTarget::Read(RegisterType::HoldingRegisters)),
        FC_READ_INPUT_REGISTERS => Some(FunctionTarget::Read(RegisterType::InputRegisters)),
        FC_WRITE_SINGLE_COIL => Some(FunctionTarget::WriteCoil),
        FC_WRITE_SINGLE_REGISTER => Some(FunctionTarget::WriteRegister),
        _ => None,
    }
}

/// A complete Modbus TCP slave: listener plus register bank.
pub struct ModbusTcpSlave {
    transport: ModbusTcpServer,
    bank: RegisterBank,
}

impl ModbusTcpSlave {
    /// Create a slave with an empty register bank
    pub fn new() -> Self {
        Self::with_bank(RegisterBank::new())
    }

    /// Create a slave around a prepared register bank
    pub fn with_bank(bank: RegisterBank) -> Self {
        Self {
            transport: ModbusTcpServer::new(),
            bank,
        }
    }

    /// Bind the listening socket (see [`ModbusTcpServer::bind`])
    pub async fn bind(&mut self, local_addr: &str, local_port: u16, backlog: u32) -> Result<()> {
        self.transport.bind(local_addr, local_port, backlog).await
    }

    /// Bind using a [`ServerConfig`]
    pub async fn bind_config(&mut self, config: &ServerConfig) -> Result<()> {
        self.bind(&config.bind_address, config.port, config.backlog)
            .await
    }

    /// True once the listening socket is bound
    pub fn is_bound(&self) -> bool {
        self.transport.is_bound()
    }

    /// Local address of the listening socket
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Shared access to the register bank
    pub fn bank(&self) -> &RegisterBank {
        &self.bank
    }

    /// Exclusive access to the register bank
    pub fn bank_mut(&mut self) -> &mut RegisterBank {
        &mut self.bank
    }

    /// Install the observer fired after each committed transport write
    pub fn on_register_change(&mut self, listener: ChangeListener) {
        self.bank.on_change(listener);
    }

    /// Serve at most one request within the given deadline.
    ///
    /// Returns `Ok(true)` when a request was consumed — including requests
    /// answered with an exception response — and `Ok(false)` when the
    /// deadline elapsed with no work. A zero timeout performs exactly one
    /// accept/receive attempt.
    pub async fn process(
        &mut self,
        overall_timeout: Duration,
        allowed_unit_ids: Option<&[u8]>,
    ) -> Result<bool> {
        let Some(request) = self.transport.poll(overall_timeout, allowed_unit_ids).await? else {
            return Ok(false);
        };

        match function_target(request.function) {
            None => {
                debug!(
                    "Rejecting unsupported function code {:02X}",
                    request.function
                );
                self.transport
                    .send_exception(&request, EXCEPTION_ILLEGAL_FUNCTION)
                    .await?;
            }
            Some(FunctionTarget::Read(register_type)) => {
                self.process_read(&request, register_type).await?;
            }
            Some(FunctionTarget::WriteCoil) => {
                self.process_write_coil(&request).await?;
            }
            Some(FunctionTarget::WriteRegister) => {
                self.process_write_register(&request).await?;
            }
        }

        Ok(true)
    }

    async fn process_read(
        &mut self,
        request: &ParsedRequest,
        register_type: RegisterType,
    ) -> Result<()> {
        let Some(values) = self.bank.get(register_type, request.register_addr) else {
            return self
                .transport
                .send_exception(request, EXCEPTION_ILLEGAL_DATA_ADDRESS)
                .await;
        };

        self.transport.send_response(request, values).await
    }

    async fn process_write_coil(&mut self, request: &ParsedRequest) -> Result<()> {
        let address = request.register_addr;

        if !self.bank.contains(RegisterType::Coils, address) {
            return self
                .transport
                .send_exception(request, EXCEPTION_ILLEGAL_DATA_ADDRESS)
                .await;
        }

        // FC05 value byte: 0xFF = ON, 0x00 = OFF; anything else is rejected
        // and the store stays untouched.
        let value = match request.data.first().copied() {
            Some(0x00) => false,
            Some(0xFF) => true,
            _ => {
                return self
                    .transport
                    .send_exception(request, EXCEPTION_ILLEGAL_DATA_VALUE)
                    .await;
            }
        };

        // Confirmation first, then the commit, then the observer.
        self.transport.send_response(request, &[]).await?;
        self.bank.set_coil(address, value);
        self.bank
            .notify_change(RegisterType::Coils, address, &[u16::from(value)]);
        Ok(())
    }

    async fn process_write_register(&mut self, request: &ParsedRequest) -> Result<()> {
        let address = request.register_addr;

        if !self.bank.contains(RegisterType::HoldingRegisters, address) {
            return self
                .transport
                .send_exception(request, EXCEPTION_ILLEGAL_DATA_ADDRESS)
                .await;
        }

        let Some(&value) = request.data_as_registers().first() else {
            return self
                .transport
                .send_exception(request, EXCEPTION_ILLEGAL_DATA_VALUE)
                .await;
        };

        self.transport.send_response(request, &[]).await?;
        self.bank.set_hreg(address, value);
        self.bank
            .notify_change(RegisterType::HoldingRegisters, address, &[value]);
        Ok(())
    }
}

impl Default for ModbusTcpSlave {
    fn default() -> Self {
        Self::new()
    }
}
