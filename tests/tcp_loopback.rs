//! End-to-end master/slave exchanges over the loopback interface
//!
//! Each test binds a slave on 127.0.0.1, drives it from a spawned task, and
//! exercises it with a real `ModbusTcpClient` connection.

use std::net::SocketAddr;
use std::sync::mpsc;
use std::time::Duration;

use tokio::task::JoinHandle;

use mblink::{
    ModbusClient, ModbusError, ModbusTcpClient, ModbusTcpSlave, PduBuilder, RegisterBank,
    RegisterType,
};

/// Bind a slave on an ephemeral loopback port and serve it until
/// `expected_requests` requests have been consumed.
async fn spawn_slave(
    setup: impl FnOnce(&mut RegisterBank),
    expected_requests: usize,
) -> (SocketAddr, JoinHandle<ModbusTcpSlave>) {
    let mut slave = ModbusTcpSlave::new();
    setup(slave.bank_mut());
    slave.bind("127.0.0.1", 0, 10).await.expect("bind failed");
    let addr = slave.local_addr().expect("no local address");

    let handle = tokio::spawn(async move {
        let mut served = 0;
        for _ in 0..100 {
            if served >= expected_requests {
                break;
            }
            match slave.process(Duration::from_millis(100), None).await {
                Ok(true) => served += 1,
                Ok(false) => {}
                Err(e) => panic!("slave error: {e}"),
            }
        }
        slave
    });

    (addr, handle)
}

async fn connect(addr: SocketAddr) -> ModbusTcpClient {
    ModbusTcpClient::from_address(&addr.to_string(), Duration::from_secs(2))
        .await
        .expect("connect failed")
}

#[tokio::test]
async fn write_single_register_updates_the_bank() {
    // The canonical exchange: bind, connect, write HREG[10] = 42.
    let mut slave = ModbusTcpSlave::new();
    slave.bank_mut().add_hreg(10, 0);
    slave
        .bind("127.0.0.1", 15020, 10)
        .await
        .expect("bind failed");

    let handle = tokio::spawn(async move {
        for _ in 0..100 {
            if slave.process(Duration::from_millis(100), None).await.unwrap() {
                break;
            }
        }
        slave
    });

    let mut master = ModbusTcpClient::connect("127.0.0.1", 15020, Duration::from_secs(2))
        .await
        .expect("connect failed");

    let confirmed = master.write_single_register(1, 10, 42).await.unwrap();
    assert!(confirmed);

    let slave = handle.await.unwrap();
    assert_eq!(slave.bank().hreg(10), Some(42));
}

#[tokio::test]
async fn read_holding_registers_returns_the_stored_sequence() {
    let (addr, handle) = spawn_slave(
        |bank| bank.set(RegisterType::HoldingRegisters, 5, vec![100, 200]),
        1,
    )
    .await;

    let mut master = connect(addr).await;
    let values = master.read_holding_registers(1, 5, 2).await.unwrap();
    assert_eq!(values, vec![100, 200]);

    handle.await.unwrap();
}

#[tokio::test]
async fn signed_register_reads_interpret_words_as_i16() {
    let (addr, handle) = spawn_slave(
        |bank| bank.set(RegisterType::InputRegisters, 0, vec![0xFF38, 100]),
        1,
    )
    .await;

    let mut master = connect(addr).await;
    let values = master.read_input_registers_signed(1, 0, 2).await.unwrap();
    assert_eq!(values, vec![-200, 100]);

    handle.await.unwrap();
}

#[tokio::test]
async fn write_single_coil_roundtrip() {
    let (addr, handle) = spawn_slave(|bank| bank.add_coil(3, false), 3).await;

    let mut master = connect(addr).await;

    assert!(master.write_single_coil(1, 3, true).await.unwrap());
    let bits = master.read_coils(1, 3, 1).await.unwrap();
    assert!(bits[0]);

    assert!(master.write_single_coil(1, 3, false).await.unwrap());

    let slave = handle.await.unwrap();
    assert_eq!(slave.bank().coil(3), Some(false));
}

#[tokio::test]
async fn invalid_coil_value_leaves_the_store_unchanged() {
    let (addr, handle) = spawn_slave(|bank| bank.add_coil(3, false), 1).await;

    let mut master = connect(addr).await;

    // Hand-built FC05 with value byte 0x01: neither 0x00 nor 0xFF.
    let pdu = PduBuilder::new()
        .function_code(0x05)
        .unwrap()
        .address(3)
        .unwrap()
        .quantity(0x0100)
        .unwrap()
        .build();

    let err = master.send_and_receive(1, &pdu, false).await.unwrap_err();
    assert_eq!(
        err,
        ModbusError::Exception {
            function: 0x05,
            code: 0x03
        }
    );

    let slave = handle.await.unwrap();
    assert_eq!(slave.bank().coil(3), Some(false));
}

#[tokio::test]
async fn read_of_absent_address_yields_illegal_data_address() {
    let (addr, handle) = spawn_slave(|_| {}, 1).await;

    let mut master = connect(addr).await;
    let err = master.read_input_registers(1, 99, 1).await.unwrap_err();
    assert_eq!(
        err,
        ModbusError::Exception {
            function: 0x04,
            code: 0x02
        }
    );

    handle.await.unwrap();
}

#[tokio::test]
async fn unsupported_function_yields_illegal_function() {
    let (addr, handle) = spawn_slave(|bank| bank.add_hreg(0, 1), 1).await;

    let mut master = connect(addr).await;
    let err = master
        .write_multiple_registers(1, 0, &[1, 2])
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ModbusError::Exception {
            function: 0x10,
            code: 0x01
        }
    );

    handle.await.unwrap();
}

#[tokio::test]
async fn committed_writes_notify_the_observer() {
    let (tx, rx) = mpsc::channel();

    let mut slave = ModbusTcpSlave::new();
    slave.bank_mut().add_hreg(7, 0);
    slave.on_register_change(Box::new(move |reg_type, address, values| {
        let _ = tx.send((reg_type, address, values.to_vec()));
    }));
    slave.bind("127.0.0.1", 0, 10).await.unwrap();
    let addr = slave.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        for _ in 0..100 {
            if slave.process(Duration::from_millis(100), None).await.unwrap() {
                break;
            }
        }
    });

    let mut master = connect(addr).await;
    assert!(master.write_single_register(1, 7, 9).await.unwrap());
    handle.await.unwrap();

    assert_eq!(
        rx.try_recv().unwrap(),
        (RegisterType::HoldingRegisters, 7, vec![9])
    );
}

#[tokio::test]
async fn requests_for_filtered_units_are_silently_discarded() {
    let mut slave = ModbusTcpSlave::new();
    slave.bank_mut().add_hreg(1, 5);
    slave.bind("127.0.0.1", 0, 10).await.unwrap();
    let addr = slave.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let mut served = 0;
        for _ in 0..100 {
            if served >= 1 {
                break;
            }
            if slave
                .process(Duration::from_millis(100), Some(&[1]))
                .await
                .unwrap()
            {
                served += 1;
            }
        }
    });

    let mut master = ModbusTcpClient::from_address(&addr.to_string(), Duration::from_millis(500))
        .await
        .unwrap();

    // Unit 9 is not served: no response at all, the master times out.
    let err = master.read_holding_registers(9, 1, 1).await.unwrap_err();
    assert!(matches!(err, ModbusError::Timeout(_)));

    // Unit 1 is served normally on the same connection.
    let values = master.read_holding_registers(1, 1, 1).await.unwrap();
    assert_eq!(values, vec![5]);

    handle.await.unwrap();
}

#[tokio::test]
async fn new_connection_replaces_the_active_client() {
    let (addr, handle) = spawn_slave(|bank| bank.add_hreg(0, 77), 1).await;

    let first = connect(addr).await;
    // Give the slave a cycle to seat the first connection, then supersede it.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let mut second = connect(addr).await;
    tokio::time::sleep(Duration::from_millis(700)).await;

    // Last-to-connect wins.
    let values = second.read_holding_registers(1, 0, 1).await.unwrap();
    assert_eq!(values, vec![77]);

    drop(first);
    handle.await.unwrap();
}
