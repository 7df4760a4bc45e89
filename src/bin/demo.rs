//! Loopback demonstration: a slave with a few registers and a master
//! exercising every supported operation against it.
//!
//! Run with `RUST_LOG=debug cargo run --bin demo` for frame-level logging.

use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mblink::{ModbusClient, ModbusTcpClient, ModbusTcpSlave, Result};

const DEMO_PORT: u16 = 15502;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut slave = ModbusTcpSlave::new();
    slave.bank_mut().add_hreg(10, 0);
    slave.bank_mut().add_coil(3, false);
    slave.bank_mut().add_ist(0, true);
    slave.bank_mut().add_ireg(0, 1234);
    slave.on_register_change(Box::new(|reg_type, address, values| {
        info!("register changed: {:?}[{}] = {:?}", reg_type, address, values);
    }));

    slave.bind("127.0.0.1", DEMO_PORT, 10).await?;
    info!("slave bound on 127.0.0.1:{}", DEMO_PORT);

    let server = tokio::spawn(async move {
        for _ in 0..64 {
            if let Err(e) = slave.process(Duration::from_millis(250), None).await {
                error!("slave error: {}", e);
                break;
            }
        }
    });

    let mut master = ModbusTcpClient::connect("127.0.0.1", DEMO_PORT, Duration::from_secs(5)).await?;

    let confirmed = master.write_single_register(1, 10, 42).await?;
    info!("write HREG[10] = 42 -> confirmed: {}", confirmed);

    let values = master.read_holding_registers(1, 10, 1).await?;
    info!("read HREG[10] -> {:?}", values);

    let confirmed = master.write_single_coil(1, 3, true).await?;
    info!("write COIL[3] = true -> confirmed: {}", confirmed);

    let bits = master.read_coils(1, 3, 1).await?;
    info!("read COIL[3] -> {}", bits[0]);

    let bits = master.read_discrete_inputs(1, 0, 1).await?;
    info!("read IST[0] -> {}", bits[0]);

    let values = master.read_input_registers(1, 0, 1).await?;
    info!("read IREG[0] -> {:?}", values);

    master.close().await?;
    server.abort();

    Ok(())
}
